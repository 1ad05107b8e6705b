//! Scripted collaborators for exercising the join pipeline without a
//! real engine.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hostjoin::dialog::{Dialog, DialogError, Query};
use hostjoin::engine::{
    ApiError, Cluster, EngineConnector, EngineSession, Host, HostSpec, HostState, Network, Nic,
    TlsConfig,
};
use hostjoin::pki::{PkiError, PkiSource};
use hostjoin::registrar::ManualSetupDispatcher;
use hostjoin::vds::{VdsCapabilities, VdsClient, VdsError, VdsStats};

/// Scripted engine shared between the connector and its sessions.
#[derive(Default, Debug)]
pub struct FakeEngine {
    /// Secret the engine accepts; everything else is a 401.
    pub accepted_secret: String,
    pub clusters: Mutex<Vec<Cluster>>,
    /// Cluster id -> networks.
    pub networks: Mutex<HashMap<String, Vec<Network>>>,
    pub nics: Mutex<Vec<Nic>>,
    /// Host states served in order; the last one is sticky.
    pub host_states: Mutex<VecDeque<HostState>>,
    /// Scripted host-add replies; `Err` is a remote rejection detail.
    /// Empty means accept.
    pub add_host_replies: Mutex<VecDeque<Result<(), String>>>,
    /// Scripted non-401 failure served by the next `list_clusters`.
    pub probe_failure: Mutex<Option<(u16, String)>>,
    /// Method log, in call order.
    pub calls: Mutex<Vec<String>>,
    pub auth_attempts: AtomicUsize,
}

impl FakeEngine {
    pub fn with_cluster(name: &str) -> Arc<Self> {
        let engine = Self {
            accepted_secret: "admin-secret".into(),
            ..Self::default()
        };
        engine.clusters.lock().unwrap().push(Cluster {
            id: format!("{name}-id"),
            name: name.into(),
            cpu: None,
            gluster_service: false,
        });
        Arc::new(engine)
    }

    pub fn push_states(&self, states: &[HostState]) {
        self.host_states.lock().unwrap().extend(states.iter().copied());
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(name))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

pub struct FakeConnector(pub Arc<FakeEngine>);

#[async_trait]
impl EngineConnector for FakeConnector {
    async fn authenticate(
        &self,
        _principal: &str,
        secret: &str,
        _tls: &TlsConfig,
        _timeout: Duration,
    ) -> Result<Box<dyn EngineSession>, ApiError> {
        self.0.auth_attempts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            engine: self.0.clone(),
            secret: secret.to_string(),
        }))
    }
}

#[derive(Debug)]
pub struct FakeSession {
    engine: Arc<FakeEngine>,
    secret: String,
}

impl FakeSession {
    /// A session that already authenticated with the accepted secret.
    pub fn authenticated(engine: &Arc<FakeEngine>) -> Self {
        Self {
            engine: engine.clone(),
            secret: engine.accepted_secret.clone(),
        }
    }

    fn check_auth(&self) -> Result<(), ApiError> {
        if self.secret == self.engine.accepted_secret {
            Ok(())
        } else {
            Err(ApiError::Remote {
                status: 401,
                detail: "access denied".into(),
            })
        }
    }
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ApiError> {
        self.engine.record("list_clusters");
        self.check_auth()?;
        if let Some((status, detail)) = self.engine.probe_failure.lock().unwrap().take() {
            return Err(ApiError::Remote { status, detail });
        }
        Ok(self.engine.clusters.lock().unwrap().clone())
    }

    async fn get_cluster(&self, name: &str) -> Result<Cluster, ApiError> {
        self.engine.record(format!("get_cluster:{name}"));
        self.check_auth()?;
        self.engine
            .clusters
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| ApiError::Remote {
                status: 404,
                detail: format!("cluster {name} not found"),
            })
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, ApiError> {
        self.engine.record(format!("update_cluster:{}", cluster.name));
        self.check_auth()?;
        let mut clusters = self.engine.clusters.lock().unwrap();
        if let Some(stored) = clusters.iter_mut().find(|c| c.id == cluster.id) {
            *stored = cluster.clone();
        }
        Ok(cluster.clone())
    }

    async fn list_cluster_networks(&self, cluster_id: &str) -> Result<Vec<Network>, ApiError> {
        self.engine.record(format!("list_cluster_networks:{cluster_id}"));
        self.check_auth()?;
        Ok(self
            .engine
            .networks
            .lock()
            .unwrap()
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_cluster_network(
        &self,
        cluster_id: &str,
        network: &Network,
    ) -> Result<Network, ApiError> {
        self.engine.record(format!(
            "update_cluster_network:{}:{}",
            network.name,
            network.vlan.map_or_else(|| "none".into(), |v| v.to_string())
        ));
        self.check_auth()?;
        let mut networks = self.engine.networks.lock().unwrap();
        if let Some(list) = networks.get_mut(cluster_id) {
            if let Some(stored) = list.iter_mut().find(|n| n.id == network.id) {
                *stored = network.clone();
            }
        }
        Ok(network.clone())
    }

    async fn add_host(&self, spec: &HostSpec) -> Result<Host, ApiError> {
        self.engine.record(format!("add_host:{}", spec.name));
        self.check_auth()?;
        let reply = self.engine.add_host_replies.lock().unwrap().pop_front();
        match reply {
            Some(Err(detail)) => Err(ApiError::Remote { status: 409, detail }),
            _ => Ok(Host {
                name: spec.name.clone(),
                address: spec.address.clone(),
                state: HostState::Installing,
                cluster_id: spec.cluster_id.clone(),
            }),
        }
    }

    async fn get_host(&self, name: &str) -> Result<Host, ApiError> {
        self.engine.record(format!("get_host:{name}"));
        self.check_auth()?;
        let mut states = self.engine.host_states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front().unwrap_or(HostState::Unknown)
        } else {
            states.front().copied().unwrap_or(HostState::Unknown)
        };
        Ok(Host {
            name: name.to_string(),
            address: format!("{name}.example.org"),
            state,
            cluster_id: "Default-id".into(),
        })
    }

    async fn list_host_nics(&self, host_name: &str) -> Result<Vec<Nic>, ApiError> {
        self.engine.record(format!("list_host_nics:{host_name}"));
        self.check_auth()?;
        Ok(self.engine.nics.lock().unwrap().clone())
    }

    async fn disconnect(&self) -> Result<(), ApiError> {
        self.engine.record("disconnect");
        Ok(())
    }
}

/// Dialog serving scripted answers per prompt name.
#[derive(Default)]
pub struct ScriptedDialog {
    pub interactive: bool,
    answers: Mutex<HashMap<String, VecDeque<String>>>,
    confirms: Mutex<HashMap<String, VecDeque<bool>>>,
    pub notes: Mutex<Vec<String>>,
}

impl ScriptedDialog {
    /// Dialog with an operator present.
    pub fn operator() -> Self {
        Self {
            interactive: true,
            ..Self::default()
        }
    }

    /// Dialog for unattended runs (defaults only).
    pub fn unattended() -> Self {
        Self::default()
    }

    pub fn answer(self, name: &str, value: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .entry(name.into())
            .or_default()
            .push_back(value.into());
        self
    }

    pub fn confirm_with(self, name: &str, value: bool) -> Self {
        self.confirms
            .lock()
            .unwrap()
            .entry(name.into())
            .or_default()
            .push_back(value);
        self
    }
}

impl Dialog for ScriptedDialog {
    fn interactive(&self) -> bool {
        self.interactive
    }

    fn query_string(&self, query: &Query<'_>) -> Result<String, DialogError> {
        if let Some(answer) = self
            .answers
            .lock()
            .unwrap()
            .get_mut(query.name)
            .and_then(VecDeque::pop_front)
        {
            return Ok(answer);
        }
        query
            .default
            .map(ToString::to_string)
            .ok_or_else(|| DialogError::NoAnswer(query.name.to_string()))
    }

    fn confirm(&self, name: &str, _prompt: &str, default: bool) -> Result<bool, DialogError> {
        Ok(self
            .confirms
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(default))
    }

    fn note(&self, text: &str) {
        self.notes.lock().unwrap().push(text.to_string());
    }
}

/// Scripted PKI material source.
pub struct FakePki {
    pub ca_pem: String,
    pub valid: bool,
    pub ssh_key: String,
    pub fetch_fails: bool,
}

impl Default for FakePki {
    fn default() -> Self {
        Self {
            ca_pem: "-----BEGIN CERTIFICATE-----\nMIIFake\n-----END CERTIFICATE-----\n".into(),
            valid: true,
            ssh_key: "ssh-rsa AAAAB3NzaEngine engine@mgmt.example.org".into(),
            fetch_fails: false,
        }
    }
}

#[async_trait]
impl PkiSource for FakePki {
    async fn fetch_ca_certificate(&self, _custom_ca: Option<&Path>) -> Result<String, PkiError> {
        if self.fetch_fails {
            return Err(PkiError::Fetch {
                resource: "ca-certificate",
                reason: "connection refused".into(),
            });
        }
        Ok(self.ca_pem.clone())
    }

    async fn validate_ca(&self, _ca_path: &Path) -> Result<bool, PkiError> {
        Ok(self.valid)
    }

    async fn fetch_ssh_key(&self, _tls: &TlsConfig) -> Result<String, PkiError> {
        Ok(self.ssh_key.clone())
    }
}

/// Scripted hypervisor control service.
pub struct FakeVds {
    pub vlans: HashMap<String, u16>,
    pub cpu_model: String,
    pub mem_available_mb: u64,
}

impl Default for FakeVds {
    fn default() -> Self {
        Self {
            vlans: HashMap::new(),
            cpu_model: "model_SandyBridge".into(),
            mem_available_mb: 16384,
        }
    }
}

#[async_trait]
impl VdsClient for FakeVds {
    async fn capabilities(&self) -> Result<VdsCapabilities, VdsError> {
        Ok(VdsCapabilities {
            vlans: self.vlans.clone(),
            cpu_model: self.cpu_model.clone(),
        })
    }

    async fn stats(&self) -> Result<VdsStats, VdsError> {
        Ok(VdsStats {
            mem_available_mb: self.mem_available_mb,
        })
    }
}

/// Scripted manual-setup dispatcher.
#[derive(Default)]
pub struct FakeDispatcher {
    /// Replies served in order; empty means "resolved".
    pub replies: Mutex<VecDeque<bool>>,
    pub invocations: AtomicUsize,
}

impl FakeDispatcher {
    pub fn resolving_after(attempts: usize) -> Self {
        let dispatcher = Self::default();
        {
            let mut replies = dispatcher.replies.lock().unwrap();
            for _ in 1..attempts {
                replies.push_back(false);
            }
            replies.push_back(true);
        }
        dispatcher
    }
}

impl ManualSetupDispatcher for FakeDispatcher {
    fn dispatch(&self, _engine_fqdn: &str, _detail: &str) -> Result<bool, DialogError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true))
    }
}
