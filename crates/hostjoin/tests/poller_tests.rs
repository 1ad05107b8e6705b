//! Readiness poller behavior against scripted engine state sequences.

mod support;

use std::time::Duration;

use hostjoin::context::CancelToken;
use hostjoin::engine::{CpuProfile, HostState, Network, Nic};
use hostjoin::poller::{PollConfig, ReadinessPoller, ReadyOutcome};

use support::{FakeEngine, FakeSession, ScriptedDialog};

fn fast_poll(max_attempts: u32) -> PollConfig {
    PollConfig {
        max_attempts,
        interval: Duration::from_millis(1),
        notice_every: 30,
    }
}

#[tokio::test]
async fn reaches_up_after_retried_non_operational() {
    let engine = FakeEngine::with_cluster("Default");
    engine.push_states(&[
        HostState::Installing,
        HostState::Installing,
        HostState::NonOperational,
        HostState::Up,
    ]);
    let session = FakeSession::authenticated(&engine);
    // No missing networks: the resolver shows the generic notice and
    // the default answer is Retry.
    let dialog = ScriptedDialog::unattended();

    let poller =
        ReadinessPoller::new(&session, &dialog, CancelToken::new()).with_config(fast_poll(10));
    let outcome = poller.await_operational("Default", "node-1").await.unwrap();

    assert_eq!(outcome, ReadyOutcome::Up);
    // Exactly four states observed: two installing, one
    // non-operational, one up.
    assert_eq!(engine.calls_named("get_host"), 4);
    assert!(!dialog.notes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_attempts_report_timeout_not_failure() {
    let engine = FakeEngine::with_cluster("Default");
    engine.push_states(&[HostState::Installing]);
    let session = FakeSession::authenticated(&engine);
    let dialog = ScriptedDialog::unattended();

    let poller =
        ReadinessPoller::new(&session, &dialog, CancelToken::new()).with_config(fast_poll(3));
    let outcome = poller.await_operational("Default", "node-1").await.unwrap();

    assert_eq!(outcome, ReadyOutcome::TimedOut);
    assert_eq!(engine.calls_named("get_host"), 3);
}

#[tokio::test]
async fn failed_state_is_terminal() {
    let engine = FakeEngine::with_cluster("Default");
    engine.push_states(&[HostState::Installing, HostState::Failed]);
    let session = FakeSession::authenticated(&engine);
    let dialog = ScriptedDialog::unattended();

    let poller =
        ReadinessPoller::new(&session, &dialog, CancelToken::new()).with_config(fast_poll(10));
    let outcome = poller.await_operational("Default", "node-1").await.unwrap();

    assert_eq!(outcome, ReadyOutcome::Failed);
    assert_eq!(engine.calls_named("get_host"), 2);
}

#[tokio::test]
async fn missing_required_networks_with_ignore_stop_polling() {
    let engine = FakeEngine::with_cluster("Default");
    engine.push_states(&[HostState::NonOperational, HostState::Up]);
    engine.networks.lock().unwrap().insert(
        "Default-id".into(),
        vec![
            Network {
                id: "net-mgmt".into(),
                name: "mgmt".into(),
                required: true,
                vlan: None,
            },
            Network {
                id: "net-storage".into(),
                name: "storage".into(),
                required: true,
                vlan: None,
            },
        ],
    );
    engine.nics.lock().unwrap().push(Nic {
        name: "em1".into(),
        network_id: Some("net-mgmt".into()),
    });

    let session = FakeSession::authenticated(&engine);
    let dialog = ScriptedDialog::operator().answer("required_networks", "Ignore");

    let poller =
        ReadinessPoller::new(&session, &dialog, CancelToken::new()).with_config(fast_poll(10));
    let outcome = poller.await_operational("Default", "node-1").await.unwrap();

    assert_eq!(
        outcome,
        ReadyOutcome::Ignored {
            missing_networks: vec!["storage".into()],
        }
    );
    // Polling stopped at the first observation; the queued Up state was
    // never reached.
    assert_eq!(engine.calls_named("get_host"), 1);
    let notes = dialog.notes.lock().unwrap();
    assert!(notes.iter().any(|n| n.contains("storage")));
}

#[tokio::test]
async fn cancellation_interrupts_the_standoff() {
    let engine = FakeEngine::with_cluster("Default");
    engine.push_states(&[HostState::Installing]);
    let session = FakeSession::authenticated(&engine);
    let dialog = ScriptedDialog::unattended();

    let cancel = CancelToken::new();
    cancel.cancel();
    let poller = ReadinessPoller::new(&session, &dialog, cancel).with_config(fast_poll(600));
    assert!(poller.await_operational("Default", "node-1").await.is_err());
    assert_eq!(engine.calls_named("get_host"), 0);
}

#[tokio::test]
async fn cluster_cpu_poller_returns_once_populated() {
    let engine = FakeEngine::with_cluster("Default");
    engine.clusters.lock().unwrap()[0].cpu = Some(CpuProfile {
        id: "model_SandyBridge".into(),
    });
    let session = FakeSession::authenticated(&engine);
    let dialog = ScriptedDialog::unattended();

    let poller =
        ReadinessPoller::new(&session, &dialog, CancelToken::new()).with_config(fast_poll(5));
    let cluster = poller.await_cluster_cpu("Default").await.unwrap();
    assert!(cluster.is_some_and(|c| c.cpu.is_some()));
}

#[tokio::test]
async fn cluster_cpu_poller_times_out_when_never_populated() {
    let engine = FakeEngine::with_cluster("Default");
    let session = FakeSession::authenticated(&engine);
    let dialog = ScriptedDialog::unattended();

    let poller =
        ReadinessPoller::new(&session, &dialog, CancelToken::new()).with_config(fast_poll(3));
    let cluster = poller.await_cluster_cpu("Default").await.unwrap();
    assert!(cluster.is_none());
    assert_eq!(engine.calls_named("get_cluster"), 3);
}
