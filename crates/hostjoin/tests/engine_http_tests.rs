//! HTTP engine client behavior against a mock engine.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hostjoin::engine::{
    EngineConnector, EngineSession, HostSpec, HostState, HttpEngineConnector, SshAuthMethod,
    TlsConfig,
};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn connect(server: &MockServer) -> Box<dyn EngineSession> {
    let base = Url::parse(&server.uri()).unwrap();
    HttpEngineConnector::new(base)
        .authenticate("admin@internal", "s3cr3t", &TlsConfig::Insecure, TIMEOUT)
        .await
        .unwrap()
}

#[tokio::test]
async fn credential_rejection_maps_to_a_401_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .respond_with(ResponseTemplate::new(401).set_body_string("access denied"))
        .mount(&server)
        .await;

    let session = connect(&server).await;
    let err = session.list_clusters().await.unwrap_err();
    assert!(err.is_auth_rejected());
    assert!(err.detail().contains("access denied"));
}

#[tokio::test]
async fn other_remote_errors_carry_the_detail_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .respond_with(ResponseTemplate::new(503).set_body_string("engine is starting"))
        .mount(&server)
        .await;

    let session = connect(&server).await;
    let err = session.list_clusters().await.unwrap_err();
    assert!(!err.is_auth_rejected());
    assert!(err.detail().contains("engine is starting"));
}

#[tokio::test]
async fn clusters_are_listed_with_credentials_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "c1", "name": "Default", "cpu": null},
            {"id": "c2", "name": "Workloads", "cpu": {"id": "model_Haswell"}, "gluster_service": true},
        ])))
        .mount(&server)
        .await;

    let session = connect(&server).await;
    let clusters = session.list_clusters().await.unwrap();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].name, "Default");
    assert!(clusters[0].cpu.is_none());
    assert!(clusters[1].gluster_service);
}

#[tokio::test]
async fn host_add_sends_the_registration_spec() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hosts"))
        .and(body_partial_json(json!({
            "name": "node-1",
            "ssh_auth_method": "publickey",
            "ssh_port": 22,
            "reboot_after_installation": false,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "h1",
            "name": "node-1",
            "address": "node-1.example.org",
            "state": "installing",
            "cluster_id": "c1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = connect(&server).await;
    let host = session
        .add_host(&HostSpec {
            name: "node-1".into(),
            address: "node-1.example.org".into(),
            cluster_id: "c1".into(),
            ssh_auth_method: SshAuthMethod::PublicKey,
            ssh_port: 22,
            override_iptables: true,
            reboot_after_installation: false,
        })
        .await
        .unwrap();

    assert_eq!(host.state, HostState::Installing);
    assert_eq!(host.cluster_id, "c1");
}

#[tokio::test]
async fn host_state_polling_decodes_unknown_states() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hosts/node-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "node-1",
            "address": "node-1.example.org",
            "state": "preparing_for_maintenance",
            "cluster_id": "c1",
        })))
        .mount(&server)
        .await;

    let session = connect(&server).await;
    let host = session.get_host("node-1").await.unwrap();
    assert_eq!(host.state, HostState::Unknown);
}
