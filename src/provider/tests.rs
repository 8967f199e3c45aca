// Lifecycle orchestrator tests
//
// Collaborators are replaced by recording doubles; RPC responses are
// queued in call order.

use super::*;
use crate::profiles::Profile;
use crate::rpc::RpcResponse;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

type RecordedCall = (Target, String, Vec<Value>);

#[derive(Default)]
struct MockRpc {
    responses: Mutex<VecDeque<Result<RpcResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRpc {
    fn with_responses(responses: Vec<Value>) -> Arc<Self> {
        let queue = responses
            .into_iter()
            .map(|v| Ok(serde_json::from_value::<RpcResponse>(v).unwrap()))
            .collect();
        Arc::new(Self {
            responses: Mutex::new(queue),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        let rpc = Self::default();
        rpc.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!("master unreachable")));
        Arc::new(rpc)
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn call(&self, target: &Target, function: &str, args: &[Value]) -> Result<RpcResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), function.to_string(), args.to_vec()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RpcResponse::new()))
    }
}

struct MockBootstrap {
    result: bool,
    calls: Mutex<Vec<(VmRequest, BootstrapContext)>>,
}

impl MockBootstrap {
    fn returning(result: bool) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BootstrapService for MockBootstrap {
    async fn run(&self, request: &VmRequest, context: &BootstrapContext) -> Result<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), context.clone()));
        Ok(self.result)
    }
}

#[derive(Default)]
struct MockVirtualization {
    removed: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl VirtualizationTool for MockVirtualization {
    async fn remove(&self, node_id: &str, _profile: &Profile) -> Result<bool> {
        self.removed.lock().unwrap().push(node_id.to_string());
        if self.fail {
            anyhow::bail!("vagrant destroy failed");
        }
        Ok(true)
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &LifecycleEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.name.clone());
        anyhow::bail!("event bus offline")
    }
}

struct StaticVerifier(bool);

#[async_trait]
impl Verifier for StaticVerifier {
    async fn verify(&self, _request: &VmRequest) -> bool {
        self.0
    }
}

struct Harness {
    provider: VagrantProvider,
    rpc: Arc<MockRpc>,
    bootstrap: Arc<MockBootstrap>,
    virtualization: Arc<MockVirtualization>,
    events: Arc<RecordingSink>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.profiles.insert("testprofile1".to_string(), Profile::default());
    config.profiles.insert(
        "testprofile2".to_string(),
        Profile {
            ssh_username: Some("fred".to_string()),
            remove_config_on_destroy: false,
            shutdown_on_destroy: true,
            ..Default::default()
        },
    );
    config.profiles.insert(
        "keepalive".to_string(),
        Profile {
            remove_config_on_destroy: false,
            shutdown_on_destroy: false,
            ..Default::default()
        },
    );
    config.profiles.insert(
        "cleanup".to_string(),
        Profile {
            host: Some("vhost1".to_string()),
            ..Default::default()
        },
    );
    config.profiles.insert(
        "removeonly".to_string(),
        Profile {
            shutdown_on_destroy: false,
            remove_config_on_destroy: true,
            host: Some("vhost1".to_string()),
            ..Default::default()
        },
    );
    config
}

fn harness_with(
    rpc: Arc<MockRpc>,
    bootstrap: Arc<MockBootstrap>,
    virtualization: MockVirtualization,
    verified: bool,
) -> Harness {
    let virtualization = Arc::new(virtualization);
    let events = Arc::new(RecordingSink::default());
    let collaborators = Collaborators {
        rpc: rpc.clone(),
        bootstrap: bootstrap.clone(),
        virtualization: virtualization.clone(),
        events: events.clone(),
        verifier: Arc::new(StaticVerifier(verified)),
    };
    Harness {
        provider: VagrantProvider::new(&test_config(), collaborators).unwrap(),
        rpc,
        bootstrap,
        virtualization,
        events,
    }
}

fn harness(rpc: Arc<MockRpc>) -> Harness {
    harness_with(rpc, MockBootstrap::returning(true), MockVirtualization::default(), true)
}

#[tokio::test]
async fn test_create_no_deploy() {
    let h = harness(MockRpc::with_responses(vec![]));
    let mut request = VmRequest::new("dummy");
    request.deploy = false;
    request.driver = Some("vagrant".to_string());

    assert!(h.provider.create(&request).await.unwrap());
    assert!(h.bootstrap.calls.lock().unwrap().is_empty());
    assert!(h.rpc.calls().is_empty());
}

#[tokio::test]
async fn test_create_and_deploy() {
    let h = harness(MockRpc::with_responses(vec![]));
    let mut request = VmRequest::new("new2");
    request.driver = Some("vagrant".to_string());
    request.profile = Some("testprofile2".to_string());

    assert!(h.provider.create(&request).await.unwrap());

    let calls = h.bootstrap.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, request);
    assert_eq!(calls[0].1.driver, "vagrant");
    assert_eq!(
        calls[0].1.profile.as_ref().and_then(|p| p.ssh_username.as_deref()),
        Some("fred")
    );
    assert_eq!(*h.events.events.lock().unwrap(), vec!["created instance"]);
}

#[tokio::test]
async fn test_create_returns_bootstrap_flag() {
    let h = harness_with(
        MockRpc::with_responses(vec![]),
        MockBootstrap::returning(false),
        MockVirtualization::default(),
        true,
    );
    assert!(!h.provider.create(&VmRequest::new("new3")).await.unwrap());
    assert_eq!(h.bootstrap.calls.lock().unwrap().len(), 1);
    assert!(h.events.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_verification_failed() {
    let h = harness_with(
        MockRpc::with_responses(vec![]),
        MockBootstrap::returning(true),
        MockVirtualization::default(),
        false,
    );
    let err = h.provider.create(&VmRequest::new("new2")).await.unwrap_err();
    assert!(matches!(err, ProviderError::VerificationFailed(ref n) if n == "new2"));
    assert!(h.bootstrap.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_unknown_profile() {
    let h = harness(MockRpc::with_responses(vec![]));
    let mut request = VmRequest::new("new2");
    request.profile = Some("testprofile9".to_string());

    let err = h.provider.create(&request).await.unwrap_err();
    assert!(matches!(err, ProviderError::ProfileNotFound(_)));
    assert!(h.bootstrap.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_avail_locations_and_sizes_empty() {
    let h = harness(MockRpc::with_responses(vec![]));
    assert!(h.provider.avail_locations().is_empty());
    assert!(h.provider.avail_sizes().is_empty());
}

#[tokio::test]
async fn test_avail_images_lists_profiles() {
    let h = harness(MockRpc::with_responses(vec![]));
    let images = h.provider.avail_images();
    let mut names = images[PROFILES_KEY].clone();
    names.sort();
    assert_eq!(names, vec!["cleanup", "keepalive", "removeonly", "testprofile1", "testprofile2"]);
}

#[tokio::test]
async fn test_list_nodes() {
    let rpc = MockRpc::with_responses(vec![json!({
        "nodeX1": {
            "id": "nodeX1",
            "ipv4": ["127.0.0.1", "192.1.2.22", "172.16.17.18"],
            "ipv6": ["::1", "fdef:bad:add::f00", "3001:DB8::F00D"],
            "salt-cloud": {
                "driver": "vagrant",
                "provider": "vagrant",
                "profile": "testprofile2"
            },
            "extra_stuff": "does not belong"
        }
    })]);
    let h = harness(rpc);

    let nodes = h.provider.list(CallKind::Function).await.unwrap();
    let expected = json!({
        "nodeX1": {
            "id": "nodeX1",
            "image": "testprofile2",
            "private_ips": ["172.16.17.18", "fdef:bad:add::f00"],
            "public_ips": ["192.1.2.22", "3001:DB8::F00D"],
            "size": "",
            "state": "running"
        }
    });
    assert_eq!(serde_json::to_value(&nodes).unwrap(), expected);

    let calls = h.rpc.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Target::driver("vagrant"));
    assert_eq!(calls[0].1, "grains.items");
}

#[tokio::test]
async fn test_list_skips_silent_and_malformed_nodes() {
    let rpc = MockRpc::with_responses(vec![json!({
        "good": {"id": "good", "ipv4": ["10.0.0.5", "bogus"], "ipv6": []},
        "silent": false,
        "broken": {"ipv4": "not-a-list"}
    })]);
    let h = harness(rpc);

    let nodes = h.provider.list(CallKind::Function).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes["good"].private_ips, vec!["10.0.0.5"]);
    assert_eq!(nodes["good"].image, "");
}

#[tokio::test]
async fn test_list_keeps_node_with_odd_grains() {
    let rpc = MockRpc::with_responses(vec![json!({
        "nodeX1": {
            "id": "nodeX1",
            "ipv4": ["10.0.0.5", null],
            "ipv6": null,
            "salt-cloud": null
        },
        "nodeX2": {
            "id": "nodeX2",
            "ipv4": [7, "203.0.113.9"],
            "salt-cloud": {"profile": ["testprofile1"]}
        }
    })]);
    let h = harness(rpc);

    let nodes = h.provider.list(CallKind::Function).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes["nodeX1"].private_ips, vec!["10.0.0.5"]);
    assert!(nodes["nodeX1"].public_ips.is_empty());
    assert_eq!(nodes["nodeX1"].image, "");
    assert_eq!(nodes["nodeX1"].state, "running");
    assert_eq!(nodes["nodeX2"].public_ips, vec!["203.0.113.9"]);
    assert_eq!(nodes["nodeX2"].image, "");
}

#[tokio::test]
async fn test_list_rejects_action_call() {
    let h = harness(MockRpc::with_responses(vec![]));
    let err = h.provider.list(CallKind::Action).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidCall { .. }));
    assert!(h.rpc.calls().is_empty());
}

#[tokio::test]
async fn test_list_propagates_rpc_failure() {
    let h = harness(MockRpc::failing());
    let err = h.provider.list(CallKind::Function).await.unwrap_err();
    assert!(matches!(err, ProviderError::Rpc(_)));
}

#[tokio::test]
async fn test_list_full_and_select() {
    let grains = json!({
        "nodeX1": {
            "id": "nodeX1",
            "ipv4": ["8.8.4.4"],
            "os": "Ubuntu",
            "salt-cloud": {"profile": "testprofile1"}
        }
    });
    let h = harness(MockRpc::with_responses(vec![grains.clone(), grains.clone()]));

    let full = h.provider.list_full(CallKind::Function).await.unwrap();
    assert_eq!(full["nodeX1"]["os"], json!("Ubuntu"));

    let selected = h
        .provider
        .list_select(&["public_ips".to_string(), "image".to_string()], CallKind::Function)
        .await
        .unwrap();
    assert_eq!(selected["nodeX1"]["public_ips"], json!(["8.8.4.4"]));
    assert_eq!(selected["nodeX1"]["image"], json!("testprofile1"));
    assert!(!selected["nodeX1"].contains_key("id"));
}

#[tokio::test]
async fn test_show_instance() {
    let h = harness(MockRpc::with_responses(vec![
        json!({"nodeS1": {"id": "nodeS1", "os": "Debian"}}),
        json!({}),
    ]));

    let grains = h.provider.show_instance("nodeS1", CallKind::Action).await.unwrap();
    assert_eq!(grains["os"], json!("Debian"));

    let err = h.provider.show_instance("ghost", CallKind::Action).await.unwrap_err();
    assert!(matches!(err, ProviderError::NodeNotFound(ref n) if n == "ghost"));
}

#[tokio::test]
async fn test_vagrant_reboot() {
    let h = harness(MockRpc::with_responses(vec![json!({"nodeS1": true})]));

    assert!(h.provider.reboot("nodeS1", CallKind::Action).await.unwrap());

    let calls = h.rpc.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], (Target::node("nodeS1"), "system.reboot".to_string(), vec![]));
}

#[tokio::test]
async fn test_reboot_failures_are_false() {
    let h = harness(MockRpc::failing());
    assert!(!h.provider.reboot("nodeS1", CallKind::Action).await.unwrap());

    let h = harness(MockRpc::with_responses(vec![json!({"nodeS1": false})]));
    assert!(!h.provider.reboot("nodeS1", CallKind::Action).await.unwrap());
}

#[tokio::test]
async fn test_reboot_rejects_function_call() {
    let h = harness(MockRpc::with_responses(vec![]));
    assert!(h.provider.reboot("nodeS1", CallKind::Function).await.is_err());
    assert!(h.rpc.calls().is_empty());
}

#[tokio::test]
async fn test_vagrant_destroy() {
    let rpc = MockRpc::with_responses(vec![
        json!({"nodeS1": {"driver": "vagrant", "provider": "vagrant", "profile": "testprofile2"}}),
        json!({"nodeS1": "a system.shutdown worked message"}),
    ]);
    let h = harness(rpc);

    assert!(h.provider.destroy("nodeS1", CallKind::Action).await.unwrap());

    let calls = h.rpc.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        (Target::node("nodeS1"), "grains.get".to_string(), vec![json!("salt-cloud")])
    );
    assert_eq!(calls[1], (Target::node("nodeS1"), "system.shutdown".to_string(), vec![]));
    assert!(h.virtualization.removed.lock().unwrap().is_empty());
    assert_eq!(
        *h.events.events.lock().unwrap(),
        vec!["destroying instance", "destroyed instance"]
    );
}

#[tokio::test]
async fn test_destroy_shutdown_then_remove() {
    let rpc = MockRpc::with_responses(vec![
        json!({"nodeS2": {"profile": "cleanup"}}),
        json!({"nodeS2": true}),
    ]);
    let h = harness(rpc);

    assert!(h.provider.destroy("nodeS2", CallKind::Action).await.unwrap());
    assert_eq!(h.rpc.calls()[1].1, "system.shutdown");
    assert_eq!(*h.virtualization.removed.lock().unwrap(), vec!["nodeS2"]);
}

#[tokio::test]
async fn test_destroy_reports_shutdown_result_only() {
    let rpc = MockRpc::with_responses(vec![
        json!({"nodeS2": {"profile": "cleanup"}}),
        json!({"nodeS2": true}),
    ]);
    let h = harness_with(
        rpc,
        MockBootstrap::returning(true),
        MockVirtualization {
            fail: true,
            ..Default::default()
        },
        true,
    );

    assert!(h.provider.destroy("nodeS2", CallKind::Action).await.unwrap());
    assert_eq!(h.virtualization.removed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_destroy_failed_shutdown_still_removes_config() {
    let rpc = MockRpc::with_responses(vec![
        json!({"nodeS2": {"profile": "cleanup"}}),
        json!({"nodeS2": false}),
    ]);
    let h = harness(rpc);

    assert!(!h.provider.destroy("nodeS2", CallKind::Action).await.unwrap());
    assert_eq!(h.virtualization.removed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_destroy_noop_profile_returns_true() {
    let rpc = MockRpc::with_responses(vec![json!({"nodeK": {"profile": "keepalive"}})]);
    let h = harness(rpc);

    assert!(h.provider.destroy("nodeK", CallKind::Action).await.unwrap());
    assert_eq!(h.rpc.calls().len(), 1);
    assert!(h.virtualization.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_destroy_remove_only() {
    let rpc = MockRpc::with_responses(vec![json!({"nodeR1": {"profile": "removeonly"}})]);
    let h = harness(rpc);

    assert!(h.provider.destroy("nodeR1", CallKind::Action).await.unwrap());

    let calls = h.rpc.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "grains.get");
    assert!(calls.iter().all(|(_, function, _)| function != "system.shutdown"));
    assert_eq!(*h.virtualization.removed.lock().unwrap(), vec!["nodeR1"]);
    assert_eq!(
        *h.events.events.lock().unwrap(),
        vec!["destroying instance", "destroyed instance"]
    );
}

#[tokio::test]
async fn test_destroy_remove_only_ignores_failed_removal() {
    let rpc = MockRpc::with_responses(vec![json!({"nodeR1": {"profile": "removeonly"}})]);
    let h = harness_with(
        rpc,
        MockBootstrap::returning(true),
        MockVirtualization {
            fail: true,
            ..Default::default()
        },
        true,
    );

    assert!(h.provider.destroy("nodeR1", CallKind::Action).await.unwrap());
    assert_eq!(h.virtualization.removed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_destroy_unknown_profile_attempts_nothing() {
    let rpc = MockRpc::with_responses(vec![json!({"nodeS1": {"profile": "testprofile9"}})]);
    let h = harness(rpc);

    let err = h.provider.destroy("nodeS1", CallKind::Action).await.unwrap_err();
    assert!(matches!(err, ProviderError::ProfileNotFound(ref n) if n == "testprofile9"));
    assert_eq!(h.rpc.calls().len(), 1);
    assert!(h.virtualization.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_destroy_without_profile_grain() {
    let rpc = MockRpc::with_responses(vec![json!({"nodeS1": {"driver": "vagrant"}})]);
    let h = harness(rpc);

    let err = h.provider.destroy("nodeS1", CallKind::Action).await.unwrap_err();
    assert!(matches!(err, ProviderError::MissingProfile(_)));
    assert_eq!(h.rpc.calls().len(), 1);
}

#[tokio::test]
async fn test_destroy_silent_node_returns_false() {
    let h = harness(MockRpc::with_responses(vec![json!({"nodeS1": false})]));
    assert!(!h.provider.destroy("nodeS1", CallKind::Action).await.unwrap());
    assert_eq!(h.rpc.calls().len(), 1);

    let h = harness(MockRpc::failing());
    assert!(!h.provider.destroy("nodeS1", CallKind::Action).await.unwrap());
}

#[tokio::test]
async fn test_destroy_rejects_function_call() {
    let h = harness(MockRpc::with_responses(vec![]));
    let err = h.provider.destroy("nodeS1", CallKind::Function).await.unwrap_err();
    assert!(err.to_string().contains("--destroy"));
    assert!(h.rpc.calls().is_empty());
}

#[test]
fn test_foreign_profile_rejected_at_construction() {
    let mut config = test_config();
    config.profiles.insert(
        "aws".to_string(),
        Profile {
            driver: "ec2".to_string(),
            ..Default::default()
        },
    );
    let rpc: Arc<dyn RpcClient> = MockRpc::with_responses(vec![]);
    let collaborators = Collaborators {
        rpc: rpc.clone(),
        bootstrap: MockBootstrap::returning(true),
        virtualization: Arc::new(MockVirtualization::default()),
        events: Arc::new(RecordingSink::default()),
        verifier: Arc::new(StaticVerifier(true)),
    };
    assert!(matches!(
        VagrantProvider::new(&config, collaborators),
        Err(ProviderError::Config(_))
    ));
}

#[test]
fn test_default_collaborators_from_config() {
    let config = test_config();
    let provider = VagrantProvider::new(&config, Collaborators::from_config(&config)).unwrap();
    assert_eq!(provider.driver(), "vagrant");
    assert_eq!(provider.profiles().len(), 5);
}
