//! End-to-end governance scenarios: client ↔ coordinator ↔ workers over
//! the in-memory bus

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use governor_core::bus::{MemoryBus, MessageBus};
use governor_core::extensions::HandlerRegistry;
use governor_core::permissions::{AllowAll, GrantList, Permission};
use governor_core::worker::{ProcessHost, WorkerExit, WorkerJob};
use governor_core::{
    Coordinator, Error, GovernanceClient, GovernorConfig, EVENT_TOPIC,
};
use governor_registry::{ChangesetBuilder, EntryId, Registry};
use governor_sync::SyncPolicy;
use governor_test_utils::{fixtures, MemoryRegistry};

struct Rig {
    bus: Arc<MemoryBus>,
    registry: MemoryRegistry,
    client: GovernanceClient,
    _handle: tokio::task::JoinHandle<()>,
}

fn start_rig(registry: MemoryRegistry, source_dir: &Path) -> Rig {
    let bus = Arc::new(MemoryBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus.clone();
    let handlers = Arc::new(HandlerRegistry::new());
    let policy = Arc::new(SyncPolicy::builtin());
    let config = GovernorConfig::default().with_source_dir(source_dir);

    let handle = governor_core::start(
        Arc::new(registry.clone()),
        Arc::clone(&bus_dyn),
        handlers,
        policy,
        config,
    )
    .expect("coordinator starts");

    let client = GovernanceClient::new(bus_dyn, Arc::new(AllowAll))
        .with_user("ops")
        .with_timeout(Duration::from_secs(5));

    Rig {
        bus,
        registry,
        client,
        _handle: handle,
    }
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn get_state_while_idle() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(
        MemoryRegistry::with_entries([fixtures::entry("a:x", "registry.entry")]),
        dir.path(),
    );

    let state = rig.client.get_state().await.unwrap();
    assert!(!state.governance.operation_in_progress);
    assert!(state.governance.current_operation.is_none());
    assert_eq!(
        state.registry.current_version.as_deref(),
        Some(rig.registry.current_version().unwrap().as_str())
    );
    assert!(state.governance.pid > 0);
}

#[tokio::test]
async fn request_changes_creates_entry_and_emits_one_version_event() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(MemoryRegistry::new(), dir.path());
    let mut events = rig.bus.watch(EVENT_TOPIC).unwrap();

    let changes = ChangesetBuilder::new().create(
        fixtures::entry("services:api", "registry.entry")
            .with_meta("type", "service.api")
            .with_data("port", 8080),
    );
    let outcome = rig.client.request_changes(changes, None).await.unwrap();
    let new_version = outcome.version.expect("a new version");

    let state = rig.client.get_state().await.unwrap();
    assert_eq!(state.registry.current_version.as_deref(), Some(new_version.as_str()));

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "registry:version");
    assert_eq!(events[0]["payload"]["new_version"], new_version);

    assert!(rig
        .registry
        .find(&EntryId::parse("services:api").unwrap())
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn noop_apply_emits_no_version_event() {
    let entry = fixtures::entry("a:x", "registry.entry");
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(MemoryRegistry::with_entries([entry.clone()]), dir.path());
    let mut events = rig.bus.watch(EVENT_TOPIC).unwrap();

    let outcome = rig
        .client
        .request_changes(ChangesetBuilder::new().update(entry), None)
        .await
        .unwrap();
    assert_eq!(outcome.message.as_deref(), Some("No changes needed to be applied"));
    assert!(outcome.version.is_none());
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn request_version_for_unknown_id_fails_with_details() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(MemoryRegistry::new(), dir.path());

    let err = rig
        .client
        .request_version("does-not-exist", None)
        .await
        .unwrap_err();
    match err {
        Error::Rejected { message, details } => {
            assert_eq!(message, "Failed to validate version ID");
            assert_eq!(details.len(), 1);
            assert_eq!(details[0].id, "version:does-not-exist");
            assert_eq!(details[0].detail_type, "validation");
            assert_eq!(details[0].message, "Version not found: does-not-exist");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn download_materializes_registry_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(
        MemoryRegistry::with_entries([fixtures::lua_function("a.b:x", "return 1")]),
        dir.path(),
    );

    let outcome = rig.client.request_download(None).await.unwrap();
    let stats = outcome.stats.expect("download reports stats");
    assert_eq!(stats["namespaces"], 1);
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["files"], 1);

    assert_eq!(
        fs::read_to_string(dir.path().join("a/b/x.lua")).unwrap(),
        "return 1"
    );
    let index = fs::read_to_string(dir.path().join("a/b/_index.yaml")).unwrap();
    assert!(index.contains("source: file://x.lua"));

    let state = rig.client.get_state().await.unwrap();
    assert!(!state.changes.registry_changes_pending);
    assert_eq!(state.governance.last_operation_type.as_deref(), Some("download"));
}

#[tokio::test]
async fn download_after_registry_delete_collapses_namespaces() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(
        MemoryRegistry::with_entries([fixtures::lua_function("a.b:x", "return 1")]),
        dir.path(),
    );
    rig.client.request_download(None).await.unwrap();

    let mut snapshot = rig.registry.snapshot().unwrap();
    snapshot.delete(&fixtures::id("a.b:x")).unwrap();
    snapshot.commit().unwrap();

    let outcome = rig.client.request_download(None).await.unwrap();
    let stats = outcome.stats.unwrap();
    assert_eq!(stats["index_files_removed"], 1);
    assert!(stats["empty_namespaces_removed"].as_u64().unwrap() >= 2);
    assert!(!dir.path().join("a").exists());
}

#[tokio::test]
async fn upload_chains_into_apply_and_reports_delta_stats() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(
        MemoryRegistry::with_entries([fixtures::lua_function("a:x", "return 1")]),
        dir.path(),
    );
    let mut events = rig.bus.watch(EVENT_TOPIC).unwrap();

    // Start from an in-sync tree, then edit one source file
    rig.client.request_download(None).await.unwrap();
    drain_events(&mut events);
    fs::write(dir.path().join("a/x.lua"), "return 2").unwrap();

    let before = rig.registry.current_version().unwrap();
    let outcome = rig.client.request_upload(None).await.unwrap();

    let stats = outcome.stats.expect("upload reports delta stats");
    assert_eq!(stats["create"], 0);
    assert_eq!(stats["update"], 1);
    assert_eq!(stats["delete"], 0);

    let after = rig.registry.current_version().unwrap();
    assert_ne!(before, after);
    assert_eq!(outcome.version.as_deref(), Some(after.as_str()));

    // Exactly one version event for the chained apply
    assert_eq!(drain_events(&mut events).len(), 1);

    let updated = rig
        .registry
        .find(&fixtures::id("a:x"))
        .unwrap()
        .expect("entry survives");
    assert_eq!(updated.data_str("source"), Some("return 2"));

    let state = rig.client.get_state().await.unwrap();
    assert!(!state.changes.filesystem_changes_pending);
    assert!(state.changes.registry_changes_pending);
    assert_eq!(state.governance.last_operation_type.as_deref(), Some("upload"));
}

#[tokio::test]
async fn second_upload_reports_no_changes() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(
        MemoryRegistry::with_entries([fixtures::lua_function("a:x", "return 1")]),
        dir.path(),
    );
    rig.client.request_download(None).await.unwrap();
    fs::write(dir.path().join("a/x.lua"), "return 2").unwrap();
    rig.client.request_upload(None).await.unwrap();

    let outcome = rig.client.request_upload(None).await.unwrap();
    assert_eq!(outcome.message.as_deref(), Some("No changes detected"));

    let mut options = governor_core::OptionsMap::new();
    options.insert("check_only".into(), json!(true));
    let check = rig.client.request_upload(Some(options)).await.unwrap();
    // check_only output carries has_changes/count instead of a changeset
    assert!(check.changeset.is_none() || check.changeset == Some(json!([])));
}

#[tokio::test]
async fn concurrent_mutating_commands_get_busy_reply() {
    // A host that never reports back keeps the coordinator busy forever
    struct StuckHost;
    impl ProcessHost for StuckHost {
        fn name(&self) -> &str {
            "app:processes"
        }
        fn spawn(&self, _worker_id: String, _job: WorkerJob) -> governor_core::Result<()> {
            Ok(())
        }
    }

    let bus = Arc::new(MemoryBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus.clone();
    let (_exit_tx, exit_rx) = mpsc::unbounded_channel::<WorkerExit>();
    let coordinator = Coordinator::new(
        Arc::new(MemoryRegistry::new()),
        Arc::clone(&bus_dyn),
        Arc::new(StuckHost),
        exit_rx,
    )
    .unwrap();
    let handle = tokio::spawn(coordinator.run());

    let client = GovernanceClient::new(Arc::clone(&bus_dyn), Arc::new(AllowAll))
        .with_timeout(Duration::from_millis(300));

    // First upload never completes; it will time out client-side
    let first = tokio::spawn({
        let client = GovernanceClient::new(bus_dyn, Arc::new(AllowAll))
            .with_timeout(Duration::from_millis(300));
        async move { client.request_upload(None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.request_upload(None).await.unwrap_err();
    match err {
        Error::Rejected { message, .. } => {
            assert_eq!(message, "Operation already in progress: upload");
        }
        other => panic!("expected busy rejection, got {other:?}"),
    }

    let first_err = first.await.unwrap().unwrap_err();
    assert!(matches!(first_err, Error::Timeout { .. }));
    handle.abort();
}

#[tokio::test]
async fn worker_without_result_fails_the_reply() {
    // A host whose workers exit with neither value nor error
    struct NoResultHost {
        exits: mpsc::UnboundedSender<WorkerExit>,
    }
    impl ProcessHost for NoResultHost {
        fn name(&self) -> &str {
            "app:processes"
        }
        fn spawn(&self, worker_id: String, _job: WorkerJob) -> governor_core::Result<()> {
            let _ = self.exits.send(WorkerExit {
                worker_id,
                payload: None,
            });
            Ok(())
        }
    }

    let bus = Arc::new(MemoryBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus.clone();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(
        Arc::new(MemoryRegistry::new()),
        Arc::clone(&bus_dyn),
        Arc::new(NoResultHost { exits: exit_tx }),
        exit_rx,
    )
    .unwrap();
    let handle = tokio::spawn(coordinator.run());

    let client =
        GovernanceClient::new(bus_dyn, Arc::new(AllowAll)).with_timeout(Duration::from_secs(2));
    let err = client.request_download(None).await.unwrap_err();
    match err {
        Error::Rejected { message, .. } => assert_eq!(message, "Operation failed"),
        other => panic!("expected Rejected, got {other:?}"),
    }

    // The coordinator recovered: the next call is accepted
    let state = client.get_state().await.unwrap();
    assert!(!state.governance.operation_in_progress);
    handle.abort();
}

#[tokio::test]
async fn unknown_operation_gets_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let rig = start_rig(MemoryRegistry::new(), dir.path());

    let mut replies = rig.bus.subscribe("reply:unknown-op-test").unwrap();
    rig.bus
        .send(
            governor_core::COMMAND_TOPIC,
            json!({
                "id": "req-unknown",
                "operation": "reboot",
                "respond_to": "reply:unknown-op-test",
                "timestamp": 0,
            }),
        )
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "Unknown operation: reboot");
    assert_eq!(reply["request_id"], "req-unknown");
}

#[tokio::test]
async fn permission_denied_before_any_send() {
    let bus = Arc::new(MemoryBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus;
    // No coordinator at all: a denied call must fail before sending
    let client = GovernanceClient::new(bus_dyn, Arc::new(GrantList::new([Permission::Read])));

    let err = client.request_upload(None).await.unwrap_err();
    match err {
        Error::PermissionDenied { permission, .. } => {
            assert_eq!(permission, "registry.request.sync");
        }
        other => panic!("expected PermissionDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn mismatched_request_id_is_rejected() {
    let bus = Arc::new(MemoryBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus.clone();

    // A rogue responder answering with the wrong request id
    let mut commands = bus.subscribe(governor_core::COMMAND_TOPIC).unwrap();
    let responder_bus = bus.clone();
    tokio::spawn(async move {
        let command = commands.recv().await.unwrap();
        let respond_to = command["respond_to"].as_str().unwrap().to_string();
        let _ = responder_bus.send(
            &respond_to,
            json!({"request_id": "someone-else", "success": true, "timestamp": 0}),
        );
    });

    let client = GovernanceClient::new(bus_dyn, Arc::new(AllowAll))
        .with_timeout(Duration::from_secs(2));
    let err = client.get_state().await.unwrap_err();
    assert!(matches!(err, Error::Correlation { .. }));
}

#[tokio::test]
async fn client_timeout_when_nobody_replies() {
    let bus = Arc::new(MemoryBus::new());
    // Swallow commands without replying
    let _commands = bus.subscribe(governor_core::COMMAND_TOPIC).unwrap();
    let bus_dyn: Arc<dyn MessageBus> = bus;
    let client = GovernanceClient::new(bus_dyn, Arc::new(AllowAll))
        .with_timeout(Duration::from_millis(100));

    let err = client.get_state().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { seconds: 0 }));
}
