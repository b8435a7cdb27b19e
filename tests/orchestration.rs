use std::sync::Arc;
use sts::engine::StartConfiguration;
use sts::{
    ContainerStatus, ContainerStore, ErrorKind, InMemoryStore, ProgressEvent, ProgressHub,
    ScriptedExecutor, ScriptedResponse, ServerCatalog, ServerOrchestrator, ServiceConfig,
};
use tokio::sync::mpsc;

struct Harness {
    runner: Arc<ScriptedExecutor>,
    store: Arc<InMemoryStore>,
    hub: Arc<ProgressHub>,
    orchestrator: ServerOrchestrator,
}

fn harness(responses: Vec<ScriptedResponse>) -> Harness {
    let runner = Arc::new(ScriptedExecutor::with_responses(responses));
    let store = Arc::new(InMemoryStore::new());
    let hub = Arc::new(ProgressHub::new());
    let orchestrator = ServerOrchestrator::from_config(
        &ServiceConfig::default(),
        ServerCatalog::builtin(),
        runner.clone(),
        store.clone(),
        hub.clone(),
    );
    Harness {
        runner,
        store,
        hub,
        orchestrator,
    }
}

async fn collect_until_terminal(receiver: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

#[tokio::test]
async fn mail_server_starts_with_full_progress() {
    let h = harness(vec![
        ScriptedResponse::failure(1, "Error: No such image: mailhog/mailhog:latest"),
        ScriptedResponse::ok("Status: Downloaded newer image"),
        ScriptedResponse::ok("abc123def456\n"),
    ]);

    let request_id = h
        .orchestrator
        .start_async("MAIL", StartConfiguration::default());
    let mut receiver = h.hub.subscribe(&request_id).unwrap();
    let events = collect_until_terminal(&mut receiver).await;

    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert_eq!(percents, vec![10, 30, 50, 80, 100]);
    assert!(events.iter().all(|e| !e.error));
    assert_eq!(events[1].message, "Pulling image");
    assert_eq!(events[2].message, "Pull successful");

    let running = h.store.list_running().await.unwrap();
    assert_eq!(running.len(), 1);
    let record = &running[0];
    assert_eq!(record.id, "abc123def456");
    assert_eq!(record.name, "simple-test-server-mail-0");
    assert_eq!(record.server_type, "MAIL");
    assert_eq!(record.status, ContainerStatus::Running);

    let invocations = h.runner.invocations();
    assert_eq!(invocations[0], vec!["image", "inspect", "mailhog/mailhog:latest"]);
    assert_eq!(invocations[1], vec!["pull", "mailhog/mailhog:latest"]);
    assert_eq!(invocations[2][0..2], ["run", "-d"]);
    assert!(invocations[2].contains(&"-p".to_string()));
    assert!(invocations[2].contains(&"managed_by=simple-test-server".to_string()));
}

#[tokio::test]
async fn pull_failure_reports_one_error_and_records_nothing() {
    let h = harness(vec![
        ScriptedResponse::failure(1, "No such image"),
        ScriptedResponse::failure(1, "manifest unknown"),
    ]);

    let request_id = h
        .orchestrator
        .start_async("FTP", StartConfiguration::default());
    let mut receiver = h.hub.subscribe(&request_id).unwrap();
    let events = collect_until_terminal(&mut receiver).await;

    let last = events.last().unwrap();
    assert!(last.error);
    assert_eq!(last.percent, 50);
    assert!(last.message.starts_with("pull failed"));
    assert!(last.message.contains("manifest unknown"));
    assert_eq!(events.iter().filter(|e| e.error).count(), 1);

    assert!(h.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_type_fails_without_engine_calls() {
    let h = harness(Vec::new());

    let request_id = h
        .orchestrator
        .start_async("GOPHER", StartConfiguration::default());
    let mut receiver = h.hub.subscribe(&request_id).unwrap();
    let events = collect_until_terminal(&mut receiver).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[1], ProgressEvent::failed(100, "Unknown server type: GOPHER"));
    assert!(h.runner.invocations().is_empty());
}

#[tokio::test]
async fn configured_name_and_ports_reach_the_engine() {
    let h = harness(vec![
        ScriptedResponse::ok("[]"),
        ScriptedResponse::ok("feedface\n"),
    ]);
    let config: StartConfiguration =
        serde_json::from_str(r#"{"name": "inbox", "ports": [{"2525": 1025}], "env": {"MH_HOSTNAME": "test"}}"#)
            .unwrap();

    let started = h
        .orchestrator
        .start_with_progress("fixed-request", "MAIL", &config)
        .await
        .unwrap();

    assert_eq!(started.name, "inbox");
    assert_eq!(started.ports.get(&1025), Some(&2525));

    let run = &h.runner.invocations()[1];
    assert!(run.contains(&"2525:1025".to_string()));
    assert!(run.contains(&"MH_HOSTNAME=test".to_string()));
    assert_eq!(h.store.get("inbox").await.unwrap().id, "feedface");
}

#[tokio::test]
async fn stop_and_stop_all_discard_records() {
    let h = harness(vec![
        ScriptedResponse::ok("[]"),
        ScriptedResponse::ok("aaaaaaaaaaaa1111\n"),
        ScriptedResponse::ok("[]"),
        ScriptedResponse::ok("bbbbbbbbbbbb2222\n"),
    ]);
    let config = StartConfiguration::default();
    let first = h
        .orchestrator
        .start_with_progress("r1", "WEB", &config)
        .await
        .unwrap();
    h.orchestrator
        .start_with_progress("r2", "WEB", &config)
        .await
        .unwrap();

    // rm -f succeeds with the default response
    h.orchestrator.stop(&first.id).await.unwrap();
    assert_eq!(
        h.store.get(&first.id).await.unwrap().status,
        ContainerStatus::Discarded
    );

    h.runner.push(ScriptedResponse::ok("bbbbbbbbbbbb\n"));
    assert_eq!(h.orchestrator.stop_all().await.unwrap(), 1);
    assert!(h.store.list_running().await.unwrap().is_empty());

    let err = h.store
        .update_status(&first.id, ContainerStatus::Running)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
