//! Tests against a real container engine. They return early when `docker`
//! is missing or its daemon is unreachable.

use serial_test::serial;
use std::sync::Arc;
use sts::executor::{CommandRunner, ExecutionCommand};
use sts::{EngineCli, ErrorKind, HostExecutor};
use test_tag::tag;

async fn engine_available() -> bool {
    if which::which("docker").is_err() {
        return false;
    }
    let command = ExecutionCommand::new("docker", vec!["info".to_string()])
        .with_timeout(std::time::Duration::from_secs(10));
    matches!(HostExecutor::new().execute(command).await, Ok(result) if result.success())
}

fn engine() -> EngineCli {
    EngineCli::new(Arc::new(HostExecutor::new()), "docker")
}

#[tokio::test]
#[serial]
#[tag(docker)]
async fn unlabelled_engine_lists_no_managed_containers() {
    if !engine_available().await {
        return;
    }

    let ids = engine()
        .list_managed("managed_by=sts-integration-test-nobody")
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
#[serial]
#[tag(docker)]
async fn inspecting_unknown_container_is_not_found() {
    if !engine_available().await {
        return;
    }

    let err = engine()
        .inspect("sts-integration-test-does-not-exist")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
#[serial]
#[tag(docker)]
async fn unknown_image_is_not_cached() {
    if !engine_available().await {
        return;
    }

    let exists = engine()
        .image_exists("sts-integration-test/never-built:latest")
        .await
        .unwrap();
    assert!(!exists);
}
