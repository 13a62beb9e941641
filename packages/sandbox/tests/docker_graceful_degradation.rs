// ABOUTME: Tests for Docker runtime behaviour when the daemon cannot be reached
// ABOUTME: Verifies errors surface as RuntimeUnavailable instead of panics

use codenest_sandbox::{
    DockerRuntime, ManagerSettings, Owner, OwnerId, SandboxRuntime, SessionError, SessionManager,
    SessionStorage,
};
use std::sync::Arc;
use tempfile::TempDir;

fn unreachable_runtime() -> DockerRuntime {
    // Nothing listens on port 1
    let client = bollard::Docker::connect_with_http(
        "http://127.0.0.1:1",
        2,
        bollard::API_DEFAULT_VERSION,
    )
    .expect("client construction does not touch the network");
    DockerRuntime::with_client(client)
}

#[tokio::test]
async fn test_ping_unreachable_daemon() {
    let runtime = unreachable_runtime();

    let result = runtime.ping().await;

    assert!(matches!(
        result,
        Err(codenest_sandbox::RuntimeError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_execute_with_unreachable_daemon() {
    let root = TempDir::new().unwrap();
    let workspace = root.path().join("alice");
    std::fs::create_dir_all(&workspace).unwrap();

    let storage = Arc::new(SessionStorage::connect("sqlite::memory:").await.unwrap());
    let settings = ManagerSettings {
        volume_root: root.path().join("volumes"),
        ..Default::default()
    };
    let manager = SessionManager::new(storage, Arc::new(unreachable_runtime()), settings);
    let owner = Owner::new(OwnerId::user("alice"), workspace);

    let result = manager.execute(&owner, "echo hello", None).await;

    match result {
        Err(SessionError::RuntimeUnavailable(message)) => {
            assert!(!message.is_empty());
        }
        other => panic!("expected RuntimeUnavailable, got {:?}", other),
    }
    assert!(manager.get_session(&owner.id).await.unwrap().is_none());
}
