use skiff::{ContainerConfig, ContainerStatus, Runtime, RuntimeOptions, SkiffError, State};
use skiff_test_utils::{TEST_IMAGE, TestRuntime, with_timeout};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn config(cmd: &[&str]) -> ContainerConfig {
    ContainerConfig::new(TEST_IMAGE, cmd.iter().map(|s| s.to_string()).collect())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_by_full_id_and_prefix() {
    let rt = TestRuntime::new().await;
    let container = rt.runtime.create(config(&["true"])).await.unwrap();
    let id = container.id().as_str().to_string();

    assert_eq!(rt.runtime.get(&id).unwrap().id(), container.id());
    assert_eq!(rt.runtime.get(container.short_id()).unwrap().id(), container.id());
    assert_eq!(rt.runtime.get(&id[..3]).unwrap().id(), container.id());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_rejects_bad_lookups() {
    let rt = TestRuntime::new().await;
    assert!(matches!(rt.runtime.get(""), Err(SkiffError::InvalidArgument(_))));
    assert!(matches!(rt.runtime.get("deadbeef"), Err(SkiffError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_ambiguous_prefix() {
    let rt = TestRuntime::new().await;
    // 17 ids over 16 hex digits: some first character must repeat
    let mut by_first: HashMap<char, usize> = HashMap::new();
    for _ in 0..17 {
        let container = rt.runtime.create(config(&["true"])).await.unwrap();
        let first = container.id().as_str().chars().next().unwrap();
        *by_first.entry(first).or_default() += 1;
    }
    let (shared, _) = by_first.iter().find(|(_, n)| **n > 1).unwrap();
    let err = rt.runtime.get(&shared.to_string()).unwrap_err();
    assert!(matches!(err, SkiffError::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_rejects_unknown_image() {
    let rt = TestRuntime::new().await;
    let err = rt
        .runtime
        .create(ContainerConfig::new("missing", vec!["true".into()]))
        .await
        .unwrap_err();
    assert!(matches!(err, SkiffError::Image(_)));
    assert!(rt.runtime.list().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_rejects_empty_command() {
    let rt = TestRuntime::new().await;
    let err = rt
        .runtime
        .create(ContainerConfig::new(TEST_IMAGE, Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, SkiffError::Config(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_newest_first() {
    let rt = TestRuntime::new().await;
    let first = rt.runtime.create(config(&["true"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = rt.runtime.create(config(&["true"])).await.unwrap();

    let ids: Vec<_> = rt.runtime.list().iter().map(|c| c.id().clone()).collect();
    assert_eq!(ids, vec![second.id().clone(), first.id().clone()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_destroy_running_container() {
    let rt = TestRuntime::new().await;
    let container = rt.runtime.create(config(&["sleep", "30"])).await.unwrap();
    container.start().await.unwrap();
    let dir = rt.home().join("containers").join(container.id().as_str());
    assert!(dir.exists());

    with_timeout("destroy hung", Duration::from_secs(5), rt.runtime.destroy(&container))
        .await
        .unwrap();
    assert!(!container.is_running());
    assert!(!dir.exists());
    assert!(rt.runtime.list().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_runtime_on_same_home_is_refused() {
    let rt = TestRuntime::new().await;
    let err = Runtime::open(RuntimeOptions::with_home(rt.home()))
        .await
        .unwrap_err();
    assert!(matches!(err, SkiffError::AlreadyExists(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relative_home_is_rejected() {
    let err = Runtime::open(RuntimeOptions::with_home("relative/home"))
        .await
        .unwrap_err();
    assert!(matches!(err, SkiffError::Config(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restore_after_restart() {
    let rt = TestRuntime::new().await;
    let exited = rt.runtime.create(config(&["sh", "-c", "exit 5"])).await.unwrap();
    exited.run().await.unwrap();
    let interrupted = rt.runtime.create(config(&["true"])).await.unwrap();
    let created = rt.runtime.create(config(&["true"])).await.unwrap();

    // Pretend the previous runtime died while this one was running
    let state_path = rt
        .home()
        .join("containers")
        .join(interrupted.id().as_str())
        .join("state.json");
    let mut state = interrupted.state();
    state.mark_running(Some(999_999)).unwrap();
    std::fs::write(&state_path, serde_json::to_vec(&state).unwrap()).unwrap();

    let ids = (exited.id().clone(), interrupted.id().clone(), created.id().clone());
    drop((exited, interrupted, created));
    let home = rt.into_home();
    let rt = TestRuntime::open_at(home).await;
    assert_eq!(rt.runtime.list().len(), 3);

    let exited = rt.runtime.get(ids.0.as_str()).unwrap();
    assert_eq!(exited.state().status, ContainerStatus::Exited);
    assert_eq!(exited.state().exit_code, 5);

    let interrupted = rt.runtime.get(ids.1.as_str()).unwrap();
    assert_eq!(interrupted.state().status, ContainerStatus::Exited);
    assert_eq!(interrupted.state().exit_code, -1);
    assert!(interrupted.state().pid.is_none());
    let on_disk: State = serde_json::from_slice(&std::fs::read(&state_path).unwrap()).unwrap();
    assert_eq!(on_disk.status, ContainerStatus::Exited);
    // Waiting on a restored exited container returns immediately
    assert_eq!(interrupted.wait().await.unwrap().exit_code, -1);

    // A restored created container can still be started
    let created = rt.runtime.get(ids.2.as_str()).unwrap();
    assert_eq!(created.run().await.unwrap().exit_code, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restore_skips_garbage() {
    let rt = TestRuntime::new().await;
    let container = rt.runtime.create(config(&["true"])).await.unwrap();
    let id = container.id().clone();
    drop(container);
    let home = rt.into_home();

    std::fs::create_dir_all(home.path().join("containers").join("not-a-container")).unwrap();
    let broken = home.path().join("containers").join("ab".repeat(32));
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("config.json"), b"{").unwrap();

    let rt = TestRuntime::open_at(home).await;
    let ids: Vec<_> = rt.runtime.list().iter().map(|c| c.id().clone()).collect();
    assert_eq!(ids, vec![id]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_kills_running_containers() {
    let rt = TestRuntime::new().await;
    let mut containers = Vec::new();
    for _ in 0..3 {
        let container = rt.runtime.create(config(&["sleep", "30"])).await.unwrap();
        container.start().await.unwrap();
        containers.push(container);
    }
    let idle = rt.runtime.create(config(&["true"])).await.unwrap();

    with_timeout("shutdown hung", Duration::from_secs(5), rt.runtime.shutdown())
        .await
        .unwrap();
    for container in &containers {
        assert_eq!(container.state().status, ContainerStatus::Exited);
        assert_eq!(container.state().exit_code, 137);
    }
    assert_eq!(idle.state().status, ContainerStatus::Created);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_containers_are_independent() {
    let rt = TestRuntime::new().await;
    let mut containers = Vec::new();
    for _ in 0..4 {
        let container = rt
            .runtime
            .create(config(&["cat"]).open_stdin(true))
            .await
            .unwrap();
        container.start().await.unwrap();
        containers.push(container);
    }

    containers[0].kill().unwrap();
    containers[0].wait().await.unwrap();
    for container in &containers[1..] {
        assert!(container.is_running());
    }

    for container in &containers[1..] {
        container.stdin_pipe().unwrap().shutdown().await.unwrap();
    }
    let codes = futures::future::join_all(containers[1..].iter().map(|c| c.wait())).await;
    for state in codes {
        assert_eq!(state.unwrap().exit_code, 0);
    }
}
