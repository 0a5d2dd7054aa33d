use skiff::server::{Daemon, client, handle_connection, run_remote};
use skiff::{Runtime, SkiffError, SkiffResult};
use skiff_shared::Transport;
use skiff_test_utils::{TEST_IMAGE, TestRuntime, with_timeout};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Run one command through an in-memory connection to the daemon handler.
async fn remote(runtime: &Runtime, argv: &[&str], stdin: &'static [u8]) -> (SkiffResult<i32>, Vec<u8>) {
    let (client_end, daemon_end) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(handle_connection(runtime.clone(), daemon_end));

    let mut stdout = Vec::new();
    let result = with_timeout(
        "remote command timed out",
        Duration::from_secs(5),
        client::session(client_end, args(argv), stdin, &mut stdout),
    )
    .await;
    server.await.unwrap().ok();
    (result, stdout)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_run_streams_output_and_exit_code() {
    let rt = TestRuntime::new().await;
    let (result, stdout) = remote(
        &rt.runtime,
        &["run", TEST_IMAGE, "sh", "-c", "echo out; echo err >&2; exit 3"],
        b"",
    )
    .await;
    assert_eq!(result.unwrap(), 3);
    let text = String::from_utf8(stdout).unwrap();
    assert!(text.contains("out\n"));
    assert!(text.contains("err\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_run_forwards_stdin() {
    let rt = TestRuntime::new().await;
    let (result, stdout) = remote(&rt.runtime, &["run", "-i", TEST_IMAGE, "cat"], b"one\ntwo\n").await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(stdout, b"one\ntwo\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_error_frame() {
    let rt = TestRuntime::new().await;
    let (result, stdout) = remote(&rt.runtime, &["kill", "0123abc"], b"").await;
    match result {
        Err(SkiffError::Internal(message)) => assert!(message.contains("no such container")),
        other => panic!("expected an error frame, got {:?}", other),
    }
    assert!(stdout.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_help_succeeds() {
    let rt = TestRuntime::new().await;
    let (result, stdout) = remote(&rt.runtime, &["ps", "--help"], b"").await;
    assert_eq!(result.unwrap(), 0);
    assert!(String::from_utf8(stdout).unwrap().contains("--all"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_request_is_answered() {
    use tokio::io::AsyncWriteExt;

    let rt = TestRuntime::new().await;
    let (mut client_end, daemon_end) = tokio::io::duplex(1024);
    let server = tokio::spawn(handle_connection(rt.runtime.clone(), daemon_end));

    client_end.write_all(b"not json\n").await.unwrap();
    let frame = skiff_shared::protocol::read_frame(&mut client_end).await.unwrap();
    assert!(matches!(frame, Some(skiff_shared::protocol::Frame::Error(_))));
    assert!(server.await.unwrap().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_daemon_serves_unix_socket() {
    let rt = TestRuntime::new().await;
    let socket_dir = tempfile::tempdir().unwrap();
    let transport = Transport::unix(socket_dir.path().join("skiff.sock"));

    let shutdown = CancellationToken::new();
    let daemon = Daemon::new(rt.runtime.clone(), transport.clone());
    let serving = tokio::spawn(daemon.serve(shutdown.clone()));

    with_timeout("daemon socket never appeared", Duration::from_secs(5), async {
        while !socket_dir.path().join("skiff.sock").exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let mut stdout = Vec::new();
    let code = with_timeout(
        "remote run timed out",
        Duration::from_secs(5),
        run_remote(&transport, args(&["run", TEST_IMAGE, "echo", "hi"]), tokio::io::empty(), &mut stdout),
    )
    .await
    .unwrap();
    assert_eq!(code, 0);
    assert_eq!(stdout, b"hi\n");

    // A detached container is stopped when the daemon shuts down
    let mut stdout = Vec::new();
    run_remote(&transport, args(&["run", "-d", TEST_IMAGE, "sleep", "30"]), tokio::io::empty(), &mut stdout)
        .await
        .unwrap();
    let id = String::from_utf8(stdout).unwrap().trim().to_string();

    shutdown.cancel();
    with_timeout("daemon did not stop", Duration::from_secs(10), serving)
        .await
        .unwrap()
        .unwrap();
    assert!(!socket_dir.path().join("skiff.sock").exists());

    let container = rt.runtime.get(&id).unwrap();
    assert_eq!(container.state().exit_code, 137);
}
