//! Accept loop over the real platform endpoint

mod common;

use common::{fake_server, unique_pipe_name};
use fulltrust_client::{connect, RetryConfig};
use fulltrust_common::{pipe_path, ProcessStartInfoRequest};
use fulltrust_host::{HostConfig, ServerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn config(tag: &str) -> HostConfig {
    HostConfig {
        pipe_name: unique_pipe_name(tag),
        ..Default::default()
    }
}

fn retry() -> RetryConfig {
    RetryConfig {
        max_retries: 20,
        initial_backoff_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_serves_clients_one_after_another() {
    let config = config("sequential");
    let server = Arc::new(fake_server(&config));
    let listener = server.bind().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener, shutdown_rx).await }
    });

    let mut first = connect(&config.pipe_name, &retry()).await.unwrap();
    first
        .create(&ProcessStartInfoRequest::new("game.exe"))
        .await
        .unwrap();
    first.terminate_session().await.unwrap();
    drop(first);

    let mut second = connect(&config.pipe_name, &retry()).await.unwrap();
    let started = second.start_process().await.unwrap();
    assert!(started.succeeded);
    second.terminate_session().await.unwrap();
    drop(second);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(server.dispatcher().session().snapshot().process_id, Some(1000));
}

#[tokio::test]
async fn test_shutdown_while_waiting_for_client() {
    let config = config("idle-shutdown");
    let server = fake_server(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stopper = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(server.run(shutdown_rx), stopper);
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_second_host_on_same_name_is_rejected() {
    let config = config("in-use");
    let server = fake_server(&config);
    let _listener = server.bind().unwrap();

    let rival = fake_server(&config);
    match rival.bind() {
        Err(ServerError::AlreadyInUse(path)) => assert_eq!(path, pipe_path(&config.pipe_name)),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("second bind succeeded"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_stale_socket_file_is_replaced() {
    let config = config("stale");
    let path = pipe_path(&config.pipe_name);

    // A socket file with nobody listening behind it.
    let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
    drop(stale);
    assert!(std::path::Path::new(&path).exists());

    let server = fake_server(&config);
    let listener = server.bind().unwrap();
    drop(listener);
    assert!(!std::path::Path::new(&path).exists());
}
