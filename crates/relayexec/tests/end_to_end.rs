//! Agent and client talking through an in-process relay

mod support;

use relayexec::{run_interactive, run_single, ClientConfig, ClientError, Session, PROMPT};
use relayexec_agent::{Agent, AgentConfig};
use std::path::Path;
use std::time::Duration;
use support::FakeRelay;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Start an agent rooted at `dir` and wait for it to register
async fn start_agent(relay: &FakeRelay, agent_id: &str, dir: &Path) -> CancellationToken {
    let config = AgentConfig::new(relay.endpoint())
        .with_agent_id(agent_id)
        .with_working_dir(dir)
        .with_reconnect_delay(Duration::from_millis(50));

    let mut agent = Agent::new(config).unwrap();
    let shutdown = agent.shutdown_token();
    tokio::spawn(async move { agent.run().await });

    relay.wait_for_agent(agent_id).await;
    shutdown
}

async fn start_client(relay: &FakeRelay) -> Session {
    let config = ClientConfig::new(relay.endpoint())
        .with_settle_delay(Duration::from_millis(100))
        .with_response_timeout(Duration::from_secs(10));
    Session::connect(config).await.unwrap()
}

#[tokio::test]
async fn test_command_round_trip() {
    let relay = FakeRelay::start().await;
    let temp_dir = TempDir::new().unwrap();
    let agent = start_agent(&relay, "a1", temp_dir.path()).await;
    let session = start_client(&relay).await;

    assert!(session.roster().contains("a1"));

    let response = session.router().submit("a1", "echo hi").await.unwrap();

    assert_eq!(response.result, "hi\n");
    assert_eq!(response.agent_id, "a1");
    assert_eq!(response.command, "echo hi");
    assert_eq!(Path::new(&response.current_dir), temp_dir.path());
    assert_eq!(session.router().pending_count().await, 0);

    session.shutdown().await;
    agent.cancel();
}

#[tokio::test]
async fn test_directory_state_persists_between_commands() {
    let relay = FakeRelay::start().await;
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
    std::fs::write(temp_dir.path().join("sub").join("marker.txt"), "x").unwrap();

    let agent = start_agent(&relay, "a1", temp_dir.path()).await;
    let session = start_client(&relay).await;
    let router = session.router();

    let cd = router.submit("a1", "cd sub").await.unwrap();
    assert!(cd.result.starts_with("Changed directory to:"));
    assert_eq!(Path::new(&cd.current_dir), temp_dir.path().join("sub"));

    let ls = router.submit("a1", "ls").await.unwrap();
    assert!(ls.result.contains("marker.txt"));

    let missing = router.submit("a1", "cd /does/not/exist").await.unwrap();
    assert_eq!(missing.result, "Directory not found: /does/not/exist");
    assert_eq!(Path::new(&missing.current_dir), temp_dir.path().join("sub"));

    session.shutdown().await;
    agent.cancel();
}

#[tokio::test]
async fn test_concurrent_submissions_stay_paired() {
    let relay = FakeRelay::start().await;
    let temp_dir = TempDir::new().unwrap();
    let agent = start_agent(&relay, "a1", temp_dir.path()).await;
    let session = start_client(&relay).await;
    let router = session.router();

    let (first, second) = tokio::join!(router.submit("a1", "echo first"), router.submit("a1", "echo second"));

    assert_eq!(first.unwrap().result, "first\n");
    assert_eq!(second.unwrap().result, "second\n");
    assert_eq!(router.pending_count().await, 0);

    session.shutdown().await;
    agent.cancel();
}

#[tokio::test]
async fn test_unknown_agent_is_reported() {
    let relay = FakeRelay::start().await;
    let session = start_client(&relay).await;

    assert!(session.roster().is_empty());

    match session.router().submit("ghost", "ls").await {
        Err(ClientError::Relay(message)) => assert_eq!(message, "Agent ghost is not available"),
        other => panic!("Expected relay error, got {:?}", other),
    }
    assert_eq!(session.router().pending_count().await, 0);

    session.shutdown().await;
}

#[tokio::test]
async fn test_single_shot() {
    let relay = FakeRelay::start().await;
    let temp_dir = TempDir::new().unwrap();
    let agent = start_agent(&relay, "a1", temp_dir.path()).await;
    let session = start_client(&relay).await;

    let mut output = Vec::new();
    assert!(run_single(&session, "a1", "echo hi", &mut output).await.unwrap());
    let printed = String::from_utf8(output).unwrap();
    assert!(printed.contains("--- Response from agent a1"));
    assert!(printed.contains("Result:\nhi\n"));

    let mut output = Vec::new();
    assert!(!run_single(&session, "ghost", "echo hi", &mut output).await.unwrap());
    assert!(String::from_utf8(output).unwrap().contains("Agent ghost is not available"));

    session.shutdown().await;
    agent.cancel();
}

#[tokio::test]
async fn test_interactive_session() {
    let relay = FakeRelay::start().await;
    let temp_dir = TempDir::new().unwrap();
    let agent = start_agent(&relay, "a1", temp_dir.path()).await;
    let session = start_client(&relay).await;

    let input: &[u8] = b"list\n\nmyserver\na1 echo hello\nquit\na1 echo never\n";
    let mut output = Vec::new();
    run_interactive(&session, input, &mut output).await.unwrap();

    let printed = String::from_utf8(output).unwrap();
    assert!(printed.contains(PROMPT));
    assert!(printed.contains("Available agents: a1"));
    assert!(printed.contains("Usage: <agent_id> <command>"));
    assert!(printed.contains("Result:\nhello\n"));
    assert!(!printed.contains("never"));
    assert!(printed.ends_with("Goodbye!\n"));

    session.shutdown().await;
    agent.cancel();
}

#[tokio::test]
async fn test_interactive_ends_when_session_closes() {
    let relay = FakeRelay::start().await;
    let session = start_client(&relay).await;

    // Input that never produces a line
    let (_keep_open, reader) = tokio::io::duplex(64);
    let reader = tokio::io::BufReader::new(reader);

    let shutdown = session.router().closed_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });

    let mut output = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), run_interactive(&session, reader, &mut output))
        .await
        .unwrap()
        .unwrap();

    assert!(String::from_utf8(output).unwrap().contains("Connection to relay closed"));
    drop(relay);
}
