//! Tests that signals sent to the supervisor reach the command.
//!
//! Kept in their own test binary: listening for a signal replaces its
//! default action for the whole process.

#![cfg(unix)]

use std::time::Duration;

use lockrun_process::{CommandRunner, ProcessExit};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// Tests that a SIGTERM sent to us is forwarded to the command as an
/// interrupt, which the command handles itself.
#[tokio::test]
async fn test_terminate_is_forwarded_as_interrupt() {
    let runner = CommandRunner::new(
        ["sh", "-c", "trap 'exit 42' INT; while true; do sleep 0.05; done"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Duration::from_secs(5),
    )
    .unwrap();
    let (tx, mut exits) = mpsc::channel(1);
    runner
        .start(move |exit| {
            let _ = tx.try_send(exit);
        })
        .await
        .unwrap();
    // Let the shell install its trap.
    sleep(Duration::from_millis(300)).await;

    let status = Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let exit = timeout(Duration::from_secs(5), exits.recv())
        .await
        .expect("timed out waiting for exit")
        .expect("exit callback dropped");
    assert_eq!(exit, ProcessExit::Exited(42));
}
