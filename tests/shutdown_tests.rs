//! Tests for shutdown signals received by the supervisor.
//!
//! Kept in their own test binary: listening for a signal replaces its
//! default action for the whole process.

#![cfg(unix)]

use std::time::Duration;

use lock_run_cmd::supervisor::supervise;
use lockrun_process::CommandRunner;
use tokio::process::Command;
use tokio::time::{sleep, timeout};

mod common;
use common::scripted::{ScriptedLockingSystem, Step};

/// Tests that an acquisition arriving after a shutdown request never starts
/// the command.
#[tokio::test]
async fn test_acquisition_after_shutdown_does_not_start_command() {
    let (system, script) = ScriptedLockingSystem::new();
    script.ignore_stop();
    let runner = CommandRunner::new(
        ["sh", "-c", "exit 5"].iter().map(|s| s.to_string()).collect(),
        Duration::from_secs(5),
    )
    .unwrap();

    let (result, ()) = tokio::join!(
        timeout(Duration::from_secs(10), supervise(system, runner)),
        async {
            sleep(Duration::from_millis(200)).await;
            let status = Command::new("kill")
                .args(["-TERM", &std::process::id().to_string()])
                .status()
                .await
                .unwrap();
            assert!(status.success());

            timeout(Duration::from_secs(5), async {
                while !script.stopped() {
                    sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("shutdown never reached the locking system");
            script.push(Step::Acquire);
            script.push(Step::Finish);
        }
    );

    assert_eq!(result.unwrap().unwrap(), None);
    assert!(script.closed());
}
