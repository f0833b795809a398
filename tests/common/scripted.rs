//! A locking system that emits whatever events the test tells it to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lockrun_core::prelude::*;
use tokio::sync::mpsc;

/// One scripted action.
#[derive(Debug)]
pub enum Step {
    Acquire,
    Lose,
    Fail(String),
    /// Ends the run successfully.
    Finish,
}

/// Handle used by the test to drive and inspect a [`ScriptedLockingSystem`].
#[derive(Clone)]
pub struct Script {
    steps: mpsc::UnboundedSender<Step>,
    stopped: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    ignore_stop: Arc<AtomicBool>,
}

impl Script {
    pub fn push(&self, step: Step) {
        let _ = self.steps.send(step);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Makes `stop` only record the request, so queued steps still play.
    pub fn ignore_stop(&self) {
        self.ignore_stop.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedLockingSystem {
    steps: Mutex<Option<mpsc::UnboundedReceiver<Step>>>,
    stopping: Cancellation,
    stopped: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    ignore_stop: Arc<AtomicBool>,
}

impl ScriptedLockingSystem {
    pub fn new() -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let ignore_stop = Arc::new(AtomicBool::new(false));
        (
            Self {
                steps: Mutex::new(Some(rx)),
                stopping: Cancellation::new(),
                stopped: stopped.clone(),
                closed: closed.clone(),
                ignore_stop: ignore_stop.clone(),
            },
            Script {
                steps: tx,
                stopped,
                closed,
                ignore_stop,
            },
        )
    }
}

impl LockingSystem for ScriptedLockingSystem {
    fn backend(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, cancel: Cancellation, mut events: LockEvents) -> LockResult<()> {
        let steps = self.steps.lock().unwrap().take();
        let Some(mut steps) = steps else {
            return Err(LockError::backend("scripted system already ran"));
        };
        let cancel = cancel.merged(&self.stopping);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                step = steps.recv() => match step {
                    Some(Step::Acquire) => events.acquired().await?,
                    Some(Step::Lose) => events.lost().await?,
                    Some(Step::Fail(message)) => {
                        events.close_epoch().await?;
                        return Err(LockError::connection(message));
                    }
                    Some(Step::Finish) => break,
                    None => cancel.cancelled().await,
                },
            }
        }
        events.close_epoch().await
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if !self.ignore_stop.load(Ordering::SeqCst) {
            self.stopping.cancel();
        }
    }

    async fn close(self) -> LockResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
