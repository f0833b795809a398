//! Locking system backed by Lease leader election.

use std::future::Future;

use lockrun_core::cancel::Cancellation;
use lockrun_core::config::LockConfig;
use lockrun_core::error::{LockError, LockResult};
use lockrun_core::event::LockEvents;
use lockrun_core::traits::LockingSystem;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::election::{Leadership, LeaderElector};

/// A lock held by leading the election for one Lease object.
///
/// One call to [`run`](LockingSystem::run) campaigns once: it returns after
/// leadership ends, whether through [`stop`](LockingSystem::stop) or a lost
/// renewal. The Lease record is cleared when stopped while leading.
pub struct K8sLockingSystem {
    elector: LeaderElector,
    namespace: String,
    config: LockConfig,
    stopping: Cancellation,
}

impl K8sLockingSystem {
    pub(crate) fn new(elector: LeaderElector, namespace: String, config: LockConfig) -> Self {
        Self {
            elector,
            namespace,
            config,
            stopping: Cancellation::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn lease_object(&self) -> &str {
        &self.elector.config().lease_name
    }
}

/// Drives `election` to completion while turning its leadership edges into
/// lock events.
///
/// A failed event delivery cancels the election but still waits for it, so
/// the Lease is released before returning. Edges queued when the election
/// ends are delivered, then any open epoch is closed.
pub(crate) async fn relay_leadership<F>(
    election: F,
    mut edges: mpsc::Receiver<Leadership>,
    events: &mut LockEvents,
    cancel: &Cancellation,
) -> LockResult<()>
where
    F: Future<Output = LockResult<()>>,
{
    tokio::pin!(election);
    let mut failure = None;

    let result = loop {
        tokio::select! {
            result = &mut election => break result,
            Some(edge) = edges.recv() => {
                forward(edge, events, &mut failure, cancel).await;
            }
        }
    };
    while let Ok(edge) = edges.try_recv() {
        forward(edge, events, &mut failure, cancel).await;
    }
    cancel.cancel();

    if let Err(e) = events.close_epoch().await {
        failure.get_or_insert(e);
    }
    result?;
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Forwards one leadership edge, remembering the first delivery failure.
async fn forward(
    edge: Leadership,
    events: &mut LockEvents,
    failure: &mut Option<LockError>,
    cancel: &Cancellation,
) {
    if failure.is_some() {
        return;
    }
    let delivered = match edge {
        Leadership::Started => events.acquired().await,
        Leadership::Stopped => events.lost().await,
    };
    if let Err(e) = delivered {
        warn!(error = %e, "failed to deliver lock event, stopping election");
        *failure = Some(e);
        cancel.cancel();
    }
}

impl LockingSystem for K8sLockingSystem {
    fn backend(&self) -> &'static str {
        "k8s-coordinator"
    }

    #[instrument(skip_all, fields(backend = "k8s-coordinator", namespace = %self.namespace, identity = %self.config.identity()))]
    async fn run(&self, cancel: Cancellation, mut events: LockEvents) -> LockResult<()> {
        let cancel = cancel.merged(&self.stopping);
        let (edges_tx, edges) = mpsc::channel(2);
        let election = self.elector.run(&cancel, edges_tx);
        let result = relay_leadership(election, edges, &mut events, &cancel).await;
        debug!("election finished");
        result
    }

    fn stop(&self) {
        self.stopping.cancel();
    }

    async fn close(self) -> LockResult<()> {
        debug!(lease = %self.lease_object(), "closing k8s-coordinator client");
        drop(self);
        Ok(())
    }
}
