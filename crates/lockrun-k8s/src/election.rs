//! Leader election over a Kubernetes Lease object.
//!
//! The holder writes its identity and a renew time into the Lease and
//! rewrites the renew time every retry period. Competitors take the Lease
//! over once it is unheld, or once its record has not changed for a full
//! lease duration as measured on their own monotonic clock, so clock skew
//! between nodes does not matter. Every write carries the resourceVersion
//! that was read, so concurrent writers cannot both succeed.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Api;
use kube::api::PostParams;
use lockrun_core::cancel::Cancellation;
use lockrun_core::config::LockConfig;
use lockrun_core::error::{LockError, LockResult};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Upper bound on the interval between election attempts.
const MAX_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Random extra delay added to each retry, as a fraction of the period.
const JITTER_FACTOR: f64 = 0.2;

/// Lease duration written when releasing, so competitors move in quickly.
const RELEASED_LEASE_SECONDS: i32 = 1;

/// An edge in this process's leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leadership {
    Started,
    Stopped,
}

/// Parameters of one election.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub lease_name: String,
    pub identity: String,
    /// How long a record stays valid without renewal.
    pub lease_duration: Duration,
    /// How long the leader keeps retrying a failing renewal before it
    /// gives up leadership.
    pub renew_deadline: Duration,
    /// Interval between acquisition and renewal attempts.
    pub retry_period: Duration,
    /// Clear the record when cancelled while leading.
    pub release_on_cancel: bool,
}

impl ElectionConfig {
    /// Election parameters for a lock run: the leader must renew within one
    /// lease interval, and releases the Lease when stopped.
    pub fn for_lock(lease_name: impl Into<String>, config: &LockConfig) -> Self {
        let renew_deadline = config.interval();
        Self {
            lease_name: lease_name.into(),
            identity: config.identity().to_string(),
            lease_duration: config.effective_lease_duration(),
            renew_deadline,
            retry_period: Self::retry_period_for(renew_deadline),
            release_on_cancel: true,
        }
    }

    /// Retry period used for a given renew deadline: at most 5s and at most
    /// half the deadline, so at least two attempts fit into it.
    pub fn retry_period_for(renew_deadline: Duration) -> Duration {
        MAX_RETRY_PERIOD.min(renew_deadline / 2)
    }
}

/// The last Lease record we saw, and when we first saw it.
struct Observed {
    holder: Option<String>,
    renew_time: Option<MicroTime>,
    since: Instant,
}

impl Observed {
    fn update(observed: &mut Option<Observed>, spec: &LeaseSpec) {
        let unchanged = observed.as_ref().is_some_and(|o| {
            o.holder == spec.holder_identity && o.renew_time == spec.renew_time
        });
        if !unchanged {
            *observed = Some(Observed {
                holder: spec.holder_identity.clone(),
                renew_time: spec.renew_time.clone(),
                since: Instant::now(),
            });
        }
    }
}

/// Whether a competitor may write its own identity into a record.
///
/// `unchanged_for` is how long the record has been observed unchanged.
pub fn may_take_over(
    holder: Option<&str>,
    identity: &str,
    unchanged_for: Duration,
    lease_duration: Duration,
) -> bool {
    match holder {
        None | Some("") => true,
        Some(holder) if holder == identity => true,
        Some(_) => unchanged_for >= lease_duration,
    }
}

/// Runs an election for one Lease object.
pub struct LeaderElector {
    api: Api<Lease>,
    config: ElectionConfig,
}

impl LeaderElector {
    pub fn new(api: Api<Lease>, config: ElectionConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Campaigns until elected, leads until leadership is lost or `cancel`
    /// fires, then returns.
    ///
    /// Sends [`Leadership::Started`] on election and [`Leadership::Stopped`]
    /// when leading ends. Returns an error instead of aborting when the API
    /// server rejects our credentials or the request.
    #[instrument(skip_all, fields(lease = %self.config.lease_name, identity = %self.config.identity))]
    pub async fn run(
        &self,
        cancel: &Cancellation,
        edges: mpsc::Sender<Leadership>,
    ) -> LockResult<()> {
        let mut observed = None;

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                attempt = self.try_acquire_or_renew(&mut observed) => attempt,
            };
            match attempt {
                Ok(true) => break,
                Ok(false) => {}
                Err(e @ (LockError::Authentication(_) | LockError::InvalidConfig(_))) => {
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "error acquiring lease, will retry"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(self.jittered_retry_period()) => {}
            }
        }

        info!("started leading");
        // A closed receiver means nobody listens; keep the protocol going so
        // the lease is still released properly.
        let _ = edges.send(Leadership::Started).await;

        self.renew_until_lost(cancel, &mut observed).await;

        if cancel.is_cancelled() && self.config.release_on_cancel {
            self.release().await;
        }
        info!("stopped leading");
        let _ = edges.send(Leadership::Stopped).await;
        Ok(())
    }

    /// Renews every retry period; returns when cancelled or when no renewal
    /// succeeded within the renew deadline.
    async fn renew_until_lost(&self, cancel: &Cancellation, observed: &mut Option<Observed>) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.retry_period) => {}
            }

            let renewed = tokio::select! {
                _ = cancel.cancelled() => return,
                renewed = timeout(self.config.renew_deadline, self.renew(observed)) => renewed,
            };
            if renewed.is_err() {
                warn!(
                    renew_deadline = ?self.config.renew_deadline,
                    "failed to renew lease within the renew deadline"
                );
                return;
            }
        }
    }

    /// Retries renewal until it succeeds; bounded by the caller's timeout.
    async fn renew(&self, observed: &mut Option<Observed>) {
        loop {
            match self.try_acquire_or_renew(observed).await {
                Ok(true) => {
                    debug!("lease renewed");
                    return;
                }
                Ok(false) => debug!("lease renewal rejected"),
                Err(e) => warn!(error = %e, "error renewing lease"),
            }
            sleep(self.config.retry_period).await;
        }
    }

    /// Creates, takes over, or renews the Lease record.
    ///
    /// Returns whether we hold the record afterwards. Losing a write race
    /// is not an error.
    async fn try_acquire_or_renew(&self, observed: &mut Option<Observed>) -> LockResult<bool> {
        let now = MicroTime(Utc::now());
        let name = &self.config.lease_name;

        let Some(mut lease) = self.api.get_opt(name).await.map_err(map_kube_error)? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..ObjectMeta::default()
                },
                spec: Some(self.record(now, 0)),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(created) => {
                    if let Some(spec) = &created.spec {
                        Observed::update(observed, spec);
                    }
                    info!("created lease");
                    Ok(true)
                }
                Err(e) if is_conflict(&e) => Ok(false),
                Err(e) => Err(map_kube_error(e)),
            };
        };

        let spec = lease.spec.clone().unwrap_or_default();
        Observed::update(observed, &spec);
        let unchanged_for = observed
            .as_ref()
            .map(|o| o.since.elapsed())
            .unwrap_or_default();
        let lease_duration =
            Duration::from_secs(spec.lease_duration_seconds.unwrap_or(0).max(0) as u64);
        let holder = spec.holder_identity.clone().unwrap_or_default();

        if !may_take_over(
            Some(holder.as_str()),
            &self.config.identity,
            unchanged_for,
            lease_duration,
        ) {
            debug!(%holder, "lease is held by another candidate");
            return Ok(false);
        }

        let record = if holder == self.config.identity {
            LeaseSpec {
                renew_time: Some(now),
                lease_duration_seconds: Some(duration_seconds(self.config.lease_duration)),
                ..spec
            }
        } else {
            info!(previous = %holder, "taking over lease");
            self.record(now, spec.lease_transitions.unwrap_or(0) + 1)
        };
        lease.spec = Some(record);

        match self.api.replace(name, &PostParams::default(), &lease).await {
            Ok(updated) => {
                if let Some(spec) = &updated.spec {
                    Observed::update(observed, spec);
                }
                Ok(true)
            }
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(map_kube_error(e)),
        }
    }

    /// Clears our record so a competitor can take over without waiting for
    /// the lease to expire.
    async fn release(&self) {
        let name = &self.config.lease_name;
        let mut lease = match self.api.get_opt(name).await {
            Ok(Some(lease)) => lease,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read lease for release");
                return;
            }
        };
        let spec = lease.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.config.identity.as_str()) {
            return;
        }

        let now = MicroTime(Utc::now());
        lease.spec = Some(LeaseSpec {
            holder_identity: None,
            lease_duration_seconds: Some(RELEASED_LEASE_SECONDS),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            lease_transitions: spec.lease_transitions,
            ..LeaseSpec::default()
        });
        match self.api.replace(name, &PostParams::default(), &lease).await {
            Ok(_) => info!("released lease"),
            Err(e) => warn!(error = %e, "failed to release lease"),
        }
    }

    /// A fresh record naming us as holder.
    fn record(&self, now: MicroTime, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.config.identity.clone()),
            lease_duration_seconds: Some(duration_seconds(self.config.lease_duration)),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            lease_transitions: Some(transitions),
            ..LeaseSpec::default()
        }
    }

    fn jittered_retry_period(&self) -> Duration {
        self.config
            .retry_period
            .mul_f64(1.0 + JITTER_FACTOR * rand::random::<f64>())
    }
}

fn duration_seconds(duration: Duration) -> i32 {
    duration.as_secs_f64().ceil().clamp(1.0, i32::MAX as f64) as i32
}

fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 409)
}

/// Sorts API failures into the lock error taxonomy.
pub(crate) fn map_kube_error(error: kube::Error) -> LockError {
    match error {
        kube::Error::Api(response) if response.code == 401 || response.code == 403 => {
            LockError::Authentication(response.message)
        }
        kube::Error::Api(response) => LockError::Backend(Box::new(kube::Error::Api(response))),
        kube::Error::Auth(e) => LockError::Authentication(e.to_string()),
        other => LockError::Connection(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(30);

    #[test]
    fn test_unheld_record_can_be_taken() {
        assert!(may_take_over(None, "me", Duration::ZERO, LEASE));
        assert!(may_take_over(Some(""), "me", Duration::ZERO, LEASE));
    }

    #[test]
    fn test_own_record_can_be_renewed() {
        assert!(may_take_over(Some("me"), "me", Duration::ZERO, LEASE));
    }

    #[test]
    fn test_live_record_of_another_holder_is_respected() {
        assert!(!may_take_over(Some("other"), "me", Duration::from_secs(29), LEASE));
    }

    #[test]
    fn test_stale_record_of_another_holder_can_be_taken() {
        assert!(may_take_over(Some("other"), "me", LEASE, LEASE));
    }

    #[test]
    fn test_retry_period_fits_twice_in_deadline() {
        assert_eq!(
            ElectionConfig::retry_period_for(Duration::from_secs(15)),
            Duration::from_secs(5)
        );
        assert_eq!(
            ElectionConfig::retry_period_for(Duration::from_secs(4)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_lock_election_renews_within_one_interval() {
        let config = LockConfig::new(lockrun_core::Identity::new("node-a"))
            .lease_interval(Duration::from_secs(15))
            .lease_duration(Some(Duration::from_secs(20)));
        let election = ElectionConfig::for_lock("jobs", &config);

        assert_eq!(election.lease_name, "jobs");
        assert_eq!(election.identity, "node-a");
        assert_eq!(election.lease_duration, Duration::from_secs(20));
        assert_eq!(election.renew_deadline, Duration::from_secs(15));
        assert_eq!(election.retry_period, Duration::from_secs(5));
        assert!(election.release_on_cancel);
    }

    #[test]
    fn test_lock_election_defaults() {
        let config = LockConfig::new(lockrun_core::Identity::new("node-a"));
        let election = ElectionConfig::for_lock("lock", &config);
        assert_eq!(election.lease_duration, Duration::from_secs(30));
        assert_eq!(election.renew_deadline, Duration::from_secs(15));
    }

    #[test]
    fn test_duration_seconds_rounds_up() {
        assert_eq!(duration_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(duration_seconds(Duration::ZERO), 1);
        assert_eq!(duration_seconds(Duration::from_secs(30)), 30);
    }
}
