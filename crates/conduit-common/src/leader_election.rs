//! Leader election using Kubernetes Leases
//!
//! Update sync group locks live in process memory, so only one operator
//! replica may reconcile conduits at a time. Replicas compete for a
//! coordination.k8s.io/v1 Lease; only the holder runs the controllers.
//!
//! # Atomicity
//!
//! Every write after the initial create is a replace carrying the
//! resourceVersion that was read. A concurrent writer makes it fail with 409
//! Conflict, which counts as "not leader" for this round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lease name for the conduit operator leader election
pub const LEADER_LEASE_NAME: &str = "conduit-operator-leader";

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The lease read back from the API server has no resourceVersion
    #[error("lease {0} missing resourceVersion")]
    MissingResourceVersion(String),
}

/// Lease timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseTiming {
    /// How long a lease stays valid without renewal
    pub duration: Duration,
    /// Renewal period of the holder
    pub renew_every: Duration,
    /// Polling period of standbys
    pub retry_every: Duration,
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            renew_every: Duration::from_secs(10),
            retry_every: Duration::from_secs(5),
        }
    }
}

/// What a candidate should do with the lease it just read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseStep {
    /// No lease exists yet
    Create,
    /// We hold it; bump the renew time
    Renew,
    /// Someone else held it and let it expire
    TakeOver {
        /// Transition count to record
        transitions: i32,
    },
    /// Someone else holds a live lease
    Wait {
        /// Current holder, if recorded
        holder: Option<String>,
    },
}

/// Whether a lease may be taken over at `now`
///
/// A lease without renew time or duration is treated as expired.
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let renewed = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    match (renewed, duration) {
        (Some(renewed), Some(secs)) => {
            now > renewed.0 + chrono::Duration::seconds(i64::from(secs))
        }
        _ => true,
    }
}

/// Decide the next step for `identity` given the lease as read at `now`
pub fn next_step(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseStep {
    let Some(lease) = lease else {
        return LeaseStep::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.clone());

    if holder.as_deref() == Some(identity) {
        LeaseStep::Renew
    } else if holder.is_none() || lease_expired(spec, now) {
        LeaseStep::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        }
    } else {
        LeaseStep::Wait { holder }
    }
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409)
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    timing: LeaseTiming,
    leading: AtomicBool,
}

impl LeaderElector {
    /// Create an elector with default timing (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self::with_timing(client, lease_name, namespace, identity, LeaseTiming::default())
    }

    /// Create an elector with explicit timing
    pub fn with_timing(
        client: Client,
        lease_name: &str,
        namespace: &str,
        identity: &str,
        timing: LeaseTiming,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            timing,
            leading: AtomicBool::new(false),
        }
    }

    /// Whether this instance currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    /// Wait until the lease is ours, then return a guard that keeps renewing it
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "waiting for leadership");

        loop {
            match self.round().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => warn!(identity = %self.identity, error = %e, "lease round failed"),
            }
            tokio::time::sleep(self.timing.retry_every).await;
        }

        info!(identity = %self.identity, "leadership acquired");
        self.leading.store(true, Ordering::SeqCst);

        let (lost_tx, lost_rx) = oneshot::channel();
        let renewer = Arc::clone(&self);
        let renewal = tokio::spawn(async move { renewer.keep_renewing(lost_tx).await });

        LeaderGuard {
            elector: self,
            renewal,
            lost: Some(lost_rx),
        }
    }

    /// One read-decide-write round; true iff we hold the lease afterwards
    async fn round(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();
        let current = self.api.get_opt(&self.lease_name).await?;

        let step = next_step(current.as_ref(), &self.identity, now);
        let written = match (&step, current) {
            (LeaseStep::Wait { holder }, _) => {
                debug!(identity = %self.identity, holder = holder.as_deref(), "lease held elsewhere");
                return Ok(false);
            }
            (LeaseStep::Create, _) | (_, None) => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.lease_name.clone()),
                        ..Default::default()
                    },
                    spec: Some(self.held_spec(now, now, 0)),
                };
                self.api.create(&PostParams::default(), &lease).await
            }
            (LeaseStep::Renew, Some(mut lease)) => {
                self.require_version(&lease)?;
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                    spec.lease_duration_seconds = Some(self.duration_secs());
                }
                self.api
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
            (LeaseStep::TakeOver { transitions }, Some(mut lease)) => {
                self.require_version(&lease)?;
                lease.spec = Some(self.held_spec(now, now, *transitions));
                self.api
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
        };

        match written {
            Ok(_) => {
                if let LeaseStep::TakeOver { transitions } = step {
                    info!(identity = %self.identity, transitions, "took over expired lease");
                }
                Ok(true)
            }
            Err(e) if is_conflict(&e) => {
                debug!(identity = %self.identity, ?step, "lease write conflicted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn held_spec(
        &self,
        acquired: DateTime<Utc>,
        renewed: DateTime<Utc>,
        transitions: i32,
    ) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.duration_secs()),
            acquire_time: Some(MicroTime(acquired)),
            renew_time: Some(MicroTime(renewed)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    fn duration_secs(&self) -> i32 {
        i32::try_from(self.timing.duration.as_secs()).unwrap_or(i32::MAX)
    }

    fn require_version(&self, lease: &Lease) -> Result<(), LeaderElectionError> {
        match lease.metadata.resource_version {
            Some(_) => Ok(()),
            None => Err(LeaderElectionError::MissingResourceVersion(
                self.lease_name.clone(),
            )),
        }
    }

    async fn keep_renewing(&self, lost: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.timing.renew_every).await;
            match self.round().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "lease taken by another replica");
                    break;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "lease renewal failed");
                    break;
                }
            }
        }
        self.leading.store(false, Ordering::SeqCst);
        let _ = lost.send(());
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release(&self) -> Result<(), LeaderElectionError> {
        let Some(mut lease) = self.api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };
        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "not the lease holder, nothing to release");
            return Ok(());
        }

        self.require_version(&lease)?;
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
            spec.renew_time = None;
        }
        self.api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await?;

        info!(identity = %self.identity, "lease released");
        Ok(())
    }
}

/// Held leadership
///
/// Dropping the guard stops renewal; the lease then expires on its own
/// unless [`LeaderGuard::release_leadership`] cleared it first.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal: JoinHandle<()>,
    lost: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Completes once a renewal fails or another replica took the lease
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost.take() {
            let _ = rx.await;
        }
    }

    /// Hand the lease back for fast failover
    pub async fn release_leadership(&self) -> Result<(), LeaderElectionError> {
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal.abort();
        self.elector.leading.store(false, Ordering::SeqCst);
        debug!(identity = %self.elector.identity, "leader guard dropped");
    }
}
