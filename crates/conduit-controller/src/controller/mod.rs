//! Conduit controller: renders each conduit's proxy DaemonSet and rolls it out
//!
//! Creating a missing proxy is never gated. Updating an existing one is
//! gated by the conduit's update sync group, if it declares one.

use std::collections::HashSet;
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use conduit_common::crd::Conduit;
use conduit_common::ReconcileError;
use conduit_sync::{Decision, GroupKey, MemberId};
use conduit_workload::needs_update;

use crate::config::ERROR_REQUEUE_INTERVAL;
use crate::context::ConduitContext;


// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile a Conduit resource
#[instrument(
    skip(conduit, ctx),
    fields(conduit = %conduit.name_any(), namespace = conduit.metadata.namespace.as_deref().unwrap_or_default())
)]
pub async fn reconcile(
    conduit: Arc<Conduit>,
    ctx: Arc<ConduitContext>,
) -> Result<Action, ReconcileError> {
    let name = conduit.name_any();
    let namespace = conduit.metadata.namespace.as_deref().ok_or_else(|| {
        ReconcileError::Validation(format!("conduit {name} has no namespace"))
    })?;
    let member = MemberId::new(namespace, &name);

    let conduit = match ctx.store.get_conduit(namespace, &name).await? {
        Some(conduit) if conduit.metadata.deletion_timestamp.is_none() => conduit,
        _ => {
            handle_deletion(&ctx, namespace, &name);
            return Ok(Action::await_change());
        }
    };

    let group = conduit
        .sync_group(&ctx.config.sync_group_annotation)
        .map(GroupKey::from);

    let trench_name = conduit.trench_name().ok_or_else(|| {
        ReconcileError::Validation(format!("conduit {member} has no trench label"))
    })?;
    let trench = ctx
        .store
        .get_trench(namespace, trench_name)
        .await?
        .ok_or_else(|| {
            ReconcileError::Validation(format!("trench {namespace}/{trench_name} not found"))
        })?;

    if conduit.owner_references_with(&trench).is_some() {
        debug!(trench = trench_name, "adding trench owner reference");
        ctx.store.adopt_conduit(&conduit, &trench).await?;
    }

    let desired = ctx.renderer.render(&conduit, &trench)?;
    let target = desired.workload_ref()?;

    let observed = ctx.workloads.get_observed(&target).await?;
    let update_needed = match &observed {
        // Creation never waits for the lock; the member is still registered
        None => false,
        Some(observed) => needs_update(&desired, &observed.workload)?,
    };
    let decision = ctx
        .coordinator
        .decide(&member, group.as_ref(), update_needed, &ctx.oracle)
        .await;

    // A deletion handled between the read above and `decide` would otherwise
    // leave the member registered, possibly holding the lock
    if group.is_some() && !still_present(&ctx, &conduit).await? {
        handle_deletion(&ctx, namespace, &name);
        return Ok(Action::await_change());
    }

    match (observed, decision) {
        (None, _) => {
            info!(workload = %target, "creating proxy workload");
            ctx.workloads.apply(&desired).await?;
        }
        (Some(_), Decision::ApplyNow) => {
            info!(workload = %target, group = group.as_ref().map(GroupKey::as_str), "updating proxy workload");
            ctx.workloads.apply(&desired).await?;
        }
        (Some(_), Decision::DeferFor(delay)) => {
            debug!(workload = %target, ?delay, "proxy update deferred");
            return Ok(Action::requeue(delay));
        }
        (Some(_), Decision::NoOp) => {
            debug!(workload = %target, "proxy workload up to date");
        }
    }

    if ctx.coordinator.holds_lock(&member) {
        Ok(Action::requeue(ctx.coordinator.retry_delay()))
    } else {
        Ok(Action::requeue(ctx.config.resync_interval))
    }
}

/// Whether the same incarnation of `conduit` still exists and is not terminating
async fn still_present(ctx: &ConduitContext, conduit: &Conduit) -> Result<bool, ReconcileError> {
    let namespace = conduit.namespace().unwrap_or_default();
    let current = ctx.store.get_conduit(&namespace, &conduit.name_any()).await?;
    Ok(current.is_some_and(|current| {
        current.metadata.deletion_timestamp.is_none() && current.uid() == conduit.uid()
    }))
}

/// Forget a deleted conduit, releasing its group's lock if it held it
///
/// Called for watch `Delete` events and for reconciles that find the conduit
/// gone. The proxy DaemonSet itself is garbage collected through its owner
/// reference.
pub fn handle_deletion(ctx: &ConduitContext, namespace: &str, name: &str) -> Option<GroupKey> {
    ctx.coordinator
        .handle_deletion(&MemberId::new(namespace, name))
}

/// Forget registered members that are missing from a full relist
///
/// A relist does not report conduits deleted while the watch was down. Each
/// candidate is confirmed absent with a fresh read first, since a conduit
/// created after the relist may already have been reconciled.
pub async fn prune_vanished(ctx: &ConduitContext, listed: &HashSet<MemberId>) -> Vec<MemberId> {
    let mut pruned = Vec::new();
    for member in ctx.coordinator.members() {
        if listed.contains(&member) {
            continue;
        }
        match ctx.store.get_conduit(member.namespace(), member.name()).await {
            Ok(None) => {
                ctx.coordinator.handle_deletion(&member);
                pruned.push(member);
            }
            Ok(Some(_)) => {}
            Err(e) => warn!(member = %member, error = %e, "could not confirm conduit deletion"),
        }
    }
    pruned
}

/// Error policy for the controller
pub fn error_policy(
    conduit: Arc<Conduit>,
    error: &ReconcileError,
    _ctx: Arc<ConduitContext>,
) -> Action {
    error!(
        ?error,
        conduit = %conduit.name_any(),
        namespace = conduit.metadata.namespace.as_deref().unwrap_or_default(),
        "conduit reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}
