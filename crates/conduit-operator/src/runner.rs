//! Controller wiring for the operator binary

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use futures::{future, Stream, StreamExt};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use conduit_common::crd::Conduit;
use conduit_controller::{error_policy, handle_deletion, prune_vanished, reconcile, ConduitContext};
use conduit_sync::MemberId;

/// Server-side watch timeout, below the API server's 30s default
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the Conduit controller and the deletion watcher until shutdown
///
/// Proxy DaemonSets are watched through their owner reference so a drifting
/// or progressing rollout reconciles the owning conduit.
pub async fn run(client: Client, ctx: Arc<ConduitContext>, namespace: Option<&str>) {
    let conduits: Api<Conduit> = scoped_api(&client, namespace);
    let proxies: Api<DaemonSet> = scoped_api(&client, namespace);

    let controller = Controller::new(
        conduits.clone(),
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .owns(proxies, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
    .shutdown_on_signal()
    .run(reconcile, error_policy, Arc::clone(&ctx))
    .for_each(log_reconcile_result("Conduit"));

    tokio::select! {
        () = controller => info!("conduit controller stopped"),
        () = watch_deletions(conduits, ctx) => warn!("conduit deletion watcher ended"),
    }
}

/// What the deletion watcher does for a conduit event
#[derive(Debug, PartialEq, Eq)]
enum DeletionAction {
    /// The conduit was deleted while watched
    Forget(MemberId),
    /// A relist finished; everything registered but not listed may be gone
    Prune(HashSet<MemberId>),
}

/// Map a conduit watch stream onto sync group table actions
///
/// Relisted conduits accumulate between `Init` and `InitDone`.
fn deletion_actions<S>(events: S) -> impl Stream<Item = DeletionAction>
where
    S: Stream<Item = Result<Event<Conduit>, watcher::Error>>,
{
    events
        .scan(HashSet::new(), |listed, event| {
            let action = match event {
                Ok(Event::Delete(conduit)) => member_id(&conduit).map(DeletionAction::Forget),
                Ok(Event::Init) => {
                    listed.clear();
                    None
                }
                Ok(Event::InitApply(conduit)) => {
                    listed.extend(member_id(&conduit));
                    None
                }
                Ok(Event::InitDone) => Some(DeletionAction::Prune(std::mem::take(listed))),
                Ok(Event::Apply(_)) => None,
                Err(e) => {
                    warn!(error = %e, "conduit watch failed, retrying");
                    None
                }
            };
            future::ready(Some(action))
        })
        .filter_map(future::ready)
}

/// Feed conduit deletions into the sync group table
async fn watch_deletions(api: Api<Conduit>, ctx: Arc<ConduitContext>) {
    let events =
        watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)).default_backoff();
    let mut actions = pin!(deletion_actions(events));

    while let Some(action) = actions.next().await {
        match action {
            DeletionAction::Forget(member) => {
                debug!(member = %member, "conduit deleted");
                handle_deletion(&ctx, member.namespace(), member.name());
            }
            DeletionAction::Prune(listed) => {
                let pruned = prune_vanished(&ctx, &listed).await;
                if !pruned.is_empty() {
                    info!(count = pruned.len(), "forgot conduits deleted while the watch was down");
                }
            }
        }
    }
}

fn member_id(conduit: &Conduit) -> Option<MemberId> {
    let namespace = conduit.namespace()?;
    Some(MemberId::new(&namespace, &conduit.name_any()))
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::crd::ConduitSpec;
    use futures::stream;

    fn conduit(namespace: Option<&str>, name: &str) -> Conduit {
        let mut conduit = Conduit::new(name, ConduitSpec::default());
        conduit.metadata.namespace = namespace.map(str::to_string);
        conduit
    }

    fn members(names: &[&str]) -> HashSet<MemberId> {
        names.iter().map(|name| MemberId::new("red", name)).collect()
    }

    async fn actions(events: Vec<Result<Event<Conduit>, watcher::Error>>) -> Vec<DeletionAction> {
        deletion_actions(stream::iter(events)).collect().await
    }

    #[tokio::test]
    async fn deletes_become_forget_actions() {
        let got = actions(vec![
            Ok(Event::Apply(conduit(Some("red"), "a"))),
            Ok(Event::Delete(conduit(Some("red"), "a"))),
            Ok(Event::Delete(conduit(None, "cluster-scoped"))),
        ])
        .await;
        assert_eq!(got, vec![DeletionAction::Forget(MemberId::new("red", "a"))]);
    }

    #[tokio::test]
    async fn relist_prunes_with_listed_members() {
        let got = actions(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(conduit(Some("red"), "a"))),
            Ok(Event::InitApply(conduit(Some("red"), "b"))),
            Ok(Event::InitDone),
        ])
        .await;
        assert_eq!(got, vec![DeletionAction::Prune(members(&["a", "b"]))]);
    }

    #[tokio::test]
    async fn restarted_relist_starts_from_scratch() {
        let got = actions(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(conduit(Some("red"), "stale"))),
            Ok(Event::Init),
            Ok(Event::InitApply(conduit(Some("red"), "a"))),
            Ok(Event::InitDone),
            Ok(Event::Init),
            Ok(Event::InitDone),
        ])
        .await;
        assert_eq!(
            got,
            vec![
                DeletionAction::Prune(members(&["a"])),
                DeletionAction::Prune(HashSet::new()),
            ]
        );
    }

    #[tokio::test]
    async fn watch_errors_are_skipped() {
        let failure = watcher::Error::WatchFailed(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        }));
        let got = actions(vec![Err(failure), Ok(Event::Delete(conduit(Some("red"), "a")))]).await;
        assert_eq!(got, vec![DeletionAction::Forget(MemberId::new("red", "a"))]);
    }
}
