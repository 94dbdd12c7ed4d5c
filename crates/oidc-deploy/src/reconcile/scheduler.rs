//! Bounded parallel walk over a dependency order

use crate::model::ResourceRef;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a walk
#[derive(Debug)]
pub(crate) struct Walk<T, E> {
    /// Finished tasks, in completion order
    pub completed: Vec<(ResourceRef, T)>,
    /// First failure; later failures of in-flight tasks are only logged
    pub failure: Option<(ResourceRef, E)>,
    pub cancelled: bool,
}

/// Run one task per node, never before its prerequisites finished
///
/// `nodes` is a dependency order; ready nodes are dispatched in that order,
/// at most `parallelism` at a time. `start` sees the results of every task
/// finished so far and builds the next task (or fails it outright). After a
/// failure or cancellation nothing new is dispatched, but tasks already in
/// flight run to completion and are reported.
pub(crate) async fn run<T, E, F, Fut>(
    nodes: Vec<(ResourceRef, BTreeSet<ResourceRef>)>,
    parallelism: usize,
    cancel: &CancellationToken,
    mut start: F,
) -> Walk<T, E>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: FnMut(&ResourceRef, &BTreeMap<ResourceRef, T>) -> Result<Fut, E>,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let parallelism = parallelism.max(1);
    let known: BTreeSet<ResourceRef> = nodes.iter().map(|(id, _)| id.clone()).collect();
    let mut pending: Vec<(ResourceRef, BTreeSet<ResourceRef>)> = nodes
        .into_iter()
        .map(|(id, prereqs)| {
            let prereqs = prereqs.into_iter().filter(|p| known.contains(p)).collect();
            (id, prereqs)
        })
        .collect();

    let mut done: BTreeMap<ResourceRef, T> = BTreeMap::new();
    let mut order: Vec<ResourceRef> = Vec::new();
    let mut failure: Option<(ResourceRef, E)> = None;
    let mut cancelled = false;
    let mut tasks = JoinSet::new();

    loop {
        if failure.is_none() && !cancelled {
            if cancel.is_cancelled() && !pending.is_empty() {
                debug!(remaining = pending.len(), "Walk cancelled, no further dispatch");
                cancelled = true;
            } else {
                let mut i = 0;
                while tasks.len() < parallelism && i < pending.len() {
                    if !pending[i].1.iter().all(|p| done.contains_key(p)) {
                        i += 1;
                        continue;
                    }
                    let (id, _) = pending.remove(i);
                    match start(&id, &done) {
                        Ok(fut) => {
                            tasks.spawn(async move { (id, fut.await) });
                        }
                        Err(e) => {
                            failure = Some((id, e));
                            break;
                        }
                    }
                }
            }
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok((id, Ok(value))) => {
                order.push(id.clone());
                done.insert(id, value);
            }
            Ok((id, Err(e))) => {
                if failure.is_none() {
                    failure = Some((id, e));
                } else {
                    debug!(resource = %id, error = %e, "Additional failure after the walk stopped");
                }
            }
            Err(e) => {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
                debug!(error = ?e, "Reconcile task cancelled");
            }
        }
    }

    let completed = order
        .into_iter()
        .filter_map(|id| done.remove(&id).map(|value| (id, value)))
        .collect();

    Walk {
        completed,
        failure,
        cancelled,
    }
}
