//! Dependency graph: edge bookkeeping and change propagation.
//!
//! # Propagation
//!
//! When containers change, every transitive dependent is ordered
//! topologically (Kahn's algorithm over the reachable subgraph, breadth-first
//! so that nearer dependents come first). Each dependent is then visited once:
//!
//! 1. If none of its upstreams changed during this round it is skipped.
//! 2. Otherwise it reacts via [`AnyInjected::on_upstream_changed`], which
//!    applies the waiting/error/recompute rules and any debounce/throttle gate.
//! 3. If its own snapshot transitioned, it joins the changed set, so its
//!    dependents are considered in turn.
//!
//! A configuration error from one dependent does not stop the round; the
//! first such error is returned once every dependent has been visited.
//!
//! Because a dependent is only visited after all of its upstreams, diamonds
//! never observe a half-updated graph and every observer is notified at most
//! once per round, upstream before downstream.

use std::collections::VecDeque;

use crate::arena::NodeId;
use crate::error::ConfigError;
use crate::hash::{NodeMap, NodeSet};
use crate::injected::AnyInjected;
use crate::runtime::RuntimeInner;
use crate::snapshot::{ErrorSnapshot, Status};

/// Record `dependent -> upstream`, refusing edges that would close a cycle.
pub(crate) fn link(rt: &RuntimeInner, dependent: NodeId, upstream: NodeId) -> Result<(), ConfigError> {
    if let Some(mut path) = path_between(rt, upstream, dependent) {
        cov_mark::hit!(cyclic_edge_rejected);
        path.insert(0, dependent);
        let path: Vec<String> = path.into_iter().map(|id| rt.arena.label(id)).collect();
        tracing::warn!(cycle = %path.join(" -> "), "rejected cyclic dependency");
        return Err(ConfigError::Cycle { path });
    }
    if rt.arena.link(dependent, upstream) {
        tracing::trace!(
            dependent = %rt.arena.label(dependent),
            upstream = %rt.arena.label(upstream),
            "linked dependency"
        );
    }
    Ok(())
}

/// Depth-first search along upstream edges. Returns `from .. to` if `from`
/// (transitively) reads `to`, or if they are the same node.
fn path_between(rt: &RuntimeInner, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
    if from == to {
        return Some(vec![from]);
    }
    let mut visited = NodeSet::default();
    let mut stack = vec![(from, 0usize)];
    let mut path = Vec::new();
    while let Some((id, depth)) = stack.pop() {
        path.truncate(depth);
        path.push(id);
        if id == to {
            return Some(path);
        }
        if !visited.insert(id) {
            continue;
        }
        for source in rt.arena.sources(id) {
            stack.push((source, depth + 1));
        }
    }
    None
}

/// Transitive dependents of `origins`, upstream first. Origins themselves are
/// excluded: they already hold their new snapshot.
pub(crate) fn topological_order(rt: &RuntimeInner, origins: &NodeSet<NodeId>) -> Result<Vec<NodeId>, ConfigError> {
    let mut reachable = NodeSet::default();
    let mut queue: VecDeque<NodeId> = origins.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        for dependent in rt.arena.dependents(id) {
            if !origins.contains(&dependent) && reachable.insert(dependent) {
                queue.push_back(dependent);
            }
        }
    }

    let mut in_degree: NodeMap<NodeId, usize> = reachable
        .iter()
        .map(|&id| {
            let degree = rt
                .arena
                .sources(id)
                .iter()
                .filter(|source| reachable.contains(*source))
                .count();
            (id, degree)
        })
        .collect();

    let mut ready: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(reachable.len());
    while let Some(id) = ready.pop_front() {
        order.push(id);
        for dependent in rt.arena.dependents(id) {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if order.len() != reachable.len() {
        let path: Vec<String> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree > 0)
            .map(|(&id, _)| rt.arena.label(id))
            .collect();
        tracing::warn!(cycle = %path.join(" -> "), "dependency graph is not acyclic");
        return Err(ConfigError::Cycle { path });
    }
    Ok(order)
}

/// Push the changes of `origins` through the graph.
///
/// Inside a batch the origins are queued and the round runs when the
/// outermost batch closes.
pub(crate) fn propagate(rt: &RuntimeInner, origins: impl IntoIterator<Item = NodeId>) -> Result<(), ConfigError> {
    run_round(rt, origins.into_iter().collect(), false)
}

/// Like [`propagate`], but every transitive dependent recomputes even if its
/// upstreams settled on an equal value.
pub(crate) fn propagate_refresh(rt: &RuntimeInner, origin: NodeId) -> Result<(), ConfigError> {
    run_round(rt, [origin].into_iter().collect(), true)
}

fn run_round(rt: &RuntimeInner, origins: NodeSet<NodeId>, force: bool) -> Result<(), ConfigError> {
    if origins.is_empty() {
        return Ok(());
    }
    if rt.batch.defer(&origins) {
        cov_mark::hit!(propagation_deferred_by_batch);
        return Ok(());
    }

    let order = topological_order(rt, &origins)?;
    tracing::trace!(origins = origins.len(), dependents = order.len(), force, "propagation round");

    // The origins already hold (and announced) their new snapshots, so a
    // failing dependent must not leave the rest of the round stale.
    let mut failure = None;
    let mut changed = origins;
    for id in order {
        let affected = force || rt.arena.sources(id).iter().any(|source| changed.contains(source));
        if !affected {
            cov_mark::hit!(unchanged_branch_skipped);
            continue;
        }
        let Some(node) = rt.arena.node(id) else {
            continue;
        };
        match node.on_upstream_changed() {
            Ok(true) => {
                changed.insert(id);
            }
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(label = %node.label(), %error, "dependent failed to recompute");
                failure.get_or_insert(error);
            }
        }
    }
    failure.map_or(Ok(()), Err)
}

/// Aggregate state of a container's upstreams.
#[derive(Clone, Debug)]
pub(crate) enum Upstream {
    /// Every upstream is settled with data (or idle and will initialize on read).
    Ready,
    /// At least one upstream is waiting.
    Waiting,
    /// No upstream is waiting and at least one holds this error.
    Failed(ErrorSnapshot),
}

pub(crate) fn upstream_condition(rt: &RuntimeInner, id: NodeId) -> Upstream {
    let mut failed = None;
    for source in rt.arena.sources(id) {
        let Some(node) = rt.arena.node(source) else {
            continue;
        };
        match node.status() {
            Status::Waiting => return Upstream::Waiting,
            Status::Error if failed.is_none() => failed = node.error_snapshot(),
            _ => {}
        }
    }
    failed.map_or(Upstream::Ready, Upstream::Failed)
}

/// Dispose `candidates` that auto-dispose and are no longer used by anyone.
pub(crate) fn release_unused(rt: &RuntimeInner, candidates: Vec<NodeId>) {
    for id in candidates {
        if let Some(node) = rt.arena.node(id) {
            release_if_unused(rt, &*node);
        }
    }
}

pub(crate) fn release_if_unused(rt: &RuntimeInner, node: &dyn AnyInjected) {
    let id = node.id();
    if node.auto_disposes()
        && node.is_initialized()
        && rt.observers.count(id) == 0
        && !rt.arena.has_dependents(id)
    {
        cov_mark::hit!(unused_container_released);
        node.dispose();
    }
}

#[cfg(test)]
mod tests {
    use crate::{ConfigError, Runtime};

    #[test]
    fn order_is_topological_for_a_diamond() {
        let rt = Runtime::new();
        let top = rt.inject(|| Ok(1));
        let left = {
            let top = top.clone();
            rt.inject(move || Ok(top.read()? + 1))
        };
        let right = {
            let top = top.clone();
            rt.inject(move || Ok(top.read()? * 2))
        };
        let bottom = {
            let (left, right) = (left.clone(), right.clone());
            rt.inject(move || Ok(left.read()? + right.read()?))
        };
        assert_eq!(bottom.read().unwrap(), 4);

        let origins = [top.id()].into_iter().collect();
        let order = super::topological_order(&rt.inner, &origins).unwrap();

        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&bottom.id()));
        let bottom_pos = order.iter().position(|id| *id == bottom.id()).unwrap();
        for upstream in [left.id(), right.id()] {
            assert!(order.iter().position(|id| *id == upstream).unwrap() < bottom_pos);
        }
    }

    #[test]
    fn self_edge_is_a_cycle() {
        cov_mark::check!(cyclic_edge_rejected);
        let rt = Runtime::new();
        let node = rt.inject(|| Ok(0));
        let err = super::link(&rt.inner, node.id(), node.id()).unwrap_err();
        assert!(matches!(err, ConfigError::Cycle { .. }));
    }

    #[test]
    fn closing_edge_reports_full_path() {
        let rt = Runtime::new();
        let a = rt.build::<i32>().label("a").value(1);
        let b = {
            let a = a.clone();
            rt.build::<i32>().label("b").sync(move || a.read().map_err(Into::into))
        };
        let c = {
            let b = b.clone();
            rt.build::<i32>().label("c").sync(move || b.read().map_err(Into::into))
        };
        assert_eq!(c.read().unwrap(), 1);

        let Err(ConfigError::Cycle { path }) = super::link(&rt.inner, a.id(), c.id()) else {
            panic!("expected a cycle");
        };
        assert_eq!(path, vec!["a", "c", "b", "a"]);
    }
}
