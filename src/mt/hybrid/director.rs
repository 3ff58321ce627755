//! The clone/branch director: arbitrates a pending `Decision` once it is globally
//! safe to act on (its timestamp has fallen behind GVT) and dispatches a `CloneOrder`
//! to the source world and, if one was found, an idle destination world
//! (spec.md §4.6). Grounded in `original_source/src/director.c`'s
//! `clone_director_gvt_hook`, which performs the same arbitration from ROSS's GVT
//! hook callback.
use std::sync::{Arc, Mutex};

use crate::objects::{CloneOrder, Decision};
use crate::AikaError;

use super::galaxy::GvtHook;

/// Owned by the `Galaxy`. Tracks the single clone currently in flight so a second
/// decision can't be dispatched before the first's divergence has been picked up by
/// both worlds involved (spec.md §4.6: "recursive cloning ... rejected").
pub struct CloneDirector {
    in_progress: Option<(usize, Option<usize>)>,
}

impl CloneDirector {
    pub fn new() -> Self {
        Self { in_progress: None }
    }

    /// Whether the in-flight clone (if any) has been fully consumed: both worlds
    /// involved have taken their `CloneOrder` out of their shared slot.
    fn resolved(&self, clone_orders: &[Arc<Mutex<Option<CloneOrder>>>]) -> bool {
        match self.in_progress {
            None => true,
            Some((source, destination)) => {
                let source_done = clone_orders[source].lock().unwrap().is_none();
                let destination_done = destination
                    .map(|d| clone_orders[d].lock().unwrap().is_none())
                    .unwrap_or(true);
                source_done && destination_done
            }
        }
    }

    /// Arbitrate a decision recorded by `source`, now that it is globally safe to act
    /// on. Rolls the source and, if found, destination `Planet` back to GVT by
    /// installing a `CloneOrder` in each world's shared slot; the worlds themselves
    /// perform the rollback and divergence the next time their run loop observes it
    /// (spec.md §4.6 steps 1-4).
    ///
    /// `idle` is the caller-supplied set of candidate destination worlds (those whose
    /// local time has already caught up to GVT); `hook` picks among them, matching
    /// `g_tw_gvt_hook`'s role in `original_source`.
    pub fn dispatch(
        &mut self,
        source: usize,
        decision: Decision,
        idle: &[usize],
        hook: &GvtHook,
        clone_orders: &[Arc<Mutex<Option<CloneOrder>>>],
    ) -> Result<(), AikaError> {
        if !self.resolved(clone_orders) {
            let (busy_source, _) = self.in_progress.unwrap();
            return Err(AikaError::CloneInProgress(busy_source));
        }
        self.in_progress = None;

        let destination = hook(source, decision, idle).filter(|d| *d != source);

        {
            let mut slot = clone_orders[source].lock().unwrap();
            *slot = Some(CloneOrder::Source {
                peer_world: destination,
                decision,
            });
        }

        match destination {
            Some(dest) => {
                let mut slot = clone_orders[dest].lock().unwrap();
                *slot = Some(CloneOrder::Destination {
                    peer_world: source,
                    decision,
                });
                tracing::info!(source, destination = dest, "clone director dispatched decision");
            }
            None => {
                let err = AikaError::NoCloneDestination(source);
                tracing::warn!(source, %err, "clone director found no idle destination");
            }
        }

        self.in_progress = Some((source, destination));
        Ok(())
    }
}

impl Default for CloneDirector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(n: usize) -> Vec<Arc<Mutex<Option<CloneOrder>>>> {
        (0..n).map(|_| Arc::new(Mutex::new(None))).collect()
    }

    #[test]
    fn dispatch_picks_first_idle_destination() {
        let mut director = CloneDirector::new();
        let clone_orders = slots(3);
        let decision = Decision::new(0, 1, 2, 10);
        let hook: GvtHook = Box::new(|_source, _decision, idle: &[usize]| idle.first().copied());

        director
            .dispatch(0, decision, &[1, 2], &hook, &clone_orders)
            .unwrap();

        let source_order = clone_orders[0].lock().unwrap().unwrap();
        match source_order {
            CloneOrder::Source { peer_world, .. } => assert_eq!(peer_world, Some(1)),
            _ => panic!("expected Source order"),
        }
        let dest_order = clone_orders[1].lock().unwrap().unwrap();
        match dest_order {
            CloneOrder::Destination { peer_world, .. } => assert_eq!(peer_world, 0),
            _ => panic!("expected Destination order"),
        }
        assert!(clone_orders[2].lock().unwrap().is_none());
    }

    #[test]
    fn dispatch_with_no_idle_destination_advances_source_alone() {
        let mut director = CloneDirector::new();
        let clone_orders = slots(2);
        let decision = Decision::new(0, 1, 2, 10);
        let hook: GvtHook = Box::new(|_source, _decision, _idle: &[usize]| None);

        director.dispatch(0, decision, &[], &hook, &clone_orders).unwrap();

        let source_order = clone_orders[0].lock().unwrap().unwrap();
        match source_order {
            CloneOrder::Source { peer_world, .. } => assert_eq!(peer_world, None),
            _ => panic!("expected Source order"),
        }
    }

    #[test]
    fn dispatch_rejects_recursive_clone_before_resolution() {
        let mut director = CloneDirector::new();
        let clone_orders = slots(2);
        let decision = Decision::new(0, 1, 2, 10);
        let hook: GvtHook = Box::new(|_source, _decision, idle: &[usize]| idle.first().copied());

        director
            .dispatch(0, decision, &[1], &hook, &clone_orders)
            .unwrap();

        let second = director.dispatch(0, decision, &[1], &hook, &clone_orders);
        assert!(matches!(second, Err(AikaError::CloneInProgress(0))));
    }

    #[test]
    fn dispatch_allowed_again_once_prior_clone_resolved() {
        let mut director = CloneDirector::new();
        let clone_orders = slots(2);
        let decision = Decision::new(0, 1, 2, 10);
        let hook: GvtHook = Box::new(|_source, _decision, idle: &[usize]| idle.first().copied());

        director
            .dispatch(0, decision, &[1], &hook, &clone_orders)
            .unwrap();
        // both worlds consume their order, as the real Planet run loop would
        clone_orders[0].lock().unwrap().take();
        clone_orders[1].lock().unwrap().take();

        let result = director.dispatch(0, decision, &[1], &hook, &clone_orders);
        assert!(result.is_ok());
    }
}
