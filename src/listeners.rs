//! Listener registries and the dispatch algorithm.
//!
//! One `ListenerRegistry` instance exists per target kind: node listeners are
//! keyed by `NodeHandle`, window listeners by `WindowHandle`. Both share the
//! same dispatch algorithm.

use crate::bridges::CallbackResult;
use crate::error::{CallbackFailure, CallbackSite};
use crate::event::{DispatchOutcome, Event};
use crate::handle::ListenerId;
use crate::metrics::BridgeMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A listener. Receives the target it was registered on (`this`) and the
/// event being dispatched.
pub type Listener<T> = Arc<dyn Fn(&T, &mut Event) -> CallbackResult + Send + Sync>;

struct Registration<T> {
    id: ListenerId,
    listener: Listener<T>,
}

/// `handle -> event type -> ordered listeners`
pub struct ListenerRegistry<H, T> {
    buckets: Mutex<HashMap<H, HashMap<String, Vec<Registration<T>>>>>,
    next_id: AtomicU64,
}

impl<H, T> Default for ListenerRegistry<H, T>
where
    H: Copy + Eq + Hash + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<H, T> ListenerRegistry<H, T>
where
    H: Copy + Eq + Hash + fmt::Display,
{
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Append a listener for `(handle, event_type)`.
    ///
    /// Buckets are created on demand. The same listener registered twice
    /// fires twice.
    pub fn add(&self, handle: H, event_type: &str, listener: Listener<T>) -> ListenerId {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buckets
            .lock()
            .entry(handle)
            .or_default()
            .entry(event_type.to_string())
            .or_default()
            .push(Registration { id, listener });
        id
    }

    /// Remove one registration. Returns whether it was found.
    pub fn remove(&self, handle: H, event_type: &str, id: ListenerId) -> bool {
        let mut buckets = self.buckets.lock();
        let Some(list) = buckets
            .get_mut(&handle)
            .and_then(|types| types.get_mut(event_type))
        else {
            return false;
        };

        match list.iter().position(|registration| registration.id == id) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Listeners registered for `(handle, event_type)`
    pub fn listener_count(&self, handle: H, event_type: &str) -> usize {
        self.buckets
            .lock()
            .get(&handle)
            .and_then(|types| types.get(event_type))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Targets with a registry entry
    pub fn target_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether any target listens for `event_type`
    pub fn is_listening(&self, event_type: &str) -> bool {
        self.buckets.lock().values().any(|types| {
            types
                .get(event_type)
                .map(|list| !list.is_empty())
                .unwrap_or(false)
        })
    }

    /// Copy out the current listener sequence. A missing entry is an empty
    /// sequence.
    fn snapshot(&self, handle: H, event_type: &str) -> Vec<Listener<T>> {
        self.buckets
            .lock()
            .get(&handle)
            .and_then(|types| types.get(event_type))
            .map(|list| {
                list.iter()
                    .map(|registration| Arc::clone(&registration.listener))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run every listener for `(handle, event.type)` in registration order.
    ///
    /// No lock is held while listeners run, so a listener may register more
    /// listeners; those run from the next dispatch on. A failing listener is
    /// recorded and the rest still run.
    pub fn dispatch(
        &self,
        target: &T,
        handle: H,
        event: &mut Event,
        metrics: &BridgeMetrics,
    ) -> DispatchOutcome {
        let listeners = self.snapshot(handle, event.event_type());
        let mut failures = Vec::new();

        for (index, listener) in listeners.iter().enumerate() {
            if let Err(error) = listener(target, event) {
                warn!(
                    target_handle = %handle,
                    event_type = event.event_type(),
                    index,
                    error = %format!("{:#}", error),
                    "Listener failed"
                );
                metrics.record_callback_failure();
                failures.push(CallbackFailure::new(
                    CallbackSite::Listener {
                        event_type: event.event_type().to_string(),
                    },
                    index,
                    error,
                ));
            }
        }

        DispatchOutcome {
            default_action: event.do_default(),
            invoked: listeners.len(),
            failures,
        }
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.buckets.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::NodeHandle;
    use std::sync::atomic::AtomicUsize;

    /// Stand-in target carrying its own handle
    struct Target(NodeHandle);

    fn registry() -> ListenerRegistry<NodeHandle, Target> {
        ListenerRegistry::new()
    }

    #[test]
    fn test_dispatch_without_listeners_returns_flag_unchanged() {
        let registry = registry();
        let metrics = BridgeMetrics::new();
        let target = Target(NodeHandle::new(1));

        let mut event = Event::new("click");
        let outcome = registry.dispatch(&target, target.0, &mut event, &metrics);
        assert!(outcome.default_action);
        assert_eq!(outcome.invoked, 0);

        let mut prevented = Event::new("click");
        prevented.prevent_default();
        let outcome = registry.dispatch(&target, target.0, &mut prevented, &metrics);
        assert!(!outcome.default_action);
    }

    #[test]
    fn test_listeners_run_in_registration_order_with_this_bound() {
        let registry = registry();
        let metrics = BridgeMetrics::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handle = NodeHandle::new(4);

        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            registry.add(
                handle,
                "click",
                Arc::new(move |this: &Target, _: &mut Event| {
                    order.lock().push((label, this.0));
                    Ok(())
                }),
            );
        }

        let mut event = Event::new("click");
        registry.dispatch(&Target(handle), handle, &mut event, &metrics);
        assert_eq!(*order.lock(), vec![("first", handle), ("second", handle)]);
    }

    #[test]
    fn test_duplicate_registration_fires_twice() {
        let registry = registry();
        let metrics = BridgeMetrics::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = NodeHandle::new(2);

        let listener: Listener<Target> = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &Target, _: &mut Event| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        registry.add(handle, "input", Arc::clone(&listener));
        registry.add(handle, "input", listener);

        let mut event = Event::new("input");
        registry.dispatch(&Target(handle), handle, &mut event, &metrics);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_listener_does_not_stop_the_rest() {
        let registry = registry();
        let metrics = BridgeMetrics::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let handle = NodeHandle::new(9);

        registry.add(
            handle,
            "click",
            Arc::new(|_: &Target, event: &mut Event| {
                event.prevent_default();
                anyhow::bail!("listener exploded")
            }),
        );
        {
            let ran = Arc::clone(&ran);
            registry.add(
                handle,
                "click",
                Arc::new(move |_: &Target, _: &mut Event| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        let mut event = Event::new("click");
        let outcome = registry.dispatch(&Target(handle), handle, &mut event, &metrics);

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 0);
        assert!(!outcome.default_action);
        assert_eq!(metrics.callback_failures(), 1);
    }

    #[test]
    fn test_handles_and_types_are_isolated() {
        let registry = registry();
        let metrics = BridgeMetrics::new();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count = Arc::clone(&count);
            registry.add(
                NodeHandle::new(1),
                "click",
                Arc::new(move |_: &Target, _: &mut Event| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        let other = NodeHandle::new(2);
        registry.dispatch(&Target(other), other, &mut Event::new("click"), &metrics);
        let first = NodeHandle::new(1);
        registry.dispatch(&Target(first), first, &mut Event::new("keydown"), &metrics);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registry.is_listening("click"));
        assert!(!registry.is_listening("keydown"));
    }

    #[test]
    fn test_remove_listener() {
        let registry = registry();
        let handle = NodeHandle::new(5);
        let id = registry.add(handle, "click", Arc::new(|_: &Target, _: &mut Event| Ok(())));

        assert_eq!(registry.listener_count(handle, "click"), 1);
        assert!(registry.remove(handle, "click", id));
        assert!(!registry.remove(handle, "click", id));
        assert_eq!(registry.listener_count(handle, "click"), 0);
    }
}
