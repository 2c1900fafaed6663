//! Per-queue wait-node stacks for `FetchNextJob`'s slow path.
//!
//! The source design used a lock-free CAS-based linked stack; this crate
//! forbids `unsafe_code` at the workspace level (matching the teacher), so
//! the stack is instead guarded by a single `parking_lot::Mutex`. Because
//! `add`/`signal_one` already serialize through that mutex, the
//! tombstone/retry dance the lock-free version needed to avoid lost wakeups
//! is unnecessary: a signal always fires a node that was actually present.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

/// A one-shot wake primitive: a single consumer registers, a single
/// producer fires it, waits beyond the first firing observe the fired
/// state immediately (`wait_timeout` short-circuits once `fired` is true).
pub struct WaitNode {
    fired: Mutex<bool>,
    condvar: Condvar,
}

impl WaitNode {
    /// Creates an unfired wait node.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { fired: Mutex::new(false), condvar: Condvar::new() })
    }

    /// Fires the node, waking any waiter.
    pub fn fire(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.condvar.notify_all();
    }

    /// Blocks up to `timeout`, returning `true` if the node was fired
    /// (either before the call or during the wait).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        if *fired {
            return true;
        }
        self.condvar.wait_for(&mut fired, timeout);
        *fired
    }

    /// Whether the node has been fired, without blocking.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }
}

/// Mutex-guarded LIFO of wait nodes registered against one queue.
#[derive(Default)]
pub struct QueueWaitList {
    stack: Mutex<Vec<Arc<WaitNode>>>,
}

impl QueueWaitList {
    /// Creates an empty wait list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `node` onto the head of the stack.
    pub fn add(&self, node: Arc<WaitNode>) {
        self.stack.lock().push(node);
    }

    /// Pops one node from the head and fires it. Returns `true` if a node
    /// was present and signalled.
    pub fn signal_one(&self) -> bool {
        let node = self.stack.lock().pop();
        match node {
            Some(node) => {
                node.fire();
                true
            }
            None => false,
        }
    }

    /// Number of nodes currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }

    /// Whether no nodes are currently waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }
}

/// `queue name -> wait list`, shared across client threads without going
/// through the dispatcher (registration/signalling must work even while
/// the dispatcher thread is busy with an unrelated command).
#[derive(Default)]
pub struct QueueWaitRegistry {
    lists: DashMap<String, Arc<QueueWaitList>>,
}

impl QueueWaitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wait list for `queue`, creating it if absent.
    pub fn list_for(&self, queue: &str) -> Arc<QueueWaitList> {
        self.lists.entry(queue.to_string()).or_insert_with(|| Arc::new(QueueWaitList::new())).clone()
    }

    /// Signals one waiter on `queue`, if any are registered. Returns
    /// `true` if a waiter was woken.
    pub fn signal_one(&self, queue: &str) -> bool {
        self.lists.get(queue).map(|l| l.signal_one()).unwrap_or(false)
    }

    /// Registers one wait node per queue name in `queues`, returning them
    /// alongside a map the caller can use to identify which queue fired.
    pub fn register_all(&self, queues: &[String]) -> HashMap<String, Arc<WaitNode>> {
        queues
            .iter()
            .map(|q| {
                let node = WaitNode::new();
                self.list_for(q).add(node.clone());
                (q.clone(), node)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_one_on_empty_list_returns_false() {
        let list = QueueWaitList::new();
        assert!(!list.signal_one());
    }

    #[test]
    fn add_then_signal_fires_the_node() {
        let list = QueueWaitList::new();
        let node = WaitNode::new();
        list.add(node.clone());
        assert!(list.signal_one());
        assert!(node.is_fired());
    }

    #[test]
    fn signal_one_wakes_exactly_one_of_two_waiters() {
        let list = QueueWaitList::new();
        let a = WaitNode::new();
        let b = WaitNode::new();
        list.add(a.clone());
        list.add(b.clone());
        assert!(list.signal_one());
        let fired_count = [&a, &b].iter().filter(|n| n.is_fired()).count();
        assert_eq!(fired_count, 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn registry_signal_one_routes_to_correct_queue() {
        let registry = QueueWaitRegistry::new();
        let nodes = registry.register_all(&["q1".to_string(), "q2".to_string()]);
        assert!(registry.signal_one("q2"));
        assert!(nodes["q2"].is_fired());
        assert!(!nodes["q1"].is_fired());
    }

    #[test]
    fn wait_timeout_returns_true_when_already_fired() {
        let node = WaitNode::new();
        node.fire();
        assert!(node.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_timeout_returns_false_when_never_fired() {
        let node = WaitNode::new();
        assert!(!node.wait_timeout(Duration::from_millis(10)));
    }
}
