// harvest - core/cancel.rs
//
// Cooperative cancellation shared across pipeline threads.
//
// A token is an `Arc<AtomicBool>` with an optional parent. Cancelling a token
// cancels every token derived from it; cancelling a child never affects its
// parent. The harvest caller holds the root, each session derives a child for
// the lifetime of one command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Node {
    flag: AtomicBool,
    parent: Option<Arc<Node>>,
}

/// Cloneable cancellation handle. Clones observe and control the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    node: Arc<Node>,
}

impl CancelToken {
    /// A fresh root token.
    pub fn new() -> Self {
        Self {
            node: Arc::new(Node {
                flag: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Derive a child token, cancelled when either it or any ancestor is.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(Node {
                flag: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.node)),
            }),
        }
    }

    /// Fire this token (and, transitively, all of its children).
    pub fn cancel(&self) {
        self.node.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        let mut node = Some(&self.node);
        while let Some(n) = node {
            if n.flag.load(Ordering::SeqCst) {
                return true;
            }
            node = n.parent.as_ref();
        }
        false
    }

    /// Returns `true` if an ancestor (not this token itself) was cancelled.
    ///
    /// Lets a session tell an external shutdown apart from its own teardown.
    pub fn is_parent_cancelled(&self) -> bool {
        let mut node = self.node.parent.as_ref();
        while let Some(n) = node {
            if n.flag.load(Ordering::SeqCst) {
                return true;
            }
            node = n.parent.as_ref();
        }
        false
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
