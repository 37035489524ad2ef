//! The server handshake role.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tandem_log::Log;
use tokio::time::Instant;

use crate::config::NodeOptions;
use crate::connection::Connection;
use crate::node::{Node, Role};

/// Failed handshakes per node id before the lockout engages.
const MAX_AUTH_FAILURES: usize = 3;

/// How long a failed handshake counts against a node id.
const FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Windowed counter of failed authentications per remote node id.
///
/// Once a node id accumulates [`MAX_AUTH_FAILURES`] failures inside
/// [`FAILURE_WINDOW`], further handshakes from it are answered with a
/// `bruteforce` error until the window drains. Share one guard across all
/// server nodes of a process so that reconnecting does not reset the count.
#[derive(Debug, Clone, Default)]
pub struct BruteforceGuard {
    attempts: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
}

impl BruteforceGuard {
    /// A guard with no recorded failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failed authentication for `node_id`.
    pub fn record_failure(&self, node_id: &str) {
        let mut attempts = self.attempts.lock().unwrap();
        let failures = attempts.entry(node_id.to_string()).or_default();
        let now = Instant::now();
        failures.retain(|at| now.duration_since(*at) < FAILURE_WINDOW);
        failures.push(now);
    }

    /// Is this node id currently locked out?
    pub fn is_locked(&self, node_id: &str) -> bool {
        let mut attempts = self.attempts.lock().unwrap();
        let Some(failures) = attempts.get_mut(node_id) else {
            return false;
        };
        let now = Instant::now();
        failures.retain(|at| now.duration_since(*at) < FAILURE_WINDOW);
        failures.len() >= MAX_AUTH_FAILURES
    }
}

/// A node that awaits the peer's handshake.
///
/// Validates the `connect` frame, checks protocol compatibility, runs the
/// authenticator and connect hooks, then answers `connected` with its
/// receive/send timestamps for clock-skew correction. All post-handshake
/// behavior lives in [`Node`], which this dereferences to.
pub struct ServerNode<C: Connection> {
    node: Node<C>,
}

impl<C: Connection> ServerNode<C> {
    /// Pair a log with a connection in the server role.
    ///
    /// The brute-force guard is private to this node; a server accepting
    /// many connections should share one via [`ServerNode::with_guard`].
    pub fn new(log: Arc<Log>, connection: C, options: NodeOptions) -> Self {
        Self::with_guard(log, connection, options, BruteforceGuard::new())
    }

    /// Like [`ServerNode::new`] with a shared brute-force guard.
    pub fn with_guard(
        log: Arc<Log>,
        connection: C,
        options: NodeOptions,
        guard: BruteforceGuard,
    ) -> Self {
        Self {
            node: Node::build(Role::Server, log, connection, options, Some(guard)),
        }
    }
}

impl<C: Connection> Deref for ServerNode<C> {
    type Target = Node<C>;

    fn deref(&self) -> &Node<C> {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn guard_locks_after_repeated_failures() {
        let guard = BruteforceGuard::new();
        assert!(!guard.is_locked("10:client"));

        for _ in 0..MAX_AUTH_FAILURES {
            guard.record_failure("10:client");
        }
        assert!(guard.is_locked("10:client"));
        assert!(!guard.is_locked("11:other"));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_forgets_failures_after_the_window() {
        let guard = BruteforceGuard::new();
        for _ in 0..MAX_AUTH_FAILURES {
            guard.record_failure("10:client");
        }
        assert!(guard.is_locked("10:client"));

        tokio::time::advance(FAILURE_WINDOW + Duration::from_secs(1)).await;
        assert!(!guard.is_locked("10:client"));
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_the_failure_count() {
        let guard = BruteforceGuard::new();
        let shared = guard.clone();
        for _ in 0..MAX_AUTH_FAILURES {
            shared.record_failure("10:client");
        }
        assert!(guard.is_locked("10:client"));
    }
}
