//! The client handshake role.

use std::ops::Deref;
use std::sync::Arc;

use tandem_log::Log;

use crate::config::NodeOptions;
use crate::connection::Connection;
use crate::node::{Node, Role};

/// A node that opens the handshake.
///
/// On transport open it reads the store's `added` counter, sends `connect`,
/// and waits for the server's `connected` before starting to sync. All
/// post-handshake behavior lives in [`Node`], which this dereferences to.
///
/// ```ignore
/// let log = Arc::new(Log::test("client"));
/// let (transport, _server_end) = MemoryConnection::pair();
/// let node = ClientNode::new(log, transport, NodeOptions::new().fix_time());
/// node.connect().await?;
/// node.wait_for(NodeState::Synchronized).await;
/// ```
pub struct ClientNode<C: Connection> {
    node: Node<C>,
}

impl<C: Connection> ClientNode<C> {
    /// Pair a log with a connection in the client role.
    pub fn new(log: Arc<Log>, connection: C, options: NodeOptions) -> Self {
        Self {
            node: Node::build(Role::Client, log, connection, options, None),
        }
    }
}

impl<C: Connection> Deref for ClientNode<C> {
    type Target = Node<C>;

    fn deref(&self) -> &Node<C> {
        &self.node
    }
}
