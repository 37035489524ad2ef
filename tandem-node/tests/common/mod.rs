//! Shared helpers for the integration suite.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tandem_log::Log;
use tandem_node::{
    ClientNode, Connection, MemoryConnection, NodeEvent, NodeOptions, ServerNode,
};
use tandem_types::Message;
use tokio::sync::broadcast;

/// Install a subscriber so `RUST_LOG=trace cargo test` shows protocol flow.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two nodes talking over an in-process pair.
pub fn node_pair(
    client_log: Arc<Log>,
    server_log: Arc<Log>,
    client_options: NodeOptions,
    server_options: NodeOptions,
) -> (ClientNode<MemoryConnection>, ServerNode<MemoryConnection>) {
    let (client_end, server_end) = MemoryConnection::pair();
    (
        ClientNode::new(client_log, client_end, client_options),
        ServerNode::new(server_log, server_end, server_options),
    )
}

/// Receive and decode the next frame, failing the test after `secs`.
pub async fn recv_message_within(end: &MemoryConnection, secs: u64) -> Message {
    let frame = tokio::time::timeout(Duration::from_secs(secs), end.recv())
        .await
        .expect("no frame within deadline")
        .expect("connection closed while waiting for a frame");
    Message::decode(&frame).expect("frame should decode")
}

/// Receive and decode the next frame with a short deadline.
pub async fn recv_message(end: &MemoryConnection) -> Message {
    recv_message_within(end, 5).await
}

/// Encode and send a frame.
pub async fn send_message(end: &MemoryConnection, message: &Message) {
    end.send(message.encode().expect("message should encode"))
        .await
        .expect("send failed");
}

/// Send raw bytes, bypassing the codec.
pub async fn send_raw(end: &MemoryConnection, raw: &str) {
    end.send(raw.as_bytes().to_vec()).await.expect("send failed");
}

/// Wait for the first event matching the predicate.
pub async fn wait_event<F>(events: &mut broadcast::Receiver<NodeEvent>, mut pred: F) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no matching event within deadline");
        match event {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
        }
    }
}
