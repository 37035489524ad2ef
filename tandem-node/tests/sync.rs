//! Synchronization: streaming, bookmarks, idempotence, filters, skew.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{node_pair, recv_message, send_message, wait_event};
use serde_json::json;
use tandem_log::{Log, MemoryStore, NewMeta, SyncedUpdate, TestTime};
use tandem_node::{
    ClientNode, Connection, MemoryConnection, NodeEvent, NodeOptions, NodeState, ServerNode,
    TimeFix,
};
use tandem_types::{Action, Entry, Message, Meta, PROTOCOL};

fn reasons(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}

fn wire_entry(id: &str, time: i64, kind: &str) -> Entry {
    let mut meta = Meta::new(id.parse().unwrap());
    meta.time = time;
    meta.reasons = reasons(&["test"]);
    Entry::new(Action::new(kind), meta)
}

// ===========================================
// Clock-skew correction
// ===========================================

#[tokio::test]
async fn fix_time_agrees_on_base_and_offset() {
    let client_log = Arc::new(Log::with_test_time(
        "client",
        TestTime::sequence([10000, 11101]),
    ));
    let server_log = Arc::new(Log::with_test_time("server", TestTime::sequence([50, 1050])));
    let (client, server) = node_pair(
        client_log,
        server_log,
        NodeOptions::new().fix_time(),
        NodeOptions::new(),
    );
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    client.wait_for(NodeState::Synchronized).await;

    assert_eq!(
        client.time_fix(),
        TimeFix {
            base_time: 1050,
            time_fix: 10000
        }
    );
    assert_eq!(
        server.time_fix(),
        TimeFix {
            base_time: 1050,
            time_fix: 0
        }
    );

    client.destroy().await;
    server.destroy().await;
}

// ===========================================
// Streaming and bookmarks
// ===========================================

#[tokio::test]
async fn pending_entries_stream_as_one_batch_and_ack_moves_the_bookmark() {
    let log = Arc::new(Log::test("client"));
    for kind in ["a1", "a2", "a3", "a4", "a5"] {
        log.add(Action::new(kind), NewMeta::default().reason("test"))
            .await
            .unwrap();
    }
    // Entries 1..=3 were acknowledged in an earlier session.
    log.store()
        .set_last_synced("server", SyncedUpdate::sent(3))
        .await
        .unwrap();

    let (client_end, test_end) = MemoryConnection::pair();
    let client = ClientNode::new(Arc::clone(&log), client_end, NodeOptions::new());
    test_end.connect().await.unwrap();
    client.connect().await.unwrap();

    match recv_message(&test_end).await {
        Message::Connect { synced, .. } => assert_eq!(synced, 5),
        other => panic!("expected connect, got {other:?}"),
    }
    send_message(
        &test_end,
        &Message::Connected {
            protocol: PROTOCOL,
            node_id: "server".into(),
            times: (0, 0),
            auth: None,
        },
    )
    .await;
    // A server follows `connected` with its own counter.
    send_message(&test_end, &Message::Ping { synced: 0 }).await;

    match recv_message(&test_end).await {
        Message::Sync { added, entries } => {
            assert_eq!(added, 5);
            let kinds: Vec<&str> = entries.iter().map(|e| e.action.kind.as_str()).collect();
            assert_eq!(kinds, vec!["a4", "a5"]);
            assert!(entries.iter().all(|e| e.meta.added.is_none()));
        }
        other => panic!("expected sync, got {other:?}"),
    }
    match recv_message(&test_end).await {
        Message::Pong { synced } => assert_eq!(synced, 5),
        other => panic!("expected pong, got {other:?}"),
    }

    send_message(&test_end, &Message::Synced { added: 5 }).await;
    client.wait_for(NodeState::Synchronized).await;
    assert_eq!(
        log.store().get_last_synced("server").await.unwrap().sent,
        5
    );
    client.destroy().await;
}

#[tokio::test]
async fn a_fresh_client_is_not_synchronized_until_the_server_backlog_arrives() {
    let client_log = Arc::new(Log::test("client"));
    let server_log = Arc::new(Log::test("server"));
    // The server already holds actions from before this client existed.
    let first = server_log
        .add(Action::new("old/one"), NewMeta::default().reason("test"))
        .await
        .unwrap()
        .unwrap();
    let second = server_log
        .add(Action::new("old/two"), NewMeta::default().reason("test"))
        .await
        .unwrap()
        .unwrap();

    let (client, server) = node_pair(
        Arc::clone(&client_log),
        Arc::clone(&server_log),
        NodeOptions::new(),
        NodeOptions::new(),
    );
    let mut client_events = client.subscribe();
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_ne!(client.state(), NodeState::Synchronized);

    // The backlog must land before the client reports synchronized.
    let mut applied = Vec::new();
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), client_events.recv())
            .await
            .expect("client never became synchronized")
            .expect("event stream closed");
        match event {
            NodeEvent::Add(entry) => applied.push(entry.meta.id.clone()),
            NodeEvent::State(NodeState::Synchronized) => break,
            _ => {}
        }
    }
    assert_eq!(applied, vec![first.id.clone(), second.id.clone()]);
    assert!(client_log.by_id(&first.id).await.unwrap().is_some());
    assert!(client_log.by_id(&second.id).await.unwrap().is_some());
    assert_eq!(client.state(), NodeState::Synchronized);

    client.destroy().await;
    server.destroy().await;
}

#[tokio::test]
async fn round_trip_preserves_actions_and_meta() {
    let client_log = Arc::new(Log::test("client"));
    let server_log = Arc::new(Log::test("server"));
    let (client, server) = node_pair(
        Arc::clone(&client_log),
        Arc::clone(&server_log),
        NodeOptions::new(),
        NodeOptions::new(),
    );
    let mut server_events = server.subscribe();
    let mut client_events = client.subscribe();
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    client.wait_for(NodeState::Synchronized).await;

    // Client to server.
    let sent = client_log
        .add(
            Action::new("user/rename").with("name", "grace"),
            NewMeta::default().reason("test"),
        )
        .await
        .unwrap()
        .unwrap();
    let event = wait_event(&mut server_events, |event| {
        matches!(event, NodeEvent::Add(_))
    })
    .await;
    let NodeEvent::Add(applied) = event else {
        unreachable!()
    };
    assert_eq!(applied.action, Action::new("user/rename").with("name", "grace"));
    assert_eq!(applied.meta.id, sent.id);
    assert_eq!(applied.meta.time, sent.time);
    assert_eq!(applied.meta.reasons, reasons(&["test"]));
    assert_eq!(applied.meta.subprotocol.as_deref(), Some("0.0.0"));
    // The receiving store assigns its own counter.
    assert_eq!(applied.meta.added, Some(1));
    assert!(server_log.by_id(&sent.id).await.unwrap().is_some());

    // Server to client.
    let back = server_log
        .add(Action::new("pong"), NewMeta::default().reason("test"))
        .await
        .unwrap()
        .unwrap();
    wait_event(&mut client_events, |event| {
        matches!(event, NodeEvent::Add(entry) if entry.meta.id == back.id)
    })
    .await;
    assert!(client_log.by_id(&back.id).await.unwrap().is_some());

    client.destroy().await;
    server.destroy().await;
}

#[tokio::test]
async fn duplicate_batches_change_nothing_the_second_time() {
    let log = Arc::new(Log::test("server"));
    let adds = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&adds);
    let _hook = log.on_add(move |_, _| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    let (server_end, test_end) = MemoryConnection::pair();
    let server = ServerNode::new(Arc::clone(&log), server_end, NodeOptions::new());
    test_end.connect().await.unwrap();
    server.connect().await.unwrap();

    send_message(
        &test_end,
        &Message::Connect {
            protocol: PROTOCOL,
            node_id: "client".into(),
            synced: 2,
            auth: None,
        },
    )
    .await;
    match recv_message(&test_end).await {
        Message::Connected { .. } => {}
        other => panic!("expected connected, got {other:?}"),
    }
    match recv_message(&test_end).await {
        Message::Ping { synced } => assert_eq!(synced, 0),
        other => panic!("expected ping, got {other:?}"),
    }

    let batch = Message::Sync {
        added: 2,
        entries: vec![
            wire_entry("1 client 0", 1, "one"),
            wire_entry("2 client 0", 2, "two"),
        ],
    };

    send_message(&test_end, &batch).await;
    match recv_message(&test_end).await {
        Message::Synced { added } => assert_eq!(added, 2),
        other => panic!("expected synced, got {other:?}"),
    }
    // The applied entries are ours, so the server answers with an entry-less
    // batch that only moves the bookmark forward.
    match recv_message(&test_end).await {
        Message::Sync { added, entries } => {
            assert_eq!(added, 2);
            assert!(entries.is_empty());
        }
        other => panic!("expected empty sync, got {other:?}"),
    }
    send_message(&test_end, &Message::Synced { added: 2 }).await;

    send_message(&test_end, &batch).await;
    match recv_message(&test_end).await {
        Message::Synced { added } => assert_eq!(added, 2),
        other => panic!("expected synced, got {other:?}"),
    }
    server.wait_for(NodeState::Synchronized).await;

    // Two inserts total, no re-application on the duplicate delivery.
    assert_eq!(log.store().get_last_added().await.unwrap(), 2);
    assert_eq!(adds.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(
        log.store().get_last_synced("client").await.unwrap().received,
        2
    );
    server.destroy().await;
}

// ===========================================
// Filters and maps
// ===========================================

#[tokio::test]
async fn out_filter_keeps_secrets_local_without_stalling_the_stream() {
    let client_log = Arc::new(Log::test("client"));
    let server_log = Arc::new(Log::test("server"));
    let mut client_options = NodeOptions::new();
    client_options.out_filter = Some(Arc::new(|action: &Action, _: &Meta| {
        action.kind != "secret"
    }));
    let (client, server) = node_pair(
        Arc::clone(&client_log),
        Arc::clone(&server_log),
        client_options,
        NodeOptions::new(),
    );
    let mut server_events = server.subscribe();
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    client.wait_for(NodeState::Synchronized).await;

    client_log
        .add(Action::new("secret"), NewMeta::default().reason("test"))
        .await
        .unwrap();
    let public = client_log
        .add(Action::new("public"), NewMeta::default().reason("test"))
        .await
        .unwrap()
        .unwrap();

    wait_event(&mut server_events, |event| {
        matches!(event, NodeEvent::Add(entry) if entry.meta.id == public.id)
    })
    .await;
    assert_eq!(server_log.store().get_last_added().await.unwrap(), 1);

    client.destroy().await;
    server.destroy().await;
}

#[tokio::test]
async fn in_map_rewrites_entries_before_they_reach_the_log() {
    let client_log = Arc::new(Log::test("client"));
    let server_log = Arc::new(Log::test("server"));
    let mut server_options = NodeOptions::new();
    server_options.in_map = Some(Arc::new(|action: Action, meta: Meta| {
        (action.with("via", json!("sync")), meta)
    }));
    let (client, server) = node_pair(
        Arc::clone(&client_log),
        Arc::clone(&server_log),
        NodeOptions::new(),
        server_options,
    );
    let mut server_events = server.subscribe();
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    client.wait_for(NodeState::Synchronized).await;

    client_log
        .add(Action::new("tick"), NewMeta::default().reason("test"))
        .await
        .unwrap();

    let event = wait_event(&mut server_events, |event| {
        matches!(event, NodeEvent::Add(_))
    })
    .await;
    let NodeEvent::Add(entry) = event else {
        unreachable!()
    };
    assert_eq!(entry.action.fields["via"], "sync");

    client.destroy().await;
    server.destroy().await;
}

// ===========================================
// Shared stores across sessions
// ===========================================

#[tokio::test]
async fn a_second_session_resumes_from_the_bookmark() {
    let store = Arc::new(MemoryStore::new());
    let client_log = Arc::new(
        Log::new("client", store.clone(), Arc::new(TestTime::new())).unwrap(),
    );
    let server_log = Arc::new(Log::test("server"));

    // First session syncs one action.
    let (client, server) = node_pair(
        Arc::clone(&client_log),
        Arc::clone(&server_log),
        NodeOptions::new(),
        NodeOptions::new(),
    );
    let mut server_events = server.subscribe();
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    client_log
        .add(Action::new("first"), NewMeta::default().reason("test"))
        .await
        .unwrap();
    wait_event(&mut server_events, |event| {
        matches!(event, NodeEvent::Add(_))
    })
    .await;
    client.destroy().await;
    server.destroy().await;

    // Second session over fresh transports only carries the new action.
    let (client, server) = node_pair(
        Arc::clone(&client_log),
        Arc::clone(&server_log),
        NodeOptions::new(),
        NodeOptions::new(),
    );
    let mut server_events = server.subscribe();
    server.connect().await.unwrap();
    client.connect().await.unwrap();
    let second = client_log
        .add(Action::new("second"), NewMeta::default().reason("test"))
        .await
        .unwrap()
        .unwrap();
    wait_event(&mut server_events, |event| {
        matches!(event, NodeEvent::Add(entry) if entry.meta.id == second.id)
    })
    .await;

    assert_eq!(server_log.store().get_last_added().await.unwrap(), 2);
    client.destroy().await;
    server.destroy().await;
}
