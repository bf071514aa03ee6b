//! Channel scenarios over the in-process transport.
//!
//! Exercise the full command pipeline (session → connection → registry →
//! connection → session) without sockets.

use tandem_collab::{
    dial, dial_with_status, Command, Connection, ConnectionState, ConnectionStatus, Endpoint,
    MemoryTransport, Session, SessionEvent, TextRange, Transport, TransportError, TransportEvent,
};
use tandem_core::Document;
use tokio::time::{timeout, Duration};

const PORT: u16 = 4242;

async fn connect(transport: &MemoryTransport, doc_id: &str) -> Connection {
    transport
        .connect(&Endpoint::new("localhost", PORT), doc_id)
        .await
        .unwrap()
}

async fn next_message(conn: &mut Connection) -> Vec<u8> {
    match timeout(Duration::from_secs(2), conn.recv()).await {
        Ok(Some(TransportEvent::Message(bytes))) => bytes,
        other => panic!("expected a message, got {other:?}"),
    }
}

async fn assert_silent(conn: &mut Connection) {
    assert!(
        timeout(Duration::from_millis(50), conn.recv()).await.is_err(),
        "connection {} received an unexpected event",
        conn.id()
    );
}

#[tokio::test]
async fn test_channel_fan_out_without_echo() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let mut s = connect(&transport, "2").await;
    let mut c1 = connect(&transport, "2").await;
    let mut c2 = connect(&transport, "2").await;

    s.send(b"from s".to_vec()).unwrap();
    assert_eq!(next_message(&mut c1).await, b"from s");
    assert_eq!(next_message(&mut c2).await, b"from s");
    assert_silent(&mut s).await;

    c1.send(b"from c1".to_vec()).unwrap();
    assert_eq!(next_message(&mut s).await, b"from c1");
    assert_eq!(next_message(&mut c2).await, b"from c1");
    assert_silent(&mut c1).await;

    c2.send(b"from c2".to_vec()).unwrap();
    assert_eq!(next_message(&mut s).await, b"from c2");
    assert_eq!(next_message(&mut c1).await, b"from c2");
    assert_silent(&mut c2).await;
}

#[tokio::test]
async fn test_per_sender_order() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let sender = connect(&transport, "2").await;
    let mut receiver = connect(&transport, "2").await;

    for i in 0..100u8 {
        sender.send(vec![i]).unwrap();
    }
    for i in 0..100u8 {
        assert_eq!(next_message(&mut receiver).await, vec![i]);
    }
    assert_silent(&mut receiver).await;
}

#[tokio::test]
async fn test_documents_are_isolated() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let a = connect(&transport, "a").await;
    let mut a2 = connect(&transport, "a").await;
    let mut b = connect(&transport, "b").await;

    a.send(vec![1]).unwrap();
    assert_eq!(next_message(&mut a2).await, vec![1]);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_leaves_others_connected() {
    let transport = MemoryTransport::new();
    let registry = transport.serve(PORT);
    let mut a = connect(&transport, "2").await;
    let mut b = connect(&transport, "2").await;

    a.close();
    a.close();
    assert!(matches!(a.recv().await, Some(TransportEvent::Disconnected(None))));
    assert_eq!(a.state(), ConnectionState::Disconnected);
    assert!(matches!(a.send(vec![1]), Err(TransportError::Closed)));
    assert_eq!(registry.members("2").await, vec![b.id()]);
    assert_eq!(registry.disconnect(a.id()).await, 0);

    assert_eq!(b.state(), ConnectionState::Connected);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_resolve_timeout_closes_only_that_connection() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let other = connect(&transport, "2").await;

    let status = ConnectionStatus::new();
    let result = dial_with_status(
        &transport,
        "nobody @ nowhere",
        "2",
        Duration::from_millis(30),
        status.clone(),
    )
    .await;
    assert!(matches!(result, Err(TransportError::ResolveTimeout(_))));
    assert_eq!(status.get(), ConnectionState::Disconnected);
    assert!(!status.advance(ConnectionState::Connected));
    assert_eq!(other.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_state_machine_through_dial() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let _ad = transport.advertise("notes @ studio", PORT).unwrap();

    let status = ConnectionStatus::new();
    let mut states = status.subscribe();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

    let conn = dial_with_status(
        &transport,
        "notes @ studio",
        "notes",
        Duration::from_secs(1),
        status,
    )
    .await
    .unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    conn.close();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_withdrawn_service_cannot_be_dialed() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let ad = transport.advertise("notes @ studio", PORT).unwrap();
    drop(ad);

    let result = dial(&transport, "notes @ studio", "notes", Duration::ZERO).await;
    assert!(matches!(result, Err(TransportError::ServiceNotFound(_))));
}

#[tokio::test]
async fn test_sessions_converge() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);

    let mut publisher = Session::publish("notes", Document::new("foo\nbar\nbaz\n"), "alice");
    let mut pub_conn = connect(&transport, "notes").await;

    let mut subscriber = Session::subscribe("notes", "bob");
    let mut sub_conn = connect(&transport, "notes").await;
    subscriber.start(&sub_conn.sender()).unwrap();

    // Publisher sees the name, then answers GetDoc.
    let event = publisher.step(&mut pub_conn).await.unwrap();
    assert_eq!(event, Some(SessionEvent::PeerNamed("bob".into())));
    assert_eq!(publisher.step(&mut pub_conn).await.unwrap(), None);

    let event = subscriber.step(&mut sub_conn).await.unwrap();
    assert!(matches!(event, Some(SessionEvent::Replaced(_))));
    assert_eq!(subscriber.document().text(), "foo\nbar\nbaz\n");

    // Subscriber edits, publisher applies.
    let update = subscriber.local_edit("foo\nbar\nbaz2\n").unwrap();
    sub_conn.send_command(&update).unwrap();
    let event = publisher.step(&mut pub_conn).await.unwrap();
    assert!(matches!(event, Some(SessionEvent::Patched { .. })));
    assert_eq!(publisher.document().text(), "foo\nbar\nbaz2\n");

    // Publisher edits and moves its caret, subscriber follows.
    let update = publisher.local_edit("foo1\nbar\nbaz2\n").unwrap();
    pub_conn.send_command(&update).unwrap();
    let caret = publisher.local_cursor(TextRange::caret(4)).unwrap();
    pub_conn.send_command(&caret).unwrap();

    subscriber.step(&mut sub_conn).await.unwrap();
    assert_eq!(subscriber.document(), publisher.document());
    let event = subscriber.step(&mut sub_conn).await.unwrap();
    match event {
        Some(SessionEvent::CursorMoved(selection)) => {
            assert_eq!(selection.id, publisher.id());
            assert_eq!(selection.range, TextRange::caret(4));
        }
        other => panic!("expected a cursor move, got {other:?}"),
    }
}

#[tokio::test]
async fn test_diverged_subscriber_resyncs() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);

    let mut publisher = Session::publish("notes", Document::new("The quick brown fox"), "alice");
    let mut pub_conn = connect(&transport, "notes").await;
    let mut subscriber = Session::subscribe("notes", "bob");
    let mut sub_conn = connect(&transport, "notes").await;

    // The subscriber never got a snapshot, so the update cannot apply.
    let update = publisher.local_edit("The quick brown cat").unwrap();
    pub_conn.send_command(&update).unwrap();
    let event = subscriber.step(&mut sub_conn).await.unwrap();
    assert_eq!(event, Some(SessionEvent::ResyncRequested));

    // Its GetDoc reaches the publisher, whose snapshot brings it up to date.
    assert_eq!(publisher.step(&mut pub_conn).await.unwrap(), None);
    let event = subscriber.step(&mut sub_conn).await.unwrap();
    assert!(matches!(event, Some(SessionEvent::Replaced(_))));
    assert_eq!(subscriber.document().text(), "The quick brown cat");
}

#[tokio::test]
async fn test_listen_callbacks() {
    let transport = MemoryTransport::new();
    transport.serve(PORT);
    let sender = connect(&transport, "2").await;
    let listener = connect(&transport, "2").await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let done = tx.clone();
    let handle = listener.listen(
        move |bytes| {
            let _ = tx.send(Some(bytes));
        },
        move |_reason| {
            let _ = done.send(None);
        },
    );

    sender.send_command(&Command::GetVersion).unwrap();
    let bytes = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap().unwrap();
    assert_eq!(Command::decode(&bytes), Command::GetVersion);

    handle.close();
    assert_eq!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap(), Some(None));
    handle.finished().await;
}
