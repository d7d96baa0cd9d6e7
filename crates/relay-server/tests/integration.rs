//! Two relay processes sharing one in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::Value;
use tokio::time::timeout;

use relay_core::{OutgoingMessage, RelayError, UserId};
use relay_server::{
    ChatNode, ClientConnection, MemoryBackend, MemoryMessageStore, OutboundFrames, PresenceMode,
    ReceiverDelivery, SharedBackend,
};
use relay_settings::RelaySettings;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Cluster {
    backend: Arc<MemoryBackend>,
    store: Arc<MemoryMessageStore>,
    a: ChatNode,
    b: ChatNode,
}

/// Boot nodes A and B over one backend and one message store.
async fn cluster() -> Cluster {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(
        MemoryMessageStore::new()
            .with_user("u1", "Alice")
            .with_user("u2", "Bob"),
    );
    let a = ChatNode::with_backend(
        RelaySettings::default(),
        store.clone(),
        Some(SharedBackend::new(backend.clone())),
    )
    .await;
    let b = ChatNode::with_backend(
        RelaySettings::default(),
        store.clone(),
        Some(SharedBackend::new(backend.clone())),
    )
    .await;
    Cluster {
        backend,
        store,
        a,
        b,
    }
}

async fn wait_online(backend: &MemoryBackend, user: &str) {
    timeout(TIMEOUT, async {
        while !backend.members("online-users").contains(user) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("user never marked online");
}

async fn next_frame(rx: &mut OutboundFrames) -> anyhow::Result<Value> {
    let frame = timeout(TIMEOUT, rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
    Ok(serde_json::from_str(&frame)?)
}

#[tokio::test]
async fn cross_node_delivery() -> anyhow::Result<()> {
    let c = cluster().await;
    let mut u1 = c.a.connect("u1");
    let mut u2 = c.b.connect("u2");
    wait_online(&c.backend, "u2").await;

    let report = c
        .a
        .send_message(&OutgoingMessage::new("c1", "u1", "u2", "hi"))
        .await?;
    assert_eq!(report.receiver, ReceiverDelivery::Published);
    assert_eq!(report.message.id.as_str(), "m1");
    assert!(report.echoed);

    let delivered = next_frame(&mut u2).await?;
    assert_eq!(delivered["event"], "new_message");
    assert_eq!(delivered["newMessage"]["id"], "m1");
    assert_eq!(delivered["newMessage"]["chatId"], "c1");
    assert_eq!(delivered["newMessage"]["text"], "hi");
    assert_eq!(delivered["newMessage"]["sender"]["name"], "Alice");

    let echo = next_frame(&mut u1).await?;
    assert_eq!(echo, delivered);

    assert_eq!(c.backend.publish_count(), 1);
    // exactly one notification reached u2
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(u2.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn same_node_delivery_skips_the_bus() -> anyhow::Result<()> {
    let c = cluster().await;
    let _u1 = c.a.connect("u1");
    let mut u2 = c.a.connect("u2");

    let report = c
        .a
        .send_message(&OutgoingMessage::new("c1", "u1", "u2", "hi"))
        .await?;

    assert_eq!(report.receiver, ReceiverDelivery::Local);
    assert_eq!(next_frame(&mut u2).await?["newMessage"]["text"], "hi");
    assert_eq!(c.backend.publish_count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(u2.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn persistence_failure_sends_nothing() {
    let c = cluster().await;
    let mut u1 = c.a.connect("u1");
    let mut u2 = c.b.connect("u2");
    wait_online(&c.backend, "u2").await;
    c.store.set_failing(true);

    let err = c
        .a
        .send_message(&OutgoingMessage::new("c1", "u1", "u2", "hi"))
        .await
        .unwrap_err();

    assert_matches!(err, RelayError::Store(_));
    assert_eq!(err.code(), "STORE_ERROR");
    assert_eq!(c.backend.publish_count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(u1.try_recv().is_err());
    assert!(u2.try_recv().is_err());
}

#[tokio::test]
async fn local_user_stays_online_when_backend_is_down() {
    let c = cluster().await;
    c.backend.set_reachable(false);
    let _u1 = c.a.connect("u1");

    assert!(c.a.is_online(&UserId::from("u1")).await);
    // B cannot see u1 without the shared set
    assert!(!c.b.is_online(&UserId::from("u1")).await);
}

#[tokio::test]
async fn removed_user_is_offline_everywhere() {
    let c = cluster().await;
    let _u1 = c.a.connect("u1");
    wait_online(&c.backend, "u1").await;
    assert!(c.b.is_online(&UserId::from("u1")).await);

    assert!(c.a.detach(&UserId::from("u1")).await);

    assert!(!c.a.is_online(&UserId::from("u1")).await);
    assert!(!c.b.is_online(&UserId::from("u1")).await);
}

#[tokio::test]
async fn offline_receiver_is_not_published() -> anyhow::Result<()> {
    let c = cluster().await;
    let _u1 = c.a.connect("u1");

    let report = c
        .a
        .send_message(&OutgoingMessage::new("c1", "u1", "u2", "hi"))
        .await?;

    assert_eq!(report.receiver, ReceiverDelivery::Offline);
    assert_eq!(c.backend.publish_count(), 0);
    assert_eq!(c.store.messages().len(), 1);
    Ok(())
}

#[tokio::test]
async fn reregistered_user_receives_on_newest_connection() -> anyhow::Result<()> {
    let c = cluster().await;
    let (first, mut first_rx) = ClientConnection::channel(8);
    let (second, mut second_rx) = ClientConnection::channel(8);
    assert!(c.b.attach("u2".into(), first.clone()).is_none());
    let superseded = c.b.attach("u2".into(), second).expect("first handle returned");
    assert_eq!(superseded.id, first.id);
    wait_online(&c.backend, "u2").await;

    let _ = c
        .a
        .send_message(&OutgoingMessage::new("c1", "u1", "u2", "hi"))
        .await?;

    assert_eq!(next_frame(&mut second_rx).await?["newMessage"]["id"], "m1");
    assert!(first_rx.try_recv().is_err());
    assert!(!first.is_closed());
    Ok(())
}

#[tokio::test]
async fn disconnect_on_one_node_is_seen_by_the_other() {
    let c = cluster().await;
    let u2 = c.b.connect("u2");
    wait_online(&c.backend, "u2").await;
    assert!(c.a.is_online(&UserId::from("u2")).await);

    drop(u2);
    timeout(TIMEOUT, async {
        while c.a.is_online(&UserId::from("u2")).await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("u2 never went offline");
}

#[tokio::test]
async fn local_only_nodes_are_isolated() -> anyhow::Result<()> {
    let store = Arc::new(MemoryMessageStore::new());
    let a = ChatNode::with_backend(RelaySettings::default(), store.clone(), None).await;
    let b = ChatNode::with_backend(RelaySettings::default(), store, None).await;
    assert_eq!(a.mode(), PresenceMode::LocalOnly);

    let _u2 = b.connect("u2");
    let report = a
        .send_message(&OutgoingMessage::new("c1", "u1", "u2", "hi"))
        .await?;

    assert_eq!(report.receiver, ReceiverDelivery::Offline);
    Ok(())
}

#[tokio::test]
async fn nodes_shut_down_cleanly() {
    let c = cluster().await;
    let _u1 = c.a.connect("u1");
    timeout(TIMEOUT, c.a.shutdown(Some(Duration::from_secs(1))))
        .await
        .expect("node A shutdown hung");
    timeout(TIMEOUT, c.b.shutdown(Some(Duration::from_secs(1))))
        .await
        .expect("node B shutdown hung");
}
