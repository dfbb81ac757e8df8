//! Cross-instance delivery scenarios.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use relay_server::shared::error::AppError;

use crate::common::{
    delivered_ids, expect_message, InMemoryBus, InMemoryConversations, InMemoryMessageStore,
    TestInstance,
};

const ALICE: i64 = 10;
const BOB: i64 = 20;
const CONVERSATION: i64 = 1;

fn shared_world() -> (
    Arc<InMemoryMessageStore>,
    Arc<InMemoryConversations>,
    Arc<InMemoryBus>,
) {
    (
        Arc::new(InMemoryMessageStore::default()),
        InMemoryConversations::with_conversation(CONVERSATION, vec![ALICE, BOB]),
        Arc::new(InMemoryBus::default()),
    )
}

#[tokio::test]
async fn message_reaches_recipient_on_another_instance() {
    let (store, conversations, bus) = shared_world();
    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());
    let instance_b = TestInstance::launch(store, conversations, bus);

    let (bob, mut bob_rx) = instance_b.connect(BOB);
    instance_b.subscribe(&bob, CONVERSATION, 0).await.unwrap();

    let message = instance_a
        .ingest
        .submit(CONVERSATION, ALICE, "hi")
        .await
        .unwrap();
    assert_eq!(message.id, 1);

    let frame = expect_message(&mut bob_rx).await;
    assert_eq!(frame.id, 1);
    assert_eq!(frame.conversation_id, CONVERSATION);
    assert_eq!(frame.sender_id, ALICE);
    assert_eq!(frame.body, "hi");
}

#[tokio::test]
async fn sender_echo_arrives_exactly_once() {
    let (store, conversations, bus) = shared_world();
    let instance = TestInstance::launch(store, conversations, bus);

    // Alice is connected to the instance that ingests her own message, so
    // she is reachable by both the local short-circuit and the bus echo
    let (alice, mut alice_rx) = instance.connect(ALICE);
    instance.subscribe(&alice, CONVERSATION, 0).await.unwrap();

    instance
        .ingest
        .submit(CONVERSATION, ALICE, "hello")
        .await
        .unwrap();

    let ids = delivered_ids(&mut alice_rx, Duration::from_millis(200)).await;
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn no_connection_sees_a_message_id_twice() {
    let (store, conversations, bus) = shared_world();
    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());
    let instance_b = TestInstance::launch(store, conversations, bus);

    let (alice, mut alice_rx) = instance_a.connect(ALICE);
    instance_a.subscribe(&alice, CONVERSATION, 0).await.unwrap();
    let (bob, mut bob_rx) = instance_b.connect(BOB);
    instance_b.subscribe(&bob, CONVERSATION, 0).await.unwrap();

    for body in ["one", "two", "three"] {
        instance_a
            .ingest
            .submit(CONVERSATION, ALICE, body)
            .await
            .unwrap();
    }

    let alice_ids = delivered_ids(&mut alice_rx, Duration::from_millis(200)).await;
    let bob_ids = delivered_ids(&mut bob_rx, Duration::from_millis(200)).await;
    assert_eq!(alice_ids, vec![1, 2, 3]);
    assert_eq!(bob_ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn persisted_ids_are_gapless_and_increasing() {
    let (store, conversations, bus) = shared_world();
    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());
    let instance_b = TestInstance::launch(store.clone(), conversations, bus);

    // Writes interleaved across instances still share one sequence
    for i in 0..5 {
        let instance = if i % 2 == 0 { &instance_a } else { &instance_b };
        instance
            .ingest
            .submit(CONVERSATION, ALICE, "m")
            .await
            .unwrap();
    }

    assert_eq!(store.message_ids(CONVERSATION), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn unauthorized_sender_persists_nothing_and_fans_out_nothing() {
    let (store, conversations, bus) = shared_world();
    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());
    let instance_b = TestInstance::launch(store.clone(), conversations, bus);

    let (bob, mut bob_rx) = instance_b.connect(BOB);
    instance_b.subscribe(&bob, CONVERSATION, 0).await.unwrap();

    let intruder = 99;
    let err = instance_a
        .ingest
        .submit(CONVERSATION, intruder, "hi")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Unauthorized(_)));
    assert!(store.is_empty());
    assert!(delivered_ids(&mut bob_rx, Duration::from_millis(100))
        .await
        .is_empty());
}

#[tokio::test]
async fn subscribe_to_foreign_conversation_is_rejected() {
    let (store, conversations, bus) = shared_world();
    let instance = TestInstance::launch(store, conversations, bus);

    let (intruder, _rx) = instance.connect(99);
    let err = instance
        .subscribe(&intruder, CONVERSATION, 0)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Unauthorized(_)));
    // The failed subscription leaves no routing state behind
    assert!(instance.registry.connections_for(CONVERSATION).is_empty());
}

#[tokio::test]
async fn disconnected_recipient_does_not_block_others() {
    let (store, conversations, bus) = shared_world();
    let instance = TestInstance::launch(store, conversations, bus);

    let (alice, alice_rx) = instance.connect(ALICE);
    instance.subscribe(&alice, CONVERSATION, 0).await.unwrap();
    let (bob, mut bob_rx) = instance.connect(BOB);
    instance.subscribe(&bob, CONVERSATION, 0).await.unwrap();

    // Alice's receiver is gone (client vanished without unregistering yet)
    drop(alice_rx);

    instance
        .ingest
        .submit(CONVERSATION, BOB, "still flowing")
        .await
        .unwrap();

    let frame = expect_message(&mut bob_rx).await;
    assert_eq!(frame.body, "still flowing");
}
