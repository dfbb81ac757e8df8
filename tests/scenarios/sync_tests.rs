//! Reconnect and reconciliation scenarios.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::common::{
    delivered_ids, expect_message, InMemoryBus, InMemoryConversations, InMemoryMessageStore,
    TestInstance,
};

const ALICE: i64 = 10;
const BOB: i64 = 20;
const CONVERSATION: i64 = 1;

#[tokio::test]
async fn reconnect_receives_missed_messages_then_resumes_live() {
    let store = Arc::new(InMemoryMessageStore::default());
    let conversations = InMemoryConversations::with_conversation(CONVERSATION, vec![ALICE, BOB]);
    let bus = Arc::new(InMemoryBus::default());

    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());
    let instance_b = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());

    // Bob was online for messages 1-5, then dropped
    for i in 1..=5 {
        instance_a
            .ingest
            .submit(CONVERSATION, ALICE, &format!("m{}", i))
            .await
            .unwrap();
    }

    // Three more arrive while Bob is offline
    for i in 6..=8 {
        instance_a
            .ingest
            .submit(CONVERSATION, ALICE, &format!("m{}", i))
            .await
            .unwrap();
    }

    // Bob reconnects, possibly to a different instance, declaring ack=5
    let (bob, mut bob_rx) = instance_b.connect(BOB);
    let backlog = instance_b.subscribe(&bob, CONVERSATION, 5).await.unwrap();
    assert_eq!(backlog, 3);

    let caught_up = delivered_ids(&mut bob_rx, Duration::from_millis(200)).await;
    assert_eq!(caught_up, vec![6, 7, 8]);

    // Live delivery resumes after catch-up
    instance_a
        .ingest
        .submit(CONVERSATION, ALICE, "m9")
        .await
        .unwrap();
    let frame = expect_message(&mut bob_rx).await;
    assert_eq!(frame.id, 9);
}

#[tokio::test]
async fn fresh_subscription_replays_full_history() {
    let store = Arc::new(InMemoryMessageStore::default());
    let conversations = InMemoryConversations::with_conversation(CONVERSATION, vec![ALICE, BOB]);
    let bus = Arc::new(InMemoryBus::default());

    let instance = TestInstance::launch(store, conversations, bus);

    for i in 1..=3 {
        instance
            .ingest
            .submit(CONVERSATION, ALICE, &format!("m{}", i))
            .await
            .unwrap();
    }

    let (bob, mut bob_rx) = instance.connect(BOB);
    instance.subscribe(&bob, CONVERSATION, 0).await.unwrap();

    let ids = delivered_ids(&mut bob_rx, Duration::from_millis(200)).await;
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn bus_outage_during_send_is_healed_by_resubscribe() {
    let store = Arc::new(InMemoryMessageStore::default());
    let conversations = InMemoryConversations::with_conversation(CONVERSATION, vec![ALICE, BOB]);

    // Instances on separate buses simulate a fanout partition: messages
    // persist but never reach the other instance live
    let bus_a = Arc::new(InMemoryBus::default());
    let bus_b = Arc::new(InMemoryBus::default());
    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus_a);
    let instance_b = TestInstance::launch(store.clone(), conversations.clone(), bus_b);

    let (bob, mut bob_rx) = instance_b.connect(BOB);
    instance_b.subscribe(&bob, CONVERSATION, 0).await.unwrap();

    instance_a
        .ingest
        .submit(CONVERSATION, ALICE, "lost in transit")
        .await
        .unwrap();

    // Nothing arrives live across the partition
    assert!(delivered_ids(&mut bob_rx, Duration::from_millis(100))
        .await
        .is_empty());

    // A resubscribe at the same acked position recovers from the store
    instance_b.subscribe(&bob, CONVERSATION, 0).await.unwrap();
    let ids = delivered_ids(&mut bob_rx, Duration::from_millis(200)).await;
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn same_user_reconnecting_across_instances_never_loses_messages() {
    let store = Arc::new(InMemoryMessageStore::default());
    let conversations = InMemoryConversations::with_conversation(CONVERSATION, vec![ALICE, BOB]);
    let bus = Arc::new(InMemoryBus::default());

    let instance_a = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());
    let instance_b = TestInstance::launch(store.clone(), conversations.clone(), bus.clone());

    // First session on instance A sees message 1
    let (bob_a, mut bob_a_rx) = instance_a.connect(BOB);
    instance_a.subscribe(&bob_a, CONVERSATION, 0).await.unwrap();
    instance_a
        .ingest
        .submit(CONVERSATION, ALICE, "m1")
        .await
        .unwrap();
    let first = delivered_ids(&mut bob_a_rx, Duration::from_millis(200)).await;
    assert_eq!(first, vec![1]);
    instance_a.registry.unregister(&bob_a);

    // Messages 2 and 3 land while Bob has no connection anywhere
    for body in ["m2", "m3"] {
        instance_a
            .ingest
            .submit(CONVERSATION, ALICE, body)
            .await
            .unwrap();
    }

    // New session on instance B declares the position from the old session;
    // reconciliation is keyed by (user, conversation, ack), not connection
    let (bob_b, mut bob_b_rx) = instance_b.connect(BOB);
    instance_b.subscribe(&bob_b, CONVERSATION, 1).await.unwrap();
    let rest = delivered_ids(&mut bob_b_rx, Duration::from_millis(200)).await;
    assert_eq!(rest, vec![2, 3]);
}
