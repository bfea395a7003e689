// Integration tests for the conversation store: pagination merge, optimistic
// sends, push-event application and the ordering invariant.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{msg, setup_logging, test_context, MockApi, RecordingSink};
use undercurrent::store::conversation::SEND_ACK_TIMEOUT;
use undercurrent::{
    ConversationStore, DeliveryStatus, InboundEvent, OutboundAction, SessionSignal, SyncError,
};

const SELF_ID: i64 = 1;
const COUNTERPART: i64 = 2;

fn make_store(api: Arc<MockApi>) -> (ConversationStore, Arc<RecordingSink>) {
    setup_logging();
    let sink = Arc::new(RecordingSink::new());
    let store = ConversationStore::new(test_context(), api, sink.clone());
    (store, sink)
}

fn receive(message: undercurrent::Message) -> SessionSignal {
    SessionSignal::Event(InboundEvent::ReceiveMessage { message })
}

#[tokio::test]
async fn load_page_merges_sorted_and_deduplicated() {
    let api = Arc::new(MockApi::with_state(|state| {
        state.messages.insert(
            COUNTERPART,
            vec![
                msg(3, COUNTERPART, SELF_ID, "three", 300),
                msg(1, COUNTERPART, SELF_ID, "one", 100),
                msg(2, SELF_ID, COUNTERPART, "two", 200),
            ],
        );
    }));
    let (store, _sink) = make_store(api);

    assert!(store.load_page(COUNTERPART, 1).await.unwrap());

    let timeline = store.timeline(COUNTERPART);
    let ids: Vec<Option<i64>> = timeline.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);

    // A pushed duplicate of an already-loaded message changes nothing.
    store.handle_signal(&receive(msg(2, SELF_ID, COUNTERPART, "two", 200)));
    assert_eq!(store.timeline(COUNTERPART).len(), 3);
}

#[tokio::test]
async fn pagination_is_order_independent() {
    let seed = |state: &mut common::MockState| {
        let mut all = Vec::new();
        for i in 1..=45 {
            let (sender, receiver) = if i % 2 == 0 {
                (SELF_ID, COUNTERPART)
            } else {
                (COUNTERPART, SELF_ID)
            };
            all.push(msg(i, sender, receiver, &format!("m{}", i), 1_000 + i));
        }
        state.messages.insert(COUNTERPART, all);
    };

    let (forward, _) = make_store(Arc::new(MockApi::with_state(seed)));
    forward.load_page(COUNTERPART, 1).await.unwrap();
    forward.load_page(COUNTERPART, 2).await.unwrap();

    let (backward, _) = make_store(Arc::new(MockApi::with_state(seed)));
    backward.load_page(COUNTERPART, 2).await.unwrap();
    backward.load_page(COUNTERPART, 1).await.unwrap();

    let forward_ids: Vec<Option<i64>> =
        forward.timeline(COUNTERPART).iter().map(|e| e.id).collect();
    let backward_ids: Vec<Option<i64>> =
        backward.timeline(COUNTERPART).iter().map(|e| e.id).collect();

    assert_eq!(forward_ids, backward_ids);
    assert_eq!(forward_ids.len(), 40); // two pages of twenty, no overlap

    // Sorted ascending and free of duplicates.
    let mut sorted = forward_ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, forward_ids);

    let cursor = forward.cursor(COUNTERPART).unwrap();
    assert_eq!(cursor.page, 2);
    assert_eq!(cursor.total_pages, 3);
    assert!(forward.has_older(COUNTERPART));
}

#[tokio::test]
async fn duplicate_page_fetches_for_one_conversation_are_dropped() {
    let api = Arc::new(MockApi::with_state(|state| {
        state
            .messages
            .insert(COUNTERPART, vec![msg(1, COUNTERPART, SELF_ID, "hey", 100)]);
        state.fetch_delay = Some(Duration::from_millis(200));
    }));
    let (store, _sink) = make_store(api.clone());

    let racing = {
        let store = store.clone();
        tokio::spawn(async move { store.load_page(COUNTERPART, 1).await })
    };
    // Give the spawned fetch time to take the in-flight slot.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!store.load_page(COUNTERPART, 1).await.unwrap());
    assert!(racing.await.unwrap().unwrap());
    assert_eq!(api.calls_of("conversation_messages"), 1);

    // A different conversation is not blocked by the guard.
    let other = store.load_page(99, 1).await.unwrap();
    assert!(other);
}

#[tokio::test]
async fn optimistic_send_reconciles_with_echoed_message() {
    let (store, sink) = make_store(Arc::new(MockApi::new()));

    let local_ref = store.send_optimistic(COUNTERPART, "hi").unwrap();

    let timeline = store.timeline(COUNTERPART);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].content, "hi");
    assert_eq!(timeline[0].id, None);
    assert_eq!(timeline[0].local_ref, Some(local_ref));
    assert_eq!(timeline[0].delivery, DeliveryStatus::Sending);

    match &sink.recorded()[0] {
        OutboundAction::SendMessage {
            receiver_id,
            content,
            client_ref,
        } => {
            assert_eq!(*receiver_id, COUNTERPART);
            assert_eq!(content, "hi");
            assert_eq!(*client_ref, Some(local_ref));
        }
        other => panic!("unexpected action: {:?}", other),
    }

    // The server echoes the accepted send; no duplicate "hi" may remain.
    store.handle_signal(&receive(msg(101, SELF_ID, COUNTERPART, "hi", 500)));

    let timeline = store.timeline(COUNTERPART);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].id, Some(101));
    assert_eq!(timeline[0].delivery, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn empty_content_is_rejected_without_state_change() {
    let (store, sink) = make_store(Arc::new(MockApi::new()));

    let result = store.send_optimistic(COUNTERPART, "   ");
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert!(store.timeline(COUNTERPART).is_empty());
    assert!(sink.recorded().is_empty());
}

#[tokio::test]
async fn send_failure_marks_entry_failed() {
    let (store, sink) = make_store(Arc::new(MockApi::new()));
    sink.set_failing(true);

    let result = store.send_optimistic(COUNTERPART, "doomed");
    assert!(matches!(result, Err(SyncError::Delivery(_))));

    let timeline = store.timeline(COUNTERPART);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].delivery, DeliveryStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_send_expires_after_the_ack_window() {
    let (store, _sink) = make_store(Arc::new(MockApi::new()));

    store.send_optimistic(COUNTERPART, "lost").unwrap();
    assert_eq!(
        store.timeline(COUNTERPART)[0].delivery,
        DeliveryStatus::Sending
    );

    tokio::time::sleep(SEND_ACK_TIMEOUT + Duration::from_millis(100)).await;
    assert_eq!(
        store.timeline(COUNTERPART)[0].delivery,
        DeliveryStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn acknowledged_send_survives_the_ack_window() {
    let (store, _sink) = make_store(Arc::new(MockApi::new()));

    store.send_optimistic(COUNTERPART, "kept").unwrap();
    store.handle_signal(&receive(msg(55, SELF_ID, COUNTERPART, "kept", 500)));

    tokio::time::sleep(SEND_ACK_TIMEOUT + Duration::from_millis(100)).await;

    let timeline = store.timeline(COUNTERPART);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].delivery, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn update_and_delete_are_idempotent() {
    let (store, _sink) = make_store(Arc::new(MockApi::new()));

    store.handle_signal(&receive(msg(1, COUNTERPART, SELF_ID, "a", 100)));
    store.handle_signal(&receive(msg(2, COUNTERPART, SELF_ID, "b", 200)));
    store.handle_signal(&receive(msg(3, COUNTERPART, SELF_ID, "c", 300)));

    let mut edited = msg(2, COUNTERPART, SELF_ID, "b (edited)", 200);
    edited.is_read = true;
    let update = SessionSignal::Event(InboundEvent::MessageUpdated {
        message: edited.clone(),
    });
    store.handle_signal(&update);
    let once = store.timeline(COUNTERPART);
    store.handle_signal(&update);
    let twice = store.timeline(COUNTERPART);
    assert_eq!(once, twice);
    assert_eq!(once[1].content, "b (edited)");
    assert!(once[1].is_read);
    assert_eq!(once[1].id, Some(2)); // position preserved

    let delete = SessionSignal::Event(InboundEvent::MessageDeleted { message_id: 2 });
    store.handle_signal(&delete);
    let once = store.timeline(COUNTERPART);
    store.handle_signal(&delete);
    let twice = store.timeline(COUNTERPART);
    assert_eq!(once, twice);
    assert_eq!(once.iter().map(|e| e.id).collect::<Vec<_>>(), vec![Some(1), Some(3)]);

    // Updates and deletes for ids nobody has are no-ops.
    store.handle_signal(&SessionSignal::Event(InboundEvent::MessageUpdated {
        message: msg(999, COUNTERPART, SELF_ID, "ghost", 400),
    }));
    store.handle_signal(&SessionSignal::Event(InboundEvent::MessageDeleted {
        message_id: 999,
    }));
    assert_eq!(store.timeline(COUNTERPART).len(), 2);
}

#[tokio::test]
async fn events_route_to_the_right_counterpart() {
    let (store, _sink) = make_store(Arc::new(MockApi::new()));

    store.handle_signal(&receive(msg(1, COUNTERPART, SELF_ID, "for us", 100)));
    store.handle_signal(&receive(msg(2, 3, SELF_ID, "from someone else", 150)));

    assert_eq!(store.timeline(COUNTERPART).len(), 1);
    assert_eq!(store.timeline(3).len(), 1);
    assert_eq!(store.loaded_conversations(), vec![COUNTERPART, 3]);
}

#[tokio::test]
async fn mark_read_flips_local_entries_and_fires_the_receipt() {
    let (store, sink) = make_store(Arc::new(MockApi::new()));

    store.handle_signal(&receive(msg(1, COUNTERPART, SELF_ID, "unread", 100)));
    store.handle_signal(&receive(msg(2, SELF_ID, COUNTERPART, "ours", 200)));

    store.mark_read(COUNTERPART).unwrap();

    let timeline = store.timeline(COUNTERPART);
    assert!(timeline.iter().filter(|e| e.sender_id == COUNTERPART).all(|e| e.is_read));
    // Our own outgoing message is untouched; the counterpart read-flags it.
    assert!(!timeline.iter().find(|e| e.id == Some(2)).unwrap().is_read);

    assert!(sink
        .recorded()
        .contains(&OutboundAction::MarkMessagesRead {
            sender_id: COUNTERPART
        }));
}

#[tokio::test]
async fn edit_and_delete_apply_optimistically() {
    let (store, sink) = make_store(Arc::new(MockApi::new()));

    store.handle_signal(&receive(msg(7, SELF_ID, COUNTERPART, "tpyo", 100)));

    store.edit(7, "typo").unwrap();
    assert_eq!(store.timeline(COUNTERPART)[0].content, "typo");

    store.delete(7).unwrap();
    assert!(store.timeline(COUNTERPART).is_empty());

    let actions = sink.recorded();
    assert!(actions.contains(&OutboundAction::EditMessage {
        message_id: 7,
        content: "typo".to_string()
    }));
    assert!(actions.contains(&OutboundAction::DeleteMessage { message_id: 7 }));
}

#[tokio::test(start_paused = true)]
async fn reconnect_refreshes_loaded_conversations_from_rest() {
    let api = Arc::new(MockApi::with_state(|state| {
        state
            .messages
            .insert(COUNTERPART, vec![msg(1, COUNTERPART, SELF_ID, "old", 100)]);
    }));
    let (store, _sink) = make_store(api.clone());

    store.load_page(COUNTERPART, 1).await.unwrap();
    assert_eq!(store.timeline(COUNTERPART).len(), 1);

    // A message lands server-side while the channel is down; the event for
    // it was never delivered.
    api.state
        .lock()
        .unwrap()
        .messages
        .get_mut(&COUNTERPART)
        .unwrap()
        .push(msg(2, COUNTERPART, SELF_ID, "missed", 200));

    store.handle_signal(&SessionSignal::Connected { reconnect: true });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ids: Vec<Option<i64>> = store.timeline(COUNTERPART).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![Some(1), Some(2)]);
}

#[tokio::test]
async fn push_events_apply_while_a_page_fetch_is_in_flight() {
    let api = Arc::new(MockApi::with_state(|state| {
        state
            .messages
            .insert(COUNTERPART, vec![msg(1, COUNTERPART, SELF_ID, "paged", 100)]);
        state.fetch_delay = Some(Duration::from_millis(200));
    }));
    let (store, _sink) = make_store(api);

    let fetch = {
        let store = store.clone();
        tokio::spawn(async move { store.load_page(COUNTERPART, 1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The live event is applied immediately, not queued behind the fetch.
    store.handle_signal(&receive(msg(2, COUNTERPART, SELF_ID, "live", 300)));
    assert_eq!(store.timeline(COUNTERPART).len(), 1);

    fetch.await.unwrap().unwrap();
    let ids: Vec<Option<i64>> = store.timeline(COUNTERPART).iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![Some(1), Some(2)]);
}
