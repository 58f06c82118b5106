mod common;

use futures_util::stream;

use ember_core::Applied;
use ember_core::reconciler::SYSTEM_CONTACT_ID;
use ember_types::api::Draft;
use ember_types::events::TransportEvent;
use ember_types::models::{ContactKind, DeliveryState, DirectoryEntry, Moment};

fn directory_entry(id: &str, name: &str) -> DirectoryEntry {
    DirectoryEntry {
        id: id.to_string(),
        name: name.to_string(),
        avatar: Some(format!("https://avatars.example/{id}.png")),
        bio: String::new(),
        status: "online".to_string(),
        updated_at: 1,
    }
}

#[tokio::test]
async fn redelivered_message_is_stored_once() {
    let (ember, _storage, _outbox) = common::open();
    let reconciler = ember.reconciler();

    let first = reconciler.apply(common::direct("m1", "bob", "hi", 100)).unwrap();
    assert!(matches!(first, Applied::Inserted(ref m) if m.state == DeliveryState::Delivered));

    let again = reconciler.apply(common::direct("m1", "bob", "hi", 100)).unwrap();
    assert_eq!(again, Applied::Duplicate);

    assert_eq!(common::stored(&ember, "bob").len(), 1);
    assert_eq!(common::cached_len(&ember, "bob"), 1);
    assert_eq!(ember.contacts().get("bob").unwrap().unwrap().unread, 1);
}

#[tokio::test]
async fn unknown_sender_is_added_from_the_directory() {
    let (ember, _storage, _outbox) = common::open();
    let reconciler = ember.reconciler();

    reconciler
        .apply(TransportEvent::DirectoryUpsert(directory_entry("carol", "Carol")))
        .unwrap();
    reconciler.apply(common::direct("m1", "carol", "hello!", 50)).unwrap();
    reconciler.apply(common::direct("m2", "dave", "who's this?", 60)).unwrap();

    let carol = ember.contacts().get("carol").unwrap().unwrap();
    assert_eq!(carol.name, "Carol");
    assert_eq!(carol.status, "online");
    assert_eq!(carol.last_message.as_deref(), Some("hello!"));

    let dave = ember.contacts().get("dave").unwrap().unwrap();
    assert_eq!(dave.name, "dave");
    assert_eq!(dave.kind, ContactKind::Direct);
}

#[tokio::test]
async fn blocked_senders_are_dropped() {
    let (ember, _storage, _outbox) = common::open();
    ember.contacts().add("spam", "Spam").unwrap();
    ember.contacts().set_blocked("spam", true).unwrap();

    let outcome = ember.reconciler().apply(common::direct("m1", "spam", "buy now", 10)).unwrap();
    assert_eq!(outcome, Applied::Dropped);
    assert!(common::stored(&ember, "spam").is_empty());
}

#[tokio::test]
async fn broadcasts_land_in_the_system_conversation() {
    let (ember, _storage, _outbox) = common::open();

    let notice = common::wire("b1", "ops", "maintenance tonight", 10);
    ember.reconciler().apply(TransportEvent::Broadcast(notice)).unwrap();

    let system = ember.contacts().get(SYSTEM_CONTACT_ID).unwrap().unwrap();
    assert_eq!(system.kind, ContactKind::System);
    assert!(ember.contacts().get("ops").unwrap().is_none());

    let conversation = ember.get_conversation(SYSTEM_CONTACT_ID).unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].content, "maintenance tonight");
}

#[tokio::test]
async fn presence_updates_contacts_and_directory() {
    let (ember, _storage, _outbox) = common::open();
    let reconciler = ember.reconciler();
    ember.contacts().add("alice", "Alice").unwrap();
    reconciler
        .apply(TransportEvent::DirectoryUpsert(directory_entry("alice", "Alice")))
        .unwrap();

    let outcome = reconciler
        .apply(TransportEvent::Presence {
            user_id: "alice".into(),
            status: "away".into(),
        })
        .unwrap();
    assert_eq!(outcome, Applied::Presence { updated: true });
    assert_eq!(ember.contacts().get("alice").unwrap().unwrap().status, "away");
    assert_eq!(ember.contacts().directory_entry("alice").unwrap().unwrap().status, "away");

    let outcome = reconciler
        .apply(TransportEvent::Presence {
            user_id: "stranger".into(),
            status: "online".into(),
        })
        .unwrap();
    assert_eq!(outcome, Applied::Presence { updated: false });
    assert!(ember.contacts().get("stranger").unwrap().is_none());
}

#[tokio::test]
async fn receipts_only_move_forward() {
    let (ember, _storage, _outbox) = common::open();
    ember.contacts().add("alice", "Alice").unwrap();
    let sent = ember.send("alice", Draft::text("hi")).await.unwrap();
    let reconciler = ember.reconciler();

    let receipt = |state| TransportEvent::Receipt {
        message_id: sent.id.clone(),
        state,
    };

    assert_eq!(reconciler.apply(receipt(DeliveryState::Delivered)).unwrap(), Applied::Receipt { advanced: true });
    assert_eq!(reconciler.apply(receipt(DeliveryState::Read)).unwrap(), Applied::Receipt { advanced: true });
    assert_eq!(reconciler.apply(receipt(DeliveryState::Delivered)).unwrap(), Applied::Receipt { advanced: false });
    assert_eq!(reconciler.apply(receipt(DeliveryState::Failed)).unwrap(), Applied::Receipt { advanced: false });

    let row = ember.persister().db().get_message(&sent.id).unwrap().unwrap();
    assert_eq!(row.state, DeliveryState::Read);
    assert_eq!(ember.lifecycle().index().find("alice", &sent.id).unwrap().state, DeliveryState::Read);

    let unknown = TransportEvent::Receipt {
        message_id: "nope".into(),
        state: DeliveryState::Read,
    };
    assert_eq!(reconciler.apply(unknown).unwrap(), Applied::Receipt { advanced: false });
}

#[tokio::test]
async fn peer_reactions_and_moments_are_merged() {
    let (ember, _storage, _outbox) = common::open();
    let reconciler = ember.reconciler();
    reconciler.apply(common::direct("m1", "bob", "look", 10)).unwrap();

    let reaction = TransportEvent::Reaction {
        message_id: "m1".into(),
        emoji: "🔥".into(),
        reactor: "bob".into(),
        added: true,
    };
    assert_eq!(reconciler.apply(reaction.clone()).unwrap(), Applied::Reaction { changed: true });
    assert_eq!(reconciler.apply(reaction).unwrap(), Applied::Reaction { changed: false });

    let moment = Moment {
        id: "mo1".into(),
        author_id: "bob".into(),
        author_name: "Bob".into(),
        author_avatar: None,
        content: "sunset".into(),
        media: None,
        timestamp: 5,
    };
    assert_eq!(
        reconciler.apply(TransportEvent::MomentPosted(moment.clone())).unwrap(),
        Applied::Moment { inserted: true }
    );
    assert_eq!(
        reconciler.apply(TransportEvent::MomentPosted(moment)).unwrap(),
        Applied::Moment { inserted: false }
    );
    assert_eq!(ember.moments().list(10).unwrap().len(), 1);
}

#[tokio::test]
async fn run_skips_failing_events_and_keeps_going() {
    let (ember, _storage, _outbox) = common::open();
    let mut changes = ember.subscribe();

    let events = vec![
        common::direct("m1", "bob", "one", 10),
        TransportEvent::Reaction {
            message_id: "missing".into(),
            emoji: "👍".into(),
            reactor: "bob".into(),
            added: true,
        },
        common::direct("m2", "bob", "two", 20),
    ];

    let applied = ember.reconciler().run(stream::iter(events)).await;
    assert_eq!(applied, 2);
    assert_eq!(common::stored(&ember, "bob").len(), 2);

    let changed = changes.try_recv().unwrap();
    assert_eq!(changed.contact_id, "bob");
}
