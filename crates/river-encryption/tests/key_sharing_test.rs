mod common;

use async_trait::async_trait;
use common::*;
use river_encryption::{
    open_session_key_envelope, ChannelSessionTransport, DeviceList, EncryptionConfig,
    EncryptionEvent, Error, MegolmEncryption, Result, SessionKeyEnvelope, StreamMembership,
    UserDevice,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Membership with a fixed member list and per-user published devices.
#[derive(Default)]
struct Membership {
    members: Vec<String>,
    devices: Mutex<HashMap<String, Vec<UserDevice>>>,
}

impl Membership {
    fn new(devices: &[(&str, UserDevice)]) -> Self {
        let mut by_user: HashMap<String, Vec<UserDevice>> = HashMap::new();
        for (user_id, device) in devices {
            by_user
                .entry(user_id.to_string())
                .or_default()
                .push(device.clone());
        }
        let mut members: Vec<String> = by_user.keys().cloned().collect();
        members.sort();
        Self {
            members,
            devices: Mutex::new(by_user),
        }
    }
}

#[async_trait]
impl StreamMembership for Membership {
    async fn users_entitled_to_key_exchange(&self, _stream_id: &str) -> Result<Vec<String>> {
        Ok(self.members.clone())
    }

    async fn download_user_devices(&self, user_id: &str) -> Result<Vec<UserDevice>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

struct Stream {
    alice: TestDevice,
    encryption: MegolmEncryption,
    events: crossbeam_channel::Receiver<EncryptionEvent>,
    outbox: crossbeam_channel::Receiver<SessionKeyEnvelope>,
}

fn stream(alice: TestDevice, membership: Membership) -> Stream {
    let directory = Arc::new(DeviceList::new(
        Arc::new(membership),
        alice.store.clone(),
        "alice",
        EncryptionConfig::default(),
    ));
    let (outbox_tx, outbox) = crossbeam_channel::unbounded();
    let transport = Arc::new(ChannelSessionTransport::new(alice.device.clone(), outbox_tx));
    let (events_tx, events) = crossbeam_channel::unbounded();
    let encryption =
        MegolmEncryption::new(alice.device.clone(), directory, transport).with_events(events_tx);
    Stream {
        alice,
        encryption,
        events,
        outbox,
    }
}

#[tokio::test]
async fn key_reaches_members_and_unlocks_pending_messages() {
    let delegate = delegate();
    let alice = test_device(&delegate, "alice");
    let bob = test_device(&delegate, "bob");
    let carol = test_device(&delegate, "carol");
    let membership = Membership::new(&[
        ("alice", alice.user_device()),
        ("bob", bob.user_device()),
        ("carol", carol.user_device()),
    ]);
    let stream = stream(alice, membership);

    let first = stream.encryption.encrypt("chan-1", "first").await.unwrap();
    let second = stream.encryption.encrypt("chan-1", "second").await.unwrap();

    // Bob sees traffic before the key arrives.
    let bob_decryption = bob.decryption();
    assert!(bob_decryption.decrypt("chan-1", &first).unwrap_err().is_pending_key());
    assert!(bob_decryption.decrypt("chan-1", &second).unwrap_err().is_pending_key());

    match next_share_event(&stream.events).await {
        EncryptionEvent::SessionShared { device_count, .. } => assert_eq!(device_count, 3),
        other => panic!("unexpected event {:?}", other),
    }

    // Alice's own device is skipped.
    let envelopes: Vec<_> = stream.outbox.try_iter().collect();
    assert_eq!(envelopes.len(), 2);
    let for_bob = envelopes.iter().find(|e| e.user_id == "bob").unwrap();
    let for_carol = envelopes.iter().find(|e| e.user_id == "carol").unwrap();
    assert_eq!(for_bob.sender_key, stream.alice.device.device_curve25519_key());

    let sessions = open_session_key_envelope(&bob.device, for_bob).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, first.session_id);

    let retried = bob_decryption.import_session_keys(&sessions).unwrap();
    let plaintexts: Vec<_> = retried.into_iter().map(|(_, r)| r.unwrap()).collect();
    assert_eq!(plaintexts, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(bob_decryption.pending_count("chan-1", &first.session_id), 0);

    let carol_decryption = carol.decryption();
    carol_decryption
        .import_session_keys(&open_session_key_envelope(&carol.device, for_carol).unwrap())
        .unwrap();
    assert_eq!(carol_decryption.decrypt("chan-1", &second).unwrap(), "second");

    // The directory cached what it downloaded.
    assert_eq!(
        stream
            .alice
            .store
            .get_active_user_devices("bob", 0)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn envelope_only_opens_on_its_recipient() {
    let delegate = delegate();
    let alice = test_device(&delegate, "alice");
    let bob = test_device(&delegate, "bob");
    let mallory = test_device(&delegate, "mallory");
    let stream = stream(alice, Membership::new(&[("bob", bob.user_device())]));

    stream.encryption.encrypt("chan-1", "secret").await.unwrap();
    next_share_event(&stream.events).await;

    let envelope = stream.outbox.try_recv().unwrap();
    assert!(matches!(
        open_session_key_envelope(&mallory.device, &envelope),
        Err(Error::OlmDecryption(_))
    ));

    let mut relabelled = envelope.clone();
    relabelled.stream_id = "chan-2".to_string();
    assert!(matches!(
        open_session_key_envelope(&bob.device, &relabelled),
        Err(Error::StreamIdMismatch { .. })
    ));

    assert_eq!(open_session_key_envelope(&bob.device, &envelope).unwrap().len(), 1);
}

#[tokio::test]
async fn rotated_session_is_shared_again() {
    let delegate = delegate();
    let alice = test_device(&delegate, "alice");
    let bob = test_device(&delegate, "bob");
    let stream = stream(alice, Membership::new(&[("bob", bob.user_device())]));
    let bob_decryption = bob.decryption();

    let before = stream.encryption.encrypt("chan-1", "before").await.unwrap();
    next_share_event(&stream.events).await;
    assert!(stream.encryption.discard_session("chan-1").await.unwrap());
    let after = stream.encryption.encrypt("chan-1", "after").await.unwrap();
    next_share_event(&stream.events).await;
    assert_ne!(before.session_id, after.session_id);

    for envelope in stream.outbox.try_iter() {
        let sessions = open_session_key_envelope(&bob.device, &envelope).unwrap();
        bob_decryption.import_session_keys(&sessions).unwrap();
    }

    assert_eq!(bob_decryption.decrypt("chan-1", &before).unwrap(), "before");
    assert_eq!(bob_decryption.decrypt("chan-1", &after).unwrap(), "after");
    let mut ids = bob.device.inbound_group_session_ids("chan-1").unwrap();
    ids.sort();
    let mut expected = vec![before.session_id, after.session_id];
    expected.sort();
    assert_eq!(ids, expected);
}
