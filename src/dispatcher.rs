//! The Dispatcher (spec §4.7): a single-threaded protocol state machine
//! that owns the Store and reacts to whatever the Listener hands it. One
//! thread, no locking beyond what the Store already does internally —
//! message order from a single peer connection is preserved, which matters
//! for "request then use the response" flows like offline-data sync.
//!
//! Grounded in `original_source/securetalks/receiver.py`'s `Receiver`
//! (`_handle_ciphergram_message`/`_handle_request_offline_message`/
//! `_handle_response_offline_message`).

use std::sync::Arc;

use crossbeam_channel::Receiver as ChannelReceiver;
use rsa::RsaPrivateKey;

use crate::crypto;
use crate::errors::CryptoError;
use crate::sender::Sender;
use crate::store::Store;
use crate::ui::{PushHook, PushNotification};
use crate::wire::{EncryptedEnvelope, PeerAddr, WireCiphergram, WireMessage};

/// A clock abstraction so tests can control "now" instead of depending on
/// wall time; production code wires this to `SystemTime::now()`.
pub trait Clock: Send + Sync {
    fn unix_timestamp(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

pub struct Dispatcher {
    own_private_key: RsaPrivateKey,
    store: Arc<Store>,
    sender: Sender,
    clock: Arc<dyn Clock>,
    inbound_rx: ChannelReceiver<(PeerAddr, WireMessage)>,
    /// Messages older or newer than this many seconds relative to "now" are
    /// replay/clock-skew noise and get dropped without storage (spec §4.7,
    /// §9: this check is authoritative; `MessageCrypto` itself does not
    /// re-check timing on decode).
    ttl_seconds: i64,
    /// The port our own Listener is bound to, stamped into every ciphergram
    /// we rebroadcast so the recipient's reply targets our real server, not
    /// whatever ephemeral port this peer connection used.
    own_server_port: u16,
    push: Option<PushHook>,
}

impl Dispatcher {
    pub fn new(
        own_private_key: RsaPrivateKey,
        store: Arc<Store>,
        sender: Sender,
        clock: Arc<dyn Clock>,
        inbound_rx: ChannelReceiver<(PeerAddr, WireMessage)>,
        ttl_seconds: i64,
        own_server_port: u16,
    ) -> Dispatcher {
        Dispatcher {
            own_private_key,
            store,
            sender,
            clock,
            inbound_rx,
            ttl_seconds,
            own_server_port,
            push: None,
        }
    }

    /// Install a callback invoked with every freshly stored inbound message
    /// (spec §6 `push_message`). Not set in tests that only care about
    /// store/rebroadcast side effects.
    pub fn with_push_hook(mut self, push: PushHook) -> Dispatcher {
        self.push = Some(push);
        self
    }

    /// Run the dispatch loop on the calling thread until the inbound
    /// channel is closed (every Listener connection handler has dropped
    /// its sender, or the Supervisor has shut down).
    pub fn run(&self) {
        for (peer, message) in self.inbound_rx.iter() {
            self.handle(peer, message);
        }
    }

    fn handle(&self, peer: PeerAddr, message: WireMessage) {
        match message {
            WireMessage::Ciphergram {
                server_port,
                envelope,
            } => self.handle_ciphergram(peer, server_port, envelope),
            WireMessage::RequestOfflineData { server_port } => {
                self.handle_request_offline_data(peer, server_port)
            }
            WireMessage::ResponseOfflineData { ciphergrams } => {
                self.handle_response_offline_data(peer, ciphergrams)
            }
        }
    }

    /// A live ciphergram arriving over a fresh connection: remember who sent
    /// it (for the gossip peer table), then decrypt/store/rebroadcast.
    fn handle_ciphergram(&self, peer: PeerAddr, server_port: u16, envelope: EncryptedEnvelope) {
        self.remember_peer(peer.clone(), server_port);
        self.decrypt_and_store(envelope, Some(&peer));
    }

    /// Decrypt `envelope` and route it to storage, optionally rebroadcasting
    /// to every peer except `origin`. `origin` is `None` for ciphergrams
    /// replayed out of a `response_offline_data` payload (spec §4.7: those
    /// are NEVER rebroadcast, regardless of outcome).
    fn decrypt_and_store(&self, envelope: EncryptedEnvelope, origin: Option<&PeerAddr>) {
        match crypto::decrypt(&self.own_private_key, &envelope) {
            Ok((sender_node_id, plaintext)) => {
                if !self.is_fresh(envelope.timestamp) {
                    log::debug!(
                        "dropping ciphergram from {}: timestamp {} outside {}s ttl",
                        sender_node_id,
                        envelope.timestamp,
                        self.ttl_seconds
                    );
                    return;
                }
                self.store_as_message(&sender_node_id, &envelope, &plaintext);
                if let Some(origin) = origin {
                    self.rebroadcast(&envelope, origin);
                }
            }
            Err(CryptoError::DecryptionError) => {
                self.store_as_ciphergram(&envelope);
                if let Some(origin) = origin {
                    self.rebroadcast(&envelope, origin);
                }
            }
            Err(CryptoError::PowError) => {
                log::debug!("dropping ciphergram with invalid proof of work");
            }
            Err(CryptoError::VerificationError) => {
                log::debug!("dropping ciphergram with invalid signature");
            }
            Err(e) => {
                log::debug!("dropping malformed ciphergram: {e}");
            }
        }
    }

    fn is_fresh(&self, envelope_timestamp: i64) -> bool {
        (self.clock.unix_timestamp() - envelope_timestamp).abs() <= self.ttl_seconds
    }

    fn store_as_message(&self, node_id: &str, envelope: &EncryptedEnvelope, plaintext: &str) {
        let received_at = self.clock.unix_timestamp();
        if !self.store.node_exists(node_id).unwrap_or(false) {
            let _ = self.store.add_node(node_id, received_at);
        } else {
            let _ = self.store.touch_node_activity(node_id, received_at);
        }
        match self
            .store
            .add_message(node_id, plaintext, true, envelope.timestamp, received_at)
        {
            Ok(()) => {
                let _ = self.store.increment_unread(node_id);
                if let Some(push) = &self.push {
                    let alias = self
                        .store
                        .get_node(node_id)
                        .ok()
                        .and_then(|n| n.alias)
                        .unwrap_or_default();
                    push(PushNotification {
                        node_id: node_id.to_string(),
                        alias,
                        text: plaintext.to_string(),
                        to_me: true,
                        sender_timestamp: envelope.timestamp,
                        timestamp: received_at,
                    });
                }
            }
            Err(e) => log::debug!("duplicate message from {node_id}: {e}"),
        }
    }

    fn store_as_ciphergram(&self, envelope: &EncryptedEnvelope) {
        let content = match serde_json::to_string(envelope) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("failed to serialize ciphergram for caching: {e}");
                return;
            }
        };
        if let Err(e) = self.store.add_ciphergram(&content, envelope.timestamp) {
            log::debug!("not re-caching ciphergram: {e}");
        }
    }

    fn rebroadcast(&self, envelope: &EncryptedEnvelope, origin: &PeerAddr) {
        let peers = match self.store.list_peers() {
            Ok(peers) => peers,
            Err(e) => {
                log::warn!("store error listing peers for rebroadcast: {e}");
                return;
            }
        };
        let targets: Vec<PeerAddr> = peers
            .into_iter()
            .map(|p| PeerAddr {
                address: p.address,
                port: p.port,
            })
            .collect();
        self.sender
            .broadcast_from(&targets, origin, self.own_server_port, envelope);
    }

    fn handle_request_offline_data(&self, peer: PeerAddr, server_port: u16) {
        self.remember_peer(peer.clone(), server_port);

        let ciphergrams = match self.store.list_all_ciphergrams() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("store error listing ciphergrams: {e}");
                return;
            }
        };
        let wire_ciphergrams: Vec<WireCiphergram> = ciphergrams
            .into_iter()
            .map(|c| WireCiphergram {
                content: c.content,
                timestamp: c.timestamp,
            })
            .collect();
        self.sender.respond_offline_data(
            PeerAddr {
                address: peer.address,
                port: server_port,
            },
            wire_ciphergrams,
        );
    }

    /// Anti-flood: only a peer we actually asked is allowed to answer (spec
    /// §4.7, §8 scenario 8). An unsolicited response is dropped whole.
    fn handle_response_offline_data(&self, peer: PeerAddr, ciphergrams: Vec<WireCiphergram>) {
        if !self.sender.take_offline_requested(&peer) {
            log::debug!(
                "dropping unsolicited response_offline_data from {}:{}",
                peer.address,
                peer.port
            );
            return;
        }

        for ciphergram in ciphergrams {
            let envelope: EncryptedEnvelope = match serde_json::from_str(&ciphergram.content) {
                Ok(envelope) => envelope,
                Err(e) => {
                    log::debug!("dropping malformed cached ciphergram: {e}");
                    continue;
                }
            };
            // offline-replayed ciphergrams are never rebroadcast.
            self.decrypt_and_store(envelope, None);
        }
    }

    fn remember_peer(&self, peer: PeerAddr, server_port: u16) {
        let now = self.clock.unix_timestamp();
        if self
            .store
            .touch_peer(&peer.address, server_port, now)
            .is_err()
        {
            let _ = self.store.add_peer(&peer.address, server_port, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore;
    use rand::rngs::OsRng;
    use rsa::RsaPublicKey;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FixedClock(AtomicI64);

    impl Clock for FixedClock {
        fn unix_timestamp(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn keypair() -> (RsaPrivateKey, RsaPublicKey, String) {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        let node_id = keystore::encode_public_key_hex(&public).unwrap();
        (private, public, node_id)
    }

    fn test_dispatcher(
        own_private: RsaPrivateKey,
        store: Arc<Store>,
        rx: ChannelReceiver<(PeerAddr, WireMessage)>,
        now: i64,
        ttl: i64,
    ) -> (Dispatcher, Sender) {
        let (_scratch_priv, _scratch_pub, scratch_id) = keypair();
        let (sender, _handle) = crate::sender::Sender::spawn(
            crate::tls::client_config(),
            RsaPrivateKey::new(&mut OsRng, 2048).unwrap(),
            scratch_id,
        );
        let dispatcher = Dispatcher::new(
            own_private,
            store,
            sender.clone(),
            Arc::new(FixedClock(AtomicI64::new(now))),
            rx,
            ttl,
            9001,
        );
        (dispatcher, sender)
    }

    #[test]
    fn ciphergram_addressed_to_us_is_stored_as_a_message_not_a_ciphergram() {
        let (alice_priv, _alice_pub, alice_id) = keypair();
        let (bob_priv, bob_pub, _bob_id) = keypair();

        let envelope = crypto::encrypt(&alice_priv, &alice_id, &bob_pub, "hi bob", 1000).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = crossbeam_channel::unbounded();
        let (dispatcher, _sender) = test_dispatcher(bob_priv, store.clone(), rx, 1000, 3600);

        tx.send((
            PeerAddr {
                address: "1.1.1.1".into(),
                port: 0,
            },
            WireMessage::Ciphergram {
                server_port: 9100,
                envelope,
            },
        ))
        .unwrap();
        drop(tx);
        dispatcher.run();

        let messages = store.list_messages(&alice_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hi bob");
        assert!(messages[0].to_me);
        assert!(store.list_all_ciphergrams().unwrap().is_empty());
    }

    #[test]
    fn ciphergram_not_for_us_is_cached_not_stored_as_a_message() {
        let (alice_priv, _alice_pub, alice_id) = keypair();
        let (_bob_priv, bob_pub, _bob_id) = keypair();
        let (mallory_priv, _mallory_pub, _mallory_id) = keypair();

        let envelope = crypto::encrypt(&alice_priv, &alice_id, &bob_pub, "hi bob", 1000).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = crossbeam_channel::unbounded();
        let (dispatcher, _sender) = test_dispatcher(mallory_priv, store.clone(), rx, 1000, 3600);

        tx.send((
            PeerAddr {
                address: "1.1.1.1".into(),
                port: 0,
            },
            WireMessage::Ciphergram {
                server_port: 9100,
                envelope,
            },
        ))
        .unwrap();
        drop(tx);
        dispatcher.run();

        assert_eq!(store.list_all_ciphergrams().unwrap().len(), 1);
        assert!(store.list_nodes().unwrap().is_empty());
    }

    #[test]
    fn broken_proof_of_work_is_neither_stored_nor_cached() {
        let (alice_priv, _alice_pub, alice_id) = keypair();
        let (bob_priv, bob_pub, _bob_id) = keypair();

        let mut envelope =
            crypto::encrypt(&alice_priv, &alice_id, &bob_pub, "hi bob", 1000).unwrap();
        envelope.proof = 1;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = crossbeam_channel::unbounded();
        let (dispatcher, _sender) = test_dispatcher(bob_priv, store.clone(), rx, 1000, 3600);

        tx.send((
            PeerAddr {
                address: "1.1.1.1".into(),
                port: 0,
            },
            WireMessage::Ciphergram {
                server_port: 9100,
                envelope,
            },
        ))
        .unwrap();
        drop(tx);
        dispatcher.run();

        assert!(store.list_all_ciphergrams().unwrap().is_empty());
        assert!(store.list_nodes().unwrap().is_empty());
    }

    #[test]
    fn stale_timestamp_outside_ttl_is_dropped() {
        let (alice_priv, _alice_pub, alice_id) = keypair();
        let (bob_priv, bob_pub, _bob_id) = keypair();

        let envelope = crypto::encrypt(&alice_priv, &alice_id, &bob_pub, "hi bob", 1000).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = crossbeam_channel::unbounded();
        // ttl of 0 with "now" far from the envelope's timestamp of 1000.
        let (dispatcher, _sender) = test_dispatcher(bob_priv, store.clone(), rx, 50_000, 0);

        tx.send((
            PeerAddr {
                address: "1.1.1.1".into(),
                port: 0,
            },
            WireMessage::Ciphergram {
                server_port: 9100,
                envelope,
            },
        ))
        .unwrap();
        drop(tx);
        dispatcher.run();

        assert!(store.list_nodes().unwrap().is_empty());
        assert!(store.list_all_ciphergrams().unwrap().is_empty());
    }

    #[test]
    fn request_offline_data_registers_peer_with_its_declared_server_port() {
        let (bob_priv, _bob_pub, _bob_id) = keypair();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = crossbeam_channel::unbounded();
        let (dispatcher, _sender) = test_dispatcher(bob_priv, store.clone(), rx, 1000, 3600);

        tx.send((
            PeerAddr {
                address: "2.2.2.2".into(),
                port: 55555,
            },
            WireMessage::RequestOfflineData { server_port: 9000 },
        ))
        .unwrap();
        drop(tx);
        dispatcher.run();

        let peers = store.list_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "2.2.2.2");
        assert_eq!(peers[0].port, 9000);
    }

    #[test]
    fn response_offline_data_from_unsolicited_peer_is_dropped_whole() {
        let bob_priv = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = crossbeam_channel::unbounded();
        let (dispatcher, _sender) = test_dispatcher(bob_priv, store.clone(), rx, 1000, 3600);

        // We never called request_offline_data, so this peer is not in the
        // offline_requested set; the whole payload must be dropped.
        tx.send((
            PeerAddr {
                address: "3.3.3.3".into(),
                port: 9001,
            },
            WireMessage::ResponseOfflineData {
                ciphergrams: vec![WireCiphergram {
                    content: "{}".into(),
                    timestamp: 1000,
                }],
            },
        ))
        .unwrap();
        drop(tx);
        dispatcher.run();

        assert!(store.list_all_ciphergrams().unwrap().is_empty());
    }
}
