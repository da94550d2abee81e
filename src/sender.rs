//! The Sender (spec §4.6): a single worker thread that owns all outbound
//! TLS dials, fed over a channel so callers never block on network I/O.
//! Grounded in `original_source/securetalks/sender.py`'s `Sender`
//! (`send_message_to`/`request_offline_data`/`respond_offline_data`/
//! `send_to`/`broadcast`/`broadcast_from`/`terminate`), ported from its
//! queue-plus-worker-thread shape onto `crossbeam_channel`.

use std::collections::HashSet;
use std::net::{IpAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender as ChannelSender};
use rsa::RsaPrivateKey;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;

use crate::crypto;
use crate::wire::{self, EncryptedEnvelope, PeerAddr, WireCiphergram, WireMessage};

enum Command {
    Ciphergram {
        peer: PeerAddr,
        server_port: u16,
        envelope: EncryptedEnvelope,
    },
    /// A plaintext chat body the worker must encrypt on demand (spec §4.6
    /// step 1: "If `maybe_recipient_hex` is set... call
    /// `MessageCrypto.encode`"), then fan out to every given peer.
    UserMessage {
        peers: Vec<PeerAddr>,
        server_port: u16,
        recipient_hex: String,
        text: String,
    },
    RequestOfflineData {
        peers: Vec<PeerAddr>,
        server_port: u16,
    },
    RespondOfflineData {
        peer: PeerAddr,
        ciphergrams: Vec<WireCiphergram>,
    },
    Terminate,
}

/// A cheaply-cloneable handle to the Sender's worker thread.
#[derive(Clone)]
pub struct Sender {
    tx: ChannelSender<Command>,
    /// Peers we have asked for offline data and are still waiting to hear
    /// back from (spec §4.6/§4.7, §8 scenario 8). Shared with the worker
    /// loop only indirectly — the Dispatcher consults this directly, the
    /// worker only populates it when `request_offline_data` enqueues.
    offline_requested: Arc<Mutex<HashSet<PeerAddr>>>,
}

impl Sender {
    /// Spawn the worker thread and return a handle plus its `JoinHandle`.
    /// `own_private_key`/`own_node_id` let the worker encrypt
    /// `send_user_message` bodies without the caller ever touching key
    /// material directly.
    pub fn spawn(
        tls_config: Arc<ClientConfig>,
        own_private_key: RsaPrivateKey,
        own_node_id: String,
    ) -> (Sender, JoinHandle<()>) {
        let (tx, rx) = unbounded();
        let handle = thread::spawn(move || worker_loop(tls_config, own_private_key, own_node_id, rx));
        (
            Sender {
                tx,
                offline_requested: Arc::new(Mutex::new(HashSet::new())),
            },
            handle,
        )
    }

    pub fn send_ciphergram(&self, peer: PeerAddr, server_port: u16, envelope: EncryptedEnvelope) {
        let _ = self.tx.send(Command::Ciphergram {
            peer,
            server_port,
            envelope,
        });
    }

    /// Encrypt `text` for `recipient_hex` and broadcast the resulting
    /// envelope to every peer in `peers` (spec §4.6 `send_user_message`).
    /// `peers` is supplied by the caller (typically `Store::list_peers`)
    /// rather than looked up by the worker, keeping the outbound channel's
    /// `(recipients, payload, recipient_hex)` contract from spec §5.
    pub fn send_user_message(
        &self,
        peers: Vec<PeerAddr>,
        server_port: u16,
        recipient_hex: String,
        text: String,
    ) {
        let _ = self.tx.send(Command::UserMessage {
            peers,
            server_port,
            recipient_hex,
            text,
        });
    }

    /// Snapshot `peers` into the offline-requested set, then ask each one
    /// for its cached ciphergrams (spec §4.6/§4.9).
    pub fn request_offline_data(&self, peers: Vec<PeerAddr>, server_port: u16) {
        {
            let mut requested = self.offline_requested.lock().unwrap();
            requested.extend(peers.iter().cloned());
        }
        let _ = self
            .tx
            .send(Command::RequestOfflineData { peers, server_port });
    }

    /// If `peer` is in the offline-requested set, remove it and return
    /// `true`; otherwise return `false` without modifying the set. The
    /// Dispatcher uses this as the anti-flood gate on
    /// `response_offline_data` (spec §4.7, §8 scenario 8).
    pub fn take_offline_requested(&self, peer: &PeerAddr) -> bool {
        self.offline_requested.lock().unwrap().remove(peer)
    }

    pub fn respond_offline_data(&self, peer: PeerAddr, ciphergrams: Vec<WireCiphergram>) {
        let _ = self
            .tx
            .send(Command::RespondOfflineData { peer, ciphergrams });
    }

    /// Send `envelope` to every peer in `peers`.
    pub fn broadcast(&self, peers: &[PeerAddr], server_port: u16, envelope: &EncryptedEnvelope) {
        for peer in peers {
            self.send_ciphergram(peer.clone(), server_port, envelope.clone());
        }
    }

    /// Send `envelope` to every peer in `peers` except `from`.
    pub fn broadcast_from(
        &self,
        peers: &[PeerAddr],
        from: &PeerAddr,
        server_port: u16,
        envelope: &EncryptedEnvelope,
    ) {
        for peer in peers {
            if peer != from {
                self.send_ciphergram(peer.clone(), server_port, envelope.clone());
            }
        }
    }

    /// Stop the worker thread after any already-queued sends complete.
    pub fn terminate(&self) {
        let _ = self.tx.send(Command::Terminate);
    }
}

fn worker_loop(
    tls_config: Arc<ClientConfig>,
    own_private_key: RsaPrivateKey,
    own_node_id: String,
    rx: Receiver<Command>,
) {
    for command in rx.iter() {
        match command {
            Command::Terminate => break,
            Command::Ciphergram {
                peer,
                server_port,
                envelope,
            } => {
                let message = WireMessage::Ciphergram {
                    server_port,
                    envelope,
                };
                log_send_error(&peer, send_message(&tls_config, &peer, &message));
            }
            Command::UserMessage {
                peers,
                server_port,
                recipient_hex,
                text,
            } => {
                let recipient_public = match crate::keystore::decode_public_key_hex(&recipient_hex)
                {
                    Ok(key) => key,
                    Err(e) => {
                        log::warn!("dropping send to invalid recipient {recipient_hex}: {e}");
                        continue;
                    }
                };
                let timestamp = unix_now();
                let envelope = match crypto::encrypt(
                    &own_private_key,
                    &own_node_id,
                    &recipient_public,
                    &text,
                    timestamp,
                ) {
                    Ok(envelope) => envelope,
                    Err(_) => {
                        // InvalidRecipient: swallow per spec §4.6/§7.
                        log::warn!("dropping send to invalid recipient {recipient_hex}");
                        continue;
                    }
                };
                for peer in peers {
                    let message = WireMessage::Ciphergram {
                        server_port,
                        envelope: envelope.clone(),
                    };
                    log_send_error(&peer, send_message(&tls_config, &peer, &message));
                }
            }
            Command::RequestOfflineData { peers, server_port } => {
                let message = WireMessage::RequestOfflineData { server_port };
                for peer in peers {
                    log_send_error(&peer, send_message(&tls_config, &peer, &message));
                }
            }
            Command::RespondOfflineData { peer, ciphergrams } => {
                let message = WireMessage::ResponseOfflineData { ciphergrams };
                log_send_error(&peer, send_message(&tls_config, &peer, &message));
            }
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn log_send_error(peer: &PeerAddr, result: std::io::Result<()>) {
    if let Err(e) = result {
        log::warn!("send to {}:{} failed: {e}", peer.address, peer.port);
    }
}

fn send_message(
    tls_config: &Arc<ClientConfig>,
    peer: &PeerAddr,
    message: &WireMessage,
) -> std::io::Result<()> {
    let stream = TcpStream::connect((peer.address.as_str(), peer.port))?;

    let server_name = match peer.address.parse::<IpAddr>() {
        Ok(ip) => ServerName::IpAddress(ip.into()),
        Err(_) => ServerName::try_from(peer.address.clone())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?,
    };

    let conn = rustls::ClientConnection::new(tls_config.clone(), server_name)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let mut tls_stream = rustls::StreamOwned::new(conn, stream);

    let body = serde_json::to_vec(message)?;
    wire::write_frame(&mut tls_stream, &body)
}
