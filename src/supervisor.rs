//! The Supervisor (spec §4.9): wires every other component together, owns
//! their lifecycles, and runs the startup offline-data pull plus the
//! shutdown expiry sweep. Grounded in
//! `original_source/securetalks/main.py`'s top-level wiring, translated
//! from "spawn OS processes with multiprocessing queues" (spec §9) onto
//! in-process threads plus `crossbeam_channel`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::bootstrap;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, SystemClock};
use crate::errors::NodeError;
use crate::keystore::KeyStore;
use crate::listener::Listener;
use crate::presenter::Presenter;
use crate::sender::Sender;
use crate::store::Store;
use crate::tls;
use crate::ui::PushHook;
use crate::wire::PeerAddr;

/// Ciphergrams/peers older than this are expired on the startup/shutdown
/// sweep and used as the Dispatcher's replay-rejection window (spec §4.4
/// invariants b/c; §9 notes the Dispatcher's TTL check is authoritative).
pub const DEFAULT_TTL_SECONDS: i64 = 24 * 60 * 60;

pub struct Supervisor {
    pub store: Arc<Store>,
    pub keystore: Arc<KeyStore>,
    sender: Sender,
    listener: Arc<Listener>,
    presenter: Presenter,
    ttl_seconds: i64,
    sender_thread: Option<JoinHandle<()>>,
    listener_thread: Option<JoinHandle<()>>,
    dispatcher_thread: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Bring up every worker and perform the initial offline-data request
    /// (spec §4.9). `push_hook`, if given, is the external UI adapter's
    /// callback for `push_message` (spec §6); it is `None` for headless
    /// operation.
    pub fn start(
        data_dir: &Path,
        config: Config,
        ttl_seconds: i64,
        push_hook: Option<PushHook>,
    ) -> Result<Supervisor, NodeError> {
        fs::create_dir_all(data_dir)?;

        let store = Arc::new(Store::open(&data_dir.join("db.sqlite3"))?);

        let now = unix_now();
        for peer in bootstrap::load(&data_dir.join("bootstrap.list")) {
            if let Err(e) = store.add_peer(&peer.address, peer.port, now) {
                log::debug!("bootstrap peer {}:{} already known: {e}", peer.address, peer.port);
            }
        }

        let keystore = Arc::new(KeyStore::open(data_dir)?);
        log::info!("node id: {}", keystore.public_key_hex());

        let cert = tls::generate_self_signed(vec!["localhost".to_string()]).map_err(NodeError::Tls)?;
        let server_tls = tls::server_config(&cert).map_err(NodeError::Tls)?;
        let client_tls = tls::client_config();

        let (sender, sender_thread) = Sender::spawn(
            client_tls,
            keystore.private_key().clone(),
            keystore.public_key_hex().to_string(),
        );

        let bind_addr = SocketAddr::new(IpAddr::V4(config.server_address), config.server_port);
        let listener = Arc::new(Listener::new(bind_addr));
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();

        let listener_for_thread = listener.clone();
        let listener_thread = thread::spawn(move || {
            if let Err(e) = listener_for_thread.run(server_tls, inbound_tx) {
                log::error!("listener stopped: {e}");
            }
        });

        let mut dispatcher = Dispatcher::new(
            keystore.private_key().clone(),
            store.clone(),
            sender.clone(),
            Arc::new(SystemClock),
            inbound_rx,
            ttl_seconds,
            config.server_port,
        );
        if let Some(hook) = push_hook {
            dispatcher = dispatcher.with_push_hook(hook);
        }
        let dispatcher_thread = thread::spawn(move || dispatcher.run());

        let presenter = Presenter::new(
            store.clone(),
            sender.clone(),
            keystore.public_key_hex().to_string(),
            config.server_port,
        );

        let known_peers: Vec<PeerAddr> = store
            .list_peers()?
            .into_iter()
            .map(|p| PeerAddr {
                address: p.address,
                port: p.port,
            })
            .collect();
        sender.request_offline_data(known_peers, config.server_port);

        Ok(Supervisor {
            store,
            keystore,
            sender,
            listener,
            presenter,
            ttl_seconds,
            sender_thread: Some(sender_thread),
            listener_thread: Some(listener_thread),
            dispatcher_thread: Some(dispatcher_thread),
        })
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Stop workers in order Sender, Listener, Dispatcher, then sweep
    /// expired Store rows (spec §4.9).
    pub fn shutdown(mut self) {
        self.sender.terminate();
        if let Some(handle) = self.sender_thread.take() {
            let _ = handle.join();
        }

        self.listener.shutdown();
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }

        // The Dispatcher's inbound channel closes once the Listener's
        // accept loop and every in-flight connection handler have
        // finished, which `run()` above already waited for.
        if let Some(handle) = self.dispatcher_thread.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.store.sweep_expired(unix_now(), self.ttl_seconds) {
            log::warn!("expiry sweep failed: {e}");
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
