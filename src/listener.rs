//! The Listener (spec §4.5): accepts inbound TLS connections and forwards
//! whatever they send to the Dispatcher over a channel. Thread-per-
//! connection, the same shape as the discovery worker this crate's
//! concurrency model is grounded on, swapped from UDP broadcast to a TCP
//! accept loop.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender as ChannelSender;
use rustls::ServerConfig;

use crate::wire::{self, PeerAddr, WireMessage};

pub struct Listener {
    bind_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl Listener {
    pub fn new(bind_addr: SocketAddr) -> Listener {
        Listener {
            bind_addr,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Run the accept loop on the calling thread. Blocks until
    /// [`Listener::shutdown`] is called from another thread.
    pub fn run(
        &self,
        tls_config: Arc<ServerConfig>,
        inbound_tx: ChannelSender<(PeerAddr, WireMessage)>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)?;
        log::info!("listener bound to {}", self.bind_addr);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    let tls_config = tls_config.clone();
                    let inbound_tx = inbound_tx.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, peer_addr, tls_config, &inbound_tx)
                        {
                            log::warn!("connection from {peer_addr} dropped: {e}");
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {e}"),
            }
        }
        Ok(())
    }

    /// Stop the accept loop. Connects to our own bind address to unblock a
    /// thread parked in `accept()`.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = TcpStream::connect(self.bind_addr);
    }
}

fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_config: Arc<ServerConfig>,
    inbound_tx: &ChannelSender<(PeerAddr, WireMessage)>,
) -> std::io::Result<()> {
    let conn = rustls::ServerConnection::new(tls_config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let mut tls_stream = rustls::StreamOwned::new(conn, stream);

    let body = match wire::read_frame(&mut tls_stream)? {
        Some(body) => body,
        None => return Ok(()),
    };

    let message: WireMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("malformed message from {peer_addr}: {e}");
            return Ok(());
        }
    };

    let peer = PeerAddr {
        address: peer_addr.ip().to_string(),
        port: peer_addr.port(),
    };
    let _ = inbound_tx.send((peer, message));
    Ok(())
}
