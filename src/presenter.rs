//! The Presenter (spec §4.8): a stateless adapter over the Store, Sender,
//! and KeyStore that is the entire surface an external UI needs. Grounded
//! in `original_source/securetalks/presentor.py`'s `Presentor`
//! (`get_dialogs`/`send_message`/`add_dialog`/`delete_dialog`/
//! `mark_dialog_as_read`/`set_dialog_alias`/`get_my_id`).

use std::sync::Arc;

use crate::sender::Sender;
use crate::store::Store;
use crate::ui::{DialogView, MessageView};
use crate::wire::PeerAddr;

pub struct Presenter {
    store: Arc<Store>,
    sender: Sender,
    my_id: String,
    server_port: u16,
}

impl Presenter {
    pub fn new(store: Arc<Store>, sender: Sender, my_id: String, server_port: u16) -> Presenter {
        Presenter {
            store,
            sender,
            my_id,
            server_port,
        }
    }

    /// `list_dialogs` (spec §4.8): every known Node with its message
    /// history, most recently active first. `Store::list_nodes` already
    /// orders by `last_activity` descending.
    pub fn list_dialogs(&self) -> Vec<DialogView> {
        let nodes = match self.store.list_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                log::warn!("store error listing nodes: {e}");
                return Vec::new();
            }
        };

        nodes
            .into_iter()
            .map(|node| {
                let messages = self
                    .store
                    .list_messages(&node.node_id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| MessageView {
                        text: m.text,
                        to_me: m.to_me,
                        sender_timestamp: m.sender_timestamp,
                        timestamp: m.received_at,
                    })
                    .collect();
                DialogView {
                    node_id: node.node_id,
                    last_activity: node.last_activity,
                    unread_count: node.unread_count,
                    alias: node.alias.unwrap_or_default(),
                    messages,
                }
            })
            .collect()
    }

    /// `send_message` (spec §4.8): silently drops if `node_id` is not a
    /// known dialog — a user cannot message someone they have not added.
    pub fn send_message(&self, node_id: &str, text: &str) {
        if self.store.get_node(node_id).is_err() {
            log::debug!("dropping send_message to unknown dialog {node_id}");
            return;
        }
        let now = unix_now();
        if let Err(e) = self.store.add_message(node_id, text, false, now, now) {
            log::debug!("not re-storing duplicate outbound message: {e}");
        }
        let _ = self.store.touch_node_activity(node_id, now);

        let peers = self.peer_addrs();
        self.sender
            .send_user_message(peers, self.server_port, node_id.to_string(), text.to_string());
    }

    /// `add_dialog` (spec §4.8): idempotent — an existing node is left
    /// alone rather than surfacing `NodeAlreadyExists` to the UI.
    pub fn add_dialog(&self, node_id: &str, alias: &str) {
        match self.store.add_node(node_id, unix_now()) {
            Ok(()) => {
                if !alias.is_empty() {
                    let _ = self.store.set_alias(node_id, alias);
                }
            }
            Err(e) => log::debug!("add_dialog no-op for {node_id}: {e}"),
        }
    }

    /// `delete_dialog` (spec §4.8): also deletes the dialog's messages.
    pub fn delete_dialog(&self, node_id: &str) {
        let _ = self.store.delete_messages_by_node(node_id);
        if let Err(e) = self.store.delete_node(node_id) {
            log::debug!("delete_dialog no-op for {node_id}: {e}");
        }
    }

    /// `make_dialog_read`/`mark_read` (spec §4.8, §6).
    pub fn mark_read(&self, node_id: &str) {
        if let Err(e) = self.store.clear_unread(node_id) {
            log::debug!("mark_read no-op for {node_id}: {e}");
        }
    }

    /// `set_alias` (spec §4.8): implemented as `UPDATE`, not
    /// delete-then-re-add — re-adding would reset `unread_count` and
    /// `last_activity`, which spec §3 invariant (e) forbids for
    /// `unread_count`.
    pub fn set_alias(&self, node_id: &str, alias: &str) {
        if let Err(e) = self.store.set_alias(node_id, alias) {
            log::debug!("set_alias no-op for {node_id}: {e}");
        }
    }

    /// `get_my_id` (spec §4.8, §6): the canonical node-id hex string.
    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    fn peer_addrs(&self) -> Vec<PeerAddr> {
        self.store
            .list_peers()
            .unwrap_or_default()
            .into_iter()
            .map(|p| PeerAddr {
                address: p.address,
                port: p.port,
            })
            .collect()
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
