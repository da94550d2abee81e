//! The UI boundary (spec §1, §4.8, §6). The browser UI itself is an
//! external collaborator this crate never serves; this module is the whole
//! surface it talks to — the view types the Presenter returns, and the
//! push-notification hook the Dispatcher calls whenever a freshly stored
//! inbound message arrives (spec §6 `push_message`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One message as shown in a dialog (spec §4.8 `list_dialogs`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub text: String,
    pub to_me: bool,
    pub sender_timestamp: i64,
    pub timestamp: i64,
}

/// A Node plus its message history, the shape `list_dialogs` returns for
/// every known contact (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogView {
    pub node_id: String,
    pub last_activity: i64,
    pub unread_count: i64,
    pub alias: String,
    pub messages: Vec<MessageView>,
}

/// `push_message` (spec §6): a Message dict flattened with its Node dict,
/// pushed to the UI the moment an inbound ciphergram is decrypted and
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub node_id: String,
    pub alias: String,
    pub text: String,
    pub to_me: bool,
    pub sender_timestamp: i64,
    pub timestamp: i64,
}

/// The callback type an external UI adapter installs on the Dispatcher to
/// receive [`PushNotification`]s as they happen.
pub type PushHook = Arc<dyn Fn(PushNotification) + Send + Sync>;
