//! The Store (spec §3, §4.4): durable state for known nodes, exchanged
//! messages, cached ciphergrams awaiting delivery, and reachable peer
//! addresses. Grounded in `original_source/securetalks/storage.py`'s
//! `Nodes`/`Messages`/`Ciphergrams`/`IPAddresses` classes, adapted to
//! `rusqlite` with WAL journaling the way the teacher's `Database` wraps a
//! single `Mutex<Connection>`.
//!
//! Two schema corrections from the original are applied here (see
//! `DESIGN.md`): the `Nodes` table carries `alias`, which the Python schema
//! omitted even though the in-memory dataclass had one; and `Messages`
//! uniqueness is the tuple `(node_id, text, to_me, sender_timestamp)`, not a
//! bare `node_id` primary key, which would have made a second message in any
//! dialog impossible to store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::StoreError;

/// A known conversation partner (spec §3 `Node`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: String,
    pub alias: Option<String>,
    pub unread_count: i64,
    pub last_activity: i64,
}

/// One stored message, sent or received (spec §3 `Message`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub node_id: String,
    pub text: String,
    pub to_me: bool,
    pub sender_timestamp: i64,
    pub received_at: i64,
}

/// A cached, still-encrypted envelope (spec §3 `Ciphergram`). Nothing in an
/// envelope reveals its intended recipient (the cipherkey is wrapped with
/// RSA-OAEP, not tagged) — a node caches every ciphergram it sees and
/// offers all of them, non-expired, to anyone asking for offline data.
/// `content` is the JSON-serialized envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCiphergram {
    pub id: i64,
    pub content: String,
    pub timestamp: i64,
}

/// A known-reachable peer address (spec §3 `Peer`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPeer {
    pub address: String,
    pub port: u16,
    pub last_seen: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Store, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Store, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                node_id       TEXT PRIMARY KEY,
                alias         TEXT,
                unread_count  INTEGER NOT NULL DEFAULT 0,
                last_activity INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id           TEXT NOT NULL,
                text              TEXT NOT NULL,
                to_me             INTEGER NOT NULL,
                sender_timestamp  INTEGER NOT NULL,
                received_at       INTEGER NOT NULL,
                UNIQUE(node_id, text, to_me, sender_timestamp)
            );
            CREATE TABLE IF NOT EXISTS ciphergrams (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                content       TEXT NOT NULL UNIQUE,
                timestamp     INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS peers (
                address   TEXT NOT NULL,
                port      INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                PRIMARY KEY (address, port)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_node_id ON messages(node_id);",
        )?;
        Ok(())
    }

    // ---- Nodes -----------------------------------------------------

    pub fn add_node(&self, node_id: &str, last_activity: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO nodes (node_id, alias, unread_count, last_activity) VALUES (?1, NULL, 0, ?2)",
            params![node_id, last_activity],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::NodeAlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn node_exists(&self, node_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT 1 FROM nodes WHERE node_id = ?1",
                params![node_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    pub fn get_node(&self, node_id: &str) -> Result<Node, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT node_id, alias, unread_count, last_activity FROM nodes WHERE node_id = ?1",
            params![node_id],
            row_to_node,
        )
        .optional()?
        .ok_or(StoreError::NodeNotFound)
    }

    /// `list_all_by_activity_desc` (spec §4.4): every known node, most
    /// recently active first.
    pub fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT node_id, alias, unread_count, last_activity FROM nodes
             ORDER BY last_activity DESC",
        )?;
        let rows = stmt.query_map([], row_to_node)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// `update_activity` (spec §4.4): bump a node's `last_activity` to
    /// `now`, called on every inbound or outbound message so dialogs sort
    /// by recency (spec §8 scenario S1).
    pub fn touch_node_activity(&self, node_id: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE nodes SET last_activity = ?1 WHERE node_id = ?2",
            params![now, node_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NodeNotFound);
        }
        Ok(())
    }

    pub fn delete_node(&self, node_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM nodes WHERE node_id = ?1", params![node_id])?;
        if changed == 0 {
            return Err(StoreError::NodeNotFound);
        }
        Ok(())
    }

    pub fn set_alias(&self, node_id: &str, alias: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE nodes SET alias = ?1 WHERE node_id = ?2",
            params![alias, node_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NodeNotFound);
        }
        Ok(())
    }

    pub fn increment_unread(&self, node_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE nodes SET unread_count = unread_count + 1 WHERE node_id = ?1",
            params![node_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NodeNotFound);
        }
        Ok(())
    }

    pub fn clear_unread(&self, node_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE nodes SET unread_count = 0 WHERE node_id = ?1",
            params![node_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NodeNotFound);
        }
        Ok(())
    }

    // ---- Messages ----------------------------------------------------

    pub fn add_message(
        &self,
        node_id: &str,
        text: &str,
        to_me: bool,
        sender_timestamp: i64,
        received_at: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO messages (node_id, text, to_me, sender_timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![node_id, text, to_me as i64, sender_timestamp, received_at],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::MessageAlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_messages(&self, node_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        self.list_messages_page(node_id, None, None)
    }

    /// `Messages.get_by_node(limit?, offset?)` (spec §4.4): ordered by
    /// `sender_timestamp` ascending, the originator's wall clock rather
    /// than local receive time, so a dialog replays in the order it was
    /// authored even if offline delivery reorders arrival.
    pub fn list_messages_page(
        &self,
        node_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, node_id, text, to_me, sender_timestamp, received_at
             FROM messages WHERE node_id = ?1 ORDER BY sender_timestamp ASC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![node_id, limit.unwrap_or(-1), offset.unwrap_or(0)],
            row_to_message,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn message_exists(
        &self,
        node_id: &str,
        text: &str,
        to_me: bool,
        sender_timestamp: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT 1 FROM messages
                 WHERE node_id = ?1 AND text = ?2 AND to_me = ?3 AND sender_timestamp = ?4",
                params![node_id, text, to_me as i64, sender_timestamp],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    /// Delete every message in a dialog (spec §4.8 `delete_dialog`).
    pub fn delete_messages_by_node(&self, node_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE node_id = ?1", params![node_id])?;
        Ok(())
    }

    // ---- Ciphergrams ---------------------------------------------------

    pub fn add_ciphergram(&self, content: &str, timestamp: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO ciphergrams (content, timestamp) VALUES (?1, ?2)",
            params![content, timestamp],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::CiphergramAlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn ciphergram_exists(&self, content: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT 1 FROM ciphergrams WHERE content = ?1",
                params![content],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    pub fn list_all_ciphergrams(&self) -> Result<Vec<StoredCiphergram>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, content, timestamp FROM ciphergrams ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], row_to_ciphergram)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Delete every ciphergram older than `min_timestamp` (spec §4.4 TTL
    /// expiry). Returns the number of rows removed.
    pub fn expire_ciphergrams_before(&self, min_timestamp: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM ciphergrams WHERE timestamp < ?1",
            params![min_timestamp],
        )?;
        Ok(changed)
    }

    // ---- Peers -------------------------------------------------------

    pub fn add_peer(&self, address: &str, port: u16, last_seen: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO peers (address, port, last_seen) VALUES (?1, ?2, ?3)",
            params![address, port, last_seen],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::IpAddressAlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn touch_peer(&self, address: &str, port: u16, last_seen: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE peers SET last_seen = ?1 WHERE address = ?2 AND port = ?3",
            params![last_seen, address, port],
        )?;
        if changed == 0 {
            return Err(StoreError::IpAddressNotFound);
        }
        Ok(())
    }

    pub fn peer_exists(&self, address: &str, port: u16) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT 1 FROM peers WHERE address = ?1 AND port = ?2",
                params![address, port],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    pub fn list_peers(&self) -> Result<Vec<StoredPeer>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT address, port, last_seen FROM peers")?;
        let rows = stmt.query_map([], row_to_peer)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn delete_peer(&self, address: &str, port: u16) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM peers WHERE address = ?1 AND port = ?2",
            params![address, port],
        )?;
        if changed == 0 {
            return Err(StoreError::IpAddressNotFound);
        }
        Ok(())
    }

    /// Delete every peer whose `last_seen` predates `min_last_seen` (spec
    /// §4.4 TTL expiry). Returns the number of rows removed.
    pub fn expire_peers_before(&self, min_last_seen: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM peers WHERE last_seen < ?1",
            params![min_last_seen],
        )?;
        Ok(changed)
    }

    /// `Store.sweep_expired()` (spec §4.4, §4.9): delete ciphergrams and
    /// peers older than `ttl_seconds` relative to `now`. Messages and nodes
    /// are never touched here — spec §3 invariant (d) keeps message history
    /// until an explicit dialog deletion.
    pub fn sweep_expired(&self, now: i64, ttl_seconds: i64) -> Result<(), StoreError> {
        let cutoff = now - ttl_seconds;
        self.expire_ciphergrams_before(cutoff)?;
        self.expire_peers_before(cutoff)?;
        Ok(())
    }
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    Ok(Node {
        node_id: row.get(0)?,
        alias: row.get(1)?,
        unread_count: row.get(2)?,
        last_activity: row.get(3)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        node_id: row.get(1)?,
        text: row.get(2)?,
        to_me: row.get::<_, i64>(3)? != 0,
        sender_timestamp: row.get(4)?,
        received_at: row.get(5)?,
    })
}

fn row_to_ciphergram(row: &rusqlite::Row) -> rusqlite::Result<StoredCiphergram> {
    Ok(StoredCiphergram {
        id: row.get(0)?,
        content: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

fn row_to_peer(row: &rusqlite::Row) -> rusqlite::Result<StoredPeer> {
    Ok(StoredPeer {
        address: row.get(0)?,
        port: row.get::<_, i64>(1)? as u16,
        last_seen: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        store.add_node("node-a", 100).unwrap();
        assert!(store.node_exists("node-a").unwrap());
        assert_eq!(store.add_node("node-a", 100).unwrap_err(), StoreError::NodeAlreadyExists);

        store.set_alias("node-a", "Alice").unwrap();
        let node = store.get_node("node-a").unwrap();
        assert_eq!(node.alias.as_deref(), Some("Alice"));

        store.increment_unread("node-a").unwrap();
        store.increment_unread("node-a").unwrap();
        assert_eq!(store.get_node("node-a").unwrap().unread_count, 2);
        store.clear_unread("node-a").unwrap();
        assert_eq!(store.get_node("node-a").unwrap().unread_count, 0);

        store.delete_node("node-a").unwrap();
        assert!(!store.node_exists("node-a").unwrap());
    }

    #[test]
    fn touch_node_activity_bumps_ordering() {
        let store = Store::open_in_memory().unwrap();
        store.add_node("older", 100).unwrap();
        store.add_node("newer", 200).unwrap();
        assert_eq!(store.list_nodes().unwrap()[0].node_id, "newer");

        store.touch_node_activity("older", 500).unwrap();
        let nodes = store.list_nodes().unwrap();
        assert_eq!(nodes[0].node_id, "older");
        assert_eq!(nodes[0].last_activity, 500);

        assert_eq!(
            store.touch_node_activity("missing", 1).unwrap_err(),
            StoreError::NodeNotFound
        );
    }

    #[test]
    fn messages_allow_multiple_per_dialog() {
        let store = Store::open_in_memory().unwrap();
        store.add_message("node-a", "hi", false, 1, 1).unwrap();
        store.add_message("node-a", "hi again", false, 2, 2).unwrap();
        let messages = store.list_messages("node-a").unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn duplicate_message_tuple_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.add_message("node-a", "hi", false, 1, 1).unwrap();
        let err = store.add_message("node-a", "hi", false, 1, 1).unwrap_err();
        assert_eq!(err, StoreError::MessageAlreadyExists);
    }

    #[test]
    fn ciphergram_expiry_sweep() {
        let store = Store::open_in_memory().unwrap();
        store.add_ciphergram("payload-1", 10).unwrap();
        store.add_ciphergram("payload-2", 200).unwrap();
        let removed = store.expire_ciphergrams_before(100).unwrap();
        assert_eq!(removed, 1);
        let remaining = store.list_all_ciphergrams().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "payload-2");
    }

    #[test]
    fn duplicate_ciphergram_content_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.add_ciphergram("payload-1", 10).unwrap();
        let err = store.add_ciphergram("payload-1", 20).unwrap_err();
        assert_eq!(err, StoreError::CiphergramAlreadyExists);
    }

    #[test]
    fn peer_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        store.add_peer("1.2.3.4", 9001, 10).unwrap();
        store.touch_peer("1.2.3.4", 9001, 20).unwrap();
        let peers = store.list_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].last_seen, 20);
        store.delete_peer("1.2.3.4", 9001).unwrap();
        assert!(store.list_peers().unwrap().is_empty());
    }

    #[test]
    fn message_pagination_honours_limit_and_offset() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store.add_message("node-a", &format!("m{i}"), false, i, i).unwrap();
        }
        let page = store.list_messages_page("node-a", Some(2), Some(1)).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].text, "m1");
        assert_eq!(page[1].text, "m2");
    }

    #[test]
    fn message_exists_matches_the_uniqueness_tuple() {
        let store = Store::open_in_memory().unwrap();
        store.add_message("node-a", "hi", false, 1, 1).unwrap();
        assert!(store.message_exists("node-a", "hi", false, 1).unwrap());
        assert!(!store.message_exists("node-a", "hi", true, 1).unwrap());
    }

    #[test]
    fn delete_messages_by_node_clears_a_dialog() {
        let store = Store::open_in_memory().unwrap();
        store.add_message("node-a", "hi", false, 1, 1).unwrap();
        store.delete_messages_by_node("node-a").unwrap();
        assert!(store.list_messages("node-a").unwrap().is_empty());
    }

    #[test]
    fn sweep_expired_removes_stale_ciphergrams_and_peers_but_keeps_messages() {
        let store = Store::open_in_memory().unwrap();
        store.add_ciphergram("stale", 10).unwrap();
        store.add_ciphergram("fresh", 990).unwrap();
        store.add_peer("1.2.3.4", 9001, 10).unwrap();
        store.add_peer("5.6.7.8", 9001, 990).unwrap();
        store.add_message("node-a", "kept forever", false, 10, 10).unwrap();

        store.sweep_expired(1000, 100).unwrap();

        let ciphergrams = store.list_all_ciphergrams().unwrap();
        assert_eq!(ciphergrams.len(), 1);
        assert_eq!(ciphergrams[0].content, "fresh");

        let peers = store.list_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "5.6.7.8");

        assert_eq!(store.list_messages("node-a").unwrap().len(), 1);
    }
}
