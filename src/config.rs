//! `config.txt` loading (spec §6). Out of core scope as a feature — the
//! node never fails to start over a bad config file, it falls back to
//! defaults section by section.

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

const DEFAULT_SERVER_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
const DEFAULT_SERVER_PORT: u16 = 8001;
const DEFAULT_GUI_PORT: u16 = 8002;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_address: Ipv4Addr,
    pub server_port: u16,
    pub gui_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_address: DEFAULT_SERVER_ADDRESS,
            server_port: DEFAULT_SERVER_PORT,
            gui_port: DEFAULT_GUI_PORT,
        }
    }
}

impl Config {
    /// Load `config.txt` from `path`. Missing file or malformed values fall
    /// back to defaults; this never returns an error.
    pub fn load(path: &Path) -> Config {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Config::default(),
        };
        Config::parse(&text)
    }

    fn parse(text: &str) -> Config {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = line[1..line.len() - 1].trim().to_string();
                sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let mut config = Config::default();

        if let Some(server) = sections.get("Server") {
            if let Some(addr) = server.get("address").and_then(|v| v.parse().ok()) {
                config.server_address = addr;
            }
            if let Some(port) = server.get("port").and_then(|v| v.parse().ok()) {
                config.server_port = port;
            }
        }
        if let Some(gui) = sections.get("GUI") {
            if let Some(port) = gui.get("port").and_then(|v| v.parse().ok()) {
                config.gui_port = port;
            }
        }

        config
    }
}
