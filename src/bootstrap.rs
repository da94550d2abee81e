//! `bootstrap.list` loading (spec §4.9, §6): one `ip:port` per line,
//! unparsable lines skipped, duplicates tolerated (the Store de-dupes them).

use std::fs;
use std::path::Path;

use crate::wire::PeerAddr;

/// Parse a bootstrap file into a list of peer addresses. Missing file or
/// unparsable lines never fail the whole load — they are just skipped.
pub fn load(path: &Path) -> Vec<PeerAddr> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };
    parse(&text)
}

fn parse(text: &str) -> Vec<PeerAddr> {
    text.lines()
        .filter_map(|line| parse_line(line.trim()))
        .collect()
}

fn parse_line(line: &str) -> Option<PeerAddr> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (address, port) = line.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if address.is_empty() {
        return None;
    }
    Some(PeerAddr {
        address: address.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_lines() {
        let text = "1.2.3.4:9001\n5.6.7.8:9002\n";
        let peers = parse(text);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].address, "1.2.3.4");
        assert_eq!(peers[0].port, 9001);
    }

    #[test]
    fn skips_malformed_lines() {
        let text = "garbage\n1.2.3.4\n:9001\n1.2.3.4:notaport\n1.2.3.4:9001\n";
        let peers = parse(text);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "1.2.3.4");
    }

    #[test]
    fn tolerates_duplicates() {
        let text = "1.2.3.4:9001\n1.2.3.4:9001\n";
        let peers = parse(text);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn missing_file_yields_empty() {
        let peers = load(Path::new("/nonexistent/bootstrap.list"));
        assert!(peers.is_empty());
    }
}
