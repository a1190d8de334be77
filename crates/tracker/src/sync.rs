use std::io;
use std::net::TcpStream;
use std::thread;

use gshare_config::SYNC_IO_TIMEOUT;
use gshare_core::frame::{recv_frame, send_text};
use gshare_core::helpers::resolve_endpoint;

use crate::registry::{Group, Registry, UploadMeta, User};
use crate::LOGGER;

/// Fan the already-serialized mutation out to every other tracker on a
/// detached thread. Fire-and-forget: failures are logged and dropped,
/// nothing is retried or acknowledged.
pub fn broadcast(trackers: &[String], self_idx: usize, cmd: String) {
    let trackers = trackers.to_vec();
    thread::spawn(move || {
        for (i, endpoint) in trackers.iter().enumerate() {
            if i == self_idx {
                continue;
            }
            match push_sync(endpoint, &cmd) {
                Ok(()) => LOGGER.debug(format!("synced to tracker {i}: {cmd}")),
                Err(e) => LOGGER.warn(format!("sync to tracker {i} ({endpoint}) failed: {e}")),
            }
        }
    });
}

fn push_sync(endpoint: &str, cmd: &str) -> io::Result<()> {
    let addr = resolve_endpoint(endpoint)?;
    let mut stream = TcpStream::connect_timeout(&addr, SYNC_IO_TIMEOUT)?;
    stream.set_write_timeout(Some(SYNC_IO_TIMEOUT))?;
    stream.set_read_timeout(Some(SYNC_IO_TIMEOUT))?;
    send_text(&mut stream, &format!("SYNC {cmd}"))?;
    // ack payload is irrelevant, only the roundtrip matters
    recv_frame(&mut stream)?;
    Ok(())
}

/// Apply one replicated mutation. Replicas arrive in no particular order,
/// so application is lenient: missing context is tolerated instead of
/// rejected, and nothing is rebroadcast. Unknown verbs are dropped.
pub fn apply_sync(reg: &mut Registry, line: &str) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&verb) = tokens.first() else {
        return;
    };

    match (verb, tokens.len()) {
        ("REGISTER", 3) => {
            reg.users.insert(tokens[1].to_string(), User::new(tokens[2]));
        }
        ("CREATE_GROUP", 3) => {
            reg.groups.insert(tokens[2].to_string(), Group::new(tokens[1]));
        }
        ("JOIN_GROUP", 3) => {
            reg.push_request(tokens[2], tokens[1]);
        }
        ("ACCEPT_REQUEST", 3) => {
            if reg.take_request(tokens[1], tokens[2]) {
                if let Some(g) = reg.groups.get_mut(tokens[1]) {
                    g.members.insert(tokens[2].to_string());
                }
            }
        }
        ("LEAVE_GROUP", 3) => {
            reg.force_leave(tokens[1], tokens[2]);
        }
        ("ADD_PEER", 4) => {
            reg.add_peer(tokens[1], tokens[2], tokens[3]);
        }
        ("STOP_SHARE", 4) => {
            reg.stop_share(tokens[1], tokens[2], tokens[3]);
        }
        ("UPLOAD_META", n) if n >= 8 => match UploadMeta::parse(&tokens[1..]) {
            Some(meta) if meta.piece_hashes.len() == meta.npieces => reg.insert_file(meta),
            _ => LOGGER.warn("dropping malformed replicated upload"),
        },
        _ => {
            LOGGER.warn(format!("dropping unknown sync verb: {verb}"));
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_sync_register_overwrites() {
        let mut reg = Registry::default();
        apply_sync(&mut reg, "REGISTER alice pw");
        assert!(reg.users.contains_key("alice"));
        apply_sync(&mut reg, "REGISTER alice other");
        assert_eq!(reg.users["alice"].pass, "other");
    }

    #[test]
    fn test_sync_join_without_group_is_kept() {
        // CREATE_GROUP may arrive after JOIN_GROUP; the request is queued
        // anyway so the late create does not lose it
        let mut reg = Registry::default();
        apply_sync(&mut reg, "JOIN_GROUP bob grp");
        apply_sync(&mut reg, "JOIN_GROUP bob grp");
        assert_eq!(reg.requests["grp"], vec!["bob".to_string()]);
    }

    #[test]
    fn test_sync_accept_promotes_member() {
        let mut reg = Registry::default();
        apply_sync(&mut reg, "CREATE_GROUP alice grp");
        apply_sync(&mut reg, "JOIN_GROUP bob grp");
        apply_sync(&mut reg, "ACCEPT_REQUEST grp bob");
        assert!(reg.is_member("bob", "grp"));
        assert!(reg.requests["grp"].is_empty());
    }

    #[test]
    fn test_sync_accept_without_request_is_noop() {
        let mut reg = Registry::default();
        apply_sync(&mut reg, "CREATE_GROUP alice grp");
        apply_sync(&mut reg, "ACCEPT_REQUEST grp bob");
        assert!(!reg.is_member("bob", "grp"));
    }

    #[test]
    fn test_sync_leave_cascades() {
        let mut reg = Registry::default();
        apply_sync(&mut reg, "CREATE_GROUP alice grp");
        apply_sync(&mut reg, "LEAVE_GROUP alice grp");
        assert!(!reg.groups.contains_key("grp"));
    }

    #[test]
    fn test_sync_upload_meta() {
        let mut reg = Registry::default();
        let line = format!(
            "UPLOAD_META grp data.bin 600000 2 {} 127.0.0.1:20001 bob {} {}",
            "f".repeat(40),
            "a".repeat(40),
            "b".repeat(40)
        );
        apply_sync(&mut reg, &line);
        let rec = &reg.files[&("grp".to_string(), "data.bin".to_string())];
        assert_eq!(rec.owner, "bob");
        assert!(rec.peers.contains("127.0.0.1:20001"));
    }

    #[test]
    fn test_sync_unknown_verb_is_dropped() {
        let mut reg = Registry::default();
        apply_sync(&mut reg, "FROBNICATE everything now");
        assert_eq!(reg, Registry::default());
    }

    #[test]
    fn test_sync_add_and_stop_share() {
        let mut reg = Registry::default();
        let line = format!(
            "UPLOAD_META grp f 100 1 {} p:1 bob {}",
            "f".repeat(40),
            "a".repeat(40)
        );
        apply_sync(&mut reg, &line);
        apply_sync(&mut reg, "ADD_PEER grp f p:2");
        apply_sync(&mut reg, "STOP_SHARE grp f p:1");
        apply_sync(&mut reg, "STOP_SHARE grp f p:2");
        assert!(reg.files.is_empty());
    }
}
