use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use gshare_core::entities::Reject;
use gshare_core::frame::{recv_text, send_text};

use crate::registry::{Registry, UploadMeta};
use crate::store::Store;
use crate::sync;
use crate::LOGGER;

/// One tracker process: the registry behind its mutex, the snapshot
/// store, and the configured cluster. The mutex is held across
/// validation, mutation and snapshot write; replication reads only the
/// serialized command string and runs outside of it.
pub struct Tracker {
    pub registry: Mutex<Registry>,
    pub store: Store,
    pub trackers: Vec<String>,
    pub self_idx: usize,
}

impl Tracker {
    pub fn new(trackers: Vec<String>, self_idx: usize, store: Store) -> std::io::Result<Arc<Self>> {
        let registry = store.load()?;
        Ok(Arc::new(Self {
            registry: Mutex::new(registry),
            store,
            trackers,
            self_idx,
        }))
    }

    fn persist(&self, reg: &Registry) {
        if let Err(e) = self.store.save(reg) {
            LOGGER.error(format!("snapshot failed: {e}"));
        }
    }

    fn broadcast(&self, cmd: String) {
        sync::broadcast(&self.trackers, self.self_idx, cmd);
    }
}

/// Serve framed commands on one connection until the client closes it or
/// sends an empty frame.
pub fn serve_client(mut stream: TcpStream, tracker: Arc<Tracker>) {
    loop {
        let msg = match recv_text(&mut stream) {
            Ok(m) => m,
            Err(_) => break,
        };
        if msg.is_empty() {
            break;
        }
        let reply = handle_command(&tracker, &msg);
        if send_text(&mut stream, &reply).is_err() {
            break;
        }
    }
}

/// Accept loop: one worker thread per inbound connection.
pub fn run_accept_loop(listener: TcpListener, tracker: Arc<Tracker>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let tracker = tracker.clone();
                thread::spawn(move || serve_client(stream, tracker));
            }
            Err(e) => LOGGER.error(format!("accept failed: {e}")),
        }
    }
}

/// Dispatch one command line and produce the reply. Mutating verbs
/// persist before replying and broadcast after.
pub fn handle_command(tracker: &Tracker, line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&verb) = tokens.first() else {
        return Reject::UnknownCmd.to_string();
    };

    match (verb, tokens.len()) {
        ("REGISTER", 3) => {
            let mut reg = tracker.registry.lock().unwrap();
            match reg.register(tokens[1], tokens[2]) {
                Ok(()) => {
                    tracker.persist(&reg);
                    drop(reg);
                    tracker.broadcast(format!("REGISTER {} {}", tokens[1], tokens[2]));
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("LOGIN", 3) => {
            let mut reg = tracker.registry.lock().unwrap();
            match reg.login(tokens[1], tokens[2]) {
                Ok(()) => {
                    tracker.persist(&reg);
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("CREATE_GROUP", 3) => {
            let mut reg = tracker.registry.lock().unwrap();
            match reg.create_group(tokens[1], tokens[2]) {
                Ok(()) => {
                    tracker.persist(&reg);
                    drop(reg);
                    tracker.broadcast(format!("CREATE_GROUP {} {}", tokens[1], tokens[2]));
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("JOIN_GROUP", 3) => {
            let mut reg = tracker.registry.lock().unwrap();
            match reg.join_group(tokens[1], tokens[2]) {
                Ok(()) => {
                    tracker.persist(&reg);
                    drop(reg);
                    tracker.broadcast(format!("JOIN_GROUP {} {}", tokens[1], tokens[2]));
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("LIST_GROUPS", 1) => tracker.registry.lock().unwrap().list_groups(),
        ("LIST_REQUESTS", 3) => {
            let reg = tracker.registry.lock().unwrap();
            match reg.list_requests(tokens[1], tokens[2]) {
                Ok(out) => out,
                Err(rej) => rej.to_string(),
            }
        }
        ("ACCEPT_REQUEST", 4) => {
            let mut reg = tracker.registry.lock().unwrap();
            match reg.accept_request(tokens[1], tokens[2], tokens[3]) {
                Ok(()) => {
                    tracker.persist(&reg);
                    drop(reg);
                    // owner is session context, not part of the mutation
                    tracker.broadcast(format!("ACCEPT_REQUEST {} {}", tokens[1], tokens[2]));
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("LEAVE_GROUP", 3) => {
            let mut reg = tracker.registry.lock().unwrap();
            match reg.leave_group(tokens[1], tokens[2]) {
                Ok(()) => {
                    tracker.persist(&reg);
                    drop(reg);
                    tracker.broadcast(format!("LEAVE_GROUP {} {}", tokens[1], tokens[2]));
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("LIST_FILES", 3) => {
            let reg = tracker.registry.lock().unwrap();
            match reg.list_files(tokens[1], tokens[2]) {
                Ok(out) => out,
                Err(rej) => rej.to_string(),
            }
        }
        ("UPLOAD_META", n) if n >= 8 => {
            let Some(meta) = UploadMeta::parse(&tokens[1..]) else {
                return Reject::PieceCountMismatch.to_string();
            };
            let body = meta.render();
            let mut reg = tracker.registry.lock().unwrap();
            match reg.upload_meta(meta) {
                Ok(()) => {
                    tracker.persist(&reg);
                    drop(reg);
                    tracker.broadcast(format!("UPLOAD_META {body}"));
                    "OK".to_string()
                }
                Err(rej) => rej.to_string(),
            }
        }
        ("GET_FILE_PEERS", 4) => {
            let reg = tracker.registry.lock().unwrap();
            match reg.get_file_peers(tokens[1], tokens[2], tokens[3]) {
                Ok(manifest) => manifest.render(),
                Err(rej) => rej.to_string(),
            }
        }
        ("ADD_PEER", 4) => {
            let mut reg = tracker.registry.lock().unwrap();
            reg.add_peer(tokens[1], tokens[2], tokens[3]);
            tracker.persist(&reg);
            drop(reg);
            tracker.broadcast(format!("ADD_PEER {} {} {}", tokens[1], tokens[2], tokens[3]));
            "OK".to_string()
        }
        ("STOP_SHARE", 4) => {
            let mut reg = tracker.registry.lock().unwrap();
            reg.stop_share(tokens[1], tokens[2], tokens[3]);
            tracker.persist(&reg);
            drop(reg);
            tracker.broadcast(format!("STOP_SHARE {} {} {}", tokens[1], tokens[2], tokens[3]));
            "OK".to_string()
        }
        ("SYNC", n) if n >= 2 => {
            let inner = line
                .trim_start()
                .splitn(2, char::is_whitespace)
                .nth(1)
                .unwrap_or("");
            let mut reg = tracker.registry.lock().unwrap();
            sync::apply_sync(&mut reg, inner);
            tracker.persist(&reg);
            "OK".to_string()
        }
        _ => Reject::UnknownCmd.to_string(),
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    fn test_tracker() -> (Arc<Tracker>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at(dir.path().to_path_buf());
        // the second endpoint is unreachable on purpose; broadcasts to it
        // must be dropped without affecting replies
        let tracker = Tracker::new(
            vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()],
            0,
            store,
        )
        .unwrap();
        (tracker, dir)
    }

    #[test]
    fn test_register_and_login_law() {
        let (t, _dir) = test_tracker();
        assert_eq!(handle_command(&t, "REGISTER u p"), "OK");
        assert_eq!(handle_command(&t, "LOGIN u p"), "OK");
        assert_eq!(handle_command(&t, "REGISTER u p2"), "ERR user_exists");
        assert_eq!(handle_command(&t, "LOGIN u wrong"), "ERR wrong_password");
        assert_eq!(handle_command(&t, "LOGIN ghost p"), "ERR user_not_found");
    }

    #[test]
    fn test_group_flow_law() {
        let (t, _dir) = test_tracker();
        handle_command(&t, "REGISTER u p");
        handle_command(&t, "REGISTER v p");
        assert_eq!(handle_command(&t, "CREATE_GROUP u g"), "OK");
        assert_eq!(handle_command(&t, "JOIN_GROUP v g"), "OK");
        assert_eq!(handle_command(&t, "LIST_REQUESTS g u"), "v\n");
        assert_eq!(handle_command(&t, "ACCEPT_REQUEST g v u"), "OK");
        assert_eq!(handle_command(&t, "LIST_FILES g v"), "");
        assert_eq!(handle_command(&t, "LIST_GROUPS"), "g\n");
    }

    #[test]
    fn test_upload_and_manifest() {
        let (t, _dir) = test_tracker();
        handle_command(&t, "REGISTER u p");
        handle_command(&t, "CREATE_GROUP u g");
        let cmd = format!(
            "UPLOAD_META g data.bin 600000 2 {} 127.0.0.1:20001 u {} {}",
            "f".repeat(40),
            "a".repeat(40),
            "b".repeat(40)
        );
        assert_eq!(handle_command(&t, &cmd), "OK");

        let reply = handle_command(&t, "GET_FILE_PEERS g data.bin u");
        assert!(reply.starts_with("600000 2\n"));
        assert!(reply.contains("PEERS\n127.0.0.1:20001\n"));

        assert_eq!(
            handle_command(&t, "GET_FILE_PEERS g nope u"),
            "ERR no_file"
        );
    }

    #[test]
    fn test_piece_count_mismatch() {
        let (t, _dir) = test_tracker();
        handle_command(&t, "REGISTER u p");
        handle_command(&t, "CREATE_GROUP u g");
        let cmd = format!(
            "UPLOAD_META g data.bin 600000 2 {} 127.0.0.1:20001 u {}",
            "f".repeat(40),
            "a".repeat(40)
        );
        assert_eq!(handle_command(&t, &cmd), "ERR piece_count_mismatch");
    }

    #[test]
    fn test_sync_applies_without_rebroadcast() {
        let (t, _dir) = test_tracker();
        assert_eq!(handle_command(&t, "SYNC REGISTER alice pw"), "OK");
        assert_eq!(handle_command(&t, "LOGIN alice pw"), "OK");
    }

    #[test]
    fn test_unknown_verb() {
        let (t, _dir) = test_tracker();
        assert_eq!(handle_command(&t, "NOPE a b"), "ERR unknown_cmd");
    }

    #[test]
    fn test_serve_client_over_socket() {
        let (t, _dir) = test_tracker();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let t2 = t.clone();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_client(stream, t2);
        });

        let mut c = TcpStream::connect(addr).unwrap();
        send_text(&mut c, "REGISTER alice pw").unwrap();
        assert_eq!(recv_text(&mut c).unwrap(), "OK");
        // several sequential requests ride the same connection
        send_text(&mut c, "LOGIN alice pw").unwrap();
        assert_eq!(recv_text(&mut c).unwrap(), "OK");
        // an empty frame ends the session
        send_text(&mut c, "").unwrap();
        assert!(recv_text(&mut c).is_err());
    }

    #[test]
    fn test_stop_share_drops_record_everywhere_it_matters() {
        let (t, _dir) = test_tracker();
        handle_command(&t, "REGISTER u p");
        handle_command(&t, "CREATE_GROUP u g");
        let cmd = format!(
            "UPLOAD_META g f 100 1 {} p:1 u {}",
            "f".repeat(40),
            "a".repeat(40)
        );
        handle_command(&t, &cmd);
        assert_eq!(handle_command(&t, "ADD_PEER g f p:2"), "OK");
        assert_eq!(handle_command(&t, "STOP_SHARE g f p:1"), "OK");
        assert_eq!(handle_command(&t, "STOP_SHARE g f p:2"), "OK");
        assert_eq!(handle_command(&t, "GET_FILE_PEERS g f u"), "ERR no_file");
    }
}
