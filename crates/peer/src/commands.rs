use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use gshare_config::advertised_host;
use gshare_core::entities::FileManifest;
use gshare_core::hash::digest_file;

use crate::download::{new_downloads, run_download_job, DownloadJob, Downloads};
use crate::entities::DownloadStatus;
use crate::serve::{new_shared_files, SharedFiles};
use crate::session::TrackerSession;

/// REPL state of one peer process: the tracker session, the logged-in
/// identity, and the two process-local tables.
pub struct Peer {
    pub session: Arc<Mutex<TrackerSession>>,
    pub shared: SharedFiles,
    pub downloads: Downloads,
    pub current_user: Option<String>,
    pub peer_port: u16,
}

impl Peer {
    pub fn new(session: TrackerSession, peer_port: u16) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            shared: new_shared_files(),
            downloads: new_downloads(),
            current_user: None,
            peer_port,
        }
    }

    /// The endpoint this peer embeds in everything it advertises.
    pub fn self_endpoint(&self) -> String {
        format!("{}:{}", advertised_host(), self.peer_port)
    }

    /// Handle one input line. Returns false when the user quits.
    pub fn dispatch(&mut self, line: &str) -> bool {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&verb) = tokens.first() else {
            return true;
        };

        match (verb, tokens.len()) {
            ("create_user", 3) => {
                self.roundtrip_print(&format!("REGISTER {} {}", tokens[1], tokens[2]));
            }
            ("login", 3) => match self.roundtrip(&format!("LOGIN {} {}", tokens[1], tokens[2])) {
                Some(reply) => {
                    if reply == "OK" {
                        self.current_user = Some(tokens[1].to_string());
                    }
                    println!("{reply}");
                }
                None => println!("All trackers unreachable"),
            },
            ("logout", 1) => {
                self.current_user = None;
                self.shared.lock().unwrap().clear();
                println!("OK");
            }
            ("create_group", 2) => {
                if let Some(user) = self.need_user() {
                    self.roundtrip_print(&format!("CREATE_GROUP {user} {}", tokens[1]));
                }
            }
            ("join_group", 2) => {
                if let Some(user) = self.need_user() {
                    self.roundtrip_print(&format!("JOIN_GROUP {user} {}", tokens[1]));
                }
            }
            ("leave_group", 2) => {
                if let Some(user) = self.need_user() {
                    self.roundtrip_print(&format!("LEAVE_GROUP {user} {}", tokens[1]));
                }
            }
            ("list_groups", 1) => {
                self.roundtrip_print("LIST_GROUPS");
            }
            ("list_requests", 2) => {
                if let Some(user) = self.need_user() {
                    self.roundtrip_print(&format!("LIST_REQUESTS {} {user}", tokens[1]));
                }
            }
            ("accept_request", 3) => {
                if let Some(user) = self.need_user() {
                    self.roundtrip_print(&format!(
                        "ACCEPT_REQUEST {} {} {user}",
                        tokens[1], tokens[2]
                    ));
                }
            }
            ("list_files", 2) => {
                if let Some(user) = self.need_user() {
                    self.roundtrip_print(&format!("LIST_FILES {} {user}", tokens[1]));
                }
            }
            ("upload_file", 3) => {
                if let Some(user) = self.need_user() {
                    self.upload_file(&user, tokens[1], tokens[2]);
                }
            }
            ("download_file", _) => {
                if self.need_user().is_some() {
                    self.download_file(line);
                }
            }
            ("show_downloads", 1) => self.show_downloads(),
            ("stop_share", 3) => {
                if self.need_user().is_some() {
                    self.stop_share(tokens[1], tokens[2]);
                }
            }
            ("quit", 1) => return false,
            _ => println!("Unknown command"),
        }
        true
    }

    fn need_user(&self) -> Option<String> {
        match &self.current_user {
            Some(user) => Some(user.clone()),
            None => {
                println!("login required");
                None
            }
        }
    }

    fn roundtrip(&self, msg: &str) -> Option<String> {
        self.session.lock().unwrap().roundtrip(msg)
    }

    fn roundtrip_print(&self, msg: &str) {
        match self.roundtrip(msg) {
            Some(reply) => println!("{reply}"),
            None => println!("All trackers unreachable"),
        }
    }

    /// Publish is metadata-only: hash locally, advertise the manifest,
    /// start serving the path immediately.
    fn upload_file(&self, user: &str, group: &str, path: &str) {
        let digest = match digest_file(Path::new(path)) {
            Ok(d) if !d.piece_hashes.is_empty() => d,
            _ => {
                println!("file read error");
                return;
            }
        };

        let filename = match Path::new(path).file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => {
                println!("file read error");
                return;
            }
        };

        self.shared
            .lock()
            .unwrap()
            .insert(filename.clone(), PathBuf::from(path));

        let mut msg = format!(
            "UPLOAD_META {group} {filename} {} {} {} {} {user}",
            digest.size,
            digest.piece_hashes.len(),
            digest.file_hash,
            self.self_endpoint()
        );
        for ph in &digest.piece_hashes {
            msg.push(' ');
            msg.push_str(ph);
        }
        self.roundtrip_print(&msg);
    }

    fn download_file(&mut self, line: &str) {
        // a trailing '&' detaches the job
        let trimmed = line.trim_end();
        let background = trimmed.ends_with('&');
        let cleaned = trimmed.trim_end_matches('&').trim_end();

        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        if tokens.len() != 4 {
            println!("Usage: download_file <group> <filename> <destination>[ &]");
            return;
        }
        let (group, filename, dest) = (tokens[1], tokens[2], tokens[3]);
        let user = match &self.current_user {
            Some(u) => u.clone(),
            None => return,
        };

        let reply = match self.roundtrip(&format!("GET_FILE_PEERS {group} {filename} {user}")) {
            Some(r) => r,
            None => {
                println!("All trackers unreachable");
                return;
            }
        };
        if reply.starts_with("ERR") {
            println!("{reply}");
            return;
        }
        let Some(manifest) = FileManifest::parse(&reply) else {
            println!("Error: hash count mismatch");
            return;
        };
        if manifest.peers.is_empty() {
            println!("No peers available");
            return;
        }

        // a directory destination expands to dest/filename
        let mut outpath = PathBuf::from(dest);
        if outpath.is_dir() {
            outpath.push(filename);
        }

        // pre-allocate the sparse output so workers can write their
        // disjoint ranges in place
        let file = match OpenOptions::new().create(true).write(true).open(&outpath) {
            Ok(f) => f,
            Err(e) => {
                println!("cannot create {dest}: {e}");
                return;
            }
        };
        if let Err(e) = file.set_len(manifest.size) {
            println!("cannot set file size: {e}");
            return;
        }
        drop(file);

        let status = Arc::new(DownloadStatus::new(
            group,
            filename,
            outpath.clone(),
            manifest.piece_hashes.len(),
        ));
        self.downloads
            .lock()
            .unwrap()
            .insert(status.key(), status.clone());

        let job = DownloadJob {
            group: group.to_string(),
            filename: filename.to_string(),
            dest: outpath,
            piece_hashes: manifest.piece_hashes,
            peers: manifest.peers,
            size: manifest.size,
            file_hash: manifest.file_hash,
        };
        let shared = self.shared.clone();
        let session = self.session.clone();
        let endpoint = self.self_endpoint();
        if background {
            thread::spawn(move || run_download_job(job, status, shared, session, endpoint));
        } else {
            run_download_job(job, status, shared, session, endpoint);
        }
    }

    fn show_downloads(&self) {
        let downloads = self.downloads.lock().unwrap();
        if downloads.is_empty() {
            println!("No active downloads");
            return;
        }
        for status in downloads.values() {
            if let Some(line) = status.line() {
                println!("{line}");
            }
        }
    }

    fn stop_share(&self, group: &str, filename: &str) {
        let msg = format!("STOP_SHARE {group} {filename} {}", self.self_endpoint());
        match self.roundtrip(&msg) {
            Some(reply) => {
                println!("{reply}");
                self.shared.lock().unwrap().remove(filename);
            }
            None => println!("All trackers unreachable"),
        }
    }
}
