use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Per-file download tracking record, kept in the process-local job
/// table under `group:filename`. Workers share it across the batch pool:
/// the have vector sits behind its own mutex, the counters are atomic.
#[derive(Debug)]
pub struct DownloadStatus {
    pub group: String,
    pub filename: String,
    pub dest: PathBuf,
    pub npieces: usize,
    pub have: Mutex<Vec<bool>>,
    pub remaining: AtomicUsize,
    pub running: AtomicBool,
    pub completed: AtomicBool,
}

impl DownloadStatus {
    pub fn new(group: &str, filename: &str, dest: PathBuf, npieces: usize) -> Self {
        Self {
            group: group.to_string(),
            filename: filename.to_string(),
            dest,
            npieces,
            have: Mutex::new(vec![false; npieces]),
            remaining: AtomicUsize::new(npieces),
            running: AtomicBool::new(true),
            completed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.filename)
    }

    /// Record piece `idx` as acquired. Idempotent so a racing retry
    /// cannot drive `remaining` below zero.
    pub fn mark_have(&self, idx: usize) {
        let mut have = self.have.lock().unwrap();
        if !have[idx] {
            have[idx] = true;
            self.remaining.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn have_count(&self) -> usize {
        self.have.lock().unwrap().iter().filter(|h| **h).count()
    }

    pub fn is_done(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) == 0
    }

    /// One `show_downloads` line, or None for a dead job that never got
    /// a piece.
    pub fn line(&self) -> Option<String> {
        let have = self.have_count();
        if self.completed.load(Ordering::SeqCst) {
            Some(format!("[C] {} {}", self.group, self.filename))
        } else if self.running.load(Ordering::SeqCst) {
            Some(format!(
                "[D] {} {} - {}/{}",
                self.group, self.filename, have, self.npieces
            ))
        } else if have > 0 {
            Some(format!(
                "[P] {} {} - {}/{}",
                self.group, self.filename, have, self.npieces
            ))
        } else {
            None
        }
    }
}
