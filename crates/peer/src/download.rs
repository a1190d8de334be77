use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use gshare_config::{MAX_SIM_PIECES, PIECE_IO_TIMEOUT, PIECE_SIZE};
use gshare_core::frame::{recv_text, send_text};
use gshare_core::hash::{digest_file, piece_hash};
use gshare_core::helpers::resolve_endpoint;
use threadpool::ThreadPool;

use crate::entities::DownloadStatus;
use crate::serve::SharedFiles;
use crate::session::TrackerSession;
use crate::LOGGER;

/// Process-local table of download jobs, keyed by `group:filename`.
pub type Downloads = Arc<Mutex<HashMap<String, Arc<DownloadStatus>>>>;

pub fn new_downloads() -> Downloads {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Everything one download needs, as handed over by the tracker
/// manifest. The caller has already created `dest` at its final size and
/// registered the status record.
pub struct DownloadJob {
    pub group: String,
    pub filename: String,
    pub dest: PathBuf,
    pub piece_hashes: Vec<String>,
    pub peers: Vec<String>,
    pub size: u64,
    pub file_hash: String,
}

/// Flips running off on every exit path, worker panics included, so the
/// job table never shows a dead job as downloading.
struct RunningGuard(Arc<DownloadStatus>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Drive one download to the end: batches of up to MAX_SIM_PIECES
/// workers, each piece trying every peer twice before giving up. When
/// all pieces land the output is re-digested; only a matching aggregate
/// hash and size lead to the seeder announcement and the shared-table
/// registration.
pub fn run_download_job(
    job: DownloadJob,
    status: Arc<DownloadStatus>,
    shared: SharedFiles,
    session: Arc<Mutex<TrackerSession>>,
    self_endpoint: String,
) {
    let _guard = RunningGuard(status.clone());
    let npieces = job.piece_hashes.len();
    if npieces == 0 {
        return;
    }

    let pool = ThreadPool::new(npieces.min(MAX_SIM_PIECES));
    for batch_start in (0..npieces).step_by(MAX_SIM_PIECES) {
        let batch_end = (batch_start + MAX_SIM_PIECES).min(npieces);
        for idx in batch_start..batch_end {
            let expected = job.piece_hashes[idx].clone();
            let peers = job.peers.clone();
            let filename = job.filename.clone();
            let dest = job.dest.clone();
            let status = status.clone();
            pool.execute(move || {
                if fetch_with_fallback(&peers, &filename, idx, &dest, &expected) {
                    status.mark_have(idx);
                }
            });
        }
        // the whole batch settles before the next one starts
        pool.join();
    }

    if !status.is_done() {
        LOGGER.warn(format!(
            "download of {} ended with {}/{} pieces",
            job.filename,
            status.have_count(),
            npieces
        ));
        return;
    }

    // every piece verified on the way in; re-check the assembled file
    // end to end before advertising ourselves as a seeder
    match digest_file(&job.dest) {
        Ok(d) if d.file_hash == job.file_hash && d.size == job.size => {
            status.completed.store(true, Ordering::SeqCst);
            LOGGER.info(format!("[C] {} {}", job.group, job.filename));

            let announce = format!(
                "ADD_PEER {} {} {}",
                job.group, job.filename, self_endpoint
            );
            if session.lock().unwrap().roundtrip(&announce).is_none() {
                LOGGER.warn("completed download but all trackers unreachable, not announced");
            }
            shared
                .lock()
                .unwrap()
                .insert(job.filename.clone(), job.dest.clone());
        }
        Ok(_) => {
            LOGGER.error(format!(
                "{} failed final verification, not advertising",
                job.filename
            ));
        }
        Err(e) => {
            LOGGER.error(format!("cannot re-read {}: {e}", job.dest.display()));
        }
    }
}

/// Try every peer in order, two attempts each, stopping at the first
/// success.
fn fetch_with_fallback(
    peers: &[String],
    filename: &str,
    idx: usize,
    dest: &Path,
    expected: &str,
) -> bool {
    for peer in peers {
        for _attempt in 0..2 {
            match fetch_one_piece(peer, filename, idx, dest, expected) {
                Ok(()) => return true,
                Err(e) => LOGGER.debug(format!("piece {idx} from {peer}: {e}")),
            }
        }
    }
    false
}

/// One fetch attempt. All steps must hold: connect, OK reply, sane
/// declared length, full body, hash match, and a complete positioned
/// write into the output file.
pub fn fetch_one_piece(
    peer: &str,
    filename: &str,
    idx: usize,
    dest: &Path,
    expected: &str,
) -> io::Result<()> {
    let addr = resolve_endpoint(peer)?;
    let mut stream = TcpStream::connect_timeout(&addr, PIECE_IO_TIMEOUT)?;
    stream.set_read_timeout(Some(PIECE_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(PIECE_IO_TIMEOUT))?;

    send_text(&mut stream, &format!("GETPIECE {filename} {idx}"))?;
    let reply = recv_text(&mut stream)?;
    if reply != "OK" {
        return Err(io::Error::new(ErrorKind::Other, "peer refused piece"));
    }

    // the declared length is checked against the piece cap before any
    // body bytes are pulled
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    let n = u32::from_be_bytes(len) as usize;
    if n > PIECE_SIZE {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "declared piece length above cap",
        ));
    }
    let mut bytes = vec![0u8; n];
    stream.read_exact(&mut bytes)?;

    if piece_hash(&bytes) != expected {
        return Err(io::Error::new(ErrorKind::InvalidData, "piece hash mismatch"));
    }

    // disjoint ranges per worker, so no writer coordination is needed
    let mut out = OpenOptions::new().write(true).open(dest)?;
    out.seek(SeekFrom::Start(idx as u64 * PIECE_SIZE as u64))?;
    out.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod func_tests {
    use std::fs;
    use std::io::Write as _;

    use gshare_core::hash::digest_file;

    use super::*;
    use crate::serve::{new_shared_files, start_piece_server};

    fn patterned(len: usize, seed: u32) -> Vec<u8> {
        (0..len as u32).map(|i| ((i + seed) % 241) as u8).collect()
    }

    /// A serving peer with one shared file; returns its endpoint.
    fn seeder(name: &str, path: &Path) -> String {
        let shared = new_shared_files();
        shared
            .lock()
            .unwrap()
            .insert(name.to_string(), path.to_path_buf());
        let port = start_piece_server(shared).unwrap();
        format!("127.0.0.1:{port}")
    }

    fn dead_session() -> Arc<Mutex<TrackerSession>> {
        Arc::new(Mutex::new(TrackerSession::new(
            "127.0.0.1:1".to_string(),
            vec!["127.0.0.1:1".to_string()],
        )))
    }

    fn job_for(src_digest: &gshare_core::hash::FileDigest, name: &str, dest: &Path, peers: Vec<String>) -> DownloadJob {
        DownloadJob {
            group: "grp".to_string(),
            filename: name.to_string(),
            dest: dest.to_path_buf(),
            piece_hashes: src_digest.piece_hashes.clone(),
            peers,
            size: src_digest.size,
            file_hash: src_digest.file_hash.clone(),
        }
    }

    #[test]
    fn test_fetch_one_piece_roundtrip() {
        let data = patterned(600_000, 0);
        let mut src = tempfile::NamedTempFile::new().unwrap();
        src.write_all(&data).unwrap();
        let peer = seeder("data.bin", src.path());

        let dest = tempfile::NamedTempFile::new().unwrap();
        dest.as_file().set_len(600_000).unwrap();

        let expected = piece_hash(&data[PIECE_SIZE..]);
        fetch_one_piece(&peer, "data.bin", 1, dest.path(), &expected).unwrap();

        let written = fs::read(dest.path()).unwrap();
        assert_eq!(&written[PIECE_SIZE..], &data[PIECE_SIZE..]);
    }

    #[test]
    fn test_fetch_rejects_wrong_hash() {
        let data = patterned(1000, 1);
        let mut src = tempfile::NamedTempFile::new().unwrap();
        src.write_all(&data).unwrap();
        let peer = seeder("data.bin", src.path());

        let dest = tempfile::NamedTempFile::new().unwrap();
        dest.as_file().set_len(1000).unwrap();

        let err = fetch_one_piece(&peer, "data.bin", 0, dest.path(), &"0".repeat(40))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_full_download_job_completes_and_registers() {
        let data = patterned(600_000, 2);
        let mut src = tempfile::NamedTempFile::new().unwrap();
        src.write_all(&data).unwrap();
        let digest = digest_file(src.path()).unwrap();

        // first peer is unreachable; the engine must fall back
        let live = seeder("data.bin", src.path());
        let peers = vec!["127.0.0.1:1".to_string(), live];

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data.bin");
        fs::File::create(&dest).unwrap().set_len(600_000).unwrap();

        let status = Arc::new(DownloadStatus::new("grp", "data.bin", dest.clone(), 2));
        let shared = new_shared_files();
        run_download_job(
            job_for(&digest, "data.bin", &dest, peers),
            status.clone(),
            shared.clone(),
            dead_session(),
            "127.0.0.1:0".to_string(),
        );

        assert!(status.completed.load(Ordering::SeqCst));
        assert!(!status.running.load(Ordering::SeqCst));
        assert_eq!(status.have_count(), 2);
        assert_eq!(fs::read(&dest).unwrap(), data);
        // a verified download is served afterwards
        assert_eq!(
            shared.lock().unwrap().get("data.bin"),
            Some(&dest)
        );
    }

    #[test]
    fn test_corrupt_source_leaves_job_partial() {
        let data = patterned(600_000, 3);
        let mut corrupted = data.clone();
        corrupted[PIECE_SIZE + 17] ^= 0xff;

        let mut src = tempfile::NamedTempFile::new().unwrap();
        src.write_all(&data).unwrap();
        let digest = digest_file(src.path()).unwrap();

        // the seeder actually serves the corrupted copy
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(&corrupted).unwrap();
        let peer = seeder("data.bin", bad.path());

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data.bin");
        fs::File::create(&dest).unwrap().set_len(600_000).unwrap();

        let status = Arc::new(DownloadStatus::new("grp", "data.bin", dest.clone(), 2));
        let shared = new_shared_files();
        run_download_job(
            job_for(&digest, "data.bin", &dest, vec![peer]),
            status.clone(),
            shared.clone(),
            dead_session(),
            "127.0.0.1:0".to_string(),
        );

        // piece 0 verifies, piece 1 never does
        assert!(!status.completed.load(Ordering::SeqCst));
        assert_eq!(status.have_count(), 1);
        assert_eq!(status.line().unwrap(), "[P] grp data.bin - 1/2");
        assert!(shared.lock().unwrap().is_empty());
    }
}
