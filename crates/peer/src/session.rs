use std::io;
use std::net::TcpStream;

use gshare_config::TRACKER_IO_TIMEOUT;
use gshare_core::frame::{recv_text, send_text};
use gshare_core::helpers::resolve_endpoint;

use crate::LOGGER;

/// Client-side view of the tracker cluster. Every request goes to the
/// current tracker first; on transport failure the other configured
/// trackers are tried in order and the first responsive one becomes
/// current.
pub struct TrackerSession {
    trackers: Vec<String>,
    current: String,
}

impl TrackerSession {
    pub fn new(current: String, trackers: Vec<String>) -> Self {
        Self { trackers, current }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// One framed request/reply exchange with failover. None means the
    /// whole cluster was unreachable.
    pub fn roundtrip(&mut self, msg: &str) -> Option<String> {
        match request(&self.current, msg) {
            Ok(reply) => return Some(reply),
            Err(e) => LOGGER.debug(format!("tracker {} failed: {e}", self.current)),
        }

        let others: Vec<String> = self
            .trackers
            .iter()
            .filter(|t| **t != self.current)
            .cloned()
            .collect();
        for endpoint in others {
            match request(&endpoint, msg) {
                Ok(reply) => {
                    LOGGER.info(format!("switched to tracker: {endpoint}"));
                    self.current = endpoint;
                    return Some(reply);
                }
                Err(e) => LOGGER.debug(format!("tracker {endpoint} failed: {e}")),
            }
        }
        None
    }
}

fn request(endpoint: &str, msg: &str) -> io::Result<String> {
    let addr = resolve_endpoint(endpoint)?;
    let mut stream = TcpStream::connect_timeout(&addr, TRACKER_IO_TIMEOUT)?;
    stream.set_write_timeout(Some(TRACKER_IO_TIMEOUT))?;
    stream.set_read_timeout(Some(TRACKER_IO_TIMEOUT))?;
    send_text(&mut stream, msg)?;
    recv_text(&mut stream)
}

#[cfg(test)]
mod func_tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// A throwaway tracker stand-in that answers one framed request.
    fn mock_tracker(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = recv_text(&mut stream);
                let _ = send_text(&mut stream, reply);
            }
        });
        endpoint
    }

    #[test]
    fn test_roundtrip_current_tracker() {
        let live = mock_tracker("OK");
        let mut session = TrackerSession::new(live.clone(), vec![live.clone()]);
        assert_eq!(session.roundtrip("LIST_GROUPS").unwrap(), "OK");
        assert_eq!(session.current(), live);
    }

    #[test]
    fn test_failover_promotes_responsive_tracker() {
        let dead = "127.0.0.1:1".to_string();
        let live = mock_tracker("grp\n");
        let mut session =
            TrackerSession::new(dead.clone(), vec![dead.clone(), live.clone()]);

        assert_eq!(session.roundtrip("LIST_GROUPS").unwrap(), "grp\n");
        assert_eq!(session.current(), live);
    }

    #[test]
    fn test_all_unreachable() {
        let mut session = TrackerSession::new(
            "127.0.0.1:1".to_string(),
            vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()],
        );
        assert!(session.roundtrip("LIST_GROUPS").is_none());
    }
}
