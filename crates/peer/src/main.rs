use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process;

use clap::{Arg, Command};
use gshare_core::helpers::load_tracker_list;
use gshare_core::utils::Logger;
use gshare_peer::commands::Peer;
use gshare_peer::serve::start_piece_server;
use gshare_peer::session::TrackerSession;

static LOGGER: Logger = Logger::new("Peer");

fn create_command() -> Command {
    Command::new("gshare-peer")
        .about("Group file-sharing peer")
        .arg(
            Arg::new("TRACKER")
                .help("Initial tracker endpoint, host:port")
                .required(true),
        )
        .arg(
            Arg::new("CONFIG")
                .help("Path to tracker_info.txt (one host:port per line)")
                .required(true),
        )
}

fn main() -> io::Result<()> {
    let matches = match create_command().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    let tracker = matches
        .get_one::<String>("TRACKER")
        .cloned()
        .unwrap_or_default();
    let config = matches
        .get_one::<String>("CONFIG")
        .cloned()
        .unwrap_or_default();

    let trackers = load_tracker_list(Path::new(&config))?;
    let session = TrackerSession::new(tracker, trackers);

    let mut peer = Peer::new(session, 0);
    match start_piece_server(peer.shared.clone()) {
        Ok(port) => {
            peer.peer_port = port;
            println!("Peer server listening on port {port}");
        }
        Err(e) => {
            // keep the session usable; uploads and seeding just won't work
            LOGGER.error(format!("piece server unavailable: {e}"));
        }
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if !peer.dispatch(line.trim_end_matches(['\r', '\n'])) {
            break;
        }
    }

    Ok(())
}
