use std::io::{self, BufRead};
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::process;
use std::thread;

use clap::{Arg, Command};
use gshare_core::helpers::{load_tracker_list, resolve_endpoint};
use gshare_core::utils::Logger;
use gshare_tracker::store::Store;
use gshare_tracker::{serve, Tracker};

static LOGGER: Logger = Logger::new("Tracker");

fn create_command() -> Command {
    Command::new("gshare-tracker")
        .about("Group file-sharing metadata tracker")
        .arg(
            Arg::new("CONFIG")
                .help("Path to tracker_info.txt (one host:port per line)")
                .required(true),
        )
        .arg(
            Arg::new("IDX")
                .help("Zero-based index of this tracker in the list")
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

    let config = matches.get_one::<String>("CONFIG").cloned().unwrap_or_default();
    let self_idx: usize = match matches.get_one::<String>("IDX").and_then(|s| s.parse().ok()) {
        Some(idx) => idx,
        None => {
            LOGGER.error("bad idx");
            process::exit(1);
        }
    };

    let trackers = load_tracker_list(Path::new(&config))?;
    if self_idx >= trackers.len() {
        LOGGER.error("bad idx");
        process::exit(1);
    }

    let store = Store::for_index(self_idx);
    LOGGER.info(format!("loading data from {}", store.dir().display()));
    let tracker = Tracker::new(trackers.clone(), self_idx, store)?;

    let my_endpoint = &trackers[self_idx];
    let port = resolve_endpoint(my_endpoint)?.port();
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
    LOGGER.info(format!("tracker {self_idx} listening on {my_endpoint}"));

    // console: save forces a snapshot, status prints counts, quit saves
    // and exits
    let console_tracker = tracker.clone();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let cmd = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            match cmd.trim() {
                "save" => {
                    let reg = console_tracker.registry.lock().unwrap();
                    match console_tracker.store.save(&reg) {
                        Ok(()) => LOGGER.info(format!(
                            "data saved to {}",
                            console_tracker.store.dir().display()
                        )),
                        Err(e) => LOGGER.error(format!("snapshot failed: {e}")),
                    }
                }
                "status" => {
                    let (users, groups, files) =
                        console_tracker.registry.lock().unwrap().counts();
                    LOGGER.info(format!(
                        "users: {users}, groups: {groups}, files: {files}"
                    ));
                }
                "quit" => break,
                _ => {}
            }
        }
        let reg = console_tracker.registry.lock().unwrap();
        if let Err(e) = console_tracker.store.save(&reg) {
            LOGGER.error(format!("final snapshot failed: {e}"));
        }
        process::exit(0);
    });

    serve::run_accept_loop(listener, tracker);
    Ok(())
}
