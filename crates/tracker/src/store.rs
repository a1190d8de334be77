use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;

use gshare_config::DATA_DIR_PREFIX;

use crate::registry::{FileRecord, Group, Registry, User};
use crate::LOGGER;

/// Snapshot persistence: four line-oriented text files under one
/// per-tracker directory. `load(save(reg)) == reg` apart from the
/// transient logged flags.
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn for_index(idx: usize) -> Self {
        Self::at(PathBuf::from(format!("{DATA_DIR_PREFIX}{idx}")))
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn save(&self, reg: &Registry) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut users = String::new();
        for (name, u) in &reg.users {
            users.push_str(&format!("{} {}\n", name, u.pass));
        }
        fs::write(self.dir.join("users.txt"), users)?;

        let mut groups = String::new();
        for (name, g) in &reg.groups {
            groups.push_str(&format!("{} {}", name, g.owner));
            for m in &g.members {
                groups.push_str(&format!(" {m}"));
            }
            groups.push('\n');
        }
        fs::write(self.dir.join("groups.txt"), groups)?;

        let mut requests = String::new();
        for (group, queue) in &reg.requests {
            if queue.is_empty() {
                continue;
            }
            requests.push_str(group);
            for u in queue {
                requests.push_str(&format!(" {u}"));
            }
            requests.push('\n');
        }
        fs::write(self.dir.join("requests.txt"), requests)?;

        let mut files = String::new();
        for ((group, name), rec) in &reg.files {
            files.push_str(&format!(
                "{} {} {} {} {} {} {}",
                group,
                name,
                rec.size,
                rec.piece_hashes.len(),
                rec.file_hash,
                rec.owner,
                rec.piece_hashes.join(",")
            ));
            for peer in &rec.peers {
                files.push_str(&format!(" {peer}"));
            }
            files.push('\n');
        }
        fs::write(self.dir.join("files.txt"), files)?;

        Ok(())
    }

    pub fn load(&self) -> io::Result<Registry> {
        let mut reg = Registry::default();

        for line in self.read_lines("users.txt")? {
            let mut it = line.split_whitespace();
            if let (Some(name), Some(pass)) = (it.next(), it.next()) {
                reg.users.insert(name.to_string(), User::new(pass));
            }
        }
        if !reg.users.is_empty() {
            LOGGER.info(format!("restored {} users", reg.users.len()));
        }

        for line in self.read_lines("groups.txt")? {
            let mut it = line.split_whitespace();
            if let (Some(name), Some(owner)) = (it.next(), it.next()) {
                let mut g = Group::new(owner);
                for m in it {
                    g.members.insert(m.to_string());
                }
                reg.groups.insert(name.to_string(), g);
            }
        }
        if !reg.groups.is_empty() {
            LOGGER.info(format!("restored {} groups", reg.groups.len()));
        }

        for line in self.read_lines("requests.txt")? {
            let mut it = line.split_whitespace();
            if let Some(group) = it.next() {
                let queue: Vec<String> = it.map(str::to_string).collect();
                if !queue.is_empty() {
                    reg.requests.insert(group.to_string(), queue);
                }
            }
        }

        for line in self.read_lines("files.txt")? {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 7 {
                continue;
            }
            let (size, npieces): (u64, usize) =
                match (tokens[2].parse(), tokens[3].parse()) {
                    (Ok(s), Ok(n)) => (s, n),
                    _ => continue,
                };
            let piece_hashes: Vec<String> = tokens[6]
                .split(',')
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
            if piece_hashes.len() != npieces {
                LOGGER.warn(format!("skipping malformed file line for {}", tokens[1]));
                continue;
            }
            let peers = tokens[7..].iter().map(|p| p.to_string()).collect();
            reg.files.insert(
                (tokens[0].to_string(), tokens[1].to_string()),
                FileRecord {
                    owner: tokens[5].to_string(),
                    size,
                    file_hash: tokens[4].to_string(),
                    piece_hashes,
                    peers,
                },
            );
        }
        if !reg.files.is_empty() {
            LOGGER.info(format!("restored {} files", reg.files.len()));
        }

        Ok(reg)
    }

    fn read_lines(&self, name: &str) -> io::Result<Vec<String>> {
        match fs::read_to_string(self.dir.join(name)) {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
