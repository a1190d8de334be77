use std::collections::{BTreeMap, BTreeSet};

use gshare_core::entities::{FileManifest, Reject};
use gshare_core::helpers::piece_count;

/// Registered account. The logged flag is transient session state; it is
/// never replicated and only the name/password pair survives snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub pass: String,
    pub logged: bool,
}

impl User {
    pub fn new(pass: &str) -> Self {
        Self {
            pass: pass.to_string(),
            logged: false,
        }
    }
}

/// Named membership set. The owner is always a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub owner: String,
    pub members: BTreeSet<String>,
}

impl Group {
    pub fn new(owner: &str) -> Self {
        let mut members = BTreeSet::new();
        members.insert(owner.to_string());
        Self {
            owner: owner.to_string(),
            members,
        }
    }
}

/// Published file metadata plus the set of peers currently serving it.
/// A record with no peers is removed, never kept empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub owner: String,
    pub size: u64,
    pub file_hash: String,
    pub piece_hashes: Vec<String>,
    pub peers: BTreeSet<String>,
}

/// Parsed body of an `UPLOAD_META` command:
/// `<group> <name> <size> <nPieces> <fileSha> <peer> <user> <pieceSha...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta {
    pub group: String,
    pub filename: String,
    pub size: u64,
    pub npieces: usize,
    pub file_hash: String,
    pub peer: String,
    pub user: String,
    pub piece_hashes: Vec<String>,
}

impl UploadMeta {
    /// Parse the argument tokens following the verb. Hash tokens must be
    /// 40 hex chars; anything else in the tail is dropped.
    pub fn parse(args: &[&str]) -> Option<UploadMeta> {
        if args.len() < 7 {
            return None;
        }
        let size: u64 = args[2].parse().ok()?;
        let npieces: usize = args[3].parse().ok()?;
        let piece_hashes: Vec<String> = args[7..]
            .iter()
            .filter(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .map(|h| h.to_lowercase())
            .collect();
        Some(UploadMeta {
            group: args[0].to_string(),
            filename: args[1].to_string(),
            size,
            npieces,
            file_hash: args[4].to_string(),
            peer: args[5].to_string(),
            user: args[6].to_string(),
            piece_hashes,
        })
    }

    /// The normalized body rebroadcast to the other trackers.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} {} {} {} {} {} {}",
            self.group, self.filename, self.size, self.npieces, self.file_hash, self.peer, self.user
        );
        for ph in &self.piece_hashes {
            out.push(' ');
            out.push_str(ph);
        }
        out
    }
}

/// The authoritative in-memory registry of one tracker. All maps are
/// ordered so snapshots and owner transfers are deterministic.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Registry {
    pub users: BTreeMap<String, User>,
    pub groups: BTreeMap<String, Group>,
    pub requests: BTreeMap<String, Vec<String>>,
    pub files: BTreeMap<(String, String), FileRecord>,
}

impl Registry {
    pub fn is_member(&self, user: &str, group: &str) -> bool {
        self.groups
            .get(group)
            .map_or(false, |g| g.members.contains(user))
    }

    pub fn is_owner(&self, user: &str, group: &str) -> bool {
        self.groups.get(group).map_or(false, |g| g.owner == user)
    }

    pub fn register(&mut self, user: &str, pass: &str) -> Result<(), Reject> {
        if self.users.contains_key(user) {
            return Err(Reject::UserExists);
        }
        self.users.insert(user.to_string(), User::new(pass));
        Ok(())
    }

    pub fn login(&mut self, user: &str, pass: &str) -> Result<(), Reject> {
        let u = self.users.get_mut(user).ok_or(Reject::UserNotFound)?;
        if u.pass != pass {
            return Err(Reject::WrongPassword);
        }
        u.logged = true;
        Ok(())
    }

    pub fn create_group(&mut self, user: &str, group: &str) -> Result<(), Reject> {
        if self.groups.contains_key(group) {
            return Err(Reject::GroupExists);
        }
        self.groups.insert(group.to_string(), Group::new(user));
        Ok(())
    }

    /// Append a pending join request. Duplicate requests from the same
    /// user coalesce silently.
    pub fn join_group(&mut self, user: &str, group: &str) -> Result<(), Reject> {
        if !self.groups.contains_key(group) {
            return Err(Reject::NoGroup);
        }
        if self.is_member(user, group) {
            return Err(Reject::AlreadyMember);
        }
        self.push_request(group, user);
        Ok(())
    }

    pub(crate) fn push_request(&mut self, group: &str, user: &str) {
        let queue = self.requests.entry(group.to_string()).or_default();
        if !queue.iter().any(|u| u == user) {
            queue.push(user.to_string());
        }
    }

    pub fn list_groups(&self) -> String {
        self.groups.keys().map(|g| format!("{g}\n")).collect()
    }

    pub fn list_requests(&self, group: &str, user: &str) -> Result<String, Reject> {
        if !self.is_owner(user, group) {
            return Err(Reject::NotOwner);
        }
        Ok(self
            .requests
            .get(group)
            .into_iter()
            .flatten()
            .map(|u| format!("{u}\n"))
            .collect())
    }

    pub fn accept_request(&mut self, group: &str, user: &str, owner: &str) -> Result<(), Reject> {
        if !self.is_owner(owner, group) {
            return Err(Reject::NotOwner);
        }
        if !self.take_request(group, user) {
            return Err(Reject::NoRequest);
        }
        if let Some(g) = self.groups.get_mut(group) {
            g.members.insert(user.to_string());
        }
        Ok(())
    }

    /// Remove `user` from the pending queue of `group`. True if a
    /// request was present.
    pub(crate) fn take_request(&mut self, group: &str, user: &str) -> bool {
        match self.requests.get_mut(group) {
            Some(queue) => match queue.iter().position(|u| u == user) {
                Some(pos) => {
                    queue.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn leave_group(&mut self, user: &str, group: &str) -> Result<(), Reject> {
        if self.force_leave(user, group) {
            Ok(())
        } else {
            Err(Reject::NotMember)
        }
    }

    /// Membership removal with the full cascade: files owned by the
    /// leaver in this group disappear, ownership transfers to the first
    /// remaining member in order, and an emptied group dissolves together
    /// with its pending requests. Returns false when `user` was not a
    /// member.
    pub fn force_leave(&mut self, user: &str, group: &str) -> bool {
        if !self.is_member(user, group) {
            return false;
        }

        self.files
            .retain(|(grp, _), rec| grp != group || rec.owner != user);

        let dissolve = match self.groups.get_mut(group) {
            Some(g) => {
                g.members.remove(user);
                if g.owner == user {
                    match g.members.iter().next().cloned() {
                        Some(next) => {
                            g.owner = next;
                            false
                        }
                        None => true,
                    }
                } else {
                    false
                }
            }
            None => false,
        };
        if dissolve {
            self.groups.remove(group);
            self.requests.remove(group);
        }
        true
    }

    pub fn list_files(&self, group: &str, user: &str) -> Result<String, Reject> {
        if !self.is_member(user, group) {
            return Err(Reject::NotMember);
        }
        Ok(self
            .files
            .keys()
            .filter(|(grp, _)| grp == group)
            .map(|(_, name)| format!("{name}\n"))
            .collect())
    }

    pub fn upload_meta(&mut self, meta: UploadMeta) -> Result<(), Reject> {
        if !self.is_member(&meta.user, &meta.group) {
            return Err(Reject::NotMember);
        }
        if meta.piece_hashes.len() != meta.npieces || meta.npieces != piece_count(meta.size) {
            return Err(Reject::PieceCountMismatch);
        }
        self.insert_file(meta);
        Ok(())
    }

    /// Unvalidated insert, shared with the replication path.
    pub fn insert_file(&mut self, meta: UploadMeta) {
        let mut peers = BTreeSet::new();
        peers.insert(meta.peer);
        self.files.insert(
            (meta.group, meta.filename),
            FileRecord {
                owner: meta.user,
                size: meta.size,
                file_hash: meta.file_hash,
                piece_hashes: meta.piece_hashes,
                peers,
            },
        );
    }

    pub fn get_file_peers(
        &self,
        group: &str,
        filename: &str,
        user: &str,
    ) -> Result<FileManifest, Reject> {
        if !self.is_member(user, group) {
            return Err(Reject::NotMember);
        }
        let rec = self
            .files
            .get(&(group.to_string(), filename.to_string()))
            .ok_or(Reject::NoFile)?;
        if rec.peers.is_empty() {
            return Err(Reject::NoPeersAvailable);
        }
        Ok(FileManifest {
            size: rec.size,
            file_hash: rec.file_hash.clone(),
            piece_hashes: rec.piece_hashes.clone(),
            peers: rec.peers.iter().cloned().collect(),
        })
    }

    /// Silent no-op when the file record is absent.
    pub fn add_peer(&mut self, group: &str, filename: &str, peer: &str) {
        if let Some(rec) = self
            .files
            .get_mut(&(group.to_string(), filename.to_string()))
        {
            rec.peers.insert(peer.to_string());
        }
    }

    /// Removing the last peer removes the record itself.
    pub fn stop_share(&mut self, group: &str, filename: &str, peer: &str) {
        let key = (group.to_string(), filename.to_string());
        if let Some(rec) = self.files.get_mut(&key) {
            rec.peers.remove(peer);
            if rec.peers.is_empty() {
                self.files.remove(&key);
            }
        }
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.users.len(), self.groups.len(), self.files.len())
    }
}
