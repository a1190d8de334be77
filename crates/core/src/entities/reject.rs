use thiserror::Error;

/// Validation rejections a tracker surfaces to the caller. `Display`
/// renders the exact wire reply, so handlers can send `reject.to_string()`
/// as the framed answer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    #[error("ERR user_exists")]
    UserExists,
    #[error("ERR user_not_found")]
    UserNotFound,
    #[error("ERR wrong_password")]
    WrongPassword,
    #[error("ERR grp_exists")]
    GroupExists,
    #[error("ERR no_group")]
    NoGroup,
    #[error("ERR already_member")]
    AlreadyMember,
    #[error("ERR not_owner")]
    NotOwner,
    #[error("ERR no_request")]
    NoRequest,
    #[error("ERR not_member")]
    NotMember,
    #[error("ERR piece_count_mismatch")]
    PieceCountMismatch,
    #[error("ERR no_file")]
    NoFile,
    #[error("ERR no_peers_available")]
    NoPeersAvailable,
    #[error("ERR unknown_cmd")]
    UnknownCmd,
}
