use gshare_core::utils::Logger;

pub mod registry;
pub mod serve;
pub mod store;
pub mod sync;

pub use serve::{serve_client, Tracker};

pub(crate) static LOGGER: Logger = Logger::new("Tracker");
