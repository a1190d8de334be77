mod download_status;

pub use download_status::DownloadStatus;
