mod downloader;
mod fetcher;
mod retry;
mod types;

pub use downloader::MediaDownloader;
pub use fetcher::Fetcher;
pub use types::{DownloadedAsset, MediaKind, MediaUpload};
