use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::fetcher::Fetcher;
use super::types::DownloadedAsset;
use crate::error::{Error, Result};
use crate::post::{ExtractionResult, MediaVariant, PostReference};

/// Persists the selected media of a post to a local directory.
pub struct MediaDownloader {
    fetcher: Fetcher,
}

impl MediaDownloader {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Local path for one variant: `<dir>/<user>_<id>_<url filename>`.
    pub fn destination(dir: &Path, post: &PostReference, variant: &MediaVariant) -> PathBuf {
        dir.join(format!("{}_{}", post.file_stem(), variant.filename()))
    }

    /// Downloads every photo, then each video's best variant, in order.
    ///
    /// The first failure aborts the run. Files written before it stay on disk.
    pub async fn download_selected(
        &self,
        post: &PostReference,
        result: &ExtractionResult,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<DownloadedAsset>> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| Error::Storage {
                path: dir.to_path_buf(),
                source,
            })?;

        let selected = result.selected_variants();
        info!(post = %post, count = selected.len(), "Downloading media");

        let mut assets = Vec::with_capacity(selected.len());
        for variant in selected {
            let path = Self::destination(dir, post, &variant);
            let url = variant.url().to_string();

            let size = match self.fetcher.download_to(&url, &path, cancel).await {
                Ok(size) => size,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    error!(url = %url, path = %path.display(), error = %e, "failed to download");
                    return Err(Error::DownloadFailed {
                        url,
                        path,
                        source: Box::new(e),
                    });
                }
            };

            info!(path = %path.display(), size, "Downloaded");
            assets.push(DownloadedAsset {
                path,
                variant,
                size,
            });
        }

        Ok(assets)
    }
}
