mod credentials;
mod extract;
mod query;
mod reference;
mod types;

pub use credentials::{acquire_credentials, Credentials};
pub use extract::extract_bytes;
pub use query::{build_query, PostQuery};
pub use reference::PostReference;
pub use types::{ExtractionResult, MediaVariant, Photo, VideoGroup, VideoVariant};

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::media::Fetcher;

/// Base URLs of the platform's public site, its API host and the CDN serving the client bundle.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub site: Url,
    pub api: Url,
    pub cdn: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            site: Url::parse("https://twitter.com/").expect("static URL"),
            api: Url::parse("https://api.twitter.com/").expect("static URL"),
            cdn: Url::parse("https://abs.twimg.com/").expect("static URL"),
        }
    }
}

/// Talks to the platform: credentials, the post API and raw-data capture.
pub struct PostClient {
    fetcher: Fetcher,
    endpoints: Endpoints,
    save_dir: Option<PathBuf>,
}

impl PostClient {
    pub fn new(fetcher: Fetcher, endpoints: Endpoints) -> Self {
        Self {
            fetcher,
            endpoints,
            save_dir: None,
        }
    }

    /// Saves the raw page and API response of every request into `dir`.
    pub fn with_save_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.save_dir = dir;
        self
    }

    /// The post page on the site host. Never leaves that host.
    pub fn page_url(&self, post: &PostReference) -> Result<Url> {
        let site = &self.endpoints.site;
        let url = Url::parse(&format!("{site}{}", post.page_path()))
            .map_err(|e| Error::InvalidUrl(format!("{post}: {e}")))?;
        if url.origin() != site.origin() {
            return Err(Error::InvalidUrl(post.to_string()));
        }
        Ok(url)
    }

    pub async fn credentials(
        &self,
        post: &PostReference,
        cancel: &CancellationToken,
    ) -> Result<Credentials> {
        let page_url = self.page_url(post)?;
        let scraped =
            acquire_credentials(&self.fetcher, page_url.as_str(), &self.endpoints.cdn, cancel)
                .await?;
        self.save("post.html", scraped.page.as_bytes()).await?;
        Ok(scraped.credentials)
    }

    pub fn query(&self, post: &PostReference, credentials: &Credentials) -> Result<PostQuery> {
        build_query(&self.endpoints.api, &self.endpoints.site, post, credentials)
    }

    pub async fn fetch_json(&self, query: &PostQuery, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let body = self
            .fetcher
            .fetch_bytes(query.url.as_str(), &query.headers, cancel)
            .await?;
        debug!(bytes = body.len(), "post API response");
        self.save("post.json", &body).await?;
        Ok(body)
    }

    /// Credentials, query, fetch and extraction in one go.
    pub async fn fetch_post(
        &self,
        post: &PostReference,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult> {
        let credentials = self.credentials(post, cancel).await?;
        let query = self.query(post, &credentials)?;
        let body = self.fetch_json(&query, cancel).await?;
        extract_bytes(&body)
    }

    async fn save(&self, name: &str, data: &[u8]) -> Result<()> {
        let Some(dir) = &self.save_dir else {
            return Ok(());
        };
        let path = dir.join(name);
        write_sample(&path, data).await?;
        info!(path = %path.display(), "Saved raw data");
        Ok(())
    }
}

async fn write_sample(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::Storage {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|source| Error::Storage {
            path: path.to_path_buf(),
            source,
        })
}
