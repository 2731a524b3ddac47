use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::retry::{with_retries, Exhausted};
use crate::config::UpstreamConfig;
use crate::error::{Error, FetchError, Result};

/// HTTP GET with a bounded number of immediate retries.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_attempts: u32,
}

impl Fetcher {
    /// Builds the shared HTTP client. `timeout` bounds each attempt.
    pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
        Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(Error::Network)
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let client = Self::build_client(&config.user_agent, config.request_timeout())?;
        Ok(Self::new(client, config.retry_count))
    }

    pub fn new(client: Client, max_attempts: u32) -> Self {
        Self {
            client,
            max_attempts,
        }
    }

    pub async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let body = self.fetch_bytes(url, &HeaderMap::new(), cancel).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn fetch_bytes(
        &self,
        url: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let result = with_retries(self.max_attempts, |attempt| async move {
            debug!(url, attempt, "fetching");
            let response = self.send(url, headers, cancel).await?;
            let body = cancellable(cancel, async {
                response.bytes().await.map_err(FetchError::from)
            })
            .await?;
            Ok::<_, FetchError>(body.to_vec())
        })
        .await;

        result.map_err(|e| exhausted(url, e))
    }

    /// Streams the body of `url` into `path`. A failed download may leave a partial file behind.
    pub async fn download_to(
        &self,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let headers = HeaderMap::new();
        let result = with_retries(self.max_attempts, |attempt| {
            let headers = &headers;
            async move {
                debug!(url, attempt, path = %path.display(), "downloading");
                let mut response = self.send(url, headers, cancel).await?;
                let io_error = |source| FetchError::Io {
                    path: path.to_path_buf(),
                    source,
                };

                let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
                let mut written = 0u64;
                while let Some(chunk) = cancellable(cancel, async {
                    response.chunk().await.map_err(FetchError::from)
                })
                .await?
                {
                    file.write_all(&chunk).await.map_err(io_error)?;
                    written += chunk.len() as u64;
                }
                file.flush().await.map_err(io_error)?;
                Ok::<_, FetchError>(written)
            }
        })
        .await;

        result.map_err(|e| exhausted(url, e))
    }

    async fn send(
        &self,
        url: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> std::result::Result<Response, FetchError> {
        let request = self.client.get(url).headers(headers.clone());
        let response = cancellable(cancel, async {
            request.send().await.map_err(FetchError::from)
        })
        .await?;

        if !response.status().is_success() {
            return Err(FetchError::Http(response.status()));
        }
        Ok(response)
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> std::result::Result<T, FetchError>
where
    F: Future<Output = std::result::Result<T, FetchError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = fut => result,
    }
}

fn exhausted(url: &str, e: Exhausted<FetchError>) -> Error {
    match e.last {
        FetchError::Cancelled => Error::Cancelled,
        last => Error::FetchExhausted {
            url: url.to_string(),
            attempts: e.attempts,
            source: last,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(attempts: u32) -> Fetcher {
        Fetcher::new(Client::new(), attempts)
    }

    #[tokio::test]
    async fn test_fetch_text_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let body = fetcher(3)
            .fetch_text(&format!("{}/page", server.uri()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_fetch_exhausted_reports_last_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(3)
            .fetch_text(&format!("{}/missing", server.uri()), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::FetchExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, FetchError::Http(s) if s.as_u16() == 404));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.jpg");
        let written = fetcher(1)
            .download_to(
                &format!("{}/media/a.jpg", server.uri()),
                &target,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&target).unwrap(), vec![1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_stops_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher(5)
            .fetch_text(&format!("{}/slow", server.uri()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_aborts_request_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = fetcher(3)
            .fetch_text(&format!("{}/slow", server.uri()), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
