use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::media::Fetcher;

static GUEST_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"cookie="gt=(\d+)"#).unwrap());

// e.g. https://abs.twimg.com/responsive-web/client-web-legacy/main.3ba1b53a.js
static BUNDLE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^"'\s]+/responsive-web/client-web(?:-legacy)?/main\.[a-f0-9]+\.js"#).unwrap()
});

static BEARER_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Bearer ([a-zA-Z0-9%]+)").unwrap());

/// Short-lived tokens for the unauthenticated API surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub bearer: String,
    pub guest_token: String,
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bearer {}, GuestToken {}", self.bearer, self.guest_token)
    }
}

pub fn find_guest_token(page: &str) -> Option<&str> {
    GUEST_TOKEN_REGEX
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// First client bundle referenced by `page` that is served from `cdn`.
pub fn find_bundle_url(page: &str, cdn: &Url) -> Option<Url> {
    BUNDLE_URL_REGEX
        .find_iter(page)
        .filter_map(|m| Url::parse(m.as_str()).ok())
        .find(|url| url.origin() == cdn.origin())
}

/// The bundle may carry several tokens; the last one is the one in use.
pub fn find_bearer_token(bundle: &str) -> Option<&str> {
    BEARER_TOKEN_REGEX
        .captures_iter(bundle)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Raw documents fetched while acquiring credentials.
#[derive(Debug)]
pub struct ScrapedPage {
    pub credentials: Credentials,
    pub page: String,
}

/// Fetches the public post page and its client bundle, and pulls both tokens out of them.
pub async fn acquire_credentials(
    fetcher: &Fetcher,
    page_url: &str,
    cdn: &Url,
    cancel: &CancellationToken,
) -> Result<ScrapedPage> {
    let page = fetcher.fetch_text(page_url, cancel).await?;

    let guest_token = find_guest_token(&page)
        .ok_or(Error::TokenNotFound("guest token"))?
        .to_string();
    let bundle_url =
        find_bundle_url(&page, cdn).ok_or(Error::TokenNotFound("client bundle URL"))?;

    debug!(url = %bundle_url, "main js url");

    let bundle = fetcher.fetch_text(bundle_url.as_str(), cancel).await?;
    let bearer = find_bearer_token(&bundle)
        .ok_or(Error::TokenNotFound("bearer token"))?
        .to_string();

    Ok(ScrapedPage {
        credentials: Credentials {
            bearer,
            guest_token,
        },
        page,
    })
}
