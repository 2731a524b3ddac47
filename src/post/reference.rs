use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static POST_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://(?:www\.)?(?:twitter|x)\.com/(?P<user>[A-Za-z0-9_]+)/status/(?P<id>\d+)(?:[?#/].*)?$")
        .unwrap()
});

/// Author handle and numeric ID of a single post.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostReference {
    pub user: String,
    pub id: String,
}

impl PostReference {
    /// Parses a post URL. Query parameters and fragments are ignored.
    pub fn parse(url: &str) -> Result<Self> {
        let captures = POST_URL_REGEX
            .captures(url.trim())
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

        Ok(Self {
            user: captures["user"].to_string(),
            id: captures["id"].to_string(),
        })
    }

    pub fn is_valid_url(url: &str) -> bool {
        Self::parse(url).is_ok()
    }

    /// Path of the post page relative to the site root.
    pub fn page_path(&self) -> String {
        format!("{}/status/{}", self.user, self.id)
    }

    /// Filename stem shared by every asset downloaded for this post.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.user, self.id)
    }
}

impl fmt::Display for PostReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://twitter.com/{}", self.page_path())
    }
}
