use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static TRAILING_SHORT_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://t\.co/\w+$").unwrap());

/// Last path segment of a URL with any query string removed.
pub fn url_filename(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query.rsplit('/').next().unwrap_or(without_query)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoVariant {
    pub bitrate: u64,
    pub content_type: String,
    pub url: String,
}

/// A single downloadable asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaVariant {
    Photo(Photo),
    Video(VideoVariant),
}

impl MediaVariant {
    pub fn url(&self) -> &str {
        match self {
            MediaVariant::Photo(photo) => &photo.url,
            MediaVariant::Video(variant) => &variant.url,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            MediaVariant::Photo(photo) => url_filename(&photo.url),
            MediaVariant::Video(variant) => url_filename(&variant.url),
        }
    }
}

/// Encodings of one logical video, keyed by its media key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoGroup {
    pub media_key: String,
    pub variants: Vec<VideoVariant>,
}

impl VideoGroup {
    /// Highest-bitrate variant; the first one seen wins a tie.
    pub fn best(&self) -> Option<&VideoVariant> {
        self.variants.iter().fold(None, |best, variant| match best {
            Some(current) if current.bitrate >= variant.bitrate => Some(current),
            _ => Some(variant),
        })
    }
}

/// Everything recovered from one post's API response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    photos: Vec<Photo>,
    videos: Vec<VideoGroup>,
    pub full_text: Option<String>,
    pub text: Option<String>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a photo with the same URL is already present.
    pub fn add_photo(&mut self, photo: Photo) -> bool {
        if self.photos.iter().any(|p| p.url == photo.url) {
            return false;
        }
        self.photos.push(photo);
        true
    }

    /// Returns false when a group with the same media key is already present.
    pub fn add_video(&mut self, group: VideoGroup) -> bool {
        if self.videos.iter().any(|v| v.media_key == group.media_key) {
            return false;
        }
        self.videos.push(group);
        true
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn videos(&self) -> &[VideoGroup] {
        &self.videos
    }

    pub fn has_media(&self) -> bool {
        !self.photos.is_empty() || !self.videos.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_media() && self.caption().is_none()
    }

    pub fn best_videos(&self) -> Vec<&VideoVariant> {
        self.videos.iter().filter_map(VideoGroup::best).collect()
    }

    /// Long-form text with a trailing short link stripped.
    pub fn clean_text(&self) -> Option<String> {
        let full_text = self.full_text.as_deref()?;
        let cleaned = TRAILING_SHORT_LINK_REGEX.replace(full_text, "");
        let cleaned = cleaned.trim_end();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned.to_string())
        }
    }

    /// Post text: the short form when present, else the cleaned long form.
    pub fn caption(&self) -> Option<String> {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => Some(text.to_string()),
            _ => self.clean_text(),
        }
    }

    /// Variants selected for download: every photo, then each group's best variant.
    pub fn selected_variants(&self) -> Vec<MediaVariant> {
        self.photos
            .iter()
            .cloned()
            .map(MediaVariant::Photo)
            .chain(
                self.best_videos()
                    .into_iter()
                    .cloned()
                    .map(MediaVariant::Video),
            )
            .collect()
    }
}

impl fmt::Display for ExtractionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let videos: Vec<&str> = self.best_videos().iter().map(|v| v.url.as_str()).collect();
        let photos: Vec<&str> = self.photos.iter().map(|p| p.url.as_str()).collect();
        write!(
            f,
            "Videos: {:?}, Photos: {:?}, FullText: {}, Text: {}",
            videos,
            photos,
            self.clean_text().unwrap_or_default(),
            self.text.as_deref().unwrap_or_default()
        )
    }
}
