use std::path::PathBuf;

use crate::post::MediaVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// A media variant persisted to local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAsset {
    pub path: PathBuf,
    pub variant: MediaVariant,
    pub size: u64,
}

impl DownloadedAsset {
    pub fn kind(&self) -> MediaKind {
        match self.variant {
            MediaVariant::Photo(_) => MediaKind::Photo,
            MediaVariant::Video(_) => MediaKind::Video,
        }
    }

    pub fn upload(&self) -> MediaUpload {
        MediaUpload {
            path: self.path.clone(),
            kind: self.kind(),
        }
    }
}

/// A local file handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub path: PathBuf,
    pub kind: MediaKind,
}

impl MediaUpload {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("media.{}", self.kind.extension()))
    }
}
