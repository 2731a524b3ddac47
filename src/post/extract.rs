//! Schema-agnostic extraction of media entities from a post API response.
//!
//! The response layout is not stable, so nothing here follows a fixed path.
//! Every object node in the tree is tested against the recognizers below, in
//! order, before its children are visited:
//!
//! 1. video: `type == "video"`, a string `media_key` and an object `video_info`
//! 2. photo: a string `media_url_https`, and `type == "photo"` when `type` is present
//! 3. caption: `full_text` and `text` string fields (last write wins)
//!
//! A node matched by 1 or 2 is consumed whole. Caption fields never stop the walk.

use serde_json::{Map, Value};
use tracing::debug;

use super::types::{ExtractionResult, Photo, VideoGroup, VideoVariant};
use crate::error::Result;

type Object = Map<String, Value>;

/// Decodes a raw response body and extracts it.
pub fn extract_bytes(body: &[u8]) -> Result<ExtractionResult> {
    let value: Value = serde_json::from_slice(body)?;
    Ok(extract(&value))
}

pub fn extract(value: &Value) -> ExtractionResult {
    let mut result = ExtractionResult::new();
    walk(value, &mut result);
    debug!(
        photos = result.photos().len(),
        videos = result.videos().len(),
        "extraction finished"
    );
    result
}

fn walk(value: &Value, result: &mut ExtractionResult) {
    match value {
        Value::Object(object) => visit_object(object, result),
        Value::Array(items) => {
            for item in items {
                walk(item, result);
            }
        }
        _ => {}
    }
}

fn visit_object(object: &Object, result: &mut ExtractionResult) {
    if let Some(group) = recognize_video(object) {
        result.add_video(group);
        return;
    }

    if let Some(photo) = recognize_photo(object) {
        result.add_photo(photo);
        return;
    }

    if let Some(full_text) = get_str(object, "full_text") {
        result.full_text = Some(full_text.to_string());
    }
    if let Some(text) = get_str(object, "text") {
        result.text = Some(text.to_string());
    }

    for child in object.values() {
        walk(child, result);
    }
}

fn recognize_video(object: &Object) -> Option<VideoGroup> {
    if get_str(object, "type")? != "video" {
        return None;
    }
    let media_key = get_str(object, "media_key")?;
    let video_info = object.get("video_info")?.as_object()?;

    let mut variants = Vec::new();
    collect_variants(video_info, &mut variants);

    Some(VideoGroup {
        media_key: media_key.to_string(),
        variants,
    })
}

fn collect_variants(object: &Object, variants: &mut Vec<VideoVariant>) {
    if let Some(variant) = recognize_variant(object) {
        variants.push(variant);
        return;
    }

    for child in object.values() {
        collect_variants_in(child, variants);
    }
}

fn collect_variants_in(value: &Value, variants: &mut Vec<VideoVariant>) {
    match value {
        Value::Object(object) => collect_variants(object, variants),
        Value::Array(items) => {
            for item in items {
                collect_variants_in(item, variants);
            }
        }
        _ => {}
    }
}

fn recognize_variant(object: &Object) -> Option<VideoVariant> {
    Some(VideoVariant {
        bitrate: object.get("bitrate")?.as_u64()?,
        content_type: get_str(object, "content_type")?.to_string(),
        url: get_str(object, "url")?.to_string(),
    })
}

fn recognize_photo(object: &Object) -> Option<Photo> {
    let url = get_str(object, "media_url_https")?;

    if let Some(kind) = object.get("type") {
        if kind.as_str() != Some("photo") {
            return None;
        }
    }

    Some(Photo {
        url: url.to_string(),
    })
}

fn get_str<'a>(object: &'a Object, key: &str) -> Option<&'a str> {
    object.get(key)?.as_str()
}
