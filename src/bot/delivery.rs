//! Outbound side of the bot: how finished results reach a chat.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use twilight_http::Client as HttpClient;
use twilight_model::{
    channel::Message,
    http::attachment::Attachment,
    id::{
        marker::{ChannelMarker, MessageMarker},
        Id,
    },
};

use crate::media::MediaUpload;
use crate::utils::{format_size, truncate_chars};

/// Discord's attachment limit for most servers.
pub const MAX_UPLOAD_SIZE: u64 = 25_000_000;
const MAX_ATTACHMENTS_PER_MESSAGE: usize = 10;
const MAX_CONTENT_LENGTH: usize = 2000;

/// A chat the bot can post into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination(pub u64);

/// A message the bot sent, enough to delete or forward it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel_id: u64,
    pub message_id: u64,
    pub attachment_urls: Vec<String>,
}

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send_text(&self, destination: Destination, text: &str) -> Result<MessageHandle>;

    /// Uploads local files, with the caption on the first message.
    async fn send_album(
        &self,
        destination: Destination,
        media: &[MediaUpload],
        caption: Option<&str>,
    ) -> Result<Vec<MessageHandle>>;

    async fn forward(&self, channel: Destination, messages: &[MessageHandle]) -> Result<()>;

    async fn delete_message(&self, message: &MessageHandle) -> Result<()>;
}

pub struct DiscordDelivery {
    http: Arc<HttpClient>,
}

impl DiscordDelivery {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    async fn create_message(
        &self,
        destination: Destination,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<MessageHandle> {
        let channel_id = channel_id(destination.0)?;
        let content = truncate_chars(content, MAX_CONTENT_LENGTH);

        let mut request = self.http.create_message(channel_id);
        if !content.is_empty() {
            request = request.content(content);
        }
        if !attachments.is_empty() {
            request = request.attachments(attachments);
        }

        let message = request.await?.model().await?;
        Ok(handle(&message))
    }
}

#[async_trait]
impl Delivery for DiscordDelivery {
    async fn send_text(&self, destination: Destination, text: &str) -> Result<MessageHandle> {
        self.create_message(destination, text, &[]).await
    }

    async fn send_album(
        &self,
        destination: Destination,
        media: &[MediaUpload],
        caption: Option<&str>,
    ) -> Result<Vec<MessageHandle>> {
        let mut files = Vec::with_capacity(media.len());
        for upload in media {
            files.push(read_upload(upload, MAX_UPLOAD_SIZE).await?);
        }

        let chunks = files.chunks(MAX_ATTACHMENTS_PER_MESSAGE);
        let handles = send_chunks(chunks, |index, chunk| {
            let attachments: Vec<Attachment> = chunk
                .iter()
                .enumerate()
                .map(|(idx, (name, data))| {
                    Attachment::from_bytes(name.clone(), data.clone(), idx as u64)
                })
                .collect();
            let content = if index == 0 { caption.unwrap_or_default() } else { "" };
            async move { self.create_message(destination, content, &attachments).await }
        })
        .await?;

        info!(
            channel = destination.0,
            files = media.len(),
            messages = handles.len(),
            "Uploaded media"
        );
        Ok(handles)
    }

    async fn forward(&self, channel: Destination, messages: &[MessageHandle]) -> Result<()> {
        for content in forward_contents(messages) {
            self.create_message(channel, &content, &[]).await?;
        }
        debug!(channel = channel.0, count = messages.len(), "Forwarded messages");
        Ok(())
    }

    async fn delete_message(&self, message: &MessageHandle) -> Result<()> {
        let message_id = Id::<MessageMarker>::new_checked(message.message_id)
            .context("message id must be non-zero")?;
        self.http
            .delete_message(channel_id(message.channel_id)?, message_id)
            .await?;
        Ok(())
    }
}

fn channel_id(id: u64) -> Result<Id<ChannelMarker>> {
    Id::new_checked(id).context("channel id must be non-zero")
}

fn handle(message: &Message) -> MessageHandle {
    MessageHandle {
        channel_id: message.channel_id.get(),
        message_id: message.id.get(),
        attachment_urls: message.attachments.iter().map(|a| a.url.clone()).collect(),
    }
}

/// Sends one message per chunk. A failure on the first chunk is returned. Once
/// media has reached the chat, a later failure is only logged and the messages
/// sent so far are returned, so the requester is not told the album failed.
async fn send_chunks<T, F, Fut>(
    chunks: impl IntoIterator<Item = T>,
    mut send: F,
) -> Result<Vec<MessageHandle>>
where
    F: FnMut(usize, T) -> Fut,
    Fut: Future<Output = Result<MessageHandle>>,
{
    let mut handles = Vec::new();
    for (index, chunk) in chunks.into_iter().enumerate() {
        match send(index, chunk).await {
            Ok(handle) => handles.push(handle),
            Err(e) if handles.is_empty() => return Err(e),
            Err(e) => {
                warn!(error = %e, sent = handles.len(), "Album partially delivered");
                break;
            }
        }
    }
    Ok(handles)
}

/// Reads a file for upload, refusing anything above `limit` bytes.
async fn read_upload(upload: &MediaUpload, limit: u64) -> Result<(String, Vec<u8>)> {
    let name = upload.filename();
    let size = tokio::fs::metadata(&upload.path)
        .await
        .with_context(|| format!("Failed to stat {}", upload.path.display()))?
        .len();

    if size > limit {
        bail!(
            "{name} is too large to upload ({}, limit is {})",
            format_size(size),
            format_size(limit)
        );
    }

    let data = tokio::fs::read(&upload.path)
        .await
        .with_context(|| format!("Failed to read {}", upload.path.display()))?;
    Ok((name, data))
}

/// Attachment links of the given messages, packed into as few posts as fit.
fn forward_contents(messages: &[MessageHandle]) -> Vec<String> {
    let mut contents = Vec::new();
    let mut current = String::new();

    for url in messages.iter().flat_map(|m| &m.attachment_urls) {
        if !current.is_empty() && current.len() + 1 + url.len() > MAX_CONTENT_LENGTH {
            contents.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(url);
    }
    if !current.is_empty() {
        contents.push(current);
    }

    contents
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory stand-in for a chat, recording everything sent to it.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text {
            destination: u64,
            text: String,
        },
        Album {
            destination: u64,
            files: Vec<String>,
            caption: Option<String>,
        },
        Forward {
            channel: u64,
            messages: Vec<u64>,
        },
        Delete {
            message_id: u64,
        },
    }

    #[derive(Default)]
    pub struct RecordingDelivery {
        sent: Mutex<Vec<Sent>>,
        next_id: AtomicU64,
        fail_album: bool,
        fail_forward: bool,
    }

    impl RecordingDelivery {
        pub fn failing_album() -> Self {
            Self {
                fail_album: true,
                ..Self::default()
            }
        }

        pub fn failing_forward() -> Self {
            Self {
                fail_forward: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Text { text, .. } => Some(text),
                    _ => None,
                })
                .collect()
        }

        fn next_handle(&self, destination: Destination, attachments: Vec<String>) -> MessageHandle {
            MessageHandle {
                channel_id: destination.0,
                message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                attachment_urls: attachments,
            }
        }
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn send_text(&self, destination: Destination, text: &str) -> Result<MessageHandle> {
            self.sent.lock().push(Sent::Text {
                destination: destination.0,
                text: text.to_string(),
            });
            Ok(self.next_handle(destination, Vec::new()))
        }

        async fn send_album(
            &self,
            destination: Destination,
            media: &[MediaUpload],
            caption: Option<&str>,
        ) -> Result<Vec<MessageHandle>> {
            if self.fail_album {
                bail!("upload rejected");
            }
            let files: Vec<String> = media.iter().map(MediaUpload::filename).collect();
            self.sent.lock().push(Sent::Album {
                destination: destination.0,
                files: files.clone(),
                caption: caption.map(str::to_string),
            });
            Ok(vec![self.next_handle(destination, files)])
        }

        async fn forward(&self, channel: Destination, messages: &[MessageHandle]) -> Result<()> {
            if self.fail_forward {
                bail!("forward channel unavailable");
            }
            self.sent.lock().push(Sent::Forward {
                channel: channel.0,
                messages: messages.iter().map(|m| m.message_id).collect(),
            });
            Ok(())
        }

        async fn delete_message(&self, message: &MessageHandle) -> Result<()> {
            self.sent.lock().push(Sent::Delete {
                message_id: message.message_id,
            });
            Ok(())
        }
    }
}
