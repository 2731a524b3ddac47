//! Request orchestration: one post URL in, exactly one reply out.
//!
//! A request is parsed, admitted by the [`Governor`], resolved against the
//! platform, downloaded and handed to a [`Delivery`]. Whatever happens, the
//! requester gets a single terminal reply: media, text, an empty notice or an
//! error message.

pub mod caption;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bot::delivery::{Delivery, Destination, MessageHandle};
use crate::config::{CaptionConfig, Config};
use crate::error::{Error, PipelineError, Stage, StageContext};
use crate::governor::{DenyReason, Governor, Limits, RequesterId};
use crate::media::{DownloadedAsset, Fetcher, MediaDownloader};
use crate::post::{extract_bytes, Endpoints, PostClient, PostReference};
use crate::utils::format_size;

const PROGRESS_MESSAGE: &str = "Working...";
const EMPTY_MESSAGE: &str = "No photo or video found in this post.";

#[derive(Debug, Clone)]
pub struct PostRequest {
    pub url: String,
    pub requester: RequesterId,
    pub destination: Destination,
}

#[derive(Debug)]
pub enum Outcome {
    Delivered {
        messages: Vec<MessageHandle>,
        assets: Vec<DownloadedAsset>,
    },
    Text(MessageHandle),
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub caption: CaptionConfig,
    pub forward_channel: Option<u64>,
    pub download_dir: PathBuf,
    pub bot_name: Option<String>,
}

pub struct Pipeline {
    client: PostClient,
    downloader: MediaDownloader,
    governor: Arc<Governor>,
    delivery: Arc<dyn Delivery>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        client: PostClient,
        downloader: MediaDownloader,
        governor: Arc<Governor>,
        delivery: Arc<dyn Delivery>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            client,
            downloader,
            governor,
            delivery,
            settings,
        }
    }

    /// Wires the platform client, downloader and governor from configuration.
    pub fn from_config(
        config: &Config,
        delivery: Arc<dyn Delivery>,
        bot_name: Option<String>,
    ) -> anyhow::Result<Self> {
        let fetcher =
            Fetcher::from_config(&config.upstream).context("Failed to build HTTP client")?;

        let client = PostClient::new(fetcher.clone(), Endpoints::default())
            .with_save_dir(config.upstream.save_data_dir.clone());
        let governor = Governor::new(config.bot.admin(), Limits::from(&config.limits));
        let settings = PipelineSettings {
            caption: config.caption,
            forward_channel: config.bot.forward_channel(),
            download_dir: config.bot.download_dir(),
            bot_name,
        };

        Ok(Self::new(
            client,
            MediaDownloader::new(fetcher),
            Arc::new(governor),
            delivery,
            settings,
        ))
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Runs one request to completion and reports failures to the requester.
    pub async fn process(
        &self,
        request: &PostRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        let result = self.run(request, cancel).await;

        let url = request.url.as_str();
        let requester = request.requester;
        match &result {
            Ok(Outcome::Delivered { messages, assets }) => {
                info!(
                    url,
                    requester,
                    files = assets.len(),
                    messages = messages.len(),
                    "Delivered media"
                );
            }
            Ok(Outcome::Text(message)) => {
                info!(url, requester, message_id = message.message_id, "Delivered text");
            }
            Ok(Outcome::Empty) => info!(url, requester, "Nothing to deliver"),
            Err(err) => {
                warn!(url, requester, stage = %err.stage, error = %err, "Request failed");
                // media already reached the requester when forwarding fails
                if err.stage != Stage::Forward {
                    self.report(request.destination, err).await;
                }
            }
        }

        result
    }

    async fn run(
        &self,
        request: &PostRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        let post = PostReference::parse(&request.url).stage(Stage::Parse)?;

        let permit = self
            .governor
            .admit(request.requester)
            .map_err(|reason| PipelineError::new(Stage::Admission, Error::Denied(reason)))?;
        debug!(requester = permit.requester(), post = %post, "Admitted");

        let progress = self.notify_progress(request.destination).await;
        let result = self.resolve(&post, request.destination, cancel).await;
        progress.retract().await;

        result
    }

    async fn resolve(
        &self,
        post: &PostReference,
        destination: Destination,
        cancel: &CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        let credentials = self
            .client
            .credentials(post, cancel)
            .await
            .stage(Stage::Credentials)?;
        let query = self.client.query(post, &credentials).stage(Stage::Query)?;
        let body = self
            .client
            .fetch_json(&query, cancel)
            .await
            .stage(Stage::Fetch)?;
        let result = extract_bytes(&body).stage(Stage::Extract)?;
        debug!(post = %post, "Extracted:\n{result}");

        let text = result.caption();
        let bot_name = self.settings.bot_name.as_deref();

        if !result.has_media() {
            let Some(text) = text else {
                self.send_text(destination, EMPTY_MESSAGE).await?;
                return Ok(Outcome::Empty);
            };
            let message = caption::text_only(&self.settings.caption, &text, post, bot_name);
            let handle = self.send_text(destination, &message).await?;
            return Ok(Outcome::Text(handle));
        }

        let assets = self
            .downloader
            .download_selected(post, &result, &self.settings.download_dir, cancel)
            .await
            .stage(Stage::Download)?;

        let total: u64 = assets.iter().map(|a| a.size).sum();
        info!(post = %post, files = assets.len(), size = %format_size(total), "Media ready");

        let uploads: Vec<_> = assets.iter().map(DownloadedAsset::upload).collect();
        let caption = caption::compose(&self.settings.caption, text.as_deref(), post, bot_name);
        let messages = self
            .delivery
            .send_album(destination, &uploads, caption.as_deref())
            .await
            .map_err(|e| PipelineError::new(Stage::Deliver, Error::Delivery(e)))?;

        if let Some(channel) = self.settings.forward_channel {
            self.delivery
                .forward(Destination(channel), &messages)
                .await
                .map_err(|e| PipelineError::new(Stage::Forward, Error::Delivery(e)))?;
        }

        Ok(Outcome::Delivered { messages, assets })
    }

    async fn send_text(
        &self,
        destination: Destination,
        text: &str,
    ) -> Result<MessageHandle, PipelineError> {
        self.delivery
            .send_text(destination, text)
            .await
            .map_err(|e| PipelineError::new(Stage::Deliver, Error::Delivery(e)))
    }

    async fn notify_progress(&self, destination: Destination) -> Progress {
        let handle = match self.delivery.send_text(destination, PROGRESS_MESSAGE).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(error = %e, "progress message not sent");
                None
            }
        };
        Progress {
            delivery: self.delivery.clone(),
            handle,
        }
    }

    async fn report(&self, destination: Destination, err: &PipelineError) {
        if let Err(e) = self.delivery.send_text(destination, &user_message(err)).await {
            warn!(error = %e, "failed to report error to requester");
        }
    }
}

/// Runs each request on its own task and keeps track of the ones in flight.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, cancel: CancellationToken) -> Self {
        Self {
            pipeline,
            tasks: TaskTracker::new(),
            cancel,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The pipeline replies to the requester itself.
    pub fn dispatch(&self, request: PostRequest) {
        let pipeline = self.pipeline.clone();
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            let _ = pipeline.process(&request, &cancel).await;
        });
    }

    /// Stops taking requests and waits until every dispatched one has replied.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(requests = self.tasks.len(), "Waiting for in-flight requests");
        }
        self.tasks.wait().await;
    }
}

/// The "working" notice. Retracted explicitly once the request settles; if the
/// request future is dropped first, deletion is spawned from `Drop`.
struct Progress {
    delivery: Arc<dyn Delivery>,
    handle: Option<MessageHandle>,
}

impl Progress {
    async fn retract(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.delivery.delete_message(&handle).await {
                debug!(error = %e, "progress message not deleted");
            }
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let delivery = self.delivery.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = delivery.delete_message(&handle).await;
            });
        }
    }
}

pub fn denial_message(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::DailyLimitExceeded => "You have reached today's limit. Try again tomorrow.",
        DenyReason::TooManyPending => "Please wait until your previous request finishes.",
        DenyReason::UnknownRequester => "Request denied.",
    }
}

/// What the requester is told when their request fails.
pub fn user_message(err: &PipelineError) -> String {
    match &err.source {
        Error::InvalidUrl(_) => "That doesn't look like a post link.".to_string(),
        Error::Denied(reason) => denial_message(*reason).to_string(),
        Error::Cancelled => "Request cancelled.".to_string(),
        Error::DownloadFailed { path, .. } => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("Failed to download {name}.")
        }
        Error::Delivery(e) => format!("Failed to send media: {e}"),
        _ => format!("Something went wrong ({} step). Try again later.", err.stage),
    }
}
