use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use twilight_gateway::{Event, EventTypeFlags, Intents, Shard, ShardId, StreamExt};
use twilight_http::Client as HttpClient;
use twilight_model::{
    application::{
        command::CommandType,
        interaction::{
            application_command::{CommandData, CommandOptionValue},
            Interaction, InteractionData, InteractionType,
        },
    },
    channel::message::MessageFlags,
    gateway::payload::incoming::MessageCreate,
    http::interaction::{InteractionResponse, InteractionResponseData, InteractionResponseType},
    id::{marker::ApplicationMarker, Id},
};
use twilight_util::builder::command::{CommandBuilder, StringBuilder};

use super::delivery::{Delivery, Destination, DiscordDelivery};
use crate::config::{BotConfig, Config};
use crate::governor::{Governor, RequesterId};
use crate::pipeline::{denial_message, Dispatcher, Pipeline, PostRequest};
use crate::post::PostReference;

const USAGE: &str = "Send me a link to a post, like https://x.com/<user>/status/<id>, \
and I will reply with its photos and videos. Send /status to see today's usage.";

pub struct DiscordBot {
    http: Arc<HttpClient>,
    shard: Shard,
    delivery: Arc<DiscordDelivery>,
    requests: Dispatcher,
    config: BotConfig,
    application_id: Id<ApplicationMarker>,
    cancel: CancellationToken,
}

impl DiscordBot {
    pub async fn new(token: String, config: &Config, cancel: CancellationToken) -> Result<Self> {
        let http = Arc::new(HttpClient::new(token.clone()));

        let intents = Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES | Intents::MESSAGE_CONTENT;
        let shard = Shard::new(ShardId::ONE, token, intents);

        let bot_name = {
            let response = http.current_user().await?;
            response.model().await?.name
        };
        let application_id = {
            let response = http.current_user_application().await?;
            response.model().await?.id
        };
        info!(bot_name = %bot_name, "Logged in");

        let delivery = Arc::new(DiscordDelivery::new(http.clone()));
        let pipeline = Pipeline::from_config(config, delivery.clone(), Some(bot_name))
            .context("Failed to initialize pipeline")?;

        let bot = Self {
            http,
            shard,
            delivery,
            requests: Dispatcher::new(Arc::new(pipeline), cancel.clone()),
            config: config.bot.clone(),
            application_id,
            cancel,
        };

        bot.register_commands().await?;

        Ok(bot)
    }

    async fn register_commands(&self) -> Result<()> {
        info!("Registering Discord slash commands...");

        let fetch_command = CommandBuilder::new(
            "fetch".to_string(),
            "Fetch the photos and videos of a post".to_string(),
            CommandType::ChatInput,
        )
        .option(StringBuilder::new("url", "Link to the post").required(true))
        .build();

        self.http
            .interaction(self.application_id)
            .create_global_command()
            .chat_input(&fetch_command.name, &fetch_command.description)
            .command_options(&fetch_command.options)
            .await?;

        info!("Successfully registered /fetch slash command");
        Ok(())
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Discord bot starting...");

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutting down");
                    self.requests.shutdown().await;
                    return Ok(());
                }
                event = self.shard.next_event(EventTypeFlags::all()) => event,
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(source)) => {
                    error!(?source, "Error receiving event");
                    continue;
                }
                None => {
                    info!("Shard stream ended");
                    self.requests.shutdown().await;
                    return Ok(());
                }
            };

            let result = match event {
                Event::MessageCreate(msg) => self.handle_message(&msg).await,
                Event::InteractionCreate(interaction) => self.handle_interaction(&interaction).await,
                Event::Ready(_) => {
                    info!("Discord bot is ready!");
                    Ok(())
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                error!(error = ?e, "Failed to handle event");
            }
        }
    }

    async fn handle_message(&self, msg: &MessageCreate) -> Result<()> {
        if msg.author.bot {
            return Ok(());
        }

        let requester = msg.author.id.get();
        let channel_id = msg.channel_id.get();
        let is_direct = msg.guild_id.is_none();
        if !accepts(&self.config, requester, channel_id, is_direct) {
            return Ok(());
        }
        self.governor().register(requester);

        if is_direct && msg.content.trim() == "/status" {
            let text = status_message(self.governor(), requester);
            self.delivery.send_text(Destination(channel_id), &text).await?;
            return Ok(());
        }

        let urls = extract_post_urls(&msg.content);
        if urls.is_empty() {
            if is_direct || is_help_command(&msg.content) {
                self.delivery.send_text(Destination(channel_id), USAGE).await?;
            }
            return Ok(());
        }

        for url in urls {
            self.requests.dispatch(PostRequest {
                url,
                requester,
                destination: Destination(channel_id),
            });
        }

        Ok(())
    }

    async fn handle_interaction(&self, interaction: &Interaction) -> Result<()> {
        if interaction.kind != InteractionType::ApplicationCommand {
            return Ok(());
        }

        if let Some(InteractionData::ApplicationCommand(data)) = &interaction.data {
            match data.name.as_str() {
                "fetch" => self.handle_fetch_command(interaction, data).await?,
                _ => info!("Unknown command: {}", data.name),
            }
        }

        Ok(())
    }

    async fn handle_fetch_command(&self, interaction: &Interaction, data: &CommandData) -> Result<()> {
        let url = data
            .options
            .iter()
            .find(|opt| opt.name == "url")
            .and_then(|opt| match &opt.value {
                CommandOptionValue::String(s) => Some(s.trim()),
                _ => None,
            })
            .unwrap_or("");

        let (Some(author), Some(channel)) = (interaction.author_id(), interaction.channel.as_ref())
        else {
            debug!("interaction without author or channel");
            return Ok(());
        };
        let requester = author.get();

        if self.config.restrict_to_admin && !is_admin(&self.config, requester) {
            self.respond_to_interaction(interaction, "This bot is private.")
                .await?;
            return Ok(());
        }

        if !PostReference::is_valid_url(url) {
            self.respond_to_interaction(interaction, USAGE).await?;
            return Ok(());
        }

        let governor = self.governor();
        governor.register(requester);
        if let Err(reason) = governor.can_admit(requester) {
            self.respond_to_interaction(interaction, denial_message(reason))
                .await?;
            return Ok(());
        }

        self.respond_to_interaction(interaction, &format!("Fetching {url}"))
            .await?;

        debug!(requester, url, "fetch command");
        self.requests.dispatch(PostRequest {
            url: url.to_string(),
            requester,
            destination: Destination(channel.id.get()),
        });

        Ok(())
    }

    async fn respond_to_interaction(&self, interaction: &Interaction, content: &str) -> Result<()> {
        let response = InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                allowed_mentions: None,
                attachments: None,
                choices: None,
                components: None,
                content: Some(content.to_string()),
                custom_id: None,
                embeds: None,
                flags: Some(MessageFlags::EPHEMERAL),
                poll: None,
                title: None,
                tts: None,
            }),
        };

        self.http
            .interaction(self.application_id)
            .create_response(interaction.id, &interaction.token, &response)
            .await?;

        Ok(())
    }

    fn governor(&self) -> &Governor {
        self.requests.pipeline().governor()
    }
}

fn is_admin(config: &BotConfig, requester: RequesterId) -> bool {
    config.admin() == Some(requester)
}

/// Whether a message from `requester` in `channel_id` should be looked at.
fn accepts(config: &BotConfig, requester: RequesterId, channel_id: u64, is_direct: bool) -> bool {
    if config.restrict_to_admin && !is_admin(config, requester) {
        return false;
    }
    is_direct || config.is_watch_channel(channel_id)
}

fn status_message(governor: &Governor, requester: RequesterId) -> String {
    if governor.is_admin(requester) {
        return "No limits apply to you.".to_string();
    }
    let limits = governor.limits();
    let (used, pending) = governor
        .usage(requester)
        .map(|state| (state.queries_today, state.pending))
        .unwrap_or_default();
    format!(
        "Today: {used}/{} requests, {pending} in progress.",
        limits.per_day
    )
}

fn is_help_command(content: &str) -> bool {
    matches!(content.trim(), "/start" | "help" | "/help")
}

fn extract_post_urls(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .filter(|word| PostReference::is_valid_url(word))
        .map(str::to_string)
        .collect()
}

pub async fn run(config: &Config, cancel: CancellationToken) -> Result<()> {
    let token = config
        .get_discord_token()
        .context("A Discord token is required: set discord.token or DISCORD_TOKEN")?;

    let bot = DiscordBot::new(token, config, cancel).await?;
    bot.run().await
}
