pub mod delivery;
pub mod discord;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub async fn run(config: &Config, cancel: CancellationToken) -> Result<()> {
    discord::run(config, cancel).await
}
