//! Config commands

use super::Context;
use crate::config::{Config, KEYS};
use crate::ConfigCommands;
use anyhow::Result;

pub async fn handle(action: ConfigCommands, ctx: &Context) -> Result<()> {
    let profile = ctx.profile.as_deref();
    match action {
        ConfigCommands::Init => {
            let config = Config {
                api_url: Some(ctx.client.api_url.clone()),
                ..Default::default()
            };
            let path = config.save(profile)?;
            println!("Configuration initialized at {}", path.display());
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load(profile)?;
            config.set(&key, value)?;
            config.save(profile)?;
            println!("Set {} successfully", key);
        }
        ConfigCommands::Get { key } => {
            let value = ctx.config.get(&key)?;
            println!("{}: {}", key, value.unwrap_or_else(|| "(not set)".into()));
        }
        ConfigCommands::List => {
            for key in KEYS {
                let value = ctx.config.get(key)?;
                println!("{}: {}", key, value.unwrap_or_else(|| "(not set)".into()));
            }
        }
    }
    Ok(())
}
