//! CLI Commands

pub mod config;
pub mod form;
pub mod schema;
pub mod session;
pub mod status;

use crate::config::Config;
use crate::output::OutputFormat;
use anyhow::{anyhow, Result};
use visitgate_client::{ClientConfig, HttpVisitorApi};

/// Settings resolved from flags, environment and config files.
pub struct Context {
    pub client: ClientConfig,
    pub config: Config,
    pub profile: Option<String>,
    pub format: OutputFormat,
}

impl Context {
    pub fn company_id(&self, arg: Option<String>) -> Result<String> {
        arg.or_else(|| self.config.company_id.clone()).ok_or_else(|| {
            anyhow!("No company id given; pass one or run `visitgate config set company_id <ID>`")
        })
    }

    pub fn api(&self) -> Result<HttpVisitorApi> {
        Ok(HttpVisitorApi::from_config(&self.client)?)
    }
}
