//! Output formatting

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use visitgate_client::{Notice, NoticeLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Print `rows` as a table, or `data` as JSON / YAML.
    pub fn print<T: Serialize, R: Tabled>(&self, data: &T, rows: impl IntoIterator<Item = R>) {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
            }
            OutputFormat::Yaml => {
                println!("{}", serde_yaml::to_string(data).unwrap_or_default());
            }
            OutputFormat::Table => {
                println!("{}", Table::new(rows));
            }
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Single-line rendering of a notice or banner.
pub fn notice_line(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Success => format!("✔ {}", notice.text).green().to_string(),
        NoticeLevel::Error => format!("✘ {}", notice.text).red().to_string(),
        NoticeLevel::Info => format!("ℹ {}", notice.text).cyan().to_string(),
    }
}

/// `m:ss`, the way the resend countdown is shown.
pub fn countdown(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
