//! Session commands

use super::Context;
use crate::SessionCommands;
use anyhow::{bail, Result};
use serde::Serialize;
use std::io::Write;
use tabled::Tabled;
use tokio::io::{AsyncBufReadExt, BufReader};
use visitgate_client::{Role, RoleSession, SessionClient, SessionContext};

#[derive(Serialize, Tabled)]
struct SessionRow {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Saved")]
    saved_at: String,
}

impl SessionRow {
    fn new(role: Role, session: &RoleSession) -> Self {
        Self {
            role: role.to_string(),
            name: profile_name(session).unwrap_or_else(|| "-".into()),
            saved_at: session.saved_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Best display name in a sign-in profile.
fn profile_name(session: &RoleSession) -> Option<String> {
    let profile = session.profile.as_ref()?;
    ["name", "companyName", "emailId", "email", "mobile"]
        .into_iter()
        .find_map(|key| profile.get(key)?.as_str().map(String::from))
}

async fn prompt_password() -> Result<String> {
    print!("Password: ");
    std::io::stdout().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await? {
        Some(line) if !line.trim().is_empty() => Ok(line.trim().to_string()),
        _ => bail!("No password given"),
    }
}

pub async fn handle(action: SessionCommands, ctx: &Context) -> Result<()> {
    let path = ctx.config.session_path()?;
    let mut sessions = SessionContext::load(&path)?;

    match action {
        SessionCommands::Login { role, identifier, password } => {
            let role = Role::from(role);
            let password = match password {
                Some(p) => p,
                None => prompt_password().await?,
            };
            let client = SessionClient::new(ctx.api()?);
            let session = client.login(role, &identifier, &password).await?;
            let name = profile_name(&session);
            sessions.set(role, session);
            sessions.save(&path)?;
            tracing::debug!(role = %role, path = %path.display(), "Stored session");
            match name {
                Some(name) => println!("Signed in as {} ({})", name, role),
                None => println!("Signed in as {}", role),
            }
        }
        SessionCommands::Logout { role, all } => {
            if all {
                sessions.clear_all();
                println!("Signed out of all roles");
            } else {
                let Some(role) = role.map(Role::from) else {
                    bail!("Pass a role or --all");
                };
                if sessions.clear(role).is_none() {
                    println!("Not signed in as {}", role);
                    return Ok(());
                }
                println!("Signed out of {}", role);
            }
            sessions.save(&path)?;
        }
        SessionCommands::Show => {
            let rows: Vec<SessionRow> = sessions
                .iter()
                .map(|(role, session)| SessionRow::new(role, session))
                .collect();
            if rows.is_empty() {
                println!("No stored sessions");
            } else {
                ctx.format.print(&rows, rows.iter());
            }
        }
        SessionCommands::Verify { role } => {
            let role = Role::from(role);
            let client = SessionClient::new(ctx.api()?);
            client.refresh(&mut sessions, role).await?;
            sessions.save(&path)?;
            println!("Session for {} is valid", role);
        }
    }
    Ok(())
}
