//! Kiosk form loop
//!
//! Line-oriented stand-in for the public visitor form. Labels may contain
//! spaces; they are matched case-insensitively against the form's fields, so
//! `set mobile no 9876543210` and `set "Mobile No" 9876543210` both work.

use super::Context;
use crate::output::{countdown, notice_line};
use anyhow::{Context as _, Result};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use visitgate_client::{
    ClientError, FormEngine, FormMode, FormPhase, FormState, InputOutcome, OtpError, OtpPhase,
    OtpSession, VisitorFile,
};

const HELP: &str = "\
Commands:
  set <label> <value>   fill in a field
  file <label> <path>   attach an image to a file field
  clear <label>         remove an attached file
  send                  send the OTP to the number entered
  resend                resend the OTP once the countdown ends
  verify <code>         check the OTP
  reset                 abandon the OTP cycle to change the number
  submit                submit the entry, or record the exit
  show                  redraw the form
  help                  show this help
  quit                  leave the kiosk";

#[derive(Debug, Clone, PartialEq, Eq)]
enum KioskCommand {
    Set { label: String, value: String },
    File { label: String, path: PathBuf },
    Clear { label: String },
    Send,
    Resend,
    Verify { code: String },
    Reset,
    Submit,
    Show,
    Help,
    Quit,
}

/// Split `rest` into a known label and what follows it.
fn split_label<'a>(rest: &'a str, labels: &[&str]) -> Option<(String, &'a str)> {
    let rest = rest.trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        let label = &quoted[..end];
        let found = labels.iter().find(|l| l.eq_ignore_ascii_case(label))?;
        return Some((found.to_string(), quoted[end + 1..].trim()));
    }

    // Longest label that matches a prefix ending at a word boundary.
    let mut best: Option<&str> = None;
    for label in labels {
        let len = label.len();
        let matches = rest
            .get(..len)
            .is_some_and(|head| head.eq_ignore_ascii_case(label))
            && rest[len..].chars().next().map_or(true, char::is_whitespace);
        if matches && best.map_or(true, |b| len > b.len()) {
            best = Some(*label);
        }
    }
    best.map(|label| (label.to_string(), rest[label.len()..].trim()))
}

fn parse(line: &str, labels: &[&str]) -> Result<KioskCommand, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let field = || {
        split_label(rest, labels).ok_or_else(|| format!("Unknown field. Fields: {}", labels.join(", ")))
    };

    match word.to_ascii_lowercase().as_str() {
        "set" => {
            let (label, value) = field()?;
            Ok(KioskCommand::Set { label, value: value.to_string() })
        }
        "file" => {
            let (label, path) = field()?;
            if path.is_empty() {
                return Err("Usage: file <label> <path>".into());
            }
            Ok(KioskCommand::File { label, path: PathBuf::from(path) })
        }
        "clear" => Ok(KioskCommand::Clear { label: field()?.0 }),
        "send" => Ok(KioskCommand::Send),
        "resend" => Ok(KioskCommand::Resend),
        "verify" if !rest.is_empty() => Ok(KioskCommand::Verify { code: rest.to_string() }),
        "verify" => Err("Usage: verify <code>".into()),
        "reset" => Ok(KioskCommand::Reset),
        "submit" => Ok(KioskCommand::Submit),
        "show" => Ok(KioskCommand::Show),
        "help" | "?" => Ok(KioskCommand::Help),
        "quit" | "exit" | "q" => Ok(KioskCommand::Quit),
        other => Err(format!("Unknown command `{}`; type `help`", other)),
    }
}

fn otp_badge(session: &OtpSession) -> String {
    match session.phase() {
        OtpPhase::Idle => String::new(),
        OtpPhase::Sending => "[sending OTP...]".dimmed().to_string(),
        OtpPhase::Verifying => "[verifying...]".dimmed().to_string(),
        OtpPhase::Verified => "[OTP verified]".green().to_string(),
        OtpPhase::Sent => match session.countdown_seconds {
            Some(s) if s > 0 => format!("[OTP sent, resend in {}]", countdown(s)).yellow().to_string(),
            _ => "[OTP sent, resend available]".yellow().to_string(),
        },
    }
}

fn render(state: &FormState, otp: Option<&(String, OtpSession)>, api_url: &str) {
    let company = state
        .schema
        .company
        .as_ref()
        .map(|c| c.name.as_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("Visitor");
    let title = match state.mode {
        FormMode::Entry => "Visitor entry",
        FormMode::Exit => "Visitor exit",
    };
    println!();
    println!("{}", format!("{} | {}", company, title).bold());
    if let Some(logo) = state.schema.company.as_ref().and_then(|c| c.logo_url(api_url)) {
        println!("{}", logo.dimmed());
    }

    for field in state.visible_fields() {
        let value = if field.is_file() {
            state
                .values
                .get(&field.label)
                .and_then(|v| v.as_file())
                .map(|f| format!("{} ({} KB)", f.file_name, f.len().div_ceil(1024)))
                .unwrap_or_default()
        } else {
            state.values.text(&field.label).unwrap_or_default().to_string()
        };
        let badge = match otp {
            Some((label, session)) if *label == field.label => otp_badge(session),
            _ => String::new(),
        };
        println!(
            "  {:<20} {:<10} {} {}",
            field.label,
            format!("({})", field.field_type.as_str()).dimmed(),
            value,
            badge
        );
        if let Some(error) = state.errors.get(&field.label) {
            println!("  {}", error.red());
        }
    }
    if state.mode == FormMode::Exit {
        println!("{}", "Verify the number, then `submit` to record the exit.".dimmed());
    }
    if let Some(message) = &state.message {
        println!("{}", notice_line(message));
    }
}

/// Whether the form needs drawing again after `command` ran. A mode switch
/// (typing a checked-in number flips the form to exit mode) always does.
fn needs_redraw(command: &KioskCommand, before: FormMode, after: FormMode) -> bool {
    before != after
        || matches!(
            command,
            KioskCommand::Show | KioskCommand::Submit | KioskCommand::Verify { .. }
        )
}

async fn execute(engine: &FormEngine, command: KioskCommand) -> Result<()> {
    match command {
        KioskCommand::Set { label, value } => match engine.set_value(&label, &value).await? {
            InputOutcome::Accepted => {}
            InputOutcome::Rejected(bounds) => println!(
                "{}",
                format!("\"{}\" takes {}-{} digits", label, bounds.min, bounds.max).yellow()
            ),
            InputOutcome::Locked => println!(
                "{}",
                "The number is locked while an OTP is pending; `reset` to change it.".yellow()
            ),
        },
        KioskCommand::File { label, path } => {
            let file = VisitorFile::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let name = file.file_name.clone();
            engine.attach_file(&label, file)?;
            println!("Attached {}", name);
        }
        KioskCommand::Clear { label } => engine.clear_file(&label)?,
        KioskCommand::Send => engine.send_otp().await?,
        KioskCommand::Resend => engine.resend_otp().await?,
        KioskCommand::Verify { code } => {
            let outcome = engine.verify_otp(&code).await?;
            if outcome.mode == FormMode::Exit {
                println!("{}", "This visitor is checked in.".cyan());
            }
            if !outcome.prefilled.is_empty() {
                println!("Filled in from the last visit: {}", outcome.prefilled.join(", "));
            }
        }
        KioskCommand::Reset => engine.reset_otp()?,
        KioskCommand::Submit => {
            engine.submit().await?;
        }
        KioskCommand::Show | KioskCommand::Help | KioskCommand::Quit => {}
    }
    Ok(())
}

pub async fn run(ctx: &Context, company_id: Option<String>) -> Result<()> {
    let company_id = ctx.company_id(company_id)?;
    let engine = Arc::new(FormEngine::from_config(&ctx.client)?);

    let mut notices = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => println!("{}", notice_line(&notice)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    tracing::debug!(company_id = %company_id, api_url = %ctx.client.api_url, "Starting kiosk");
    let phase = engine.load(&company_id).await?;
    let state = engine.snapshot();
    if phase == FormPhase::NotFound {
        println!("{}", "Form not found.".red());
        printer.abort();
        return Ok(());
    }
    if state.schema.has_no_fields() {
        render(&state, None, &ctx.client.api_url);
        println!("This company has not configured any visitor fields yet.");
        printer.abort();
        return Ok(());
    }

    let labels: Vec<String> = state.schema.fields.iter().map(|f| f.label.clone()).collect();
    let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    render(&state, engine.otp_session().as_ref(), &ctx.client.api_url);
    println!("{}", "Type `help` for commands.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse(&line, &labels) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message.yellow());
                continue;
            }
        };
        match command {
            KioskCommand::Quit => break,
            KioskCommand::Help => {
                println!("{}", HELP);
                continue;
            }
            _ => {}
        }

        let mode_before = engine.snapshot().mode;
        let ran = command.clone();
        if let Err(e) = execute(&engine, command).await {
            // Server-side OTP failures arrive as notices; submission failures
            // show up in the redrawn form.
            let surfaced = matches!(
                e.downcast_ref::<ClientError>(),
                Some(ClientError::Otp(OtpError::Api(_)) | ClientError::Submit(_))
            );
            if !surfaced {
                println!("{}", format!("{:#}", e).red());
            }
        }
        // Let queued notices print before the form is redrawn.
        tokio::task::yield_now().await;
        let state = engine.snapshot();
        if needs_redraw(&ran, mode_before, state.mode) {
            render(&state, engine.otp_session().as_ref(), &ctx.client.api_url);
        }
    }

    engine.close();
    printer.abort();
    Ok(())
}
