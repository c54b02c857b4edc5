use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_settings, ChatClient, GateState, MediaFile, SendOutcome};
use shared::domain::{ChatId, ChatMessage};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured server url.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    access_token: Option<String>,
    #[arg(long)]
    account_id: Option<i64>,
    /// Print records as JSON instead of text.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List,
    Show {
        chat_id: i64,
        /// Number of older pages to load after the first.
        #[arg(long, default_value_t = 0)]
        older: u32,
    },
    Send {
        chat_id: i64,
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Accept {
        chat_id: i64,
    },
    Leave {
        chat_id: i64,
    },
    Report {
        chat_id: i64,
        reason: String,
    },
}

fn print_message(message: &ChatMessage, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(message)?);
        return Ok(());
    }
    let marker = if message.pending { " (pending)" } else { "" };
    let attachment = message
        .attachment
        .as_ref()
        .map(|attachment| format!(" [{}]", attachment.filename))
        .unwrap_or_default();
    println!(
        "{} #{}: {}{attachment}{marker}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.author_id,
        message.content
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings()?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(token) = cli.access_token {
        settings.access_token = Some(token);
    }
    if let Some(account_id) = cli.account_id {
        settings.account_id = account_id;
    }
    let client = ChatClient::connect(settings)?;

    match cli.command {
        Command::List => {
            for chat in client.list_chats().await? {
                if cli.json {
                    println!("{}", serde_json::to_string(&chat)?);
                    continue;
                }
                let state = if chat.is_unsolicited_for(client.account_id()) {
                    "request"
                } else {
                    "accepted"
                };
                println!(
                    "chat {} with #{} ({state})",
                    chat.chat_id, chat.participant
                );
            }
        }
        Command::Show { chat_id, older } => {
            let chat_id = ChatId(chat_id);
            client.open_chat(chat_id).await?;
            for _ in 0..older {
                if !client.load_older(chat_id).await? {
                    break;
                }
            }
            let pages = client.refresh(chat_id).await?;
            for message in pages.iter().flat_map(|page| &page.messages) {
                print_message(message, cli.json)?;
            }
        }
        Command::Send {
            chat_id,
            text,
            file,
        } => {
            let chat_id = ChatId(chat_id);
            let opened = client.open_chat(chat_id).await?;
            if opened.gate == GateState::NeedsAcceptance {
                info!(chat_id = chat_id.0, "cli: sending into a chat request accepts it");
            }

            let composer = client.composer(chat_id);
            if let Some(path) = file {
                let media = MediaFile::from_path(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                composer.attach(media).await?;
            }
            composer.type_text(text.unwrap_or_default());

            match composer.submit().await {
                SendOutcome::Sent(message) => print_message(&message, cli.json)?,
                SendOutcome::Skipped(reason) => bail!("nothing sent: {reason:?}"),
                SendOutcome::Failed(err) => return Err(err.into()),
            }
        }
        Command::Accept { chat_id } => {
            let chat_id = ChatId(chat_id);
            client.open_chat(chat_id).await?;
            let state = client.accept(chat_id).await?;
            println!("chat {chat_id}: {state:?}");
        }
        Command::Leave { chat_id } => {
            let chat_id = ChatId(chat_id);
            client.open_chat(chat_id).await?;
            client.leave(chat_id).await?;
            println!("left chat {chat_id}");
        }
        Command::Report { chat_id, reason } => {
            let chat_id = ChatId(chat_id);
            client.open_chat(chat_id).await?;
            client.report(chat_id, &reason).await?;
            println!("reported chat {chat_id}");
        }
    }

    Ok(())
}
