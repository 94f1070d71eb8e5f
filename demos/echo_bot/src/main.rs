//! Echo Bot Example
//!
//! Long-polls one or more bots and answers a few text commands.
//!
//! # Usage
//!
//! ```bash
//! # single bot from the command line
//! cargo run --package echo-bot -- --token 123456:ABC...
//!
//! # bots listed in tgflow.toml
//! cargo run --package echo-bot -- --config tgflow.toml
//! ```

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tgflow::prelude::*;
use tgflow::runtime::SessionConfig;
use tracing::{info, warn};

const HELP: &str = "Commands:\n\
    /echo <text> - Echo text\n\
    /ping        - Pong!\n\
    /info        - Message info\n\
    /help        - This help";

#[derive(Parser, Debug)]
#[command(name = "echo-bot", about = "Echoes text commands back to their sender")]
struct Args {
    /// Bot token; adds a session named "echo" on top of the configuration.
    #[arg(long)]
    token: Option<String>,

    /// Configuration file to load instead of searching the current directory.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(long)]
    profile: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// One-line description of an update for the log.
struct Describe;

impl UpdateVisitor for Describe {
    type Output = String;

    fn visit_message(&mut self, _update: &Update, message: &Message) -> String {
        format!(
            "message in chat {}: {}",
            message.chat.id,
            message.content().unwrap_or("<no text>")
        )
    }

    fn visit_callback_query(&mut self, _update: &Update, query: &CallbackQuery) -> String {
        format!(
            "button press by {}: {}",
            query.from.id,
            query.data.as_deref().unwrap_or("")
        )
    }

    fn visit_other(&mut self, update: &Update) -> String {
        update.field_name().to_string()
    }
}

async fn handle_command(api: &BotApi, update: &Update) -> Result<(), SubscriberError> {
    let UpdateKind::Message(message) = &update.kind else {
        return Ok(());
    };
    let Some(text) = message.text.as_deref() else {
        return Ok(());
    };

    let reply = match text.trim() {
        "/ping" => "Pong!".to_string(),
        "/help" => HELP.to_string(),
        "/info" => {
            let sender = message
                .from
                .as_ref()
                .map_or("Unknown", |user| user.first_name.as_str());
            format!(
                "Message Info\n\
                • From: {}\n\
                • Chat: {}\n\
                • Message ID: {}",
                sender, message.chat.id, message.message_id
            )
        }
        other => match other.strip_prefix("/echo ") {
            Some(content) => content.to_string(),
            None => return Ok(()),
        },
    };

    api.reply_to(message, &reply).await?;
    Ok(())
}

async fn handle_button(api: &BotApi, update: &Update) -> Result<(), SubscriberError> {
    if let UpdateKind::CallbackQuery(query) = &update.kind {
        api.answer_callback_query(&query.id, query.data.as_deref())
            .await?;
    }
    Ok(())
}

fn register_handlers(session: &Session) {
    let id = session.id().to_string();
    session.subscribe_with(
        Sequence::Pre,
        "logging",
        subscriber_fn(move |update| {
            let id = id.clone();
            async move {
                info!(session = %id, update_id = update.update_id, "{}", update.resolve(&mut Describe));
                Ok(())
            }
        }),
    );

    let Some(api) = session.api().cloned() else {
        warn!(session = %session.id(), "No outbound API configured, replies disabled");
        return;
    };

    let commands = api.clone();
    session.subscribe(
        "commands",
        subscriber_fn(move |update| {
            let api = commands.clone();
            async move { handle_command(&api, &update).await }
        }),
    );

    session.subscribe(
        "buttons",
        subscriber_fn(move |update| {
            let api = api.clone();
            async move { handle_button(&api, &update).await }
        }),
    );
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = TgflowRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build()?;

    if let Some(token) = args.token {
        let config = SessionConfig::new("echo", token);
        let client = Arc::new(HttpBotClient::new(config.client_config())?);
        let session = SessionBuilder::from_config(&config, client.clone())
            .api(client)
            .build();
        runtime.add_session(session).await?;
    }

    let ids = runtime.manager().ids().await;
    if ids.is_empty() {
        bail!("no sessions configured: pass --token or add [[sessions]] to tgflow.toml");
    }

    for id in &ids {
        if let Some(session) = runtime.session(id).await {
            register_handlers(&session);
        }
    }

    runtime.run().await?;

    for (id, health) in runtime.health().await {
        info!(
            session = %id,
            state = %health.state,
            last_update_id = ?health.last_update_id,
            "Session finished"
        );
    }

    Ok(())
}
