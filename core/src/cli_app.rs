use crate::api::ApiClient;
use crate::config::Config;
use crate::conversation_store::ConversationStore;
use crate::messenger_types::ConversationListItem;
use crate::notify::{preview, ChannelToaster, MemoryNavigator, NotificationDispatcher};
use crate::realtime::{ConnectionManager, ConnectionStatus};
use crate::session::{CookieJar, SharedTokenProvider};
use crate::transport::SocketIoTransport;
use colored::*;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_LOCATION: &str = "/dashboard";

/// Shared CLI implementation for the `hirewire` binary.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("hirewire")
        .to_string();

    if args.len() < 2 {
        print_usage(&bin);
        return Ok(());
    }

    let command = args[1].as_str();
    let mut rest = args[2..].to_vec();

    match command {
        "conversations" => {
            let config = Config::from_args(&rest)?;
            list_conversations(&config).await?;
        }
        "badge" => {
            let config = Config::from_args(&rest)?;
            show_badge(&config).await?;
        }
        "watch" => {
            let location = take_flag(&mut rest, "--location")
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
            let config = Config::from_args(&rest)?;
            watch(&config, location).await?;
        }
        "config" => {
            let config = Config::from_args(&rest)?;
            let mut shown = config.clone();
            if shown.cookies.is_some() {
                shown.cookies = Some("***".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

pub fn token_provider(config: &Config) -> SharedTokenProvider {
    Arc::new(CookieJar::parse(config.cookies.as_deref().unwrap_or_default()))
}

/// Remove `flag <value>` from `args`
fn take_flag(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let idx = args.iter().position(|a| a == flag)?;
    if idx + 1 >= args.len() {
        args.remove(idx);
        return None;
    }
    let value = args.remove(idx + 1);
    args.remove(idx);
    Some(value)
}

fn print_usage(bin: &str) {
    println!("{}", "⚡ HireWire CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <command> [options]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!(
        "  {}                 List conversations with unread counts",
        "conversations".cyan()
    );
    println!("  {}                         Print the unread badge", "badge".cyan());
    println!(
        "  {} [--location <route>]     Stream live notifications",
        "watch".cyan()
    );
    println!("  {}                        Show effective configuration", "config".cyan());
    println!();
    println!("{}", "Options:".bright_white().bold());
    println!("  --socket-url <url>  --api-url <url>  --token <token>  --cookie <header>");
    println!("  --ordering <recent-first|insertion>  --websocket-only  --polling-only  --no-reconnect");
}

async fn load(config: &Config) -> anyhow::Result<ConversationStore> {
    let store = ConversationStore::new(config.ordering);
    let api = ApiClient::new(config, token_provider(config));
    api.hydrate(&store).await?;
    Ok(store)
}

fn print_item(item: &ConversationListItem) {
    let unread = if item.unread_count > 0 {
        format!("[{}]", item.unread_count).yellow().bold()
    } else {
        "   ".normal()
    };
    let last = item
        .last_message
        .as_ref()
        .map(|m| preview(&m.content))
        .unwrap_or_default();
    println!(
        "  {} {} {} {}",
        unread,
        item.other_participant.name.cyan(),
        format!("({})", item.conversation_id).dimmed(),
        last
    );
}

async fn list_conversations(config: &Config) -> anyhow::Result<()> {
    let store = load(config).await?;
    let items = store.snapshot().await;
    if items.is_empty() {
        println!("{}", "No conversations".yellow());
        return Ok(());
    }

    let badge = store.badge().await.unwrap_or_else(|| "0".to_string());
    println!(
        "{}",
        format!("Conversations ({}, {} unread)", items.len(), badge)
            .bright_cyan()
            .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for item in &items {
        print_item(item);
    }
    Ok(())
}

async fn show_badge(config: &Config) -> anyhow::Result<()> {
    let store = load(config).await?;
    // Nothing unread renders nothing
    if let Some(badge) = store.badge().await {
        println!("{}", badge);
    }
    Ok(())
}

async fn watch(config: &Config, location: String) -> anyhow::Result<()> {
    let store = match load(config).await {
        Ok(store) => store,
        Err(e) => {
            warn!("Initial load failed, live updates only: {}", e);
            ConversationStore::new(config.ordering)
        }
    };

    let navigator = Arc::new(MemoryNavigator::new(location));
    let (toaster, mut toasts) = ChannelToaster::new();
    let dispatcher = Arc::new(NotificationDispatcher::new(navigator, Arc::new(toaster)));
    let manager = ConnectionManager::new(
        config,
        Arc::new(SocketIoTransport::from_config(config)),
        token_provider(config),
        store.clone(),
        dispatcher,
    );

    let session = manager.mount()?;
    if !session.is_active() {
        eprintln!(
            "{} No access token; pass --token or set HIREWIRE_COOKIES",
            "✗".red().bold()
        );
        return Ok(());
    }
    let mut status = session.watch_status();

    println!("{} Watching {} (Ctrl+C to stop)", "⚡".bright_cyan(), config.socket_url.cyan());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match current {
                    ConnectionStatus::Connected => println!("{} connected", "●".green()),
                    ConnectionStatus::Disconnected { reason } => {
                        println!("{} disconnected: {}", "●".red(), reason)
                    }
                    ConnectionStatus::Connecting => println!("{} connecting", "●".yellow()),
                    ConnectionStatus::Idle | ConnectionStatus::Closed => {}
                }
            }
            Some(toast) = toasts.recv() => {
                let badge = store.badge().await.unwrap_or_default();
                println!(
                    "{} {}: {} {} {}",
                    "✉".bright_cyan(),
                    toast.title.bold(),
                    toast.preview,
                    format!("[{} → {}]", toast.action.label(), toast.conversation_id).dimmed(),
                    badge.yellow()
                );
            }
        }
    }

    session.unmount().await;
    println!("{} Stopped", "✓".green());
    Ok(())
}
