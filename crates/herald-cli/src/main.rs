//! # herald
//!
//! Terminal notification bell. `watch` runs the live subsystem; the other
//! subcommands are one-shot calls against the origin server.

#![deny(unsafe_code)]

mod render;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use herald_api::{ApiConfig, NotificationApi, ReqwestNotificationApi};
use herald_core::logging::init_subscriber;
use herald_core::{NotificationId, UserId};
use herald_runtime::{NotificationHandle, StoreSnapshot, Subsystem, SubsystemPhase};
use herald_settings::{Environment, HeraldSettings, load_settings, load_settings_from_path};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

use crate::render::{Click, render_bell, render_dropdown, resolve_click};

/// Live notification bell for one user.
#[derive(Parser, Debug)]
#[command(name = "herald", version, about = "Live notification bell")]
struct Cli {
    /// Settings file (default `~/.herald/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deployment environment (`development` or `production`).
    #[arg(long, global = true)]
    env: Option<Environment>,

    /// User whose notifications to show.
    #[arg(long, global = true, default_value = "1")]
    user: String,

    /// Log level filter; `RUST_LOG` wins when set.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the bell and react to pushes. Type `read <#n|id>`, `refresh`
    /// or `quit` on stdin.
    Watch,
    /// Fetch and print the notification list once.
    List,
    /// Acknowledge one notification.
    Read {
        /// Notification id.
        id: String,
    },
    /// Publish a notification to the user's topic.
    Send {
        /// Message text.
        message: String,
    },
    /// Print the server-side unread count.
    Count,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(env) = cli.env {
        settings.environment = env;
    }
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    init_subscriber(&level);

    let user = UserId::from(cli.user.as_str());
    debug!(environment = %settings.environment, user = %user, "settings loaded");

    match cli.command {
        Command::Watch => watch(&settings, user).await,
        Command::List => list(&api(&settings)?, &user).await,
        Command::Read { id } => {
            api(&settings)?
                .mark_read(&NotificationId::from(id.as_str()))
                .await
                .with_context(|| format!("failed to acknowledge {id}"))?;
            println!("marked {id} as read");
            Ok(())
        }
        Command::Send { message } => {
            let created = api(&settings)?
                .create_notification(&user, &message)
                .await
                .context("failed to publish notification")?;
            println!("created notification {}", created.id);
            Ok(())
        }
        Command::Count => {
            let count = api(&settings)?
                .unread_count(&user)
                .await
                .context("failed to read unread count")?;
            println!("{count}");
            Ok(())
        }
    }
}

fn api(settings: &HeraldSettings) -> Result<ReqwestNotificationApi> {
    let config = ApiConfig::from_settings(settings).context("no API endpoint configured")?;
    Ok(ReqwestNotificationApi::new(&config))
}

async fn list(api: &ReqwestNotificationApi, user: &UserId) -> Result<()> {
    let notifications = api
        .fetch_notifications(user)
        .await
        .context("failed to fetch notifications")?;
    let unread_count = notifications.iter().filter(|n| !n.read).count();
    let snapshot = StoreSnapshot {
        notifications,
        unread_count,
    };
    print!("{}", render_dropdown(&snapshot, &Local));
    Ok(())
}

async fn watch(settings: &HeraldSettings, user: UserId) -> Result<()> {
    let subsystem =
        Subsystem::from_settings(settings, user.clone()).context("failed to start subsystem")?;
    info!(user = %user, "watching notifications");

    let lines = BufReader::new(tokio::io::stdin()).lines();
    let result = watch_loop(subsystem.handle(), lines, tokio::signal::ctrl_c()).await;

    subsystem.shutdown().await;
    result
}

/// Redraw on every published view and apply stdin commands until `quit`,
/// end of the subsystem, or `shutdown` resolves.
async fn watch_loop<R>(
    mut handle: NotificationHandle,
    mut lines: Lines<R>,
    shutdown: impl Future,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tokio::pin!(shutdown);
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = handle.changed() => {
                if !changed {
                    break;
                }
                draw(&handle);
            }
            line = lines.next_line(), if stdin_open => match line.context("failed to read stdin")? {
                Some(line) => {
                    if !handle_input(&handle, line.trim())? {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }
    Ok(())
}

fn draw(handle: &NotificationHandle) {
    let view = handle.view();
    if view.phase != SubsystemPhase::Ready {
        println!("{}  loading…", render_bell(&view));
        return;
    }
    println!("{}", render_bell(&view));
    print!("{}", render_dropdown(&view.snapshot, &Local));
}

/// Apply one stdin command. Returns `false` to quit.
fn handle_input(handle: &NotificationHandle, input: &str) -> Result<bool> {
    let mut parts = input.splitn(2, char::is_whitespace);
    match (parts.next().unwrap_or_default(), parts.next()) {
        ("", _) => {}
        ("quit" | "exit", _) => return Ok(false),
        ("refresh", _) => {
            if !handle.refresh() {
                bail!("subsystem stopped");
            }
        }
        ("read", Some(target)) => match resolve_click(&handle.snapshot(), target) {
            Click::Mark(id) => {
                if !handle.mark_read(id) {
                    bail!("subsystem stopped");
                }
            }
            Click::AlreadyRead => println!("already read"),
            Click::Unknown => println!("no notification `{}`", target.trim()),
        },
        _ => println!("commands: read <#n|id>, refresh, quit"),
    }
    Ok(true)
}
