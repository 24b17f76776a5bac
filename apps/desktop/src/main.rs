use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{DurableRemoteStore, RoomSync, ViewUpdate};
use shared::domain::{MessageId, RoomId};
use storage::Storage;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "room.toml")]
    config: PathBuf,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    room_id: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    user_name: Option<String>,
}

enum Input<'a> {
    Quit,
    Retry(&'a str),
    System(&'a str),
    Text(&'a str),
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        Input::Empty
    } else if line == "/quit" {
        Input::Quit
    } else if let Some(id) = line.strip_prefix("/retry ") {
        Input::Retry(id.trim())
    } else if let Some(text) = line.strip_prefix("/system ") {
        Input::System(text.trim())
    } else {
        Input::Text(line)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config)?;
    if let Some(v) = args.database_url {
        settings.database_url = config::normalize_database_url(&v);
    }
    if let Some(v) = args.room_id {
        settings.room_id = v;
    }
    if let Some(v) = args.user_id {
        settings.user_id = v;
    }
    if let Some(v) = args.user_name {
        settings.user_name = v;
    }

    let sync_config = settings.sync_config()?;
    let local_user = sync_config.local_user_id.clone();
    let offset = sync_config.day_offset;

    let storage = Storage::new(&settings.database_url)
        .await
        .with_context(|| format!("failed to open {}", settings.database_url))?;
    let sync = RoomSync::new(Arc::new(DurableRemoteStore::new(storage)), sync_config);
    let events = sync.subscribe_events();

    let room = sync
        .initialize(RoomId::new(settings.room_id.clone()))
        .await
        .with_context(|| format!("failed to open room {}", settings.room_id))?;
    info!(room_id = %room.id, user_id = %local_user, "desktop: joined room");

    println!("Chat with {}", room.peer_names(&settings.user_name).join(", "));
    for key in sync.ordered_keys().await {
        println!("{}", render::day_header(&key));
        for row in sync.rows(&key).await {
            println!("{}", render::row_line(&row, &local_user, &offset));
        }
    }
    println!("Type a message, /retry <id>, /system <text> or /quit.");

    let printer = tokio::spawn(print_updates(events, local_user, offset));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => {}
            Input::Retry(id) => {
                if let Err(err) = sync.retry_send(&MessageId::from(id)).await {
                    warn!("desktop: retry failed: {err}");
                }
            }
            Input::System(text) => {
                if let Err(err) = sync.send_system_message(text).await {
                    warn!("desktop: system message failed: {err}");
                }
            }
            Input::Text(text) => {
                if let Err(err) = sync.send_text(text).await {
                    warn!("desktop: send failed: {err}");
                }
            }
        }
    }

    sync.shutdown().await;
    printer.abort();
    Ok(())
}

async fn print_updates(
    mut events: broadcast::Receiver<ViewUpdate>,
    local_user: shared::domain::UserId,
    offset: chrono::FixedOffset,
) {
    loop {
        match events.recv().await {
            Ok(update) => {
                for row in &update.new_rows {
                    println!("{}", render::row_line(row, &local_user, &offset));
                }
                for row in &update.changed_rows {
                    println!("  ~ {}", render::row_line(row, &local_user, &offset));
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "desktop: view updates lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
