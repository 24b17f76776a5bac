use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::{
    domain::{Message, MessageId, MessageKind, Room, RoomId, SendStatus, UserId},
    protocol::{decode_message, decode_room, Collection, WriteOperation},
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/rooms.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateRoom {
        room_id: String,
        /// Participant as `id:name`, repeatable.
        #[arg(long = "member", required = true)]
        members: Vec<String>,
        #[arg(long)]
        icon_url: Option<String>,
    },
    /// Writes a message as if another participant had sent it.
    PostMessage {
        room_id: String,
        user_id: String,
        user_name: String,
        text: String,
        #[arg(long)]
        system: bool,
    },
    MarkRead {
        room_id: String,
        message_id: String,
        reader_id: String,
    },
    ListMessages {
        room_id: String,
    },
}

fn parse_member(raw: &str) -> Result<(UserId, String)> {
    let Some((id, name)) = raw.split_once(':') else {
        bail!("member '{raw}' must look like id:name");
    };
    if id.is_empty() {
        bail!("member '{raw}' has an empty id");
    }
    Ok((UserId::from(id), name.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateRoom {
            room_id,
            members,
            icon_url,
        } => {
            let members = members
                .iter()
                .map(|raw| parse_member(raw))
                .collect::<Result<Vec<_>>>()?;
            let now = Utc::now().timestamp();
            let room = Room {
                id: RoomId::new(room_id),
                participant_ids: members.iter().map(|(id, _)| id.clone()).collect(),
                participant_names: members.into_iter().map(|(_, name)| name).collect(),
                icon_url,
                last_message: String::new(),
                last_message_user_name: String::new(),
                created_at: Some(now),
                updated_at: Some(now),
            };
            storage
                .apply_batch(&[WriteOperation::put_room(&room)])
                .await?;
            println!("created room_id={}", room.id);
        }
        Command::PostMessage {
            room_id,
            user_id,
            user_name,
            text,
            system,
        } => {
            let room_id = RoomId::new(room_id);
            let document = storage
                .get_document(&Collection::Rooms, room_id.as_str())
                .await?
                .with_context(|| format!("room {room_id} does not exist"))?;
            let mut room = decode_room(&document)?;

            let mut message = Message::new_normal(
                MessageId::generate(),
                UserId::new(user_id),
                user_name,
                text,
                Utc::now().timestamp(),
            );
            message.send_status = SendStatus::ConfirmedSent;
            let mut batch = Vec::with_capacity(2);
            if system {
                message.kind = MessageKind::System;
                batch.push(WriteOperation::put_message(&room_id, &message));
            } else {
                room.record_last_message(&message);
                batch.push(WriteOperation::put_message(&room_id, &message));
                batch.push(WriteOperation::update_room_summary(&room));
            }
            storage.apply_batch(&batch).await?;
            println!("posted message_id={}", message.id);
        }
        Command::MarkRead {
            room_id,
            message_id,
            reader_id,
        } => {
            storage
                .apply_batch(&[WriteOperation::mark_read(
                    &RoomId::new(room_id),
                    &MessageId::new(message_id.clone()),
                    &UserId::new(reader_id),
                )])
                .await
                .with_context(|| format!("failed to mark message {message_id} read"))?;
            println!("marked message_id={message_id} read");
        }
        Command::ListMessages { room_id } => {
            let room_id = RoomId::new(room_id);
            for document in storage
                .list_documents(&Collection::messages(&room_id))
                .await?
            {
                match decode_message(&document) {
                    Ok(message) => println!(
                        "{} {} {} [{}] {:?} read_by={}",
                        message.sent_at,
                        message.id,
                        message.author_name,
                        message.kind.as_str(),
                        message.body,
                        message.readers.len()
                    ),
                    Err(err) => println!("{} <undecodable: {err}>", document.id),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_member_pairs() {
        let (id, name) = parse_member("user2:Hanako").expect("member");
        assert_eq!(id.as_str(), "user2");
        assert_eq!(name, "Hanako");
        assert!(parse_member("nocolon").is_err());
        assert!(parse_member(":Nobody").is_err());
    }
}
