use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use market_chat::models::Message;
use market_chat::protocol::{ClientMessage, Request, ServerResponse};

const HELP: &str = "Commands:
  register <username> <password>
  login <username> <password>
  send <user_id> <text...>
  inbox
  open <user_id>
  read <message_id>
  unread
  profile [user_id]
  picture <path-or-url>
  exit";

#[derive(Debug, PartialEq)]
enum Command {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Request(Request),
    Help,
    Exit,
}

fn parse_uuid(raw: Option<&str>, what: &str) -> std::result::Result<Uuid, String> {
    let raw = raw.ok_or_else(|| format!("missing {}", what))?;
    Uuid::parse_str(raw).map_err(|_| format!("{} is not a valid id: {}", what, raw))
}

fn parse_command(input: &str) -> std::result::Result<Command, String> {
    let mut parts = input.split_whitespace();
    let Some(verb) = parts.next() else {
        return Err("empty command".to_string());
    };

    let command = match verb.to_lowercase().as_str() {
        "register" | "login" => {
            let (Some(username), Some(password)) = (parts.next(), parts.next()) else {
                return Err(format!("usage: {} <username> <password>", verb));
            };
            let (username, password) = (username.to_string(), password.to_string());
            if verb.eq_ignore_ascii_case("register") {
                Command::Register { username, password }
            } else {
                Command::Login { username, password }
            }
        }
        "send" => {
            let receiver_id = parse_uuid(parts.next(), "user_id")?;
            let content = parts.collect::<Vec<_>>().join(" ");
            if content.is_empty() {
                return Err("usage: send <user_id> <text...>".to_string());
            }
            Command::Request(Request::SendMessage {
                receiver_id,
                content,
                listing_id: None,
            })
        }
        "inbox" => Command::Request(Request::ListConversations),
        "open" => Command::Request(Request::GetConversation {
            other_user_id: parse_uuid(parts.next(), "user_id")?,
        }),
        "read" => Command::Request(Request::MarkRead {
            message_id: parse_uuid(parts.next(), "message_id")?,
        }),
        "unread" => Command::Request(Request::UnreadCount),
        "profile" => {
            let user_id = match parts.next() {
                Some(raw) => Some(parse_uuid(Some(raw), "user_id")?),
                None => None,
            };
            Command::Request(Request::GetProfile { user_id })
        }
        "picture" => Command::Request(Request::SetProfilePicture {
            reference: parts.collect::<Vec<_>>().join(" "),
        }),
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(format!("unknown command: {} (try 'help')", other)),
    };
    Ok(command)
}

fn format_timestamp(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "unknown time".to_string(),
    }
}

fn format_message(message: &Message) -> String {
    format!(
        "[{}] {} -> {}{}: {}",
        format_timestamp(message.created_at),
        message.sender_id,
        message.receiver_id,
        if message.read { "" } else { " (unread)" },
        message.content
    )
}

fn render(response: &ServerResponse) -> String {
    match response {
        ServerResponse::Prompt(msg) => msg.clone(),
        ServerResponse::Authenticated { user, .. } => {
            format!("Logged in as {} ({})", user.username, user.id)
        }
        ServerResponse::Error { kind, message } => format!("Error [{}]: {}", kind, message),
        ServerResponse::MessageSent(message) => format!("Sent: {}", format_message(message)),
        ServerResponse::Conversations(inbox) if inbox.is_empty() => "Inbox is empty".to_string(),
        ServerResponse::Conversations(inbox) => inbox
            .iter()
            .map(|c| {
                format!(
                    "{} ({}) - {} unread - last: {}",
                    c.other_user_username,
                    c.other_user_id,
                    c.unread_count,
                    format_message(&c.last_message)
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ServerResponse::ConversationMessages { other_user_id, messages } => {
            let mut out = format!("Conversation with {}:", other_user_id);
            for message in messages {
                out.push('\n');
                out.push_str(&format_message(message));
            }
            out
        }
        ServerResponse::MessageRead(message) => format!("Marked read: {}", message.id),
        ServerResponse::UnreadCount { count } => format!("{} unread message(s)", count),
        ServerResponse::Profile(user) => format!(
            "{} ({}) picture: {}",
            user.username,
            user.id,
            user.profile_picture.as_deref().unwrap_or("none")
        ),
        ServerResponse::Incoming(message) => format!("New message: {}", format_message(message)),
    }
}

pub async fn run_client(addr: &str) -> Result<()> {
    let stream = TcpStream::connect(addr).await?;
    println!("Connected to {}", addr);

    let (reader, mut writer) = stream.into_split();
    let token: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    // Spawn a task to read server responses
    let session_token = Arc::clone(&token);
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            match serde_json::from_str::<ServerResponse>(&line) {
                Ok(response) => {
                    if let ServerResponse::Authenticated { token, .. } = &response {
                        *session_token.lock().await = Some(token.clone());
                    }
                    println!("{}", render(&response));
                }
                Err(_) => println!("Invalid response: {}", line),
            }
        }
        println!("Server disconnected");
        Ok::<(), anyhow::Error>(())
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    while let Some(input) = stdin.next_line().await? {
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let msg = match parse_command(input) {
            Ok(Command::Exit) => {
                println!("Exiting client...");
                break;
            }
            Ok(Command::Help) => {
                println!("{}", HELP);
                continue;
            }
            Ok(Command::Register { username, password }) => {
                ClientMessage::Register { username, password }
            }
            Ok(Command::Login { username, password }) => {
                ClientMessage::Login { username, password }
            }
            Ok(Command::Request(request)) => match token.lock().await.clone() {
                Some(token) => ClientMessage::Authenticated { token, request },
                None => {
                    println!("Please login or register first");
                    continue;
                }
            },
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        writer.write_all(serde_json::to_string(&msg)?.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| env::var("SERVER_PORT").unwrap_or("127.0.0.1:8080".to_string()));

    run_client(&addr).await
}
