//! Newline-delimited JSON messages exchanged between client and server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::{ConversationSummary, Message, PublicUser};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Register { username: String, password: String },
    Login { username: String, password: String },
    /// Any request that needs a session carries the token issued at login.
    Authenticated { token: String, request: Request },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Request {
    SendMessage {
        receiver_id: Uuid,
        content: String,
        listing_id: Option<Uuid>,
    },
    ListConversations,
    GetConversation { other_user_id: Uuid },
    MarkRead { message_id: Uuid },
    UnreadCount,
    GetProfile { user_id: Option<Uuid> },
    SetProfilePicture { reference: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerResponse {
    Prompt(String),
    Authenticated { user: PublicUser, token: String },
    Error { kind: String, message: String },
    MessageSent(Message),
    Conversations(Vec<ConversationSummary>),
    ConversationMessages { other_user_id: Uuid, messages: Vec<Message> },
    MessageRead(Message),
    UnreadCount { count: usize },
    Profile(PublicUser),
    /// Pushed to an online receiver when a message arrives.
    Incoming(Message),
}

impl ServerResponse {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ServerResponse::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl From<&Error> for ServerResponse {
    fn from(err: &Error) -> Self {
        if err.is_client_error() {
            ServerResponse::error(err.kind(), err.to_string())
        } else {
            ServerResponse::error(err.kind(), "Internal server error")
        }
    }
}
