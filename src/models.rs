use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub const MAX_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub profile_picture: Option<String>,
    pub created_at: i64,
}

/// What other users get to see of an account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub profile_picture: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            id: user.id,
            username: user.username.clone(),
            profile_picture: user.profile_picture.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub listing_id: Option<Uuid>,
    pub read: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl Message {
    /// Total order used for both the inbox and chat views: timestamp first,
    /// then id so equal timestamps still sort deterministically.
    pub fn chronological(a: &Message, b: &Message) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    pub fn is_unread_for(&self, viewer: Uuid) -> bool {
        Role::of(self, viewer) == Role::Received && !self.read
    }

    /// The other participant, seen from `viewer`.
    pub fn counterpart(&self, viewer: Uuid) -> Uuid {
        match Role::of(self, viewer) {
            Role::Sent => self.receiver_id,
            Role::Received => self.sender_id,
        }
    }
}

/// Message as submitted by a sender, before it is stamped and stored.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewMessage {
    pub receiver_id: Uuid,
    pub content: String,
    pub listing_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sent,
    Received,
}

impl Role {
    /// Direction of `message` from the viewpoint of `viewer`. Callers only
    /// pass messages the viewer takes part in.
    pub fn of(message: &Message, viewer: Uuid) -> Role {
        if message.sender_id == viewer {
            Role::Sent
        } else {
            Role::Received
        }
    }
}

/// One inbox row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub other_user_id: Uuid,
    pub other_user_username: String,
    pub other_user_profile_picture: Option<String>,
    pub last_message: Message,
    pub unread_count: usize,
    pub listing_id: Option<Uuid>,
}
