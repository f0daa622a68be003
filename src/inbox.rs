//! Conversation aggregation and read receipts.
//!
//! A conversation is never stored: it is derived on demand from the messages
//! a user sent or received, grouped by the other participant.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ConversationSummary, Message, NewMessage, MAX_CONTENT_CHARS};
use crate::storage::{MessageStore, UserStore};

const DELETED_USERNAME: &str = "[deleted]";

/// Per-counterpart accumulator built by [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub counterpart: Uuid,
    pub last_message: Message,
    pub unread_count: usize,
}

/// Groups `messages` by counterpart in a single pass, keeping the latest
/// message and the number of messages `viewer` has not read yet. Messages
/// the viewer does not take part in are ignored. Threads come back most
/// recent first.
pub fn aggregate(viewer: Uuid, messages: impl IntoIterator<Item = Message>) -> Vec<Thread> {
    let mut threads: HashMap<Uuid, Thread> = HashMap::new();

    for message in messages {
        if message.sender_id != viewer && message.receiver_id != viewer {
            continue;
        }
        let counterpart = message.counterpart(viewer);
        let unread = usize::from(message.is_unread_for(viewer));

        match threads.entry(counterpart) {
            Entry::Occupied(mut entry) => {
                let thread = entry.get_mut();
                thread.unread_count += unread;
                if Message::chronological(&message, &thread.last_message) == Ordering::Greater {
                    thread.last_message = message;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Thread {
                    counterpart,
                    last_message: message,
                    unread_count: unread,
                });
            }
        }
    }

    let mut threads: Vec<Thread> = threads.into_values().collect();
    threads.sort_by(|a, b| Message::chronological(&b.last_message, &a.last_message));
    threads
}

/// The inbox of `user_id`: one summary per counterpart, most recent first.
pub fn list_conversations<S>(store: &S, user_id: Uuid) -> Result<Vec<ConversationSummary>>
where
    S: UserStore + MessageStore,
{
    if store.get_user(user_id)?.is_none() {
        return Err(Error::UserNotFound(user_id));
    }

    let threads = aggregate(user_id, store.messages_involving(user_id)?);
    let mut summaries = Vec::with_capacity(threads.len());

    for thread in threads {
        let (username, picture) = match store.get_user(thread.counterpart)? {
            Some(other) => (other.username, other.profile_picture),
            None => {
                log::warn!(
                    "Conversation partner {} of {} no longer exists",
                    thread.counterpart,
                    user_id
                );
                (DELETED_USERNAME.to_string(), None)
            }
        };
        summaries.push(ConversationSummary {
            other_user_id: thread.counterpart,
            other_user_username: username,
            other_user_profile_picture: picture,
            listing_id: thread.last_message.listing_id,
            last_message: thread.last_message,
            unread_count: thread.unread_count,
        });
    }

    Ok(summaries)
}

/// All messages between `user_id` and `other_user_id`, oldest first.
///
/// Messages `user_id` received are marked read before the list is loaded,
/// so the returned flags already reflect the receipt.
pub fn get_conversation_messages<S>(
    store: &mut S,
    user_id: Uuid,
    other_user_id: Uuid,
) -> Result<Vec<Message>>
where
    S: UserStore + MessageStore,
{
    if user_id == other_user_id {
        return Err(Error::InvalidConversation);
    }
    if store.get_user(other_user_id)?.is_none() {
        return Err(Error::UserNotFound(other_user_id));
    }

    let marked = store.mark_read_from(user_id, other_user_id)?;
    if marked > 0 {
        log::debug!(
            "Marked {} message(s) from {} as read for {}",
            marked,
            other_user_id,
            user_id
        );
    }

    store.messages_between(user_id, other_user_id)
}

pub fn send_message<S>(store: &mut S, sender_id: Uuid, new: NewMessage) -> Result<Message>
where
    S: UserStore + MessageStore,
{
    if sender_id == new.receiver_id {
        return Err(Error::SelfMessage);
    }

    let content = new.content.trim();
    if content.is_empty() {
        return Err(Error::validation("message content cannot be empty"));
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(Error::validation(format!(
            "message content is {} characters, the limit is {}",
            chars, MAX_CONTENT_CHARS
        )));
    }

    if store.get_user(sender_id)?.is_none() {
        return Err(Error::UserNotFound(sender_id));
    }
    if store.get_user(new.receiver_id)?.is_none() {
        return Err(Error::UserNotFound(new.receiver_id));
    }

    let message = Message {
        id: Uuid::new_v4(),
        sender_id,
        receiver_id: new.receiver_id,
        content: content.to_string(),
        listing_id: new.listing_id,
        read: false,
        created_at: chrono::Utc::now().timestamp_millis(),
    };
    store.save_message(&message)?;
    log::info!("Message {} sent from {} to {}", message.id, sender_id, message.receiver_id);
    Ok(message)
}

/// Explicit read receipt for a single message. Only its receiver may do
/// this; repeating it is a no-op.
pub fn mark_as_read<S: MessageStore>(
    store: &mut S,
    user_id: Uuid,
    message_id: Uuid,
) -> Result<Message> {
    let mut message = store
        .get_message(message_id)?
        .ok_or(Error::MessageNotFound(message_id))?;
    if message.receiver_id != user_id {
        return Err(Error::NotRecipient);
    }
    if !message.read {
        store.mark_read(message_id)?;
        message.read = true;
    }
    Ok(message)
}

pub fn unread_total<S: MessageStore>(store: &S, user_id: Uuid) -> Result<usize> {
    store.unread_count(user_id)
}
