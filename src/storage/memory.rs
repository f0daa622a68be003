use std::collections::HashMap;

use uuid::Uuid;

use super::{MessageStore, UserStore};
use crate::error::{Error, Result};
use crate::models::{Message, User};

/// Process-local store with the same semantics as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: HashMap<Uuid, User>,
    messages: Vec<Message>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut messages: Vec<Message>) -> Vec<Message> {
        messages.sort_by(Message::chronological);
        messages
    }
}

impl UserStore for MemoryStore {
    fn save_user(&mut self, user: &User) -> Result<()> {
        if self.users.values().any(|u| u.username == user.username) {
            return Err(Error::UsernameTaken(user.username.clone()));
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.values().find(|u| u.username == username).cloned())
    }

    fn set_profile_picture(&mut self, id: Uuid, reference: Option<&str>) -> Result<bool> {
        match self.users.get_mut(&id) {
            Some(user) => {
                user.profile_picture = reference.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl MessageStore for MemoryStore {
    fn save_message(&mut self, message: &Message) -> Result<()> {
        if message.sender_id == message.receiver_id {
            return Err(Error::SelfMessage);
        }
        self.messages.push(message.clone());
        Ok(())
    }

    fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.iter().find(|m| m.id == id).cloned())
    }

    fn messages_involving(&self, user: Uuid) -> Result<Vec<Message>> {
        let involved = self
            .messages
            .iter()
            .filter(|m| m.sender_id == user || m.receiver_id == user)
            .cloned()
            .collect();
        Ok(Self::sorted(involved))
    }

    fn messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let between = self
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
            })
            .cloned()
            .collect();
        Ok(Self::sorted(between))
    }

    fn mark_read_from(&mut self, receiver: Uuid, sender: Uuid) -> Result<usize> {
        let mut changed = 0;
        for m in self
            .messages
            .iter_mut()
            .filter(|m| m.receiver_id == receiver && m.sender_id == sender && !m.read)
        {
            m.read = true;
            changed += 1;
        }
        Ok(changed)
    }

    fn mark_read(&mut self, id: Uuid) -> Result<bool> {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) if !m.read => {
                m.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unread_count(&self, user: Uuid) -> Result<usize> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.receiver_id == user && !m.read)
            .count())
    }
}
