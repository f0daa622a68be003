//! User and message persistence.
//!
//! The inbox and account logic only talk to the [`UserStore`] and
//! [`MessageStore`] traits, so the same code runs against SQLite in the
//! server and against [`MemoryStore`] in tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::Storage;

use crate::error::Result;
use crate::models::{Message, User};
use uuid::Uuid;

pub trait UserStore {
    /// Fails with `UsernameTaken` if the username is already registered.
    fn save_user(&mut self, user: &User) -> Result<()>;

    fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Returns `false` if no such user exists.
    fn set_profile_picture(&mut self, id: Uuid, reference: Option<&str>) -> Result<bool>;
}

pub trait MessageStore {
    fn save_message(&mut self, message: &Message) -> Result<()>;

    fn get_message(&self, id: Uuid) -> Result<Option<Message>>;

    /// Every message `user` sent or received, oldest first.
    fn messages_involving(&self, user: Uuid) -> Result<Vec<Message>>;

    /// Both directions between `a` and `b`, oldest first.
    fn messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>>;

    /// Sets `read` on every unread message `sender` sent to `receiver`.
    /// Returns how many rows changed.
    fn mark_read_from(&mut self, receiver: Uuid, sender: Uuid) -> Result<usize>;

    /// Returns `true` if the message went from unread to read.
    fn mark_read(&mut self, id: Uuid) -> Result<bool>;

    fn unread_count(&self, user: Uuid) -> Result<usize>;
}
