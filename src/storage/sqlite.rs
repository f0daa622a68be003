use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{MessageStore, UserStore};
use crate::error::{Error, Result};
use crate::models::{Message, User};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, content, listing_id, is_read, created_at";

/// SQLite-backed store for users and messages.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                profile_picture TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                listing_id TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                CHECK (sender_id <> receiver_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id, is_read);
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);",
        )?;
        log::debug!("Opened database at {}", db_path);
        Ok(Storage { conn })
    }

    fn query_messages(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(sql)?;
        let messages = stmt
            .query_map(params, message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_column(row, 0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        profile_picture: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_column(row, 0)?,
        sender_id: uuid_column(row, 1)?,
        receiver_id: uuid_column(row, 2)?,
        content: row.get(3)?,
        listing_id: optional_uuid_column(row, 4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl UserStore for Storage {
    fn save_user(&mut self, user: &User) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT INTO users (id, username, password_hash, profile_picture, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.profile_picture,
                user.created_at
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(Error::UsernameTaken(user.username.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, profile_picture, created_at
                 FROM users WHERE id = ?1",
                [id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, profile_picture, created_at
                 FROM users WHERE username = ?1",
                [username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn set_profile_picture(&mut self, id: Uuid, reference: Option<&str>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE users SET profile_picture = ?1 WHERE id = ?2",
            params![reference, id.to_string()],
        )?;
        Ok(changed > 0)
    }
}

impl MessageStore for Storage {
    fn save_message(&mut self, message: &Message) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, listing_id, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.content,
                message.listing_id.map(|id| id.to_string()),
                message.read,
                message.created_at
            ],
        )?;
        Ok(())
    }

    fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let message = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    // Hyphenated lowercase UUID text sorts the same way as the UUID bytes,
    // so `ORDER BY created_at, id` matches `Message::chronological`.
    fn messages_involving(&self, user: Uuid) -> Result<Vec<Message>> {
        let user = user.to_string();
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ),
            params![user],
        )
    }

    fn messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let (a, b) = (a.to_string(), b.to_string());
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC"
            ),
            params![a, b],
        )
    }

    fn mark_read_from(&mut self, receiver: Uuid, sender: Uuid) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![receiver.to_string(), sender.to_string()],
        )?;
        Ok(changed)
    }

    fn mark_read(&mut self, id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
            [id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn unread_count(&self, user: Uuid) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND is_read = 0",
            [user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_in_memory_db() -> Storage {
        Storage::new(":memory:").unwrap()
    }

    fn user(username: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: "hash".to_string(),
            profile_picture: None,
            created_at: 0,
        }
    }

    fn message(sender_id: Uuid, receiver_id: Uuid, created_at: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content: format!("sent at {}", created_at),
            listing_id: None,
            read: false,
            created_at,
        }
    }

    #[test]
    fn test_save_and_get_user() {
        let mut storage = setup_in_memory_db();
        let alice = user("alice");

        storage.save_user(&alice).unwrap();
        let by_name = storage.get_user_by_username("alice").unwrap().unwrap();
        let by_id = storage.get_user(alice.id).unwrap().unwrap();
        assert_eq!(by_name, alice);
        assert_eq!(by_id, alice);
    }

    #[test]
    fn test_save_duplicate_username() {
        let mut storage = setup_in_memory_db();
        storage.save_user(&user("bob")).unwrap();

        let result = storage.save_user(&user("bob"));
        assert!(matches!(result, Err(Error::UsernameTaken(name)) if name == "bob"));
    }

    #[test]
    fn test_duplicate_id_is_not_a_taken_username() {
        let mut storage = setup_in_memory_db();
        let carol = user("carol");
        storage.save_user(&carol).unwrap();

        let clash = User {
            username: "carol_2".to_string(),
            ..carol.clone()
        };
        let result = storage.save_user(&clash);
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(storage.get_user_by_username("carol_2").unwrap().is_none());
    }

    #[test]
    fn test_get_nonexistent_user() {
        let storage = setup_in_memory_db();
        assert!(storage.get_user_by_username("nonexistent").unwrap().is_none());
        assert!(storage.get_user(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_set_profile_picture() {
        let mut storage = setup_in_memory_db();
        let alice = user("alice");
        storage.save_user(&alice).unwrap();

        assert!(storage.set_profile_picture(alice.id, Some("uploads/alice.png")).unwrap());
        let stored = storage.get_user(alice.id).unwrap().unwrap();
        assert_eq!(stored.profile_picture.as_deref(), Some("uploads/alice.png"));

        assert!(!storage.set_profile_picture(Uuid::new_v4(), None).unwrap());
    }

    #[test]
    fn test_message_roundtrip_keeps_listing() {
        let mut storage = setup_in_memory_db();
        let mut msg = message(Uuid::new_v4(), Uuid::new_v4(), 5);
        msg.listing_id = Some(Uuid::new_v4());

        storage.save_message(&msg).unwrap();
        assert_eq!(storage.get_message(msg.id).unwrap(), Some(msg));
    }

    #[test]
    fn test_self_message_rejected_by_schema() {
        let mut storage = setup_in_memory_db();
        let alice = Uuid::new_v4();
        assert!(storage.save_message(&message(alice, alice, 1)).is_err());
    }

    #[test]
    fn test_messages_between_is_chronological_both_ways() {
        let mut storage = setup_in_memory_db();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let third = message(alice, bob, 30);
        let first = message(alice, bob, 10);
        let second = message(bob, alice, 20);
        let unrelated = message(alice, carol, 15);
        for msg in [&third, &first, &second, &unrelated] {
            storage.save_message(msg).unwrap();
        }

        let ids: Vec<Uuid> = storage
            .messages_between(alice, bob)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert_eq!(storage.messages_between(bob, alice).unwrap().len(), 3);
        assert_eq!(storage.messages_involving(alice).unwrap().len(), 4);
    }

    #[test]
    fn test_equal_timestamps_order_by_id() {
        let mut storage = setup_in_memory_db();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut low = message(alice, bob, 7);
        let mut high = message(bob, alice, 7);
        low.id = Uuid::from_u128(0x0a);
        high.id = Uuid::from_u128(0xb0);
        storage.save_message(&high).unwrap();
        storage.save_message(&low).unwrap();

        let ids: Vec<Uuid> = storage
            .messages_involving(alice)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![low.id, high.id]);
    }

    #[test]
    fn test_mark_read_from_only_touches_received() {
        let mut storage = setup_in_memory_db();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let to_alice = message(bob, alice, 1);
        let to_bob = message(alice, bob, 2);
        storage.save_message(&to_alice).unwrap();
        storage.save_message(&to_bob).unwrap();

        assert_eq!(storage.unread_count(alice).unwrap(), 1);
        assert_eq!(storage.mark_read_from(alice, bob).unwrap(), 1);
        assert_eq!(storage.mark_read_from(alice, bob).unwrap(), 0);
        assert_eq!(storage.unread_count(alice).unwrap(), 0);
        assert!(!storage.get_message(to_bob.id).unwrap().unwrap().read);
    }

    #[test]
    fn test_mark_single_message_read() {
        let mut storage = setup_in_memory_db();
        let msg = message(Uuid::new_v4(), Uuid::new_v4(), 1);
        storage.save_message(&msg).unwrap();

        assert!(storage.mark_read(msg.id).unwrap());
        assert!(!storage.mark_read(msg.id).unwrap());
        assert!(storage.get_message(msg.id).unwrap().unwrap().read);
    }
}
