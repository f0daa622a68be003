//! Registration, login and profiles.

use uuid::Uuid;

use crate::crypto::Crypto;
use crate::error::{Error, Result};
use crate::models::{PublicUser, User};
use crate::storage::UserStore;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 30;
const PASSWORD_MIN: usize = 8;
const PICTURE_REF_MAX: usize = 512;

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(Error::validation(format!(
            "username must be {} to {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::validation(
            "username may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}

/// Validates a new account and hashes its password. Does not touch a store,
/// so callers can run it without holding the store lock.
pub fn prepare_registration(crypto: &Crypto, username: &str, password: &str) -> Result<User> {
    validate_username(username)?;
    if password.chars().count() < PASSWORD_MIN {
        return Err(Error::validation(format!(
            "password must be at least {} characters",
            PASSWORD_MIN
        )));
    }

    Ok(User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        password_hash: crypto.hash_password(password)?,
        profile_picture: None,
        created_at: chrono::Utc::now().timestamp_millis(),
    })
}

pub fn save_registration<S: UserStore>(store: &mut S, user: User) -> Result<User> {
    if store.get_user_by_username(&user.username)?.is_some() {
        return Err(Error::UsernameTaken(user.username));
    }
    store.save_user(&user)?;
    log::info!("Registered user {} ({})", user.username, user.id);
    Ok(user)
}

pub fn register<S: UserStore>(
    store: &mut S,
    crypto: &Crypto,
    username: &str,
    password: &str,
) -> Result<User> {
    let user = prepare_registration(crypto, username, password)?;
    save_registration(store, user)
}

pub fn login<S: UserStore>(
    store: &S,
    crypto: &Crypto,
    username: &str,
    password: &str,
) -> Result<User> {
    let user = store.get_user_by_username(username)?;
    check_credentials(crypto, user, password)
}

/// Unknown usernames and wrong passwords fail the same way and cost the same
/// hashing work.
pub fn check_credentials(crypto: &Crypto, user: Option<User>, password: &str) -> Result<User> {
    let Some(user) = user else {
        crypto.verify_missing(password);
        log::debug!("Login attempt for unknown user");
        return Err(Error::InvalidCredentials);
    };
    if !crypto.verify_password(password, &user.password_hash)? {
        log::debug!("Wrong password for {}", user.username);
        return Err(Error::InvalidCredentials);
    }
    Ok(user)
}

pub fn profile<S: UserStore>(store: &S, user_id: Uuid) -> Result<PublicUser> {
    store
        .get_user(user_id)?
        .map(|user| PublicUser::from(&user))
        .ok_or(Error::UserNotFound(user_id))
}

/// Stores a reference (path or URL) to an already uploaded picture. An
/// empty reference clears it.
pub fn set_profile_picture<S: UserStore>(
    store: &mut S,
    user_id: Uuid,
    reference: &str,
) -> Result<PublicUser> {
    let reference = reference.trim();
    if reference.chars().count() > PICTURE_REF_MAX {
        return Err(Error::validation(format!(
            "picture reference is longer than {} characters",
            PICTURE_REF_MAX
        )));
    }
    let reference = (!reference.is_empty()).then_some(reference);
    if !store.set_profile_picture(user_id, reference)? {
        return Err(Error::UserNotFound(user_id));
    }
    profile(&*store, user_id)
}
