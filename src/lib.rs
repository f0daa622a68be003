//! Direct messaging backend for a small marketplace: accounts, session
//! tokens, and an inbox of conversations derived from stored messages.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod inbox;
pub mod models;
pub mod protocol;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
