use tokio::net::{TcpListener, TcpStream};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;
use std::collections::HashMap;
use anyhow::Result;

use crate::accounts;
use crate::auth::TokenSigner;
use crate::config::Config;
use crate::crypto::Crypto;
use crate::error::Error;
use crate::inbox;
use crate::models::{NewMessage, PublicUser, User};
use crate::protocol::{ClientMessage, Request, ServerResponse};
use crate::storage::{MessageStore, Storage, UserStore};

type Clients = Arc<Mutex<HashMap<Uuid, mpsc::Sender<ServerResponse>>>>;

#[derive(Clone)]
struct Shared {
    storage: Arc<Mutex<Storage>>,
    clients: Clients,
    tokens: Arc<TokenSigner>,
    crypto: Crypto,
}

pub struct Server {
    shared: Shared,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        let storage = Storage::new(&config.database_url)?;
        let tokens = TokenSigner::new(&config.token_secret, config.token_ttl_secs);
        Ok(Self::with_parts(storage, tokens, Crypto::new()))
    }

    pub fn with_parts(storage: Storage, tokens: TokenSigner, crypto: Crypto) -> Self {
        Server {
            shared: Shared {
                storage: Arc::new(Mutex::new(storage)),
                clients: Arc::new(Mutex::new(HashMap::new())),
                tokens: Arc::new(tokens),
                crypto,
            },
        }
    }

    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Server running on {}", addr);
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            log::info!("New connection: {}", addr);

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, shared).await {
                    log::warn!("Error handling client {}: {}", addr, e);
                }
            });
        }
    }
}

/// Runs one authenticated request against the store.
pub fn dispatch<S>(
    store: &mut S,
    user_id: Uuid,
    request: Request,
) -> crate::error::Result<ServerResponse>
where
    S: UserStore + MessageStore,
{
    match request {
        Request::SendMessage { receiver_id, content, listing_id } => {
            let new = NewMessage { receiver_id, content, listing_id };
            inbox::send_message(store, user_id, new).map(ServerResponse::MessageSent)
        }
        Request::ListConversations => {
            inbox::list_conversations(&*store, user_id).map(ServerResponse::Conversations)
        }
        Request::GetConversation { other_user_id } => {
            inbox::get_conversation_messages(store, user_id, other_user_id)
                .map(|messages| ServerResponse::ConversationMessages { other_user_id, messages })
        }
        Request::MarkRead { message_id } => {
            inbox::mark_as_read(store, user_id, message_id).map(ServerResponse::MessageRead)
        }
        Request::UnreadCount => {
            inbox::unread_total(&*store, user_id).map(|count| ServerResponse::UnreadCount { count })
        }
        Request::GetProfile { user_id: target } => {
            accounts::profile(&*store, target.unwrap_or(user_id)).map(ServerResponse::Profile)
        }
        Request::SetProfilePicture { reference } => {
            accounts::set_profile_picture(store, user_id, &reference).map(ServerResponse::Profile)
        }
    }
}

fn error_response(err: &Error) -> ServerResponse {
    if err.is_client_error() {
        log::debug!("Request rejected: {}", err);
    } else {
        log::error!("Request failed: {}", err);
    }
    ServerResponse::from(err)
}

async fn bind_session(
    clients: &Clients,
    session: &mut Option<Uuid>,
    user_id: Uuid,
    tx: &mpsc::Sender<ServerResponse>,
) {
    if *session == Some(user_id) {
        return;
    }
    unbind_session(clients, session, tx).await;
    clients.lock().await.insert(user_id, tx.clone());
    *session = Some(user_id);
}

/// Removes this connection from the online map, unless a newer connection
/// of the same user has already replaced it.
async fn unbind_session(
    clients: &Clients,
    session: &mut Option<Uuid>,
    tx: &mpsc::Sender<ServerResponse>,
) {
    if let Some(previous) = session.take() {
        let mut clients = clients.lock().await;
        if clients.get(&previous).is_some_and(|current| current.same_channel(tx)) {
            clients.remove(&previous);
        }
    }
}

async fn handle_client(socket: TcpStream, shared: Shared) -> Result<()> {
    let (reader, mut socket_write) = tokio::io::split(socket);
    let mut reader = BufReader::new(reader);
    let (tx, rx) = mpsc::channel::<ServerResponse>(100);

    tokio::spawn(async move {
        if let Err(e) = write_responses(rx, &mut socket_write).await {
            log::warn!("Failed to write to client: {}", e);
        }
    });

    let mut session: Option<Uuid> = None;
    let result = read_requests(&mut reader, &tx, &shared, &mut session).await;
    log::info!("Connection closed for user {:?}", session);
    unbind_session(&shared.clients, &mut session, &tx).await;
    result
}

async fn write_responses<W>(mut rx: mpsc::Receiver<ServerResponse>, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let response_json = serde_json::to_string(&response)?;
        log::trace!("Sending to client: {}", response_json);
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn read_requests<R>(
    reader: &mut BufReader<R>,
    tx: &mpsc::Sender<ServerResponse>,
    shared: &Shared,
    session: &mut Option<Uuid>,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    tx.send(ServerResponse::Prompt(
        "Send Register or Login, then wrap requests in Authenticated with your token".to_string(),
    ))
    .await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        log::trace!("Received from user {:?}: {}", session, raw);

        let client_msg = match serde_json::from_str::<ClientMessage>(raw) {
            Ok(msg) => msg,
            Err(e) => {
                let message = format!("Invalid message format: {}", e);
                tx.send(ServerResponse::error("bad_request", message)).await?;
                continue;
            }
        };

        match client_msg {
            ClientMessage::Register { username, password } => {
                let registered = register_user(shared, username, password)
                    .await
                    .and_then(|user| open_session(&shared.tokens, &user));
                let response = match registered {
                    Ok((user_id, response)) => {
                        bind_session(&shared.clients, session, user_id, tx).await;
                        response
                    }
                    Err(e) => error_response(&e),
                };
                tx.send(response).await?;
            }
            ClientMessage::Login { username, password } => {
                let logged_in = login_user(shared, username, password)
                    .await
                    .and_then(|user| open_session(&shared.tokens, &user));
                let response = match logged_in {
                    Ok((user_id, response)) => {
                        log::info!("User {} logged in", user_id);
                        bind_session(&shared.clients, session, user_id, tx).await;
                        response
                    }
                    Err(e) => error_response(&e),
                };
                tx.send(response).await?;
            }
            ClientMessage::Authenticated { token, request } => {
                let claims = match shared.tokens.verify(&token) {
                    Ok(claims) => claims,
                    Err(e) => {
                        tx.send(error_response(&e)).await?;
                        continue;
                    }
                };
                bind_session(&shared.clients, session, claims.sub, tx).await;

                let result = {
                    let mut storage = shared.storage.lock().await;
                    dispatch(&mut *storage, claims.sub, request)
                };
                match result {
                    Ok(response) => {
                        if let ServerResponse::MessageSent(message) = &response {
                            let incoming = ServerResponse::Incoming(message.clone());
                            deliver(&shared.clients, message.receiver_id, incoming).await;
                        }
                        tx.send(response).await?;
                    }
                    Err(e) => tx.send(error_response(&e)).await?,
                }
            }
        }
    }
}

/// Password hashing runs on the blocking pool, never under the store lock.
async fn hash_off_runtime<T, F>(work: F) -> crate::error::Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Crypto(format!("Password hashing task failed: {}", e)))?
}

async fn register_user(
    shared: &Shared,
    username: String,
    password: String,
) -> crate::error::Result<User> {
    let crypto = shared.crypto.clone();
    let user = hash_off_runtime(move || {
        accounts::prepare_registration(&crypto, &username, &password)
    })
    .await?;
    let mut storage = shared.storage.lock().await;
    accounts::save_registration(&mut *storage, user)
}

async fn login_user(
    shared: &Shared,
    username: String,
    password: String,
) -> crate::error::Result<User> {
    let user = {
        let storage = shared.storage.lock().await;
        storage.get_user_by_username(&username)?
    };
    let crypto = shared.crypto.clone();
    hash_off_runtime(move || accounts::check_credentials(&crypto, user, &password)).await
}

fn open_session(
    tokens: &TokenSigner,
    user: &User,
) -> crate::error::Result<(Uuid, ServerResponse)> {
    let token = tokens.issue(user.id)?;
    Ok((user.id, ServerResponse::Authenticated { user: PublicUser::from(user), token }))
}

/// Pushes a response to `user_id` if they are connected. Offline receivers,
/// and receivers whose queue is full, see the message on their next inbox
/// load.
async fn deliver(clients: &Clients, user_id: Uuid, response: ServerResponse) {
    let receiver_tx = clients.lock().await.get(&user_id).cloned();
    let Some(receiver_tx) = receiver_tx else {
        return;
    };
    match receiver_tx.try_send(response) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            log::warn!("Receiver {} is not reading; push dropped", user_id);
        }
        Err(TrySendError::Closed(_)) => {
            log::debug!("Receiver {} disconnected before delivery", user_id);
        }
    }
}
