//! WebSocket Node Server
//!
//! Async WebSocket gateway in front of the sequencer.
//! Handles authentication, transaction routing, queries and event streaming.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::core::{Address, Amount};
use crate::core::amount::format_tokens;
use crate::market::{MarketEvent, MarketId};
use crate::network::auth::{authenticate, dev_mode_from_env, AuthConfig, AuthError};
use crate::network::protocol::{
    parse_digest, parse_salt, AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerMessage,
};
use crate::network::sequencer::{Query, SequencerConfig, SequencerError, SequencerHandle, Transaction};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Drop connections idle for longer than this.
    pub idle_timeout: Duration,
    /// Interval between sealed blocks.
    pub block_time: Duration,
    /// Snapshot file. None disables persistence.
    pub snapshot_path: Option<PathBuf>,
    /// Dev faucet amount. Zero disables the faucet.
    pub faucet_amount: Amount,
    /// Local development node (`HELIX_DEV_MODE`). Enables the faucet.
    pub dev_mode: bool,
    /// Node version string.
    pub version: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let sequencer = SequencerConfig::default();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            block_time: sequencer.block_time,
            snapshot_path: None,
            faucet_amount: 0,
            dev_mode: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl NodeConfig {
    /// Local development node with the faucet on.
    pub fn dev() -> Self {
        Self {
            faucet_amount: SequencerConfig::default().faucet_amount,
            dev_mode: true,
            ..Default::default()
        }
    }

    /// Create config from environment variables, falling back to defaults.
    ///
    /// `HELIX_FAUCET_AMOUNT` is only honoured in dev mode.
    pub fn from_env() -> Self {
        let defaults = if dev_mode_from_env() { Self::dev() } else { Self::default() };
        let faucet_amount = if defaults.dev_mode {
            env_parse("HELIX_FAUCET_AMOUNT").unwrap_or(defaults.faucet_amount)
        } else {
            0
        };
        Self {
            bind_addr: env_parse("HELIX_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: env_parse("HELIX_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            block_time: env_parse("HELIX_BLOCK_TIME_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.block_time),
            snapshot_path: std::env::var("HELIX_SNAPSHOT_PATH").ok().map(PathBuf::from),
            faucet_amount,
            ..defaults
        }
    }

    /// Sequencer settings derived from this config.
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            block_time: self.block_time,
            snapshot_path: self.snapshot_path.clone(),
            faucet_amount: self.faucet_amount,
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

/// Node server errors.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Sequencer error.
    #[error("Sequencer error: {0}")]
    Sequencer(#[from] SequencerError),
}

/// Connected client state.
struct ConnectedClient {
    /// Authenticated address.
    address: Option<Address>,
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
}

/// Per-connection state owned by the connection task.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientSession {
    /// Address after auth.
    pub address: Option<Address>,
    /// None: not subscribed. Some(None): all markets.
    pub subscription: Option<Option<MarketId>>,
}

impl ClientSession {
    /// Whether this client should receive `event`.
    pub fn wants(&self, event: &MarketEvent) -> bool {
        match self.subscription {
            Some(None) => true,
            Some(Some(market_id)) => event.market_id() == market_id,
            None => false,
        }
    }
}

/// The node server.
pub struct NodeServer {
    /// Node configuration.
    config: NodeConfig,
    /// Caller authentication.
    auth: Arc<AuthConfig>,
    /// Sequencer handle.
    sequencer: SequencerHandle,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl NodeServer {
    /// Create a new node server.
    pub fn new(config: NodeConfig, auth: AuthConfig, sequencer: SequencerHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        if auth.is_configured() {
            info!("JWT auth configured");
        } else if auth.dev_mode {
            warn!("Dev mode: clients authenticate with a bare address");
        } else {
            warn!("No JWT key and dev mode off: all logins will be refused");
        }
        if config.faucet_amount > 0 {
            warn!("Faucet enabled: {} per call", format_tokens(config.faucet_amount));
        }

        Self {
            config,
            auth: Arc::new(auth),
            sequencer,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Node listening on {}", self.config.bind_addr);

        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sequencer = self.sequencer.clone();
        let auth = self.auth.clone();
        let version = self.config.version.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut events = self.sequencer.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    address: None,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                });
            }

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut session = ClientSession::default();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                                Ok(text) => text,
                                Err(_) => {
                                    let _ = msg_tx.send(ServerMessage::error(
                                        ErrorCode::InvalidInput,
                                        "Binary frames must carry UTF-8 JSON",
                                    )).await;
                                    continue;
                                }
                            },
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(pong(0)).await;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => continue,
                        };

                        let client_msg = match ClientMessage::from_json(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                let _ = msg_tx.send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Invalid message format",
                                )).await;
                                continue;
                            }
                        };

                        let reply = dispatch(client_msg, &mut session, &sequencer, &auth, &version).await;

                        {
                            let mut clients = clients.write().await;
                            if let Some(client) = clients.get_mut(&addr) {
                                client.last_activity = Instant::now();
                                client.address = session.address;
                            }
                        }

                        if msg_tx.send(reply).await.is_err() {
                            break;
                        }
                    }

                    event = events.recv() => {
                        match event {
                            Ok(event) if session.wants(&event) => {
                                if msg_tx.send(ServerMessage::Event(event)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(missed)) => {
                                warn!("Client {} lagged, dropped {} events", addr, missed);
                            }
                            Err(RecvError::Closed) => {
                                let _ = msg_tx.send(ServerMessage::Shutdown {
                                    reason: "Sequencer stopped".to_string(),
                                }).await;
                                break;
                            }
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Node shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued replies flush before the socket drops
            drop(msg_tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            if let Some(client) = clients.write().await.remove(&addr) {
                debug!(
                    "Client {} ({}) was connected for {:?}",
                    addr,
                    client.address.map(|a| a.short()).unwrap_or_else(|| "anonymous".into()),
                    client.connected_at.elapsed()
                );
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Drop idle clients from the registry.
    async fn run_cleanup_loop(
        clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        idle_timeout: Duration,
    ) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let mut clients = clients.write().await;
            let before = clients.len();
            clients.retain(|_, c| now.duration_since(c.last_activity) <= idle_timeout);

            let removed = before - clients.len();
            if removed > 0 {
                info!("Removed {} idle clients", removed);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

// =============================================================================
// MESSAGE DISPATCH
// =============================================================================

/// Handle one client message and produce the reply.
pub async fn dispatch(
    msg: ClientMessage,
    session: &mut ClientSession,
    sequencer: &SequencerHandle,
    auth: &AuthConfig,
    version: &str,
) -> ServerMessage {
    match msg {
        ClientMessage::Auth(request) => handle_auth(request, session, auth, version),
        ClientMessage::Ping { timestamp } => pong(timestamp),
        ClientMessage::Subscribe { market_id } => {
            session.subscription = Some(market_id);
            ServerMessage::Subscribed { market_id }
        }
        ClientMessage::Unsubscribe => {
            session.subscription = None;
            ServerMessage::Unsubscribed
        }
        ClientMessage::GetMarket { market_id } => {
            reply_query(sequencer, Query::Market(market_id)).await
        }
        ClientMessage::GetPosition { market_id, participant } => {
            match participant.or(session.address) {
                Some(participant) => {
                    reply_query(sequencer, Query::Position { market_id, participant }).await
                }
                None => not_authenticated(),
            }
        }
        ClientMessage::GetBalance { account } => match account.or(session.address) {
            Some(account) => reply_query(sequencer, Query::Balance(account)).await,
            None => not_authenticated(),
        },
        ClientMessage::PreviewCloseCheck { market_id } => {
            reply_query(sequencer, Query::PreviewCloseCheck(market_id)).await
        }
        ClientMessage::GetRandomCloseStatus { market_id } => {
            reply_query(sequencer, Query::RandomCloseStatus(market_id)).await
        }
        ClientMessage::GetMarketCount => reply_query(sequencer, Query::MarketCount).await,
        other => {
            let Some(sender) = session.address else {
                return not_authenticated();
            };
            let tx = match transaction_from(other) {
                Ok(tx) => tx,
                Err(reply) => return reply,
            };
            match sequencer.execute(sender, tx).await {
                Ok(receipt) => ServerMessage::Receipt(receipt),
                Err(e) => error_reply(e),
            }
        }
    }
}

fn handle_auth(
    request: AuthRequest,
    session: &mut ClientSession,
    auth: &AuthConfig,
    version: &str,
) -> ServerMessage {
    match authenticate(&request.token, auth) {
        Ok(address) => {
            session.address = Some(address);
            debug!("Client v{} authenticated as {}", request.client_version, address.short());
            ServerMessage::AuthResult(AuthResult {
                success: true,
                address: Some(address),
                error: None,
                server_version: version.to_string(),
            })
        }
        Err(e) => {
            let code = match e {
                AuthError::Expired => ErrorCode::TokenExpired,
                AuthError::InvalidFormat | AuthError::InvalidSignature => ErrorCode::InvalidToken,
                _ => ErrorCode::AuthFailed,
            };
            ServerMessage::error(code, e.to_string())
        }
    }
}

/// Map a state-changing client message onto a sequencer transaction.
fn transaction_from(msg: ClientMessage) -> Result<Transaction, ServerMessage> {
    let tx = match msg {
        ClientMessage::SubmitStatement { content_ref, commit_duration, reveal_duration } => {
            Transaction::SubmitStatement { content_ref, commit_duration, reveal_duration }
        }
        ClientMessage::SubmitStatementWithRandomClose {
            content_ref,
            min_commit_duration,
            reveal_duration,
            enable_random_close,
            avg_commit_duration,
        } => Transaction::SubmitStatementWithRandomClose {
            content_ref,
            min_commit_duration,
            reveal_duration,
            enable_random_close,
            avg_commit_duration,
        },
        ClientMessage::CommitBet { market_id, commit_hash, amount } => {
            let hash = parse_digest(&commit_hash).ok_or_else(|| {
                ServerMessage::error(ErrorCode::InvalidInput, "commit_hash must be 32 hex bytes")
            })?;
            Transaction::CommitBet { market_id, hash, amount }
        }
        ClientMessage::RevealBet { market_id, choice, salt } => {
            let salt = parse_salt(&salt).ok_or_else(|| {
                ServerMessage::error(ErrorCode::InvalidInput, "salt must be 32 hex bytes")
            })?;
            Transaction::RevealBet { market_id, choice, salt }
        }
        ClientMessage::Resolve { market_id } => Transaction::Resolve { market_id },
        ClientMessage::Claim { market_id } => Transaction::Claim { market_id },
        ClientMessage::WithdrawUnrevealed { market_id } => Transaction::WithdrawUnrevealed { market_id },
        ClientMessage::PingMarket { market_id } => Transaction::PingMarket { market_id },
        ClientMessage::Approve { amount } => Transaction::Approve { amount },
        ClientMessage::Faucet => Transaction::Faucet,
        other => {
            return Err(ServerMessage::error(
                ErrorCode::InvalidInput,
                format!("not a transaction: {:?}", other),
            ))
        }
    };
    Ok(tx)
}

async fn reply_query(sequencer: &SequencerHandle, query: Query) -> ServerMessage {
    match sequencer.query(query).await {
        Ok(reply) => reply,
        Err(e) => error_reply(e),
    }
}

fn error_reply(err: SequencerError) -> ServerMessage {
    let code = match &err {
        SequencerError::Market(e) => ErrorCode::from(e.kind()),
        SequencerError::FaucetDisabled => ErrorCode::InvalidInput,
        _ => ErrorCode::InternalError,
    };
    ServerMessage::error(code, err.to_string())
}

fn not_authenticated() -> ServerMessage {
    ServerMessage::error(ErrorCode::NotAuthenticated, "Must authenticate first")
}

fn pong(timestamp: u64) -> ServerMessage {
    ServerMessage::Pong {
        timestamp,
        server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
    }
}
