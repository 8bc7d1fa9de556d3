//! Block Sequencer
//!
//! A single tokio task owns the market engine and its ledger. Connections
//! send it commands over a channel; it applies them one at a time in arrival
//! order, inside the current block, and broadcasts the resulting events.
//!
//! Blocks are sealed on a fixed interval. Each new block takes the wall-clock
//! timestamp and chains its randomness from the previous block, starting from
//! a fresh uuid seed the first time the node runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{Address, Amount, BlockContext, BlockProducer, Digest32, ONE_TOKEN};
use crate::core::amount::format_tokens;
use crate::ledger::{InMemoryLedger, TokenLedger};
use crate::market::{
    CallContext, Choice, HelixMarket, MarketBook, MarketConfig, MarketError, MarketEvent, MarketId,
    Salt,
};
use crate::network::protocol::{
    BalanceView, ClosePreviewView, PositionView, RandomCloseView, ServerMessage, TxReceipt,
    TxResult,
};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Sequencer errors.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The engine rejected the call.
    #[error(transparent)]
    Market(#[from] MarketError),

    /// Faucet amount is zero.
    #[error("faucet disabled")]
    FaucetDisabled,

    /// The sequencer task has stopped.
    #[error("sequencer stopped")]
    Stopped,

    /// Snapshot file could not be read or written.
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("snapshot codec: {0}")]
    Codec(#[from] bincode::Error),

    /// Snapshot written by an incompatible build.
    #[error("snapshot version {found}, expected {expected}")]
    SnapshotVersion { found: u32, expected: u32 },
}

/// Sequencer configuration.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Interval between sealed blocks.
    pub block_time: Duration,
    /// Where to persist state on shutdown. None disables persistence.
    pub snapshot_path: Option<PathBuf>,
    /// Tokens minted per faucet call. Zero disables the faucet.
    pub faucet_amount: Amount,
    /// Engine parameters for a fresh node.
    pub market: MarketConfig,
    /// Account holding escrowed stakes.
    pub custody: Address,
    /// Command queue depth.
    pub queue_depth: usize,
    /// Event broadcast capacity.
    pub event_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            block_time: Duration::from_secs(2),
            snapshot_path: None,
            faucet_amount: 10_000 * ONE_TOKEN,
            market: MarketConfig::default(),
            custody: Address::from_subject("helix-market-custody"),
            queue_depth: 1024,
            event_capacity: 4096,
        }
    }
}

/// A state-changing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    SubmitStatement {
        content_ref: String,
        commit_duration: u64,
        reveal_duration: u64,
    },
    SubmitStatementWithRandomClose {
        content_ref: String,
        min_commit_duration: u64,
        reveal_duration: u64,
        enable_random_close: bool,
        avg_commit_duration: u64,
    },
    CommitBet { market_id: MarketId, hash: Digest32, amount: Amount },
    RevealBet { market_id: MarketId, choice: u8, salt: Salt },
    Resolve { market_id: MarketId },
    Claim { market_id: MarketId },
    WithdrawUnrevealed { market_id: MarketId },
    PingMarket { market_id: MarketId },
    Approve { amount: Amount },
    Faucet,
}

/// A read-only call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Market(MarketId),
    Position { market_id: MarketId, participant: Address },
    Balance(Address),
    PreviewCloseCheck(MarketId),
    RandomCloseStatus(MarketId),
    MarketCount,
}

/// Everything needed to resume a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub version: u32,
    pub config: MarketConfig,
    pub book: MarketBook,
    pub ledger: InMemoryLedger,
    pub block: BlockContext,
}

impl NodeSnapshot {
    /// Write to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), SequencerError> {
        let bytes = bincode::serialize(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read from `path`.
    pub fn load(path: &Path) -> Result<Self, SequencerError> {
        let bytes = std::fs::read(path)?;
        let snapshot: NodeSnapshot = bincode::deserialize(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SequencerError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

enum Command {
    Execute {
        sender: Address,
        tx: Transaction,
        reply: oneshot::Sender<Result<TxReceipt, SequencerError>>,
    },
    Query {
        query: Query,
        reply: oneshot::Sender<Result<ServerMessage, SequencerError>>,
    },
    AdvanceBlock {
        timestamp: Option<u64>,
        reply: oneshot::Sender<BlockContext>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), SequencerError>>,
    },
}

/// Current wall-clock time in Unix seconds.
pub fn wall_clock() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// =============================================================================
// SEQUENCER
// =============================================================================

/// Owns the engine and the block chain.
pub struct Sequencer {
    engine: HelixMarket<InMemoryLedger>,
    producer: BlockProducer,
    config: SequencerConfig,
    events: broadcast::Sender<MarketEvent>,
}

impl Sequencer {
    /// Fresh node starting at `timestamp`.
    pub fn new(config: SequencerConfig, timestamp: u64) -> Result<Self, SequencerError> {
        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());

        let ledger = InMemoryLedger::new(config.custody);
        let engine = HelixMarket::new(config.market.clone(), ledger)?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            engine,
            producer: BlockProducer::new(seed, timestamp),
            config,
            events,
        })
    }

    /// Resume from a snapshot. Fails if the stored engine config is invalid.
    pub fn from_snapshot(config: SequencerConfig, snapshot: NodeSnapshot) -> Result<Self, SequencerError> {
        let engine = HelixMarket::from_parts(snapshot.config, snapshot.book, snapshot.ledger)?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            engine,
            producer: BlockProducer::resume(snapshot.block),
            config,
            events,
        })
    }

    /// Resume from the configured snapshot if one exists, else start fresh.
    pub fn restore(config: SequencerConfig) -> Result<Self, SequencerError> {
        match config.snapshot_path.clone() {
            Some(path) if path.exists() => {
                let snapshot = NodeSnapshot::load(&path)?;
                info!(
                    "Restored {} markets at block {} from {}",
                    snapshot.book.len(),
                    snapshot.block.number,
                    path.display()
                );
                Self::from_snapshot(config, snapshot)
            }
            _ => Self::new(config, wall_clock()),
        }
    }

    /// The engine.
    pub fn engine(&self) -> &HelixMarket<InMemoryLedger> {
        &self.engine
    }

    /// The block transactions currently execute in.
    pub fn current_block(&self) -> &BlockContext {
        self.producer.current()
    }

    /// Subscribe to market events.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    /// Seal the current block and open the next.
    pub fn produce_block(&mut self, timestamp: u64) -> BlockContext {
        *self.producer.advance(timestamp)
    }

    /// Apply a transaction in the current block.
    pub fn execute(&mut self, sender: Address, tx: Transaction) -> Result<TxReceipt, SequencerError> {
        if sender == self.engine.ledger().custody() {
            return Err(MarketError::CustodyCaller.into());
        }
        let block = *self.producer.current();
        let ctx = CallContext::new(sender, block);

        let result = match tx {
            Transaction::SubmitStatement { content_ref, commit_duration, reveal_duration } => {
                let market_id = self.engine.submit_statement(
                    &ctx, &content_ref, commit_duration, reveal_duration,
                )?;
                TxResult::MarketCreated { market_id }
            }
            Transaction::SubmitStatementWithRandomClose {
                content_ref,
                min_commit_duration,
                reveal_duration,
                enable_random_close,
                avg_commit_duration,
            } => {
                let market_id = self.engine.submit_statement_with_random_close(
                    &ctx,
                    &content_ref,
                    min_commit_duration,
                    reveal_duration,
                    enable_random_close,
                    avg_commit_duration,
                )?;
                TxResult::MarketCreated { market_id }
            }
            Transaction::CommitBet { market_id, hash, amount } => TxResult::Committed {
                outcome: self.engine.commit_bet(&ctx, market_id, hash, amount)?,
            },
            Transaction::RevealBet { market_id, choice, salt } => TxResult::Revealed {
                choice: self.engine.reveal_bet(&ctx, market_id, choice, &salt)?,
            },
            Transaction::Resolve { market_id } => TxResult::Resolved {
                settlement: self.engine.resolve(&ctx, market_id)?,
            },
            Transaction::Claim { market_id } => TxResult::Claimed {
                amount: self.engine.claim(&ctx, market_id)?,
            },
            Transaction::WithdrawUnrevealed { market_id } => TxResult::Withdrawn {
                forfeiture: self.engine.withdraw_unrevealed(&ctx, market_id)?,
            },
            Transaction::PingMarket { market_id } => TxResult::Pinged {
                outcome: self.engine.ping_market(&ctx, market_id)?,
            },
            Transaction::Approve { amount } => {
                self.engine.ledger_mut().approve(&sender, amount);
                TxResult::Approved { amount }
            }
            Transaction::Faucet => {
                let amount = self.config.faucet_amount;
                if amount == 0 {
                    return Err(SequencerError::FaucetDisabled);
                }
                self.engine.ledger_mut().mint(&sender, amount).map_err(MarketError::from)?;
                debug!("Faucet: {} received {}", sender.short(), format_tokens(amount));
                TxResult::Funded { amount }
            }
        };

        for event in self.engine.drain_events() {
            // No subscribers is fine
            let _ = self.events.send(event);
        }

        Ok(TxReceipt {
            tx_id: Uuid::new_v4().to_string(),
            block_number: block.number,
            timestamp: block.timestamp,
            result,
        })
    }

    /// Answer a read-only query against the current block.
    pub fn answer(&self, query: Query) -> Result<ServerMessage, SequencerError> {
        let block = self.producer.current();
        let engine = &self.engine;

        let message = match query {
            Query::Market(market_id) => ServerMessage::Market(engine.market(market_id)?),
            Query::Position { market_id, participant } => {
                let position = engine.position(market_id, &participant)?.unwrap_or_default();
                ServerMessage::Position(PositionView {
                    market_id,
                    participant,
                    no: position.stake(Choice::No),
                    yes: position.stake(Choice::Yes),
                    unaligned: position.stake(Choice::Unaligned),
                    committed: engine.committed_amount(market_id, &participant)?,
                    has_committed: engine.has_committed(market_id, &participant)?,
                    claimed: position.claimed,
                })
            }
            Query::Balance(account) => ServerMessage::Balance(BalanceView {
                account,
                balance: engine.ledger().balance_of(&account),
                allowance: engine.ledger().allowance(&account),
            }),
            Query::PreviewCloseCheck(market_id) => {
                let preview = engine.preview_close_check(market_id, block)?;
                ServerMessage::ClosePreview(ClosePreviewView::new(market_id, block.number, &preview))
            }
            Query::RandomCloseStatus(market_id) => {
                let status = engine.random_close_status(market_id)?;
                ServerMessage::RandomCloseStatus(RandomCloseView::new(market_id, &status))
            }
            Query::MarketCount => ServerMessage::MarketCount { count: engine.market_count() },
        };

        Ok(message)
    }

    /// Copy of everything needed to resume.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.engine.config().clone(),
            book: self.engine.book().clone(),
            ledger: self.engine.ledger().clone(),
            block: *self.producer.current(),
        }
    }

    /// Write the snapshot if persistence is configured.
    pub fn persist(&self) -> Result<(), SequencerError> {
        if let Some(path) = &self.config.snapshot_path {
            self.snapshot().save(path)?;
            info!(
                "Saved {} markets at block {} to {}",
                self.engine.market_count(),
                self.producer.current().number,
                path.display()
            );
        }
        Ok(())
    }

    /// Start the sequencer task.
    pub fn spawn(self) -> (SequencerHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let handle = SequencerHandle {
            commands,
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.config.block_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        info!(
            "Sequencer running at block {} ({}ms blocks)",
            self.producer.current().number,
            self.config.block_time.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let block = self.produce_block(wall_clock());
                    debug!("Block {} at {}", block.number, block.timestamp);
                }

                command = commands.recv() => {
                    match command {
                        Some(Command::Execute { sender, tx, reply }) => {
                            let result = self.execute(sender, tx);
                            if let Err(e) = &result {
                                debug!("Rejected transaction from {}: {}", sender.short(), e);
                            }
                            let _ = reply.send(result);
                        }
                        Some(Command::Query { query, reply }) => {
                            let _ = reply.send(self.answer(query));
                        }
                        Some(Command::AdvanceBlock { timestamp, reply }) => {
                            let block = self.produce_block(timestamp.unwrap_or_else(wall_clock));
                            let _ = reply.send(block);
                        }
                        Some(Command::Shutdown { reply }) => {
                            let _ = reply.send(self.persist());
                            break;
                        }
                        None => {
                            warn!("All sequencer handles dropped");
                            if let Err(e) = self.persist() {
                                error!("Failed to save snapshot: {}", e);
                            }
                            break;
                        }
                    }
                }
            }
        }

        info!("Sequencer stopped at block {}", self.producer.current().number);
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable handle to a running sequencer.
#[derive(Clone)]
pub struct SequencerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<MarketEvent>,
}

impl SequencerHandle {
    /// Submit a transaction and wait for its receipt.
    pub async fn execute(&self, sender: Address, tx: Transaction) -> Result<TxReceipt, SequencerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Execute { sender, tx, reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)?
    }

    /// Run a query.
    pub async fn query(&self, query: Query) -> Result<ServerMessage, SequencerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Query { query, reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)?
    }

    /// Seal the current block now. A timestamp ahead of the wall clock
    /// moves block time forward; one behind it is clamped.
    pub async fn advance_block(&self, timestamp: Option<u64>) -> Result<BlockContext, SequencerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AdvanceBlock { timestamp, reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)
    }

    /// Stop the task, persisting state first.
    pub async fn shutdown(&self) -> Result<(), SequencerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)?
    }

    /// Subscribe to market events.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), SequencerError> {
        self.commands.send(command).await.map_err(|_| SequencerError::Stopped)
    }
}
