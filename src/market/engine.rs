//! Settlement Engine
//!
//! [`HelixMarket`] owns the market book and the token ledger handle and
//! exposes every entrypoint and view. Each entrypoint follows one shape:
//!
//! 1. Validate against current state (no mutation).
//! 2. Perform the ledger interaction (the only fallible side effect).
//! 3. Apply state changes, which cannot fail.
//!
//! A rejected call therefore leaves the book, the ledger and the event
//! buffer untouched. `&mut self` gives each call exclusive access, so no
//! ledger callback can observe half-applied state.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::{Address, Amount, BlockContext, Digest32};
use crate::core::amount::format_tokens;
use crate::ledger::TokenLedger;

use super::choice::{Choice, Outcome};
use super::commitment::{Commitment, Salt};
use super::config::MarketConfig;
use super::entropy::{CloseCheck, RandomClose};
use super::error::{MarketError, MarketResult};
use super::events::{CloseTrigger, MarketEvent, MarketEventData};
use super::payout::{self, ClaimLedger, Forfeiture, Settlement};
use super::phase::{self, Phase};
use super::state::{Market, MarketBook, MarketId, Position};

// =============================================================================
// CALL CONTEXT + RESULTS
// =============================================================================

/// Who is calling, and in which block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Transaction sender.
    pub sender: Address,
    /// Block the transaction executes in.
    pub block: BlockContext,
}

impl CallContext {
    /// Create a call context.
    pub fn new(sender: Address, block: BlockContext) -> Self {
        Self { sender, block }
    }

    /// Block timestamp.
    #[inline]
    pub fn now(&self) -> u64 {
        self.block.timestamp
    }
}

/// Result of a successful `commit_bet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    /// Stake pulled and commitment stored.
    Committed,
    /// This call's close check ended the commit phase. Nothing was staked.
    PhaseClosed,
}

/// Result of `ping_market`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingOutcome {
    /// Whether a close check actually ran.
    pub eligible: bool,
    /// Whether the check closed the commit phase.
    pub closed: bool,
    /// Bounty paid to the pinger.
    pub reward: Amount,
}

/// Read-only close check preview.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePreview {
    /// Hash the check would produce.
    pub candidate_hash: Digest32,
    /// Whether the check would close the phase.
    pub would_close: bool,
    /// Whether a check in this block would count at all.
    pub eligible: bool,
}

/// Random-close configuration of one market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomCloseStatus {
    /// Random close enabled.
    pub enabled: bool,
    /// Minimum commit duration.
    pub min_duration: u64,
    /// Target average commit duration.
    pub avg_duration: u64,
    /// Calibrated target.
    pub difficulty_target: u128,
    /// Current accumulator.
    pub accumulator: Digest32,
    /// Close timestamp, 0 while open.
    pub closed_at: u64,
    /// First timestamp at which checks count.
    pub eligible_from: u64,
}

/// Flattened market state for clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketView {
    pub id: MarketId,
    pub content_ref: String,
    pub originator: Address,
    pub created_at: u64,
    /// Effective commit end, if known.
    pub commit_end: Option<u64>,
    /// Effective reveal end, if known.
    pub reveal_end: Option<u64>,
    pub yes_pool: Amount,
    pub no_pool: Amount,
    pub unaligned_pool: Amount,
    pub resolved: bool,
    /// `true` when YES won. Meaningful only when resolved and not tied.
    pub outcome: bool,
    pub tie: bool,
    pub originator_fee: Amount,
    pub reward_pool: Amount,
    pub claimed_winning_stake: Amount,
    pub claimed_reward_paid: Amount,
    pub random_close: bool,
    pub ping_bounty: Amount,
}

impl From<&Market> for MarketView {
    fn from(market: &Market) -> Self {
        Self {
            id: market.id,
            content_ref: market.content_ref.clone(),
            originator: market.originator,
            created_at: market.created_at,
            commit_end: market.commit_end(),
            reveal_end: market.reveal_end(),
            yes_pool: market.pools.yes,
            no_pool: market.pools.no,
            unaligned_pool: market.pools.unaligned,
            resolved: market.is_resolved(),
            outcome: market.outcome == Some(Outcome::Yes),
            tie: market.outcome == Some(Outcome::Tie),
            originator_fee: market.originator_fee,
            reward_pool: market.reward_pool,
            claimed_winning_stake: market.claimed_winning_stake,
            claimed_reward_paid: market.claimed_reward_paid,
            random_close: market.has_random_close(),
            ping_bounty: market.ping_bounty,
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Commit-reveal truth-market settlement engine.
#[derive(Clone, Debug)]
pub struct HelixMarket<L: TokenLedger> {
    config: MarketConfig,
    ledger: L,
    book: MarketBook,
    events: Vec<MarketEvent>,
}

impl<L: TokenLedger> HelixMarket<L> {
    /// Create an engine over `ledger`.
    pub fn new(config: MarketConfig, ledger: L) -> MarketResult<Self> {
        Self::from_parts(config, MarketBook::new(), ledger)
    }

    /// Rebuild an engine from persisted parts.
    pub fn from_parts(config: MarketConfig, book: MarketBook, ledger: L) -> MarketResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            book,
            events: Vec::new(),
        })
    }

    /// Split into persisted parts. Undrained events are dropped.
    pub fn into_parts(self) -> (MarketConfig, MarketBook, L) {
        (self.config, self.book, self.ledger)
    }

    /// Active configuration.
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Token ledger handle.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Mutable token ledger handle (faucets, allowances).
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    /// Market book.
    pub fn book(&self) -> &MarketBook {
        &self.book
    }

    /// Take all buffered events.
    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, block: &BlockContext, data: MarketEventData) {
        self.events.push(MarketEvent::new(block, data));
    }

    /// Custody holds pooled escrow and never acts as a participant.
    fn ensure_participant(&self, ctx: &CallContext) -> MarketResult<()> {
        if ctx.sender == self.ledger.custody() {
            return Err(MarketError::CustodyCaller);
        }
        Ok(())
    }

    // ===== SUBMISSION =====

    /// Create a fixed-duration market. Charges and burns the statement fee.
    pub fn submit_statement(
        &mut self,
        ctx: &CallContext,
        content_ref: &str,
        commit_duration: u64,
        reveal_duration: u64,
    ) -> MarketResult<MarketId> {
        self.ensure_participant(ctx)?;
        self.validate_content(content_ref)?;
        self.validate_commit_duration(commit_duration)?;
        self.validate_reveal_duration(reveal_duration)?;

        let commit_end = ctx.now().checked_add(commit_duration).ok_or(MarketError::Overflow)?;
        commit_end.checked_add(reveal_duration).ok_or(MarketError::Overflow)?;

        self.collect_statement_fee(&ctx.sender, 0)?;

        let id = self.book.insert(Market {
            id: self.book.next_id(),
            content_ref: content_ref.to_string(),
            originator: ctx.sender,
            created_at: ctx.now(),
            fixed_commit_end: Some(commit_end),
            reveal_duration,
            pools: Default::default(),
            outcome: None,
            originator_fee: 0,
            reward_pool: 0,
            claimed_winning_stake: 0,
            claimed_reward_paid: 0,
            random_close: None,
            ping_bounty: 0,
        });

        info!(
            "Market {} created by {} (commit until {}, reveal {}s)",
            id, ctx.sender.short(), commit_end, reveal_duration
        );
        self.emit(&ctx.block, MarketEventData::StatementCreated {
            market_id: id,
            originator: ctx.sender,
            content_ref: content_ref.to_string(),
            commit_end: Some(commit_end),
            reveal_duration,
            random_close: false,
        });

        Ok(id)
    }

    /// Create a market whose commit phase may close at a random time after
    /// `min_commit_duration`, averaging `avg_commit_duration`.
    ///
    /// With `enable_random_close == false` this is `submit_statement` with
    /// `commit_duration = min_commit_duration`.
    pub fn submit_statement_with_random_close(
        &mut self,
        ctx: &CallContext,
        content_ref: &str,
        min_commit_duration: u64,
        reveal_duration: u64,
        enable_random_close: bool,
        avg_commit_duration: u64,
    ) -> MarketResult<MarketId> {
        self.ensure_participant(ctx)?;
        if !enable_random_close {
            return self.submit_statement(ctx, content_ref, min_commit_duration, reveal_duration);
        }

        self.validate_content(content_ref)?;
        self.validate_commit_duration(min_commit_duration)?;
        if avg_commit_duration < min_commit_duration {
            return Err(MarketError::InvalidAverageDuration {
                avg: avg_commit_duration,
                min: min_commit_duration,
            });
        }
        self.validate_commit_duration(avg_commit_duration)?;
        self.validate_reveal_duration(reveal_duration)?;

        let escrow = self.config.ping_escrow();
        self.collect_statement_fee(&ctx.sender, escrow)?;

        let id = self.book.next_id();
        let random_close = RandomClose::new(
            id,
            &ctx.block,
            min_commit_duration,
            avg_commit_duration,
            self.config.close_check_interval,
        );
        self.book.insert(Market {
            id,
            content_ref: content_ref.to_string(),
            originator: ctx.sender,
            created_at: ctx.now(),
            fixed_commit_end: None,
            reveal_duration,
            pools: Default::default(),
            outcome: None,
            originator_fee: 0,
            reward_pool: 0,
            claimed_winning_stake: 0,
            claimed_reward_paid: 0,
            random_close: Some(random_close),
            ping_bounty: escrow,
        });

        info!(
            "Market {} created by {} (random close, min {}s, avg {}s)",
            id, ctx.sender.short(), min_commit_duration, avg_commit_duration
        );
        self.emit(&ctx.block, MarketEventData::StatementCreated {
            market_id: id,
            originator: ctx.sender,
            content_ref: content_ref.to_string(),
            commit_end: None,
            reveal_duration,
            random_close: true,
        });

        Ok(id)
    }

    // ===== COMMIT / REVEAL =====

    /// Stake `amount` behind `hash = H(choice, salt, sender)`.
    pub fn commit_bet(
        &mut self,
        ctx: &CallContext,
        market_id: MarketId,
        hash: Digest32,
        amount: Amount,
    ) -> MarketResult<CommitOutcome> {
        self.ensure_participant(ctx)?;
        let now = ctx.now();
        let record = self.book.get(market_id)?;
        phase::ensure_commit_open(&record.market, now)?;
        if record.commitments.contains_key(&ctx.sender) {
            return Err(MarketError::AlreadyCommitted);
        }
        if amount == 0 {
            return Err(MarketError::ZeroAmount);
        }

        let check = eligible_check(&record.market, &ctx.block);
        if let Some(check) = check.filter(|c| c.would_close) {
            self.close_commit_phase(ctx, market_id, &check, CloseTrigger::Commit)?;
            return Ok(CommitOutcome::PhaseClosed);
        }

        self.ledger.transfer_from(&ctx.sender, amount)?;

        let record = self.book.get_mut(market_id)?;
        if let (Some(check), Some(rc)) = (check, record.market.random_close.as_mut()) {
            rc.apply(&check, now);
        }
        record.commitments.insert(ctx.sender, Commitment::new(hash, amount));

        debug!("Market {}: {} committed {}", market_id, ctx.sender.short(), format_tokens(amount));
        self.emit(&ctx.block, MarketEventData::BetCommitted {
            market_id,
            participant: ctx.sender,
            amount,
        });

        Ok(CommitOutcome::Committed)
    }

    /// Open the caller's commitment and route its stake into a pool.
    pub fn reveal_bet(
        &mut self,
        ctx: &CallContext,
        market_id: MarketId,
        choice: u8,
        salt: &Salt,
    ) -> MarketResult<Choice> {
        self.ensure_participant(ctx)?;
        let record = self.book.get(market_id)?;
        phase::ensure_reveal_open(&record.market, ctx.now())?;

        let commitment = record
            .commitments
            .get(&ctx.sender)
            .copied()
            .ok_or(MarketError::NoCommitment)?;
        if !commitment.opens(choice, salt, &ctx.sender) {
            return Err(MarketError::InvalidReveal);
        }
        let choice = Choice::from_u8(choice).ok_or(MarketError::InvalidChoice(choice))?;

        let pools = record
            .market
            .pools
            .checked_add(choice, commitment.amount)
            .ok_or(MarketError::Overflow)?;

        let record = self.book.get_mut(market_id)?;
        record.commitments.remove(&ctx.sender);
        record.market.pools = pools;
        let position = record.positions.entry(ctx.sender).or_default();
        position.stakes[choice.index()] = position.stakes[choice.index()].saturating_add(commitment.amount);

        debug!(
            "Market {}: {} revealed {} on {}",
            market_id, ctx.sender.short(), format_tokens(commitment.amount), choice
        );
        self.emit(&ctx.block, MarketEventData::BetRevealed {
            market_id,
            participant: ctx.sender,
            choice,
            amount: commitment.amount,
        });

        Ok(choice)
    }

    // ===== SETTLEMENT =====

    /// Freeze the outcome and pay the originator fee. Callable by anyone
    /// once the reveal window has elapsed.
    pub fn resolve(&mut self, ctx: &CallContext, market_id: MarketId) -> MarketResult<Settlement> {
        self.ensure_participant(ctx)?;
        let record = self.book.get(market_id)?;
        let market = &record.market;
        if market.is_resolved() {
            return Err(MarketError::AlreadyResolved);
        }
        phase::ensure_reveal_over(market, ctx.now())?;

        let settlement = payout::settle(&market.pools, self.config.originator_fee_bps)
            .ok_or(MarketError::Overflow)?;
        let originator = market.originator;
        let pools = market.pools;

        if settlement.originator_fee > 0 {
            self.ledger.transfer(&originator, settlement.originator_fee)?;
        }

        let market = &mut self.book.get_mut(market_id)?.market;
        market.outcome = Some(settlement.outcome);
        market.originator_fee = settlement.originator_fee;
        market.reward_pool = settlement.reward_pool;

        info!(
            "Market {} resolved {} (yes {}, no {}, unaligned {}, fee {})",
            market_id,
            settlement.outcome,
            format_tokens(pools.yes),
            format_tokens(pools.no),
            format_tokens(pools.unaligned),
            format_tokens(settlement.originator_fee)
        );
        self.emit(&ctx.block, MarketEventData::MarketResolved {
            market_id,
            outcome: settlement.outcome,
            yes: pools.yes,
            no: pools.no,
            unaligned: pools.unaligned,
            originator_fee: settlement.originator_fee,
        });

        Ok(settlement)
    }

    /// Pay the caller's share of a resolved market.
    pub fn claim(&mut self, ctx: &CallContext, market_id: MarketId) -> MarketResult<Amount> {
        self.ensure_participant(ctx)?;
        let record = self.book.get(market_id)?;
        let market = &record.market;
        let outcome = market.outcome.ok_or(MarketError::NotResolved)?;

        let position = record
            .positions
            .get(&ctx.sender)
            .filter(|p| !p.claimed)
            .copied()
            .ok_or(MarketError::NoWinningBet)?;

        let claims = ClaimLedger {
            winning_pool: market.winning_pool(),
            reward_pool: market.reward_pool,
            claimed_winning_stake: market.claimed_winning_stake,
            claimed_reward_paid: market.claimed_reward_paid,
        };

        let (stake, amount) = match outcome.winning_choice() {
            None => {
                let refund = position.total();
                (0, refund)
            }
            Some(winning) => {
                let stake = position.stake(winning);
                if stake == 0 {
                    return Err(MarketError::NoWinningBet);
                }
                (stake, claims.payout(stake).ok_or(MarketError::Overflow)?)
            }
        };
        if outcome.is_tie() && amount == 0 {
            return Err(MarketError::NoWinningBet);
        }
        let claims = claims.record(stake, amount).ok_or(MarketError::Overflow)?;

        if amount > 0 {
            self.ledger.transfer(&ctx.sender, amount)?;
        }

        let record = self.book.get_mut(market_id)?;
        record.market.claimed_winning_stake = claims.claimed_winning_stake;
        record.market.claimed_reward_paid = claims.claimed_reward_paid;
        if let Some(position) = record.positions.get_mut(&ctx.sender) {
            position.claimed = true;
        }

        info!("Market {}: {} claimed {}", market_id, ctx.sender.short(), format_tokens(amount));
        self.emit(&ctx.block, MarketEventData::RewardClaimed {
            market_id,
            participant: ctx.sender,
            amount,
        });

        Ok(amount)
    }

    /// Forfeit the caller's never-revealed stake after the reveal window.
    pub fn withdraw_unrevealed(&mut self, ctx: &CallContext, market_id: MarketId) -> MarketResult<Forfeiture> {
        self.ensure_participant(ctx)?;
        let record = self.book.get(market_id)?;
        phase::ensure_reveal_over(&record.market, ctx.now())?;

        let commitment = record
            .commitments
            .get(&ctx.sender)
            .copied()
            .ok_or(MarketError::NoUnrevealedStake)?;
        let split = payout::forfeiture_split(commitment.amount, self.config.unrevealed_burn_bps);

        // Both ledger calls draw on custody.
        let custody = self.ledger.custody();
        let available = self.ledger.balance_of(&custody);
        if available < commitment.amount {
            return Err(crate::ledger::LedgerError::InsufficientBalance {
                needed: commitment.amount,
                available,
            }
            .into());
        }
        if split.burned > 0 {
            self.ledger.burn(split.burned)?;
        }
        if split.returned > 0 {
            self.ledger.transfer(&ctx.sender, split.returned)?;
        }

        self.book.get_mut(market_id)?.commitments.remove(&ctx.sender);

        info!(
            "Market {}: {} forfeited {} (burned {}, returned {})",
            market_id,
            ctx.sender.short(),
            format_tokens(commitment.amount),
            format_tokens(split.burned),
            format_tokens(split.returned)
        );
        self.emit(&ctx.block, MarketEventData::UnrevealedWithdrawn {
            market_id,
            participant: ctx.sender,
            burned: split.burned,
            returned: split.returned,
        });

        Ok(split)
    }

    // ===== ANTI-SNIPING =====

    /// Force a close check. No-op (not an error) when no check is due.
    pub fn ping_market(&mut self, ctx: &CallContext, market_id: MarketId) -> MarketResult<PingOutcome> {
        self.ensure_participant(ctx)?;
        let record = self.book.get(market_id)?;
        let check = match eligible_check(&record.market, &ctx.block) {
            Some(check) => check,
            None => return Ok(PingOutcome::default()),
        };

        let outcome = if check.would_close {
            let reward = self.close_commit_phase(ctx, market_id, &check, CloseTrigger::Ping)?;
            PingOutcome { eligible: true, closed: true, reward }
        } else {
            if let Some(rc) = self.book.get_mut(market_id)?.market.random_close.as_mut() {
                rc.apply(&check, ctx.now());
            }
            PingOutcome { eligible: true, closed: false, reward: 0 }
        };

        debug!("Market {}: pinged by {} (closed: {})", market_id, ctx.sender.short(), outcome.closed);
        self.emit(&ctx.block, MarketEventData::MarketPinged {
            market_id,
            pinger: ctx.sender,
            closed: outcome.closed,
            reward: outcome.reward,
        });

        Ok(outcome)
    }

    /// Latch the close and settle the escrowed bounty: paid to a pinger,
    /// burned on a commit-triggered close. Returns the amount paid.
    fn close_commit_phase(
        &mut self,
        ctx: &CallContext,
        market_id: MarketId,
        check: &CloseCheck,
        trigger: CloseTrigger,
    ) -> MarketResult<Amount> {
        let bounty = self.book.get(market_id)?.market.ping_bounty;
        let paid = match trigger {
            CloseTrigger::Ping => {
                if bounty > 0 {
                    self.ledger.transfer(&ctx.sender, bounty)?;
                }
                bounty
            }
            CloseTrigger::Commit => {
                if bounty > 0 {
                    self.ledger.burn(bounty)?;
                }
                0
            }
        };

        let market = &mut self.book.get_mut(market_id)?.market;
        market.ping_bounty = 0;
        if let Some(rc) = market.random_close.as_mut() {
            rc.apply(check, ctx.now());
        }

        info!("Market {}: commit phase closed at {} by {:?}", market_id, ctx.now(), trigger);
        self.emit(&ctx.block, MarketEventData::CommitPhaseClosed {
            market_id,
            closed_at: ctx.now(),
            trigger,
            triggered_by: ctx.sender,
        });

        Ok(paid)
    }

    // ===== VIEWS =====

    /// Number of markets created.
    pub fn market_count(&self) -> u64 {
        self.book.next_id()
    }

    /// Market state.
    pub fn market(&self, market_id: MarketId) -> MarketResult<MarketView> {
        Ok(MarketView::from(&self.book.get(market_id)?.market))
    }

    /// Phase at `now`.
    pub fn phase(&self, market_id: MarketId, now: u64) -> MarketResult<Phase> {
        Ok(phase::phase_at(&self.book.get(market_id)?.market, now))
    }

    /// Revealed stake of `participant` on `choice`.
    pub fn bets(&self, market_id: MarketId, participant: &Address, choice: Choice) -> MarketResult<Amount> {
        Ok(self
            .book
            .get(market_id)?
            .positions
            .get(participant)
            .map(|p| p.stake(choice))
            .unwrap_or(0))
    }

    /// Unrevealed stake of `participant`.
    pub fn committed_amount(&self, market_id: MarketId, participant: &Address) -> MarketResult<Amount> {
        Ok(self
            .book
            .get(market_id)?
            .commitments
            .get(participant)
            .map(|c| c.amount)
            .unwrap_or(0))
    }

    /// Whether `participant` holds a commitment or a revealed position.
    pub fn has_committed(&self, market_id: MarketId, participant: &Address) -> MarketResult<bool> {
        let record = self.book.get(market_id)?;
        Ok(record.commitments.contains_key(participant) || record.positions.contains_key(participant))
    }

    /// Revealed position of `participant`, if any.
    pub fn position(&self, market_id: MarketId, participant: &Address) -> MarketResult<Option<Position>> {
        Ok(self.book.get(market_id)?.positions.get(participant).copied())
    }

    /// What a close check in `block` would do. Independent of the caller.
    pub fn preview_close_check(&self, market_id: MarketId, block: &BlockContext) -> MarketResult<ClosePreview> {
        let record = self.book.get(market_id)?;
        Ok(match &record.market.random_close {
            Some(rc) => {
                let eligible = rc.is_eligible(block.timestamp);
                let check = rc.evaluate(market_id, block);
                ClosePreview {
                    candidate_hash: check.candidate_hash,
                    would_close: eligible && check.would_close,
                    eligible,
                }
            }
            None => ClosePreview {
                candidate_hash: [0; 32],
                would_close: false,
                eligible: false,
            },
        })
    }

    /// Random-close configuration and state.
    pub fn random_close_status(&self, market_id: MarketId) -> MarketResult<RandomCloseStatus> {
        let record = self.book.get(market_id)?;
        Ok(match &record.market.random_close {
            Some(rc) => RandomCloseStatus {
                enabled: true,
                min_duration: rc.min_duration,
                avg_duration: rc.avg_duration,
                difficulty_target: rc.difficulty_target,
                accumulator: rc.accumulator,
                closed_at: rc.closed_at.unwrap_or(0),
                eligible_from: rc.eligible_from,
            },
            None => RandomCloseStatus {
                enabled: false,
                min_duration: 0,
                avg_duration: 0,
                difficulty_target: 0,
                accumulator: [0; 32],
                closed_at: 0,
                eligible_from: 0,
            },
        })
    }

    /// Tokens custody must still hold for all markets: pending stakes,
    /// unsettled pools, unclaimed rewards and escrowed bounties.
    pub fn outstanding_liabilities(&self) -> Amount {
        self.book.iter().fold(0, |acc: Amount, record| {
            let market = &record.market;
            let pool = if market.is_resolved() {
                market.reward_pool.saturating_sub(market.claimed_reward_paid)
            } else {
                market.pools.total().unwrap_or(Amount::MAX)
            };
            acc.saturating_add(pool)
                .saturating_add(record.pending_stake())
                .saturating_add(market.ping_bounty)
        })
    }

    // ===== VALIDATION =====

    fn validate_content(&self, content_ref: &str) -> MarketResult<()> {
        if content_ref.is_empty() {
            return Err(MarketError::ContentEmpty);
        }
        if content_ref.len() > self.config.max_content_length {
            return Err(MarketError::ContentTooLong {
                len: content_ref.len(),
                max: self.config.max_content_length,
            });
        }
        Ok(())
    }

    fn validate_commit_duration(&self, duration: u64) -> MarketResult<()> {
        if duration < self.config.min_commit_duration {
            return Err(MarketError::CommitDurationTooShort {
                duration,
                min: self.config.min_commit_duration,
            });
        }
        if duration > self.config.max_duration {
            return Err(MarketError::CommitDurationTooLong {
                duration,
                max: self.config.max_duration,
            });
        }
        Ok(())
    }

    fn validate_reveal_duration(&self, duration: u64) -> MarketResult<()> {
        if duration < self.config.min_reveal_duration {
            return Err(MarketError::RevealDurationTooShort {
                duration,
                min: self.config.min_reveal_duration,
            });
        }
        if duration > self.config.max_duration {
            return Err(MarketError::RevealDurationTooLong {
                duration,
                max: self.config.max_duration,
            });
        }
        Ok(())
    }

    /// Pull the statement fee and burn all of it except `escrow`.
    fn collect_statement_fee(&mut self, payer: &Address, escrow: Amount) -> MarketResult<()> {
        let fee = self.config.statement_fee;
        if fee == 0 {
            return Ok(());
        }
        self.ledger.transfer_from(payer, fee)?;
        let burned = fee.saturating_sub(escrow);
        if burned > 0 {
            self.ledger.burn(burned)?;
        }
        Ok(())
    }
}

/// The close check a call in `block` would run, if one is due.
fn eligible_check(market: &Market, block: &BlockContext) -> Option<CloseCheck> {
    market
        .random_close
        .as_ref()
        .filter(|rc| rc.is_eligible(block.timestamp))
        .map(|rc| rc.evaluate(market.id, block))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tokens;
    use crate::ledger::{InMemoryLedger, LedgerError};
    use crate::market::commitment::commit_choice;
    use crate::market::config::STATEMENT_FEE;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    const CUSTODY: Address = Address::new([0xCC; 20]);
    const ORIGINATOR: Address = Address::new([0x01; 20]);
    const ALICE: Address = Address::new([0xA1; 20]);
    const BOB: Address = Address::new([0xB0; 20]);
    const CAROL: Address = Address::new([0xC0; 20]);
    const BROKE: Address = Address::new([0xEE; 20]);

    const T0: u64 = 1_700_000_000;
    const COMMIT: u64 = 60;
    const REVEAL: u64 = 3_600;

    fn engine_with(config: MarketConfig) -> HelixMarket<InMemoryLedger> {
        let mut ledger = InMemoryLedger::new(CUSTODY);
        for who in [ORIGINATOR, ALICE, BOB, CAROL] {
            ledger.mint(&who, tokens(10_000)).unwrap();
            ledger.approve(&who, u64::MAX);
        }
        HelixMarket::new(config, ledger).unwrap()
    }

    fn engine() -> HelixMarket<InMemoryLedger> {
        engine_with(MarketConfig::default())
    }

    fn at(sender: Address, timestamp: u64) -> CallContext {
        CallContext::new(sender, BlockContext::at(timestamp - T0 + 1, timestamp))
    }

    fn salt_for(who: &Address) -> Salt {
        let mut salt = [0x5A; 32];
        salt[..20].copy_from_slice(who.as_bytes());
        salt
    }

    fn open_market(engine: &mut HelixMarket<InMemoryLedger>) -> MarketId {
        engine
            .submit_statement(&at(ORIGINATOR, T0), "ipfs://statement", COMMIT, REVEAL)
            .unwrap()
    }

    fn commit(engine: &mut HelixMarket<InMemoryLedger>, id: MarketId, who: Address, choice: Choice, amount: Amount) {
        let hash = commit_choice(choice, &salt_for(&who), &who);
        let outcome = engine.commit_bet(&at(who, T0 + 10), id, hash, amount).unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
    }

    fn reveal(engine: &mut HelixMarket<InMemoryLedger>, id: MarketId, who: Address, choice: Choice) {
        engine
            .reveal_bet(&at(who, T0 + COMMIT), id, choice.as_u8(), &salt_for(&who))
            .unwrap();
    }

    fn settle_time() -> u64 {
        T0 + COMMIT + REVEAL
    }

    /// Commit and reveal every bet, then resolve.
    fn run_market(bets: &[(Address, Choice, Amount)]) -> (HelixMarket<InMemoryLedger>, MarketId) {
        let mut engine = engine();
        let id = open_market(&mut engine);
        for (who, choice, amount) in bets {
            commit(&mut engine, id, *who, *choice, *amount);
        }
        for (who, choice, _) in bets {
            reveal(&mut engine, id, *who, *choice);
        }
        engine.resolve(&at(CAROL, settle_time()), id).unwrap();
        (engine, id)
    }

    // ===== SCENARIOS =====

    #[test]
    fn test_yes_majority_single_winner() {
        let before = engine().ledger().balance_of(&ORIGINATOR) - STATEMENT_FEE;
        let (mut engine, id) = run_market(&[(ALICE, Choice::Yes, 200), (BOB, Choice::No, 100)]);

        let view = engine.market(id).unwrap();
        assert!(view.resolved && view.outcome && !view.tie);
        assert_eq!(view.originator_fee, 3);
        assert_eq!(engine.ledger().balance_of(&ORIGINATOR), before + 3);

        let alice_before = engine.ledger().balance_of(&ALICE);
        assert_eq!(engine.claim(&at(ALICE, settle_time()), id), Ok(297));
        assert_eq!(engine.ledger().balance_of(&ALICE), alice_before + 297);

        assert_eq!(engine.claim(&at(BOB, settle_time()), id), Err(MarketError::NoWinningBet));
        assert_eq!(engine.claim(&at(ALICE, settle_time()), id), Err(MarketError::NoWinningBet));
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
    }

    #[test]
    fn test_unaligned_swept_by_winner() {
        let (mut engine, id) = run_market(&[
            (ALICE, Choice::Yes, 101),
            (BOB, Choice::No, 100),
            (CAROL, Choice::Unaligned, 50),
        ]);

        assert_eq!(engine.market(id).unwrap().originator_fee, 2);
        assert_eq!(engine.claim(&at(ALICE, settle_time()), id), Ok(249));
        assert_eq!(engine.claim(&at(CAROL, settle_time()), id), Err(MarketError::NoWinningBet));
    }

    #[test]
    fn test_tie_refunds_everyone() {
        let originator_before = engine().ledger().balance_of(&ORIGINATOR) - STATEMENT_FEE;
        let (mut engine, id) = run_market(&[
            (ALICE, Choice::Yes, 150),
            (BOB, Choice::No, 150),
            (CAROL, Choice::Unaligned, 40),
        ]);

        let view = engine.market(id).unwrap();
        assert!(view.tie);
        assert_eq!(view.originator_fee, 0);
        assert_eq!(engine.ledger().balance_of(&ORIGINATOR), originator_before);

        let t = settle_time();
        assert_eq!(engine.claim(&at(ALICE, t), id), Ok(150));
        assert_eq!(engine.claim(&at(BOB, t), id), Ok(150));
        assert_eq!(engine.claim(&at(CAROL, t), id), Ok(40));
        assert_eq!(engine.claim(&at(CAROL, t), id), Err(MarketError::NoWinningBet));
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
    }

    #[test]
    fn test_empty_market_resolves_as_tie() {
        let (mut engine, id) = run_market(&[]);
        assert!(engine.market(id).unwrap().tie);
        assert_eq!(engine.claim(&at(ALICE, settle_time()), id), Err(MarketError::NoWinningBet));
    }

    #[test]
    fn test_unrevealed_stake_is_burned() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        commit(&mut engine, id, ALICE, Choice::Yes, 100);

        let supply = engine.ledger().total_supply();
        let t = settle_time();

        assert_eq!(
            engine.withdraw_unrevealed(&at(ALICE, t - 1), id),
            Err(MarketError::RevealPhaseNotOver)
        );

        let forfeiture = engine.withdraw_unrevealed(&at(ALICE, t), id).unwrap();
        assert_eq!(forfeiture, Forfeiture { burned: 100, returned: 0 });
        assert_eq!(engine.ledger().total_supply(), supply - 100);
        assert_eq!(engine.committed_amount(id, &ALICE), Ok(0));

        assert_eq!(
            engine.withdraw_unrevealed(&at(ALICE, t), id),
            Err(MarketError::NoUnrevealedStake)
        );
    }

    #[test]
    fn test_partial_burn_policy() {
        let mut engine = engine_with(MarketConfig { unrevealed_burn_bps: 2_500, ..Default::default() });
        let id = open_market(&mut engine);
        commit(&mut engine, id, ALICE, Choice::No, 1_001);

        let balance = engine.ledger().balance_of(&ALICE);
        let forfeiture = engine.withdraw_unrevealed(&at(ALICE, settle_time()), id).unwrap();

        assert_eq!(forfeiture, Forfeiture { burned: 250, returned: 751 });
        assert_eq!(engine.ledger().balance_of(&ALICE), balance + 751);
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
    }

    #[test]
    fn test_revealed_stake_cannot_be_withdrawn() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        commit(&mut engine, id, ALICE, Choice::Yes, 100);
        reveal(&mut engine, id, ALICE, Choice::Yes);

        assert_eq!(
            engine.withdraw_unrevealed(&at(ALICE, settle_time()), id),
            Err(MarketError::NoUnrevealedStake)
        );
    }

    // ===== SUBMISSION =====

    #[test]
    fn test_statement_fee_is_burned() {
        let mut engine = engine();
        let supply = engine.ledger().total_supply();
        open_market(&mut engine);

        assert_eq!(engine.ledger().total_supply(), supply - STATEMENT_FEE);
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
        assert_eq!(engine.market_count(), 1);
    }

    #[test]
    fn test_content_bounds() {
        let mut engine = engine();
        let ctx = at(ORIGINATOR, T0);

        assert_eq!(engine.submit_statement(&ctx, "", COMMIT, REVEAL), Err(MarketError::ContentEmpty));
        assert_eq!(
            engine.submit_statement(&ctx, &"x".repeat(129), COMMIT, REVEAL),
            Err(MarketError::ContentTooLong { len: 129, max: 128 })
        );
        assert!(engine.submit_statement(&ctx, &"x".repeat(128), COMMIT, REVEAL).is_ok());
    }

    #[test]
    fn test_duration_bounds() {
        let mut engine = engine();
        let ctx = at(ORIGINATOR, T0);
        let max = engine.config().max_duration;

        assert!(matches!(
            engine.submit_statement(&ctx, "cid", 59, REVEAL),
            Err(MarketError::CommitDurationTooShort { .. })
        ));
        assert!(matches!(
            engine.submit_statement(&ctx, "cid", max + 1, REVEAL),
            Err(MarketError::CommitDurationTooLong { .. })
        ));
        assert!(matches!(
            engine.submit_statement(&ctx, "cid", COMMIT, 3_599),
            Err(MarketError::RevealDurationTooShort { .. })
        ));
        assert!(matches!(
            engine.submit_statement(&ctx, "cid", COMMIT, max + 1),
            Err(MarketError::RevealDurationTooLong { .. })
        ));
        assert!(engine.submit_statement(&ctx, "cid", max, max).is_ok());
        assert_eq!(engine.market_count(), 1);
    }

    #[test]
    fn test_submission_without_allowance_leaves_no_trace() {
        let mut engine = engine();
        let result = engine.submit_statement(&at(BROKE, T0), "cid", COMMIT, REVEAL);

        assert!(matches!(result, Err(MarketError::Ledger(LedgerError::InsufficientAllowance { .. }))));
        assert_eq!(engine.market_count(), 0);
        assert!(engine.drain_events().is_empty());
    }

    // ===== COMMIT / REVEAL =====

    #[test]
    fn test_commit_rules() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        let hash = commit_choice(Choice::Yes, &salt_for(&ALICE), &ALICE);

        assert_eq!(
            engine.commit_bet(&at(ALICE, T0), 9, hash, 10),
            Err(MarketError::InvalidMarket(9))
        );
        assert_eq!(engine.commit_bet(&at(ALICE, T0), id, hash, 0), Err(MarketError::ZeroAmount));
        assert_eq!(engine.commit_bet(&at(ALICE, T0), id, hash, 10), Ok(CommitOutcome::Committed));
        assert_eq!(engine.commit_bet(&at(ALICE, T0), id, hash, 10), Err(MarketError::AlreadyCommitted));
        assert_eq!(
            engine.commit_bet(&at(BOB, T0 + COMMIT), id, hash, 10),
            Err(MarketError::CommitPhaseOver)
        );

        // Pools untouched until reveal
        let view = engine.market(id).unwrap();
        assert_eq!((view.yes_pool, view.no_pool, view.unaligned_pool), (0, 0, 0));
        assert_eq!(engine.committed_amount(id, &ALICE), Ok(10));
        assert_eq!(engine.has_committed(id, &ALICE), Ok(true));
        assert_eq!(engine.has_committed(id, &BOB), Ok(false));
    }

    #[test]
    fn test_commit_failure_leaves_no_trace() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        engine.drain_events();

        let result = engine.commit_bet(&at(BROKE, T0 + 1), id, [1; 32], 10);
        assert!(matches!(result, Err(MarketError::Ledger(_))));
        assert_eq!(engine.has_committed(id, &BROKE), Ok(false));
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn test_reveal_binding() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        commit(&mut engine, id, ALICE, Choice::Yes, 100);

        let salt = salt_for(&ALICE);
        assert_eq!(
            engine.reveal_bet(&at(ALICE, T0 + COMMIT - 1), id, 1, &salt),
            Err(MarketError::CommitPhaseActive)
        );

        let t = T0 + COMMIT;
        assert_eq!(engine.reveal_bet(&at(ALICE, t), id, 0, &salt), Err(MarketError::InvalidReveal));
        assert_eq!(engine.reveal_bet(&at(ALICE, t), id, 1, &[0; 32]), Err(MarketError::InvalidReveal));
        assert_eq!(engine.reveal_bet(&at(BOB, t), id, 1, &salt), Err(MarketError::NoCommitment));

        assert_eq!(engine.reveal_bet(&at(ALICE, t), id, 1, &salt), Ok(Choice::Yes));
        assert_eq!(engine.bets(id, &ALICE, Choice::Yes), Ok(100));
        assert_eq!(engine.market(id).unwrap().yes_pool, 100);

        // Consumed
        assert_eq!(engine.reveal_bet(&at(ALICE, t), id, 1, &salt), Err(MarketError::NoCommitment));
        assert_eq!(engine.has_committed(id, &ALICE), Ok(true));
    }

    #[test]
    fn test_reveal_out_of_range_choice() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        let salt = salt_for(&ALICE);
        let hash = crate::market::commitment::commitment_hash(3, &salt, &ALICE);
        engine.commit_bet(&at(ALICE, T0 + 1), id, hash, 100).unwrap();

        assert_eq!(
            engine.reveal_bet(&at(ALICE, T0 + COMMIT), id, 3, &salt),
            Err(MarketError::InvalidChoice(3))
        );
        // Stake stays forfeitable
        assert_eq!(engine.committed_amount(id, &ALICE), Ok(100));
    }

    #[test]
    fn test_reveal_window_closes() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        commit(&mut engine, id, ALICE, Choice::No, 100);

        assert_eq!(
            engine.reveal_bet(&at(ALICE, settle_time()), id, 0, &salt_for(&ALICE)),
            Err(MarketError::RevealPhaseOver)
        );
    }

    // ===== RESOLUTION =====

    #[test]
    fn test_resolve_gates() {
        let mut engine = engine();
        let id = open_market(&mut engine);

        assert_eq!(engine.claim(&at(ALICE, T0), id), Err(MarketError::NotResolved));
        assert_eq!(
            engine.resolve(&at(ALICE, settle_time() - 1), id),
            Err(MarketError::RevealPhaseNotOver)
        );
        assert!(engine.resolve(&at(ALICE, settle_time()), id).is_ok());
        assert_eq!(
            engine.resolve(&at(ALICE, settle_time() + 5), id),
            Err(MarketError::AlreadyResolved)
        );
        assert_eq!(engine.phase(id, settle_time()), Ok(Phase::Resolved));
    }

    #[test]
    fn test_last_claimant_receives_remainder() {
        let (mut engine, id) = run_market(&[
            (ALICE, Choice::Yes, 1),
            (BOB, Choice::Yes, 1),
            (CAROL, Choice::No, 1),
        ]);
        // total 3, fee 0, reward 3 shared by 2 winners
        let t = settle_time();
        let a = engine.claim(&at(ALICE, t), id).unwrap();
        let b = engine.claim(&at(BOB, t), id).unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
    }

    #[test]
    fn test_winners_paid_in_proportion_to_stake() {
        let (mut engine, id) = run_market(&[
            (ALICE, Choice::Yes, 300),
            (BOB, Choice::Yes, 100),
            (CAROL, Choice::No, 600),
        ]);
        // total 1000, fee 10, reward 990 over a winning pool of 400
        let t = settle_time();
        let a = engine.claim(&at(ALICE, t), id).unwrap();
        let b = engine.claim(&at(BOB, t), id).unwrap();

        assert_eq!((a, b), (742, 248));
        assert!((a * 100).abs_diff(b * 300) <= 300);
        assert_eq!(engine.claim(&at(CAROL, t), id), Err(MarketError::NoWinningBet));
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
    }

    #[test]
    fn test_custody_cannot_participate() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        commit(&mut engine, id, ALICE, Choice::No, 100);
        engine.ledger_mut().approve(&CUSTODY, u64::MAX);
        engine.drain_events();

        // Custody holds Alice's 100, enough to back a stake of its own
        let hash = commit_choice(Choice::Yes, &salt_for(&CUSTODY), &CUSTODY);
        assert_eq!(
            engine.commit_bet(&at(CUSTODY, T0 + 10), id, hash, 100),
            Err(MarketError::CustodyCaller)
        );
        assert_eq!(engine.has_committed(id, &CUSTODY), Ok(false));
        assert!(engine.drain_events().is_empty());
        assert_eq!(engine.ledger().balance_of(&CUSTODY), engine.outstanding_liabilities());

        assert_eq!(
            engine.submit_statement(&at(CUSTODY, T0), "ipfs://statement", COMMIT, REVEAL),
            Err(MarketError::CustodyCaller)
        );
        assert_eq!(engine.ping_market(&at(CUSTODY, T0 + 10), id), Err(MarketError::CustodyCaller));

        reveal(&mut engine, id, ALICE, Choice::No);
        let t = settle_time();
        assert_eq!(engine.resolve(&at(CUSTODY, t), id), Err(MarketError::CustodyCaller));
        assert_eq!(engine.resolve(&at(CAROL, t), id).unwrap().outcome, Outcome::No);
        assert_eq!(engine.claim(&at(CUSTODY, t), id), Err(MarketError::CustodyCaller));
        assert_eq!(engine.withdraw_unrevealed(&at(CUSTODY, t), id), Err(MarketError::CustodyCaller));
        assert_eq!(engine.ledger().balance_of(&CUSTODY), engine.outstanding_liabilities());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MarketConfig { originator_fee_bps: 10_001, ..Default::default() };
        let ledger = InMemoryLedger::new(CUSTODY);
        assert!(matches!(
            HelixMarket::new(config, ledger),
            Err(MarketError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_events_follow_lifecycle() {
        let (mut engine, id) = run_market(&[(ALICE, Choice::Yes, 10)]);
        engine.claim(&at(ALICE, settle_time()), id).unwrap();

        let kinds: Vec<&'static str> = engine
            .drain_events()
            .iter()
            .map(|e| match e.data {
                MarketEventData::StatementCreated { .. } => "created",
                MarketEventData::BetCommitted { .. } => "committed",
                MarketEventData::BetRevealed { .. } => "revealed",
                MarketEventData::MarketResolved { .. } => "resolved",
                MarketEventData::RewardClaimed { .. } => "claimed",
                _ => "other",
            })
            .collect();

        assert_eq!(kinds, vec!["created", "committed", "revealed", "resolved", "claimed"]);
        assert!(engine.drain_events().is_empty());
    }

    // ===== RANDOM CLOSE =====

    fn open_random(engine: &mut HelixMarket<InMemoryLedger>, min: u64, avg: u64) -> MarketId {
        engine
            .submit_statement_with_random_close(&at(ORIGINATOR, T0), "ipfs://random", min, REVEAL, true, avg)
            .unwrap()
    }

    #[test]
    fn test_random_close_validation() {
        let mut engine = engine();
        let ctx = at(ORIGINATOR, T0);

        assert_eq!(
            engine.submit_statement_with_random_close(&ctx, "cid", 3_600, REVEAL, true, 3_599),
            Err(MarketError::InvalidAverageDuration { avg: 3_599, min: 3_600 })
        );
        assert!(matches!(
            engine.submit_statement_with_random_close(&ctx, "cid", 3_600, REVEAL, true, u64::MAX),
            Err(MarketError::CommitDurationTooLong { .. })
        ));
    }

    #[test]
    fn test_random_close_disabled_is_fixed() {
        let mut engine = engine();
        let id = engine
            .submit_statement_with_random_close(&at(ORIGINATOR, T0), "cid", 120, REVEAL, false, 0)
            .unwrap();

        let view = engine.market(id).unwrap();
        assert!(!view.random_close);
        assert_eq!(view.commit_end, Some(T0 + 120));
        assert!(!engine.random_close_status(id).unwrap().enabled);
    }

    #[test]
    fn test_commit_can_trigger_close() {
        let mut engine = engine();
        let id = open_random(&mut engine, 3_600, 3_600);
        let supply = engine.ledger().total_supply();
        let t = T0 + 3_601;

        // Before the minimum: ordinary commit
        commit(&mut engine, id, ALICE, Choice::Yes, 50);

        let hash = commit_choice(Choice::Yes, &salt_for(&BOB), &BOB);
        let bob_balance = engine.ledger().balance_of(&BOB);
        assert_eq!(engine.commit_bet(&at(BOB, t), id, hash, 10), Ok(CommitOutcome::PhaseClosed));

        assert_eq!(engine.ledger().balance_of(&BOB), bob_balance);
        assert_eq!(engine.has_committed(id, &BOB), Ok(false));
        assert_eq!(engine.committed_amount(id, &BOB), Ok(0));
        assert_eq!(engine.random_close_status(id).unwrap().closed_at, t);
        // Bounty burned on a commit-triggered close
        assert_eq!(engine.ledger().total_supply(), supply - tokens(1));
        assert_eq!(engine.market(id).unwrap().ping_bounty, 0);

        assert_eq!(engine.commit_bet(&at(BOB, t + 1), id, hash, 10), Err(MarketError::CommitPhaseClosed));

        // Reveal window now counts from the close
        reveal_at(&mut engine, id, ALICE, Choice::Yes, t);
        assert_eq!(engine.resolve(&at(CAROL, t + REVEAL - 1), id), Err(MarketError::RevealPhaseNotOver));
        assert!(engine.resolve(&at(CAROL, t + REVEAL), id).is_ok());
    }

    fn reveal_at(engine: &mut HelixMarket<InMemoryLedger>, id: MarketId, who: Address, choice: Choice, t: u64) {
        engine.reveal_bet(&at(who, t), id, choice.as_u8(), &salt_for(&who)).unwrap();
    }

    #[test]
    fn test_ping_pays_bounty_on_close() {
        let mut engine = engine();
        let id = open_random(&mut engine, 600, 600);

        // Too early
        let early = engine.ping_market(&at(CAROL, T0 + 599), id).unwrap();
        assert_eq!(early, PingOutcome::default());

        let balance = engine.ledger().balance_of(&CAROL);
        let ping = engine.ping_market(&at(CAROL, T0 + 600), id).unwrap();
        assert_eq!(ping, PingOutcome { eligible: true, closed: true, reward: tokens(1) });
        assert_eq!(engine.ledger().balance_of(&CAROL), balance + tokens(1));

        // Closed: further pings are no-ops
        assert_eq!(engine.ping_market(&at(CAROL, T0 + 700), id).unwrap(), PingOutcome::default());
        assert_eq!(engine.phase(id, T0 + 700), Ok(Phase::Reveal));
    }

    #[test]
    fn test_ping_on_fixed_market_is_noop() {
        let mut engine = engine();
        let id = open_market(&mut engine);
        engine.drain_events();

        assert_eq!(engine.ping_market(&at(ALICE, T0 + 30), id), Ok(PingOutcome::default()));
        assert!(engine.drain_events().is_empty());
        assert_eq!(engine.ping_market(&at(ALICE, T0), 5), Err(MarketError::InvalidMarket(5)));
    }

    #[test]
    fn test_resolve_before_close_is_reveal_not_started() {
        let mut engine = engine();
        let id = open_random(&mut engine, 60, 60 * 500_000);

        let far = T0 + 10 * REVEAL;
        assert_eq!(engine.resolve(&at(ALICE, far), id), Err(MarketError::RevealNotStarted));
        assert_eq!(engine.withdraw_unrevealed(&at(ALICE, far), id), Err(MarketError::RevealNotStarted));
    }

    #[test]
    fn test_failed_commit_keeps_accumulator() {
        let mut engine = engine();
        let id = open_random(&mut engine, 60, 60 * 500_000);
        let before = engine.random_close_status(id).unwrap().accumulator;

        // First eligible block whose check does not close the market
        let ctx = (120u64..)
            .map(|dt| at(BROKE, T0 + dt))
            .find(|ctx| !engine.preview_close_check(id, &ctx.block).unwrap().would_close)
            .unwrap();
        let preview = engine.preview_close_check(id, &ctx.block).unwrap();
        assert!(preview.eligible);
        assert!(!preview.would_close);

        assert!(engine.commit_bet(&ctx, id, [1; 32], 10).is_err());
        assert_eq!(engine.random_close_status(id).unwrap().accumulator, before);

        // A successful commit advances it to the previewed hash
        let ctx = at(ALICE, ctx.now());
        engine.commit_bet(&ctx, id, [1; 32], 10).unwrap();
        assert_eq!(engine.random_close_status(id).unwrap().accumulator, preview.candidate_hash);
    }

    #[test]
    fn test_custody_matches_liabilities_randomized() {
        let mut rng = StdRng::seed_from_u64(0x4E11);
        let mut engine = engine();
        let people = [ALICE, BOB, CAROL, ORIGINATOR];
        let mut markets = Vec::new();

        for _ in 0..8 {
            let id = open_market(&mut engine);
            let mut bets = Vec::new();
            for who in people {
                if rng.gen_bool(0.8) {
                    let choice = Choice::ALL[rng.gen_range(0..3)];
                    let amount = rng.gen_range(1..tokens(50));
                    commit(&mut engine, id, who, choice, amount);
                    bets.push((who, choice, rng.gen_bool(0.75)));
                }
            }
            markets.push((id, bets));
            assert_eq!(engine.ledger().balance_of(&CUSTODY), engine.outstanding_liabilities());
        }

        for (id, bets) in &markets {
            for (who, choice, reveals) in bets {
                if *reveals {
                    reveal(&mut engine, *id, *who, *choice);
                }
            }
        }
        assert_eq!(engine.ledger().balance_of(&CUSTODY), engine.outstanding_liabilities());

        let t = settle_time();
        for (id, bets) in &markets {
            engine.resolve(&at(CAROL, t), *id).unwrap();
            for (who, _, reveals) in bets {
                if *reveals {
                    let _ = engine.claim(&at(*who, t), *id);
                } else {
                    engine.withdraw_unrevealed(&at(*who, t), *id).unwrap();
                }
            }
            assert_eq!(engine.ledger().balance_of(&CUSTODY), engine.outstanding_liabilities());
        }

        assert_eq!(engine.outstanding_liabilities(), 0);
        assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
    }

    proptest! {
        #[test]
        fn prop_close_check_ignores_caller(
            offset in 0u64..100_000,
            number in 1u64..1_000_000,
            randao in any::<[u8; 32]>(),
        ) {
            let mut a = engine();
            let id = open_random(&mut a, 60, 60 * 30);
            let mut b = HelixMarket::from_parts(a.config().clone(), a.book().clone(), a.ledger().clone()).unwrap();

            let block = BlockContext::new(number, T0 + 60 + offset, randao);
            let ping_a = a.ping_market(&CallContext::new(ALICE, block), id).unwrap();
            let ping_b = b.ping_market(&CallContext::new(BOB, block), id).unwrap();

            prop_assert_eq!(ping_a.closed, ping_b.closed);
            prop_assert_eq!(
                a.random_close_status(id).unwrap(),
                b.random_close_status(id).unwrap()
            );
        }

        #[test]
        fn prop_settlement_conserves_pool(
            stakes in prop::collection::vec((0u8..3, 1u64..1_000_000_000_000), 1..4),
        ) {
            let people = [ALICE, BOB, CAROL];
            let bets: Vec<(Address, Choice, Amount)> = stakes
                .iter()
                .enumerate()
                .map(|(i, (tag, amount))| (people[i], Choice::ALL[*tag as usize], *amount))
                .collect();
            let (mut engine, id) = run_market(&bets);

            let mut paid = 0;
            for (who, _, _) in &bets {
                if let Ok(amount) = engine.claim(&at(*who, settle_time()), id) {
                    paid += amount;
                }
            }
            let view = engine.market(id).unwrap();
            let total = view.yes_pool + view.no_pool + view.unaligned_pool;

            prop_assert_eq!(paid + view.originator_fee, total);
            prop_assert_eq!(engine.ledger().balance_of(&CUSTODY), 0);
        }
    }
}
