//! Helix Market Node
//!
//! `helix-market-node serve` runs the WebSocket node.
//! `helix-market-node demo` runs a scripted market against the in-memory ledger.

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use helix_market::{
    VERSION,
    core::{amount::format_tokens, tokens, Address, BlockProducer},
    ledger::{InMemoryLedger, TokenLedger},
    market::{commit_choice, generate_salt, CallContext, Choice, HelixMarket, MarketConfig},
    network::{AuthConfig, NodeConfig, NodeServer, Sequencer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Helix Market Node v{}", VERSION);

    let command = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    match command.as_str() {
        "serve" => serve().await,
        "demo" => demo(),
        other => bail!("unknown command '{}' (expected 'serve' or 'demo')", other),
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = NodeConfig::from_env();
    let auth = AuthConfig::from_env();

    let sequencer = Sequencer::restore(config.sequencer_config())
        .context("Failed to restore snapshot")?;
    let (handle, sequencer_task) = sequencer.spawn();

    let server = NodeServer::new(config, auth, handle.clone());
    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
        }
    }

    server.shutdown();
    handle.shutdown().await.context("Failed to persist state")?;
    sequencer_task.await?;

    Ok(())
}

/// Scripted lifecycle: one fixed market settled end to end, then a
/// random-close market pinged until it closes.
fn demo() -> anyhow::Result<()> {
    info!("=== Starting Demo Market ===");

    let custody = Address::from_subject("demo-custody");
    let originator = Address::from_subject("originator");
    let alice = Address::from_subject("alice");
    let bob = Address::from_subject("bob");
    let carol = Address::from_subject("carol");
    let dave = Address::from_subject("dave");

    let mut ledger = InMemoryLedger::new(custody);
    for who in [originator, alice, bob, carol, dave] {
        ledger.mint(&who, tokens(1_000))?;
        ledger.approve(&who, tokens(1_000));
    }

    let mut engine = HelixMarket::new(MarketConfig::default(), ledger)?;
    let start = chrono::Utc::now().timestamp().max(0) as u64;
    let mut chain = BlockProducer::new([7; 32], start);
    let at = |sender: Address, chain: &BlockProducer| CallContext::new(sender, *chain.current());

    let market_id = engine.submit_statement(&at(originator, &chain), "ipfs://demo-statement", 60, 3600)?;
    info!("Market {} opened by {}", market_id, originator.short());

    // Dave commits but never reveals
    let bets = [
        (alice, Choice::Yes, tokens(100)),
        (bob, Choice::Yes, tokens(200)),
        (carol, Choice::No, tokens(150)),
        (dave, Choice::No, tokens(80)),
    ];
    let mut salts = Vec::with_capacity(bets.len());
    for (who, choice, amount) in bets {
        let salt = generate_salt();
        engine.commit_bet(&at(who, &chain), market_id, commit_choice(choice, &salt, &who), amount)?;
        info!("{} committed {}", who.short(), format_tokens(amount));
        salts.push(salt);
    }

    chain.advance(start + 60);
    for ((who, choice, _), salt) in bets.iter().zip(&salts).take(3) {
        engine.reveal_bet(&at(*who, &chain), market_id, choice.as_u8(), salt)?;
        info!("{} revealed {}", who.short(), choice);
    }

    chain.advance(start + 60 + 3600);
    let settlement = engine.resolve(&at(carol, &chain), market_id)?;
    info!(
        "Outcome {} | originator fee {} | reward pool {}",
        settlement.outcome,
        format_tokens(settlement.originator_fee),
        format_tokens(settlement.reward_pool)
    );

    for who in [alice, bob, carol] {
        match engine.claim(&at(who, &chain), market_id) {
            Ok(amount) => info!("{} claimed {}", who.short(), format_tokens(amount)),
            Err(e) => info!("{} cannot claim: {}", who.short(), e),
        }
    }

    let forfeiture = engine.withdraw_unrevealed(&at(dave, &chain), market_id)?;
    info!(
        "{} forfeited: {} burned, {} returned",
        dave.short(),
        format_tokens(forfeiture.burned),
        format_tokens(forfeiture.returned)
    );

    info!("=== Random Close ===");
    let random_id = engine.submit_statement_with_random_close(
        &at(originator, &chain),
        "ipfs://demo-random",
        60,
        3600,
        true,
        600,
    )?;
    let status = engine.random_close_status(random_id)?;
    info!("Market {} target 0x{:032x}", random_id, status.difficulty_target);

    let mut now = chain.current().timestamp;
    let mut closed = false;
    for _ in 0..10_000 {
        now += 60;
        chain.advance(now);
        let ping = engine.ping_market(&at(carol, &chain), random_id)?;
        if ping.closed {
            info!(
                "Commit phase closed at block {} after {}s, bounty {}",
                chain.current().number,
                now + status.min_duration - status.eligible_from,
                format_tokens(ping.reward)
            );
            closed = true;
            break;
        }
    }
    if !closed {
        warn!("Random close did not trigger");
    }

    let events = engine.drain_events();
    info!("{} events emitted", events.len());

    let custody_balance = engine.ledger().balance_of(&custody);
    let liabilities = engine.outstanding_liabilities();
    info!(
        "Custody {} | liabilities {}",
        format_tokens(custody_balance),
        format_tokens(liabilities)
    );
    if custody_balance != liabilities {
        bail!("custody does not cover liabilities");
    }

    Ok(())
}
