//! End-to-end sessions against the mock venue.
//!
//! Each test drives `Engine::run` on a paused clock: timers (trade wait,
//! backoff, heartbeat) fire as soon as the loop goes idle, so a whole
//! session completes instantly and deterministically.

use differ::config::AppConfig;
use differ::engine::Engine;
use differ::notify::{ChannelNotifier, Notification};
use differ::types::{EngineExit, InstrumentId, StopReason};
use differ::venue::Inbound;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::mock_venue::{MockVenue, Settlement};

const CONFIG: &str = r#"
    [venue]
    token_env = "DIFFER_INTEGRATION_TOKEN"

    [[instruments]]
    symbol = "R_100"
    decimals = 2

    [model]
    order = 1
    history_capacity = 100

    [signal]
    strategies = ["markov"]
    min_samples = 3
    probability_threshold = 0.5

    [stake]
    base = 1
    multiplier = 2
    max_stake = 100

    [risk]
    stop_loss = 10
    take_profit = 3
    max_consecutive_losses = 10

    [session]
    max_reconnect_attempts = 2
    rate_limit_delay_secs = 5

    [trading]
    trade_interval_ms = 500
    settlement_timeout_secs = 20
"#;

struct Session {
    engine: Engine,
    venue: MockVenue,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    events: mpsc::UnboundedReceiver<Notification>,
}

fn session(config: &str, script: impl FnOnce(MockVenue) -> MockVenue) -> Session {
    let config = AppConfig::from_toml_str(config).unwrap();
    let (tx, inbound) = mpsc::unbounded_channel();
    let venue = script(MockVenue::new(tx));
    let (notifier, events) = ChannelNotifier::channel();
    let engine = Engine::new(
        config,
        SecretString::new("integration-token".to_string()),
        Box::new(venue.clone()),
        Box::new(notifier),
    );
    Session {
        engine,
        venue,
        inbound,
        events,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

// ---------------------------------------------------------------------------
// Risk stops
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_winning_session_stops_at_take_profit() {
    let mut s = session(CONFIG, |v| v.with_outcomes(vec![], Settlement::won(1.0)));
    let status = s.engine.status();

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    assert_eq!(report.exit, EngineExit::RiskStop(StopReason::TakeProfit));
    assert_eq!(report.exit.exit_code(), 0);
    assert_eq!(report.trades, 3);
    assert_eq!(report.wins, 3);
    assert_eq!(report.pnl, dec!(3));
    // A win never escalates the stake.
    assert_eq!(s.venue.proposed_stakes(), vec![1.0, 1.0, 1.0]);
    // Every proposal bets against the rarest successor of 1 in the backfill.
    assert!(s.venue.requests("proposal").iter().all(|p| p["barrier"] == "3"));

    let last = status.borrow().clone();
    assert!(last.is_finished());
    assert_eq!(last.trades, 3);
    assert_eq!(last.risk.stopped, Some(StopReason::TakeProfit));

    let events = drain(&mut s.events);
    assert!(matches!(events.first(), Some(Notification::Connected { .. })));
    assert_eq!(
        events
            .iter()
            .filter(|n| matches!(n, Notification::TradeSettled { .. }))
            .count(),
        3
    );
    assert!(matches!(
        events.last(),
        Some(Notification::SessionEnded {
            exit: EngineExit::RiskStop(StopReason::TakeProfit)
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_losing_streak_escalates_until_stop_loss() {
    let s = session(CONFIG, |v| v.with_outcomes(vec![], Settlement::lost()));

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    assert_eq!(report.exit, EngineExit::RiskStop(StopReason::StopLoss));
    assert_eq!(s.venue.proposed_stakes(), vec![1.0, 2.0, 4.0, 8.0]);
    assert_eq!(report.losses, 4);
    assert_eq!(report.pnl, dec!(-15));
    assert_eq!(report.longest_losing_streak, 4);
    assert_eq!(report.staked, dec!(15));
}

#[tokio::test(start_paused = true)]
async fn test_win_after_losses_resets_stake() {
    let s = session(CONFIG, |v| {
        v.with_outcomes(
            vec![Settlement::lost(), Settlement::lost(), Settlement::won(4.0)],
            Settlement::won(1.0),
        )
    });

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    // -1 -2 +4 +1 +1 = 3
    assert_eq!(report.exit, EngineExit::RiskStop(StopReason::TakeProfit));
    assert_eq!(s.venue.proposed_stakes(), vec![1.0, 2.0, 4.0, 1.0, 1.0]);
    assert_eq!(report.longest_losing_streak, 2);
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_rate_limited_buy_is_retried_without_outcome() {
    let s = session(CONFIG, |v| {
        v.reject_next_buy("RateLimit", "too many requests")
            .with_outcomes(vec![], Settlement::won(1.5))
    });

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    assert_eq!(report.exit, EngineExit::RiskStop(StopReason::TakeProfit));
    assert_eq!(report.trades, 2);
    assert_eq!(s.venue.requests("buy").len(), 3);
    // The rejection neither escalated the stake nor counted as a loss.
    assert_eq!(s.venue.proposed_stakes(), vec![1.0, 1.0, 1.0]);
    assert_eq!(report.losses, 0);
    let tally = report.instruments.get(&InstrumentId::from("R_100")).unwrap();
    assert_eq!(tally.rejected, 1);
    assert_eq!(tally.trades, 2);
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_reconnect_refollows_open_contract() {
    let mut s = session(CONFIG, |v| {
        v.drop_after_buy(1).with_outcomes(vec![], Settlement::won(1.5))
    });

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    assert_eq!(report.exit, EngineExit::RiskStop(StopReason::TakeProfit));
    assert_eq!(s.venue.connects(), 2);
    assert_eq!(s.venue.requests("authorize").len(), 2);
    // The first contract was bought before the drop and settled after it.
    assert_eq!(report.trades, 2);
    let follows = s
        .venue
        .requests("proposal_open_contract")
        .iter()
        .filter(|r| r["contract_id"] == 1001)
        .count();
    assert_eq!(follows, 2);

    let events = drain(&mut s.events);
    assert!(events
        .iter()
        .any(|n| matches!(n, Notification::ConnectionLost { attempt: 1, .. })));
    assert_eq!(
        events
            .iter()
            .filter(|n| matches!(n, Notification::Connected { .. }))
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_token_ends_session() {
    let s = session(CONFIG, |v| v.reject_token("InvalidToken"));

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    assert_eq!(report.exit, EngineExit::AuthFailed);
    assert_eq!(report.exit.exit_code(), 2);
    assert_eq!(s.venue.connects(), 1);
    assert_eq!(s.venue.closes(), 1);
    assert!(s.venue.requests("ticks_history").is_empty());
    assert!(s.venue.requests("proposal").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refused_connections_exhaust_reconnects() {
    let mut s = session(CONFIG, |v| v.refuse_connections());

    let report = s.engine.run(s.inbound, std::future::pending()).await;

    assert_eq!(report.exit, EngineExit::ConnectionExhausted);
    assert_eq!(report.exit.exit_code(), 3);
    // Initial attempt plus two reconnects.
    assert_eq!(s.venue.connects(), 3);
    assert!(s.venue.requests("authorize").is_empty());

    let lost = drain(&mut s.events)
        .into_iter()
        .filter(|n| matches!(n, Notification::ConnectionLost { .. }))
        .count();
    assert_eq!(lost, 3);
}

// ---------------------------------------------------------------------------
// Operator interrupt
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_session() {
    let s = session(CONFIG, |v| v.with_outcomes(vec![], Settlement::won(0.5)));

    let shutdown = tokio::time::sleep(std::time::Duration::from_millis(1_200));
    let report = s.engine.run(s.inbound, shutdown).await;

    assert_eq!(report.exit, EngineExit::Interrupted);
    assert_eq!(report.exit.exit_code(), 0);
    assert!(report.trades >= 1);
    assert!(report.pnl < dec!(3));
}
