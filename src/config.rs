//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The venue API token is referenced by env-var name in the config and
//! resolved at startup into a `SecretString`. The engine treats the loaded
//! configuration as immutable for the whole session.

use anyhow::{bail, ensure, Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::types::InstrumentId;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub venue: VenueConfig,
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    pub stake: StakeConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    #[serde(default = "default_venue_url")]
    pub url: String,
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_contract_type")]
    pub contract_type: String,
    /// Contract duration in ticks.
    #[serde(default = "default_duration_ticks")]
    pub duration_ticks: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InstrumentConfig {
    pub symbol: String,
    /// Fractional digits used to extract the last digit when the venue does
    /// not report a pip size.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    /// Regime gate: skip when the stddev of recent digits exceeds this.
    #[serde(default)]
    pub max_digit_stddev: Option<f64>,
    /// Regime gate: skip when price stddev as % of mean exceeds this.
    #[serde(default)]
    pub max_price_dispersion_pct: Option<f64>,
}

impl InstrumentConfig {
    pub fn id(&self) -> InstrumentId {
        InstrumentId::new(self.symbol.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// Markov order k (context length in digits), 1..=4.
    pub order: u32,
    /// Digits kept per instrument.
    pub history_capacity: usize,
    /// Observations per repetition-rate window.
    pub repetition_window: usize,
    /// Past window rates kept for the z-score.
    pub rolling_capacity: usize,
    /// Samples used by the regime dispersion measures.
    pub dispersion_window: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            order: 2,
            history_capacity: 1000,
            repetition_window: 50,
            rolling_capacity: 100,
            dispersion_window: 20,
        }
    }
}

/// Registered signal strategies.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Markov,
    Frequency,
    Repetition,
}

/// How several strategies are combined.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// First strategy that fires wins.
    Any,
    /// Every strategy must fire on the same digit.
    All,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SignalConfig {
    pub strategies: Vec<StrategyKind>,
    pub combine: CombineMode,
    /// Minimum row total for the current context before any trade.
    pub min_samples: u64,
    pub probability_threshold: f64,
    /// Only digits seen at least once in the current row are candidates.
    pub exclude_unseen: bool,
    /// Relative shortfall below the uniform 10% that flags a digit.
    pub frequency_deviation: f64,
    pub z_threshold: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            strategies: vec![StrategyKind::Markov],
            combine: CombineMode::Any,
            min_samples: 10,
            probability_threshold: 0.05,
            exclude_unseen: true,
            frequency_deviation: 0.5,
            z_threshold: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StakeConfig {
    pub base: Decimal,
    pub multiplier: Decimal,
    /// Tier-1 escalation bound. A loss that would push the stake above this
    /// moves to tier 2 (or stops when there is none).
    #[serde(default)]
    pub max_stake: Option<Decimal>,
    /// Tiers 2..=T, in order.
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TierConfig {
    /// Fixed stake while this tier is active.
    pub stake: Decimal,
    /// Losses allowed at this tier before escalating.
    pub max_losses: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Session stops when aggregate P/L <= -stop_loss.
    pub stop_loss: Decimal,
    /// Session stops when aggregate P/L >= take_profit.
    pub take_profit: Decimal,
    pub max_consecutive_losses: u32,
    #[serde(default = "default_suspension_capacity")]
    pub suspension_capacity: usize,
    /// Suspension length. `None` suspends until released by a win elsewhere
    /// or by FIFO eviction.
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub release_on_win: bool,
    #[serde(default)]
    pub max_session_consecutive_losses: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    /// Ticks requested per instrument on every (re)connect.
    pub history_count: u32,
    pub rate_limit_delay_secs: u64,
    pub market_closed_delay_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            max_reconnect_attempts: 10,
            heartbeat_interval_secs: 15,
            heartbeat_timeout_secs: 45,
            history_count: 1000,
            rate_limit_delay_secs: 10,
            market_closed_delay_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_secs(self.rate_limit_delay_secs)
    }

    pub fn market_closed_delay(&self) -> Duration {
        Duration::from_secs(self.market_closed_delay_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TradingConfig {
    /// Pause after each settlement before the instrument may trade again.
    pub trade_interval_ms: u64,
    /// Watchdog for a trade stuck between signal and settlement.
    pub settlement_timeout_secs: u64,
    /// Contract re-subscriptions before a stuck trade is abandoned.
    pub settlement_retries: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            trade_interval_ms: 0,
            settlement_timeout_secs: 30,
            settlement_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

fn default_venue_url() -> String {
    "wss://ws.derivws.com/websockets/v3".to_string()
}
fn default_app_id() -> u32 {
    1089
}
fn default_token_env() -> String {
    "DIFFER_API_TOKEN".to_string()
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_contract_type() -> String {
    "DIGITDIFF".to_string()
}
fn default_duration_ticks() -> u32 {
    1
}
fn default_decimals() -> u32 {
    2
}
fn default_suspension_capacity() -> usize {
    3
}
fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.instruments.is_empty(), "at least one instrument must be configured");
        let mut seen = HashSet::new();
        for inst in &self.instruments {
            ensure!(seen.insert(inst.symbol.as_str()), "duplicate instrument: {}", inst.symbol);
            ensure!(inst.decimals <= 10, "{}: decimals must be <= 10", inst.symbol);
        }

        let m = &self.model;
        ensure!((1..=4).contains(&m.order), "model.order must be within 1..=4");
        ensure!(
            m.history_capacity >= m.order as usize && m.history_capacity > 0,
            "model.history_capacity must be at least model.order"
        );
        ensure!(m.repetition_window >= 1, "model.repetition_window must be >= 1");
        ensure!(m.rolling_capacity >= 2, "model.rolling_capacity must be >= 2");
        ensure!(m.dispersion_window >= 2, "model.dispersion_window must be >= 2");

        let s = &self.signal;
        ensure!(!s.strategies.is_empty(), "signal.strategies must not be empty");
        ensure!(
            s.probability_threshold > 0.0 && s.probability_threshold < 1.0,
            "signal.probability_threshold must be within (0, 1)"
        );
        ensure!(
            s.frequency_deviation > 0.0 && s.frequency_deviation < 1.0,
            "signal.frequency_deviation must be within (0, 1)"
        );
        ensure!(s.z_threshold > 0.0, "signal.z_threshold must be positive");

        self.validate_stake()?;

        let r = &self.risk;
        ensure!(r.stop_loss > Decimal::ZERO, "risk.stop_loss must be positive");
        ensure!(r.take_profit > Decimal::ZERO, "risk.take_profit must be positive");
        ensure!(r.max_consecutive_losses >= 1, "risk.max_consecutive_losses must be >= 1");
        ensure!(r.suspension_capacity >= 1, "risk.suspension_capacity must be >= 1");

        let sess = &self.session;
        ensure!(sess.initial_backoff_ms > 0, "session.initial_backoff_ms must be positive");
        ensure!(
            sess.max_backoff_ms >= sess.initial_backoff_ms,
            "session.max_backoff_ms must be >= session.initial_backoff_ms"
        );
        ensure!(sess.backoff_multiplier >= 1.0, "session.backoff_multiplier must be >= 1");
        ensure!(
            sess.heartbeat_timeout_secs > sess.heartbeat_interval_secs,
            "session.heartbeat_timeout_secs must exceed session.heartbeat_interval_secs"
        );
        ensure!(self.trading.settlement_timeout_secs > 0, "trading.settlement_timeout_secs must be positive");

        Ok(())
    }

    fn validate_stake(&self) -> Result<()> {
        let st = &self.stake;
        ensure!(st.base > Decimal::ZERO, "stake.base must be positive");
        ensure!(st.multiplier >= Decimal::ONE, "stake.multiplier must be >= 1");
        if let Some(max) = st.max_stake {
            ensure!(max >= st.base, "stake.max_stake must be >= stake.base");
        }
        if st.tiers.is_empty() {
            return Ok(());
        }
        let Some(bound) = st.max_stake else {
            bail!("stake.tiers require stake.max_stake to be set");
        };
        // Stakes never decrease inside a loss streak.
        let mut previous = bound;
        for (i, tier) in st.tiers.iter().enumerate() {
            let n = i + 2;
            ensure!(tier.max_losses >= 1, "tier {n}: max_losses must be >= 1");
            ensure!(
                tier.stake >= previous,
                "tier {n}: stake {} is below the previous bound {previous}",
                tier.stake
            );
            previous = tier.stake;
        }
        Ok(())
    }

    /// Configuration of a configured instrument.
    pub fn instrument(&self, id: &InstrumentId) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.symbol == id.as_str())
    }

    /// Identifiers of all configured instruments, in configuration order.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        self.instruments.iter().map(InstrumentConfig::id).collect()
    }

    /// Resolve the venue API token from the environment.
    pub fn api_token(&self) -> Result<SecretString> {
        Self::resolve_env(&self.venue.token_env).map(SecretString::new)
    }

    /// Full WebSocket URL including the application id.
    pub fn venue_url(&self) -> String {
        let sep = if self.venue.url.contains('?') { '&' } else { '?' };
        format!("{}{}app_id={}", self.venue.url, sep, self.venue.app_id)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
