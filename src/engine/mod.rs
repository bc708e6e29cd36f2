//! The trading engine.
//!
//! One task owns everything: models, stake controllers, lifecycles, the
//! risk governor, the timer scheduler, and the venue session. It reacts to
//! three kinds of events inside a single `select!` loop: transport events,
//! fired timers, and the shutdown signal. Handlers run to completion and
//! never await, so there are no locks anywhere in the engine.

pub mod executor;
pub mod ledger;
pub mod lifecycle;
pub mod scheduler;
pub mod status;

use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, InstrumentConfig, ModelConfig};
use crate::error::{EngineError, ErrorClass, VenueError};
use crate::model::DigitSequenceModel;
use crate::notify::{Notification, Notifier};
use crate::strategy::risk::RiskGovernor;
use crate::strategy::stake::{StakeController, StakeSchedule};
use crate::strategy::{Decision, SignalEvaluator};
use crate::types::{EngineExit, InstrumentId, Intent, Outcome, Tick};
use crate::venue::protocol::{self, Account, ContractUpdate, Envelope, Proposal, Purchase, Response};
use crate::venue::session::{CloseAction, Pending, SessionManager};
use crate::venue::{ConnId, Connector, Inbound};
use executor::Executor;
use ledger::{Ledger, SessionReport};
use lifecycle::{TradeLifecycle, WatchdogAction};
use scheduler::{Scheduler, TimerKey};
use status::{EngineStatus, InstrumentStatus};

// ---------------------------------------------------------------------------
// Per-instrument state
// ---------------------------------------------------------------------------

pub struct InstrumentState {
    pub config: InstrumentConfig,
    pub model: DigitSequenceModel,
    pub stake: StakeController,
    pub lifecycle: TradeLifecycle,
    /// Epoch of the newest ingested tick.
    pub last_epoch: Option<i64>,
}

impl InstrumentState {
    pub fn new(config: &InstrumentConfig, model: &ModelConfig, schedule: &StakeSchedule) -> Self {
        let id = config.id();
        Self {
            config: config.clone(),
            model: DigitSequenceModel::new(id.clone(), model),
            stake: StakeController::new(schedule),
            lifecycle: TradeLifecycle::new(id),
            last_epoch: None,
        }
    }

    pub fn trade_in_progress(&self) -> bool {
        self.lifecycle.in_progress()
    }

    /// Fold one tick into the model. Ticks not newer than the last ingested
    /// one are skipped, which makes a history backfill after reconnect
    /// idempotent.
    pub fn ingest(&mut self, tick: &Tick) -> bool {
        if self.last_epoch.is_some_and(|last| tick.epoch <= last) {
            return false;
        }
        let Some(digit) = tick.last_digit(self.config.decimals) else {
            warn!(instrument = %tick.instrument, price = tick.price, "Unreadable price, tick skipped");
            return false;
        };
        self.model.ingest(digit, tick.price);
        self.last_epoch = Some(tick.epoch);
        true
    }
}

/// Everything the engine mutates, passed around explicitly.
pub struct EngineContext {
    pub config: AppConfig,
    pub instruments: BTreeMap<InstrumentId, InstrumentState>,
    pub session: SessionManager,
}

impl EngineContext {
    pub fn new(config: AppConfig, schedule: &StakeSchedule, session: SessionManager) -> Self {
        let instruments = config
            .instruments
            .iter()
            .map(|inst| (inst.id(), InstrumentState::new(inst, &config.model, schedule)))
            .collect();
        Self {
            config,
            instruments,
            session,
        }
    }

    pub fn instrument(&self, id: &InstrumentId) -> Result<&InstrumentState, EngineError> {
        self.instruments
            .get(id)
            .ok_or_else(|| EngineError::UnknownInstrument(id.clone()))
    }

    pub fn instrument_mut(&mut self, id: &InstrumentId) -> Result<&mut InstrumentState, EngineError> {
        self.instruments
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownInstrument(id.clone()))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    ctx: EngineContext,
    evaluator: SignalEvaluator,
    schedule: StakeSchedule,
    governor: RiskGovernor,
    scheduler: Scheduler,
    executor: Executor,
    ledger: Ledger,
    notifier: Box<dyn Notifier>,
    status: watch::Sender<EngineStatus>,
    exit: Option<EngineExit>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        token: SecretString,
        connector: Box<dyn Connector>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let schedule = StakeSchedule::from_config(&config.stake);
        let evaluator = SignalEvaluator::from_config(&config);
        let governor = RiskGovernor::new(config.risk.clone());
        let executor = Executor::from_config(&config.venue);
        let ledger = Ledger::new(config.instrument_ids());
        let session = SessionManager::new(config.session.clone(), token, connector);
        let ctx = EngineContext::new(config, &schedule, session);
        let (status, _) = watch::channel(EngineStatus::default());

        let engine = Self {
            ctx,
            evaluator,
            schedule,
            governor,
            scheduler: Scheduler::new(),
            executor,
            ledger,
            notifier,
            status,
            exit: None,
        };
        engine.publish();
        engine
    }

    /// Live status feed. Never blocks the engine.
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn governor(&self) -> &RiskGovernor {
        &self.governor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn exit(&self) -> Option<EngineExit> {
        self.exit
    }

    /// Drive the engine until it finishes. `inbound` carries transport
    /// events; `shutdown` resolving is an operator interrupt.
    pub async fn run<F>(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>, shutdown: F) -> SessionReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            instruments = ?self.ctx.config.instrument_ids(),
            strategies = ?self.evaluator.strategy_names(),
            base_stake = %self.schedule.base(),
            tiers = self.schedule.depth(),
            "Engine starting"
        );
        self.start(Instant::now());

        let exit = loop {
            self.publish();
            if let Some(exit) = self.exit {
                break exit;
            }
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    self.finish(EngineExit::Interrupted);
                }
                event = inbound.recv() => match event {
                    Some(event) => self.handle(event, Instant::now()),
                    None => {
                        error!("Transport event channel closed");
                        self.finish(EngineExit::ConnectionExhausted);
                    }
                },
                _ = wait_until(deadline) => self.fire_due(Instant::now()),
            }
        };
        self.ledger.report(exit)
    }

    /// Open the first connection.
    pub fn start(&mut self, now: Instant) {
        self.connect(now);
    }

    /// Operator interrupt outside of `run`.
    pub fn shutdown(&mut self) {
        self.finish(EngineExit::Interrupted);
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(&notification);
    }

    fn finish(&mut self, exit: EngineExit) {
        if self.exit.is_some() {
            return;
        }
        if exit.is_fatal() {
            error!(%exit, pnl = %self.governor.pnl(), "Engine stopping");
        } else {
            info!(%exit, pnl = %self.governor.pnl(), "Engine stopping");
        }
        self.exit = Some(exit);
        self.ctx.session.shutdown();
        self.notify(Notification::SessionEnded { exit });
    }

    fn publish(&self) {
        let instruments = self
            .ctx
            .instruments
            .iter()
            .map(|(id, state)| InstrumentStatus {
                instrument: id.clone(),
                stake: state.stake.stake(),
                tier: state.stake.tier().number(),
                losses_at_tier: state.stake.losses_at_tier(),
                consecutive_losses: self.governor.consecutive_losses(id),
                suspended: self.governor.is_suspended(id),
                trade_in_progress: state.trade_in_progress(),
                lifecycle: state.lifecycle.state().clone(),
                observed: state.model.observed(),
                last_digit: state.model.history().last(),
                last_epoch: state.last_epoch,
            })
            .collect();
        self.status.send_replace(EngineStatus {
            session: self.ctx.session.state().clone(),
            risk: self.governor.snapshot(),
            trades: self.ledger.trades(),
            wins: self.ledger.wins(),
            losses: self.ledger.losses(),
            win_rate: self.ledger.win_rate(),
            exit: self.exit,
            instruments,
            updated_at: Utc::now(),
        });
    }

    fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.trading.settlement_timeout_secs)
    }

    // -- connection ---------------------------------------------------------

    fn connect(&mut self, now: Instant) {
        if let Err(e) = self.ctx.session.connect() {
            let reason = e.to_string();
            warn!(error = %reason, "Connect attempt failed");
            let action = self.ctx.session.connect_failed(&reason);
            self.on_close_action(action, &reason, now);
        }
    }

    /// Apply one transport event.
    pub fn handle(&mut self, event: Inbound, now: Instant) {
        if self.exit.is_some() {
            return;
        }
        match event {
            Inbound::Opened { conn } => self.on_opened(conn, now),
            Inbound::Closed { conn, reason } => {
                let action = self.ctx.session.on_closed(conn, &reason);
                self.on_close_action(action, &reason, now);
            }
            Inbound::Message { conn, text } => {
                if !self.ctx.session.is_current(conn) {
                    debug!(conn, "Dropping message from stale connection");
                    return;
                }
                self.ctx.session.touch(Utc::now());
                self.scheduler.schedule(
                    TimerKey::HeartbeatTimeout,
                    now,
                    self.ctx.config.session.heartbeat_timeout(),
                );
                match protocol::parse(&text) {
                    Ok(envelope) => self.on_envelope(envelope, now),
                    Err(e) => warn!(error = %e, len = text.len(), "Unreadable venue message"),
                }
            }
        }
    }

    fn on_opened(&mut self, conn: ConnId, now: Instant) {
        match self.ctx.session.on_opened(conn) {
            Ok(true) => self.scheduler.schedule(
                TimerKey::HeartbeatTimeout,
                now,
                self.ctx.config.session.heartbeat_timeout(),
            ),
            Ok(false) => {}
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "Could not send authorization");
                let action = self.ctx.session.drop_connection(&reason);
                self.on_close_action(action, &reason, now);
            }
        }
    }

    fn on_close_action(&mut self, action: CloseAction, reason: &str, now: Instant) {
        match action {
            CloseAction::Ignored | CloseAction::Stay => {}
            CloseAction::Reconnect { attempt, delay } => {
                self.scheduler.cancel(&TimerKey::Heartbeat);
                self.scheduler.cancel(&TimerKey::HeartbeatTimeout);
                self.scheduler.schedule(TimerKey::Reconnect, now, delay);
                self.notify(Notification::ConnectionLost {
                    reason: reason.to_string(),
                    attempt,
                });
            }
            CloseAction::Exhausted => {
                self.notify(Notification::ConnectionLost {
                    reason: reason.to_string(),
                    attempt: self.ctx.session.state().reconnect_attempts,
                });
                self.finish(EngineExit::ConnectionExhausted);
            }
        }
    }

    fn on_authorized(&mut self, account: Account, now: Instant) {
        self.ctx.session.on_authorized(&account);

        let ids: Vec<InstrumentId> = self.ctx.instruments.keys().cloned().collect();
        for id in &ids {
            self.scheduler.cancel(&TimerKey::HistoryRetry(id.clone()));
            self.scheduler.cancel(&TimerKey::TicksRetry(id.clone()));
            if let Err(e) = self.ctx.session.subscribe_instrument(id) {
                warn!(instrument = %id, error = %e, "Subscription request failed");
            }
            // Requests in flight died with the previous connection.
            let (dropped, in_flight) = match self.ctx.instrument_mut(id) {
                Ok(state) => (
                    state.lifecycle.reset_signaled(),
                    state.lifecycle.contract().map(|c| c.id),
                ),
                Err(_) => continue,
            };
            if let Some(intent) = dropped {
                info!(instrument = %id, digit = intent.target_digit.value(), "Unsubmitted signal dropped after reconnect");
                self.scheduler.cancel(&TimerKey::SettlementTimeout(id.clone()));
            }
            if let Some(contract_id) = in_flight {
                if let Err(e) = self.executor.follow(&mut self.ctx.session, id, contract_id) {
                    warn!(instrument = %id, contract_id, error = %e, "Could not re-follow contract");
                }
            }
        }

        self.scheduler.schedule(
            TimerKey::Heartbeat,
            now,
            self.ctx.config.session.heartbeat_interval(),
        );
        self.notify(Notification::Connected {
            login_id: account.login_id,
            balance: account.balance,
        });
    }

    // -- messages -----------------------------------------------------------

    fn take_pending(&mut self, req_id: Option<u64>) -> Option<Pending> {
        req_id.and_then(|id| self.ctx.session.take_pending(id))
    }

    fn on_envelope(&mut self, envelope: Envelope, now: Instant) {
        let Envelope {
            msg_type,
            req_id,
            subscription_id,
            body,
        } = envelope;

        let response = match body {
            Ok(response) => response,
            Err(err) => {
                let purpose = self.take_pending(req_id);
                self.on_venue_error(purpose, &msg_type, err, now);
                return;
            }
        };

        match response {
            Response::Authorized(account) => {
                self.take_pending(req_id);
                self.on_authorized(account, now);
            }
            Response::History { instrument, ticks } => {
                self.take_pending(req_id);
                self.on_history(&instrument, &ticks, now);
            }
            Response::Tick(tick) => {
                if let Some(sub) = subscription_id {
                    if self.ctx.session.tick_subscription(&tick.instrument).is_none() {
                        self.ctx.session.record_tick_subscription(tick.instrument.clone(), sub);
                    }
                }
                self.on_tick(&tick, now);
            }
            Response::Proposal(proposal) => match self.take_pending(req_id) {
                Some(Pending::Proposal(instrument)) => self.on_proposal(&instrument, &proposal),
                other => debug!(?other, proposal_id = %proposal.id, "Unmatched proposal"),
            },
            Response::Bought(purchase) => match self.take_pending(req_id) {
                Some(Pending::Buy(instrument)) => self.on_bought(&instrument, &purchase, now),
                other => warn!(?other, contract_id = purchase.contract_id, "Unmatched buy confirmation"),
            },
            Response::Contract(update) => {
                self.on_contract_update(&update, req_id, subscription_id.as_deref(), now)
            }
            Response::Forgotten | Response::Pong => {
                self.take_pending(req_id);
            }
            Response::Other => debug!(%msg_type, "Ignoring message"),
        }
    }

    fn on_history(&mut self, instrument: &InstrumentId, ticks: &[Tick], now: Instant) {
        let state = match self.ctx.instrument_mut(instrument) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "History for unconfigured instrument");
                return;
            }
        };
        let mut ingested = 0usize;
        for tick in ticks {
            if state.ingest(tick) {
                ingested += 1;
            }
        }
        info!(
            %instrument,
            received = ticks.len(),
            ingested,
            observed = state.model.observed(),
            "History backfilled"
        );
        self.try_trade(instrument, now);
    }

    fn on_tick(&mut self, tick: &Tick, now: Instant) {
        match self.ctx.instrument_mut(&tick.instrument) {
            Ok(state) => {
                if !state.ingest(tick) {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Tick for unconfigured instrument");
                return;
            }
        }
        self.try_trade(&tick.instrument, now);
    }

    // -- trading ------------------------------------------------------------

    fn try_trade(&mut self, instrument: &InstrumentId, now: Instant) {
        if self.exit.is_some() || !self.ctx.session.is_ready() || self.governor.stopped().is_some() {
            return;
        }
        if self.scheduler.is_pending(&TimerKey::TradeWait(instrument.clone())) {
            return;
        }
        let (snapshot, stake) = match self.ctx.instrument(instrument) {
            Ok(state) if state.trade_in_progress() => return,
            Ok(state) => (state.model.snapshot(), state.stake.stake()),
            Err(e) => {
                warn!(error = %e, "Cannot evaluate");
                return;
            }
        };

        let was_suspended = self.governor.is_suspended(instrument);
        if !self.governor.is_tradable(instrument, now) {
            return;
        }
        if was_suspended {
            self.on_reactivated(instrument);
        }

        let intent = match self.evaluator.assess(&snapshot) {
            Decision::Trade(intent) => intent,
            skip => {
                debug!(%instrument, ?skip, "No trade");
                return;
            }
        };
        if let Err(e) = self.submit(intent, stake, now) {
            warn!(%instrument, error = %e, "Could not submit trade");
        }
    }

    fn submit(&mut self, intent: Intent, stake: Decimal, now: Instant) -> Result<(), EngineError> {
        let instrument = intent.instrument.clone();
        self.ctx
            .instrument_mut(&instrument)?
            .lifecycle
            .signal(intent.clone(), stake, Utc::now())?;
        if let Err(e) = self.executor.propose(&mut self.ctx.session, &intent, stake) {
            self.ctx.instrument_mut(&instrument)?.lifecycle.reject()?;
            return Err(e);
        }
        info!(%intent, %stake, "Signal accepted");
        self.scheduler
            .schedule(TimerKey::SettlementTimeout(instrument), now, self.settlement_timeout());
        Ok(())
    }

    /// Drop a signaled trade without an outcome.
    fn abort_signal(&mut self, instrument: &InstrumentId) {
        if let Ok(state) = self.ctx.instrument_mut(instrument) {
            if let Ok(intent) = state.lifecycle.reject() {
                debug!(%instrument, digit = intent.target_digit.value(), "Signal aborted");
            }
        }
        self.scheduler.cancel(&TimerKey::SettlementTimeout(instrument.clone()));
    }

    fn on_proposal(&mut self, instrument: &InstrumentId, proposal: &Proposal) {
        let accepted = self
            .ctx
            .instrument_mut(instrument)
            .and_then(|state| state.lifecycle.on_proposal(&proposal.id));
        if let Err(e) = accepted {
            warn!(%instrument, error = %e, "Proposal no longer wanted");
            return;
        }
        if let Err(e) = self.executor.buy(&mut self.ctx.session, instrument, proposal) {
            warn!(%instrument, error = %e, "Could not send buy");
            self.abort_signal(instrument);
        }
    }

    fn on_bought(&mut self, instrument: &InstrumentId, purchase: &Purchase, now: Instant) {
        let Ok(state) = self.ctx.instrument_mut(instrument) else {
            return;
        };
        let intent = state.lifecycle.intent().cloned();
        let contract = match state
            .lifecycle
            .on_bought(purchase.contract_id, purchase.buy_price, Utc::now())
        {
            Ok(contract) => contract,
            Err(e) => {
                warn!(%instrument, contract_id = purchase.contract_id, error = %e, "Unexpected buy confirmation");
                return;
            }
        };
        if let Some(balance) = purchase.balance_after {
            self.ctx.session.set_balance(balance);
        }
        info!(%contract, "Contract bought");

        if let Err(e) = self.executor.follow(&mut self.ctx.session, instrument, contract.id) {
            warn!(%instrument, contract_id = contract.id, error = %e, "Could not follow contract");
        }
        self.scheduler.schedule(
            TimerKey::SettlementTimeout(instrument.clone()),
            now,
            self.settlement_timeout(),
        );
        if let Some(intent) = intent {
            self.notify(Notification::TradeOpened { intent, contract });
        }
    }

    fn on_contract_update(
        &mut self,
        update: &ContractUpdate,
        req_id: Option<u64>,
        subscription_id: Option<&str>,
        now: Instant,
    ) {
        let Some(outcome) = update.outcome() else {
            return;
        };
        // Sold: this stream is finished whoever it belonged to.
        self.take_pending(req_id);
        if let Some(sub) = subscription_id {
            if let Err(e) = self.executor.forget(&mut self.ctx.session, sub) {
                debug!(subscription = sub, error = %e, "Could not forget contract stream");
            }
        }

        let owner = self
            .ctx
            .instruments
            .iter()
            .find(|(_, state)| {
                state
                    .lifecycle
                    .contract()
                    .is_some_and(|c| c.id == update.contract_id)
            })
            .map(|(id, _)| id.clone());
        match owner {
            Some(instrument) => self.on_settled(&instrument, update, outcome, now),
            None => debug!(contract_id = update.contract_id, "Settlement for an untracked contract"),
        }
    }

    fn on_settled(&mut self, instrument: &InstrumentId, update: &ContractUpdate, outcome: Outcome, now: Instant) {
        let Ok(state) = self.ctx.instrument_mut(instrument) else {
            return;
        };
        let stake = state.lifecycle.contract().map_or(Decimal::ZERO, |c| c.stake);
        let profit = update.profit.unwrap_or(match outcome {
            Outcome::Won => Decimal::ZERO,
            Outcome::Lost => -stake,
        });
        let trade = match state
            .lifecycle
            .settle(update.contract_id, outcome, profit, update.exit_tick, Utc::now())
        {
            Ok(trade) => trade,
            Err(e) => {
                warn!(%instrument, error = %e, "Settlement out of order");
                return;
            }
        };
        let step = state.stake.on_outcome(&self.schedule, outcome);
        let exhausted = state.stake.stop_loss_stake();
        let next_stake = state.stake.stake();
        let tier = state.stake.tier();

        self.scheduler.cancel(&TimerKey::SettlementTimeout(instrument.clone()));
        let decision = self.governor.on_outcome(instrument, outcome, profit, exhausted, now);
        self.ledger.record(&trade);

        let pnl = self.governor.pnl();
        info!(
            %instrument,
            contract_id = trade.contract.id,
            %outcome,
            %profit,
            %pnl,
            %next_stake,
            tier = tier.number(),
            ?step,
            "Trade settled"
        );
        self.notify(Notification::TradeSettled { trade, pnl });

        if let Some(suspension) = decision.suspended {
            if let Some(until) = suspension.until {
                self.scheduler
                    .schedule_at(TimerKey::Cooldown(suspension.instrument.clone()), until);
            }
            self.notify(Notification::InstrumentSuspended {
                consecutive_losses: self.governor.consecutive_losses(&suspension.instrument),
                instrument: suspension.instrument,
            });
        }
        for released in &decision.reactivated {
            self.on_reactivated(released);
        }

        if let Some(reason) = decision.stop {
            self.notify(Notification::RiskStopped { reason, pnl });
            self.finish(EngineExit::RiskStop(reason));
            return;
        }

        let wait = self.ctx.config.trading.trade_interval_ms;
        if wait > 0 {
            self.scheduler.schedule(
                TimerKey::TradeWait(instrument.clone()),
                now,
                Duration::from_millis(wait),
            );
        }
    }

    fn on_reactivated(&mut self, instrument: &InstrumentId) {
        self.scheduler.cancel(&TimerKey::Cooldown(instrument.clone()));
        info!(%instrument, "Instrument reactivated");
        self.notify(Notification::InstrumentReactivated {
            instrument: instrument.clone(),
        });
    }

    // -- venue errors -------------------------------------------------------

    fn on_venue_error(&mut self, purpose: Option<Pending>, msg_type: &str, err: VenueError, now: Instant) {
        let class = err.class();
        if class == ErrorClass::InvalidCredential {
            error!(code = %err.code, message = %err.message, "Venue rejected credentials");
            self.finish(EngineExit::AuthFailed);
            return;
        }
        match purpose {
            Some(Pending::Proposal(instrument)) | Some(Pending::Buy(instrument)) => {
                self.on_rejected(&instrument, &err, now)
            }
            Some(Pending::Authorize) => {
                let reason = err.to_string();
                warn!(%class, error = %reason, "Authorization failed, reconnecting");
                let action = self.ctx.session.drop_connection(&reason);
                self.on_close_action(action, &reason, now);
            }
            Some(Pending::History(instrument)) => {
                let delay = self.market_data_retry(class);
                warn!(%instrument, %class, error = %err, retry_ms = delay.as_millis() as u64, "History request failed");
                self.scheduler.schedule(TimerKey::HistoryRetry(instrument), now, delay);
            }
            Some(Pending::Ticks(instrument)) => {
                let delay = self.market_data_retry(class);
                warn!(%instrument, %class, error = %err, retry_ms = delay.as_millis() as u64, "Tick subscription failed");
                self.scheduler.schedule(TimerKey::TicksRetry(instrument), now, delay);
            }
            Some(Pending::Contract(instrument)) => {
                warn!(%instrument, %class, error = %err, "Contract subscription failed")
            }
            Some(Pending::Forget) | Some(Pending::Ping) | None => {
                debug!(msg_type, %class, error = %err, "Venue error")
            }
        }
    }

    fn market_data_retry(&self, class: ErrorClass) -> Duration {
        let session = &self.ctx.config.session;
        match class {
            ErrorClass::RateLimited => session.rate_limit_delay(),
            ErrorClass::MarketClosed => session.market_closed_delay(),
            ErrorClass::Transient | ErrorClass::InvalidCredential => {
                Duration::from_millis(session.initial_backoff_ms)
            }
        }
    }

    fn on_rejected(&mut self, instrument: &InstrumentId, err: &VenueError, now: Instant) {
        let class = err.class();
        self.abort_signal(instrument);
        self.ledger.record_rejection(instrument);
        warn!(%instrument, code = %err.code, %class, message = %err.message, "Trade rejected");

        let delay = match class {
            ErrorClass::RateLimited => Some(self.ctx.config.session.rate_limit_delay()),
            ErrorClass::MarketClosed => Some(self.ctx.config.session.market_closed_delay()),
            ErrorClass::Transient | ErrorClass::InvalidCredential => None,
        };
        if let Some(delay) = delay {
            self.scheduler
                .schedule(TimerKey::TradeWait(instrument.clone()), now, delay);
        }
        self.notify(Notification::TradeRejected {
            instrument: instrument.clone(),
            code: err.code.clone(),
            message: err.message.clone(),
        });
    }

    // -- timers -------------------------------------------------------------

    /// Fire every timer due at `now`.
    pub fn fire_due(&mut self, now: Instant) {
        for key in self.scheduler.pop_due(now) {
            if self.exit.is_some() {
                return;
            }
            match key {
                TimerKey::Reconnect => self.connect(now),
                TimerKey::Heartbeat => self.on_heartbeat(now),
                TimerKey::HeartbeatTimeout => {
                    warn!(
                        timeout_secs = self.ctx.config.session.heartbeat_timeout_secs,
                        "Venue silent, dropping connection"
                    );
                    let action = self.ctx.session.drop_connection("heartbeat timeout");
                    self.on_close_action(action, "heartbeat timeout", now);
                }
                TimerKey::Cooldown(instrument) => {
                    if self.governor.on_cooldown_expired(&instrument, now) {
                        self.on_reactivated(&instrument);
                    }
                }
                TimerKey::TradeWait(instrument) => self.try_trade(&instrument, now),
                TimerKey::SettlementTimeout(instrument) => self.on_settlement_timeout(&instrument, now),
                TimerKey::HistoryRetry(instrument) => self.retry_market_data(&instrument, false),
                TimerKey::TicksRetry(instrument) => self.retry_market_data(&instrument, true),
            }
        }
    }

    /// Re-issue a rejected market data request. A reconnect resubscribes
    /// everything, so nothing is sent while the session is down.
    fn retry_market_data(&mut self, instrument: &InstrumentId, ticks: bool) {
        if !self.ctx.session.is_ready() {
            return;
        }
        let sent = if ticks {
            self.ctx.session.subscribe_ticks(instrument)
        } else {
            self.ctx.session.request_history(instrument)
        };
        match sent {
            Ok(_) => info!(%instrument, ticks, "Market data request retried"),
            Err(e) => warn!(%instrument, ticks, error = %e, "Market data retry failed"),
        }
    }

    fn on_heartbeat(&mut self, now: Instant) {
        if !self.ctx.session.is_ready() {
            return;
        }
        if let Err(e) = self.ctx.session.ping() {
            warn!(error = %e, "Ping failed");
        }
        self.scheduler.schedule(
            TimerKey::Heartbeat,
            now,
            self.ctx.config.session.heartbeat_interval(),
        );
    }

    fn on_settlement_timeout(&mut self, instrument: &InstrumentId, now: Instant) {
        let timeout = self.settlement_timeout();
        // Retries only count while the venue can answer.
        if !self.ctx.session.is_ready() {
            self.scheduler
                .schedule(TimerKey::SettlementTimeout(instrument.clone()), now, timeout);
            return;
        }
        let retries = self.ctx.config.trading.settlement_retries;
        let buy_outstanding = self.ctx.session.awaiting(&Pending::Buy(instrument.clone()));
        let action = match self.ctx.instrument_mut(instrument) {
            Ok(state) => state.lifecycle.on_watchdog(retries, buy_outstanding),
            Err(_) => return,
        };
        match action {
            WatchdogAction::None => {}
            WatchdogAction::AwaitBuy => {
                warn!(%instrument, "Buy confirmation overdue, still waiting");
                self.scheduler
                    .schedule(TimerKey::SettlementTimeout(instrument.clone()), now, timeout);
            }
            WatchdogAction::ResetSignaled(intent) => {
                warn!(%intent, "Signal never reached the venue, lifecycle reset");
                self.ledger.record_abandoned(instrument);
                self.notify(Notification::TradeAbandoned {
                    instrument: instrument.clone(),
                    contract_id: None,
                });
            }
            WatchdogAction::Resubscribe(contract_id) => {
                warn!(%instrument, contract_id, "Settlement overdue, following contract again");
                if let Err(e) = self.executor.follow(&mut self.ctx.session, instrument, contract_id) {
                    warn!(%instrument, contract_id, error = %e, "Could not follow contract");
                }
                self.scheduler
                    .schedule(TimerKey::SettlementTimeout(instrument.clone()), now, timeout);
            }
            WatchdogAction::Abandon(contract) => {
                error!(%contract, "Settlement never arrived, contract abandoned");
                self.ledger.record_abandoned(instrument);
                self.notify(Notification::TradeAbandoned {
                    instrument: instrument.clone(),
                    contract_id: Some(contract.id),
                });
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
