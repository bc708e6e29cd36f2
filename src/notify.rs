//! Fire-and-forget event sinks.
//!
//! The engine reports what happened through [`Notifier`]; nothing a sink
//! does can feed back into trading decisions. Delivery must not block the
//! engine loop.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::{Contract, EngineExit, InstrumentId, Intent, SettledTrade, StopReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Connected {
        login_id: String,
        balance: Decimal,
    },
    TradeOpened {
        intent: Intent,
        contract: Contract,
    },
    TradeSettled {
        trade: SettledTrade,
        pnl: Decimal,
    },
    TradeRejected {
        instrument: InstrumentId,
        code: String,
        message: String,
    },
    /// Trade stuck in flight past its retries and dropped without outcome.
    TradeAbandoned {
        instrument: InstrumentId,
        contract_id: Option<u64>,
    },
    InstrumentSuspended {
        instrument: InstrumentId,
        consecutive_losses: u32,
    },
    InstrumentReactivated {
        instrument: InstrumentId,
    },
    RiskStopped {
        reason: StopReason,
        pnl: Decimal,
    },
    ConnectionLost {
        reason: String,
        attempt: u32,
    },
    SessionEnded {
        exit: EngineExit,
    },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Connected { login_id, balance } => {
                write!(f, "connected as {login_id} (balance {balance})")
            }
            Notification::TradeOpened { contract, .. } => write!(f, "opened {contract}"),
            Notification::TradeSettled { trade, pnl } => write!(
                f,
                "settled #{} {} profit={} session P/L={}",
                trade.contract.id, trade.outcome, trade.profit, pnl
            ),
            Notification::TradeRejected {
                instrument,
                code,
                message,
            } => write!(f, "[{instrument}] rejected {code}: {message}"),
            Notification::TradeAbandoned {
                instrument,
                contract_id,
            } => write!(f, "[{instrument}] abandoned trade (contract {contract_id:?})"),
            Notification::InstrumentSuspended {
                instrument,
                consecutive_losses,
            } => write!(f, "[{instrument}] suspended after {consecutive_losses} losses"),
            Notification::InstrumentReactivated { instrument } => {
                write!(f, "[{instrument}] reactivated")
            }
            Notification::RiskStopped { reason, pnl } => write!(f, "stopped: {reason} (P/L {pnl})"),
            Notification::ConnectionLost { reason, attempt } => {
                write!(f, "connection lost: {reason} (reconnect attempt {attempt})")
            }
            Notification::SessionEnded { exit } => write!(f, "session ended: {exit}"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send {
    fn notify(&self, notification: &Notification);
}

/// Writes every notification to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::RiskStopped { .. }
            | Notification::ConnectionLost { .. }
            | Notification::TradeRejected { .. }
            | Notification::TradeAbandoned { .. }
            | Notification::InstrumentSuspended { .. } => {
                warn!(event = %notification, "Notification")
            }
            Notification::SessionEnded { exit } if exit.is_fatal() => {
                error!(event = %notification, "Notification")
            }
            _ => info!(event = %notification, "Notification"),
        }
    }
}

/// Forwards notifications to an unbounded channel (dashboard, tests).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: &Notification) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(notification.clone());
    }
}

/// Delivers to several sinks in order.
#[derive(Default)]
pub struct FanoutNotifier {
    sinks: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Notifier + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notification: &Notification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}
