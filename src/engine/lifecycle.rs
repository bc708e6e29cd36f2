//! Per-instrument trade lifecycle.
//!
//! `Idle → Signaled → Submitted → Settled → Idle`. A rejected proposal or
//! buy goes straight back to `Idle` with no outcome.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineError;
use crate::types::{Contract, ContractStatus, InstrumentId, Intent, Outcome, SettledTrade};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    /// Proposal requested; `proposal_id` is set once the buy went out.
    Signaled {
        intent: Intent,
        stake: Decimal,
        proposal_id: Option<String>,
        signaled_at: DateTime<Utc>,
    },
    Submitted {
        contract: Contract,
        /// Contract re-subscriptions issued by the watchdog.
        resubscribes: u32,
    },
}

/// What the settlement watchdog should do.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogAction {
    /// Nothing in flight.
    None,
    /// Buy sent and still unanswered; keep waiting for the confirmation.
    AwaitBuy,
    /// Signaled but never submitted; already reset to idle.
    ResetSignaled(Intent),
    /// Ask for the contract again.
    Resubscribe(u64),
    /// Retries used up; already reset to idle.
    Abandon(Contract),
}

#[derive(Debug, Clone)]
pub struct TradeLifecycle {
    instrument: InstrumentId,
    state: LifecycleState,
}

impl TradeLifecycle {
    pub fn new(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            state: LifecycleState::Idle,
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn name(&self) -> &'static str {
        match self.state {
            LifecycleState::Idle => "idle",
            LifecycleState::Signaled { .. } => "signaled",
            LifecycleState::Submitted { .. } => "submitted",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, LifecycleState::Idle)
    }

    /// Trade in progress: anything but idle.
    pub fn in_progress(&self) -> bool {
        !self.is_idle()
    }

    pub fn contract(&self) -> Option<&Contract> {
        match &self.state {
            LifecycleState::Submitted { contract, .. } => Some(contract),
            _ => None,
        }
    }

    pub fn intent(&self) -> Option<&Intent> {
        match &self.state {
            LifecycleState::Signaled { intent, .. } => Some(intent),
            _ => None,
        }
    }

    fn invalid(&self, to: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            instrument: self.instrument.clone(),
            from: self.name(),
            to,
        }
    }

    /// Accept a signal. Only legal from idle.
    pub fn signal(&mut self, intent: Intent, stake: Decimal, now: DateTime<Utc>) -> Result<(), EngineError> {
        if !self.is_idle() {
            return Err(self.invalid("signaled"));
        }
        self.state = LifecycleState::Signaled {
            intent,
            stake,
            proposal_id: None,
            signaled_at: now,
        };
        Ok(())
    }

    /// Proposal priced; the buy for `proposal_id` is about to go out.
    pub fn on_proposal(&mut self, id: &str) -> Result<(), EngineError> {
        match &mut self.state {
            LifecycleState::Signaled { proposal_id, .. } if proposal_id.is_none() => {
                *proposal_id = Some(id.to_string());
                Ok(())
            }
            _ => Err(self.invalid("signaled")),
        }
    }

    /// Buy confirmed.
    pub fn on_bought(
        &mut self,
        contract_id: u64,
        buy_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Contract, EngineError> {
        let LifecycleState::Signaled { intent, proposal_id: Some(_), .. } = &self.state else {
            return Err(self.invalid("submitted"));
        };
        let contract = Contract {
            id: contract_id,
            instrument: self.instrument.clone(),
            target_digit: intent.target_digit,
            stake: buy_price,
            submitted_at: now,
            status: ContractStatus::Pending,
        };
        self.state = LifecycleState::Submitted {
            contract: contract.clone(),
            resubscribes: 0,
        };
        Ok(contract)
    }

    /// Contract sold. Returns to idle with the outcome.
    pub fn settle(
        &mut self,
        contract_id: u64,
        outcome: Outcome,
        profit: Decimal,
        exit_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<SettledTrade, EngineError> {
        match &self.state {
            LifecycleState::Submitted { contract, .. } if contract.id == contract_id => {}
            _ => return Err(self.invalid("settled")),
        }
        let LifecycleState::Submitted { mut contract, .. } =
            std::mem::replace(&mut self.state, LifecycleState::Idle)
        else {
            return Err(self.invalid("settled"));
        };
        contract.status = ContractStatus::Settled;
        Ok(SettledTrade {
            contract,
            outcome,
            profit,
            exit_value,
            settled_at: now,
        })
    }

    /// Proposal or buy rejected. Returns the abandoned intent.
    pub fn reject(&mut self) -> Result<Intent, EngineError> {
        if !matches!(self.state, LifecycleState::Signaled { .. }) {
            return Err(self.invalid("idle"));
        }
        match std::mem::replace(&mut self.state, LifecycleState::Idle) {
            LifecycleState::Signaled { intent, .. } => Ok(intent),
            _ => Err(self.invalid("idle")),
        }
    }

    /// Drop a signaled-but-unsubmitted trade whose requests died with a
    /// connection.
    pub fn reset_signaled(&mut self) -> Option<Intent> {
        self.reject().ok()
    }

    /// Buy went out for a priced proposal.
    pub fn buy_sent(&self) -> bool {
        matches!(self.state, LifecycleState::Signaled { proposal_id: Some(_), .. })
    }

    /// Settlement watchdog fired. A signaled trade whose buy is still
    /// `buy_outstanding` is never reset: the venue may already hold the
    /// contract.
    pub fn on_watchdog(&mut self, max_resubscribes: u32, buy_outstanding: bool) -> WatchdogAction {
        match &mut self.state {
            LifecycleState::Idle => WatchdogAction::None,
            LifecycleState::Signaled { proposal_id: Some(_), .. } if buy_outstanding => {
                WatchdogAction::AwaitBuy
            }
            LifecycleState::Signaled { .. } => match self.reject() {
                Ok(intent) => WatchdogAction::ResetSignaled(intent),
                Err(_) => WatchdogAction::None,
            },
            LifecycleState::Submitted { contract, resubscribes } => {
                if *resubscribes < max_resubscribes {
                    *resubscribes += 1;
                    return WatchdogAction::Resubscribe(contract.id);
                }
                match std::mem::replace(&mut self.state, LifecycleState::Idle) {
                    LifecycleState::Submitted { contract, .. } => WatchdogAction::Abandon(contract),
                    _ => WatchdogAction::None,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Digit;
    use rust_decimal_macros::dec;

    fn intent() -> Intent {
        Intent {
            instrument: "R_100".into(),
            target_digit: Digit::new(2).unwrap(),
            confidence: 0.92,
            strategy: "markov",
        }
    }

    fn submitted() -> TradeLifecycle {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(0.35), Utc::now()).unwrap();
        lc.on_proposal("prop-1").unwrap();
        lc.on_bought(77, dec!(0.35), Utc::now()).unwrap();
        lc
    }

    #[test]
    fn test_happy_path() {
        let mut lc = submitted();
        assert_eq!(lc.name(), "submitted");
        assert!(lc.in_progress());
        assert_eq!(lc.contract().map(|c| c.id), Some(77));

        let trade = lc.settle(77, Outcome::Won, dec!(0.02), Some(1234.56), Utc::now()).unwrap();
        assert_eq!(trade.contract.status, ContractStatus::Settled);
        assert_eq!(trade.contract.target_digit.value(), 2);
        assert!(lc.is_idle());
    }

    #[test]
    fn test_signal_requires_idle() {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        let err = lc.signal(intent(), dec!(1), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { from: "signaled", .. }));
    }

    #[test]
    fn test_buy_without_proposal_rejected() {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        assert!(lc.on_bought(1, dec!(1), Utc::now()).is_err());
        assert_eq!(lc.name(), "signaled");
    }

    #[test]
    fn test_second_proposal_rejected() {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        lc.on_proposal("a").unwrap();
        assert!(lc.on_proposal("b").is_err());
    }

    #[test]
    fn test_settle_wrong_contract() {
        let mut lc = submitted();
        assert!(lc.settle(78, Outcome::Lost, dec!(-0.35), None, Utc::now()).is_err());
        assert_eq!(lc.name(), "submitted");
    }

    #[test]
    fn test_reject_returns_to_idle() {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        let back = lc.reject().unwrap();
        assert_eq!(back.target_digit.value(), 2);
        assert!(lc.is_idle());
        assert!(lc.reject().is_err());
    }

    #[test]
    fn test_watchdog_resets_signaled() {
        let mut lc = TradeLifecycle::new("R_100".into());
        assert_eq!(lc.on_watchdog(2, false), WatchdogAction::None);
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        assert!(matches!(lc.on_watchdog(2, false), WatchdogAction::ResetSignaled(_)));
        assert!(lc.is_idle());
    }

    #[test]
    fn test_watchdog_waits_for_outstanding_buy() {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        assert!(!lc.buy_sent());
        lc.on_proposal("prop-1").unwrap();
        assert!(lc.buy_sent());

        assert_eq!(lc.on_watchdog(2, true), WatchdogAction::AwaitBuy);
        assert_eq!(lc.name(), "signaled");
        lc.on_bought(88, dec!(1), Utc::now()).unwrap();
        assert_eq!(lc.contract().map(|c| c.id), Some(88));
    }

    #[test]
    fn test_watchdog_resets_when_buy_answered_elsewhere() {
        let mut lc = TradeLifecycle::new("R_100".into());
        lc.signal(intent(), dec!(1), Utc::now()).unwrap();
        lc.on_proposal("prop-1").unwrap();
        assert!(matches!(lc.on_watchdog(2, false), WatchdogAction::ResetSignaled(_)));
        assert!(lc.is_idle());
    }

    #[test]
    fn test_watchdog_resubscribes_then_abandons() {
        let mut lc = submitted();
        assert_eq!(lc.on_watchdog(2, false), WatchdogAction::Resubscribe(77));
        assert_eq!(lc.on_watchdog(2, true), WatchdogAction::Resubscribe(77));
        match lc.on_watchdog(2, false) {
            WatchdogAction::Abandon(c) => assert_eq!(c.id, 77),
            other => panic!("expected abandon, got {other:?}"),
        }
        assert!(lc.is_idle());
    }

    #[test]
    fn test_reset_signaled_leaves_submitted_alone() {
        let mut lc = submitted();
        assert!(lc.reset_signaled().is_none());
        assert_eq!(lc.name(), "submitted");
    }
}
