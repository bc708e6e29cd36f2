//! Trade executor.
//!
//! Turns accepted intents into venue requests: price a proposal, buy it,
//! follow the contract until it settles, and drop stream subscriptions that
//! are no longer needed. Every request goes through the session so its
//! purpose is remembered against the request id.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::VenueConfig;
use crate::error::EngineError;
use crate::types::{InstrumentId, Intent};
use crate::venue::protocol::{ContractSpec, Proposal, Request};
use crate::venue::session::{Pending, SessionManager};

pub struct Executor {
    spec: ContractSpec,
}

impl Executor {
    pub fn new(spec: ContractSpec) -> Self {
        Self { spec }
    }

    pub fn from_config(venue: &VenueConfig) -> Self {
        Self::new(ContractSpec {
            contract_type: venue.contract_type.clone(),
            currency: venue.currency.clone(),
            duration_ticks: venue.duration_ticks,
        })
    }

    pub fn spec(&self) -> &ContractSpec {
        &self.spec
    }

    /// Ask the venue to price a differ contract against the intent's digit.
    pub fn propose(
        &self,
        session: &mut SessionManager,
        intent: &Intent,
        stake: Decimal,
    ) -> Result<u64, EngineError> {
        let req_id = session.send(
            Pending::Proposal(intent.instrument.clone()),
            Request::Proposal {
                instrument: intent.instrument.clone(),
                amount: stake,
                barrier: intent.target_digit,
                spec: self.spec.clone(),
            },
        )?;
        info!(
            instrument = %intent.instrument,
            digit = intent.target_digit.value(),
            stake = %stake,
            confidence = format!("{:.1}%", intent.confidence * 100.0),
            strategy = intent.strategy,
            req_id,
            "Proposal requested"
        );
        Ok(req_id)
    }

    /// Buy a priced proposal at no more than its ask price.
    pub fn buy(
        &self,
        session: &mut SessionManager,
        instrument: &InstrumentId,
        proposal: &Proposal,
    ) -> Result<u64, EngineError> {
        let req_id = session.send(
            Pending::Buy(instrument.clone()),
            Request::Buy {
                proposal_id: proposal.id.clone(),
                price: proposal.ask_price,
            },
        )?;
        debug!(
            %instrument,
            proposal_id = %proposal.id,
            ask = %proposal.ask_price,
            payout = %proposal.payout,
            req_id,
            "Buy sent"
        );
        Ok(req_id)
    }

    /// Subscribe to contract updates until it is sold.
    pub fn follow(
        &self,
        session: &mut SessionManager,
        instrument: &InstrumentId,
        contract_id: u64,
    ) -> Result<u64, EngineError> {
        let req_id = session.send(
            Pending::Contract(instrument.clone()),
            Request::SubscribeContract(contract_id),
        )?;
        debug!(%instrument, contract_id, req_id, "Following contract");
        Ok(req_id)
    }

    pub fn forget(&self, session: &mut SessionManager, subscription_id: &str) -> Result<u64, EngineError> {
        session.send(Pending::Forget, Request::Forget(subscription_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::types::Digit;
    use crate::venue::testing::RecordingConnector;
    use rust_decimal_macros::dec;
    use secrecy::SecretString;

    fn executor() -> Executor {
        Executor::new(ContractSpec {
            contract_type: "DIGITDIFF".to_string(),
            currency: "USD".to_string(),
            duration_ticks: 1,
        })
    }

    fn connected() -> (SessionManager, RecordingConnector) {
        let connector = RecordingConnector::default();
        let mut session = SessionManager::new(
            SessionConfig::default(),
            SecretString::new("tok".to_string()),
            Box::new(connector.clone()),
        );
        let conn = session.connect().unwrap();
        session.on_opened(conn).unwrap();
        connector.wire.clear();
        (session, connector)
    }

    fn intent() -> Intent {
        Intent {
            instrument: "R_100".into(),
            target_digit: Digit::new(4).unwrap(),
            confidence: 0.95,
            strategy: "markov",
        }
    }

    #[test]
    fn test_propose_records_purpose() {
        let (mut session, rec) = connected();
        let req_id = executor().propose(&mut session, &intent(), dec!(0.35)).unwrap();

        assert_eq!(session.pending(req_id), Some(&Pending::Proposal("R_100".into())));
        let sent = rec.wire.last_with_key("proposal").unwrap();
        assert_eq!(sent["barrier"], "4");
        assert_eq!(sent["symbol"], "R_100");
        assert_eq!(sent["currency"], "USD");
        assert_eq!(sent["req_id"], req_id);
    }

    #[test]
    fn test_buy_uses_ask_price() {
        let (mut session, rec) = connected();
        let proposal = Proposal {
            id: "p-1".to_string(),
            ask_price: dec!(0.35),
            payout: dec!(0.38),
        };
        let req_id = executor().buy(&mut session, &"R_100".into(), &proposal).unwrap();
        assert_eq!(session.pending(req_id), Some(&Pending::Buy("R_100".into())));
        let sent = rec.wire.last_with_key("buy").unwrap();
        assert_eq!(sent["buy"], "p-1");
        assert_eq!(sent["price"].as_f64(), Some(0.35));
    }

    #[test]
    fn test_follow_and_forget() {
        let (mut session, rec) = connected();
        let ex = executor();
        ex.follow(&mut session, &"R_50".into(), 991).unwrap();
        ex.forget(&mut session, "sub-9").unwrap();
        assert_eq!(rec.wire.last_with_key("proposal_open_contract").unwrap()["contract_id"], 991);
        assert_eq!(rec.wire.last_with_key("forget").unwrap()["forget"], "sub-9");
    }

    #[test]
    fn test_requests_fail_when_disconnected() {
        let (mut session, _) = connected();
        session.shutdown();
        let err = executor().propose(&mut session, &intent(), dec!(1)).unwrap_err();
        assert!(matches!(err, EngineError::NotConnected));
    }
}
