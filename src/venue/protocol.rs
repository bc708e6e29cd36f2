//! JSON wire protocol.
//!
//! Every request carries a numeric `req_id` that the venue echoes back.
//! Streamed messages (ticks, contract updates) also carry a
//! `subscription.id` usable with `forget`.

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ProtocolError, VenueError};
use crate::types::{Digit, InstrumentId, Outcome, Tick};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Contract parameters shared by every proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSpec {
    pub contract_type: String,
    pub currency: String,
    pub duration_ticks: u32,
}

#[derive(Debug)]
pub enum Request {
    Authorize(SecretString),
    TicksHistory {
        instrument: InstrumentId,
        count: u32,
    },
    SubscribeTicks(InstrumentId),
    Proposal {
        instrument: InstrumentId,
        amount: Decimal,
        barrier: Digit,
        spec: ContractSpec,
    },
    Buy {
        proposal_id: String,
        price: Decimal,
    },
    SubscribeContract(u64),
    Forget(String),
    Ping,
}

impl Request {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Authorize(_) => "authorize",
            Request::TicksHistory { .. } => "ticks_history",
            Request::SubscribeTicks(_) => "ticks",
            Request::Proposal { .. } => "proposal",
            Request::Buy { .. } => "buy",
            Request::SubscribeContract(_) => "proposal_open_contract",
            Request::Forget(_) => "forget",
            Request::Ping => "ping",
        }
    }

    pub fn to_json(&self, req_id: u64) -> Value {
        let mut body = match self {
            Request::Authorize(token) => json!({ "authorize": token.expose_secret() }),
            Request::TicksHistory { instrument, count } => json!({
                "ticks_history": instrument.as_str(),
                "count": count,
                "end": "latest",
                "style": "ticks",
            }),
            Request::SubscribeTicks(instrument) => json!({
                "ticks": instrument.as_str(),
                "subscribe": 1,
            }),
            Request::Proposal {
                instrument,
                amount,
                barrier,
                spec,
            } => json!({
                "proposal": 1,
                "amount": amount,
                "basis": "stake",
                "contract_type": spec.contract_type,
                "currency": spec.currency,
                "duration": spec.duration_ticks,
                "duration_unit": "t",
                "symbol": instrument.as_str(),
                "barrier": barrier.to_string(),
            }),
            Request::Buy { proposal_id, price } => json!({
                "buy": proposal_id,
                "price": price,
            }),
            Request::SubscribeContract(contract_id) => json!({
                "proposal_open_contract": 1,
                "contract_id": contract_id,
                "subscribe": 1,
            }),
            Request::Forget(subscription_id) => json!({ "forget": subscription_id }),
            Request::Ping => json!({ "ping": 1 }),
        };
        if let Value::Object(map) = &mut body {
            map.insert("req_id".to_string(), json!(req_id));
        }
        body
    }

    pub fn to_text(&self, req_id: u64) -> String {
        self.to_json(req_id).to_string()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub balance: Decimal,
    pub currency: String,
    pub login_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub id: String,
    pub ask_price: Decimal,
    pub payout: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub contract_id: u64,
    pub buy_price: Decimal,
    pub balance_after: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractUpdate {
    pub contract_id: u64,
    pub is_sold: bool,
    /// `won` / `lost` / `open`.
    pub status: Option<String>,
    pub profit: Option<Decimal>,
    pub exit_tick: Option<f64>,
}

impl ContractUpdate {
    /// Settled result, once sold. Falls back to the sign of the profit
    /// when the status is missing.
    pub fn outcome(&self) -> Option<Outcome> {
        if !self.is_sold {
            return None;
        }
        match self.status.as_deref() {
            Some("won") => Some(Outcome::Won),
            Some("lost") => Some(Outcome::Lost),
            _ => self.profit.map(|p| {
                if p > Decimal::ZERO {
                    Outcome::Won
                } else {
                    Outcome::Lost
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Authorized(Account),
    History {
        instrument: InstrumentId,
        ticks: Vec<Tick>,
    },
    Tick(Tick),
    Proposal(Proposal),
    Bought(Purchase),
    Contract(ContractUpdate),
    Forgotten,
    Pong,
    /// A `msg_type` the engine does not act on.
    Other,
}

/// One decoded venue message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub msg_type: String,
    pub req_id: Option<u64>,
    pub subscription_id: Option<String>,
    pub body: Result<Response, VenueError>,
}

// Raw bodies. Prices arrive as JSON numbers; Decimal parses them exactly.

#[derive(Deserialize)]
struct RawAuthorize {
    balance: Decimal,
    currency: String,
    #[serde(default)]
    loginid: String,
}

#[derive(Deserialize)]
struct RawHistory {
    #[serde(default)]
    prices: Vec<f64>,
    #[serde(default)]
    times: Vec<i64>,
}

#[derive(Deserialize)]
struct RawTick {
    symbol: String,
    quote: f64,
    epoch: i64,
    #[serde(default)]
    pip_size: Option<Value>,
}

#[derive(Deserialize)]
struct RawProposal {
    id: String,
    ask_price: Decimal,
    #[serde(default)]
    payout: Decimal,
}

#[derive(Deserialize)]
struct RawBuy {
    contract_id: u64,
    buy_price: Decimal,
    #[serde(default)]
    balance_after: Option<Decimal>,
}

#[derive(Deserialize)]
struct RawOpenContract {
    contract_id: Option<u64>,
    #[serde(default)]
    is_sold: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    profit: Option<Decimal>,
    #[serde(default)]
    exit_tick: Option<Value>,
}

#[derive(Deserialize)]
struct RawError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Decode one text frame.
pub fn parse(text: &str) -> Result<Envelope, ProtocolError> {
    let root: Value = serde_json::from_str(text)?;
    let msg_type = root
        .get("msg_type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MissingField {
            msg_type: "unknown".to_string(),
            field: "msg_type",
        })?
        .to_string();
    let req_id = root
        .get("req_id")
        .or_else(|| root.get("echo_req").and_then(|e| e.get("req_id")))
        .and_then(Value::as_u64);
    let subscription_id = root
        .get("subscription")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(err) = root.get("error") {
        let raw: RawError = serde_json::from_value(err.clone())?;
        return Ok(Envelope {
            msg_type,
            req_id,
            subscription_id,
            body: Err(VenueError::new(raw.code, raw.message)),
        });
    }

    let body = parse_body(&msg_type, &root)?;
    Ok(Envelope {
        msg_type,
        req_id,
        subscription_id,
        body: Ok(body),
    })
}

fn field<'a>(root: &'a Value, msg_type: &str, name: &'static str) -> Result<&'a Value, ProtocolError> {
    root.get(name).ok_or_else(|| ProtocolError::MissingField {
        msg_type: msg_type.to_string(),
        field: name,
    })
}

fn parse_body(msg_type: &str, root: &Value) -> Result<Response, ProtocolError> {
    let response = match msg_type {
        "authorize" => {
            let raw: RawAuthorize = serde_json::from_value(field(root, msg_type, "authorize")?.clone())?;
            Response::Authorized(Account {
                balance: raw.balance,
                currency: raw.currency,
                login_id: raw.loginid,
            })
        }
        "history" => {
            let instrument = root
                .get("echo_req")
                .and_then(|e| e.get("ticks_history"))
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::MissingField {
                    msg_type: msg_type.to_string(),
                    field: "echo_req.ticks_history",
                })?;
            let raw: RawHistory = serde_json::from_value(field(root, msg_type, "history")?.clone())?;
            if raw.prices.len() != raw.times.len() {
                return Err(ProtocolError::InvalidValue {
                    field: "history",
                    value: format!("{} prices vs {} times", raw.prices.len(), raw.times.len()),
                });
            }
            let pip_size = root.get("pip_size").and_then(pip_size_of);
            let instrument = InstrumentId::new(instrument);
            let ticks = raw
                .prices
                .into_iter()
                .zip(raw.times)
                .map(|(price, epoch)| Tick {
                    instrument: instrument.clone(),
                    price,
                    epoch,
                    pip_size,
                })
                .collect();
            Response::History { instrument, ticks }
        }
        "tick" => {
            let raw: RawTick = serde_json::from_value(field(root, msg_type, "tick")?.clone())?;
            Response::Tick(Tick {
                instrument: InstrumentId::new(raw.symbol),
                price: raw.quote,
                epoch: raw.epoch,
                pip_size: raw.pip_size.as_ref().and_then(pip_size_of),
            })
        }
        "proposal" => {
            let raw: RawProposal = serde_json::from_value(field(root, msg_type, "proposal")?.clone())?;
            Response::Proposal(Proposal {
                id: raw.id,
                ask_price: raw.ask_price,
                payout: raw.payout,
            })
        }
        "buy" => {
            let raw: RawBuy = serde_json::from_value(field(root, msg_type, "buy")?.clone())?;
            Response::Bought(Purchase {
                contract_id: raw.contract_id,
                buy_price: raw.buy_price,
                balance_after: raw.balance_after,
            })
        }
        "proposal_open_contract" => {
            let raw: RawOpenContract =
                serde_json::from_value(field(root, msg_type, "proposal_open_contract")?.clone())?;
            let contract_id = raw.contract_id.ok_or_else(|| ProtocolError::MissingField {
                msg_type: msg_type.to_string(),
                field: "contract_id",
            })?;
            Response::Contract(ContractUpdate {
                contract_id,
                is_sold: raw.is_sold.as_ref().map_or(false, truthy),
                status: raw.status,
                profit: raw.profit,
                exit_tick: raw.exit_tick.as_ref().and_then(number_of),
            })
        }
        "forget" => Response::Forgotten,
        "ping" => Response::Pong,
        _ => Response::Other,
    };
    Ok(response)
}

/// Pip size is reported either as a decimal count (`2`) or as the pip
/// itself (`0.01`).
fn pip_size_of(v: &Value) -> Option<u32> {
    let n = number_of(v)?;
    if n >= 1.0 || n == 0.0 {
        return Some(n as u32);
    }
    Some((-n.log10()).round() as u32)
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|i| i != 0),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec() -> ContractSpec {
        ContractSpec {
            contract_type: "DIGITDIFF".to_string(),
            currency: "USD".to_string(),
            duration_ticks: 1,
        }
    }

    // ---- requests ----------------------------------------------------------

    #[test]
    fn test_proposal_request_shape() {
        let req = Request::Proposal {
            instrument: "R_100".into(),
            amount: dec!(0.35),
            barrier: Digit::new(7).unwrap(),
            spec: spec(),
        };
        let v = req.to_json(12);
        assert_eq!(v["proposal"], 1);
        assert_eq!(v["basis"], "stake");
        assert_eq!(v["contract_type"], "DIGITDIFF");
        assert_eq!(v["duration"], 1);
        assert_eq!(v["duration_unit"], "t");
        assert_eq!(v["symbol"], "R_100");
        assert_eq!(v["barrier"], "7");
        assert_eq!(v["amount"].as_f64(), Some(0.35));
        assert_eq!(v["req_id"], 12);
    }

    #[test]
    fn test_history_and_subscribe_requests() {
        let v = Request::TicksHistory { instrument: "R_50".into(), count: 500 }.to_json(1);
        assert_eq!(v["ticks_history"], "R_50");
        assert_eq!(v["count"], 500);
        assert_eq!(v["end"], "latest");
        assert_eq!(v["style"], "ticks");

        let v = Request::SubscribeTicks("R_50".into()).to_json(2);
        assert_eq!(v["ticks"], "R_50");
        assert_eq!(v["subscribe"], 1);

        let v = Request::SubscribeContract(99).to_json(3);
        assert_eq!(v["proposal_open_contract"], 1);
        assert_eq!(v["contract_id"], 99);
    }

    #[test]
    fn test_authorize_exposes_token_only_on_wire() {
        let req = Request::Authorize(SecretString::new("tok-123".to_string()));
        assert!(!format!("{req:?}").contains("tok-123"));
        assert_eq!(req.to_json(1)["authorize"], "tok-123");
    }

    // ---- responses ---------------------------------------------------------

    #[test]
    fn test_parse_tick() {
        let env = parse(
            r#"{"msg_type":"tick","req_id":4,"subscription":{"id":"sub-1"},
                "tick":{"symbol":"R_100","quote":1234.56,"epoch":1700000000,"pip_size":2}}"#,
        )
        .unwrap();
        assert_eq!(env.req_id, Some(4));
        assert_eq!(env.subscription_id.as_deref(), Some("sub-1"));
        match env.body.unwrap() {
            Response::Tick(t) => {
                assert_eq!(t.instrument.as_str(), "R_100");
                assert_eq!(t.pip_size, Some(2));
                assert_eq!(t.last_digit(4), Digit::new(6));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_history() {
        let env = parse(
            r#"{"msg_type":"history","echo_req":{"ticks_history":"R_50","req_id":9},
                "history":{"prices":[10.1,10.2,10.3],"times":[1,2,3]},"pip_size":0.01}"#,
        )
        .unwrap();
        assert_eq!(env.req_id, Some(9));
        match env.body.unwrap() {
            Response::History { instrument, ticks } => {
                assert_eq!(instrument.as_str(), "R_50");
                assert_eq!(ticks.len(), 3);
                assert_eq!(ticks[2].epoch, 3);
                assert_eq!(ticks[0].pip_size, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_history_length_mismatch() {
        let err = parse(
            r#"{"msg_type":"history","echo_req":{"ticks_history":"R_50"},
                "history":{"prices":[1.0],"times":[1,2]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: "history", .. }));
    }

    #[test]
    fn test_parse_authorize_buy_proposal() {
        let env = parse(
            r#"{"msg_type":"authorize","req_id":1,
                "authorize":{"balance":10000.5,"currency":"USD","loginid":"VRTC1"}}"#,
        )
        .unwrap();
        assert_eq!(
            env.body.unwrap(),
            Response::Authorized(Account {
                balance: dec!(10000.5),
                currency: "USD".to_string(),
                login_id: "VRTC1".to_string(),
            })
        );

        let env = parse(r#"{"msg_type":"proposal","req_id":2,"proposal":{"id":"p-9","ask_price":0.35,"payout":0.37}}"#)
            .unwrap();
        assert!(matches!(env.body, Ok(Response::Proposal(Proposal { ref id, .. })) if id == "p-9"));

        let env = parse(r#"{"msg_type":"buy","req_id":3,"buy":{"contract_id":555,"buy_price":0.35,"balance_after":9999.65}}"#)
            .unwrap();
        match env.body.unwrap() {
            Response::Bought(p) => {
                assert_eq!(p.contract_id, 555);
                assert_eq!(p.buy_price, dec!(0.35));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_open_contract() {
        let env = parse(
            r#"{"msg_type":"proposal_open_contract","subscription":{"id":"c-1"},
                "proposal_open_contract":{"contract_id":555,"is_sold":1,"status":"lost","profit":-0.35,"exit_tick":"1234.57"}}"#,
        )
        .unwrap();
        match env.body.unwrap() {
            Response::Contract(c) => {
                assert!(c.is_sold);
                assert_eq!(c.outcome(), Some(Outcome::Lost));
                assert_eq!(c.profit, Some(dec!(-0.35)));
                assert_eq!(c.exit_tick, Some(1234.57));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_open_contract_not_sold_has_no_outcome() {
        let update = ContractUpdate {
            contract_id: 1,
            is_sold: false,
            status: Some("open".to_string()),
            profit: Some(dec!(0.01)),
            exit_tick: None,
        };
        assert_eq!(update.outcome(), None);

        let sold = ContractUpdate { is_sold: true, status: None, ..update };
        assert_eq!(sold.outcome(), Some(Outcome::Won));
    }

    #[test]
    fn test_parse_error_envelope() {
        let env = parse(
            r#"{"msg_type":"buy","req_id":7,"error":{"code":"RateLimit","message":"slow down"}}"#,
        )
        .unwrap();
        assert_eq!(env.req_id, Some(7));
        let err = env.body.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::RateLimited);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(parse(r#"{"foo":1}"#), Err(ProtocolError::MissingField { field: "msg_type", .. })));
        assert!(parse(r#"{"msg_type":"tick"}"#).is_err());
    }

    #[test]
    fn test_unknown_msg_type_is_other() {
        let env = parse(r#"{"msg_type":"website_status","website_status":{}}"#).unwrap();
        assert_eq!(env.body, Ok(Response::Other));
    }
}
