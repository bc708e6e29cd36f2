//! Mock venue for integration testing.
//!
//! Implements `Connector` in-memory: every request is recorded and answered
//! immediately with the JSON the real venue would send, pushed onto the
//! engine's inbound channel. Outcomes, rejections, and connection faults
//! are scripted from test code.

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use differ::error::EngineError;
use differ::venue::protocol::Request;
use differ::venue::{ConnId, Connection, Connector, Inbound};

/// Digits that make the markov strategy bet against 3.
pub const SIGNAL_DIGITS: [u8; 7] = [1, 2, 1, 2, 1, 3, 1];

/// A scripted settlement.
#[derive(Debug, Clone, Copy)]
pub struct Settlement {
    pub won: bool,
    /// `None` forfeits the stake.
    pub profit: Option<f64>,
}

impl Settlement {
    pub fn won(profit: f64) -> Self {
        Self {
            won: true,
            profit: Some(profit),
        }
    }

    pub fn lost() -> Self {
        Self {
            won: false,
            profit: None,
        }
    }
}

#[derive(Debug, Default)]
struct VenueState {
    requests: Vec<(ConnId, Value)>,
    connects: u32,
    closes: u32,
    next_contract: u64,
    /// Outcome and price per bought contract, assigned at buy time.
    contracts: Vec<(u64, Settlement, f64)>,
    outcomes: VecDeque<Settlement>,
    default_outcome: Option<Settlement>,
    buy_errors: VecDeque<(String, String)>,
    auth_error: Option<(String, String)>,
    refuse_connects: bool,
    drop_after_buy: Option<usize>,
    buys: usize,
}

/// Shared handle: the engine owns the connector, the test keeps a clone.
#[derive(Clone)]
pub struct MockVenue {
    state: Arc<Mutex<VenueState>>,
    events: mpsc::UnboundedSender<Inbound>,
}

impl MockVenue {
    pub fn new(events: mpsc::UnboundedSender<Inbound>) -> Self {
        let state = VenueState {
            next_contract: 1000,
            ..VenueState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            events,
        }
    }

    // -- scripting ------------------------------------------------------------

    /// Settle contracts in this order; `fallback` once the queue is empty.
    pub fn with_outcomes(self, outcomes: Vec<Settlement>, fallback: Settlement) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            s.outcomes = outcomes.into();
            s.default_outcome = Some(fallback);
        }
        self
    }

    /// Reject the next buy with a venue error.
    pub fn reject_next_buy(self, code: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .buy_errors
            .push_back((code.to_string(), message.to_string()));
        self
    }

    pub fn reject_token(self, code: &str) -> Self {
        self.state.lock().unwrap().auth_error = Some((code.to_string(), "token rejected".to_string()));
        self
    }

    /// Every connection attempt fails before opening.
    pub fn refuse_connections(self) -> Self {
        self.state.lock().unwrap().refuse_connects = true;
        self
    }

    /// Close the live connection right after answering the n-th buy.
    pub fn drop_after_buy(self, n: usize) -> Self {
        self.state.lock().unwrap().drop_after_buy = Some(n);
        self
    }

    // -- inspection -----------------------------------------------------------

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    /// Connections the engine closed itself.
    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn requests(&self, key: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(_, v)| v.get(key).is_some())
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Stakes of every proposal, in order.
    pub fn proposed_stakes(&self) -> Vec<f64> {
        self.requests("proposal")
            .iter()
            .filter_map(|v| v["amount"].as_f64())
            .collect()
    }

    // -- wire -----------------------------------------------------------------

    fn push(&self, event: Inbound) {
        let _ = self.events.send(event);
    }

    fn reply(&self, conn: ConnId, body: Value) {
        self.push(Inbound::Message {
            conn,
            text: body.to_string(),
        });
    }

    fn answer(&self, conn: ConnId, req_id: u64, request: &Value) {
        let mut s = self.state.lock().unwrap();
        if request.get("authorize").is_some() {
            let body = match &s.auth_error {
                Some((code, message)) => json!({
                    "msg_type": "authorize", "req_id": req_id,
                    "error": {"code": code, "message": message}
                }),
                None => json!({
                    "msg_type": "authorize", "req_id": req_id,
                    "authorize": {"balance": 1000, "currency": "USD", "loginid": "VRTC100"}
                }),
            };
            drop(s);
            self.reply(conn, body);
        } else if let Some(symbol) = request.get("ticks_history").and_then(Value::as_str) {
            drop(s);
            let prices: Vec<f64> = SIGNAL_DIGITS
                .iter()
                .map(|&d| 100.0 + f64::from(d) / 100.0)
                .collect();
            let times: Vec<i64> = (1..=SIGNAL_DIGITS.len() as i64).collect();
            self.reply(
                conn,
                json!({
                    "msg_type": "history",
                    "echo_req": {"ticks_history": symbol, "req_id": req_id},
                    "history": {"prices": prices, "times": times}
                }),
            );
        } else if request.get("proposal").is_some() {
            drop(s);
            self.reply(
                conn,
                json!({
                    "msg_type": "proposal", "req_id": req_id,
                    "proposal": {"id": format!("prop-{req_id}"), "ask_price": request["amount"], "payout": 1.9}
                }),
            );
        } else if request.get("buy").is_some() {
            let rejection = s.buy_errors.pop_front();
            if let Some((code, message)) = rejection {
                drop(s);
                self.reply(
                    conn,
                    json!({
                        "msg_type": "buy", "req_id": req_id,
                        "error": {"code": code, "message": message}
                    }),
                );
                return;
            }
            s.next_contract += 1;
            s.buys += 1;
            let contract_id = s.next_contract;
            let fallback = s.default_outcome.unwrap_or(Settlement::won(0.0));
            let outcome = s.outcomes.pop_front().unwrap_or(fallback);
            let price = request["price"].as_f64().unwrap_or_default();
            s.contracts.push((contract_id, outcome, price));
            let drop_now = s.drop_after_buy == Some(s.buys);
            drop(s);
            self.reply(
                conn,
                json!({
                    "msg_type": "buy", "req_id": req_id,
                    "buy": {"contract_id": contract_id, "buy_price": request["price"], "balance_after": 999}
                }),
            );
            if drop_now {
                self.push(Inbound::Closed {
                    conn,
                    reason: "venue reset".to_string(),
                });
            }
        } else if let Some(contract_id) = request.get("proposal_open_contract").and(request["contract_id"].as_u64()) {
            let contract = s
                .contracts
                .iter()
                .find(|(id, _, _)| *id == contract_id)
                .map(|(_, outcome, price)| (*outcome, *price));
            drop(s);
            let Some((outcome, price)) = contract else { return };
            self.reply(
                conn,
                json!({
                    "msg_type": "proposal_open_contract", "req_id": req_id,
                    "subscription": {"id": format!("poc-{contract_id}")},
                    "proposal_open_contract": {
                        "contract_id": contract_id,
                        "is_sold": 1,
                        "status": if outcome.won { "won" } else { "lost" },
                        "profit": outcome.profit.unwrap_or(-price)
                    }
                }),
            );
        } else if let Some(id) = request.get("forget") {
            drop(s);
            self.reply(conn, json!({"msg_type": "forget", "req_id": req_id, "forget": 1, "echo_req": {"forget": id}}));
        } else if request.get("ping").is_some() {
            drop(s);
            self.reply(conn, json!({"msg_type": "ping", "req_id": req_id, "ping": "pong"}));
        }
    }
}

impl Connector for MockVenue {
    fn connect(&mut self, conn: ConnId) -> Result<Box<dyn Connection>, EngineError> {
        let refuse = {
            let mut s = self.state.lock().unwrap();
            s.connects += 1;
            s.refuse_connects
        };
        if refuse {
            self.push(Inbound::Closed {
                conn,
                reason: "connection refused".to_string(),
            });
        } else {
            self.push(Inbound::Opened { conn });
        }
        Ok(Box::new(MockConnection {
            conn,
            venue: self.clone(),
        }))
    }
}

struct MockConnection {
    conn: ConnId,
    venue: MockVenue,
}

impl Connection for MockConnection {
    fn send(&mut self, req_id: u64, request: &Request) -> Result<(), EngineError> {
        let body = request.to_json(req_id);
        self.venue
            .state
            .lock()
            .unwrap()
            .requests
            .push((self.conn, body.clone()));
        self.venue.answer(self.conn, req_id, &body);
        Ok(())
    }

    fn close(&mut self) {
        self.venue.state.lock().unwrap().closes += 1;
    }
}
