//! Tiered martingale stake schedule.
//!
//! Tier 1 multiplies the stake after every loss until the next stake would
//! exceed `max_stake`. Deeper tiers hold a fixed stake for a fixed number of
//! losses before escalating. Running past the deepest tier raises the
//! stop-loss-stake flag, which the risk governor turns into a session stop.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::config::StakeConfig;
use crate::types::Outcome;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Martingale tier, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tier(u8);

impl Tier {
    pub const FIRST: Tier = Tier(1);

    pub fn number(self) -> u8 {
        self.0
    }

    fn next(self) -> Tier {
        Tier(self.0.saturating_add(1))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.0)
    }
}

/// Fixed-stake tier (2 and deeper).
#[derive(Debug, Clone, PartialEq)]
pub struct FixedTier {
    pub stake: Decimal,
    pub max_losses: u32,
}

/// Transition table built from `[stake]` configuration.
#[derive(Debug, Clone)]
pub struct StakeSchedule {
    base: Decimal,
    multiplier: Decimal,
    /// Tier-1 escalation bound.
    bound: Option<Decimal>,
    /// Index 0 is tier 2.
    fixed: Vec<FixedTier>,
}

impl StakeSchedule {
    pub fn new(base: Decimal, multiplier: Decimal, bound: Option<Decimal>, fixed: Vec<FixedTier>) -> Self {
        Self {
            base,
            multiplier,
            bound,
            fixed,
        }
    }

    pub fn from_config(config: &StakeConfig) -> Self {
        Self::new(
            config.base,
            config.multiplier,
            config.max_stake,
            config
                .tiers
                .iter()
                .map(|t| FixedTier {
                    stake: t.stake,
                    max_losses: t.max_losses,
                })
                .collect(),
        )
    }

    pub fn base(&self) -> Decimal {
        self.base
    }

    /// Number of tiers including tier 1.
    pub fn depth(&self) -> usize {
        self.fixed.len() + 1
    }

    fn fixed_tier(&self, tier: Tier) -> Option<&FixedTier> {
        (tier.0 as usize)
            .checked_sub(2)
            .and_then(|i| self.fixed.get(i))
    }

    /// Next tier-1 stake after a loss: ceil(stake × multiplier) to cents.
    pub fn escalate(&self, stake: Decimal) -> Decimal {
        (stake * self.multiplier).round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// What an outcome did to the stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeStep {
    Reset,
    Escalated,
    Held,
    AdvancedTier(Tier),
    Exhausted,
}

/// Per-instrument stake state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeController {
    stake: Decimal,
    tier: Tier,
    losses_at_tier: u32,
    stop_loss_stake: bool,
}

impl StakeController {
    pub fn new(schedule: &StakeSchedule) -> Self {
        Self {
            stake: schedule.base,
            tier: Tier::FIRST,
            losses_at_tier: 0,
            stop_loss_stake: false,
        }
    }

    pub fn stake(&self) -> Decimal {
        self.stake
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn losses_at_tier(&self) -> u32 {
        self.losses_at_tier
    }

    /// Set once the deepest tier is exhausted without a win.
    pub fn stop_loss_stake(&self) -> bool {
        self.stop_loss_stake
    }

    pub fn on_outcome(&mut self, schedule: &StakeSchedule, outcome: Outcome) -> StakeStep {
        let step = match outcome {
            Outcome::Won => {
                self.stake = schedule.base;
                self.tier = Tier::FIRST;
                self.losses_at_tier = 0;
                self.stop_loss_stake = false;
                StakeStep::Reset
            }
            Outcome::Lost if self.tier == Tier::FIRST => self.lose_at_first_tier(schedule),
            Outcome::Lost => self.lose_at_fixed_tier(schedule),
        };
        debug!(
            stake = %self.stake,
            tier = self.tier.number(),
            losses_at_tier = self.losses_at_tier,
            ?step,
            "Stake updated"
        );
        step
    }

    fn lose_at_first_tier(&mut self, schedule: &StakeSchedule) -> StakeStep {
        let next = schedule.escalate(self.stake);
        match schedule.bound {
            Some(bound) if next > bound => self.enter(schedule, self.tier.next()),
            _ => {
                self.stake = next;
                self.losses_at_tier += 1;
                StakeStep::Escalated
            }
        }
    }

    fn lose_at_fixed_tier(&mut self, schedule: &StakeSchedule) -> StakeStep {
        self.losses_at_tier += 1;
        let limit = schedule.fixed_tier(self.tier).map_or(0, |t| t.max_losses);
        if self.losses_at_tier < limit {
            return StakeStep::Held;
        }
        self.enter(schedule, self.tier.next())
    }

    fn enter(&mut self, schedule: &StakeSchedule, tier: Tier) -> StakeStep {
        match schedule.fixed_tier(tier) {
            Some(fixed) => {
                self.tier = tier;
                self.stake = fixed.stake;
                self.losses_at_tier = 0;
                StakeStep::AdvancedTier(tier)
            }
            None => {
                self.stop_loss_stake = true;
                StakeStep::Exhausted
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
    use rust_decimal_macros::dec;

    fn tier_one_only(base: Decimal, mult: Decimal, bound: Option<Decimal>) -> StakeSchedule {
        StakeSchedule::new(base, mult, bound, Vec::new())
    }

    fn two_tier() -> StakeSchedule {
        StakeSchedule::new(
            dec!(0.35),
            dec!(2),
            Some(dec!(5.6)),
            vec![FixedTier { stake: dec!(10), max_losses: 2 }],
        )
    }

    fn run(schedule: &StakeSchedule, outcomes: &[Outcome]) -> Vec<Decimal> {
        let mut ctl = StakeController::new(schedule);
        let mut stakes = vec![ctl.stake()];
        for &o in outcomes {
            ctl.on_outcome(schedule, o);
            stakes.push(ctl.stake());
        }
        stakes
    }

    #[test]
    fn test_loss_loss_win_sequence() {
        let schedule = tier_one_only(dec!(1), dec!(2), None);
        let stakes = run(&schedule, &[Outcome::Lost, Outcome::Lost, Outcome::Won]);
        assert_eq!(stakes, vec![dec!(1), dec!(2), dec!(4), dec!(1)]);
    }

    #[test]
    fn test_escalation_rounds_up_to_cents() {
        let schedule = tier_one_only(dec!(0.35), dec!(2.1), None);
        // 0.35 × 2.1 = 0.735 → 0.74
        assert_eq!(schedule.escalate(dec!(0.35)), dec!(0.74));
        assert_eq!(schedule.escalate(dec!(1.00)), dec!(2.10));
    }

    #[test]
    fn test_advances_to_tier_two_past_bound() {
        let schedule = two_tier();
        let mut ctl = StakeController::new(&schedule);
        // 0.35 → 0.7 → 1.4 → 2.8 → 5.6 (== bound, stays tier 1)
        for _ in 0..4 {
            assert_eq!(ctl.on_outcome(&schedule, Outcome::Lost), StakeStep::Escalated);
        }
        assert_eq!(ctl.stake(), dec!(5.6));
        assert_eq!(ctl.tier(), Tier::FIRST);

        // 11.2 > 5.6 → tier 2 fixed stake
        assert_eq!(ctl.on_outcome(&schedule, Outcome::Lost), StakeStep::AdvancedTier(Tier(2)));
        assert_eq!(ctl.stake(), dec!(10));
        assert_eq!(ctl.losses_at_tier(), 0);
    }

    #[test]
    fn test_fixed_tier_holds_then_exhausts() {
        let schedule = two_tier();
        let mut ctl = StakeController::new(&schedule);
        for _ in 0..5 {
            ctl.on_outcome(&schedule, Outcome::Lost);
        }
        assert_eq!(ctl.tier(), Tier(2));
        assert_eq!(ctl.on_outcome(&schedule, Outcome::Lost), StakeStep::Held);
        assert_eq!(ctl.stake(), dec!(10));
        assert!(!ctl.stop_loss_stake());

        assert_eq!(ctl.on_outcome(&schedule, Outcome::Lost), StakeStep::Exhausted);
        assert!(ctl.stop_loss_stake());
        assert_eq!(ctl.stake(), dec!(10));
    }

    #[test]
    fn test_no_tier_two_sets_flag() {
        let schedule = tier_one_only(dec!(1), dec!(2), Some(dec!(3)));
        let mut ctl = StakeController::new(&schedule);
        ctl.on_outcome(&schedule, Outcome::Lost); // 2
        assert_eq!(ctl.on_outcome(&schedule, Outcome::Lost), StakeStep::Exhausted); // 4 > 3
        assert!(ctl.stop_loss_stake());
        assert_eq!(ctl.stake(), dec!(2));
    }

    #[test]
    fn test_win_resets_everything() {
        let schedule = two_tier();
        let mut ctl = StakeController::new(&schedule);
        for _ in 0..6 {
            ctl.on_outcome(&schedule, Outcome::Lost);
        }
        assert_eq!(ctl.on_outcome(&schedule, Outcome::Won), StakeStep::Reset);
        assert_eq!(ctl, StakeController::new(&schedule));
    }

    #[test]
    fn test_stake_non_decreasing_within_streak() {
        let schedule = StakeSchedule::new(
            dec!(0.5),
            dec!(1.5),
            Some(dec!(4)),
            vec![
                FixedTier { stake: dec!(4), max_losses: 3 },
                FixedTier { stake: dec!(8), max_losses: 2 },
            ],
        );
        let stakes = run(&schedule, &[Outcome::Lost; 12]);
        assert!(stakes.windows(2).all(|w| w[1] >= w[0]), "{stakes:?}");
    }

    #[test]
    fn test_deterministic() {
        let schedule = two_tier();
        let seq = [
            Outcome::Lost,
            Outcome::Won,
            Outcome::Lost,
            Outcome::Lost,
            Outcome::Lost,
            Outcome::Lost,
            Outcome::Lost,
            Outcome::Won,
        ];
        assert_eq!(run(&schedule, &seq), run(&schedule, &seq));
    }

    #[test]
    fn test_from_config() {
        let cfg = crate::config::tests::sample_config();
        let schedule = StakeSchedule::from_config(&cfg.stake);
        assert_eq!(schedule.base(), dec!(0.35));
        assert_eq!(schedule.depth(), 2);
    }
}
