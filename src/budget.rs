//! Iteration and token budgets, tier selection and escalation
//!
//! The iteration budget comes from task classification; one extension is
//! allowed mid-task when progress is visible. The token policy enforces a
//! soft limit (convergence nudge) and a hard limit (forced synthesis).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TokenBudgetConfig;
use crate::llm::{Tier, Usage};

/// Total runs of a task across the tier ladder.
pub const MAX_ESCALATION_ATTEMPTS: u32 = 3;

/// Progress window consulted by the one-shot extension.
const PROGRESS_WINDOW: u32 = 3;

/// One recorded tier escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub from: Tier,
    pub to: Tier,
    pub reason: String,
}

/// The budget state for one task.
#[derive(Debug, Clone)]
pub struct Budget {
    pub iterations_max: u32,
    pub iterations_used: u32,
    pub tokens_max: u64,
    pub tokens_used: u64,
    pub current_tier: Tier,
    pub escalations: Vec<EscalationRecord>,
}

/// A measurable progress signal, feeding the extension decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    NewFact,
    FileRead,
    SearchSignal,
}

/// Per-iteration record of observed progress.
#[derive(Debug, Default)]
struct ProgressTracker {
    events: Vec<(u32, ProgressKind)>,
}

impl ProgressTracker {
    fn note(&mut self, iteration: u32, kind: ProgressKind) {
        self.events.push((iteration, kind));
    }

    /// Any progress within the last `window` iterations before `now`?
    fn recent(&self, now: u32, window: u32) -> bool {
        self.events
            .iter()
            .any(|(iter, _)| now.saturating_sub(*iter) < window)
    }
}

/// Budget enforcement for one task run.
pub struct BudgetController {
    budget: Budget,
    policy: TokenBudgetConfig,
    /// Ceiling the extension may never exceed.
    global_max_iterations: u32,
    extension_granted: bool,
    soft_nudge_issued: bool,
    progress: ProgressTracker,
}

impl BudgetController {
    pub fn new(
        iterations_max: u32,
        tier: Tier,
        policy: TokenBudgetConfig,
        global_max_iterations: u32,
    ) -> Self {
        let tokens_max = policy.tokens_max;
        BudgetController {
            budget: Budget {
                iterations_max,
                iterations_used: 0,
                tokens_max,
                tokens_used: 0,
                current_tier: tier,
                escalations: Vec::new(),
            },
            policy,
            global_max_iterations,
            extension_granted: false,
            soft_nudge_issued: false,
            progress: ProgressTracker::default(),
        }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn current_tier(&self) -> Tier {
        self.budget.current_tier
    }

    pub fn iterations_used(&self) -> u32 {
        self.budget.iterations_used
    }

    pub fn tokens_used(&self) -> u64 {
        self.budget.tokens_used
    }

    /// Start the next iteration. The `iterations_used ≤ iterations_max`
    /// invariant holds at every tick; callers check exhaustion first.
    pub fn start_iteration(&mut self) -> u32 {
        debug_assert!(self.budget.iterations_used < self.budget.iterations_max);
        self.budget.iterations_used += 1;
        self.budget.iterations_used
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.budget.iterations_used >= self.budget.iterations_max
    }

    /// Fraction of the iteration budget still available.
    pub fn remaining_ratio(&self) -> f64 {
        if self.budget.iterations_max == 0 {
            return 0.0;
        }
        let remaining = self.budget.iterations_max - self.budget.iterations_used;
        remaining as f64 / self.budget.iterations_max as f64
    }

    /// Record token usage from one LLM call.
    pub fn record_usage(&mut self, usage: &Usage) {
        self.budget.tokens_used += usage.total();
    }

    pub fn soft_limit_reached(&self) -> bool {
        self.policy.active
            && self.budget.tokens_used
                >= (self.budget.tokens_max as f64 * self.policy.soft_limit_ratio) as u64
    }

    pub fn hard_limit_reached(&self) -> bool {
        self.policy.active
            && self.budget.tokens_used
                >= (self.budget.tokens_max as f64 * self.policy.hard_limit_ratio) as u64
    }

    pub fn force_synthesis_on_hard_limit(&self) -> bool {
        self.policy.force_synthesis_on_hard_limit
    }

    pub fn restrict_exploration_at_soft_limit(&self) -> bool {
        self.policy.restrict_broad_exploration_at_soft_limit
    }

    /// True exactly once, the first time the soft limit is crossed.
    pub fn take_soft_nudge(&mut self) -> bool {
        if self.soft_limit_reached() && !self.soft_nudge_issued {
            self.soft_nudge_issued = true;
            return true;
        }
        false
    }

    /// Record a progress signal observed in `iteration`.
    pub fn note_progress(&mut self, iteration: u32, kind: ProgressKind) {
        self.progress.note(iteration, kind);
    }

    /// One-shot extension: at ≥ 60% of the budget with progress in the
    /// last 3 iterations, extend by ⌈budget·0.5⌉ capped at the global max.
    /// Returns the new maximum when granted.
    pub fn maybe_extend(&mut self) -> Option<u32> {
        if self.extension_granted {
            return None;
        }
        let used = self.budget.iterations_used;
        let max = self.budget.iterations_max;
        if (used as f64) < (max as f64 * 0.6) {
            return None;
        }
        if !self.progress.recent(used, PROGRESS_WINDOW) {
            return None;
        }
        let extension = (max as f64 * 0.5).ceil() as u32;
        let new_max = (max + extension).min(self.global_max_iterations);
        if new_max <= max {
            return None;
        }
        self.extension_granted = true;
        self.budget.iterations_max = new_max;
        info!(
            "iteration budget extended to {} after progress at iteration {}",
            new_max, used
        );
        Some(new_max)
    }

    /// Record an escalation to the next tier and reset the iteration count
    /// for a clean rerun. Token usage accumulates across tiers. Returns the
    /// new tier, or None when the ladder or the attempt bound is exhausted.
    pub fn escalate(&mut self, reason: impl Into<String>) -> Option<Tier> {
        // attempts = initial run + one per escalation
        if self.budget.escalations.len() as u32 + 1 >= MAX_ESCALATION_ATTEMPTS {
            return None;
        }
        let from = self.budget.current_tier;
        let to = from.next()?;
        self.budget.escalations.push(EscalationRecord {
            from,
            to,
            reason: reason.into(),
        });
        self.budget.current_tier = to;
        self.budget.iterations_used = 0;
        self.extension_granted = false;
        self.soft_nudge_issued = false;
        self.progress = ProgressTracker::default();
        Some(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max: u32) -> BudgetController {
        BudgetController::new(max, Tier::Small, TokenBudgetConfig::default(), 20)
    }

    #[test]
    fn counters_never_decrease() {
        let mut budget = controller(5);
        let mut last_iter = 0;
        let mut last_tokens = 0;
        for _ in 0..5 {
            let seq = budget.start_iteration();
            budget.record_usage(&Usage {
                prompt_tokens: 100,
                completion_tokens: 10,
            });
            assert!(seq > last_iter);
            assert!(budget.tokens_used() > last_tokens);
            last_iter = seq;
            last_tokens = budget.tokens_used();
        }
        assert!(budget.iterations_exhausted());
    }

    #[test]
    fn extension_requires_progress() {
        let mut budget = controller(10);
        for _ in 0..6 {
            budget.start_iteration();
        }
        assert_eq!(budget.maybe_extend(), None);

        budget.note_progress(6, ProgressKind::NewFact);
        assert_eq!(budget.maybe_extend(), Some(15));
        // One-shot
        budget.note_progress(7, ProgressKind::FileRead);
        assert_eq!(budget.maybe_extend(), None);
    }

    #[test]
    fn extension_is_capped_at_global_max() {
        let mut budget = BudgetController::new(18, Tier::Small, TokenBudgetConfig::default(), 20);
        for i in 0..11 {
            budget.start_iteration();
            budget.note_progress(i + 1, ProgressKind::SearchSignal);
        }
        assert_eq!(budget.maybe_extend(), Some(20));
    }

    #[test]
    fn extension_not_granted_before_threshold() {
        let mut budget = controller(10);
        for i in 0..5 {
            budget.start_iteration();
            budget.note_progress(i + 1, ProgressKind::NewFact);
        }
        // 5 < 0.6 * 10
        assert_eq!(budget.maybe_extend(), None);
    }

    #[test]
    fn token_limits_trigger_in_order() {
        let policy = TokenBudgetConfig {
            tokens_max: 1_000,
            ..Default::default()
        };
        let mut budget = BudgetController::new(10, Tier::Small, policy, 20);

        budget.record_usage(&Usage {
            prompt_tokens: 700,
            completion_tokens: 60,
        });
        assert!(budget.soft_limit_reached());
        assert!(!budget.hard_limit_reached());
        assert!(budget.take_soft_nudge());
        assert!(!budget.take_soft_nudge());

        budget.record_usage(&Usage {
            prompt_tokens: 200,
            completion_tokens: 20,
        });
        assert!(budget.hard_limit_reached());
    }

    #[test]
    fn escalation_is_bounded_at_three_attempts() {
        let mut budget = controller(5);
        budget.start_iteration();

        let to = budget.escalate("tier_result_unsuccessful").unwrap();
        assert_eq!(to, Tier::Medium);
        assert_eq!(budget.iterations_used(), 0);

        let to = budget.escalate("still failing").unwrap();
        assert_eq!(to, Tier::Large);

        // Third escalation would be a fourth attempt
        assert_eq!(budget.escalate("again"), None);
        assert_eq!(budget.budget().escalations.len(), 2);
    }
}
