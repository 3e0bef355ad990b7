//! SafetyGuard (C5, §4.5) — generalizes the teacher's `router::
//! circuit_breaker::CircuitBreaker` (consecutive-failure counting,
//! cooldown-gated retries) from a per-provider LLM router concern to a
//! per-(epic, ceremony type) ceremony gate. Deliberately pure: every
//! decision is a function of a `SafetyState` snapshot, the configured
//! limits, and the current time — no I/O, so `TriggerEngine` can call it
//! inline without becoming impure itself.

use crate::config::SafetyConfig;
use crate::domain::{CeremonyType, Circuit, SafetyState};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Denial {
    Cooldown { remaining_hours: f64 },
    EpicCapReached { cap: u32 },
    CircuitOpen,
}

impl Denial {
    pub fn reason(&self) -> String {
        match self {
            Self::Cooldown { remaining_hours } => {
                format!("cooldown active, {remaining_hours:.1}h remaining")
            }
            Self::EpicCapReached { cap } => format!("epic ceremony cap ({cap}) reached"),
            Self::CircuitOpen => "circuit breaker open for this ceremony type".to_string(),
        }
    }
}

pub type CanHold = Result<(), Denial>;

/// §4.5 `canHold`. `manual` bypasses cooldown but never the cap or an open
/// circuit, per the spec's explicit carve-out.
pub fn can_hold(state: &SafetyState, config: &SafetyConfig, now: DateTime<Utc>, manual: bool) -> CanHold {
    if state.total_ceremonies_this_epic >= config.max_ceremonies_per_epic {
        return Err(Denial::EpicCapReached {
            cap: config.max_ceremonies_per_epic,
        });
    }
    if state.circuit == Circuit::Open {
        return Err(Denial::CircuitOpen);
    }
    if !manual {
        if let Some(last_held_at) = state.last_held_at {
            let cooldown_hours = cooldown_hours(state.ceremony_type, config);
            let elapsed = now.signed_duration_since(last_held_at);
            let remaining = cooldown_hours - elapsed.num_seconds() as f64 / 3600.0;
            if remaining > 0.0 {
                return Err(Denial::Cooldown {
                    remaining_hours: remaining,
                });
            }
        }
    }
    Ok(())
}

fn cooldown_hours(ceremony_type: CeremonyType, config: &SafetyConfig) -> f64 {
    match ceremony_type {
        CeremonyType::Planning => config.planning_cooldown_hours as f64,
        CeremonyType::Standup => config.standup_cooldown_hours as f64,
        CeremonyType::Retrospective => config.retrospective_cooldown_hours as f64,
    }
}

/// §4.5 `recordOutcome`. The circuit opens the moment `consecutive_failures`
/// reaches the threshold — the ceremony that trips it still ran (§8
/// boundary behavior: "the 3rd ceremony is still run but its failure flips
/// the switch"), and resets on the next success.
pub fn record_outcome(
    mut state: SafetyState,
    config: &SafetyConfig,
    outcome: crate::domain::CeremonyOutcome,
    held_at: DateTime<Utc>,
) -> SafetyState {
    use crate::domain::CeremonyOutcome::*;
    match outcome {
        Success => {
            state.consecutive_failures = 0;
            state.circuit = Circuit::Closed;
        }
        Partial => {
            // A partial outcome is neither a clean success nor a failure;
            // it neither resets nor advances the failure streak.
        }
        Failed => {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= config.circuit_failure_threshold {
                state.circuit = Circuit::Open;
            }
        }
    }
    state.last_held_at = Some(held_at);
    state.total_ceremonies_this_epic += 1;
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CeremonyOutcome;

    fn base_state() -> SafetyState {
        SafetyState::new(1, CeremonyType::Retrospective)
    }

    #[test]
    fn circuit_opens_on_third_consecutive_failure_not_fourth() {
        let config = SafetyConfig::default();
        let mut state = base_state();
        let now = Utc::now();
        for _ in 0..2 {
            state = record_outcome(state, &config, CeremonyOutcome::Failed, now);
            assert_eq!(state.circuit, Circuit::Closed);
        }
        state = record_outcome(state, &config, CeremonyOutcome::Failed, now);
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.circuit, Circuit::Open);
    }

    #[test]
    fn circuit_resets_on_success() {
        let config = SafetyConfig::default();
        let mut state = base_state();
        let now = Utc::now();
        for _ in 0..3 {
            state = record_outcome(state, &config, CeremonyOutcome::Failed, now);
        }
        assert_eq!(state.circuit, Circuit::Open);
        state = record_outcome(state, &config, CeremonyOutcome::Success, now);
        assert_eq!(state.circuit, Circuit::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn manual_hold_bypasses_cooldown_but_not_cap_or_circuit() {
        let config = SafetyConfig::default();
        let mut state = base_state();
        let now = Utc::now();
        state.last_held_at = Some(now);
        assert!(can_hold(&state, &config, now, true).is_ok());
        assert!(can_hold(&state, &config, now, false).is_err());

        state.circuit = Circuit::Open;
        assert!(matches!(can_hold(&state, &config, now, true), Err(Denial::CircuitOpen)));
    }

    #[test]
    fn epic_cap_denies_regardless_of_manual() {
        let config = SafetyConfig::default();
        let mut state = base_state();
        state.total_ceremonies_this_epic = config.max_ceremonies_per_epic;
        let now = Utc::now();
        assert!(matches!(
            can_hold(&state, &config, now, true),
            Err(Denial::EpicCapReached { .. })
        ));
    }
}
