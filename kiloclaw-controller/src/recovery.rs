//! Metadata-based recovery candidate selection (spec §4.3.5 "Metadata
//! recovery", testable property 8, scenario S4). Pure and total so it can be
//! unit-tested without any provider or store dependency.

use kiloclaw_provider::models::{Machine, MachineState};

/// Rank used to prefer `started` > `starting` > `stopped` > `created` > other
/// live states. Lower is better.
fn rank(state: MachineState) -> u8 {
    match state {
        MachineState::Started => 0,
        MachineState::Starting => 1,
        MachineState::Stopped => 2,
        MachineState::Created => 3,
        _ => 4,
    }
}

/// Select the best machine to adopt out of a metadata-filtered listing.
/// Returns `None` iff every candidate is `destroyed`/`destroying` (or the
/// list is empty) — total on any input, per testable property 8.
pub fn select_recovery_candidate(machines: &[Machine]) -> Option<&Machine> {
    machines
        .iter()
        .filter(|m| !m.state.is_terminal())
        .min_by(|a, b| {
            rank(a.state)
                .cmp(&rank(b.state))
                .then_with(|| updated_at_key(b).cmp(&updated_at_key(a)))
        })
}

/// `updated_at` as a sortable key: an RFC3339 timestamp sorts correctly as a
/// plain string, and a missing/unparseable timestamp sorts as the oldest
/// possible value rather than panicking.
fn updated_at_key(machine: &Machine) -> &str {
    machine.updated_at.as_deref().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(id: &str, state: MachineState, updated_at: &str) -> Machine {
        Machine {
            id: id.to_string(),
            name: String::new(),
            state,
            region: "ord".to_string(),
            config: kiloclaw_provider::models::MachineConfig::default(),
            updated_at: Some(updated_at.to_string()),
        }
    }

    #[test]
    fn prefers_started_over_stopped_tie_break_by_newest() {
        let machines = vec![
            machine("A", MachineState::Stopped, "2026-02-01T00:00:00Z"),
            machine("B", MachineState::Started, "2026-01-01T00:00:00Z"),
        ];
        let best = select_recovery_candidate(&machines).expect("a candidate exists");
        assert_eq!(best.id, "B");
    }

    #[test]
    fn tie_breaks_same_state_by_newest_updated_at() {
        let machines = vec![
            machine("old", MachineState::Started, "2026-01-01T00:00:00Z"),
            machine("new", MachineState::Started, "2026-03-01T00:00:00Z"),
        ];
        let best = select_recovery_candidate(&machines).expect("a candidate exists");
        assert_eq!(best.id, "new");
    }

    #[test]
    fn returns_none_when_every_candidate_is_terminal() {
        let machines = vec![
            machine("A", MachineState::Destroyed, "2026-01-01T00:00:00Z"),
            machine("B", MachineState::Destroying, "2026-01-01T00:00:00Z"),
        ];
        assert!(select_recovery_candidate(&machines).is_none());
    }

    #[test]
    fn returns_none_on_empty_list() {
        assert!(select_recovery_candidate(&[]).is_none());
    }

    #[test]
    fn ignores_terminal_states_when_selecting_among_mixed_states() {
        let machines = vec![
            machine("stale", MachineState::Destroying, "2026-05-01T00:00:00Z"),
            machine("live", MachineState::Created, "2026-01-01T00:00:00Z"),
        ];
        let best = select_recovery_candidate(&machines).expect("a candidate exists");
        assert_eq!(best.id, "live");
    }
}
