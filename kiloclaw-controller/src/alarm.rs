//! Single-slot alarm (spec §4.3.5, §5, §9): "a persisted single-slot timer
//! that re-invokes the controller's reconciliation handler after a delay".
//! Re-arming cancels whatever was previously scheduled — there is never more
//! than one pending wakeup per controller.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

use kiloclaw_core::constants::{
    ALARM_INTERVAL_DESTROYING_MS, ALARM_INTERVAL_IDLE_MS, ALARM_INTERVAL_RUNNING_MS,
    ALARM_JITTER_MS,
};
use kiloclaw_core::models::InstanceStatus;

#[derive(Default)]
pub struct Alarm {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Alarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending wakeup and schedule `action` to run after `delay`.
    pub fn arm<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.handle.lock().unwrap();
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.handle.lock().unwrap().take() {
            previous.abort();
        }
    }
}

/// Base cadence for a given instance status (spec §4.3.5 cadence table).
pub fn cadence_ms(status: InstanceStatus) -> u64 {
    match status {
        InstanceStatus::Running => ALARM_INTERVAL_RUNNING_MS,
        InstanceStatus::Destroying => ALARM_INTERVAL_DESTROYING_MS,
        InstanceStatus::Provisioned | InstanceStatus::Stopped => ALARM_INTERVAL_IDLE_MS,
    }
}

/// Cadence plus 1ms-60s random jitter, "to avoid thundering provider-API
/// herds across all users" — property 4 requires the result to land in
/// `(now + base, now + base + jitter]`, an open lower bound that excludes
/// zero jitter.
pub fn next_delay(status: InstanceStatus) -> Duration {
    let base = cadence_ms(status);
    let jitter = rand::thread_rng().gen_range(1..=ALARM_JITTER_MS);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_is_always_within_base_plus_jitter_window() {
        for _ in 0..200 {
            let delay = next_delay(InstanceStatus::Running).as_millis() as u64;
            assert!(delay > ALARM_INTERVAL_RUNNING_MS);
            assert!(delay <= ALARM_INTERVAL_RUNNING_MS + ALARM_JITTER_MS);
        }
    }

    #[test]
    fn cadence_matches_table() {
        assert_eq!(cadence_ms(InstanceStatus::Running), ALARM_INTERVAL_RUNNING_MS);
        assert_eq!(cadence_ms(InstanceStatus::Destroying), ALARM_INTERVAL_DESTROYING_MS);
        assert_eq!(cadence_ms(InstanceStatus::Provisioned), ALARM_INTERVAL_IDLE_MS);
        assert_eq!(cadence_ms(InstanceStatus::Stopped), ALARM_INTERVAL_IDLE_MS);
    }
}
