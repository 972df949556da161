//! Timer configuration and scheduling (spec.md §4.5 "Timers"), grounded on
//! `dialog-core::transaction::timer`: `TimerSettings` holds the RFC 3261
//! base intervals and `TimerFactory` spawns the tasks that fire named
//! timers back into a transaction's own command channel, mirroring the
//! teacher's per-transaction timer task rather than a shared timing wheel
//! (spec.md §9 "Coroutine control flow" allows either; a per-transaction
//! task is the simpler one to ground directly in the teacher's code).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{InternalTransactionCommand, TimerFired};

/// `T1`/`T2`/`T4` (spec.md §4.5). Defaults are the RFC 3261 values.
#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    pub t1: Duration,
    pub t2: Duration,
    pub t4: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

/// `T1, 2*T1, 4*T1, ... min(2^n*T1, T2)`, stopping at 11 attempts or once
/// cumulative elapsed time would exceed `64*T1` (spec.md §4.5, §8 "Timer
/// monotonicity" — each successive interval is non-decreasing and capped
/// at `T2`).
pub fn retransmit_intervals(settings: &TimerSettings) -> Vec<Duration> {
    let cap = settings.t1 * 64;
    let mut intervals = Vec::new();
    let mut elapsed = Duration::ZERO;
    for n in 0..11u32 {
        let interval = std::cmp::min(settings.t1.saturating_mul(1u32 << n), settings.t2);
        if elapsed + interval > cap {
            break;
        }
        elapsed += interval;
        intervals.push(interval);
    }
    intervals
}

pub struct TimerFactory;

impl TimerFactory {
    /// Schedule the retransmit loop for an unreliable (UDP) transport: fire
    /// `on_each` at every interval in the schedule, then `on_timeout` once
    /// the schedule is exhausted. A reliable transport skips straight to
    /// `on_timeout` after the single timeout duration, unless
    /// `force_retransmit` overrides it (spec.md §6 "disable_retransmit_sending"
    /// is the inverse knob, handled by the caller before reaching here).
    pub fn spawn_retransmit_schedule(
        cmd_tx: mpsc::Sender<InternalTransactionCommand>,
        settings: TimerSettings,
        reliable: bool,
        timeout_after: Duration,
        on_each: TimerFired,
        on_timeout: TimerFired,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if reliable {
                tokio::time::sleep(timeout_after).await;
                let _ = cmd_tx.send(InternalTransactionCommand::Timer(on_timeout)).await;
                return;
            }
            for interval in retransmit_intervals(&settings) {
                tokio::time::sleep(interval).await;
                if cmd_tx.send(InternalTransactionCommand::Timer(on_each)).await.is_err() {
                    return;
                }
            }
            let _ = cmd_tx.send(InternalTransactionCommand::Timer(on_timeout)).await;
        })
    }

    /// Schedule a single timer firing once after `delay` (Timers D/H/I/J/K
    /// — "wait this long, then move on"). `delay` of zero still yields to
    /// the executor once before firing, matching reliable-transport timers
    /// whose duration collapses to zero per spec.md §4.5.
    pub fn spawn_oneshot(cmd_tx: mpsc::Sender<InternalTransactionCommand>, delay: Duration, timer: TimerFired) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            } else {
                tokio::task::yield_now().await;
            }
            let _ = cmd_tx.send(InternalTransactionCommand::Timer(timer)).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_schedule_is_non_decreasing_and_capped_at_t2() {
        let settings = TimerSettings::default();
        let schedule = retransmit_intervals(&settings);
        assert!(!schedule.is_empty());
        for pair in schedule.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(schedule.iter().all(|d| *d <= settings.t2));
    }

    #[test]
    fn retransmit_schedule_never_exceeds_64_t1_cumulative() {
        let settings = TimerSettings::default();
        let schedule = retransmit_intervals(&settings);
        let total: Duration = schedule.iter().sum();
        assert!(total <= settings.t1 * 64);
    }
}
