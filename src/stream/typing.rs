//! Fixed-rate text reveal
//!
//! Network deltas arrive in bursts of arbitrary size. The typing scheduler
//! reveals them at a steady one character per tick instead.

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

/// Shortest interval the timer runs at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Drives a tick callback on a fixed interval until it reports no more work
#[derive(Debug, Default)]
pub struct TypingScheduler {
    task: Option<JoinHandle<()>>,
}

impl TypingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking, replacing any running timer. `tick` returns `false`
    /// once the queue is drained; the first tick fires one interval from now.
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn start<F>(&mut self, interval: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();
        let interval = interval.max(MIN_INTERVAL);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Halt the timer; no tick runs after this returns
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TypingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
