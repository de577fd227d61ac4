use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Lower bound on the period, `interval` rejects zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A background loop that runs one round per tick until stopped.
///
/// Rounds are awaited inline, so a stop request is only observed between
/// rounds and [`PeriodicTask::stop`] returns after the in-flight round is done.
pub struct PeriodicTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut round: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            warn!(task = name, "Zero period, using {MIN_PERIOD:?}");
        }
        let period = period.max(MIN_PERIOD);
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(task = name, ?period, "Periodic task started");
            loop {
                tokio::select! {
                    biased;
                    // Err means the handle was dropped without stop()
                    res = stopped.changed() => {
                        if res.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => round().await,
                }
            }
            info!(task = name, "Periodic task stopped");
        });
        Self { name, stop, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = self.name, "Periodic task ended abnormally: {e}");
        }
    }
}
