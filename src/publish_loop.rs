use crate::broker::Publisher;
use crate::reading::{derive_targets, PublishTarget};
use crate::wunderground::ReadingFetcher;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What a single fetch-and-publish cycle achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every target was attempted once
    Published { delivered: usize, failed: usize },
    /// Nothing was published
    FetchFailed,
}

/// Polls one station on a fixed cadence and republishes its measurements
pub struct PublishLoop<F, P> {
    fetcher: F,
    publisher: P,
    station: String,
    interval: Duration,
}

impl<F, P> PublishLoop<F, P>
where
    F: ReadingFetcher + 'static,
    P: Publisher + 'static,
{
    pub fn new(fetcher: F, publisher: P, station: String, interval: Duration) -> Self {
        Self {
            fetcher,
            publisher,
            station,
            interval,
        }
    }

    /// Spawns the loop on its own task. It exits once `stop` flips to true
    /// or its sender is dropped.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(stop).await;
        })
    }

    /// Main execution loop: fetch, publish, then sleep for the interval
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(
            station = %self.station,
            interval_secs = self.interval.as_secs(),
            "starting publish loop"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let outcome = self.run_cycle().await;
            debug!(station = %self.station, ?outcome, "cycle complete");

            if self.pause(&mut stop).await {
                debug!("stop requested during interval sleep");
                break;
            }
        }

        info!(station = %self.station, "publish loop exiting");
    }

    /// Sleeps for the full interval unless a stop arrives first.
    /// Returns true when the loop should exit.
    async fn pause(&self, stop: &mut watch::Receiver<bool>) -> bool {
        let pause = sleep(self.interval);
        tokio::pin!(pause);

        loop {
            tokio::select! {
                _ = &mut pause => return false,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return true;
                    }
                }
            }
        }
    }

    /// One fetch followed by at most one publish attempt per metric
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.fetcher.fetch(&self.station).await {
            Ok(reading) => {
                let targets = derive_targets(&self.station, &reading);
                self.publish_targets(&targets).await
            }
            Err(e) if e.is_persistent() => {
                error!(
                    station = %self.station,
                    error = %e,
                    "weather provider rejected request, check API key and station"
                );
                CycleOutcome::FetchFailed
            }
            Err(e) => {
                warn!(station = %self.station, error = %e, "could not read weather");
                CycleOutcome::FetchFailed
            }
        }
    }

    async fn publish_targets(&self, targets: &[PublishTarget]) -> CycleOutcome {
        let mut delivered = 0;
        let mut failed = 0;

        for target in targets {
            match self.publisher.publish(&target.topic, &target.payload).await {
                Ok(()) => {
                    debug!(topic = %target.topic, payload = %target.payload, "published");
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        station = %self.station,
                        metric = %target.metric,
                        error = %e,
                        "failed to send message"
                    );
                    failed += 1;
                }
            }
        }

        CycleOutcome::Published { delivered, failed }
    }
}
