use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use tracing::trace;

use super::types::AbrOptions;

/// Starting estimate when no playback has run in this process yet.
const DEFAULT_SEED_BPS: f64 = 1_000_000.0;

/// Persists the last known bitrate estimate across estimator lifetimes.
///
/// The process-wide instance (see [`BitrateSeed::global`]) is read when an
/// estimator is built and written back when it is dropped, so a new
/// playback starts from where the previous one left off. A racy scalar
/// seed; staleness is harmless.
#[derive(Debug, Default)]
pub struct BitrateSeed(AtomicU64);

impl BitrateSeed {
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<BitrateSeed>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(Arc::default))
    }

    fn load(&self) -> Option<f64> {
        let bits = self.0.load(Ordering::Relaxed);
        let value = f64::from_bits(bits);
        (value > 0.0).then_some(value)
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Asymmetric EWMA over instantaneous download rates.
///
/// Rises slowly (`upgrade_speed`) and falls fast (`downgrade_speed`): a
/// single fast fragment should not trigger an up-switch, a single slow one
/// should drag the estimate down before the buffer drains.
#[derive(Debug)]
pub struct BitrateEstimator {
    estimate_bps: f64,
    upgrade_speed: f64,
    downgrade_speed: f64,
    min_measurable_load: Duration,
    seed: Arc<BitrateSeed>,
}

impl BitrateEstimator {
    pub fn new(opts: &AbrOptions) -> Self {
        Self::with_seed_store(opts, BitrateSeed::global())
    }

    pub fn with_seed_store(opts: &AbrOptions, seed: Arc<BitrateSeed>) -> Self {
        let estimate_bps = seed.load().unwrap_or(DEFAULT_SEED_BPS);
        Self {
            estimate_bps,
            upgrade_speed: opts.upgrade_speed,
            downgrade_speed: opts.downgrade_speed,
            min_measurable_load: opts.min_measurable_load,
            seed,
        }
    }

    /// Estimator starting from a known estimate, bypassing the seed store.
    pub fn with_estimate(opts: &AbrOptions, estimate_bps: f64) -> Self {
        let mut est = Self::with_seed_store(opts, Arc::new(BitrateSeed::default()));
        est.estimate_bps = estimate_bps;
        est
    }

    pub fn estimate_bps(&self) -> f64 {
        self.estimate_bps
    }

    /// Constrain the estimate to a sane window.
    pub fn clamp(&mut self, lo: f64, hi: f64) {
        self.estimate_bps = self.estimate_bps.clamp(lo, hi);
    }

    /// Fold one completed network load into the estimate.
    pub fn push(&mut self, bytes: u64, elapsed: Duration) {
        let elapsed = elapsed.max(self.min_measurable_load);
        let instantaneous = (bytes as f64 * 8.0) / elapsed.as_secs_f64();

        let alpha = if instantaneous > self.estimate_bps {
            self.upgrade_speed
        } else {
            self.downgrade_speed
        };
        self.estimate_bps = alpha * instantaneous + (1.0 - alpha) * self.estimate_bps;

        trace!(
            bytes,
            elapsed_ms = elapsed.as_millis(),
            instantaneous_bps = instantaneous as u64,
            estimate_bps = self.estimate_bps as u64,
            "bitrate estimate updated"
        );
    }
}

impl Drop for BitrateEstimator {
    fn drop(&mut self) {
        self.seed.store(self.estimate_bps);
    }
}
