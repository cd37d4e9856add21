//! Receiver feedback estimators.
//!
//! An estimator turns bandwidth reports from the receivers of one output into
//! a single number: the lowest bitrate any of them can take. The encoding
//! branch reads that number on its data path, so reading has to be cheap and
//! must never block.

use crate::sync::{lock, read, write};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

/// Live minimum bitrate estimate for one output.
pub trait FeedbackEstimator: Send + Sync {
    /// Lowest current estimate in bits/sec, 0 if no estimate yet.
    fn min_estimate(&self) -> u32;
}

/// Creates and destroys estimators for encoder inputs.
pub trait EstimatorFactory: Send + Sync {
    /// Create an estimator attached to the pad named `pad`.
    fn create(&self, pad: &str) -> Arc<dyn FeedbackEstimator>;

    /// Release an estimator returned by [`create`](Self::create).
    fn destroy(&self, estimator: Arc<dyn FeedbackEstimator>);
}

/// Estimator aggregating one estimate per remote source.
///
/// Updates take a short lock and republish the minimum; reads are a single
/// atomic load.
///
/// # Example
///
/// ```rust
/// use tributary::encoding::{FeedbackEstimator, MinBitrateEstimator};
///
/// let estimator = MinBitrateEstimator::new();
/// assert_eq!(estimator.min_estimate(), 0);
///
/// estimator.update(0x1234, 800_000);
/// estimator.update(0x5678, 450_000);
/// assert_eq!(estimator.min_estimate(), 450_000);
///
/// estimator.remove_source(0x5678);
/// assert_eq!(estimator.min_estimate(), 800_000);
/// ```
#[derive(Debug, Default)]
pub struct MinBitrateEstimator {
    estimates: Mutex<BTreeMap<u32, u32>>,
    min: AtomicU32,
}

impl MinBitrateEstimator {
    /// Create an estimator with no estimate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest estimate reported for `source`.
    ///
    /// A zero bitrate is ignored; it carries no information.
    pub fn update(&self, source: u32, bitrate: u32) {
        if bitrate == 0 {
            return;
        }
        let mut estimates = lock(&self.estimates);
        estimates.insert(source, bitrate);
        self.publish(&estimates);
        trace!(source, bitrate, "estimate updated");
    }

    /// Forget a source, e.g. when its receiver leaves.
    pub fn remove_source(&self, source: u32) {
        let mut estimates = lock(&self.estimates);
        if estimates.remove(&source).is_some() {
            self.publish(&estimates);
        }
    }

    /// Number of sources with an estimate.
    pub fn sources(&self) -> usize {
        lock(&self.estimates).len()
    }

    fn publish(&self, estimates: &BTreeMap<u32, u32>) {
        let min = estimates.values().copied().min().unwrap_or(0);
        self.min.store(min, Ordering::Release);
    }
}

impl FeedbackEstimator for MinBitrateEstimator {
    fn min_estimate(&self) -> u32 {
        self.min.load(Ordering::Acquire)
    }
}

/// [`EstimatorFactory`] handing out [`MinBitrateEstimator`]s, kept by pad
/// name so the application can feed them.
#[derive(Debug, Default)]
pub struct MinEstimatorFactory {
    live: RwLock<HashMap<String, Arc<MinBitrateEstimator>>>,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl MinEstimatorFactory {
    /// Create a factory with no estimators.
    pub fn new() -> Self {
        Self::default()
    }

    /// The live estimator for `pad`.
    pub fn estimator(&self, pad: &str) -> Option<Arc<MinBitrateEstimator>> {
        read(&self.live).get(pad).cloned()
    }

    /// Number of estimators created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of estimators destroyed so far.
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }
}

impl EstimatorFactory for MinEstimatorFactory {
    fn create(&self, pad: &str) -> Arc<dyn FeedbackEstimator> {
        let estimator = Arc::new(MinBitrateEstimator::new());
        write(&self.live).insert(pad.to_string(), Arc::clone(&estimator));
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(pad, "feedback estimator created");
        estimator
    }

    fn destroy(&self, estimator: Arc<dyn FeedbackEstimator>) {
        let target = Arc::as_ptr(&estimator) as *const ();
        write(&self.live).retain(|_, live| Arc::as_ptr(live) as *const () != target);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!("feedback estimator destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_update_is_ignored() {
        let estimator = MinBitrateEstimator::new();
        estimator.update(1, 0);
        assert_eq!(estimator.sources(), 0);
        assert_eq!(estimator.min_estimate(), 0);
    }

    #[test]
    fn test_latest_report_per_source_wins() {
        let estimator = MinBitrateEstimator::new();
        estimator.update(1, 300_000);
        estimator.update(1, 900_000);
        estimator.update(2, 700_000);
        assert_eq!(estimator.min_estimate(), 700_000);

        estimator.remove_source(2);
        estimator.remove_source(1);
        assert_eq!(estimator.min_estimate(), 0);
    }

    #[test]
    fn test_factory_tracks_live_estimators() {
        let factory = MinEstimatorFactory::new();
        let estimator = factory.create("vp8enc0:sink");

        factory
            .estimator("vp8enc0:sink")
            .unwrap()
            .update(7, 250_000);
        assert_eq!(estimator.min_estimate(), 250_000);

        factory.destroy(estimator);
        assert!(factory.estimator("vp8enc0:sink").is_none());
        assert_eq!((factory.created(), factory.destroyed()), (1, 1));
    }
}
