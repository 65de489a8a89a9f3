//! Detection strategies per measurement kind
//!
//! A strategy bundles the three steps a worker runs for its measurement:
//! sample preprocessing, per-probe detection and per-AS aggregation.
//! Strategies are registered statically at startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::anomaly::{AggregationConfig, AlertAggregator, LevelShiftConfig, LevelShiftDetector};
use crate::error::{DetectionFitError, PreprocessingError};
use crate::models::{Alert, EntryObservation, LevelShiftFlag, MeasurementId, MeasurementKind, ProbeId, RawSample};
use crate::preprocess::Preprocessor;
use crate::resolver::AsResolver;
use crate::store::SeriesStore;

/// Result of running detection over a whole store
#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    pub flags: Vec<LevelShiftFlag>,
    pub probes_analyzed: usize,
    pub fit_failures: Vec<(ProbeId, DetectionFitError)>,
}

#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    fn kind(&self) -> MeasurementKind;

    async fn preprocess(&self, sample: &RawSample) -> Result<EntryObservation, PreprocessingError>;

    /// CPU-bound; callers run it on the blocking pool
    fn detect(&self, store: &SeriesStore) -> DetectionOutcome;

    fn aggregate(&self, measurement_id: MeasurementId, flags: &[LevelShiftFlag]) -> Vec<Alert>;
}

/// Entry-hop latency with level-shift detection, for traceroute measurements
pub struct EntryHopStrategy {
    preprocessor: Preprocessor,
    detector: LevelShiftDetector,
    aggregator: AlertAggregator,
}

impl EntryHopStrategy {
    pub fn new(
        resolver: Arc<dyn AsResolver>,
        level_shift: LevelShiftConfig,
        aggregation: AggregationConfig,
    ) -> Self {
        Self {
            preprocessor: Preprocessor::new(resolver),
            detector: LevelShiftDetector::new(level_shift),
            aggregator: AlertAggregator::new(aggregation),
        }
    }
}

#[async_trait]
impl DetectionStrategy for EntryHopStrategy {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::Traceroute
    }

    async fn preprocess(&self, sample: &RawSample) -> Result<EntryObservation, PreprocessingError> {
        self.preprocessor.preprocess(sample).await
    }

    fn detect(&self, store: &SeriesStore) -> DetectionOutcome {
        let mut outcome = DetectionOutcome::default();

        for (probe_id, series) in store.series() {
            match self.detector.detect(&series.rtt_values()) {
                Ok(flags) => {
                    outcome.probes_analyzed += 1;
                    outcome
                        .flags
                        .extend(series.iter().zip(flags).map(|(obs, flagged)| LevelShiftFlag {
                            probe_id: *probe_id,
                            timestamp: obs.timestamp,
                            entry_as: obs.entry_as,
                            flagged,
                        }));
                }
                Err(e) => {
                    debug!(probe_id, error = %e, "Skipping probe for this pass");
                    outcome.fit_failures.push((*probe_id, e));
                }
            }
        }

        outcome
    }

    fn aggregate(&self, measurement_id: MeasurementId, flags: &[LevelShiftFlag]) -> Vec<Alert> {
        self.aggregator.aggregate(measurement_id, flags)
    }
}

/// Fixed map from measurement kind to strategy
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<MeasurementKind, Arc<dyn DetectionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the entry-hop strategy for traceroute
    pub fn with_defaults(
        resolver: Arc<dyn AsResolver>,
        level_shift: LevelShiftConfig,
        aggregation: AggregationConfig,
    ) -> Self {
        Self::new().register(Arc::new(EntryHopStrategy::new(resolver, level_shift, aggregation)))
    }

    pub fn register(mut self, strategy: Arc<dyn DetectionStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn get(&self, kind: MeasurementKind) -> Option<Arc<dyn DetectionStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    pub fn supports(&self, kind: MeasurementKind) -> bool {
        self.strategies.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;

    fn strategy() -> EntryHopStrategy {
        EntryHopStrategy::new(
            Arc::new(StaticResolver::new()),
            LevelShiftConfig::default(),
            AggregationConfig::default(),
        )
    }

    #[test]
    fn test_detect_over_store() {
        let mut store = SeriesStore::default();
        for i in 0..20 {
            let rtt = if i < 10 { 10.0 } else { 50.0 };
            store.insert(EntryObservation::entry(
                1,
                1_700_000_000 + i * 300,
                Some(rtt),
                Some("20.0.0.1".into()),
                Some(200),
            ));
        }
        // too short to fit
        store.insert(EntryObservation::entry(2, 1_700_000_000, Some(5.0), Some("20.0.0.1".into()), Some(200)));

        let outcome = strategy().detect(&store);
        assert_eq!(outcome.probes_analyzed, 1);
        assert_eq!(outcome.fit_failures.len(), 1);
        assert_eq!(outcome.fit_failures[0].0, 2);
        assert_eq!(outcome.flags.len(), 20);
        assert_eq!(outcome.flags.iter().filter(|f| f.flagged).count(), 3);
        assert!(outcome.flags.iter().all(|f| f.entry_as == Some(200)));
    }

    #[test]
    fn test_registry_defaults() {
        let registry = StrategyRegistry::with_defaults(
            Arc::new(StaticResolver::new()),
            LevelShiftConfig::default(),
            AggregationConfig::default(),
        );

        assert!(registry.supports(MeasurementKind::Traceroute));
        assert!(!registry.supports(MeasurementKind::Ping));
        assert_eq!(
            registry.get(MeasurementKind::Traceroute).unwrap().kind(),
            MeasurementKind::Traceroute
        );
        assert!(registry.get(MeasurementKind::Dns).is_none());
    }
}
