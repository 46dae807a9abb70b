//! Runtime configuration for PAG construction and analysis.
//!
//! This is plain data, separated from any argument parsing: callers build a
//! [`Config`] (usually starting from `Config::default()`) and thread it through
//! the [`PerFlow`](crate::PerFlow) context.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default prefix marking communication vertices by name.
pub const DEFAULT_COMM_PREFIX: &str = "comm_";

/// Configuration for a perflow session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory where run directories are created.
    pub workdir: PathBuf,
    /// Worker threads used for per-rank call tree reconstruction.
    pub workers: usize,
    /// Escalate missing or truncated rank streams to an error.
    pub strict: bool,
    /// Upper bound on the target program's run time.
    pub launch_timeout: Duration,
    /// Send/recv matching parameters.
    pub matching: MatchConfig,
    /// Parameters of the built-in passes.
    pub analysis: AnalysisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workdir: PathBuf::from("."),
            workers: 4,
            strict: false,
            launch_timeout: Duration::from_secs(3600),
            matching: MatchConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

/// Parameters of the greedy send/recv matcher.
///
/// Timestamps are normalized to each rank's first event before matching, so
/// `tolerance_ns` only has to absorb the residual clock skew between ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    /// How far a receive may appear to complete before its send.
    pub tolerance_ns: u64,
    /// How long after a send its receive may complete.
    pub window_ns: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            tolerance_ns: 1_000_000,
            window_ns: 10_000_000_000,
        }
    }
}

/// Metric a pass ranks or compares vertices by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Percentage of each rank's total cycles (`CYCAVGPERCENT` when averaged).
    CyclePercent,
    /// Raw exclusive cycle counts.
    Cycles,
    /// Inclusive wall time in nanoseconds.
    Time,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CyclePercent => "CYCAVGPERCENT",
            Self::Cycles => "CYC",
            Self::Time => "TIME",
        }
    }
}

/// How the hotspot pass selects vertices after ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HotspotSelect {
    /// The first `k` vertices.
    TopK(usize),
    /// Vertices whose metric is strictly above a fixed value.
    Above(f64),
    /// Vertices strictly above `mean + k * stddev` of the input set.
    MeanPlusStdDev(f64),
}

/// Dispersion statistic used by the imbalance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImbalanceStat {
    /// `(max - min) / mean`
    Spread,
    /// `stddev / mean`
    CoefficientOfVariation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImbalanceParams {
    pub metric: Metric,
    pub stat: ImbalanceStat,
    pub threshold: f64,
}

impl Default for ImbalanceParams {
    fn default() -> Self {
        ImbalanceParams {
            metric: Metric::CyclePercent,
            stat: ImbalanceStat::Spread,
            threshold: 0.25,
        }
    }
}

/// Thresholds of the communication pattern classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternParams {
    /// Minimum share of connected rank pairs to call a pattern all-to-all.
    pub dense_threshold: f64,
    /// Minimum share of connected pairs at ring distance one for nearest-neighbor.
    pub locality_threshold: f64,
}

impl Default for PatternParams {
    fn default() -> Self {
        PatternParams {
            dense_threshold: 0.75,
            locality_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub hotspot_metric: Metric,
    pub hotspot: HotspotSelect,
    pub imbalance: ImbalanceParams,
    pub pattern: PatternParams,
    /// Name prefix the models use to select communication vertices.
    pub comm_prefix: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            hotspot_metric: Metric::CyclePercent,
            hotspot: HotspotSelect::MeanPlusStdDev(1.0),
            imbalance: ImbalanceParams::default(),
            pattern: PatternParams::default(),
            comm_prefix: DEFAULT_COMM_PREFIX.to_string(),
        }
    }
}

/// Cooperative cancellation signal shared between a caller and long operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `Err(Error::Cancelled)` once [`cancel`](Self::cancel) was called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
