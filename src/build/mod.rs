//! PAG construction.
//!
//! [`PagBuilder::build`] turns a [`TraceSet`] into both graph variants:
//!
//! 1. per-rank call trees, reconstructed in parallel on a worker pool;
//! 2. after all ranks are done, the Time-Dependent PAG with matched
//!    communication edges;
//! 3. the Process-Perspective PAG, folded from the time-dependent one.
//!
//! Missing or truncated streams do not stop construction. They are reported as
//! [`Diagnostic`]s next to the graphs, unless the builder is strict.

mod calltree;
mod fold;
mod matching;
mod tdpag;

use std::fmt;
use std::sync::mpsc::channel;

use tracing::{info, warn};
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use crate::config::{CancelToken, Config, MatchConfig};
use crate::error::{Error, Result};
use crate::pag::{Pag, PagKind, PagMeta};
use crate::trace::TraceSet;
use crate::validate::validate_pag;
use calltree::{reconstruct, RankTree};

pub use calltree::{DEFAULT_RECV_NAME, DEFAULT_SEND_NAME};

/// A recoverable condition found while building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No stream exists for this rank.
    MissingRank { rank: usize },
    /// The stream ended with calls still open.
    TruncatedStream { rank: usize, open_calls: usize },
    /// The stream's last record was partially written and dropped.
    TornRecord { rank: usize },
    /// An exit record with no open call; ignored.
    UnmatchedExit { rank: usize, ts: u64 },
    /// Markers that found no counterpart and stay dangling.
    UnmatchedComm { count: usize },
    /// Fewer streams than a multi-process analysis needs.
    PartialResult { expected: usize, got: usize },
}

impl Diagnostic {
    /// Whether this condition means measured data is missing.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::MissingRank { .. }
                | Self::TruncatedStream { .. }
                | Self::TornRecord { .. }
                | Self::PartialResult { .. }
        )
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Self::MissingRank { rank }
            | Self::TruncatedStream { rank, .. }
            | Self::TornRecord { rank }
            | Self::UnmatchedExit { rank, .. } => Some(*rank),
            Self::UnmatchedComm { .. } | Self::PartialResult { .. } => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRank { rank } => write!(f, "rank {rank}: no trace stream"),
            Self::TruncatedStream { rank, open_calls } => write!(
                f,
                "rank {rank}: stream ended with {open_calls} open call(s), marked incomplete"
            ),
            Self::TornRecord { rank } => {
                write!(f, "rank {rank}: dropped a partially written final record")
            }
            Self::UnmatchedExit { rank, ts } => {
                write!(f, "rank {rank}: exit at {ts} has no open call")
            }
            Self::UnmatchedComm { count } => {
                write!(f, "{count} communication marker(s) left unmatched")
            }
            Self::PartialResult { expected, got } => write!(
                f,
                "partial result: {got} of {expected} rank stream(s) available"
            ),
        }
    }
}

/// Both graphs of a run plus what went wrong on the way.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub tdpag: Pag,
    pub ppag: Pag,
    pub diagnostics: Vec<Diagnostic>,
}

/// Builds PAGs from raw traces.
#[derive(Debug, Clone)]
pub struct PagBuilder {
    workers: usize,
    strict: bool,
    matching: MatchConfig,
    cancel: CancelToken,
}

impl PagBuilder {
    pub fn new(config: &Config) -> Self {
        PagBuilder {
            workers: config.workers.max(1),
            strict: config.strict,
            matching: config.matching,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(&self, traces: TraceSet) -> Result<BuildOutput> {
        check_ranks(&traces)?;
        if traces.event_count() == 0 {
            return Err(Error::Construction(format!(
                "no usable trace data: {} of {} rank stream(s) present, none has events",
                traces.ranks.len(),
                traces.nprocs
            )));
        }

        let mut diagnostics: Vec<Diagnostic> = traces
            .missing
            .iter()
            .map(|&rank| Diagnostic::MissingRank { rank })
            .collect();
        if traces.nprocs > 1 && traces.ranks.len() <= 1 {
            diagnostics.push(Diagnostic::PartialResult {
                expected: traces.nprocs,
                got: traces.ranks.len(),
            });
        }

        let nprocs = traces.nprocs;
        let missing_ranks = traces.missing.clone();
        let trees = self.reconstruct_all(traces)?;

        // Everything below reads the finished trees only.
        self.cancel.check()?;
        for tree in &trees {
            diagnostics.extend(tree.diagnostics.iter().cloned());
        }
        self.check_strict(&diagnostics)?;

        let mut total_cycles = vec![0; nprocs];
        for tree in &trees {
            total_cycles[tree.rank] = tree.total_cycles;
        }
        let meta = PagMeta {
            kind: PagKind::TimeDependent,
            nprocs,
            total_cycles,
            incomplete_ranks: trees
                .iter()
                .filter(|t| t.incomplete)
                .map(|t| t.rank)
                .collect(),
            missing_ranks,
        };

        let (tdpag, dangling) = tdpag::assemble(&trees, meta, self.matching);
        if dangling > 0 {
            diagnostics.push(Diagnostic::UnmatchedComm { count: dangling });
        }
        self.cancel.check()?;
        let ppag = fold::fold(&tdpag, &self.cancel)?;

        for pag in [&tdpag, &ppag] {
            let result = validate_pag(pag);
            if let Some(err) = result.errors.first() {
                return Err(Error::Construction(format!("{}: {err}", pag.kind())));
            }
        }

        for diagnostic in &diagnostics {
            warn!("{}", diagnostic);
        }
        info!(
            "Built PAGs for {} rank(s): tdpag {} vertices / {} edges, ppag {} vertices / {} edges",
            nprocs,
            tdpag.vertices().len(),
            tdpag.edges().len(),
            ppag.vertices().len(),
            ppag.edges().len()
        );

        Ok(BuildOutput {
            tdpag,
            ppag,
            diagnostics,
        })
    }

    /// Rebuild every rank's call tree on the worker pool and wait for all of them.
    fn reconstruct_all(&self, traces: TraceSet) -> Result<Vec<RankTree>> {
        let nprocs = traces.nprocs;
        let jobs = traces.ranks.len();
        let pool = Pool::<ThunkWorker<Result<RankTree>>>::new(self.workers.min(jobs.max(1)));
        let (tx, rx) = channel();

        for trace in traces.ranks {
            let cancel = self.cancel.clone();
            pool.execute_to(
                tx.clone(),
                Thunk::of(move || {
                    cancel.check()?;
                    reconstruct(trace, nprocs)
                }),
            );
        }
        drop(tx);
        pool.join();

        let mut trees = rx.iter().collect::<Result<Vec<RankTree>>>()?;
        if trees.len() != jobs {
            return Err(Error::Construction(format!(
                "{} of {jobs} rank reconstruction job(s) did not finish",
                jobs - trees.len()
            )));
        }
        trees.sort_by_key(|t| t.rank);
        Ok(trees)
    }

    fn check_strict(&self, diagnostics: &[Diagnostic]) -> Result<()> {
        if !self.strict {
            return Ok(());
        }
        let incomplete: Vec<&Diagnostic> =
            diagnostics.iter().filter(|d| d.is_incomplete()).collect();
        if incomplete.is_empty() {
            return Ok(());
        }
        let mut ranks: Vec<usize> = incomplete.iter().filter_map(|d| d.rank()).collect();
        ranks.sort_unstable();
        ranks.dedup();
        let reason = incomplete
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::TraceIncomplete { ranks, reason })
    }
}

/// Every stream must belong to a distinct rank of the run.
fn check_ranks(traces: &TraceSet) -> Result<()> {
    let mut seen = vec![false; traces.nprocs];
    for trace in &traces.ranks {
        match seen.get_mut(trace.rank) {
            None => {
                return Err(Error::Construction(format!(
                    "stream for rank {} in a {}-rank run",
                    trace.rank, traces.nprocs
                )))
            }
            Some(slot) if *slot => {
                return Err(Error::Construction(format!(
                    "rank {} has more than one stream",
                    trace.rank
                )))
            }
            Some(slot) => *slot = true,
        }
    }
    Ok(())
}
