//! PAG validation.
//!
//! Checks the structural invariants both graph variants must hold. The builder
//! runs this on freshly built graphs and the store runs it on reloaded ones, so
//! a corrupt directory is rejected instead of producing wrong analyses.
//!
//! # Example
//!
//! ```no_run
//! use perflow::validate::validate_pag;
//! # fn demo(pag: &perflow::Pag) {
//! let result = validate_pag(pag);
//! if result.has_errors() {
//!     for error in &result.errors {
//!         eprintln!("Error: {}", error);
//!     }
//! }
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

use crate::pag::{mean_percent, EdgeKind, Pag, PagKind, VertexKind};

/// Absolute tolerance when comparing a stored average to its vector.
const AVG_EPSILON: f64 = 1e-9;

/// Upper bound of a per-rank cycle share, allowing for rounding.
const MAX_PERCENT: f64 = 100.0 + AVG_EPSILON;

/// Result of validating a PAG.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Broken invariants.
    pub errors: Vec<ValidationError>,
    /// Conditions worth reporting that do not make the graph unusable.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// Validation error types.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A vertex or edge id does not match its position.
    IdMismatch { what: &'static str, index: usize },
    /// An edge points at a vertex that does not exist.
    DanglingEdge { edge: usize, vertex: usize },
    /// Two process-perspective vertices share a call-site signature.
    DuplicateSignature { signature: String },
    /// `CYCAVGPERCENT` disagrees with the per-process vector.
    AverageMismatch {
        vertex: String,
        stored: f64,
        expected: f64,
    },
    /// The per-process vector has the wrong shape.
    BadVector { vertex: String, message: String },
    /// A rank's cycle share is negative or above 100%.
    PercentOutOfRange {
        vertex: String,
        rank: usize,
        percent: f64,
    },
    /// A rank's intra-process edges form a cycle.
    CyclicRank { rank: usize },
    /// A flow edge goes backwards in time.
    FlowOrder { edge: usize, rank: usize },
    /// A communication vertex or edge is inconsistent with its match flag.
    CommMismatch { vertex: String, message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::IdMismatch { what, index } => {
                write!(f, "{what} at index {index} carries a different id")
            }
            ValidationError::DanglingEdge { edge, vertex } => {
                write!(f, "edge {edge}: vertex {vertex} does not exist")
            }
            ValidationError::DuplicateSignature { signature } => {
                write!(f, "duplicate call-site signature {signature}")
            }
            ValidationError::AverageMismatch {
                vertex,
                stored,
                expected,
            } => {
                write!(
                    f,
                    "{vertex}: CYCAVGPERCENT is {stored}, per-process mean is {expected}"
                )
            }
            ValidationError::BadVector { vertex, message } => {
                write!(f, "{vertex}: {message}")
            }
            ValidationError::PercentOutOfRange {
                vertex,
                rank,
                percent,
            } => {
                write!(f, "{vertex}: rank {rank} holds {percent}% of its cycles")
            }
            ValidationError::CyclicRank { rank } => {
                write!(f, "rank {rank}: intra-process edges form a cycle")
            }
            ValidationError::FlowOrder { edge, rank } => {
                write!(f, "rank {rank}: flow edge {edge} goes backwards in time")
            }
            ValidationError::CommMismatch { vertex, message } => {
                write!(f, "{vertex}: {message}")
            }
        }
    }
}

/// Validation warning types.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    /// A rank had no stream.
    MissingRank { rank: usize },
    /// A rank's stream was cut short.
    IncompleteRank { rank: usize },
    /// Communication markers without a counterpart.
    UnmatchedComm { count: usize },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::MissingRank { rank } => write!(f, "rank {rank}: no trace"),
            ValidationWarning::IncompleteRank { rank } => {
                write!(f, "rank {rank}: trace is incomplete")
            }
            ValidationWarning::UnmatchedComm { count } => {
                write!(f, "{count} communication marker(s) left unmatched")
            }
        }
    }
}

/// Validate a PAG of either kind.
///
/// Checks:
/// - ids match positions and edges reference existing vertices
/// - process-perspective signatures are unique
/// - per-process vectors have the right shape and `CYCAVGPERCENT` is their mean
/// - time-dependent ranks are acyclic with forward-in-time flow edges
/// - communication vertices agree with their incident communication edges
pub fn validate_pag(pag: &Pag) -> ValidationResult {
    let mut result = ValidationResult::default();

    validate_ids(pag, &mut result);
    if result.has_errors() {
        // Later checks index by id.
        return result;
    }
    validate_vectors(pag, &mut result);
    match pag.kind() {
        PagKind::ProcessPerspective => validate_signatures(pag, &mut result),
        PagKind::TimeDependent => {
            validate_rank_order(pag, &mut result);
            validate_comm(pag, &mut result);
        }
    }

    for &rank in &pag.meta().missing_ranks {
        result.add_warning(ValidationWarning::MissingRank { rank });
    }
    for &rank in &pag.meta().incomplete_ranks {
        result.add_warning(ValidationWarning::IncompleteRank { rank });
    }

    result
}

fn validate_ids(pag: &Pag, result: &mut ValidationResult) {
    for (index, vertex) in pag.vertices().iter().enumerate() {
        if vertex.id.index() != index {
            result.add_error(ValidationError::IdMismatch {
                what: "vertex",
                index,
            });
        }
    }
    let count = pag.vertices().len();
    for (index, edge) in pag.edges().iter().enumerate() {
        if edge.id.index() != index {
            result.add_error(ValidationError::IdMismatch {
                what: "edge",
                index,
            });
        }
        for endpoint in [edge.src, edge.dst] {
            if endpoint.index() >= count {
                result.add_error(ValidationError::DanglingEdge {
                    edge: index,
                    vertex: endpoint.index(),
                });
            }
        }
    }
}

fn validate_vectors(pag: &Pag, result: &mut ValidationResult) {
    for vertex in pag.vertices() {
        let shape_ok = match pag.kind() {
            PagKind::TimeDependent => {
                vertex.per_process.len() == 1 && Some(vertex.per_process[0].rank) == vertex.rank
            }
            PagKind::ProcessPerspective => {
                vertex.per_process.len() == pag.nprocs()
                    && vertex
                        .per_process
                        .iter()
                        .enumerate()
                        .all(|(i, s)| s.rank == i)
            }
        };
        if !shape_ok {
            result.add_error(ValidationError::BadVector {
                vertex: vertex.signature(),
                message: format!(
                    "{} per-process entries do not match a {}",
                    vertex.per_process.len(),
                    pag.kind()
                ),
            });
            continue;
        }

        if let Some(sample) = vertex
            .per_process
            .iter()
            .find(|s| !(0.0..=MAX_PERCENT).contains(&s.percent))
        {
            result.add_error(ValidationError::PercentOutOfRange {
                vertex: vertex.signature(),
                rank: sample.rank,
                percent: sample.percent,
            });
        }

        let expected = mean_percent(&vertex.per_process);
        if (expected - vertex.cyc_avg_percent).abs() > AVG_EPSILON {
            result.add_error(ValidationError::AverageMismatch {
                vertex: vertex.signature(),
                stored: vertex.cyc_avg_percent,
                expected,
            });
        }
    }
}

fn validate_signatures(pag: &Pag, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for vertex in pag.vertices() {
        let key = (vertex.name.as_str(), vertex.saddr, vertex.caller.as_str());
        if !seen.insert(key) {
            result.add_error(ValidationError::DuplicateSignature {
                signature: format!("{} <- {}", vertex.signature(), vertex.caller),
            });
        }
    }
}

fn validate_rank_order(pag: &Pag, result: &mut ValidationResult) {
    let mut per_rank: HashMap<usize, DiGraphMap<usize, ()>> = HashMap::new();
    for edge in pag.edges() {
        if edge.kind == EdgeKind::Comm {
            continue;
        }
        let Some(rank) = edge.src_rank else {
            continue;
        };
        per_rank
            .entry(rank)
            .or_default()
            .add_edge(edge.src.index(), edge.dst.index(), ());

        if edge.kind == EdgeKind::Flow {
            if let (Some(src_ts), Some(dst_ts)) = (edge.src_ts, edge.dst_ts) {
                if dst_ts < src_ts {
                    result.add_error(ValidationError::FlowOrder {
                        edge: edge.id.index(),
                        rank,
                    });
                }
            }
        }
    }

    let mut ranks: Vec<_> = per_rank.into_iter().collect();
    ranks.sort_by_key(|(rank, _)| *rank);
    for (rank, graph) in ranks {
        if is_cyclic_directed(&graph) {
            result.add_error(ValidationError::CyclicRank { rank });
        }
    }
}

fn validate_comm(pag: &Pag, result: &mut ValidationResult) {
    let mut incident = vec![0usize; pag.vertices().len()];
    for edge in pag.edges_of_kind(EdgeKind::Comm) {
        let src = &pag.vertices()[edge.src.index()];
        let dst = &pag.vertices()[edge.dst.index()];
        if src.kind != VertexKind::Send || dst.kind != VertexKind::Recv {
            result.add_error(ValidationError::CommMismatch {
                vertex: src.signature(),
                message: format!(
                    "comm edge {} joins a {} to a {}",
                    edge.id.index(),
                    src.kind.as_str(),
                    dst.kind.as_str()
                ),
            });
        }
        incident[edge.src.index()] += 1;
        incident[edge.dst.index()] += 1;
    }

    let mut unmatched = 0;
    for vertex in pag.vertices() {
        let count = incident[vertex.id.index()];
        let matched = match (vertex.kind.is_comm(), vertex.comm) {
            (true, Some(comm)) => comm.matched,
            (true, None) => {
                result.add_error(ValidationError::CommMismatch {
                    vertex: vertex.signature(),
                    message: "communication vertex without a marker".to_string(),
                });
                continue;
            }
            (false, _) => {
                if count > 0 {
                    result.add_error(ValidationError::CommMismatch {
                        vertex: vertex.signature(),
                        message: "call vertex has communication edges".to_string(),
                    });
                }
                continue;
            }
        };
        if !matched {
            unmatched += 1;
        }
        let expected = usize::from(matched);
        if count != expected {
            result.add_error(ValidationError::CommMismatch {
                vertex: vertex.signature(),
                message: format!(
                    "{count} communication edge(s), expected {expected} (matched = {matched})"
                ),
            });
        }
    }
    if unmatched > 0 {
        result.add_warning(ValidationWarning::UnmatchedComm { count: unmatched });
    }
}
