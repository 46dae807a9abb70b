//! Communication pattern analysis over a time-dependent PAG.
//!
//! Matched communication edges whose send vertex is in the input set are
//! summed into rank-by-rank count and byte matrices, and the pattern is
//! classified from the shape of the count matrix.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use super::{Findings, Pass, PassContext, PassOutput};
use crate::config::PatternParams;
use crate::error::Result;
use crate::pag::{Annotation, EdgeKind, VertexId};
use crate::query::VertexSet;

pub const NAMESPACE: &str = "comm_pattern";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternClass {
    /// No traffic at all.
    Idle,
    /// Most rank pairs talk to each other.
    AllToAll,
    /// Traffic stays between ranks adjacent on a ring.
    NearestNeighbor,
    /// Anything else: a few specific pairs.
    PointToPoint,
}

impl PatternClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AllToAll => "all-to-all",
            Self::NearestNeighbor => "nearest-neighbor",
            Self::PointToPoint => "point-to-point",
        }
    }
}

impl fmt::Display for PatternClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommPattern {
    pub nprocs: usize,
    /// `counts[src][dst]`: matched messages from `src` to `dst`.
    pub counts: Vec<Vec<u64>>,
    /// `bytes[src][dst]`: bytes carried by those messages.
    pub bytes: Vec<Vec<u64>>,
    /// Share of ordered off-diagonal rank pairs with any traffic.
    pub density: f64,
    /// Share of communicating pairs at ring distance one.
    pub locality: f64,
    pub class: PatternClass,
    /// Communication markers in the input set with no counterpart.
    pub unmatched: usize,
}

impl CommPattern {
    pub fn total_messages(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes.iter().flatten().sum()
    }

    /// Non-zero `(src, dst, messages, bytes)` entries in row-major order.
    pub fn pairs(&self) -> Vec<(usize, usize, u64, u64)> {
        let mut pairs = Vec::new();
        for (src, row) in self.counts.iter().enumerate() {
            for (dst, &count) in row.iter().enumerate() {
                if count > 0 {
                    pairs.push((src, dst, count, self.bytes[src][dst]));
                }
            }
        }
        pairs
    }
}

fn ring_distance(a: usize, b: usize, n: usize) -> usize {
    let d = a.abs_diff(b);
    d.min(n - d)
}

/// Classify a count matrix.
pub fn classify(counts: &[Vec<u64>], params: PatternParams) -> (f64, f64, PatternClass) {
    let n = counts.len();
    let mut connected = 0usize;
    let mut local = 0usize;
    for (src, row) in counts.iter().enumerate() {
        for (dst, &count) in row.iter().enumerate() {
            if src == dst || count == 0 {
                continue;
            }
            connected += 1;
            if ring_distance(src, dst, n) == 1 {
                local += 1;
            }
        }
    }
    if connected == 0 {
        return (0.0, 0.0, PatternClass::Idle);
    }

    let density = connected as f64 / (n * (n - 1)) as f64;
    let locality = local as f64 / connected as f64;
    let class = if density >= params.dense_threshold {
        PatternClass::AllToAll
    } else if locality >= params.locality_threshold {
        PatternClass::NearestNeighbor
    } else {
        PatternClass::PointToPoint
    };
    (density, locality, class)
}

#[derive(Debug, Clone)]
pub struct CommPatternPass {
    pub params: PatternParams,
}

impl CommPatternPass {
    pub fn new(params: PatternParams) -> Self {
        CommPatternPass { params }
    }
}

impl Pass for CommPatternPass {
    fn name(&self) -> &'static str {
        NAMESPACE
    }

    fn run<'g>(&self, set: &VertexSet<'g>, ctx: &PassContext) -> Result<PassOutput<'g>> {
        ctx.cancel.check()?;
        let pag = set.pag();
        let n = ctx.nprocs;
        let members: HashSet<VertexId> = set.ids().iter().copied().collect();

        let mut counts = vec![vec![0u64; n]; n];
        let mut bytes = vec![vec![0u64; n]; n];
        let mut involved = HashSet::new();
        let mut annotation = Annotation::new(NAMESPACE);

        for edge in pag.edges_of_kind(EdgeKind::Comm) {
            if !members.contains(&edge.src) {
                continue;
            }
            let (Some(src), Some(dst)) = (edge.src_rank, edge.dst_rank) else {
                continue;
            };
            if src >= n || dst >= n {
                continue;
            }
            let carried = edge.comm.map_or(0, |c| c.bytes);
            counts[src][dst] += 1;
            bytes[src][dst] += carried;
            involved.insert(edge.src);
            involved.insert(edge.dst);
            annotation.set(edge.src, "distance", ring_distance(src, dst, n) as u64);
        }

        let unmatched = set
            .iter()
            .filter(|v| v.comm.is_some_and(|c| !c.matched))
            .count();
        let (density, locality, class) = classify(&counts, self.params);

        let ids = pag
            .vertices()
            .iter()
            .map(|v| v.id)
            .filter(|id| involved.contains(id))
            .collect();
        Ok(PassOutput {
            set: VertexSet::new(pag, ids),
            findings: Findings::CommPattern(CommPattern {
                nprocs: n,
                counts,
                bytes,
                density,
                locality,
                class,
                unmatched,
            }),
            annotation: (!annotation.is_empty()).then_some(annotation),
        })
    }
}
