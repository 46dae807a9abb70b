//! Raw per-rank event records and their on-disk layout.
//!
//! The external tracer writes one JSON-lines file per rank. Each line is one
//! [`RawEvent`], tagged by its `kind` field:
//!
//! ```text
//! {"kind":"enter","ts":100,"name":"compute","saddr":4198816}
//! {"kind":"cycles","ts":150,"count":8000}
//! {"kind":"send","ts":180,"peer":1,"tag":1,"bytes":4096}
//! {"kind":"exit","ts":200}
//! ```

pub mod paths;
pub mod store;

use serde::{Deserialize, Serialize};

pub use paths::{latest_run_dir, PagPaths, RunDir, RunDirName};
pub use store::{read_pag_dir, read_trace_dir, save_pag_dir, write_trace_dir};

/// A communication marker as recorded by the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommRecord {
    pub ts: u64,
    /// Rank on the other side.
    pub peer: usize,
    pub tag: i32,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    /// Primitive name, e.g. `comm_isend`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub saddr: u64,
}

fn default_blocking() -> bool {
    true
}

/// One record of a rank's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEvent {
    Enter {
        ts: u64,
        name: String,
        #[serde(default)]
        saddr: u64,
    },
    Exit {
        ts: u64,
    },
    Cycles {
        ts: u64,
        count: u64,
    },
    Send(CommRecord),
    Recv(CommRecord),
}

impl RawEvent {
    pub fn ts(&self) -> u64 {
        match self {
            Self::Enter { ts, .. } | Self::Exit { ts } | Self::Cycles { ts, .. } => *ts,
            Self::Send(record) | Self::Recv(record) => record.ts,
        }
    }
}

/// The event stream of one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTrace {
    pub rank: usize,
    pub events: Vec<RawEvent>,
    /// The file ended in a partially written record that was dropped.
    pub torn_tail: bool,
}

impl RankTrace {
    pub fn new(rank: usize, events: Vec<RawEvent>) -> Self {
        RankTrace {
            rank,
            events,
            torn_tail: false,
        }
    }
}

/// All rank streams of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSet {
    /// Number of ranks the run was launched with.
    pub nprocs: usize,
    /// Available streams, ordered by rank.
    pub ranks: Vec<RankTrace>,
    /// Ranks below `nprocs` with no stream.
    pub missing: Vec<usize>,
}

impl TraceSet {
    /// Collect streams for a run of `nprocs` ranks, recording which are absent.
    pub fn new(nprocs: usize, mut ranks: Vec<RankTrace>) -> Self {
        ranks.sort_by_key(|r| r.rank);
        let missing = (0..nprocs)
            .filter(|rank| !ranks.iter().any(|r| r.rank == *rank))
            .collect();
        TraceSet {
            nprocs,
            ranks,
            missing,
        }
    }

    pub fn event_count(&self) -> usize {
        self.ranks.iter().map(|r| r.events.len()).sum()
    }
}
