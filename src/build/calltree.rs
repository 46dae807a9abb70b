//! Per-rank call tree reconstruction.
//!
//! Each rank's stream is independent, so this step runs in parallel with no
//! shared state. Enter/exit records are matched by nesting depth; cycle samples
//! are charged to the innermost open call; communication markers become leaf
//! nodes under it.

use tracing::debug;

use super::Diagnostic;
use crate::error::{Error, Result};
use crate::pag::VertexKind;
use crate::trace::{CommRecord, RankTrace, RawEvent};

pub const DEFAULT_SEND_NAME: &str = "comm_send";
pub const DEFAULT_RECV_NAME: &str = "comm_recv";

/// Marker data of a communication node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Marker {
    pub peer: usize,
    pub tag: i32,
    pub bytes: u64,
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallNode {
    pub name: String,
    pub saddr: u64,
    pub kind: VertexKind,
    /// Index of the enclosing call in the same tree.
    pub parent: Option<usize>,
    pub enter_ts: u64,
    pub exit_ts: u64,
    /// Exclusive cycles.
    pub cycles: u64,
    /// Closed because the stream ended, not by an exit record.
    pub incomplete: bool,
    pub marker: Option<Marker>,
}

/// Call tree of one rank, nodes in enter order (parents before children).
#[derive(Debug, Clone)]
pub(crate) struct RankTree {
    pub rank: usize,
    /// Timestamp of the first event, used to normalize away clock offsets.
    pub origin_ts: u64,
    pub nodes: Vec<CallNode>,
    /// All cycles sampled on this rank, attributed or not.
    pub total_cycles: u64,
    pub incomplete: bool,
    pub diagnostics: Vec<Diagnostic>,
}

fn invalid(rank: usize, index: usize, reason: String) -> Error {
    Error::InvalidTrace {
        rank,
        line: index + 1,
        reason,
    }
}

/// Rebuild the call tree of one rank's stream.
pub(crate) fn reconstruct(trace: RankTrace, nprocs: usize) -> Result<RankTree> {
    let rank = trace.rank;
    let origin_ts = trace.events.first().map_or(0, RawEvent::ts);

    let mut tree = RankTree {
        rank,
        origin_ts,
        nodes: Vec::new(),
        total_cycles: 0,
        incomplete: trace.torn_tail,
        diagnostics: Vec::new(),
    };
    let mut stack: Vec<usize> = Vec::new();
    let mut last_ts = origin_ts;

    for (index, event) in trace.events.into_iter().enumerate() {
        let ts = event.ts();
        if ts < last_ts {
            return Err(invalid(
                rank,
                index,
                format!("timestamp {ts} precedes {last_ts}"),
            ));
        }
        last_ts = ts;

        match event {
            RawEvent::Enter { ts, name, saddr } => {
                tree.nodes.push(CallNode {
                    name,
                    saddr,
                    kind: VertexKind::Call,
                    parent: stack.last().copied(),
                    enter_ts: ts,
                    exit_ts: ts,
                    cycles: 0,
                    incomplete: false,
                    marker: None,
                });
                stack.push(tree.nodes.len() - 1);
            }
            RawEvent::Exit { ts } => match stack.pop() {
                Some(open) => tree.nodes[open].exit_ts = ts,
                None => tree.diagnostics.push(Diagnostic::UnmatchedExit { rank, ts }),
            },
            RawEvent::Cycles { count, .. } => {
                tree.total_cycles += count;
                if let Some(&open) = stack.last() {
                    tree.nodes[open].cycles += count;
                }
            }
            RawEvent::Send(record) => {
                let node = comm_node(rank, index, nprocs, record, VertexKind::Send, &stack)?;
                tree.nodes.push(node);
            }
            RawEvent::Recv(record) => {
                let node = comm_node(rank, index, nprocs, record, VertexKind::Recv, &stack)?;
                tree.nodes.push(node);
            }
        }
    }

    if !stack.is_empty() {
        for &open in &stack {
            let node = &mut tree.nodes[open];
            node.exit_ts = last_ts;
            node.incomplete = true;
        }
        tree.incomplete = true;
        tree.diagnostics.push(Diagnostic::TruncatedStream {
            rank,
            open_calls: stack.len(),
        });
    }
    if trace.torn_tail {
        tree.diagnostics.push(Diagnostic::TornRecord { rank });
    }

    debug!(
        "Rank {}: {} nodes, {} cycles",
        rank,
        tree.nodes.len(),
        tree.total_cycles
    );
    Ok(tree)
}

fn comm_node(
    rank: usize,
    index: usize,
    nprocs: usize,
    record: CommRecord,
    kind: VertexKind,
    stack: &[usize],
) -> Result<CallNode> {
    if record.peer >= nprocs {
        return Err(invalid(
            rank,
            index,
            format!("peer rank {} outside a {nprocs}-rank run", record.peer),
        ));
    }
    let default_name = match kind {
        VertexKind::Send => DEFAULT_SEND_NAME,
        _ => DEFAULT_RECV_NAME,
    };
    Ok(CallNode {
        name: record.name.unwrap_or_else(|| default_name.to_string()),
        saddr: record.saddr,
        kind,
        parent: stack.last().copied(),
        enter_ts: record.ts,
        exit_ts: record.ts,
        cycles: 0,
        incomplete: false,
        marker: Some(Marker {
            peer: record.peer,
            tag: record.tag,
            bytes: record.bytes,
            blocking: record.blocking,
        }),
    })
}
