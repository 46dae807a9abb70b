//! Process-Perspective PAG folding.
//!
//! Time-dependent vertices are grouped into call-site classes keyed by
//! `(name, saddr, caller signature)`. Each class becomes one vertex whose
//! per-process vector has one entry per rank of the run.

use std::collections::HashMap;

use super::tdpag::percent_of;
use crate::config::CancelToken;
use crate::error::Result;
use crate::pag::{
    mean_percent, Edge, EdgeId, EdgeKind, Pag, PagKind, ProcSample, Vertex, VertexId,
};

type ClassKey<'a> = (&'a str, u64, &'a str);

pub(crate) fn fold(tdpag: &Pag, cancel: &CancelToken) -> Result<Pag> {
    let nprocs = tdpag.nprocs();
    let mut meta = tdpag.meta().clone();
    meta.kind = PagKind::ProcessPerspective;

    let mut index: HashMap<ClassKey<'_>, usize> = HashMap::new();
    let mut classes: Vec<Vertex> = Vec::new();
    let mut class_of: Vec<usize> = Vec::with_capacity(tdpag.vertices().len());

    for v in tdpag.vertices() {
        let key = (v.name.as_str(), v.saddr, v.caller.as_str());
        let class = *index.entry(key).or_insert_with(|| {
            classes.push(Vertex {
                id: VertexId(0),
                name: v.name.clone(),
                saddr: v.saddr,
                kind: v.kind,
                rank: None,
                caller: v.caller.clone(),
                enter_ts: None,
                exit_ts: None,
                calls: 0,
                per_process: (0..nprocs).map(ProcSample::new).collect(),
                cyc_avg_percent: 0.0,
                incomplete: false,
                comm: None,
            });
            classes.len() - 1
        });
        class_of.push(class);

        let acc = &mut classes[class];
        acc.calls += 1;
        acc.incomplete |= v.incomplete;
        for sample in &v.per_process {
            if let Some(slot) = acc.per_process.get_mut(sample.rank) {
                slot.cycles += sample.cycles;
                slot.time_ns += sample.time_ns;
                slot.bytes += sample.bytes;
            }
        }
    }

    let mut ppag = Pag::new(meta);
    for mut class in classes {
        cancel.check()?;
        for slot in &mut class.per_process {
            let total = tdpag.meta().total_cycles.get(slot.rank).copied().unwrap_or(0);
            slot.percent = percent_of(slot.cycles, total);
        }
        class.cyc_avg_percent = mean_percent(&class.per_process);
        ppag.push_vertex(class);
    }

    let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();
    let mut edges: Vec<Edge> = Vec::new();
    for edge in tdpag.edges_of_kind(EdgeKind::Call) {
        let key = (class_of[edge.src.index()], class_of[edge.dst.index()]);
        let slot = *edge_index.entry(key).or_insert_with(|| {
            edges.push(Edge {
                id: EdgeId(0),
                src: VertexId(key.0),
                dst: VertexId(key.1),
                kind: EdgeKind::Call,
                src_rank: None,
                dst_rank: None,
                src_ts: None,
                dst_ts: None,
                weight: 0,
                comm: None,
            });
            edges.len() - 1
        });
        edges[slot].weight += 1;
    }
    for edge in edges {
        ppag.push_edge(edge);
    }

    Ok(ppag)
}
