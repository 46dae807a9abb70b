//! Time-Dependent PAG assembly from per-rank call trees.

use super::calltree::RankTree;
use super::matching::{match_markers, MarkerRef};
use crate::config::MatchConfig;
use crate::pag::{
    mean_percent, signature, CommEdge, CommInfo, Edge, EdgeId, EdgeKind, Pag, PagMeta,
    ProcSample, Vertex, VertexId, VertexKind,
};

pub(crate) fn percent_of(cycles: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        cycles as f64 / total as f64 * 100.0
    }
}

fn intra_edge(kind: EdgeKind, rank: usize, src: (VertexId, u64), dst: (VertexId, u64)) -> Edge {
    Edge {
        id: EdgeId(0),
        src: src.0,
        dst: dst.0,
        kind,
        src_rank: Some(rank),
        dst_rank: Some(rank),
        src_ts: Some(src.1),
        dst_ts: Some(dst.1),
        weight: 1,
        comm: None,
    }
}

/// Lay out every rank's nodes as vertices, link them, and insert matched
/// communication edges. Returns the graph and the number of dangling markers.
pub(crate) fn assemble(trees: &[RankTree], meta: PagMeta, matching: MatchConfig) -> (Pag, usize) {
    let mut pag = Pag::new(meta);
    let mut sends = Vec::new();
    let mut recvs = Vec::new();

    for tree in trees {
        let rank = tree.rank;
        let base = pag.vertices().len();
        let id_of = |index: usize| VertexId(base + index);

        for node in &tree.nodes {
            let caller = node
                .parent
                .map(|p| signature(&tree.nodes[p].name, tree.nodes[p].saddr))
                .unwrap_or_default();
            let sample = ProcSample {
                rank,
                cycles: node.cycles,
                percent: percent_of(node.cycles, tree.total_cycles),
                time_ns: node.exit_ts - node.enter_ts,
                bytes: node.marker.map_or(0, |m| m.bytes),
            };
            let per_process = vec![sample];
            let vertex_id = pag.push_vertex(Vertex {
                id: VertexId(0),
                name: node.name.clone(),
                saddr: node.saddr,
                kind: node.kind,
                rank: Some(rank),
                caller,
                enter_ts: Some(node.enter_ts),
                exit_ts: Some(node.exit_ts),
                calls: 1,
                cyc_avg_percent: mean_percent(&per_process),
                per_process,
                incomplete: node.incomplete,
                comm: node.marker.map(|m| CommInfo {
                    peer: m.peer,
                    tag: m.tag,
                    bytes: m.bytes,
                    blocking: m.blocking,
                    matched: false,
                }),
            });

            if let Some(m) = node.marker {
                let marker = MarkerRef {
                    vertex: vertex_id,
                    rank,
                    peer: m.peer,
                    tag: m.tag,
                    norm_ts: node.enter_ts - tree.origin_ts,
                    raw_ts: node.enter_ts,
                    bytes: m.bytes,
                    blocking: m.blocking,
                };
                if node.kind == VertexKind::Send {
                    sends.push(marker);
                } else {
                    recvs.push(marker);
                }
            }
        }

        for (index, node) in tree.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                pag.push_edge(intra_edge(
                    EdgeKind::Call,
                    rank,
                    (id_of(parent), tree.nodes[parent].enter_ts),
                    (id_of(index), node.enter_ts),
                ));
            }
            if index > 0 {
                pag.push_edge(intra_edge(
                    EdgeKind::Flow,
                    rank,
                    (id_of(index - 1), tree.nodes[index - 1].enter_ts),
                    (id_of(index), node.enter_ts),
                ));
            }
        }
    }

    let pairs = match_markers(&sends, &recvs, matching);
    for &(s, r) in &pairs {
        let (send, recv) = (sends[s], recvs[r]);
        for id in [send.vertex, recv.vertex] {
            if let Some(comm) = pag.vertex_mut(id).comm.as_mut() {
                comm.matched = true;
            }
        }
        pag.push_edge(Edge {
            id: EdgeId(0),
            src: send.vertex,
            dst: recv.vertex,
            kind: EdgeKind::Comm,
            src_rank: Some(send.rank),
            dst_rank: Some(recv.rank),
            src_ts: Some(send.raw_ts),
            dst_ts: Some(recv.raw_ts),
            weight: 1,
            comm: Some(CommEdge {
                tag: send.tag,
                bytes: send.bytes,
                blocking: send.blocking,
                skew_ns: skew(send.norm_ts, recv.norm_ts),
                tolerance_ns: matching.tolerance_ns,
            }),
        });
    }

    let dangling = sends.len() + recvs.len() - 2 * pairs.len();
    (pag, dangling)
}

/// `recv - send`, saturated to the `i64` range.
fn skew(send_ts: u64, recv_ts: u64) -> i64 {
    let diff = i128::from(recv_ts) - i128::from(send_ts);
    diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_sign_and_saturation() {
        assert_eq!(skew(100, 110), 10);
        assert_eq!(skew(110, 100), -10);
        assert_eq!(skew(0, u64::MAX), i64::MAX);
        assert_eq!(skew(u64::MAX, 0), i64::MIN);
    }
}
