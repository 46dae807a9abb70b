//! Send/receive matching across ranks.
//!
//! Markers are grouped into channels `(source rank, destination rank, tag)`.
//! Within a channel, sends are visited in time order and each takes the
//! earliest receive still available:
//!
//! - receives that completed more than `tolerance_ns` before the send cannot
//!   belong to it or to any later send, so they are skipped and stay unmatched;
//! - the first remaining receive is taken if it completed within `window_ns`
//!   after the send, otherwise the send stays unmatched.
//!
//! Timestamps are normalized per rank before they get here.

use std::collections::BTreeMap;

use crate::config::MatchConfig;
use crate::pag::VertexId;

/// A send or receive marker placed in the time-dependent PAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkerRef {
    pub vertex: VertexId,
    pub rank: usize,
    pub peer: usize,
    pub tag: i32,
    /// Time since the rank's first event.
    pub norm_ts: u64,
    pub raw_ts: u64,
    pub bytes: u64,
    pub blocking: bool,
}

type Channel = (usize, usize, i32);

fn channels<F>(markers: &[MarkerRef], key: F) -> BTreeMap<Channel, Vec<usize>>
where
    F: Fn(&MarkerRef) -> Channel,
{
    let mut map: BTreeMap<Channel, Vec<usize>> = BTreeMap::new();
    for (i, marker) in markers.iter().enumerate() {
        map.entry(key(marker)).or_default().push(i);
    }
    for indices in map.values_mut() {
        indices.sort_by_key(|&i| markers[i].norm_ts);
    }
    map
}

/// Pair sends with receives. Returns `(send index, receive index)` pairs
/// ordered by send vertex.
pub(crate) fn match_markers(
    sends: &[MarkerRef],
    recvs: &[MarkerRef],
    config: MatchConfig,
) -> Vec<(usize, usize)> {
    let send_channels = channels(sends, |m| (m.rank, m.peer, m.tag));
    let mut recv_channels = channels(recvs, |m| (m.peer, m.rank, m.tag));

    let mut pairs = Vec::new();
    for (channel, send_indices) in send_channels {
        let Some(recv_indices) = recv_channels.remove(&channel) else {
            continue;
        };
        let mut next = 0;
        for s in send_indices {
            let send_ts = sends[s].norm_ts;
            while next < recv_indices.len()
                && recvs[recv_indices[next]].norm_ts.saturating_add(config.tolerance_ns) < send_ts
            {
                next += 1;
            }
            if next == recv_indices.len() {
                break;
            }
            let r = recv_indices[next];
            if recvs[r].norm_ts <= send_ts.saturating_add(config.window_ns) {
                pairs.push((s, r));
                next += 1;
            }
        }
    }

    pairs.sort_by_key(|&(s, _)| sends[s].vertex);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(vertex: usize, rank: usize, peer: usize, tag: i32, ts: u64) -> MarkerRef {
        MarkerRef {
            vertex: VertexId(vertex),
            rank,
            peer,
            tag,
            norm_ts: ts,
            raw_ts: ts,
            bytes: 8,
            blocking: true,
        }
    }

    const CFG: MatchConfig = MatchConfig {
        tolerance_ns: 10,
        window_ns: 1_000,
    };

    #[test]
    fn test_fifo_matching_per_channel() {
        let sends = vec![marker(0, 0, 1, 1, 100), marker(1, 0, 1, 1, 200)];
        let recvs = vec![marker(2, 1, 0, 1, 150), marker(3, 1, 0, 1, 250)];
        assert_eq!(match_markers(&sends, &recvs, CFG), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_tag_and_direction_must_agree() {
        let sends = vec![marker(0, 0, 1, 1, 100)];
        let wrong_tag = vec![marker(1, 1, 0, 2, 150)];
        let wrong_peer = vec![marker(1, 1, 2, 1, 150)];
        assert!(match_markers(&sends, &wrong_tag, CFG).is_empty());
        assert!(match_markers(&sends, &wrong_peer, CFG).is_empty());
    }

    #[test]
    fn test_recv_long_before_send_left_unmatched() {
        // The first receive predates the send by more than the tolerance.
        let sends = vec![marker(0, 0, 1, 1, 500)];
        let recvs = vec![marker(1, 1, 0, 1, 100), marker(2, 1, 0, 1, 600)];
        assert_eq!(match_markers(&sends, &recvs, CFG), vec![(0, 1)]);
    }

    #[test]
    fn test_recv_outside_window_left_unmatched() {
        let sends = vec![marker(0, 0, 1, 1, 100)];
        let recvs = vec![marker(1, 1, 0, 1, 100 + CFG.window_ns + 1)];
        assert!(match_markers(&sends, &recvs, CFG).is_empty());
    }

    #[test]
    fn test_tolerance_absorbs_clock_skew() {
        // Rank 1's clock runs 40ns behind, so its receives look 35ns early.
        let sends: Vec<_> = (0..5)
            .map(|i| marker(i, 0, 1, 0, 1_000 + i as u64 * 10_000))
            .collect();
        let recvs: Vec<_> = (0..5)
            .map(|i| marker(10 + i, 1, 0, 0, 1_000 + i as u64 * 10_000 + 5 - 40))
            .collect();

        let matched_with = |tolerance_ns| {
            let cfg = MatchConfig {
                tolerance_ns,
                window_ns: 1_000,
            };
            match_markers(&sends, &recvs, cfg).len()
        };
        assert_eq!(matched_with(0), 0);
        assert_eq!(matched_with(34), 0);
        assert_eq!(matched_with(35), 5);
        assert_eq!(matched_with(1_000), 5);
    }

    #[test]
    fn test_pairs_ordered_by_send_vertex() {
        let sends = vec![marker(7, 1, 0, 1, 10), marker(3, 0, 1, 1, 10)];
        let recvs = vec![marker(4, 1, 0, 1, 20), marker(8, 0, 1, 1, 20)];
        assert_eq!(match_markers(&sends, &recvs, CFG), vec![(1, 0), (0, 1)]);
    }
}
