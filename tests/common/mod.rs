//! Common test utilities for perflow integration tests.

use std::path::{Path, PathBuf};

use perflow::launch::{LaunchRequest, Launcher};
use perflow::trace::{write_trace_dir, CommRecord, RankTrace, RawEvent};
use perflow::TraceSet;

/// Builds one rank's event stream with explicit timestamps.
pub struct RankBuilder {
    rank: usize,
    events: Vec<RawEvent>,
}

#[allow(dead_code)]
impl RankBuilder {
    pub fn new(rank: usize) -> Self {
        RankBuilder {
            rank,
            events: Vec::new(),
        }
    }

    pub fn enter(mut self, ts: u64, name: &str, saddr: u64) -> Self {
        self.events.push(RawEvent::Enter {
            ts,
            name: name.to_string(),
            saddr,
        });
        self
    }

    pub fn exit(mut self, ts: u64) -> Self {
        self.events.push(RawEvent::Exit { ts });
        self
    }

    pub fn cycles(mut self, ts: u64, count: u64) -> Self {
        self.events.push(RawEvent::Cycles { ts, count });
        self
    }

    pub fn send(mut self, ts: u64, peer: usize, tag: i32, bytes: u64) -> Self {
        self.events.push(RawEvent::Send(comm(ts, peer, tag, bytes)));
        self
    }

    pub fn recv(mut self, ts: u64, peer: usize, tag: i32, bytes: u64) -> Self {
        self.events.push(RawEvent::Recv(comm(ts, peer, tag, bytes)));
        self
    }

    pub fn build(self) -> RankTrace {
        RankTrace::new(self.rank, self.events)
    }
}

fn comm(ts: u64, peer: usize, tag: i32, bytes: u64) -> CommRecord {
    CommRecord {
        ts,
        peer,
        tag,
        bytes,
        blocking: true,
        name: None,
        saddr: 0,
    }
}

/// Two ranks running `main -> A`, where A takes 80% of rank 0's cycles and
/// 20% of rank 1's, and rank 0 sends one message with tag 1 to rank 1. The
/// remaining cycles are sampled after `main` returns and stay unattributed.
#[allow(dead_code)]
pub fn two_rank_scenario() -> TraceSet {
    let rank0 = RankBuilder::new(0)
        .enter(0, "main", 0x400100)
        .enter(10, "A", 0x400200)
        .cycles(20, 80)
        .exit(30)
        .send(50, 1, 1, 4096)
        .exit(60)
        .cycles(70, 20)
        .build();
    let rank1 = RankBuilder::new(1)
        .enter(0, "main", 0x400100)
        .enter(10, "A", 0x400200)
        .cycles(20, 20)
        .exit(30)
        .recv(55, 0, 1, 4096)
        .exit(60)
        .cycles(70, 80)
        .build();
    TraceSet::new(2, vec![rank0, rank1])
}

/// Every rank enters `main` at 0 and then exchanges one message per
/// `(src, dst)` pair, one pair per 1000ns slot.
#[allow(dead_code)]
pub fn exchange_scenario(nprocs: usize, pairs: &[(usize, usize)]) -> TraceSet {
    let mut per_rank: Vec<Vec<RawEvent>> = (0..nprocs).map(|_| Vec::new()).collect();
    for (slot, &(src, dst)) in pairs.iter().enumerate() {
        let ts = 1_000 * (slot as u64 + 1);
        per_rank[src].push(RawEvent::Send(comm(ts, dst, 0, 256)));
        per_rank[dst].push(RawEvent::Recv(comm(ts + 5, src, 0, 256)));
    }
    let end = 1_000 * (pairs.len() as u64 + 2);

    let ranks = per_rank
        .into_iter()
        .enumerate()
        .map(|(rank, mut events)| {
            events.sort_by_key(RawEvent::ts);
            let mut stream = vec![
                RawEvent::Enter {
                    ts: 0,
                    name: "main".to_string(),
                    saddr: 0x400100,
                },
                RawEvent::Cycles { ts: 1, count: 100 },
            ];
            stream.extend(events);
            stream.push(RawEvent::Exit { ts: end });
            RankTrace::new(rank, stream)
        })
        .collect();
    TraceSet::new(nprocs, ranks)
}

/// Every ordered pair of distinct ranks.
#[allow(dead_code)]
pub fn all_pairs(nprocs: usize) -> Vec<(usize, usize)> {
    (0..nprocs)
        .flat_map(|s| (0..nprocs).filter(move |&d| d != s).map(move |d| (s, d)))
        .collect()
}

/// Each rank sends to both ring neighbors.
#[allow(dead_code)]
pub fn ring_pairs(nprocs: usize) -> Vec<(usize, usize)> {
    (0..nprocs)
        .flat_map(|r| [(r, (r + 1) % nprocs), (r, (r + nprocs - 1) % nprocs)])
        .collect()
}

/// Stands in for `mpirun`: writes a fixed trace set where the real program
/// would have written its streams.
pub struct FakeLauncher {
    pub traces: Option<TraceSet>,
}

impl Launcher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest) -> anyhow::Result<()> {
        match &self.traces {
            Some(traces) => {
                write_trace_dir(&request.trace_dir, traces)?;
                Ok(())
            }
            None => anyhow::bail!("mpirun: not enough slots available"),
        }
    }
}

/// Create an empty file to act as the traced binary.
#[allow(dead_code)]
pub fn fake_binary(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"").expect("Failed to create fake binary");
    path
}
