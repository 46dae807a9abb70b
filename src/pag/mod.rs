//! Program Abstraction Graph model shared by both PAG variants.
//!
//! A [`Pag`] is either time-dependent (one vertex per call instance per rank,
//! with causal edges) or process-perspective (one vertex per call-site class,
//! carrying a per-rank attribute vector). Both use the same [`Vertex`] and
//! [`Edge`] types.
//!
//! Graphs are immutable after construction. The only mutation is
//! [`Pag::annotate`], which writes a whole derived-attribute namespace at once.

pub mod attr;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::{EdgeSet, VertexSet};
pub use attr::AttrValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub usize);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagKind {
    TimeDependent,
    ProcessPerspective,
}

impl PagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeDependent => "tdpag",
            Self::ProcessPerspective => "ppag",
        }
    }
}

impl fmt::Display for PagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexKind {
    Call,
    Send,
    Recv,
}

impl VertexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Send => "send",
            Self::Recv => "recv",
        }
    }

    pub fn is_comm(&self) -> bool {
        !matches!(self, Self::Call)
    }
}

/// Measurements of one vertex on one rank.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcSample {
    pub rank: usize,
    /// Exclusive cycles.
    pub cycles: u64,
    /// `cycles` as a percentage of the rank's total cycles.
    pub percent: f64,
    /// Inclusive wall time in nanoseconds.
    pub time_ns: u64,
    /// Bytes moved by communication vertices.
    pub bytes: u64,
}

impl ProcSample {
    pub fn new(rank: usize) -> Self {
        ProcSample {
            rank,
            ..Default::default()
        }
    }
}

/// Mean of the per-rank cycle percentages; the one place `CYCAVGPERCENT` is derived.
pub fn mean_percent(samples: &[ProcSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.percent).sum::<f64>() / samples.len() as f64
}

/// Communication marker carried by a time-dependent send/recv vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommInfo {
    pub peer: usize,
    pub tag: i32,
    pub bytes: u64,
    pub blocking: bool,
    /// False for dangling markers that found no counterpart.
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub name: String,
    pub saddr: u64,
    pub kind: VertexKind,
    /// Owning rank; only set in the time-dependent PAG.
    pub rank: Option<usize>,
    /// Signature of the immediate caller, empty for roots.
    pub caller: String,
    pub enter_ts: Option<u64>,
    pub exit_ts: Option<u64>,
    /// Number of call instances folded into this vertex.
    pub calls: u64,
    pub per_process: Vec<ProcSample>,
    pub cyc_avg_percent: f64,
    /// Set when the vertex was closed by a truncated stream.
    pub incomplete: bool,
    pub comm: Option<CommInfo>,
}

impl Vertex {
    /// `name@0xaddr`, the identity used when folding call sites.
    pub fn signature(&self) -> String {
        signature(&self.name, self.saddr)
    }

    pub fn total_cycles(&self) -> u64 {
        self.per_process.iter().map(|s| s.cycles).sum()
    }

    pub fn total_time(&self) -> u64 {
        self.per_process.iter().map(|s| s.time_ns).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.per_process.iter().map(|s| s.bytes).sum()
    }

    /// Look up a core attribute by name.
    pub fn attr(&self, name: &str) -> Option<AttrValue> {
        let value = match name {
            attr::ID => AttrValue::UInt(self.id.0 as u64),
            attr::NAME => AttrValue::Str(self.name.clone()),
            attr::SADDR => AttrValue::Addr(self.saddr),
            attr::KIND => AttrValue::from(self.kind.as_str()),
            attr::RANK => AttrValue::UInt(self.rank? as u64),
            attr::CALLER => AttrValue::Str(self.caller.clone()),
            attr::CYC => AttrValue::UInt(self.total_cycles()),
            attr::CYCAVGPERCENT => AttrValue::Float(self.cyc_avg_percent),
            attr::CYCPERCENT => {
                AttrValue::List(self.per_process.iter().map(|s| s.percent).collect())
            }
            attr::TIME => AttrValue::UInt(self.total_time()),
            attr::CALLS => AttrValue::UInt(self.calls),
            attr::INCOMPLETE => AttrValue::Bool(self.incomplete),
            attr::ENTER_TS => AttrValue::UInt(self.enter_ts?),
            attr::EXIT_TS => AttrValue::UInt(self.exit_ts?),
            attr::PEER => AttrValue::UInt(self.comm?.peer as u64),
            attr::TAG => AttrValue::Int(i64::from(self.comm?.tag)),
            attr::BLOCKING => AttrValue::Bool(self.comm?.blocking),
            attr::MATCHED => AttrValue::Bool(self.comm?.matched),
            attr::BYTES if self.kind.is_comm() => AttrValue::UInt(self.total_bytes()),
            _ => return None,
        };
        Some(value)
    }
}

pub(crate) fn signature(name: &str, saddr: u64) -> String {
    format!("{name}@{saddr:#x}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Caller to callee.
    Call,
    /// One instance to the next on the same rank.
    Flow,
    /// Matched send to receive, across ranks.
    Comm,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Flow => "flow",
            Self::Comm => "comm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommEdge {
    pub tag: i32,
    pub bytes: u64,
    pub blocking: bool,
    /// Normalized receive time minus normalized send time.
    pub skew_ns: i64,
    /// Tolerance the matcher ran with.
    pub tolerance_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub src: VertexId,
    pub dst: VertexId,
    pub kind: EdgeKind,
    pub src_rank: Option<usize>,
    pub dst_rank: Option<usize>,
    pub src_ts: Option<u64>,
    pub dst_ts: Option<u64>,
    /// Number of instance edges folded into this one.
    pub weight: u64,
    pub comm: Option<CommEdge>,
}

impl Edge {
    pub fn attr(&self, name: &str) -> Option<AttrValue> {
        let value = match name {
            attr::ID => AttrValue::UInt(self.id.0 as u64),
            attr::KIND => AttrValue::from(self.kind.as_str()),
            attr::SRC => AttrValue::UInt(self.src.0 as u64),
            attr::DST => AttrValue::UInt(self.dst.0 as u64),
            attr::SRC_RANK => AttrValue::UInt(self.src_rank? as u64),
            attr::DST_RANK => AttrValue::UInt(self.dst_rank? as u64),
            attr::SRC_TS => AttrValue::UInt(self.src_ts?),
            attr::DST_TS => AttrValue::UInt(self.dst_ts?),
            attr::WEIGHT => AttrValue::UInt(self.weight),
            attr::TAG => AttrValue::Int(i64::from(self.comm?.tag)),
            attr::BYTES => AttrValue::UInt(self.comm?.bytes),
            attr::BLOCKING => AttrValue::Bool(self.comm?.blocking),
            attr::SKEW => AttrValue::Int(self.comm?.skew_ns),
            _ => return None,
        };
        Some(value)
    }
}

/// Derived attributes of one namespace: key -> vertex -> value.
pub type Namespace = BTreeMap<String, BTreeMap<VertexId, AttrValue>>;

/// A batch of derived attributes produced by one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    namespace: String,
    values: Namespace,
}

impl Annotation {
    pub fn new(namespace: impl Into<String>) -> Self {
        Annotation {
            namespace: namespace.into(),
            values: Namespace::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&mut self, id: VertexId, key: &str, value: impl Into<AttrValue>) {
        self.values
            .entry(key.to_string())
            .or_default()
            .insert(id, value.into());
    }

    pub fn get(&self, id: VertexId, key: &str) -> Option<&AttrValue> {
        self.values.get(key)?.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-rank totals and graph-wide metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagMeta {
    pub kind: PagKind,
    pub nprocs: usize,
    /// Total cycles sampled on each rank, attributed or not.
    pub total_cycles: Vec<u64>,
    /// Ranks whose stream ended with open calls or a torn record.
    pub incomplete_ranks: Vec<usize>,
    /// Ranks with no trace file at all.
    pub missing_ranks: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pag {
    meta: PagMeta,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    derived: BTreeMap<String, Namespace>,
}

impl Pag {
    pub(crate) fn new(meta: PagMeta) -> Self {
        Pag {
            meta,
            vertices: Vec::new(),
            edges: Vec::new(),
            derived: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        meta: PagMeta,
        vertices: Vec<Vertex>,
        edges: Vec<Edge>,
        derived: BTreeMap<String, Namespace>,
    ) -> Self {
        Pag {
            meta,
            vertices,
            edges,
            derived,
        }
    }

    /// Append a vertex, assigning the next id.
    pub(crate) fn push_vertex(&mut self, mut vertex: Vertex) -> VertexId {
        let id = VertexId(self.vertices.len());
        vertex.id = id;
        self.vertices.push(vertex);
        id
    }

    pub(crate) fn push_edge(&mut self, mut edge: Edge) -> EdgeId {
        let id = EdgeId(self.edges.len());
        edge.id = id;
        self.edges.push(edge);
        id
    }

    pub(crate) fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.0]
    }

    pub fn meta(&self) -> &PagMeta {
        &self.meta
    }

    pub fn kind(&self) -> PagKind {
        self.meta.kind
    }

    pub fn nprocs(&self) -> usize {
        self.meta.nprocs
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.0)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0)
    }

    /// All vertices, in id order.
    pub fn vs(&self) -> VertexSet<'_> {
        VertexSet::new(self, self.vertices.iter().map(|v| v.id).collect())
    }

    /// All edges, in id order.
    pub fn es(&self) -> EdgeSet<'_> {
        EdgeSet::new(self, self.edges.iter().map(|e| e.id).collect())
    }

    /// Vertex with the given name, first in id order.
    pub fn find(&self, name: &str) -> Option<&Vertex> {
        self.vertices.iter().find(|v| v.name == name)
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Write a pass's derived attributes, replacing any earlier values of the
    /// same namespace. Structural data is never touched.
    pub fn annotate(&mut self, annotation: Annotation) {
        self.derived.insert(annotation.namespace, annotation.values);
    }

    pub fn derived(&self) -> &BTreeMap<String, Namespace> {
        &self.derived
    }

    /// Look up a derived attribute written as `namespace.key`.
    pub fn derived_value(&self, id: VertexId, qualified: &str) -> Option<&AttrValue> {
        let (namespace, key) = qualified.split_once('.')?;
        self.derived.get(namespace)?.get(key)?.get(&id)
    }

    /// Core or derived vertex attribute.
    pub fn vertex_attr(&self, id: VertexId, name: &str) -> Option<AttrValue> {
        let vertex = self.vertex(id)?;
        vertex
            .attr(name)
            .or_else(|| self.derived_value(id, name).cloned())
    }

    /// Whether `name` is part of the vertex schema or an existing derived key.
    pub fn knows_vertex_attr(&self, name: &str) -> bool {
        if attr::VERTEX_ATTRS.contains(&name) {
            return true;
        }
        match name.split_once('.') {
            Some((namespace, key)) => self
                .derived
                .get(namespace)
                .is_some_and(|ns| ns.contains_key(key)),
            None => false,
        }
    }

    pub fn knows_edge_attr(&self, name: &str) -> bool {
        attr::EDGE_ATTRS.contains(&name)
    }

    /// Distinct ranks that own at least one vertex.
    pub fn ranks(&self) -> Vec<usize> {
        let seen: HashSet<usize> = self.vertices.iter().filter_map(|v| v.rank).collect();
        let mut ranks: Vec<usize> = seen.into_iter().collect();
        ranks.sort_unstable();
        ranks
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn call_vertex(name: &str, percents: &[f64]) -> Vertex {
        let per_process: Vec<ProcSample> = percents
            .iter()
            .enumerate()
            .map(|(rank, &percent)| ProcSample {
                rank,
                cycles: (percent * 10.0) as u64,
                percent,
                time_ns: 1_000,
                bytes: 0,
            })
            .collect();
        Vertex {
            id: VertexId(0),
            name: name.to_string(),
            saddr: 0x1000,
            kind: VertexKind::Call,
            rank: None,
            caller: String::new(),
            enter_ts: None,
            exit_ts: None,
            calls: 1,
            cyc_avg_percent: mean_percent(&per_process),
            per_process,
            incomplete: false,
            comm: None,
        }
    }

    pub(crate) fn ppag_of(vertices: Vec<Vertex>, nprocs: usize) -> Pag {
        let mut pag = Pag::new(PagMeta {
            kind: PagKind::ProcessPerspective,
            nprocs,
            total_cycles: vec![1000; nprocs],
            incomplete_ranks: Vec::new(),
            missing_ranks: Vec::new(),
        });
        for v in vertices {
            pag.push_vertex(v);
        }
        pag
    }

    #[test]
    fn test_mean_percent() {
        let v = call_vertex("A", &[80.0, 20.0]);
        assert!((v.cyc_avg_percent - 50.0).abs() < 1e-9);
        assert_eq!(mean_percent(&[]), 0.0);
    }

    #[test]
    fn test_vertex_attr_lookup() {
        let v = call_vertex("A", &[80.0, 20.0]);
        assert_eq!(v.attr("name"), Some(AttrValue::from("A")));
        assert_eq!(v.attr("saddr"), Some(AttrValue::Addr(0x1000)));
        assert_eq!(v.attr("CYC"), Some(AttrValue::UInt(1000)));
        assert_eq!(v.attr("rank"), None);
        assert_eq!(v.attr("peer"), None);
        assert_eq!(v.attr("bytes"), None);
        assert_eq!(v.attr("nonsense"), None);
    }

    #[test]
    fn test_annotate_replaces_namespace_only() {
        let mut pag = ppag_of(vec![call_vertex("A", &[1.0]), call_vertex("B", &[2.0])], 1);
        let before = pag.vertices().to_vec();

        let mut first = Annotation::new("hotspot");
        first.set(VertexId(0), "rank", 1u64);
        first.set(VertexId(1), "rank", 2u64);
        pag.annotate(first);

        let mut second = Annotation::new("hotspot");
        second.set(VertexId(1), "rank", 1u64);
        pag.annotate(second);

        assert_eq!(pag.derived_value(VertexId(0), "hotspot.rank"), None);
        assert_eq!(
            pag.vertex_attr(VertexId(1), "hotspot.rank"),
            Some(AttrValue::UInt(1))
        );
        assert!(pag.knows_vertex_attr("hotspot.rank"));
        assert!(!pag.knows_vertex_attr("hotspot.score"));
        assert_eq!(pag.vertices(), before.as_slice());
    }

    #[test]
    fn test_push_assigns_sequential_ids() {
        let pag = ppag_of(vec![call_vertex("A", &[1.0]), call_vertex("B", &[2.0])], 1);
        let ids: Vec<usize> = pag.vertices().iter().map(|v| v.id.index()).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(pag.find("B").map(|v| v.id), Some(VertexId(1)));
    }
}
