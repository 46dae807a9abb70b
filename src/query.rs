//! Vertex and edge sets and the predicates that filter them.
//!
//! Sets borrow the graph they were taken from and hold ids in order. Filtering
//! never mutates anything; it returns a new set over the same graph, so calls
//! chain:
//!
//! ```ignore
//! let comm = pag.vs().filter(&Predicate::name_prefix("comm_"))?;
//! let slow = comm.filter(&Predicate::compare("TIME", CmpOp::Gt, 1e6))?;
//! ```

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use regex::Regex;

use crate::error::{Error, Result};
use crate::pag::{attr, AttrValue, Edge, EdgeId, Pag, Vertex, VertexId};

/// An ordered subset of a graph's vertices.
#[derive(Debug, Clone)]
pub struct VertexSet<'g> {
    pag: &'g Pag,
    ids: Vec<VertexId>,
}

impl<'g> VertexSet<'g> {
    pub fn new(pag: &'g Pag, ids: Vec<VertexId>) -> Self {
        VertexSet { pag, ids }
    }

    pub fn pag(&self) -> &'g Pag {
        self.pag
    }

    pub fn ids(&self) -> &[VertexId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'g Vertex> + '_ {
        let pag = self.pag;
        self.ids.iter().filter_map(move |&id| pag.vertex(id))
    }

    pub fn names(&self) -> Vec<&'g str> {
        self.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn filter(&self, predicate: &Predicate) -> Result<Self> {
        filter(self, predicate)
    }
}

/// An ordered subset of a graph's edges.
#[derive(Debug, Clone)]
pub struct EdgeSet<'g> {
    pag: &'g Pag,
    ids: Vec<EdgeId>,
}

impl<'g> EdgeSet<'g> {
    pub fn new(pag: &'g Pag, ids: Vec<EdgeId>) -> Self {
        EdgeSet { pag, ids }
    }

    pub fn pag(&self) -> &'g Pag {
        self.pag
    }

    pub fn ids(&self) -> &[EdgeId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: EdgeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'g Edge> + '_ {
        let pag = self.pag;
        self.ids.iter().filter_map(move |&id| pag.edge(id))
    }

    pub fn filter(&self, predicate: &Predicate) -> Result<Self> {
        filter(self, predicate)
    }
}

/// A set whose items can be looked up by attribute name.
pub trait Filterable: Sized {
    type Id: Copy;

    fn item_ids(&self) -> &[Self::Id];
    fn item_attr(&self, id: Self::Id, name: &str) -> Option<AttrValue>;
    fn knows_attr(&self, name: &str) -> bool;
    fn with_ids(&self, ids: Vec<Self::Id>) -> Self;
}

impl Filterable for VertexSet<'_> {
    type Id = VertexId;

    fn item_ids(&self) -> &[VertexId] {
        &self.ids
    }

    fn item_attr(&self, id: VertexId, name: &str) -> Option<AttrValue> {
        self.pag.vertex_attr(id, name)
    }

    fn knows_attr(&self, name: &str) -> bool {
        self.pag.knows_vertex_attr(name)
    }

    fn with_ids(&self, ids: Vec<VertexId>) -> Self {
        VertexSet::new(self.pag, ids)
    }
}

impl Filterable for EdgeSet<'_> {
    type Id = EdgeId;

    fn item_ids(&self) -> &[EdgeId] {
        &self.ids
    }

    fn item_attr(&self, id: EdgeId, name: &str) -> Option<AttrValue> {
        self.pag.edge(id)?.attr(name)
    }

    fn knows_attr(&self, name: &str) -> bool {
        self.pag.knows_edge_attr(name)
    }

    fn with_ids(&self, ids: Vec<EdgeId>) -> Self {
        EdgeSet::new(self.pag, ids)
    }
}

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmpOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            _ => bail!("Invalid comparison operator: {s}. Must be one of: <, <=, >, >=, ==, !="),
        }
    }
}

/// A test applied to one attribute of each item.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Value equality; numbers compare by value regardless of variant.
    Equals { attr: String, value: AttrValue },
    /// The attribute's display text starts with `prefix`.
    Prefix { attr: String, prefix: String },
    /// The attribute's display text contains `needle`.
    Contains { attr: String, needle: String },
    /// Numeric comparison. Non-numeric values never match.
    Compare { attr: String, op: CmpOp, value: f64 },
    /// The attribute's display text matches `regex`.
    Matches { attr: String, regex: Regex },
}

impl Predicate {
    pub fn equals(attr: &str, value: impl Into<AttrValue>) -> Self {
        Self::Equals {
            attr: attr.to_string(),
            value: value.into(),
        }
    }

    pub fn prefix(attr: &str, prefix: &str) -> Self {
        Self::Prefix {
            attr: attr.to_string(),
            prefix: prefix.to_string(),
        }
    }

    pub fn contains(attr: &str, needle: &str) -> Self {
        Self::Contains {
            attr: attr.to_string(),
            needle: needle.to_string(),
        }
    }

    pub fn compare(attr: &str, op: CmpOp, value: f64) -> Self {
        Self::Compare {
            attr: attr.to_string(),
            op,
            value,
        }
    }

    pub fn matches(attr: &str, regex: Regex) -> Self {
        Self::Matches {
            attr: attr.to_string(),
            regex,
        }
    }

    pub fn name_prefix(prefix: &str) -> Self {
        Self::prefix(attr::NAME, prefix)
    }

    pub fn name_contains(needle: &str) -> Self {
        Self::contains(attr::NAME, needle)
    }

    /// The attribute this predicate reads.
    pub fn attr(&self) -> &str {
        match self {
            Self::Equals { attr, .. }
            | Self::Prefix { attr, .. }
            | Self::Contains { attr, .. }
            | Self::Compare { attr, .. }
            | Self::Matches { attr, .. } => attr,
        }
    }

    /// Whether `value` satisfies the predicate. Items lacking the attribute
    /// never match.
    pub fn test(&self, value: Option<&AttrValue>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Equals { value: want, .. } => value.loosely_equals(want),
            Self::Prefix { prefix, .. } => value.to_string().starts_with(prefix.as_str()),
            Self::Contains { needle, .. } => value.to_string().contains(needle.as_str()),
            Self::Compare { op, value: rhs, .. } => {
                value.as_f64().is_some_and(|lhs| op.apply(lhs, *rhs))
            }
            Self::Matches { regex, .. } => regex.is_match(&value.to_string()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { attr, value } => write!(f, "{attr} == {value}"),
            Self::Prefix { attr, prefix } => write!(f, "{attr} starts with '{prefix}'"),
            Self::Contains { attr, needle } => write!(f, "{attr} contains '{needle}'"),
            Self::Compare { attr, op, value } => write!(f, "{attr} {op} {value}"),
            Self::Matches { attr, regex } => write!(f, "{attr} =~ /{}/", regex.as_str()),
        }
    }
}

/// Keep the items of `set` that satisfy `predicate`, in their original order.
///
/// An empty result is not an error. Naming an attribute that neither the core
/// schema nor any derived namespace of the graph defines is.
pub fn filter<S: Filterable>(set: &S, predicate: &Predicate) -> Result<S> {
    let name = predicate.attr();
    if !set.knows_attr(name) {
        return Err(Error::InvalidAttribute {
            names: vec![name.to_string()],
        });
    }
    let ids = set
        .item_ids()
        .iter()
        .copied()
        .filter(|&id| predicate.test(set.item_attr(id, name).as_ref()))
        .collect();
    Ok(set.with_ids(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pag::tests::{call_vertex, ppag_of};
    use crate::pag::Annotation;

    fn sample() -> Pag {
        ppag_of(
            vec![
                call_vertex("main", &[10.0, 10.0]),
                call_vertex("comm_send", &[40.0, 10.0]),
                call_vertex("comm_recv", &[5.0, 35.0]),
                call_vertex("compute", &[45.0, 45.0]),
            ],
            2,
        )
    }

    #[test]
    fn test_name_prefix_keeps_order() {
        let pag = sample();
        let comm = pag.vs().filter(&Predicate::name_prefix("comm_")).unwrap();
        assert_eq!(comm.names(), vec!["comm_send", "comm_recv"]);
        assert_eq!(pag.vs().len(), 4);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let pag = sample();
        let none = pag.vs().filter(&Predicate::name_contains("MPI_")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let pag = sample();
        match pag.vs().filter(&Predicate::prefix("colour", "r")) {
            Err(Error::InvalidAttribute { names }) => assert_eq!(names, vec!["colour"]),
            other => panic!("expected InvalidAttribute, got {other:?}"),
        }
    }

    #[test]
    fn test_compare_and_chain() {
        let pag = sample();
        let set = pag
            .vs()
            .filter(&Predicate::name_prefix("comm_"))
            .unwrap()
            .filter(&Predicate::compare(attr::CYCAVGPERCENT, CmpOp::Ge, 25.0))
            .unwrap();
        assert_eq!(set.names(), vec!["comm_send"]);
    }

    #[test]
    fn test_equals_crosses_numeric_variants() {
        let pag = sample();
        let set = pag.vs().filter(&Predicate::equals("CYC", 500.0)).unwrap();
        assert_eq!(set.names(), vec!["comm_send"]);
    }

    #[test]
    fn test_regex_on_address() {
        let pag = sample();
        let re = Regex::new(r"^0x1[0-9a-f]{3}$").unwrap();
        let set = pag.vs().filter(&Predicate::matches(attr::SADDR, re)).unwrap();
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_derived_attribute_filter() {
        let mut pag = sample();
        let mut ann = Annotation::new("hotspot");
        ann.set(VertexId(3), "rank", 1u64);
        pag.annotate(ann);

        let ranked = pag
            .vs()
            .filter(&Predicate::compare("hotspot.rank", CmpOp::Le, 1.0))
            .unwrap();
        assert_eq!(ranked.names(), vec!["compute"]);
        assert!(pag
            .vs()
            .filter(&Predicate::compare("hotspot.score", CmpOp::Le, 1.0))
            .is_err());
    }

    #[test]
    fn test_cmp_op_from_str() {
        assert_eq!("<=".parse::<CmpOp>().unwrap(), CmpOp::Le);
        assert!("=>".parse::<CmpOp>().is_err());
    }
}
