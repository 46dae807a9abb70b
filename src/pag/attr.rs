//! Attribute values and the fixed attribute schema of vertices and edges.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const ID: &str = "id";
pub const NAME: &str = "name";
pub const SADDR: &str = "saddr";
pub const KIND: &str = "kind";
pub const RANK: &str = "rank";
pub const CALLER: &str = "caller";
/// Exclusive cycles summed over all ranks.
pub const CYC: &str = "CYC";
/// Mean over ranks of the per-rank cycle percentage.
pub const CYCAVGPERCENT: &str = "CYCAVGPERCENT";
/// Per-rank cycle percentages as a vector.
pub const CYCPERCENT: &str = "CYCPERCENT";
/// Inclusive wall time in nanoseconds summed over all ranks.
pub const TIME: &str = "TIME";
pub const CALLS: &str = "calls";
pub const INCOMPLETE: &str = "incomplete";
pub const ENTER_TS: &str = "enter_ts";
pub const EXIT_TS: &str = "exit_ts";
pub const PEER: &str = "peer";
pub const TAG: &str = "tag";
pub const BYTES: &str = "bytes";
pub const BLOCKING: &str = "blocking";
pub const MATCHED: &str = "matched";

pub const SRC: &str = "src";
pub const DST: &str = "dst";
pub const SRC_RANK: &str = "src_rank";
pub const DST_RANK: &str = "dst_rank";
pub const SRC_TS: &str = "src_ts";
pub const DST_TS: &str = "dst_ts";
pub const WEIGHT: &str = "weight";
pub const SKEW: &str = "skew_ns";

/// Core vertex attributes, always known to every graph.
pub const VERTEX_ATTRS: &[&str] = &[
    ID,
    NAME,
    SADDR,
    KIND,
    RANK,
    CALLER,
    CYC,
    CYCAVGPERCENT,
    CYCPERCENT,
    TIME,
    CALLS,
    INCOMPLETE,
    ENTER_TS,
    EXIT_TS,
    PEER,
    TAG,
    BYTES,
    BLOCKING,
    MATCHED,
];

/// Core edge attributes.
pub const EDGE_ATTRS: &[&str] = &[
    ID, KIND, SRC, DST, SRC_RANK, DST_RANK, SRC_TS, DST_TS, WEIGHT, TAG, BYTES, BLOCKING, SKEW,
];

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    UInt(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A code address, displayed in hex.
    Addr(u64),
    /// One value per rank.
    List(Vec<f64>),
}

impl AttrValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::UInt(v) | Self::Addr(v) => Some(*v as f64),
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(_) | Self::Bool(_) | Self::List(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Loose equality used by filters: numbers compare by value, everything
    /// else structurally.
    pub fn loosely_equals(&self, other: &AttrValue) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::UInt(v) => serde_json::Value::from(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Addr(a) => serde_json::Value::String(format!("{a:#x}")),
            Self::List(values) => serde_json::Value::from(values.clone()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Addr(a) => write!(f, "{a:#x}"),
            Self::List(values) => {
                let parts: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(AttrValue::Addr(0x4011a0).to_string(), "0x4011a0");
        assert_eq!(AttrValue::Float(50.0).to_string(), "50.00");
        assert_eq!(AttrValue::List(vec![80.0, 20.0]).to_string(), "[80.00, 20.00]");
    }

    #[test]
    fn test_loose_equality_crosses_numeric_variants() {
        assert!(AttrValue::UInt(3).loosely_equals(&AttrValue::Float(3.0)));
        assert!(AttrValue::Int(-1).loosely_equals(&AttrValue::Float(-1.0)));
        assert!(!AttrValue::Str("3".into()).loosely_equals(&AttrValue::UInt(3)));
    }

    #[test]
    fn test_schema_has_no_duplicates() {
        let mut names = VERTEX_ATTRS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), VERTEX_ATTRS.len());
    }
}
