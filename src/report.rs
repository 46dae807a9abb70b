//! Tabular reports over vertex and edge sets.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pag::AttrValue;
use crate::query::Filterable;

/// Widest a text column gets before values are cut.
const MAX_COLUMN_WIDTH: usize = 50;

/// Marker printed for a cell whose item lacks the attribute.
pub const MISSING: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "table" => Ok(Self::Table),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => bail!("Invalid output format: {s}. Must be one of: table, csv, json"),
        }
    }
}

/// Selected attributes of each item of a set, one row per item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    /// `None` where the item has no such attribute.
    pub rows: Vec<Vec<Option<AttrValue>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<AttrValue>>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&AttrValue> {
        let index = self.column(column)?;
        self.rows.get(row)?.get(index)?.as_ref()
    }

    fn string_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.as_ref().map_or_else(|| MISSING.to_string(), |v| v.to_string()))
                    .collect()
            })
            .collect()
    }

    /// Aligned text with a header and a separator line.
    pub fn to_text(&self) -> String {
        let rows = self.string_rows();
        if rows.is_empty() {
            return "(no results)\n".to_string();
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &rows {
            for (i, val) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(val.chars().count());
                }
            }
        }
        for w in &mut widths {
            *w = (*w).min(MAX_COLUMN_WIDTH);
        }

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(h, &width)| format!("{h:width$}"))
            .collect();
        out.push_str(header.join(" | ").trim_end());
        out.push('\n');

        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&sep.join("-+-"));
        out.push('\n');

        for row in &rows {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(v, &width)| {
                    let truncated = if v.chars().count() > width && width > 3 {
                        let head: String = v.chars().take(width - 3).collect();
                        format!("{head}...")
                    } else {
                        v.clone()
                    };
                    format!("{truncated:width$}")
                })
                .collect();
            out.push_str(line.join(" | ").trim_end());
            out.push('\n');
        }
        out
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| csv_field(c)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in self.string_rows() {
            let fields: Vec<String> = row.iter().map(|v| csv_field(v)).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }

    /// One JSON object per row, keyed by column. Missing cells are `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            v.as_ref().map_or(serde_json::Value::Null, AttrValue::to_json),
                        )
                    })
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::Value::Array(rows)
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => self.to_text(),
            OutputFormat::Csv => self.to_csv(),
            OutputFormat::Json => format!("{:#}\n", self.to_json()),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Tabulate `attrs` for every item of `set`, in set order.
///
/// Unknown attribute names produce a column of missing markers; only when no
/// requested name is known at all is the request rejected.
pub fn report<S: Filterable>(set: &S, attrs: &[&str]) -> Result<Table> {
    let unknown: Vec<String> = attrs
        .iter()
        .filter(|a| !set.knows_attr(a))
        .map(|a| a.to_string())
        .collect();
    if !attrs.is_empty() && unknown.len() == attrs.len() {
        return Err(Error::InvalidAttribute { names: unknown });
    }

    let mut table = Table::new(attrs.iter().map(|a| a.to_string()).collect());
    for &id in set.item_ids() {
        table.push_row(attrs.iter().map(|a| set.item_attr(id, a)).collect());
    }
    Ok(table)
}
