//! Reading and writing raw traces and persisted PAGs.
//!
//! This is the only module that touches the filesystem for trace data. It does
//! no analysis: raw streams are parsed into [`TraceSet`]s, and PAGs are written
//! as one metadata file plus JSON-lines tables so they can be reloaded without
//! re-running the target program.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::paths::{
    is_rank_file_name, parse_rank_file_name, rank_file_name, PagPaths, RunDir,
};
use super::{RankTrace, RawEvent, TraceSet};
use crate::error::{Error, Result};
use crate::pag::{Edge, Namespace, Pag, PagKind, PagMeta, Vertex};
use crate::validate::validate_pag;

/// Bumped whenever the persisted layout changes.
pub const PAG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
    format_version: u32,
    #[serde(flatten)]
    meta: PagMeta,
    vertex_count: usize,
    edge_count: usize,
}

/// Parse one rank's JSON-lines stream.
///
/// A malformed final line is a torn tail left by a process that died while
/// writing; it is dropped and the trace is flagged. A malformed line anywhere
/// else is corruption and fails the read.
pub fn parse_rank_stream<R: BufRead>(rank: usize, reader: R, path: &Path) -> Result<RankTrace> {
    let lines: Vec<String> = reader
        .lines()
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::persistence(path, e))?;
    let last = lines.iter().rposition(|l| !l.trim().is_empty());

    let mut trace = RankTrace::new(rank, Vec::with_capacity(lines.len()));
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => trace.events.push(event),
            Err(e) if Some(i) == last => {
                warn!(
                    "Rank {} stream {} ends in a torn record at line {}: {}",
                    rank,
                    path.display(),
                    i + 1,
                    e
                );
                trace.torn_tail = true;
            }
            Err(e) => {
                return Err(Error::InvalidTrace {
                    rank,
                    line: i + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(trace)
}

/// Read every rank stream in a raw trace directory.
///
/// Ranks at or above `nprocs` are ignored with a warning; absent ranks are
/// recorded in [`TraceSet::missing`] and left to the builder to report.
pub fn read_trace_dir(dir: &Path, nprocs: usize) -> Result<TraceSet> {
    let entries = fs::read_dir(dir).map_err(|e| Error::persistence(dir, e))?;

    let mut ranks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::persistence(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rank) = parse_rank_file_name(&name) else {
            if is_rank_file_name(&name) {
                return Err(Error::persistence(
                    entry.path(),
                    "rank stream names must be rank<N>.jsonl without leading zeros",
                ));
            }
            continue;
        };
        if rank >= nprocs {
            warn!(
                "Ignoring stream for rank {} in a {}-rank run: {}",
                rank,
                nprocs,
                entry.path().display()
            );
            continue;
        }
        let path = entry.path();
        let file = File::open(&path).map_err(|e| Error::persistence(&path, e))?;
        let trace = parse_rank_stream(rank, BufReader::new(file), &path)?;
        debug!("Read {} events for rank {}", trace.events.len(), rank);
        ranks.push(trace);
    }

    Ok(TraceSet::new(nprocs, ranks))
}

/// Write a trace set in the raw layout, one file per rank.
pub fn write_trace_dir(dir: &Path, traces: &TraceSet) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;
    for trace in &traces.ranks {
        let path = dir.join(rank_file_name(trace.rank));
        write_json_lines(&path, &trace.events)?;
    }
    Ok(())
}

fn write_json_lines<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::persistence(path, e))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item).map_err(|e| Error::persistence(path, e))?;
        writer
            .write_all(b"\n")
            .map_err(|e| Error::persistence(path, e))?;
    }
    writer.flush().map_err(|e| Error::persistence(path, e))
}

fn read_json_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| Error::persistence(path, e))?;
    let mut items = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::persistence(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .map_err(|e| Error::persistence(path, format!("line {}: {e}", i + 1)))?;
        items.push(item);
    }
    Ok(items)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::persistence(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| Error::persistence(path, e))?;
    writer.flush().map_err(|e| Error::persistence(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| Error::persistence(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::persistence(path, e))
}

/// Persist one PAG into `paths.dir`.
pub fn save_pag(paths: &PagPaths, pag: &Pag) -> Result<()> {
    fs::create_dir_all(&paths.dir).map_err(|e| Error::persistence(&paths.dir, e))?;

    let meta = MetaFile {
        format_version: PAG_FORMAT_VERSION,
        meta: pag.meta().clone(),
        vertex_count: pag.vertices().len(),
        edge_count: pag.edges().len(),
    };
    write_json(&paths.meta, &meta)?;
    write_json_lines(&paths.vertices, pag.vertices())?;
    write_json_lines(&paths.edges, pag.edges())?;
    write_json(&paths.derived, pag.derived())
}

/// Load and validate one persisted PAG.
pub fn load_pag(paths: &PagPaths, expected: PagKind) -> Result<Pag> {
    for path in paths.required() {
        if !path.exists() {
            return Err(Error::persistence(path, "file not found"));
        }
    }

    let meta: MetaFile = read_json(&paths.meta)?;
    if meta.format_version != PAG_FORMAT_VERSION {
        return Err(Error::persistence(
            &paths.meta,
            format!(
                "format version {} (expected {PAG_FORMAT_VERSION})",
                meta.format_version
            ),
        ));
    }
    if meta.meta.kind != expected {
        return Err(Error::persistence(
            &paths.meta,
            format!("holds a {} (expected {expected})", meta.meta.kind),
        ));
    }

    let vertices: Vec<Vertex> = read_json_lines(&paths.vertices)?;
    if vertices.len() != meta.vertex_count {
        return Err(Error::persistence(
            &paths.vertices,
            format!(
                "{} vertices, metadata says {}",
                vertices.len(),
                meta.vertex_count
            ),
        ));
    }
    let edges: Vec<Edge> = read_json_lines(&paths.edges)?;
    if edges.len() != meta.edge_count {
        return Err(Error::persistence(
            &paths.edges,
            format!("{} edges, metadata says {}", edges.len(), meta.edge_count),
        ));
    }
    let derived: BTreeMap<String, Namespace> = read_json(&paths.derived)?;

    let pag = Pag::from_parts(meta.meta, vertices, edges, derived);
    let result = validate_pag(&pag);
    if let Some(err) = result.errors.first() {
        return Err(Error::persistence(
            &paths.dir,
            format!("{} validation error(s), first: {err}", result.errors.len()),
        ));
    }
    Ok(pag)
}

/// Persist both graphs of a run.
pub fn save_pag_dir(run: &RunDir, tdpag: &Pag, ppag: &Pag) -> Result<()> {
    save_pag(&run.pag_paths(PagKind::TimeDependent), tdpag)?;
    save_pag(&run.pag_paths(PagKind::ProcessPerspective), ppag)
}

/// Reload both graphs of a run: `(tdpag, ppag)`.
pub fn read_pag_dir(run: &RunDir) -> Result<(Pag, Pag)> {
    if !run.root().is_dir() {
        return Err(Error::persistence(run.root(), "not a directory"));
    }
    let tdpag = load_pag(
        &run.pag_paths(PagKind::TimeDependent),
        PagKind::TimeDependent,
    )?;
    let ppag = load_pag(
        &run.pag_paths(PagKind::ProcessPerspective),
        PagKind::ProcessPerspective,
    )?;
    Ok((tdpag, ppag))
}
