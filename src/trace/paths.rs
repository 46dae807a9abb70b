//! Run directory naming and file path management.
//!
//! A run directory is named `<binary-stem>-<nprocs>p-<unix-seconds>` and holds:
//!
//! ```text
//! trace/rank0.jsonl ...   raw per-rank event streams
//! tdpag/                  persisted time-dependent PAG
//! ppag/                   persisted process-perspective PAG
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::error::{Error, Result};
use crate::pag::PagKind;

/// Pattern: {stem}-{nprocs}p-{timestamp}
static RUN_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+)-(?P<nprocs>\d+)p-(?P<ts>\d+)$")
        .expect("Invalid run directory regex pattern")
});

/// Components of a run directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirName {
    pub stem: String,
    pub nprocs: usize,
    pub timestamp: u64,
}

impl RunDirName {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = RUN_DIR_RE.captures(name)?;
        Some(RunDirName {
            stem: caps["stem"].to_string(),
            nprocs: caps["nprocs"].parse().ok()?,
            timestamp: caps["ts"].parse().ok()?,
        })
    }

    pub fn format(&self) -> String {
        format!("{}-{}p-{}", self.stem, self.nprocs, self.timestamp)
    }
}

/// Paths of one persisted PAG.
#[derive(Debug, Clone)]
pub struct PagPaths {
    pub dir: PathBuf,
    pub meta: PathBuf,
    pub vertices: PathBuf,
    pub edges: PathBuf,
    pub derived: PathBuf,
}

impl PagPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            meta: dir.join("meta.json"),
            vertices: dir.join("vertices.jsonl"),
            edges: dir.join("edges.jsonl"),
            derived: dir.join("derived.json"),
        }
    }

    /// Files that must exist for the PAG to load.
    pub fn required(&self) -> [&PathBuf; 4] {
        [&self.meta, &self.vertices, &self.edges, &self.derived]
    }
}

/// A run directory on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn open(root: &Path) -> Self {
        RunDir {
            root: root.to_path_buf(),
        }
    }

    /// Create a fresh run directory for `binary` under `workdir`.
    pub fn create(workdir: &Path, binary: &Path, nprocs: usize, when: SystemTime) -> Result<Self> {
        let stem = binary
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        let timestamp = when
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let name = RunDirName {
            stem,
            nprocs,
            timestamp,
        };
        let run = RunDir::open(&workdir.join(name.format()));
        fs::create_dir_all(run.trace_dir()).map_err(|e| Error::persistence(&run.root, e))?;
        Ok(run)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> Option<RunDirName> {
        RunDirName::parse(&self.root.file_name()?.to_string_lossy())
    }

    pub fn trace_dir(&self) -> PathBuf {
        self.root.join("trace")
    }

    pub fn pag_paths(&self, kind: PagKind) -> PagPaths {
        PagPaths::new(&self.root.join(kind.as_str()))
    }
}

/// File name of a rank's raw stream.
pub fn rank_file_name(rank: usize) -> String {
    format!("rank{rank}.jsonl")
}

/// Rank encoded in a raw stream file name. Only the exact form written by
/// [`rank_file_name`] is accepted, so no two names map to one rank.
pub fn parse_rank_file_name(name: &str) -> Option<usize> {
    let rank = rank_digits(name)?.parse().ok()?;
    (rank_file_name(rank) == name).then_some(rank)
}

/// Whether `name` has the shape `rank<digits>.jsonl`, canonical or not.
pub fn is_rank_file_name(name: &str) -> bool {
    rank_digits(name).is_some_and(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
}

fn rank_digits(name: &str) -> Option<&str> {
    name.strip_prefix("rank")?.strip_suffix(".jsonl")
}

/// Newest run directory under `workdir` for the given process count.
pub fn latest_run_dir(workdir: &Path, nprocs: usize) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(workdir).map_err(|e| Error::persistence(workdir, e))?;

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| Error::persistence(workdir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = RunDirName::parse(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        if name.nprocs != nprocs {
            continue;
        }
        if best.as_ref().is_none_or(|(ts, _)| name.timestamp > *ts) {
            best = Some((name.timestamp, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}
