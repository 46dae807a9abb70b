//! perflow library - Program Abstraction Graphs for parallel programs.
//!
//! Per-rank event traces of a multi-process run are merged into two graphs:
//! a time-dependent PAG (every call instance on every rank, with call, flow and
//! communication edges) and a process-perspective PAG (one vertex per call
//! site carrying per-rank attribute vectors). Both can be filtered, analyzed
//! with composable passes, reported as tables and drawn with Graphviz.
//!
//! # Modules
//!
//! - [`trace`] - Raw trace records, run directories and PAG persistence
//! - [`build`] - Call tree reconstruction, send/recv matching and folding
//! - [`pag`] - The shared vertex/edge model and derived attributes
//! - [`query`] - Vertex/edge sets and filter predicates
//! - [`passes`] - Hotspot, imbalance and communication pattern passes
//! - [`report`] / [`draw`] - Tables and Graphviz output
//! - [`validate`] - Structural invariants of built and loaded graphs
//!
//! # Example
//!
//! ```no_run
//! use perflow::{Config, PerFlow, Predicate};
//! use std::path::Path;
//!
//! let perflow = PerFlow::new(Config::default());
//! let mut pags = perflow
//!     .run(Path::new("./cg.B.8"), "mpirun -n 8 ./cg.B.8", 8)
//!     .expect("Failed to build PAGs");
//!
//! let comm = perflow
//!     .filter(&pags.ppag.vs(), &Predicate::name_prefix("comm_"))
//!     .expect("Failed to filter");
//! println!("{} communication call sites", comm.len());
//!
//! let model = perflow
//!     .comm_hotspot_model(&mut pags.ppag)
//!     .expect("Failed to run model");
//! print!("{}", model.table);
//! ```

pub mod build;
pub mod config;
pub mod draw;
pub mod error;
pub mod launch;
pub mod pag;
pub mod passes;
pub mod query;
pub mod report;
pub mod session;
pub mod trace;
pub mod validate;

// Re-export for convenience
pub use build::{BuildOutput, Diagnostic, PagBuilder};
pub use config::{CancelToken, Config, MatchConfig};
pub use error::{Error, Result};
pub use pag::{AttrValue, Edge, EdgeKind, Pag, PagKind, Vertex, VertexId, VertexKind};
pub use passes::{Pass, PassContext, PassOutput, PassRegistry, Pipeline};
pub use query::{CmpOp, EdgeSet, Predicate, VertexSet};
pub use report::{OutputFormat, Table};
pub use session::{Pags, PerFlow};
pub use trace::{latest_run_dir, RunDir, TraceSet};
pub use validate::{validate_pag, ValidationError, ValidationResult, ValidationWarning};
