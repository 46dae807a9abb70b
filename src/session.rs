//! The [`PerFlow`] context: one value holding configuration and collaborators,
//! exposing the whole workflow from launching a program to reporting.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::info;

use crate::build::{Diagnostic, PagBuilder};
use crate::config::{CancelToken, Config};
use crate::draw::{draw, GraphvizRenderer, Renderer};
use crate::error::{Error, Result};
use crate::launch::{run_launcher, CommandLauncher, LaunchRequest, Launcher};
use crate::pag::Pag;
use crate::passes::models::{self, ModelReport};
use crate::passes::{CommPattern, Findings, PassContext, PassOutput, PassRegistry};
use crate::query::{filter, Filterable, Predicate, VertexSet};
use crate::report::{report, Table};
use crate::trace::{latest_run_dir, read_pag_dir, read_trace_dir, save_pag_dir, RunDir};

/// Both graphs of a run.
#[derive(Debug, Clone)]
pub struct Pags {
    pub tdpag: Pag,
    pub ppag: Pag,
    /// Where the raw traces and persisted graphs live.
    pub run_dir: PathBuf,
    /// Recoverable problems found while building.
    pub diagnostics: Vec<Diagnostic>,
}

pub struct PerFlow {
    config: Config,
    launcher: Box<dyn Launcher>,
    renderer: Box<dyn Renderer>,
    registry: PassRegistry,
    cancel: CancelToken,
}

impl PerFlow {
    pub fn new(config: Config) -> Self {
        let registry = PassRegistry::with_builtins(&config.analysis);
        PerFlow {
            config,
            launcher: Box::new(CommandLauncher::new()),
            renderer: Box::new(GraphvizRenderer),
            registry,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }

    /// Register additional passes for use in pipelines.
    pub fn registry_mut(&mut self) -> &mut PassRegistry {
        &mut self.registry
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn context(&self, nprocs: usize) -> PassContext {
        PassContext::new(nprocs).with_cancel(self.cancel.clone())
    }

    /// Run `command` (which starts `binary` on `nprocs` ranks), then build and
    /// persist both graphs in a new run directory under the working directory.
    pub fn run(&self, binary: &Path, command: &str, nprocs: usize) -> Result<Pags> {
        if nprocs == 0 {
            return Err(Error::Construction("a run needs at least one process".into()));
        }
        let run = RunDir::create(&self.config.workdir, binary, nprocs, SystemTime::now())?;
        let request = LaunchRequest {
            binary: binary.to_path_buf(),
            command: command.to_string(),
            nprocs,
            trace_dir: run.trace_dir(),
            timeout: self.config.launch_timeout,
        };
        run_launcher(self.launcher.as_ref(), &request)?;
        self.cancel.check()?;
        self.build_run(&run, nprocs)
    }

    /// Build and persist the graphs of a run whose traces are already on disk.
    pub fn build_run(&self, run: &RunDir, nprocs: usize) -> Result<Pags> {
        let traces = read_trace_dir(&run.trace_dir(), nprocs)?;
        let output = PagBuilder::new(&self.config)
            .with_cancel(self.cancel.clone())
            .build(traces)?;
        save_pag_dir(run, &output.tdpag, &output.ppag)?;
        info!("Saved PAGs to {}", run.root().display());
        Ok(Pags {
            tdpag: output.tdpag,
            ppag: output.ppag,
            run_dir: run.root().to_path_buf(),
            diagnostics: output.diagnostics,
        })
    }

    /// Reload `(tdpag, ppag)` from a run directory.
    pub fn read_pag(&self, dir: &Path) -> Result<(Pag, Pag)> {
        read_pag_dir(&RunDir::open(dir))
    }

    /// Newest run directory for `nprocs` under the working directory.
    pub fn latest_run(&self, nprocs: usize) -> Result<Option<PathBuf>> {
        latest_run_dir(&self.config.workdir, nprocs)
    }

    pub fn filter<S: Filterable>(&self, set: &S, predicate: &Predicate) -> Result<S> {
        filter(set, predicate)
    }

    /// Rank `set` with the configured hotspot pass. The annotation in the
    /// output is not applied; pass it to [`Pag::annotate`] to keep it.
    pub fn hotspot_detection<'g>(&self, set: &VertexSet<'g>) -> Result<PassOutput<'g>> {
        let ctx = self.context(set.pag().nprocs());
        self.registry.get("hotspot")?.run(set, &ctx)
    }

    pub fn imbalance_analysis<'g>(
        &self,
        set: &VertexSet<'g>,
        nprocs: usize,
    ) -> Result<PassOutput<'g>> {
        self.registry
            .get("imbalance")?
            .run(set, &self.context(nprocs))
    }

    pub fn communication_pattern_analysis(&self, tdpag: &Pag, nprocs: usize) -> Result<CommPattern> {
        let output = self
            .registry
            .get("comm_pattern")?
            .run(&tdpag.vs(), &self.context(nprocs))?;
        match output.findings {
            Findings::CommPattern(pattern) => Ok(pattern),
            _ => Err(Error::Construction(
                "comm_pattern pass returned foreign findings".into(),
            )),
        }
    }

    pub fn report<S: Filterable>(&self, set: &S, attrs: &[&str]) -> Result<Table> {
        report(set, attrs)
    }

    /// Export `pag` as `.dot`, or render `.svg`, `.pdf` or `.png`.
    pub fn draw(&self, pag: &Pag, dest: &Path) -> Result<()> {
        draw(pag, dest, self.renderer.as_ref())
    }

    pub fn comm_hotspot_model(&self, pag: &mut Pag) -> Result<ModelReport> {
        let ctx = self.context(pag.nprocs());
        models::comm_hotspot_model(pag, &self.registry, &ctx, &self.config.analysis.comm_prefix)
    }

    pub fn profiler_model(&self, tdpag: &Pag, ppag: &mut Pag) -> Result<ModelReport> {
        let ctx = self.context(ppag.nprocs());
        models::profiler_model(
            tdpag,
            ppag,
            &self.registry,
            &ctx,
            &self.config.analysis.comm_prefix,
        )
    }

    pub fn imbalance_model(&self, pag: &mut Pag) -> Result<ModelReport> {
        let ctx = self.context(pag.nprocs());
        models::imbalance_model(pag, &self.registry, &ctx)
    }

    pub fn communication_pattern_model(&self, tdpag: &Pag) -> Result<ModelReport> {
        let ctx = self.context(tdpag.nprocs());
        models::communication_pattern_model(tdpag, &self.registry, &ctx)
    }
}

impl Default for PerFlow {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
