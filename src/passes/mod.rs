//! Analysis passes and their composition.
//!
//! A [`Pass`] reads a vertex set and the graph behind it and returns a
//! [`PassOutput`]: the selected subset, typed findings, and optionally an
//! [`Annotation`] of derived attributes in the pass's own namespace. Passes
//! never write to the graph; the caller decides whether to apply the
//! annotation with [`Pag::annotate`](crate::Pag::annotate).
//!
//! Passes are looked up by name in a [`PassRegistry`] and chained with a
//! [`Pipeline`]. The built-in models in [`models`] are nothing more than
//! fixed pipelines plus a report.

pub mod comm_pattern;
pub mod hotspot;
pub mod imbalance;
pub mod models;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::{AnalysisConfig, CancelToken};
use crate::error::{Error, Result};
use crate::pag::{Annotation, VertexId};
use crate::query::{Predicate, VertexSet};

pub use comm_pattern::{CommPattern, CommPatternPass, PatternClass};
pub use hotspot::{Hotspot, HotspotPass};
pub use imbalance::{ImbalanceFinding, ImbalancePass, ImbalanceReport};

/// Run-wide inputs every pass may read.
#[derive(Debug, Clone)]
pub struct PassContext {
    /// Number of ranks of the run the set came from.
    pub nprocs: usize,
    pub cancel: CancelToken,
}

impl PassContext {
    pub fn new(nprocs: usize) -> Self {
        PassContext {
            nprocs,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Typed result of a pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "pass", rename_all = "snake_case")]
pub enum Findings {
    Hotspot { hotspots: Vec<Hotspot> },
    Imbalance(ImbalanceReport),
    CommPattern(CommPattern),
}

#[derive(Debug, Clone)]
pub struct PassOutput<'g> {
    /// Vertices the pass selected, in the order the pass defines.
    pub set: VertexSet<'g>,
    pub findings: Findings,
    pub annotation: Option<Annotation>,
}

pub trait Pass: Send + Sync {
    /// Registry name, also used as the annotation namespace.
    fn name(&self) -> &'static str;

    fn run<'g>(&self, set: &VertexSet<'g>, ctx: &PassContext) -> Result<PassOutput<'g>>;
}

/// Named passes available to pipelines.
pub struct PassRegistry {
    passes: BTreeMap<String, Box<dyn Pass>>,
}

impl PassRegistry {
    pub fn new() -> Self {
        PassRegistry {
            passes: BTreeMap::new(),
        }
    }

    /// A registry holding `hotspot`, `imbalance` and `comm_pattern`, configured
    /// from `config`.
    pub fn with_builtins(config: &AnalysisConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(HotspotPass::new(
            config.hotspot_metric,
            config.hotspot,
        )));
        registry.register(Box::new(ImbalancePass::new(config.imbalance)));
        registry.register(Box::new(CommPatternPass::new(config.pattern)));
        registry
    }

    /// Add a pass, replacing any pass registered under the same name.
    pub fn register(&mut self, pass: Box<dyn Pass>) {
        self.passes.insert(pass.name().to_string(), pass);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Pass> {
        self.passes
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| Error::UnknownPass(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.keys().map(String::as_str).collect()
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::with_builtins(&AnalysisConfig::default())
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Filter(Predicate),
    Pass(String),
}

/// What a pipeline produced, step by step.
#[derive(Debug, Clone)]
pub struct PipelineOutput<'g> {
    /// Set left after the last step.
    pub set: VertexSet<'g>,
    /// Findings of each pass step, in step order.
    pub findings: Vec<Findings>,
    /// Annotations of each pass step, to be applied by the caller.
    pub annotations: Vec<Annotation>,
}

impl PipelineOutput<'_> {
    /// Release the borrow of the graph so annotations can be applied.
    pub fn detach(self) -> (Vec<VertexId>, Vec<Findings>, Vec<Annotation>) {
        (self.set.ids().to_vec(), self.findings, self.annotations)
    }
}

/// An explicit sequence of filters and passes. Each step consumes the set the
/// previous one produced.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.steps.push(Step::Filter(predicate));
        self
    }

    pub fn pass(mut self, name: &str) -> Self {
        self.steps.push(Step::Pass(name.to_string()));
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn run<'g>(
        &self,
        registry: &PassRegistry,
        input: VertexSet<'g>,
        ctx: &PassContext,
    ) -> Result<PipelineOutput<'g>> {
        // Resolve every name up front so a typo fails before any work is done.
        for step in &self.steps {
            if let Step::Pass(name) = step {
                registry.get(name)?;
            }
        }

        let mut output = PipelineOutput {
            set: input,
            findings: Vec::new(),
            annotations: Vec::new(),
        };
        for step in &self.steps {
            ctx.cancel.check()?;
            match step {
                Step::Filter(predicate) => {
                    output.set = output.set.filter(predicate)?;
                    debug!("filter {}: {} vertices left", predicate, output.set.len());
                }
                Step::Pass(name) => {
                    let result = registry.get(name)?.run(&output.set, ctx)?;
                    debug!("pass {}: {} vertices selected", name, result.set.len());
                    output.set = result.set;
                    output.findings.push(result.findings);
                    output.annotations.extend(result.annotation);
                }
            }
        }
        Ok(output)
    }
}

/// Mean and population standard deviation.
pub(crate) fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
