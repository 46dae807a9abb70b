//! Load imbalance across ranks.
//!
//! For each vertex the pass looks at its per-process vector of a metric and
//! computes a dispersion statistic. Vertices whose statistic exceeds the
//! threshold are selected. Both statistics are zero for an all-zero vector.

use serde::Serialize;

use super::{mean_stddev, Findings, Pass, PassContext, PassOutput};
use crate::config::{ImbalanceParams, ImbalanceStat, Metric};
use crate::error::{Error, Result};
use crate::pag::{Annotation, Vertex, VertexId};
use crate::query::VertexSet;

pub const NAMESPACE: &str = "imbalance";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImbalanceFinding {
    pub id: VertexId,
    pub name: String,
    /// Metric value per rank, indexed by rank.
    pub values: Vec<f64>,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// `(max - min) / mean`
    pub spread: f64,
    /// `stddev / mean`
    pub cv: f64,
    /// The configured statistic, one of the two above.
    pub stat: f64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImbalanceReport {
    pub metric: &'static str,
    pub stat: &'static str,
    pub threshold: f64,
    /// Every vertex of the input set, in input order.
    pub findings: Vec<ImbalanceFinding>,
}

impl ImbalanceReport {
    pub fn flagged(&self) -> impl Iterator<Item = &ImbalanceFinding> {
        self.findings.iter().filter(|f| f.flagged)
    }
}

#[derive(Debug, Clone)]
pub struct ImbalancePass {
    pub params: ImbalanceParams,
}

impl ImbalancePass {
    pub fn new(params: ImbalanceParams) -> Self {
        ImbalancePass { params }
    }

    fn vector(&self, vertex: &Vertex, nprocs: usize) -> Result<Vec<f64>> {
        if vertex.per_process.len() != nprocs {
            return Err(Error::missing_data(
                vertex.name.clone(),
                format!(
                    "per-process vector has {} of {nprocs} entries",
                    vertex.per_process.len()
                ),
            ));
        }
        let mut values = vec![0.0; nprocs];
        for sample in &vertex.per_process {
            let slot = values.get_mut(sample.rank).ok_or_else(|| {
                Error::missing_data(
                    vertex.name.clone(),
                    format!("sample for rank {} outside a {nprocs}-rank run", sample.rank),
                )
            })?;
            *slot = match self.params.metric {
                Metric::CyclePercent => sample.percent,
                Metric::Cycles => sample.cycles as f64,
                Metric::Time => sample.time_ns as f64,
            };
        }
        Ok(values)
    }

    fn measure(&self, vertex: &Vertex, nprocs: usize) -> Result<ImbalanceFinding> {
        let values = self.vector(vertex, nprocs)?;
        let (mean, stddev) = mean_stddev(&values);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (spread, cv) = if mean == 0.0 {
            (0.0, 0.0)
        } else {
            ((max - min) / mean, stddev / mean)
        };
        let stat = match self.params.stat {
            ImbalanceStat::Spread => spread,
            ImbalanceStat::CoefficientOfVariation => cv,
        };
        Ok(ImbalanceFinding {
            id: vertex.id,
            name: vertex.name.clone(),
            values,
            mean,
            min,
            max,
            spread,
            cv,
            stat,
            flagged: stat > self.params.threshold,
        })
    }
}

fn stat_name(stat: ImbalanceStat) -> &'static str {
    match stat {
        ImbalanceStat::Spread => "spread",
        ImbalanceStat::CoefficientOfVariation => "cv",
    }
}

impl Pass for ImbalancePass {
    fn name(&self) -> &'static str {
        NAMESPACE
    }

    fn run<'g>(&self, set: &VertexSet<'g>, ctx: &PassContext) -> Result<PassOutput<'g>> {
        if ctx.nprocs == 0 {
            return Err(Error::missing_data(
                "*",
                "imbalance needs the run's process count",
            ));
        }

        let mut findings = Vec::with_capacity(set.len());
        let mut annotation = Annotation::new(NAMESPACE);
        for vertex in set.iter() {
            ctx.cancel.check()?;
            let finding = self.measure(vertex, ctx.nprocs)?;
            annotation.set(vertex.id, "stat", finding.stat);
            annotation.set(vertex.id, "cv", finding.cv);
            annotation.set(vertex.id, "spread", finding.spread);
            findings.push(finding);
        }

        let flagged = findings
            .iter()
            .filter(|f| f.flagged)
            .map(|f| f.id)
            .collect();
        Ok(PassOutput {
            set: VertexSet::new(set.pag(), flagged),
            findings: Findings::Imbalance(ImbalanceReport {
                metric: self.params.metric.as_str(),
                stat: stat_name(self.params.stat),
                threshold: self.params.threshold,
                findings,
            }),
            annotation: (!annotation.is_empty()).then_some(annotation),
        })
    }
}
