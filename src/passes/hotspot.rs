//! Hotspot detection: rank vertices by a metric and keep the top of the list.

use serde::Serialize;

use super::{mean_stddev, Findings, Pass, PassContext, PassOutput};
use crate::config::{HotspotSelect, Metric};
use crate::error::{Error, Result};
use crate::pag::{Annotation, VertexId};
use crate::query::VertexSet;

pub const NAMESPACE: &str = "hotspot";

/// One selected vertex.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub id: VertexId,
    pub name: String,
    pub value: f64,
    /// 1-based position in the ranking.
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct HotspotPass {
    pub metric: Metric,
    pub select: HotspotSelect,
}

impl HotspotPass {
    pub fn new(metric: Metric, select: HotspotSelect) -> Self {
        HotspotPass { metric, select }
    }

    /// `(id, metric value)` sorted descending. Ties keep input order.
    fn rank<'g>(&self, set: &VertexSet<'g>) -> Result<Vec<(VertexId, f64)>> {
        let pag = set.pag();
        let mut ranked = Vec::with_capacity(set.len());
        for &id in set.ids() {
            let value = pag
                .vertex_attr(id, self.metric.as_str())
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    Error::missing_data(
                        pag.vertex(id).map_or_else(|| id.to_string(), |v| v.name.clone()),
                        format!("no numeric {} attribute", self.metric.as_str()),
                    )
                })?;
            ranked.push((id, value));
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }
}

impl Pass for HotspotPass {
    fn name(&self) -> &'static str {
        NAMESPACE
    }

    fn run<'g>(&self, set: &VertexSet<'g>, ctx: &PassContext) -> Result<PassOutput<'g>> {
        ctx.cancel.check()?;
        let ranked = self.rank(set)?;

        let selected: Vec<(VertexId, f64)> = match self.select {
            HotspotSelect::TopK(k) => ranked.into_iter().take(k).collect(),
            HotspotSelect::Above(limit) => ranked.into_iter().filter(|&(_, v)| v > limit).collect(),
            HotspotSelect::MeanPlusStdDev(k) => {
                let values: Vec<f64> = ranked.iter().map(|&(_, v)| v).collect();
                let (mean, stddev) = mean_stddev(&values);
                let limit = mean + k * stddev;
                ranked.into_iter().filter(|&(_, v)| v > limit).collect()
            }
        };

        let pag = set.pag();
        let mut annotation = Annotation::new(NAMESPACE);
        let mut hotspots = Vec::with_capacity(selected.len());
        for (i, &(id, value)) in selected.iter().enumerate() {
            annotation.set(id, "rank", (i + 1) as u64);
            annotation.set(id, "value", value);
            hotspots.push(Hotspot {
                id,
                name: pag.vertex(id).map(|v| v.name.clone()).unwrap_or_default(),
                value,
                rank: i + 1,
            });
        }

        Ok(PassOutput {
            set: VertexSet::new(pag, selected.iter().map(|&(id, _)| id).collect()),
            findings: Findings::Hotspot { hotspots },
            annotation: (!annotation.is_empty()).then_some(annotation),
        })
    }
}
