//! Built-in models: fixed pipelines followed by a report.
//!
//! Models only use what the public pass, query and report APIs expose. Each
//! one applies the annotations its passes produced to the graph it was given,
//! so the derived columns stay available for later filters and reports.

use serde::Serialize;

use super::{
    CommPattern, Findings, Hotspot, ImbalanceReport, PassContext, PassOutput, PassRegistry,
    Pipeline,
};
use crate::error::Result;
use crate::pag::{attr, AttrValue, Pag, VertexId};
use crate::query::{Predicate, VertexSet};
use crate::report::{report, Table};

pub const HOTSPOT_COLUMNS: &[&str] = &[attr::NAME, attr::CYCAVGPERCENT, attr::SADDR];

pub const PROFILER_COLUMNS: &[&str] = &[
    attr::NAME,
    attr::CYCAVGPERCENT,
    attr::TIME,
    attr::CALLS,
    "hotspot.rank",
    "imbalance.stat",
    "imbalance.cv",
];

pub const IMBALANCE_COLUMNS: &[&str] = &[
    attr::NAME,
    attr::CYCAVGPERCENT,
    attr::CYCPERCENT,
    "imbalance.stat",
];

/// Table and typed findings of a model run.
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub table: Table,
    pub findings: Vec<Findings>,
}

impl ModelReport {
    pub fn hotspots(&self) -> Option<&[Hotspot]> {
        self.findings.iter().find_map(|f| match f {
            Findings::Hotspot { hotspots } => Some(hotspots.as_slice()),
            _ => None,
        })
    }

    pub fn imbalance(&self) -> Option<&ImbalanceReport> {
        self.findings.iter().find_map(|f| match f {
            Findings::Imbalance(report) => Some(report),
            _ => None,
        })
    }

    pub fn pattern(&self) -> Option<&CommPattern> {
        self.findings.iter().find_map(|f| match f {
            Findings::CommPattern(pattern) => Some(pattern),
            _ => None,
        })
    }
}

/// Run `pipeline` over all of `pag`, apply its annotations and return the
/// surviving ids with the findings.
fn run_and_annotate(
    pag: &mut Pag,
    pipeline: &Pipeline,
    registry: &PassRegistry,
    ctx: &PassContext,
) -> Result<(Vec<VertexId>, Vec<Findings>)> {
    let (ids, findings, annotations) = pipeline.run(registry, pag.vs(), ctx)?.detach();
    for annotation in annotations {
        pag.annotate(annotation);
    }
    Ok((ids, findings))
}

/// Communication vertices ranked by time share.
pub fn comm_hotspot_model(
    pag: &mut Pag,
    registry: &PassRegistry,
    ctx: &PassContext,
    comm_prefix: &str,
) -> Result<ModelReport> {
    let pipeline = Pipeline::new()
        .filter(Predicate::name_prefix(comm_prefix))
        .pass("hotspot");
    let (ids, findings) = run_and_annotate(pag, &pipeline, registry, ctx)?;
    let table = report(&VertexSet::new(pag, ids), HOTSPOT_COLUMNS)?;
    Ok(ModelReport { table, findings })
}

/// Communication hotspots of the process-perspective graph with their load
/// imbalance, plus the communication pattern of the time-dependent graph.
pub fn profiler_model(
    tdpag: &Pag,
    ppag: &mut Pag,
    registry: &PassRegistry,
    ctx: &PassContext,
    comm_prefix: &str,
) -> Result<ModelReport> {
    let hotspots = Pipeline::new()
        .filter(Predicate::name_prefix(comm_prefix))
        .pass("hotspot");
    let (ids, mut findings) = run_and_annotate(ppag, &hotspots, registry, ctx)?;

    // Imbalance is measured on every hotspot, not just narrowed to the flagged ones.
    let PassOutput {
        findings: measured,
        annotation,
        ..
    } = registry
        .get("imbalance")?
        .run(&VertexSet::new(ppag, ids.clone()), ctx)?;
    findings.push(measured);
    if let Some(annotation) = annotation {
        ppag.annotate(annotation);
    }

    let pattern = registry.get("comm_pattern")?.run(&tdpag.vs(), ctx)?;
    findings.push(pattern.findings);

    let table = report(&VertexSet::new(ppag, ids), PROFILER_COLUMNS)?;
    Ok(ModelReport { table, findings })
}

/// Imbalance over a whole graph, reporting only the flagged vertices.
pub fn imbalance_model(
    pag: &mut Pag,
    registry: &PassRegistry,
    ctx: &PassContext,
) -> Result<ModelReport> {
    let pipeline = Pipeline::new().pass("imbalance");
    let (ids, findings) = run_and_annotate(pag, &pipeline, registry, ctx)?;
    let table = report(&VertexSet::new(pag, ids), IMBALANCE_COLUMNS)?;
    Ok(ModelReport { table, findings })
}

/// Rank-to-rank traffic of a time-dependent graph.
pub fn communication_pattern_model(
    tdpag: &Pag,
    registry: &PassRegistry,
    ctx: &PassContext,
) -> Result<ModelReport> {
    let output = registry.get("comm_pattern")?.run(&tdpag.vs(), ctx)?;
    let table = match &output.findings {
        Findings::CommPattern(pattern) => pattern_table(pattern),
        _ => Table::new(Vec::new()),
    };
    Ok(ModelReport {
        table,
        findings: vec![output.findings],
    })
}

/// One row per communicating rank pair.
pub fn pattern_table(pattern: &CommPattern) -> Table {
    let mut table = Table::new(
        ["src_rank", "dst_rank", "messages", "bytes"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    );
    for (src, dst, messages, bytes) in pattern.pairs() {
        table.push_row(vec![
            Some(AttrValue::UInt(src as u64)),
            Some(AttrValue::UInt(dst as u64)),
            Some(AttrValue::UInt(messages)),
            Some(AttrValue::UInt(bytes)),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, HotspotSelect};
    use crate::pag::tests::{call_vertex, ppag_of};

    fn registry() -> PassRegistry {
        let config = AnalysisConfig {
            hotspot: HotspotSelect::TopK(2),
            ..AnalysisConfig::default()
        };
        PassRegistry::with_builtins(&config)
    }

    fn sample() -> Pag {
        ppag_of(
            vec![
                call_vertex("main", &[60.0, 60.0]),
                call_vertex("comm_send", &[10.0, 10.0]),
                call_vertex("comm_wait", &[25.0, 5.0]),
                call_vertex("comm_recv", &[1.0, 1.0]),
            ],
            2,
        )
    }

    #[test]
    fn test_comm_hotspot_model() {
        let mut pag = sample();
        let out = comm_hotspot_model(&mut pag, &registry(), &PassContext::new(2), "comm_").unwrap();

        assert_eq!(out.table.columns, vec!["name", "CYCAVGPERCENT", "saddr"]);
        assert_eq!(out.table.cell(0, "name"), Some(&AttrValue::from("comm_wait")));
        assert_eq!(out.table.cell(1, "name"), Some(&AttrValue::from("comm_send")));
        assert_eq!(out.table.len(), 2);
        assert_eq!(
            pag.derived_value(VertexId(2), "hotspot.rank"),
            Some(&AttrValue::UInt(1))
        );
        assert_eq!(out.hotspots().map(|h| h.len()), Some(2));
    }

    #[test]
    fn test_imbalance_model_reports_flagged_only() {
        let mut pag = sample();
        let out = imbalance_model(&mut pag, &registry(), &PassContext::new(2)).unwrap();
        assert_eq!(out.table.len(), 1);
        assert_eq!(out.table.cell(0, "name"), Some(&AttrValue::from("comm_wait")));
        assert_eq!(out.imbalance().map(|r| r.findings.len()), Some(4));
        assert!(pag.knows_vertex_attr("imbalance.spread"));
    }
}
