//! End-to-end tests: launch (faked), build, persist, reload and analyze.

mod common;

use std::fs;

use common::{
    all_pairs, exchange_scenario, fake_binary, ring_pairs, two_rank_scenario, FakeLauncher,
};
use perflow::passes::PatternClass;
use perflow::trace::{read_trace_dir, save_pag_dir, write_trace_dir, RunDir};
use perflow::{
    AttrValue, Config, Diagnostic, EdgeKind, Error, PagBuilder, PagKind, PerFlow, Predicate,
};
use tempfile::TempDir;

fn perflow_in(dir: &TempDir, traces: Option<perflow::TraceSet>) -> PerFlow {
    let config = Config {
        workdir: dir.path().to_path_buf(),
        ..Config::default()
    };
    PerFlow::new(config).with_launcher(Box::new(FakeLauncher { traces }))
}

#[test]
fn test_two_rank_scenario() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let perflow = perflow_in(&dir, Some(two_rank_scenario()));

    let pags = perflow
        .run(&binary, "mpirun -n 2 ./app", 2)
        .expect("Failed to run");
    assert!(pags.diagnostics.is_empty(), "{:?}", pags.diagnostics);
    assert_eq!(pags.tdpag.kind(), PagKind::TimeDependent);
    assert_eq!(pags.ppag.kind(), PagKind::ProcessPerspective);

    let a = pags.ppag.find("A").expect("A missing from ppag");
    let percents: Vec<f64> = a.per_process.iter().map(|s| s.percent).collect();
    assert_eq!(percents, vec![80.0, 20.0]);
    assert!((a.cyc_avg_percent - 50.0).abs() < 1e-9);
    assert_eq!(a.caller, "main@0x400100");

    let hot = perflow
        .hotspot_detection(&pags.ppag.vs())
        .expect("Failed to detect hotspots");
    assert_eq!(hot.set.names(), vec!["A"]);

    let imbalanced = perflow
        .imbalance_analysis(&pags.ppag.vs(), 2)
        .expect("Failed to analyze imbalance");
    assert_eq!(imbalanced.set.names(), vec!["A"]);

    let comm: Vec<_> = pags.tdpag.edges_of_kind(EdgeKind::Comm).collect();
    assert_eq!(comm.len(), 1);
    assert_eq!(comm[0].comm.map(|c| c.tag), Some(1));
}

#[test]
fn test_persisted_pags_reload_identically() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "cg.B.2");
    let perflow = perflow_in(&dir, Some(two_rank_scenario()));
    let pags = perflow
        .run(&binary, "mpirun -n 2 ./cg.B.2", 2)
        .expect("Failed to run");

    let name = pags
        .run_dir
        .file_name()
        .and_then(|n| n.to_str())
        .expect("run dir has no name");
    assert!(name.starts_with("cg.B-2p-"), "unexpected run dir {name}");
    assert_eq!(
        perflow.latest_run(2).expect("Failed to list runs"),
        Some(pags.run_dir.clone())
    );
    assert_eq!(perflow.latest_run(8).expect("Failed to list runs"), None);

    let (tdpag, ppag) = perflow.read_pag(&pags.run_dir).expect("Failed to reload");
    assert_eq!(tdpag, pags.tdpag);
    assert_eq!(ppag, pags.ppag);
}

#[test]
fn test_annotated_pags_reload_identically() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let perflow = perflow_in(&dir, Some(two_rank_scenario()));
    let mut pags = perflow.run(&binary, "true", 2).expect("Failed to run");

    perflow
        .imbalance_model(&mut pags.ppag)
        .expect("Failed to run imbalance model");
    save_pag_dir(&RunDir::open(&pags.run_dir), &pags.tdpag, &pags.ppag)
        .expect("Failed to save annotated PAGs");

    let (_, ppag) = perflow.read_pag(&pags.run_dir).expect("Failed to reload");
    assert_eq!(ppag, pags.ppag);
    let namespaces: Vec<&str> = ppag.derived().keys().map(String::as_str).collect();
    assert_eq!(namespaces, vec!["imbalance"]);
    let a = ppag.find("A").expect("A missing from ppag");
    assert_eq!(
        ppag.vertex_attr(a.id, "imbalance.spread"),
        Some(AttrValue::Float(1.2))
    );
}

#[test]
fn test_duplicate_rank_stream_in_run_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let perflow = perflow_in(&dir, Some(two_rank_scenario()));
    let pags = perflow.run(&binary, "true", 2).expect("Failed to run");

    let run = RunDir::open(&pags.run_dir);
    let trace_dir = run.trace_dir();
    fs::copy(trace_dir.join("rank1.jsonl"), trace_dir.join("rank01.jsonl"))
        .expect("Failed to copy rank 1");

    match perflow.build_run(&run, 2) {
        Err(Error::Persistence { path, .. }) => assert!(path.ends_with("rank01.jsonl")),
        other => panic!("expected Persistence, got {other:?}"),
    }
}

#[test]
fn test_corrupt_pag_dir_is_persistence_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let perflow = perflow_in(&dir, Some(two_rank_scenario()));
    let pags = perflow.run(&binary, "true", 2).expect("Failed to run");

    let vertices = pags.run_dir.join("ppag").join("vertices.jsonl");
    let text = fs::read_to_string(&vertices).expect("Failed to read vertices");
    let kept: Vec<&str> = text.lines().skip(1).collect();
    fs::write(&vertices, kept.join("\n")).expect("Failed to rewrite vertices");

    match perflow.read_pag(&pags.run_dir) {
        Err(Error::Persistence { path, .. }) => assert!(path.ends_with("vertices.jsonl")),
        other => panic!("expected Persistence, got {other:?}"),
    }

    fs::remove_file(pags.run_dir.join("tdpag").join("edges.jsonl"))
        .expect("Failed to remove edges");
    let err = perflow.read_pag(&pags.run_dir).unwrap_err();
    assert!(err.to_string().contains("re-run PAG construction"));
}

#[test]
fn test_failed_launch() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let perflow = perflow_in(&dir, None);

    match perflow.run(&binary, "mpirun -n 64 ./app", 64) {
        Err(Error::Launch { binary: b, source }) => {
            assert_eq!(b, binary);
            assert!(source.to_string().contains("not enough slots"));
        }
        other => panic!("expected Launch, got {other:?}"),
    }
}

#[test]
fn test_all_to_all_pattern() {
    let traces = exchange_scenario(4, &all_pairs(4));
    let out = PagBuilder::new(&Config::default())
        .build(traces)
        .expect("Failed to build");
    let perflow = PerFlow::default();

    let pattern = perflow
        .communication_pattern_analysis(&out.tdpag, 4)
        .expect("Failed to analyze pattern");
    assert_eq!(pattern.class, PatternClass::AllToAll);
    assert_eq!(pattern.total_messages(), 12);
    assert_eq!(pattern.total_bytes(), 12 * 256);
    assert_eq!(pattern.unmatched, 0);
}

#[test]
fn test_nearest_neighbor_pattern() {
    let traces = exchange_scenario(4, &ring_pairs(4));
    let out = PagBuilder::new(&Config::default())
        .build(traces)
        .expect("Failed to build");

    let model = PerFlow::default()
        .communication_pattern_model(&out.tdpag)
        .expect("Failed to run model");
    let pattern = model.pattern().expect("no pattern findings");
    assert_eq!(pattern.class, PatternClass::NearestNeighbor);
    assert_eq!(pattern.locality, 1.0);
    assert_eq!(model.table.len(), 8);
}

#[test]
fn test_torn_and_truncated_streams() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace_dir = dir.path().join("trace");
    write_trace_dir(&trace_dir, &two_rank_scenario()).expect("Failed to write traces");

    // Rank 1 died after entering A: keep two records and half of the third.
    let rank1 = trace_dir.join("rank1.jsonl");
    let text = fs::read_to_string(&rank1).expect("Failed to read rank 1");
    let lines: Vec<&str> = text.lines().collect();
    let torn = format!("{}\n{}\n{}", lines[0], lines[1], &lines[2][..8]);
    fs::write(&rank1, torn).expect("Failed to truncate rank 1");

    let traces = read_trace_dir(&trace_dir, 2).expect("Failed to read traces");
    assert!(traces.ranks[1].torn_tail);

    let out = PagBuilder::new(&Config::default())
        .build(traces.clone())
        .expect("Failed to build");
    assert!(out.diagnostics.contains(&Diagnostic::TornRecord { rank: 1 }));
    assert!(out.diagnostics.contains(&Diagnostic::TruncatedStream {
        rank: 1,
        open_calls: 2
    }));
    assert!(out
        .diagnostics
        .contains(&Diagnostic::UnmatchedComm { count: 1 }));
    assert_eq!(out.tdpag.meta().incomplete_ranks, vec![1]);
    assert!(out.ppag.find("A").expect("A missing").incomplete);

    let strict = Config {
        strict: true,
        ..Config::default()
    };
    match PagBuilder::new(&strict).build(traces) {
        Err(Error::TraceIncomplete { ranks, .. }) => assert_eq!(ranks, vec![1]),
        other => panic!("expected TraceIncomplete, got {other:?}"),
    }
}

#[test]
fn test_missing_rank_stream() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let trace_dir = dir.path().join("trace");
    write_trace_dir(&trace_dir, &exchange_scenario(3, &[(0, 1)])).expect("Failed to write");
    fs::remove_file(trace_dir.join("rank2.jsonl")).expect("Failed to remove rank 2");

    let traces = read_trace_dir(&trace_dir, 3).expect("Failed to read traces");
    assert_eq!(traces.missing, vec![2]);
    let out = PagBuilder::new(&Config::default())
        .build(traces)
        .expect("Failed to build");
    assert!(out.diagnostics.contains(&Diagnostic::MissingRank { rank: 2 }));
    assert_eq!(out.ppag.nprocs(), 3);
    let main = out.ppag.find("main").expect("main missing");
    assert_eq!(main.per_process.len(), 3);
    assert_eq!(main.per_process[2].cycles, 0);
}

#[test]
fn test_models_on_scenario() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let perflow = perflow_in(&dir, Some(two_rank_scenario()));
    let mut pags = perflow.run(&binary, "true", 2).expect("Failed to run");

    let comm = perflow
        .filter(&pags.ppag.vs(), &Predicate::name_prefix("comm_"))
        .expect("Failed to filter");
    assert_eq!(comm.names(), vec!["comm_send", "comm_recv"]);
    let none = perflow
        .filter(&pags.ppag.vs(), &Predicate::name_contains("MPI_"))
        .expect("Failed to filter");
    assert!(none.is_empty());

    let model = perflow
        .profiler_model(&pags.tdpag, &mut pags.ppag)
        .expect("Failed to run profiler model");
    assert_eq!(
        model.table.columns.first().map(String::as_str),
        Some("name")
    );
    let pattern = model.pattern().expect("no pattern findings");
    assert_eq!(pattern.counts[0][1], 1);
    assert!(model.imbalance().is_some());

    let imbalance = perflow
        .imbalance_model(&mut pags.ppag)
        .expect("Failed to run imbalance model");
    assert_eq!(
        imbalance.table.cell(0, "name"),
        Some(&AttrValue::from("A"))
    );
    let report = perflow
        .report(&pags.ppag.vs(), &["name", "imbalance.spread"])
        .expect("Failed to report");
    assert_eq!(report.len(), pags.ppag.vertices().len());
}

#[test]
fn test_draw_dot() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let out = PagBuilder::new(&Config::default())
        .build(two_rank_scenario())
        .expect("Failed to build");
    let dest = dir.path().join("tdpag.dot");
    PerFlow::default()
        .draw(&out.tdpag, &dest)
        .expect("Failed to draw");
    let dot = fs::read_to_string(&dest).expect("Failed to read dot");
    assert!(dot.contains("digraph tdpag"));
    assert!(dot.contains("A\\nrank 1"));
}

#[test]
fn test_run_dir_layout() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let binary = fake_binary(dir.path(), "app");
    let pags = perflow_in(&dir, Some(two_rank_scenario()))
        .run(&binary, "true", 2)
        .expect("Failed to run");
    let run = RunDir::open(&pags.run_dir);
    assert!(run.trace_dir().join("rank0.jsonl").is_file());
    for kind in [PagKind::TimeDependent, PagKind::ProcessPerspective] {
        for path in run.pag_paths(kind).required() {
            assert!(path.is_file(), "{} missing", path.display());
        }
    }
}
