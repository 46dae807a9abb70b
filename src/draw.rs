//! Graphviz export of a PAG.
//!
//! `.dot`/`.gv` destinations get the DOT text written directly. Image and
//! document formats are handed to a [`Renderer`], by default the Graphviz
//! `dot` binary through `graphviz_rust::exec`.

use std::fs;
use std::path::Path;

use anyhow::anyhow;
use graphviz_rust::cmd::{CommandArg, Format};
use graphviz_rust::dot_generator::*;
use graphviz_rust::dot_structures::*;
use graphviz_rust::exec;
use graphviz_rust::printer::{DotPrinter, PrinterContext};

use crate::error::{Error, Result};
use crate::pag::{EdgeKind, Pag, PagKind, Vertex as PagVertex};

/// Turns a DOT graph into a file of the given format.
pub trait Renderer {
    fn render(&self, graph: Graph, format: Format, dest: &Path) -> anyhow::Result<()>;
}

/// Renders with the `dot` binary from the Graphviz package.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphvizRenderer;

impl Renderer for GraphvizRenderer {
    fn render(&self, graph: Graph, format: Format, dest: &Path) -> anyhow::Result<()> {
        exec(
            graph,
            &mut PrinterContext::default(),
            vec![
                format.into(),
                CommandArg::Output(dest.to_string_lossy().into_owned()),
            ],
        )?;
        Ok(())
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn vertex_label(pag: &Pag, v: &PagVertex) -> String {
    let name = escape(&v.name);
    match (pag.kind(), v.rank) {
        (PagKind::TimeDependent, Some(rank)) => format!("{name}\\nrank {rank}"),
        _ => format!("{name}\\n{:.2}%", v.cyc_avg_percent),
    }
}

/// Build the DOT graph of `pag`. Hotspots found earlier are drawn in red.
pub fn to_graph(pag: &Pag) -> Graph {
    let nodes = pag.vertices().iter().map(|v| {
        let id = v.id.index();
        let label = vertex_label(pag, v);
        let color = if pag.derived_value(v.id, "hotspot.rank").is_some() {
            "red"
        } else if v.kind.is_comm() {
            "blue"
        } else {
            "black"
        };
        stmt!(node!(esc id; attr!("label", esc label), attr!("color", color)))
    });
    let edges = pag.edges().iter().map(|e| {
        let (src, dst) = (e.src.index(), e.dst.index());
        match e.kind {
            EdgeKind::Call => {
                stmt!(edge!(node_id!(src) => node_id!(dst); attr!("label", e.weight)))
            }
            EdgeKind::Flow => stmt!(edge!(node_id!(src) => node_id!(dst); attr!("style", "dotted"))),
            EdgeKind::Comm => {
                let bytes = e.comm.map_or(0, |c| c.bytes);
                stmt!(edge!(node_id!(src) => node_id!(dst); attr!("color", "blue"), attr!("label", bytes)))
            }
        }
    });
    graph!(di id!(pag.kind().as_str()), nodes.chain(edges).collect())
}

pub fn to_dot(pag: &Pag) -> String {
    to_graph(pag).print(&mut PrinterContext::default())
}

fn format_for(dest: &Path) -> Option<Format> {
    let ext = dest.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "svg" => Some(Format::Svg),
        "pdf" => Some(Format::Pdf),
        "png" => Some(Format::Png),
        _ => None,
    }
}

/// Write `pag` to `dest`, choosing the output format from its extension.
pub fn draw(pag: &Pag, dest: &Path, renderer: &dyn Renderer) -> Result<()> {
    let is_dot = dest
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dot") || e.eq_ignore_ascii_case("gv"));
    if is_dot {
        return fs::write(dest, to_dot(pag)).map_err(|e| Error::Render {
            path: dest.to_path_buf(),
            source: e.into(),
        });
    }

    let format = format_for(dest).ok_or_else(|| Error::Render {
        path: dest.to_path_buf(),
        source: anyhow!("unsupported output format; use .dot, .gv, .svg, .pdf or .png"),
    })?;
    renderer
        .render(to_graph(pag), format, dest)
        .map_err(|source| Error::Render {
            path: dest.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pag::tests::{call_vertex, ppag_of};
    use crate::pag::{Annotation, VertexId};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<PathBuf>>,
        fail: bool,
    }

    impl Renderer for Recorder {
        fn render(&self, _graph: Graph, _format: Format, dest: &Path) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(dest.to_path_buf());
            if self.fail {
                anyhow::bail!("dot: command not found");
            }
            Ok(())
        }
    }

    fn sample() -> Pag {
        let mut pag = ppag_of(
            vec![call_vertex("main", &[90.0]), call_vertex("say \"hi\"", &[10.0])],
            1,
        );
        let mut ann = Annotation::new("hotspot");
        ann.set(VertexId(0), "rank", 1u64);
        pag.annotate(ann);
        pag
    }

    #[test]
    fn test_dot_text() {
        let dot = to_dot(&sample());
        assert!(dot.starts_with("digraph ppag"));
        assert!(dot.contains("main\\n90.00%"));
        assert!(dot.contains("say \\\"hi\\\""));
        assert!(dot.contains("red"));
    }

    #[test]
    fn test_dot_written_without_renderer() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ppag.dot");
        let renderer = Recorder::default();
        draw(&sample(), &dest, &renderer).unwrap();
        assert!(fs::read_to_string(&dest).unwrap().contains("digraph"));
        assert!(renderer.calls.borrow().is_empty());
    }

    #[test]
    fn test_pdf_goes_through_renderer() {
        let renderer = Recorder::default();
        draw(&sample(), Path::new("/tmp/out.pdf"), &renderer).unwrap();
        assert_eq!(*renderer.calls.borrow(), vec![PathBuf::from("/tmp/out.pdf")]);
    }

    #[test]
    fn test_render_failures() {
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        match draw(&sample(), Path::new("graph.svg"), &failing) {
            Err(Error::Render { path, .. }) => assert_eq!(path, PathBuf::from("graph.svg")),
            other => panic!("expected Render, got {other:?}"),
        }
        assert!(matches!(
            draw(&sample(), Path::new("graph.bmpx"), &Recorder::default()),
            Err(Error::Render { .. })
        ));
    }
}
