//! Printable structure of a composed stage.

/// Shape of a stage tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Graph {
    /// A single stage.
    Node(String),
    /// Stages run one after another.
    Sequence(Vec<Graph>),
    /// Labelled branches run side by side on the same input.
    Parallel(Vec<(String, Graph)>),
}

impl Graph {
    pub fn node(name: impl Into<String>) -> Self {
        Graph::Node(name.into())
    }

    /// Build a sequence graph, splicing nested sequences into one level.
    pub fn sequence(steps: impl IntoIterator<Item = Graph>) -> Self {
        let mut flat = Vec::new();
        for step in steps {
            match step {
                Graph::Sequence(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Graph::Sequence(flat)
    }

    /// Number of leaf stages.
    pub fn node_count(&self) -> usize {
        match self {
            Graph::Node(_) => 1,
            Graph::Sequence(steps) => steps.iter().map(Graph::node_count).sum(),
            Graph::Parallel(branches) => branches.iter().map(|(_, g)| g.node_count()).sum(),
        }
    }

    /// Render the graph top to bottom as plain text.
    pub fn draw_ascii(&self) -> String {
        let mut lines = Vec::new();
        draw(self, "", &mut lines);
        lines.join("\n")
    }
}

fn draw(graph: &Graph, indent: &str, lines: &mut Vec<String>) {
    match graph {
        Graph::Node(name) => lines.push(format!("{}[{}]", indent, name)),
        Graph::Sequence(steps) => {
            for (i, step) in steps.iter().enumerate() {
                if i > 0 {
                    lines.push(format!("{}   |", indent));
                    lines.push(format!("{}   v", indent));
                }
                draw(step, indent, lines);
            }
        }
        Graph::Parallel(branches) => {
            lines.push(format!("{}<parallel>", indent));
            let nested = format!("{}    ", indent);
            for (label, branch) in branches {
                lines.push(format!("{}  {}:", indent, label));
                draw(branch, &nested, lines);
            }
            lines.push(format!("{}</parallel>", indent));
        }
    }
}
