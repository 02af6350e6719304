//! Labeled tree used to lay out the checkpoint view.
//!
//! Children are kept in insertion order and rendered with box-drawing
//! connectors:
//!
//! ```text
//! Container
//! ├── Image: alpine
//! └── Process tree
//!     └── [1]  init
//! ```

use std::fmt;

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const INDENT: &str = "│   ";
const LAST_INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTree {
    label: String,
    meta: Option<String>,
    children: Vec<DisplayTree>,
}

impl DisplayTree {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            meta: None,
            children: Vec::new(),
        }
    }

    /// Append a child and return it, so that callers can keep descending.
    pub fn add_branch(&mut self, label: impl Into<String>) -> &mut DisplayTree {
        self.push_child(DisplayTree::new(label))
    }

    /// Append a child carrying an auxiliary identifier next to its label.
    pub fn add_meta_branch(
        &mut self,
        meta: impl fmt::Display,
        label: impl Into<String>,
    ) -> &mut DisplayTree {
        let mut child = DisplayTree::new(label);
        child.meta = Some(meta.to_string());
        self.push_child(child)
    }

    fn push_child(&mut self, child: DisplayTree) -> &mut DisplayTree {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn meta(&self) -> Option<&str> {
        self.meta.as_deref()
    }

    pub fn children(&self) -> &[DisplayTree] {
        &self.children
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool) -> fmt::Result {
        let (connector, indent) = if is_last {
            (LAST_BRANCH, LAST_INDENT)
        } else {
            (BRANCH, INDENT)
        };
        let child_prefix = format!("{prefix}{indent}");

        for (index, line) in self.rendered_lines().iter().enumerate() {
            if index == 0 {
                writeln!(f, "{prefix}{connector}{line}")?;
            } else {
                writeln!(f, "{child_prefix}{line}")?;
            }
        }

        self.write_children(f, &child_prefix)
    }

    fn write_children(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        let count = self.children.len();
        for (index, child) in self.children.iter().enumerate() {
            child.write_node(f, prefix, index + 1 == count)?;
        }
        Ok(())
    }

    /// The label as printed, split into lines. Never empty.
    fn rendered_lines(&self) -> Vec<String> {
        let text = match &self.meta {
            Some(meta) => format!("[{meta}]  {}", self.label),
            None => self.label.clone(),
        };
        let mut lines: Vec<String> = text.lines().map(str::to_owned).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }
}

impl fmt::Display for DisplayTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.rendered_lines() {
            writeln!(f, "{line}")?;
        }
        self.write_children(f, "")
    }
}
