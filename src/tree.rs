//! Repository tree model
//!
//! Built once from a backend snapshot and never mutated afterwards. Which
//! directories are open is presentation state, kept in [`Expansion`] by
//! whoever draws the tree.

use crate::error::TreeError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Dir,
    File,
}

impl NodeKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "dir" | "tree" => Some(NodeKind::Dir),
            "file" | "blob" => Some(NodeKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub name: String,
    /// Slash-delimited, relative to the repository root, unique in the tree
    pub path: String,
    pub kind: NodeKind,
    /// Always empty for files
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }
}

/// Directories before files, then case-insensitive name, then exact name.
///
/// The final tie-break on path makes the order total, so sorting the same
/// siblings always gives the same sequence.
pub fn sort_rule(a: &TreeNode, b: &TreeNode) -> Ordering {
    let rank = |node: &TreeNode| match node.kind {
        NodeKind::Dir => 0,
        NodeKind::File => 1,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path))
}

/// One visible line of the rendered tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRow<'a> {
    pub node: &'a TreeNode,
    pub depth: usize,
    pub expanded: bool,
}

#[derive(Debug, Clone)]
pub struct TreeModel {
    root: TreeNode,
    /// Child-index route from the root to every node
    locations: HashMap<String, Vec<usize>>,
    file_count: usize,
}

impl TreeModel {
    /// Build the model from the JSON array returned by the tree endpoint
    pub fn build(snapshot: &Value) -> Result<Self, TreeError> {
        let entries = snapshot.as_array().ok_or_else(|| {
            TreeError::Malformed("expected a JSON array of entries".to_string())
        })?;
        if entries.is_empty() {
            return Err(TreeError::Empty);
        }

        let mut seen = HashSet::new();
        let children = parse_level(entries, "", &mut seen)?;
        let mut root = TreeNode {
            name: String::new(),
            path: String::new(),
            kind: NodeKind::Dir,
            children,
        };
        sort_recursive(&mut root);

        let mut locations = HashMap::new();
        let mut file_count = 0;
        index_locations(&root.children, &mut Vec::new(), &mut locations, &mut file_count);

        Ok(Self {
            root,
            locations,
            file_count,
        })
    }

    /// Synthetic root directory holding the top-level entries
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let route = self.locations.get(path)?;
        let mut node = &self.root;
        for &i in route {
            node = node.children.get(i)?;
        }
        Some(node)
    }

    /// Number of entries, excluding the synthetic root
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Depth-first, pre-order rows; collapsed directories hide their subtree.
    ///
    /// Siblings are re-sorted with [`sort_rule`] on every call.
    pub fn rows(&self, expansion: &Expansion) -> Vec<TreeRow<'_>> {
        let mut rows = Vec::new();
        collect_rows(&self.root.children, 0, expansion, &mut rows);
        rows
    }
}

fn parse_level(
    entries: &[Value],
    parent: &str,
    seen: &mut HashSet<String>,
) -> Result<Vec<TreeNode>, TreeError> {
    entries
        .iter()
        .map(|entry| parse_node(entry, parent, seen))
        .collect()
}

fn parse_node(
    entry: &Value,
    parent: &str,
    seen: &mut HashSet<String>,
) -> Result<TreeNode, TreeError> {
    let location = if parent.is_empty() { "<root>" } else { parent };
    let obj = entry.as_object().ok_or_else(|| {
        TreeError::Malformed(format!("entry under {} is not an object", location))
    })?;

    let name = required_str(obj, "name")
        .ok_or_else(|| TreeError::Malformed(format!("entry under {} has no name", location)))?;
    let raw_kind = obj
        .get("type")
        .or_else(|| obj.get("kind"))
        .and_then(Value::as_str)
        .ok_or_else(|| TreeError::Malformed(format!("entry '{}' has no type", name)))?;
    let kind = NodeKind::parse(raw_kind).ok_or_else(|| {
        TreeError::Malformed(format!("entry '{}' has unknown type '{}'", name, raw_kind))
    })?;
    let path = required_str(obj, "path")
        .ok_or_else(|| TreeError::Malformed(format!("entry '{}' has no path", name)))?;

    if !seen.insert(path.to_string()) {
        return Err(TreeError::Malformed(format!("duplicate path '{}'", path)));
    }

    let children = match (kind, obj.get("children")) {
        (NodeKind::File, _) | (NodeKind::Dir, None) | (NodeKind::Dir, Some(Value::Null)) => {
            Vec::new()
        }
        (NodeKind::Dir, Some(Value::Array(items))) => parse_level(items, path, seen)?,
        (NodeKind::Dir, Some(_)) => {
            return Err(TreeError::Malformed(format!(
                "children of '{}' are not a list",
                path
            )))
        }
    };

    Ok(TreeNode {
        name: name.to_string(),
        path: path.to_string(),
        kind,
        children,
    })
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn sort_recursive(node: &mut TreeNode) {
    node.children.sort_by(sort_rule);
    for child in &mut node.children {
        sort_recursive(child);
    }
}

fn index_locations(
    nodes: &[TreeNode],
    route: &mut Vec<usize>,
    locations: &mut HashMap<String, Vec<usize>>,
    file_count: &mut usize,
) {
    for (i, node) in nodes.iter().enumerate() {
        route.push(i);
        locations.insert(node.path.clone(), route.clone());
        if node.is_dir() {
            index_locations(&node.children, route, locations, file_count);
        } else {
            *file_count += 1;
        }
        route.pop();
    }
}

fn collect_rows<'a>(
    nodes: &'a [TreeNode],
    depth: usize,
    expansion: &Expansion,
    rows: &mut Vec<TreeRow<'a>>,
) {
    let mut ordered: Vec<&TreeNode> = nodes.iter().collect();
    ordered.sort_by(|a, b| sort_rule(a, b));

    for node in ordered {
        let expanded = node.is_dir() && expansion.is_expanded(&node.path);
        rows.push(TreeRow {
            node,
            depth,
            expanded,
        });
        if expanded {
            collect_rows(&node.children, depth + 1, expansion, rows);
        }
    }
}

/// Open/closed state of directories, owned by the view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    open: HashSet<String>,
}

impl Expansion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every directory of `model` open
    pub fn all(model: &TreeModel) -> Self {
        let mut expansion = Self::new();
        let mut stack: Vec<&TreeNode> = model.root().children.iter().collect();
        while let Some(node) = stack.pop() {
            if node.is_dir() {
                expansion.open.insert(node.path.clone());
                stack.extend(node.children.iter());
            }
        }
        expansion
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.open.contains(path)
    }

    /// Flip a directory; returns the new state
    pub fn toggle(&mut self, path: &str) -> bool {
        if self.open.remove(path) {
            false
        } else {
            self.open.insert(path.to_string());
            true
        }
    }

    pub fn expand(&mut self, path: &str) {
        self.open.insert(path.to_string());
    }

    pub fn collapse(&mut self, path: &str) {
        self.open.remove(path);
    }
}

/// Row decoration by extension
pub fn file_icon(node: &TreeNode) -> &'static str {
    if node.is_dir() {
        return "📁";
    }
    let ext = node
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "🐍",
        "js" | "mjs" | "cjs" | "ts" => "📜",
        "html" | "htm" => "🌐",
        "css" | "scss" => "🎨",
        "json" | "toml" | "yaml" | "yml" => "📋",
        "md" | "mdx" => "📝",
        "jpg" | "jpeg" | "png" | "gif" | "svg" | "webp" => "🖼️",
        _ => "📄",
    }
}
