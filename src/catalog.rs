//! Catalog collaborator.
//!
//! The host owns a browsable catalog of loadable items. The bridge only
//! needs three operations from it, all called on the host thread:
//! refresh the cached list, list it, and load an item by its index.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Deepest level searched when flattening a catalog tree.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// One loadable entry, as reported to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Position in the cached list; stable until the next refresh.
    pub index: usize,
    /// Display name.
    pub name: String,
    /// Host-specific locator.
    pub uri: String,
}

impl CatalogItem {
    /// `index,name,uri`, as used in the `plugins` response.
    pub fn wire_entry(&self) -> String {
        format!("{},{},{}", self.index, self.name, self.uri)
    }
}

/// What the bridge needs from the host's catalog.
///
/// Implementations are host-thread affine; they are never called from the
/// I/O runtime.
pub trait CatalogCollaborator {
    /// Rebuild the cached item list.
    fn refresh(&mut self) -> Result<Vec<CatalogItem>>;

    /// The cached item list.
    fn items(&self) -> Vec<CatalogItem>;

    /// Load the item at `index` of the cached list.
    fn load_by_index(&mut self, index: usize) -> Result<()>;
}

/// A node of a browsable catalog tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogNode {
    /// Display name.
    pub name: String,
    /// Host-specific locator.
    #[serde(default)]
    pub uri: String,
    /// Whether this node can be loaded. Loadable nodes are not descended.
    #[serde(default)]
    pub loadable: bool,
    /// Child nodes.
    #[serde(default)]
    pub children: Vec<CatalogNode>,
}

impl CatalogNode {
    /// A loadable leaf.
    pub fn item(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            loadable: true,
            children: Vec::new(),
        }
    }

    /// A folder.
    pub fn folder(name: impl Into<String>, children: Vec<CatalogNode>) -> Self {
        Self {
            name: name.into(),
            uri: String::new(),
            loadable: false,
            children,
        }
    }
}

/// In-memory catalog backed by a fixed tree.
///
/// Used by the demo host and by tests. Loading only records the index.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    roots: Vec<CatalogNode>,
    max_depth: usize,
    cached: Vec<CatalogItem>,
    loaded: Vec<usize>,
    unloadable: HashSet<usize>,
}

impl StaticCatalog {
    /// Create a catalog over `roots`.
    pub fn new(roots: Vec<CatalogNode>) -> Self {
        Self {
            roots,
            max_depth: DEFAULT_MAX_DEPTH,
            cached: Vec::new(),
            loaded: Vec::new(),
            unloadable: HashSet::new(),
        }
    }

    /// Read the tree from a JSON array of nodes.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let roots: Vec<CatalogNode> = serde_json::from_str(json)?;
        Ok(Self::new(roots))
    }

    /// Read the tree from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Limit how deep `refresh` descends.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Make loading `index` fail, to simulate a host-side error.
    pub fn fail_on(mut self, index: usize) -> Self {
        self.unloadable.insert(index);
        self
    }

    /// Indices loaded so far, in order.
    pub fn loaded(&self) -> &[usize] {
        &self.loaded
    }

    fn collect(&self, node: &CatalogNode, depth: usize, out: &mut Vec<CatalogItem>) {
        if depth > self.max_depth {
            tracing::info!(name = %node.name, "max catalog depth reached");
            return;
        }

        if node.loadable {
            out.push(CatalogItem {
                index: out.len(),
                name: node.name.clone(),
                uri: node.uri.clone(),
            });
            return;
        }

        for child in &node.children {
            self.collect(child, depth + 1, out);
        }
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CatalogCollaborator for StaticCatalog {
    fn refresh(&mut self) -> Result<Vec<CatalogItem>> {
        let mut items = Vec::new();
        for root in &self.roots {
            self.collect(root, 0, &mut items);
        }

        tracing::info!(count = items.len(), "catalog cached");
        self.cached = items.clone();
        Ok(items)
    }

    fn items(&self) -> Vec<CatalogItem> {
        self.cached.clone()
    }

    fn load_by_index(&mut self, index: usize) -> Result<()> {
        if index >= self.cached.len() {
            return Err(BridgeError::Collaborator(format!(
                "no catalog item at index {index}"
            )));
        }
        if self.unloadable.contains(&index) {
            return Err(BridgeError::Collaborator(format!(
                "item {index} could not be loaded"
            )));
        }

        tracing::info!(index, name = %self.cached[index].name, "loading catalog item");
        self.loaded.push(index);
        Ok(())
    }
}
