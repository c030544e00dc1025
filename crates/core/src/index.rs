//! Data model for device introspection results
//!
//! These records are what the module index build and the file tree scan
//! produce. All of them serialize with serde so callers can cache them
//! to disk (e.g. `modules.json`) between sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::literal::Value;

/// How a symbol's help text described it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// An angle-bracketed type signature, e.g. `<class 'Pin'>`.
    Type(String),
    /// A plain literal value, e.g. `0x4000`.
    Value(String),
}

/// One symbol scraped from a module's help text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    /// Attribute descriptors for class symbols, one level deep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<BTreeMap<String, String>>,
}

impl SymbolInfo {
    /// Whether the help text marked this symbol as a class, which triggers
    /// one nested introspection query for its attributes.
    pub fn is_class(&self) -> bool {
        matches!(&self.kind, SymbolKind::Type(sig) if sig.contains("<class"))
    }
}

/// Index of device modules: module name to its symbol table.
pub type ModuleIndex = BTreeMap<String, BTreeMap<String, SymbolInfo>>;

/// One file or directory on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// Raw `os.stat` fields as the device reported them.
    pub stat: Vec<i64>,
    pub children: BTreeMap<String, FileNode>,
}

/// Device file tree rooted at the working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    pub entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a tree from a parsed scan-snippet literal.
    ///
    /// Entries that don't have the expected `{info, files, name}` shape are
    /// skipped rather than failing the whole scan.
    pub fn from_literal(value: &Value) -> Self {
        FileTree {
            entries: Self::collect(value),
        }
    }

    fn collect(value: &Value) -> BTreeMap<String, FileNode> {
        let mut out = BTreeMap::new();
        if let Value::Dict(entries) = value {
            for (key, val) in entries {
                let Some(name) = key.as_str() else { continue };
                let stat = match val.get("info") {
                    Some(Value::Tuple(items)) | Some(Value::List(items)) => {
                        items.iter().filter_map(Value::as_int).collect()
                    }
                    _ => Vec::new(),
                };
                let children = val.get("files").map(Self::collect).unwrap_or_default();
                out.insert(
                    name.to_string(),
                    FileNode {
                        name: name.to_string(),
                        stat,
                        children,
                    },
                );
            }
        }
        out
    }
}
