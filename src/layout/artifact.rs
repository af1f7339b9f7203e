//! Layout artifact
//!
//! The allocator writes a JSON file that the engine loads verbatim at start:
//!
//! ```json
//! {
//!   "snap7_variables": {
//!     "Dose_number": [9, 0, "INT"],
//!     "Curve": [9, 2, "REAL", 600],
//!     "recipes": { "TargetWeight": [10, 0, "REAL"] }
//!   }
//! }
//! ```
//!
//! Files written by older tools use `Node_id_flexpts_S7_1500_snap7` as the
//! top-level key; both are accepted when loading.

use super::error::{LayoutError, LayoutResult};
use super::types::{BaseType, LayoutMap, TypeSizes, VariableDescriptor};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt::Write as _;
use std::path::Path;

pub const SECTION_KEY: &str = "snap7_variables";
pub const LEGACY_SECTION_KEY: &str = "Node_id_flexpts_S7_1500_snap7";
pub const RECIPES_KEY: &str = "recipes";

/// Exchange and recipe variables as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutArtifact {
    pub exchange: LayoutMap,
    pub recipes: LayoutMap,
}

impl LayoutArtifact {
    pub fn new(exchange: LayoutMap, recipes: LayoutMap) -> Self {
        Self { exchange, recipes }
    }

    /// Flat map with recipe entries merged over exchange entries
    pub fn merged(&self) -> LayoutMap {
        let mut map = self.exchange.clone();
        map.extend(self.recipes.clone());
        map
    }

    pub fn to_json(&self) -> JsonValue {
        let mut section = Map::new();
        for descriptor in self.exchange.iter() {
            section.insert(descriptor.name().to_string(), entry_to_json(descriptor));
        }
        if !self.recipes.is_empty() {
            let recipes: Map<String, JsonValue> = self
                .recipes
                .iter()
                .map(|d| (d.name().to_string(), entry_to_json(d)))
                .collect();
            section.insert(RECIPES_KEY.to_string(), JsonValue::Object(recipes));
        }

        let mut root = Map::new();
        root.insert(SECTION_KEY.to_string(), JsonValue::Object(section));
        JsonValue::Object(root)
    }

    pub fn from_json(root: &JsonValue) -> LayoutResult<Self> {
        let section = root
            .get(SECTION_KEY)
            .or_else(|| root.get(LEGACY_SECTION_KEY))
            .and_then(JsonValue::as_object)
            .ok_or_else(|| LayoutError::MissingSection(SECTION_KEY.to_string()))?;

        let mut artifact = LayoutArtifact::default();
        for (name, entry) in section {
            if name == RECIPES_KEY {
                if let Some(recipes) = entry.as_object() {
                    for (recipe_name, recipe_entry) in recipes {
                        artifact
                            .recipes
                            .insert(entry_from_json(recipe_name, recipe_entry)?);
                    }
                    continue;
                }
            }
            artifact.exchange.insert(entry_from_json(name, entry)?);
        }

        Ok(artifact)
    }

    pub fn save(&self, path: &Path) -> LayoutResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, content)?;
        tracing::info!(
            "Wrote layout artifact {:?} ({} exchange, {} recipe variables)",
            path,
            self.exchange.len(),
            self.recipes.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> LayoutResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let root: JsonValue = serde_json::from_str(&content)?;
        Self::from_json(&root)
    }

    /// Human-readable offset table, one line per variable
    pub fn summary_table(&self, sizes: &TypeSizes) -> String {
        let mut out = String::new();
        for (title, map) in [("Exchange", &self.exchange), ("Recipes", &self.recipes)] {
            if map.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{} ({} variables)", title, map.len());
            let _ = writeln!(
                out,
                "  {:<40} {:>5} {:>7} {:>7} {:<10}",
                "Variable", "DB", "Offset", "Bytes", "Type"
            );
            for block in map.data_blocks(sizes) {
                for v in &block.variables {
                    let ty = match v.count() {
                        Some(count) => format!("{}[{}]", v.base_type(), count),
                        None => v.base_type().to_string(),
                    };
                    let _ = writeln!(
                        out,
                        "  {:<40} {:>5} {:>7} {:>7} {:<10}",
                        v.name(),
                        v.db(),
                        v.offset(),
                        v.byte_len(sizes),
                        ty
                    );
                }
                let _ = writeln!(out, "  DB{} next free offset: {}", block.db, block.end_offset);
            }
        }
        out
    }
}

fn entry_to_json(descriptor: &VariableDescriptor) -> JsonValue {
    match descriptor {
        VariableDescriptor::Scalar {
            db,
            offset,
            base_type,
            ..
        } => json!([db, offset, base_type.as_str()]),
        VariableDescriptor::Array {
            db,
            offset,
            base_type,
            count,
            ..
        } => json!([db, offset, base_type.as_str(), count]),
    }
}

fn entry_from_json(name: &str, entry: &JsonValue) -> LayoutResult<VariableDescriptor> {
    let malformed = |reason: &str| LayoutError::MalformedEntry {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let items = entry
        .as_array()
        .ok_or_else(|| malformed("expected an array"))?;
    if items.len() != 3 && items.len() != 4 {
        return Err(malformed("expected [db, offset, type] or [db, offset, type, count]"));
    }

    let db = items[0]
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| malformed("db is not a DB number"))?;
    let offset = items[1]
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| malformed("offset is not a byte offset"))?;
    let type_name = items[2]
        .as_str()
        .ok_or_else(|| malformed("type is not a string"))?;
    let base_type: BaseType = type_name.parse().map_err(|_| LayoutError::UnknownType {
        variable: name.to_string(),
        type_name: type_name.to_string(),
    })?;

    match items.get(3) {
        Some(count) => {
            let count = count
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| malformed("count is not an element count"))?;
            Ok(VariableDescriptor::array(name, db, offset, base_type, count))
        }
        None => Ok(VariableDescriptor::scalar(name, db, offset, base_type)),
    }
}
