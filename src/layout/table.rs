//! Variable table reader
//!
//! Exchange and recipe variables come from CSV tables named after their
//! data block, e.g. `exchange_variables_DB20.csv` and
//! `recipe_variables_DB21.csv`. Comma and semicolon delimiters are both
//! accepted. Only the `Variable` and `Type` columns are required.

use super::allocator::{
    Allocator, DuplicatePolicy, GroupKind, GroupSummary, LayoutBuilder, VariableRow,
};
use super::artifact::LayoutArtifact;
use super::error::{LayoutError, LayoutResult};
use regex::Regex;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const EXCHANGE_PREFIX: &str = "exchange_variables";
const RECIPE_PREFIX: &str = "recipe_variables";

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Variable", default)]
    variable: Option<String>,
    #[serde(rename = "Type", default)]
    type_name: Option<String>,
    #[serde(rename = "ArrayBaseType", default)]
    array_base_type: Option<String>,
    #[serde(rename = "ArraySize", default)]
    array_size: Option<String>,
    #[serde(rename = "PLC_VAR_NAME", default)]
    plc_var_name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl RawRow {
    fn into_row(self) -> Option<VariableRow> {
        let name = non_empty(self.variable)?;
        Some(VariableRow {
            name,
            type_name: non_empty(self.type_name).unwrap_or_default(),
            array_base_type: non_empty(self.array_base_type),
            array_size: non_empty(self.array_size).and_then(|s| s.parse().ok()),
            plc_var_name: non_empty(self.plc_var_name),
        })
    }
}

/// Pick `;` when the header line has more semicolons than commas
pub fn detect_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Read rows from CSV text; rows without a variable name are ignored
pub fn read_rows_from<R: Read>(mut reader: R) -> LayoutResult<Vec<VariableRow>> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = detect_delimiter(content.lines().next().unwrap_or_default());

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in csv_reader.deserialize::<RawRow>() {
        if let Some(row) = record?.into_row() {
            rows.push(row);
        }
    }
    Ok(rows)
}

pub fn read_rows(path: &Path) -> LayoutResult<Vec<VariableRow>> {
    let file = std::fs::File::open(path)?;
    read_rows_from(file)
}

fn db_number_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"DB(\d+)").ok()).as_ref()
}

/// DB number embedded in a file name (`..._DB20.csv` → 20)
pub fn extract_db_number(file_name: &str) -> Option<u16> {
    db_number_regex()?
        .captures(file_name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Tables found in a directory, in file name order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredTables {
    pub exchange: Vec<(PathBuf, u16)>,
    pub recipe: Vec<(PathBuf, u16)>,
}

impl DiscoveredTables {
    pub fn is_empty(&self) -> bool {
        self.exchange.is_empty() && self.recipe.is_empty()
    }
}

/// Find DB-named exchange and recipe tables in `dir`
pub fn discover(dir: &Path) -> LayoutResult<DiscoveredTables> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    names.sort();

    let mut found = DiscoveredTables::default();
    for path in names {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = file_name.to_ascii_lowercase();
        if !lower.ends_with(".csv") {
            continue;
        }
        let Some(db) = extract_db_number(file_name) else {
            continue;
        };
        if lower.starts_with(EXCHANGE_PREFIX) {
            found.exchange.push((path.clone(), db));
        } else if lower.starts_with(RECIPE_PREFIX) {
            found.recipe.push((path.clone(), db));
        }
    }
    Ok(found)
}

/// Table with its DB number taken from the file name
pub fn table_with_db(path: &Path) -> LayoutResult<(PathBuf, u16)> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(extract_db_number)
        .map(|db| (path.to_path_buf(), db))
        .ok_or_else(|| LayoutError::MissingDbNumber(path.to_path_buf()))
}

/// Allocate all tables: exchange groups first, then recipes, chaining per DB
pub fn build_artifact(
    tables: &DiscoveredTables,
    allocator: Allocator,
    policy: DuplicatePolicy,
) -> LayoutResult<(LayoutArtifact, Vec<GroupSummary>)> {
    let mut builder = LayoutBuilder::new(allocator).with_duplicate_policy(policy);

    let groups = tables
        .exchange
        .iter()
        .map(|t| (GroupKind::Exchange, t))
        .chain(tables.recipe.iter().map(|t| (GroupKind::Recipe, t)));

    for (kind, (path, db)) in groups {
        let rows = read_rows(path)?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let group = builder.add_group(label, kind, *db, &rows)?;
        tracing::info!(
            "{:?}: {} -> DB{}, {} variables, offsets {}..{}",
            kind,
            group.label,
            db,
            group.variables,
            group.start_offset,
            group.end_offset
        );
    }

    let groups = builder.groups().to_vec();
    let (exchange, recipes) = builder.finish();
    Ok((LayoutArtifact::new(exchange, recipes), groups))
}
