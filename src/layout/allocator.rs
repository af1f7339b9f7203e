//! Byte-offset allocator for non-optimized data blocks
//!
//! Assigns offsets to an ordered list of variable rows:
//! - types wider than one byte start on an even offset
//! - arrays take `size * count` bytes
//! - groups targeting the same DB chain through their end offset

use super::error::{LayoutError, LayoutResult};
use super::types::{BaseType, DataBlockLayout, LayoutMap, TypeSizes, VariableDescriptor};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One row of an exchange or recipe variable table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableRow {
    pub name: String,
    pub type_name: String,
    pub array_base_type: Option<String>,
    pub array_size: Option<u32>,
    /// PLC-side symbol feeding this variable, if it differs from `name`
    pub plc_var_name: Option<String>,
}

impl VariableRow {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_array_size(mut self, base_type: impl Into<String>, size: u32) -> Self {
        self.array_base_type = Some(base_type.into());
        self.array_size = Some(size);
        self
    }

    /// Resolve the element type and optional element count
    pub fn resolve(&self) -> LayoutResult<(BaseType, Option<u32>)> {
        let (inline_base, inline_count) = split_type_string(&self.type_name);

        let (type_name, count) = match inline_count {
            Some(count) => (inline_base, Some(count)),
            None => match self.array_size.filter(|n| *n > 0) {
                Some(count) => {
                    let base = self
                        .array_base_type
                        .as_deref()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .unwrap_or(inline_base.as_str());
                    (base.to_string(), Some(count))
                }
                None => (inline_base, None),
            },
        };

        let base_type = type_name
            .parse::<BaseType>()
            .map_err(|_| LayoutError::UnknownType {
                variable: self.name.clone(),
                type_name: type_name.clone(),
            })?;
        Ok((base_type, count.filter(|n| *n > 0)))
    }
}

fn inline_array_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\w+)\s*\[\s*(\d+)\s*\]").ok())
        .as_ref()
}

/// Split `TYPE[N]` into `("TYPE", Some(N))`; plain types give `None`
pub fn split_type_string(type_name: &str) -> (String, Option<u32>) {
    if let Some(caps) = inline_array_regex().and_then(|re| re.captures(type_name)) {
        if let Ok(count) = caps[2].parse::<u32>() {
            return (caps[1].to_ascii_uppercase(), Some(count));
        }
    }
    (type_name.trim().to_ascii_uppercase(), None)
}

/// Round `offset` up to an even address when `element_size` > 1
pub fn align_offset(offset: u32, element_size: usize) -> u32 {
    if element_size > 1 && offset % 2 != 0 {
        offset + 1
    } else {
        offset
    }
}

/// A row the allocator could not place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub name: String,
    pub reason: String,
}

/// Result of allocating one group of rows
#[derive(Debug, Clone)]
pub struct Allocation {
    pub layout: DataBlockLayout,
    pub skipped: Vec<SkippedRow>,
}

/// Assigns aligned offsets to variable rows
#[derive(Debug, Clone, Copy, Default)]
pub struct Allocator {
    sizes: TypeSizes,
}

impl Allocator {
    pub fn new(sizes: TypeSizes) -> Self {
        Self { sizes }
    }

    pub fn sizes(&self) -> &TypeSizes {
        &self.sizes
    }

    /// Allocate `rows` into DB `db`, starting at `start_offset`
    pub fn allocate(&self, rows: &[VariableRow], db: u16, start_offset: u32) -> Allocation {
        let mut layout = DataBlockLayout::new(db, start_offset);
        let mut skipped = Vec::new();
        let mut offset = start_offset;

        for row in rows {
            let (base_type, count) = match row.resolve() {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!("Skipping variable '{}': {}", row.name, e);
                    skipped.push(SkippedRow {
                        name: row.name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let element_size = self.sizes.of(base_type);
            offset = align_offset(offset, element_size);

            let descriptor = match count {
                Some(count) => {
                    VariableDescriptor::array(row.name.clone(), db, offset, base_type, count)
                }
                None => VariableDescriptor::scalar(row.name.clone(), db, offset, base_type),
            };
            offset += descriptor.byte_len(&self.sizes) as u32;
            layout.variables.push(descriptor);
        }

        layout.end_offset = offset;
        Allocation { layout, skipped }
    }
}

/// What to do when a name is allocated twice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Later entry replaces the earlier one in the output map
    #[default]
    Overwrite,
    /// Allocation fails
    Reject,
}

/// Which artifact section a group belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Exchange,
    Recipe,
}

/// Summary of one allocated group
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub label: String,
    pub kind: GroupKind,
    pub db: u16,
    pub start_offset: u32,
    pub end_offset: u32,
    pub variables: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Allocates several groups, chaining offsets per DB number
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    allocator: Allocator,
    policy: DuplicatePolicy,
    end_offsets: HashMap<u16, u32>,
    owners: HashMap<String, u16>,
    exchange: LayoutMap,
    recipes: LayoutMap,
    groups: Vec<GroupSummary>,
}

impl LayoutBuilder {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            allocator,
            ..Default::default()
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Next free offset in `db`
    pub fn end_offset(&self, db: u16) -> u32 {
        self.end_offsets.get(&db).copied().unwrap_or(0)
    }

    /// Allocate a group, continuing after any earlier group in the same DB
    pub fn add_group(
        &mut self,
        label: impl Into<String>,
        kind: GroupKind,
        db: u16,
        rows: &[VariableRow],
    ) -> LayoutResult<&GroupSummary> {
        let label = label.into();
        let start = self.end_offset(db);
        let allocation = self.allocator.allocate(rows, db, start);

        if self.policy == DuplicatePolicy::Reject {
            let mut seen: HashMap<&str, u16> = HashMap::new();
            for descriptor in &allocation.layout.variables {
                let earlier = self
                    .owners
                    .get(descriptor.name())
                    .or_else(|| seen.get(descriptor.name()))
                    .copied();
                seen.insert(descriptor.name(), db);
                if let Some(first_db) = earlier {
                    return Err(LayoutError::DuplicateVariable {
                        name: descriptor.name().to_string(),
                        first_db,
                        second_db: db,
                    });
                }
            }
        }

        let variables = allocation.layout.len();
        for descriptor in allocation.layout.variables {
            if let Some(&first_db) = self.owners.get(descriptor.name()) {
                tracing::warn!(
                    "Variable '{}' already allocated in DB{}, overwriting with DB{}",
                    descriptor.name(),
                    first_db,
                    db
                );
            }
            self.owners.insert(descriptor.name().to_string(), db);
            // A name lives in one section only
            match kind {
                GroupKind::Exchange => {
                    self.recipes.remove(descriptor.name());
                    self.exchange.insert(descriptor)
                }
                GroupKind::Recipe => {
                    self.exchange.remove(descriptor.name());
                    self.recipes.insert(descriptor)
                }
            };
        }

        self.end_offsets.insert(db, allocation.layout.end_offset);
        tracing::debug!(
            "Allocated group '{}' in DB{}: {} variables, offsets {}..{}",
            label,
            db,
            variables,
            start,
            allocation.layout.end_offset
        );

        self.groups.push(GroupSummary {
            label,
            kind,
            db,
            start_offset: start,
            end_offset: allocation.layout.end_offset,
            variables,
            skipped: allocation.skipped,
        });
        let last = self.groups.len() - 1;
        Ok(&self.groups[last])
    }

    pub fn groups(&self) -> &[GroupSummary] {
        &self.groups
    }

    /// Exchange and recipe maps
    pub fn finish(self) -> (LayoutMap, LayoutMap) {
        (self.exchange, self.recipes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(defs: &[(&str, &str)]) -> Vec<VariableRow> {
        defs.iter().map(|(n, t)| VariableRow::new(*n, *t)).collect()
    }

    fn assert_no_overlap(layout: &DataBlockLayout, sizes: &TypeSizes) {
        for (i, a) in layout.variables.iter().enumerate() {
            for b in layout.variables.iter().skip(i + 1) {
                let ra = a.byte_range(sizes);
                let rb = b.byte_range(sizes);
                assert!(
                    ra.end <= rb.start || rb.end <= ra.start,
                    "{} {:?} overlaps {} {:?}",
                    a.name(),
                    ra,
                    b.name(),
                    rb
                );
            }
        }
    }

    #[test]
    fn test_concrete_allocation() {
        let allocator = Allocator::default();
        let alloc = allocator.allocate(
            &rows(&[
                ("Dose_number", "INT"),
                ("StableWeight", "REAL"),
                ("TargetWeight", "REAL"),
            ]),
            9,
            0,
        );

        let l = &alloc.layout;
        assert_eq!(l.get("Dose_number").unwrap().offset(), 0);
        assert_eq!(l.get("StableWeight").unwrap().offset(), 2);
        assert_eq!(l.get("TargetWeight").unwrap().offset(), 6);
        assert_eq!(l.end_offset, 10);
        assert!(alloc.skipped.is_empty());
    }

    #[test]
    fn test_even_alignment_after_odd_offset() {
        let allocator = Allocator::default();
        let alloc = allocator.allocate(
            &rows(&[
                ("Flag", "BOOL"),
                ("Counter", "INT"),
                ("Status", "BYTE"),
                ("Mode", "BYTE"),
                ("Other", "BOOL"),
                ("Total", "DINT"),
                ("Name", "STRING"),
            ]),
            1,
            0,
        );

        let l = &alloc.layout;
        assert_eq!(l.get("Flag").unwrap().offset(), 0);
        assert_eq!(l.get("Counter").unwrap().offset(), 2);
        assert_eq!(l.get("Status").unwrap().offset(), 4);
        assert_eq!(l.get("Mode").unwrap().offset(), 5);
        assert_eq!(l.get("Other").unwrap().offset(), 6);
        assert_eq!(l.get("Total").unwrap().offset(), 8);
        assert_eq!(l.get("Name").unwrap().offset(), 12);
        assert_eq!(l.end_offset, 12 + 256);

        let sizes = TypeSizes::default();
        for v in &l.variables {
            if sizes.of(v.base_type()) > 1 {
                assert_eq!(v.offset() % 2, 0, "{} is misaligned", v.name());
            }
        }
        assert_no_overlap(l, &sizes);
    }

    #[test]
    fn test_inline_and_column_arrays() {
        let allocator = Allocator::default();
        let alloc = allocator.allocate(
            &[
                VariableRow::new("Trigger", "Bool"),
                VariableRow::new("Curve", "real[600]"),
                VariableRow::new("Profile", "Array").with_array_size("REAL", 10),
                VariableRow::new("Tail", "BYTE"),
            ],
            3,
            0,
        );

        let l = &alloc.layout;
        let curve = l.get("Curve").unwrap();
        assert_eq!(curve.offset(), 2);
        assert_eq!(curve.count(), Some(600));
        let profile = l.get("Profile").unwrap();
        assert_eq!(profile.offset(), 2 + 2400);
        assert_eq!(profile.base_type(), BaseType::Real);
        assert_eq!(profile.count(), Some(10));
        assert_eq!(l.get("Tail").unwrap().offset(), 2 + 2400 + 40);
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let allocator = Allocator::default();
        let alloc = allocator.allocate(
            &rows(&[("A", "INT"), ("Broken", "LREAL"), ("B", "REAL")]),
            1,
            0,
        );

        assert_eq!(alloc.layout.len(), 2);
        assert_eq!(alloc.skipped.len(), 1);
        assert_eq!(alloc.skipped[0].name, "Broken");
        assert_eq!(alloc.layout.get("B").unwrap().offset(), 2);
    }

    #[test]
    fn test_chaining_equals_single_pass() {
        let allocator = Allocator::default();
        let first = rows(&[("A", "BOOL"), ("B", "INT"), ("C", "BYTE")]);
        let second = rows(&[("D", "REAL"), ("E", "BOOL"), ("F", "DINT")]);

        let part1 = allocator.allocate(&first, 5, 0);
        let part2 = allocator.allocate(&second, 5, part1.layout.end_offset);

        let mut all = first.clone();
        all.extend(second);
        let whole = allocator.allocate(&all, 5, 0);

        let chained: Vec<_> = part1
            .layout
            .variables
            .iter()
            .chain(part2.layout.variables.iter())
            .cloned()
            .collect();
        assert_eq!(chained, whole.layout.variables);
        assert_eq!(part2.layout.end_offset, whole.layout.end_offset);
    }

    #[test]
    fn test_builder_chains_same_db() {
        let mut builder = LayoutBuilder::new(Allocator::default());
        builder
            .add_group("exchange", GroupKind::Exchange, 9, &rows(&[("A", "BYTE")]))
            .unwrap();
        let recipe = builder
            .add_group("recipe", GroupKind::Recipe, 9, &rows(&[("R", "REAL")]))
            .unwrap();
        assert_eq!(recipe.start_offset, 1);
        assert_eq!(builder.end_offset(9), 6);

        let (exchange, recipes) = builder.finish();
        assert_eq!(exchange.get("A").unwrap().offset(), 0);
        assert_eq!(recipes.get("R").unwrap().offset(), 2);
    }

    #[test]
    fn test_duplicate_overwrite_policy() {
        let mut builder = LayoutBuilder::new(Allocator::default());
        builder
            .add_group("a", GroupKind::Exchange, 9, &rows(&[("Dup", "INT")]))
            .unwrap();
        builder
            .add_group("b", GroupKind::Exchange, 10, &rows(&[("Dup", "REAL")]))
            .unwrap();

        let (exchange, _) = builder.finish();
        let dup = exchange.get("Dup").unwrap();
        assert_eq!(dup.db(), 10);
        assert_eq!(dup.base_type(), BaseType::Real);
    }

    #[test]
    fn test_duplicate_overwrite_moves_between_sections() {
        let mut builder = LayoutBuilder::new(Allocator::default());
        builder
            .add_group(
                "exchange",
                GroupKind::Exchange,
                9,
                &rows(&[("Dose_number", "INT"), ("TargetWeight", "REAL"), ("Running", "BOOL")]),
            )
            .unwrap();
        builder
            .add_group("recipe", GroupKind::Recipe, 10, &rows(&[("TargetWeight", "REAL")]))
            .unwrap();

        let (exchange, recipes) = builder.finish();
        assert!(!exchange.contains("TargetWeight"));
        assert_eq!(exchange.len(), 2);
        assert_eq!(exchange.get("Running").unwrap().offset(), 6);
        assert_eq!(recipes.get("TargetWeight").unwrap().db(), 10);
    }

    #[test]
    fn test_duplicate_reject_policy() {
        let mut builder = LayoutBuilder::new(Allocator::default())
            .with_duplicate_policy(DuplicatePolicy::Reject);
        builder
            .add_group("a", GroupKind::Exchange, 9, &rows(&[("Dup", "INT")]))
            .unwrap();
        let err = builder
            .add_group("b", GroupKind::Recipe, 10, &rows(&[("Dup", "REAL")]))
            .unwrap_err();

        assert!(matches!(
            err,
            LayoutError::DuplicateVariable {
                first_db: 9,
                second_db: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_split_type_string() {
        assert_eq!(split_type_string("REAL[600]"), ("REAL".to_string(), Some(600)));
        assert_eq!(split_type_string("int"), ("INT".to_string(), None));
    }
}
