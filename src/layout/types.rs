//! Core layout types
//!
//! - `BaseType`: the S7 elementary types a raw data block can hold
//! - `TypeSizes`: element sizes, with the configurable STRING length
//! - `VariableDescriptor`: where a named variable lives inside a DB
//! - `DataBlockLayout`: the ordered variables of one DB plus its end offset
//! - `LayoutMap`: ordered name → descriptor map over all data blocks

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Default STRING size: 254 characters plus the 2-byte header
pub const DEFAULT_STRING_SIZE: usize = 256;

/// Bit used for allocator-assigned BOOL variables
pub const BOOL_BIT: u8 = 0;

/// Elementary S7 types supported in non-optimized data blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BaseType {
    Bool,
    Byte,
    Int,
    Word,
    Dint,
    Dword,
    Real,
    String,
}

impl BaseType {
    /// Canonical upper-case name, as written in layout artifacts
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Bool => "BOOL",
            BaseType::Byte => "BYTE",
            BaseType::Int => "INT",
            BaseType::Word => "WORD",
            BaseType::Dint => "DINT",
            BaseType::Dword => "DWORD",
            BaseType::Real => "REAL",
            BaseType::String => "STRING",
        }
    }
}

impl FromStr for BaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOL" => Ok(BaseType::Bool),
            "BYTE" => Ok(BaseType::Byte),
            "INT" => Ok(BaseType::Int),
            "WORD" => Ok(BaseType::Word),
            "DINT" => Ok(BaseType::Dint),
            "DWORD" => Ok(BaseType::Dword),
            "REAL" => Ok(BaseType::Real),
            "STRING" => Ok(BaseType::String),
            other => Err(format!("unknown S7 type '{}'", other)),
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element sizes in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSizes {
    pub string: usize,
}

impl Default for TypeSizes {
    fn default() -> Self {
        Self {
            string: DEFAULT_STRING_SIZE,
        }
    }
}

impl TypeSizes {
    pub fn with_string_size(string: usize) -> Self {
        Self { string }
    }

    /// Size of one element of `base_type`
    pub fn of(&self, base_type: BaseType) -> usize {
        match base_type {
            BaseType::Bool | BaseType::Byte => 1,
            BaseType::Int | BaseType::Word => 2,
            BaseType::Dint | BaseType::Dword | BaseType::Real => 4,
            BaseType::String => self.string,
        }
    }
}

/// Location of one named variable inside a data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableDescriptor {
    Scalar {
        name: String,
        db: u16,
        offset: u32,
        base_type: BaseType,
    },
    Array {
        name: String,
        db: u16,
        offset: u32,
        base_type: BaseType,
        count: u32,
    },
}

impl VariableDescriptor {
    pub fn scalar(name: impl Into<String>, db: u16, offset: u32, base_type: BaseType) -> Self {
        VariableDescriptor::Scalar {
            name: name.into(),
            db,
            offset,
            base_type,
        }
    }

    pub fn array(
        name: impl Into<String>,
        db: u16,
        offset: u32,
        base_type: BaseType,
        count: u32,
    ) -> Self {
        VariableDescriptor::Array {
            name: name.into(),
            db,
            offset,
            base_type,
            count,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VariableDescriptor::Scalar { name, .. } | VariableDescriptor::Array { name, .. } => {
                name
            }
        }
    }

    pub fn db(&self) -> u16 {
        match self {
            VariableDescriptor::Scalar { db, .. } | VariableDescriptor::Array { db, .. } => *db,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            VariableDescriptor::Scalar { offset, .. }
            | VariableDescriptor::Array { offset, .. } => *offset,
        }
    }

    pub fn base_type(&self) -> BaseType {
        match self {
            VariableDescriptor::Scalar { base_type, .. }
            | VariableDescriptor::Array { base_type, .. } => *base_type,
        }
    }

    /// Element count for arrays, `None` for scalars
    pub fn count(&self) -> Option<u32> {
        match self {
            VariableDescriptor::Scalar { .. } => None,
            VariableDescriptor::Array { count, .. } => Some(*count),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, VariableDescriptor::Array { .. })
    }

    /// Number of bytes the variable occupies
    pub fn byte_len(&self, sizes: &TypeSizes) -> usize {
        let element = sizes.of(self.base_type());
        match self {
            VariableDescriptor::Scalar { .. } => element,
            VariableDescriptor::Array { count, .. } => element * *count as usize,
        }
    }

    pub fn byte_range(&self, sizes: &TypeSizes) -> Range<u32> {
        let start = self.offset();
        start..start + self.byte_len(sizes) as u32
    }
}

/// Ordered variables sharing one DB number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlockLayout {
    pub db: u16,
    pub variables: Vec<VariableDescriptor>,
    /// First free offset after the last variable
    pub end_offset: u32,
}

impl DataBlockLayout {
    pub fn new(db: u16, start_offset: u32) -> Self {
        Self {
            db,
            variables: Vec::new(),
            end_offset: start_offset,
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.name() == name)
    }
}

/// Ordered name → descriptor map over all data blocks
///
/// Re-inserting an existing name replaces the descriptor in place, so the
/// original position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutMap {
    entries: Vec<VariableDescriptor>,
    index: HashMap<String, usize>,
}

impl LayoutMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, returning the one it replaced
    pub fn insert(&mut self, descriptor: VariableDescriptor) -> Option<VariableDescriptor> {
        match self.index.get(descriptor.name()) {
            Some(&pos) => Some(std::mem::replace(&mut self.entries[pos], descriptor)),
            None => {
                self.index
                    .insert(descriptor.name().to_string(), self.entries.len());
                self.entries.push(descriptor);
                None
            }
        }
    }

    /// Remove a variable, keeping the order of the rest
    pub fn remove(&mut self, name: &str) -> Option<VariableDescriptor> {
        let pos = self.index.remove(name)?;
        let removed = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, name: &str) -> Option<&VariableDescriptor> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.entries.iter()
    }

    pub fn scalars(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.entries.iter().filter(|v| !v.is_array())
    }

    pub fn arrays(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.entries.iter().filter(|v| v.is_array())
    }

    /// Merge another map into this one; later entries win
    pub fn extend(&mut self, other: LayoutMap) {
        for descriptor in other.entries {
            self.insert(descriptor);
        }
    }

    /// Group descriptors by DB number, ordered by DB then offset
    pub fn data_blocks(&self, sizes: &TypeSizes) -> Vec<DataBlockLayout> {
        let mut blocks: Vec<DataBlockLayout> = Vec::new();
        for descriptor in &self.entries {
            let end = descriptor.byte_range(sizes).end;
            match blocks.iter_mut().find(|b| b.db == descriptor.db()) {
                Some(block) => {
                    block.end_offset = block.end_offset.max(end);
                    block.variables.push(descriptor.clone());
                }
                None => blocks.push(DataBlockLayout {
                    db: descriptor.db(),
                    variables: vec![descriptor.clone()],
                    end_offset: end,
                }),
            }
        }
        blocks.sort_by_key(|b| b.db);
        for block in &mut blocks {
            block.variables.sort_by_key(|v| v.offset());
        }
        blocks
    }
}

impl FromIterator<VariableDescriptor> for LayoutMap {
    fn from_iter<I: IntoIterator<Item = VariableDescriptor>>(iter: I) -> Self {
        let mut map = LayoutMap::new();
        for descriptor in iter {
            map.insert(descriptor);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_type_parse_case_insensitive() {
        assert_eq!("real".parse::<BaseType>().unwrap(), BaseType::Real);
        assert_eq!(" Bool ".parse::<BaseType>().unwrap(), BaseType::Bool);
        assert_eq!("DWORD".parse::<BaseType>().unwrap(), BaseType::Dword);
        assert!("LREAL".parse::<BaseType>().is_err());
    }

    #[test]
    fn test_type_sizes() {
        let sizes = TypeSizes::default();
        assert_eq!(sizes.of(BaseType::Bool), 1);
        assert_eq!(sizes.of(BaseType::Byte), 1);
        assert_eq!(sizes.of(BaseType::Int), 2);
        assert_eq!(sizes.of(BaseType::Word), 2);
        assert_eq!(sizes.of(BaseType::Dint), 4);
        assert_eq!(sizes.of(BaseType::Dword), 4);
        assert_eq!(sizes.of(BaseType::Real), 4);
        assert_eq!(sizes.of(BaseType::String), 256);
        assert_eq!(TypeSizes::with_string_size(34).of(BaseType::String), 34);
    }

    #[test]
    fn test_descriptor_byte_range() {
        let sizes = TypeSizes::default();
        let scalar = VariableDescriptor::scalar("StableWeight", 9, 2, BaseType::Real);
        assert_eq!(scalar.byte_range(&sizes), 2..6);
        assert_eq!(scalar.count(), None);

        let array = VariableDescriptor::array("Curve", 9, 10, BaseType::Real, 600);
        assert_eq!(array.byte_len(&sizes), 2400);
        assert_eq!(array.count(), Some(600));
        assert!(array.is_array());
    }

    #[test]
    fn test_layout_map_overwrite_keeps_position() {
        let mut map = LayoutMap::new();
        map.insert(VariableDescriptor::scalar("A", 1, 0, BaseType::Int));
        map.insert(VariableDescriptor::scalar("B", 1, 2, BaseType::Int));
        let previous = map.insert(VariableDescriptor::scalar("A", 2, 0, BaseType::Real));

        assert_eq!(previous.unwrap().db(), 1);
        assert_eq!(map.len(), 2);
        let names: Vec<&str> = map.iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(map.get("A").unwrap().db(), 2);
    }

    #[test]
    fn test_data_blocks_grouping() {
        let map: LayoutMap = vec![
            VariableDescriptor::scalar("X", 10, 4, BaseType::Real),
            VariableDescriptor::scalar("A", 9, 0, BaseType::Int),
            VariableDescriptor::scalar("W", 10, 0, BaseType::Dint),
        ]
        .into_iter()
        .collect();

        let blocks = map.data_blocks(&TypeSizes::default());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].db, 9);
        assert_eq!(blocks[0].end_offset, 2);
        assert_eq!(blocks[1].db, 10);
        assert_eq!(blocks[1].variables[0].name(), "W");
        assert_eq!(blocks[1].end_offset, 8);
    }
}
