//! Data block layout
//!
//! Computes byte-exact layouts for variables in non-optimized S7 data blocks:
//! - `types`: base types, sizes and variable descriptors
//! - `allocator`: aligned offset assignment and group chaining
//! - `artifact`: the JSON layout file consumed at engine start
//! - `table`: exchange/recipe CSV tables feeding the allocator

pub mod allocator;
pub mod artifact;
pub mod error;
pub mod table;
pub mod types;

pub use allocator::{
    align_offset, Allocation, Allocator, DuplicatePolicy, GroupKind, GroupSummary, LayoutBuilder,
    SkippedRow, VariableRow,
};
pub use artifact::LayoutArtifact;
pub use error::{LayoutError, LayoutResult};
pub use types::{
    BaseType, DataBlockLayout, LayoutMap, TypeSizes, VariableDescriptor, BOOL_BIT,
    DEFAULT_STRING_SIZE,
};
