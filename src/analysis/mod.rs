//! Analysis primitives for the block-nest optimizer.

pub mod alias;

pub use alias::{AliasClass, AliasInfo, AliasMap, Extent};
