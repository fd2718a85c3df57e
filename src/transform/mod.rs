//! Transformations over block nests.
//!
//! - **Tiling**: split loops into outer tile and inner point loops
//! - **Fusion**: merge adjacent blocks communicating through a buffer
//! - **Pipeline**: apply passes in sequence with a summary report

pub mod fuse;
pub mod pipeline;
pub mod tile;

pub use fuse::{
    compute_fusion_plan, flatten_trivial, fuse_blocks, fusion_inner, fusion_pass, fusion_refactor,
    FusionOptions, FusionPlan, FusionStrategy, TagFusionStrategy,
};
pub use pipeline::{count_blocks, flatten_recursive, PassReport, Pipeline, PipelineConfig};
pub use tile::apply_tile;
