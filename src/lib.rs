//! # NestOpt - Block-Nest Tensor IR Optimizer
//!
//! A framework for optimizing nested-block tensor IR, including:
//! - A block-nest data model (indices, constraints, refinements, statements)
//! - Hierarchical alias analysis over refinements
//! - Loop transformations (tiling, fusion, trivial-loop flattening)
//! - A pass pipeline and a JSON-based CLI
//!
//! ## Architecture
//!
//! ```text
//! Input IR → AliasMap → Transform (tile / fuse / flatten) → Output IR
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use nestopt::prelude::*;
//!
//! let mut root: Block = serde_json::from_str(&ir_json)?;
//! fusion_pass(&mut root, &FusionOptions::default())?;
//! println!("{}", root);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod ir;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::analysis::{AliasClass, AliasInfo, AliasMap};
    pub use crate::ir::{
        Affine, Block, ConstValue, Constant, Index, Intrinsic, Load, RefDir, Refinement, Special,
        Statement, Store, TensorDim, TensorShape,
    };
    pub use crate::transform::{
        apply_tile, compute_fusion_plan, flatten_trivial, fuse_blocks, fusion_inner, fusion_pass,
        fusion_refactor, FusionOptions, FusionPlan, FusionStrategy, Pipeline, PipelineConfig,
        TagFusionStrategy,
    };
    pub use crate::utils::errors::{PassError, PassResult};
}

use crate::ir::Block;
use crate::transform::{PassReport, Pipeline, PipelineConfig};
use crate::utils::errors::PassResult;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the default optimization pipeline over a block tree.
pub fn optimize(root: &mut Block, config: PipelineConfig) -> PassResult<PassReport> {
    Pipeline::new(config).run(root)
}
