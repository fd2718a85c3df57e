//! Error types for the block-nest optimizer.
//!
//! Soft rejections (a fusion pair that cannot be planned, an alias conflict)
//! are ordinary control flow and surface as `Option`/`bool`; the variants
//! here are hard failures that abort the running pass.

use thiserror::Error;

/// Hard failure raised by a transformation pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    /// A refinement access has a negative coefficient where a widened view
    /// must be derived.
    #[error("negative stride on buffer {buffer:?} dim {dim} in block {block:?}")]
    NegativeStride {
        /// Owning block name.
        block: String,
        /// Refinement name.
        buffer: String,
        /// Access dimension.
        dim: usize,
    },

    /// A tile shape does not match the block's index count.
    #[error("tile shape has {got} factors but block {block:?} has {expected} indices")]
    TileArity {
        /// Block being tiled.
        block: String,
        /// Index count.
        expected: usize,
        /// Factors supplied.
        got: usize,
    },

    /// A tile factor of zero, or a factor > 1 on a computed index.
    #[error("invalid tile factor {factor} on index {index:?} of block {block:?}")]
    InvalidTileFactor {
        /// Block being tiled.
        block: String,
        /// Offending index.
        index: String,
        /// The factor.
        factor: u64,
    },

    /// A refinement's `from` does not name anything in the enclosing scope.
    #[error("refinement {from:?} in block {block:?} does not resolve in the enclosing scope")]
    UnresolvedRefinement {
        /// Owning block name.
        block: String,
        /// The dangling `from` name.
        from: String,
    },

    /// An access or constraint references a name that is not an index of the
    /// owning block.
    #[error("block {block:?} references unknown index {index:?}")]
    UnknownIndex {
        /// Owning block name.
        block: String,
        /// The unknown name.
        index: String,
    },
}

/// Result alias for pass operations.
pub type PassResult<T> = std::result::Result<T, PassError>;
