//! Intermediate representation for the block-nest optimizer.
//!
//! The IR is a tree of `Block`s: each block owns named induction indices,
//! affine constraints, memory refinements, and an ordered statement list
//! whose entries may themselves be blocks.

pub mod affine;
pub mod block;
pub mod print;

pub use affine::Affine;
pub use block::{
    Block, ConstValue, Constant, Index, Intrinsic, Load, RefDir, Refinement, Special, Statement,
    Store, TensorDim, TensorShape,
};
