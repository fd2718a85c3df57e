//! The block-nest intermediate representation.
//!
//! A `Block` is an IR node carrying its own index space, polyhedral
//! constraints, memory refinements, and an ordered statement sequence.
//! Blocks nest: a statement may itself be a block, whose refinements view
//! the enclosing block's refinements.

use crate::ir::affine::Affine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named induction index.
///
/// `range` is the trip count. A nonzero `affine` marks a computed
/// pass-through index: its value is derived from the enclosing block's
/// indices and its range must be 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name, unique within the owning block.
    pub name: String,
    /// Trip count.
    pub range: u64,
    /// Value in terms of the enclosing block's indices (zero for real loops).
    pub affine: Affine,
}

impl Index {
    /// A plain loop index.
    pub fn new(name: impl Into<String>, range: u64) -> Self {
        Self { name: name.into(), range, affine: Affine::default() }
    }

    /// A range-1 index computed from the enclosing block's indices.
    pub fn passthru(name: impl Into<String>, affine: Affine) -> Self {
        Self { name: name.into(), range: 1, affine }
    }
}

/// Data direction of a refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefDir {
    /// No data flow (e.g. an alias-only binding).
    None,
    /// Read.
    In,
    /// Written.
    Out,
    /// Read and written.
    InOut,
}

impl RefDir {
    /// True for `In` and `InOut`.
    pub fn is_read(self) -> bool {
        matches!(self, RefDir::In | RefDir::InOut)
    }

    /// True for `Out` and `InOut`.
    pub fn is_write(self) -> bool {
        matches!(self, RefDir::Out | RefDir::InOut)
    }

    /// Lattice join of two directions.
    pub fn union(self, other: RefDir) -> RefDir {
        match (self.is_read() || other.is_read(), self.is_write() || other.is_write()) {
            (true, true) => RefDir::InOut,
            (true, false) => RefDir::In,
            (false, true) => RefDir::Out,
            (false, false) => RefDir::None,
        }
    }
}

/// Extent of one tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDim {
    /// Number of elements along this dimension.
    pub size: u64,
}

/// Per-dimension extents of a refinement's interior view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    /// Dimension extents, outermost first.
    pub dims: Vec<TensorDim>,
}

impl TensorShape {
    /// Build a shape from a size list.
    pub fn of(sizes: &[u64]) -> Self {
        Self { dims: sizes.iter().map(|&size| TensorDim { size }).collect() }
    }

    /// Sizes as a plain vector.
    pub fn sizes(&self) -> Vec<u64> {
        self.dims.iter().map(|d| d.size).collect()
    }
}

/// A named view of a memory buffer.
///
/// `into` is the name the owning block's statements use; `from` names the
/// refinement in the enclosing block this one views (empty for a local
/// allocation). `access` gives a per-dimension affine offset into the outer
/// view, and `interior_shape` the per-iteration extents of this view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refinement {
    /// Name bound inside the owning block.
    pub into: String,
    /// Enclosing refinement viewed (empty = locally allocated).
    pub from: String,
    /// Data direction.
    pub dir: RefDir,
    /// Per-dimension affine offsets in the owning block's indices.
    pub access: Vec<Affine>,
    /// Per-dimension extents of the view.
    pub interior_shape: TensorShape,
}

impl Refinement {
    /// True if this refinement writes its buffer.
    pub fn is_write(&self) -> bool {
        self.dir.is_write()
    }
}

/// Load an element from a refinement into a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    /// Source refinement name.
    pub from: String,
    /// Scalar defined by this load.
    pub into: String,
}

/// Store a scalar into a refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Source scalar name.
    pub from: String,
    /// Destination refinement name.
    pub into: String,
}

/// A literal constant value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    /// Integer constant.
    Int(i64),
    /// Floating-point constant.
    Float(f64),
}

/// Bind a literal to a scalar name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    /// Scalar defined by this constant.
    pub name: String,
    /// The value.
    pub value: ConstValue,
}

/// A scalar computation (add, mul, cmp, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsic {
    /// Operation name.
    pub name: String,
    /// Scalar operands.
    pub inputs: Vec<String>,
    /// Scalars defined.
    pub outputs: Vec<String>,
}

/// An opaque memory-level operation over whole refinements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Special {
    /// Operation name.
    pub name: String,
    /// Refinement operands read.
    pub inputs: Vec<String>,
    /// Refinement operands written.
    pub outputs: Vec<String>,
}

/// One statement in a block body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Refinement element -> scalar.
    Load(Load),
    /// Scalar -> refinement element.
    Store(Store),
    /// Literal -> scalar.
    Constant(Constant),
    /// Scalar computation.
    Intrinsic(Intrinsic),
    /// Memory-level operation.
    Special(Special),
    /// Nested block.
    Block(Block),
}

impl Statement {
    /// Scalar names this statement introduces.
    pub fn scalar_defs(&self) -> Vec<&str> {
        match self {
            Statement::Load(op) => vec![op.into.as_str()],
            Statement::Constant(op) => vec![op.name.as_str()],
            Statement::Intrinsic(op) => op.outputs.iter().map(String::as_str).collect(),
            Statement::Store(_) | Statement::Special(_) | Statement::Block(_) => Vec::new(),
        }
    }

    /// View as a nested block.
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Statement::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable view as a nested block.
    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Statement::Block(block) => Some(block),
            _ => None,
        }
    }
}

/// A block: index space, constraints, refinements, statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block name (may be empty).
    pub name: String,
    /// Free-form tags consumed by pass gating.
    pub tags: BTreeSet<String>,
    /// Induction indices.
    pub idxs: Vec<Index>,
    /// Affine constraints, each interpreted as `expr >= 0`.
    pub constraints: Vec<Affine>,
    /// Memory refinements.
    pub refs: Vec<Refinement>,
    /// Ordered statement sequence.
    pub stmts: Vec<Statement>,
}

impl Block {
    /// First refinement viewing the enclosing refinement `name`.
    pub fn ref_by_from(&self, name: &str) -> Option<&Refinement> {
        self.refs.iter().find(|r| r.from == name)
    }

    /// Look up an index by name.
    pub fn idx_by_name(&self, name: &str) -> Option<&Index> {
        self.idxs.iter().find(|ix| ix.name == name)
    }

    /// Refinements with a read bit set.
    pub fn ref_ins(&self) -> impl Iterator<Item = &Refinement> {
        self.refs.iter().filter(|r| r.dir.is_read())
    }

    /// Refinements with a write bit set.
    pub fn ref_outs(&self) -> impl Iterator<Item = &Refinement> {
        self.refs.iter().filter(|r| r.dir.is_write())
    }

    /// A refinement name not yet bound in this block: `base` itself, or
    /// `base_0`, `base_1`, ... on collision.
    pub fn unique_ref_name(&self, base: &str) -> String {
        if self.refs.iter().all(|r| r.into != base) {
            return base.to_string();
        }
        for i in 0.. {
            let candidate = format!("{}_{}", base, i);
            if self.refs.iter().all(|r| r.into != candidate) {
                return candidate;
            }
        }
        unreachable!()
    }

    /// True when every tag in `tags` is present.
    pub fn has_tags(&self, tags: &BTreeSet<String>) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// Add all of `tags`.
    pub fn add_tags(&mut self, tags: &BTreeSet<String>) {
        for t in tags {
            self.tags.insert(t.clone());
        }
    }

    /// Product of index trip counts.
    pub fn idx_volume(&self) -> u64 {
        self.idxs.iter().map(|ix| ix.range).product()
    }
}
