//! Hierarchical alias classification for refinements.
//!
//! An `AliasMap` is built per block, scoped under its parent's map. Each
//! refinement resolves to the buffer it ultimately views, with its access
//! flattened into a global index namespace (block-local index names are
//! tagged with their scope depth, computed indices are resolved through the
//! enclosing scope). Two resolved views can then be classified as exactly
//! aliasing, partially overlapping, or disjoint.

use crate::ir::affine::Affine;
use crate::ir::block::Block;
use crate::utils::errors::{PassError, PassResult};
use std::collections::BTreeMap;

/// Result of comparing two resolved refinement views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasClass {
    /// Provably non-overlapping.
    Disjoint,
    /// May overlap without being identical.
    Partial,
    /// Same element for every index valuation.
    Exact,
}

/// Inclusive element interval covered along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Smallest element offset touched.
    pub min: i64,
    /// Largest element offset touched.
    pub max: i64,
}

/// A refinement resolved against the scope chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    /// Name of the underlying allocation, unique per scope chain.
    pub base: String,
    /// Per-dimension access into the base, over global index names.
    pub access: Vec<Affine>,
    /// Per-dimension element intervals covered over all iterations.
    pub extents: Vec<Extent>,
    /// Interior view sizes at this level.
    pub interior: Vec<u64>,
}

impl AliasInfo {
    /// Classify the overlap of two resolved views.
    ///
    /// Views of different bases are `Disjoint`. Identical flattened accesses
    /// are `Exact` regardless of interior sizes (same element at the same
    /// index valuation). Otherwise the per-dimension extents decide between
    /// `Disjoint` and `Partial`.
    pub fn compare(a: &AliasInfo, b: &AliasInfo) -> AliasClass {
        if a.base != b.base {
            return AliasClass::Disjoint;
        }
        if a.access == b.access {
            return AliasClass::Exact;
        }
        if a.extents.len() == b.extents.len() {
            let disjoint = a
                .extents
                .iter()
                .zip(&b.extents)
                .any(|(ea, eb)| ea.max < eb.min || eb.max < ea.min);
            if disjoint {
                return AliasClass::Disjoint;
            }
        }
        AliasClass::Partial
    }
}

/// Alias scope for one block, chained from its parent's scope.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    depth: usize,
    info: BTreeMap<String, AliasInfo>,
    idx_ranges: BTreeMap<String, u64>,
    idx_global: BTreeMap<String, Affine>,
}

impl AliasMap {
    /// The empty scope above the root block.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build the scope for `block` nested under this one.
    ///
    /// Every refinement with a nonempty `from` must resolve in this scope;
    /// a refinement with an empty `from` allocates a fresh base.
    pub fn scope(&self, block: &Block) -> PassResult<AliasMap> {
        let depth = self.depth + 1;
        let global = |name: &str| format!("b{}:{}", depth, name);

        let mut idx_ranges = self.idx_ranges.clone();
        let mut idx_global: BTreeMap<String, Affine> = BTreeMap::new();
        for ix in &block.idxs {
            if ix.affine.is_zero() {
                let g = global(&ix.name);
                idx_ranges.insert(g.clone(), ix.range);
                idx_global.insert(ix.name.clone(), Affine::var(g));
            } else {
                // Computed index: its value lives in the parent's namespace.
                let mut resolved = Affine::constant(ix.affine.constant_term());
                for (var, &coef) in ix.affine.map() {
                    if var.is_empty() {
                        continue;
                    }
                    let src = self.idx_global.get(var).ok_or_else(|| PassError::UnknownIndex {
                        block: block.name.clone(),
                        index: var.clone(),
                    })?;
                    resolved += src.clone() * coef;
                }
                idx_global.insert(ix.name.clone(), resolved);
            }
        }

        let mut info = BTreeMap::new();
        for r in &block.refs {
            let (base, base_access) = if r.from.is_empty() {
                (global(&r.into), vec![Affine::default(); r.access.len()])
            } else {
                let parent = self.info.get(&r.from).ok_or_else(|| PassError::UnresolvedRefinement {
                    block: block.name.clone(),
                    from: r.from.clone(),
                })?;
                (parent.base.clone(), parent.access.clone())
            };

            let mut access = Vec::with_capacity(r.access.len());
            for (i, a) in r.access.iter().enumerate() {
                let mut flat = Affine::constant(a.constant_term());
                for (var, &coef) in a.map() {
                    if var.is_empty() {
                        continue;
                    }
                    let g = idx_global.get(var).ok_or_else(|| PassError::UnknownIndex {
                        block: block.name.clone(),
                        index: var.clone(),
                    })?;
                    flat += g.clone() * coef;
                }
                if let Some(outer) = base_access.get(i) {
                    flat += outer.clone();
                }
                access.push(flat);
            }

            let interior = r.interior_shape.sizes();
            let extents = access
                .iter()
                .enumerate()
                .map(|(i, a)| extent_of(a, &idx_ranges, interior.get(i).copied().unwrap_or(1)))
                .collect();
            info.insert(r.into.clone(), AliasInfo { base, access, extents, interior });
        }

        Ok(AliasMap { depth, info, idx_ranges, idx_global })
    }

    /// Resolved view for a refinement of the scoped block.
    pub fn get(&self, name: &str) -> Option<&AliasInfo> {
        self.info.get(name)
    }

    /// Resolved view for a refinement that must exist; a missing name is a
    /// caller bug.
    pub fn at(&self, name: &str) -> &AliasInfo {
        self.info
            .get(name)
            .unwrap_or_else(|| panic!("no alias info for refinement {:?}", name))
    }
}

/// Interval of elements touched by `access` over all index valuations, with
/// `size` elements read past each offset.
fn extent_of(access: &Affine, idx_ranges: &BTreeMap<String, u64>, size: u64) -> Extent {
    let mut min = access.constant_term();
    let mut max = min;
    for (var, &coef) in access.map() {
        if var.is_empty() {
            continue;
        }
        let range = idx_ranges.get(var).copied().unwrap_or(1);
        let span = coef * (range as i64 - 1);
        if span >= 0 {
            max += span;
        } else {
            min += span;
        }
    }
    max += size.max(1) as i64 - 1;
    Extent { min, max }
}
