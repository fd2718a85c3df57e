//! Loop tiling primitive for block nests.
//!
//! `apply_tile` splits each index of a block into an outer tile loop and an
//! inner point loop, inserting one new nested block that receives the
//! original statements. The outer loop keeps the original index name, so
//! callers can keep addressing the tile loops by the names they know.
//!
//! Two decompositions are supported for an index of range `r` and factor
//! `t` (`n = ceil(r/t)` outer iterations):
//!
//! - `interleave == true`: the inner loop walks a contiguous strip,
//!   `orig = outer*t + inner`;
//! - `interleave == false`: strips are interleaved across tiles,
//!   `orig = outer + inner*n`.

use crate::ir::affine::Affine;
use crate::ir::block::{Block, Index, Refinement, Statement};
use crate::utils::errors::{PassError, PassResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Per-axis split bookkeeping.
struct SplitAxis {
    factor: u64,
    range: u64,
    outer_range: u64,
}

fn unique_name(base: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    for i in 0.. {
        let candidate = format!("{}_{}", base, i);
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
    unreachable!()
}

/// Tile `block` by a per-index factor vector.
///
/// Factors of 1 leave their axis untouched; if every factor is 1 the block
/// is returned unchanged (no nested block is inserted). Constraints move
/// into the new inner block, rewritten over the split indices; an uneven
/// split adds the boundary constraint keeping the last tile inside the
/// original range. Nested child blocks whose computed indices read this
/// block's indices keep their values: unsplit indices are forwarded into
/// the new level under their own names, and references to split indices
/// are rewritten over the tile decomposition.
pub fn apply_tile(block: &mut Block, tile: &[u64], copy_tags: bool, interleave: bool) -> PassResult<()> {
    if tile.len() != block.idxs.len() {
        return Err(PassError::TileArity {
            block: block.name.clone(),
            expected: block.idxs.len(),
            got: tile.len(),
        });
    }
    for (ix, &t) in block.idxs.iter().zip(tile) {
        if t == 0 || (t > 1 && !ix.affine.is_zero()) {
            return Err(PassError::InvalidTileFactor {
                block: block.name.clone(),
                index: ix.name.clone(),
                factor: t,
            });
        }
    }

    let mut split: BTreeMap<String, SplitAxis> = BTreeMap::new();
    for (ix, &t) in block.idxs.iter().zip(tile) {
        if t > 1 {
            let outer_range = ix.range.div_ceil(t);
            split.insert(ix.name.clone(), SplitAxis { factor: t, range: ix.range, outer_range });
        }
    }
    if split.is_empty() {
        trace!(block = %block.name, "apply_tile: all factors trivial");
        return Ok(());
    }
    for r in &block.refs {
        for (i, acc) in r.access.iter().enumerate() {
            for (var, &coef) in acc.map() {
                if coef < 0 && split.contains_key(var) {
                    return Err(PassError::NegativeStride {
                        block: block.name.clone(),
                        buffer: r.into.clone(),
                        dim: i,
                    });
                }
            }
        }
    }

    let mut inner = Block { name: block.name.clone(), ..Default::default() };
    if copy_tags {
        inner.tags = block.tags.clone();
    }
    inner.stmts = std::mem::take(&mut block.stmts);
    let old_constraints = std::mem::take(&mut block.constraints);

    // Outer tile loops count tiles; inner point loops walk one tile.
    for ix in &mut block.idxs {
        if let Some(axis) = split.get(&ix.name) {
            ix.range = axis.outer_range;
            inner.idxs.push(Index::new(ix.name.clone(), axis.factor));
        }
    }

    // Constraints and nested blocks' computed indices both read this
    // block's indices by name; collect every referenced name so the new
    // level forwards or rebases it.
    let mut constraint_vars: BTreeSet<String> = BTreeSet::new();
    for c in &old_constraints {
        constraint_vars.extend(c.vars().map(String::from));
    }
    let mut outer_vars = constraint_vars.clone();
    for stmt in &inner.stmts {
        if let Statement::Block(child) = stmt {
            for ix in &child.idxs {
                outer_vars.extend(ix.affine.vars().map(String::from));
            }
        }
    }
    let mut taken: BTreeSet<String> = block.idxs.iter().map(|ix| ix.name.clone()).collect();
    taken.extend(outer_vars.iter().cloned());

    let mut full_value: BTreeMap<String, Affine> = BTreeMap::new();
    for (name, axis) in &split {
        if !outer_vars.contains(name) && axis.range % axis.factor == 0 {
            continue;
        }
        let passthru = unique_name(&format!("{}_o", name), &taken);
        taken.insert(passthru.clone());
        inner.idxs.push(Index::passthru(passthru.clone(), Affine::var(name.clone())));
        let value = if interleave {
            Affine::term(&passthru, axis.factor as i64) + Affine::var(name.clone())
        } else {
            Affine::var(passthru.clone()) + Affine::term(name.as_str(), axis.outer_range as i64)
        };
        if axis.range % axis.factor != 0 {
            // (r-1) - orig >= 0 keeps the ragged last tile in range.
            inner
                .constraints
                .push(Affine::constant(axis.range as i64 - 1) + value.clone() * -1);
        }
        full_value.insert(name.clone(), value);
    }
    for var in &outer_vars {
        if split.contains_key(var) {
            continue;
        }
        if block.idx_by_name(var).is_none() {
            return Err(PassError::UnknownIndex { block: block.name.clone(), index: var.clone() });
        }
        // Unsplit index: forward its value under the same name.
        inner.idxs.push(Index::passthru(var.clone(), Affine::var(var.clone())));
    }
    for mut constraint in old_constraints {
        let names: Vec<String> = constraint.vars().map(String::from).collect();
        for name in names {
            if let Some(value) = full_value.get(&name) {
                constraint.substitute(&name, value);
            }
        }
        inner.constraints.push(constraint);
    }

    // Nested blocks keep reading the original values of split indices.
    for stmt in &mut inner.stmts {
        if let Statement::Block(child) = stmt {
            for ix in &mut child.idxs {
                let names: Vec<String> = ix
                    .affine
                    .vars()
                    .filter(|v| full_value.contains_key(*v))
                    .map(String::from)
                    .collect();
                for name in names {
                    ix.affine.substitute(&name, &full_value[&name]);
                }
            }
        }
    }

    // Outer refinements view whole tiles; inner refinements offset within
    // one tile. Unsplit terms and constants stay with the outer view.
    let mut outer_refs = Vec::with_capacity(block.refs.len());
    let mut inner_refs = Vec::with_capacity(block.refs.len());
    for r in &block.refs {
        let mut outer_ref = r.clone();
        let mut inner_ref = Refinement {
            into: r.into.clone(),
            from: r.into.clone(),
            dir: r.dir,
            access: Vec::with_capacity(r.access.len()),
            interior_shape: r.interior_shape.clone(),
        };
        for (i, acc) in r.access.iter().enumerate() {
            let mut outer_acc = Affine::constant(acc.constant_term());
            let mut inner_acc = Affine::default();
            let mut expand = 0i64;
            for (var, &coef) in acc.map() {
                if var.is_empty() {
                    continue;
                }
                match split.get(var) {
                    Some(axis) => {
                        let (outer_scale, inner_scale) = if interleave {
                            (axis.factor as i64, 1)
                        } else {
                            (1, axis.outer_range as i64)
                        };
                        outer_acc.add_term(var, coef * outer_scale);
                        inner_acc.add_term(var, coef * inner_scale);
                        expand += coef * inner_scale * (axis.factor as i64 - 1);
                    }
                    None => outer_acc.add_term(var, coef),
                }
            }
            if let Some(dim) = outer_ref.interior_shape.dims.get_mut(i) {
                dim.size = (dim.size as i64 + expand) as u64;
            }
            outer_ref.access[i] = outer_acc;
            inner_ref.access.push(inner_acc);
        }
        outer_refs.push(outer_ref);
        inner_refs.push(inner_ref);
    }
    block.refs = outer_refs;
    inner.refs = inner_refs;

    block.stmts = vec![Statement::Block(inner)];
    Ok(())
}
