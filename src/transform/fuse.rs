//! Loop fusion over adjacent blocks in a nest.
//!
//! Within one parent block, consecutive child blocks that communicate
//! through a shared buffer are greedily merged: a fusion plan aligns their
//! index spaces (tiling the consumer where strides differ), each block is
//! refactored into an outer/inner pair sharing the outer index layout, and
//! the two outers are fused — refinements united under alias rules, scalars
//! renamed capture-free, statements concatenated.
//!
//! A failed attempt leaves the parent untouched: refactoring operates on
//! copies, the fuser merges refinements on a scratch set, and the driver
//! splices results in only after the fuse succeeds.

use crate::analysis::alias::{AliasClass, AliasInfo, AliasMap};
use crate::ir::affine::Affine;
use crate::ir::block::{Block, Index, Refinement, Statement};
use crate::transform::tile::apply_tile;
use crate::utils::errors::{PassError, PassResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Index-rename maps and tile factors that make two blocks share an outer
/// index space.
///
/// Index `x` of the first block becomes outer index `remap_a[x]`; aligned
/// indices of the second block adopt the first block's name through
/// `remap_b`. `tile_a`/`tile_b` are per-index factors for [`apply_tile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionPlan {
    /// Outer renames for the first block.
    pub remap_a: BTreeMap<String, String>,
    /// Outer renames for the second block.
    pub remap_b: BTreeMap<String, String>,
    /// Tile factors for the first block, one per index.
    pub tile_a: Vec<u64>,
    /// Tile factors for the second block, one per index.
    pub tile_b: Vec<u64>,
}

/// Derive a fusion plan for two blocks sharing the buffer `buf`, or reject.
///
/// Every jointly used access dimension must be a single positive-stride
/// term on each side, with the producer stride an exact positive multiple
/// of the consumer stride; the consumer is then tiled by the quotient so
/// its outer loop matches the producer's granularity. Both blocks must
/// carry identical constraint sequences.
pub fn compute_fusion_plan(a: &Block, b: &Block, buf: &str) -> Option<FusionPlan> {
    debug!(buf, a = %a.name, b = %b.name, "computing fusion plan");
    let mut plan = FusionPlan {
        remap_a: BTreeMap::new(),
        remap_b: BTreeMap::new(),
        tile_a: vec![1; a.idxs.len()],
        tile_b: vec![1; b.idxs.len()],
    };
    let Some(ref_a) = a.ref_by_from(buf) else {
        debug!(buf, "fusion plan: buffer unknown in first block");
        return None;
    };
    let Some(ref_b) = b.ref_by_from(buf) else {
        debug!(buf, "fusion plan: buffer unknown in second block");
        return None;
    };
    assert_eq!(ref_a.access.len(), ref_b.access.len(), "shared buffer access arity");
    for i in 0..ref_a.access.len() {
        let poly_a = &ref_a.access[i];
        let poly_b = &ref_b.access[i];
        if poly_a.is_zero() && poly_b.is_zero() {
            continue;
        }
        let single = |poly: &Affine| -> Option<(String, i64)> {
            let mut terms = poly.map().iter();
            match (terms.next(), terms.next()) {
                (Some((name, &coef)), None) if !name.is_empty() => Some((name.clone(), coef)),
                _ => None,
            }
        };
        let Some((idx_a, mul_a)) = single(poly_a) else {
            debug!(access = %poly_a, "fusion plan: complex access in first block");
            return None;
        };
        let Some((idx_b, mul_b)) = single(poly_b) else {
            debug!(access = %poly_b, "fusion plan: complex access in second block");
            return None;
        };
        if plan.remap_a.contains_key(&idx_a) {
            debug!(idx = %idx_a, "fusion plan: duplicate index");
            return None;
        }
        if mul_a % mul_b != 0 {
            debug!(mul_a, mul_b, "fusion plan: uneven index division");
            return None;
        }
        let quot = mul_a / mul_b;
        if quot <= 0 {
            debug!(mul_a, mul_b, "fusion plan: non-positive stride ratio");
            return None;
        }
        if let Some(pos) = b.idxs.iter().position(|ix| ix.name == idx_b) {
            plan.tile_b[pos] = quot as u64;
        }
        plan.remap_b.insert(idx_b, idx_a.clone());
        plan.remap_a.insert(idx_a.clone(), idx_a);
    }
    if a.constraints != b.constraints {
        debug!("fusion plan: incompatible constraints");
        return None;
    }
    for constraint in &a.constraints {
        for var in constraint.vars() {
            plan.remap_a.entry(var.to_string()).or_insert_with(|| var.to_string());
        }
    }
    for constraint in &b.constraints {
        for var in constraint.vars() {
            plan.remap_b.entry(var.to_string()).or_insert_with(|| var.to_string());
        }
    }
    Some(plan)
}

/// Inline every immediate child block whose iteration volume is 1 and that
/// renames no refinement, substituting its computed index values into any
/// deeper blocks spliced up.
pub fn flatten_trivial(outer: &mut Block) {
    let old = std::mem::take(&mut outer.stmts);
    let mut stmts = Vec::with_capacity(old.len());
    for stmt in old {
        let Statement::Block(mut inner) = stmt else {
            stmts.push(stmt);
            continue;
        };
        if inner.idx_volume() != 1 {
            trace!(block = %inner.name, "flatten: keep, volume > 1");
            stmts.push(Statement::Block(inner));
            continue;
        }
        let renames = inner.refs.iter().any(|r| !r.from.is_empty() && r.into != r.from);
        if renames {
            // Renames would have to be pushed through the inner statements.
            trace!(block = %inner.name, "flatten: keep, renames");
            stmts.push(Statement::Block(inner));
            continue;
        }
        for mut s in std::mem::take(&mut inner.stmts) {
            if let Statement::Block(deep) = &mut s {
                // Resolve copied-down index values through the vanishing level.
                for ix in &mut deep.idxs {
                    let names: Vec<String> = ix.affine.vars().map(String::from).collect();
                    for name in names {
                        let repl = inner
                            .idx_by_name(&name)
                            .unwrap_or_else(|| {
                                panic!("no index {:?} in block {:?}", name, inner.name)
                            })
                            .affine
                            .clone();
                        ix.affine.substitute(&name, &repl);
                    }
                }
            }
            stmts.push(s);
        }
    }
    outer.stmts = stmts;
}

/// Rewrite a block into an outer/inner pair according to a rename map and
/// tile vector, so that independently refactored blocks share an outer
/// index layout.
///
/// The outer block holds the renamed (sorted) mapped indices, the shared
/// constraints, and refinements viewed through the outer index space; the
/// inner block keeps the original statements, with trip-1 computed indices
/// reading the outer names and refinement accesses reduced to the interior
/// terms. Trivial inner loops are flattened away before returning.
pub fn fusion_refactor(
    orig: &Block,
    mapping: &BTreeMap<String, String>,
    tile: &[u64],
) -> PassResult<Block> {
    trace!(block = %orig.name, ?mapping, ?tile, "fusion refactor");
    let mut tiled = orig.clone();
    apply_tile(&mut tiled, tile, true, true)?;

    let mut outer = Block {
        name: tiled.name.clone(),
        tags: tiled.tags.clone(),
        constraints: tiled.constraints.clone(),
        ..Default::default()
    };
    let mut inner = Block {
        name: tiled.name.clone(),
        constraints: tiled.constraints.clone(),
        stmts: tiled.stmts.clone(),
        ..Default::default()
    };

    for ix in &tiled.idxs {
        match mapping.get(&ix.name) {
            None => inner.idxs.push(ix.clone()),
            Some(renamed) => {
                inner.idxs.push(Index::passthru(ix.name.clone(), Affine::var(renamed.clone())));
                let mut outer_ix = ix.clone();
                outer_ix.name = renamed.clone();
                outer.idxs.push(outer_ix);
            }
        }
    }
    // A total order shared by both refactored siblings.
    outer.idxs.sort_by(|x, y| x.name.cmp(&y.name));

    // Outer refinements view the buffer through the outer index space;
    // indices that stayed inside widen the view instead.
    for r in &tiled.refs {
        let mut nr = r.clone();
        for (i, acc) in r.access.iter().enumerate() {
            let mut max_val = nr.interior_shape.dims[i].size as i64 - 1;
            let mut rebuilt = Affine::constant(acc.constant_term());
            for (var, &coef) in acc.map() {
                if var.is_empty() {
                    continue;
                }
                match mapping.get(var) {
                    Some(renamed) => rebuilt.add_term(renamed, coef),
                    None => {
                        if coef < 0 {
                            return Err(PassError::NegativeStride {
                                block: orig.name.clone(),
                                buffer: r.into.clone(),
                                dim: i,
                            });
                        }
                        let range = tiled
                            .idx_by_name(var)
                            .ok_or_else(|| PassError::UnknownIndex {
                                block: tiled.name.clone(),
                                index: var.to_string(),
                            })?
                            .range;
                        max_val += (range as i64 - 1) * coef;
                    }
                }
            }
            nr.interior_shape.dims[i].size = (max_val + 1) as u64;
            nr.access[i] = rebuilt;
        }
        outer.refs.push(nr);
    }

    // Inner refinements view the outer refinement of the same name and keep
    // only the interior access terms.
    for r in &tiled.refs {
        let mut nr = r.clone();
        nr.from = nr.into.clone();
        for acc in &mut nr.access {
            let mut interior = Affine::default();
            for (var, &coef) in acc.map() {
                if !var.is_empty() && !mapping.contains_key(var) {
                    interior.add_term(var, coef);
                }
            }
            *acc = interior;
        }
        inner.refs.push(nr);
    }

    outer.stmts.push(Statement::Block(inner));
    flatten_trivial(&mut outer);
    Ok(outer)
}

fn unique_ref_name(refs: &[Refinement], base: &str) -> String {
    if refs.iter().all(|r| r.into != base) {
        return base.to_string();
    }
    for i in 0.. {
        let candidate = format!("{}_{}", base, i);
        if refs.iter().all(|r| r.into != candidate) {
            return candidate;
        }
    }
    unreachable!()
}

/// Pick a non-capturing name for a scalar defined by a statement moving
/// across, recording the rename for later uses.
fn def_scalar(
    all_scalars: &mut BTreeSet<String>,
    scalar_rename: &mut BTreeMap<String, String>,
    orig: &str,
) -> String {
    if all_scalars.insert(orig.to_string()) {
        scalar_rename.insert(orig.to_string(), orig.to_string());
        return orig.to_string();
    }
    for i in 0.. {
        let with_suffix = format!("{}_{}", orig, i);
        if all_scalars.insert(with_suffix.clone()) {
            scalar_rename.insert(orig.to_string(), with_suffix.clone());
            return with_suffix;
        }
    }
    unreachable!()
}

/// Merge block `b` into block `a`, which must share `a`'s index layout.
///
/// Returns `Ok(false)` when the blocks cannot be fused (index mismatch, or
/// a partial alias with a writer on either side); `a` is then unchanged.
/// A constraint mismatch reports `Ok(true)` without merging — the surface
/// contract of the original pass; the standard driver never reaches that
/// branch because plan computation already required equal constraints.
pub fn fuse_blocks(scope: &AliasMap, a: &mut Block, b: &Block) -> PassResult<bool> {
    if a.idxs != b.idxs {
        debug!(a = %a.name, b = %b.name, "fuse failed: mismatched indexes");
        return Ok(false);
    }
    if a.constraints != b.constraints {
        debug!(a = %a.name, b = %b.name, "fuse skipped: mismatched constraints");
        return Ok(true);
    }
    let a_map = scope.scope(a)?;
    let b_map = scope.scope(b)?;

    // Refinements merge on a scratch set; `a` stays untouched until the
    // whole walk has succeeded.
    let a_len = a.refs.len();
    let mut merged = a.refs.clone();
    let mut remap_b: BTreeMap<String, String> = BTreeMap::new();
    for nb in &b.refs {
        let mut was_merged = false;
        for oa in merged.iter_mut().take(a_len) {
            match AliasInfo::compare(a_map.at(&oa.into), b_map.at(&nb.into)) {
                AliasClass::Partial => {
                    if nb.dir.is_write() || oa.dir.is_write() {
                        debug!(a_ref = %oa.into, b_ref = %nb.into, "fuse failed: mismatched aliases");
                        return Ok(false);
                    }
                }
                AliasClass::Exact => {
                    remap_b.insert(nb.into.clone(), oa.into.clone());
                    oa.dir = oa.dir.union(nb.dir);
                    was_merged = true;
                    break;
                }
                AliasClass::Disjoint => {}
            }
        }
        if !was_merged {
            let new_name = unique_ref_name(&merged, &nb.into);
            remap_b.insert(nb.into.clone(), new_name.clone());
            let mut copy = nb.clone();
            copy.into = new_name;
            merged.push(copy);
        }
    }
    // Past the point of no return.
    a.refs = merged;

    if !a.name.is_empty() && !b.name.is_empty() {
        a.name = format!("{}+{}", a.name, b.name);
    } else if a.name.is_empty() {
        a.name = b.name.clone();
    }

    // Scalars already defined in `a`; colliding definitions from `b` pick a
    // fresh suffixed name and later uses follow the rename.
    let mut all_scalars: BTreeSet<String> = BTreeSet::new();
    for stmt in &a.stmts {
        for name in stmt.scalar_defs() {
            all_scalars.insert(name.to_string());
        }
    }
    let mut scalar_rename: BTreeMap<String, String> = BTreeMap::new();

    for stmt in &b.stmts {
        let mut stmt = stmt.clone();
        match &mut stmt {
            Statement::Load(op) => {
                op.into = def_scalar(&mut all_scalars, &mut scalar_rename, &op.into);
                op.from = remap_b[op.from.as_str()].clone();
            }
            Statement::Store(op) => {
                op.into = remap_b[op.into.as_str()].clone();
                op.from = scalar_rename[op.from.as_str()].clone();
            }
            Statement::Constant(op) => {
                op.name = def_scalar(&mut all_scalars, &mut scalar_rename, &op.name);
            }
            Statement::Intrinsic(op) => {
                for input in &mut op.inputs {
                    *input = scalar_rename[input.as_str()].clone();
                }
                for output in &mut op.outputs {
                    *output = def_scalar(&mut all_scalars, &mut scalar_rename, output);
                }
            }
            Statement::Special(op) => {
                for input in &mut op.inputs {
                    *input = remap_b[input.as_str()].clone();
                }
                for output in &mut op.outputs {
                    *output = remap_b[output.as_str()].clone();
                }
            }
            Statement::Block(inner) => {
                for r in &mut inner.refs {
                    r.from = remap_b[r.from.as_str()].clone();
                }
            }
        }
        a.stmts.push(stmt);
    }
    Ok(true)
}

/// Veto and observation hooks consulted by the fusion driver.
pub trait FusionStrategy {
    /// Approve or refuse fusing `a` with `b` under `parent`.
    fn attempt_fuse(&mut self, parent: &Block, a: &Block, b: &Block) -> bool;
    /// Called when an approved fusion fails in the fuser.
    fn on_failed(&mut self);
    /// Called after `merged` replaced `a` and `b` under the scope.
    fn on_fused(&mut self, scope: &AliasMap, merged: &mut Block, a: &Block, b: &Block);
}

/// Tag requirements gating the default strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionOptions {
    /// Tags the parent block must carry.
    pub parent_reqs: BTreeSet<String>,
    /// Tags the first block must carry.
    pub a_reqs: BTreeSet<String>,
    /// Tags the second block must carry.
    pub b_reqs: BTreeSet<String>,
    /// Tags stamped onto each fused result.
    pub fused_set: BTreeSet<String>,
}

/// Default strategy: approve when parent and both children carry the
/// required tags, and tag the fused result.
#[derive(Debug, Clone)]
pub struct TagFusionStrategy {
    options: FusionOptions,
}

impl TagFusionStrategy {
    /// Build the strategy from its tag sets.
    pub fn new(options: FusionOptions) -> Self {
        Self { options }
    }
}

impl FusionStrategy for TagFusionStrategy {
    fn attempt_fuse(&mut self, parent: &Block, a: &Block, b: &Block) -> bool {
        parent.has_tags(&self.options.parent_reqs)
            && a.has_tags(&self.options.a_reqs)
            && b.has_tags(&self.options.b_reqs)
    }

    fn on_failed(&mut self) {}

    fn on_fused(&mut self, _scope: &AliasMap, merged: &mut Block, _a: &Block, _b: &Block) {
        merged.add_tags(&self.options.fused_set);
    }
}

/// Greedily fuse adjacent child blocks of `parent` that communicate through
/// a producer's output buffer.
///
/// The cursor walks the statement list in order; at each child block the
/// driver keeps fusing the (possibly already merged) block with its
/// immediate successor until no shared buffer, no plan, a strategy veto, or
/// a fuser rejection stops it, then advances.
pub fn fusion_inner(
    scope: &AliasMap,
    parent: &mut Block,
    strategy: &mut dyn FusionStrategy,
) -> PassResult<()> {
    let mut i = 0;
    while i < parent.stmts.len() {
        if parent.stmts[i].as_block().is_none() {
            i += 1;
            continue;
        }
        loop {
            let Some(b2) = parent.stmts.get(i + 1).and_then(Statement::as_block) else {
                break;
            };
            let b1 = parent.stmts[i].as_block().expect("cursor holds a block");
            trace!(block = %b1.name, "attempting fusion");

            // First consumer input fed by one of the producer's outputs.
            let outs: BTreeSet<&str> = b1.ref_outs().map(|r| r.from.as_str()).collect();
            let fuse_on = b2
                .ref_ins()
                .find(|r| outs.contains(r.from.as_str()))
                .map(|r| r.from.clone())
                .unwrap_or_default();
            if fuse_on.is_empty() {
                debug!(block = %b1.name, "nothing to fuse on");
                break;
            }
            debug!(buf = %fuse_on, "fuse on buffer");

            let Some(plan) = compute_fusion_plan(b1, b2, &fuse_on) else {
                debug!("fusion plan failed");
                break;
            };
            if !strategy.attempt_fuse(parent, b1, b2) {
                debug!("fusion denied by strategy");
                break;
            }
            let mut r1 = fusion_refactor(b1, &plan.remap_a, &plan.tile_a)?;
            let r2 = fusion_refactor(b2, &plan.remap_b, &plan.tile_b)?;
            if !fuse_blocks(scope, &mut r1, &r2)? {
                strategy.on_failed();
                debug!("fusion failed");
                break;
            }
            debug!(block = %r1.name, "fused");
            let old_b1 = std::mem::replace(&mut parent.stmts[i], Statement::Block(r1));
            let old_b2 = parent.stmts.remove(i + 1);
            let merged = parent.stmts[i].as_block_mut().expect("cursor holds the fused block");
            strategy.on_fused(
                scope,
                merged,
                old_b1.as_block().expect("replaced statement was a block"),
                old_b2.as_block().expect("erased statement was a block"),
            );
        }
        i += 1;
    }
    Ok(())
}

fn fusion_recurse(
    map: &AliasMap,
    block: &mut Block,
    strategy: &mut dyn FusionStrategy,
) -> PassResult<()> {
    fusion_inner(map, block, strategy)?;
    for stmt in &mut block.stmts {
        if let Statement::Block(inner) = stmt {
            let inner_map = map.scope(inner)?;
            fusion_recurse(&inner_map, inner, strategy)?;
        }
    }
    Ok(())
}

/// Run the tag-gated fusion pass over a whole block tree, parents before
/// children.
pub fn fusion_pass(root: &mut Block, options: &FusionOptions) -> PassResult<()> {
    let root_map = AliasMap::root().scope(root)?;
    let mut strategy = TagFusionStrategy::new(options.clone());
    fusion_recurse(&root_map, root, &mut strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::{Constant, ConstValue, Intrinsic, Load, RefDir, Store, TensorShape};

    fn buffer(name: &str, size: u64) -> Refinement {
        Refinement {
            into: name.to_string(),
            from: String::new(),
            dir: RefDir::None,
            access: vec![Affine::default()],
            interior_shape: TensorShape::of(&[size]),
        }
    }

    fn view(name: &str, dir: RefDir, access: Affine) -> Refinement {
        Refinement {
            into: name.to_string(),
            from: name.to_string(),
            dir,
            access: vec![access],
            interior_shape: TensorShape::of(&[1]),
        }
    }

    fn producer(idx: &str, n: u64, stride: i64) -> Block {
        Block {
            name: "A".to_string(),
            idxs: vec![Index::new(idx, n)],
            refs: vec![
                view("X", RefDir::In, Affine::var(idx)),
                view("T", RefDir::Out, Affine::term(idx, stride)),
            ],
            stmts: vec![
                Statement::Load(Load { from: "X".to_string(), into: "$x".to_string() }),
                Statement::Store(Store { from: "$x".to_string(), into: "T".to_string() }),
            ],
            ..Default::default()
        }
    }

    fn consumer(idx: &str, n: u64, stride: i64) -> Block {
        Block {
            name: "B".to_string(),
            idxs: vec![Index::new(idx, n)],
            refs: vec![
                view("T", RefDir::In, Affine::term(idx, stride)),
                view("Y", RefDir::Out, Affine::var(idx)),
            ],
            stmts: vec![
                Statement::Load(Load { from: "T".to_string(), into: "$t".to_string() }),
                Statement::Store(Store { from: "$t".to_string(), into: "Y".to_string() }),
            ],
            ..Default::default()
        }
    }

    fn parent_scope(parent: &Block) -> AliasMap {
        AliasMap::root().scope(parent).expect("parent scope")
    }

    fn parent_of(children: Vec<Block>) -> Block {
        Block {
            name: "main".to_string(),
            refs: vec![buffer("X", 64), buffer("T", 64), buffer("Y", 64), buffer("W", 64)],
            stmts: children.into_iter().map(Statement::Block).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_elementwise() {
        let a = producer("i", 8, 1);
        let b = consumer("j", 8, 1);
        let plan = compute_fusion_plan(&a, &b, "T").expect("plan");
        assert_eq!(plan.remap_a.get("i").map(String::as_str), Some("i"));
        assert_eq!(plan.remap_b.get("j").map(String::as_str), Some("i"));
        assert_eq!(plan.tile_a, vec![1]);
        assert_eq!(plan.tile_b, vec![1]);
    }

    #[test]
    fn test_plan_stride_mismatch_tiles_consumer() {
        let a = producer("i", 8, 4);
        let b = consumer("j", 16, 2);
        let plan = compute_fusion_plan(&a, &b, "T").expect("plan");
        assert_eq!(plan.tile_b, vec![2]);
        assert_eq!(plan.remap_b.get("j").map(String::as_str), Some("i"));
    }

    #[test]
    fn test_plan_rejects_unknown_buffer() {
        let a = producer("i", 8, 1);
        let b = consumer("j", 8, 1);
        assert!(compute_fusion_plan(&a, &b, "Z").is_none());
    }

    #[test]
    fn test_plan_rejects_complex_access() {
        let mut a = producer("i", 8, 1);
        a.idxs.push(Index::new("k", 4));
        a.refs[1].access[0] = Affine::var("i") + Affine::var("k");
        let b = consumer("j", 8, 1);
        assert!(compute_fusion_plan(&a, &b, "T").is_none());
    }

    #[test]
    fn test_plan_rejects_duplicate_index() {
        let mut a = producer("i", 8, 1);
        let mut b = consumer("j", 8, 1);
        a.refs[1].access = vec![Affine::var("i"), Affine::var("i")];
        a.refs[1].interior_shape = TensorShape::of(&[1, 1]);
        b.refs[0].access = vec![Affine::var("j"), Affine::var("j")];
        b.refs[0].interior_shape = TensorShape::of(&[1, 1]);
        assert!(compute_fusion_plan(&a, &b, "T").is_none());
    }

    #[test]
    fn test_plan_rejects_uneven_division() {
        let a = producer("i", 8, 3);
        let b = consumer("j", 12, 2);
        assert!(compute_fusion_plan(&a, &b, "T").is_none());
    }

    #[test]
    fn test_plan_rejects_negative_ratio() {
        let a = producer("i", 8, -4);
        let b = consumer("j", 16, 2);
        assert!(compute_fusion_plan(&a, &b, "T").is_none());
    }

    #[test]
    fn test_plan_rejects_mismatched_constraints() {
        let mut a = producer("i", 8, 1);
        let b = consumer("j", 8, 1);
        a.constraints.push(Affine::var("i") + Affine::constant(-1));
        assert!(compute_fusion_plan(&a, &b, "T").is_none());
    }

    #[test]
    fn test_plan_seeds_constraint_vars() {
        let mut a = producer("i", 8, 1);
        let mut b = consumer("j", 8, 1);
        let shared = Affine::var("q") + Affine::constant(-1);
        a.constraints.push(shared.clone());
        b.constraints.push(shared);
        let plan = compute_fusion_plan(&a, &b, "T").expect("plan");
        assert_eq!(plan.remap_a.get("q").map(String::as_str), Some("q"));
        assert_eq!(plan.remap_b.get("q").map(String::as_str), Some("q"));
        // The constant term never enters the rename maps.
        assert!(!plan.remap_a.contains_key(""));
        assert!(!plan.remap_b.contains_key(""));
    }

    #[test]
    fn test_flatten_splices_trivial_block() {
        let mid = Block {
            name: "mid".to_string(),
            idxs: vec![Index::passthru("t", Affine::var("o"))],
            stmts: vec![
                Statement::Load(Load { from: "R".to_string(), into: "$r".to_string() }),
                Statement::Block(Block {
                    name: "deep".to_string(),
                    idxs: vec![Index::passthru("p", Affine::term("t", 2))],
                    ..Default::default()
                }),
            ],
            ..Default::default()
        };
        let mut outer = Block {
            name: "outer".to_string(),
            idxs: vec![Index::new("o", 4)],
            stmts: vec![Statement::Block(mid)],
            ..Default::default()
        };
        flatten_trivial(&mut outer);
        assert_eq!(outer.stmts.len(), 2);
        assert!(matches!(outer.stmts[0], Statement::Load(_)));
        // The copied-down value resolved through the vanished level.
        let deep = outer.stmts[1].as_block().expect("deep block");
        assert_eq!(deep.idxs[0].affine, Affine::term("o", 2));
    }

    #[test]
    fn test_flatten_skips_renames_and_real_loops() {
        let renaming = Block {
            name: "renaming".to_string(),
            refs: vec![Refinement {
                into: "V".to_string(),
                from: "T".to_string(),
                dir: RefDir::In,
                access: vec![],
                interior_shape: TensorShape::default(),
            }],
            ..Default::default()
        };
        let looping = Block {
            name: "looping".to_string(),
            idxs: vec![Index::new("i", 2)],
            ..Default::default()
        };
        let mut outer = Block {
            stmts: vec![Statement::Block(renaming), Statement::Block(looping)],
            ..Default::default()
        };
        flatten_trivial(&mut outer);
        assert_eq!(outer.stmts.len(), 2);
        assert!(outer.stmts.iter().all(|s| s.as_block().is_some()));
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let trivial = Block {
            name: "trivial".to_string(),
            idxs: vec![Index::passthru("t", Affine::var("o"))],
            stmts: vec![
                Statement::Load(Load { from: "R".to_string(), into: "$r".to_string() }),
                Statement::Block(Block {
                    name: "loop".to_string(),
                    idxs: vec![Index::new("k", 4)],
                    ..Default::default()
                }),
            ],
            ..Default::default()
        };
        let mut outer = Block {
            idxs: vec![Index::new("o", 4)],
            stmts: vec![Statement::Block(trivial)],
            ..Default::default()
        };
        flatten_trivial(&mut outer);
        let once = outer.clone();
        flatten_trivial(&mut outer);
        assert_eq!(outer, once);
    }

    #[test]
    fn test_refactor_identity_roundtrip() {
        let orig = producer("i", 8, 1);
        let mapping: BTreeMap<String, String> = [("i".to_string(), "i".to_string())].into();
        let refactored = fusion_refactor(&orig, &mapping, &[1]).expect("refactor");
        // Identity mapping and trivial tile reproduce the block.
        assert_eq!(refactored, orig);
    }

    #[test]
    fn test_refactor_partitions_indices() {
        let mut orig = producer("i", 8, 4);
        orig.idxs.push(Index::new("k", 4));
        orig.refs.push(view("U", RefDir::In, Affine::var("k")));
        let mapping: BTreeMap<String, String> = [("i".to_string(), "i".to_string())].into();
        let refactored = fusion_refactor(&orig, &mapping, &[1, 1]).expect("refactor");

        // Only the mapped index survives at the outer level.
        assert_eq!(refactored.idxs, vec![Index::new("i", 8)]);
        // The unmapped index widens the outer view of its buffer.
        let u = refactored.refs.iter().find(|r| r.into == "U").expect("U");
        assert!(u.access[0].is_zero());
        assert_eq!(u.interior_shape.sizes(), vec![4]);

        // The inner block keeps a trip-1 placeholder plus the local loop.
        let inner = refactored.stmts[0].as_block().expect("inner");
        assert_eq!(inner.idxs.len(), 2);
        let placeholder = inner.idx_by_name("i").expect("placeholder");
        assert_eq!(placeholder.range, 1);
        assert_eq!(placeholder.affine, Affine::var("i"));
        assert_eq!(inner.idx_by_name("k").expect("k").range, 4);
        let u_inner = inner.refs.iter().find(|r| r.into == "U").expect("U");
        assert_eq!(u_inner.from, "U");
        assert_eq!(u_inner.access[0], Affine::var("k"));
        assert_eq!(inner.stmts.len(), orig.stmts.len());
    }

    #[test]
    fn test_refactor_sorts_outer_indices() {
        let mut orig = producer("z", 8, 1);
        orig.idxs.push(Index::new("a", 2));
        let mapping: BTreeMap<String, String> =
            [("z".to_string(), "z".to_string()), ("a".to_string(), "a".to_string())].into();
        let refactored = fusion_refactor(&orig, &mapping, &[1, 1]).expect("refactor");
        let names: Vec<&str> = refactored.idxs.iter().map(|ix| ix.name.as_str()).collect();
        assert_eq!(names, vec!["a", "z"]);
    }

    #[test]
    fn test_refactor_rejects_negative_stride() {
        let mut orig = producer("i", 8, 1);
        orig.idxs.push(Index::new("k", 4));
        orig.refs[0].access[0] = Affine::term("k", -1);
        let mapping: BTreeMap<String, String> = [("i".to_string(), "i".to_string())].into();
        let err = fusion_refactor(&orig, &mapping, &[1, 1]).unwrap_err();
        assert!(matches!(err, PassError::NegativeStride { .. }));
    }

    #[test]
    fn test_fuse_mismatched_indices_fails() {
        let parent = parent_of(vec![]);
        let scope = parent_scope(&parent);
        let mut a = producer("i", 8, 1);
        let b = consumer("j", 8, 1);
        let before = a.clone();
        assert!(!fuse_blocks(&scope, &mut a, &b).expect("fuse"));
        assert_eq!(a, before);
    }

    #[test]
    fn test_fuse_mismatched_constraints_is_noop_success() {
        let parent = parent_of(vec![]);
        let scope = parent_scope(&parent);
        let mut a = producer("i", 8, 1);
        let mut b = producer("i", 8, 1);
        b.constraints.push(Affine::var("i") + Affine::constant(-1));
        let before = a.clone();
        // Surface contract: reported as success, nothing merged.
        assert!(fuse_blocks(&scope, &mut a, &b).expect("fuse"));
        assert_eq!(a, before);
    }

    #[test]
    fn test_fuse_merges_refs_and_renames_scalars() {
        let parent = parent_of(vec![]);
        let scope = parent_scope(&parent);
        let mut a = Block {
            name: "A".to_string(),
            idxs: vec![Index::new("i", 8)],
            refs: vec![view("T", RefDir::Out, Affine::var("i"))],
            stmts: vec![
                Statement::Constant(Constant { name: "$x".to_string(), value: ConstValue::Int(1) }),
                Statement::Store(Store { from: "$x".to_string(), into: "T".to_string() }),
            ],
            ..Default::default()
        };
        let b = Block {
            name: "B".to_string(),
            idxs: vec![Index::new("i", 8)],
            refs: vec![
                view("T", RefDir::In, Affine::var("i")),
                view("Y", RefDir::Out, Affine::var("i")),
            ],
            stmts: vec![
                Statement::Constant(Constant { name: "$x".to_string(), value: ConstValue::Int(2) }),
                Statement::Load(Load { from: "T".to_string(), into: "$t".to_string() }),
                Statement::Intrinsic(Intrinsic {
                    name: "add".to_string(),
                    inputs: vec!["$t".to_string(), "$x".to_string()],
                    outputs: vec!["$y".to_string()],
                }),
                Statement::Store(Store { from: "$y".to_string(), into: "Y".to_string() }),
            ],
            ..Default::default()
        };
        assert!(fuse_blocks(&scope, &mut a, &b).expect("fuse"));

        assert_eq!(a.name, "A+B");
        let t = a.refs.iter().find(|r| r.into == "T").expect("T");
        assert_eq!(t.dir, RefDir::InOut);
        assert!(a.refs.iter().any(|r| r.into == "Y"));

        // B's colliding $x got a fresh name and its use followed.
        let Statement::Constant(c) = &a.stmts[2] else { panic!("expected constant") };
        assert_eq!(c.name, "$x_0");
        let Statement::Intrinsic(add) = &a.stmts[4] else { panic!("expected intrinsic") };
        assert_eq!(add.inputs, vec!["$t".to_string(), "$x_0".to_string()]);
        let Statement::Store(st) = &a.stmts[5] else { panic!("expected store") };
        assert_eq!(st.from, "$y");
        assert_eq!(st.into, "Y");
    }

    #[test]
    fn test_fuse_partial_alias_with_writer_fails() {
        let parent = parent_of(vec![]);
        let scope = parent_scope(&parent);
        let mut a = Block {
            name: "A".to_string(),
            idxs: vec![Index::new("i", 8)],
            refs: vec![view("W", RefDir::Out, Affine::var("i"))],
            ..Default::default()
        };
        let b = Block {
            name: "B".to_string(),
            idxs: vec![Index::new("i", 8)],
            refs: vec![view("W", RefDir::Out, Affine::var("i") + Affine::constant(1))],
            ..Default::default()
        };
        let before = a.clone();
        assert!(!fuse_blocks(&scope, &mut a, &b).expect("fuse"));
        assert_eq!(a, before);
    }

    #[test]
    fn test_fuse_disjoint_refs_kept_under_fresh_name() {
        let parent = parent_of(vec![]);
        let scope = parent_scope(&parent);
        let mut a = Block {
            name: "A".to_string(),
            idxs: vec![Index::new("i", 8)],
            refs: vec![Refinement {
                into: "V".to_string(),
                from: "T".to_string(),
                dir: RefDir::In,
                access: vec![Affine::var("i")],
                interior_shape: TensorShape::of(&[1]),
            }],
            ..Default::default()
        };
        let b = Block {
            name: "B".to_string(),
            idxs: vec![Index::new("i", 8)],
            refs: vec![Refinement {
                into: "V".to_string(),
                from: "W".to_string(),
                dir: RefDir::In,
                access: vec![Affine::var("i")],
                interior_shape: TensorShape::of(&[1]),
            }],
            ..Default::default()
        };
        assert!(fuse_blocks(&scope, &mut a, &b).expect("fuse"));
        // Different bases: B's view arrives under a non-colliding name.
        assert_eq!(a.refs.len(), 2);
        assert!(a.refs.iter().any(|r| r.into == "V" && r.from == "T"));
        assert!(a.refs.iter().any(|r| r.into == "V_0" && r.from == "W"));
    }
}
