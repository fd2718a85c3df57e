//! Pass pipeline for block trees.
//!
//! A thin runner that applies the fusion pass and a recursive trivial-loop
//! cleanup in sequence, reporting how the block count changed.

use crate::ir::block::{Block, Statement};
use crate::transform::fuse::{flatten_trivial, fusion_pass, FusionOptions};
use crate::utils::errors::PassResult;
use tracing::info;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tag gates for the fusion pass; `None` skips fusion.
    pub fusion: Option<FusionOptions>,
    /// Run the recursive trivial-loop cleanup after fusion.
    pub flatten: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { fusion: Some(FusionOptions::default()), flatten: true }
    }
}

impl PipelineConfig {
    /// Fusion with the given gates, no cleanup.
    pub fn fusion_only(options: FusionOptions) -> Self {
        Self { fusion: Some(options), flatten: false }
    }

    /// Cleanup only.
    pub fn cleanup_only() -> Self {
        Self { fusion: None, flatten: true }
    }
}

/// Outcome summary of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Blocks in the tree before the run.
    pub blocks_before: usize,
    /// Blocks in the tree after the run.
    pub blocks_after: usize,
}

impl PassReport {
    /// Net number of blocks removed.
    pub fn blocks_eliminated(&self) -> usize {
        self.blocks_before.saturating_sub(self.blocks_after)
    }
}

/// A configured sequence of passes.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Build a pipeline from its configuration.
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the configured passes over `root`, mutating it in place.
    pub fn run(&self, root: &mut Block) -> PassResult<PassReport> {
        let blocks_before = count_blocks(root);
        if let Some(options) = &self.config.fusion {
            fusion_pass(root, options)?;
        }
        if self.config.flatten {
            flatten_recursive(root);
        }
        let report = PassReport { blocks_before, blocks_after: count_blocks(root) };
        info!(
            before = report.blocks_before,
            after = report.blocks_after,
            "pipeline finished"
        );
        Ok(report)
    }
}

/// Count all blocks in a tree, `root` included.
pub fn count_blocks(block: &Block) -> usize {
    1 + block
        .stmts
        .iter()
        .filter_map(Statement::as_block)
        .map(count_blocks)
        .sum::<usize>()
}

/// Apply the trivial-loop flattener bottom-up over a whole tree.
pub fn flatten_recursive(block: &mut Block) {
    for stmt in &mut block.stmts {
        if let Statement::Block(inner) = stmt {
            flatten_recursive(inner);
        }
    }
    flatten_trivial(block);
}
