//! NestOpt - A Block-Nest Tensor IR Optimizer
//!
//! Command-line interface over JSON-serialized block trees.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nestopt::ir::Block;
use nestopt::transform::{flatten_recursive, fusion_pass, FusionOptions};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nestopt")]
#[command(version)]
#[command(about = "Block-nest tensor IR optimizer")]
#[command(long_about = r#"
NestOpt rewrites nested-block tensor IR for data locality. It performs:

  - Greedy fusion of adjacent blocks communicating through shared buffers
  - Stride-aligning tiling derived per fused pair
  - Trivial-loop flattening

Example usage:
  nestopt print kernel.json
  nestopt fuse kernel.json -o fused.json --fused-tag fused
  nestopt flatten kernel.json --text
"#)]
struct Cli {
    /// Increase diagnostic verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pretty-print a block tree
    Print {
        /// Input IR file (JSON)
        input: PathBuf,
    },

    /// Run the fusion pass
    Fuse {
        /// Input IR file (JSON)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tag the parent block must carry (repeatable)
        #[arg(long = "parent-req")]
        parent_reqs: Vec<String>,

        /// Tag the first fused block must carry (repeatable)
        #[arg(long = "a-req")]
        a_reqs: Vec<String>,

        /// Tag the second fused block must carry (repeatable)
        #[arg(long = "b-req")]
        b_reqs: Vec<String>,

        /// Tag applied to each fused result (repeatable)
        #[arg(long = "fused-tag")]
        fused_tags: Vec<String>,

        /// Emit the IR as text instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Flatten trivial loops over the whole tree
    Flatten {
        /// Input IR file (JSON)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit the IR as text instead of JSON
        #[arg(long)]
        text: bool,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_block(path: &Path) -> Result<Block> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn emit(block: &Block, output: Option<&Path>, text: bool) -> Result<()> {
    let rendered = if text {
        block.to_string()
    } else {
        serde_json::to_string_pretty(block).context("failed to serialize IR")?
    };
    match output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", rendered),
    }
    Ok(())
}

fn tag_set(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter().collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Print { input } => {
            let block = load_block(&input)?;
            print!("{}", block);
        }
        Commands::Fuse { input, output, parent_reqs, a_reqs, b_reqs, fused_tags, text } => {
            let mut block = load_block(&input)?;
            let options = FusionOptions {
                parent_reqs: tag_set(parent_reqs),
                a_reqs: tag_set(a_reqs),
                b_reqs: tag_set(b_reqs),
                fused_set: tag_set(fused_tags),
            };
            fusion_pass(&mut block, &options).context("fusion pass failed")?;
            emit(&block, output.as_deref(), text)?;
        }
        Commands::Flatten { input, output, text } => {
            let mut block = load_block(&input)?;
            flatten_recursive(&mut block);
            emit(&block, output.as_deref(), text)?;
        }
    }
    Ok(())
}
