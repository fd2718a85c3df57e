//! Human-readable rendering of the block-nest IR.

use crate::ir::block::{
    Block, ConstValue, Index, RefDir, Refinement, Statement, TensorShape,
};
use std::fmt;

impl fmt::Display for RefDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefDir::None => "none",
            RefDir::In => "in",
            RefDir::Out => "out",
            RefDir::InOut => "inout",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.affine.is_zero() {
            write!(f, "{}:{}", self.name, self.range)
        } else {
            write!(f, "{}={}", self.name, self.affine)
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: Vec<String> = self.dims.iter().map(|d| d.size.to_string()).collect();
        write!(f, "[{}]", sizes.join(", "))
    }
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access: Vec<String> = self.access.iter().map(|a| a.to_string()).collect();
        write!(f, "{} {}", self.dir, self.into)?;
        if !self.from.is_empty() && self.from != self.into {
            write!(f, " = {}", self.from)?;
        }
        write!(f, "[{}] : {}", access.join(", "), self.interior_shape)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Load(op) => write!(f, "{} = load({})", op.into, op.from),
            Statement::Store(op) => write!(f, "{} = store({})", op.into, op.from),
            Statement::Constant(op) => write!(f, "{} = {}", op.name, op.value),
            Statement::Intrinsic(op) => {
                write!(f, "{} = {}({})", op.outputs.join(", "), op.name, op.inputs.join(", "))
            }
            Statement::Special(op) => {
                write!(f, "special {}({}) -> ({})", op.name, op.inputs.join(", "), op.outputs.join(", "))
            }
            Statement::Block(block) => write!(f, "{}", block),
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    let idxs: Vec<String> = block.idxs.iter().map(|ix| ix.to_string()).collect();
    write!(f, "{}block", pad)?;
    if !block.name.is_empty() {
        write!(f, " \"{}\"", block.name)?;
    }
    if !block.tags.is_empty() {
        let tags: Vec<&str> = block.tags.iter().map(String::as_str).collect();
        write!(f, " #{}", tags.join(" #"))?;
    }
    writeln!(f, " [{}] {{", idxs.join(", "))?;
    for constraint in &block.constraints {
        writeln!(f, "{}  {} >= 0", pad, constraint)?;
    }
    for r in &block.refs {
        writeln!(f, "{}  {}", pad, r)?;
    }
    for stmt in &block.stmts {
        match stmt {
            Statement::Block(inner) => write_block(f, inner, depth + 1)?,
            other => writeln!(f, "{}  {}", pad, other)?,
        }
    }
    writeln!(f, "{}}}", pad)
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_block(f, self, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::affine::Affine;
    use crate::ir::block::{Load, Refinement, Store};

    #[test]
    fn test_block_render() {
        let block = Block {
            name: "scale".to_string(),
            idxs: vec![Index::new("i", 16)],
            refs: vec![Refinement {
                into: "A".to_string(),
                from: "A".to_string(),
                dir: RefDir::In,
                access: vec![Affine::var("i")],
                interior_shape: TensorShape::of(&[1]),
            }],
            stmts: vec![
                Statement::Load(Load { from: "A".to_string(), into: "$a".to_string() }),
                Statement::Store(Store { from: "$a".to_string(), into: "A".to_string() }),
            ],
            ..Default::default()
        };
        let text = block.to_string();
        assert!(text.contains("block \"scale\" [i:16]"));
        assert!(text.contains("in A[i] : [1]"));
        assert!(text.contains("$a = load(A)"));
    }

    #[test]
    fn test_passthru_index_render() {
        let ix = Index::passthru("i", Affine::var("i_outer"));
        assert_eq!(ix.to_string(), "i=i_outer");
    }
}
