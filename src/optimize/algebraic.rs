use std::collections::HashMap;

use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand};
use crate::optimize::Pass;

/// Identity rewrites: `x+0`, `x-0`, `x*1`, `x/1` collapse to `x`; `x*0`
/// and `x%1` to `0`; `x-x` to `0`; negating a negation restores the
/// original value. Double logical NOT is deliberately not collapsed:
/// `!!x` normalizes any nonzero x to 1, which plain `x` does not.
pub struct AlgebraicSimplification;

impl Pass for AlgebraicSimplification {
    fn name(&self) -> &'static str {
        "algebraic-simplification"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        // dest -> operand it is the negation of, valid within one block
        let mut neg_of: HashMap<Operand, Operand> = HashMap::new();

        for instr in func.instructions.iter_mut() {
            if instr.op == OpCode::Label || instr.op == OpCode::Call || instr.op.is_control_transfer()
            {
                neg_of.clear();
                continue;
            }

            let replacement = match instr.op {
                OpCode::Neg => instr
                    .operands
                    .first()
                    .and_then(|src| neg_of.get(src))
                    .cloned(),
                _ => simplify(instr),
            };

            if let Some(dest) = instr.dest.clone() {
                neg_of.retain(|key, value| *key != dest && *value != dest);
            }

            match replacement {
                Some(source) => {
                    *instr = IrInstr {
                        op: OpCode::Assign,
                        dest: instr.dest.clone(),
                        operands: vec![source],
                        source: instr.source.take(),
                    };
                }
                None => {
                    if instr.op == OpCode::Neg {
                        if let (Some(dest), Some(src)) =
                            (instr.dest.clone(), instr.operands.first())
                        {
                            neg_of.insert(dest, src.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn simplify(instr: &IrInstr) -> Option<Operand> {
    if !instr.op.is_binary() {
        return None;
    }
    let lhs = instr.operands.first()?;
    let rhs = instr.operands.get(1)?;

    match instr.op {
        OpCode::Add => match (lhs.as_const(), rhs.as_const()) {
            (Some(0), _) => Some(rhs.clone()),
            (_, Some(0)) => Some(lhs.clone()),
            _ => None,
        },
        OpCode::Sub => {
            if rhs.as_const() == Some(0) {
                Some(lhs.clone())
            } else if lhs.is_value() && lhs == rhs {
                Some(Operand::Const(0))
            } else {
                None
            }
        }
        OpCode::Mul => match (lhs.as_const(), rhs.as_const()) {
            (Some(0), _) | (_, Some(0)) => Some(Operand::Const(0)),
            (Some(1), _) => Some(rhs.clone()),
            (_, Some(1)) => Some(lhs.clone()),
            _ => None,
        },
        OpCode::Div => {
            if rhs.as_const() == Some(1) {
                Some(lhs.clone())
            } else {
                None
            }
        }
        OpCode::Mod => {
            if rhs.as_const() == Some(1) {
                Some(Operand::Const(0))
            } else {
                None
            }
        }
        _ => None,
    }
}
