use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand};
use crate::optimize::Pass;

/// Multiplication and division by a positive power-of-two constant become
/// shifts. The shift amount is the constant's trailing-zero count.
pub struct StrengthReduction;

impl Pass for StrengthReduction {
    fn name(&self) -> &'static str {
        "strength-reduction"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        for instr in func.instructions.iter_mut() {
            if let Some(reduced) = reduce(instr) {
                *instr = reduced;
            }
        }
        Ok(())
    }
}

fn shift_amount(operand: &Operand) -> Option<i32> {
    let value = operand.as_const()?;
    if value > 0 && value & (value - 1) == 0 {
        Some(value.trailing_zeros() as i32)
    } else {
        None
    }
}

fn reduce(instr: &IrInstr) -> Option<IrInstr> {
    let lhs = instr.operands.first()?;
    let rhs = instr.operands.get(1)?;

    let (op, value, amount) = match instr.op {
        OpCode::Mul => {
            if let Some(amount) = shift_amount(rhs) {
                (OpCode::Shl, lhs.clone(), amount)
            } else if let Some(amount) = shift_amount(lhs) {
                (OpCode::Shl, rhs.clone(), amount)
            } else {
                return None;
            }
        }
        OpCode::Div => (OpCode::Shr, lhs.clone(), shift_amount(rhs)?),
        _ => return None,
    };

    Some(IrInstr {
        op,
        dest: instr.dest.clone(),
        operands: vec![value, Operand::Const(amount)],
        source: instr.source.clone(),
    })
}
