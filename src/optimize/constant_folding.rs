use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand};
use crate::optimize::Pass;

/// Replaces instructions whose operands are all constants with a single
/// ASSIGN of the computed value. Division or modulo by a literal zero is
/// never folded into a value; it becomes the designated structural error
/// so a guaranteed runtime fault is not hidden behind a compile-time
/// constant. Arithmetic wraps at 32 bits.
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        let mut out = Vec::with_capacity(func.instructions.len());

        for instr in &func.instructions {
            if matches!(instr.op, OpCode::Div | OpCode::Mod)
                && instr.operands.get(1) == Some(&Operand::Const(0))
            {
                return Err(CompileError::DivisionByZero {
                    function: func.name.clone(),
                });
            }

            let folded = match (instr.op.is_binary(), instr.op.is_unary()) {
                (true, _) => fold_binary(instr),
                (_, true) => fold_unary(instr),
                _ => None,
            };

            match folded {
                Some(value) => out.push(IrInstr {
                    op: OpCode::Assign,
                    dest: instr.dest.clone(),
                    operands: vec![Operand::Const(value)],
                    source: instr.source.clone(),
                }),
                None => out.push(instr.clone()),
            }
        }

        func.instructions = out;
        Ok(())
    }
}

fn fold_binary(instr: &IrInstr) -> Option<i32> {
    let lhs = instr.operands.first()?.as_const()?;
    let rhs = instr.operands.get(1)?.as_const()?;

    let value = match instr.op {
        OpCode::Add => lhs.wrapping_add(rhs),
        OpCode::Sub => lhs.wrapping_sub(rhs),
        OpCode::Mul => lhs.wrapping_mul(rhs),
        OpCode::Div => lhs.wrapping_div(rhs),
        OpCode::Mod => lhs.wrapping_rem(rhs),
        OpCode::And => ((lhs != 0) && (rhs != 0)) as i32,
        OpCode::Or => ((lhs != 0) || (rhs != 0)) as i32,
        OpCode::Lt => (lhs < rhs) as i32,
        OpCode::Gt => (lhs > rhs) as i32,
        OpCode::Le => (lhs <= rhs) as i32,
        OpCode::Ge => (lhs >= rhs) as i32,
        OpCode::Eq => (lhs == rhs) as i32,
        OpCode::Ne => (lhs != rhs) as i32,
        OpCode::Shl => lhs.wrapping_shl(rhs as u32),
        OpCode::Shr => lhs.wrapping_shr(rhs as u32),
        _ => return None,
    };
    Some(value)
}

fn fold_unary(instr: &IrInstr) -> Option<i32> {
    let operand = instr.operands.first()?.as_const()?;
    match instr.op {
        OpCode::Neg => Some(operand.wrapping_neg()),
        OpCode::Not => Some((operand == 0) as i32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::testing::*;

    fn run(body: Vec<IrInstr>) -> Result<FunctionBody, CompileError> {
        let mut func = function("f", body);
        ConstantFolding.run(&mut func)?;
        Ok(func)
    }

    #[test]
    fn folds_binary_arithmetic() {
        let func = run(vec![
            instr(OpCode::Mul, Some(temp(0)), vec![konst(3), konst(4)]),
            ret(temp(0)),
        ])
        .unwrap();
        assert_eq!(func.instructions[1].op, OpCode::Assign);
        assert_eq!(func.instructions[1].operands[0], konst(12));
    }

    #[test]
    fn folds_comparisons_to_boolean_constants() {
        let func = run(vec![
            instr(OpCode::Le, Some(temp(0)), vec![konst(2), konst(2)]),
            instr(OpCode::Gt, Some(temp(1)), vec![konst(1), konst(5)]),
            ret(temp(0)),
        ])
        .unwrap();
        assert_eq!(func.instructions[1].operands[0], konst(1));
        assert_eq!(func.instructions[2].operands[0], konst(0));
    }

    #[test]
    fn folds_unary_not_and_neg() {
        let func = run(vec![
            instr(OpCode::Not, Some(temp(0)), vec![konst(1)]),
            instr(OpCode::Neg, Some(temp(1)), vec![konst(7)]),
            ret(temp(1)),
        ])
        .unwrap();
        assert_eq!(func.instructions[1].operands[0], konst(0));
        assert_eq!(func.instructions[2].operands[0], konst(-7));
    }

    #[test]
    fn leaves_non_constant_operands_alone() {
        let body = vec![
            instr(OpCode::Add, Some(temp(0)), vec![var("x.s0"), konst(1)]),
            ret(temp(0)),
        ];
        let func = run(body.clone()).unwrap();
        assert_eq!(func.instructions[1], body[0]);
    }

    #[test]
    fn division_by_constant_zero_is_an_error() {
        let result = run(vec![
            instr(OpCode::Div, Some(temp(0)), vec![var("x.s0"), konst(0)]),
            ret(temp(0)),
        ]);
        assert_eq!(
            result,
            Err(CompileError::DivisionByZero {
                function: "f".to_string()
            })
        );
    }

    #[test]
    fn modulo_by_constant_zero_is_an_error() {
        let result = run(vec![
            instr(OpCode::Mod, Some(temp(0)), vec![konst(5), konst(0)]),
            ret(temp(0)),
        ]);
        assert!(matches!(result, Err(CompileError::DivisionByZero { .. })));
    }

    #[test]
    fn folding_is_idempotent() {
        let mut func = function(
            "f",
            vec![
                instr(OpCode::Add, Some(temp(0)), vec![konst(1), konst(2)]),
                ret(temp(0)),
            ],
        );
        ConstantFolding.run(&mut func).unwrap();
        let once = func.clone();
        ConstantFolding.run(&mut func).unwrap();
        assert_eq!(func, once);
    }
}
