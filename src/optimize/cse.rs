use std::collections::HashMap;

use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand};
use crate::optimize::Pass;

type ExprKey = (OpCode, Vec<Operand>);

/// Local value numbering. Within one basic block, a pure computation
/// whose opcode and operands match an earlier one is replaced by an
/// ASSIGN from the earlier destination. The table resets at every block
/// boundary and on a CALL; redefining any operand evicts the expressions
/// that read it.
pub struct CommonSubexpressionElimination;

impl Pass for CommonSubexpressionElimination {
    fn name(&self) -> &'static str {
        "common-subexpression-elimination"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        let mut available: HashMap<ExprKey, Operand> = HashMap::new();

        for instr in func.instructions.iter_mut() {
            if instr.op == OpCode::Label || instr.op.is_control_transfer() {
                available.clear();
                continue;
            }
            if instr.op == OpCode::Call {
                available.clear();
                continue;
            }

            let candidate = instr.op.is_pure() && instr.op != OpCode::Assign;
            if candidate {
                let key = (instr.op, instr.operands.clone());
                if let (Some(dest), Some(prior)) = (instr.dest.clone(), available.get(&key)) {
                    let prior = prior.clone();
                    *instr = IrInstr {
                        op: OpCode::Assign,
                        dest: Some(dest.clone()),
                        operands: vec![prior],
                        source: instr.source.take(),
                    };
                    evict(&mut available, &dest);
                    continue;
                }
            }

            if let Some(dest) = instr.dest.clone() {
                evict(&mut available, &dest);
                if candidate {
                    available.insert((instr.op, instr.operands.clone()), dest);
                }
            }
        }
        Ok(())
    }
}

/// Drops every table entry computed from `dest` or stored in it.
fn evict(available: &mut HashMap<ExprKey, Operand>, dest: &Operand) {
    available.retain(|(_, operands), value| !operands.contains(dest) && value != dest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::testing::*;

    fn run(body: Vec<IrInstr>) -> FunctionBody {
        let mut func = function("f", body);
        CommonSubexpressionElimination.run(&mut func).unwrap();
        func
    }

    #[test]
    fn repeated_expression_becomes_an_assign() {
        let func = run(vec![
            instr(OpCode::Add, Some(temp(0)), vec![var("x.s0"), var("y.s1")]),
            instr(OpCode::Add, Some(temp(1)), vec![var("x.s0"), var("y.s1")]),
            ret(temp(1)),
        ]);
        assert_eq!(func.instructions[2].op, OpCode::Assign);
        assert_eq!(func.instructions[2].operands, vec![temp(0)]);
    }

    #[test]
    fn redefining_an_operand_evicts_the_expression() {
        let func = run(vec![
            instr(OpCode::Add, Some(temp(0)), vec![var("x.s0"), var("y.s1")]),
            instr(OpCode::Assign, Some(var("x.s0")), vec![konst(5)]),
            instr(OpCode::Add, Some(temp(1)), vec![var("x.s0"), var("y.s1")]),
            ret(temp(1)),
        ]);
        assert_eq!(func.instructions[3].op, OpCode::Add);
    }

    #[test]
    fn the_table_does_not_cross_block_boundaries() {
        let func = run(vec![
            instr(OpCode::Add, Some(temp(0)), vec![var("x.s0"), var("y.s1")]),
            label("L0"),
            instr(OpCode::Add, Some(temp(1)), vec![var("x.s0"), var("y.s1")]),
            ret(temp(1)),
        ]);
        assert_eq!(func.instructions[3].op, OpCode::Add);
    }

    #[test]
    fn a_call_clears_the_table() {
        let func = run(vec![
            instr(OpCode::Add, Some(temp(0)), vec![var("x.s0"), var("y.s1")]),
            instr(
                OpCode::Call,
                Some(temp(1)),
                vec![Operand::Label("g".to_string()), konst(0)],
            ),
            instr(OpCode::Add, Some(temp(2)), vec![var("x.s0"), var("y.s1")]),
            ret(temp(2)),
        ]);
        assert_eq!(func.instructions[3].op, OpCode::Add);
    }

    #[test]
    fn operand_order_matters_for_non_commutative_ops() {
        let func = run(vec![
            instr(OpCode::Sub, Some(temp(0)), vec![var("x.s0"), var("y.s1")]),
            instr(OpCode::Sub, Some(temp(1)), vec![var("y.s1"), var("x.s0")]),
            ret(temp(1)),
        ]);
        assert_eq!(func.instructions[2].op, OpCode::Sub);
    }
}
