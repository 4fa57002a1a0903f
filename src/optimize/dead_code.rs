use std::collections::HashSet;

use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, OpCode, Operand};
use crate::optimize::Pass;

/// Deletes pure instructions whose result never (transitively) feeds a
/// side-effecting instruction: a call, a return, a parameter, a branch,
/// or anything reaching one of these through the def-use relation. The
/// pass iterates to a fixed point because deleting one dead instruction
/// may orphan its operand's producer; the working set strictly shrinks,
/// so termination is immediate.
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        loop {
            let needed = needed_values(func);
            let before = func.instructions.len();

            func.instructions.retain(|instr| {
                let deletable = instr.op.is_pure()
                    && matches!(&instr.dest, Some(dest) if !needed.contains(dest));
                !deletable
            });

            if func.instructions.len() == before {
                break;
            }
        }
        Ok(())
    }
}

/// The set of values read, directly or transitively, by a side-effecting
/// instruction.
fn needed_values(func: &FunctionBody) -> HashSet<Operand> {
    let mut needed: HashSet<Operand> = HashSet::new();

    for instr in &func.instructions {
        if is_root(instr.op) {
            for operand in instr.used_values() {
                needed.insert(operand.clone());
            }
        }
    }

    // pull operand producers into the set until it stops growing
    loop {
        let before = needed.len();
        for instr in &func.instructions {
            if let Some(dest) = &instr.dest {
                if needed.contains(dest) {
                    for operand in instr.used_values() {
                        needed.insert(operand.clone());
                    }
                }
            }
        }
        if needed.len() == before {
            break;
        }
    }

    needed
}

fn is_root(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Call
            | OpCode::Return
            | OpCode::Param
            | OpCode::IfGoto
            | OpCode::Goto
            | OpCode::Label
            | OpCode::FunctionBegin
            | OpCode::FunctionEnd
    )
}
