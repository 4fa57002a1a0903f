//! The IR optimization pipeline.
//!
//! A fixed, ordered sequence of passes, each independently idempotent and
//! safely skippable: disabling any subset still yields a correct, merely
//! less optimized, program. The whole sequence re-runs until the function
//! stops changing (with an iteration cap), since one pass routinely
//! uncovers work for an earlier one — propagation turns operands into
//! constants that folding then collapses.

use crate::config::PassConfig;
use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, Program};

mod algebraic;
mod constant_folding;
mod constant_propagation;
mod control_flow;
mod copy_propagation;
mod cse;
mod dead_code;
mod licm;
mod strength_reduction;

pub use algebraic::AlgebraicSimplification;
pub use constant_folding::ConstantFolding;
pub use constant_propagation::ConstantPropagation;
pub use control_flow::ControlFlowOptimization;
pub use copy_propagation::CopyPropagation;
pub use cse::CommonSubexpressionElimination;
pub use dead_code::DeadCodeElimination;
pub use licm::LoopInvariantCodeMotion;
pub use strength_reduction::StrengthReduction;

/// One optimization pass over a single function. Passes never signal
/// "cannot optimize" as an error; the only error a pass may raise is
/// folding's designated divide-by-constant-zero.
pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError>;
}

fn build_pipeline(config: &PassConfig) -> Vec<Box<dyn Pass>> {
    let mut passes: Vec<Box<dyn Pass>> = Vec::new();
    if config.constant_folding {
        passes.push(Box::new(ConstantFolding));
    }
    if config.constant_propagation {
        passes.push(Box::new(ConstantPropagation));
    }
    if config.dead_code_elimination {
        passes.push(Box::new(DeadCodeElimination));
    }
    if config.copy_propagation {
        passes.push(Box::new(CopyPropagation));
    }
    if config.control_flow {
        passes.push(Box::new(ControlFlowOptimization));
    }
    if config.common_subexpression_elimination {
        passes.push(Box::new(CommonSubexpressionElimination));
    }
    if config.algebraic_simplification {
        passes.push(Box::new(AlgebraicSimplification));
    }
    if config.loop_invariant_code_motion {
        passes.push(Box::new(LoopInvariantCodeMotion));
    }
    if config.strength_reduction {
        passes.push(Box::new(StrengthReduction));
    }
    passes
}

const MAX_PIPELINE_ROUNDS: usize = 16;

pub fn optimize(program: Program, config: &PassConfig) -> Result<Program, CompileError> {
    let passes = build_pipeline(config);
    let mut optimized = Vec::new();

    for mut func in program.functions()? {
        for _ in 0..MAX_PIPELINE_ROUNDS {
            let before = func.clone();
            for pass in &passes {
                pass.run(&mut func)?;
            }
            if func == before {
                break;
            }
        }
        optimized.push(func);
    }

    Ok(Program::from_functions(optimized))
}
