use std::collections::{HashMap, HashSet};

use crate::cfg::Cfg;
use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, OpCode};
use crate::optimize::Pass;

/// Control-flow cleanup: jumps whose target block is nothing but another
/// jump are retargeted past it, and blocks unreachable from the entry are
/// marked removable and dropped. Retargeting goes through the CFG's
/// update helper so the jump text and the edges can never disagree.
pub struct ControlFlowOptimization;

impl Pass for ControlFlowOptimization {
    fn name(&self) -> &'static str {
        "control-flow-optimization"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        let mut cfg = Cfg::build(func)?;
        collapse_jump_chains(&mut cfg)?;
        prune_unreachable(&mut cfg);
        cfg.validate()?;
        *func = cfg.into_function();
        Ok(())
    }
}

/// A block consisting of exactly a LABEL and a GOTO forwards its label to
/// the goto's target. Chains resolve to their final destination; a cycle
/// of such blocks resolves back to itself and is skipped.
fn collapse_jump_chains(cfg: &mut Cfg) -> Result<(), CompileError> {
    let mut forwards: HashMap<String, String> = HashMap::new();
    for block in &cfg.blocks {
        if block.instructions.len() != 2 {
            continue;
        }
        let goto = &block.instructions[1];
        if goto.op != OpCode::Goto {
            continue;
        }
        if let (Some(label), Some(target)) = (&block.label, goto.label_name()) {
            if label != target {
                forwards.insert(label.clone(), target.to_string());
            }
        }
    }

    let labels: Vec<String> = cfg
        .blocks
        .iter()
        .filter_map(|block| block.label.clone())
        .filter(|label| forwards.contains_key(label))
        .collect();

    for label in labels {
        let mut visited = HashSet::new();
        visited.insert(label.clone());
        let mut target = forwards[&label].clone();
        while let Some(next) = forwards.get(&target) {
            if !visited.insert(target.clone()) {
                break;
            }
            target = next.clone();
        }
        if target != label {
            cfg.update_jump_targets(&label, &target)?;
        }
    }
    Ok(())
}

fn prune_unreachable(cfg: &mut Cfg) {
    let reachable = cfg.reachable();
    for block in &mut cfg.blocks {
        if !reachable[block.id] && !block.is_exit() {
            block.removable = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::definition::IrInstr;
    use crate::optimize::testing::*;

    fn run(body: Vec<IrInstr>) -> FunctionBody {
        let mut func = function("f", body);
        ControlFlowOptimization.run(&mut func).unwrap();
        func
    }

    #[test]
    fn jump_to_jump_is_collapsed_and_the_trampoline_pruned() {
        let func = run(vec![
            goto("La"),
            label("La"),
            goto("Lb"),
            label("Lb"),
            ret(konst(0)),
        ]);
        let first_goto = func
            .instructions
            .iter()
            .find(|i| i.op == OpCode::Goto)
            .unwrap();
        assert_eq!(first_goto.label_name(), Some("Lb"));
        assert!(func
            .instructions
            .iter()
            .all(|i| i.label_name() != Some("La")));
    }

    #[test]
    fn chains_collapse_to_the_final_target() {
        let func = run(vec![
            goto("La"),
            label("La"),
            goto("Lb"),
            label("Lb"),
            goto("Lc"),
            label("Lc"),
            ret(konst(0)),
        ]);
        let first_goto = func
            .instructions
            .iter()
            .find(|i| i.op == OpCode::Goto)
            .unwrap();
        assert_eq!(first_goto.label_name(), Some("Lc"));
        let labels: Vec<_> = func
            .instructions
            .iter()
            .filter(|i| i.op == OpCode::Label)
            .collect();
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn conditional_branches_are_retargeted_too() {
        let func = run(vec![
            if_goto(var("c.s0"), "La"),
            ret(konst(0)),
            label("La"),
            goto("Lb"),
            label("Lb"),
            ret(konst(1)),
        ]);
        let branch = func
            .instructions
            .iter()
            .find(|i| i.op == OpCode::IfGoto)
            .unwrap();
        assert_eq!(branch.label_name(), Some("Lb"));
    }

    #[test]
    fn code_after_a_return_is_pruned() {
        let func = run(vec![ret(konst(0)), label("Ldead"), ret(konst(1))]);
        assert!(func
            .instructions
            .iter()
            .all(|i| i.label_name() != Some("Ldead")));
        // framing survives pruning
        assert!(func
            .instructions
            .iter()
            .any(|i| i.op == OpCode::FunctionEnd));
    }

    #[test]
    fn a_self_looping_jump_is_left_alone() {
        let body = vec![label("Lspin"), goto("Lspin")];
        let func = run(body.clone());
        assert!(func
            .instructions
            .iter()
            .any(|i| i.op == OpCode::Label && i.label_name() == Some("Lspin")));
    }
}
