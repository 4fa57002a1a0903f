//! Basic blocks and the per-function control-flow graph.
//!
//! Blocks live in a flat arena indexed by dense ids; successor and
//! predecessor sets are sets of ids, so the graph has no ownership
//! cycles. Passes rebuild the CFG from the flattened instruction list,
//! so ids are only meaningful within one build.

use std::collections::HashMap;

use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand};

pub type BlockId = usize;

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// The label opening this block, when it starts with a LABEL.
    pub label: Option<String>,
    pub function: String,
    pub instructions: Vec<IrInstr>,
    /// For a block ending in IF_GOTO the jump target ("true" branch) is
    /// listed first and the fall-through ("false" branch) second.
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    /// Set by the control-flow pass right before pruning; `validate`
    /// tolerates unreachable blocks only when this is set.
    pub removable: bool,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&IrInstr> {
        self.instructions
            .last()
            .filter(|instr| instr.op.is_control_transfer())
    }

    /// The framing block holding FUNCTION_END. It has no predecessors
    /// whenever every path returns, so reachability checks exempt it and
    /// pruning must never drop it.
    pub fn is_exit(&self) -> bool {
        self.instructions
            .iter()
            .any(|instr| instr.op == OpCode::FunctionEnd)
    }
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub function: String,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
}

impl Cfg {
    /// Partitions a function's instructions into blocks and wires the
    /// edges. A new block starts at the first instruction, at any LABEL,
    /// and immediately after any jump or RETURN.
    pub fn build(func: &FunctionBody) -> Result<Cfg, CompileError> {
        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut current: Vec<IrInstr> = Vec::new();

        let finish =
            |blocks: &mut Vec<BasicBlock>, instructions: Vec<IrInstr>| {
                if instructions.is_empty() {
                    return;
                }
                let label = match &instructions[0] {
                    instr if instr.op == OpCode::Label => {
                        instr.label_name().map(str::to_string)
                    }
                    _ => None,
                };
                blocks.push(BasicBlock {
                    id: blocks.len(),
                    label,
                    function: func.name.clone(),
                    instructions,
                    successors: Vec::new(),
                    predecessors: Vec::new(),
                    removable: false,
                });
            };

        for instr in &func.instructions {
            match instr.op {
                OpCode::Label => {
                    finish(&mut blocks, std::mem::take(&mut current));
                    current.push(instr.clone());
                }
                op if op.is_control_transfer() => {
                    current.push(instr.clone());
                    finish(&mut blocks, std::mem::take(&mut current));
                }
                _ => current.push(instr.clone()),
            }
        }
        finish(&mut blocks, current);

        if blocks.is_empty() {
            return Err(CompileError::MalformedIr {
                detail: format!("function '{}' has no instructions", func.name),
            });
        }

        let mut cfg = Cfg {
            function: func.name.clone(),
            blocks,
            entry: 0,
        };
        cfg.add_edges()?;
        Ok(cfg)
    }

    fn label_map(&self) -> HashMap<String, BlockId> {
        let mut map = HashMap::new();
        for block in &self.blocks {
            if let Some(label) = &block.label {
                map.insert(label.clone(), block.id);
            }
        }
        map
    }

    fn add_edges(&mut self) -> Result<(), CompileError> {
        let labels = self.label_map();
        let last = self.blocks.len() - 1;

        let mut edges: Vec<(BlockId, BlockId)> = Vec::new();
        for block in &self.blocks {
            let resolve = |label: &str| -> Result<BlockId, CompileError> {
                labels
                    .get(label)
                    .copied()
                    .ok_or_else(|| CompileError::CfgInvariant {
                        function: self.function.clone(),
                        block: block.id,
                        detail: format!("jump to unknown label '{}'", label),
                    })
            };

            match block.terminator() {
                Some(instr) if instr.op == OpCode::Goto => {
                    let target = resolve(instr.label_name().unwrap_or(""))?;
                    edges.push((block.id, target));
                }
                Some(instr) if instr.op == OpCode::IfGoto => {
                    // true branch first, fall-through second; downstream
                    // passes rely on this order
                    let target = resolve(instr.label_name().unwrap_or(""))?;
                    edges.push((block.id, target));
                    if block.id == last {
                        return Err(CompileError::CfgInvariant {
                            function: self.function.clone(),
                            block: block.id,
                            detail: "conditional branch with no fall-through".to_string(),
                        });
                    }
                    edges.push((block.id, block.id + 1));
                }
                Some(_) => {
                    // RETURN / FUNCTION_END: no successors
                }
                None => {
                    if block.id != last {
                        edges.push((block.id, block.id + 1));
                    }
                }
            }
        }

        for (from, to) in edges {
            self.blocks[from].successors.push(to);
            self.blocks[to].predecessors.push(from);
        }
        Ok(())
    }

    pub fn block_of_label(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|block| block.label.as_deref() == Some(label))
            .map(|block| block.id)
    }

    /// Blocks reachable from the entry, in arena order.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        seen[self.entry] = true;
        while let Some(id) = stack.pop() {
            for &succ in &self.blocks[id].successors {
                if !seen[succ] {
                    seen[succ] = true;
                    stack.push(succ);
                }
            }
        }
        seen
    }

    /// Rewrites every jump whose target is `from_label` to point at
    /// `to_label`, updating the instruction operand and the graph edge
    /// together. A mismatch between jump text and edges is an invariant
    /// violation, so neither is ever changed without the other.
    pub fn update_jump_targets(
        &mut self,
        from_label: &str,
        to_label: &str,
    ) -> Result<(), CompileError> {
        let to_block =
            self.block_of_label(to_label)
                .ok_or_else(|| CompileError::CfgInvariant {
                    function: self.function.clone(),
                    block: 0,
                    detail: format!("retarget to unknown label '{}'", to_label),
                })?;
        let from_block =
            self.block_of_label(from_label)
                .ok_or_else(|| CompileError::CfgInvariant {
                    function: self.function.clone(),
                    block: 0,
                    detail: format!("retarget from unknown label '{}'", from_label),
                })?;

        let mut retargeted = Vec::new();
        for block in &mut self.blocks {
            let id = block.id;
            if let Some(instr) = block.instructions.last_mut() {
                let hits = matches!(instr.op, OpCode::Goto | OpCode::IfGoto)
                    && instr.label_name() == Some(from_label);
                if hits {
                    let slot = match instr.op {
                        OpCode::Goto => 0,
                        _ => 1,
                    };
                    instr.operands[slot] = Operand::Label(to_label.to_string());
                    retargeted.push(id);
                }
            }
        }

        for id in retargeted {
            // the jump-target edge is always listed first; an IF_GOTO
            // fall-through that happens to be the same block stays put
            if let Some(first) = self.blocks[id]
                .successors
                .iter()
                .position(|&succ| succ == from_block)
            {
                self.blocks[id].successors[first] = to_block;
            }
            let still_pred = self.blocks[id].successors.contains(&from_block);
            if !still_pred {
                self.blocks[from_block].predecessors.retain(|&pred| pred != id);
            }
            if !self.blocks[to_block].predecessors.contains(&id) {
                self.blocks[to_block].predecessors.push(id);
            }
        }
        Ok(())
    }

    /// Checks successor counts against each block's terminator. This
    /// holds for any graph `build` produces and every rewrite must
    /// preserve it; unreachable blocks are fine here, since the lowering
    /// of a branch whose arms both return leaves its join jump dangling
    /// until the control-flow pass prunes it.
    pub fn check_structure(&self) -> Result<(), CompileError> {
        for block in &self.blocks {
            let expected = match block.terminator() {
                Some(instr) if instr.op == OpCode::IfGoto => 2,
                Some(instr) if instr.op == OpCode::Goto => 1,
                Some(_) => 0,
                None => usize::from(block.id + 1 != self.blocks.len()),
            };
            if block.successors.len() != expected {
                return Err(CompileError::CfgInvariant {
                    function: self.function.clone(),
                    block: block.id,
                    detail: format!(
                        "expected {} successors, found {}",
                        expected,
                        block.successors.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// `check_structure` plus reachability: rejects a block unreachable
    /// from the entry unless it was explicitly marked removable. Only
    /// the control-flow pass, which prunes such blocks, holds the graph
    /// to this stricter standard.
    pub fn validate(&self) -> Result<(), CompileError> {
        self.check_structure()?;

        let reachable = self.reachable();
        for block in &self.blocks {
            if !reachable[block.id] && !block.removable && !block.is_exit() {
                return Err(CompileError::CfgInvariant {
                    function: self.function.clone(),
                    block: block.id,
                    detail: "unreachable block not marked removable".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Flattens the graph back into an instruction list in arena order,
    /// dropping blocks marked removable together with their stale edges.
    pub fn into_function(self) -> FunctionBody {
        let mut instructions = Vec::new();
        for block in self.blocks {
            if !block.removable {
                instructions.extend(block.instructions);
            }
        }
        FunctionBody {
            name: self.function,
            instructions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: OpCode, dest: Option<Operand>, operands: Vec<Operand>) -> IrInstr {
        IrInstr::new(op, dest, operands)
    }

    fn label(name: &str) -> IrInstr {
        instr(OpCode::Label, None, vec![Operand::Label(name.to_string())])
    }

    fn goto(name: &str) -> IrInstr {
        instr(OpCode::Goto, None, vec![Operand::Label(name.to_string())])
    }

    fn if_goto(cond: Operand, name: &str) -> IrInstr {
        instr(
            OpCode::IfGoto,
            None,
            vec![cond, Operand::Label(name.to_string())],
        )
    }

    fn framed(name: &str, mut body: Vec<IrInstr>) -> FunctionBody {
        let mut instructions = vec![instr(
            OpCode::FunctionBegin,
            None,
            vec![Operand::Label(name.to_string())],
        )];
        instructions.append(&mut body);
        instructions.push(instr(
            OpCode::FunctionEnd,
            None,
            vec![Operand::Label(name.to_string())],
        ));
        FunctionBody {
            name: name.to_string(),
            instructions,
        }
    }

    // FUNCTION_BEGIN f / t0 <- 1 < 2 / IF_GOTO t0, Lthen / RETURN 0 /
    // Lthen: RETURN 1 / FUNCTION_END
    fn branching_function() -> FunctionBody {
        framed(
            "f",
            vec![
                instr(
                    OpCode::Lt,
                    Some(Operand::Temp(0)),
                    vec![Operand::Const(1), Operand::Const(2)],
                ),
                if_goto(Operand::Temp(0), "Lthen"),
                instr(OpCode::Return, None, vec![Operand::Const(0)]),
                label("Lthen"),
                instr(OpCode::Return, None, vec![Operand::Const(1)]),
            ],
        )
    }

    #[test]
    fn partitions_at_labels_and_after_jumps() {
        let cfg = Cfg::build(&branching_function()).unwrap();
        // entry (begin + lt + if_goto), return 0, Lthen, function_end
        assert_eq!(cfg.blocks.len(), 4);
        assert_eq!(cfg.blocks[0].instructions.len(), 3);
        assert_eq!(cfg.blocks[2].label.as_deref(), Some("Lthen"));
    }

    #[test]
    fn if_goto_lists_true_branch_first() {
        let cfg = Cfg::build(&branching_function()).unwrap();
        let then_block = cfg.block_of_label("Lthen").unwrap();
        assert_eq!(cfg.blocks[0].successors, vec![then_block, 1]);
    }

    #[test]
    fn return_blocks_have_no_successors() {
        let cfg = Cfg::build(&branching_function()).unwrap();
        assert!(cfg.blocks[1].successors.is_empty());
        let then_block = cfg.block_of_label("Lthen").unwrap();
        assert!(cfg.blocks[then_block].successors.is_empty());
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        let cfg = Cfg::build(&branching_function()).unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unmarked_unreachable_block() {
        // Ldead is only reachable through no edge at all
        let func = framed(
            "f",
            vec![
                goto("Lout"),
                label("Ldead"),
                goto("Lout"),
                label("Lout"),
                instr(OpCode::Return, None, vec![Operand::Const(0)]),
            ],
        );
        let cfg = Cfg::build(&func).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(CompileError::CfgInvariant { .. })
        ));
    }

    #[test]
    fn structure_check_tolerates_unreachable_blocks() {
        // the dangling join jump a returning branch leaves behind
        let func = framed(
            "f",
            vec![
                if_goto(Operand::Temp(0), "Lelse"),
                instr(OpCode::Return, None, vec![Operand::Const(1)]),
                goto("Lend"),
                label("Lelse"),
                instr(OpCode::Return, None, vec![Operand::Const(2)]),
                label("Lend"),
            ],
        );
        let cfg = Cfg::build(&func).unwrap();
        cfg.check_structure().unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(CompileError::CfgInvariant { .. })
        ));
    }

    #[test]
    fn marked_removable_blocks_pass_validation_and_are_dropped() {
        let func = framed(
            "f",
            vec![
                goto("Lout"),
                label("Ldead"),
                goto("Lout"),
                label("Lout"),
                instr(OpCode::Return, None, vec![Operand::Const(0)]),
            ],
        );
        let mut cfg = Cfg::build(&func).unwrap();
        let dead = cfg.block_of_label("Ldead").unwrap();
        cfg.blocks[dead].removable = true;
        cfg.validate().unwrap();
        let flattened = cfg.into_function();
        assert!(flattened
            .instructions
            .iter()
            .all(|i| i.label_name() != Some("Ldead")));
    }

    #[test]
    fn dangling_jump_target_is_an_invariant_violation() {
        let func = framed("f", vec![goto("Lnowhere")]);
        assert!(matches!(
            Cfg::build(&func),
            Err(CompileError::CfgInvariant { .. })
        ));
    }

    #[test]
    fn update_jump_targets_rewrites_text_and_edges_together() {
        let func = framed(
            "f",
            vec![
                goto("La"),
                label("La"),
                goto("Lb"),
                label("Lb"),
                instr(OpCode::Return, None, vec![Operand::Const(0)]),
            ],
        );
        let mut cfg = Cfg::build(&func).unwrap();
        cfg.update_jump_targets("La", "Lb").unwrap();

        let lb = cfg.block_of_label("Lb").unwrap();
        assert_eq!(cfg.blocks[0].successors, vec![lb]);
        assert_eq!(
            cfg.blocks[0].instructions.last().unwrap().label_name(),
            Some("Lb")
        );
        let la = cfg.block_of_label("La").unwrap();
        assert!(cfg.blocks[la].predecessors.is_empty());
    }
}
