use std::collections::{HashMap, HashSet, VecDeque};

use crate::cfg::{BlockId, Cfg};
use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, OpCode, Operand};
use crate::optimize::Pass;

type Facts = HashMap<Operand, Operand>;

/// CFG-aware constant propagation. Each block carries a mapping from
/// value to its last-assigned source; a use is rewritten only when the
/// chain of recorded assignments bottoms out in a constant. At a join
/// point the maps are intersected, so a value with differing constants on
/// two paths is dropped; a CALL conservatively clears everything.
pub struct ConstantPropagation;

impl Pass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        let mut cfg = Cfg::build(func)?;
        let annotations = analyze(&cfg);
        rewrite(&mut cfg, &annotations);
        cfg.check_structure()?;
        *func = cfg.into_function();
        Ok(())
    }
}

/// Per-instruction facts: the assignments known to hold immediately
/// before each instruction.
fn analyze(cfg: &Cfg) -> HashMap<(BlockId, usize), Facts> {
    let all = collect_all_assignments(cfg);

    let mut outs: Vec<Facts> = vec![all.clone(); cfg.blocks.len()];
    let mut annotations = HashMap::new();
    let mut worklist: VecDeque<BlockId> = (0..cfg.blocks.len()).collect();

    while let Some(id) = worklist.pop_front() {
        let incoming = if id == cfg.entry {
            Facts::new()
        } else {
            meet(cfg, id, &outs, &all)
        };

        let out = transfer(cfg, id, incoming, &mut annotations);
        if out != outs[id] {
            outs[id] = out;
            for &succ in &cfg.blocks[id].successors {
                if !worklist.contains(&succ) {
                    worklist.push_back(succ);
                }
            }
        }
    }

    annotations
}

fn collect_all_assignments(cfg: &Cfg) -> Facts {
    let mut all = Facts::new();
    for block in &cfg.blocks {
        for instr in &block.instructions {
            if instr.op == OpCode::Assign {
                if let (Some(dest), Some(src)) = (&instr.dest, instr.operands.first()) {
                    all.insert(dest.clone(), src.clone());
                }
            }
        }
    }
    all
}

fn meet(cfg: &Cfg, id: BlockId, outs: &[Facts], all: &Facts) -> Facts {
    let mut incoming = all.clone();
    for &pred in &cfg.blocks[id].predecessors {
        incoming.retain(|key, value| outs[pred].get(key) == Some(value));
    }
    incoming
}

fn transfer(
    cfg: &Cfg,
    id: BlockId,
    incoming: Facts,
    annotations: &mut HashMap<(BlockId, usize), Facts>,
) -> Facts {
    let mut facts = incoming;

    for (idx, instr) in cfg.blocks[id].instructions.iter().enumerate() {
        annotations.insert((id, idx), facts.clone());

        match instr.op {
            OpCode::Assign => {
                if let (Some(dest), Some(src)) = (&instr.dest, instr.operands.first()) {
                    let src = src.clone();
                    kill(&mut facts, dest);
                    if src != *dest {
                        facts.insert(dest.clone(), src);
                    }
                }
            }
            OpCode::Call => {
                // a call boundary invalidates everything recorded so far
                facts.clear();
            }
            _ => {
                if let Some(dest) = &instr.dest {
                    kill(&mut facts, dest);
                }
            }
        }
    }

    facts
}

/// Drops every fact that mentions `dest` on either side.
fn kill(facts: &mut Facts, dest: &Operand) {
    facts.retain(|key, value| key != dest && value != dest);
}

/// Follows the assignment chain from `operand` to a constant, if one is
/// reachable. The visited set breaks self-referential chains such as the
/// ones mutually-assigned variables produce.
fn resolve_constant(
    operand: &Operand,
    facts: &Facts,
    visited: &mut HashSet<Operand>,
) -> Option<i32> {
    match operand {
        Operand::Const(value) => Some(*value),
        Operand::Temp(_) | Operand::Var(_) => {
            if !visited.insert(operand.clone()) {
                return None;
            }
            let next = facts.get(operand)?;
            resolve_constant(next, facts, visited)
        }
        Operand::Label(_) => None,
    }
}

fn rewrite(cfg: &mut Cfg, annotations: &HashMap<(BlockId, usize), Facts>) {
    for block in &mut cfg.blocks {
        for (idx, instr) in block.instructions.iter_mut().enumerate() {
            let facts = match annotations.get(&(block.id, idx)) {
                Some(facts) => facts,
                None => continue,
            };
            for operand in instr.operands.iter_mut() {
                if !operand.is_value() {
                    continue;
                }
                let mut visited = HashSet::new();
                if let Some(value) = resolve_constant(operand, facts, &mut visited) {
                    *operand = Operand::Const(value);
                }
            }
        }
    }
}
