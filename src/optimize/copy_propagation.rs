use std::collections::{HashMap, HashSet, VecDeque};

use crate::cfg::{BlockId, Cfg};
use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, OpCode, Operand};
use crate::optimize::Pass;

type Copies = HashMap<Operand, Operand>;

/// Replaces uses of a copied value with the copy's source wherever a
/// single ASSIGN reaches the use on every path. A copy `d = s` dies when
/// either side is redefined; a CALL kills every copy. Chains are followed
/// to their root, which is sound because all the facts in a block's map
/// hold simultaneously at that point.
pub struct CopyPropagation;

impl Pass for CopyPropagation {
    fn name(&self) -> &'static str {
        "copy-propagation"
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

fn analyze(cfg: &Cfg) -> HashMap<(BlockId, usize), Copies> {
    let all = all_copies(cfg);

    let mut outs: Vec<Copies> = vec![all.clone(); cfg.blocks.len()];
    let mut annotations = HashMap::new();
    let mut worklist: VecDeque<BlockId> = (0..cfg.blocks.len()).collect();

    while let Some(id) = worklist.pop_front() {
        let mut incoming = if id == cfg.entry {
            Copies::new()
        } else {
            let mut meet = all.clone();
            for &pred in &cfg.blocks[id].predecessors {
                meet.retain(|key, value| outs[pred].get(key) == Some(value));
            }
            meet
        };

        for (idx, instr) in cfg.blocks[id].instructions.iter().enumerate() {
            annotations.insert((id, idx), incoming.clone());

            match instr.op {
                OpCode::Assign => {
                    if let (Some(dest), Some(src)) = (&instr.dest, instr.operands.first()) {
                        let src = src.clone();
                        kill(&mut incoming, dest);
                        if src != *dest {
                            incoming.insert(dest.clone(), src);
                        }
                    }
                }
                OpCode::Call => incoming.clear(),
                _ => {
                    if let Some(dest) = &instr.dest {
                        kill(&mut incoming, dest);
                    }
                }
            }
        }

        if incoming != outs[id] {
            outs[id] = incoming;
            for &succ in &cfg.blocks[id].successors {
                if !worklist.contains(&succ) {
                    worklist.push_back(succ);
                }
            }
        }
    }

    annotations
}

fn all_copies(cfg: &Cfg) -> Copies {
    let mut all = Copies::new();
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

fn kill(copies: &mut Copies, dest: &Operand) {
    copies.retain(|key, value| key != dest && value != dest);
}

/// Root of the copy chain starting at `operand`, with cycle protection.
fn chain_root(operand: &Operand, copies: &Copies) -> Operand {
    let mut current = operand.clone();
    let mut visited = HashSet::new();
    while let Some(next) = copies.get(&current) {
        if !visited.insert(current.clone()) {
            break;
        }
        current = next.clone();
    }
    current
}

fn rewrite(cfg: &mut Cfg, annotations: &HashMap<(BlockId, usize), Copies>) {
    for block in &mut cfg.blocks {
        for (idx, instr) in block.instructions.iter_mut().enumerate() {
            let copies = match annotations.get(&(block.id, idx)) {
                Some(copies) => copies,
                None => continue,
            };
            for operand in instr.operands.iter_mut() {
                if operand.is_value() {
                    *operand = chain_root(operand, copies);
                }
            }
        }
    }
}
