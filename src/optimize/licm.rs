use std::collections::{HashMap, HashSet};

use crate::cfg::{BlockId, Cfg};
use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand};
use crate::optimize::Pass;

/// Loop-invariant code motion. Loops are discovered as natural loops of
/// back edges (an edge whose target dominates its source); each loop
/// header gets a preheader block labelled `<header>.pre`, and invariant
/// computations move there. Entering jumps from outside the loop are
/// retargeted to the preheader; the back edge keeps targeting the header.
///
/// An instruction is hoisted only when it is pure, is not a division or
/// modulo (hoisting could execute a fault the loop never would), writes a
/// temporary with exactly one definition in the function, and reads only
/// constants and values never defined inside the loop. Chains of
/// invariant temporaries resolve across pipeline rounds, one link per
/// round.
pub struct LoopInvariantCodeMotion;

struct NaturalLoop {
    header: BlockId,
    blocks: HashSet<BlockId>,
}

impl Pass for LoopInvariantCodeMotion {
    fn name(&self) -> &'static str {
        "loop-invariant-code-motion"
    }

    fn run(&self, func: &mut FunctionBody) -> Result<(), CompileError> {
        let cfg = Cfg::build(func)?;
        let mut loops = find_loops(&cfg);
        if loops.is_empty() {
            return Ok(());
        }
        // innermost first, so nested invariants land in the inner preheader
        loops.sort_by_key(|lp| lp.blocks.len());

        let def_counts = definition_counts(&cfg);
        let mut claimed: HashSet<(BlockId, usize)> = HashSet::new();
        let mut preheaders: HashMap<BlockId, Vec<IrInstr>> = HashMap::new();

        for lp in &loops {
            if cfg.blocks[lp.header].label.is_none() {
                continue;
            }
            let loop_defs = definitions_in_loop(&cfg, lp);
            for &id in &lp.blocks {
                for (idx, instr) in cfg.blocks[id].instructions.iter().enumerate() {
                    if claimed.contains(&(id, idx)) {
                        continue;
                    }
                    if is_invariant(instr, &loop_defs, &def_counts) {
                        claimed.insert((id, idx));
                        preheaders.entry(lp.header).or_default().push(instr.clone());
                    }
                }
            }
        }
        if preheaders.is_empty() {
            return Ok(());
        }

        // headers that received a preheader, by label
        let mut pre_of: HashMap<String, BlockId> = HashMap::new();
        for &header in preheaders.keys() {
            if let Some(label) = &cfg.blocks[header].label {
                pre_of.insert(label.clone(), header);
            }
        }
        let loop_of: HashMap<BlockId, &NaturalLoop> =
            loops.iter().map(|lp| (lp.header, lp)).collect();

        let mut out = Vec::new();
        for block in &cfg.blocks {
            if let Some(hoisted) = preheaders.get(&block.id) {
                let pre = pre_label(block.label.as_deref().unwrap_or(""));
                out.push(IrInstr::new(
                    OpCode::Label,
                    None,
                    vec![Operand::Label(pre)],
                ));
                out.extend(hoisted.iter().cloned());
            }
            for (idx, instr) in block.instructions.iter().enumerate() {
                if claimed.contains(&(block.id, idx)) {
                    continue;
                }
                let mut instr = instr.clone();
                retarget_external_jump(&mut instr, block.id, &pre_of, &loop_of);
                out.push(instr);
            }
        }

        func.instructions = out;
        Cfg::build(func)?.check_structure()?;
        Ok(())
    }
}

fn pre_label(header: &str) -> String {
    format!("{}.pre", header)
}

/// Jumps into a loop from outside now enter through the preheader; jumps
/// from inside (the back edge included) still hit the header directly.
fn retarget_external_jump(
    instr: &mut IrInstr,
    from: BlockId,
    pre_of: &HashMap<String, BlockId>,
    loop_of: &HashMap<BlockId, &NaturalLoop>,
) {
    if !matches!(instr.op, OpCode::Goto | OpCode::IfGoto) {
        return;
    }
    let target = match instr.label_name() {
        Some(target) => target.to_string(),
        None => return,
    };
    let header = match pre_of.get(&target) {
        Some(&header) => header,
        None => return,
    };
    let inside = loop_of
        .get(&header)
        .map(|lp| lp.blocks.contains(&from))
        .unwrap_or(false);
    if !inside {
        let slot = match instr.op {
            OpCode::Goto => 0,
            _ => 1,
        };
        instr.operands[slot] = Operand::Label(pre_label(&target));
    }
}

fn is_invariant(
    instr: &IrInstr,
    loop_defs: &HashSet<Operand>,
    def_counts: &HashMap<Operand, usize>,
) -> bool {
    if !instr.op.is_pure() || matches!(instr.op, OpCode::Div | OpCode::Mod) {
        return false;
    }
    let dest = match &instr.dest {
        Some(dest @ Operand::Temp(_)) => dest,
        _ => return false,
    };
    if def_counts.get(dest).copied() != Some(1) {
        return false;
    }
    instr
        .operands
        .iter()
        .all(|operand| operand.is_const() || !loop_defs.contains(operand))
}

fn definitions_in_loop(cfg: &Cfg, lp: &NaturalLoop) -> HashSet<Operand> {
    let mut defs = HashSet::new();
    for &id in &lp.blocks {
        for instr in &cfg.blocks[id].instructions {
            if let Some(dest) = &instr.dest {
                defs.insert(dest.clone());
            }
        }
    }
    defs
}

fn definition_counts(cfg: &Cfg) -> HashMap<Operand, usize> {
    let mut counts = HashMap::new();
    for block in &cfg.blocks {
        for instr in &block.instructions {
            if let Some(dest) = &instr.dest {
                *counts.entry(dest.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// Natural loops of all back edges, with loops sharing a header merged.
fn find_loops(cfg: &Cfg) -> Vec<NaturalLoop> {
    let dom = dominators(cfg);
    let mut by_header: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();

    for block in &cfg.blocks {
        for &succ in &block.successors {
            if dom[block.id].contains(&succ) {
                let body = natural_loop(cfg, succ, block.id);
                by_header.entry(succ).or_default().extend(body);
            }
        }
    }

    by_header
        .into_iter()
        .map(|(header, blocks)| NaturalLoop { header, blocks })
        .collect()
}

/// Header plus every block that reaches the back edge's tail through
/// predecessors without passing the header.
fn natural_loop(cfg: &Cfg, header: BlockId, tail: BlockId) -> HashSet<BlockId> {
    let mut blocks = HashSet::new();
    blocks.insert(header);
    let mut stack = vec![tail];
    while let Some(id) = stack.pop() {
        if blocks.insert(id) {
            stack.extend(cfg.blocks[id].predecessors.iter().copied());
        }
    }
    blocks
}

/// Iterative dominator sets: dom(entry) = {entry}, dom(b) = {b} plus the
/// intersection over predecessors, to a fixed point.
fn dominators(cfg: &Cfg) -> Vec<HashSet<BlockId>> {
    let n = cfg.blocks.len();
    let all: HashSet<BlockId> = (0..n).collect();
    let mut dom = vec![all; n];
    dom[cfg.entry] = HashSet::from([cfg.entry]);

    let mut changed = true;
    while changed {
        changed = false;
        for id in 0..n {
            if id == cfg.entry {
                continue;
            }
            let mut next: Option<HashSet<BlockId>> = None;
            for &pred in &cfg.blocks[id].predecessors {
                next = Some(match next {
                    None => dom[pred].clone(),
                    Some(acc) => acc.intersection(&dom[pred]).copied().collect(),
                });
            }
            let mut next = next.unwrap_or_default();
            next.insert(id);
            if next != dom[id] {
                dom[id] = next;
                changed = true;
            }
        }
    }
    dom
}
