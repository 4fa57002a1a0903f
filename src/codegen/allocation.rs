use std::collections::HashMap;

use crate::codegen::assembly::Reg;
use crate::config::{CodegenConfig, RegAllocStrategy};
use crate::ir::definition::{FunctionBody, OpCode, Operand};

/// Where a value lives for the whole function: a callee-saved register or
/// a frame slot at a negative offset from the frame pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Reg(Reg),
    Slot(i32),
}

/// Live interval over post-optimization instruction indices, from first
/// to last textual occurrence, widened over any backward jump it
/// overlaps so loop-carried values stay live across the whole loop.
#[derive(Debug, Clone)]
pub struct Interval {
    pub value: Operand,
    pub start: usize,
    pub end: usize,
}

/// The finished frame: one location per value, the callee-saved registers
/// the body uses, and the 16-byte-aligned frame size. `ra` sits at
/// `fp-4`, the caller's `s0` at `fp-8`, saved s-registers below that,
/// value slots below those.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    locations: HashMap<Operand, Location>,
    pub saved: Vec<Reg>,
    pub frame_size: i32,
}

impl FrameLayout {
    pub fn location(&self, value: &Operand) -> Option<Location> {
        self.locations.get(value).copied()
    }

    pub fn build(func: &FunctionBody, config: &CodegenConfig) -> FrameLayout {
        let pool = match config.reg_alloc_strategy {
            RegAllocStrategy::Naive => Vec::new(),
            RegAllocStrategy::LinearScan => (1..=11).map(Reg::S).collect(),
        };
        FrameLayout::build_with_pool(func, config, pool)
    }

    /// Same as `build`, with an explicit register pool. Tests use tiny
    /// pools to force spilling.
    pub fn build_with_pool(
        func: &FunctionBody,
        config: &CodegenConfig,
        pool: Vec<Reg>,
    ) -> FrameLayout {
        let intervals = live_intervals(func);

        let mut locations: HashMap<Operand, Location> = HashMap::new();
        let mut saved: Vec<Reg> = Vec::new();
        let mut spilled: Vec<Interval> = Vec::new();

        if pool.is_empty() {
            spilled = intervals;
        } else {
            linear_scan(intervals, pool, &mut locations, &mut saved, &mut spilled);
        }

        let slot_count = assign_slots(&spilled, config.optimize_stack_layout, &mut locations, &saved);

        let fixed = 8 + 4 * saved.len() as i32;
        let frame_size = align16(fixed + 4 * slot_count as i32);

        // slot offsets were assigned relative to the saved area; nothing
        // further to adjust, the frame just has to cover them
        FrameLayout {
            locations,
            saved,
            frame_size,
        }
    }
}

fn align16(bytes: i32) -> i32 {
    (bytes + 15) & !15
}

/// First-to-last occurrence per value, in first-appearance order,
/// widened over overlapping backward jumps.
pub fn live_intervals(func: &FunctionBody) -> Vec<Interval> {
    let mut order: Vec<Operand> = Vec::new();
    let mut ranges: HashMap<Operand, (usize, usize)> = HashMap::new();

    for (idx, instr) in func.instructions.iter().enumerate() {
        let mut touch = |value: &Operand| {
            let entry = ranges.entry(value.clone()).or_insert_with(|| {
                order.push(value.clone());
                (idx, idx)
            });
            entry.1 = idx;
        };
        for operand in instr.used_values() {
            touch(operand);
        }
        if let Some(dest) = &instr.dest {
            touch(dest);
        }
    }

    let back_edges = backward_jumps(func);
    let mut changed = true;
    while changed {
        changed = false;
        for (start, end) in ranges.values_mut() {
            for &(target, jump) in &back_edges {
                if *start <= jump && *end >= target && (*start > target || *end < jump) {
                    *start = (*start).min(target);
                    *end = (*end).max(jump);
                    changed = true;
                }
            }
        }
    }

    order
        .into_iter()
        .map(|value| {
            let (start, end) = ranges[&value];
            Interval { value, start, end }
        })
        .collect()
}

/// `(label index, jump index)` pairs for jumps that go backwards.
fn backward_jumps(func: &FunctionBody) -> Vec<(usize, usize)> {
    let mut labels: HashMap<&str, usize> = HashMap::new();
    for (idx, instr) in func.instructions.iter().enumerate() {
        if instr.op == OpCode::Label {
            if let Some(name) = instr.label_name() {
                labels.insert(name, idx);
            }
        }
    }

    let mut edges = Vec::new();
    for (idx, instr) in func.instructions.iter().enumerate() {
        if matches!(instr.op, OpCode::Goto | OpCode::IfGoto) {
            if let Some(&target) = instr.label_name().and_then(|name| labels.get(name)) {
                if target < idx {
                    edges.push((target, idx));
                }
            }
        }
    }
    edges
}

/// Classic linear scan over intervals sorted by start. When the pool is
/// exhausted the interval ending furthest away is the spill victim, so a
/// long-lived value gives its register up to a short-lived one. The
/// interval end stands in for the distance to the next use; intervals
/// do not record individual use positions.
fn linear_scan(
    mut intervals: Vec<Interval>,
    pool: Vec<Reg>,
    locations: &mut HashMap<Operand, Location>,
    saved: &mut Vec<Reg>,
    spilled: &mut Vec<Interval>,
) {
    intervals.sort_by_key(|iv| iv.start);
    let mut free: Vec<Reg> = pool;
    free.reverse();
    let mut active: Vec<(Interval, Reg)> = Vec::new();

    for current in intervals {
        active.retain(|(iv, reg)| {
            if iv.end < current.start {
                free.push(*reg);
                false
            } else {
                true
            }
        });

        if let Some(reg) = free.pop() {
            if !saved.contains(&reg) {
                saved.push(reg);
            }
            locations.insert(current.value.clone(), Location::Reg(reg));
            active.push((current, reg));
            continue;
        }

        let victim = active
            .iter()
            .enumerate()
            .max_by_key(|(_, (iv, _))| iv.end)
            .map(|(pos, _)| pos);

        match victim {
            Some(pos) if active[pos].0.end > current.end => {
                let (victim_iv, reg) = active.remove(pos);
                locations.remove(&victim_iv.value);
                spilled.push(victim_iv);
                locations.insert(current.value.clone(), Location::Reg(reg));
                active.push((current, reg));
            }
            _ => spilled.push(current),
        }
    }
}

/// Slot indices for values living in memory. With stack-layout packing,
/// a slot frees up when its occupant's interval ends and is reused by
/// the next value; without it every value gets its own slot.
fn assign_slots(
    spilled: &[Interval],
    pack: bool,
    locations: &mut HashMap<Operand, Location>,
    saved: &[Reg],
) -> usize {
    let base = 8 + 4 * saved.len() as i32;
    let offset_of = |slot: usize| -(base + 4 * (slot as i32 + 1));

    if !pack {
        for (slot, iv) in spilled.iter().enumerate() {
            locations.insert(iv.value.clone(), Location::Slot(offset_of(slot)));
        }
        return spilled.len();
    }

    let mut intervals: Vec<&Interval> = spilled.iter().collect();
    intervals.sort_by_key(|iv| iv.start);

    let mut free: Vec<usize> = Vec::new();
    let mut active: Vec<(usize, usize)> = Vec::new(); // (end, slot)
    let mut next_slot = 0;

    for iv in intervals {
        active.retain(|&(end, slot)| {
            if end < iv.start {
                free.push(slot);
                false
            } else {
                true
            }
        });
        let slot = free.pop().unwrap_or_else(|| {
            let slot = next_slot;
            next_slot += 1;
            slot
        });
        locations.insert(iv.value.clone(), Location::Slot(offset_of(slot)));
        active.push((iv.end, slot));
    }
    next_slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::definition::IrInstr;

    fn instr(op: OpCode, dest: Option<Operand>, operands: Vec<Operand>) -> IrInstr {
        IrInstr::new(op, dest, operands)
    }

    fn temp(id: u32) -> Operand {
        Operand::Temp(id)
    }

    fn konst(v: i32) -> Operand {
        Operand::Const(v)
    }

    fn framed(body: Vec<IrInstr>) -> FunctionBody {
        let mut instructions = vec![instr(
            OpCode::FunctionBegin,
            None,
            vec![Operand::Label("f".to_string())],
        )];
        instructions.extend(body);
        instructions.push(instr(
            OpCode::FunctionEnd,
            None,
            vec![Operand::Label("f".to_string())],
        ));
        FunctionBody {
            name: "f".to_string(),
            instructions,
        }
    }

    // t0 dies before t1 is born, t2 overlaps both ends
    fn disjoint_then_overlapping() -> FunctionBody {
        framed(vec![
            instr(OpCode::Add, Some(temp(0)), vec![konst(1), konst(2)]),
            instr(OpCode::Add, Some(temp(2)), vec![temp(0), konst(1)]),
            instr(OpCode::Add, Some(temp(1)), vec![konst(3), konst(4)]),
            instr(OpCode::Add, Some(temp(3)), vec![temp(1), temp(2)]),
            instr(OpCode::Return, None, vec![temp(3)]),
        ])
    }

    fn naive() -> CodegenConfig {
        CodegenConfig::default()
    }

    #[test]
    fn naive_strategy_puts_everything_on_the_stack() {
        let layout = FrameLayout::build(&disjoint_then_overlapping(), &naive());
        for id in 0..4 {
            assert!(matches!(
                layout.location(&temp(id)),
                Some(Location::Slot(off)) if off < 0
            ));
        }
        assert!(layout.saved.is_empty());
    }

    #[test]
    fn slots_are_distinct_without_packing() {
        let layout = FrameLayout::build(&disjoint_then_overlapping(), &naive());
        let mut offsets: Vec<i32> = (0..4)
            .map(|id| match layout.location(&temp(id)) {
                Some(Location::Slot(off)) => off,
                other => panic!("expected slot, got {:?}", other),
            })
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 4);
    }

    #[test]
    fn disjoint_intervals_share_a_register_in_a_one_register_pool() {
        let config = CodegenConfig {
            reg_alloc_strategy: RegAllocStrategy::LinearScan,
            ..CodegenConfig::default()
        };
        let layout = FrameLayout::build_with_pool(
            &disjoint_then_overlapping(),
            &config,
            vec![Reg::S(1)],
        );
        // t0 and t1 never overlap: both fit the single register
        assert_eq!(layout.location(&temp(0)), Some(Location::Reg(Reg::S(1))));
        assert_eq!(layout.location(&temp(1)), Some(Location::Reg(Reg::S(1))));
        // t2 overlaps both and must live in memory
        assert!(matches!(layout.location(&temp(2)), Some(Location::Slot(_))));
    }

    #[test]
    fn packing_reuses_slots_of_dead_values() {
        let config = CodegenConfig {
            optimize_stack_layout: true,
            ..CodegenConfig::default()
        };
        let layout = FrameLayout::build(&disjoint_then_overlapping(), &config);
        let slot = |id: u32| match layout.location(&temp(id)) {
            Some(Location::Slot(off)) => off,
            other => panic!("expected slot, got {:?}", other),
        };
        // disjoint t0/t1 share, overlapping t2 does not
        assert_eq!(slot(0), slot(1));
        assert_ne!(slot(0), slot(2));
    }

    #[test]
    fn backward_jumps_extend_intervals_over_the_loop() {
        let func = framed(vec![
            instr(OpCode::Assign, Some(temp(0)), vec![konst(0)]),
            instr(OpCode::Label, None, vec![Operand::Label("L0".to_string())]),
            instr(OpCode::Add, Some(temp(1)), vec![temp(0), konst(1)]),
            instr(OpCode::Assign, Some(temp(0)), vec![temp(1)]),
            instr(
                OpCode::IfGoto,
                None,
                vec![temp(1), Operand::Label("L0".to_string())],
            ),
            instr(OpCode::Return, None, vec![temp(0)]),
        ]);
        let intervals = live_intervals(&func);
        let t1 = intervals.iter().find(|iv| iv.value == temp(1)).unwrap();
        // the jump at index 5 targets the label at index 2
        assert!(t1.start <= 2 && t1.end >= 5);
    }

    #[test]
    fn frame_size_is_sixteen_byte_aligned() {
        let layout = FrameLayout::build(&disjoint_then_overlapping(), &naive());
        assert_eq!(layout.frame_size % 16, 0);
        assert!(layout.frame_size >= 8 + 4 * 4);
    }
}
