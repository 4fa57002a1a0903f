use std::collections::HashMap;

use crate::codegen::assembly::{AsmInstr, Reg};

/// Removes a frame-slot store that is provably overwritten before any
/// load of the same slot. Straight-line only: any label, jump, call or
/// non-frame memory access clears the tracking, so nothing is assumed
/// about what other paths or callees read.
pub fn eliminate_dead_stores(body: &mut Vec<AsmInstr>) {
    let mut pending: HashMap<i32, usize> = HashMap::new();
    let mut dead: Vec<usize> = Vec::new();

    for (idx, instr) in body.iter().enumerate() {
        match instr {
            AsmInstr::Sw(_, offset, Reg::Fp) => {
                if let Some(previous) = pending.insert(*offset, idx) {
                    dead.push(previous);
                }
            }
            AsmInstr::Lw(_, offset, Reg::Fp) => {
                pending.remove(offset);
            }
            AsmInstr::Sw(..) | AsmInstr::Lw(..) => pending.clear(),
            other if other.is_barrier() => pending.clear(),
            _ => {}
        }
    }

    dead.sort_unstable();
    for idx in dead.into_iter().rev() {
        body.remove(idx);
    }
}
