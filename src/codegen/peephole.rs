use crate::codegen::assembly::{AsmInstr, Reg};

/// One pass over adjacent instruction pairs: a reload right after the
/// store to the same frame slot becomes a register move (or disappears),
/// `mv x, x` disappears, and a jump to the label on the next line
/// disappears.
pub fn run(body: &mut Vec<AsmInstr>) {
    let mut out: Vec<AsmInstr> = Vec::with_capacity(body.len());
    let drained: Vec<AsmInstr> = body.drain(..).collect();
    let mut iter = drained.into_iter().peekable();

    while let Some(instr) = iter.next() {
        if let AsmInstr::Mv(rd, rs) = &instr {
            if rd == rs {
                continue;
            }
        }

        if let AsmInstr::J(target) = &instr {
            if let Some(AsmInstr::Label(label)) = iter.peek() {
                if label == target {
                    continue;
                }
            }
        }

        if let AsmInstr::Sw(stored, offset, Reg::Fp) = &instr {
            if let Some(AsmInstr::Lw(loaded, load_offset, Reg::Fp)) = iter.peek() {
                if load_offset == offset {
                    let stored = *stored;
                    let loaded = *loaded;
                    out.push(instr);
                    iter.next();
                    if loaded != stored {
                        out.push(AsmInstr::Mv(loaded, stored));
                    }
                    continue;
                }
            }
        }

        out.push(instr);
    }

    *body = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_reload_of_the_same_slot_becomes_a_move() {
        let mut body = vec![
            AsmInstr::Sw(Reg::T(2), -12, Reg::Fp),
            AsmInstr::Lw(Reg::T(0), -12, Reg::Fp),
            AsmInstr::Ret,
        ];
        run(&mut body);
        assert_eq!(
            body,
            vec![
                AsmInstr::Sw(Reg::T(2), -12, Reg::Fp),
                AsmInstr::Mv(Reg::T(0), Reg::T(2)),
                AsmInstr::Ret,
            ]
        );
    }

    #[test]
    fn reload_into_the_stored_register_disappears() {
        let mut body = vec![
            AsmInstr::Sw(Reg::T(0), -12, Reg::Fp),
            AsmInstr::Lw(Reg::T(0), -12, Reg::Fp),
        ];
        run(&mut body);
        assert_eq!(body, vec![AsmInstr::Sw(Reg::T(0), -12, Reg::Fp)]);
    }

    #[test]
    fn reload_of_a_different_slot_is_kept() {
        let mut body = vec![
            AsmInstr::Sw(Reg::T(0), -12, Reg::Fp),
            AsmInstr::Lw(Reg::T(1), -16, Reg::Fp),
        ];
        let before = body.clone();
        run(&mut body);
        assert_eq!(body, before);
    }

    #[test]
    fn self_moves_disappear() {
        let mut body = vec![
            AsmInstr::Mv(Reg::S(1), Reg::S(1)),
            AsmInstr::Mv(Reg::S(1), Reg::S(2)),
        ];
        run(&mut body);
        assert_eq!(body, vec![AsmInstr::Mv(Reg::S(1), Reg::S(2))]);
    }

    #[test]
    fn jump_to_the_next_label_disappears() {
        let mut body = vec![
            AsmInstr::J("L0".to_string()),
            AsmInstr::Label("L0".to_string()),
            AsmInstr::J("L1".to_string()),
            AsmInstr::Label("L2".to_string()),
        ];
        run(&mut body);
        assert_eq!(
            body,
            vec![
                AsmInstr::Label("L0".to_string()),
                AsmInstr::J("L1".to_string()),
                AsmInstr::Label("L2".to_string()),
            ]
        );
    }
}
