use std::fmt::Write;

use crate::codegen::assembly::{AsmFunction, AsmInstr, AsmProgram};

/// Renders abstract assembly as RV32IM text. Local labels get a leading
/// dot; every function gets a prologue sized by its finished frame and a
/// single epilogue at `.Lret_<name>` that all returns jump to.
pub struct Emitter {
    program: AsmProgram,
}

impl Emitter {
    pub fn new(program: AsmProgram) -> Emitter {
        Emitter { program }
    }

    pub fn emit(&self) -> String {
        let mut output = String::from("    .text\n");
        for func in &self.program.functions {
            self.emit_function(func, &mut output);
        }
        output
    }

    fn emit_function(&self, func: &AsmFunction, output: &mut String) {
        let frame = func.frame_size;
        let _ = writeln!(output, "    .globl {}", func.name);
        let _ = writeln!(output, "{}:", func.name);
        let _ = writeln!(output, "    addi sp, sp, -{}", frame);
        let _ = writeln!(output, "    sw ra, {}(sp)", frame - 4);
        let _ = writeln!(output, "    sw s0, {}(sp)", frame - 8);
        let _ = writeln!(output, "    addi s0, sp, {}", frame);
        for (j, reg) in func.saved.iter().enumerate() {
            let _ = writeln!(output, "    sw {}, -{}(s0)", reg, 12 + 4 * j);
        }

        for instr in &func.body {
            output.push_str(&self.emit_instruction(instr));
            output.push('\n');
        }

        let _ = writeln!(output, ".Lret_{}:", func.name);
        for (j, reg) in func.saved.iter().enumerate() {
            let _ = writeln!(output, "    lw {}, -{}(s0)", reg, 12 + 4 * j);
        }
        let _ = writeln!(output, "    lw ra, {}(sp)", frame - 4);
        let _ = writeln!(output, "    lw s0, {}(sp)", frame - 8);
        let _ = writeln!(output, "    addi sp, sp, {}", frame);
        let _ = writeln!(output, "    ret");
    }

    fn emit_instruction(&self, instr: &AsmInstr) -> String {
        match instr {
            AsmInstr::Li(rd, value) => format!("    li {}, {}", rd, value),
            AsmInstr::Mv(rd, rs) => format!("    mv {}, {}", rd, rs),
            AsmInstr::Binary(op, rd, rs1, rs2) => {
                format!("    {} {}, {}, {}", op.mnemonic(), rd, rs1, rs2)
            }
            AsmInstr::BinaryImm(op, rd, rs1, imm) => {
                format!("    {} {}, {}, {}", op.mnemonic(), rd, rs1, imm)
            }
            AsmInstr::Neg(rd, rs) => format!("    neg {}, {}", rd, rs),
            AsmInstr::Seqz(rd, rs) => format!("    seqz {}, {}", rd, rs),
            AsmInstr::Snez(rd, rs) => format!("    snez {}, {}", rd, rs),
            AsmInstr::Lw(rd, offset, base) => format!("    lw {}, {}({})", rd, offset, base),
            AsmInstr::Sw(rs, offset, base) => format!("    sw {}, {}({})", rs, offset, base),
            AsmInstr::Label(name) => format!(".{}:", name),
            AsmInstr::J(name) => format!("    j .{}", name),
            AsmInstr::Bnez(rs, name) => format!("    bnez {}, .{}", rs, name),
            AsmInstr::Beqz(rs, name) => format!("    beqz {}, .{}", rs, name),
            AsmInstr::Call(name) => format!("    call {}", name),
            AsmInstr::Ret => "    ret".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::assembly::Reg;

    fn one_function(body: Vec<AsmInstr>, saved: Vec<Reg>) -> String {
        Emitter::new(AsmProgram {
            functions: vec![AsmFunction {
                name: "f".to_string(),
                body,
                frame_size: 32,
                saved,
            }],
        })
        .emit()
    }

    #[test]
    fn prologue_and_epilogue_frame_the_body() {
        let text = one_function(vec![AsmInstr::Li(Reg::A(0), 3)], vec![]);
        assert!(text.contains("    .globl f\n"));
        assert!(text.contains("f:\n    addi sp, sp, -32\n"));
        assert!(text.contains("    sw ra, 28(sp)\n"));
        assert!(text.contains("    sw s0, 24(sp)\n"));
        assert!(text.contains(".Lret_f:\n"));
        assert!(text.ends_with("    addi sp, sp, 32\n    ret\n"));
    }

    #[test]
    fn used_callee_saved_registers_are_saved_and_restored() {
        let text = one_function(vec![], vec![Reg::S(1), Reg::S(2)]);
        assert!(text.contains("    sw s1, -12(s0)\n"));
        assert!(text.contains("    sw s2, -16(s0)\n"));
        assert!(text.contains("    lw s1, -12(s0)\n"));
        assert!(text.contains("    lw s2, -16(s0)\n"));
    }

    #[test]
    fn local_labels_are_dot_prefixed() {
        let text = one_function(
            vec![
                AsmInstr::Label("L3".to_string()),
                AsmInstr::J("L3".to_string()),
                AsmInstr::Bnez(Reg::T(0), "L4".to_string()),
            ],
            vec![],
        );
        assert!(text.contains(".L3:\n"));
        assert!(text.contains("    j .L3\n"));
        assert!(text.contains("    bnez t0, .L4\n"));
    }
}
