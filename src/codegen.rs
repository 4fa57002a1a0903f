//! IR to RV32IM lowering.
//!
//! Each function is compiled in two passes: allocation first fixes every
//! value's location and the frame size, then selection walks the
//! instruction list emitting abstract assembly against the finished
//! layout. Values live in callee-saved registers or frame slots;
//! `t0`/`t1` stage operands, `t2` stages results bound for memory, and
//! the argument registers are only ever live inside one call sequence.

pub mod allocation;
pub mod assembly;
pub mod dead_stores;
pub mod emit;
pub mod peephole;

use crate::codegen::allocation::{FrameLayout, Location};
use crate::codegen::assembly::{AsmFunction, AsmInstr, AsmProgram, BinOp, ImmOp, Reg};
use crate::config::CodegenConfig;
use crate::errors::CompileError;
use crate::ir::definition::{FunctionBody, IrInstr, OpCode, Operand, Program};

pub struct CodeGen<'a> {
    config: &'a CodegenConfig,
}

impl<'a> CodeGen<'a> {
    pub fn new(config: &'a CodegenConfig) -> CodeGen<'a> {
        CodeGen { config }
    }

    pub fn generate(&self, program: &Program) -> Result<AsmProgram, CompileError> {
        let mut functions = Vec::new();
        for func in program.functions()? {
            functions.push(self.generate_function(&func)?);
        }
        Ok(AsmProgram { functions })
    }

    fn generate_function(&self, func: &FunctionBody) -> Result<AsmFunction, CompileError> {
        let layout = FrameLayout::build(func, self.config);
        let mut selector = Selector {
            func: func.name.clone(),
            layout: &layout,
            out: Vec::new(),
            pending_args: Vec::new(),
        };
        for instr in &func.instructions {
            selector.select(instr)?;
        }

        let mut body = selector.out;
        if self.config.eliminate_dead_stores {
            dead_stores::eliminate_dead_stores(&mut body);
        }
        if self.config.enable_peephole_optimizations {
            peephole::run(&mut body);
        }

        Ok(AsmFunction {
            name: func.name.clone(),
            body,
            frame_size: layout.frame_size,
            saved: layout.saved.clone(),
        })
    }
}

/// Generates assembly text for a whole unit.
pub fn generate_assembly(
    program: &Program,
    config: &CodegenConfig,
) -> Result<String, CompileError> {
    let asm = CodeGen::new(config).generate(program)?;
    Ok(emit::Emitter::new(asm).emit())
}

const SCRATCH_LHS: Reg = Reg::T(0);
const SCRATCH_RHS: Reg = Reg::T(1);
const SCRATCH_DEST: Reg = Reg::T(2);

struct Selector<'a> {
    func: String,
    layout: &'a FrameLayout,
    out: Vec<AsmInstr>,
    pending_args: Vec<Operand>,
}

impl Selector<'_> {
    fn select(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        match instr.op {
            OpCode::FunctionBegin => self.home_params(instr),
            OpCode::FunctionEnd => Ok(()),
            OpCode::Label => {
                let name = self.label_of(instr)?;
                self.out.push(AsmInstr::Label(name));
                Ok(())
            }
            OpCode::Goto => {
                let name = self.label_of(instr)?;
                self.out.push(AsmInstr::J(name));
                Ok(())
            }
            OpCode::IfGoto => {
                let name = self.label_of(instr)?;
                let cond = self.value_reg(self.operand(instr, 0)?, SCRATCH_LHS)?;
                self.out.push(AsmInstr::Bnez(cond, name));
                Ok(())
            }
            OpCode::Return => {
                if let Some(value) = instr.operands.first() {
                    let value = value.clone();
                    self.load_into(Reg::A(0), &value)?;
                }
                self.out.push(AsmInstr::J(format!("Lret_{}", self.func)));
                Ok(())
            }
            OpCode::Param => {
                let arg = self.operand(instr, 0)?.clone();
                self.pending_args.push(arg);
                Ok(())
            }
            OpCode::Call => self.select_call(instr),
            OpCode::Assign => self.select_assign(instr),
            OpCode::Neg | OpCode::Not => self.select_unary(instr),
            _ => self.select_binary(instr),
        }
    }

    /// Copies incoming arguments to their allocated homes. The ninth and
    /// later arguments sit in the caller's frame at positive offsets
    /// from our frame pointer.
    fn home_params(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        let params: Vec<Operand> = instr.operands.iter().skip(1).cloned().collect();
        for (i, param) in params.iter().enumerate() {
            if i < 8 {
                self.write_dest(param, Reg::A(i as u8))?;
            } else {
                let offset = 4 * (i as i32 - 8);
                self.out.push(AsmInstr::Lw(SCRATCH_LHS, offset, Reg::Fp));
                self.write_dest(param, SCRATCH_LHS)?;
            }
        }
        Ok(())
    }

    fn select_call(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        let callee = match instr.operands.first() {
            Some(Operand::Label(name)) => name.clone(),
            _ => return Err(self.malformed("CALL without a callee")),
        };
        let argc = self
            .operand(instr, 1)?
            .as_const()
            .ok_or_else(|| self.malformed("CALL without an argument count"))?;

        let args = std::mem::take(&mut self.pending_args);
        if args.len() != argc as usize {
            return Err(self.malformed("CALL argument count mismatch"));
        }

        let extra = args.len().saturating_sub(8);
        if extra > 0 {
            self.out
                .push(AsmInstr::BinaryImm(ImmOp::Addi, Reg::Sp, Reg::Sp, -(4 * extra as i32)));
            for (j, arg) in args[8..].iter().enumerate() {
                let reg = self.value_reg(arg, SCRATCH_LHS)?;
                self.out.push(AsmInstr::Sw(reg, 4 * j as i32, Reg::Sp));
            }
        }
        for (i, arg) in args.iter().take(8).enumerate() {
            self.load_into(Reg::A(i as u8), arg)?;
        }
        self.out.push(AsmInstr::Call(callee));
        if extra > 0 {
            self.out
                .push(AsmInstr::BinaryImm(ImmOp::Addi, Reg::Sp, Reg::Sp, 4 * extra as i32));
        }
        if let Some(dest) = instr.dest.clone() {
            self.write_dest(&dest, Reg::A(0))?;
        }
        Ok(())
    }

    fn select_assign(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        let dest = self.dest_of(instr)?;
        let src = self.operand(instr, 0)?.clone();
        match self.location(&dest)? {
            Location::Reg(reg) => self.load_into(reg, &src),
            Location::Slot(offset) => {
                let reg = self.value_reg(&src, SCRATCH_LHS)?;
                self.out.push(AsmInstr::Sw(reg, offset, Reg::Fp));
                Ok(())
            }
        }
    }

    fn select_unary(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        let dest = self.dest_of(instr)?;
        let src = self.operand(instr, 0)?.clone();
        let src = self.value_reg(&src, SCRATCH_LHS)?;
        let (rd, spill) = self.dest_reg(&dest)?;
        match instr.op {
            OpCode::Neg => self.out.push(AsmInstr::Neg(rd, src)),
            _ => self.out.push(AsmInstr::Seqz(rd, src)),
        }
        self.finish_dest(rd, spill);
        Ok(())
    }

    fn select_binary(&mut self, instr: &IrInstr) -> Result<(), CompileError> {
        if !instr.op.is_binary() {
            return Err(self.malformed("unexpected opcode in selection"));
        }
        let dest = self.dest_of(instr)?;
        let lhs_op = self.operand(instr, 0)?.clone();
        let rhs_op = self.operand(instr, 1)?.clone();

        // constant shift amounts come out of strength reduction
        if matches!(instr.op, OpCode::Shl | OpCode::Shr) {
            if let Some(amount) = rhs_op.as_const() {
                let lhs = self.value_reg(&lhs_op, SCRATCH_LHS)?;
                let (rd, spill) = self.dest_reg(&dest)?;
                let op = match instr.op {
                    OpCode::Shl => ImmOp::Slli,
                    _ => ImmOp::Srai,
                };
                self.out.push(AsmInstr::BinaryImm(op, rd, lhs, amount));
                self.finish_dest(rd, spill);
                return Ok(());
            }
        }

        let lhs = self.value_reg(&lhs_op, SCRATCH_LHS)?;
        let rhs = self.value_reg(&rhs_op, SCRATCH_RHS)?;
        let (rd, spill) = self.dest_reg(&dest)?;

        match instr.op {
            OpCode::Add => self.out.push(AsmInstr::Binary(BinOp::Add, rd, lhs, rhs)),
            OpCode::Sub => self.out.push(AsmInstr::Binary(BinOp::Sub, rd, lhs, rhs)),
            OpCode::Mul => self.out.push(AsmInstr::Binary(BinOp::Mul, rd, lhs, rhs)),
            OpCode::Div => self.out.push(AsmInstr::Binary(BinOp::Div, rd, lhs, rhs)),
            OpCode::Mod => self.out.push(AsmInstr::Binary(BinOp::Rem, rd, lhs, rhs)),
            OpCode::Shl => self.out.push(AsmInstr::Binary(BinOp::Sll, rd, lhs, rhs)),
            OpCode::Shr => self.out.push(AsmInstr::Binary(BinOp::Sra, rd, lhs, rhs)),
            OpCode::Lt => self.out.push(AsmInstr::Binary(BinOp::Slt, rd, lhs, rhs)),
            OpCode::Gt => self.out.push(AsmInstr::Binary(BinOp::Sgt, rd, lhs, rhs)),
            OpCode::Le => {
                self.out.push(AsmInstr::Binary(BinOp::Sgt, rd, lhs, rhs));
                self.out.push(AsmInstr::Seqz(rd, rd));
            }
            OpCode::Ge => {
                self.out.push(AsmInstr::Binary(BinOp::Slt, rd, lhs, rhs));
                self.out.push(AsmInstr::Seqz(rd, rd));
            }
            OpCode::Eq => {
                self.out.push(AsmInstr::Binary(BinOp::Xor, rd, lhs, rhs));
                self.out.push(AsmInstr::Seqz(rd, rd));
            }
            OpCode::Ne => {
                self.out.push(AsmInstr::Binary(BinOp::Xor, rd, lhs, rhs));
                self.out.push(AsmInstr::Snez(rd, rd));
            }
            OpCode::And => {
                // logical, not bitwise: normalize both sides first
                self.out.push(AsmInstr::Snez(SCRATCH_LHS, lhs));
                self.out.push(AsmInstr::Snez(SCRATCH_RHS, rhs));
                self.out
                    .push(AsmInstr::Binary(BinOp::And, rd, SCRATCH_LHS, SCRATCH_RHS));
            }
            OpCode::Or => {
                self.out.push(AsmInstr::Binary(BinOp::Or, rd, lhs, rhs));
                self.out.push(AsmInstr::Snez(rd, rd));
            }
            _ => return Err(self.malformed("unexpected opcode in selection")),
        }
        self.finish_dest(rd, spill);
        Ok(())
    }

    /// A register the instruction may compute its result in: the value's
    /// own register, or the result scratch with a pending store.
    fn dest_reg(&self, dest: &Operand) -> Result<(Reg, Option<i32>), CompileError> {
        match self.location(dest)? {
            Location::Reg(reg) => Ok((reg, None)),
            Location::Slot(offset) => Ok((SCRATCH_DEST, Some(offset))),
        }
    }

    fn finish_dest(&mut self, rd: Reg, spill: Option<i32>) {
        if let Some(offset) = spill {
            self.out.push(AsmInstr::Sw(rd, offset, Reg::Fp));
        }
    }

    /// Materializes an operand in a register, using `scratch` only when
    /// the value does not already live in one.
    fn value_reg(&mut self, operand: &Operand, scratch: Reg) -> Result<Reg, CompileError> {
        match operand {
            Operand::Const(0) => Ok(Reg::Zero),
            Operand::Const(value) => {
                self.out.push(AsmInstr::Li(scratch, *value));
                Ok(scratch)
            }
            Operand::Label(_) => Err(self.malformed("label used as a value")),
            value => match self.location(value)? {
                Location::Reg(reg) => Ok(reg),
                Location::Slot(offset) => {
                    self.out.push(AsmInstr::Lw(scratch, offset, Reg::Fp));
                    Ok(scratch)
                }
            },
        }
    }

    /// Materializes an operand in a specific register.
    fn load_into(&mut self, target: Reg, operand: &Operand) -> Result<(), CompileError> {
        match operand {
            Operand::Const(value) => {
                self.out.push(AsmInstr::Li(target, *value));
                Ok(())
            }
            Operand::Label(_) => Err(self.malformed("label used as a value")),
            value => match self.location(value)? {
                Location::Reg(reg) => {
                    if reg != target {
                        self.out.push(AsmInstr::Mv(target, reg));
                    }
                    Ok(())
                }
                Location::Slot(offset) => {
                    self.out.push(AsmInstr::Lw(target, offset, Reg::Fp));
                    Ok(())
                }
            },
        }
    }

    fn write_dest(&mut self, dest: &Operand, src: Reg) -> Result<(), CompileError> {
        match self.location(dest)? {
            Location::Reg(reg) => {
                if reg != src {
                    self.out.push(AsmInstr::Mv(reg, src));
                }
                Ok(())
            }
            Location::Slot(offset) => {
                self.out.push(AsmInstr::Sw(src, offset, Reg::Fp));
                Ok(())
            }
        }
    }

    fn location(&self, value: &Operand) -> Result<Location, CompileError> {
        self.layout
            .location(value)
            .ok_or_else(|| self.malformed("value with no allocated location"))
    }

    fn operand<'i>(&self, instr: &'i IrInstr, index: usize) -> Result<&'i Operand, CompileError> {
        instr
            .operands
            .get(index)
            .ok_or_else(|| self.malformed("instruction missing an operand"))
    }

    fn dest_of(&self, instr: &IrInstr) -> Result<Operand, CompileError> {
        instr
            .dest
            .clone()
            .ok_or_else(|| self.malformed("instruction missing a destination"))
    }

    fn label_of(&self, instr: &IrInstr) -> Result<String, CompileError> {
        instr
            .label_name()
            .map(str::to_string)
            .ok_or_else(|| self.malformed("jump without a label"))
    }

    fn malformed(&self, detail: &str) -> CompileError {
        CompileError::MalformedIr {
            detail: format!("{} in '{}'", detail, self.func),
        }
    }
}
