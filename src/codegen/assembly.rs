use std::fmt;

/// RV32 registers the generator touches. `t0..t2` are scratch for
/// operand staging, `a0..a7` carry arguments and the return value, and
/// `s1..s11` form the allocatable callee-saved pool; `s0` is the frame
/// pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Zero,
    Ra,
    Sp,
    Fp,
    A(u8),
    S(u8),
    T(u8),
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Zero => write!(f, "zero"),
            Reg::Ra => write!(f, "ra"),
            Reg::Sp => write!(f, "sp"),
            Reg::Fp => write!(f, "s0"),
            Reg::A(n) => write!(f, "a{}", n),
            Reg::S(n) => write!(f, "s{}", n),
            Reg::T(n) => write!(f, "t{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Slt,
    Sgt,
    Sll,
    Sra,
}

impl BinOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Slt => "slt",
            BinOp::Sgt => "sgt",
            BinOp::Sll => "sll",
            BinOp::Sra => "sra",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Addi,
    Slli,
    Srai,
}

impl ImmOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            ImmOp::Addi => "addi",
            ImmOp::Slli => "slli",
            ImmOp::Srai => "srai",
        }
    }
}

/// One abstract RV32IM instruction. Loads and stores are `(reg, offset,
/// base)`; labels are bare names, rendered with a leading dot by the
/// emitter.
#[derive(Debug, Clone, PartialEq)]
pub enum AsmInstr {
    Li(Reg, i32),
    Mv(Reg, Reg),
    Binary(BinOp, Reg, Reg, Reg),
    BinaryImm(ImmOp, Reg, Reg, i32),
    Neg(Reg, Reg),
    Seqz(Reg, Reg),
    Snez(Reg, Reg),
    Lw(Reg, i32, Reg),
    Sw(Reg, i32, Reg),
    Label(String),
    J(String),
    Bnez(Reg, String),
    Beqz(Reg, String),
    Call(String),
    Ret,
}

impl AsmInstr {
    /// Whether control can leave the straight-line run at this
    /// instruction; frame-slot tracking resets here.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self,
            AsmInstr::Label(_)
                | AsmInstr::J(_)
                | AsmInstr::Bnez(..)
                | AsmInstr::Beqz(..)
                | AsmInstr::Call(_)
                | AsmInstr::Ret
        )
    }
}

#[derive(Debug, Clone)]
pub struct AsmFunction {
    pub name: String,
    pub body: Vec<AsmInstr>,
    pub frame_size: i32,
    /// Callee-saved registers the body writes, saved in the prologue.
    pub saved: Vec<Reg>,
}

#[derive(Debug, Clone)]
pub struct AsmProgram {
    pub functions: Vec<AsmFunction>,
}
