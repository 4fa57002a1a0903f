use std::fmt;

/// A value as the IR sees it. Constants compare by value and are
/// interchangeable; temporaries compare by id and never are, even across
/// functions with equal numeric ids (the ids are unit-wide and never
/// reused).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Const(i32),
    Temp(u32),
    /// Scope-qualified source variable, e.g. `x.s3`.
    Var(String),
    Label(String),
}

impl Operand {
    pub fn is_const(&self) -> bool {
        matches!(self, Operand::Const(_))
    }

    pub fn as_const(&self) -> Option<i32> {
        match self {
            Operand::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// Temporaries and variables hold storage; constants and labels do not.
    pub fn is_value(&self) -> bool {
        matches!(self, Operand::Temp(_) | Operand::Var(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(v) => write!(f, "{}", v),
            Operand::Temp(id) => write!(f, "t{}", id),
            Operand::Var(name) => write!(f, "{}", name),
            Operand::Label(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Not,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Shl,
    Shr,
    Goto,
    IfGoto,
    Label,
    Param,
    Call,
    Assign,
    FunctionBegin,
    FunctionEnd,
    Return,
}

impl OpCode {
    /// Side-effect-free computations: safe to value-number, hoist, or
    /// delete when the result is unused.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Neg
                | OpCode::And
                | OpCode::Or
                | OpCode::Not
                | OpCode::Lt
                | OpCode::Gt
                | OpCode::Le
                | OpCode::Ge
                | OpCode::Eq
                | OpCode::Ne
                | OpCode::Shl
                | OpCode::Shr
                | OpCode::Assign
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::And
                | OpCode::Or
                | OpCode::Lt
                | OpCode::Gt
                | OpCode::Le
                | OpCode::Ge
                | OpCode::Eq
                | OpCode::Ne
                | OpCode::Shl
                | OpCode::Shr
        )
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, OpCode::Neg | OpCode::Not)
    }

    /// Instructions that end a basic block.
    pub fn is_control_transfer(&self) -> bool {
        matches!(
            self,
            OpCode::Goto | OpCode::IfGoto | OpCode::Return | OpCode::FunctionEnd
        )
    }

    fn name(&self) -> &'static str {
        match self {
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Neg => "NEG",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Not => "NOT",
            OpCode::Lt => "LT",
            OpCode::Gt => "GT",
            OpCode::Le => "LE",
            OpCode::Ge => "GE",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::Goto => "GOTO",
            OpCode::IfGoto => "IF_GOTO",
            OpCode::Label => "LABEL",
            OpCode::Param => "PARAM",
            OpCode::Call => "CALL",
            OpCode::Assign => "ASSIGN",
            OpCode::FunctionBegin => "FUNCTION_BEGIN",
            OpCode::FunctionEnd => "FUNCTION_END",
            OpCode::Return => "RETURN",
        }
    }
}

/// One three-address instruction: at most one destination, source
/// operands in evaluation order. `source` is a debug annotation naming
/// the AST construct the instruction was lowered from; it is only
/// populated when `generate_debug_info` is set and never carries
/// semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct IrInstr {
    pub op: OpCode,
    pub dest: Option<Operand>,
    pub operands: Vec<Operand>,
    pub source: Option<String>,
}

impl IrInstr {
    pub fn new(op: OpCode, dest: Option<Operand>, operands: Vec<Operand>) -> IrInstr {
        IrInstr {
            op,
            dest,
            operands,
            source: None,
        }
    }

    /// The jump target of a GOTO/IF_GOTO, or the name of a LABEL.
    pub fn label_name(&self) -> Option<&str> {
        match self.op {
            OpCode::Goto | OpCode::Label => match self.operands.first() {
                Some(Operand::Label(name)) => Some(name),
                _ => None,
            },
            OpCode::IfGoto => match self.operands.get(1) {
                Some(Operand::Label(name)) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// Value operands read by this instruction (labels and callee names
    /// excluded).
    pub fn used_values(&self) -> Vec<&Operand> {
        self.operands.iter().filter(|op| op.is_value()).collect()
    }
}

impl fmt::Display for IrInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            OpCode::Label => write!(f, "{}:", self.operands[0]),
            OpCode::FunctionBegin | OpCode::FunctionEnd => {
                write!(f, "{} {}", self.op.name(), self.operands[0])
            }
            _ => {
                write!(f, "    {}", self.op.name())?;
                if let Some(dest) = &self.dest {
                    write!(f, " {} <-", dest)?;
                }
                for operand in &self.operands {
                    write!(f, " {}", operand)?;
                }
                if let Some(src) = &self.source {
                    write!(f, "    ; {}", src)?;
                }
                Ok(())
            }
        }
    }
}

/// The whole unit's instructions in program order, each function
/// delimited by FUNCTION_BEGIN/FUNCTION_END.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub instructions: Vec<IrInstr>,
}

impl Program {
    /// Splits the flat sequence into per-function bodies, keeping the
    /// framing instructions with each body. Fails on unbalanced framing.
    pub fn functions(&self) -> Result<Vec<FunctionBody>, crate::errors::CompileError> {
        let mut functions = Vec::new();
        let mut current: Option<FunctionBody> = None;

        for instr in &self.instructions {
            match instr.op {
                OpCode::FunctionBegin => {
                    if current.is_some() {
                        return Err(crate::errors::CompileError::MalformedIr {
                            detail: "FUNCTION_BEGIN inside an open function".to_string(),
                        });
                    }
                    let name = match instr.operands.first() {
                        Some(Operand::Label(name)) => name.clone(),
                        _ => {
                            return Err(crate::errors::CompileError::MalformedIr {
                                detail: "FUNCTION_BEGIN without a name".to_string(),
                            })
                        }
                    };
                    current = Some(FunctionBody {
                        name,
                        instructions: vec![instr.clone()],
                    });
                }
                OpCode::FunctionEnd => match current.take() {
                    Some(mut body) => {
                        body.instructions.push(instr.clone());
                        functions.push(body);
                    }
                    None => {
                        return Err(crate::errors::CompileError::MalformedIr {
                            detail: "FUNCTION_END without a matching begin".to_string(),
                        })
                    }
                },
                _ => match current.as_mut() {
                    Some(body) => body.instructions.push(instr.clone()),
                    None => {
                        return Err(crate::errors::CompileError::MalformedIr {
                            detail: format!("instruction outside any function: {}", instr),
                        })
                    }
                },
            }
        }

        if current.is_some() {
            return Err(crate::errors::CompileError::MalformedIr {
                detail: "unterminated function at end of unit".to_string(),
            });
        }

        Ok(functions)
    }

    pub fn from_functions(functions: Vec<FunctionBody>) -> Program {
        let mut instructions = Vec::new();
        for func in functions {
            instructions.extend(func.instructions);
        }
        Program { instructions }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            writeln!(f, "{}", instr)?;
        }
        Ok(())
    }
}

/// One function's slice of the unit, framing included.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub name: String,
    pub instructions: Vec<IrInstr>,
}
