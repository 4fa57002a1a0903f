use color_print::cformat;
use thiserror::Error;

/// Errors raised while lowering the AST or maintaining the CFG.
///
/// Structural errors indicate either a defect in the upstream semantic
/// checker or an unsupported construct; they abort the whole unit, since
/// later instructions assume a consistent operand set. CFG errors are
/// internal consistency failures and carry enough context to tell which
/// pass introduced them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("in function '{function}': use of unbound variable '{name}'")]
    UnboundVariable { function: String, name: String },

    #[error("in function '{function}': assignment to undeclared variable '{name}'")]
    AssignToUndeclared { function: String, name: String },

    #[error("in function '{function}': 'break' outside of a loop")]
    BreakOutsideLoop { function: String },

    #[error("in function '{function}': 'continue' outside of a loop")]
    ContinueOutsideLoop { function: String },

    #[error("in function '{function}': call to unknown function '{callee}'")]
    UnknownFunction { function: String, callee: String },

    #[error("in function '{function}': void function '{callee}' used as a value")]
    VoidValueUse { function: String, callee: String },

    #[error("in function '{function}': returning a value from a void function")]
    ReturnValueInVoidFunction { function: String },

    #[error("in function '{function}': 'return' without a value in a function returning int")]
    MissingReturnValue { function: String },

    #[error("in function '{function}': control may reach the end without returning a value")]
    MissingReturn { function: String },

    #[error("in function '{function}': division or modulo by constant zero")]
    DivisionByZero { function: String },

    #[error("in function '{function}': CFG invariant violated at block {block}: {detail}")]
    CfgInvariant {
        function: String,
        block: usize,
        detail: String,
    },

    #[error("malformed IR: {detail}")]
    MalformedIr { detail: String },
}

pub fn report(message: &str) {
    eprintln!("{}", cformat!("<red!>error:</> <bold>{}</>", message));
}

#[allow(dead_code)]
pub fn warn(message: &str) {
    eprintln!("{}", cformat!("<yellow!>warning:</> <bold>{}</>", message));
}
