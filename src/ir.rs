pub mod definition;
pub mod generator;

pub use definition::{FunctionBody, IrInstr, OpCode, Operand, Program};
pub use generator::IrGenerator;
