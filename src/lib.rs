//! Middle and back end for a small imperative language.
//!
//! The front end (lexing, parsing, semantic checking) lives elsewhere;
//! this crate takes a validated AST, lowers it to three-address IR, runs
//! a fixed pipeline of optimization passes over per-function CFGs, and
//! emits RV32IM assembly.

pub mod ast;
pub mod cfg;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod ir;
pub mod optimize;

use crate::config::{CodegenConfig, IrConfig, PassConfig};
use crate::errors::CompileError;
use crate::ir::{IrGenerator, Program};

/// Lowers a unit to IR, optimized when the configuration asks for it.
pub fn lower(
    unit: &ast::CompUnit,
    config: &IrConfig,
    passes: &PassConfig,
) -> Result<Program, CompileError> {
    let mut generator = IrGenerator::new(*config);
    let program = generator.generate(unit)?;
    if config.enable_optimizations {
        optimize::optimize(program, passes)
    } else {
        Ok(program)
    }
}

/// Full pipeline: AST in, assembly text out. Nothing is produced on
/// error; generation and CFG failures abort the whole unit.
pub fn compile(
    unit: &ast::CompUnit,
    config: &IrConfig,
    passes: &PassConfig,
    codegen_config: &CodegenConfig,
) -> Result<String, CompileError> {
    let program = lower(unit, config, passes)?;
    codegen::generate_assembly(&program, codegen_config)
}
