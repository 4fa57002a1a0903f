use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use minic::config::{CodegenConfig, IrConfig, PassConfig};
use minic::{ast, errors};

/// Compiles a validated AST (JSON) to RV32IM assembly.
#[derive(Parser)]
#[command(name = "minic", version)]
struct Args {
    /// Validated AST, serialized as JSON by the front end
    input: PathBuf,

    /// Run the optimization pipeline and optimized code generation
    #[arg(long)]
    opt: bool,

    /// Print the IR instead of assembly
    #[arg(long)]
    emit_ir: bool,

    /// Annotate the IR dump with the lowered source constructs
    #[arg(long)]
    debug_info: bool,

    /// Output path; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run() {
        errors::report(&format!("{:#}", err));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let unit: ast::CompUnit =
        serde_json::from_str(&text).context("input is not a valid serialized AST")?;

    let ir_config = IrConfig {
        enable_optimizations: args.opt,
        generate_debug_info: args.debug_info,
        inline_small_functions: false,
    };
    let program = minic::lower(&unit, &ir_config, &PassConfig::default())?;

    let output = if args.emit_ir {
        program.to_string()
    } else {
        let codegen_config = if args.opt {
            CodegenConfig::optimized()
        } else {
            CodegenConfig::default()
        };
        minic::codegen::generate_assembly(&program, &codegen_config)?
    };

    match &args.output {
        Some(path) => fs::write(path, output)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => print!("{}", output),
    }
    Ok(())
}
