//! Configuration surface for IR generation and code generation.

/// Generation-time options.
#[derive(Debug, Clone, Copy)]
pub struct IrConfig {
    pub enable_optimizations: bool,
    /// Attach the lowered construct kind to each instruction for IR dumps.
    pub generate_debug_info: bool,
    /// Recognized but currently without effect; inlining is outside the
    /// fixed pass set.
    pub inline_small_functions: bool,
}

impl Default for IrConfig {
    fn default() -> IrConfig {
        IrConfig {
            enable_optimizations: false,
            generate_debug_info: false,
            inline_small_functions: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegAllocStrategy {
    Naive,
    LinearScan,
}

/// Codegen-time options.
#[derive(Debug, Clone, Copy)]
pub struct CodegenConfig {
    pub reg_alloc_strategy: RegAllocStrategy,
    pub optimize_stack_layout: bool,
    pub eliminate_dead_stores: bool,
    pub enable_peephole_optimizations: bool,
}

impl Default for CodegenConfig {
    fn default() -> CodegenConfig {
        CodegenConfig {
            reg_alloc_strategy: RegAllocStrategy::Naive,
            optimize_stack_layout: false,
            eliminate_dead_stores: false,
            enable_peephole_optimizations: false,
        }
    }
}

impl CodegenConfig {
    /// The configuration `--opt` selects.
    pub fn optimized() -> CodegenConfig {
        CodegenConfig {
            reg_alloc_strategy: RegAllocStrategy::LinearScan,
            optimize_stack_layout: true,
            eliminate_dead_stores: true,
            enable_peephole_optimizations: true,
        }
    }
}

/// Per-pass toggles for the optimizer pipeline. The relative order of the
/// passes is fixed; disabling any subset still yields a correct program.
#[derive(Debug, Clone, Copy)]
pub struct PassConfig {
    pub constant_folding: bool,
    pub constant_propagation: bool,
    pub dead_code_elimination: bool,
    pub copy_propagation: bool,
    pub control_flow: bool,
    pub common_subexpression_elimination: bool,
    pub algebraic_simplification: bool,
    pub loop_invariant_code_motion: bool,
    pub strength_reduction: bool,
}

impl Default for PassConfig {
    fn default() -> PassConfig {
        PassConfig {
            constant_folding: true,
            constant_propagation: true,
            dead_code_elimination: true,
            copy_propagation: true,
            control_flow: true,
            common_subexpression_elimination: true,
            algebraic_simplification: true,
            loop_invariant_code_motion: true,
            strength_reduction: true,
        }
    }
}

impl PassConfig {
    pub fn none() -> PassConfig {
        PassConfig {
            constant_folding: false,
            constant_propagation: false,
            dead_code_elimination: false,
            copy_propagation: false,
            control_flow: false,
            common_subexpression_elimination: false,
            algebraic_simplification: false,
            loop_invariant_code_motion: false,
            strength_reduction: false,
        }
    }
}
