use std::collections::{HashMap, HashSet};

use crate::ast;
use crate::config::IrConfig;
use crate::errors::CompileError;
use crate::ir::definition::{IrInstr, OpCode, Operand, Program};

/// Lowers the validated AST into the flat three-address instruction
/// sequence, one FUNCTION_BEGIN/FUNCTION_END region per function.
///
/// Scoping is handled with a stack of name->operand frames; a variable's
/// IR identity carries a unique scope id so two source variables with the
/// same name in disjoint or nested scopes never alias. Temp and label
/// counters are unit-wide and never reset between functions.
pub struct IrGenerator {
    config: IrConfig,
    instructions: Vec<IrInstr>,
    temp_count: u32,
    label_count: u32,
    scope_count: u32,
    scopes: Vec<HashMap<String, Operand>>,
    /// (break target, continue target) per enclosing loop, innermost last.
    loop_labels: Vec<(String, String)>,
    used_functions: HashSet<String>,
    known_functions: HashMap<String, bool>,
    current_function: String,
    current_returns_value: bool,
}

impl IrGenerator {
    pub fn new(config: IrConfig) -> IrGenerator {
        IrGenerator {
            config,
            instructions: Vec::new(),
            temp_count: 0,
            label_count: 0,
            scope_count: 0,
            scopes: Vec::new(),
            loop_labels: Vec::new(),
            used_functions: HashSet::new(),
            known_functions: HashMap::new(),
            current_function: String::new(),
            current_returns_value: false,
        }
    }

    /// Call targets seen during generation, for dead-function elimination
    /// downstream.
    pub fn used_functions(&self) -> &HashSet<String> {
        &self.used_functions
    }

    pub fn generate(&mut self, unit: &ast::CompUnit) -> Result<Program, CompileError> {
        for func in &unit.functions {
            self.known_functions
                .insert(func.name.clone(), func.returns_value);
        }

        for func in &unit.functions {
            self.emit_function(func)?;
        }

        Ok(Program {
            instructions: std::mem::take(&mut self.instructions),
        })
    }

    fn emit_function(&mut self, func: &ast::FunctionDef) -> Result<(), CompileError> {
        self.current_function = func.name.clone();
        self.current_returns_value = func.returns_value;

        self.enter_scope();

        let mut begin_operands = vec![Operand::Label(func.name.clone())];
        for param in &func.params {
            let operand = self.define_variable(param);
            begin_operands.push(operand);
        }
        self.push(IrInstr::new(OpCode::FunctionBegin, None, begin_operands));

        for stmt in &func.body {
            self.emit_statement(stmt)?;
        }

        if func.returns_value && !all_paths_return(&func.body) {
            if func.name == "main" {
                // main without a trailing return yields 0
                self.push(IrInstr::new(OpCode::Return, None, vec![Operand::Const(0)]));
            } else {
                return Err(CompileError::MissingReturn {
                    function: func.name.clone(),
                });
            }
        }

        self.push(IrInstr::new(
            OpCode::FunctionEnd,
            None,
            vec![Operand::Label(func.name.clone())],
        ));

        self.exit_scope();
        Ok(())
    }

    fn emit_statement(&mut self, stmt: &ast::Stmt) -> Result<(), CompileError> {
        match stmt {
            ast::Stmt::Expr(expr) => {
                // value discarded; a bare void call is legal here
                self.emit_expression(expr, true)?;
                Ok(())
            }
            ast::Stmt::VarDecl { name, init } => {
                let init_val = match init {
                    Some(expr) => Some(self.emit_expression(expr, false)?),
                    None => None,
                };
                let var = self.define_variable(name);
                if let Some(val) = init_val {
                    let mut instr = IrInstr::new(OpCode::Assign, Some(var), vec![val]);
                    self.annotate(&mut instr, "decl");
                    self.push(instr);
                }
                Ok(())
            }
            ast::Stmt::Assign { name, value } => {
                let var = match self.find_variable(name) {
                    Some(var) => var,
                    None => {
                        return Err(CompileError::AssignToUndeclared {
                            function: self.current_function.clone(),
                            name: name.clone(),
                        })
                    }
                };
                let val = self.emit_expression(value, false)?;
                let mut instr = IrInstr::new(OpCode::Assign, Some(var), vec![val]);
                self.annotate(&mut instr, "assign");
                self.push(instr);
                Ok(())
            }
            ast::Stmt::Block(stmts) => {
                self.enter_scope();
                for stmt in stmts {
                    self.emit_statement(stmt)?;
                }
                self.exit_scope();
                Ok(())
            }
            ast::Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let cond_val = self.emit_expression(cond, false)?;
                let not_cond = self.emit_unary(OpCode::Not, cond_val);

                match otherwise {
                    None => {
                        let end_label = self.make_label();
                        self.push_branch(not_cond, &end_label, "if");
                        self.emit_statement(then)?;
                        self.push_label(&end_label);
                    }
                    Some(else_stmt) => {
                        let else_label = self.make_label();
                        let end_label = self.make_label();
                        self.push_branch(not_cond, &else_label, "if");
                        self.emit_statement(then)?;
                        self.push_goto(&end_label);
                        self.push_label(&else_label);
                        self.emit_statement(else_stmt)?;
                        self.push_label(&end_label);
                    }
                }
                Ok(())
            }
            ast::Stmt::While { cond, body } => {
                let cond_label = self.make_label();
                let end_label = self.make_label();

                self.push_label(&cond_label);
                let cond_val = self.emit_expression(cond, false)?;
                let not_cond = self.emit_unary(OpCode::Not, cond_val);
                self.push_branch(not_cond, &end_label, "while");

                self.loop_labels
                    .push((end_label.clone(), cond_label.clone()));
                self.emit_statement(body)?;
                self.loop_labels.pop();

                self.push_goto(&cond_label);
                self.push_label(&end_label);
                Ok(())
            }
            ast::Stmt::Break => match self.loop_labels.last() {
                Some((break_label, _)) => {
                    let label = break_label.clone();
                    self.push_goto(&label);
                    Ok(())
                }
                None => Err(CompileError::BreakOutsideLoop {
                    function: self.current_function.clone(),
                }),
            },
            ast::Stmt::Continue => match self.loop_labels.last() {
                Some((_, continue_label)) => {
                    let label = continue_label.clone();
                    self.push_goto(&label);
                    Ok(())
                }
                None => Err(CompileError::ContinueOutsideLoop {
                    function: self.current_function.clone(),
                }),
            },
            ast::Stmt::Return(expr) => {
                match (expr, self.current_returns_value) {
                    (Some(_), false) => Err(CompileError::ReturnValueInVoidFunction {
                        function: self.current_function.clone(),
                    }),
                    (None, true) => Err(CompileError::MissingReturnValue {
                        function: self.current_function.clone(),
                    }),
                    (Some(expr), true) => {
                        let val = self.emit_expression(expr, false)?;
                        self.push(IrInstr::new(OpCode::Return, None, vec![val]));
                        Ok(())
                    }
                    (None, false) => {
                        self.push(IrInstr::new(OpCode::Return, None, vec![]));
                        Ok(())
                    }
                }
            }
        }
    }

    /// Translates one expression; the returned operand holds its value.
    /// `discard` marks statement position, where a void call is allowed.
    fn emit_expression(
        &mut self,
        expr: &ast::Expr,
        discard: bool,
    ) -> Result<Operand, CompileError> {
        match expr {
            ast::Expr::Number(value) => Ok(Operand::Const(*value)),
            ast::Expr::Variable(name) => match self.find_variable(name) {
                Some(var) => Ok(var),
                None => Err(CompileError::UnboundVariable {
                    function: self.current_function.clone(),
                    name: name.clone(),
                }),
            },
            ast::Expr::Unary { op, operand } => {
                let val = self.emit_expression(operand, false)?;
                let opcode = match op {
                    ast::UnaryOp::Neg => OpCode::Neg,
                    ast::UnaryOp::Not => OpCode::Not,
                };
                Ok(self.emit_unary(opcode, val))
            }
            ast::Expr::Binary { op, lhs, rhs } => match op {
                ast::BinaryOp::And => self.emit_short_circuit(lhs, rhs, true),
                ast::BinaryOp::Or => self.emit_short_circuit(lhs, rhs, false),
                _ => {
                    let lhs_val = self.emit_expression(lhs, false)?;
                    let rhs_val = self.emit_expression(rhs, false)?;
                    let dest = self.make_temp();
                    self.push(IrInstr::new(
                        convert_binop(*op),
                        Some(dest.clone()),
                        vec![lhs_val, rhs_val],
                    ));
                    Ok(dest)
                }
            },
            ast::Expr::Call { callee, args } => self.emit_call(callee, args, discard),
        }
    }

    /// `&&`/`||` lower to an explicit branch/label sequence so the right
    /// operand only evaluates when required. This holds even when the left
    /// operand is a literal; collapsing constant conditions is the
    /// constant folding pass's business, not the generator's.
    fn emit_short_circuit(
        &mut self,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        is_and: bool,
    ) -> Result<Operand, CompileError> {
        let dest = self.make_temp();
        let short_label = self.make_label();
        let end_label = self.make_label();

        let lhs_val = self.emit_expression(lhs, false)?;
        if is_and {
            // left false: skip the right operand entirely
            let not_lhs = self.emit_unary(OpCode::Not, lhs_val);
            self.push_branch(not_lhs, &short_label, "and");
        } else {
            // left true: skip the right operand entirely
            self.push_branch(lhs_val, &short_label, "or");
        }

        let rhs_val = self.emit_expression(rhs, false)?;
        if is_and {
            let not_rhs = self.emit_unary(OpCode::Not, rhs_val);
            self.push_branch(not_rhs, &short_label, "and");
        } else {
            self.push_branch(rhs_val, &short_label, "or");
        }

        let (through, shorted) = if is_and { (1, 0) } else { (0, 1) };
        self.push(IrInstr::new(
            OpCode::Assign,
            Some(dest.clone()),
            vec![Operand::Const(through)],
        ));
        self.push_goto(&end_label);
        self.push_label(&short_label);
        self.push(IrInstr::new(
            OpCode::Assign,
            Some(dest.clone()),
            vec![Operand::Const(shorted)],
        ));
        self.push_label(&end_label);

        Ok(dest)
    }

    fn emit_call(
        &mut self,
        callee: &str,
        args: &[ast::Expr],
        discard: bool,
    ) -> Result<Operand, CompileError> {
        let returns_value = match self.known_functions.get(callee) {
            Some(returns_value) => *returns_value,
            None => {
                return Err(CompileError::UnknownFunction {
                    function: self.current_function.clone(),
                    callee: callee.to_string(),
                })
            }
        };

        if !returns_value && !discard {
            return Err(CompileError::VoidValueUse {
                function: self.current_function.clone(),
                callee: callee.to_string(),
            });
        }

        // arguments evaluate left to right, then PARAMs go out
        // immediately before the CALL
        let mut arg_vals = Vec::with_capacity(args.len());
        for arg in args {
            arg_vals.push(self.emit_expression(arg, false)?);
        }
        for val in &arg_vals {
            self.push(IrInstr::new(OpCode::Param, None, vec![val.clone()]));
        }

        self.used_functions.insert(callee.to_string());

        let dest = if returns_value {
            Some(self.make_temp())
        } else {
            None
        };
        self.push(IrInstr::new(
            OpCode::Call,
            dest.clone(),
            vec![
                Operand::Label(callee.to_string()),
                Operand::Const(args.len() as i32),
            ],
        ));

        Ok(dest.unwrap_or(Operand::Const(0)))
    }

    fn emit_unary(&mut self, op: OpCode, val: Operand) -> Operand {
        let dest = self.make_temp();
        self.push(IrInstr::new(op, Some(dest.clone()), vec![val]));
        dest
    }

    fn make_temp(&mut self) -> Operand {
        let temp = Operand::Temp(self.temp_count);
        self.temp_count += 1;
        temp
    }

    fn make_label(&mut self) -> String {
        let label = format!("L{}", self.label_count);
        self.label_count += 1;
        label
    }

    fn push(&mut self, instr: IrInstr) {
        self.instructions.push(instr);
    }

    fn push_label(&mut self, name: &str) {
        self.push(IrInstr::new(
            OpCode::Label,
            None,
            vec![Operand::Label(name.to_string())],
        ));
    }

    fn push_goto(&mut self, target: &str) {
        self.push(IrInstr::new(
            OpCode::Goto,
            None,
            vec![Operand::Label(target.to_string())],
        ));
    }

    fn push_branch(&mut self, cond: Operand, target: &str, construct: &str) {
        let mut instr = IrInstr::new(
            OpCode::IfGoto,
            None,
            vec![cond, Operand::Label(target.to_string())],
        );
        self.annotate(&mut instr, construct);
        self.push(instr);
    }

    fn annotate(&self, instr: &mut IrInstr, construct: &str) {
        if self.config.generate_debug_info {
            instr.source = Some(format!("{}:{}", self.current_function, construct));
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    /// Binds `name` in the innermost frame under a fresh scope-qualified
    /// identity, shadowing any outer binding.
    fn define_variable(&mut self, name: &str) -> Operand {
        let operand = Operand::Var(format!("{}.s{}", name, self.scope_count));
        self.scope_count += 1;
        self.scopes
            .last_mut()
            .expect("scope stack is never empty inside a function")
            .insert(name.to_string(), operand.clone());
        operand
    }

    fn find_variable(&self, name: &str) -> Option<Operand> {
        for frame in self.scopes.iter().rev() {
            if let Some(operand) = frame.get(name) {
                return Some(operand.clone());
            }
        }
        None
    }
}

fn convert_binop(op: ast::BinaryOp) -> OpCode {
    match op {
        ast::BinaryOp::Add => OpCode::Add,
        ast::BinaryOp::Sub => OpCode::Sub,
        ast::BinaryOp::Mul => OpCode::Mul,
        ast::BinaryOp::Div => OpCode::Div,
        ast::BinaryOp::Mod => OpCode::Mod,
        ast::BinaryOp::Lt => OpCode::Lt,
        ast::BinaryOp::Gt => OpCode::Gt,
        ast::BinaryOp::Le => OpCode::Le,
        ast::BinaryOp::Ge => OpCode::Ge,
        ast::BinaryOp::Eq => OpCode::Eq,
        ast::BinaryOp::Ne => OpCode::Ne,
        ast::BinaryOp::And | ast::BinaryOp::Or => {
            unreachable!("short-circuit operators lower to branches")
        }
    }
}

/// Conservative all-paths-return check: a statement list guarantees a
/// return if any statement in it does; `if` needs both branches, `while`
/// never counts (its condition may be false on entry).
fn all_paths_return(stmts: &[ast::Stmt]) -> bool {
    stmts.iter().any(stmt_returns)
}

fn stmt_returns(stmt: &ast::Stmt) -> bool {
    match stmt {
        ast::Stmt::Return(_) => true,
        ast::Stmt::Block(stmts) => all_paths_return(stmts),
        ast::Stmt::If {
            then, otherwise, ..
        } => match otherwise {
            Some(else_stmt) => stmt_returns(then) && stmt_returns(else_stmt),
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, CompUnit, Expr, FunctionDef, Stmt};

    fn int_function(name: &str, body: Vec<Stmt>) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            returns_value: true,
            params: vec![],
            body,
        }
    }

    fn generate(unit: &CompUnit) -> Result<Program, CompileError> {
        IrGenerator::new(IrConfig::default()).generate(unit)
    }

    fn ops(program: &Program) -> Vec<OpCode> {
        program.instructions.iter().map(|i| i.op).collect()
    }

    #[test]
    fn return_expression_produces_framed_function() {
        let unit = CompUnit {
            functions: vec![int_function(
                "main",
                vec![Stmt::Return(Some(Expr::Number(3)))],
            )],
        };
        let program = generate(&unit).unwrap();
        assert_eq!(
            ops(&program),
            vec![OpCode::FunctionBegin, OpCode::Return, OpCode::FunctionEnd]
        );
    }

    #[test]
    fn short_circuit_and_branches_around_right_operand() {
        // 1 && g() must still lower to branches; only the folding pass may
        // collapse constant conditions
        let unit = CompUnit {
            functions: vec![
                int_function("g", vec![Stmt::Return(Some(Expr::Number(1)))]),
                int_function(
                    "main",
                    vec![Stmt::Return(Some(Expr::Binary {
                        op: BinaryOp::And,
                        lhs: Box::new(Expr::Number(1)),
                        rhs: Box::new(Expr::Call {
                            callee: "g".to_string(),
                            args: vec![],
                        }),
                    }))],
                ),
            ],
        };
        let program = generate(&unit).unwrap();
        let body = ops(&program);
        assert!(body.contains(&OpCode::IfGoto));
        assert!(body.contains(&OpCode::Call));
        // no eager bitwise AND
        assert!(!body.contains(&OpCode::And));
    }

    #[test]
    fn shadowed_variables_get_distinct_identities() {
        let unit = CompUnit {
            functions: vec![int_function(
                "main",
                vec![
                    Stmt::VarDecl {
                        name: "x".to_string(),
                        init: Some(Expr::Number(1)),
                    },
                    Stmt::Block(vec![Stmt::VarDecl {
                        name: "x".to_string(),
                        init: Some(Expr::Number(2)),
                    }]),
                    Stmt::Return(Some(Expr::Variable("x".to_string()))),
                ],
            )],
        };
        let program = generate(&unit).unwrap();
        let assigns: Vec<&Operand> = program
            .instructions
            .iter()
            .filter(|i| i.op == OpCode::Assign)
            .map(|i| i.dest.as_ref().unwrap())
            .collect();
        assert_eq!(assigns.len(), 2);
        assert_ne!(assigns[0], assigns[1]);
        // the return reads the outer binding
        let ret = program
            .instructions
            .iter()
            .find(|i| i.op == OpCode::Return)
            .unwrap();
        assert_eq!(ret.operands[0], *assigns[0]);
    }

    #[test]
    fn break_outside_loop_is_a_structural_error() {
        let unit = CompUnit {
            functions: vec![int_function(
                "main",
                vec![Stmt::Break, Stmt::Return(Some(Expr::Number(0)))],
            )],
        };
        assert_eq!(
            generate(&unit),
            Err(CompileError::BreakOutsideLoop {
                function: "main".to_string()
            })
        );
    }

    #[test]
    fn assignment_to_undeclared_variable_fails() {
        let unit = CompUnit {
            functions: vec![int_function(
                "main",
                vec![
                    Stmt::Assign {
                        name: "y".to_string(),
                        value: Expr::Number(1),
                    },
                    Stmt::Return(Some(Expr::Number(0))),
                ],
            )],
        };
        assert!(matches!(
            generate(&unit),
            Err(CompileError::AssignToUndeclared { .. })
        ));
    }

    #[test]
    fn call_to_unknown_function_fails() {
        let unit = CompUnit {
            functions: vec![int_function(
                "main",
                vec![Stmt::Return(Some(Expr::Call {
                    callee: "missing".to_string(),
                    args: vec![],
                }))],
            )],
        };
        assert!(matches!(
            generate(&unit),
            Err(CompileError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn params_precede_call_in_argument_order() {
        let unit = CompUnit {
            functions: vec![
                FunctionDef {
                    name: "add".to_string(),
                    returns_value: true,
                    params: vec!["a".to_string(), "b".to_string()],
                    body: vec![Stmt::Return(Some(Expr::Binary {
                        op: BinaryOp::Add,
                        lhs: Box::new(Expr::Variable("a".to_string())),
                        rhs: Box::new(Expr::Variable("b".to_string())),
                    }))],
                },
                int_function(
                    "main",
                    vec![Stmt::Return(Some(Expr::Call {
                        callee: "add".to_string(),
                        args: vec![Expr::Number(1), Expr::Number(2)],
                    }))],
                ),
            ],
        };
        let program = generate(&unit).unwrap();
        let call_pos = program
            .instructions
            .iter()
            .position(|i| i.op == OpCode::Call)
            .unwrap();
        assert_eq!(program.instructions[call_pos - 2].op, OpCode::Param);
        assert_eq!(program.instructions[call_pos - 1].op, OpCode::Param);
        assert_eq!(
            program.instructions[call_pos - 2].operands[0],
            Operand::Const(1)
        );
        assert_eq!(
            program.instructions[call_pos - 1].operands[0],
            Operand::Const(2)
        );
    }

    #[test]
    fn main_without_return_gets_implicit_zero() {
        let unit = CompUnit {
            functions: vec![int_function("main", vec![])],
        };
        let program = generate(&unit).unwrap();
        let ret = program
            .instructions
            .iter()
            .find(|i| i.op == OpCode::Return)
            .unwrap();
        assert_eq!(ret.operands[0], Operand::Const(0));
    }

    #[test]
    fn int_function_without_return_on_all_paths_fails() {
        let unit = CompUnit {
            functions: vec![
                int_function("f", vec![]),
                int_function("main", vec![Stmt::Return(Some(Expr::Number(0)))]),
            ],
        };
        assert_eq!(
            generate(&unit),
            Err(CompileError::MissingReturn {
                function: "f".to_string()
            })
        );
    }
}
