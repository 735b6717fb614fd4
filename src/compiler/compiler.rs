// Foxely Compiler
// Compiles AST to bytecode

use super::chunk::{Chunk, Constant, FunctionConstant, UpvalueInfo};
use super::opcode::OpCode;
use crate::ast::*;
use crate::error::{FoxError, FoxResult, Span};
use rustc_hash::FxHashMap;

const MAX_LOCALS: usize = u16::MAX as usize + 1;
const MAX_UPVALUES: usize = u16::MAX as usize + 1;
const MAX_CONSTANTS: usize = u16::MAX as usize + 1;

/// Local variable information
#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: usize,
    initialized: bool,
    is_captured: bool, // true if captured by a closure
}

/// Upvalue reference during compilation
#[derive(Debug, Clone, Copy, PartialEq)]
struct Upvalue {
    index: usize,   // Index in enclosing function's locals or upvalues
    is_local: bool, // true = capturing a local, false = capturing an upvalue
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// Compiler state for function scope
struct FunctionScope {
    name: String,
    kind: FunctionKind,
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<Upvalue>,
    scope_depth: usize,
    /// Name constants already in the pool
    identifiers: FxHashMap<String, u16>,
}

impl FunctionScope {
    fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        // Slot 0 holds the receiver in methods and the callee otherwise
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Script | FunctionKind::Function => "",
        };

        Self {
            name: name.into(),
            kind,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: slot_zero.to_string(),
                depth: 0,
                initialized: true,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            identifiers: FxHashMap::default(),
        }
    }
}

/// Per-class compile state, used to validate `this` and `super`
struct ClassScope {
    has_superclass: bool,
}

/// Where a named variable lives
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Local(u16),
    Upvalue(u16),
    Global(u16),
}

/// The Foxely bytecode compiler
pub struct Compiler {
    scopes: Vec<FunctionScope>,
    classes: Vec<ClassScope>,
    file: String,
    source: String,
}

impl Compiler {
    pub fn new(file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            scopes: Vec::new(),
            classes: Vec::new(),
            file: file.into(),
            source: source.into(),
        }
    }

    /// Compile a program into the top-level script function
    pub fn compile(&mut self, program: &Program) -> FoxResult<FunctionConstant> {
        self.scopes = vec![FunctionScope::new("", FunctionKind::Script)];
        self.classes.clear();

        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }

        let end = program.statements.last().map(|s| s.span()).unwrap_or_default();
        self.emit_op(OpCode::EndModule, end);
        self.emit_op(OpCode::Nil, end);
        self.emit_op(OpCode::Return, end);

        let scope = self.pop_scope()?;
        Ok(FunctionConstant {
            name: scope.name,
            min_arity: 0,
            max_arity: 0,
            is_variadic: false,
            upvalues: Vec::new(),
            chunk: scope.chunk,
        })
    }

    fn pop_scope(&mut self) -> FoxResult<FunctionScope> {
        self.scopes
            .pop()
            .ok_or_else(|| FoxError::compile_error("Compiler scope underflow", Span::default(), &self.file))
    }

    fn current_scope(&self) -> &FunctionScope {
        // Always non-empty while compiling
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut FunctionScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.current_scope_mut().chunk
    }

    fn error(&self, message: impl Into<String>, span: Span) -> FoxError {
        FoxError::compile_error(message, span, &self.file).with_source(&self.source)
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, stmt: &Stmt) -> FoxResult<()> {
        match stmt {
            Stmt::Var {
                name,
                initializer,
                span,
            } => self.compile_var(name, initializer.as_ref(), *span),
            Stmt::Expression { expr, span } => {
                self.compile_expr(expr)?;
                self.emit_op(OpCode::Pop, *span);
                Ok(())
            }
            Stmt::Print { args, span } => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit_op(OpCode::Print, *span);
                self.emit_byte(args.len() as u8, *span);
                Ok(())
            }
            Stmt::Block { statements, span } => {
                self.begin_scope();
                for s in statements {
                    self.compile_stmt(s)?;
                }
                self.end_scope(*span);
                Ok(())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => self.compile_if(condition, then_branch, else_branch.as_deref(), *span),
            Stmt::While { condition, body, span } => self.compile_while(condition, body, *span),
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                span,
            } => self.compile_for(
                initializer.as_deref(),
                condition.as_ref(),
                increment.as_ref(),
                body,
                *span,
            ),
            Stmt::Function { def } => self.compile_function_declaration(def),
            Stmt::Return { value, span } => self.compile_return(value.as_ref(), *span),
            Stmt::Class { def } => self.compile_class(def),
            Stmt::Import { module, span } => {
                let idx = self.identifier_constant(module, *span)?;
                self.emit_op(OpCode::Import, *span);
                self.emit_u16(idx, *span);
                // Import leaves the module's return value
                self.emit_op(OpCode::Pop, *span);
                Ok(())
            }
        }
    }

    fn compile_var(&mut self, name: &str, initializer: Option<&Expr>, span: Span) -> FoxResult<()> {
        if self.current_scope().scope_depth > 0 {
            self.declare_local(name, span)?;
            match initializer {
                Some(init) => self.compile_expr(init)?,
                None => self.emit_op(OpCode::Nil, span),
            }
            self.mark_initialized();
            return Ok(());
        }

        let idx = self.identifier_constant(name, span)?;
        match initializer {
            Some(init) => self.compile_expr(init)?,
            None => self.emit_op(OpCode::Nil, span),
        }
        self.emit_op(OpCode::DefineGlobal, span);
        self.emit_u16(idx, span);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
        span: Span,
    ) -> FoxResult<()> {
        self.compile_expr(condition)?;
        let then_jump = self.emit_jump(OpCode::JumpIfFalse, span);
        self.emit_op(OpCode::Pop, span);
        self.compile_stmt(then_branch)?;

        let else_jump = self.emit_jump(OpCode::Jump, span);
        self.patch_jump(then_jump, span)?;
        self.emit_op(OpCode::Pop, span);

        if let Some(else_branch) = else_branch {
            self.compile_stmt(else_branch)?;
        }
        self.patch_jump(else_jump, span)
    }

    fn compile_while(&mut self, condition: &Expr, body: &Stmt, span: Span) -> FoxResult<()> {
        let loop_start = self.current_chunk().current_offset();
        self.compile_expr(condition)?;

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, span);
        self.emit_op(OpCode::Pop, span);
        self.compile_stmt(body)?;
        self.emit_loop(loop_start, span)?;

        self.patch_jump(exit_jump, span)?;
        self.emit_op(OpCode::Pop, span);
        Ok(())
    }

    fn compile_for(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
        span: Span,
    ) -> FoxResult<()> {
        self.begin_scope();

        if let Some(init) = initializer {
            self.compile_stmt(init)?;
        }

        let mut loop_start = self.current_chunk().current_offset();

        let exit_jump = match condition {
            Some(cond) => {
                self.compile_expr(cond)?;
                let jump = self.emit_jump(OpCode::JumpIfFalse, span);
                self.emit_op(OpCode::Pop, span);
                Some(jump)
            }
            None => None,
        };

        if let Some(incr) = increment {
            let body_jump = self.emit_jump(OpCode::Jump, span);
            let increment_start = self.current_chunk().current_offset();
            self.compile_expr(incr)?;
            self.emit_op(OpCode::Pop, span);
            self.emit_loop(loop_start, span)?;
            loop_start = increment_start;
            self.patch_jump(body_jump, span)?;
        }

        self.compile_stmt(body)?;
        self.emit_loop(loop_start, span)?;

        if let Some(exit) = exit_jump {
            self.patch_jump(exit, span)?;
            self.emit_op(OpCode::Pop, span);
        }

        self.end_scope(span);
        Ok(())
    }

    fn compile_function_declaration(&mut self, def: &FunctionDef) -> FoxResult<()> {
        let span = def.span;

        if self.current_scope().scope_depth > 0 {
            // Initialized before the body so it can call itself
            self.declare_local(&def.name, span)?;
            self.mark_initialized();
            return self.compile_function(def, FunctionKind::Function);
        }

        let idx = self.identifier_constant(&def.name, span)?;
        self.compile_function(def, FunctionKind::Function)?;
        self.emit_op(OpCode::DefineGlobal, span);
        self.emit_u16(idx, span);
        Ok(())
    }

    /// Compile a function body and emit a Closure for it
    fn compile_function(&mut self, def: &FunctionDef, kind: FunctionKind) -> FoxResult<()> {
        let func_span = def.span;

        self.scopes.push(FunctionScope::new(def.name.clone(), kind));
        self.begin_scope();

        for param in &def.params {
            self.declare_local(&param.name, param.span)?;
            self.mark_initialized();
        }

        // Missing arguments arrive as nil; fill them from the default expression
        for param in &def.params {
            let Some(default_expr) = &param.default_value else {
                continue;
            };
            let slot = match self.resolve_local(&param.name, param.span)? {
                Some(slot) => slot,
                None => return Err(self.error(format!("Unknown parameter '{}'", param.name), param.span)),
            };

            self.emit_op(OpCode::GetLocal, param.span);
            self.emit_u16(slot, param.span);
            let skip = self.emit_jump(OpCode::JumpIfNotNil, param.span);
            self.compile_expr(default_expr)?;
            self.emit_op(OpCode::SetLocal, param.span);
            self.emit_u16(slot, param.span);
            self.emit_op(OpCode::Pop, param.span);
            self.patch_jump(skip, param.span)?;
        }

        for stmt in &def.body {
            self.compile_stmt(stmt)?;
        }
        self.emit_implicit_return(func_span);

        let func_scope = self.pop_scope()?;

        let is_variadic = def.params.last().map_or(false, |p| p.is_variadic);
        let max_arity = def.params.len() - usize::from(is_variadic);
        let min_arity = def
            .params
            .iter()
            .take_while(|p| p.default_value.is_none() && !p.is_variadic)
            .count();

        let upvalues = func_scope
            .upvalues
            .iter()
            .map(|u| UpvalueInfo {
                index: u.index as u16,
                is_local: u.is_local,
            })
            .collect();

        let function = FunctionConstant {
            name: func_scope.name,
            min_arity,
            max_arity,
            is_variadic,
            upvalues,
            chunk: func_scope.chunk,
        };

        let idx = self.make_constant(Constant::Function(Box::new(function)), func_span)?;
        self.emit_op(OpCode::Closure, func_span);
        self.emit_u16(idx, func_span);
        Ok(())
    }

    fn emit_implicit_return(&mut self, span: Span) {
        if self.current_scope().kind == FunctionKind::Initializer {
            self.emit_op(OpCode::GetLocal, span);
            self.emit_u16(0, span);
        } else {
            self.emit_op(OpCode::Nil, span);
        }
        self.emit_op(OpCode::Return, span);
    }

    fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> FoxResult<()> {
        let kind = self.current_scope().kind;
        if kind == FunctionKind::Script {
            return Err(self.error("Can't return from top-level code.", span));
        }

        match value {
            None => self.emit_implicit_return(span),
            Some(_) if kind == FunctionKind::Initializer => {
                return Err(self.error("Can't return a value from an initializer.", span));
            }
            Some(expr) => {
                self.compile_expr(expr)?;
                self.emit_op(OpCode::Return, span);
            }
        }
        Ok(())
    }

    fn compile_class(&mut self, def: &ClassDef) -> FoxResult<()> {
        let class_span = def.span;
        let name_const = self.identifier_constant(&def.name, class_span)?;

        let is_local = self.current_scope().scope_depth > 0;
        if is_local {
            self.declare_local(&def.name, class_span)?;
        }

        self.emit_op(OpCode::Class, class_span);
        self.emit_u16(name_const, class_span);

        if is_local {
            self.mark_initialized();
        } else {
            self.emit_op(OpCode::DefineGlobal, class_span);
            self.emit_u16(name_const, class_span);
        }

        self.classes.push(ClassScope { has_superclass: false });

        if let Some((superclass, super_span)) = &def.superclass {
            self.named_variable(superclass, *super_span)?;

            // The superclass stays on the stack as the hidden `super` local
            self.begin_scope();
            self.declare_local("super", *super_span)?;
            self.mark_initialized();

            self.named_variable(&def.name, class_span)?;
            self.emit_op(OpCode::Inherit, class_span);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        // Class sits on the stack while methods are bound to it
        self.named_variable(&def.name, class_span)?;

        for method in &def.methods {
            let kind = if method.name == "init" {
                FunctionKind::Initializer
            } else {
                FunctionKind::Method
            };
            let idx = self.identifier_constant(&method.name, method.span)?;
            self.compile_function(method, kind)?;
            self.emit_op(OpCode::Method, method.span);
            self.emit_u16(idx, method.span);
        }

        for (symbol, operator) in &def.operators {
            let idx = self.identifier_constant(symbol, operator.span)?;
            self.compile_function(operator, FunctionKind::Method)?;
            self.emit_op(OpCode::Operator, operator.span);
            self.emit_u16(idx, operator.span);
        }

        self.emit_op(OpCode::Pop, class_span);

        let class = self.classes.pop();
        if class.map_or(false, |c| c.has_superclass) {
            self.end_scope(class_span);
        }

        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &Expr) -> FoxResult<()> {
        match expr {
            Expr::Literal { value, span } => self.compile_literal(value, *span),
            Expr::Identifier { name, span } => self.named_variable(name, *span),
            Expr::This { span } => {
                if self.classes.is_empty() {
                    return Err(self.error("Can't use 'this' outside of a class.", *span));
                }
                self.named_variable("this", *span)
            }
            Expr::Super { method, span } => {
                self.check_super(*span)?;
                let idx = self.identifier_constant(method, *span)?;
                self.named_variable("this", *span)?;
                self.named_variable("super", *span)?;
                self.emit_op(OpCode::GetSuper, *span);
                self.emit_u16(idx, *span);
                Ok(())
            }
            Expr::Grouping { expr, .. } => self.compile_expr(expr),
            Expr::Unary { op, operand, span } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Negate => self.emit_op(OpCode::Negate, *span),
                    UnaryOp::Not => self.emit_op(OpCode::Not, *span),
                }
                Ok(())
            }
            Expr::Binary { left, op, right, span } => self.compile_binary(left, *op, right, *span),
            Expr::Logical { left, op, right, span } => self.compile_logical(left, *op, right, *span),
            Expr::Is { value, class, span } => {
                self.compile_expr(value)?;
                self.compile_expr(class)?;
                self.emit_op(OpCode::Is, *span);
                Ok(())
            }
            Expr::Assignment { name, value, span } => {
                self.compile_expr(value)?;
                self.set_variable(name, *span)
            }
            Expr::Step { target, op, span } => self.compile_step(target, *op, *span),
            Expr::Call { callee, args, span } => self.compile_call(callee, args, *span),
            Expr::Get { object, property, span } => {
                self.compile_expr(object)?;
                let idx = self.identifier_constant(property, *span)?;
                self.emit_op(OpCode::GetProperty, *span);
                self.emit_u16(idx, *span);
                Ok(())
            }
            Expr::Set {
                object,
                property,
                value,
                span,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                let idx = self.identifier_constant(property, *span)?;
                self.emit_op(OpCode::SetProperty, *span);
                self.emit_u16(idx, *span);
                Ok(())
            }
            Expr::Index { object, index, span } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit_op(OpCode::Subscript, *span);
                Ok(())
            }
            Expr::IndexSet {
                object,
                index,
                value,
                span,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit_op(OpCode::SubscriptAssign, *span);
                Ok(())
            }
            Expr::Slice {
                object,
                start,
                end,
                span,
            } => {
                self.compile_expr(object)?;
                for bound in [start, end] {
                    match bound {
                        Some(e) => self.compile_expr(e)?,
                        None => self.emit_op(OpCode::Nil, *span),
                    }
                }
                self.emit_op(OpCode::Slice, *span);
                Ok(())
            }
            Expr::Array { elements, span } => {
                if elements.len() > u16::MAX as usize {
                    return Err(self.error("Too many elements in array literal.", *span));
                }
                self.emit_op(OpCode::Array, *span);
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit_op(OpCode::AddList, *span);
                self.emit_u16(elements.len() as u16, *span);
                Ok(())
            }
            Expr::Map { entries, span } => {
                if entries.len() > u16::MAX as usize {
                    return Err(self.error("Too many entries in map literal.", *span));
                }
                self.emit_op(OpCode::Map, *span);
                for (key, value) in entries {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit_op(OpCode::AddMap, *span);
                self.emit_u16(entries.len() as u16, *span);
                Ok(())
            }
            Expr::Lambda { def, .. } => self.compile_function(def, FunctionKind::Function),
        }
    }

    fn compile_literal(&mut self, value: &Literal, span: Span) -> FoxResult<()> {
        match value {
            Literal::Number(n) => self.emit_constant(Constant::Number(*n), span)?,
            Literal::String(s) => self.emit_constant(Constant::String(s.clone()), span)?,
            Literal::Boolean(true) => self.emit_op(OpCode::True, span),
            Literal::Boolean(false) => self.emit_op(OpCode::False, span),
            Literal::Nil => self.emit_op(OpCode::Nil, span),
        }
        Ok(())
    }

    fn compile_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr, span: Span) -> FoxResult<()> {
        self.compile_expr(left)?;
        self.compile_expr(right)?;

        match op {
            BinaryOp::Add => self.emit_op(OpCode::Add, span),
            BinaryOp::Sub => self.emit_op(OpCode::Sub, span),
            BinaryOp::Mul => self.emit_op(OpCode::Mul, span),
            BinaryOp::Div => self.emit_op(OpCode::Div, span),
            BinaryOp::Mod => self.emit_op(OpCode::Mod, span),
            BinaryOp::Equal => self.emit_op(OpCode::Equal, span),
            BinaryOp::NotEqual => {
                self.emit_op(OpCode::Equal, span);
                self.emit_op(OpCode::Not, span);
            }
            BinaryOp::Greater => self.emit_op(OpCode::Greater, span),
            BinaryOp::GreaterEqual => {
                self.emit_op(OpCode::Less, span);
                self.emit_op(OpCode::Not, span);
            }
            BinaryOp::Less => self.emit_op(OpCode::Less, span),
            BinaryOp::LessEqual => {
                self.emit_op(OpCode::Greater, span);
                self.emit_op(OpCode::Not, span);
            }
        }
        Ok(())
    }

    fn compile_logical(&mut self, left: &Expr, op: LogicalOp, right: &Expr, span: Span) -> FoxResult<()> {
        self.compile_expr(left)?;

        match op {
            LogicalOp::And => {
                let end_jump = self.emit_jump(OpCode::JumpIfFalse, span);
                self.emit_op(OpCode::Pop, span);
                self.compile_expr(right)?;
                self.patch_jump(end_jump, span)
            }
            LogicalOp::Or => {
                let else_jump = self.emit_jump(OpCode::JumpIfFalse, span);
                let end_jump = self.emit_jump(OpCode::Jump, span);
                self.patch_jump(else_jump, span)?;
                self.emit_op(OpCode::Pop, span);
                self.compile_expr(right)?;
                self.patch_jump(end_jump, span)
            }
        }
    }

    /// `x++` / `obj.field--`, evaluating to the updated value
    fn compile_step(&mut self, target: &Expr, op: StepOp, span: Span) -> FoxResult<()> {
        let arith = match op {
            StepOp::Increment => OpCode::Add,
            StepOp::Decrement => OpCode::Sub,
        };

        match target {
            Expr::Identifier { name, .. } => {
                self.named_variable(name, span)?;
                self.emit_constant(Constant::Number(1.0), span)?;
                self.emit_op(arith, span);
                self.set_variable(name, span)
            }
            Expr::Get { object, property, .. } => {
                self.compile_expr(object)?;
                self.emit_op(OpCode::Dup, span);
                let idx = self.identifier_constant(property, span)?;
                self.emit_op(OpCode::GetProperty, span);
                self.emit_u16(idx, span);
                self.emit_constant(Constant::Number(1.0), span)?;
                self.emit_op(arith, span);
                self.emit_op(OpCode::SetProperty, span);
                self.emit_u16(idx, span);
                Ok(())
            }
            _ => Err(self.error("Invalid increment target.", span)),
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> FoxResult<()> {
        match callee {
            // obj.method(args) skips the intermediate bound method
            Expr::Get { object, property, .. } => {
                self.compile_expr(object)?;
                self.compile_args(args)?;
                let idx = self.identifier_constant(property, span)?;
                self.emit_op(OpCode::Invoke, span);
                self.emit_u16(idx, span);
                self.emit_byte(args.len() as u8, span);
            }
            Expr::Super { method, span: super_span } => {
                self.check_super(*super_span)?;
                let idx = self.identifier_constant(method, span)?;
                self.named_variable("this", *super_span)?;
                self.compile_args(args)?;
                self.named_variable("super", *super_span)?;
                self.emit_op(OpCode::SuperInvoke, span);
                self.emit_u16(idx, span);
                self.emit_byte(args.len() as u8, span);
            }
            _ => {
                self.compile_expr(callee)?;
                self.compile_args(args)?;
                self.emit_op(OpCode::Call, span);
                self.emit_byte(args.len() as u8, span);
            }
        }
        Ok(())
    }

    fn compile_args(&mut self, args: &[Expr]) -> FoxResult<()> {
        if args.len() > u8::MAX as usize {
            let span = args.last().map(|a| a.span()).unwrap_or_default();
            return Err(self.error("Can't have more than 255 arguments.", span));
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        Ok(())
    }

    fn check_super(&self, span: Span) -> FoxResult<()> {
        match self.classes.last() {
            None => Err(self.error("Can't use 'super' outside of a class.", span)),
            Some(class) if !class.has_superclass => {
                Err(self.error("Can't use 'super' in a class with no superclass.", span))
            }
            Some(_) => Ok(()),
        }
    }

    // ==================== Variables ====================

    fn resolve(&mut self, name: &str, span: Span) -> FoxResult<Resolved> {
        if let Some(slot) = self.resolve_local(name, span)? {
            return Ok(Resolved::Local(slot));
        }
        let top = self.scopes.len() - 1;
        if let Some(index) = self.resolve_upvalue(top, name, span)? {
            return Ok(Resolved::Upvalue(index as u16));
        }
        Ok(Resolved::Global(self.identifier_constant(name, span)?))
    }

    fn named_variable(&mut self, name: &str, span: Span) -> FoxResult<()> {
        let (op, arg) = match self.resolve(name, span)? {
            Resolved::Local(slot) => (OpCode::GetLocal, slot),
            Resolved::Upvalue(index) => (OpCode::GetUpvalue, index),
            Resolved::Global(idx) => (OpCode::GetGlobal, idx),
        };
        self.emit_op(op, span);
        self.emit_u16(arg, span);
        Ok(())
    }

    fn set_variable(&mut self, name: &str, span: Span) -> FoxResult<()> {
        let (op, arg) = match self.resolve(name, span)? {
            Resolved::Local(slot) => (OpCode::SetLocal, slot),
            Resolved::Upvalue(index) => (OpCode::SetUpvalue, index),
            Resolved::Global(idx) => (OpCode::SetGlobal, idx),
        };
        self.emit_op(op, span);
        self.emit_u16(arg, span);
        Ok(())
    }

    fn begin_scope(&mut self) {
        self.current_scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self, span: Span) {
        let scope = self.current_scope_mut();
        scope.scope_depth -= 1;
        let depth = scope.scope_depth;

        let mut ops = Vec::new();
        while let Some(local) = scope.locals.last() {
            if local.depth <= depth {
                break;
            }
            // Captured locals are hoisted into their upvalue on the way out
            ops.push(if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            });
            scope.locals.pop();
        }

        for op in ops {
            self.emit_op(op, span);
        }
    }

    fn declare_local(&mut self, name: &str, span: Span) -> FoxResult<()> {
        let scope = self.current_scope();

        for local in scope.locals.iter().rev() {
            if local.depth < scope.scope_depth {
                break;
            }
            if local.name == name {
                return Err(self.error("Already a variable with this name in this scope.", span));
            }
        }

        if scope.locals.len() >= MAX_LOCALS {
            return Err(self.error("Too many local variables in function.", span));
        }

        let depth = scope.scope_depth;
        self.current_scope_mut().locals.push(Local {
            name: name.to_string(),
            depth,
            initialized: false,
            is_captured: false,
        });
        Ok(())
    }

    fn mark_initialized(&mut self) {
        if let Some(local) = self.current_scope_mut().locals.last_mut() {
            local.initialized = true;
        }
    }

    fn resolve_local(&self, name: &str, span: Span) -> FoxResult<Option<u16>> {
        let scope = self.current_scope();
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if local.name == name {
                if !local.initialized {
                    return Err(self.error("Can't read local variable in its own initializer.", span));
                }
                return Ok(Some(i as u16));
            }
        }
        Ok(None)
    }

    /// Resolve a variable captured from an enclosing function scope
    fn resolve_upvalue(&mut self, scope_idx: usize, name: &str, span: Span) -> FoxResult<Option<usize>> {
        if scope_idx == 0 {
            return Ok(None);
        }

        let enclosing_idx = scope_idx - 1;
        let local_idx = self.scopes[enclosing_idx]
            .locals
            .iter()
            .rposition(|local| local.name == name);

        if let Some(local) = local_idx {
            self.scopes[enclosing_idx].locals[local].is_captured = true;
            return self.add_upvalue(scope_idx, local, true, span).map(Some);
        }

        match self.resolve_upvalue(enclosing_idx, name, span)? {
            Some(upvalue) => self.add_upvalue(scope_idx, upvalue, false, span).map(Some),
            None => Ok(None),
        }
    }

    fn add_upvalue(&mut self, scope_idx: usize, index: usize, is_local: bool, span: Span) -> FoxResult<usize> {
        let wanted = Upvalue { index, is_local };
        if let Some(existing) = self.scopes[scope_idx].upvalues.iter().position(|u| *u == wanted) {
            return Ok(existing);
        }

        if self.scopes[scope_idx].upvalues.len() >= MAX_UPVALUES {
            return Err(self.error("Too many closure variables in function.", span));
        }

        let upvalues = &mut self.scopes[scope_idx].upvalues;
        upvalues.push(wanted);
        Ok(upvalues.len() - 1)
    }

    // ==================== Emit Helpers ====================

    fn emit_op(&mut self, op: OpCode, span: Span) {
        self.current_chunk().write_op(op, span);
    }

    fn emit_byte(&mut self, byte: u8, span: Span) {
        self.current_chunk().write(byte, span);
    }

    fn emit_u16(&mut self, value: u16, span: Span) {
        self.current_chunk().write_u16(value, span);
    }

    fn make_constant(&mut self, constant: Constant, span: Span) -> FoxResult<u16> {
        if self.current_scope().chunk.constants.len() >= MAX_CONSTANTS {
            return Err(self.error("Too many constants in one chunk.", span));
        }
        Ok(self.current_chunk().add_constant(constant) as u16)
    }

    fn emit_constant(&mut self, constant: Constant, span: Span) -> FoxResult<()> {
        let idx = self.make_constant(constant, span)?;
        self.emit_op(OpCode::Constant, span);
        self.emit_u16(idx, span);
        Ok(())
    }

    /// String constant for a name, shared across uses in one function
    fn identifier_constant(&mut self, name: &str, span: Span) -> FoxResult<u16> {
        if let Some(&idx) = self.current_scope().identifiers.get(name) {
            return Ok(idx);
        }
        let idx = self.make_constant(Constant::String(name.to_string()), span)?;
        self.current_scope_mut().identifiers.insert(name.to_string(), idx);
        Ok(idx)
    }

    fn emit_jump(&mut self, op: OpCode, span: Span) -> usize {
        self.emit_op(op, span);
        self.emit_u16(0xFFFF, span);
        self.current_chunk().current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize, span: Span) -> FoxResult<()> {
        if self.current_chunk().patch_jump(offset) {
            Ok(())
        } else {
            Err(self.error("Too much code to jump over.", span))
        }
    }

    fn emit_loop(&mut self, loop_start: usize, span: Span) -> FoxResult<()> {
        self.emit_op(OpCode::Loop, span);
        let offset = self.current_chunk().current_offset() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(self.error("Loop body too large.", span));
        }
        self.emit_u16(offset as u16, span);
        Ok(())
    }
}
