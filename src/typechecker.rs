
use std::collections::HashMap;

use crate::ast::*;
use crate::error::{Diagnostic, Span};
use crate::names::{is_reserved_name, mangle_function, IdentityName, ENTRY_PREFIX};
use crate::runtime;
use crate::types::{FnSig, Type};

/// Index of a local binding (parameter or block `let`) within one function.
pub type LocalId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalInfo {
    pub ty: Type,
    pub mutable: bool,
}

/// Declarations made by earlier inputs, as visible to the type checker.
pub trait PriorScope {
    /// Signatures of every current function with this surface name.
    fn function_overloads(&self, surface: &str) -> Vec<FnSig>;
    fn global(&self, name: &str) -> Option<GlobalInfo>;
    fn type_alias(&self, name: &str) -> Option<Type>;
}

/// The scope of a session before its first input.
pub struct EmptyScope;

impl PriorScope for EmptyScope {
    fn function_overloads(&self, _surface: &str) -> Vec<FnSig> {
        Vec::new()
    }
    fn global(&self, _name: &str) -> Option<GlobalInfo> {
        None
    }
    fn type_alias(&self, _name: &str) -> Option<Type> {
        None
    }
}

// ── Typed tree ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// A function defined in this session, called through its identity.
    Session { identity: IdentityName, sig: FnSig },
    /// A host function from the runtime.
    Builtin { symbol: &'static str, sig: FnSig },
}

impl Callee {
    pub fn sig(&self) -> &FnSig {
        match self {
            Callee::Session { sig, .. } | Callee::Builtin { sig, .. } => sig,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Callee::Session { identity, .. } => identity,
            Callee::Builtin { symbol, .. } => symbol,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TExpr {
    Int(i64),
    Bool(bool),
    Local {
        id: LocalId,
        ty: Type,
    },
    Global {
        symbol: IdentityName,
        ty: Type,
    },
    Call {
        callee: Callee,
        args: Vec<TExpr>,
        ty: Type,
    },
    Binary {
        op: BinOp,
        lhs: Box<TExpr>,
        rhs: Box<TExpr>,
        ty: Type,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TExpr>,
        ty: Type,
    },
    If {
        cond: Box<TExpr>,
        then_block: TBlock,
        else_block: Option<TBlock>,
        ty: Type,
    },
}

impl TExpr {
    pub fn ty(&self) -> Type {
        match self {
            TExpr::Int(_) => Type::Int,
            TExpr::Bool(_) => Type::Bool,
            TExpr::Local { ty, .. }
            | TExpr::Global { ty, .. }
            | TExpr::Call { ty, .. }
            | TExpr::Binary { ty, .. }
            | TExpr::Unary { ty, .. }
            | TExpr::If { ty, .. } => *ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TBlock {
    pub stmts: Vec<TStmt>,
    pub tail: Option<Box<TExpr>>,
}

impl TBlock {
    pub fn ty(&self) -> Type {
        self.tail.as_ref().map(|t| t.ty()).unwrap_or(Type::Void)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TStmt {
    Let { local: LocalId, value: TExpr },
    /// Write a global's 8-byte cell.
    Store { symbol: IdentityName, value: TExpr },
    Expr(TExpr),
}

// ── Checked input ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CheckedFunction {
    pub name: String,
    pub sig: FnSig,
    pub params: Vec<String>,
    pub body: TBlock,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckedGlobal {
    pub name: String,
    pub info: GlobalInfo,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckedAlias {
    pub name: String,
    pub target: Type,
    pub span: Span,
}

/// Everything one input declares, plus its top-level code.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedInput {
    pub aliases: Vec<CheckedAlias>,
    pub globals: Vec<CheckedGlobal>,
    pub functions: Vec<CheckedFunction>,
    /// Top-level code in source order, global initializers included.
    /// The tail is the input's final expression when it has a value.
    pub top_level: TBlock,
}

/// Overloads of a builtin function name, with their runtime symbols.
fn builtin_overloads(name: &str) -> Vec<(&'static str, FnSig)> {
    match name {
        "print" => vec![
            (runtime::PRINT_INT, FnSig::new(vec![Type::Int], Type::Void)),
            (runtime::PRINT_BOOL, FnSig::new(vec![Type::Bool], Type::Void)),
        ],
        _ => Vec::new(),
    }
}

fn format_arg_types(types: &[Type]) -> String {
    let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("({})", parts.join(", "))
}

/// Lexically scoped local bindings of one function.
struct Locals {
    scopes: Vec<HashMap<String, (LocalId, Type)>>,
    next: LocalId,
}

impl Locals {
    fn new() -> Self {
        Locals {
            scopes: vec![HashMap::new()],
            next: 0,
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, ty: Type) -> LocalId {
        let id = self.next;
        self.next += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), (id, ty));
        }
        id
    }

    fn lookup(&self, name: &str) -> Option<(LocalId, Type)> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }
}

pub struct TypeChecker<'a> {
    prior: &'a dyn PriorScope,
    aliases: HashMap<String, Type>,
    globals: HashMap<String, GlobalInfo>,
    functions: HashMap<String, Vec<FnSig>>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(prior: &'a dyn PriorScope) -> Self {
        TypeChecker {
            prior,
            aliases: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    /// Type check one input. Function signatures are registered before any
    /// body is checked, so functions of one input may call each other.
    pub fn check_input(mut self, items: &[Item]) -> Result<CheckedInput, Diagnostic> {
        let mut declared: HashMap<String, Span> = HashMap::new();
        let mut aliases = Vec::new();
        let mut globals = Vec::new();

        for item in items {
            if let Item::TypeAlias { name, target, span } = item {
                Self::declare_once(&mut declared, name, *span)?;
                let target = self.resolve_type(target)?;
                self.aliases.insert(name.clone(), target);
                aliases.push(CheckedAlias {
                    name: name.clone(),
                    target,
                    span: *span,
                });
            }
        }

        let mut signatures = Vec::new();
        for item in items {
            if let Item::Func(decl) = item {
                let sig = self.register_function(decl, &declared)?;
                signatures.push((decl, sig));
            }
        }

        let mut top_locals = Locals::new();
        let mut top_level = TBlock::default();
        for (i, item) in items.iter().enumerate() {
            match item {
                Item::Global {
                    name,
                    mutable,
                    annotation,
                    value,
                    span,
                } => {
                    if self.functions.contains_key(name) {
                        return Err(Diagnostic::type_error(
                            format!("`{}` is already declared as a function in this input", name),
                            *span,
                        ));
                    }
                    Self::declare_once(&mut declared, name, *span)?;
                    let value = self.check_expr(value, &mut top_locals)?;
                    let ty = value.ty();
                    if !ty.has_value() {
                        return Err(Diagnostic::type_error(
                            format!("variable `{}` cannot have type Void", name),
                            *span,
                        ));
                    }
                    if let Some(annotation) = annotation {
                        let expected = self.resolve_type(annotation)?;
                        if expected != ty {
                            return Err(Diagnostic::type_error(
                                format!("cannot initialize `{}: {}` with a value of type {}", name, expected, ty),
                                *span,
                            ));
                        }
                    }
                    let info = GlobalInfo {
                        ty,
                        mutable: *mutable,
                    };
                    self.globals.insert(name.clone(), info);
                    globals.push(CheckedGlobal {
                        name: name.clone(),
                        info,
                        span: *span,
                    });
                    top_level.stmts.push(TStmt::Store {
                        symbol: IdentityName::from(name.as_str()),
                        value,
                    });
                }
                Item::Assign { name, value, span } => {
                    let stmt = self.check_assign(name, value, *span, &mut top_locals)?;
                    top_level.stmts.push(stmt);
                }
                Item::Expr(expr) => {
                    let texpr = self.check_expr(expr, &mut top_locals)?;
                    if i + 1 == items.len() && texpr.ty().has_value() {
                        top_level.tail = Some(Box::new(texpr));
                    } else {
                        top_level.stmts.push(TStmt::Expr(texpr));
                    }
                }
                Item::Func(_) | Item::TypeAlias { .. } => {}
            }
        }

        let mut functions = Vec::new();
        for (decl, sig) in signatures {
            functions.push(self.check_function(decl, sig)?);
        }

        Ok(CheckedInput {
            aliases,
            globals,
            functions,
            top_level,
        })
    }

    fn reject_reserved(name: &str, span: Span) -> Result<(), Diagnostic> {
        if is_reserved_name(name) {
            return Err(Diagnostic::type_error(
                format!("`{}`: names starting with `{}` are reserved", name, ENTRY_PREFIX),
                span,
            ));
        }
        Ok(())
    }

    fn declare_once(
        declared: &mut HashMap<String, Span>,
        name: &str,
        span: Span,
    ) -> Result<(), Diagnostic> {
        Self::reject_reserved(name, span)?;
        if declared.insert(name.to_string(), span).is_some() {
            return Err(Diagnostic::type_error(
                format!("`{}` is declared more than once in this input", name),
                span,
            ));
        }
        Ok(())
    }

    fn register_function(
        &mut self,
        decl: &FuncDecl,
        declared: &HashMap<String, Span>,
    ) -> Result<FnSig, Diagnostic> {
        Self::reject_reserved(&decl.name, decl.span)?;
        if declared.contains_key(&decl.name) {
            return Err(Diagnostic::type_error(
                format!("`{}` is declared more than once in this input", decl.name),
                decl.span,
            ));
        }
        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let ty = self.resolve_type(&p.annotation)?;
            if !ty.has_value() {
                return Err(Diagnostic::type_error(
                    format!("parameter `{}` cannot have type Void", p.name),
                    p.span,
                ));
            }
            params.push(ty);
        }
        let ret = match &decl.ret {
            Some(t) => self.resolve_type(t)?,
            None => Type::Void,
        };
        let sig = FnSig::new(params, ret);
        let overloads = self.functions.entry(decl.name.clone()).or_default();
        if overloads.iter().any(|s| s.params == sig.params) {
            return Err(Diagnostic::type_error(
                format!(
                    "function `{}{}` is declared more than once in this input",
                    decl.name,
                    format_arg_types(&sig.params)
                ),
                decl.span,
            ));
        }
        overloads.push(sig.clone());
        Ok(sig)
    }

    fn check_function(&self, decl: &FuncDecl, sig: FnSig) -> Result<CheckedFunction, Diagnostic> {
        let mut locals = Locals::new();
        for (i, p) in decl.params.iter().enumerate() {
            if decl.params[..i].iter().any(|q| q.name == p.name) {
                return Err(Diagnostic::type_error(
                    format!("duplicate parameter `{}`", p.name),
                    p.span,
                ));
            }
            locals.bind(&p.name, sig.params[i]);
        }
        let body = self.check_block(&decl.body, &mut locals)?;
        if body.ty() != sig.ret {
            let span = decl
                .body
                .tail
                .as_ref()
                .map(|t| t.span())
                .unwrap_or(decl.body.span);
            return Err(Diagnostic::type_error(
                format!(
                    "function `{}` must return {}, but its body produces {}",
                    decl.name,
                    sig.ret,
                    body.ty()
                ),
                span,
            ));
        }
        Ok(CheckedFunction {
            name: decl.name.clone(),
            params: decl.params.iter().map(|p| p.name.clone()).collect(),
            sig,
            body,
            span: decl.span,
        })
    }

    fn resolve_type(&self, texpr: &TypeExpr) -> Result<Type, Diagnostic> {
        match texpr.name.as_str() {
            "Int" => Ok(Type::Int),
            "Bool" => Ok(Type::Bool),
            "Void" => Ok(Type::Void),
            name => self
                .aliases
                .get(name)
                .copied()
                .or_else(|| self.prior.type_alias(name))
                .ok_or_else(|| {
                    Diagnostic::type_error(format!("unknown type `{}`", name), texpr.span)
                }),
        }
    }

    fn lookup_global(&self, name: &str) -> Option<GlobalInfo> {
        self.globals
            .get(name)
            .copied()
            .or_else(|| self.prior.global(name))
    }

    /// Current overloads for a surface name: this input's definitions first,
    /// then earlier ones not replaced by an identical signature.
    fn overloads(&self, name: &str) -> Vec<FnSig> {
        let mut sigs = self.functions.get(name).cloned().unwrap_or_default();
        for sig in self.prior.function_overloads(name) {
            if !sigs.contains(&sig) {
                sigs.push(sig);
            }
        }
        sigs
    }

    fn check_assign(
        &self,
        name: &str,
        value: &Expr,
        span: Span,
        locals: &mut Locals,
    ) -> Result<TStmt, Diagnostic> {
        if locals.lookup(name).is_some() {
            return Err(Diagnostic::type_error(
                format!("cannot assign to local `{}`", name),
                span,
            ));
        }
        let info = self
            .lookup_global(name)
            .ok_or_else(|| Diagnostic::type_error(format!("unknown variable `{}`", name), span))?;
        if !info.mutable {
            return Err(Diagnostic::type_error(
                format!("cannot assign to `{}`: it is a `let` constant", name),
                span,
            ));
        }
        let value = self.check_expr(value, locals)?;
        if value.ty() != info.ty {
            return Err(Diagnostic::type_error(
                format!(
                    "cannot assign a value of type {} to `{}` of type {}",
                    value.ty(),
                    name,
                    info.ty
                ),
                span,
            ));
        }
        Ok(TStmt::Store {
            symbol: IdentityName::from(name),
            value,
        })
    }

    fn check_block(&self, block: &Block, locals: &mut Locals) -> Result<TBlock, Diagnostic> {
        locals.push();
        let result = self.check_block_inner(block, locals);
        locals.pop();
        result
    }

    fn check_block_inner(&self, block: &Block, locals: &mut Locals) -> Result<TBlock, Diagnostic> {
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in &block.stmts {
            match stmt {
                Stmt::Let {
                    name,
                    annotation,
                    value,
                    span,
                } => {
                    let value = self.check_expr(value, locals)?;
                    let ty = value.ty();
                    if !ty.has_value() {
                        return Err(Diagnostic::type_error(
                            format!("local `{}` cannot have type Void", name),
                            *span,
                        ));
                    }
                    if let Some(annotation) = annotation {
                        let expected = self.resolve_type(annotation)?;
                        if expected != ty {
                            return Err(Diagnostic::type_error(
                                format!("cannot initialize `{}: {}` with a value of type {}", name, expected, ty),
                                *span,
                            ));
                        }
                    }
                    let local = locals.bind(name, ty);
                    stmts.push(TStmt::Let { local, value });
                }
                Stmt::Assign { name, value, span } => {
                    stmts.push(self.check_assign(name, value, *span, locals)?);
                }
                Stmt::Expr(expr) => stmts.push(TStmt::Expr(self.check_expr(expr, locals)?)),
            }
        }
        let tail = match &block.tail {
            Some(expr) => Some(Box::new(self.check_expr(expr, locals)?)),
            None => None,
        };
        Ok(TBlock { stmts, tail })
    }

    fn check_expr(&self, expr: &Expr, locals: &mut Locals) -> Result<TExpr, Diagnostic> {
        match expr {
            Expr::IntLit { value, .. } => Ok(TExpr::Int(*value)),
            Expr::BoolLit { value, .. } => Ok(TExpr::Bool(*value)),
            Expr::Var { name, span } => {
                if let Some((id, ty)) = locals.lookup(name) {
                    return Ok(TExpr::Local { id, ty });
                }
                if let Some(info) = self.lookup_global(name) {
                    return Ok(TExpr::Global {
                        symbol: IdentityName::from(name.as_str()),
                        ty: info.ty,
                    });
                }
                if !self.overloads(name).is_empty() || !builtin_overloads(name).is_empty() {
                    return Err(Diagnostic::type_error(
                        format!("function `{}` must be called with arguments", name),
                        *span,
                    ));
                }
                Err(Diagnostic::type_error(
                    format!("unknown name `{}`", name),
                    *span,
                ))
            }
            Expr::Call { callee, args, span } => self.check_call(callee, args, *span, locals),
            Expr::Binary { op, lhs, rhs, span } => {
                let lhs = self.check_expr(lhs, locals)?;
                let rhs = self.check_expr(rhs, locals)?;
                let (lt, rt) = (lhs.ty(), rhs.ty());
                let ty = match op {
                    _ if op.is_logical() && lt == Type::Bool && rt == Type::Bool => Type::Bool,
                    BinOp::Eq | BinOp::Ne if lt == rt && lt.has_value() => Type::Bool,
                    _ if op.is_comparison() && lt == Type::Int && rt == Type::Int => Type::Bool,
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem
                        if lt == Type::Int && rt == Type::Int =>
                    {
                        Type::Int
                    }
                    _ => {
                        return Err(Diagnostic::type_error(
                            format!("operator `{}` cannot be applied to {} and {}", op, lt, rt),
                            *span,
                        ))
                    }
                };
                Ok(TExpr::Binary {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    ty,
                })
            }
            Expr::Unary { op, operand, span } => {
                let operand = self.check_expr(operand, locals)?;
                let expected = match op {
                    UnaryOp::Neg => Type::Int,
                    UnaryOp::Not => Type::Bool,
                };
                if operand.ty() != expected {
                    let sym = if *op == UnaryOp::Neg { "-" } else { "!" };
                    return Err(Diagnostic::type_error(
                        format!("operator `{}` cannot be applied to {}", sym, operand.ty()),
                        *span,
                    ));
                }
                Ok(TExpr::Unary {
                    op: *op,
                    operand: Box::new(operand),
                    ty: expected,
                })
            }
            Expr::If {
                cond,
                then_block,
                else_block,
                span,
            } => {
                let cond_span = cond.span();
                let cond = self.check_expr(cond, locals)?;
                if cond.ty() != Type::Bool {
                    return Err(Diagnostic::type_error(
                        format!("condition must be Bool, found {}", cond.ty()),
                        cond_span,
                    ));
                }
                let then_block = self.check_block(then_block, locals)?;
                let else_block = match else_block {
                    Some(b) => Some(self.check_block(b, locals)?),
                    None => None,
                };
                let ty = match &else_block {
                    Some(e) if e.ty() == then_block.ty() => then_block.ty(),
                    Some(e) => {
                        return Err(Diagnostic::type_error(
                            format!(
                                "if branches have different types: {} and {}",
                                then_block.ty(),
                                e.ty()
                            ),
                            *span,
                        ))
                    }
                    None if then_block.ty().has_value() => {
                        return Err(Diagnostic::type_error(
                            format!("if without else cannot produce a value of type {}", then_block.ty()),
                            *span,
                        ))
                    }
                    None => Type::Void,
                };
                Ok(TExpr::If {
                    cond: Box::new(cond),
                    then_block,
                    else_block,
                    ty,
                })
            }
        }
    }

    fn check_call(
        &self,
        callee: &str,
        args: &[Expr],
        span: Span,
        locals: &mut Locals,
    ) -> Result<TExpr, Diagnostic> {
        if locals.lookup(callee).is_some() {
            return Err(Diagnostic::type_error(
                format!("`{}` is a local, not a function", callee),
                span,
            ));
        }
        let args = args
            .iter()
            .map(|a| self.check_expr(a, locals))
            .collect::<Result<Vec<_>, _>>()?;
        let arg_types: Vec<Type> = args.iter().map(TExpr::ty).collect();

        let candidates = self.overloads(callee);
        let mut matching = candidates.iter().filter(|sig| sig.params == arg_types);
        let resolved = match (matching.next(), matching.next()) {
            (Some(sig), None) => Some(Callee::Session {
                identity: mangle_function(callee, sig),
                sig: sig.clone(),
            }),
            (Some(_), Some(_)) => {
                return Err(Diagnostic::type_error(
                    format!(
                        "ambiguous call to `{}{}`",
                        callee,
                        format_arg_types(&arg_types)
                    ),
                    span,
                ))
            }
            (None, _) => builtin_overloads(callee)
                .into_iter()
                .find(|(_, sig)| sig.params == arg_types)
                .map(|(symbol, sig)| Callee::Builtin { symbol, sig }),
        };

        match resolved {
            Some(callee) => {
                let ty = callee.sig().ret;
                Ok(TExpr::Call { callee, args, ty })
            }
            None if candidates.is_empty() && builtin_overloads(callee).is_empty() => {
                let message = if self.lookup_global(callee).is_some() {
                    format!("`{}` is a variable, not a function", callee)
                } else {
                    format!("unknown function `{}`", callee)
                };
                Err(Diagnostic::type_error(message, span))
            }
            None => Err(Diagnostic::type_error(
                format!(
                    "no overload of `{}` accepts {}",
                    callee,
                    format_arg_types(&arg_types)
                ),
                span,
            )),
        }
    }
}
