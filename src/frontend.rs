use std::fmt;

use log::debug;

use crate::error::{Diagnostic, Span};
use crate::names::{
    input_module_name, mangle_function, result_variable_name, IdentityName, SurfaceName,
};
use crate::parser::parse_input;
use crate::typechecker::{
    Callee, GlobalInfo, PriorScope, TBlock, TExpr, TStmt, TypeChecker,
};
use crate::types::{FnSig, Type};

/// One submitted chunk of text.
#[derive(Debug, Clone)]
pub struct Input {
    pub number: u32,
    pub text: String,
}

impl Input {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Input {
            number,
            text: text.into(),
        }
    }

    /// Synthetic module name, also the entry function's surface name.
    pub fn module_name(&self) -> String {
        input_module_name(self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Function,
    Variable,
    TypeAlias,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclKind::Function => write!(f, "func"),
            DeclKind::Variable => write!(f, "var"),
            DeclKind::TypeAlias => write!(f, "typealias"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationBody {
    Function {
        sig: FnSig,
        params: Vec<String>,
        body: TBlock,
    },
    Variable {
        ty: Type,
        mutable: bool,
    },
    TypeAlias {
        target: Type,
    },
}

/// A named, typed top-level construct produced by the front end.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedDeclaration {
    pub name: SurfaceName,
    pub body: DeclarationBody,
    /// Identity names this declaration's code refers to, in first-use order.
    pub references: Vec<IdentityName>,
    pub span: Span,
}

impl TypedDeclaration {
    pub fn kind(&self) -> DeclKind {
        match self.body {
            DeclarationBody::Function { .. } => DeclKind::Function,
            DeclarationBody::Variable { .. } => DeclKind::Variable,
            DeclarationBody::TypeAlias { .. } => DeclKind::TypeAlias,
        }
    }

    /// Canonical linking key: mangled for functions, the surface name otherwise.
    pub fn identity(&self) -> IdentityName {
        match &self.body {
            DeclarationBody::Function { sig, .. } => mangle_function(&self.name, sig),
            _ => IdentityName(self.name.0.clone()),
        }
    }
}

/// Lexer, parser and type checker behind one call.
pub struct FrontEnd;

impl FrontEnd {
    /// Compile one input against the declarations of earlier inputs.
    ///
    /// Declarations come out ordered: type aliases, variables, functions, and
    /// the entry function last. The entry is present whenever the input has
    /// top-level code; it stores every variable initializer, runs the
    /// statements in order and stores a final non-Void expression into the
    /// input's result variable.
    pub fn compile(
        input: &Input,
        prior: &dyn PriorScope,
    ) -> Result<Vec<TypedDeclaration>, Diagnostic> {
        let items = parse_input(&input.text)?;
        let checked = TypeChecker::new(prior).check_input(&items)?;
        let mut decls = Vec::new();

        for alias in checked.aliases {
            decls.push(TypedDeclaration {
                name: SurfaceName(alias.name),
                body: DeclarationBody::TypeAlias {
                    target: alias.target,
                },
                references: Vec::new(),
                span: alias.span,
            });
        }

        let result_name = result_variable_name(input.number);
        let mut variables: Vec<(String, GlobalInfo, Span)> = checked
            .globals
            .into_iter()
            .map(|g| (g.name, g.info, g.span))
            .collect();

        let mut top_level = checked.top_level;
        if let Some(tail) = top_level.tail.take() {
            if variables.iter().any(|(n, _, _)| *n == result_name) {
                return Err(Diagnostic::type_error(
                    format!("`{}` is reserved for the value of this input", result_name),
                    (0, input.text.len()),
                ));
            }
            variables.push((
                result_name.clone(),
                GlobalInfo {
                    ty: tail.ty(),
                    mutable: false,
                },
                (0, input.text.len()),
            ));
            top_level.stmts.push(TStmt::Store {
                symbol: IdentityName(result_name),
                value: *tail,
            });
        }

        for (name, info, span) in variables {
            decls.push(TypedDeclaration {
                name: SurfaceName(name),
                body: DeclarationBody::Variable {
                    ty: info.ty,
                    mutable: info.mutable,
                },
                references: Vec::new(),
                span,
            });
        }

        for func in checked.functions {
            let mut references = Vec::new();
            collect_block_references(&func.body, &mut references);
            decls.push(TypedDeclaration {
                name: SurfaceName(func.name),
                body: DeclarationBody::Function {
                    sig: func.sig,
                    params: func.params,
                    body: func.body,
                },
                references,
                span: func.span,
            });
        }

        if !top_level.stmts.is_empty() {
            let mut references = Vec::new();
            collect_block_references(&top_level, &mut references);
            decls.push(TypedDeclaration {
                name: SurfaceName(input.module_name()),
                body: DeclarationBody::Function {
                    sig: FnSig::new(Vec::new(), Type::Void),
                    params: Vec::new(),
                    body: top_level,
                },
                references,
                span: (0, input.text.len()),
            });
        }

        debug!(
            "input {}: {} declaration(s): {}",
            input.number,
            decls.len(),
            decls
                .iter()
                .map(|d| d.name.as_ref())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(decls)
    }
}

fn push_unique(out: &mut Vec<IdentityName>, name: &IdentityName) {
    if !out.contains(name) {
        out.push(name.clone());
    }
}

fn collect_block_references(block: &TBlock, out: &mut Vec<IdentityName>) {
    for stmt in &block.stmts {
        match stmt {
            TStmt::Let { value, .. } | TStmt::Expr(value) => collect_expr_references(value, out),
            TStmt::Store { symbol, value } => {
                collect_expr_references(value, out);
                push_unique(out, symbol);
            }
        }
    }
    if let Some(tail) = &block.tail {
        collect_expr_references(tail, out);
    }
}

fn collect_expr_references(expr: &TExpr, out: &mut Vec<IdentityName>) {
    match expr {
        TExpr::Int(_) | TExpr::Bool(_) | TExpr::Local { .. } => {}
        TExpr::Global { symbol, .. } => push_unique(out, symbol),
        TExpr::Call { callee, args, .. } => {
            for arg in args {
                collect_expr_references(arg, out);
            }
            if let Callee::Session { identity, .. } = callee {
                push_unique(out, identity);
            }
        }
        TExpr::Binary { lhs, rhs, .. } => {
            collect_expr_references(lhs, out);
            collect_expr_references(rhs, out);
        }
        TExpr::Unary { operand, .. } => collect_expr_references(operand, out),
        TExpr::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            collect_expr_references(cond, out);
            collect_block_references(then_block, out);
            if let Some(b) = else_block {
                collect_block_references(b, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typechecker::EmptyScope;

    fn compile(number: u32, src: &str) -> Vec<TypedDeclaration> {
        FrontEnd::compile(&Input::new(number, src), &EmptyScope).unwrap()
    }

    fn names(decls: &[TypedDeclaration]) -> Vec<&str> {
        decls.iter().map(|d| d.name.as_ref()).collect()
    }

    #[test]
    fn declarations_are_ordered_with_entry_last() {
        let decls = compile(
            4,
            "func f() -> Int { 1 }\nlet x = f()\ntypealias T = Int\nx + 1",
        );
        assert_eq!(names(&decls), vec!["T", "x", "$R4", "f", "__repl_4"]);
        assert_eq!(decls[4].identity(), "_S8__repl_4F_v");
    }

    #[test]
    fn pure_definitions_have_no_entry() {
        let decls = compile(2, "func f(n: Int) -> Int { n }");
        assert_eq!(names(&decls), vec!["f"]);
        assert_eq!(decls[0].kind(), DeclKind::Function);
    }

    #[test]
    fn entry_stores_initializers_and_result() {
        let decls = compile(3, "let x = 2\nx * 21");
        let entry = decls.last().unwrap();
        let DeclarationBody::Function { body, sig, .. } = &entry.body else {
            panic!("entry must be a function")
        };
        assert_eq!(*sig, FnSig::new(vec![], Type::Void));
        let stored: Vec<&str> = body
            .stmts
            .iter()
            .filter_map(|s| match s {
                TStmt::Store { symbol, .. } => Some(symbol.as_ref()),
                _ => None,
            })
            .collect();
        assert_eq!(stored, vec!["x", "$R3"]);
        assert_eq!(entry.references, vec![IdentityName::from("x"), IdentityName::from("$R3")]);
    }

    #[test]
    fn function_references_callees_and_globals() {
        let decls = compile(
            2,
            "var total = 0\nfunc add(n: Int) { total = total + helper(n) }\nfunc helper(n: Int) -> Int { n }",
        );
        let add = decls.iter().find(|d| d.name == "add").unwrap();
        assert_eq!(
            add.references,
            vec![IdentityName::from("total"), IdentityName::from("_S6helperFi_i")]
        );
    }

    #[test]
    fn void_final_expression_has_no_result_variable() {
        let decls = compile(2, "print(1)");
        assert_eq!(names(&decls), vec!["__repl_2"]);
    }

    #[test]
    fn result_variable_name_is_reserved() {
        let err = FrontEnd::compile(&Input::new(2, "let $R2 = 1\n5"), &EmptyScope).unwrap_err();
        assert!(matches!(err, Diagnostic::Type { .. }));
    }

    #[test]
    fn entry_function_names_are_reserved() {
        let input = Input::new(2, "var hits = 0\nfunc __repl_4() { hits = hits + 100 }");
        let err = FrontEnd::compile(&input, &EmptyScope).unwrap_err();
        assert!(matches!(err, Diagnostic::Type { .. }));
        let err = FrontEnd::compile(&Input::new(2, "func __repl_3() {}"), &EmptyScope).unwrap_err();
        assert!(matches!(err, Diagnostic::Type { .. }));
    }
}
