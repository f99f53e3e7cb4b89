use crate::ast::*;
use crate::error::{Diagnostic, Span};
use crate::lexer::{tokenize, Tok, Token};

/// Parse one input into its top-level items.
pub fn parse_input(src: &str) -> Result<Vec<Item>, Diagnostic> {
    let tokens = tokenize(src)?;
    let mut parser = Parser::new(tokens, src.len());
    parser.parse_items()
}

/// Parse a single expression (used by tests and tooling).
pub fn parse_expr(src: &str) -> Result<Expr, Diagnostic> {
    let tokens = tokenize(src)?;
    let mut parser = Parser::new(tokens, src.len());
    parser.skip_separators();
    let expr = parser.parse_expr()?;
    parser.skip_separators();
    match parser.peek() {
        None => Ok(expr),
        Some(_) => Err(parser.err_expected("end of input")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    /// Operands currently being parsed, innermost included.
    depth: usize,
}

/// Deepest operand nesting accepted before parsing gives up.
const MAX_DEPTH: usize = 100;

// Binary operator precedence, loosest first.
const PRECEDENCE: &[&[(Tok, BinOp)]] = &[
    &[(Tok::OrOr, BinOp::Or)],
    &[(Tok::AndAnd, BinOp::And)],
    &[(Tok::EqEq, BinOp::Eq), (Tok::NotEq, BinOp::Ne)],
    &[
        (Tok::Lt, BinOp::Lt),
        (Tok::Le, BinOp::Le),
        (Tok::Gt, BinOp::Gt),
        (Tok::Ge, BinOp::Ge),
    ],
    &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)],
    &[
        (Tok::Star, BinOp::Mul),
        (Tok::Slash, BinOp::Div),
        (Tok::Percent, BinOp::Rem),
    ],
];

impl Parser {
    fn new(tokens: Vec<Token>, end: usize) -> Self {
        Parser {
            tokens,
            pos: 0,
            end,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_nth(&self, n: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + n).map(|t| &t.tok)
    }

    /// Byte offset of the current token, or end of input.
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.0)
            .unwrap_or(self.end)
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.1)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err_expected(&self, what: &str) -> Diagnostic {
        let found = match self.peek() {
            Some(tok) => tok.to_string(),
            None => "end of input".to_string(),
        };
        Diagnostic::parse(format!("expected {}, found {}", what, found), self.offset())
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<Span, Diagnostic> {
        match self.tokens.get(self.pos) {
            Some(t) if t.tok == tok => {
                self.pos += 1;
                Ok(t.span)
            }
            _ => Err(self.err_expected(what)),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), Diagnostic> {
        match self.tokens.get(self.pos) {
            Some(Token {
                tok: Tok::Ident(name),
                span,
            }) => {
                let out = (name.clone(), *span);
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.err_expected(what)),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Tok::Newline) {}
    }

    /// Skip newlines and semicolons; returns whether anything was skipped.
    fn skip_separators(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(Tok::Newline | Tok::Semi)) {
            self.pos += 1;
        }
        self.pos > start
    }

    // ── Items ─────────────────────────────────────────────────────────

    fn parse_items(&mut self) -> Result<Vec<Item>, Diagnostic> {
        let mut items = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            items.push(self.parse_item()?);
            if !self.skip_separators() && self.peek().is_some() {
                return Err(self.err_expected("newline or `;`"));
            }
        }
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<Item, Diagnostic> {
        match self.peek() {
            Some(Tok::Func) => Ok(Item::Func(self.parse_func()?)),
            Some(Tok::Let) | Some(Tok::Var) => self.parse_global(),
            Some(Tok::TypeAlias) => self.parse_typealias(),
            Some(Tok::Ident(_)) if self.peek_nth(1) == Some(&Tok::Assign) => {
                let (name, value, span) = self.parse_assignment()?;
                Ok(Item::Assign { name, value, span })
            }
            _ => Ok(Item::Expr(self.parse_expr()?)),
        }
    }

    fn parse_func(&mut self) -> Result<FuncDecl, Diagnostic> {
        let start = self.expect(Tok::Func, "`func`")?.0;
        let (name, _) = self.expect_ident("function name")?;
        self.expect(Tok::LParen, "`(`")?;
        let mut params = Vec::new();
        self.skip_newlines();
        if !self.eat(&Tok::RParen) {
            loop {
                self.skip_newlines();
                let (pname, pspan) = self.expect_ident("parameter name")?;
                self.expect(Tok::Colon, "`:`")?;
                let annotation = self.parse_type()?;
                params.push(Param {
                    name: pname,
                    span: (pspan.0, annotation.span.1),
                    annotation,
                });
                self.skip_newlines();
                if self.eat(&Tok::RParen) {
                    break;
                }
                self.expect(Tok::Comma, "`,` or `)`")?;
            }
        }
        let ret = if self.eat(&Tok::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(FuncDecl {
            name,
            params,
            ret,
            span: (start, body.span.1),
            body,
        })
    }

    fn parse_global(&mut self) -> Result<Item, Diagnostic> {
        let start = self.offset();
        let mutable = matches!(self.bump().map(|t| t.tok), Some(Tok::Var));
        let (name, _) = self.expect_ident("variable name")?;
        let annotation = if self.eat(&Tok::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(Tok::Assign, "`=`")?;
        self.skip_newlines();
        let value = self.parse_expr()?;
        Ok(Item::Global {
            name,
            mutable,
            annotation,
            span: (start, value.span().1),
            value,
        })
    }

    fn parse_typealias(&mut self) -> Result<Item, Diagnostic> {
        let start = self.expect(Tok::TypeAlias, "`typealias`")?.0;
        let (name, _) = self.expect_ident("type alias name")?;
        self.expect(Tok::Assign, "`=`")?;
        let target = self.parse_type()?;
        Ok(Item::TypeAlias {
            name,
            span: (start, target.span.1),
            target,
        })
    }

    fn parse_assignment(&mut self) -> Result<(String, Expr, Span), Diagnostic> {
        let (name, span) = self.expect_ident("variable name")?;
        self.expect(Tok::Assign, "`=`")?;
        self.skip_newlines();
        let value = self.parse_expr()?;
        let span = (span.0, value.span().1);
        Ok((name, value, span))
    }

    fn parse_type(&mut self) -> Result<TypeExpr, Diagnostic> {
        let (name, span) = self.expect_ident("type name")?;
        Ok(TypeExpr { name, span })
    }

    // ── Blocks ────────────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Block, Diagnostic> {
        let start = self.expect(Tok::LBrace, "`{`")?.0;
        let mut stmts = Vec::new();
        let mut tail = None;
        loop {
            self.skip_separators();
            match self.peek() {
                Some(Tok::RBrace) => break,
                Some(Tok::Return) => {
                    self.bump();
                    tail = Some(Box::new(self.parse_expr()?));
                    self.skip_separators();
                    if self.peek() != Some(&Tok::RBrace) {
                        return Err(self.err_expected("`}` after return"));
                    }
                    break;
                }
                Some(Tok::Let) => {
                    let let_start = self.offset();
                    self.bump();
                    let (name, _) = self.expect_ident("local name")?;
                    let annotation = if self.eat(&Tok::Colon) {
                        Some(self.parse_type()?)
                    } else {
                        None
                    };
                    self.expect(Tok::Assign, "`=`")?;
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    stmts.push(Stmt::Let {
                        name,
                        annotation,
                        span: (let_start, value.span().1),
                        value,
                    });
                    if !self.skip_separators() && self.peek() != Some(&Tok::RBrace) {
                        return Err(self.err_expected("newline or `;`"));
                    }
                }
                Some(Tok::Ident(_)) if self.peek_nth(1) == Some(&Tok::Assign) => {
                    let (name, value, span) = self.parse_assignment()?;
                    stmts.push(Stmt::Assign { name, value, span });
                    if !self.skip_separators() && self.peek() != Some(&Tok::RBrace) {
                        return Err(self.err_expected("newline or `;`"));
                    }
                }
                Some(_) => {
                    let expr = self.parse_expr()?;
                    let separated = self.skip_separators();
                    if self.peek() == Some(&Tok::RBrace) {
                        tail = Some(Box::new(expr));
                        break;
                    }
                    if !separated {
                        return Err(self.err_expected("newline or `;`"));
                    }
                    stmts.push(Stmt::Expr(expr));
                }
                None => return Err(self.err_expected("`}`")),
            }
        }
        let end = self.expect(Tok::RBrace, "`}`")?.1;
        Ok(Block {
            stmts,
            tail,
            span: (start, end),
        })
    }

    // ── Expressions ───────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, Diagnostic> {
        if level == PRECEDENCE.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let op = match self.peek() {
                Some(tok) => PRECEDENCE[level]
                    .iter()
                    .find(|(t, _)| t == tok)
                    .map(|(_, op)| *op),
                None => None,
            };
            let Some(op) = op else { break };
            self.bump();
            self.skip_newlines();
            let rhs = self.parse_binary(level + 1)?;
            let span = (lhs.span().0, rhs.span().1);
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    /// Every operand passes through here, so this bounds the recursion of
    /// parentheses, unary operators, calls and nested blocks alike.
    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        if self.depth == MAX_DEPTH {
            return Err(Diagnostic::parse(
                format!("expression nested more than {} levels deep", MAX_DEPTH),
                self.offset(),
            ));
        }
        self.depth += 1;
        let result = self.parse_operand();
        self.depth -= 1;
        result
    }

    fn parse_operand(&mut self) -> Result<Expr, Diagnostic> {
        let op = match self.peek() {
            Some(Tok::Minus) => UnaryOp::Neg,
            Some(Tok::Bang) => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        let start = self.offset();
        self.bump();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            span: (start, operand.span().1),
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.offset();
        match self.peek().cloned() {
            Some(Tok::Int(value)) => {
                let span = self.bump().map(|t| t.span).unwrap_or((start, start));
                Ok(Expr::IntLit { value, span })
            }
            Some(Tok::Bool(value)) => {
                let span = self.bump().map(|t| t.span).unwrap_or((start, start));
                Ok(Expr::BoolLit { value, span })
            }
            Some(Tok::Ident(name)) => {
                let span = self.bump().map(|t| t.span).unwrap_or((start, start));
                if self.eat(&Tok::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        callee: name,
                        args,
                        span: (start, self.prev_end()),
                    })
                } else {
                    Ok(Expr::Var { name, span })
                }
            }
            Some(Tok::LParen) => {
                self.bump();
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(Tok::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Tok::If) => self.parse_if(),
            _ => Err(self.err_expected("expression")),
        }
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        self.skip_newlines();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            self.skip_newlines();
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            self.expect(Tok::Comma, "`,` or `)`")?;
        }
    }

    fn parse_if(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.expect(Tok::If, "`if`")?.0;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;

        let saved = self.pos;
        self.skip_newlines();
        let else_block = if self.eat(&Tok::Else) {
            if self.peek() == Some(&Tok::If) {
                let nested = self.parse_if()?;
                let span = nested.span();
                Some(Block {
                    stmts: Vec::new(),
                    tail: Some(Box::new(nested)),
                    span,
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            self.pos = saved;
            None
        };
        let end = else_block
            .as_ref()
            .map(|b| b.span.1)
            .unwrap_or(then_block.span.1);
        Ok(Expr::If {
            cond: Box::new(cond),
            then_block,
            else_block,
            span: (start, end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_function_declaration() {
        let items = parse_input("func add(a: Int, b: Int) -> Int { a + b }").unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Item::Func(f) => {
                assert_eq!(f.name, "add");
                assert_eq!(f.params.len(), 2);
                assert_eq!(f.params[1].annotation.name, "Int");
                assert_eq!(f.ret.as_ref().map(|t| t.name.as_str()), Some("Int"));
                assert!(f.body.stmts.is_empty());
                assert!(matches!(
                    f.body.tail.as_deref(),
                    Some(Expr::Binary { op: BinOp::Add, .. })
                ));
            }
            other => panic!("expected Func, got {:?}", other),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        let expr = parse_expr("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("expected Add at root, got {:?}", other),
        }
    }

    #[test]
    fn subtraction_is_left_associative() {
        let expr = parse_expr("10 - 3 - 2").unwrap();
        match expr {
            Expr::Binary { op: BinOp::Sub, lhs, .. } => {
                assert!(matches!(*lhs, Expr::Binary { op: BinOp::Sub, .. }));
            }
            other => panic!("expected Sub at root, got {:?}", other),
        }
    }

    #[test]
    fn logical_operators_bind_loosest() {
        let expr = parse_expr("a < b && c == d || e").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinOp::Or, .. }));
    }

    #[test]
    fn items_separated_by_semicolons_and_newlines() {
        let items = parse_input("let x = 1; var y = 2\nx = 3\nx + y").unwrap();
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], Item::Global { mutable: false, .. }));
        assert!(matches!(&items[1], Item::Global { mutable: true, .. }));
        assert!(matches!(&items[2], Item::Assign { .. }));
        assert!(matches!(&items[3], Item::Expr(_)));
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = parse_input("let x = 1 let y = 2").unwrap_err();
        assert_eq!(
            err,
            Diagnostic::parse("expected newline or `;`, found `let`", 10)
        );
    }

    #[test]
    fn block_with_locals_and_return() {
        let items = parse_input(
            "func f(n: Int) -> Int {\n  let m = n * 2\n  print(m)\n  return m + 1\n}",
        )
        .unwrap();
        let Item::Func(f) = &items[0] else {
            panic!("expected Func")
        };
        assert_eq!(f.body.stmts.len(), 2);
        assert!(matches!(&f.body.stmts[0], Stmt::Let { name, .. } if name == "m"));
        assert!(f.body.tail.is_some());
    }

    #[test]
    fn else_if_chain_on_separate_lines() {
        let expr = parse_expr("if a { 1 }\nelse if b { 2 }\nelse { 3 }").unwrap();
        let Expr::If { else_block: Some(else_block), .. } = expr else {
            panic!("expected If with else")
        };
        assert!(matches!(else_block.tail.as_deref(), Some(Expr::If { .. })));
    }

    #[test]
    fn if_without_else_does_not_swallow_next_item() {
        let items = parse_input("if c { print(1) }\nprint(2)").unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn call_spans_cover_arguments() {
        let expr = parse_expr("f(1,\n  2)").unwrap();
        match expr {
            Expr::Call { args, span, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(span, (0, 9));
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn typealias_item() {
        let items = parse_input("typealias Count = Int").unwrap();
        assert!(matches!(
            &items[0],
            Item::TypeAlias { name, target, .. } if name == "Count" && target.name == "Int"
        ));
    }

    #[test]
    fn unterminated_block() {
        let err = parse_input("func f() {").unwrap_err();
        assert!(matches!(err, Diagnostic::Parse { offset: 10, .. }));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let src = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = parse_input(&src).unwrap_err();
        assert!(matches!(
            err,
            Diagnostic::Parse { ref message, offset } if message.contains("nested") && offset == MAX_DEPTH
        ));
        assert!(parse_expr(&"-".repeat(10_000)).is_err());

        let ok = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert!(parse_expr(&ok).is_ok());
    }
}
