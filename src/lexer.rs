use std::fmt;

use crate::error::{Diagnostic, Span};

/// A lexical token of Splice source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Int(i64),
    Bool(bool),
    Ident(String),
    // keywords
    Func,
    Let,
    Var,
    TypeAlias,
    If,
    Else,
    Return,
    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Arrow,
    Assign,
    // operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    /// Statement separator. Consecutive newlines collapse into one token.
    Newline,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tok::Int(v) => return write!(f, "{}", v),
            Tok::Bool(v) => return write!(f, "{}", v),
            Tok::Ident(name) => return write!(f, "`{}`", name),
            Tok::Func => "`func`",
            Tok::Let => "`let`",
            Tok::Var => "`var`",
            Tok::TypeAlias => "`typealias`",
            Tok::If => "`if`",
            Tok::Else => "`else`",
            Tok::Return => "`return`",
            Tok::LParen => "`(`",
            Tok::RParen => "`)`",
            Tok::LBrace => "`{`",
            Tok::RBrace => "`}`",
            Tok::Comma => "`,`",
            Tok::Colon => "`:`",
            Tok::Semi => "`;`",
            Tok::Arrow => "`->`",
            Tok::Assign => "`=`",
            Tok::Plus => "`+`",
            Tok::Minus => "`-`",
            Tok::Star => "`*`",
            Tok::Slash => "`/`",
            Tok::Percent => "`%`",
            Tok::EqEq => "`==`",
            Tok::NotEq => "`!=`",
            Tok::Lt => "`<`",
            Tok::Le => "`<=`",
            Tok::Gt => "`>`",
            Tok::Ge => "`>=`",
            Tok::AndAnd => "`&&`",
            Tok::OrOr => "`||`",
            Tok::Bang => "`!`",
            Tok::Newline => "newline",
        };
        f.write_str(s)
    }
}

/// A token with its byte span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
}

fn keyword_or_ident(word: &str) -> Tok {
    match word {
        "func" => Tok::Func,
        "let" => Tok::Let,
        "var" => Tok::Var,
        "typealias" => Tok::TypeAlias,
        "if" => Tok::If,
        "else" => Tok::Else,
        "return" => Tok::Return,
        "true" => Tok::Bool(true),
        "false" => Tok::Bool(false),
        _ => Tok::Ident(word.to_string()),
    }
}

peg::parser! {
    grammar splice_lexer() for str {
        rule comment() = "//" [^ '\n']*

        rule blank() = quiet!{([' ' | '\t' | '\r'] / comment())*}

        rule ident_start() = ['a'..='z' | 'A'..='Z' | '_' | '$']

        rule ident_char() = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '$']

        rule newline() -> Tok
            = ("\n" blank())+ { Tok::Newline }

        rule integer() -> Tok
            = n:$(['0'..='9']+) !ident_char()
              {? n.parse::<i64>().map(Tok::Int).or(Err("integer literal in range")) }

        rule word() -> Tok
            = w:$(ident_start() ident_char()*) { keyword_or_ident(w) }

        rule punct() -> Tok
            = "->" { Tok::Arrow }
            / "==" { Tok::EqEq }
            / "!=" { Tok::NotEq }
            / "<=" { Tok::Le }
            / ">=" { Tok::Ge }
            / "&&" { Tok::AndAnd }
            / "||" { Tok::OrOr }
            / "(" { Tok::LParen }
            / ")" { Tok::RParen }
            / "{" { Tok::LBrace }
            / "}" { Tok::RBrace }
            / "," { Tok::Comma }
            / ":" { Tok::Colon }
            / ";" { Tok::Semi }
            / "=" { Tok::Assign }
            / "+" { Tok::Plus }
            / "-" { Tok::Minus }
            / "*" { Tok::Star }
            / "/" { Tok::Slash }
            / "%" { Tok::Percent }
            / "<" { Tok::Lt }
            / ">" { Tok::Gt }
            / "!" { Tok::Bang }

        rule token() -> Token
            = s:position!() tok:(newline() / integer() / word() / punct()) e:position!()
              { Token { tok, span: (s, e) } }

        pub rule tokens() -> Vec<Token>
            = blank() toks:(t:token() blank() { t })* ![_] { toks }
    }
}

/// Split source text into tokens. Comments and horizontal whitespace are dropped.
pub fn tokenize(input: &str) -> Result<Vec<Token>, Diagnostic> {
    splice_lexer::tokens(input).map_err(|e| {
        let found = input[e.location.offset..]
            .chars()
            .next()
            .map(|c| format!("unexpected character '{}'", c))
            .unwrap_or_else(|| "unexpected end of input".to_string());
        Diagnostic::parse(found, e.location.offset)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn lex_function_header() {
        assert_eq!(
            toks("func add(a: Int) -> Int"),
            vec![
                Tok::Func,
                Tok::Ident("add".into()),
                Tok::LParen,
                Tok::Ident("a".into()),
                Tok::Colon,
                Tok::Ident("Int".into()),
                Tok::RParen,
                Tok::Arrow,
                Tok::Ident("Int".into()),
            ]
        );
    }

    #[test]
    fn lex_spans() {
        let tokens = tokenize("let x = 42").unwrap();
        assert_eq!(tokens[0].span, (0, 3));
        assert_eq!(tokens[3], Token { tok: Tok::Int(42), span: (8, 10) });
    }

    #[test]
    fn lex_dollar_identifier() {
        assert_eq!(toks("$R2 + 1")[0], Tok::Ident("$R2".into()));
    }

    #[test]
    fn lex_two_char_operators() {
        assert_eq!(
            toks("a <= b && c != d || !e"),
            vec![
                Tok::Ident("a".into()),
                Tok::Le,
                Tok::Ident("b".into()),
                Tok::AndAnd,
                Tok::Ident("c".into()),
                Tok::NotEq,
                Tok::Ident("d".into()),
                Tok::OrOr,
                Tok::Bang,
                Tok::Ident("e".into()),
            ]
        );
    }

    #[test]
    fn newlines_collapse_and_comments_vanish() {
        assert_eq!(
            toks("1 // one\n\n  // nothing\n2"),
            vec![Tok::Int(1), Tok::Newline, Tok::Int(2)]
        );
    }

    #[test]
    fn keywords_need_word_boundary() {
        assert_eq!(toks("iffy"), vec![Tok::Ident("iffy".into())]);
        assert_eq!(toks("trueish"), vec![Tok::Ident("trueish".into())]);
    }

    #[test]
    fn reject_unknown_character() {
        let err = tokenize("let x = @").unwrap_err();
        assert_eq!(err, Diagnostic::parse("unexpected character '@'", 8));
    }

    #[test]
    fn reject_integer_overflow() {
        assert!(tokenize("99999999999999999999").is_err());
    }
}
