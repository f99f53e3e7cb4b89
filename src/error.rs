use thiserror::Error;

use crate::engine::EngineError;

/// Byte offset range in source text.
pub type Span = (usize, usize);

/// A front-end diagnostic. Any diagnostic aborts the current input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("Parse error at offset {offset}: {message}")]
    Parse { message: String, offset: usize },
    #[error("Type error at {}..{}: {message}", span.0, span.1)]
    Type { message: String, span: Span },
}

impl Diagnostic {
    pub fn parse(message: impl Into<String>, offset: usize) -> Self {
        Diagnostic::Parse {
            message: message.into(),
            offset,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Diagnostic::Type {
            message: message.into(),
            span,
        }
    }

    fn offset(&self) -> usize {
        match self {
            Diagnostic::Parse { offset, .. } => *offset,
            Diagnostic::Type { span, .. } => span.0,
        }
    }
}

/// Lowering a compilation unit to native IR failed.
#[derive(Debug, Clone, Error)]
#[error("failed to lower `{unit}`: {message}")]
pub struct LowerError {
    pub unit: String,
    pub message: String,
}

/// Outcome of an input that did not execute.
///
/// Every variant except `EntryInvocation` leaves the session exactly as it was
/// before the input.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("{0}")]
    Compile(#[from] Diagnostic),
    #[error("invalid redeclaration of `{name}`")]
    InvalidRedeclaration { name: String },
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error("link error: {0}")]
    Link(#[from] EngineError),
    #[error("could not invoke `{symbol}`: {reason}")]
    EntryInvocation { symbol: String, reason: String },
}

/// Format a diagnostic with source context, showing the offending line and a caret.
pub fn format_error(source: &str, err: &Diagnostic) -> String {
    let (line_num, col, line_text) = offset_to_line_col(source, err.offset());
    format!(
        "{}\n  --> {}:{}\n   | {}\n   | {}^",
        err,
        line_num,
        col,
        line_text,
        " ".repeat(col.saturating_sub(1))
    )
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize, &str) {
    let offset = offset.min(source.len());
    let mut line_start = 0;
    let mut line_num = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line_start = i + 1;
            line_num += 1;
        }
    }
    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(source.len());
    let col = offset - line_start + 1;
    (line_num, col, &source[line_start..line_end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_points_at_offset() {
        let src = "let x = 1\nlet y = @";
        let err = Diagnostic::parse("unexpected character '@'", 18);
        let rendered = format_error(src, &err);
        assert!(rendered.contains("--> 2:9"));
        assert!(rendered.ends_with("   |         ^"));
    }

    #[test]
    fn offset_past_end_is_clamped() {
        let err = Diagnostic::parse("unexpected end of input", 99);
        let rendered = format_error("1 +", &err);
        assert!(rendered.contains("--> 1:4"));
    }
}
