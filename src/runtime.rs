//! Host functions exposed to JIT-compiled code via `extern "C"`.
//! Registered with the engine as pinned runtime symbols.

use std::io::Write;

pub const PRINT_INT: &str = "splice_print_int";
pub const PRINT_BOOL: &str = "splice_print_bool";

pub extern "C" fn print_int(value: i64) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", value);
    let _ = out.flush();
}

pub extern "C" fn print_bool(value: i64) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", value != 0);
    let _ = out.flush();
}

/// Every runtime symbol with its host address.
pub fn symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        (PRINT_INT, print_int as *const u8),
        (PRINT_BOOL, print_bool as *const u8),
    ]
}
