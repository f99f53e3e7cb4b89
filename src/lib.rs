pub mod ast;
pub mod codegen;
pub mod config;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod indirection;
pub mod lexer;
pub mod logging;
pub mod names;
pub mod namespace;
pub mod native;
pub mod parser;
pub mod partition;
pub mod repl;
pub mod runtime;
pub mod session;
pub mod typechecker;
pub mod types;
