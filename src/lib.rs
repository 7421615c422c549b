//! Front end for the ember language: source text is lexed, parsed into an
//! AST and lowered to LLVM IR one top-level form at a time.

pub mod ast;
pub mod cli;
pub mod codegen;
pub mod driver;
pub mod lexer;
pub mod parser;
