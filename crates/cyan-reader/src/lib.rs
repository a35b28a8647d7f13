//! A minimal textual encoding of `cyan_codegen::ir` (spec §0/§6.1) — not the
//! cyan source language (lexing/parsing that stays out of scope), but a
//! direct, low-level rendering of the IR itself: functions, blocks, typed
//! instructions. The teacher analogue is `cranelift-reader`'s `.clif`
//! format, playing the same stand-in role here that it plays for
//! Cranelift: the way `cyan-driver` and the test suite feed the pipeline
//! without a real front end.
//!
//! [`cyan_codegen::ir::dump::module_to_string`] is the printing half;
//! [`parse_module`] is this crate's mirror-image reader.

mod error;
mod lexer;
mod parser;

pub use error::ParseError;
pub use parser::parse_module;
