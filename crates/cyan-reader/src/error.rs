use cyan_codegen::diagnostics::Diagnostics;

/// Top-level failure from [`crate::parse_module`]. Individual malformed
/// constructs are collected into a [`Diagnostics`] as the parser recovers
/// and keeps going (spec §7's error-collector supplement); this variant is
/// what `parse_module` returns once that collector has seen at least one
/// error.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("{} error(s) parsing textual IR", .0.error_count())]
    Malformed(Diagnostics),

    /// A lexical error: these abort immediately since there is no sensible
    /// token stream left to recover on.
    #[error("{message} at line {line}, column {column}")]
    Lex { message: String, line: u32, column: u32 },
}
