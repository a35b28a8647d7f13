//! Cyan compiler IR, analyses, IR-to-IR transforms, optimization pipelines,
//! and the x86-64 code generator (spec §2–§4, §9). The teacher analogue is
//! `cranelift-codegen`: one crate holding the type pool, the SSA-form IR,
//! every pass that walks or mutates it, and the lowering to a concrete ISA.

pub mod dce;
pub mod diagnostics;
pub mod init_order;
pub mod inliner;
pub mod inst_rewriter;
pub mod ir;
pub mod mem2reg;
pub mod optimize;
pub mod phi_eliminator;
pub mod unreachable_elim;
pub mod x64;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use optimize::{run_traced, Pipeline};

/// Fatal conditions raised by this crate. Per spec §7, transforms and code
/// generators never fail partially — a pass either leaves the IR in a
/// consistent state or the process aborts via `debug_assert!`/`assert!`.
/// This enum exists for the handful of conditions that are a caller's
/// mistake rather than a violated IR invariant: an unsupported `-O` level,
/// or codegen being asked for a lowering spec §9 Open Question #1 leaves
/// unimplemented (integer division/modulo on the x64 backend).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid optimization level `{0}` (expected 0, 1, 2, or 3)")]
    InvalidOptimizationLevel(String),

    #[error("x64 codegen does not implement integer division/modulo lowering (spec open question)")]
    UnsupportedDivision,
}
