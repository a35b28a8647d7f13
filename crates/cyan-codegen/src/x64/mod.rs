//! The x86-64 code generator (spec §4.9, §6.3): two-stage instruction
//! selection, linear-scan register allocation, and Intel-syntax assembly
//! emission. Mirrors the original `codegen_x64.cpp`'s `CodeGenX64` class,
//! split here into one module per stage instead of one monolithic pass.

pub mod emit;
pub mod lower;
pub mod operand;
pub mod pseudo;
pub mod regalloc;

pub use emit::emit_module;
