//! Cyan's register-based bytecode VM (spec §4.10, §5, §6.4): lowering from
//! `cyan_codegen::ir` to a fixed-shape bytecode, and the interpreter that
//! runs it. The teacher analogue is `cranelift-simplejit`/`wasmtime`'s
//! execution engines: this crate plays the same role cranelift-codegen's
//! JIT backends play for Wasm, just targeting cyan's own bytecode instead
//! of host machine code.

pub mod interp;
pub mod isa;
pub mod lower;
pub mod memory;

pub use interp::{Error, Interpreter, NativeFn, Program};
pub use isa::{Instruction, NumClass, Opcode, Operand, Reg, VmType};
pub use lower::{lower_function, LoweredFunction, VmFunction};
pub use memory::Memory;
