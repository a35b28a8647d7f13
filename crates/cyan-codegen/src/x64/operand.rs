//! Registers and operands for the pseudo-x64 lowering (spec §4.9).
//!
//! The original compiler modeled `Operand` as a small class hierarchy
//! (`ValueOperand`, `RegisterOperand`, `StackMemoryOperand`,
//! `GlobalMemoryOperand`, `OffsetMemoryOperand`, `LabelOperand`,
//! `ImmediateOperand`) dispatched through `dynamic_cast`. Here it is one
//! `Operand` enum; a virtual `Operand::Value` is resolved to a physical
//! [`PhysLoc`] by [`super::regalloc`] and looked up through
//! [`ValuePool::loc`] at emission time, rather than mutating a
//! `shared_ptr<Operand>` in place.

use std::fmt;

/// One of the 12 registers the allocator hands out. RAX and RDX are kept
/// out of this set — per spec §4.9 they're reserved (return value /
/// division scratch); RBP is the frame base and RSP the stack pointer, so
/// neither is general-purpose either. This matches the original's
/// `GP_REG_START..GP_REG_END` allocation loop (`RBX` through `R15`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    Rbx,
    Rcx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

/// Every register the emitter can name, allocatable or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnyRegister {
    Gp(Register),
    Rax,
    Rdx,
    Rbp,
    Rsp,
}

impl Register {
    /// The allocatable pool, in the original's allocation order.
    pub const ALL: [Register; 12] = [
        Register::Rbx,
        Register::Rcx,
        Register::Rsi,
        Register::Rdi,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    /// Is this one of the callee-saved registers the prologue/epilogue
    /// must push/pop when used (spec §4.9 emission)? `RBX` and `R12`-`R15`
    /// are callee-saved in the SysV ABI; the rest of the allocatable pool
    /// (`RCX`, `RSI`, `RDI`, `R8`-`R11`) is caller-saved and handled by
    /// `CallPreserve`/`CallRestore` instead.
    pub fn is_callee_saved(self) -> bool {
        matches!(self, Register::Rbx | Register::R12 | Register::R13 | Register::R14 | Register::R15)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        AnyRegister::Gp(*self).fmt(f)
    }
}

impl fmt::Display for AnyRegister {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AnyRegister::Gp(Register::Rbx) => "rbx",
            AnyRegister::Gp(Register::Rcx) => "rcx",
            AnyRegister::Gp(Register::Rsi) => "rsi",
            AnyRegister::Gp(Register::Rdi) => "rdi",
            AnyRegister::Gp(Register::R8) => "r8",
            AnyRegister::Gp(Register::R9) => "r9",
            AnyRegister::Gp(Register::R10) => "r10",
            AnyRegister::Gp(Register::R11) => "r11",
            AnyRegister::Gp(Register::R12) => "r12",
            AnyRegister::Gp(Register::R13) => "r13",
            AnyRegister::Gp(Register::R14) => "r14",
            AnyRegister::Gp(Register::R15) => "r15",
            AnyRegister::Rax => "rax",
            AnyRegister::Rdx => "rdx",
            AnyRegister::Rbp => "rbp",
            AnyRegister::Rsp => "rsp",
        };
        write!(f, "{}", s)
    }
}

/// The byte register alias used by `setcc` destinations (spec §4.9:
/// "compare+setcc into a byte register").
pub fn byte_register_name(reg: AnyRegister) -> &'static str {
    match reg {
        AnyRegister::Gp(Register::Rbx) => "bl",
        AnyRegister::Gp(Register::Rcx) => "cl",
        AnyRegister::Gp(Register::Rsi) => "sil",
        AnyRegister::Gp(Register::Rdi) => "dil",
        AnyRegister::Gp(Register::R8) => "r8b",
        AnyRegister::Gp(Register::R9) => "r9b",
        AnyRegister::Gp(Register::R10) => "r10b",
        AnyRegister::Gp(Register::R11) => "r11b",
        AnyRegister::Gp(Register::R12) => "r12b",
        AnyRegister::Gp(Register::R13) => "r13b",
        AnyRegister::Gp(Register::R14) => "r14b",
        AnyRegister::Gp(Register::R15) => "r15b",
        AnyRegister::Rax => "al",
        AnyRegister::Rdx => "dl",
        AnyRegister::Rbp | AnyRegister::Rsp => unreachable!("setcc never targets rbp/rsp"),
    }
}

/// A dense index into a function's pseudo-value arena (spec §4.9's
/// "Virtual Value": "SSA-like placeholder with a pointer to its eventually
/// assigned physical location").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Where a [`ValueId`] ends up living once [`super::regalloc`] runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhysLoc {
    Register(Register),
    /// `[rbp + offset]`.
    Stack(i32),
}

/// An x64 operand in the pseudo-instruction stream, before or after
/// register allocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Resolved through [`ValuePool::loc`] at emission time.
    Value(ValueId),
    Fixed(AnyRegister),
    /// `[rbp + offset]`, used directly for allocas/arguments/spill slots
    /// that never need a `ValueId` (spec §4.9's "Stack slot").
    Stack(i32),
    /// `[name]`, a global (spec §4.9's "Global memory").
    Global(String),
    /// `[base + disp]` where `base` is itself a pseudo-value holding a
    /// pointer (spec §4.9's "Offset memory", used for field/heap access
    /// through a `Load`/`Store` address that isn't itself an
    /// alloca/arg/global). Only appears before [`super::regalloc`] runs —
    /// `base` always resolves into a register, never a spill slot, since
    /// x86-64 addressing can't chain two memory indirections.
    Offset(ValueId, i32),
    /// `[reg + disp]`. What `Offset` becomes once `base` has a physical
    /// register.
    OffsetReg(AnyRegister, i32),
    Imm(i64),
    Label(String),
}

impl Operand {
    /// Does this operand denote a memory location, post-allocation? Used by
    /// the two-memory-operand fixup (spec §8 invariant: no instruction may
    /// reference memory twice).
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Stack(_) | Operand::Global(_) | Operand::OffsetReg(..))
    }
}

/// Owns the per-function arena of pseudo-values and, after allocation,
/// their physical locations.
#[derive(Debug, Default)]
pub struct ValuePool {
    locs: Vec<Option<PhysLoc>>,
}

impl ValuePool {
    pub fn new() -> Self {
        ValuePool { locs: Vec::new() }
    }

    pub fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.locs.len() as u32);
        self.locs.push(None);
        id
    }

    pub fn loc(&self, id: ValueId) -> Option<PhysLoc> {
        self.locs[id.0 as usize]
    }

    pub fn set_loc(&mut self, id: ValueId, loc: PhysLoc) {
        self.locs[id.0 as usize] = Some(loc);
    }

    pub fn clear_loc(&mut self, id: ValueId) {
        self.locs[id.0 as usize] = None;
    }

    pub fn len(&self) -> usize {
        self.locs.len()
    }
}
