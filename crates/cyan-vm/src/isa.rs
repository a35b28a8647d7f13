//! The bytecode instruction set (spec §4.10, §6.4): a fixed shape —
//! `(opcode, type, dst, imm-or-(rs, rt))` — regardless of opcode, so the
//! interpreter's dispatch loop never needs opcode-specific decoding beyond
//! the `match`. Unlike the original's packed two-machine-word encoding,
//! there's no file format to round-trip (spec §6.4: "in-memory only"), so
//! each field is simply its natural Rust width.

use std::fmt;

/// `(numeric class, log2 operand byte width)`, carried on every
/// instruction so `load`/`store`/`div`/`mod`/shifts/compares and pointer
/// arithmetic pick the right width and signedness without a second lookup
/// (spec §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumClass {
    Signed,
    Unsigned,
    Pointer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmType {
    pub class: NumClass,
    pub log2_width: u8,
}

impl VmType {
    pub const WORD: VmType = VmType {
        class: NumClass::Signed,
        log2_width: 3,
    };

    pub const POINTER: VmType = VmType {
        class: NumClass::Pointer,
        log2_width: 3,
    };

    pub fn byte_width(self) -> u32 {
        1 << self.log2_width
    }
}

/// A register index into the current frame's register file.
pub type Reg = u32;

/// Either an immediate or a pair of source registers — never both; which
/// one a given [`Opcode`] reads is fixed by the opcode itself, mirroring
/// the original's tagged union of `imm` vs `(rs, rt)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Imm(i64),
    Regs(Reg, Reg),
}

impl Operand {
    pub fn rs(self) -> Reg {
        match self {
            Operand::Regs(rs, _) => rs,
            Operand::Imm(_) => panic!("operand is an immediate, not a register pair"),
        }
    }

    pub fn rt(self) -> Reg {
        match self {
            Operand::Regs(_, rt) => rt,
            Operand::Imm(_) => panic!("operand is an immediate, not a register pair"),
        }
    }

    pub fn imm(self) -> i64 {
        match self {
            Operand::Imm(v) => v,
            Operand::Regs(..) => panic!("operand is a register pair, not an immediate"),
        }
    }
}

/// Spec §4.10's opcode set, one variant per mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Arg,
    Br,
    Bnr,
    Glob,
    Jump,
    Li,
    Add,
    Alloc,
    And,
    Call,
    Delete,
    Div,
    Load,
    Mod,
    Mov,
    Mul,
    New,
    Nor,
    Or,
    Pop,
    Push,
    Ret,
    Seq,
    Shl,
    Shr,
    Sle,
    Slt,
    Store,
    Sub,
    Xor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub ty: VmType,
    pub dst: Reg,
    pub operand: Operand,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.operand {
            Operand::Imm(v) => write!(f, "{:?} r{}, {}", self.op, self.dst, v),
            Operand::Regs(rs, rt) => write!(f, "{:?} r{}, r{}, r{}", self.op, self.dst, rs, rt),
        }
    }
}
