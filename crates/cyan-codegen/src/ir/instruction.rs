//! Instructions: a tagged sum over the opcodes described in spec §3.
//!
//! The original C++ compiler modelled each opcode as its own class in an
//! `Instruction` hierarchy, downcast with `dynamic_cast`. Rust has no
//! virtual dispatch to imitate, so `Opcode` is a plain enum and every
//! "downcast" the original performed (`is<T>()`/`to<T>()`) becomes a match
//! arm or an `if let`.

use crate::ir::entities::{Block, Inst, TypeId};

/// Binary operators. The comparison variants (`Sne`, `Sgt`, `Sge`) exist at
/// the IR level for a natural front end to emit, but neither backend has a
/// native opcode for them: x64 instruction selection and VM codegen both
/// normalize `Sgt`/`Sge` to `Slt`/`Sle` with swapped operands, and `Sne` to
/// `Seq` with the result negated, because that's the full comparison set
/// the x86-64 `setcc` subset used here and the VM's `seq`/`slt`/`sle`
/// opcodes actually provide (see spec §4.9, §6.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Nor,
    Shl,
    Shr,
    Seq,
    Sne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl BinOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Nor | BinOp::Seq | BinOp::Sne
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Seq | BinOp::Sne | BinOp::Slt | BinOp::Sle | BinOp::Sgt | BinOp::Sge
        )
    }

    /// The operator obtained by swapping `lhs`/`rhs`. Used by the
    /// commutative normalization pass (§4.3, §4.9) and by comparison
    /// lowering to reach the `{Seq, Slt, Sle}` subset both backends
    /// implement natively.
    pub fn swapped(self) -> BinOp {
        match self {
            BinOp::Sgt => BinOp::Slt,
            BinOp::Sge => BinOp::Sle,
            BinOp::Slt => BinOp::Sgt,
            BinOp::Sle => BinOp::Sge,
            other => other,
        }
    }
}

/// One φ branch: the value contributed by a specific predecessor block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhiBranch {
    pub value: Inst,
    pub from: Block,
}

/// The opcode-specific payload of an instruction. Every variant that
/// references other instructions does so through an [`Inst`] handle, never
/// ownership — see spec §3's "Back-references everywhere" design note.
#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    ImmSigned(i64),
    ImmUnsigned(u64),
    Binary { op: BinOp, lhs: Inst, rhs: Inst },
    Load { addr: Inst },
    Store { addr: Inst, value: Inst },
    /// `count` is itself an instruction (almost always an immediate) giving
    /// the number of elements to reserve, matching the original's
    /// `AllocaInst(type, count_inst, ...)` signature.
    Alloca { count: Inst },
    Call { callee: Inst, args: Vec<Inst> },
    Ret { value: Option<Inst> },
    New { count: Inst },
    Delete { addr: Inst },
    Phi { branches: Vec<PhiBranch> },
    Arg { index: u32 },
    Global { name: String },
    /// A not-yet-resolved placeholder; legal only while the IR builder is
    /// still discovering forward references, never in IR handed to a
    /// transform or code generator.
    Forward,
}

impl Opcode {
    /// Visit every instruction operand this opcode references (not
    /// including the φ's per-predecessor `from` blocks, which are control
    /// flow, not data).
    pub fn for_each_operand(&self, mut f: impl FnMut(Inst)) {
        match self {
            Opcode::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Opcode::Load { addr } => f(*addr),
            Opcode::Store { addr, value } => {
                f(*addr);
                f(*value);
            }
            Opcode::Alloca { count } => f(*count),
            Opcode::Call { callee, args } => {
                f(*callee);
                for a in args {
                    f(*a);
                }
            }
            Opcode::Ret { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            Opcode::New { count } => f(*count),
            Opcode::Delete { addr } => f(*addr),
            Opcode::Phi { branches } => {
                for b in branches {
                    f(b.value);
                }
            }
            Opcode::ImmSigned(_)
            | Opcode::ImmUnsigned(_)
            | Opcode::Arg { .. }
            | Opcode::Global { .. }
            | Opcode::Forward => {}
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Inst)) {
        match self {
            Opcode::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Opcode::Load { addr } => f(addr),
            Opcode::Store { addr, value } => {
                f(addr);
                f(value);
            }
            Opcode::Alloca { count } => f(count),
            Opcode::Call { callee, args } => {
                f(callee);
                for a in args.iter_mut() {
                    f(a);
                }
            }
            Opcode::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            Opcode::New { count } => f(count),
            Opcode::Delete { addr } => f(addr),
            Opcode::Phi { branches } => {
                for b in branches.iter_mut() {
                    f(&mut b.value);
                }
            }
            Opcode::ImmSigned(_)
            | Opcode::ImmUnsigned(_)
            | Opcode::Arg { .. }
            | Opcode::Global { .. }
            | Opcode::Forward => {}
        }
    }

    /// Is this one of the DCE roots spec §4.6 marks directly: `call`,
    /// `ret`, `store`, `delete`? (Branch conditions are roots too, but
    /// those are tracked per-block, not per-instruction.)
    pub fn is_dce_root(&self) -> bool {
        matches!(
            self,
            Opcode::Call { .. } | Opcode::Ret { .. } | Opcode::Store { .. } | Opcode::Delete { .. }
        )
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Opcode::ImmSigned(_) | Opcode::ImmUnsigned(_))
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Opcode::Phi { .. })
    }

    pub fn is_alloca(&self) -> bool {
        matches!(self, Opcode::Alloca { .. })
    }

    pub fn as_phi_branches(&self) -> Option<&[PhiBranch]> {
        match self {
            Opcode::Phi { branches } => Some(branches),
            _ => None,
        }
    }

    pub fn as_phi_branches_mut(&mut self) -> Option<&mut Vec<PhiBranch>> {
        match self {
            Opcode::Phi { branches } => Some(branches),
            _ => None,
        }
    }
}

/// A single IR instruction: opcode payload plus the bookkeeping every
/// variant shares (spec §3's `Instruction` base: a type, an owner block, an
/// optional name, and a reference count maintained by
/// [`crate::dce::eliminate`]).
#[derive(Clone, Debug)]
pub struct InstructionData {
    pub opcode: Opcode,
    pub ty: TypeId,
    pub name: Option<String>,
    pub owner: Block,
    pub ref_count: u32,
    /// Set once an instruction is removed from its block's instruction
    /// list; the arena slot itself is never reclaimed so existing `Inst`
    /// handles stay valid (a transform that already captured a handle to a
    /// deleted instruction should have rewritten it through a `ValueMap`
    /// first — this flag is a last-resort assertion aid, not a control path).
    pub dead: bool,
}

impl InstructionData {
    pub fn new(opcode: Opcode, ty: TypeId, owner: Block, name: Option<String>) -> Self {
        InstructionData {
            opcode,
            ty,
            name,
            owner,
            ref_count: 0,
            dead: false,
        }
    }
}
