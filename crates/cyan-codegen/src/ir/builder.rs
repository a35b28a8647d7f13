//! The IR builder surface (spec §6.1) — the interface the (out-of-scope)
//! front end, and [`cyan_reader`](../../cyan_reader/index.html)'s textual
//! format, use to construct IR.

use crate::ir::entities::{Block, FuncId, Inst, StringId, TypeId};
use crate::ir::function::Function;
use crate::ir::instruction::{BinOp, InstructionData, Opcode, PhiBranch};
use crate::ir::module::Module;

/// A thin, stateless wrapper around `&mut Module` exposing typed factory
/// methods per spec §6.1. Kept as a separate type (rather than inherent
/// methods on `Module`/`Function`) so the front-end-facing surface is
/// obviously distinct from the arena plumbing transforms use internally.
pub struct IrBuilder<'a> {
    pub module: &'a mut Module,
}

impl<'a> IrBuilder<'a> {
    pub fn new(module: &'a mut Module) -> Self {
        IrBuilder { module }
    }

    pub fn declare_function(&mut self, name: &str, signature: TypeId) -> FuncId {
        self.module.declare_function(name, signature)
    }

    pub fn declare_global(&mut self, name: &str, ty: TypeId) {
        self.module.declare_global(name, ty);
    }

    pub fn intern_string(&mut self, content: &str) -> StringId {
        self.module.intern_string(content)
    }

    pub fn create_block(&mut self, func: FuncId, name: &str, depth: u32) -> Block {
        self.module.func_mut(func).create_block(name, depth)
    }

    fn push(&mut self, func: FuncId, block: Block, opcode: Opcode, ty: TypeId, name: Option<&str>) -> Inst {
        let f = self.module.func_mut(func);
        let named = name.map(|n| f.make_name(n));
        f.append_inst(block, InstructionData::new(opcode, ty, block, named))
    }

    pub fn build_imm_signed(&mut self, func: FuncId, block: Block, ty: TypeId, value: i64) -> Inst {
        self.push(func, block, Opcode::ImmSigned(value), ty, None)
    }

    pub fn build_imm_unsigned(&mut self, func: FuncId, block: Block, ty: TypeId, value: u64) -> Inst {
        self.push(func, block, Opcode::ImmUnsigned(value), ty, None)
    }

    pub fn build_binary(
        &mut self,
        func: FuncId,
        block: Block,
        op: BinOp,
        ty: TypeId,
        lhs: Inst,
        rhs: Inst,
        name: Option<&str>,
    ) -> Inst {
        self.push(func, block, Opcode::Binary { op, lhs, rhs }, ty, name)
    }

    pub fn build_load(&mut self, func: FuncId, block: Block, ty: TypeId, addr: Inst, name: Option<&str>) -> Inst {
        self.push(func, block, Opcode::Load { addr }, ty, name)
    }

    pub fn build_store(&mut self, func: FuncId, block: Block, ty: TypeId, addr: Inst, value: Inst) -> Inst {
        self.push(func, block, Opcode::Store { addr, value }, ty, None)
    }

    pub fn build_alloca(&mut self, func: FuncId, block: Block, ty: TypeId, count: Inst, name: Option<&str>) -> Inst {
        self.push(func, block, Opcode::Alloca { count }, ty, name)
    }

    pub fn build_call(
        &mut self,
        func: FuncId,
        block: Block,
        ty: TypeId,
        callee: Inst,
        args: Vec<Inst>,
        name: Option<&str>,
    ) -> Inst {
        self.push(func, block, Opcode::Call { callee, args }, ty, name)
    }

    pub fn build_ret(&mut self, func: FuncId, block: Block, value: Option<Inst>) -> Inst {
        self.module.func_mut(func).finish_ret(block, value)
    }

    pub fn build_new(&mut self, func: FuncId, block: Block, ty: TypeId, count: Inst, name: Option<&str>) -> Inst {
        self.push(func, block, Opcode::New { count }, ty, name)
    }

    pub fn build_delete(&mut self, func: FuncId, block: Block, ty: TypeId, addr: Inst) -> Inst {
        self.push(func, block, Opcode::Delete { addr }, ty, None)
    }

    /// Build an (initially empty) φ. Branches are added with
    /// [`Self::add_phi_branch`] — mirroring the original `PhiInst::Builder`
    /// (spec §9's φ-insertion note): a φ is registered before its
    /// predecessors are recursed into, so cyclic definitions can refer
    /// back to it before it's fully populated.
    pub fn build_phi(&mut self, func: FuncId, block: Block, ty: TypeId, name: Option<&str>) -> Inst {
        self.push(func, block, Opcode::Phi { branches: Vec::new() }, ty, name)
    }

    pub fn add_phi_branch(&mut self, func: FuncId, phi: Inst, value: Inst, from: Block) {
        let f = self.module.func_mut(func);
        if let Some(branches) = f.insts[phi].opcode.as_phi_branches_mut() {
            branches.push(PhiBranch { value, from });
        }
    }

    pub fn build_arg(&mut self, func: FuncId, block: Block, ty: TypeId, index: u32, name: Option<&str>) -> Inst {
        self.push(func, block, Opcode::Arg { index }, ty, name)
    }

    pub fn build_global(&mut self, func: FuncId, block: Block, ty: TypeId, name: &str) -> Inst {
        self.push(func, block, Opcode::Global { name: name.to_string() }, ty, None)
    }

    pub fn finish_jump(&mut self, func: FuncId, block: Block, target: Block) {
        self.module.func_mut(func).finish_jump(block, target);
    }

    pub fn finish_branch(&mut self, func: FuncId, block: Block, condition: Inst, then_b: Block, else_b: Block) {
        self.module.func_mut(func).finish_branch(block, condition, then_b, else_b);
    }

    pub fn function(&self, func: FuncId) -> &Function {
        self.module.func(func)
    }
}
