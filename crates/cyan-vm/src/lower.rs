//! IR → bytecode lowering (spec §4.10).
//!
//! Unlike the x64 backend, the register VM has no fixed register count to
//! economize on ("each function owns a dense register file"), so lowering
//! never needs an allocator: every IR instruction that produces a value
//! gets its own permanent VM register, assigned once in definition order.
//! φs get their register the same way everything else does; their
//! contributions are planted as `mov`s at the tail of each predecessor
//! (spec §4.10: "using a single destination register for all
//! contributions"), the same join strategy the x64 backend's `edge_target`
//! uses, just without needing a synthetic edge block since the VM has no
//! "both arms read the same clobbered register" hazard to dodge — each
//! predecessor only ever plants the φ's one branch for its own edge.
//!
//! Function pointers share the `i64` value space with data addresses
//! (spec §6.4: "`call` takes the target function pointer through a
//! register"). Since [`crate::memory`] reserves every non-negative `i64` as
//! a `Region::{Global,Stack,Heap}` address, function pointers are encoded as
//! negative numbers: `-(table_index + 1)`, where `table_index` indexes
//! [`crate::Program::functions`] (cyan functions first, then natives — see
//! [`crate::interp`]). `glob` is the only opcode that can produce one.
//!
//! A `glob` of a *data* global can't be resolved to an absolute address
//! until [`crate::Program::compile`] has laid out the whole module's global
//! segment, so this module doesn't try: it emits a placeholder immediate
//! and returns the `(code index, name)` pairs that need patching once that
//! layout exists, the same two-pass shape `cyan_codegen::x64::emit` uses
//! for vtables and string labels.

use std::collections::HashMap;

use cyan_codegen::ir::entities::{Block, Inst, TypeId};
use cyan_codegen::ir::function::Function;
use cyan_codegen::ir::instruction::{BinOp, Opcode};
use cyan_codegen::ir::module::Module;
use cyan_codegen::ir::types::TypeData;
use cyan_entity::EntityRef;

use crate::isa::{Instruction, NumClass, Opcode as VmOpcode, Operand, Reg, VmType};

/// A lowered function body, still referencing blocks only through absolute
/// bytecode indices (spec §6.4: "branch targets ... are bytecode indices
/// within the current function").
#[derive(Debug, Clone)]
pub struct VmFunction {
    pub name: String,
    pub arg_count: usize,
    pub reg_count: u32,
    pub code: Vec<Instruction>,
}

/// A function lowering plus its deferred data-global fixups.
pub struct LoweredFunction {
    pub function: VmFunction,
    pub pending_globals: Vec<(usize, String)>,
}

fn vm_type_of(module: &Module, ty: TypeId) -> VmType {
    match module.types.get(ty) {
        TypeData::SignedInt { bits } => VmType {
            class: NumClass::Signed,
            log2_width: bits.trailing_zeros() as u8 - 3,
        },
        TypeData::UnsignedInt { bits } => VmType {
            class: NumClass::Unsigned,
            log2_width: bits.trailing_zeros() as u8 - 3,
        },
        TypeData::Void => VmType::WORD,
        _ => VmType::POINTER,
    }
}

struct PendingJump {
    code_index: usize,
    target: Block,
}

struct Lowering<'a> {
    module: &'a Module,
    func: &'a Function,
    regs: HashMap<Inst, Reg>,
    next_reg: u32,
    code: Vec<Instruction>,
    block_start: HashMap<Block, usize>,
    pending_jumps: Vec<PendingJump>,
    pending_globals: Vec<(usize, String)>,
}

impl<'a> Lowering<'a> {
    fn fresh_reg(&mut self) -> Reg {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn reg_of(&self, inst: Inst) -> Reg {
        self.regs[&inst]
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        self.code.push(inst);
        self.code.len() - 1
    }

    fn lower(mut self) -> LoweredFunction {
        // Every phi gets a register up front (spec §4.10: a single shared
        // destination register for all its contributions), so a
        // predecessor lowered before the join block can still target it.
        for inst in self.func.iter_insts() {
            if self.func.insts[inst].opcode.is_phi() {
                let r = self.fresh_reg();
                self.regs.insert(inst, r);
            }
        }

        for &block in &self.func.block_order {
            self.block_start.insert(block, self.code.len());
            for &inst in self.func.blocks[block].insts.iter() {
                self.lower_inst(inst);
            }
            self.lower_terminator(block);
        }

        for p in &self.pending_jumps {
            let target_idx = self.block_start[&p.target] as u32;
            self.code[p.code_index].dst = target_idx;
        }

        let function = VmFunction {
            name: self.func.name.clone(),
            arg_count: self
                .func
                .iter_insts()
                .filter(|&i| matches!(self.func.insts[i].opcode, Opcode::Arg { .. }))
                .count(),
            reg_count: self.next_reg,
            code: self.code,
        };
        LoweredFunction {
            function,
            pending_globals: self.pending_globals,
        }
    }

    fn lower_inst(&mut self, inst: Inst) {
        if self.func.insts[inst].dead {
            return;
        }
        let ty = vm_type_of(self.module, self.func.insts[inst].ty);
        match self.func.insts[inst].opcode.clone() {
            Opcode::ImmSigned(v) => self.lower_li(inst, ty, v),
            Opcode::ImmUnsigned(v) => self.lower_li(inst, ty, v as i64),
            Opcode::Binary { op, lhs, rhs } => self.lower_binary(inst, ty, op, lhs, rhs),
            Opcode::Load { addr } => self.lower_load(inst, ty, addr),
            Opcode::Store { addr, value } => self.lower_store(ty, addr, value),
            Opcode::Alloca { count } => self.lower_alloc(inst, VmOpcode::Alloc, count),
            Opcode::New { count } => self.lower_alloc(inst, VmOpcode::New, count),
            Opcode::Delete { addr } => self.lower_delete(addr),
            Opcode::Call { callee, args } => self.lower_call(inst, ty, callee, &args),
            Opcode::Ret { value } => self.lower_ret(value),
            Opcode::Phi { .. } => {} // materialized on predecessor edges
            Opcode::Arg { index } => self.lower_arg(inst, ty, index),
            Opcode::Global { name } => self.lower_glob(inst, ty, &name),
            Opcode::Forward => unreachable!("Forward opcode must not reach codegen"),
        }
    }

    fn lower_li(&mut self, inst: Inst, ty: VmType, value: i64) {
        let dst = self.fresh_reg();
        self.emit(Instruction { op: VmOpcode::Li, ty, dst, operand: Operand::Imm(value) });
        self.regs.insert(inst, dst);
    }

    fn lower_binary(&mut self, inst: Inst, ty: VmType, op: BinOp, lhs: Inst, rhs: Inst) {
        let lhs_ty = vm_type_of(self.module, self.func.insts[lhs].ty);
        let is_ptr_arith = matches!(op, BinOp::Add | BinOp::Sub)
            && self.module.types.get(self.func.insts[lhs].ty).is_pointer_kind();
        let op_ty = if is_ptr_arith { VmType::POINTER } else { lhs_ty };

        let (vm_op, rs, rt) = match op {
            BinOp::Add => (VmOpcode::Add, lhs, rhs),
            BinOp::Sub => (VmOpcode::Sub, lhs, rhs),
            BinOp::Mul => (VmOpcode::Mul, lhs, rhs),
            BinOp::Div => (VmOpcode::Div, lhs, rhs),
            BinOp::Mod => (VmOpcode::Mod, lhs, rhs),
            BinOp::And => (VmOpcode::And, lhs, rhs),
            BinOp::Or => (VmOpcode::Or, lhs, rhs),
            BinOp::Xor => (VmOpcode::Xor, lhs, rhs),
            BinOp::Nor => (VmOpcode::Nor, lhs, rhs),
            BinOp::Shl => (VmOpcode::Shl, lhs, rhs),
            BinOp::Shr => (VmOpcode::Shr, lhs, rhs),
            BinOp::Seq => (VmOpcode::Seq, lhs, rhs),
            BinOp::Slt => (VmOpcode::Slt, lhs, rhs),
            BinOp::Sle => (VmOpcode::Sle, lhs, rhs),
            // Normalized to the native {Seq, Slt, Sle} set, mirroring the
            // x64 backend's `select_comparison` (spec §3's doc comment on
            // `BinOp`).
            BinOp::Sgt => (VmOpcode::Slt, rhs, lhs),
            BinOp::Sge => (VmOpcode::Sle, rhs, lhs),
            BinOp::Sne => {
                let eq = self.fresh_reg();
                self.emit(Instruction {
                    op: VmOpcode::Seq,
                    ty: lhs_ty,
                    dst: eq,
                    operand: Operand::Regs(self.reg_of(lhs), self.reg_of(rhs)),
                });
                let one = self.fresh_reg();
                self.emit(Instruction { op: VmOpcode::Li, ty, dst: one, operand: Operand::Imm(1) });
                let dst = self.fresh_reg();
                self.emit(Instruction { op: VmOpcode::Xor, ty, dst, operand: Operand::Regs(eq, one) });
                self.regs.insert(inst, dst);
                return;
            }
        };
        let dst = self.fresh_reg();
        self.emit(Instruction {
            op: vm_op,
            ty: op_ty,
            dst,
            operand: Operand::Regs(self.reg_of(rs), self.reg_of(rt)),
        });
        self.regs.insert(inst, dst);
    }

    fn lower_load(&mut self, inst: Inst, ty: VmType, addr: Inst) {
        let dst = self.fresh_reg();
        self.emit(Instruction {
            op: VmOpcode::Load,
            ty,
            dst,
            operand: Operand::Regs(self.reg_of(addr), 0),
        });
        self.regs.insert(inst, dst);
    }

    fn lower_store(&mut self, ty: VmType, addr: Inst, value: Inst) {
        self.emit(Instruction {
            op: VmOpcode::Store,
            ty,
            dst: 0,
            operand: Operand::Regs(self.reg_of(addr), self.reg_of(value)),
        });
    }

    fn lower_alloc(&mut self, inst: Inst, op: VmOpcode, count: Inst) {
        let dst = self.fresh_reg();
        let operand = match self.func.insts[count].opcode {
            Opcode::ImmSigned(v) => Operand::Imm(v),
            Opcode::ImmUnsigned(v) => Operand::Imm(v as i64),
            _ => Operand::Regs(self.reg_of(count), 0),
        };
        self.emit(Instruction { op, ty: VmType::POINTER, dst, operand });
        self.regs.insert(inst, dst);
    }

    fn lower_delete(&mut self, addr: Inst) {
        self.emit(Instruction {
            op: VmOpcode::Delete,
            ty: VmType::POINTER,
            dst: 0,
            operand: Operand::Regs(self.reg_of(addr), 0),
        });
    }

    /// Arguments are pushed onto the shared alloca/argument stack
    /// immediately before `call` (spec §5: "a separate contiguous byte
    /// stack holds allocas and outgoing argument slots"); the interpreter
    /// reads `rt` (stashed as the arg count, not a register — see
    /// `crate::isa`'s fixed-shape instruction doc) to know how many pushed
    /// words belong to this call.
    fn lower_call(&mut self, inst: Inst, ty: VmType, callee: Inst, args: &[Inst]) {
        for &a in args {
            self.emit(Instruction {
                op: VmOpcode::Push,
                ty: vm_type_of(self.module, self.func.insts[a].ty),
                dst: 0,
                operand: Operand::Regs(self.reg_of(a), 0),
            });
        }
        let dst = self.fresh_reg();
        self.emit(Instruction {
            op: VmOpcode::Call,
            ty,
            dst,
            operand: Operand::Regs(self.reg_of(callee), args.len() as u32),
        });
        self.regs.insert(inst, dst);
    }

    fn lower_ret(&mut self, value: Option<Inst>) {
        let operand = match value {
            Some(v) => Operand::Regs(self.reg_of(v), 0),
            None => Operand::Regs(u32::MAX, 0),
        };
        self.emit(Instruction { op: VmOpcode::Ret, ty: VmType::WORD, dst: 0, operand });
    }

    fn lower_arg(&mut self, inst: Inst, ty: VmType, index: u32) {
        let dst = self.fresh_reg();
        self.emit(Instruction { op: VmOpcode::Arg, ty, dst, operand: Operand::Imm(index as i64) });
        self.regs.insert(inst, dst);
    }

    fn lower_glob(&mut self, inst: Inst, ty: VmType, name: &str) {
        let dst = self.fresh_reg();
        let value = if let Some(fid) = self.module.lookup_function(name) {
            -((fid.index() as i64) + 1)
        } else {
            i64::MIN // patched by `crate::Program::compile` once the global segment is laid out
        };
        let idx = self.emit(Instruction { op: VmOpcode::Glob, ty, dst, operand: Operand::Imm(value) });
        if value == i64::MIN {
            self.pending_globals.push((idx, name.to_string()));
        }
        self.regs.insert(inst, dst);
    }

    fn lower_terminator(&mut self, block: Block) {
        let bd = &self.func.blocks[block];
        if let Some(cond) = bd.condition {
            let then_b = bd.then_block.unwrap();
            let else_b = bd.else_block.unwrap();
            self.plant_phi_movs(block, then_b);
            let cond_reg = self.reg_of(cond);
            let br_idx = self.emit(Instruction {
                op: VmOpcode::Br,
                ty: VmType::WORD,
                dst: 0,
                operand: Operand::Regs(cond_reg, cond_reg),
            });
            self.pending_jumps.push(PendingJump { code_index: br_idx, target: then_b });
            self.plant_phi_movs(block, else_b);
            let jump_idx = self.emit(Instruction { op: VmOpcode::Jump, ty: VmType::WORD, dst: 0, operand: Operand::Imm(0) });
            self.pending_jumps.push(PendingJump { code_index: jump_idx, target: else_b });
        } else if let Some(to) = bd.then_block {
            self.plant_phi_movs(block, to);
            let jump_idx = self.emit(Instruction { op: VmOpcode::Jump, ty: VmType::WORD, dst: 0, operand: Operand::Imm(0) });
            self.pending_jumps.push(PendingJump { code_index: jump_idx, target: to });
        }
        // exit blocks end in `ret`, already emitted by `lower_inst`.
    }

    /// Plant one `mov` per φ in `to` that reads from `from`, copying its
    /// branch value into the φ's shared register (spec §4.10).
    fn plant_phi_movs(&mut self, from: Block, to: Block) {
        let phi_insts: Vec<Inst> = self.func.blocks[to].insts.iter().copied().collect();
        for phi in phi_insts {
            let Some(branches) = self.func.insts[phi].opcode.as_phi_branches() else { continue };
            let Some(branch) = branches.iter().find(|b| b.from == from) else { continue };
            let src = self.reg_of(branch.value);
            let dst = self.reg_of(phi);
            if src != dst {
                self.emit(Instruction {
                    op: VmOpcode::Mov,
                    ty: VmType::WORD,
                    dst,
                    operand: Operand::Regs(src, 0),
                });
            }
        }
    }
}

pub fn lower_function(module: &Module, func: &Function) -> LoweredFunction {
    Lowering {
        module,
        func,
        regs: HashMap::new(),
        next_reg: 0,
        code: Vec::new(),
        block_start: HashMap::new(),
        pending_jumps: Vec::new(),
        pending_globals: Vec::new(),
    }
    .lower()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyan_codegen::ir::builder::IrBuilder;

    #[test]
    fn adds_two_arguments_and_returns() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let sig = module.types.function(vec![i64_ty, i64_ty], i64_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("add2", sig);
        let entry = b.create_block(f, "entry", 0);
        let a = b.build_arg(f, entry, i64_ty, 0, None);
        let c = b.build_arg(f, entry, i64_ty, 1, None);
        let sum = b.build_binary(f, entry, BinOp::Add, i64_ty, a, c, None);
        b.build_ret(f, entry, Some(sum));

        let lowered = lower_function(&module, module.func(f));
        assert_eq!(lowered.function.arg_count, 2);
        assert!(lowered.function.code.iter().any(|i| i.op == VmOpcode::Add));
        assert!(matches!(lowered.function.code.last().unwrap().op, VmOpcode::Ret));
    }

    #[test]
    fn phi_is_planted_on_both_predecessor_edges() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let sig = module.types.function(vec![i64_ty], i64_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("choose", sig);
        let entry = b.create_block(f, "entry", 0);
        let then_b = b.create_block(f, "then", 0);
        let else_b = b.create_block(f, "else", 0);
        let join = b.create_block(f, "join", 0);

        let cond = b.build_arg(f, entry, i64_ty, 0, None);
        b.finish_branch(f, entry, cond, then_b, else_b);

        let one = b.build_imm_signed(f, then_b, i64_ty, 1);
        b.finish_jump(f, then_b, join);
        let two = b.build_imm_signed(f, else_b, i64_ty, 2);
        b.finish_jump(f, else_b, join);

        let phi = b.build_phi(f, join, i64_ty, Some("result"));
        b.add_phi_branch(f, phi, one, then_b);
        b.add_phi_branch(f, phi, two, else_b);
        b.build_ret(f, join, Some(phi));

        let lowered = lower_function(&module, module.func(f));
        let mov_count = lowered.function.code.iter().filter(|i| i.op == VmOpcode::Mov).count();
        assert_eq!(mov_count, 2);
    }
}
