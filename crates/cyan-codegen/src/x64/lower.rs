//! Instruction selection: IR → pseudo-x64 (spec §4.9).
//!
//! Mirrors the original `CodeGenX64::generateFunc`'s per-opcode `gen()`
//! methods, but instead of mutating operands in place through
//! `resolveOperand`/`setOrMoveOperand`, every selected value gets a fresh
//! [`ValueId`] recorded once in `self.values` and looked up by every later
//! consumer — the usual SSA-dominance property means a use is always
//! selected after its def, so no forward-reference bookkeeping is needed.

use std::collections::HashMap;

use super::operand::{AnyRegister, Operand, Register, ValueId, ValuePool};
use super::pseudo::Pseudo;
use crate::ir::entities::{Block, Inst};
use crate::ir::function::Function;
use crate::ir::instruction::{BinOp, Opcode};
use crate::ir::module::Module;
use crate::ir::types::WORD_SIZE;
use cyan_entity::EntityRef;

/// Integer/pointer argument registers, in order, matching the SysV-like
/// convention spec §4.9 mandates: "RDI, RSI, RDX, RCX, R8, R9 pass the
/// first six arguments". `rdx` is not part of the allocator's general pool
/// (it stays reserved, spec §4.9) but is still named here as the fixed
/// destination/source for argument index 2, same as `rax` is named as the
/// fixed call-result register elsewhere in this module. Arguments past the
/// sixth spill to the caller's outgoing-argument stack area.
const ARG_REGS: [AnyRegister; 6] = [
    AnyRegister::Gp(Register::Rdi),
    AnyRegister::Gp(Register::Rsi),
    AnyRegister::Rdx,
    AnyRegister::Gp(Register::Rcx),
    AnyRegister::Gp(Register::R8),
    AnyRegister::Gp(Register::R9),
];

/// A function lowered to pseudo-x64, not yet register-allocated.
pub struct LoweredFunction {
    pub name: String,
    pub arg_count: usize,
    pub instrs: Vec<Pseudo>,
    pub pool: ValuePool,
    /// Bytes reserved for allocas so far; grows further once
    /// [`super::regalloc`] spills.
    pub stack_bytes: i32,
    /// Loop nesting depth of the block each label introduces, so
    /// [`super::regalloc`] can weight its swap-out cost the way spec §4.9
    /// does: instructions inside a loop are exponentially more expensive to
    /// re-spill than ones outside it.
    pub label_depths: HashMap<String, u32>,
}

struct PendingEdge {
    label: String,
    movs: Vec<Pseudo>,
    target_label: String,
}

struct Selector<'a> {
    module: &'a Module,
    func: &'a Function,
    pool: ValuePool,
    values: HashMap<Inst, Operand>,
    stack_bytes: i32,
    instrs: Vec<Pseudo>,
    pending_edges: Vec<PendingEdge>,
}

pub fn lower_function(module: &Module, func: &Function) -> Result<LoweredFunction, crate::Error> {
    let arg_count = func
        .iter_insts()
        .filter(|&i| matches!(func.insts[i].opcode, Opcode::Arg { .. }))
        .count();
    let selector = Selector {
        module,
        func,
        pool: ValuePool::new(),
        values: HashMap::new(),
        stack_bytes: 0,
        instrs: Vec::new(),
        pending_edges: Vec::new(),
    };
    let label_depths = func
        .block_order
        .iter()
        .map(|&b| (format!("{}_{}", func.name, b.index()), func.blocks[b].depth))
        .collect();
    let (instrs, pool, stack_bytes) = selector.select_function()?;
    Ok(LoweredFunction {
        name: func.name.clone(),
        arg_count,
        instrs,
        pool,
        stack_bytes,
        label_depths,
    })
}

impl<'a> Selector<'a> {
    fn label(&self, block: Block) -> String {
        format!("{}_{}", self.func.name, block.index())
    }

    fn alloc_stack(&mut self, bytes: i32) -> i32 {
        self.stack_bytes += bytes;
        -self.stack_bytes
    }

    fn fresh_value(&mut self) -> Operand {
        Operand::Value(self.pool.fresh())
    }

    fn operand_of(&self, inst: Inst) -> Operand {
        self.values[&inst].clone()
    }

    fn emit(&mut self, p: Pseudo) {
        self.instrs.push(p);
    }

    fn select_function(mut self) -> Result<(Vec<Pseudo>, ValuePool, i32), crate::Error> {
        // Every phi gets its destination allocated up front so a
        // predecessor lowered before the block that owns the phi can still
        // target it from an edge thunk (see `edge_target`).
        for inst in self.func.iter_insts() {
            if self.func.insts[inst].opcode.is_phi() {
                let v = self.fresh_value();
                self.values.insert(inst, v);
            }
        }

        for &block in &self.func.block_order {
            self.emit(Pseudo::Label(self.label(block)));
            for &inst in self.func.blocks[block].insts.iter() {
                self.select_inst(inst)?;
            }
            self.select_terminator(block);
        }

        let edges = std::mem::take(&mut self.pending_edges);
        for e in edges {
            self.instrs.push(Pseudo::Label(e.label));
            self.instrs.extend(e.movs);
            self.instrs.push(Pseudo::Jmp(e.target_label));
        }

        Ok((self.instrs, self.pool, self.stack_bytes))
    }

    fn select_inst(&mut self, inst: Inst) -> Result<(), crate::Error> {
        if self.func.insts[inst].dead {
            return Ok(());
        }
        match self.func.insts[inst].opcode.clone() {
            Opcode::ImmSigned(v) => {
                self.values.insert(inst, Operand::Imm(v));
            }
            Opcode::ImmUnsigned(v) => {
                self.values.insert(inst, Operand::Imm(v as i64));
            }
            Opcode::Binary { op, lhs, rhs } => self.select_binary(inst, op, lhs, rhs)?,
            Opcode::Load { addr } => self.select_load(inst, addr),
            Opcode::Store { addr, value } => self.select_store(addr, value),
            Opcode::Alloca { count } => self.select_alloca(inst, count),
            Opcode::Call { callee, args } => self.select_call(inst, callee, &args),
            Opcode::Ret { value } => self.select_ret(value),
            Opcode::New { count } => self.select_new(inst, count),
            Opcode::Delete { addr } => self.select_delete(addr),
            Opcode::Phi { .. } => {}
            Opcode::Arg { index } => self.select_arg(inst, index as usize),
            Opcode::Global { name } => {
                self.values.insert(inst, Operand::Global(name));
            }
            Opcode::Forward => unreachable!("Forward opcode must not reach codegen"),
        }
        Ok(())
    }

    fn select_terminator(&mut self, block: Block) {
        let bd = &self.func.blocks[block];
        if bd.is_exit() {
            return;
        }
        if let Some(cond) = bd.condition {
            let then_b = bd.then_block.unwrap();
            let else_b = bd.else_block.unwrap();
            let cond_op = self.operand_of(cond);
            let then_label = self.edge_target(block, then_b);
            let else_label = self.edge_target(block, else_b);
            self.emit(Pseudo::Cmp { left: cond_op, right: Operand::Imm(0) });
            self.emit(Pseudo::Jne(then_label));
            self.emit(Pseudo::Jmp(else_label));
        } else {
            let to = bd.then_block.unwrap();
            let target = self.edge_target(block, to);
            self.emit(Pseudo::Jmp(target));
        }
    }

    /// The label to jump to for the `from -> to` edge: `to`'s own label if
    /// `to` has no phis reading from `from`, otherwise a freshly synthesized
    /// thunk that performs the phi movs before falling through to `to`.
    /// Splitting the edge (rather than placing the movs before the branch)
    /// keeps a phi move on one arm from clobbering a value the other arm
    /// still needs.
    fn edge_target(&mut self, from: Block, to: Block) -> String {
        let movs: Vec<Pseudo> = self.func.blocks[to]
            .insts
            .iter()
            .filter_map(|&phi_inst| {
                let branches = self.func.insts[phi_inst].opcode.as_phi_branches()?;
                let value = branches.iter().find(|b| b.from == from)?.value;
                let dst = self.values[&phi_inst].clone();
                let src = self.operand_of(value);
                Some(Pseudo::Mov { dst, src })
            })
            .collect();
        if movs.is_empty() {
            return self.label(to);
        }
        let edge_label = format!("{}_e{}_{}", self.func.name, from.index(), to.index());
        let target_label = self.label(to);
        self.pending_edges.push(PendingEdge {
            label: edge_label.clone(),
            movs,
            target_label,
        });
        edge_label
    }

    /// spec §4.9 pre-pass "resort swappable operand": a commutative op
    /// always ends up with an immediate on the right, and failing that a
    /// pointer-kind operand on the left, so selection never special-cases
    /// operand order afterwards.
    fn resort_operands(&self, op: BinOp, lhs: Inst, rhs: Inst) -> (Inst, Inst) {
        if !op.is_commutative() {
            return (lhs, rhs);
        }
        let lhs_imm = self.func.insts[lhs].opcode.is_immediate();
        let rhs_imm = self.func.insts[rhs].opcode.is_immediate();
        if lhs_imm && !rhs_imm {
            return (rhs, lhs);
        }
        let lhs_ptr = self.module.types.get(self.func.insts[lhs].ty).is_pointer_kind();
        let rhs_ptr = self.module.types.get(self.func.insts[rhs].ty).is_pointer_kind();
        if rhs_ptr && !lhs_ptr {
            return (rhs, lhs);
        }
        (lhs, rhs)
    }

    /// spec §4.9 pre-pass "resolve pointer arithmetic": scale the
    /// non-pointer side of a pointer `add`/`sub` by the machine word size.
    fn scale_if_pointer_arith(&mut self, op: BinOp, lhs: Inst, rhs_op: Operand) -> Operand {
        if !matches!(op, BinOp::Add | BinOp::Sub) {
            return rhs_op;
        }
        if !self.module.types.get(self.func.insts[lhs].ty).is_pointer_kind() {
            return rhs_op;
        }
        match rhs_op {
            Operand::Imm(n) => Operand::Imm(n * WORD_SIZE as i64),
            other => {
                let scaled = self.fresh_value();
                self.emit(Pseudo::Mov { dst: scaled.clone(), src: other });
                self.emit(Pseudo::Sal { dst: scaled.clone(), src: Operand::Imm(3) });
                scaled
            }
        }
    }

    fn select_binary(&mut self, inst: Inst, op: BinOp, lhs: Inst, rhs: Inst) -> Result<(), crate::Error> {
        if matches!(op, BinOp::Div | BinOp::Mod) {
            return Err(crate::Error::UnsupportedDivision);
        }
        if op.is_comparison() {
            let lhs_op = self.operand_of(lhs);
            let rhs_op = self.operand_of(rhs);
            self.select_comparison(inst, op, lhs_op, rhs_op);
            return Ok(());
        }
        let (lhs, rhs) = self.resort_operands(op, lhs, rhs);
        let lhs_op = self.operand_of(lhs);
        let rhs_op_raw = self.operand_of(rhs);
        let rhs_op = self.scale_if_pointer_arith(op, lhs, rhs_op_raw);
        let dst = self.fresh_value();
        self.emit(Pseudo::Mov { dst: dst.clone(), src: lhs_op });
        match op {
            BinOp::Add => self.emit(Pseudo::Add { dst: dst.clone(), src: rhs_op }),
            BinOp::Sub => self.emit(Pseudo::Sub { dst: dst.clone(), src: rhs_op }),
            BinOp::Mul => self.emit(Pseudo::Imul { dst: dst.clone(), src: rhs_op }),
            BinOp::And => self.emit(Pseudo::And { dst: dst.clone(), src: rhs_op }),
            BinOp::Or => self.emit(Pseudo::Or { dst: dst.clone(), src: rhs_op }),
            BinOp::Xor => self.emit(Pseudo::Xor { dst: dst.clone(), src: rhs_op }),
            BinOp::Nor => {
                if rhs_op != Operand::Imm(0) {
                    self.emit(Pseudo::Or { dst: dst.clone(), src: rhs_op });
                }
                self.emit(Pseudo::Not { dst: dst.clone() });
            }
            BinOp::Shl => self.emit(Pseudo::Sal { dst: dst.clone(), src: rhs_op }),
            BinOp::Shr => self.emit(Pseudo::Sar { dst: dst.clone(), src: rhs_op }),
            BinOp::Div | BinOp::Mod => unreachable!(),
            _ => unreachable!("comparisons handled above"),
        }
        self.values.insert(inst, dst);
        Ok(())
    }

    fn select_comparison(&mut self, inst: Inst, op: BinOp, lhs: Operand, rhs: Operand) {
        let (op, left, right) = match op {
            BinOp::Sgt => (BinOp::Slt, rhs, lhs),
            BinOp::Sge => (BinOp::Sle, rhs, lhs),
            other => (other, lhs, rhs),
        };
        let dst = self.fresh_value();
        self.emit(Pseudo::Cmp { left, right });
        match op {
            BinOp::Seq => self.emit(Pseudo::SetE { dst: dst.clone() }),
            BinOp::Sne => {
                self.emit(Pseudo::SetE { dst: dst.clone() });
                self.emit(Pseudo::Xor { dst: dst.clone(), src: Operand::Imm(1) });
            }
            BinOp::Slt => self.emit(Pseudo::SetL { dst: dst.clone() }),
            BinOp::Sle => self.emit(Pseudo::SetLe { dst: dst.clone() }),
            _ => unreachable!(),
        }
        self.values.insert(inst, dst);
    }

    fn select_load(&mut self, inst: Inst, addr: Inst) {
        let src = self.memory_operand_of(addr);
        let dst = self.fresh_value();
        self.emit(Pseudo::Mov { dst: dst.clone(), src });
        self.values.insert(inst, dst);
    }

    fn select_store(&mut self, addr: Inst, value: Inst) {
        let dst = self.memory_operand_of(addr);
        let src = self.operand_of(value);
        self.emit(Pseudo::Mov { dst, src });
    }

    /// Resolve an address-producing instruction to the memory location it
    /// denotes. An alloca or global is already that location (spec §4.9's
    /// `Stack`/`Global` operands name the pointee directly); anything else
    /// is a computed pointer held in a value, addressed through `Offset`.
    fn memory_operand_of(&mut self, addr: Inst) -> Operand {
        let op = self.operand_of(addr);
        match op {
            Operand::Stack(_) | Operand::Global(_) => op,
            Operand::Value(v) => Operand::Offset(v, 0),
            other => {
                let v = self.fresh_value();
                self.emit(Pseudo::Mov { dst: v.clone(), src: other });
                match v {
                    Operand::Value(id) => Operand::Offset(id, 0),
                    _ => unreachable!(),
                }
            }
        }
    }

    fn select_alloca(&mut self, inst: Inst, count: Inst) {
        let n = match self.func.insts[count].opcode {
            Opcode::ImmSigned(v) => v,
            Opcode::ImmUnsigned(v) => v as i64,
            _ => 1,
        };
        let bytes = (n.max(1) as i32) * WORD_SIZE as i32;
        let offset = self.alloc_stack(bytes);
        self.values.insert(inst, Operand::Stack(offset));
    }

    fn select_new(&mut self, inst: Inst, count: Inst) {
        let count_op = self.operand_of(count);
        self.emit(Pseudo::CallPreserve);
        self.emit(Pseudo::Push(count_op));
        self.emit(Pseudo::Call(Operand::Label("cyan_rt_new".to_string())));
        self.emit(Pseudo::Pop(Operand::Fixed(AnyRegister::Gp(Register::Rcx))));
        self.emit(Pseudo::CallRestore);
        let dst = self.fresh_value();
        self.emit(Pseudo::Mov { dst: dst.clone(), src: Operand::Fixed(AnyRegister::Rax) });
        self.values.insert(inst, dst);
    }

    fn select_delete(&mut self, addr: Inst) {
        let addr_op = self.operand_of(addr);
        self.emit(Pseudo::CallPreserve);
        self.emit(Pseudo::Push(addr_op));
        self.emit(Pseudo::Call(Operand::Label("cyan_rt_delete".to_string())));
        self.emit(Pseudo::Pop(Operand::Fixed(AnyRegister::Gp(Register::Rcx))));
        self.emit(Pseudo::CallRestore);
    }

    fn select_call(&mut self, inst: Inst, callee: Inst, args: &[Inst]) {
        let callee_op = self.operand_of(callee);
        // Materialize every argument into a fresh virtual before moving any
        // of them into a fixed argument register, so placing argument i
        // can never clobber argument j still waiting in the same register.
        let arg_temps: Vec<Operand> = args
            .iter()
            .map(|&a| {
                let src = self.operand_of(a);
                let dst = self.fresh_value();
                self.emit(Pseudo::Mov { dst: dst.clone(), src });
                dst
            })
            .collect();
        self.emit(Pseudo::CallPreserve);
        for i in (ARG_REGS.len()..arg_temps.len()).rev() {
            self.emit(Pseudo::Push(arg_temps[i].clone()));
        }
        for (i, t) in arg_temps.iter().enumerate().take(ARG_REGS.len()) {
            self.emit(Pseudo::Mov { dst: Operand::Fixed(ARG_REGS[i]), src: t.clone() });
        }
        self.emit(Pseudo::Call(callee_op));
        for _ in ARG_REGS.len()..arg_temps.len() {
            self.emit(Pseudo::Pop(Operand::Fixed(AnyRegister::Gp(Register::Rcx))));
        }
        self.emit(Pseudo::CallRestore);
        let dst = self.fresh_value();
        self.emit(Pseudo::Mov { dst: dst.clone(), src: Operand::Fixed(AnyRegister::Rax) });
        self.values.insert(inst, dst);
    }

    fn select_ret(&mut self, value: Option<Inst>) {
        if let Some(v) = value {
            let src = self.operand_of(v);
            self.emit(Pseudo::Mov { dst: Operand::Fixed(AnyRegister::Rax), src });
        }
        self.emit(Pseudo::Ret);
    }

    fn select_arg(&mut self, inst: Inst, index: usize) {
        if index < ARG_REGS.len() {
            let dst = self.fresh_value();
            self.emit(Pseudo::Mov { dst: dst.clone(), src: Operand::Fixed(ARG_REGS[index]) });
            self.values.insert(inst, dst);
        } else {
            let offset = 16 + 8 * (index - ARG_REGS.len()) as i32;
            self.values.insert(inst, Operand::Stack(offset));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::BinOp;

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

        let lowered = lower_function(&module, module.func(f)).expect("division-free lowering succeeds");
        assert_eq!(lowered.arg_count, 2);
        assert!(matches!(lowered.instrs.last(), Some(Pseudo::Ret)));
        assert!(lowered.instrs.iter().any(|i| matches!(i, Pseudo::Add { .. })));
    }

    #[test]
    fn division_is_rejected() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let sig = module.types.function(vec![], i64_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("div_fn", sig);
        let entry = b.create_block(f, "entry", 0);
        let one = b.build_imm_signed(f, entry, i64_ty, 10);
        let two = b.build_imm_signed(f, entry, i64_ty, 2);
        let q = b.build_binary(f, entry, BinOp::Div, i64_ty, one, two, None);
        b.build_ret(f, entry, Some(q));

        let result = lower_function(&module, module.func(f));
        assert!(matches!(result, Err(crate::Error::UnsupportedDivision)));
    }
}
