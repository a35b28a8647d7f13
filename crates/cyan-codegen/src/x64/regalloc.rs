//! Linear-scan register allocation over the pseudo-x64 stream (spec §4.9).
//!
//! A single forward pass keeps a map of which register (if any) currently
//! holds each live [`ValueId`], matching the original `allocateFor`/
//! `requestRegister` pair: a use either finds its value already resident, or
//! brings it back from its spill slot, evicting another mapped value to
//! memory if every register is taken. Eviction picks the value with the
//! furthest next use, weighted up for values touched while nested in a loop
//! — the original's `MEMORY_OP_COST << (4*depth)` swap-out cost, expressing
//! that re-spilling something live across a loop header is far more
//! expensive than respilling something that dies right after the loop.

use std::collections::{HashMap, HashSet};

use super::operand::{AnyRegister, Operand, PhysLoc, Register, ValueId, ValuePool};
use super::pseudo::Pseudo;
use crate::ir::types::WORD_SIZE;

use super::lower::LoweredFunction;

/// A fully allocated function body, ready for [`super::emit`].
pub struct AllocatedFunction {
    pub name: String,
    pub arg_count: usize,
    pub instrs: Vec<Pseudo>,
    pub stack_bytes: i32,
    pub callee_saved_used: Vec<Register>,
}

pub fn allocate_function(lowered: LoweredFunction) -> AllocatedFunction {
    let last_use = compute_last_use(&lowered.instrs, &lowered.pool);
    let mut alloc = Allocator {
        last_use,
        current_mapped: HashMap::new(),
        available: Register::ALL.iter().rev().copied().collect(),
        loc: HashMap::new(),
        used_registers: HashSet::new(),
        free_slots: Vec::new(),
        stack_bytes: lowered.stack_bytes,
        depth: 0,
        preserved_stack: Vec::new(),
    };

    let mut out = Vec::with_capacity(lowered.instrs.len());
    for (i, mut inst) in lowered.instrs.into_iter().enumerate() {
        if let Pseudo::Label(label) = &inst {
            alloc.depth = lowered.label_depths.get(label).copied().unwrap_or(0);
        }

        match inst {
            Pseudo::CallPreserve => {
                let regs: Vec<Register> = alloc.current_mapped.keys().copied().collect();
                for &r in &regs {
                    out.push(Pseudo::Push(Operand::Fixed(AnyRegister::Gp(r))));
                }
                alloc.preserved_stack.push(regs);
                continue;
            }
            Pseudo::CallRestore => {
                let regs = alloc.preserved_stack.pop().unwrap_or_default();
                for &r in regs.iter().rev() {
                    out.push(Pseudo::Pop(Operand::Fixed(AnyRegister::Gp(r))));
                }
                continue;
            }
            _ => {}
        }

        let mut pre = Vec::new();
        inst.for_each_operand_mut(|op| match *op {
            Operand::Value(id) => {
                let reg = alloc.bring_into_register(id, i, &mut pre);
                *op = Operand::Fixed(AnyRegister::Gp(reg));
            }
            Operand::Offset(id, disp) => {
                let reg = alloc.bring_into_register(id, i, &mut pre);
                *op = Operand::OffsetReg(AnyRegister::Gp(reg), disp);
            }
            _ => {}
        });

        out.extend(pre);
        out.push(inst);
        alloc.free_dead_at(i);
    }

    AllocatedFunction {
        name: lowered.name,
        arg_count: lowered.arg_count,
        instrs: fixup_two_memory_operands(out),
        stack_bytes: alloc.stack_bytes,
        callee_saved_used: alloc.used_registers.into_iter().filter(|r| r.is_callee_saved()).collect(),
    }
}

/// The last program index (in `instrs`) at which each [`ValueId`] is read or
/// written.
fn compute_last_use(instrs: &[Pseudo], pool: &ValuePool) -> HashMap<ValueId, usize> {
    let mut last_use = HashMap::with_capacity(pool.len());
    for (i, inst) in instrs.iter().enumerate() {
        let mut inst = inst.clone();
        inst.for_each_operand_mut(|op| match *op {
            Operand::Value(id) | Operand::Offset(id, _) => {
                last_use.insert(id, i);
            }
            _ => {}
        });
    }
    last_use
}

struct Allocator {
    last_use: HashMap<ValueId, usize>,
    current_mapped: HashMap<Register, ValueId>,
    available: Vec<Register>,
    loc: HashMap<ValueId, PhysLoc>,
    used_registers: HashSet<Register>,
    free_slots: Vec<i32>,
    stack_bytes: i32,
    depth: u32,
    /// One entry per open `CallPreserve`/`CallRestore` bracket: the
    /// registers pushed, in push order, so `CallRestore` pops them back in
    /// reverse.
    preserved_stack: Vec<Vec<Register>>,
}

impl Allocator {
    fn bring_into_register(&mut self, id: ValueId, idx: usize, pre: &mut Vec<Pseudo>) -> Register {
        if let Some(PhysLoc::Register(r)) = self.loc.get(&id) {
            return *r;
        }
        let spilled_at = match self.loc.get(&id) {
            Some(PhysLoc::Stack(s)) => Some(*s),
            _ => None,
        };
        let reg = self.acquire_register(idx, pre);
        if let Some(slot) = spilled_at {
            pre.push(Pseudo::Mov {
                dst: Operand::Fixed(AnyRegister::Gp(reg)),
                src: Operand::Stack(slot),
            });
            self.free_slots.push(slot);
        }
        self.loc.insert(id, PhysLoc::Register(reg));
        self.current_mapped.insert(reg, id);
        reg
    }

    fn acquire_register(&mut self, idx: usize, pre: &mut Vec<Pseudo>) -> Register {
        if let Some(reg) = self.available.pop() {
            self.used_registers.insert(reg);
            return reg;
        }

        let depth_weight = self.depth.min(4);
        let victim_reg = self
            .current_mapped
            .iter()
            .map(|(&r, &v)| {
                let dist = self.last_use.get(&v).copied().unwrap_or(idx) as i64 - idx as i64;
                (r, dist.max(0) << (4 * depth_weight))
            })
            .max_by_key(|&(_, score)| score)
            .map(|(r, _)| r)
            .expect("register pool exhausted with nothing mapped to evict");

        let victim = self.current_mapped.remove(&victim_reg).unwrap();
        let slot = self.alloc_stack_slot();
        pre.push(Pseudo::Mov {
            dst: Operand::Stack(slot),
            src: Operand::Fixed(AnyRegister::Gp(victim_reg)),
        });
        self.loc.insert(victim, PhysLoc::Stack(slot));
        victim_reg
    }

    fn alloc_stack_slot(&mut self) -> i32 {
        if let Some(s) = self.free_slots.pop() {
            return s;
        }
        self.stack_bytes += WORD_SIZE as i32;
        -self.stack_bytes
    }

    fn free_dead_at(&mut self, idx: usize) {
        let dead: Vec<ValueId> = self
            .loc
            .iter()
            .filter(|(v, _)| self.last_use.get(v).copied() == Some(idx))
            .map(|(&v, _)| v)
            .collect();
        for v in dead {
            match self.loc.remove(&v) {
                Some(PhysLoc::Register(r)) => {
                    self.current_mapped.remove(&r);
                    self.available.push(r);
                }
                Some(PhysLoc::Stack(s)) => self.free_slots.push(s),
                None => {}
            }
        }
    }
}

/// Post-allocation fixup: an instruction whose `dst`/`src` (or `left`/
/// `right`) both ended up denoting memory gets its `src` routed through
/// `rax` first, matching the original's `resolveTooManyMemoryLocations`
/// scratch-register trick.
fn fixup_two_memory_operands(instrs: Vec<Pseudo>) -> Vec<Pseudo> {
    let mut out = Vec::with_capacity(instrs.len());
    for mut inst in instrs {
        if let Some((dst, src)) = inst.memory_pair_mut() {
            if dst.is_memory() && src.is_memory() {
                let original_src = src.clone();
                *src = Operand::Fixed(AnyRegister::Rax);
                out.push(Pseudo::Mov {
                    dst: Operand::Fixed(AnyRegister::Rax),
                    src: original_src,
                });
            }
        }
        out.push(inst);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::module::Module;
    use crate::ir::BinOp;
    use crate::x64::lower::lower_function;

    #[test]
    fn every_value_resolves_to_a_fixed_location() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let sig = module.types.function(vec![i64_ty, i64_ty], i64_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("sum3", sig);
        let entry = b.create_block(f, "entry", 0);
        let a = b.build_arg(f, entry, i64_ty, 0, None);
        let c = b.build_arg(f, entry, i64_ty, 1, None);
        let one = b.build_imm_signed(f, entry, i64_ty, 1);
        let ac = b.build_binary(f, entry, BinOp::Add, i64_ty, a, c, None);
        let sum = b.build_binary(f, entry, BinOp::Add, i64_ty, ac, one, None);
        b.build_ret(f, entry, Some(sum));

        let lowered = lower_function(&module, module.func(f)).unwrap();
        let allocated = allocate_function(lowered);

        for inst in &allocated.instrs {
            let mut inst = inst.clone();
            inst.for_each_operand_mut(|op| {
                assert!(
                    !matches!(op, Operand::Value(_) | Operand::Offset(..)),
                    "every virtual operand must be resolved after allocation"
                );
            });
        }
    }
}
