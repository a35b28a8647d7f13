//! Mark-and-sweep dead code elimination (spec §4.6). Ported from
//! `lib/dce.cpp`.
//!
//! Roots are every `call`, `ret`, `store`, `delete`, plus each block's
//! branch condition (side-effecting or control-flow-determining
//! instructions). Everything else survives only transitively, through
//! being referenced by a live instruction's operands.

use crate::ir::entities::Inst;
use crate::ir::function::Function;

pub fn run(func: &mut Function) {
    for inst in func.iter_insts() {
        func.insts[inst].ref_count = 0;
    }

    let mut live: Vec<Inst> = Vec::new();
    for inst in func.iter_insts() {
        if func.insts[inst].opcode.is_dce_root() {
            live.push(inst);
        }
    }
    for &block in &func.block_order {
        if let Some(cond) = func.blocks[block].condition {
            live.push(cond);
        }
    }

    // Transitive mark: every operand of a live instruction gets a
    // reference and, the first time it crosses zero -> one, is itself
    // pushed onto the worklist.
    let mut worklist = live.clone();
    for &inst in &live {
        func.insts[inst].ref_count += 1;
    }
    while let Some(inst) = worklist.pop() {
        let operands = {
            let mut ops = Vec::new();
            func.insts[inst].opcode.for_each_operand(|op| ops.push(op));
            ops
        };
        for op in operands {
            func.insts[op].ref_count += 1;
            if func.insts[op].ref_count == 1 {
                worklist.push(op);
            }
        }
    }

    let dead: Vec<Inst> = func.iter_insts().filter(|&i| func.insts[i].ref_count == 0).collect();
    for inst in dead {
        func.remove_inst(inst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::module::Module;
    use crate::ir::BinOp;

    #[test]
    fn unused_arithmetic_is_swept() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let one = b.build_imm_signed(f, entry, i64_ty, 1);
        let two = b.build_imm_signed(f, entry, i64_ty, 2);
        let unused = b.build_binary(f, entry, BinOp::Add, i64_ty, one, two, None);
        b.build_ret(f, entry, None);

        let func = module.func_mut(f);
        run(func);
        assert!(func.insts[unused].dead);
        assert!(func.insts[one].dead);
        assert!(func.insts[two].dead);
    }

    #[test]
    fn store_target_and_value_stay_live() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let count = b.build_imm_unsigned(f, entry, i64_ty, 1);
        let slot = b.build_alloca(f, entry, i64_ty, count, None);
        let val = b.build_imm_signed(f, entry, i64_ty, 5);
        b.build_store(f, entry, i64_ty, slot, val);
        b.build_ret(f, entry, None);

        let func = module.func_mut(f);
        run(func);
        assert!(!func.insts[slot].dead);
        assert!(!func.insts[val].dead);
    }
}
