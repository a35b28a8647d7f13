//! The four predefined optimization pipelines (spec §4.8).

use crate::dce;
use crate::inliner;
use crate::inst_rewriter;
use crate::ir::dominator_tree::{compute_dominators, compute_loops};
use crate::ir::module::Module;
use crate::mem2reg;
use crate::phi_eliminator;
use crate::unreachable_elim;
use std::str::FromStr;

/// The `-O{0,1,2,3}` CLI flag (spec §6.2), selecting one of §4.8's four
/// pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pipeline {
    L0,
    L1,
    L2,
    L3,
}

impl FromStr for Pipeline {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Pipeline::L0),
            "1" => Ok(Pipeline::L1),
            "2" => Ok(Pipeline::L2),
            "3" => Ok(Pipeline::L3),
            other => Err(crate::Error::InvalidOptimizationLevel(other.to_string())),
        }
    }
}

impl Pipeline {
    pub fn run(self, module: &mut Module) {
        log::debug!("running optimization pipeline {:?}", self);
        match self {
            Pipeline::L0 => l0(module),
            Pipeline::L1 => l1(module),
            Pipeline::L2 => l2(module),
            Pipeline::L3 => l3(module),
        }
    }
}

/// L0: no transforms.
pub fn l0(_module: &mut Module) {}

/// L1: Dominators → Loops → Mem2Reg → PhiElim → UnreachableElim →
/// Dominators → Loops → PhiElim → DeadCodeElim
pub fn l1(module: &mut Module) {
    let ids: Vec<_> = module.function_ids().collect();
    for f in ids {
        let func = module.func_mut(f);
        compute_dominators(func);
        compute_loops(func);
        mem2reg::run(func);
        phi_eliminator::run(func);
        unreachable_elim::run(func);
        compute_dominators(func);
        compute_loops(func);
        phi_eliminator::run(func);
        dce::run(func);
        crate::ir::verify::verify_function(func);
    }
}

/// L1 with `InstRewriter` inserted after `PhiElim` (the first occurrence,
/// right after Mem2Reg has produced SSA values worth folding/hoisting).
pub fn l2(module: &mut Module) {
    let ids: Vec<_> = module.function_ids().collect();
    for f in ids {
        {
            let func = module.func_mut(f);
            compute_dominators(func);
            compute_loops(func);
            mem2reg::run(func);
            phi_eliminator::run(func);
        }
        inst_rewriter::run(&module.types, module.func_mut(f));
        {
            let func = module.func_mut(f);
            unreachable_elim::run(func);
            compute_dominators(func);
            compute_loops(func);
            phi_eliminator::run(func);
            dce::run(func);
            crate::ir::verify::verify_function(func);
        }
    }
}

/// L3: Inliner then L2.
pub fn l3(module: &mut Module) {
    inliner::run(module);
    l2(module);
}

/// Like [`Pipeline::run`], but invokes `trace` with a short pass name and
/// the module's state after every named stage. Backs the CLI's `-d` flag
/// (spec §6.2: "write per-pass IR snapshots to stderr"); `run` itself
/// stays allocation-free for callers (tests, `L3`'s inlined `L2`) that
/// don't need snapshots.
pub fn run_traced(pipeline: Pipeline, module: &mut Module, trace: &mut dyn FnMut(&str, &Module)) {
    trace("input", module);
    match pipeline {
        Pipeline::L0 => {}
        Pipeline::L1 => run_l1_stages(module, trace, false),
        Pipeline::L2 => run_l1_stages(module, trace, true),
        Pipeline::L3 => {
            inliner::run(module);
            trace("inliner", module);
            run_l1_stages(module, trace, true);
        }
    }
}

fn run_l1_stages(module: &mut Module, trace: &mut dyn FnMut(&str, &Module), with_rewriter: bool) {
    let ids: Vec<_> = module.function_ids().collect();

    for &f in &ids {
        let func = module.func_mut(f);
        compute_dominators(func);
        compute_loops(func);
    }
    trace("dominators+loops", module);

    for &f in &ids {
        mem2reg::run(module.func_mut(f));
    }
    trace("mem2reg", module);

    for &f in &ids {
        phi_eliminator::run(module.func_mut(f));
    }
    trace("phi_eliminator", module);

    if with_rewriter {
        for &f in &ids {
            inst_rewriter::run(&module.types, module.func_mut(f));
        }
        trace("inst_rewriter", module);
    }

    for &f in &ids {
        unreachable_elim::run(module.func_mut(f));
    }
    trace("unreachable_elim", module);

    for &f in &ids {
        let func = module.func_mut(f);
        compute_dominators(func);
        compute_loops(func);
        phi_eliminator::run(func);
    }
    trace("phi_eliminator (post-unreachable)", module);

    for &f in &ids {
        let func = module.func_mut(f);
        dce::run(func);
        crate::ir::verify::verify_function(func);
    }
    trace("dce", module);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::instruction::Opcode;
    use crate::ir::BinOp;

    /// Seed scenario 1 (spec §8): `let a = 1 + 2 * 3 / 4;` should fold down
    /// to a single immediate after L2.
    #[test]
    fn constant_folding_seed_scenario() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let one = b.build_imm_signed(f, entry, i64_ty, 1);
        let two = b.build_imm_signed(f, entry, i64_ty, 2);
        let three = b.build_imm_signed(f, entry, i64_ty, 3);
        let four = b.build_imm_signed(f, entry, i64_ty, 4);
        let mul = b.build_binary(f, entry, BinOp::Mul, i64_ty, two, three, None);
        let div = b.build_binary(f, entry, BinOp::Div, i64_ty, mul, four, None);
        let add = b.build_binary(f, entry, BinOp::Add, i64_ty, one, div, None);
        let count = b.build_imm_unsigned(f, entry, i64_ty, 1);
        let slot = b.build_alloca(f, entry, i64_ty, count, Some("a"));
        b.build_store(f, entry, i64_ty, slot, add);
        b.build_ret(f, entry, None);

        l2(&mut module);

        let func = module.func(f);
        let binaries: Vec<_> = func.iter_insts().filter(|&i| matches!(func.insts[i].opcode, Opcode::Binary { .. })).collect();
        assert!(binaries.is_empty(), "all arithmetic should have folded away");
    }

    /// Seed scenario 3: a branch on a constant condition becomes a plain
    /// jump and the dead arm disappears.
    #[test]
    fn constant_branch_seed_scenario() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let then_b = b.create_block(f, "then", 0);
        let else_b = b.create_block(f, "else", 0);
        let join = b.create_block(f, "join", 0);
        let cond = b.build_imm_signed(f, entry, i64_ty, 1);
        b.finish_branch(f, entry, cond, then_b, else_b);
        let count = b.build_imm_unsigned(f, entry, i64_ty, 1);
        let slot = b.build_alloca(f, entry, i64_ty, count, Some("a"));
        let one = b.build_imm_signed(f, then_b, i64_ty, 1);
        b.build_store(f, then_b, i64_ty, slot, one);
        b.finish_jump(f, then_b, join);
        let zero = b.build_imm_signed(f, else_b, i64_ty, 0);
        b.build_store(f, else_b, i64_ty, slot, zero);
        b.finish_jump(f, else_b, join);
        b.build_ret(f, join, None);

        l2(&mut module);

        let func = module.func(f);
        assert_eq!(func.block_order.len(), 1, "then-branch should be inlined into the surrounding block and else dropped");
        assert!(func.blocks[func.entry()].condition.is_none());
    }

    /// Seed scenario 2 (spec §8): `ta * tb` is invariant across the `while`
    /// loop and must appear exactly once after L2, hoisted out of the
    /// loop body; the accumulator inside the loop reads that one value.
    #[test]
    fn loop_invariant_hoisting_seed_scenario() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![i64_ty, i64_ty], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);

        let entry = b.create_block(f, "entry", 0);
        let header = b.create_block(f, "header", 0);
        let body = b.create_block(f, "body", 0);
        let exit_b = b.create_block(f, "exit", 0);

        let a = b.build_arg(f, entry, i64_ty, 0, Some("a"));
        let bb = b.build_arg(f, entry, i64_ty, 1, Some("b"));
        let one = b.build_imm_unsigned(f, entry, i64_ty, 1);
        let i_slot = b.build_alloca(f, entry, i64_ty, one, Some("i"));
        let ta_slot = b.build_alloca(f, entry, i64_ty, one, Some("ta"));
        let tb_slot = b.build_alloca(f, entry, i64_ty, one, Some("tb"));
        let zero = b.build_imm_signed(f, entry, i64_ty, 0);
        b.build_store(f, entry, i64_ty, i_slot, zero);
        b.build_store(f, entry, i64_ty, ta_slot, a);
        b.build_store(f, entry, i64_ty, tb_slot, bb);
        b.finish_jump(f, entry, header);

        let i_header = b.build_load(f, header, i64_ty, i_slot, Some("i_header"));
        let ten = b.build_imm_signed(f, header, i64_ty, 10);
        let cond = b.build_binary(f, header, BinOp::Slt, i64_ty, i_header, ten, None);
        b.finish_branch(f, header, cond, body, exit_b);

        let ta_val = b.build_load(f, body, i64_ty, ta_slot, Some("ta_val"));
        let tb_val = b.build_load(f, body, i64_ty, tb_slot, Some("tb_val"));
        let mul = b.build_binary(f, body, BinOp::Mul, i64_ty, ta_val, tb_val, None);
        let i_body = b.build_load(f, body, i64_ty, i_slot, Some("i_body"));
        let sum = b.build_binary(f, body, BinOp::Add, i64_ty, i_body, mul, None);
        b.build_store(f, body, i64_ty, i_slot, sum);
        b.finish_jump(f, body, header);

        b.build_ret(f, exit_b, None);

        l2(&mut module);

        let func = module.func(f);
        let muls: Vec<_> = func
            .iter_insts()
            .filter(|&i| matches!(func.insts[i].opcode, Opcode::Binary { op: BinOp::Mul, .. }))
            .collect();
        assert_eq!(muls.len(), 1, "ta * tb must survive exactly once after hoisting");
        let header_after = func.blocks[func.entry()].then_block.expect("entry falls through to the loop header");
        let mul_owner = func.insts[muls[0]].owner;
        assert_ne!(mul_owner, header_after, "the hoisted multiply must live outside the loop header");
    }

    /// `run_traced` must reach the same fixed point as `l2` — it exists
    /// only to add snapshot callbacks for `-d`, not to change behavior.
    #[test]
    fn run_traced_matches_untraced_pipeline() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let one = b.build_imm_signed(f, entry, i64_ty, 1);
        let two = b.build_imm_signed(f, entry, i64_ty, 2);
        let add = b.build_binary(f, entry, BinOp::Add, i64_ty, one, two, None);
        let count = b.build_imm_unsigned(f, entry, i64_ty, 1);
        let slot = b.build_alloca(f, entry, i64_ty, count, Some("a"));
        b.build_store(f, entry, i64_ty, slot, add);
        b.build_ret(f, entry, None);

        let mut passes_seen = Vec::new();
        run_traced(Pipeline::L2, &mut module, &mut |name, _| passes_seen.push(name.to_string()));

        assert_eq!(passes_seen, vec!["input", "dominators+loops", "mem2reg", "phi_eliminator", "inst_rewriter", "unreachable_elim", "phi_eliminator (post-unreachable)", "dce"]);
        let func = module.func(f);
        let binaries: Vec<_> = func.iter_insts().filter(|&i| matches!(func.insts[i].opcode, Opcode::Binary { .. })).collect();
        assert!(binaries.is_empty(), "run_traced should fold constants exactly like l2");
    }
}
