//! Fold branches on constant conditions, merge straight-line chains, drop
//! orphan blocks (spec §4.4). Ported from `lib/unreachable_code_eliminater.cpp`.

use crate::ir::entities::{Block, Inst};
use crate::ir::function::Function;
use crate::ir::instruction::Opcode;
use crate::ir::value_map::ValueMap;
use std::collections::{HashSet, VecDeque};

pub fn run(func: &mut Function) {
    let mut value_map = ValueMap::new();

    fold_constant_branches(func, &mut value_map);
    // Merging and dropping can each expose new opportunities for the other
    // (dropping an unreachable block can leave its surviving successor with
    // a single predecessor eligible for merging, and vice versa), so the
    // two run to a joint fixed point rather than just once each.
    loop {
        let merged = merge_straight_line_chains(func);
        let dropped = drop_unreachable_blocks(func, &mut value_map);
        if !merged && !dropped {
            break;
        }
    }

    value_map.apply_to(func);
    func.rebuild_predecessors();
}

/// A block's condition, if it's an immediate after `value_map` resolution,
/// decides the branch statically: demote to an unconditional jump and drop
/// the not-taken edge.
fn fold_constant_branches(func: &mut Function, value_map: &mut ValueMap) {
    let blocks = func.block_order.clone();
    for block in blocks {
        let Some(cond) = func.blocks[block].condition else { continue };
        let cond = value_map.resolve(cond);
        let taken = match func.insts[cond].opcode {
            Opcode::ImmSigned(v) => Some(v != 0),
            Opcode::ImmUnsigned(v) => Some(v != 0),
            _ => None,
        };
        let Some(taken) = taken else { continue };
        let then_b = func.blocks[block].then_block.unwrap();
        let else_b = func.blocks[block].else_block.unwrap();
        let (kept, dropped) = if taken { (then_b, else_b) } else { (else_b, then_b) };
        func.finish_jump(block, kept);
        drop_phi_contribution(func, dropped, block, value_map);
    }
}

/// A taken-away predecessor edge means every φ in the no-longer-reachable
/// successor loses that predecessor's branch, possibly collapsing to a
/// singleton (spec §4.4: "φ branches referring to a removed predecessor are
/// dropped; if a φ reaches a single value it is recorded in `value_map`").
fn drop_phi_contribution(func: &mut Function, block: Block, from: Block, value_map: &mut ValueMap) {
    // Only drop the contribution if `from` is no longer actually a
    // predecessor edge of `block` (the same block may still be reached via
    // another path, e.g. `if (c) { } else { }` both landing on the same
    // join).
    let still_reachable = func.blocks[block].preds.contains(&from) || func.block_order.iter().any(|&b| b != from && func.blocks[b].successors().any(|s| s == block));
    if still_reachable {
        return;
    }
    let insts = func.blocks[block].insts.clone();
    for inst in insts {
        if func.insts[inst].dead {
            continue;
        }
        let Some(branches) = func.insts[inst].opcode.as_phi_branches() else { continue };
        if !branches.iter().any(|b| b.from == from) {
            continue;
        }
        let remaining: Vec<_> = branches.iter().filter(|b| b.from != from).cloned().collect();
        let distinct: HashSet<Inst> = remaining.iter().map(|b| b.value).collect();
        if let Some(stored) = func.insts[inst].opcode.as_phi_branches_mut() {
            *stored = remaining;
        }
        if distinct.len() == 1 {
            let only = *distinct.iter().next().unwrap();
            if only != inst {
                value_map.insert(inst, only);
            }
            func.remove_inst(inst);
        }
    }
}

/// A block with exactly one predecessor, whose predecessor is an
/// unconditional jump targeting only this block, is folded into its
/// predecessor — the straight-line chain becomes one block.
fn merge_straight_line_chains(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        func.rebuild_predecessors();
        let mut merged_any = false;
        let blocks = func.block_order.clone();
        for block in blocks {
            if block == func.entry() {
                continue;
            }
            if func.blocks[block].preds.len() != 1 {
                continue;
            }
            let pred = func.blocks[block].preds[0];
            let pred_is_plain_jump =
                func.blocks[pred].condition.is_none() && func.blocks[pred].then_block == Some(block) && func.blocks[pred].else_block.is_none();
            if !pred_is_plain_jump {
                continue;
            }
            merge_into_predecessor(func, pred, block);
            merged_any = true;
            changed = true;
            break;
        }
        if !merged_any {
            break;
        }
    }
    changed
}

fn merge_into_predecessor(func: &mut Function, pred: Block, block: Block) {
    let insts = func.blocks[block].insts.clone();
    for inst in insts {
        func.blocks[pred].insts.push(inst);
        func.insts[inst].owner = pred;
    }
    let cond = func.blocks[block].condition;
    let then_b = func.blocks[block].then_block;
    let else_b = func.blocks[block].else_block;
    func.blocks[pred].condition = cond;
    func.blocks[pred].then_block = then_b;
    func.blocks[pred].else_block = else_b;
    func.blocks[block].insts.clear();
    func.blocks[block].condition = None;
    func.blocks[block].then_block = None;
    func.blocks[block].else_block = None;
}

/// Blocks whose predecessor set becomes empty, and which aren't the entry
/// block, are unreachable; remove them, cascading through their own
/// successors' φs exactly as `fold_constant_branches` does for a directly
/// dropped edge.
fn drop_unreachable_blocks(func: &mut Function, value_map: &mut ValueMap) -> bool {
    let mut changed = false;
    loop {
        func.rebuild_predecessors();
        let entry = func.entry();
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(entry);
        reachable.insert(entry);
        while let Some(b) = queue.pop_front() {
            for s in func.blocks[b].successors().collect::<Vec<_>>() {
                if reachable.insert(s) {
                    queue.push_back(s);
                }
            }
        }

        let dead_blocks: Vec<Block> = func.block_order.iter().copied().filter(|b| !reachable.contains(b)).collect();
        if dead_blocks.is_empty() {
            break;
        }

        for &dead in &dead_blocks {
            for succ in func.blocks[dead].successors().collect::<Vec<_>>() {
                if reachable.contains(&succ) {
                    drop_phi_contribution(func, succ, dead, value_map);
                }
            }
            for inst in func.blocks[dead].insts.clone() {
                func.remove_inst(inst);
            }
            func.blocks[dead].condition = None;
            func.blocks[dead].then_block = None;
            func.blocks[dead].else_block = None;
        }
        func.block_order.retain(|b| !dead_blocks.contains(b));
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::module::Module;

    #[test]
    fn constant_true_branch_drops_else() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let then_b = b.create_block(f, "then", 0);
        let else_b = b.create_block(f, "else", 0);
        let cond = b.build_imm_signed(f, entry, i64_ty, 1);
        b.finish_branch(f, entry, cond, then_b, else_b);
        b.build_ret(f, then_b, None);
        b.build_ret(f, else_b, None);

        let func = module.func_mut(f);
        run(func);

        assert!(func.blocks[entry].condition.is_none());
        assert_eq!(func.blocks[entry].then_block, Some(then_b));
        assert!(!func.block_order.contains(&else_b));
    }

    #[test]
    fn straight_line_jump_merges() {
        let mut module = Module::new();
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let next = b.create_block(f, "next", 0);
        b.finish_jump(f, entry, next);
        b.build_ret(f, next, None);

        let func = module.func_mut(f);
        run(func);

        assert!(func.blocks[entry].is_exit());
        assert!(!func.block_order.contains(&next));
    }
}
