//! Debug-only structural invariant checks (spec §3, §7, §8).
//!
//! Per spec §7's error-handling policy, a violated IR invariant is a fatal
//! programmer error, never a recoverable `Result` — these run only under
//! `debug_assertions` and panic on failure, exactly like the rest of the
//! compiler's `debug_assert!`s.

use crate::ir::dominator_tree::dominates;
use crate::ir::function::Function;
use cyan_entity::EntityRef;

/// Check every invariant in spec §3 that can be checked locally (i.e.
/// everything except #5, which only holds right after `DeadCodeEliminater`
/// and is checked separately by that pass's own tests).
pub fn verify_function(func: &Function) {
    if !cfg!(debug_assertions) {
        return;
    }

    // 1. Entry block has no predecessors.
    assert!(
        func.blocks[func.entry()].preds.is_empty(),
        "function {}: entry block has predecessors",
        func.name
    );

    for &block in &func.block_order {
        let data = &func.blocks[block];

        // 2. Successors belong to this function (trivially true here since
        // `Block` handles are scoped to one function's arena — kept as a
        // live check in case a transform ever copies a handle across
        // functions by mistake).
        for succ in data.successors() {
            assert!(func.blocks.get(succ).is_some(), "dangling successor in {}", func.name);
        }

        for &inst in &data.insts {
            let inst_data = &func.insts[inst];
            assert!(!inst_data.dead, "dead instruction {} still linked in block {}", inst, data.name);

            // 4. A phi has exactly one branch per predecessor.
            if let Some(branches) = inst_data.opcode.as_phi_branches() {
                let mut froms: Vec<_> = branches.iter().map(|b| b.from).collect();
                froms.sort_by_key(|b| b.index());
                let mut preds = data.preds.clone();
                preds.sort_by_key(|b| b.index());
                assert_eq!(froms, preds, "phi {} branch set doesn't match predecessors of {}", inst, data.name);
            }

            // 3. Every operand dominates the use, or is a phi in the same block.
            inst_data.opcode.for_each_operand(|operand| {
                if func.insts[operand].dead {
                    panic!("instruction {} uses dead operand {}", inst, operand);
                }
                let def_block = func.insts[operand].owner;
                if def_block == block {
                    return;
                }
                assert!(
                    dominates(func, def_block, block),
                    "operand {} (defined in {}) does not dominate use {} in {}",
                    operand,
                    func.blocks[def_block].name,
                    inst,
                    data.name
                );
            });
        }
    }
}
