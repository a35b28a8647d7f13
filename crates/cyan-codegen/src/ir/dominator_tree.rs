//! Dominator and loop analysis (spec §4.1).
//!
//! `compute_dominators` is the set-intersection variant of the standard
//! iterative dominance algorithm (Cooper, Harvey & Kennedy, "A Simple, Fast
//! Dominance Algorithm"): walk the CFG in reverse postorder, repeatedly
//! intersecting each block's provisional dominator with each processed
//! predecessor's, until a fixed point. `compute_loops` then finds natural
//! loops from back edges and marks header/depth, processing innermost
//! loops first so a block's `loop_header` ends up naming its *innermost*
//! enclosing loop (spec: "Nested loops are handled by processing back
//! edges inside-out").

use crate::ir::entities::Block;
use crate::ir::function::Function;
use std::collections::HashMap;

/// Depth-first walk from the entry block, filling `preds` and computing
/// immediate dominators. A failure here (disconnected block, etc.) is a
/// programmer error per spec §4.1 — "Running this on an IR that violates
/// structural invariants is a programmer error; implementations should
/// assert" — so we simply skip unreachable blocks rather than erroring:
/// they have no dominator and will be swept by
/// `UnreachableCodeEliminater`.
pub fn compute_dominators(func: &mut Function) {
    let entry = func.entry();
    func.rebuild_predecessors();

    let rpo = reverse_postorder(func, entry);
    let mut rpo_number: HashMap<Block, usize> = HashMap::new();
    for (i, &b) in rpo.iter().enumerate() {
        rpo_number.insert(b, i);
    }

    for &b in &func.block_order {
        func.blocks[b].dominator = None;
    }
    func.blocks[entry].dominator = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let preds: Vec<Block> = func.blocks[b].preds.iter().copied().filter(|p| rpo_number.contains_key(p)).collect();
            let mut new_idom: Option<Block> = None;
            for &p in &preds {
                if func.blocks[p].dominator.is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(func, &rpo_number, cur, p),
                });
            }
            if new_idom != func.blocks[b].dominator {
                func.blocks[b].dominator = new_idom;
                changed = true;
            }
        }
    }
}

fn intersect(func: &Function, rpo_number: &HashMap<Block, usize>, mut a: Block, mut b: Block) -> Block {
    loop {
        if a == b {
            return a;
        }
        while rpo_number[&a] > rpo_number[&b] {
            a = func.blocks[a].dominator.expect("block processed before its dominator");
        }
        while rpo_number[&b] > rpo_number[&a] {
            b = func.blocks[b].dominator.expect("block processed before its dominator");
        }
    }
}

fn reverse_postorder(func: &Function, entry: Block) -> Vec<Block> {
    let mut visited = std::collections::HashSet::new();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((b, expanded)) = stack.pop() {
        if expanded {
            postorder.push(b);
            continue;
        }
        if !visited.insert(b) {
            continue;
        }
        stack.push((b, true));
        for succ in func.blocks[b].successors() {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

/// Does `d` dominate `b` (reflexively — every block dominates itself)?
pub fn dominates(func: &Function, d: Block, mut b: Block) -> bool {
    loop {
        if b == d {
            return true;
        }
        match func.blocks[b].dominator {
            Some(next) if next != b => b = next,
            _ => return b == d,
        }
    }
}

/// Distance from `block` to the entry along the dominator tree; used to
/// order back edges innermost-first in `compute_loops`.
fn dom_tree_depth(func: &Function, mut block: Block) -> u32 {
    let entry = func.entry();
    let mut depth = 0;
    while block != entry {
        match func.blocks[block].dominator {
            Some(d) if d != block => {
                block = d;
                depth += 1;
            }
            _ => break,
        }
    }
    depth
}

/// Natural-loop marking (spec §4.1, second half).
pub fn compute_loops(func: &mut Function) {
    for &b in &func.block_order {
        func.blocks[b].depth = 0;
        func.blocks[b].loop_header = None;
    }

    let mut back_edges: Vec<(Block, Block)> = Vec::new();
    for &u in &func.block_order {
        for v in func.blocks[u].successors().collect::<Vec<_>>() {
            if dominates(func, v, u) {
                back_edges.push((u, v));
            }
        }
    }

    // Innermost loops first: a header nested deeper in the dominator tree
    // is processed before a shallower (more outer) one.
    back_edges.sort_by_key(|&(_, header)| std::cmp::Reverse(dom_tree_depth(func, header)));

    for (u, v) in back_edges {
        let body = collect_loop_body(func, u, v);
        for b in body {
            func.blocks[b].depth += 1;
            if func.blocks[b].loop_header.is_none() {
                func.blocks[b].loop_header = Some(v);
            }
        }
    }
}

/// Blocks reachable backwards from `u` through predecessor links until `v`
/// is met, inclusive of both `u` and `v` (spec §4.1).
fn collect_loop_body(func: &Function, u: Block, v: Block) -> Vec<Block> {
    let mut body = vec![v];
    let mut seen = std::collections::HashSet::new();
    seen.insert(v);
    if u != v {
        seen.insert(u);
        body.push(u);
        let mut worklist = vec![u];
        while let Some(b) = worklist.pop() {
            for &p in &func.blocks[b].preds {
                if seen.insert(p) {
                    body.push(p);
                    worklist.push(p);
                }
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::module::Module;

    fn diamond() -> (Module, crate::ir::entities::FuncId, Vec<Block>) {
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
        b.finish_jump(f, then_b, join);
        b.finish_jump(f, else_b, join);
        b.build_ret(f, join, None);
        (module, f, vec![entry, then_b, else_b, join])
    }

    #[test]
    fn join_dominated_only_by_entry() {
        let (mut module, f, blocks) = diamond();
        let func = module.func_mut(f);
        compute_dominators(func);
        let join = blocks[3];
        let entry = blocks[0];
        assert_eq!(func.blocks[join].dominator, Some(entry));
        assert!(dominates(func, entry, join));
        assert!(!dominates(func, blocks[1], join));
    }

    #[test]
    fn simple_loop_marks_header_and_depth() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let header = b.create_block(f, "header", 1);
        let body = b.create_block(f, "body", 1);
        let exit = b.create_block(f, "exit", 0);
        b.finish_jump(f, entry, header);
        let cond = b.build_imm_signed(f, header, i64_ty, 1);
        b.finish_branch(f, header, cond, body, exit);
        b.finish_jump(f, body, header);
        b.build_ret(f, exit, None);

        let func = module.func_mut(f);
        compute_dominators(func);
        compute_loops(func);

        assert_eq!(func.blocks[header].loop_header, Some(header));
        assert_eq!(func.blocks[body].loop_header, Some(header));
        assert_eq!(func.blocks[header].depth, 1);
        assert_eq!(func.blocks[body].depth, 1);
        assert_eq!(func.blocks[entry].depth, 0);
        assert_eq!(func.blocks[exit].depth, 0);
    }
}
