//! Constant folding, common-subexpression elimination, and loop-invariant
//! code motion in a single block-order walk (spec §4.3). Ported from
//! `lib/inst_rewriter.cpp`.

use crate::ir::dominator_tree::dominates;
use crate::ir::entities::{Block, Inst, TypeId};
use crate::ir::function::Function;
use crate::ir::instruction::{BinOp, Opcode};
use crate::ir::types::{TypeData, TypePool};
use crate::ir::value_map::ValueMap;
use std::collections::HashMap;

/// A two's-complement immediate value, tagged with the width/signedness it
/// was evaluated at. Folding and the `imm_map` interning key both use this.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct ImmKey {
    ty: TypeId,
    bits: u64,
}

pub fn run(types: &TypePool, func: &mut Function) {
    InstRewriter::new(types, func).run();
}

struct InstRewriter<'f> {
    func: &'f mut Function,
    types: &'f TypePool,
    imm_map: HashMap<ImmKey, Inst>,
    value_map: ValueMap,
    /// One CSE result set per block: `(op, lhs, rhs) -> inst`, looked up in
    /// the current block and then up the dominator chain.
    result_sets: HashMap<Block, HashMap<(BinOp, Inst, Inst), Inst>>,
    entry: Block,
}

impl<'f> InstRewriter<'f> {
    fn new(types: &'f TypePool, func: &'f mut Function) -> Self {
        let entry = func.entry();
        InstRewriter {
            func,
            types,
            imm_map: HashMap::new(),
            value_map: ValueMap::new(),
            result_sets: HashMap::new(),
            entry,
        }
    }

    fn run(&mut self) {
        let order = dominator_preorder(self.func);
        for block in order {
            let insts = self.func.blocks[block].insts.clone();
            for inst in insts {
                if self.func.insts[inst].dead {
                    continue;
                }
                self.visit(block, inst);
            }
        }
        self.value_map.apply_to(self.func);
    }

    fn visit(&mut self, block: Block, inst: Inst) {
        // Rewrite operands through value_map first.
        let mut opcode = self.func.insts[inst].opcode.clone();
        opcode.for_each_operand_mut(|op| *op = self.value_map.resolve(*op));
        self.func.insts[inst].opcode = opcode.clone();

        match opcode {
            Opcode::ImmSigned(_) | Opcode::ImmUnsigned(_) => self.visit_immediate(block, inst),
            Opcode::Binary { op, lhs, rhs } => self.visit_binary(block, inst, op, lhs, rhs),
            _ => {}
        }
    }

    fn imm_key(&self, inst: Inst) -> ImmKey {
        let ty = self.func.insts[inst].ty;
        let bits = match self.func.insts[inst].opcode {
            Opcode::ImmSigned(v) => v as u64,
            Opcode::ImmUnsigned(v) => v,
            _ => unreachable!(),
        };
        ImmKey { ty, bits }
    }

    fn visit_immediate(&mut self, block: Block, inst: Inst) {
        let key = self.imm_key(inst);
        if let Some(&existing) = self.imm_map.get(&key) {
            if existing != inst {
                self.value_map.insert(inst, existing);
                self.func.remove_inst(inst);
            }
            return;
        }
        self.imm_map.insert(key, inst);
        if block != self.entry {
            // Hoist the first occurrence of each distinct immediate to the
            // entry block.
            self.func.blocks[block].insts.retain(|&i| i != inst);
            self.func.blocks[self.entry].insts.insert(0, inst);
            self.func.insts[inst].owner = self.entry;
        }
    }

    fn intern_immediate(&mut self, block: Block, ty: TypeId, signed: bool, bits: u64) -> Inst {
        let key = ImmKey { ty, bits };
        if let Some(&existing) = self.imm_map.get(&key) {
            return existing;
        }
        let opcode = if signed {
            Opcode::ImmSigned(bits as i64)
        } else {
            Opcode::ImmUnsigned(bits)
        };
        let inst = self.func.append_inst(self.entry, crate::ir::InstructionData::new(opcode, ty, self.entry, None));
        self.imm_map.insert(key, inst);
        let _ = block;
        inst
    }

    fn visit_binary(&mut self, block: Block, inst: Inst, op: BinOp, lhs: Inst, rhs: Inst) {
        // Commutativity/addressing normalization (spec §4.3, §4.9).
        let (op, lhs, rhs) = self.normalize(op, lhs, rhs);
        if let Opcode::Binary { op: stored_op, lhs: slot_lhs, rhs: slot_rhs } = &mut self.func.insts[inst].opcode {
            *stored_op = op;
            *slot_lhs = lhs;
            *slot_rhs = rhs;
        }

        // 1. constant fold.
        if self.func.insts[lhs].opcode.is_immediate() && self.func.insts[rhs].opcode.is_immediate() {
            let ty = self.func.insts[inst].ty;
            let signed = matches!(self.types.get(ty), TypeData::SignedInt { .. });
            let width = self.types.get(ty).bit_width().unwrap_or(64);
            let a = self.imm_value(lhs);
            let b = self.imm_value(rhs);
            let folded = fold(op, a, b, width, signed);
            let result = self.intern_immediate(block, ty, signed, folded);
            if result != inst {
                self.value_map.insert(inst, result);
                self.func.remove_inst(inst);
            }
            return;
        }

        // 2. CSE: look up in this block or a dominator's result set.
        if let Some(existing) = self.cse_lookup(block, op, lhs, rhs) {
            self.value_map.insert(inst, existing);
            self.func.remove_inst(inst);
            self.result_sets.entry(block).or_default().insert((op, lhs, rhs), existing);
            return;
        }

        // 3. loop-invariant code motion.
        let cur_header = self.func.blocks[block].loop_header;
        if let Some(_) = cur_header {
            let lhs_block = self.func.insts[lhs].owner;
            let rhs_block = self.func.insts[rhs].owner;
            let lhs_header = self.func.blocks[lhs_block].loop_header;
            let rhs_header = self.func.blocks[rhs_block].loop_header;
            if lhs_header != cur_header && rhs_header != cur_header {
                let target = self.hoist_target(block, lhs_block, rhs_block);
                self.func.blocks[block].insts.retain(|&i| i != inst);
                self.func.blocks[target].insts.push(inst);
                self.func.insts[inst].owner = target;
                self.result_sets.entry(target).or_default().insert((op, lhs, rhs), inst);
                return;
            }
        }

        // 4. keep in place.
        self.result_sets.entry(block).or_default().insert((op, lhs, rhs), inst);
    }

    fn imm_value(&self, inst: Inst) -> u64 {
        match self.func.insts[inst].opcode {
            Opcode::ImmSigned(v) => v as u64,
            Opcode::ImmUnsigned(v) => v,
            _ => unreachable!(),
        }
    }

    fn normalize(&self, op: BinOp, lhs: Inst, rhs: Inst) -> (BinOp, Inst, Inst) {
        if !op.is_commutative() {
            return (op, lhs, rhs);
        }
        let lhs_imm = self.func.insts[lhs].opcode.is_immediate();
        let rhs_imm = self.func.insts[rhs].opcode.is_immediate();
        if lhs_imm && !rhs_imm {
            return (op, rhs, lhs);
        }
        let lhs_ptr = self.types.get(self.func.insts[lhs].ty).is_pointer_kind();
        let rhs_ptr = self.types.get(self.func.insts[rhs].ty).is_pointer_kind();
        if rhs_ptr && !lhs_ptr {
            return (op, rhs, lhs);
        }
        (op, lhs, rhs)
    }

    fn cse_lookup(&self, mut block: Block, op: BinOp, lhs: Inst, rhs: Inst) -> Option<Inst> {
        loop {
            if let Some(set) = self.result_sets.get(&block) {
                if let Some(&inst) = set.get(&(op, lhs, rhs)) {
                    return Some(inst);
                }
            }
            match self.func.blocks[block].dominator {
                Some(d) if d != block => block = d,
                _ => return None,
            }
        }
    }

    /// Walk outward through nested loop headers while both operand blocks
    /// still dominate the candidate preheader, per spec §4.3 step 3.
    fn hoist_target(&self, block: Block, lhs_block: Block, rhs_block: Block) -> Block {
        let mut header = self.func.blocks[block].loop_header.expect("checked by caller");
        let mut target = self
            .func
            .blocks[header]
            .dominator
            .expect("loop header is reachable, so it has an idom");
        loop {
            match self.func.blocks[header].loop_header {
                None => break,
                Some(outer_header) => {
                    let outer_preheader = match self.func.blocks[outer_header].dominator {
                        Some(d) => d,
                        None => break,
                    };
                    if dominates(self.func, lhs_block, outer_preheader) && dominates(self.func, rhs_block, outer_preheader) {
                        header = outer_header;
                        target = outer_preheader;
                    } else {
                        break;
                    }
                }
            }
        }
        target
    }
}

/// Blocks in an order where every block's immediate dominator has already
/// been visited: a pre-order walk of the dominator tree starting at entry.
fn dominator_preorder(func: &Function) -> Vec<Block> {
    let entry = func.entry();
    let mut children: HashMap<Block, Vec<Block>> = HashMap::new();
    for &b in &func.block_order {
        if b == entry {
            continue;
        }
        if let Some(d) = func.blocks[b].dominator {
            children.entry(d).or_default().push(b);
        }
    }
    let mut order = Vec::new();
    let mut stack = vec![entry];
    while let Some(b) = stack.pop() {
        order.push(b);
        if let Some(kids) = children.get(&b) {
            for &k in kids.iter().rev() {
                stack.push(k);
            }
        }
    }
    order
}

/// Evaluate a binary operator over two's-complement immediates at `width`
/// bits, matching whatever signedness the result type carries.
fn fold(op: BinOp, a: u64, b: u64, width: u32, signed: bool) -> u64 {
    let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
    let sign_bit = 1u64 << (width - 1);
    let to_signed = |v: u64| -> i64 {
        if width >= 64 {
            v as i64
        } else if v & sign_bit != 0 {
            (v | !mask) as i64
        } else {
            v as i64
        }
    };
    let raw: u64 = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if signed {
                let (ai, bi) = (to_signed(a), to_signed(b));
                if bi == 0 { 0 } else { (ai.wrapping_div(bi)) as u64 }
            } else {
                let (au, bu) = (a & mask, b & mask);
                if bu == 0 { 0 } else { au.wrapping_div(bu) }
            }
        }
        BinOp::Mod => {
            if signed {
                let (ai, bi) = (to_signed(a), to_signed(b));
                if bi == 0 { 0 } else { (ai.wrapping_rem(bi)) as u64 }
            } else {
                let (au, bu) = (a & mask, b & mask);
                if bu == 0 { 0 } else { au.wrapping_rem(bu) }
            }
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Nor => !(a | b),
        BinOp::Shl => a.wrapping_shl((b & 63) as u32),
        BinOp::Shr => {
            if signed {
                (to_signed(a) >> (b & 63)) as u64
            } else {
                (a & mask) >> (b & 63)
            }
        }
        BinOp::Seq => (a & mask == b & mask) as u64,
        BinOp::Sne => (a & mask != b & mask) as u64,
        BinOp::Slt => {
            if signed {
                (to_signed(a) < to_signed(b)) as u64
            } else {
                (a & mask < b & mask) as u64
            }
        }
        BinOp::Sle => {
            if signed {
                (to_signed(a) <= to_signed(b)) as u64
            } else {
                (a & mask <= b & mask) as u64
            }
        }
        BinOp::Sgt => {
            if signed {
                (to_signed(a) > to_signed(b)) as u64
            } else {
                (a & mask > b & mask) as u64
            }
        }
        BinOp::Sge => {
            if signed {
                (to_signed(a) >= to_signed(b)) as u64
            } else {
                (a & mask >= b & mask) as u64
            }
        }
    };
    raw & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_matches_twos_complement_division() {
        // 1 + 2 * 3 / 4 == 1 + 6/4 == 1 + 1 == 2 (integer division).
        let mul = fold(BinOp::Mul, 2, 3, 64, true);
        assert_eq!(mul, 6);
        let div = fold(BinOp::Div, mul, 4, 64, true);
        assert_eq!(div, 1);
        let add = fold(BinOp::Add, 1, div, 64, true);
        assert_eq!(add, 2);
    }

    #[test]
    fn fold_wraps_at_width() {
        let r = fold(BinOp::Add, 0xFF, 1, 8, false);
        assert_eq!(r, 0);
    }
}
