//! Functions and basic blocks.
//!
//! Per spec §9's "back-references everywhere" design note, a `Function`
//! owns two flat arenas — one for blocks, one for instructions — and every
//! cross-reference (an instruction's owner, a block's dominator, a φ's
//! source block) is an index into one of them. This is what makes cloning
//! a callee's body during inlining (§4.7) or splitting a block during
//! mem2reg cheap: remap two `HashMap`s instead of rewriting a pointer
//! graph.

use crate::ir::entities::{Block, Inst, TypeId};
use crate::ir::instruction::{InstructionData, Opcode};
use cyan_entity::PrimaryMap;
use std::collections::HashSet;

/// A basic block. Control-flow convention (spec §3):
/// - `condition.is_some()` implies both `then_block` and `else_block` are
///   set (a conditional branch);
/// - `condition.is_none() && then_block.is_some()` is an unconditional jump;
/// - neither set means this block exits the function and its instruction
///   list must end in a `ret`.
#[derive(Clone, Debug)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<Inst>,
    pub condition: Option<Inst>,
    pub then_block: Option<Block>,
    pub else_block: Option<Block>,
    pub preds: Vec<Block>,
    pub dominator: Option<Block>,
    pub loop_header: Option<Block>,
    pub depth: u32,
}

impl BlockData {
    fn new(name: String, depth: u32) -> Self {
        BlockData {
            name,
            insts: Vec::new(),
            condition: None,
            then_block: None,
            else_block: None,
            preds: Vec::new(),
            dominator: None,
            loop_header: None,
            depth,
        }
    }

    /// The successors of this block in the order `(then, else)`, skipping
    /// unset slots. A conditional block yields both; a jump yields one;
    /// an exit block yields none.
    pub fn successors(&self) -> impl Iterator<Item = Block> + '_ {
        self.then_block.into_iter().chain(self.else_block)
    }

    pub fn is_exit(&self) -> bool {
        self.condition.is_none() && self.then_block.is_none()
    }
}

/// A function body: its signature and its owned block/instruction arenas.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// A `TypeData::Function` id.
    pub signature: TypeId,
    /// The module's `Void` type, stashed here so `finish_ret` can type a
    /// value-less `ret` without needing a `&TypePool` passed through every
    /// call site.
    pub void_ty: TypeId,
    pub blocks: PrimaryMap<Block, BlockData>,
    /// Block arena order is insertion order; `entry()` is always the first
    /// one created (spec §3: "entry is first").
    pub block_order: Vec<Block>,
    pub insts: PrimaryMap<Inst, InstructionData>,
    local_temp_counter: u32,
    local_names: HashSet<String>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: TypeId, void_ty: TypeId) -> Self {
        Function {
            name: name.into(),
            signature,
            void_ty,
            blocks: PrimaryMap::new(),
            block_order: Vec::new(),
            insts: PrimaryMap::new(),
            local_temp_counter: 0,
            local_names: HashSet::new(),
        }
    }

    pub fn entry(&self) -> Block {
        self.block_order[0]
    }

    /// Monotone counter used to uniquify synthetic names (spec §3:
    /// "local-temp counter (monotone)").
    pub fn count_local_temp(&mut self) -> u32 {
        let n = self.local_temp_counter;
        self.local_temp_counter += 1;
        n
    }

    /// Make `variable_name` unique within this function, suffixing with a
    /// fresh temp number on collision.
    pub fn make_name(&mut self, variable_name: impl Into<String>) -> String {
        let mut name = variable_name.into();
        if self.local_names.contains(&name) {
            name = format!("{}_{}", name, self.count_local_temp());
        }
        self.local_names.insert(name.clone());
        name
    }

    pub fn create_block(&mut self, name: impl Into<String>, depth: u32) -> Block {
        let block = self.blocks.push(BlockData::new(name.into(), depth));
        self.block_order.push(block);
        block
    }

    /// Append a new instruction to the end of `block`'s instruction list.
    pub fn append_inst(&mut self, block: Block, data: InstructionData) -> Inst {
        let inst = self.insts.push(data);
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Insert `inst` at the front of `block`'s instruction list (used to
    /// plant φs, which must precede every other instruction in a block).
    pub fn prepend_inst(&mut self, block: Block, inst: Inst) {
        self.blocks[block].insts.insert(0, inst);
    }

    /// Remove `inst` from its owner block's instruction list. The arena
    /// slot is kept (tombstoned) so outstanding `Inst` handles don't dangle
    /// across a `ValueMap` resolution that hasn't run yet.
    pub fn remove_inst(&mut self, inst: Inst) {
        let owner = self.insts[inst].owner;
        self.blocks[owner].insts.retain(|&i| i != inst);
        self.insts[inst].dead = true;
    }

    pub fn finish_jump(&mut self, block: Block, target: Block) {
        self.blocks[block].condition = None;
        self.blocks[block].then_block = Some(target);
        self.blocks[block].else_block = None;
    }

    pub fn finish_branch(&mut self, block: Block, condition: Inst, then_b: Block, else_b: Block) {
        self.blocks[block].condition = Some(condition);
        self.blocks[block].then_block = Some(then_b);
        self.blocks[block].else_block = Some(else_b);
    }

    /// `ret` inside a block clears that block's successors (spec §3).
    pub fn finish_ret(&mut self, block: Block, value: Option<Inst>) -> Inst {
        self.blocks[block].condition = None;
        self.blocks[block].then_block = None;
        self.blocks[block].else_block = None;
        let ty = value.map(|v| self.insts[v].ty).unwrap_or(self.void_ty);
        self.append_inst(block, InstructionData::new(Opcode::Ret { value }, ty, block, None))
    }

    pub fn rebuild_predecessors(&mut self) {
        for b in self.block_order.iter() {
            self.blocks[*b].preds.clear();
        }
        let blocks: Vec<Block> = self.block_order.clone();
        for b in blocks {
            let succs: Vec<Block> = self.blocks[b].successors().collect();
            for s in succs {
                if !self.blocks[s].preds.contains(&b) {
                    self.blocks[s].preds.push(b);
                }
            }
        }
    }

    pub fn reference(&mut self, inst: Inst) {
        self.insts[inst].ref_count += 1;
    }

    pub fn unreference(&mut self, inst: Inst) {
        debug_assert!(self.insts[inst].ref_count > 0);
        self.insts[inst].ref_count -= 1;
    }

    pub fn instruction_count(&self) -> usize {
        self.block_order.iter().map(|b| self.blocks[*b].insts.len()).sum()
    }

    /// Iterate over every live instruction handle in block order, the
    /// order most passes want to walk in.
    pub fn iter_insts(&self) -> impl Iterator<Item = Inst> + '_ {
        self.block_order.iter().flat_map(move |b| self.blocks[*b].insts.iter().copied())
    }
}
