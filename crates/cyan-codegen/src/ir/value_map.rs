//! The `old -> new` substitution map every transform threads through (spec
//! §3 "Lifecycle": "Replacement is performed through a `value_map`
//! (old->new) that each instruction applies to its operands during a
//! `resolve` step.").

use crate::ir::entities::Inst;
use crate::ir::function::Function;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct ValueMap {
    map: HashMap<Inst, Inst>,
}

impl ValueMap {
    pub fn new() -> Self {
        ValueMap { map: HashMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn insert(&mut self, old: Inst, new: Inst) {
        self.map.insert(old, new);
    }

    /// Follow the substitution chain for `inst` to a fixed point. Chains
    /// arise when a value is replaced twice by successive rewrites (e.g. a
    /// CSE hit whose canonical instruction is itself later folded).
    pub fn resolve(&self, mut inst: Inst) -> Inst {
        let mut seen = 0;
        while let Some(&next) = self.map.get(&inst) {
            inst = next;
            seen += 1;
            debug_assert!(seen <= self.map.len() + 1, "value_map cycle");
        }
        inst
    }

    /// Apply this map to every instruction operand and every block
    /// condition in `func` — spec §3's `resolve` step, run once after a
    /// pass finishes rewriting.
    pub fn apply_to(&self, func: &mut Function) {
        if self.is_empty() {
            return;
        }
        let insts: Vec<Inst> = func.insts.keys().collect();
        for inst in insts {
            if func.insts[inst].dead {
                continue;
            }
            let mut data = func.insts[inst].opcode.clone();
            data.for_each_operand_mut(|operand| *operand = self.resolve(*operand));
            func.insts[inst].opcode = data;
        }
        let blocks: Vec<_> = func.block_order.clone();
        for b in blocks {
            if let Some(cond) = func.blocks[b].condition {
                func.blocks[b].condition = Some(self.resolve(cond));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyan_entity::EntityRef;

    #[test]
    fn resolve_follows_chains() {
        let mut vm = ValueMap::new();
        let a = Inst::new(0);
        let b = Inst::new(1);
        let c = Inst::new(2);
        vm.insert(a, b);
        vm.insert(b, c);
        assert_eq!(vm.resolve(a), c);
        assert_eq!(vm.resolve(b), c);
        assert_eq!(vm.resolve(c), c);
    }
}
