//! Replace trivial φs — ones with exactly one distinct non-self branch
//! value — with that value (spec §4.5). Ported from
//! `lib/phi_eliminator.cpp`.

use crate::ir::entities::Inst;
use crate::ir::function::Function;
use crate::ir::value_map::ValueMap;
use std::collections::HashSet;

pub fn run(func: &mut Function) {
    let mut value_map = ValueMap::new();
    let phis: Vec<Inst> = func.iter_insts().filter(|&i| func.insts[i].opcode.is_phi()).collect();

    for phi in phis {
        if func.insts[phi].dead {
            continue;
        }
        let Some(branches) = func.insts[phi].opcode.as_phi_branches() else { continue };
        let distinct: HashSet<Inst> = branches.iter().map(|b| b.value).filter(|&v| v != phi).collect();
        if distinct.len() == 1 {
            let only = *distinct.iter().next().unwrap();
            value_map.insert(phi, only);
            func.remove_inst(phi);
        }
    }

    value_map.apply_to(func);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::instruction::PhiBranch;
    use crate::ir::module::Module;
    use crate::ir::InstructionData;
    use crate::ir::Opcode;

    #[test]
    fn single_distinct_branch_collapses() {
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
        let v = b.build_imm_signed(f, then_b, i64_ty, 7);
        b.finish_jump(f, then_b, join);
        b.finish_jump(f, else_b, join);

        let func = module.func_mut(f);
        func.rebuild_predecessors();
        let phi = func.append_inst(join, InstructionData::new(Opcode::Phi { branches: Vec::new() }, i64_ty, join, None));
        if let Some(branches) = func.insts[phi].opcode.as_phi_branches_mut() {
            branches.push(PhiBranch { value: v, from: then_b });
            branches.push(PhiBranch { value: v, from: else_b });
        }
        func.finish_ret(join, Some(phi));

        run(func);
        assert!(func.insts[phi].dead);
    }
}
