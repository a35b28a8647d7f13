//! Best-effort cyclic global-initializer diagnostic.
//!
//! The original compiler's `dep_analyzer` (`lib/dep_analyzer.{hpp,cpp}`)
//! topologically reordered `_init_` so a global's initializer always ran
//! after the globals it read. spec §9 Open Question #2 resolves `_init_`
//! ordering as plain textual order instead (see `DESIGN.md`), which means
//! this crate never reorders anything — but a global that reads another
//! global's value before that global's own store has executed is still
//! almost certainly a mistake, so it's surfaced as a warning rather than
//! silently producing whatever value happened to be sitting in the
//! all-zero-initialized global region.
//!
//! This is intentionally best-effort: it only tracks direct
//! `global`-then-`load` chains within `_init_` itself, not loads reached
//! through an intervening pointer computation or a call into another
//! function.

use crate::diagnostics::Diagnostics;
use crate::ir::instruction::Opcode;
use crate::ir::module::Module;
use std::collections::HashSet;

/// Scan `_init_`, if present, for a global read before that same global's
/// own store has run, and warn on each one found.
pub fn check(module: &Module, diagnostics: &mut Diagnostics) {
    let Some(init_id) = module.lookup_function("_init_") else {
        return;
    };
    let func = module.func(init_id);

    let stored_globals: HashSet<&str> = func
        .iter_insts()
        .filter_map(|inst| match &func.insts[inst].opcode {
            Opcode::Store { addr, .. } => global_name_of(func, *addr),
            _ => None,
        })
        .collect();

    let mut initialized: HashSet<&str> = HashSet::new();
    for inst in func.iter_insts() {
        match &func.insts[inst].opcode {
            Opcode::Store { addr, .. } => {
                if let Some(name) = global_name_of(func, *addr) {
                    initialized.insert(name);
                }
            }
            Opcode::Load { addr } => {
                if let Some(name) = global_name_of(func, *addr) {
                    if stored_globals.contains(name) && !initialized.contains(name) {
                        diagnostics.warn(format!(
                            "`_init_` reads global `{}` before its own initializer runs; \
                             textual order is not reordered, so this may read a stale value",
                            name
                        ));
                    }
                }
            }
            _ => {}
        }
    }
}

fn global_name_of<'f>(func: &'f crate::ir::function::Function, addr: crate::ir::entities::Inst) -> Option<&'f str> {
    match &func.insts[addr].opcode {
        Opcode::Global { name } => Some(name.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;

    #[test]
    fn forward_reference_between_globals_warns() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        module.declare_global("a", i64_ty);
        module.declare_global("b", i64_ty);

        let init_sig = module.types.function(vec![], module.types.void());
        let mut b = IrBuilder::new(&mut module);
        let init_f = b.declare_function("_init_", init_sig);
        let entry = b.create_block(init_f, "entry", 0);

        let b_ref = b.build_global(init_f, entry, i64_ty, "b");
        let loaded = b.build_load(init_f, entry, i64_ty, b_ref, Some("stale"));
        let a_ref = b.build_global(init_f, entry, i64_ty, "a");
        b.build_store(init_f, entry, i64_ty, a_ref, loaded);

        let five = b.build_imm_signed(init_f, entry, i64_ty, 5);
        let b_ref2 = b.build_global(init_f, entry, i64_ty, "b");
        b.build_store(init_f, entry, i64_ty, b_ref2, five);
        b.build_ret(init_f, entry, None);

        let mut diagnostics = Diagnostics::default();
        check(&module, &mut diagnostics);
        assert_eq!(diagnostics.entries().len(), 1);
        assert!(diagnostics.entries()[0].message.contains("`b`"));
    }

    #[test]
    fn in_order_initialization_is_silent() {
        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        module.declare_global("a", i64_ty);
        module.declare_global("b", i64_ty);

        let init_sig = module.types.function(vec![], module.types.void());
        let mut b = IrBuilder::new(&mut module);
        let init_f = b.declare_function("_init_", init_sig);
        let entry = b.create_block(init_f, "entry", 0);

        let one = b.build_imm_signed(init_f, entry, i64_ty, 1);
        let a_ref = b.build_global(init_f, entry, i64_ty, "a");
        b.build_store(init_f, entry, i64_ty, a_ref, one);

        let a_ref2 = b.build_global(init_f, entry, i64_ty, "a");
        let loaded = b.build_load(init_f, entry, i64_ty, a_ref2, Some("from_a"));
        let b_ref = b.build_global(init_f, entry, i64_ty, "b");
        b.build_store(init_f, entry, i64_ty, b_ref, loaded);
        b.build_ret(init_f, entry, None);

        let mut diagnostics = Diagnostics::default();
        check(&module, &mut diagnostics);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn missing_init_function_is_a_no_op() {
        let module = Module::new();
        let mut diagnostics = Diagnostics::default();
        check(&module, &mut diagnostics);
        assert!(diagnostics.is_empty());
    }
}
