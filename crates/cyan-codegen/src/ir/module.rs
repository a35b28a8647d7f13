//! The top-level compilation unit: functions, globals, strings, types.

use crate::ir::entities::{FuncId, StringId, TypeId};
use crate::ir::function::Function;
use crate::ir::types::TypePool;
use cyan_entity::{EntityRef, PrimaryMap};
use std::collections::HashMap;

/// Spec §3's `IR`: "mapping name→Function (insertion order preserved),
/// global symbol table (name→type), interned string pool (content→label),
/// owned type pool."
#[derive(Debug, Default)]
pub struct Module {
    funcs: PrimaryMap<FuncId, Function>,
    func_names: HashMap<String, FuncId>,
    /// Insertion order is preserved in `globals_order`; `globals` gives
    /// `O(1)` lookup. Emission (§6.3) walks `globals_order` so `.data` is
    /// deterministic across runs.
    globals: HashMap<String, TypeId>,
    globals_order: Vec<String>,
    strings: Vec<String>,
    string_index: HashMap<String, StringId>,
    pub types: TypePool,
}

impl Module {
    pub fn new() -> Self {
        Module {
            funcs: PrimaryMap::new(),
            func_names: HashMap::new(),
            globals: HashMap::new(),
            globals_order: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            types: TypePool::new(),
        }
    }

    pub fn declare_function(&mut self, name: impl Into<String>, signature: TypeId) -> FuncId {
        let name = name.into();
        if let Some(&id) = self.func_names.get(&name) {
            return id;
        }
        let void_ty = self.types.void();
        let id = self.funcs.push(Function::new(name.clone(), signature, void_ty));
        self.func_names.insert(name, id);
        id
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id]
    }

    pub fn lookup_function(&self, name: &str) -> Option<FuncId> {
        self.func_names.get(name).copied()
    }

    /// Functions in insertion order, as spec §3 requires.
    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.funcs.keys()
    }

    pub fn remove_function(&mut self, id: FuncId) {
        let name = self.funcs[id].name.clone();
        self.func_names.remove(&name);
        // The arena slot is kept (other `FuncId`s must stay valid); callers
        // are expected to have already dropped every reference via the
        // calling-graph / `ir_builder` bookkeeping, matching how
        // instruction removal tombstones rather than compacts the arena.
    }

    pub fn declare_global(&mut self, name: impl Into<String>, ty: TypeId) {
        let name = name.into();
        if !self.globals.contains_key(&name) {
            self.globals_order.push(name.clone());
        }
        self.globals.insert(name, ty);
    }

    pub fn global_type(&self, name: &str) -> Option<TypeId> {
        self.globals.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, TypeId)> + '_ {
        self.globals_order.iter().map(move |n| (n.as_str(), self.globals[n]))
    }

    pub fn intern_string(&mut self, content: impl Into<String>) -> StringId {
        let content = content.into();
        if let Some(&id) = self.string_index.get(&content) {
            return id;
        }
        let id = StringId::new(self.strings.len());
        self.strings.push(content.clone());
        self.string_index.insert(content, id);
        id
    }

    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn strings(&self) -> impl Iterator<Item = (StringId, &str)> {
        self.strings.iter().enumerate().map(|(i, s)| (StringId::new(i), s.as_str()))
    }
}
