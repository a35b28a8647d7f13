//! Opaque handles into the per-module and per-function arenas.

use cyan_entity::entity_impl;

/// A reference to an interned [`crate::ir::types::TypeData`] in a
/// [`crate::ir::types::TypePool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);
entity_impl!(TypeId, "t");

/// A reference to a [`crate::ir::function::Function`] in a
/// [`crate::ir::module::Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "fn");

/// A reference to a basic block within one function's block arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A reference to an instruction within one function's instruction arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "v");

/// A reference to an interned string literal in a module's string pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);
entity_impl!(StringId, "str");
