//! The process-wide type pool.
//!
//! Every [`TypeData`] value that is ever constructed is interned here, so
//! that two structurally-equal types collapse onto the same [`TypeId`] and
//! pointer/index equality implies type equality — callers never need a
//! separate "structural equals" comparison once a type has been through the
//! pool.

use crate::ir::entities::{FuncId, TypeId};
use cyan_entity::EntityRef;
use std::collections::HashMap;

/// A single named method slot on a [`TypeData::Concept`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConceptMethod {
    pub name: String,
    pub signature: TypeId,
    /// The implementing function, if one has been bound yet.
    pub implementation: Option<FuncId>,
}

/// One struct member: a name and its type, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeId,
}

/// The machine word size, in bytes, used throughout the compiler: array
/// element stride, pointer arithmetic scaling, and the VM's register width.
pub const WORD_SIZE: u32 = 8;
pub const WORD_BITS: u32 = 64;

/// The interned representation of a type. See spec §3 "Types".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    Void,
    SignedInt { bits: u32 },
    UnsignedInt { bits: u32 },
    Pointer(TypeId),
    /// A machine-word-sized array of `TypeId` elements.
    Array(TypeId),
    Function {
        args: Vec<TypeId>,
        /// Always a `Pointer` type per spec §3 (return "value" is the
        /// address the callee stores into, matching the original ABI's
        /// pointer-return convention for aggregates).
        ret: TypeId,
    },
    Method {
        owner: TypeId,
        signature: TypeId,
    },
    Concept {
        name: String,
        base: Option<TypeId>,
        methods: Vec<ConceptMethod>,
    },
    Struct {
        name: String,
        members: Vec<StructMember>,
        concepts: Vec<TypeId>,
    },
    /// A view of `struct_ty` through one of the concepts it implements.
    CastedStruct {
        struct_ty: TypeId,
        concept_ty: TypeId,
        /// Method table, parallel to the concept's method list. Every slot
        /// must be bound (`Some`) before codegen — see spec §3 invariants.
        vtable: Vec<Option<FuncId>>,
    },
    /// The runtime vtable record type for a concept.
    VTable(TypeId),
    /// A placeholder for a struct/concept name seen but not yet defined.
    Forward(String),
}

impl TypeData {
    /// Is this type a pointer-kind operand for the purposes of the
    /// commutativity/addressing normalization in spec §4.9 and §4.3?
    pub fn is_pointer_kind(&self) -> bool {
        matches!(
            self,
            TypeData::Pointer(_)
                | TypeData::Array(_)
                | TypeData::Struct { .. }
                | TypeData::CastedStruct { .. }
                | TypeData::VTable(_)
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, TypeData::SignedInt { .. })
    }

    pub fn bit_width(&self) -> Option<u32> {
        match self {
            TypeData::SignedInt { bits } | TypeData::UnsignedInt { bits } => Some(*bits),
            TypeData::Pointer(_) | TypeData::Array(_) => Some(WORD_BITS),
            _ => None,
        }
    }
}

/// Interns [`TypeData`] values, handing out stable [`TypeId`]s.
#[derive(Debug, Default)]
pub struct TypePool {
    table: Vec<TypeData>,
    index: HashMap<TypeData, TypeId>,
}

impl TypePool {
    pub fn new() -> Self {
        TypePool {
            table: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Intern `data`, returning the existing id if an equal type was
    /// already interned.
    pub fn intern(&mut self, data: TypeData) -> TypeId {
        if let Some(&id) = self.index.get(&data) {
            return id;
        }
        let id = TypeId::new(self.table.len());
        self.table.push(data.clone());
        self.index.insert(data, id);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeData {
        &self.table[id.index()]
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(TypeData::Void)
    }

    pub fn signed(&mut self, bits: u32) -> TypeId {
        debug_assert!(bits.is_power_of_two());
        self.intern(TypeData::SignedInt { bits })
    }

    pub fn unsigned(&mut self, bits: u32) -> TypeId {
        debug_assert!(bits.is_power_of_two());
        self.intern(TypeData::UnsignedInt { bits })
    }

    pub fn pointer(&mut self, base: TypeId) -> TypeId {
        self.intern(TypeData::Pointer(base))
    }

    pub fn array(&mut self, base: TypeId) -> TypeId {
        self.intern(TypeData::Array(base))
    }

    pub fn function(&mut self, args: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.intern(TypeData::Function { args, ret })
    }

    /// Replaces a previously-interned `Forward(name)` placeholder with its
    /// real definition everywhere it was used, by re-interning: callers
    /// hold `TypeId`s from before resolution, so the pool itself doesn't
    /// need rewriting — `Forward` only exists transiently while the
    /// builder is still discovering mutually-recursive struct/concept
    /// definitions, and well-typed input never leaves one unresolved.
    pub fn forward(&mut self, name: impl Into<String>) -> TypeId {
        self.intern(TypeData::Forward(name.into()))
    }

    /// Every interned type paired with its id, in interning order. Used by
    /// the x64 backend (spec §4.9/§6.3) to find every `CastedStruct` and
    /// emit its vtable into `.rodata` without needing the (out-of-scope)
    /// front end's struct/concept bookkeeping.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeData)> {
        self.table.iter().enumerate().map(|(i, t)| (TypeId::new(i), t))
    }

    pub fn is_word_sized(&self, id: TypeId) -> bool {
        matches!(
            self.get(id),
            TypeData::Pointer(_) | TypeData::Array(_) | TypeData::SignedInt { bits: WORD_BITS }
        ) || matches!(self.get(id), TypeData::UnsignedInt { bits: WORD_BITS })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_pointer_equal_ids() {
        let mut pool = TypePool::new();
        let a = pool.signed(64);
        let b = pool.signed(64);
        assert_eq!(a, b);

        let pa = pool.pointer(a);
        let pb = pool.pointer(b);
        assert_eq!(pa, pb);
    }

    #[test]
    fn distinct_widths_are_distinct_types() {
        let mut pool = TypePool::new();
        let i32_ty = pool.signed(32);
        let i64_ty = pool.signed(64);
        assert_ne!(i32_ty, i64_ty);
    }
}
