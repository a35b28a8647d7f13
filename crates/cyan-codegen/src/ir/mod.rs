//! The SSA-form intermediate representation (spec §3) and the analyses
//! that read it without mutating it (spec §4.1).

pub mod builder;
pub mod dominator_tree;
pub mod dump;
pub mod entities;
pub mod function;
pub mod instruction;
pub mod module;
pub mod types;
pub mod value_map;
pub mod verify;

pub use builder::IrBuilder;
pub use entities::{Block, FuncId, Inst, StringId, TypeId};
pub use function::{BlockData, Function};
pub use instruction::{BinOp, InstructionData, Opcode, PhiBranch};
pub use module::Module;
pub use types::{TypeData, TypePool};
pub use value_map::ValueMap;
