//! Textual IR dumper.
//!
//! This is the printing half of the textual format `cyan_reader` parses —
//! together they stand in for the out-of-scope source-language front end
//! (spec §1) and back the `-d` per-pass snapshot flag and `-e IR` emit mode
//! (spec §6.2).

use crate::ir::entities::{Block, FuncId};
use crate::ir::function::Function;
use crate::ir::instruction::{BinOp, Opcode};
use crate::ir::module::Module;
use crate::ir::types::{TypeData, TypeId};
use std::fmt::Write;

pub fn type_to_string(module: &Module, ty: TypeId) -> String {
    match module.types.get(ty) {
        TypeData::Void => "void".to_string(),
        TypeData::SignedInt { bits } => format!("i{}", bits),
        TypeData::UnsignedInt { bits } => format!("u{}", bits),
        TypeData::Pointer(base) => format!("ptr<{}>", type_to_string(module, *base)),
        TypeData::Array(base) => format!("arr<{}>", type_to_string(module, *base)),
        TypeData::Function { args, ret } => {
            let args: Vec<String> = args.iter().map(|&a| type_to_string(module, a)).collect();
            format!("func({}) -> {}", args.join(", "), type_to_string(module, *ret))
        }
        TypeData::Method { owner, signature } => {
            format!("method<{}>{}", type_to_string(module, *owner), type_to_string(module, *signature))
        }
        TypeData::Concept { name, .. } => format!("concept {}", name),
        TypeData::Struct { name, .. } => format!("struct {}", name),
        TypeData::CastedStruct { struct_ty, concept_ty, .. } => {
            format!("casted<{}, {}>", type_to_string(module, *struct_ty), type_to_string(module, *concept_ty))
        }
        TypeData::VTable(concept) => format!("vtable<{}>", type_to_string(module, *concept)),
        TypeData::Forward(name) => format!("forward {}", name),
    }
}

pub fn binop_mnemonic(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "div",
        BinOp::Mod => "mod",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Nor => "nor",
        BinOp::Shl => "shl",
        BinOp::Shr => "shr",
        BinOp::Seq => "seq",
        BinOp::Sne => "sne",
        BinOp::Slt => "slt",
        BinOp::Sle => "sle",
        BinOp::Sgt => "sgt",
        BinOp::Sge => "sge",
    }
}

fn inst_to_string(module: &Module, func: &Function, inst: crate::ir::entities::Inst) -> String {
    let data = &func.insts[inst];
    let ty = type_to_string(module, data.ty);
    let name = data
        .name
        .clone()
        .unwrap_or_else(|| format!("{}", inst));
    let rhs = match &data.opcode {
        Opcode::ImmSigned(v) => format!("imm.{} {}", ty, v),
        Opcode::ImmUnsigned(v) => format!("imm.{} {}", ty, v),
        Opcode::Binary { op, lhs, rhs } => format!("{}.{} {}, {}", binop_mnemonic(*op), ty, lhs, rhs),
        Opcode::Load { addr } => format!("load.{} {}", ty, addr),
        Opcode::Store { addr, value } => return format!("store {}, {}", addr, value),
        Opcode::Alloca { count } => format!("alloca.{} count={}", ty, count),
        Opcode::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            format!("call.{} {}({})", ty, callee, args.join(", "))
        }
        Opcode::Ret { value } => {
            return match value {
                Some(v) => format!("ret {}", v),
                None => "ret".to_string(),
            }
        }
        Opcode::New { count } => format!("new.{} count={}", ty, count),
        Opcode::Delete { addr } => return format!("delete {}", addr),
        Opcode::Phi { branches } => {
            let parts: Vec<String> = branches.iter().map(|b| format!("[{}: {}]", b.value, b.from)).collect();
            format!("phi.{} {}", ty, parts.join(", "))
        }
        Opcode::Arg { index } => format!("arg.{} {}", ty, index),
        Opcode::Global { name } => format!("global.{} {}", ty, name),
        Opcode::Forward => "forward".to_string(),
    };
    format!("{} = {}", name, rhs)
}

fn block_to_string(module: &Module, func: &Function, block: Block, out: &mut String) {
    let data = &func.blocks[block];
    let _ = writeln!(out, "block {}[depth={}]:", data.name, data.depth);
    for &inst in &data.insts {
        let _ = writeln!(out, "    {}", inst_to_string(module, func, inst));
    }
    if let Some(cond) = data.condition {
        let then_b = data.then_block.unwrap();
        let else_b = data.else_block.unwrap();
        let _ = writeln!(out, "    br {} -> {}, {}", cond, func.blocks[then_b].name, func.blocks[else_b].name);
    } else if let Some(then_b) = data.then_block {
        let _ = writeln!(out, "    jump {}", func.blocks[then_b].name);
    }
}

pub fn function_to_string(module: &Module, id: FuncId) -> String {
    let func = module.func(id);
    let mut out = String::new();
    let sig = type_to_string(module, func.signature);
    let _ = writeln!(out, "func {} : {} {{", func.name, sig);
    for &block in &func.block_order {
        block_to_string(module, func, block, &mut out);
    }
    let _ = writeln!(out, "}}");
    out
}

pub fn module_to_string(module: &Module) -> String {
    let mut out = String::new();
    for (name, ty) in module.globals() {
        let _ = writeln!(out, "global {} : {}", name, type_to_string(module, ty));
    }
    for (id, s) in module.strings() {
        let _ = writeln!(out, "string {} = {:?}", id, s);
    }
    for fid in module.function_ids() {
        out.push_str(&function_to_string(module, fid));
    }
    out
}
