//! Assembly emission (spec §4.9 "Emission", §6.3 "Assembly output").
//!
//! Renders an [`AllocatedFunction`] stream to GNU-as Intel-syntax text,
//! matching the original `CodeGenX64::generate`/`writeFunctionHeader`/
//! `writeFunctionFooter`: `.data` for globals, `.rodata` for interned
//! strings and concept vtables, then `.text` with one label block per
//! function.

use std::fmt::Write as _;

use super::operand::{byte_register_name, AnyRegister, Operand, PhysLoc, Register};
use super::pseudo::Pseudo;
use super::regalloc::{allocate_function, AllocatedFunction};
use crate::ir::module::Module;
use crate::ir::types::TypeData;
use cyan_entity::EntityRef;

use super::lower::lower_function;

/// Escape a front-end name into one GAS will accept as a symbol:
/// alphanumerics and `_` pass through, `.` becomes `_` (so
/// `Foo.bar` and `Foo_bar` can't collide is not guaranteed, but neither
/// does the original), anything else becomes `$`.
pub fn escape_asm_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
        } else if ch == '.' {
            out.push('_');
        } else {
            out.push('$');
        }
    }
    out
}

/// Render a string literal as a `.asciz` operand, C-escaping everything
/// outside printable ASCII.
fn escape_string(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 2);
    out.push('"');
    for byte in content.bytes() {
        match byte {
            b'\t' => out.push_str("\\t"),
            0x0c => out.push_str("\\f"),
            0x0b => out.push_str("\\v"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\x{:02X}", byte);
            }
        }
    }
    out.push('"');
    out
}

/// Emit a whole module to one assembly text blob, ready for an assembler
/// to turn into an object file (spec §6.2's `-e X64` mode writes this
/// straight to the output file or pipes it to `cc`).
pub fn emit_module(module: &Module) -> Result<String, crate::Error> {
    let mut out = String::new();
    out.push_str(".intel_syntax noprefix\n");

    let globals: Vec<(&str, _)> = module.globals().collect();
    if !globals.is_empty() {
        out.push_str("\n.data\n");
        for (name, _ty) in &globals {
            let _ = writeln!(out, "\t{}:\t.quad 0", escape_asm_name(name));
        }
    }

    let strings: Vec<_> = module.strings().collect();
    if !strings.is_empty() {
        out.push_str("\n.section .rodata\n");
        for (id, content) in &strings {
            let _ = writeln!(out, "\t.L.str.{}:\t.asciz {}", id.index(), escape_string(content));
        }
    }

    for (id, ty) in module.types.iter() {
        if let TypeData::CastedStruct { vtable, .. } = ty {
            out.push_str("\n.section .rodata\n");
            let _ = writeln!(out, "{}:", escape_asm_name(&format!("vtable.{}", id.index())));
            for slot in vtable {
                let target = slot.expect("every vtable slot must be bound before emission");
                let _ = writeln!(out, "\t.quad {}", escape_asm_name(&module.func(target).name));
            }
        }
    }

    out.push_str("\n.text\n");
    for func_id in module.function_ids() {
        let func = module.func(func_id);
        let lowered = lower_function(module, func)?;
        let allocated = allocate_function(lowered);
        emit_function(&mut out, &allocated);
    }

    Ok(out)
}

fn emit_function(out: &mut String, func: &AllocatedFunction) {
    let name = escape_asm_name(&func.name);
    let _ = writeln!(out, "\t.globl {}", name);
    let _ = writeln!(out, "\t.type {}, @function", name);
    let _ = writeln!(out, "{}:", name);

    write_prologue(out, func);
    for inst in &func.instrs {
        if let Pseudo::Label(label) = inst {
            let _ = writeln!(out, "\n{}:", escape_asm_name(label));
        } else {
            let _ = writeln!(out, "\t{}", render_inst(inst));
        }
    }
    write_epilogue(out, func);

    let _ = writeln!(out, "{}.end:", name);
    let _ = writeln!(out, "\t.size {}, .-{}\n", name, name);
}

/// Push the frame pointer, spill the incoming argument registers onto the
/// stack (the original keeps arguments addressable the same way spilled
/// values are, rather than giving them a distinct home), reserve spill
/// space, then push whichever callee-saved registers this function
/// actually used.
fn write_prologue(out: &mut String, func: &AllocatedFunction) {
    out.push_str("\tpush rbp\n");
    out.push_str("\tmov rbp, rsp\n");

    if func.name != "_init_" {
        const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
        for (i, reg) in ARG_REGS.iter().enumerate() {
            if func.arg_count > i {
                let _ = writeln!(out, "\tpush {}", reg);
            }
        }
    }

    if func.stack_bytes > 0 {
        let _ = writeln!(out, "\tsub rsp, {}", func.stack_bytes);
    }

    for reg in callee_saved_order(func) {
        let _ = writeln!(out, "\tpush {}", reg);
    }
}

fn write_epilogue(out: &mut String, func: &AllocatedFunction) {
    let _ = writeln!(out, "\n{}_exit:", escape_asm_name(&func.name));

    for reg in callee_saved_order(func).into_iter().rev() {
        let _ = writeln!(out, "\tpop {}", reg);
    }

    out.push_str("\tmov rsp, rbp\n");
    out.push_str("\tpop rbp\n");
    out.push_str("\tret\n");
}

/// Callee-saved registers actually clobbered by this function, in the
/// original's fixed push order (`rbx, r12, r13, r14, r15`).
fn callee_saved_order(func: &AllocatedFunction) -> Vec<&'static str> {
    const ORDER: [(Register, &str); 5] = [
        (Register::Rbx, "rbx"),
        (Register::R12, "r12"),
        (Register::R13, "r13"),
        (Register::R14, "r14"),
        (Register::R15, "r15"),
    ];
    ORDER
        .iter()
        .filter(|(r, _)| func.callee_saved_used.contains(r))
        .map(|&(_, name)| name)
        .collect()
}

fn render_inst(inst: &Pseudo) -> String {
    match inst {
        Pseudo::Label(label) => format!("{}:", escape_asm_name(label)),
        Pseudo::Mov { dst, src } => format!("mov {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Add { dst, src } => format!("add {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Sub { dst, src } => format!("sub {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Imul { dst, src } => format!("imul {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::And { dst, src } => format!("and {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Or { dst, src } => format!("or {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Xor { dst, src } => format!("xor {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Not { dst } => format!("not {}", render_operand(dst)),
        Pseudo::Neg { dst } => format!("neg {}", render_operand(dst)),
        Pseudo::Sal { dst, src } => format!("sal {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Sar { dst, src } => format!("sar {}, {}", render_operand(dst), render_operand(src)),
        Pseudo::Cmp { left, right } => format!("cmp {}, {}", render_operand(left), render_operand(right)),
        Pseudo::SetE { dst } => format!("sete {}", render_byte_operand(dst)),
        Pseudo::SetL { dst } => format!("setl {}", render_byte_operand(dst)),
        Pseudo::SetLe { dst } => format!("setle {}", render_byte_operand(dst)),
        Pseudo::LeaOffset { dst, base, disp } => {
            let sign = if *disp >= 0 { "+" } else { "" };
            format!("lea {}, [{}{}{}]", render_operand(dst), render_operand(base), sign, disp)
        }
        Pseudo::LeaGlobal { dst, name } => format!("lea {}, {}", render_operand(dst), escape_asm_name(name)),
        Pseudo::Push(op) => format!("push {}", render_operand(op)),
        Pseudo::Pop(op) => format!("pop {}", render_operand(op)),
        Pseudo::Call(op) => format!("call {}", render_operand(op)),
        Pseudo::CallPreserve | Pseudo::CallRestore => unreachable!("resolved away by regalloc"),
        Pseudo::Jmp(label) => format!("jmp {}", escape_asm_name(label)),
        Pseudo::Je(label) => format!("je {}", escape_asm_name(label)),
        Pseudo::Jne(label) => format!("jne {}", escape_asm_name(label)),
        Pseudo::Jg(label) => format!("jg {}", escape_asm_name(label)),
        Pseudo::Jge(label) => format!("jge {}", escape_asm_name(label)),
        Pseudo::Jl(label) => format!("jl {}", escape_asm_name(label)),
        Pseudo::Jle(label) => format!("jle {}", escape_asm_name(label)),
        Pseudo::Ret => "ret".to_string(),
    }
}

fn render_operand(op: &Operand) -> String {
    match op {
        Operand::Fixed(reg) => reg.to_string(),
        Operand::Stack(offset) => render_stack(*offset),
        Operand::Global(name) => format!("QWORD PTR [{}]", escape_asm_name(name)),
        Operand::OffsetReg(reg, disp) => {
            let sign = if *disp >= 0 { "+" } else { "" };
            format!("QWORD PTR [{}{}{}]", reg, sign, disp)
        }
        Operand::Imm(v) => v.to_string(),
        Operand::Label(name) => escape_asm_name(name),
        Operand::Value(_) | Operand::Offset(..) => unreachable!("virtual operand escaped register allocation"),
    }
}

fn render_stack(offset: i32) -> String {
    let sign = if offset >= 0 { "+" } else { "" };
    format!("QWORD PTR [rbp{}{}]", sign, offset)
}

fn render_byte_operand(op: &Operand) -> String {
    match op {
        Operand::Fixed(reg) => byte_register_name(*reg).to_string(),
        other => render_operand(other),
    }
}

#[allow(dead_code)]
fn phys_loc_operand(loc: PhysLoc) -> Operand {
    match loc {
        PhysLoc::Register(r) => Operand::Fixed(AnyRegister::Gp(r)),
        PhysLoc::Stack(s) => Operand::Stack(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_dots_and_punctuation() {
        assert_eq!(escape_asm_name("Foo.bar"), "Foo_bar");
        assert_eq!(escape_asm_name("a::b"), "a$$b");
        assert_eq!(escape_asm_name("plain_name1"), "plain_name1");
    }

    #[test]
    fn string_escaping_is_c_like() {
        assert_eq!(escape_string("a\nb"), "\"a\\nb\"");
        assert_eq!(escape_string("tab\t"), "\"tab\\t\"");
    }

    /// Seed scenario 5 (spec §8): `a = b` for two word-size globals must
    /// lower to two instructions — a load into a register, then a store
    /// from that register — never a single `mov` with both operands in
    /// memory (x86-64 can't encode that).
    #[test]
    fn global_to_global_assignment_uses_two_movs() {
        use crate::ir::builder::IrBuilder;

        let mut module = Module::new();
        let i64_ty = module.types.signed(64);
        let void_ty = module.types.void();
        module.declare_global("a", i64_ty);
        module.declare_global("b", i64_ty);
        let sig = module.types.function(vec![], void_ty);
        let mut b = IrBuilder::new(&mut module);
        let f = b.declare_function("main", sig);
        let entry = b.create_block(f, "entry", 0);
        let a_addr = b.build_global(f, entry, i64_ty, "a");
        let b_addr = b.build_global(f, entry, i64_ty, "b");
        let loaded = b.build_load(f, entry, i64_ty, b_addr, Some("tmp"));
        b.build_store(f, entry, i64_ty, a_addr, loaded);
        b.build_ret(f, entry, None);

        let asm = emit_module(&module).expect("emission should succeed without division");

        let load_line = asm.lines().find(|l| l.contains("QWORD PTR [b]")).expect("a load from global `b`");
        let store_line = asm.lines().find(|l| l.contains("QWORD PTR [a]")).expect("a store to global `a`");
        assert!(load_line.trim_start().starts_with("mov "), "expected `mov reg, QWORD PTR [b]`, got: {}", load_line);
        assert!(store_line.contains("mov QWORD PTR [a],"), "expected `mov QWORD PTR [a], reg`, got: {}", store_line);

        // Same intermediate register carries the value between the two.
        let reg = load_line.trim_start().strip_prefix("mov ").unwrap().split(',').next().unwrap().trim();
        assert!(store_line.contains(reg), "load and store must use the same scratch register");
        assert_ne!(load_line, store_line);
    }
}
