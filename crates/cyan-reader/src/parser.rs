//! Recursive-descent parser driving `cyan_codegen::ir::IrBuilder` from the
//! textual format `cyan_codegen::ir::dump` prints (spec §0/§6.1).
//!
//! Scope matches spec's Non-goals: struct/concept/vtable type syntax isn't
//! accepted here, the same way `codegen_x64.cpp`'s struct/concept layout
//! (front-end-dependent) stays out of `cyan-codegen` itself — only the
//! scalar/pointer/array/function types spec §3 defines independent of a
//! front end round-trip through this format.

use std::collections::HashMap;

use cyan_codegen::ir::builder::IrBuilder;
use cyan_codegen::ir::entities::{Block, Inst, TypeId};
use cyan_codegen::ir::instruction::BinOp;
use cyan_codegen::ir::module::Module;
use cyan_codegen::diagnostics::Diagnostics;

use crate::lexer::{Lexer, Tok, Token};
use crate::ParseError;

pub fn parse_module(input: &str) -> Result<Module, ParseError> {
    let tokens = Lexer::new(input)
        .tokenize()
        .map_err(|(message, line, column)| ParseError::Lex { message, line, column })?;

    let mut module = Module::new();
    let mut diagnostics = Diagnostics::default();
    {
        let mut p = Parser {
            toks: tokens,
            pos: 0,
            module: &mut module,
            diagnostics: &mut diagnostics,
        };
        p.parse_module_body();
    }

    if diagnostics.error_count() > 0 {
        return Err(ParseError::Malformed(diagnostics));
    }
    Ok(module)
}

struct Parser<'m> {
    toks: Vec<Token>,
    pos: usize,
    module: &'m mut Module,
    diagnostics: &'m mut Diagnostics,
}

impl<'m> Parser<'m> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn loc(&self) -> (u32, u32) {
        (self.toks[self.pos].line, self.toks[self.pos].column)
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn error(&mut self, message: impl Into<String>) {
        let (line, column) = self.loc();
        self.diagnostics.error_at(message, "<ir>", line, column);
    }

    /// Skip tokens up to and including the next occurrence of `stop`, or to
    /// EOF — best-effort recovery so one malformed line doesn't abort the
    /// whole parse (spec §7's "collected, counted" diagnostic policy).
    fn recover_past(&mut self, stop: &Tok) {
        loop {
            match self.peek() {
                Tok::Eof => return,
                t if t == stop => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn expect_ident(&mut self) -> Option<String> {
        match self.peek().clone() {
            Tok::Ident(s) => {
                self.bump();
                Some(s)
            }
            other => {
                self.error(format!("expected an identifier, found {}", other));
                None
            }
        }
    }

    fn expect_num(&mut self) -> Option<i64> {
        match self.peek().clone() {
            Tok::Num(n) => {
                self.bump();
                Some(n)
            }
            other => {
                self.error(format!("expected an integer, found {}", other));
                None
            }
        }
    }

    fn expect(&mut self, tok: Tok) -> bool {
        if *self.peek() == tok {
            self.bump();
            true
        } else {
            self.error(format!("expected {}, found {}", tok, self.peek()));
            false
        }
    }

    fn parse_module_body(&mut self) {
        loop {
            match self.peek().clone() {
                Tok::Eof => break,
                Tok::Ident(kw) if kw == "global" => self.parse_global(),
                Tok::Ident(kw) if kw == "string" => self.parse_string(),
                Tok::Ident(kw) if kw == "func" => self.parse_function(),
                _ => {
                    self.error(format!("expected `global`, `string`, or `func`, found {}", self.peek()));
                    self.recover_past(&Tok::RBrace.clone());
                }
            }
        }
    }

    fn parse_global(&mut self) {
        self.bump(); // "global"
        let Some(name) = self.expect_ident() else { return self.recover_line() };
        if !self.expect(Tok::Colon) {
            return self.recover_line();
        }
        let Some(ty) = self.parse_type() else { return self.recover_line() };
        self.module.declare_global(name, ty);
    }

    fn parse_string(&mut self) {
        self.bump(); // "string"
        // The dumper prints `string str0 = "content"`; the label itself is
        // positional (strings are re-interned in file order), so it's
        // consumed and discarded rather than checked against a counter.
        let _ = self.expect_ident();
        if !self.expect(Tok::Equals) {
            return self.recover_line();
        }
        match self.peek().clone() {
            Tok::Str(s) => {
                self.bump();
                self.module.intern_string(s);
            }
            other => self.error(format!("expected a string literal, found {}", other)),
        }
    }

    /// Skip to the next line-ish boundary on error: anything until the next
    /// token that looks like the start of a new top-level or block-level
    /// construct is too fragile to detect generically, so recovery here
    /// just discards one token at a time until something parseable.
    fn recover_line(&mut self) {
        self.bump();
    }

    fn parse_type(&mut self) -> Option<TypeId> {
        match self.peek().clone() {
            Tok::Ident(s) if s == "void" => {
                self.bump();
                Some(self.module.types.void())
            }
            Tok::Ident(s) if s.starts_with('i') && s[1..].chars().all(|c| c.is_ascii_digit()) && s.len() > 1 => {
                self.bump();
                let bits: u32 = s[1..].parse().ok()?;
                Some(self.module.types.signed(bits))
            }
            Tok::Ident(s) if s.starts_with('u') && s[1..].chars().all(|c| c.is_ascii_digit()) && s.len() > 1 => {
                self.bump();
                let bits: u32 = s[1..].parse().ok()?;
                Some(self.module.types.unsigned(bits))
            }
            Tok::Ident(s) if s == "ptr" => {
                self.bump();
                self.expect(Tok::LAngle);
                let base = self.parse_type()?;
                self.expect(Tok::RAngle);
                Some(self.module.types.pointer(base))
            }
            Tok::Ident(s) if s == "arr" => {
                self.bump();
                self.expect(Tok::LAngle);
                let base = self.parse_type()?;
                self.expect(Tok::RAngle);
                Some(self.module.types.array(base))
            }
            Tok::Ident(s) if s == "func" => {
                self.bump();
                self.expect(Tok::LParen);
                let mut args = Vec::new();
                if *self.peek() != Tok::RParen {
                    loop {
                        args.push(self.parse_type()?);
                        if *self.peek() == Tok::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Tok::RParen);
                self.expect(Tok::Arrow);
                let ret = self.parse_type()?;
                Some(self.module.types.function(args, ret))
            }
            Tok::Ident(s) if s == "forward" => {
                self.bump();
                let name = self.expect_ident()?;
                Some(self.module.types.forward(name))
            }
            other => {
                self.error(format!(
                    "expected a type (struct/concept/vtable types aren't accepted by this reader), found {}",
                    other
                ));
                None
            }
        }
    }

    fn parse_function(&mut self) {
        self.bump(); // "func"
        let Some(name) = self.expect_ident() else { return self.recover_past(&Tok::RBrace) };
        if !self.expect(Tok::Colon) {
            return self.recover_past(&Tok::RBrace);
        }
        let Some(sig) = self.parse_type() else { return self.recover_past(&Tok::RBrace) };
        let fid = self.module.declare_function(name, sig);
        if !self.expect(Tok::LBrace) {
            return self.recover_past(&Tok::RBrace);
        }

        // Every block is created up front so a `jump`/`br`/phi branch can
        // name a block that appears later in the text (forward edges are
        // the common case: `entry` always precedes the blocks it jumps to).
        let mut blocks = HashMap::new();
        for (name, depth) in self.prescan_block_headers() {
            let block = self.module.func_mut(fid).create_block(&name, depth);
            blocks.insert(name, block);
        }

        let mut fb = FuncBody {
            builder: IrBuilder::new(self.module),
            fid,
            blocks,
            values: HashMap::new(),
            pending_phis: Vec::new(),
        };

        loop {
            match self.peek().clone() {
                Tok::RBrace => {
                    self.bump();
                    break;
                }
                Tok::Ident(kw) if kw == "block" => self.parse_block(&mut fb),
                Tok::Eof => {
                    self.error("unexpected end of input inside function body");
                    break;
                }
                other => {
                    self.error(format!("expected `block` or `}}`, found {}", other));
                    self.recover_line();
                }
            }
        }

        for (phi, value_name, from_name) in fb.pending_phis {
            let (Some(&value), Some(&from)) = (fb.values.get(&value_name), fb.blocks.get(&from_name)) else {
                self.error(format!("phi branch references unknown value `{}` or block `{}`", value_name, from_name));
                continue;
            };
            fb.builder.add_phi_branch(fid, phi, value, from);
        }

        self.module.func_mut(fid).rebuild_predecessors();
    }

    /// Scan forward from the current position (without consuming tokens)
    /// to the function body's closing `}`, collecting every `block NAME
    /// [depth=N]:` header in order. Blocks never nest and this grammar's
    /// only other use of braces is the function wrapper itself, so the
    /// first unmatched `}` reached here is exactly the function's end.
    fn prescan_block_headers(&self) -> Vec<(String, u32)> {
        let mut out = Vec::new();
        let mut i = self.pos;
        while i < self.toks.len() {
            match &self.toks[i].tok {
                Tok::RBrace | Tok::Eof => break,
                Tok::Ident(kw) if kw == "block" => {
                    if let Tok::Ident(name) = &self.toks[i + 1].tok {
                        let mut depth = 0u32;
                        if let Some(Token { tok: Tok::Num(n), .. }) =
                            self.toks.get(i + 5).filter(|_| self.toks[i + 2].tok == Tok::LBracket)
                        {
                            depth = *n as u32;
                        }
                        out.push((name.clone(), depth));
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        out
    }

    fn parse_block(&mut self, fb: &mut FuncBody) {
        self.bump(); // "block"
        let Some(name) = self.expect_ident() else { return self.recover_line() };
        self.expect(Tok::LBracket);
        let _ = self.expect_ident(); // "depth"
        self.expect(Tok::Equals);
        let _depth = self.expect_num().unwrap_or(0) as u32;
        self.expect(Tok::RBracket);
        self.expect(Tok::Colon);

        let Some(&block) = fb.blocks.get(&name) else {
            self.error(format!("internal error: block `{}` was not pre-registered", name));
            return;
        };

        loop {
            match self.peek().clone() {
                Tok::Ident(kw) if kw == "block" || kw == "func" => break,
                Tok::RBrace | Tok::Eof => break,
                Tok::Ident(kw) if kw == "br" => {
                    self.parse_branch(fb, block);
                    break;
                }
                Tok::Ident(kw) if kw == "jump" => {
                    self.parse_jump(fb, block);
                    break;
                }
                _ => self.parse_instruction(fb, block),
            }
        }
    }

    fn parse_branch(&mut self, fb: &mut FuncBody, block: Block) {
        self.bump(); // "br"
        let Some(cond_name) = self.expect_ident() else { return self.recover_line() };
        self.expect(Tok::Arrow);
        let Some(then_name) = self.expect_ident() else { return self.recover_line() };
        self.expect(Tok::Comma);
        let Some(else_name) = self.expect_ident() else { return self.recover_line() };

        let (Some(&cond), Some(&then_b), Some(&else_b)) =
            (fb.values.get(&cond_name), fb.blocks.get(&then_name), fb.blocks.get(&else_name))
        else {
            self.error("`br` references an unknown value or block");
            return;
        };
        fb.builder.finish_branch(fb.fid, block, cond, then_b, else_b);
    }

    fn parse_jump(&mut self, fb: &mut FuncBody, block: Block) {
        self.bump(); // "jump"
        let Some(target_name) = self.expect_ident() else { return self.recover_line() };
        let Some(&target) = fb.blocks.get(&target_name) else {
            self.error(format!("`jump` references unknown block `{}`", target_name));
            return;
        };
        fb.builder.finish_jump(fb.fid, block, target);
    }

    /// Resolve an already-defined value name to its `Inst`, reporting and
    /// returning `None` on an unknown reference.
    fn value(&mut self, fb: &FuncBody, name: &str) -> Option<Inst> {
        match fb.values.get(name) {
            Some(&i) => Some(i),
            None => {
                self.error(format!("reference to unknown value `{}`", name));
                None
            }
        }
    }

    fn parse_instruction(&mut self, fb: &mut FuncBody, block: Block) {
        // Every instruction line is either `name = rhs` or a bare
        // side-effecting op (`store`, `ret`, `delete`) with no binding.
        let start = self.pos;
        let bound_name = if let Tok::Ident(n) = self.peek().clone() {
            let save = self.pos;
            self.bump();
            if *self.peek() == Tok::Equals {
                self.bump();
                Some(n)
            } else {
                self.pos = save;
                None
            }
        } else {
            None
        };

        let Some(Tok::Ident(mnemonic)) = Some(self.peek().clone()) else {
            self.error(format!("expected an instruction, found {}", self.peek()));
            self.recover_line();
            return;
        };

        match mnemonic.as_str() {
            "imm" => self.parse_imm(fb, block, bound_name),
            "load" => self.parse_load(fb, block, bound_name),
            "store" => self.parse_store(fb, block),
            "alloca" => self.parse_alloca(fb, block, bound_name),
            "new" => self.parse_new(fb, block, bound_name),
            "delete" => self.parse_delete(fb, block),
            "call" => self.parse_call(fb, block, bound_name),
            "ret" => self.parse_ret(fb, block),
            "phi" => self.parse_phi(fb, block, bound_name),
            "arg" => self.parse_arg(fb, block, bound_name),
            "global" => self.parse_global_ref(fb, block, bound_name),
            _ if binop_for(&mnemonic).is_some() => self.parse_binop(fb, block, bound_name, &mnemonic),
            _ => {
                self.error(format!("unknown instruction mnemonic `{}`", mnemonic));
                self.pos = start;
                self.recover_line();
            }
        }
    }

    fn parse_dotted_type(&mut self) -> Option<TypeId> {
        self.bump(); // the mnemonic identifier itself was peeked by the caller, consumed here
        self.expect(Tok::Dot);
        self.parse_type()
    }

    fn parse_imm(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(value) = self.expect_num() else { return self.recover_line() };
        let is_signed = matches!(self.module.types.get(ty), cyan_codegen::ir::types::TypeData::SignedInt { .. });
        let inst = if is_signed {
            fb.builder.build_imm_signed(fb.fid, block, ty, value)
        } else {
            fb.builder.build_imm_unsigned(fb.fid, block, ty, value as u64)
        };
        fb.bind(bound_name, inst);
    }

    fn parse_load(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(addr_name) = self.expect_ident() else { return self.recover_line() };
        let Some(addr) = self.value(fb, &addr_name) else { return };
        let inst = fb.builder.build_load(fb.fid, block, ty, addr, None);
        fb.bind(bound_name, inst);
    }

    fn parse_store(&mut self, fb: &mut FuncBody, block: Block) {
        self.bump(); // "store"
        let Some(addr_name) = self.expect_ident() else { return self.recover_line() };
        if !self.expect(Tok::Comma) {
            return self.recover_line();
        }
        let Some(value_name) = self.expect_ident() else { return self.recover_line() };
        let (Some(addr), Some(value)) = (self.value(fb, &addr_name), self.value(fb, &value_name)) else { return };
        let ty = self.module.func(fb.fid).insts[value].ty;
        fb.builder.build_store(fb.fid, block, ty, addr, value);
    }

    fn parse_alloca(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(count) = self.parse_count_operand(fb, ty) else { return self.recover_line() };
        let inst = fb.builder.build_alloca(fb.fid, block, ty, count, None);
        fb.bind(bound_name, inst);
    }

    fn parse_new(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(count) = self.parse_count_operand(fb, ty) else { return self.recover_line() };
        let inst = fb.builder.build_new(fb.fid, block, ty, count, None);
        fb.bind(bound_name, inst);
    }

    /// `count=<value>`, where `<value>` is itself a value reference
    /// (`alloca`/`new` always reference an already-materialized count,
    /// mirroring `ir::dump`'s `count={}` rendering of the count `Inst`).
    fn parse_count_operand(&mut self, fb: &mut FuncBody, _ty: TypeId) -> Option<Inst> {
        let kw = self.expect_ident()?;
        if kw != "count" {
            self.error(format!("expected `count=`, found `{}`", kw));
            return None;
        }
        self.expect(Tok::Equals);
        let name = self.expect_ident()?;
        self.value(fb, &name)
    }

    fn parse_delete(&mut self, fb: &mut FuncBody, block: Block) {
        self.bump(); // "delete"
        let Some(name) = self.expect_ident() else { return self.recover_line() };
        let Some(addr) = self.value(fb, &name) else { return };
        let ty = self.module.func(fb.fid).insts[addr].ty;
        fb.builder.build_delete(fb.fid, block, ty, addr);
    }

    fn parse_call(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(callee_name) = self.expect_ident() else { return self.recover_line() };
        let Some(callee) = self.value(fb, &callee_name) else { return };
        if !self.expect(Tok::LParen) {
            return self.recover_line();
        }
        let mut args = Vec::new();
        if *self.peek() != Tok::RParen {
            loop {
                let Some(name) = self.expect_ident() else { break };
                if let Some(v) = self.value(fb, &name) {
                    args.push(v);
                }
                if *self.peek() == Tok::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen);
        let inst = fb.builder.build_call(fb.fid, block, ty, callee, args, None);
        fb.bind(bound_name, inst);
    }

    fn parse_ret(&mut self, fb: &mut FuncBody, block: Block) {
        self.bump(); // "ret"
        let value = match self.peek().clone() {
            Tok::Ident(name) => {
                self.bump();
                self.value(fb, &name)
            }
            _ => None,
        };
        fb.builder.build_ret(fb.fid, block, value);
    }

    fn parse_phi(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let phi = fb.builder.build_phi(fb.fid, block, ty, None);
        fb.bind(bound_name, phi);
        loop {
            if !self.expect(Tok::LBracket) {
                break;
            }
            let Some(value_name) = self.expect_ident() else { break };
            self.expect(Tok::Colon);
            let Some(from_name) = self.expect_ident() else { break };
            self.expect(Tok::RBracket);
            fb.pending_phis.push((phi, value_name, from_name));
            if *self.peek() == Tok::Comma {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn parse_arg(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(index) = self.expect_num() else { return self.recover_line() };
        let inst = fb.builder.build_arg(fb.fid, block, ty, index as u32, None);
        fb.bind(bound_name, inst);
    }

    fn parse_global_ref(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>) {
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(name) = self.expect_ident() else { return self.recover_line() };
        let inst = fb.builder.build_global(fb.fid, block, ty, &name);
        fb.bind(bound_name, inst);
    }

    fn parse_binop(&mut self, fb: &mut FuncBody, block: Block, bound_name: Option<String>, mnemonic: &str) {
        let op = binop_for(mnemonic).expect("checked by caller");
        let Some(ty) = self.parse_dotted_type() else { return self.recover_line() };
        let Some(lhs_name) = self.expect_ident() else { return self.recover_line() };
        if !self.expect(Tok::Comma) {
            return self.recover_line();
        }
        let Some(rhs_name) = self.expect_ident() else { return self.recover_line() };
        let (Some(lhs), Some(rhs)) = (self.value(fb, &lhs_name), self.value(fb, &rhs_name)) else { return };
        let inst = fb.builder.build_binary(fb.fid, block, op, ty, lhs, rhs, None);
        fb.bind(bound_name, inst);
    }
}

fn binop_for(mnemonic: &str) -> Option<BinOp> {
    Some(match mnemonic {
        "add" => BinOp::Add,
        "sub" => BinOp::Sub,
        "mul" => BinOp::Mul,
        "div" => BinOp::Div,
        "mod" => BinOp::Mod,
        "and" => BinOp::And,
        "or" => BinOp::Or,
        "xor" => BinOp::Xor,
        "nor" => BinOp::Nor,
        "shl" => BinOp::Shl,
        "shr" => BinOp::Shr,
        "seq" => BinOp::Seq,
        "sne" => BinOp::Sne,
        "slt" => BinOp::Slt,
        "sle" => BinOp::Sle,
        "sgt" => BinOp::Sgt,
        "sge" => BinOp::Sge,
        _ => return None,
    })
}

struct FuncBody<'a> {
    builder: IrBuilder<'a>,
    fid: cyan_codegen::ir::entities::FuncId,
    blocks: HashMap<String, Block>,
    values: HashMap<String, Inst>,
    /// `(phi, value_name, from_block_name)` — resolved once the whole
    /// function's blocks and values are known, since a phi can name a
    /// predecessor block that's parsed later in the same pass only in the
    /// sense that its *value* always precedes it textually, but block names
    /// are already known by the time any block header is parsed.
    pending_phis: Vec<(Inst, String, String)>,
}

impl<'a> FuncBody<'a> {
    /// `ir::dump` prints every *use* of a value by its raw entity index
    /// (`v7`), even when the defining line shows a custom name — so both
    /// the raw index and, when one was given, the custom name resolve to
    /// the same instruction. This also lets hand-written fixtures reference
    /// values by their readable name instead of the mechanical index.
    fn bind(&mut self, name: Option<String>, inst: Inst) {
        self.values.insert(inst.to_string(), inst);
        if let Some(name) = name {
            self.values.insert(name, inst);
        }
    }
}
