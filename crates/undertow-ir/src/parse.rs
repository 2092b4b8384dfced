//! Textual IR parser.
//!
//! Reads the `.uir` assembly format produced by [`crate::print`]. Lexing is
//! done with logos; parsing is a small recursive descent over the token
//! buffer. Block labels and value references may appear before their
//! definitions (loops), so labels are pre-scanned per function and value
//! references are backpatched when the defining statement is reached.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use logos::Logos;
use thiserror::Error;

use crate::types::{
    BinaryOp, BlockId, CastOp, Constant, Declaration, Function, Instruction, Module, Predicate,
    Terminator, Type, ValueId, ValueKind,
};

/// Token of the `.uir` format.
///
/// Keywords and opcodes lex as [`Token::Ident`]; the parser matches on the
/// identifier text. Identifiers may contain dots (intrinsic names such as
/// `lso.load.i32`).
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("=")]
    Equals,
    #[token("->")]
    Arrow,
    #[token("%")]
    Percent,
    #[token("@")]
    At,
    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// Parse failure with source position.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Parse a complete module from `.uir` source.
pub fn parse_module(src: &str) -> Result<Module, ParseError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(src);
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(_) => {
                let (line, column) = line_col(src, lexer.span().start);
                return Err(ParseError {
                    message: format!("unrecognized token '{}'", lexer.slice()),
                    line,
                    column,
                });
            }
        }
    }

    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    parser.module()
}

fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in src.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn module(&mut self) -> Result<Module, ParseError> {
        let mut module = Module::new();
        while self.pos < self.tokens.len() {
            match self.peek() {
                Some(Token::Ident(kw)) if kw == "declare" => {
                    let decl = self.declaration()?;
                    module.declarations.push(decl);
                }
                Some(Token::Ident(kw)) if kw == "fn" => {
                    let func = self.function()?;
                    module.functions.push(func);
                }
                _ => return Err(self.err("expected 'fn' or 'declare'")),
            }
        }
        Ok(module)
    }

    fn declaration(&mut self) -> Result<Declaration, ParseError> {
        self.expect_keyword("declare")?;
        self.expect(Token::At)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                params.push(self.parse_type()?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        self.expect(Token::Arrow)?;
        let return_type = self.parse_type()?;
        Ok(Declaration {
            name,
            params,
            return_type,
        })
    }

    fn function(&mut self) -> Result<Function, ParseError> {
        self.expect_keyword("fn")?;
        self.expect(Token::At)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;

        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                self.expect(Token::Percent)?;
                let pname = self.value_name()?;
                self.expect(Token::Colon)?;
                let ty = self.parse_type()?;
                params.push((pname, ty));
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        self.expect(Token::Arrow)?;
        let return_type = self.parse_type()?;
        self.expect(Token::LBrace)?;

        let mut func = Function::new(name, params, return_type);
        let mut ctx = FunctionCtx::new(&func);

        // Labels may be referenced before they are defined, so collect them
        // first, in definition order (entry block first).
        for label in self.scan_labels() {
            if ctx.blocks.contains_key(&label) {
                return Err(self.err(&format!("duplicate block label '{}'", label)));
            }
            let id = func.alloc_block();
            ctx.blocks.insert(label, id);
        }

        let mut current: Option<BlockId> = None;
        loop {
            if self.eat(Token::RBrace) {
                break;
            }
            if self.at_label() {
                let label = self.expect_ident()?;
                self.expect(Token::Colon)?;
                current = Some(ctx.blocks[&label]);
                continue;
            }
            let block = match current {
                Some(b) => b,
                None => return Err(self.err("expected a block label")),
            };
            self.statement(&mut func, &mut ctx, block)?;
        }

        if let Some(name) = ctx.pending.iter().next() {
            return Err(self.err(&format!("use of undefined value '%{}'", name)));
        }
        Ok(func)
    }

    /// Scan ahead (without consuming) for `ident :` pairs up to the closing
    /// brace of the current function body.
    fn scan_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        let mut i = self.pos;
        while i < self.tokens.len() {
            match &self.tokens[i].0 {
                Token::RBrace => break,
                Token::Ident(name) => {
                    if matches!(self.tokens.get(i + 1), Some((Token::Colon, _))) {
                        labels.push(name.clone());
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        labels
    }

    fn at_label(&self) -> bool {
        matches!(self.peek(), Some(Token::Ident(_)))
            && matches!(self.tokens.get(self.pos + 1), Some((Token::Colon, _)))
    }

    fn statement(
        &mut self,
        func: &mut Function,
        ctx: &mut FunctionCtx,
        block: BlockId,
    ) -> Result<(), ParseError> {
        if self.eat(Token::Percent) {
            let name = self.value_name()?;
            self.expect(Token::Equals)?;
            let opcode = self.expect_ident()?;
            let inst = self.value_instruction(func, ctx, &name, &opcode)?;
            func.block_mut(block)
                .expect("current block exists")
                .push(inst);
            return Ok(());
        }

        let opcode = self.expect_ident()?;
        match opcode.as_str() {
            "store" => {
                let ty = self.parse_type()?;
                let value = self.operand(func, ctx, Some(&ty))?;
                self.expect(Token::Comma)?;
                let ptr = self.operand(func, ctx, Some(&Type::Ptr(Box::new(ty))))?;
                let result = func.new_inst_value(Type::Void);
                func.block_mut(block)
                    .expect("current block exists")
                    .push(Instruction::Store { result, ptr, value });
            }
            "call" => {
                let ty = self.parse_type()?;
                if !ty.is_void() {
                    return Err(self.err("call statement without a result must be void"));
                }
                let (callee, args) = self.call_tail(func, ctx)?;
                let result = func.new_inst_value(Type::Void);
                func.block_mut(block)
                    .expect("current block exists")
                    .push(Instruction::Call {
                        result,
                        callee,
                        args,
                    });
            }
            "jmp" => {
                let target = self.block_ref(ctx)?;
                let id = func.new_term_value();
                func.block_mut(block)
                    .expect("current block exists")
                    .terminate(Terminator::Jump { id, target });
            }
            "br" => {
                let cond = self.operand(func, ctx, Some(&Type::I1))?;
                self.expect(Token::Comma)?;
                let then_block = self.block_ref(ctx)?;
                self.expect(Token::Comma)?;
                let else_block = self.block_ref(ctx)?;
                let id = func.new_term_value();
                func.block_mut(block)
                    .expect("current block exists")
                    .terminate(Terminator::Branch {
                        id,
                        cond,
                        then_block,
                        else_block,
                    });
            }
            "ret" => {
                let value = if func.return_type.is_void() {
                    None
                } else {
                    let ty = func.return_type.clone();
                    Some(self.operand(func, ctx, Some(&ty))?)
                };
                let id = func.new_term_value();
                func.block_mut(block)
                    .expect("current block exists")
                    .terminate(Terminator::Return { id, value });
            }
            other => return Err(self.err(&format!("unknown statement '{}'", other))),
        }
        Ok(())
    }

    fn value_instruction(
        &mut self,
        func: &mut Function,
        ctx: &mut FunctionCtx,
        name: &str,
        opcode: &str,
    ) -> Result<Instruction, ParseError> {
        if let Some(op) = binary_op_from_name(opcode) {
            let ty = self.parse_type()?;
            let lhs = self.operand(func, ctx, Some(&ty))?;
            self.expect(Token::Comma)?;
            let rhs = self.operand(func, ctx, Some(&ty))?;
            let result = self.define(func, ctx, name, ty)?;
            return Ok(Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            });
        }

        match opcode {
            "cmp" => {
                let pred_name = self.expect_ident()?;
                let pred = predicate_from_name(&pred_name)
                    .ok_or_else(|| self.err(&format!("unknown predicate '{}'", pred_name)))?;
                let ty = self.parse_type()?;
                let lhs = self.operand(func, ctx, Some(&ty))?;
                self.expect(Token::Comma)?;
                let rhs = self.operand(func, ctx, Some(&ty))?;
                let result = self.define(func, ctx, name, Type::I1)?;
                Ok(Instruction::Cmp {
                    result,
                    pred,
                    lhs,
                    rhs,
                })
            }
            "load" => {
                let ty = self.parse_type()?;
                self.expect(Token::Comma)?;
                let ptr = self.operand(func, ctx, Some(&Type::Ptr(Box::new(ty.clone()))))?;
                let result = self.define(func, ctx, name, ty)?;
                Ok(Instruction::Load { result, ptr })
            }
            "offset" => {
                let ty = self.parse_type()?;
                if !ty.is_pointer() {
                    return Err(self.err("offset result must be a pointer type"));
                }
                self.expect(Token::Comma)?;
                let base = self.operand(func, ctx, Some(&ty))?;
                let mut indices = Vec::new();
                while self.eat(Token::Comma) {
                    indices.push(self.operand(func, ctx, Some(&Type::I64))?);
                }
                if indices.is_empty() {
                    return Err(self.err("offset requires at least one index"));
                }
                let result = self.define(func, ctx, name, ty)?;
                Ok(Instruction::Offset {
                    result,
                    base,
                    indices,
                })
            }
            "cast" => {
                let op_name = self.expect_ident()?;
                let op = CastOp::from_name(&op_name)
                    .ok_or_else(|| self.err(&format!("unknown cast '{}'", op_name)))?;
                let value = self.operand(func, ctx, None)?;
                self.expect_keyword("to")?;
                let ty = self.parse_type()?;
                let result = self.define(func, ctx, name, ty.clone())?;
                Ok(Instruction::Cast {
                    result,
                    op,
                    value,
                    ty,
                })
            }
            "phi" => {
                let ty = self.parse_type()?;
                let mut incoming = Vec::new();
                loop {
                    self.expect(Token::LBracket)?;
                    let value = self.operand(func, ctx, Some(&ty))?;
                    self.expect(Token::Comma)?;
                    let block = self.block_ref(ctx)?;
                    self.expect(Token::RBracket)?;
                    incoming.push((value, block));
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                let result = self.define(func, ctx, name, ty)?;
                Ok(Instruction::Phi { result, incoming })
            }
            "select" => {
                let cond = self.operand(func, ctx, Some(&Type::I1))?;
                self.expect(Token::Comma)?;
                let ty = self.parse_type()?;
                let on_true = self.operand(func, ctx, Some(&ty))?;
                self.expect(Token::Comma)?;
                let on_false = self.operand(func, ctx, Some(&ty))?;
                let result = self.define(func, ctx, name, ty)?;
                Ok(Instruction::Select {
                    result,
                    cond,
                    on_true,
                    on_false,
                })
            }
            "call" => {
                let ty = self.parse_type()?;
                if ty.is_void() {
                    return Err(self.err("void call cannot define a value"));
                }
                let (callee, args) = self.call_tail(func, ctx)?;
                let result = self.define(func, ctx, name, ty)?;
                Ok(Instruction::Call {
                    result,
                    callee,
                    args,
                })
            }
            other => Err(self.err(&format!("unknown opcode '{}'", other))),
        }
    }

    fn call_tail(
        &mut self,
        func: &mut Function,
        ctx: &mut FunctionCtx,
    ) -> Result<(String, Vec<ValueId>), ParseError> {
        self.expect(Token::At)?;
        let callee = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.operand(func, ctx, None)?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        Ok((callee, args))
    }

    /// Define `%name` with the given type, resolving any forward references.
    fn define(
        &mut self,
        func: &mut Function,
        ctx: &mut FunctionCtx,
        name: &str,
        ty: Type,
    ) -> Result<ValueId, ParseError> {
        if let Some(existing) = ctx.values.get(name) {
            if !ctx.pending.remove(name) {
                return Err(self.err(&format!("value '%{}' defined twice", name)));
            }
            let id = *existing;
            let info = func.value_mut(id);
            info.ty = ty;
            info.kind = ValueKind::Inst;
            return Ok(id);
        }
        let id = func.new_value(ValueKind::Inst, ty, Some(name.to_string()));
        ctx.values.insert(name.to_string(), id);
        Ok(id)
    }

    /// Parse an operand: a `%`-reference or a literal constant. Literals are
    /// interned with the expected type when one is known.
    fn operand(
        &mut self,
        func: &mut Function,
        ctx: &mut FunctionCtx,
        expected: Option<&Type>,
    ) -> Result<ValueId, ParseError> {
        if self.eat(Token::Percent) {
            let name = self.value_name()?;
            if let Some(id) = ctx.values.get(&name) {
                return Ok(*id);
            }
            // Forward reference: allocate a placeholder, fixed up by define.
            let id = func.new_value(ValueKind::Inst, Type::Void, Some(name.clone()));
            ctx.values.insert(name.clone(), id);
            ctx.pending.insert(name);
            return Ok(id);
        }

        match self.next_cloned() {
            Some(Token::Int(v)) => {
                let ty = expected.cloned().unwrap_or(Type::I64);
                let constant = if ty.is_float() {
                    Constant::float(v as f64)
                } else if ty == Type::I1 {
                    Constant::Bool(v != 0)
                } else {
                    Constant::Int(v)
                };
                Ok(func.intern_const(constant, ty))
            }
            Some(Token::Float(v)) => {
                let ty = expected.cloned().unwrap_or(Type::F64);
                Ok(func.intern_const(Constant::float(v), ty))
            }
            Some(Token::Ident(word)) if word == "true" => {
                Ok(func.intern_const(Constant::Bool(true), Type::I1))
            }
            Some(Token::Ident(word)) if word == "false" => {
                Ok(func.intern_const(Constant::Bool(false), Type::I1))
            }
            _ => Err(self.err("expected an operand")),
        }
    }

    fn block_ref(&mut self, ctx: &FunctionCtx) -> Result<BlockId, ParseError> {
        let label = self.expect_ident()?;
        ctx.blocks
            .get(&label)
            .copied()
            .ok_or_else(|| self.err(&format!("unknown block label '{}'", label)))
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let name = self.expect_ident()?;
        match name.as_str() {
            "i1" => Ok(Type::I1),
            "i8" => Ok(Type::I8),
            "i16" => Ok(Type::I16),
            "i32" => Ok(Type::I32),
            "i64" => Ok(Type::I64),
            "f32" => Ok(Type::F32),
            "f64" => Ok(Type::F64),
            "void" => Ok(Type::Void),
            "ptr" => Ok(Type::Ptr(Box::new(self.parse_type()?))),
            other => Err(self.err(&format!("unknown type '{}'", other))),
        }
    }

    /// Value names may be identifiers or bare numbers (`%a`, `%7`).
    fn value_name(&mut self) -> Result<String, ParseError> {
        match self.next_cloned() {
            Some(Token::Ident(name)) => Ok(name),
            Some(Token::Int(n)) if n >= 0 => Ok(n.to_string()),
            _ => Err(self.err("expected a value name")),
        }
    }

    // --- token plumbing ---

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next_cloned(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(&token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        if self.eat(token.clone()) {
            Ok(())
        } else {
            Err(self.err(&format!("expected {:?}", token)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.next_cloned() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(self.err("expected an identifier")),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ParseError> {
        match self.next_cloned() {
            Some(Token::Ident(name)) if name == word => Ok(()),
            _ => Err(self.err(&format!("expected '{}'", word))),
        }
    }

    fn err(&self, message: &str) -> ParseError {
        let offset = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, span)| span.start)
            .unwrap_or(self.src.len());
        let (line, column) = line_col(self.src, offset);
        ParseError {
            message: message.to_string(),
            line,
            column,
        }
    }
}

struct FunctionCtx {
    values: HashMap<String, ValueId>,
    pending: HashSet<String>,
    blocks: HashMap<String, BlockId>,
}

impl FunctionCtx {
    fn new(func: &Function) -> Self {
        let mut values = HashMap::new();
        for param in &func.params {
            values.insert(param.name.clone(), param.value);
        }
        Self {
            values,
            pending: HashSet::new(),
            blocks: HashMap::new(),
        }
    }
}

fn binary_op_from_name(name: &str) -> Option<BinaryOp> {
    match name {
        "add" => Some(BinaryOp::Add),
        "sub" => Some(BinaryOp::Sub),
        "mul" => Some(BinaryOp::Mul),
        "div" => Some(BinaryOp::Div),
        "rem" => Some(BinaryOp::Rem),
        "and" => Some(BinaryOp::And),
        "or" => Some(BinaryOp::Or),
        "xor" => Some(BinaryOp::Xor),
        "shl" => Some(BinaryOp::Shl),
        "shr" => Some(BinaryOp::Shr),
        _ => None,
    }
}

fn predicate_from_name(name: &str) -> Option<Predicate> {
    match name {
        "eq" => Some(Predicate::Eq),
        "ne" => Some(Predicate::Ne),
        "lt" => Some(Predicate::Lt),
        "le" => Some(Predicate::Le),
        "gt" => Some(Predicate::Gt),
        "ge" => Some(Predicate::Ge),
        _ => None,
    }
}
