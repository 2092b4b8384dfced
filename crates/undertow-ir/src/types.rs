//! SSA IR type definitions.
//!
//! The IR is organized into a [`Module`] of [`Function`]s, each a list of
//! basic blocks in SSA form. Every value (function parameter, interned
//! constant, instruction result, terminator) lives in one per-function
//! value table and is addressed by a [`ValueId`]. Terminators and stores own
//! a `Void`-typed value so that side-effecting operations still have an
//! identity that downstream consumers can key on.

use std::fmt;

use indexmap::IndexMap;

/// Identifier for an SSA value.
///
/// Values are assigned exactly once and can be used any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// IR value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr(Box<Type>),
    Void,
}

impl Type {
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    /// Pointee type, if this is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Canonical printed name, also used to key typed intrinsic families.
    pub fn canonical_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr(inner) => write!(f, "ptr {}", inner),
            Type::Void => write!(f, "void"),
        }
    }
}

/// A literal constant.
///
/// Floats are stored by bit pattern so constants are `Eq + Hash` and can be
/// interned (uniqued per function, like every other value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Float(u64),
    Bool(bool),
}

impl Constant {
    pub fn float(value: f64) -> Self {
        Constant::Float(value.to_bits())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Float(bits) => {
                let v = f64::from_bits(*bits);
                if v == v.trunc() && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Constant::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// What a value is.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// Function parameter (by position).
    Param { index: usize },
    /// Interned constant.
    Const(Constant),
    /// Result (or identity) of an instruction.
    Inst,
    /// Identity of a terminator.
    Term,
}

/// Per-value metadata held in the function's value table.
#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub kind: ValueKind,
    pub ty: Type,
    /// Source-level name, when one exists (parameters, parsed text).
    pub name: Option<String>,
}

/// Binary arithmetic / bitwise operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// Opcode name as it appears in the textual format.
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
        }
    }

    /// Short operator symbol, when one is conventional.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("+"),
            BinaryOp::Sub => Some("-"),
            BinaryOp::Mul => Some("*"),
            BinaryOp::Div => Some("/"),
            BinaryOp::Rem => Some("%"),
            BinaryOp::And => Some("&"),
            BinaryOp::Or => Some("|"),
            BinaryOp::Xor => Some("^"),
            BinaryOp::Shl => Some("<<"),
            BinaryOp::Shr => Some(">>"),
        }
    }
}

/// Comparison predicate. Applies to both integer and float comparisons; the
/// operand types distinguish the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Predicate {
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Lt => "lt",
            Predicate::Le => "le",
            Predicate::Gt => "gt",
            Predicate::Ge => "ge",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Predicate::Eq => "==",
            Predicate::Ne => "!=",
            Predicate::Lt => "<",
            Predicate::Le => "<=",
            Predicate::Gt => ">",
            Predicate::Ge => ">=",
        }
    }
}

/// Cast operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    Zext,
    Sext,
    Fptrunc,
    Fpext,
    Sitofp,
    Fptosi,
    Bitcast,
}

impl CastOp {
    pub fn name(&self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::Fptrunc => "fptrunc",
            CastOp::Fpext => "fpext",
            CastOp::Sitofp => "sitofp",
            CastOp::Fptosi => "fptosi",
            CastOp::Bitcast => "bitcast",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "trunc" => Some(CastOp::Trunc),
            "zext" => Some(CastOp::Zext),
            "sext" => Some(CastOp::Sext),
            "fptrunc" => Some(CastOp::Fptrunc),
            "fpext" => Some(CastOp::Fpext),
            "sitofp" => Some(CastOp::Sitofp),
            "fptosi" => Some(CastOp::Fptosi),
            "bitcast" => Some(CastOp::Bitcast),
            _ => None,
        }
    }
}

/// An SSA instruction.
///
/// Every variant carries the `result` value it defines; side-effecting
/// instructions (`Store`) define a `Void` value that exists only as an
/// identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binary {
        result: ValueId,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        result: ValueId,
        pred: Predicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    Load {
        result: ValueId,
        ptr: ValueId,
    },
    Store {
        result: ValueId,
        ptr: ValueId,
        value: ValueId,
    },
    /// Address arithmetic: `base` advanced by `indices`. Pure plumbing that
    /// the dataflow builder never materializes.
    Offset {
        result: ValueId,
        base: ValueId,
        indices: Vec<ValueId>,
    },
    Cast {
        result: ValueId,
        op: CastOp,
        value: ValueId,
        ty: Type,
    },
    Phi {
        result: ValueId,
        incoming: Vec<(ValueId, BlockId)>,
    },
    Select {
        result: ValueId,
        cond: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },
    Call {
        result: ValueId,
        callee: String,
        args: Vec<ValueId>,
    },
}

impl Instruction {
    /// The value this instruction defines (its identity).
    pub fn result(&self) -> ValueId {
        match self {
            Instruction::Binary { result, .. }
            | Instruction::Cmp { result, .. }
            | Instruction::Load { result, .. }
            | Instruction::Store { result, .. }
            | Instruction::Offset { result, .. }
            | Instruction::Cast { result, .. }
            | Instruction::Phi { result, .. }
            | Instruction::Select { result, .. }
            | Instruction::Call { result, .. } => *result,
        }
    }

    /// All value operands, in order. Phi operands are its incoming values.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instruction::Load { ptr, .. } => vec![*ptr],
            Instruction::Store { ptr, value, .. } => vec![*ptr, *value],
            Instruction::Offset { base, indices, .. } => {
                let mut ops = vec![*base];
                ops.extend(indices.iter().copied());
                ops
            }
            Instruction::Cast { value, .. } => vec![*value],
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(v, _)| *v).collect(),
            Instruction::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![*cond, *on_true, *on_false],
            Instruction::Call { args, .. } => args.clone(),
        }
    }

    /// Mutable references to all value operands.
    pub fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { ptr, value, .. } => vec![ptr, value],
            Instruction::Offset { base, indices, .. } => {
                let mut ops = vec![base];
                ops.extend(indices.iter_mut());
                ops
            }
            Instruction::Cast { value, .. } => vec![value],
            Instruction::Phi { incoming, .. } => incoming.iter_mut().map(|(v, _)| v).collect(),
            Instruction::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            Instruction::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    /// Address arithmetic and casts are transparent plumbing for the
    /// dataflow builder.
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Instruction::Offset { .. } | Instruction::Cast { .. })
    }
}

/// Block terminator. Carries its own identity value like instructions do.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump {
        id: ValueId,
        target: BlockId,
    },
    Branch {
        id: ValueId,
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return {
        id: ValueId,
        value: Option<ValueId>,
    },
}

impl Terminator {
    pub fn id(&self) -> ValueId {
        match self {
            Terminator::Jump { id, .. }
            | Terminator::Branch { id, .. }
            | Terminator::Return { id, .. } => *id,
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::Jump { .. } => vec![],
            Terminator::Branch { cond, .. } => vec![*cond],
            Terminator::Return { value, .. } => value.iter().copied().collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Terminator::Jump { .. } => vec![],
            Terminator::Branch { cond, .. } => vec![cond],
            Terminator::Return { value, .. } => value.iter_mut().collect(),
        }
    }

    /// Successor blocks, in branch order.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { target, .. } => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return { .. } => vec![],
        }
    }
}

/// A basic block: φ-nodes and instructions followed by one terminator.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn terminate(&mut self, term: Terminator) {
        self.terminator = Some(term);
    }
}

/// Function parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub value: ValueId,
}

/// A function: blocks plus the value table for everything defined inside.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub blocks: Vec<Block>,
    /// Declarations have no body and are skipped by every transform.
    pub is_declaration: bool,
    values: Vec<ValueInfo>,
    constants: IndexMap<(Constant, Type), ValueId>,
    next_block: u32,
}

impl Function {
    /// Create a function definition. Parameters receive the first value ids.
    pub fn new(name: impl Into<String>, params: Vec<(String, Type)>, return_type: Type) -> Self {
        let mut func = Self {
            name: name.into(),
            params: Vec::new(),
            return_type,
            blocks: Vec::new(),
            is_declaration: false,
            values: Vec::new(),
            constants: IndexMap::new(),
            next_block: 0,
        };
        for (index, (name, ty)) in params.into_iter().enumerate() {
            let value = func.new_value(ValueKind::Param { index }, ty.clone(), Some(name.clone()));
            func.params.push(Param { name, ty, value });
        }
        func
    }

    /// Allocate a new basic block and return its id.
    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.push(Block::new(id));
        id
    }

    /// The entry block. Functions with bodies always have at least one block.
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Allocate a fresh value of the given kind.
    pub fn new_value(&mut self, kind: ValueKind, ty: Type, name: Option<String>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo { kind, ty, name });
        id
    }

    /// Allocate the result value for an instruction.
    pub fn new_inst_value(&mut self, ty: Type) -> ValueId {
        self.new_value(ValueKind::Inst, ty, None)
    }

    /// Allocate the identity value for a terminator.
    pub fn new_term_value(&mut self) -> ValueId {
        self.new_value(ValueKind::Term, Type::Void, None)
    }

    /// Intern a constant, returning its unique value id.
    pub fn intern_const(&mut self, constant: Constant, ty: Type) -> ValueId {
        if let Some(id) = self.constants.get(&(constant, ty.clone())) {
            return *id;
        }
        let id = self.new_value(ValueKind::Const(constant), ty.clone(), None);
        self.constants.insert((constant, ty), id);
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueInfo {
        &mut self.values[id.0 as usize]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn type_of(&self, id: ValueId) -> &Type {
        &self.value(id).ty
    }

    /// The constant a value denotes, if it is one.
    pub fn as_const(&self, id: ValueId) -> Option<Constant> {
        match self.value(id).kind {
            ValueKind::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_param(&self, id: ValueId) -> bool {
        matches!(self.value(id).kind, ValueKind::Param { .. })
    }

    /// The instruction defining `id`, if any.
    pub fn def(&self, id: ValueId) -> Option<&Instruction> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|inst| inst.result() == id)
    }

    /// The terminator whose identity is `id`, if any.
    pub fn def_terminator(&self, id: ValueId) -> Option<&Terminator> {
        self.blocks
            .iter()
            .filter_map(|b| b.terminator.as_ref())
            .find(|term| term.id() == id)
    }

    /// The block containing the definition of `id` (instruction or
    /// terminator).
    pub fn block_of(&self, id: ValueId) -> Option<BlockId> {
        for block in &self.blocks {
            if block.instructions.iter().any(|i| i.result() == id) {
                return Some(block.id);
            }
            if block.terminator.as_ref().map(|t| t.id()) == Some(id) {
                return Some(block.id);
            }
        }
        None
    }

    /// Identities of every instruction and terminator that uses `id` as an
    /// operand, in program order. A user appears once even if it uses `id`
    /// several times.
    pub fn users(&self, id: ValueId) -> Vec<ValueId> {
        let mut users = Vec::new();
        for block in &self.blocks {
            for inst in &block.instructions {
                if inst.operands().contains(&id) && !users.contains(&inst.result()) {
                    users.push(inst.result());
                }
            }
            if let Some(term) = &block.terminator {
                if term.operands().contains(&id) && !users.contains(&term.id()) {
                    users.push(term.id());
                }
            }
        }
        users
    }

    /// Rewrite every use of `old` to `new` (operands, φ arms, terminators).
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                for op in inst.operands_mut() {
                    if *op == old {
                        *op = new;
                    }
                }
            }
            if let Some(term) = &mut block.terminator {
                for op in term.operands_mut() {
                    if *op == old {
                        *op = new;
                    }
                }
            }
        }
    }
}

/// Signature of an opaque declaration (the memory-ordering intrinsics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
}

/// A module: functions plus the declarations appended by transforms.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub declarations: Vec<Declaration>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
