//! The IR consumed and produced by the optimizer and the backend. A module is
//! a list of functions; each function is a list of basic blocks holding
//! instructions by handle. All source-level variables live in stack slots
//! created by `alloca` in the entry block and are accessed through
//! `load`/`store`, so values never flow between blocks except through memory.

use hashbrown::HashSet;
use once_cell::sync::Lazy;

use crate::index::{simple_index, IndexVec};

pub mod parser;
pub mod pretty_print;

simple_index! {
    /// Identifies a basic block within its function
    pub struct BlockId;
}

impl BlockId {
    pub const ZERO: Self = Self(0);
}

simple_index! {
    /// Identifies an instruction within its function's arena. Handles stay
    /// stable across erasure, so side tables keyed by `InstId` survive
    /// optimizer mutations.
    pub struct InstId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Alloca,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    Icmp,
    Br,
    Ret,
    Call,
}

/// Signed integer comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl Predicate {
    /// The AT&T jump mnemonic taken when the comparison holds.
    pub fn jump_mnemonic(self) -> &'static str {
        match self {
            Predicate::Eq => "je",
            Predicate::Ne => "jne",
            Predicate::Slt => "jl",
            Predicate::Sle => "jle",
            Predicate::Sgt => "jg",
            Predicate::Sge => "jge",
        }
    }

    pub fn evaluate(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Predicate::Eq => lhs == rhs,
            Predicate::Ne => lhs != rhs,
            Predicate::Slt => lhs < rhs,
            Predicate::Sle => lhs <= rhs,
            Predicate::Sgt => lhs > rhs,
            Predicate::Sge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    /// Comparison results
    I1,
    /// Everything else
    I32,
}

/// An integer constant. Two constants are interchangeable only when both the
/// value and the width agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstInt {
    pub value: i32,
    pub width: IntWidth,
}

impl ConstInt {
    pub fn i32(value: i32) -> Self {
        Self {
            value,
            width: IntWidth::I32,
        }
    }

    pub fn i1(value: bool) -> Self {
        Self {
            value: value as i32,
            width: IntWidth::I1,
        }
    }
}

/// A reference held in an instruction's operand list. References to other
/// instructions are by handle, so operand equality is identity comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Inst(InstId),
    Const(ConstInt),
    /// The function's single formal parameter
    Param,
    /// A branch target
    Block(BlockId),
}

impl Operand {
    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Operand::Inst(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_const(self) -> Option<ConstInt> {
        match self {
            Operand::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_block(self) -> Option<BlockId> {
        match self {
            Operand::Block(id) => Some(id),
            _ => None,
        }
    }
}

/// The result type of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int(IntWidth),
    Ptr,
    Void,
}

/// An external or defined function a `call` resolves to by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callee {
    pub name: String,
    pub returns_value: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Present exactly when `opcode` is `icmp`
    pub predicate: Option<Predicate>,
    /// Present exactly when `opcode` is `call`
    pub callee: Option<Callee>,
    pub operands: Vec<Operand>,
    /// Parent back-pointer, needed to erase from the containing block
    pub block: BlockId,
}

/// Opcodes whose removal would change observable behavior. Terminators are
/// listed individually since the opcode set is closed.
static SIDE_EFFECTING: Lazy<HashSet<Opcode>> =
    Lazy::new(|| [Opcode::Store, Opcode::Call, Opcode::Br, Opcode::Ret].into_iter().collect());

/// Opcodes that never produce a result. A `call` is classified by its callee.
static NO_RESULT: Lazy<HashSet<Opcode>> =
    Lazy::new(|| [Opcode::Store, Opcode::Br, Opcode::Ret].into_iter().collect());

static ARITHMETIC: Lazy<HashSet<Opcode>> =
    Lazy::new(|| [Opcode::Add, Opcode::Sub, Opcode::Mul].into_iter().collect());

impl Instruction {
    pub fn has_result(&self) -> bool {
        match self.opcode {
            Opcode::Call => self.callee.as_ref().is_some_and(|c| c.returns_value),
            op => !NO_RESULT.contains(&op),
        }
    }

    pub fn has_side_effects(&self) -> bool {
        SIDE_EFFECTING.contains(&self.opcode)
    }

    pub fn is_arithmetic(&self) -> bool {
        ARITHMETIC.contains(&self.opcode)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.opcode, Opcode::Br | Opcode::Ret)
    }

    pub fn result_type(&self) -> Type {
        match self.opcode {
            Opcode::Alloca => Type::Ptr,
            Opcode::Load | Opcode::Add | Opcode::Sub | Opcode::Mul => Type::Int(IntWidth::I32),
            Opcode::Icmp => Type::Int(IntWidth::I1),
            Opcode::Call if self.has_result() => Type::Int(IntWidth::I32),
            _ => Type::Void,
        }
    }

    /// The slot written by a `store` (operand 1) or read by a `load`
    /// (operand 0).
    pub fn pointer_operand(&self) -> Option<InstId> {
        match self.opcode {
            Opcode::Load => self.operands[0].as_inst(),
            Opcode::Store => self.operands[1].as_inst(),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Block {
    pub insts: Vec<InstId>,
}

impl Block {
    pub fn terminator(&self) -> Option<InstId> {
        self.insts.last().copied()
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub has_param: bool,
    pub blocks: IndexVec<BlockId, Block>,
    /// Arena of all instructions ever created for this function. Erased
    /// instructions keep their slot but are unlinked from every block.
    pub insts: IndexVec<InstId, Instruction>,
}

impl Function {
    pub fn new(name: impl Into<String>, has_param: bool) -> Self {
        Self {
            name: name.into(),
            has_param,
            blocks: IndexVec::new(),
            insts: IndexVec::new(),
        }
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id]
    }

    /// Appends an instruction to the given block, returning its handle.
    pub fn push_inst(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        predicate: Option<Predicate>,
        callee: Option<Callee>,
        operands: Vec<Operand>,
    ) -> InstId {
        let id = self.insts.push(Instruction {
            opcode,
            predicate,
            callee,
            operands,
            block,
        });
        self.blocks[block].insts.push(id);
        id
    }

    /// The successors of a block, read off its terminator. A conditional
    /// branch stores the false target at operand 1 and the true target at
    /// operand 2.
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let Some(term) = self.blocks[block].terminator() else {
            return Vec::new();
        };

        let term = self.inst(term);
        match term.opcode {
            Opcode::Br => term.operands.iter().filter_map(|op| op.as_block()).collect(),
            _ => Vec::new(),
        }
    }

    /// Builds the predecessor lists for every block from the terminators.
    /// The entry block has no predecessors.
    pub fn predecessors(&self) -> IndexVec<BlockId, Vec<BlockId>> {
        let mut preds = IndexVec::from_raw(vec![Vec::new(); self.blocks.len()]);

        for block in self.blocks.indices() {
            for succ in self.successors(block) {
                preds[succ].push(block);
            }
        }

        preds
    }

    /// All (user, operand index) pairs referring to `value`, in block and
    /// instruction order. Uses are recomputed from the operand lists, so
    /// they are always consistent with the current module.
    pub fn uses_of(&self, value: InstId) -> Vec<(InstId, usize)> {
        let mut uses = Vec::new();

        for block in self.blocks.iter() {
            for &id in &block.insts {
                for (i, op) in self.insts[id].operands.iter().enumerate() {
                    if op.as_inst() == Some(value) {
                        uses.push((id, i));
                    }
                }
            }
        }

        uses
    }

    pub fn has_uses(&self, value: InstId) -> bool {
        self.blocks.iter().any(|block| {
            block.insts.iter().any(|&id| {
                self.insts[id]
                    .operands
                    .iter()
                    .any(|op| op.as_inst() == Some(value))
            })
        })
    }

    /// Rewrites every use of `from` to `to` across the whole function.
    pub fn replace_all_uses(&mut self, from: InstId, to: Operand) {
        for (user, index) in self.uses_of(from) {
            self.insts[user].operands[index] = to;
        }
    }

    /// Unlinks an instruction from its parent block and severs its operand
    /// references, so that operands can become dead in a later round.
    ///
    /// Erasing an instruction that still has uses would leave dangling
    /// handles behind, which is a bug in the calling pass.
    pub fn erase_from_parent(&mut self, id: InstId) {
        assert!(
            !self.has_uses(id),
            "attempted to erase {:?} while it still has uses",
            self.insts[id].opcode
        );

        let block = self.insts[id].block;
        self.blocks[block].insts.retain(|&i| i != id);
        self.insts[id].operands.clear();
    }
}

/// An external declaration resolved by name at call sites
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub returns_value: bool,
}

#[derive(Debug)]
pub struct Module {
    /// Name recorded in the module header and the emitted `.file` directive
    pub source_name: String,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
}
