//! High-level IR: scoped blocks and typed nodes.
//!
//! The HIR sits between the AST and the emitter. Blocks form a tree
//! (global block at the root, function blocks under it, local blocks
//! below) and live in an arena addressed by [`BlockId`]; the upward
//! `parent` links are plain ids, which keeps lexical resolution walks
//! cheap and ownership simple. Non-block nodes are an ordinary owned
//! tree inside each block's node list.
//!
//! Every node carries the token it came from and a `type_id` that stays
//! 0 until Sema has typed it.

use std::collections::HashMap;

use crate::ast::{OpTag, UnaryTag};
use crate::symbol::{SymbolArena, SymbolId};
use crate::token::Token;
use crate::types::TypeId;

pub type BlockId = usize;
pub type LoopId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Global,
    Function,
    Local,
    Module,
}

/// Kind-specific block payload.
#[derive(Debug, Clone, Copy)]
pub enum BlockKind {
    Plain,
    Function {
        symbol: SymbolId,
        function_id: u16,
        /// Total stack slots: parameters plus locals.
        local_count: usize,
        param_count: usize,
    },
    Loop {
        loop_id: LoopId,
    },
    ExternLib {
        symbol: SymbolId,
    },
}

#[derive(Debug, Clone)]
pub struct HirBlock {
    pub label: String,
    pub tag: BlockTag,
    pub kind: BlockKind,
    pub scope_depth: usize,
    pub parent: Option<BlockId>,
    /// Names declared directly in this block.
    pub symbols: HashMap<String, SymbolId>,
    /// Child nodes in insertion order. Nested blocks appear as
    /// [`HirNodeKind::Block`] entries.
    pub nodes: Vec<HirNode>,
}

impl HirBlock {
    pub fn new(label: impl Into<String>, tag: BlockTag, kind: BlockKind, scope_depth: usize, parent: Option<BlockId>) -> Self {
        HirBlock {
            label: label.into(),
            tag,
            kind,
            scope_depth,
            parent,
            symbols: HashMap::new(),
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HirNode {
    pub token: Token,
    /// 0 until Sema types the node. Pure statements stay 0.
    pub type_id: TypeId,
    pub kind: HirNodeKind,
}

impl HirNode {
    pub fn new(token: Token, kind: HirNodeKind) -> Self {
        HirNode {
            token,
            type_id: 0,
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub enum HirNodeKind {
    /// A nested block (plain, loop, function, or extern lib).
    Block(BlockId),
    Branch {
        cond: Box<HirNode>,
        then_block: BlockId,
        else_block: Option<BlockId>,
        merge_label: String,
    },
    Return {
        expr: Option<Box<HirNode>>,
    },
    Break {
        loop_id: LoopId,
    },
    Continue {
        loop_id: LoopId,
    },
    Log {
        expr: Box<HirNode>,
    },
    StoreLocal {
        name: String,
        symbol: Option<SymbolId>,
        value: Box<HirNode>,
    },
    StoreField {
        obj: Box<HirNode>,
        field: String,
        field_token: Token,
        field_index: Option<usize>,
        value: Box<HirNode>,
    },
    VarRef {
        name: String,
        symbol: Option<SymbolId>,
    },
    Call {
        callee: Box<HirNode>,
        args: Vec<HirNode>,
        function_symbol: Option<SymbolId>,
    },
    Binary {
        op: OpTag,
        lhs: Box<HirNode>,
        rhs: Box<HirNode>,
    },
    Unary {
        op: UnaryTag,
        operand: Box<HirNode>,
    },
    /// An explicit or Sema-inserted conversion. `from_type` is 0 until
    /// Sema fills it from the wrapped expression.
    Cast {
        expr: Box<HirNode>,
        from_type: TypeId,
        to_type: TypeId,
    },
    /// Truthiness wrapper for integer branch conditions (nonzero = true).
    BoolCast {
        expr: Box<HirNode>,
    },
    CreateStruct {
        name: Box<HirNode>,
        values: Vec<HirNode>,
    },
    FieldValue {
        name: String,
        value: Box<HirNode>,
        field_index: Option<usize>,
    },
    FieldAccess {
        obj: Box<HirNode>,
        target: String,
        target_token: Token,
        field_index: Option<usize>,
    },
    StaticAccess {
        qualifier: Box<HirNode>,
        name: Box<HirNode>,
    },
    ConstInt {
        value: i64,
        long: bool,
    },
    ConstStr {
        value: String,
    },
    ConstBool {
        value: bool,
    },
}

/// The lowered program: block arena, symbol arena, and the global block.
#[derive(Debug)]
pub struct HirModule {
    pub blocks: Vec<HirBlock>,
    pub symbols: SymbolArena,
    pub global: BlockId,
}

impl HirModule {
    pub fn new() -> Self {
        let global = HirBlock::new("Global", BlockTag::Global, BlockKind::Plain, 0, None);
        HirModule {
            blocks: vec![global],
            symbols: SymbolArena::new(),
            global: 0,
        }
    }

    pub fn add_block(&mut self, block: HirBlock) -> BlockId {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn block(&self, id: BlockId) -> &HirBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut HirBlock {
        &mut self.blocks[id]
    }

    /// Lexical resolution: look `name` up in `block`, then walk parent
    /// links upward.
    pub fn resolve(&self, block: BlockId, name: &str) -> Option<SymbolId> {
        let mut cursor = Some(block);
        while let Some(id) = cursor {
            if let Some(&symbol) = self.blocks[id].symbols.get(name) {
                return Some(symbol);
            }
            cursor = self.blocks[id].parent;
        }
        None
    }

    /// Look `name` up in `block` only, without walking parents.
    pub fn resolve_local(&self, block: BlockId, name: &str) -> Option<SymbolId> {
        self.blocks[block].symbols.get(name).copied()
    }
}

impl Default for HirModule {
    fn default() -> Self {
        Self::new()
    }
}
