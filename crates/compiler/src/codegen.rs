//! Bytecode emission.
//!
//! Linearises the typed HIR into a binary module: a deduplicated
//! constant pool, one code blob per defined function, and the
//! extern-library table. Expression lowering is a post-order walk over
//! the implicit operand stack; control flow uses forward patching for
//! `JF`/`JMP` targets, a loop-start stack for `continue`, and one
//! break-patch list per open loop.
//!
//! Jump targets are function-local byte offsets. There is no implicit
//! `RET`: only a source `return` emits one.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::ast::{OpTag, UnaryTag};
use crate::error::PicoError;
use crate::hir::{BlockId, BlockKind, BlockTag, HirModule, HirNode, HirNodeKind};
use crate::opcode;
use crate::symbol::SymbolId;
use crate::token::{Location, Token, TokenTag};
use crate::types::{TypeId, TypeRegistry, TypeObject};

/// A constant-pool entry. Integers and strings are separate key spaces
/// for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(u32),
    Str(String),
}

#[derive(Debug)]
pub struct FunctionIr {
    pub function_id: u16,
    pub name_idx: u16,
    pub param_count: u16,
    pub local_count: u16,
    pub code: Vec<u8>,
}

#[derive(Debug)]
pub struct ExternBlockIr {
    pub name_idx: u16,
    pub indices: Vec<u16>,
}

/// The emitted module before serialisation.
#[derive(Debug, Default)]
pub struct IrModule {
    consts: Vec<Constant>,
    const_index: HashMap<Constant, u16>,
    pub functions: Vec<FunctionIr>,
    pub extern_blocks: Vec<ExternBlockIr>,
    pub entry_fn_id: u16,
}

impl IrModule {
    /// Stable index of `value` in the constant pool, appending on first
    /// use.
    pub fn get_const_index(&mut self, value: Constant) -> u16 {
        if let Some(&index) = self.const_index.get(&value) {
            return index;
        }
        let index = self.consts.len() as u16;
        self.const_index.insert(value.clone(), index);
        self.consts.push(value);
        index
    }

    pub fn consts(&self) -> &[Constant] {
        &self.consts
    }

    /// Serialise to the binary module format. All multi-byte integers
    /// are little-endian unsigned.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"PEXB");
        out.extend_from_slice(&[0u8; 12]);

        out.extend_from_slice(&(self.consts.len() as u16).to_le_bytes());
        for constant in &self.consts {
            match constant {
                Constant::Int(value) => {
                    out.push(0x01);
                    out.extend_from_slice(&value.to_le_bytes());
                }
                Constant::Str(value) => {
                    out.push(0x02);
                    let bytes = value.as_bytes();
                    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                    out.extend_from_slice(bytes);
                }
            }
        }

        out.extend_from_slice(&self.entry_fn_id.to_le_bytes());

        out.extend_from_slice(&(self.functions.len() as u16).to_le_bytes());
        for function in &self.functions {
            out.extend_from_slice(&function.function_id.to_le_bytes());
            out.extend_from_slice(&function.name_idx.to_le_bytes());
            out.extend_from_slice(&function.param_count.to_le_bytes());
            out.extend_from_slice(&function.local_count.to_le_bytes());
            out.extend_from_slice(&(function.code.len() as u32).to_le_bytes());
            out.extend_from_slice(&function.code);
        }

        out.extend_from_slice(&(self.extern_blocks.len() as u16).to_le_bytes());
        for block in &self.extern_blocks {
            out.extend_from_slice(&(block.indices.len() as u16).to_le_bytes());
            out.extend_from_slice(&block.name_idx.to_le_bytes());
            for index in &block.indices {
                out.extend_from_slice(&index.to_le_bytes());
            }
        }

        out
    }
}

fn binary_opcode(op: OpTag) -> u8 {
    match op {
        OpTag::Add => opcode::IADD,
        OpTag::Sub => opcode::ISUB,
        OpTag::Mul => opcode::IMUL,
        OpTag::Div => opcode::IDIV,
        OpTag::Mod => opcode::IREM,
        // logical and/or compile to the bitwise forms over 0/1
        OpTag::And => opcode::IAND,
        OpTag::Or => opcode::IOR,
        OpTag::Band => opcode::IAND,
        OpTag::Bor => opcode::IOR,
        OpTag::Bxor => opcode::IXOR,
        OpTag::Shl => opcode::ISHL,
        OpTag::Shr => opcode::ISHR,
        OpTag::Eq => opcode::IEQ,
        OpTag::Neq => opcode::INE,
        OpTag::Lt => opcode::ILT,
        OpTag::Lte => opcode::ILE,
        OpTag::Gt => opcode::IGT,
        OpTag::Gte => opcode::IGE,
    }
}

/// Opcode for a permitted cast pair; `None` for identity casts, which
/// emit nothing.
fn cast_opcode(from: TypeId, to: TypeId) -> Option<u8> {
    let op = match (from, to) {
        (TypeRegistry::INT, TypeRegistry::LONG) => opcode::I2L,
        (TypeRegistry::LONG, TypeRegistry::INT) => opcode::L2I,
        (TypeRegistry::INT, TypeRegistry::BOOL) => opcode::I2B,
        (TypeRegistry::BOOL, TypeRegistry::INT) => opcode::B2I,
        (TypeRegistry::LONG, TypeRegistry::BOOL) => opcode::L2B,
        (TypeRegistry::BOOL, TypeRegistry::LONG) => opcode::B2L,
        _ => return None,
    };
    Some(op)
}

pub struct Emitter<'a> {
    hir: &'a HirModule,
    registry: &'a TypeRegistry,
    module: IrModule,
    /// Code of the function currently being emitted.
    code: Vec<u8>,
    loop_starts: Vec<usize>,
    break_patches: Vec<Vec<usize>>,
}

impl<'a> Emitter<'a> {
    pub fn new(hir: &'a HirModule, registry: &'a TypeRegistry) -> Self {
        Emitter {
            hir,
            registry,
            module: IrModule::default(),
            code: Vec::new(),
            loop_starts: Vec::new(),
            break_patches: Vec::new(),
        }
    }

    /// Emit the whole module. The entry point is the function named
    /// `main`; a module without one cannot be produced.
    pub fn emit(hir: &'a HirModule, registry: &'a TypeRegistry) -> Result<IrModule, PicoError> {
        let mut emitter = Emitter::new(hir, registry);
        let mut entry = None;

        let global = hir.block(hir.global);
        for node in &global.nodes {
            let HirNodeKind::Block(block_id) = node.kind else {
                continue;
            };
            if hir.block(block_id).tag == BlockTag::Function {
                let function = emitter.emit_function(block_id)?;
                let name = &emitter.module.consts()[function.name_idx as usize];
                if *name == Constant::Str("main".to_string()) {
                    entry = Some(function.function_id);
                }
                emitter.module.functions.push(function);
            }
        }
        for node in &global.nodes {
            let HirNodeKind::Block(block_id) = node.kind else {
                continue;
            };
            if hir.block(block_id).tag == BlockTag::Module {
                emitter.emit_extern_block(block_id);
            }
        }

        let Some(entry) = entry else {
            return Err(PicoError::semantic(
                "no 'main' function defined",
                synthetic_token(),
            ));
        };
        emitter.module.entry_fn_id = entry;
        debug!(
            functions = emitter.module.functions.len(),
            consts = emitter.module.consts().len(),
            entry,
            "emitted module"
        );
        Ok(emitter.module)
    }

    fn emit_function(&mut self, block_id: BlockId) -> Result<FunctionIr, PicoError> {
        let hir = self.hir;
        let block = hir.block(block_id);
        let BlockKind::Function { symbol, function_id, local_count, param_count } = block.kind
        else {
            unreachable!("emit_function on a non-function block");
        };

        self.code = Vec::new();
        self.loop_starts.clear();
        self.break_patches.clear();
        for node in &block.nodes {
            self.emit_node(node)?;
        }
        let code = std::mem::take(&mut self.code);

        let name = hir.symbols.get(symbol).name.clone();
        debug!(function = %name, code_size = code.len(), "emitted function");
        let name_idx = self.module.get_const_index(Constant::Str(name));
        Ok(FunctionIr {
            function_id,
            name_idx,
            param_count: param_count as u16,
            local_count: local_count as u16,
            code,
        })
    }

    /// One extern table entry per block: the library name plus the
    /// constant-pool index of each mangled function name, in declaration
    /// order.
    fn emit_extern_block(&mut self, block_id: BlockId) {
        let hir = self.hir;
        let block = hir.block(block_id);
        let BlockKind::ExternLib { symbol } = block.kind else {
            unreachable!("emit_extern_block on a non-module block");
        };
        let lib_name = hir
            .symbols
            .get(symbol)
            .lib_prefix
            .clone()
            .expect("extern module symbol carries its library name");

        let mut function_ids: Vec<SymbolId> = block.symbols.values().copied().collect();
        function_ids.sort_unstable();

        let indices = function_ids
            .into_iter()
            .map(|id| {
                let name = &hir.symbols.get(id).name;
                self.module
                    .get_const_index(Constant::Str(format!("{}_{}", lib_name, name)))
            })
            .collect();
        let name_idx = self.module.get_const_index(Constant::Str(lib_name));
        self.module.extern_blocks.push(ExternBlockIr { name_idx, indices });
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    fn emit_node(&mut self, node: &HirNode) -> Result<(), PicoError> {
        match &node.kind {
            HirNodeKind::Block(block_id) => self.emit_block(*block_id),
            HirNodeKind::Branch { cond, then_block, else_block, merge_label } => {
                self.emit_branch(cond, *then_block, *else_block, merge_label)
            }
            HirNodeKind::Return { expr } => {
                if let Some(expr) = expr {
                    self.emit_expr(expr)?;
                }
                self.code.push(opcode::RET);
                Ok(())
            }
            HirNodeKind::Break { .. } => {
                self.code.push(opcode::JMP);
                let patch = self.code.len();
                self.push_u16(0);
                self.break_patches
                    .last_mut()
                    .expect("break inside a loop")
                    .push(patch);
                Ok(())
            }
            HirNodeKind::Continue { .. } => {
                let target = *self.loop_starts.last().expect("continue inside a loop");
                self.code.push(opcode::JMP);
                self.push_code_offset(target, &node.token)?;
                Ok(())
            }
            HirNodeKind::Log { expr } => {
                self.emit_expr(expr)?;
                self.code.push(opcode::LOG);
                Ok(())
            }
            _ => self.emit_expr(node),
        }
    }

    fn emit_block(&mut self, block_id: BlockId) -> Result<(), PicoError> {
        let hir = self.hir;
        let block = hir.block(block_id);
        if matches!(block.kind, BlockKind::Loop { .. }) {
            return self.emit_loop(block_id);
        }
        for node in &block.nodes {
            self.emit_node(node)?;
        }
        Ok(())
    }

    fn emit_loop(&mut self, block_id: BlockId) -> Result<(), PicoError> {
        let loop_start = self.code.len();
        self.loop_starts.push(loop_start);
        self.break_patches.push(Vec::new());

        let hir = self.hir;
        let block = hir.block(block_id);
        for node in &block.nodes {
            self.emit_node(node)?;
        }

        // back edge, then route every break to the loop exit
        self.code.push(opcode::JMP);
        let token = block
            .nodes
            .first()
            .map(|n| n.token.clone())
            .unwrap_or_else(synthetic_token);
        self.push_code_offset(loop_start, &token)?;

        let patches = self.break_patches.pop().expect("loop pushed its patch list");
        let exit = self.code.len();
        for patch in patches {
            self.patch_u16(patch, exit, &token)?;
        }
        self.loop_starts.pop();
        Ok(())
    }

    fn emit_branch(
        &mut self,
        cond: &HirNode,
        then_block: BlockId,
        else_block: Option<BlockId>,
        merge_label: &str,
    ) -> Result<(), PicoError> {
        self.emit_expr(cond)?;
        self.code.push(opcode::JF);
        let jf_patch = self.code.len();
        self.push_u16(0);

        self.emit_block(then_block)?;

        let merge = if let Some(else_block) = else_block {
            self.code.push(opcode::JMP);
            let jmp_patch = self.code.len();
            self.push_u16(0);
            let else_start = self.code.len();
            self.patch_u16(jf_patch, else_start, &cond.token)?;
            self.emit_block(else_block)?;
            let merge = self.code.len();
            self.patch_u16(jmp_patch, merge, &cond.token)?;
            merge
        } else {
            let merge = self.code.len();
            self.patch_u16(jf_patch, merge, &cond.token)?;
            merge
        };
        trace!(label = merge_label, offset = merge, "patched branch merge");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn emit_expr(&mut self, node: &HirNode) -> Result<(), PicoError> {
        match &node.kind {
            HirNodeKind::ConstInt { value, .. } => {
                let value = u32::try_from(*value).map_err(|_| {
                    PicoError::semantic(
                        format!("integer constant {} does not fit the constant pool", value),
                        node.token.clone(),
                    )
                })?;
                let index = self.module.get_const_index(Constant::Int(value));
                self.code.push(opcode::LIC);
                self.push_u16(index);
            }
            HirNodeKind::ConstStr { value } => {
                let index = self.module.get_const_index(Constant::Str(value.clone()));
                self.code.push(opcode::LSC);
                self.push_u16(index);
            }
            HirNodeKind::ConstBool { value } => {
                self.code
                    .push(if *value { opcode::LBT } else { opcode::LBF });
            }
            HirNodeKind::VarRef { symbol, .. } => {
                let offset = self.local_offset(symbol);
                self.code.push(opcode::LOAD);
                self.push_u16(offset);
            }
            HirNodeKind::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.code.push(binary_opcode(*op));
            }
            HirNodeKind::Unary { op, operand } => self.emit_unary(*op, operand)?,
            HirNodeKind::Cast { expr, from_type, to_type } => {
                self.emit_expr(expr)?;
                if let Some(op) = cast_opcode(*from_type, *to_type) {
                    self.code.push(op);
                }
            }
            HirNodeKind::BoolCast { expr } => {
                self.emit_expr(expr)?;
                self.code.push(opcode::I2B);
            }
            HirNodeKind::StoreLocal { symbol, value, .. } => {
                self.emit_expr(value)?;
                let offset = self.local_offset(symbol);
                self.code.push(opcode::STORE);
                self.push_u16(offset);
            }
            HirNodeKind::StoreField { obj, field_index, value, .. } => {
                self.emit_expr(obj)?;
                self.emit_expr(value)?;
                self.code.push(opcode::STORE_FIELD);
                self.push_u16(resolved_index(field_index));
            }
            HirNodeKind::FieldAccess { obj, field_index, .. } => {
                self.emit_expr(obj)?;
                self.code.push(opcode::LOAD_FIELD);
                self.push_u16(resolved_index(field_index));
            }
            HirNodeKind::CreateStruct { values, .. } => {
                let TypeObject::Struct { fields, .. } = self.registry.get(node.type_id) else {
                    unreachable!("struct literal typed as non-struct");
                };
                let num_fields = fields.len() as u16;
                self.code.push(opcode::ALLOCA_STRUCT);
                self.push_u16(num_fields);
                for value in values {
                    let HirNodeKind::FieldValue { value: inner, field_index, .. } = &value.kind
                    else {
                        unreachable!("struct literal children are always field values");
                    };
                    self.emit_expr(inner)?;
                    self.code.push(opcode::SET_FIELD);
                    self.push_u16(resolved_index(field_index));
                }
            }
            HirNodeKind::Call { args, function_symbol, .. } => {
                for arg in args {
                    self.emit_expr(arg)?;
                }
                let hir = self.hir;
                let symbol = hir
                    .symbols
                    .get(function_symbol.expect("call resolved by sema"));
                let is_void = node.type_id == TypeRegistry::VOID;
                match symbol.linkage {
                    crate::symbol::Linkage::Internal => {
                        self.code.push(if is_void {
                            opcode::VOID_CALL
                        } else {
                            opcode::CALL
                        });
                        self.push_u16(symbol.function_id);
                    }
                    crate::symbol::Linkage::External => {
                        let prefix = symbol
                            .lib_prefix
                            .clone()
                            .expect("external function carries its library name");
                        let index = self
                            .module
                            .get_const_index(Constant::Str(format!("{}_{}", prefix, symbol.name)));
                        self.code.push(if is_void {
                            opcode::VOID_CALL_EXTERN
                        } else {
                            opcode::CALL_EXTERN
                        });
                        self.push_u16(index);
                    }
                }
            }
            _ => {
                return Err(PicoError::semantic(
                    "expression cannot be emitted",
                    node.token.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Pre-forms apply the in-place op then load; post-forms load the
    /// original value first. The field variants keep the same split via
    /// `LOAD_FIELD` and `IFIELD_INC`/`IFIELD_DEC`.
    fn emit_unary(&mut self, op: UnaryTag, operand: &HirNode) -> Result<(), PicoError> {
        match op {
            UnaryTag::Not => {
                self.emit_expr(operand)?;
                self.code.push(opcode::BNOT);
                Ok(())
            }
            UnaryTag::PreInc | UnaryTag::PreDec | UnaryTag::PostInc | UnaryTag::PostDec => {
                let post = matches!(op, UnaryTag::PostInc | UnaryTag::PostDec);
                let inc = matches!(op, UnaryTag::PreInc | UnaryTag::PostInc);
                match &operand.kind {
                    HirNodeKind::VarRef { symbol, .. } => {
                        let offset = self.local_offset(symbol);
                        let in_place = if inc { opcode::IINC } else { opcode::IDEC };
                        if post {
                            self.code.push(opcode::LOAD);
                            self.push_u16(offset);
                            self.code.push(in_place);
                            self.push_u16(offset);
                        } else {
                            self.code.push(in_place);
                            self.push_u16(offset);
                            self.code.push(opcode::LOAD);
                            self.push_u16(offset);
                        }
                        Ok(())
                    }
                    HirNodeKind::FieldAccess { obj, field_index, .. } => {
                        let index = resolved_index(field_index);
                        let in_place = if inc { opcode::IFIELD_INC } else { opcode::IFIELD_DEC };
                        if post {
                            self.emit_expr(obj)?;
                            self.code.push(opcode::LOAD_FIELD);
                            self.push_u16(index);
                            self.emit_expr(obj)?;
                            self.code.push(in_place);
                            self.push_u16(index);
                        } else {
                            self.emit_expr(obj)?;
                            self.code.push(in_place);
                            self.push_u16(index);
                            self.emit_expr(obj)?;
                            self.code.push(opcode::LOAD_FIELD);
                            self.push_u16(index);
                        }
                        Ok(())
                    }
                    _ => unreachable!("increment target checked by sema"),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn local_offset(&self, symbol: &Option<SymbolId>) -> u16 {
        let symbol = symbol.expect("local reference resolved by sema");
        self.hir.symbols.get(symbol).local_offset as u16
    }

    fn push_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a jump target, rejecting functions whose code has grown
    /// past what a u16 offset can address.
    fn push_code_offset(&mut self, target: usize, token: &Token) -> Result<(), PicoError> {
        let target = u16::try_from(target).map_err(|_| {
            PicoError::semantic("function body too large", token.clone())
        })?;
        self.push_u16(target);
        Ok(())
    }

    fn patch_u16(&mut self, at: usize, target: usize, token: &Token) -> Result<(), PicoError> {
        let target = u16::try_from(target).map_err(|_| {
            PicoError::semantic("function body too large", token.clone())
        })?;
        self.code[at..at + 2].copy_from_slice(&target.to_le_bytes());
        Ok(())
    }
}

fn resolved_index(field_index: &Option<usize>) -> u16 {
    field_index.expect("field index resolved by sema") as u16
}

/// Token for errors that have no single source position, like a missing
/// entry point.
fn synthetic_token() -> Token {
    Token {
        tag: TokenTag::Eof,
        value: String::new(),
        loc: Location {
            line: 1,
            col: 1,
            start: 0,
            end: 0,
        },
        line_start: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::hirgen::HirGen;
    use crate::parser::Parser;
    use crate::sema::Sema;

    fn emit(source: &str) -> IrModule {
        try_emit(source).unwrap()
    }

    fn try_emit(source: &str) -> Result<IrModule, PicoError> {
        let program = Parser::parse(source)?;
        let mut registry = TypeRegistry::new();
        let mut hir = HirGen::generate(&mut registry, &program)?;
        Sema::analyze(&mut registry, &mut hir, &CompilerConfig::default())?;
        Emitter::emit(&hir, &registry)
    }

    fn main_code(module: &IrModule) -> &[u8] {
        let main_idx = module
            .consts()
            .iter()
            .position(|c| *c == Constant::Str("main".to_string()))
            .expect("main in const pool") as u16;
        &module
            .functions
            .iter()
            .find(|f| f.name_idx == main_idx)
            .expect("main function")
            .code
    }

    #[test]
    fn test_constant_pool_dedup() {
        let module = emit("fn main()int{return 5 + 5 + 5;}");
        // one 5, one "main"
        assert_eq!(module.consts().len(), 2);
        assert_eq!(module.consts()[0], Constant::Int(5));
        assert_eq!(module.consts()[1], Constant::Str("main".to_string()));
    }

    #[test]
    fn test_entry_point_is_main() {
        let module = emit("fn helper()void{} fn main()int{return 0;}");
        assert_eq!(module.entry_fn_id, 1);
    }

    #[test]
    fn test_missing_main_is_an_error() {
        let err = try_emit("fn helper()void{}").unwrap_err();
        assert!(err.message.contains("main"));
    }

    #[test]
    fn test_local_count_covers_params_and_locals() {
        let module = emit("fn main(int a)int{let b = 1; return a + b;}");
        let function = &module.functions[0];
        assert_eq!(function.param_count, 1);
        assert_eq!(function.local_count, 2);
        assert!(function.local_count >= function.param_count);
    }

    #[test]
    fn test_store_and_load_offsets() {
        let module = emit("fn main()int{let a=2;let b=3;return a+b;}");
        let code = main_code(&module);
        let expected = [
            opcode::LIC, 0, 0,      // 2
            opcode::STORE, 0, 0,    // a -> slot 0
            opcode::LIC, 1, 0,      // 3
            opcode::STORE, 1, 0,    // b -> slot 1
            opcode::LOAD, 0, 0,
            opcode::LOAD, 1, 0,
            opcode::IADD,
            opcode::RET,
        ];
        assert_eq!(code, expected);
    }

    #[test]
    fn test_branch_patching_with_else() {
        let module = emit("fn main()int{if(1){return 1;}else{return 2;}}");
        let code = main_code(&module);
        // LIC 0, I2B, JF <else>, LIC 1, RET, JMP <merge>, LIC 2, RET
        assert_eq!(code[0], opcode::LIC);
        assert_eq!(code[3], opcode::I2B);
        assert_eq!(code[4], opcode::JF);
        let else_target = u16::from_le_bytes([code[5], code[6]]) as usize;
        // then-arm: LIC <1>, RET, JMP <patch>
        assert_eq!(code[7], opcode::LIC);
        assert_eq!(code[10], opcode::RET);
        assert_eq!(code[11], opcode::JMP);
        assert_eq!(else_target, 14, "JF jumps past then-arm and its JMP");
        let merge_target = u16::from_le_bytes([code[12], code[13]]) as usize;
        assert_eq!(code[else_target], opcode::LIC);
        assert_eq!(merge_target, code.len());
    }

    #[test]
    fn test_branch_without_else_patches_to_merge() {
        let module = emit("fn main()void{if(true){log 1;}}");
        let code = main_code(&module);
        assert_eq!(code[0], opcode::LBT);
        assert_eq!(code[1], opcode::JF);
        let target = u16::from_le_bytes([code[2], code[3]]) as usize;
        assert_eq!(target, code.len());
    }

    #[test]
    fn test_loop_back_edge_and_break_patching() {
        let module = emit("fn main()void{loop{ break; }}");
        let code = main_code(&module);
        // break: JMP <exit>; back edge: JMP <0>
        assert_eq!(code[0], opcode::JMP);
        let exit = u16::from_le_bytes([code[1], code[2]]) as usize;
        assert_eq!(code[3], opcode::JMP);
        let back = u16::from_le_bytes([code[4], code[5]]) as usize;
        assert_eq!(back, 0);
        assert_eq!(exit, code.len());
    }

    #[test]
    fn test_continue_jumps_to_loop_start() {
        let module = emit("fn main()void{loop{ if(false){ continue; } break; }}");
        let code = main_code(&module);
        // find the continue JMP inside the then-arm
        assert_eq!(code[0], opcode::LBF);
        assert_eq!(code[1], opcode::JF);
        assert_eq!(code[4], opcode::JMP);
        let target = u16::from_le_bytes([code[5], code[6]]) as usize;
        assert_eq!(target, 0);
    }

    #[test]
    fn test_while_matches_hand_written_loop() {
        // property: while(cond) body and its desugaring emit identical code
        let while_module = emit("fn main()void{let i=0; while(i < 3){ i++; }}");
        let loop_module = emit("fn main()void{let i=0; loop{ if(!(i < 3)){ break; } i++; }}");
        assert_eq!(main_code(&while_module), main_code(&loop_module));
        assert_eq!(
            while_module.consts().len(),
            loop_module.consts().len()
        );
    }

    #[test]
    fn test_post_increment_loads_before_inc() {
        let module = emit("fn main()int{let x = 1; return x++;}");
        let code = main_code(&module);
        let tail = &code[6..];
        assert_eq!(
            tail,
            [
                opcode::LOAD, 0, 0,
                opcode::IINC, 0, 0,
                opcode::RET,
            ]
        );
    }

    #[test]
    fn test_pre_decrement_incs_before_load() {
        let module = emit("fn main()int{let x = 1; return --x;}");
        let code = main_code(&module);
        let tail = &code[6..];
        assert_eq!(
            tail,
            [
                opcode::IDEC, 0, 0,
                opcode::LOAD, 0, 0,
                opcode::RET,
            ]
        );
    }

    #[test]
    fn test_call_and_void_call() {
        let module = emit(
            "fn ping()void{} fn add(int a, int b)int{return a+b;} \
             fn main()int{ping(); return add(1, 2);}",
        );
        let code = main_code(&module);
        assert_eq!(code[0], opcode::VOID_CALL);
        assert_eq!(u16::from_le_bytes([code[1], code[2]]), 0);
        // args then CALL <fn 1>
        assert_eq!(code[3], opcode::LIC);
        assert_eq!(code[6], opcode::LIC);
        assert_eq!(code[9], opcode::CALL);
        assert_eq!(u16::from_le_bytes([code[10], code[11]]), 1);
    }

    #[test]
    fn test_extern_call_uses_mangled_const() {
        let module = emit(
            "extern @libm=\"m\"{ fn sqrt(int x)int; } fn main()int{return libm::sqrt(9);}",
        );
        let code = main_code(&module);
        assert_eq!(code[0], opcode::LIC);
        assert_eq!(code[3], opcode::CALL_EXTERN);
        let index = u16::from_le_bytes([code[4], code[5]]) as usize;
        assert_eq!(module.consts()[index], Constant::Str("m_sqrt".to_string()));

        // extern table: one block naming "m" with one index
        assert_eq!(module.extern_blocks.len(), 1);
        let block = &module.extern_blocks[0];
        assert_eq!(
            module.consts()[block.name_idx as usize],
            Constant::Str("m".to_string())
        );
        assert_eq!(block.indices, vec![index as u16]);
    }

    #[test]
    fn test_struct_literal_and_field_load() {
        let module = emit("struct P{int x;} fn main()int{let p=P{.x=7}; return p.x;}");
        let code = main_code(&module);
        let expected = [
            opcode::ALLOCA_STRUCT, 1, 0,
            opcode::LIC, 0, 0,          // 7
            opcode::SET_FIELD, 0, 0,
            opcode::STORE, 0, 0,        // p
            opcode::LOAD, 0, 0,
            opcode::LOAD_FIELD, 0, 0,
            opcode::RET,
        ];
        assert_eq!(code, expected);
    }

    #[test]
    fn test_store_field() {
        let module = emit("struct P{int x;} fn main()void{let p=P{.x=1}; p.x = 2;}");
        let code = main_code(&module);
        let tail = &code[12..];
        assert_eq!(
            tail,
            [
                opcode::LOAD, 0, 0,
                opcode::LIC, 1, 0,
                opcode::STORE_FIELD, 0, 0,
            ]
        );
    }

    #[test]
    fn test_shift_log_scenario() {
        let module = emit("fn main()void{log 2>>3;}");
        let code = main_code(&module);
        let expected = [
            opcode::LIC, 0, 0,
            opcode::LIC, 1, 0,
            opcode::ISHR,
            opcode::LOG,
        ];
        assert_eq!(code, expected);
        assert_eq!(module.consts().len(), 3);
    }

    #[test]
    fn test_widening_cast_emits_i2l() {
        let module = emit("fn main()long{return 1 + 2l;}");
        let code = main_code(&module);
        let expected = [
            opcode::LIC, 0, 0,
            opcode::I2L,
            opcode::LIC, 1, 0,
            opcode::IADD,
            opcode::RET,
        ];
        assert_eq!(code, expected);
    }

    #[test]
    fn test_oversized_int_literal_is_rejected() {
        let err = try_emit("fn main()long{return 4294967296l;}").unwrap_err();
        assert!(err.message.contains("constant pool"));
    }

    #[test]
    fn test_logical_ops_compile_to_bitwise() {
        let module = emit("fn main()bool{return true && false || true;}");
        let code = main_code(&module);
        let expected = [
            opcode::LBT,
            opcode::LBF,
            opcode::IAND,
            opcode::LBT,
            opcode::IOR,
            opcode::RET,
        ];
        assert_eq!(code, expected);
    }
}
