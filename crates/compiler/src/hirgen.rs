//! AST → HIR lowering.
//!
//! Runs in two passes over the top-level declarations:
//!
//! 1. a type pre-pass that reserves an incomplete struct type (and a
//!    global `Struct` symbol) for every `struct` declaration, so field
//!    types can refer to structs declared later or to themselves;
//! 2. the lowering pass proper, which builds the scoped block tree,
//!    allocates local slots, desugars `while`, and expands compound
//!    assignment.
//!
//! Name resolution of identifiers inside expressions is deliberately
//! left to Sema (`VarRef` nodes carry only the name), which is what
//! makes forward references within a function body work.

use tracing::debug;

use crate::ast::{Decl, Expr, FieldInit, Program, Prototype, Stmt, StructField, TypeExpr, UnaryTag};
use crate::error::PicoError;
use crate::hir::{BlockId, BlockKind, BlockTag, HirBlock, HirModule, HirNode, HirNodeKind, LoopId};
use crate::symbol::{Linkage, Symbol, SymbolId, SymbolKind};
use crate::token::Token;
use crate::types::{TypeId, TypeRegistry};

/// Deterministic label source, scoped to one lowering run.
struct LabelGenerator {
    counter: usize,
    temp_counter: usize,
}

impl LabelGenerator {
    fn new() -> Self {
        LabelGenerator {
            counter: 0,
            temp_counter: 0,
        }
    }

    fn next(&mut self, prefix: &str) -> String {
        let label = format!(".L{}{}", prefix, self.counter);
        self.counter += 1;
        label
    }

    fn temp(&mut self) -> String {
        let label = format!(".LBB{}", self.temp_counter);
        self.temp_counter += 1;
        label
    }
}

pub struct HirGen<'a> {
    registry: &'a mut TypeRegistry,
    module: HirModule,
    current_block: BlockId,
    scope_depth: usize,
    /// Next stack slot in the current function (params first).
    local_counter: usize,
    next_function_id: u16,
    loop_stack: Vec<LoopId>,
    next_loop_id: LoopId,
    labels: LabelGenerator,
}

impl<'a> HirGen<'a> {
    pub fn new(registry: &'a mut TypeRegistry) -> Self {
        let module = HirModule::new();
        let global = module.global;
        HirGen {
            registry,
            module,
            current_block: global,
            scope_depth: 0,
            local_counter: 0,
            next_function_id: 0,
            loop_stack: Vec::new(),
            next_loop_id: 0,
            labels: LabelGenerator::new(),
        }
    }

    /// Lower a parsed program to HIR.
    pub fn generate(registry: &'a mut TypeRegistry, program: &Program) -> Result<HirModule, PicoError> {
        let mut hirgen = HirGen::new(registry);
        hirgen.declare_structs(program)?;
        for decl in &program.decls {
            match decl {
                Decl::Function { proto, body } => hirgen.gen_function(proto, body.as_ref())?,
                Decl::Struct { name, fields, .. } => hirgen.gen_struct(name, fields)?,
                Decl::ExternLib { token, module_name, lib_name, protos } => {
                    hirgen.gen_extern(token, module_name, lib_name, protos)?
                }
            }
        }
        debug!(
            functions = hirgen.next_function_id,
            blocks = hirgen.module.blocks.len(),
            "lowered program to hir"
        );
        Ok(hirgen.module)
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    /// Type pre-pass: reserve an incomplete struct type per declaration.
    fn declare_structs(&mut self, program: &Program) -> Result<(), PicoError> {
        for decl in &program.decls {
            let Decl::Struct { name, name_token, .. } = decl else {
                continue;
            };
            if self.module.resolve_local(self.module.global, name).is_some() {
                return Err(PicoError::semantic(
                    format!("duplicate declaration of '{}'", name),
                    name_token.clone(),
                ));
            }
            let type_id = self.registry.add_incomplete_struct();
            let symbol = Symbol::new(name.clone(), SymbolKind::Struct, type_id, 0);
            let symbol_id = self.module.symbols.alloc(symbol);
            let global = self.module.global;
            self.module
                .block_mut(global)
                .symbols
                .insert(name.clone(), symbol_id);
        }
        Ok(())
    }

    fn gen_struct(&mut self, name: &str, fields: &[StructField]) -> Result<(), PicoError> {
        let symbol_id = self
            .module
            .resolve_local(self.module.global, name)
            .expect("struct symbol reserved in pre-pass");
        let struct_type = self.module.symbols.get(symbol_id).type_id;

        let mut field_symbols: Vec<SymbolId> = Vec::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            if field_symbols
                .iter()
                .any(|&id| self.module.symbols.get(id).name == field.name)
            {
                return Err(PicoError::semantic(
                    format!("duplicate field '{}' in struct '{}'", field.name, name),
                    field.token.clone(),
                ));
            }
            let field_type = self.transform_type(&field.ty)?;
            let mut symbol = Symbol::new(field.name.clone(), SymbolKind::StructField, field_type, 0);
            symbol.field_index = index;
            field_symbols.push(self.module.symbols.alloc(symbol));
        }

        self.registry.complete_struct(struct_type, field_symbols.clone());
        self.module.symbols.get_mut(symbol_id).fields = field_symbols;
        Ok(())
    }

    fn gen_function(&mut self, proto: &Prototype, body: Option<&Stmt>) -> Result<(), PicoError> {
        self.begin_scope();
        let result = self.gen_function_inner(proto, body);
        self.end_scope();
        result
    }

    fn gen_function_inner(&mut self, proto: &Prototype, body: Option<&Stmt>) -> Result<(), PicoError> {
        let (func_symbol, param_symbols) = self.gen_prototype(proto, body.is_some())?;
        let Some(body) = body else {
            return Ok(());
        };

        let function_id = self.next_function_id;
        self.next_function_id += 1;
        self.module.symbols.get_mut(func_symbol).function_id = function_id;

        let block = HirBlock::new(
            proto.name.clone(),
            BlockTag::Function,
            BlockKind::Function {
                symbol: func_symbol,
                function_id,
                local_count: param_symbols.len(),
                param_count: param_symbols.len(),
            },
            self.scope_depth,
            Some(self.module.global),
        );
        let block_id = self.module.add_block(block);
        self.current_block = block_id;
        self.local_counter = param_symbols.len();

        for (offset, &param) in param_symbols.iter().enumerate() {
            self.module.symbols.get_mut(param).local_offset = offset;
            let name = self.module.symbols.get(param).name.clone();
            self.module.block_mut(block_id).symbols.insert(name, param);
        }

        self.gen_stmt(body)?;

        if let BlockKind::Function { local_count, .. } = &mut self.module.block_mut(block_id).kind {
            *local_count = self.local_counter;
        }

        let global = self.module.global;
        self.module
            .block_mut(global)
            .nodes
            .push(HirNode::new(proto.token.clone(), HirNodeKind::Block(block_id)));
        self.current_block = global;
        Ok(())
    }

    /// Resolve a prototype's types, intern the function type, and check
    /// it against any previous declaration of the same name.
    fn gen_prototype(
        &mut self,
        proto: &Prototype,
        has_body: bool,
    ) -> Result<(SymbolId, Vec<SymbolId>), PicoError> {
        let return_type = self.transform_type(&proto.return_type)?;
        let mut param_symbols = Vec::with_capacity(proto.params.len());
        let mut param_types = Vec::with_capacity(proto.params.len());
        for param in &proto.params {
            let param_type = self.transform_type(&param.ty)?;
            let symbol = Symbol::new(
                param.name.clone(),
                SymbolKind::Parameter,
                param_type,
                self.scope_depth,
            );
            param_symbols.push(self.module.symbols.alloc(symbol));
            param_types.push(param_type);
        }
        let func_type = self.registry.add_function(return_type, param_types);

        let mut already_defined = false;
        if let Some(old_id) = self.module.resolve_local(self.module.global, &proto.name) {
            let old = self.module.symbols.get(old_id);
            if old.kind != SymbolKind::Function {
                return Err(PicoError::semantic(
                    format!("redefinition of '{}'", proto.name),
                    proto.name_token.clone(),
                ));
            }
            if old.type_id != func_type {
                return Err(PicoError::semantic(
                    format!("incompatible declarations of function '{}'", proto.name),
                    proto.name_token.clone(),
                ));
            }
            already_defined = old.is_defined;
            if already_defined && has_body {
                return Err(PicoError::semantic(
                    format!("function '{}' already defined", proto.name),
                    proto.name_token.clone(),
                ));
            }
        }

        let mut symbol = Symbol::new(proto.name.clone(), SymbolKind::Function, func_type, 0);
        symbol.params = param_symbols.clone();
        symbol.is_defined = already_defined || has_body;
        let symbol_id = self.module.symbols.alloc(symbol);
        let global = self.module.global;
        self.module
            .block_mut(global)
            .symbols
            .insert(proto.name.clone(), symbol_id);
        Ok((symbol_id, param_symbols))
    }

    /// Lower an extern lib block: a module-tagged block holding one
    /// external `Function` symbol per prototype, wrapped by a `Module`
    /// symbol in the global scope whose `block_ref` points back at it.
    fn gen_extern(
        &mut self,
        token: &Token,
        module_name: &str,
        lib_name: &str,
        protos: &[Prototype],
    ) -> Result<(), PicoError> {
        if self.module.resolve_local(self.module.global, module_name).is_some() {
            return Err(PicoError::semantic(
                format!("duplicate declaration of '{}'", module_name),
                token.clone(),
            ));
        }

        let block = HirBlock::new(
            module_name,
            BlockTag::Module,
            BlockKind::ExternLib { symbol: 0 },
            self.scope_depth,
            Some(self.module.global),
        );
        let block_id = self.module.add_block(block);

        for proto in protos {
            let return_type = self.transform_type(&proto.return_type)?;
            let mut param_symbols = Vec::with_capacity(proto.params.len());
            let mut param_types = Vec::with_capacity(proto.params.len());
            for param in &proto.params {
                let param_type = self.transform_type(&param.ty)?;
                let symbol = Symbol::new(param.name.clone(), SymbolKind::Parameter, param_type, 0);
                param_symbols.push(self.module.symbols.alloc(symbol));
                param_types.push(param_type);
            }
            let func_type = self.registry.add_function(return_type, param_types);

            if self.module.resolve_local(block_id, &proto.name).is_some() {
                return Err(PicoError::semantic(
                    format!("duplicate extern function '{}'", proto.name),
                    proto.name_token.clone(),
                ));
            }

            let mut symbol = Symbol::new(proto.name.clone(), SymbolKind::Function, func_type, 0);
            symbol.linkage = Linkage::External;
            symbol.lib_prefix = Some(lib_name.to_string());
            symbol.params = param_symbols;
            let symbol_id = self.module.symbols.alloc(symbol);
            self.module
                .block_mut(block_id)
                .symbols
                .insert(proto.name.clone(), symbol_id);
        }

        let mut module_symbol = Symbol::new(module_name, SymbolKind::Module, 0, 0);
        module_symbol.block_ref = Some(block_id);
        module_symbol.lib_prefix = Some(lib_name.to_string());
        let module_symbol_id = self.module.symbols.alloc(module_symbol);
        if let BlockKind::ExternLib { symbol } = &mut self.module.block_mut(block_id).kind {
            *symbol = module_symbol_id;
        }
        let global = self.module.global;
        self.module
            .block_mut(global)
            .symbols
            .insert(module_name.to_string(), module_symbol_id);
        self.module
            .block_mut(global)
            .nodes
            .push(HirNode::new(token.clone(), HirNodeKind::Block(block_id)));
        Ok(())
    }

    fn transform_type(&mut self, ty: &TypeExpr) -> Result<TypeId, PicoError> {
        let id = match ty.name.as_str() {
            "void" => TypeRegistry::VOID,
            "bool" => TypeRegistry::BOOL,
            "int" => TypeRegistry::INT,
            "long" => TypeRegistry::LONG,
            "str" => TypeRegistry::STR,
            _ => {
                let symbol_id = self
                    .module
                    .resolve(self.module.global, &ty.name)
                    .ok_or_else(|| {
                        PicoError::semantic(
                            format!("unknown type '{}'", ty.name),
                            ty.token.clone(),
                        )
                    })?;
                let symbol = self.module.symbols.get(symbol_id);
                if symbol.kind != SymbolKind::Struct {
                    return Err(PicoError::semantic(
                        format!("unknown type '{}'", ty.name),
                        ty.token.clone(),
                    ));
                }
                symbol.type_id
            }
        };
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn push_node(&mut self, node: HirNode) {
        self.module.block_mut(self.current_block).nodes.push(node);
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), PicoError> {
        match stmt {
            Stmt::Block { token, stmts } => {
                self.begin_scope();
                let label = self.labels.temp();
                let block = HirBlock::new(
                    label,
                    BlockTag::Local,
                    BlockKind::Plain,
                    self.scope_depth,
                    Some(self.current_block),
                );
                let block_id = self.module.add_block(block);
                self.push_node(HirNode::new(token.clone(), HirNodeKind::Block(block_id)));
                let prev = self.current_block;
                self.current_block = block_id;
                for stmt in stmts {
                    self.gen_stmt(stmt)?;
                }
                self.current_block = prev;
                self.end_scope();
                Ok(())
            }
            Stmt::If { token, cond, then_block, else_block } => {
                self.gen_branch(token, cond, then_block, else_block.as_deref())
            }
            Stmt::Loop { token, body } => self.gen_loop(token, body),
            Stmt::While { token, cond, body } => self.gen_while(token, cond, body),
            Stmt::Return { token, expr } => {
                let value = expr.as_ref().map(|e| self.gen_expr(e)).transpose()?;
                self.push_node(HirNode::new(
                    token.clone(),
                    HirNodeKind::Return {
                        expr: value.map(Box::new),
                    },
                ));
                Ok(())
            }
            Stmt::Break { token } => {
                let Some(&loop_id) = self.loop_stack.last() else {
                    return Err(PicoError::semantic("'break' outside of a loop", token.clone()));
                };
                self.push_node(HirNode::new(token.clone(), HirNodeKind::Break { loop_id }));
                Ok(())
            }
            Stmt::Continue { token } => {
                let Some(&loop_id) = self.loop_stack.last() else {
                    return Err(PicoError::semantic(
                        "'continue' outside of a loop",
                        token.clone(),
                    ));
                };
                self.push_node(HirNode::new(token.clone(), HirNodeKind::Continue { loop_id }));
                Ok(())
            }
            Stmt::Log { token, expr } => {
                let value = self.gen_expr(expr)?;
                self.push_node(HirNode::new(
                    token.clone(),
                    HirNodeKind::Log {
                        expr: Box::new(value),
                    },
                ));
                Ok(())
            }
            Stmt::Let { token, name, name_token, ty, init } => {
                self.gen_let(token, name, name_token, ty.as_ref(), init.as_ref())
            }
            Stmt::Expr { expr, .. } => {
                let node = self.gen_expr(expr)?;
                self.push_node(node);
                Ok(())
            }
        }
    }

    fn gen_let(
        &mut self,
        token: &Token,
        name: &str,
        name_token: &Token,
        ty: Option<&TypeExpr>,
        init: Option<&Expr>,
    ) -> Result<(), PicoError> {
        if self.module.resolve_local(self.current_block, name).is_some() {
            return Err(PicoError::semantic(
                format!("duplicate declaration of '{}'", name),
                name_token.clone(),
            ));
        }

        let mut symbol = Symbol::new(name, SymbolKind::Variable, TypeRegistry::NONE, self.scope_depth);
        symbol.pending_type = ty.cloned();
        symbol.local_offset = self.local_counter;
        self.local_counter += 1;
        let symbol_id = self.module.symbols.alloc(symbol);
        self.module
            .block_mut(self.current_block)
            .symbols
            .insert(name.to_string(), symbol_id);

        if let Some(init) = init {
            let value = self.gen_expr(init)?;
            self.push_node(HirNode::new(
                token.clone(),
                HirNodeKind::StoreLocal {
                    name: name.to_string(),
                    symbol: Some(symbol_id),
                    value: Box::new(value),
                },
            ));
        }
        Ok(())
    }

    /// Lower one `if` arm into its own child block. The arm's block is
    /// referenced by the `Branch` node, not pushed into the parent's
    /// node list.
    fn gen_arm(&mut self, stmt: &Stmt) -> Result<BlockId, PicoError> {
        self.begin_scope();
        let label = self.labels.temp();
        let block = HirBlock::new(
            label,
            BlockTag::Local,
            BlockKind::Plain,
            self.scope_depth,
            Some(self.current_block),
        );
        let block_id = self.module.add_block(block);
        let prev = self.current_block;
        self.current_block = block_id;
        match stmt {
            Stmt::Block { stmts, .. } => {
                for stmt in stmts {
                    self.gen_stmt(stmt)?;
                }
            }
            // `else if` chains land here as a bare `if` statement.
            other => self.gen_stmt(other)?,
        }
        self.current_block = prev;
        self.end_scope();
        Ok(block_id)
    }

    fn gen_branch(
        &mut self,
        token: &Token,
        cond: &Expr,
        then_block: &Stmt,
        else_block: Option<&Stmt>,
    ) -> Result<(), PicoError> {
        let cond_node = self.gen_expr(cond)?;
        let then_id = self.gen_arm(then_block)?;
        let else_id = else_block.map(|stmt| self.gen_arm(stmt)).transpose()?;
        let merge_label = self.labels.next("block");
        self.push_node(HirNode::new(
            token.clone(),
            HirNodeKind::Branch {
                cond: Box::new(cond_node),
                then_block: then_id,
                else_block: else_id,
                merge_label,
            },
        ));
        Ok(())
    }

    /// Open a loop block, run `f` with the loop on the loop-id stack,
    /// then restore scope state.
    fn with_loop_block(
        &mut self,
        token: &Token,
        f: impl FnOnce(&mut Self, LoopId) -> Result<(), PicoError>,
    ) -> Result<(), PicoError> {
        self.begin_scope();
        let loop_id = self.next_loop_id;
        self.next_loop_id += 1;
        let label = self.labels.next("loop");
        let block = HirBlock::new(
            label,
            BlockTag::Local,
            BlockKind::Loop { loop_id },
            self.scope_depth,
            Some(self.current_block),
        );
        let block_id = self.module.add_block(block);
        self.push_node(HirNode::new(token.clone(), HirNodeKind::Block(block_id)));
        let prev = self.current_block;
        self.current_block = block_id;
        self.loop_stack.push(loop_id);

        let result = f(self, loop_id);

        self.loop_stack.pop();
        self.current_block = prev;
        self.end_scope();
        result
    }

    fn gen_loop(&mut self, token: &Token, body: &Stmt) -> Result<(), PicoError> {
        self.with_loop_block(token, |hirgen, _loop_id| {
            let Stmt::Block { stmts, .. } = body else {
                unreachable!("loop body is always a block");
            };
            for stmt in stmts {
                hirgen.gen_stmt(stmt)?;
            }
            Ok(())
        })
    }

    /// `while (cond) body` desugars to `loop { if (!cond) break; body }`
    /// with a synthetic break block as the branch's then-arm.
    fn gen_while(&mut self, token: &Token, cond: &Expr, body: &Stmt) -> Result<(), PicoError> {
        self.with_loop_block(token, |hirgen, loop_id| {
            let cond_token = cond.token().clone();
            let cond_node = hirgen.gen_expr(cond)?;
            let negated = HirNode::new(
                cond_token.clone(),
                HirNodeKind::Unary {
                    op: UnaryTag::Not,
                    operand: Box::new(cond_node),
                },
            );

            hirgen.begin_scope();
            let label = hirgen.labels.temp();
            let break_block = HirBlock::new(
                label,
                BlockTag::Local,
                BlockKind::Plain,
                hirgen.scope_depth,
                Some(hirgen.current_block),
            );
            let break_block_id = hirgen.module.add_block(break_block);
            hirgen
                .module
                .block_mut(break_block_id)
                .nodes
                .push(HirNode::new(cond_token.clone(), HirNodeKind::Break { loop_id }));
            hirgen.end_scope();

            let merge_label = hirgen.labels.next("block");
            hirgen.push_node(HirNode::new(
                cond_token,
                HirNodeKind::Branch {
                    cond: Box::new(negated),
                    then_block: break_block_id,
                    else_block: None,
                    merge_label,
                },
            ));

            let Stmt::Block { stmts, .. } = body else {
                unreachable!("while body is always a block");
            };
            for stmt in stmts {
                hirgen.gen_stmt(stmt)?;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn gen_expr(&mut self, expr: &Expr) -> Result<HirNode, PicoError> {
        let node = match expr {
            Expr::IntLiteral { token, value, long } => HirNode::new(
                token.clone(),
                HirNodeKind::ConstInt {
                    value: *value,
                    long: *long,
                },
            ),
            Expr::StrLiteral { token, value } => HirNode::new(
                token.clone(),
                HirNodeKind::ConstStr {
                    value: value.clone(),
                },
            ),
            Expr::BoolLiteral { token, value } => HirNode::new(
                token.clone(),
                HirNodeKind::ConstBool { value: *value },
            ),
            Expr::Identifier { token, name } => HirNode::new(
                token.clone(),
                HirNodeKind::VarRef {
                    name: name.clone(),
                    symbol: None,
                },
            ),
            Expr::Binary { token, op, lhs, rhs } => {
                let lhs = self.gen_expr(lhs)?;
                let rhs = self.gen_expr(rhs)?;
                HirNode::new(
                    token.clone(),
                    HirNodeKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                )
            }
            Expr::Unary { token, op, operand } => {
                let operand = self.gen_expr(operand)?;
                HirNode::new(
                    token.clone(),
                    HirNodeKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                )
            }
            Expr::Assignment { token, target, value } => {
                let value = self.gen_expr(value)?;
                self.gen_store(token, target, value)?
            }
            Expr::CompoundAssignment { token, op, target, value } => {
                let rhs = self.gen_expr(value)?;
                let current = self.gen_expr(target)?;
                let combined = HirNode::new(
                    token.clone(),
                    HirNodeKind::Binary {
                        op: *op,
                        lhs: Box::new(current),
                        rhs: Box::new(rhs),
                    },
                );
                self.gen_store(token, target, combined)?
            }
            Expr::Call { token, callee, args } => {
                let callee = self.gen_expr(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.gen_expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                HirNode::new(
                    token.clone(),
                    HirNodeKind::Call {
                        callee: Box::new(callee),
                        args,
                        function_symbol: None,
                    },
                )
            }
            Expr::StaticAccess { token, qualifier, name, name_token } => {
                let qualifier = self.gen_expr(qualifier)?;
                let name_ref = HirNode::new(
                    name_token.clone(),
                    HirNodeKind::VarRef {
                        name: name.clone(),
                        symbol: None,
                    },
                );
                HirNode::new(
                    token.clone(),
                    HirNodeKind::StaticAccess {
                        qualifier: Box::new(qualifier),
                        name: Box::new(name_ref),
                    },
                )
            }
            Expr::FieldAccess { token, obj, field, field_token } => {
                let obj = self.gen_expr(obj)?;
                HirNode::new(
                    token.clone(),
                    HirNodeKind::FieldAccess {
                        obj: Box::new(obj),
                        target: field.clone(),
                        target_token: field_token.clone(),
                        field_index: None,
                    },
                )
            }
            Expr::StructLiteral { token, name, name_token, fields } => {
                let name_ref = HirNode::new(
                    name_token.clone(),
                    HirNodeKind::VarRef {
                        name: name.clone(),
                        symbol: None,
                    },
                );
                let values = fields
                    .iter()
                    .map(|field| self.gen_field_value(field))
                    .collect::<Result<Vec<_>, _>>()?;
                HirNode::new(
                    token.clone(),
                    HirNodeKind::CreateStruct {
                        name: Box::new(name_ref),
                        values,
                    },
                )
            }
            Expr::Cast { token, ty, expr } => {
                let to_type = self.transform_type(ty)?;
                let inner = self.gen_expr(expr)?;
                HirNode::new(
                    token.clone(),
                    HirNodeKind::Cast {
                        expr: Box::new(inner),
                        from_type: TypeRegistry::NONE,
                        to_type,
                    },
                )
            }
        };
        Ok(node)
    }

    fn gen_field_value(&mut self, field: &FieldInit) -> Result<HirNode, PicoError> {
        let value = self.gen_expr(&field.value)?;
        Ok(HirNode::new(
            field.token.clone(),
            HirNodeKind::FieldValue {
                name: field.name.clone(),
                value: Box::new(value),
                field_index: None,
            },
        ))
    }

    /// Lower an assignment target. Stores to a plain name become
    /// `StoreLocal` (resolved late, in Sema); stores through a field
    /// access become `StoreField`.
    fn gen_store(&mut self, token: &Token, target: &Expr, value: HirNode) -> Result<HirNode, PicoError> {
        match target {
            Expr::Identifier { name, .. } => Ok(HirNode::new(
                token.clone(),
                HirNodeKind::StoreLocal {
                    name: name.clone(),
                    symbol: None,
                    value: Box::new(value),
                },
            )),
            Expr::FieldAccess { obj, field, field_token, .. } => {
                let obj = self.gen_expr(obj)?;
                Ok(HirNode::new(
                    token.clone(),
                    HirNodeKind::StoreField {
                        obj: Box::new(obj),
                        field: field.clone(),
                        field_token: field_token.clone(),
                        field_index: None,
                        value: Box::new(value),
                    },
                ))
            }
            _ => Err(PicoError::semantic(
                "invalid assignment target",
                token.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OpTag;
    use crate::parser::Parser;

    fn lower(source: &str) -> (TypeRegistry, HirModule) {
        let program = Parser::parse(source).unwrap();
        let mut registry = TypeRegistry::new();
        let module = HirGen::generate(&mut registry, &program).unwrap();
        (registry, module)
    }

    fn lower_err(source: &str) -> PicoError {
        let program = Parser::parse(source).unwrap();
        let mut registry = TypeRegistry::new();
        HirGen::generate(&mut registry, &program).unwrap_err()
    }

    fn function_block<'m>(module: &'m HirModule, name: &str) -> &'m HirBlock {
        module
            .blocks
            .iter()
            .find(|b| b.tag == BlockTag::Function && b.label == name)
            .expect("function block")
    }

    #[test]
    fn test_function_ids_are_dense_in_definition_order() {
        let (_, module) = lower("fn a()void{} fn b()void{} fn c()void{}");
        for (expected, name) in ["a", "b", "c"].iter().enumerate() {
            let block = function_block(&module, name);
            let BlockKind::Function { function_id, .. } = block.kind else {
                panic!("expected function kind");
            };
            assert_eq!(function_id as usize, expected);
        }
    }

    #[test]
    fn test_prototype_allocates_no_function_id() {
        let (_, module) = lower("fn f(int x)int; fn main()int{return f(1);}");
        let block = function_block(&module, "main");
        let BlockKind::Function { function_id, .. } = block.kind else {
            panic!("expected function kind");
        };
        assert_eq!(function_id, 0);
    }

    #[test]
    fn test_param_and_local_offsets() {
        let (_, module) = lower("fn f(int a, int b)int{let c = 1; let d = 2; return c;}");
        let block = function_block(&module, "f");
        let BlockKind::Function { local_count, param_count, .. } = block.kind else {
            panic!("expected function kind");
        };
        assert_eq!(param_count, 2);
        assert_eq!(local_count, 4);
        let a = block.symbols["a"];
        assert_eq!(module.symbols.get(a).local_offset, 0);
        let b = block.symbols["b"];
        assert_eq!(module.symbols.get(b).local_offset, 1);
    }

    #[test]
    fn test_while_desugars_to_loop_branch_break() {
        let (_, module) = lower("fn f()void{while(true){ log 1; }}");
        // find the loop block
        let loop_block = module
            .blocks
            .iter()
            .find(|b| matches!(b.kind, BlockKind::Loop { .. }))
            .expect("loop block");
        // first node is the negated-condition branch
        let HirNodeKind::Branch { cond, then_block, else_block, .. } = &loop_block.nodes[0].kind
        else {
            panic!("expected branch first in desugared while");
        };
        assert!(else_block.is_none());
        assert!(matches!(
            cond.kind,
            HirNodeKind::Unary { op: UnaryTag::Not, .. }
        ));
        // then-arm holds the synthetic break
        let break_block = module.block(*then_block);
        assert!(matches!(break_block.nodes[0].kind, HirNodeKind::Break { .. }));
        // loop body follows the branch
        assert!(matches!(loop_block.nodes[1].kind, HirNodeKind::Log { .. }));
    }

    #[test]
    fn test_break_outside_loop_fails() {
        let err = lower_err("fn f()void{break;}");
        assert!(err.message.contains("break"));
    }

    #[test]
    fn test_duplicate_let_same_scope_fails() {
        let err = lower_err("fn f()void{let x = 1; let x = 2;}");
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn test_shadowing_in_nested_block_is_allowed() {
        lower("fn f()void{let x = 1; { let x = 2; }}");
    }

    #[test]
    fn test_function_redefinition_fails() {
        let err = lower_err("fn f()void{} fn f()void{}");
        assert!(err.message.contains("already defined"));
    }

    #[test]
    fn test_incompatible_redeclaration_fails() {
        let err = lower_err("fn f(int x)int; fn f(long x)int{return 0;}");
        assert!(err.message.contains("incompatible"));
    }

    #[test]
    fn test_struct_pre_pass_allows_self_reference() {
        let (registry, module) = lower("struct Node{int value; Node next;} fn main()void{}");
        let global = module.block(module.global);
        let node_sym = module.symbols.get(global.symbols["Node"]);
        assert_eq!(node_sym.kind, SymbolKind::Struct);
        let crate::types::TypeObject::Struct { fields, is_complete } =
            registry.get(node_sym.type_id)
        else {
            panic!("expected struct type");
        };
        assert!(*is_complete);
        assert_eq!(fields.len(), 2);
        // second field refers back to the struct's own type
        assert_eq!(module.symbols.get(fields[1]).type_id, node_sym.type_id);
    }

    #[test]
    fn test_extern_block_symbols() {
        let (_, module) = lower("extern @libm=\"m\"{ fn sqrt(int x)int; } fn main()void{}");
        let global = module.block(module.global);
        let libm = module.symbols.get(global.symbols["libm"]);
        assert_eq!(libm.kind, SymbolKind::Module);
        let lib_block = module.block(libm.block_ref.unwrap());
        assert_eq!(lib_block.tag, BlockTag::Module);
        let sqrt = module.symbols.get(lib_block.symbols["sqrt"]);
        assert_eq!(sqrt.kind, SymbolKind::Function);
        assert_eq!(sqrt.linkage, Linkage::External);
        assert_eq!(sqrt.lib_prefix.as_deref(), Some("m"));
    }

    #[test]
    fn test_compound_assignment_expands_to_binary_store() {
        let (_, module) = lower("fn f()void{let x = 1; x += 2;}");
        let block = function_block(&module, "f");
        // function body is one nested block: [StoreLocal, StoreLocal(Binary)]
        let HirNodeKind::Block(body_id) = block.nodes[0].kind else {
            panic!("expected nested body block");
        };
        let body = module.block(body_id);
        let HirNodeKind::StoreLocal { value, .. } = &body.nodes[1].kind else {
            panic!("expected store for compound assignment");
        };
        assert!(matches!(
            value.kind,
            HirNodeKind::Binary { op: OpTag::Add, .. }
        ));
    }
}
