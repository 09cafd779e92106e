//! Semantic analysis.
//!
//! A single top-down traversal of the HIR. The `current_block` cursor
//! mirrors HIR-gen's scope movement so identifiers left unresolved by
//! lowering (`VarRef { symbol: None }`) can be bound here by walking
//! parent links. Typing writes `type_id` onto every expression node and
//! inserts `Cast` nodes wherever an implicit widening is required and a
//! `BoolCast` around integer branch conditions.
//!
//! Node lists are moved out of their block while being checked and put
//! back afterwards; resolution only ever reads block scope maps, so the
//! two never alias.

use tracing::debug;

use crate::ast::{TypeExpr, UnaryTag};
use crate::config::CompilerConfig;
use crate::error::PicoError;
use crate::hir::{BlockId, BlockKind, BlockTag, HirModule, HirNode, HirNodeKind};
use crate::symbol::{SymbolId, SymbolKind};
use crate::token::Token;
use crate::types::{TypeId, TypeRegistry};

pub struct Sema<'a> {
    registry: &'a mut TypeRegistry,
    hir: &'a mut HirModule,
    config: &'a CompilerConfig,
    current_block: BlockId,
    function_block: Option<BlockId>,
}

impl<'a> Sema<'a> {
    pub fn analyze(
        registry: &'a mut TypeRegistry,
        hir: &'a mut HirModule,
        config: &'a CompilerConfig,
    ) -> Result<(), PicoError> {
        let global = hir.global;
        let mut sema = Sema {
            registry,
            hir,
            config,
            current_block: global,
            function_block: None,
        };
        sema.analyze_global()?;
        debug!("semantic analysis complete");
        Ok(())
    }

    fn analyze_global(&mut self) -> Result<(), PicoError> {
        let global = self.hir.global;
        let nodes = std::mem::take(&mut self.hir.block_mut(global).nodes);
        let mut result = Ok(());
        for node in &nodes {
            let HirNodeKind::Block(block_id) = node.kind else {
                continue;
            };
            let outcome = match self.hir.block(block_id).tag {
                BlockTag::Function => self.analyze_function_block(block_id),
                BlockTag::Module => self.check_extern_block(block_id, &node.token),
                _ => Ok(()),
            };
            if let Err(err) = outcome {
                result = Err(err);
                break;
            }
        }
        self.hir.block_mut(global).nodes = nodes;
        result
    }

    fn analyze_function_block(&mut self, block_id: BlockId) -> Result<(), PicoError> {
        self.function_block = Some(block_id);
        let result = self.analyze_block(block_id);
        self.function_block = None;
        result
    }

    /// Check every node of a block with the cursor pointing at it. The
    /// node list is taken out of the arena for the duration so nodes can
    /// be mutated while scope maps are being read.
    fn analyze_block(&mut self, block_id: BlockId) -> Result<(), PicoError> {
        let prev = self.current_block;
        self.current_block = block_id;
        let mut nodes = std::mem::take(&mut self.hir.block_mut(block_id).nodes);
        let result = nodes.iter_mut().try_for_each(|node| self.analyze_stmt(node));
        self.hir.block_mut(block_id).nodes = nodes;
        self.current_block = prev;
        result
    }

    fn analyze_stmt(&mut self, node: &mut HirNode) -> Result<(), PicoError> {
        match &mut node.kind {
            HirNodeKind::Block(block_id) => {
                let block_id = *block_id;
                self.analyze_block(block_id)
            }
            HirNodeKind::Branch { .. } => self.analyze_branch(node),
            HirNodeKind::Return { .. } => self.analyze_return(node),
            HirNodeKind::Break { .. } | HirNodeKind::Continue { .. } => Ok(()),
            HirNodeKind::Log { expr } => {
                let mut expr = std::mem::replace(expr, Box::new(placeholder(&node.token)));
                self.analyze_expr(&mut expr)?;
                let HirNodeKind::Log { expr: slot } = &mut node.kind else {
                    unreachable!();
                };
                *slot = expr;
                Ok(())
            }
            _ => self.analyze_expr(node).map(|_| ()),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn analyze_branch(&mut self, node: &mut HirNode) -> Result<(), PicoError> {
        let token = node.token.clone();
        let HirNodeKind::Branch { cond, then_block, else_block, .. } = &mut node.kind else {
            unreachable!();
        };
        let then_block = *then_block;
        let else_block = *else_block;

        let mut cond_node = std::mem::replace(cond, Box::new(placeholder(&token)));
        let cond_type = self.analyze_expr(&mut cond_node)?;
        if !matches!(
            cond_type,
            TypeRegistry::BOOL | TypeRegistry::INT | TypeRegistry::LONG
        ) {
            return Err(PicoError::semantic(
                format!(
                    "condition should be of type bool or int, got {}",
                    self.registry.name(cond_type)
                ),
                token,
            ));
        }
        if self.registry.is_integer(cond_type) {
            cond_node = Box::new(bool_cast(*cond_node));
        }
        let HirNodeKind::Branch { cond: slot, .. } = &mut node.kind else {
            unreachable!();
        };
        *slot = cond_node;

        self.analyze_block(then_block)?;
        if let Some(else_block) = else_block {
            self.analyze_block(else_block)?;
        }
        Ok(())
    }

    fn analyze_return(&mut self, node: &mut HirNode) -> Result<(), PicoError> {
        let function_block = self
            .function_block
            .expect("return outside of a function block");
        let BlockKind::Function { symbol, .. } = self.hir.block(function_block).kind else {
            unreachable!();
        };
        let func_type = self.hir.symbols.get(symbol).type_id;
        let ret_type = self.registry.ret_type(func_type);

        let token = node.token.clone();
        let HirNodeKind::Return { expr } = &mut node.kind else {
            unreachable!();
        };

        let Some(expr) = expr else {
            node.type_id = TypeRegistry::VOID;
            return Ok(());
        };

        let mut value = std::mem::replace(expr, Box::new(placeholder(&token)));
        let value_type = self.analyze_expr(&mut value)?;
        let result_type = self.registry.get_assignment_type(ret_type, value_type);
        if result_type == TypeRegistry::NONE {
            return Err(PicoError::semantic(
                format!(
                    "return type mismatch: expected {}, got {}",
                    self.registry.name(ret_type),
                    self.registry.name(value_type)
                ),
                token,
            ));
        }
        if value_type != result_type {
            value = Box::new(cast(*value, value_type, result_type));
        }
        let HirNodeKind::Return { expr } = &mut node.kind else {
            unreachable!();
        };
        *expr = Some(value);
        node.type_id = result_type;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn analyze_expr(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let type_id = match &mut node.kind {
            HirNodeKind::ConstInt { long, .. } => {
                if *long {
                    TypeRegistry::LONG
                } else {
                    TypeRegistry::INT
                }
            }
            HirNodeKind::ConstStr { .. } => TypeRegistry::STR,
            HirNodeKind::ConstBool { .. } => TypeRegistry::BOOL,
            HirNodeKind::VarRef { .. } => self.analyze_var_ref(node)?,
            HirNodeKind::Binary { .. } => self.analyze_binary(node)?,
            HirNodeKind::Unary { .. } => self.analyze_unary(node)?,
            HirNodeKind::StoreLocal { .. } => self.analyze_store_local(node)?,
            HirNodeKind::StoreField { .. } => self.analyze_store_field(node)?,
            HirNodeKind::Call { .. } => self.analyze_call(node)?,
            HirNodeKind::CreateStruct { .. } => self.analyze_create_struct(node)?,
            HirNodeKind::FieldAccess { .. } => self.analyze_field_access(node)?,
            HirNodeKind::Cast { .. } => self.analyze_cast(node)?,
            _ => {
                return Err(PicoError::semantic(
                    "invalid expression",
                    node.token.clone(),
                ));
            }
        };
        node.type_id = type_id;
        Ok(type_id)
    }

    fn analyze_var_ref(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::VarRef { name, symbol } = &mut node.kind else {
            unreachable!();
        };
        if symbol.is_none() {
            let resolved = self.hir.resolve(self.current_block, name).ok_or_else(|| {
                PicoError::semantic(format!("undeclared identifier '{}'", name), token)
            })?;
            *symbol = Some(resolved);
        }
        let symbol = symbol.expect("just resolved");
        self.symbol_type(symbol)
    }

    fn analyze_binary(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::Binary { op, lhs, rhs } = &mut node.kind else {
            unreachable!();
        };
        let op = *op;
        let mut lhs_node = std::mem::replace(lhs, Box::new(placeholder(&token)));
        let mut rhs_node = std::mem::replace(rhs, Box::new(placeholder(&token)));
        let lhs_type = self.analyze_expr(&mut lhs_node)?;
        let rhs_type = self.analyze_expr(&mut rhs_node)?;

        let result = if op.is_logical() {
            let result = self.registry.get_logical_type(lhs_type, rhs_type);
            if result == TypeRegistry::NONE {
                return Err(PicoError::semantic(
                    format!(
                        "both operands of '{:?}' must be bool, got {} and {}",
                        op,
                        self.registry.name(lhs_type),
                        self.registry.name(rhs_type)
                    ),
                    token,
                ));
            }
            result
        } else if op.is_comparison() {
            let result = self.registry.get_comparison_type(lhs_type, rhs_type);
            if result == TypeRegistry::NONE {
                return Err(PicoError::semantic(
                    format!(
                        "cannot compare {} and {}",
                        self.registry.name(lhs_type),
                        self.registry.name(rhs_type)
                    ),
                    token,
                ));
            }
            result
        } else {
            let result = self.registry.get_arithmetic_type(lhs_type, rhs_type);
            if result == TypeRegistry::NONE {
                return Err(PicoError::semantic(
                    format!(
                        "cannot perform '{:?}' on incompatible types {} and {}",
                        op,
                        self.registry.name(lhs_type),
                        self.registry.name(rhs_type)
                    ),
                    token,
                ));
            }
            if lhs_type != result {
                lhs_node = Box::new(cast(*lhs_node, lhs_type, result));
            }
            if rhs_type != result {
                rhs_node = Box::new(cast(*rhs_node, rhs_type, result));
            }
            result
        };

        let HirNodeKind::Binary { lhs, rhs, .. } = &mut node.kind else {
            unreachable!();
        };
        *lhs = lhs_node;
        *rhs = rhs_node;
        Ok(result)
    }

    /// `!` accepts bool directly and wraps integers in a truthiness
    /// cast, mirroring branch conditions (the `while` desugaring relies
    /// on this). Inc/dec require an integer-typed variable or field.
    fn analyze_unary(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::Unary { op, operand } = &mut node.kind else {
            unreachable!();
        };
        let op = *op;
        let mut operand_node = std::mem::replace(operand, Box::new(placeholder(&token)));
        let operand_type = self.analyze_expr(&mut operand_node)?;

        let result = match op {
            UnaryTag::Not => {
                if operand_type == TypeRegistry::BOOL {
                    // nothing to insert
                } else if self.registry.is_integer(operand_type) {
                    operand_node = Box::new(bool_cast(*operand_node));
                } else {
                    return Err(PicoError::semantic(
                        format!(
                            "operand of '!' must be bool or integer, got {}",
                            self.registry.name(operand_type)
                        ),
                        token,
                    ));
                }
                TypeRegistry::BOOL
            }
            UnaryTag::PreInc | UnaryTag::PreDec | UnaryTag::PostInc | UnaryTag::PostDec => {
                if !matches!(
                    operand_node.kind,
                    HirNodeKind::VarRef { .. } | HirNodeKind::FieldAccess { .. }
                ) {
                    return Err(PicoError::semantic(
                        "increment target must be a variable or field",
                        token,
                    ));
                }
                if !self.registry.is_integer(operand_type) {
                    return Err(PicoError::semantic(
                        format!(
                            "increment target must be an integer, got {}",
                            self.registry.name(operand_type)
                        ),
                        token,
                    ));
                }
                operand_type
            }
        };

        let HirNodeKind::Unary { operand, .. } = &mut node.kind else {
            unreachable!();
        };
        *operand = operand_node;
        Ok(result)
    }

    fn analyze_store_local(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::StoreLocal { name, symbol, value } = &mut node.kind else {
            unreachable!();
        };
        if symbol.is_none() {
            let resolved = self.hir.resolve(self.current_block, name).ok_or_else(|| {
                PicoError::semantic(format!("undeclared identifier '{}'", name), token.clone())
            })?;
            *symbol = Some(resolved);
        }
        let symbol = symbol.expect("just resolved");

        let mut value_node = std::mem::replace(value, Box::new(placeholder(&token)));
        let value_type = self.analyze_expr(&mut value_node)?;
        let declared = self.symbol_type(symbol)?;

        let result = if declared == TypeRegistry::NONE {
            // inferred `let`: the symbol adopts the type of its first store
            self.hir.symbols.get_mut(symbol).type_id = value_type;
            value_type
        } else {
            let result = self.registry.get_assignment_type(declared, value_type);
            if result == TypeRegistry::NONE {
                return Err(PicoError::semantic(
                    format!(
                        "cannot assign {} to {}",
                        self.registry.name(value_type),
                        self.registry.name(declared)
                    ),
                    token,
                ));
            }
            if value_type != result {
                value_node = Box::new(cast(*value_node, value_type, result));
            }
            result
        };

        let HirNodeKind::StoreLocal { value, .. } = &mut node.kind else {
            unreachable!();
        };
        *value = value_node;
        Ok(result)
    }

    fn analyze_store_field(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::StoreField { obj, field, field_token, .. } = &mut node.kind else {
            unreachable!();
        };
        let field = field.clone();
        let field_token = field_token.clone();
        let mut obj_node = std::mem::replace(obj, Box::new(placeholder(&token)));
        let obj_type = self.analyze_expr(&mut obj_node)?;
        let (index, field_type) = self.lookup_field(obj_type, &field, &field_token)?;

        let HirNodeKind::StoreField { obj, value, .. } = &mut node.kind else {
            unreachable!();
        };
        *obj = obj_node;
        let mut value_node = std::mem::replace(value, Box::new(placeholder(&token)));
        let value_type = self.analyze_expr(&mut value_node)?;
        let result = self.registry.get_assignment_type(field_type, value_type);
        if result == TypeRegistry::NONE {
            return Err(PicoError::semantic(
                format!(
                    "cannot assign {} to field '{}' of type {}",
                    self.registry.name(value_type),
                    field,
                    self.registry.name(field_type)
                ),
                token,
            ));
        }
        if value_type != result {
            value_node = Box::new(cast(*value_node, value_type, result));
        }

        let HirNodeKind::StoreField { value, field_index, .. } = &mut node.kind else {
            unreachable!();
        };
        *value = value_node;
        *field_index = Some(index);
        Ok(result)
    }

    fn analyze_call(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::Call { callee, .. } = &mut node.kind else {
            unreachable!();
        };

        let function_symbol = match &mut callee.kind {
            HirNodeKind::VarRef { name, symbol } => {
                if symbol.is_none() {
                    let resolved =
                        self.hir.resolve(self.current_block, name).ok_or_else(|| {
                            PicoError::semantic(
                                format!("undeclared function '{}'", name),
                                token.clone(),
                            )
                        })?;
                    *symbol = Some(resolved);
                }
                let resolved = symbol.expect("just resolved");
                if self.hir.symbols.get(resolved).kind != SymbolKind::Function {
                    return Err(PicoError::semantic(
                        format!("'{}' is not a function", name),
                        token,
                    ));
                }
                resolved
            }
            HirNodeKind::StaticAccess { .. } => self.resolve_static_access(callee, &token)?,
            _ => {
                return Err(PicoError::semantic("uncallable expression", token));
            }
        };

        let func_symbol = self.hir.symbols.get(function_symbol);
        let params = func_symbol.params.clone();
        let return_type = self.registry.ret_type(func_symbol.type_id);
        callee.type_id = func_symbol.type_id;

        // Arguments are checked pairwise over the shorter of the two
        // lists; a length mismatch is not an error.
        let HirNodeKind::Call { args, .. } = &mut node.kind else {
            unreachable!();
        };
        let mut args_nodes = std::mem::take(args);
        for (arg, &param) in args_nodes.iter_mut().zip(params.iter()) {
            let arg_type = self.analyze_expr(arg)?;
            let param_type = self.symbol_type(param)?;
            let result = self.registry.get_assignment_type(param_type, arg_type);
            if result == TypeRegistry::NONE {
                return Err(PicoError::semantic(
                    format!(
                        "argument type mismatch: expected {}, got {}",
                        self.registry.name(param_type),
                        self.registry.name(arg_type)
                    ),
                    token,
                ));
            }
            if arg_type != result {
                wrap_cast_in_place(arg, arg_type, result);
            }
        }

        let HirNodeKind::Call { args, function_symbol: slot, .. } = &mut node.kind else {
            unreachable!();
        };
        *args = args_nodes;
        *slot = Some(function_symbol);
        Ok(return_type)
    }

    /// Resolve `qualifier::name` on a call's callee: the qualifier must
    /// be a module symbol and the name must exist in the module's
    /// extern block.
    fn resolve_static_access(
        &mut self,
        callee: &mut HirNode,
        token: &Token,
    ) -> Result<SymbolId, PicoError> {
        let HirNodeKind::StaticAccess { qualifier, name } = &mut callee.kind else {
            unreachable!();
        };

        let HirNodeKind::VarRef { name: qual_name, symbol: qual_symbol } = &mut qualifier.kind
        else {
            return Err(PicoError::semantic("uncallable expression", token.clone()));
        };
        if qual_symbol.is_none() {
            let resolved = self.hir.resolve(self.current_block, qual_name).ok_or_else(|| {
                PicoError::semantic(
                    format!("undeclared identifier '{}'", qual_name),
                    token.clone(),
                )
            })?;
            *qual_symbol = Some(resolved);
        }
        let qual_id = qual_symbol.expect("just resolved");
        let qual = self.hir.symbols.get(qual_id);
        if qual.kind != SymbolKind::Module {
            return Err(PicoError::semantic(
                format!("'{}' is not a module", qual_name),
                token.clone(),
            ));
        }
        let block_ref = qual.block_ref.expect("module symbol carries its block");

        let HirNodeKind::VarRef { name: fn_name, symbol: fn_symbol } = &mut name.kind else {
            unreachable!("static access name is always a var ref");
        };
        if fn_symbol.is_none() {
            let resolved = self.hir.resolve_local(block_ref, fn_name).ok_or_else(|| {
                PicoError::semantic(
                    format!("undeclared function '{}'", fn_name),
                    token.clone(),
                )
            })?;
            *fn_symbol = Some(resolved);
        }
        let resolved = fn_symbol.expect("just resolved");
        name.type_id = self.hir.symbols.get(resolved).type_id;
        Ok(resolved)
    }

    fn analyze_create_struct(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::CreateStruct { name, .. } = &mut node.kind else {
            unreachable!();
        };

        let HirNodeKind::VarRef { name: struct_name, symbol } = &mut name.kind else {
            return Err(PicoError::semantic("invalid struct literal", token));
        };
        if symbol.is_none() {
            let resolved = self.hir.resolve(self.current_block, struct_name).ok_or_else(|| {
                PicoError::semantic(
                    format!("undeclared struct '{}'", struct_name),
                    token.clone(),
                )
            })?;
            *symbol = Some(resolved);
        }
        let struct_symbol_id = symbol.expect("just resolved");
        let struct_symbol = self.hir.symbols.get(struct_symbol_id);
        if struct_symbol.kind != SymbolKind::Struct {
            return Err(PicoError::semantic("invalid struct literal", token));
        }
        let struct_name = struct_symbol.name.clone();
        let struct_type = struct_symbol.type_id;
        let field_symbols = struct_symbol.fields.clone();
        name.type_id = struct_type;

        let HirNodeKind::CreateStruct { values, .. } = &mut node.kind else {
            unreachable!();
        };
        let mut value_nodes = std::mem::take(values);
        for value in value_nodes.iter_mut() {
            let value_token = value.token.clone();
            let HirNodeKind::FieldValue { name, value: inner, field_index } = &mut value.kind
            else {
                unreachable!("struct literal children are always field values");
            };
            let matched = field_symbols
                .iter()
                .map(|&id| self.hir.symbols.get(id))
                .find(|sym| sym.name == *name);
            let Some(matched) = matched else {
                return Err(PicoError::semantic(
                    format!("unknown field name '{}' in struct '{}'", name, struct_name),
                    value_token,
                ));
            };
            let field_type = matched.type_id;
            let index = matched.field_index;

            let mut inner_node = std::mem::replace(inner, Box::new(placeholder(&value_token)));
            let value_type = self.analyze_expr(&mut inner_node)?;
            let result = self.registry.get_assignment_type(field_type, value_type);
            if result == TypeRegistry::NONE {
                return Err(PicoError::semantic(
                    format!(
                        "field type mismatch: expected {}, got {}",
                        self.registry.name(field_type),
                        self.registry.name(value_type)
                    ),
                    value_token,
                ));
            }
            if value_type != result {
                inner_node = Box::new(cast(*inner_node, value_type, result));
            }
            *inner = inner_node;
            *field_index = Some(index);
            value.type_id = result;
        }

        let HirNodeKind::CreateStruct { values, .. } = &mut node.kind else {
            unreachable!();
        };
        *values = value_nodes;
        Ok(struct_type)
    }

    fn analyze_field_access(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::FieldAccess { obj, target, target_token, .. } = &mut node.kind else {
            unreachable!();
        };
        let target = target.clone();
        let target_token = target_token.clone();
        let mut obj_node = std::mem::replace(obj, Box::new(placeholder(&token)));
        let obj_type = self.analyze_expr(&mut obj_node)?;
        let (index, field_type) = self.lookup_field(obj_type, &target, &target_token)?;

        let HirNodeKind::FieldAccess { obj, field_index, .. } = &mut node.kind else {
            unreachable!();
        };
        *obj = obj_node;
        *field_index = Some(index);
        Ok(field_type)
    }

    fn analyze_cast(&mut self, node: &mut HirNode) -> Result<TypeId, PicoError> {
        let token = node.token.clone();
        let HirNodeKind::Cast { expr, to_type, .. } = &mut node.kind else {
            unreachable!();
        };
        let to_type = *to_type;
        let mut inner = std::mem::replace(expr, Box::new(placeholder(&token)));
        let from_type = self.analyze_expr(&mut inner)?;
        let result = self.registry.get_cast_type(from_type, to_type);
        if result == TypeRegistry::NONE {
            return Err(PicoError::semantic(
                format!(
                    "invalid type cast {} to {}",
                    self.registry.name(from_type),
                    self.registry.name(to_type)
                ),
                token,
            ));
        }
        let HirNodeKind::Cast { expr, from_type: slot, .. } = &mut node.kind else {
            unreachable!();
        };
        *expr = inner;
        *slot = from_type;
        Ok(to_type)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Field lookup on a struct type. The object type must be a struct
    /// that has been completed by the time it is used.
    fn lookup_field(
        &mut self,
        obj_type: TypeId,
        field: &str,
        field_token: &Token,
    ) -> Result<(usize, TypeId), PicoError> {
        let crate::types::TypeObject::Struct { fields, is_complete } = self.registry.get(obj_type)
        else {
            return Err(PicoError::semantic(
                format!(
                    "invalid field access of {}",
                    self.registry.name(obj_type)
                ),
                field_token.clone(),
            ));
        };
        if !*is_complete {
            return Err(PicoError::semantic(
                "field access on incomplete struct",
                field_token.clone(),
            ));
        }
        let fields = fields.clone();
        for id in fields {
            let symbol = self.hir.symbols.get(id);
            if symbol.name == field {
                return Ok((symbol.field_index, symbol.type_id));
            }
        }
        Err(PicoError::semantic(
            format!("unknown field '{}'", field),
            field_token.clone(),
        ))
    }

    /// A symbol's type id, converting a still-unresolved declared type
    /// in place on first use.
    fn symbol_type(&mut self, symbol: SymbolId) -> Result<TypeId, PicoError> {
        if let Some(pending) = self.hir.symbols.get(symbol).pending_type.clone() {
            let resolved = self.transform_type(&pending)?;
            let entry = self.hir.symbols.get_mut(symbol);
            entry.type_id = resolved;
            entry.pending_type = None;
        }
        Ok(self.hir.symbols.get(symbol).type_id)
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
                    .hir
                    .resolve(self.hir.global, &ty.name)
                    .ok_or_else(|| {
                        PicoError::semantic(
                            format!("unknown type '{}'", ty.name),
                            ty.token.clone(),
                        )
                    })?;
                let symbol = self.hir.symbols.get(symbol_id);
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

    /// Validate an extern block against the configured manifests. With
    /// no manifests loaded, extern blocks are accepted as written.
    fn check_extern_block(&mut self, block_id: BlockId, token: &Token) -> Result<(), PicoError> {
        if self.config.extern_manifests.is_empty() {
            return Ok(());
        }
        let BlockKind::ExternLib { symbol } = self.hir.block(block_id).kind else {
            unreachable!();
        };
        let lib_name = self
            .hir
            .symbols
            .get(symbol)
            .lib_prefix
            .clone()
            .expect("extern module symbol carries its library name");
        let Some(manifest) = self.config.manifest_for(&lib_name) else {
            return Err(PicoError::semantic(
                format!("no extern manifest declares library '{}'", lib_name),
                token.clone(),
            ));
        };

        let function_ids: Vec<SymbolId> =
            self.hir.block(block_id).symbols.values().copied().collect();
        for id in function_ids {
            let symbol = self.hir.symbols.get(id);
            let Some(declared) = manifest.function(&symbol.name) else {
                return Err(PicoError::semantic(
                    format!(
                        "library '{}' has no function '{}'",
                        lib_name, symbol.name
                    ),
                    token.clone(),
                ));
            };
            let param_names: Vec<&str> = symbol
                .params
                .iter()
                .map(|&p| self.registry.name(self.hir.symbols.get(p).type_id))
                .collect();
            let manifest_params: Vec<&str> =
                declared.params.iter().map(String::as_str).collect();
            let ret_name = self.registry.name(self.registry.ret_type(symbol.type_id));
            if param_names != manifest_params || ret_name != declared.returns {
                return Err(PicoError::semantic(
                    format!(
                        "extern function '{}::{}' does not match its manifest signature",
                        lib_name, symbol.name
                    ),
                    token.clone(),
                ));
            }
        }
        Ok(())
    }
}

/// Inert node used to temporarily fill a slot while its contents are
/// being rewritten.
fn placeholder(token: &Token) -> HirNode {
    HirNode::new(token.clone(), HirNodeKind::ConstBool { value: false })
}

/// Build a typed `Cast` wrapper around an expression.
fn cast(expr: HirNode, from: TypeId, to: TypeId) -> HirNode {
    let token = expr.token.clone();
    let mut node = HirNode::new(
        token,
        HirNodeKind::Cast {
            expr: Box::new(expr),
            from_type: from,
            to_type: to,
        },
    );
    node.type_id = to;
    node
}

fn wrap_cast_in_place(slot: &mut HirNode, from: TypeId, to: TypeId) {
    let token = slot.token.clone();
    let inner = std::mem::replace(slot, placeholder(&token));
    *slot = cast(inner, from, to);
}

/// Build a truthiness wrapper (`nonzero == true`) around an integer
/// expression.
fn bool_cast(expr: HirNode) -> HirNode {
    let token = expr.token.clone();
    let mut node = HirNode::new(
        token,
        HirNodeKind::BoolCast {
            expr: Box::new(expr),
        },
    );
    node.type_id = TypeRegistry::BOOL;
    node
}
