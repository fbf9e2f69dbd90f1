//! AST→IR translation.
//!
//! Consumes one analyzed translation unit and produces an [`IrModule`].
//! Expressions become stack sequences (lvalue-then-load for reads,
//! value-then-address-then-store for writes), statements become structured
//! jumps over the flat code vector, and flow-control points from the
//! analyzer are bound to instruction indices as their statements are
//! reached.

mod expr;
mod initializer;

pub use self::initializer::{encode_f80, static_image};

use super::{
    AsmTemplate, FunctionId, IrFunction, IrModule, IrOp, LocalDecl, LocalId,
};
use crate::ast::{
    Arena, Category, Initializer, NodeId, NodeKind, StorageClass, TempId,
};
use crate::result::{Error, Result};
use crate::sema::flow::{FlowStructure, PointId};
use crate::sema::scope::{Linkage, ScopedIdentifier, SymbolId};
use crate::sema::AnalysisArtifacts;
use crate::target::TypeTraits;
use crate::types::{type_layout, Type, TypeBundle, TypeId};
use log::debug;
use rustc_hash::FxHashMap;

/// Translate an analyzed translation unit rooted at `root`.
pub fn translate_unit(
    arena: &Arena,
    bundle: &mut TypeBundle,
    traits: &TypeTraits,
    artifacts: &AnalysisArtifacts,
    root: NodeId,
) -> Result<IrModule> {
    let mut translator = Translator {
        arena,
        bundle,
        traits,
        artifacts,
        module: IrModule::new(),
        synthetic_points: artifacts.flow.point_count(),
    };
    let NodeKind::TranslationUnit { items } = &arena.node(root).kind else {
        return Err(Error::InvalidParameter("expected a translation unit root"));
    };
    for &item in items {
        translator.translate_item(item)?;
    }
    Ok(translator.module)
}

pub(crate) struct Translator<'a> {
    pub(crate) arena: &'a Arena,
    pub(crate) bundle: &'a mut TypeBundle,
    pub(crate) traits: &'a TypeTraits,
    pub(crate) artifacts: &'a AnalysisArtifacts,
    pub(crate) module: IrModule,
    synthetic_points: usize,
}

impl Translator<'_> {
    fn translate_item(&mut self, item: NodeId) -> Result<()> {
        match &self.arena.node(item).kind {
            NodeKind::FunctionDefinition { .. } => {
                self.translate_function(item)?;
            }
            NodeKind::Declaration { declarators } => {
                for declarator in declarators.clone() {
                    self.translate_global_declarator(declarator)?;
                }
            }
            NodeKind::StaticAssertion { .. } => {}
            NodeKind::InlineAssemblyStatement(asm) => {
                self.module.asm_templates.push(AsmTemplate {
                    template: asm.template.clone(),
                    outputs: 0,
                    inputs: 0,
                    clobbers: asm.clobbers.clone(),
                });
            }
            _ => {
                return Err(Error::Internal("unexpected external item kind"));
            }
        }
        Ok(())
    }

    fn translate_global_declarator(&mut self, declarator: NodeId) -> Result<()> {
        let NodeKind::InitDeclarator {
            name,
            storage,
            initializer,
            ..
        } = self.arena.node(declarator).kind.clone()
        else {
            return Err(Error::Internal("expected an init-declarator"));
        };
        let props = self.arena.props(declarator);
        let ty = props.ty.ok_or(Error::Internal("untyped declarator"))?;
        let Some(name) = name else { return Ok(()) };
        if storage == StorageClass::Typedef {
            return Ok(());
        }
        if self.bundle.is_function(ty) {
            if storage != StorageClass::Static {
                self.module.declare_external(&name);
            }
            return Ok(());
        }
        if storage == StorageClass::Extern && initializer.is_none() {
            self.module.declare_external(&name);
            return Ok(());
        }
        let layout = type_layout(self.bundle, self.traits, ty)?;
        let image = match initializer {
            Some(ref init) => Some(initializer::static_image(
                self.arena,
                self.bundle,
                self.traits,
                ty,
                init,
            )?),
            None => None,
        };
        self.module.globals.push(super::GlobalData {
            name,
            ty,
            size: layout.size,
            alignment: layout.alignment,
            internal: storage == StorageClass::Static,
            image,
        });
        Ok(())
    }

    fn translate_function(&mut self, definition: NodeId) -> Result<FunctionId> {
        let NodeKind::FunctionDefinition {
            name,
            ty,
            storage,
            body,
            ..
        } = self.arena.node(definition).kind.clone()
        else {
            return Err(Error::Internal("expected a function definition"));
        };
        debug!("translating function {name}");
        let function_ty = match self.bundle.get(self.bundle.unqualified(ty)) {
            Type::Function(function_ty) => function_ty.clone(),
            _ => return Err(Error::Internal("function definition without function type")),
        };
        let mut ctx = FunctionCtx {
            func: IrFunction {
                name: name.clone(),
                ty,
                parameters: Vec::new(),
                locals: crate::entity::PrimaryMap::new(),
                code: Vec::new(),
                source_map: Vec::new(),
                internal: storage == StorageClass::Static,
                variadic: function_ty.ellipsis,
            },
            locals_by_symbol: FxHashMap::default(),
            locals_by_temp: FxHashMap::default(),
            point_offsets: FxHashMap::default(),
            pending_jumps: Vec::new(),
        };
        let parameters = self
            .artifacts
            .parameter_symbols
            .get(&definition)
            .cloned()
            .unwrap_or_default();
        for symbol in parameters {
            let parameter_ty = match &self.artifacts.scopes.entry(symbol).identifier {
                ScopedIdentifier::Object { ty, .. } => *ty,
                _ => return Err(Error::Internal("parameter entry is not an object")),
            };
            let local = self.allocate_local(&mut ctx, parameter_ty, Some(symbol))?;
            ctx.func.parameters.push(local);
        }
        self.translate_statement(&mut ctx, body)?;
        // Fall off the end of a function body.
        ctx.func.code.push(IrOp::ReturnVoid);
        self.patch_jumps(&mut ctx)?;
        Ok(self.module.functions.push(ctx.func))
    }

    pub(crate) fn allocate_local(
        &mut self,
        ctx: &mut FunctionCtx,
        ty: TypeId,
        symbol: Option<SymbolId>,
    ) -> Result<LocalId> {
        let layout = type_layout(self.bundle, self.traits, ty)?;
        let local = ctx.func.locals.push(LocalDecl {
            size: layout.size,
            alignment: layout.alignment,
            ty: Some(ty),
        });
        if let Some(symbol) = symbol {
            ctx.locals_by_symbol.insert(symbol, local);
        }
        Ok(local)
    }

    pub(crate) fn scratch_local(
        &mut self,
        ctx: &mut FunctionCtx,
        size: u64,
        alignment: u64,
    ) -> LocalId {
        ctx.func.locals.push(LocalDecl {
            size,
            alignment,
            ty: None,
        })
    }

    pub(crate) fn temp_local(&mut self, ctx: &mut FunctionCtx, temp: TempId, ty: TypeId) -> Result<LocalId> {
        if let Some(&local) = ctx.locals_by_temp.get(&temp) {
            return Ok(local);
        }
        let local = self.allocate_local(ctx, ty, None)?;
        ctx.locals_by_temp.insert(temp, local);
        Ok(local)
    }

    pub(crate) fn bind_point(&mut self, ctx: &mut FunctionCtx, point: PointId) {
        let offset = ctx.func.code.len();
        ctx.point_offsets.insert(point, offset);
    }

    pub(crate) fn jump_to_point(&mut self, ctx: &mut FunctionCtx, point: PointId) {
        ctx.pending_jumps.push((ctx.func.code.len(), point));
        ctx.func.code.push(IrOp::Jump(usize::MAX));
    }

    pub(crate) fn branch_zero_to_point(&mut self, ctx: &mut FunctionCtx, point: PointId) {
        ctx.pending_jumps.push((ctx.func.code.len(), point));
        ctx.func.code.push(IrOp::BranchZero(usize::MAX));
    }

    pub(crate) fn branch_nonzero_to_point(&mut self, ctx: &mut FunctionCtx, point: PointId) {
        ctx.pending_jumps.push((ctx.func.code.len(), point));
        ctx.func.code.push(IrOp::BranchNonZero(usize::MAX));
    }

    fn patch_jumps(&mut self, ctx: &mut FunctionCtx) -> Result<()> {
        for &(offset, point) in &ctx.pending_jumps {
            let target = *ctx
                .point_offsets
                .get(&point)
                .ok_or(Error::Internal("unbound flow-control point"))?;
            match &mut ctx.func.code[offset] {
                IrOp::Jump(t) | IrOp::BranchZero(t) | IrOp::BranchNonZero(t) => *t = target,
                _ => return Err(Error::Internal("jump patch target is not a branch")),
            }
        }
        ctx.pending_jumps.clear();
        Ok(())
    }

    fn translate_statement(&mut self, ctx: &mut FunctionCtx, statement: NodeId) -> Result<()> {
        let location = self.arena.node(statement).location;
        if !location.is_unknown() {
            ctx.func.source_map.push((ctx.func.code.len(), location));
        }
        match self.arena.node(statement).kind.clone() {
            NodeKind::ExpressionStatement { expression } => {
                if let Some(expression) = expression {
                    let pushes = self.translate_expr_value(ctx, expression)?;
                    if pushes {
                        ctx.func.code.push(IrOp::Pop);
                    }
                }
            }
            NodeKind::CompoundStatement { items } => {
                for item in items {
                    match self.arena.props(item).category {
                        Category::Declaration => self.translate_block_declaration(ctx, item)?,
                        _ => self.translate_statement(ctx, item)?,
                    }
                }
            }
            NodeKind::LabeledStatement { statement: inner, .. } => {
                let point = self
                    .arena
                    .props(statement)
                    .target_point
                    .ok_or(Error::Internal("label without a flow point"))?;
                self.bind_point(ctx, point);
                self.translate_statement(ctx, inner)?;
            }
            NodeKind::CaseStatement { statement: inner, .. } => {
                let point = self
                    .arena
                    .props(statement)
                    .target_point
                    .ok_or(Error::Internal("case without a flow point"))?;
                self.bind_point(ctx, point);
                self.translate_statement(ctx, inner)?;
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let else_point = self.artifact_point();
                let end_point = self.artifact_point();
                self.translate_condition(ctx, condition)?;
                self.branch_zero_to_point(ctx, else_point);
                self.translate_statement(ctx, then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        self.jump_to_point(ctx, end_point);
                        self.bind_point(ctx, else_point);
                        self.translate_statement(ctx, else_branch)?;
                        self.bind_point(ctx, end_point);
                    }
                    None => {
                        self.bind_point(ctx, else_point);
                        self.bind_point(ctx, end_point);
                    }
                }
            }
            NodeKind::Switch {
                expression,
                statement: body,
            } => {
                self.translate_switch(ctx, statement, expression, body)?;
            }
            NodeKind::While { condition, body } => {
                let flow = self
                    .arena
                    .props(statement)
                    .flow_control
                    .ok_or(Error::Internal("loop without flow control"))?;
                let continue_point = self.artifacts.flow.continue_point(flow)?;
                let end_point = self.artifacts.flow.end_point(flow)?;
                self.bind_point(ctx, continue_point);
                self.translate_condition(ctx, condition)?;
                self.branch_zero_to_point(ctx, end_point);
                self.translate_statement(ctx, body)?;
                self.jump_to_point(ctx, continue_point);
                self.bind_point(ctx, end_point);
            }
            NodeKind::DoWhile { body, condition } => {
                let flow = self
                    .arena
                    .props(statement)
                    .flow_control
                    .ok_or(Error::Internal("loop without flow control"))?;
                let continue_point = self.artifacts.flow.continue_point(flow)?;
                let end_point = self.artifacts.flow.end_point(flow)?;
                let body_start = ctx.func.code.len();
                self.translate_statement(ctx, body)?;
                self.bind_point(ctx, continue_point);
                self.translate_condition(ctx, condition)?;
                ctx.func.code.push(IrOp::BranchNonZero(body_start));
                self.bind_point(ctx, end_point);
            }
            NodeKind::For {
                init,
                condition,
                step,
                body,
            } => {
                let flow = self
                    .arena
                    .props(statement)
                    .flow_control
                    .ok_or(Error::Internal("loop without flow control"))?;
                let continue_point = self.artifacts.flow.continue_point(flow)?;
                let end_point = self.artifacts.flow.end_point(flow)?;
                if let Some(init) = init {
                    match self.arena.props(init).category {
                        Category::Declaration => self.translate_block_declaration(ctx, init)?,
                        _ => {
                            if self.translate_expr_value(ctx, init)? {
                                ctx.func.code.push(IrOp::Pop);
                            }
                        }
                    }
                }
                let test = ctx.func.code.len();
                if let Some(condition) = condition {
                    self.translate_condition(ctx, condition)?;
                    self.branch_zero_to_point(ctx, end_point);
                }
                self.translate_statement(ctx, body)?;
                self.bind_point(ctx, continue_point);
                if let Some(step) = step {
                    if self.translate_expr_value(ctx, step)? {
                        ctx.func.code.push(IrOp::Pop);
                    }
                }
                ctx.func.code.push(IrOp::Jump(test));
                self.bind_point(ctx, end_point);
            }
            NodeKind::Goto { .. } => {
                let symbol = self
                    .arena
                    .props(statement)
                    .scoped_id
                    .ok_or(Error::Internal("goto without label entry"))?;
                let point = match &self.artifacts.scopes.entry(symbol).identifier {
                    ScopedIdentifier::Label { point: Some(point), .. } => *point,
                    _ => return Err(Error::Internal("goto target label is unresolved")),
                };
                self.jump_to_point(ctx, point);
            }
            NodeKind::Continue | NodeKind::Break => {
                let point = self
                    .arena
                    .props(statement)
                    .target_point
                    .ok_or(Error::Internal("branch without a target point"))?;
                self.jump_to_point(ctx, point);
            }
            NodeKind::Return { expression } => {
                match expression {
                    Some(expression) => {
                        let return_ty = self.function_return_type(ctx)?;
                        self.translate_expr_value(ctx, expression)?;
                        let value_ty = self
                            .arena
                            .props(expression)
                            .ty
                            .ok_or(Error::Internal("untyped return value"))?;
                        self.emit_scalar_conversion(ctx, value_ty, return_ty)?;
                        ctx.func.code.push(IrOp::Return);
                    }
                    None => ctx.func.code.push(IrOp::ReturnVoid),
                }
            }
            NodeKind::Declaration { .. } => self.translate_block_declaration(ctx, statement)?,
            NodeKind::StaticAssertion { .. } => {}
            NodeKind::InlineAssemblyStatement(asm) => {
                let template = self.module.asm_templates.push(AsmTemplate {
                    template: asm.template.clone(),
                    outputs: asm.outputs.len(),
                    inputs: asm.inputs.len(),
                    clobbers: asm.clobbers.clone(),
                });
                for input in &asm.inputs {
                    self.translate_expr_value(ctx, input.parameter)?;
                }
                for output in &asm.outputs {
                    self.translate_expr_lvalue(ctx, output.parameter)?;
                }
                ctx.func.code.push(IrOp::InlineAsm(template));
            }
            _ => return Err(Error::Internal("unexpected statement node kind")),
        }
        Ok(())
    }

    fn translate_switch(
        &mut self,
        ctx: &mut FunctionCtx,
        statement: NodeId,
        expression: NodeId,
        body: NodeId,
    ) -> Result<()> {
        let flow = self
            .arena
            .props(statement)
            .flow_control
            .ok_or(Error::Internal("switch without flow control"))?;
        let (cases, default_case, end_point) =
            match &self.artifacts.flow.structure(flow).structure {
                FlowStructure::Switch {
                    cases,
                    default_case,
                    end,
                } => (cases.clone(), *default_case, *end),
                _ => return Err(Error::Internal("switch flow mismatch")),
            };
        // The controlling value is evaluated once into a scratch slot, then
        // compared against each case label in order.
        let control_ty = self.expression_conv_type(expression)?;
        let width = self.integral_op_width(control_ty)?;
        self.translate_expr_value(ctx, expression)?;
        let control = self.scratch_local(ctx, 8, 8);
        ctx.func.code.push(IrOp::LocalAddr(control));
        ctx.func.code.push(IrOp::Store {
            width: super::OpWidth::W64,
            volatile: false,
        });
        for (&value, &point) in &cases {
            ctx.func.code.push(IrOp::LocalAddr(control));
            ctx.func.code.push(IrOp::Load {
                width: super::OpWidth::W64,
                signed: true,
                volatile: false,
            });
            ctx.func.code.push(IrOp::IntConst(value));
            ctx.func.code.push(IrOp::IntCmp {
                width,
                op: super::CmpOp::Equal,
            });
            self.branch_nonzero_to_point(ctx, point);
        }
        match default_case {
            Some(default_point) => self.jump_to_point(ctx, default_point),
            None => self.jump_to_point(ctx, end_point),
        }
        self.translate_statement(ctx, body)?;
        self.bind_point(ctx, end_point);
        Ok(())
    }

    fn translate_block_declaration(&mut self, ctx: &mut FunctionCtx, declaration: NodeId) -> Result<()> {
        let declarators: Vec<NodeId> = match &self.arena.node(declaration).kind {
            NodeKind::Declaration { declarators } => declarators.clone(),
            NodeKind::InitDeclarator { .. } => vec![declaration],
            NodeKind::StaticAssertion { .. } => return Ok(()),
            _ => return Err(Error::Internal("unexpected declaration kind in a block")),
        };
        for declarator in declarators {
            let NodeKind::InitDeclarator {
                name,
                storage,
                initializer,
                ..
            } = self.arena.node(declarator).kind.clone()
            else {
                continue;
            };
            if storage == StorageClass::Typedef {
                continue;
            }
            let props = self.arena.props(declarator);
            let ty = props.ty.ok_or(Error::Internal("untyped declarator"))?;
            let symbol = props.scoped_id;
            if self.bundle.is_function(ty) || storage == StorageClass::Extern {
                if let Some(ref name) = name {
                    self.module.declare_external(name);
                }
                continue;
            }
            if storage == StorageClass::Static {
                // Block-scope statics become internal globals with
                // function-qualified names.
                let symbol = symbol.ok_or(Error::Internal("static local without a symbol"))?;
                let layout = type_layout(self.bundle, self.traits, ty)?;
                let mangled = format!(
                    "{}.{}.{}",
                    ctx.func.name,
                    name.as_deref().unwrap_or("anon"),
                    crate::entity::EntityRef::index(symbol)
                );
                let image = match initializer {
                    Some(ref init) => Some(initializer::static_image(
                        self.arena,
                        self.bundle,
                        self.traits,
                        ty,
                        init,
                    )?),
                    None => None,
                };
                self.module.globals.push(super::GlobalData {
                    name: mangled,
                    ty,
                    size: layout.size,
                    alignment: layout.alignment,
                    internal: true,
                    image,
                });
                continue;
            }
            let local = self.allocate_local(ctx, ty, symbol)?;
            match initializer {
                Some(ref init) => {
                    self.translate_local_initializer(ctx, local, ty, init)?;
                }
                None => self.default_initialize(ctx, local, ty)?,
            }
        }
        Ok(())
    }

    /// Default initialization zeroes integer and floating scalars only.
    fn default_initialize(&mut self, ctx: &mut FunctionCtx, local: LocalId, ty: TypeId) -> Result<()> {
        if self.bundle.is_integral(ty) || self.bundle.is_pointer(ty) {
            let width = self.integral_op_width(ty).unwrap_or(super::OpWidth::W64);
            ctx.func.code.push(IrOp::IntConst(0));
            ctx.func.code.push(IrOp::LocalAddr(local));
            ctx.func.code.push(IrOp::Store {
                width,
                volatile: false,
            });
        } else if self.bundle.is_floating(ty) {
            let width = self.float_op_width(ty)?;
            match width {
                super::FloatWidth::F32 => ctx.func.code.push(IrOp::F32Const(0.0)),
                super::FloatWidth::F64 => ctx.func.code.push(IrOp::F64Const(0.0)),
                super::FloatWidth::F80 => ctx.func.code.push(IrOp::LongDoubleConst(0.0)),
            }
            ctx.func.code.push(IrOp::LocalAddr(local));
            ctx.func.code.push(IrOp::StoreFloat {
                width,
                volatile: false,
            });
        }
        Ok(())
    }

    fn translate_condition(&mut self, ctx: &mut FunctionCtx, condition: NodeId) -> Result<()> {
        self.translate_expr_value(ctx, condition)?;
        let ty = self.expression_conv_type(condition)?;
        self.emit_truth_test(ctx, ty)
    }

    /// Synthesize a flow point that exists only in the translator (if/else
    /// joins that the analyzer's tree does not name). Synthetic points use
    /// indices above the analyzer's range, so the two never collide.
    pub(crate) fn artifact_point(&mut self) -> PointId {
        let index = self.synthetic_points;
        self.synthetic_points += 1;
        <PointId as crate::entity::EntityRef>::new(index)
    }

    fn function_return_type(&self, ctx: &FunctionCtx) -> Result<TypeId> {
        match self.bundle.get(self.bundle.unqualified(ctx.func.ty)) {
            Type::Function(function) => Ok(function.return_type),
            _ => Err(Error::Internal("function without function type")),
        }
    }
}

pub(crate) struct FunctionCtx {
    pub(crate) func: IrFunction,
    pub(crate) locals_by_symbol: FxHashMap<SymbolId, LocalId>,
    pub(crate) locals_by_temp: FxHashMap<TempId, LocalId>,
    pub(crate) point_offsets: FxHashMap<PointId, usize>,
    pub(crate) pending_jumps: Vec<(usize, PointId)>,
}
