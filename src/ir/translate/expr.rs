//! Expression translation.
//!
//! Values live on the IR operand stack. Integers and pointers occupy one
//! 64-bit slot (sign- or zero-extended by their load), floating values one
//! slot of their width, and aggregates, complex values and bit-precise
//! integers wider than 64 bits are represented by their address.

use super::{FunctionCtx, Translator};
use crate::ast::{
    AssignOp, BinaryOp, BuiltinOp, ConstantClass, ConstantValue, NodeId, NodeKind, UnaryOp,
};
use crate::ir::{BitintOpKind, CmpOp, FloatWidth, IrOp, MemoryOrder, OpWidth};
use crate::result::{Error, Result};
use crate::types::{
    self, lvalue_conversion, promote, resolve_member, type_layout, usual_arithmetic_conversions,
    FloatKind, FunctionMode, Type, TypeId,
};

impl Translator<'_> {
    pub(crate) fn expression_conv_type(&mut self, node: NodeId) -> Result<TypeId> {
        let ty = self
            .arena
            .props(node)
            .ty
            .ok_or(Error::Internal("untyped expression"))?;
        Ok(lvalue_conversion(self.bundle, ty))
    }

    pub(crate) fn is_wide_bitint(&self, ty: TypeId) -> bool {
        matches!(
            self.bundle.get(self.bundle.unqualified(ty)),
            Type::BitPrecise { width, .. } if *width > 64
        )
    }

    pub(crate) fn bitint_width(&self, ty: TypeId) -> Option<u64> {
        match self.bundle.get(self.bundle.unqualified(ty)) {
            Type::BitPrecise { width, .. } => Some(*width),
            _ => None,
        }
    }

    pub(crate) fn integral_op_width(&self, ty: TypeId) -> Result<OpWidth> {
        if self.is_wide_bitint(ty) {
            return Err(Error::InvalidParameter("wide bit-precise operation width"));
        }
        if self.bundle.is_pointer(ty)
            || matches!(self.bundle.get(self.bundle.unqualified(ty)), Type::NullPointer)
        {
            return Ok(OpWidth::W64);
        }
        let layout = type_layout(self.bundle, self.traits, ty)?;
        Ok(OpWidth::from_size(layout.size))
    }

    pub(crate) fn float_op_width(&self, ty: TypeId) -> Result<FloatWidth> {
        match self.bundle.get(self.bundle.unqualified(ty)) {
            Type::Float => Ok(FloatWidth::F32),
            Type::Double => Ok(FloatWidth::F64),
            Type::LongDouble => Ok(FloatWidth::F80),
            _ => Err(Error::InvalidParameter("not a floating type")),
        }
    }

    /// Turn the scalar on top of the stack into a 0/1 truth value.
    pub(crate) fn emit_truth_test(&mut self, ctx: &mut FunctionCtx, ty: TypeId) -> Result<()> {
        if self.bundle.is_floating(ty) {
            let width = self.float_op_width(ty)?;
            match width {
                FloatWidth::F32 => ctx.func.code.push(IrOp::F32Const(0.0)),
                FloatWidth::F64 => ctx.func.code.push(IrOp::F64Const(0.0)),
                FloatWidth::F80 => ctx.func.code.push(IrOp::LongDoubleConst(0.0)),
            }
            ctx.func.code.push(IrOp::FloatCmp {
                width,
                op: CmpOp::NotEqual,
            });
            return Ok(());
        }
        if let Some(width) = self.bitint_width(ty) {
            if width > 64 {
                ctx.func.code.push(IrOp::BitintIsZero { width });
                ctx.func.code.push(IrOp::BoolNot);
                return Ok(());
            }
        }
        let width = self.integral_op_width(ty)?;
        ctx.func.code.push(IrOp::IntConst(0));
        ctx.func.code.push(IrOp::IntCmp {
            width,
            op: CmpOp::NotEqual,
        });
        Ok(())
    }

    /// Push the value of `node`; returns `false` when the expression has
    /// `void` type and pushes nothing.
    pub(crate) fn translate_expr_value(&mut self, ctx: &mut FunctionCtx, node: NodeId) -> Result<bool> {
        let props = self.arena.props(node).clone();
        let ty = props.ty.ok_or(Error::Internal("untyped expression"))?;
        // Folded constants translate directly, except aggregates and
        // wide bit-precise payloads which still need memory forms.
        // An lvalue's constant classification describes its address, not
        // the stored value, so lvalues always go through the load path.
        if props.constant != ConstantClass::None
            && !props.lvalue
            && !self.is_wide_bitint(ty)
            && !matches!(self.arena.node(node).kind, NodeKind::StringLiteral(_))
            && !self.bundle.is_aggregate(ty)
        {
            if let Some(value) = &props.constant_value {
                if self.emit_constant(ctx, value, ty)? {
                    return Ok(!self.bundle.is_void(ty));
                }
            }
        }
        match self.arena.node(node).kind.clone() {
            NodeKind::Constant(_) => {
                let value = props
                    .constant_value
                    .ok_or(Error::Internal("unanalyzed constant"))?;
                self.emit_constant_strict(ctx, &value, ty)?;
            }
            NodeKind::StringLiteral(bytes) => {
                let id = self.module.strings.intern(&bytes);
                ctx.func.code.push(IrOp::StringAddr(id));
            }
            NodeKind::Identifier(_)
            | NodeKind::StructMember { .. }
            | NodeKind::IndirectStructMember { .. }
            | NodeKind::ArraySubscript { .. } => {
                self.translate_expr_lvalue(ctx, node)?;
                self.load_from_lvalue(ctx, node)?;
            }
            NodeKind::Unary { op, operand } => {
                self.translate_unary_value(ctx, node, op, operand)?;
            }
            NodeKind::Binary { op, lhs, rhs } => {
                self.translate_binary_value(ctx, node, op, lhs, rhs)?;
            }
            NodeKind::Cast { operand, .. } => {
                let source_ty = self.expression_conv_type(operand)?;
                if self.bundle.is_void(ty) {
                    if self.translate_expr_value(ctx, operand)? {
                        ctx.func.code.push(IrOp::Pop);
                    }
                } else {
                    self.translate_expr_value(ctx, operand)?;
                    self.emit_scalar_conversion(ctx, source_ty, ty)?;
                }
            }
            NodeKind::Call { callee, arguments } => {
                self.translate_call(ctx, node, callee, &arguments)?;
            }
            NodeKind::CompoundLiteral { initializer, .. } => {
                let temp = props
                    .temporary
                    .ok_or(Error::Internal("compound literal without a temporary"))?;
                let local = self.temp_local(ctx, temp, ty)?;
                self.translate_local_initializer(ctx, local, ty, &initializer)?;
                ctx.func.code.push(IrOp::LocalAddr(local));
            }
            NodeKind::GenericSelection { .. } => {
                let selected = self.select_generic(node)?;
                return self.translate_expr_value(ctx, selected);
            }
            NodeKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let end = self.artifact_point();
                let other = self.artifact_point();
                let condition_ty = self.expression_conv_type(condition)?;
                match then_expr {
                    Some(then_expr) => {
                        self.translate_expr_value(ctx, condition)?;
                        self.emit_truth_test(ctx, condition_ty)?;
                        self.branch_zero_to_point(ctx, other);
                        self.translate_expr_value(ctx, then_expr)?;
                        let then_ty = self.expression_conv_type(then_expr)?;
                        self.emit_scalar_conversion(ctx, then_ty, ty)?;
                        self.jump_to_point(ctx, end);
                        self.bind_point(ctx, other);
                        self.translate_expr_value(ctx, else_expr)?;
                        let else_ty = self.expression_conv_type(else_expr)?;
                        self.emit_scalar_conversion(ctx, else_ty, ty)?;
                        self.bind_point(ctx, end);
                    }
                    None => {
                        // GNU a ?: b reuses the tested value.
                        self.translate_expr_value(ctx, condition)?;
                        let cond_value_ty = self.expression_conv_type(condition)?;
                        self.emit_scalar_conversion(ctx, cond_value_ty, ty)?;
                        ctx.func.code.push(IrOp::Pick(0));
                        self.emit_truth_test(ctx, ty)?;
                        self.branch_nonzero_to_point(ctx, end);
                        ctx.func.code.push(IrOp::Pop);
                        self.translate_expr_value(ctx, else_expr)?;
                        let else_ty = self.expression_conv_type(else_expr)?;
                        self.emit_scalar_conversion(ctx, else_ty, ty)?;
                        self.bind_point(ctx, end);
                    }
                }
            }
            NodeKind::Comma { expressions } => {
                let last_index = expressions.len() - 1;
                for (index, &expression) in expressions.iter().enumerate() {
                    let pushed = self.translate_expr_value(ctx, expression)?;
                    if index != last_index && pushed {
                        ctx.func.code.push(IrOp::Pop);
                    }
                }
            }
            NodeKind::Assignment { op, target, value } => {
                self.translate_assignment(ctx, op, target, value)?;
            }
            NodeKind::Builtin { builtin, arguments } => {
                self.translate_builtin(ctx, node, builtin, &arguments)?;
            }
            _ => return Err(Error::Internal("unexpected expression node kind")),
        }
        Ok(!self.bundle.is_void(ty))
    }

    fn emit_constant(
        &mut self,
        ctx: &mut FunctionCtx,
        value: &ConstantValue,
        ty: TypeId,
    ) -> Result<bool> {
        match value {
            ConstantValue::Integer(v) => {
                if self.bundle.is_floating(ty) {
                    self.push_float_constant(ctx, *v as f64, ty)?;
                } else {
                    ctx.func.code.push(IrOp::IntConst(*v));
                }
                Ok(true)
            }
            ConstantValue::Float(v) => {
                if self.bundle.is_floating(ty) {
                    self.push_float_constant(ctx, *v, ty)?;
                } else {
                    ctx.func.code.push(IrOp::IntConst(*v as i64));
                }
                Ok(true)
            }
            ConstantValue::Address { symbol, offset } => {
                ctx.func.code.push(IrOp::GlobalAddr {
                    name: symbol.clone(),
                    offset: *offset,
                });
                self.module.declare_external(symbol);
                Ok(true)
            }
            ConstantValue::StringAddress { literal, offset } => {
                let id = self.module.strings.intern(literal);
                ctx.func.code.push(IrOp::StringAddr(id));
                if *offset != 0 {
                    ctx.func.code.push(IrOp::IntConst(*offset));
                    ctx.func.code.push(IrOp::IntAdd(OpWidth::W64));
                }
                Ok(true)
            }
            ConstantValue::BigInteger(_) | ConstantValue::Complex(..) => Ok(false),
        }
    }

    fn emit_constant_strict(
        &mut self,
        ctx: &mut FunctionCtx,
        value: &ConstantValue,
        ty: TypeId,
    ) -> Result<()> {
        if self.emit_constant(ctx, value, ty)? {
            return Ok(());
        }
        match value {
            ConstantValue::BigInteger(big) => {
                let id = self.module.bigints.push(big.clone());
                ctx.func.code.push(IrOp::BigIntConst(id));
                Ok(())
            }
            _ => Err(Error::Internal("untranslatable constant payload")),
        }
    }

    fn push_float_constant(&mut self, ctx: &mut FunctionCtx, value: f64, ty: TypeId) -> Result<()> {
        match self.float_op_width(ty)? {
            FloatWidth::F32 => ctx.func.code.push(IrOp::F32Const(value as f32)),
            FloatWidth::F64 => ctx.func.code.push(IrOp::F64Const(value)),
            FloatWidth::F80 => ctx.func.code.push(IrOp::LongDoubleConst(value)),
        }
        Ok(())
    }

    /// Push the address of the lvalue designated by `node`.
    pub(crate) fn translate_expr_lvalue(&mut self, ctx: &mut FunctionCtx, node: NodeId) -> Result<()> {
        match self.arena.node(node).kind.clone() {
            NodeKind::Identifier(name) => {
                let symbol = self
                    .arena
                    .props(node)
                    .scoped_id
                    .ok_or(Error::Internal("unresolved identifier"))?;
                use crate::sema::scope::{Linkage, ScopedIdentifier};
                match &self.artifacts.scopes.entry(symbol).identifier {
                    ScopedIdentifier::Object {
                        storage, linkage, ..
                    } => {
                        let is_static_local = *storage == crate::ast::StorageClass::Static
                            && *linkage == Linkage::None;
                        let has_linkage = !matches!(linkage, Linkage::None);
                        if is_static_local {
                            let mangled = format!(
                                "{}.{}.{}",
                                ctx.func.name,
                                name,
                                crate::entity::EntityRef::index(symbol)
                            );
                            ctx.func.code.push(IrOp::GlobalAddr {
                                name: mangled,
                                offset: 0,
                            });
                        } else if has_linkage {
                            ctx.func.code.push(IrOp::GlobalAddr {
                                name: name.clone(),
                                offset: 0,
                            });
                            self.module.declare_external(&name);
                        } else {
                            let local = match ctx.locals_by_symbol.get(&symbol) {
                                Some(&local) => local,
                                None => {
                                    return Err(Error::Internal("local object without a slot"))
                                }
                            };
                            ctx.func.code.push(IrOp::LocalAddr(local));
                        }
                    }
                    ScopedIdentifier::Function { .. } => {
                        ctx.func.code.push(IrOp::GlobalAddr {
                            name: name.clone(),
                            offset: 0,
                        });
                        self.module.declare_external(&name);
                    }
                    _ => return Err(Error::Internal("identifier is not an lvalue")),
                }
            }
            NodeKind::StringLiteral(bytes) => {
                let id = self.module.strings.intern(&bytes);
                ctx.func.code.push(IrOp::StringAddr(id));
            }
            NodeKind::StructMember { base, member } => {
                self.translate_expr_lvalue(ctx, base)?;
                self.push_member_offset(ctx, base, &member, false)?;
            }
            NodeKind::IndirectStructMember { base, member } => {
                self.translate_expr_value(ctx, base)?;
                self.push_member_offset(ctx, base, &member, true)?;
            }
            NodeKind::ArraySubscript { array, subscript } => {
                let array_ty = self.expression_conv_type(array)?;
                let (pointer, index) = if self.bundle.is_pointer(array_ty) {
                    (array, subscript)
                } else {
                    (subscript, array)
                };
                self.translate_expr_value(ctx, pointer)?;
                self.translate_expr_value(ctx, index)?;
                let index_ty = self.expression_conv_type(index)?;
                self.normalize_index(ctx, index_ty)?;
                let element = self
                    .arena
                    .props(node)
                    .ty
                    .ok_or(Error::Internal("untyped subscript"))?;
                let size = type_layout(self.bundle, self.traits, element)?.size;
                if size != 1 {
                    ctx.func.code.push(IrOp::IntConst(size as i64));
                    ctx.func.code.push(IrOp::IntMul {
                        width: OpWidth::W64,
                        signed: true,
                    });
                }
                ctx.func.code.push(IrOp::IntAdd(OpWidth::W64));
            }
            NodeKind::Unary {
                op: UnaryOp::Indirection,
                operand,
            } => {
                self.translate_expr_value(ctx, operand)?;
            }
            NodeKind::CompoundLiteral { .. } => {
                self.translate_expr_value(ctx, node)?;
            }
            NodeKind::GenericSelection { .. } => {
                let selected = self.select_generic(node)?;
                self.translate_expr_lvalue(ctx, selected)?;
            }
            _ => return Err(Error::Internal("node is not an lvalue")),
        }
        Ok(())
    }

    fn push_member_offset(
        &mut self,
        ctx: &mut FunctionCtx,
        base: NodeId,
        member: &str,
        indirect: bool,
    ) -> Result<()> {
        let base_ty = self
            .arena
            .props(base)
            .ty
            .ok_or(Error::Internal("untyped member base"))?;
        let aggregate = if indirect {
            let decayed = lvalue_conversion(self.bundle, base_ty);
            self.bundle.pointee(decayed)?
        } else {
            base_ty
        };
        let info = resolve_member(
            self.bundle,
            self.traits,
            self.bundle.unqualified(aggregate),
            member,
        )?
        .ok_or(Error::Internal("member vanished after analysis"))?;
        if info.offset != 0 {
            ctx.func.code.push(IrOp::IntConst(info.offset as i64));
            ctx.func.code.push(IrOp::IntAdd(OpWidth::W64));
        }
        Ok(())
    }

    fn normalize_index(&mut self, ctx: &mut FunctionCtx, index_ty: TypeId) -> Result<()> {
        let width = self.integral_op_width(index_ty)?;
        if width != OpWidth::W64 {
            if self.bundle.is_signed_integer(index_ty) {
                ctx.func.code.push(IrOp::SignExtend(width));
            } else {
                ctx.func.code.push(IrOp::ZeroExtend(width));
            }
        }
        Ok(())
    }

    /// With the lvalue address on top of the stack, load the designated
    /// value (aggregates stay as addresses).
    pub(crate) fn load_from_lvalue(&mut self, ctx: &mut FunctionCtx, node: NodeId) -> Result<()> {
        let props = self.arena.props(node).clone();
        let ty = props.ty.ok_or(Error::Internal("untyped lvalue"))?;
        let unqualified = self.bundle.unqualified(ty);
        if self.bundle.is_aggregate(unqualified)
            || self.bundle.is_function(unqualified)
            || self.bundle.is_complex(unqualified)
            || self.is_wide_bitint(unqualified)
        {
            return Ok(());
        }
        let volatile = self.bundle.qualifiers_of(ty).volatile;
        if let Some((bit_offset, bit_width)) = props.bitfield {
            let storage = type_layout(self.bundle, self.traits, unqualified)?;
            ctx.func.code.push(IrOp::Load {
                width: OpWidth::from_size(storage.size),
                signed: false,
                volatile,
            });
            ctx.func.code.push(IrOp::BitExtract {
                offset: bit_offset,
                width: bit_width,
                signed: self.bundle.is_signed_integer(unqualified),
            });
            return Ok(());
        }
        if self.bundle.is_floating(unqualified) {
            let width = self.float_op_width(unqualified)?;
            ctx.func.code.push(IrOp::LoadFloat { width, volatile });
            return Ok(());
        }
        let width = self.integral_op_width(unqualified)?;
        let signed = self.bundle.is_signed_integer(unqualified);
        if props.atomic {
            ctx.func.code.push(IrOp::AtomicLoad {
                width,
                order: MemoryOrder::SeqCst,
            });
            if signed && width != OpWidth::W64 {
                ctx.func.code.push(IrOp::SignExtend(width));
            }
        } else {
            ctx.func.code.push(IrOp::Load {
                width,
                signed,
                volatile,
            });
        }
        Ok(())
    }

    /// With `[value, addr]` on top of the stack, store the value into the
    /// scalar object of type `ty`.
    fn store_scalar(
        &mut self,
        ctx: &mut FunctionCtx,
        ty: TypeId,
        atomic: bool,
        bitfield: Option<(u64, u64)>,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        let volatile = self.bundle.qualifiers_of(ty).volatile;
        if let Some((bit_offset, bit_width)) = bitfield {
            // Read-modify-write of the storage unit: [value, addr].
            let storage = type_layout(self.bundle, self.traits, unqualified)?;
            let width = OpWidth::from_size(storage.size);
            ctx.func.code.push(IrOp::Pick(0)); // [v, a, a]
            ctx.func.code.push(IrOp::Load {
                width,
                signed: false,
                volatile,
            }); // [v, a, unit]
            ctx.func.code.push(IrOp::Xchg(2)); // [unit, a, v]
            ctx.func.code.push(IrOp::Xchg(1)); // [unit, v, a]
            ctx.func.code.push(IrOp::Xchg(2)); // [a, v, unit]
            ctx.func.code.push(IrOp::Xchg(1)); // [a, unit, v]
            ctx.func.code.push(IrOp::BitInsert {
                offset: bit_offset,
                width: bit_width,
            }); // [a, merged]
            ctx.func.code.push(IrOp::Xchg(1)); // [merged, a]
            ctx.func.code.push(IrOp::Store { width, volatile });
            return Ok(());
        }
        if self.bundle.is_floating(unqualified) {
            let width = self.float_op_width(unqualified)?;
            ctx.func.code.push(IrOp::StoreFloat { width, volatile });
            return Ok(());
        }
        let width = self.integral_op_width(unqualified)?;
        if atomic {
            ctx.func.code.push(IrOp::AtomicStore {
                width,
                order: MemoryOrder::SeqCst,
            });
        } else {
            ctx.func.code.push(IrOp::Store { width, volatile });
        }
        Ok(())
    }

    fn translate_unary_value(
        &mut self,
        ctx: &mut FunctionCtx,
        node: NodeId,
        op: UnaryOp,
        operand: NodeId,
    ) -> Result<()> {
        let result_ty = self
            .arena
            .props(node)
            .ty
            .ok_or(Error::Internal("untyped unary expression"))?;
        match op {
            UnaryOp::Plus => {
                self.translate_expr_value(ctx, operand)?;
                let from = self.expression_conv_type(operand)?;
                self.emit_scalar_conversion(ctx, from, result_ty)?;
            }
            UnaryOp::Negate => {
                self.translate_expr_value(ctx, operand)?;
                let from = self.expression_conv_type(operand)?;
                self.emit_scalar_conversion(ctx, from, result_ty)?;
                if self.bundle.is_floating(result_ty) {
                    let width = self.float_op_width(result_ty)?;
                    ctx.func.code.push(IrOp::FloatNeg(width));
                } else if self.bitint_width(result_ty).filter(|&w| w > 64).is_some() {
                    self.materialize_bitint(ctx, result_ty)?;
                    self.emit_wide_bitint_unary(ctx, BitintOpKind::Negate, result_ty)?;
                } else {
                    let width = self.integral_op_width(result_ty)?;
                    ctx.func.code.push(IrOp::IntNeg(width));
                }
            }
            UnaryOp::Invert => {
                self.translate_expr_value(ctx, operand)?;
                let from = self.expression_conv_type(operand)?;
                self.emit_scalar_conversion(ctx, from, result_ty)?;
                if self.bitint_width(result_ty).filter(|&w| w > 64).is_some() {
                    self.materialize_bitint(ctx, result_ty)?;
                    self.emit_wide_bitint_unary(ctx, BitintOpKind::Invert, result_ty)?;
                } else {
                    let width = self.integral_op_width(result_ty)?;
                    ctx.func.code.push(IrOp::IntNot(width));
                }
            }
            UnaryOp::LogicalNot => {
                self.translate_expr_value(ctx, operand)?;
                let from = self.expression_conv_type(operand)?;
                self.emit_truth_test(ctx, from)?;
                ctx.func.code.push(IrOp::BoolNot);
            }
            UnaryOp::AddressOf => {
                self.translate_expr_lvalue(ctx, operand)?;
            }
            UnaryOp::Indirection => {
                self.translate_expr_lvalue(ctx, node)?;
                self.load_from_lvalue(ctx, node)?;
            }
            UnaryOp::PreIncrement | UnaryOp::PreDecrement => {
                self.translate_incdec(ctx, node, operand, op == UnaryOp::PreIncrement, false)?;
            }
            UnaryOp::PostIncrement | UnaryOp::PostDecrement => {
                self.translate_incdec(ctx, node, operand, op == UnaryOp::PostIncrement, true)?;
            }
        }
        Ok(())
    }

    fn incdec_step(&mut self, ctx: &mut FunctionCtx, ty: TypeId, increment: bool) -> Result<()> {
        if self.bundle.is_pointer(ty) {
            let pointee = self.bundle.pointee(ty)?;
            let size = type_layout(self.bundle, self.traits, pointee)?.size as i64;
            ctx.func.code.push(IrOp::IntConst(if increment { size } else { -size }));
            ctx.func.code.push(IrOp::IntAdd(OpWidth::W64));
        } else if self.bundle.is_floating(ty) {
            let width = self.float_op_width(ty)?;
            match width {
                FloatWidth::F32 => ctx.func.code.push(IrOp::F32Const(1.0)),
                FloatWidth::F64 => ctx.func.code.push(IrOp::F64Const(1.0)),
                FloatWidth::F80 => ctx.func.code.push(IrOp::LongDoubleConst(1.0)),
            }
            ctx.func.code.push(if increment {
                IrOp::FloatAdd(width)
            } else {
                IrOp::FloatSub(width)
            });
        } else {
            let width = self.integral_op_width(ty)?;
            ctx.func.code.push(IrOp::IntConst(1));
            ctx.func.code.push(if increment {
                IrOp::IntAdd(width)
            } else {
                IrOp::IntSub(width)
            });
        }
        Ok(())
    }

    fn translate_incdec(
        &mut self,
        ctx: &mut FunctionCtx,
        node: NodeId,
        operand: NodeId,
        increment: bool,
        post: bool,
    ) -> Result<()> {
        let value_ty = self
            .arena
            .props(node)
            .ty
            .ok_or(Error::Internal("untyped increment"))?;
        let operand_props = self.arena.props(operand).clone();
        self.translate_expr_lvalue(ctx, operand)?; // [a]
        ctx.func.code.push(IrOp::Pick(0)); // [a, a]
        self.load_from_lvalue(ctx, operand)?; // [a, old]
        if post {
            ctx.func.code.push(IrOp::Pick(0)); // [a, old, old]
            self.incdec_step(ctx, value_ty, increment)?; // [a, old, new]
            ctx.func.code.push(IrOp::Xchg(1)); // [a, new, old]
            ctx.func.code.push(IrOp::Xchg(2)); // [old, new, a]
            self.store_scalar(ctx, value_ty, operand_props.atomic, operand_props.bitfield)?;
            // [old]
        } else {
            self.incdec_step(ctx, value_ty, increment)?; // [a, new]
            ctx.func.code.push(IrOp::Pick(0)); // [a, new, new]
            ctx.func.code.push(IrOp::Xchg(2)); // [new, new, a]
            self.store_scalar(ctx, value_ty, operand_props.atomic, operand_props.bitfield)?;
            // [new]
        }
        Ok(())
    }

    fn translate_binary_value(
        &mut self,
        ctx: &mut FunctionCtx,
        node: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<()> {
        let result_ty = self
            .arena
            .props(node)
            .ty
            .ok_or(Error::Internal("untyped binary expression"))?;
        let lhs_ty = self.expression_conv_type(lhs)?;
        let rhs_ty = self.expression_conv_type(rhs)?;
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let short = self.artifact_point();
                let end = self.artifact_point();
                self.translate_expr_value(ctx, lhs)?;
                self.emit_truth_test(ctx, lhs_ty)?;
                if op == BinaryOp::LogicalAnd {
                    self.branch_zero_to_point(ctx, short);
                } else {
                    self.branch_nonzero_to_point(ctx, short);
                }
                self.translate_expr_value(ctx, rhs)?;
                self.emit_truth_test(ctx, rhs_ty)?;
                self.jump_to_point(ctx, end);
                self.bind_point(ctx, short);
                ctx.func
                    .code
                    .push(IrOp::IntConst(i64::from(op == BinaryOp::LogicalOr)));
                self.bind_point(ctx, end);
                return Ok(());
            }
            _ => {}
        }
        if op.is_comparison() {
            return self.translate_comparison(ctx, op, lhs, rhs, lhs_ty, rhs_ty);
        }
        // Pointer arithmetic.
        if matches!(op, BinaryOp::Add | BinaryOp::Subtract) {
            let lhs_pointer = self.bundle.is_pointer(lhs_ty);
            let rhs_pointer = self.bundle.is_pointer(rhs_ty);
            if lhs_pointer && rhs_pointer {
                // Pointer difference.
                let pointee = self.bundle.pointee(lhs_ty)?;
                let size = type_layout(self.bundle, self.traits, pointee)?.size;
                self.translate_expr_value(ctx, lhs)?;
                self.translate_expr_value(ctx, rhs)?;
                ctx.func.code.push(IrOp::IntSub(OpWidth::W64));
                if size != 1 {
                    ctx.func.code.push(IrOp::IntConst(size as i64));
                    ctx.func.code.push(IrOp::IntDiv {
                        width: OpWidth::W64,
                        signed: true,
                    });
                }
                return Ok(());
            }
            if lhs_pointer || rhs_pointer {
                let (pointer, index) = if lhs_pointer { (lhs, rhs) } else { (rhs, lhs) };
                let pointer_ty = if lhs_pointer { lhs_ty } else { rhs_ty };
                let index_ty = if lhs_pointer { rhs_ty } else { lhs_ty };
                let pointee = self.bundle.pointee(pointer_ty)?;
                let size = type_layout(self.bundle, self.traits, pointee)?.size;
                self.translate_expr_value(ctx, pointer)?;
                self.translate_expr_value(ctx, index)?;
                self.normalize_index(ctx, index_ty)?;
                if size != 1 {
                    ctx.func.code.push(IrOp::IntConst(size as i64));
                    ctx.func.code.push(IrOp::IntMul {
                        width: OpWidth::W64,
                        signed: true,
                    });
                }
                ctx.func.code.push(if op == BinaryOp::Add {
                    IrOp::IntAdd(OpWidth::W64)
                } else {
                    IrOp::IntSub(OpWidth::W64)
                });
                return Ok(());
            }
        }
        // Shifts promote each operand independently.
        if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) {
            if self.is_wide_bitint(result_ty) {
                return self.translate_wide_shift(ctx, op, lhs, rhs, result_ty);
            }
            self.translate_expr_value(ctx, lhs)?;
            let promoted_lhs = promote(self.bundle, self.traits, lhs_ty)?;
            self.emit_scalar_conversion(ctx, lhs_ty, promoted_lhs)?;
            self.translate_expr_value(ctx, rhs)?;
            let promoted_rhs = promote(self.bundle, self.traits, rhs_ty)?;
            self.emit_scalar_conversion(ctx, rhs_ty, promoted_rhs)?;
            let width = self.integral_op_width(promoted_lhs)?;
            ctx.func.code.push(if op == BinaryOp::ShiftLeft {
                IrOp::IntShl(width)
            } else if self.bundle.is_signed_integer(promoted_lhs) {
                IrOp::IntSar(width)
            } else {
                IrOp::IntShr(width)
            });
            return Ok(());
        }
        // Plain arithmetic in the common type.
        if self.is_wide_bitint(result_ty) {
            return self.translate_wide_arith(ctx, op, lhs, rhs, result_ty);
        }
        if self.bundle.is_complex(result_ty) {
            return self.translate_complex_arith(ctx, op, lhs, rhs, result_ty);
        }
        self.translate_expr_value(ctx, lhs)?;
        self.emit_scalar_conversion(ctx, lhs_ty, result_ty)?;
        self.translate_expr_value(ctx, rhs)?;
        self.emit_scalar_conversion(ctx, rhs_ty, result_ty)?;
        if self.bundle.is_floating(result_ty) {
            let width = self.float_op_width(result_ty)?;
            ctx.func.code.push(match op {
                BinaryOp::Add => IrOp::FloatAdd(width),
                BinaryOp::Subtract => IrOp::FloatSub(width),
                BinaryOp::Multiply => IrOp::FloatMul(width),
                BinaryOp::Divide => IrOp::FloatDiv(width),
                _ => return Err(Error::Internal("invalid floating operator")),
            });
            return Ok(());
        }
        let width = self.integral_op_width(result_ty)?;
        let signed = self.bundle.is_signed_integer(result_ty);
        ctx.func.code.push(match op {
            BinaryOp::Add => IrOp::IntAdd(width),
            BinaryOp::Subtract => IrOp::IntSub(width),
            BinaryOp::Multiply => IrOp::IntMul { width, signed },
            BinaryOp::Divide => IrOp::IntDiv { width, signed },
            BinaryOp::Modulo => IrOp::IntMod { width, signed },
            BinaryOp::BitAnd => IrOp::IntAnd(width),
            BinaryOp::BitOr => IrOp::IntOr(width),
            BinaryOp::BitXor => IrOp::IntXor(width),
            _ => return Err(Error::Internal("invalid integer operator")),
        });
        Ok(())
    }

    fn translate_comparison(
        &mut self,
        ctx: &mut FunctionCtx,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        lhs_ty: TypeId,
        rhs_ty: TypeId,
    ) -> Result<()> {
        let both_arithmetic =
            self.bundle.is_arithmetic(lhs_ty) && self.bundle.is_arithmetic(rhs_ty);
        let common = if both_arithmetic {
            usual_arithmetic_conversions(self.bundle, self.traits, lhs_ty, rhs_ty)?
        } else {
            // Pointer comparisons happen at pointer width.
            self.bundle.null_pointer()
        };
        if self.is_wide_bitint(common) {
            return self.translate_wide_comparison(ctx, op, lhs, rhs, common);
        }
        self.translate_expr_value(ctx, lhs)?;
        if both_arithmetic {
            self.emit_scalar_conversion(ctx, lhs_ty, common)?;
        }
        self.translate_expr_value(ctx, rhs)?;
        if both_arithmetic {
            self.emit_scalar_conversion(ctx, rhs_ty, common)?;
        }
        if both_arithmetic && self.bundle.is_floating(common) {
            let width = self.float_op_width(common)?;
            let cmp = match op {
                BinaryOp::Equal => CmpOp::Equal,
                BinaryOp::NotEqual => CmpOp::NotEqual,
                BinaryOp::Less => CmpOp::Below,
                BinaryOp::LessEqual => CmpOp::BelowOrEqual,
                BinaryOp::Greater => CmpOp::Above,
                BinaryOp::GreaterEqual => CmpOp::AboveOrEqual,
                _ => return Err(Error::Internal("invalid comparison operator")),
            };
            ctx.func.code.push(IrOp::FloatCmp { width, op: cmp });
            return Ok(());
        }
        let (width, signed) = if both_arithmetic {
            (
                self.integral_op_width(common)?,
                self.bundle.is_signed_integer(common),
            )
        } else {
            (OpWidth::W64, false)
        };
        let cmp = match op {
            BinaryOp::Equal => CmpOp::Equal,
            BinaryOp::NotEqual => CmpOp::NotEqual,
            BinaryOp::Less => {
                if signed {
                    CmpOp::SignedLess
                } else {
                    CmpOp::Below
                }
            }
            BinaryOp::LessEqual => {
                if signed {
                    CmpOp::SignedLessOrEqual
                } else {
                    CmpOp::BelowOrEqual
                }
            }
            BinaryOp::Greater => {
                if signed {
                    CmpOp::SignedGreater
                } else {
                    CmpOp::Above
                }
            }
            BinaryOp::GreaterEqual => {
                if signed {
                    CmpOp::SignedGreaterOrEqual
                } else {
                    CmpOp::AboveOrEqual
                }
            }
            _ => return Err(Error::Internal("invalid comparison operator")),
        };
        ctx.func.code.push(IrOp::IntCmp { width, op: cmp });
        Ok(())
    }

    fn translate_assignment(
        &mut self,
        ctx: &mut FunctionCtx,
        op: AssignOp,
        target: NodeId,
        value: NodeId,
    ) -> Result<()> {
        let target_props = self.arena.props(target).clone();
        let target_ty = target_props
            .ty
            .ok_or(Error::Internal("untyped assignment target"))?;
        let unqualified = self.bundle.unqualified(target_ty);
        if op == AssignOp::Simple {
            if self.bundle.is_aggregate(unqualified)
                || self.bundle.is_complex(unqualified)
                || self.is_wide_bitint(unqualified)
            {
                // Aggregate copy; the target address remains as the value.
                let size = type_layout(self.bundle, self.traits, unqualified)?.size;
                self.translate_expr_lvalue(ctx, target)?; // [dst]
                ctx.func.code.push(IrOp::Pick(0)); // [dst, dst]
                self.translate_expr_value(ctx, value)?; // [dst, dst, src]
                ctx.func.code.push(IrOp::CopyMemory { size }); // [dst]
                return Ok(());
            }
            self.translate_expr_value(ctx, value)?;
            let value_ty = self.expression_conv_type(value)?;
            self.emit_scalar_conversion(ctx, value_ty, unqualified)?;
            ctx.func.code.push(IrOp::Pick(0)); // [v, v]
            self.translate_expr_lvalue(ctx, target)?; // [v, v, a]
            self.store_scalar(ctx, target_ty, target_props.atomic, target_props.bitfield)?;
            return Ok(());
        }
        // Compound assignment: read-modify-write with the common type.
        let value_ty = self.expression_conv_type(value)?;
        let binary_op = match op {
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Subtract => BinaryOp::Subtract,
            AssignOp::Multiply => BinaryOp::Multiply,
            AssignOp::Divide => BinaryOp::Divide,
            AssignOp::Modulo => BinaryOp::Modulo,
            AssignOp::ShiftLeft => BinaryOp::ShiftLeft,
            AssignOp::ShiftRight => BinaryOp::ShiftRight,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
            AssignOp::Simple => unreachable!(),
        };
        self.translate_expr_lvalue(ctx, target)?; // [a]
        ctx.func.code.push(IrOp::Pick(0)); // [a, a]
        self.load_from_lvalue(ctx, target)?; // [a, cur]
        if self.bundle.is_pointer(unqualified) {
            // ptr += n / ptr -= n
            let pointee = self.bundle.pointee(unqualified)?;
            let size = type_layout(self.bundle, self.traits, pointee)?.size;
            self.translate_expr_value(ctx, value)?;
            self.normalize_index(ctx, value_ty)?;
            if size != 1 {
                ctx.func.code.push(IrOp::IntConst(size as i64));
                ctx.func.code.push(IrOp::IntMul {
                    width: OpWidth::W64,
                    signed: true,
                });
            }
            ctx.func.code.push(if binary_op == BinaryOp::Add {
                IrOp::IntAdd(OpWidth::W64)
            } else {
                IrOp::IntSub(OpWidth::W64)
            });
        } else {
            let common = match binary_op {
                BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                    promote(self.bundle, self.traits, unqualified)?
                }
                _ => usual_arithmetic_conversions(self.bundle, self.traits, unqualified, value_ty)?,
            };
            self.emit_scalar_conversion(ctx, unqualified, common)?; // [a, cur']
            self.translate_expr_value(ctx, value)?;
            match binary_op {
                BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                    let promoted_rhs = promote(self.bundle, self.traits, value_ty)?;
                    self.emit_scalar_conversion(ctx, value_ty, promoted_rhs)?;
                }
                _ => self.emit_scalar_conversion(ctx, value_ty, common)?,
            }
            if self.bundle.is_floating(common) {
                let width = self.float_op_width(common)?;
                ctx.func.code.push(match binary_op {
                    BinaryOp::Add => IrOp::FloatAdd(width),
                    BinaryOp::Subtract => IrOp::FloatSub(width),
                    BinaryOp::Multiply => IrOp::FloatMul(width),
                    BinaryOp::Divide => IrOp::FloatDiv(width),
                    _ => return Err(Error::Internal("invalid floating compound assignment")),
                });
            } else {
                let width = self.integral_op_width(common)?;
                let signed = self.bundle.is_signed_integer(common);
                ctx.func.code.push(match binary_op {
                    BinaryOp::Add => IrOp::IntAdd(width),
                    BinaryOp::Subtract => IrOp::IntSub(width),
                    BinaryOp::Multiply => IrOp::IntMul { width, signed },
                    BinaryOp::Divide => IrOp::IntDiv { width, signed },
                    BinaryOp::Modulo => IrOp::IntMod { width, signed },
                    BinaryOp::BitAnd => IrOp::IntAnd(width),
                    BinaryOp::BitOr => IrOp::IntOr(width),
                    BinaryOp::BitXor => IrOp::IntXor(width),
                    BinaryOp::ShiftLeft => IrOp::IntShl(width),
                    BinaryOp::ShiftRight => {
                        if signed {
                            IrOp::IntSar(width)
                        } else {
                            IrOp::IntShr(width)
                        }
                    }
                    _ => return Err(Error::Internal("invalid compound assignment")),
                });
            }
            self.emit_scalar_conversion(ctx, common, unqualified)?; // [a, res]
        }
        ctx.func.code.push(IrOp::Pick(0)); // [a, res, res]
        ctx.func.code.push(IrOp::Xchg(2)); // [res, res, a]
        self.store_scalar(ctx, target_ty, target_props.atomic, target_props.bitfield)?;
        Ok(())
    }

    fn translate_call(
        &mut self,
        ctx: &mut FunctionCtx,
        node: NodeId,
        callee: NodeId,
        arguments: &[NodeId],
    ) -> Result<()> {
        let callee_conv = self.expression_conv_type(callee)?;
        let function_ty_id = self.bundle.pointee(callee_conv)?;
        let function = match self.bundle.get(self.bundle.unqualified(function_ty_id)) {
            Type::Function(function) => function.clone(),
            _ => return Err(Error::Internal("call through a non-function")),
        };
        let return_ty = function.return_type;
        let indirect_return = self.bundle.is_aggregate(return_ty)
            || self.bundle.is_complex(return_ty)
            || self.is_wide_bitint(return_ty);
        if indirect_return {
            let temp = self
                .arena
                .props(node)
                .temporary
                .ok_or(Error::Internal("aggregate call without a temporary"))?;
            let local = self.temp_local(ctx, temp, return_ty)?;
            ctx.func.code.push(IrOp::LocalAddr(local));
        }
        let takes_void = function.parameters.len() == 1
            && function
                .parameters
                .first()
                .and_then(|p| p.ty)
                .map(|t| self.bundle.is_void(t))
                .unwrap_or(false);
        for (index, &argument) in arguments.iter().enumerate() {
            self.translate_expr_value(ctx, argument)?;
            let argument_ty = self.expression_conv_type(argument)?;
            let parameter_ty = if takes_void || function.mode == FunctionMode::KAndR {
                None
            } else {
                function.parameters.get(index).and_then(|p| p.ty)
            };
            match parameter_ty {
                Some(parameter_ty) => {
                    let adjusted = self.parameter_value_type(parameter_ty);
                    self.emit_scalar_conversion(ctx, argument_ty, adjusted)?;
                }
                None => {
                    // Default argument promotions for variadic/K&R calls.
                    let promoted = self.default_argument_promotion(argument_ty)?;
                    self.emit_scalar_conversion(ctx, argument_ty, promoted)?;
                }
            }
        }
        // A direct call to a declared function keeps its symbol; anything
        // else goes through the function pointer.
        let direct = match &self.arena.node(callee).kind {
            NodeKind::Identifier(name) => {
                let is_function = self
                    .arena
                    .props(callee)
                    .scoped_id
                    .map(|symbol| {
                        matches!(
                            self.artifacts.scopes.entry(symbol).identifier,
                            crate::sema::scope::ScopedIdentifier::Function { .. }
                        )
                    })
                    .unwrap_or(false);
                is_function.then(|| name.clone())
            }
            _ => None,
        };
        match direct {
            Some(name) => {
                self.module.declare_external(&name);
                ctx.func.code.push(IrOp::Invoke {
                    name,
                    signature: function_ty_id,
                    argc: arguments.len() as u32,
                    return_space: indirect_return,
                });
            }
            None => {
                self.translate_expr_value(ctx, callee)?;
                ctx.func.code.push(IrOp::InvokeVirtual {
                    signature: function_ty_id,
                    argc: arguments.len() as u32,
                    return_space: indirect_return,
                });
            }
        }
        Ok(())
    }

    fn parameter_value_type(&mut self, parameter_ty: TypeId) -> TypeId {
        let unqualified = self.bundle.unqualified(parameter_ty);
        match self.bundle.get(unqualified).clone() {
            Type::Array { element, .. } => self.bundle.pointer(element),
            Type::Function(_) => self.bundle.pointer(unqualified),
            _ => unqualified,
        }
    }

    fn default_argument_promotion(&mut self, ty: TypeId) -> Result<TypeId> {
        if matches!(self.bundle.get(self.bundle.unqualified(ty)), Type::Float) {
            return Ok(self.bundle.double());
        }
        if self.bundle.is_integral(ty) && !self.is_wide_bitint(ty) {
            return promote(self.bundle, self.traits, ty);
        }
        Ok(self.bundle.unqualified(ty))
    }

    fn translate_builtin(
        &mut self,
        ctx: &mut FunctionCtx,
        node: NodeId,
        builtin: BuiltinOp,
        arguments: &[NodeId],
    ) -> Result<()> {
        match builtin {
            BuiltinOp::SizeOf | BuiltinOp::AlignOf | BuiltinOp::OffsetOf => {
                // Non-VLA cases fold during analysis and never reach here.
                let value = self
                    .arena
                    .props(node)
                    .constant_value
                    .clone()
                    .ok_or(Error::Internal("runtime sizeof is not supported here"))?;
                let ty = self
                    .arena
                    .props(node)
                    .ty
                    .ok_or(Error::Internal("untyped builtin result"))?;
                self.emit_constant_strict(ctx, &value, ty)?;
            }
            BuiltinOp::VaStart => {
                let [ap] = arguments else {
                    return Err(Error::Internal("malformed va_start"));
                };
                self.translate_expr_lvalue(ctx, *ap)?;
                ctx.func.code.push(IrOp::VaStart);
            }
            BuiltinOp::VaEnd => {
                let [ap] = arguments else {
                    return Err(Error::Internal("malformed va_end"));
                };
                self.translate_expr_lvalue(ctx, *ap)?;
                ctx.func.code.push(IrOp::VaEnd);
            }
            BuiltinOp::VaCopy => {
                let [destination, source] = arguments else {
                    return Err(Error::Internal("malformed va_copy"));
                };
                self.translate_expr_lvalue(ctx, *source)?;
                self.translate_expr_lvalue(ctx, *destination)?;
                ctx.func.code.push(IrOp::VaCopy);
            }
            BuiltinOp::AddOverflow | BuiltinOp::SubOverflow | BuiltinOp::MulOverflow => {
                let [lhs, rhs, result] = arguments else {
                    return Err(Error::Internal("malformed overflow builtin"));
                };
                let result_ty = self.expression_conv_type(*result)?;
                let operand_ty = self.bundle.pointee(result_ty)?;
                let width = self.integral_op_width(operand_ty)?;
                let signed = self.bundle.is_signed_integer(operand_ty);
                self.translate_expr_value(ctx, *lhs)?;
                let lhs_ty = self.expression_conv_type(*lhs)?;
                self.emit_scalar_conversion(ctx, lhs_ty, operand_ty)?;
                self.translate_expr_value(ctx, *rhs)?;
                let rhs_ty = self.expression_conv_type(*rhs)?;
                self.emit_scalar_conversion(ctx, rhs_ty, operand_ty)?;
                self.translate_expr_value(ctx, *result)?;
                let op = match builtin {
                    BuiltinOp::AddOverflow => crate::ir::OverflowOp::Add,
                    BuiltinOp::SubOverflow => crate::ir::OverflowOp::Subtract,
                    _ => crate::ir::OverflowOp::Multiply,
                };
                ctx.func.code.push(IrOp::OverflowArith { op, width, signed });
            }
            BuiltinOp::VaArg => {
                let [ap, _] = arguments else {
                    return Err(Error::Internal("malformed va_arg"));
                };
                let ty = self
                    .arena
                    .props(node)
                    .ty
                    .ok_or(Error::Internal("untyped va_arg result"))?;
                self.translate_expr_lvalue(ctx, *ap)?;
                ctx.func.code.push(IrOp::VaArg { ty });
            }
        }
        Ok(())
    }

    fn select_generic(&self, node: NodeId) -> Result<NodeId> {
        let NodeKind::GenericSelection {
            control,
            associations,
        } = &self.arena.node(node).kind
        else {
            return Err(Error::Internal("expected a generic selection"));
        };
        let control_ty = self
            .arena
            .props(*control)
            .ty
            .ok_or(Error::Internal("untyped generic control"))?;
        let control_ty = self.bundle.unqualified(control_ty);
        let mut fallback = None;
        for (type_name, expression) in associations {
            match type_name {
                Some(type_name) => {
                    let assoc_ty = self
                        .arena
                        .props(*type_name)
                        .ty
                        .ok_or(Error::Internal("untyped generic association"))?;
                    if types::compatible(
                        self.bundle,
                        control_ty,
                        self.bundle.unqualified(assoc_ty),
                    ) {
                        return Ok(*expression);
                    }
                }
                None => fallback = Some(*expression),
            }
        }
        fallback.ok_or(Error::Internal("generic selection chose nothing"))
    }

    /// Emit a scalar conversion between two analyzed types.
    pub(crate) fn emit_scalar_conversion(
        &mut self,
        ctx: &mut FunctionCtx,
        from: TypeId,
        to: TypeId,
    ) -> Result<()> {
        let from = self.bundle.unqualified(from);
        let to = self.bundle.unqualified(to);
        if from == to || self.bundle.is_void(to) {
            return Ok(());
        }
        if self.bundle.is_aggregate(to) || self.bundle.is_complex(to) {
            // Aggregate and complex values travel as addresses; nothing to
            // convert (complex promotions are handled by their operators).
            return Ok(());
        }
        let from_float = self.bundle.is_floating(from);
        let to_float = self.bundle.is_floating(to);
        if from_float && to_float {
            let from_width = self.float_op_width(from)?;
            let to_width = self.float_op_width(to)?;
            if from_width != to_width {
                ctx.func.code.push(IrOp::FloatConvert {
                    from: from_width,
                    to: to_width,
                });
            }
            return Ok(());
        }
        if from_float {
            if matches!(self.bundle.get(to), Type::Bool) {
                self.emit_truth_test(ctx, from)?;
                return Ok(());
            }
            ctx.func.code.push(IrOp::FloatToInt {
                from: self.float_op_width(from)?,
                signed: self.bundle.is_signed_integer(to),
            });
            self.normalize_integer(ctx, to)?;
            return Ok(());
        }
        if to_float {
            let signed = self.bundle.is_signed_integer(from);
            if self.is_wide_bitint(from) {
                return Err(Error::Internal("wide bit-precise to floating conversion"));
            }
            ctx.func.code.push(IrOp::IntToFloat {
                to: self.float_op_width(to)?,
                signed,
            });
            return Ok(());
        }
        // Integer/pointer to integer/pointer.
        if matches!(self.bundle.get(to), Type::Bool) {
            self.emit_truth_test(ctx, from)?;
            return Ok(());
        }
        let from_wide = self.is_wide_bitint(from);
        let to_wide = self.is_wide_bitint(to);
        match (from_wide, to_wide) {
            (false, false) => {
                let from_width = self.integral_op_width(from)?;
                let to_width = self.integral_op_width(to)?;
                if to_width.size() < from_width.size() {
                    if self.bundle.is_signed_integer(to) {
                        ctx.func.code.push(IrOp::SignExtend(to_width));
                    } else {
                        ctx.func.code.push(IrOp::ZeroExtend(to_width));
                    }
                }
                Ok(())
            }
            (false, true) => {
                // Native value into a fresh wide buffer.
                let width = self
                    .bitint_width(to)
                    .ok_or(Error::Internal("bit-precise width missing"))?;
                let layout = type_layout(self.bundle, self.traits, to)?;
                let local = self.scratch_local(ctx, layout.size, layout.alignment);
                ctx.func.code.push(IrOp::LocalAddr(local));
                ctx.func.code.push(IrOp::BitintFromInt {
                    signed: self.bundle.is_signed_integer(from),
                    width,
                });
                Ok(())
            }
            (true, false) => {
                // The low digits hold the wrapped native value.
                let to_width = self.integral_op_width(to)?;
                ctx.func.code.push(IrOp::Load {
                    width: to_width,
                    signed: self.bundle.is_signed_integer(to),
                    volatile: false,
                });
                Ok(())
            }
            (true, true) => {
                let from_width = self
                    .bitint_width(from)
                    .ok_or(Error::Internal("bit-precise width missing"))?;
                let to_width = self
                    .bitint_width(to)
                    .ok_or(Error::Internal("bit-precise width missing"))?;
                if from_width == to_width {
                    return Ok(());
                }
                let from_size = type_layout(self.bundle, self.traits, from)?.size;
                self.materialize_bitint_sized(ctx, to, from_size)?;
                ctx.func.code.push(IrOp::BitintCast {
                    signed: self.bundle.is_signed_integer(from),
                    from: from_width,
                    to: to_width,
                });
                Ok(())
            }
        }
    }

    // After a narrowing float-to-int conversion the 64-bit slot may carry
    // garbage above the target width.
    fn normalize_integer(&mut self, ctx: &mut FunctionCtx, ty: TypeId) -> Result<()> {
        let width = self.integral_op_width(ty)?;
        if width != OpWidth::W64 {
            if self.bundle.is_signed_integer(ty) {
                ctx.func.code.push(IrOp::SignExtend(width));
            } else {
                ctx.func.code.push(IrOp::ZeroExtend(width));
            }
        }
        Ok(())
    }

    /// Copy the wide bit-precise value whose address is on top of the stack
    /// into a fresh writable buffer; pushes the buffer address. `copy_size`
    /// bounds the bytes read from the source.
    fn materialize_bitint_sized(
        &mut self,
        ctx: &mut FunctionCtx,
        buffer_ty: TypeId,
        copy_size: u64,
    ) -> Result<crate::ir::LocalId> {
        let layout = type_layout(self.bundle, self.traits, buffer_ty)?;
        let local = self.scratch_local(ctx, layout.size.max(8), layout.alignment.max(8));
        // [src] -> [dst] with the copy done through CopyMemory.
        ctx.func.code.push(IrOp::LocalAddr(local)); // [src, dst]
        ctx.func.code.push(IrOp::Xchg(1)); // [dst, src]
        ctx.func.code.push(IrOp::Pick(1)); // [dst, src, dst]
        ctx.func.code.push(IrOp::Xchg(1)); // [dst, dst, src]
        ctx.func.code.push(IrOp::CopyMemory {
            size: copy_size.min(layout.size),
        });
        // CopyMemory pops [dst, src]; the original dst remains.
        Ok(local)
    }

    fn materialize_bitint(&mut self, ctx: &mut FunctionCtx, ty: TypeId) -> Result<crate::ir::LocalId> {
        let size = type_layout(self.bundle, self.traits, ty)?.size;
        self.materialize_bitint_sized(ctx, ty, size)
    }

    fn emit_wide_bitint_unary(
        &mut self,
        ctx: &mut FunctionCtx,
        op: BitintOpKind,
        ty: TypeId,
    ) -> Result<()> {
        let width = self
            .bitint_width(ty)
            .ok_or(Error::Internal("bit-precise width missing"))?;
        ctx.func.code.push(IrOp::BitintUnary { op, width });
        Ok(())
    }

    fn translate_wide_arith(
        &mut self,
        ctx: &mut FunctionCtx,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        result_ty: TypeId,
    ) -> Result<()> {
        let lhs_ty = self.expression_conv_type(lhs)?;
        let rhs_ty = self.expression_conv_type(rhs)?;
        let width = self
            .bitint_width(result_ty)
            .ok_or(Error::Internal("bit-precise width missing"))?;
        let signed = self.bundle.is_signed_integer(result_ty);
        // Left operand lands in a writable buffer, right stays in place.
        self.translate_expr_value(ctx, lhs)?;
        self.emit_scalar_conversion(ctx, lhs_ty, result_ty)?;
        self.materialize_bitint(ctx, result_ty)?;
        self.translate_expr_value(ctx, rhs)?;
        self.emit_scalar_conversion(ctx, rhs_ty, result_ty)?;
        let kind = match op {
            BinaryOp::Add => BitintOpKind::Add,
            BinaryOp::Subtract => BitintOpKind::Subtract,
            BinaryOp::Multiply => BitintOpKind::Multiply { signed },
            BinaryOp::Divide => BitintOpKind::Divide { signed },
            BinaryOp::BitAnd => BitintOpKind::And,
            BinaryOp::BitOr => BitintOpKind::Or,
            BinaryOp::BitXor => BitintOpKind::Xor,
            BinaryOp::Modulo => BitintOpKind::Remainder { signed },
            _ => return Err(Error::Internal("invalid wide bit-precise operator")),
        };
        ctx.func.code.push(IrOp::BitintOp { op: kind, width });
        Ok(())
    }

    fn translate_wide_shift(
        &mut self,
        ctx: &mut FunctionCtx,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        result_ty: TypeId,
    ) -> Result<()> {
        let lhs_ty = self.expression_conv_type(lhs)?;
        let rhs_ty = self.expression_conv_type(rhs)?;
        let width = self
            .bitint_width(result_ty)
            .ok_or(Error::Internal("bit-precise width missing"))?;
        self.translate_expr_value(ctx, lhs)?;
        self.emit_scalar_conversion(ctx, lhs_ty, result_ty)?;
        self.materialize_bitint(ctx, result_ty)?;
        self.translate_expr_value(ctx, rhs)?;
        self.normalize_index(ctx, rhs_ty)?;
        let kind = match op {
            BinaryOp::ShiftLeft => BitintOpKind::ShiftLeft,
            _ if self.bundle.is_signed_integer(result_ty) => BitintOpKind::ArithmeticShiftRight,
            _ => BitintOpKind::ShiftRight,
        };
        ctx.func.code.push(IrOp::BitintShift { op: kind, width });
        Ok(())
    }

    fn translate_wide_comparison(
        &mut self,
        ctx: &mut FunctionCtx,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        common: TypeId,
    ) -> Result<()> {
        let lhs_ty = self.expression_conv_type(lhs)?;
        let rhs_ty = self.expression_conv_type(rhs)?;
        let width = self
            .bitint_width(common)
            .ok_or(Error::Internal("bit-precise width missing"))?;
        let signed = self.bundle.is_signed_integer(common);
        self.translate_expr_value(ctx, lhs)?;
        self.emit_scalar_conversion(ctx, lhs_ty, common)?;
        self.translate_expr_value(ctx, rhs)?;
        self.emit_scalar_conversion(ctx, rhs_ty, common)?;
        ctx.func.code.push(IrOp::BitintOp {
            op: BitintOpKind::Compare { signed },
            width,
        });
        // The runtime returns -1/0/1; compare that against zero.
        ctx.func.code.push(IrOp::IntConst(0));
        let cmp = match op {
            BinaryOp::Equal => CmpOp::Equal,
            BinaryOp::NotEqual => CmpOp::NotEqual,
            BinaryOp::Less => CmpOp::SignedLess,
            BinaryOp::LessEqual => CmpOp::SignedLessOrEqual,
            BinaryOp::Greater => CmpOp::SignedGreater,
            BinaryOp::GreaterEqual => CmpOp::SignedGreaterOrEqual,
            _ => return Err(Error::Internal("invalid comparison operator")),
        };
        ctx.func.code.push(IrOp::IntCmp {
            width: OpWidth::W32,
            op: cmp,
        });
        Ok(())
    }

    fn translate_complex_arith(
        &mut self,
        ctx: &mut FunctionCtx,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        result_ty: TypeId,
    ) -> Result<()> {
        let kind = match self.bundle.get(self.bundle.unqualified(result_ty)) {
            Type::Complex(kind) => *kind,
            _ => return Err(Error::Internal("complex arithmetic on a real type")),
        };
        let (part_width, part_size) = match kind {
            FloatKind::Float => (FloatWidth::F32, 4u64),
            FloatKind::Double => (FloatWidth::F64, 8),
            FloatKind::LongDouble => (FloatWidth::F80, 16),
        };
        match op {
            BinaryOp::Add | BinaryOp::Subtract => {
                // Component-wise through a result temporary.
                let layout = type_layout(self.bundle, self.traits, result_ty)?;
                let result = self.scratch_local(ctx, layout.size, layout.alignment);
                let lhs_addr = self.complex_operand(ctx, lhs, result_ty)?;
                let rhs_addr = self.complex_operand(ctx, rhs, result_ty)?;
                for part in 0..2u64 {
                    let offset = (part * part_size) as i64;
                    ctx.func.code.push(IrOp::LocalAddr(lhs_addr));
                    self.push_offset(ctx, offset);
                    ctx.func.code.push(IrOp::LoadFloat {
                        width: part_width,
                        volatile: false,
                    });
                    ctx.func.code.push(IrOp::LocalAddr(rhs_addr));
                    self.push_offset(ctx, offset);
                    ctx.func.code.push(IrOp::LoadFloat {
                        width: part_width,
                        volatile: false,
                    });
                    ctx.func.code.push(if op == BinaryOp::Add {
                        IrOp::FloatAdd(part_width)
                    } else {
                        IrOp::FloatSub(part_width)
                    });
                    ctx.func.code.push(IrOp::LocalAddr(result));
                    self.push_offset(ctx, offset);
                    ctx.func.code.push(IrOp::StoreFloat {
                        width: part_width,
                        volatile: false,
                    });
                }
                ctx.func.code.push(IrOp::LocalAddr(result));
                Ok(())
            }
            BinaryOp::Multiply | BinaryOp::Divide => {
                // Complex multiply/divide goes through compiler-rt.
                let name = match (op, kind) {
                    (BinaryOp::Multiply, FloatKind::Float) => "__mulsc3",
                    (BinaryOp::Multiply, FloatKind::Double) => "__muldc3",
                    (BinaryOp::Multiply, FloatKind::LongDouble) => "__mulxc3",
                    (_, FloatKind::Float) => "__divsc3",
                    (_, FloatKind::Double) => "__divdc3",
                    (_, FloatKind::LongDouble) => "__divxc3",
                };
                self.module.declare_external(name);
                let layout = type_layout(self.bundle, self.traits, result_ty)?;
                let result = self.scratch_local(ctx, layout.size, layout.alignment);
                ctx.func.code.push(IrOp::LocalAddr(result));
                let lhs_addr = self.complex_operand(ctx, lhs, result_ty)?;
                let rhs_addr = self.complex_operand(ctx, rhs, result_ty)?;
                for addr in [lhs_addr, rhs_addr] {
                    for part in 0..2u64 {
                        ctx.func.code.push(IrOp::LocalAddr(addr));
                        self.push_offset(ctx, (part * part_size) as i64);
                        ctx.func.code.push(IrOp::LoadFloat {
                            width: part_width,
                            volatile: false,
                        });
                    }
                }
                ctx.func.code.push(IrOp::ComplexLibcall {
                    name: name.to_string(),
                    width: part_width,
                });
                Ok(())
            }
            _ => Err(Error::Internal("invalid complex operator")),
        }
    }

    // Evaluate a complex-typed operand into an addressable temporary of the
    // result kind (converting real operands to (re, 0)).
    fn complex_operand(
        &mut self,
        ctx: &mut FunctionCtx,
        operand: NodeId,
        result_ty: TypeId,
    ) -> Result<crate::ir::LocalId> {
        let operand_ty = self.expression_conv_type(operand)?;
        let kind = match self.bundle.get(self.bundle.unqualified(result_ty)) {
            Type::Complex(kind) => *kind,
            _ => return Err(Error::Internal("complex operand of a real type")),
        };
        let (part_width, part_size) = match kind {
            FloatKind::Float => (FloatWidth::F32, 4u64),
            FloatKind::Double => (FloatWidth::F64, 8),
            FloatKind::LongDouble => (FloatWidth::F80, 16),
        };
        let layout = type_layout(self.bundle, self.traits, result_ty)?;
        let local = self.scratch_local(ctx, layout.size, layout.alignment);
        if self.bundle.is_complex(operand_ty) {
            self.translate_expr_value(ctx, operand)?; // address
            ctx.func.code.push(IrOp::LocalAddr(local));
            ctx.func.code.push(IrOp::Xchg(1));
            ctx.func.code.push(IrOp::Pick(1));
            ctx.func.code.push(IrOp::Xchg(1));
            ctx.func.code.push(IrOp::CopyMemory { size: layout.size });
            ctx.func.code.push(IrOp::Pop);
        } else {
            // Real operand widens to (value, 0).
            self.translate_expr_value(ctx, operand)?;
            let part_ty = match kind {
                FloatKind::Float => self.bundle.float(),
                FloatKind::Double => self.bundle.double(),
                FloatKind::LongDouble => self.bundle.long_double(),
            };
            self.emit_scalar_conversion(ctx, operand_ty, part_ty)?;
            ctx.func.code.push(IrOp::LocalAddr(local));
            ctx.func.code.push(IrOp::StoreFloat {
                width: part_width,
                volatile: false,
            });
            match part_width {
                FloatWidth::F32 => ctx.func.code.push(IrOp::F32Const(0.0)),
                FloatWidth::F64 => ctx.func.code.push(IrOp::F64Const(0.0)),
                FloatWidth::F80 => ctx.func.code.push(IrOp::LongDoubleConst(0.0)),
            }
            ctx.func.code.push(IrOp::LocalAddr(local));
            self.push_offset(ctx, part_size as i64);
            ctx.func.code.push(IrOp::StoreFloat {
                width: part_width,
                volatile: false,
            });
        }
        Ok(local)
    }

    fn push_offset(&mut self, ctx: &mut FunctionCtx, offset: i64) {
        if offset != 0 {
            ctx.func.code.push(IrOp::IntConst(offset));
            ctx.func.code.push(IrOp::IntAdd(OpWidth::W64));
        }
    }
}
