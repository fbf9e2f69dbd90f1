//! Expression analysis.

use super::{Analyzer, TypeAnalysisContext};
use crate::ast::{
    AssignOp, BinaryOp, BuiltinOp, Category, Constant, ConstantClass, ConstantValue,
    IntegerConstantType, Initializer, NodeId, NodeKind, UnaryOp,
};
use crate::result::{Error, Result};
use crate::source::SourceLocation;
use crate::target::ScalarClass;
use crate::types::{
    self, promote, resolve_member, type_layout, usual_arithmetic_conversions, FloatKind,
    FunctionMode, Type, TypeId,
};

impl Analyzer<'_> {
    pub(super) fn analyze_constant(&mut self, id: NodeId, constant: &Constant) -> Result<()> {
        let (ty, class, value) = match constant {
            Constant::Bool(value) => (
                self.bundle.bool_(),
                ConstantClass::Integer,
                ConstantValue::Integer(i64::from(*value)),
            ),
            Constant::Char(value) => (
                self.bundle.signed_int(),
                ConstantClass::Integer,
                ConstantValue::Integer(*value),
            ),
            Constant::Integer { value, base } => {
                let ty = match base {
                    IntegerConstantType::Int => self.bundle.signed_int(),
                    IntegerConstantType::UnsignedInt => self.bundle.unsigned_int(),
                    IntegerConstantType::Long => self.bundle.signed_long(),
                    IntegerConstantType::UnsignedLong => self.bundle.unsigned_long(),
                    IntegerConstantType::LongLong => self.bundle.signed_long_long(),
                    IntegerConstantType::UnsignedLongLong => self.bundle.unsigned_long_long(),
                };
                (ty, ConstantClass::Integer, ConstantValue::Integer(*value as i64))
            }
            Constant::Float { value, kind } => {
                let ty = match kind {
                    FloatKind::Float => self.bundle.float(),
                    FloatKind::Double => self.bundle.double(),
                    FloatKind::LongDouble => self.bundle.long_double(),
                };
                (ty, ConstantClass::Float, ConstantValue::Float(*value))
            }
            Constant::BitPrecise { value, signed } => {
                let ty = self.bundle.bit_precise(value.width(), *signed);
                let payload = if value.width() <= crate::bigint::VALUE_BIT {
                    ConstantValue::Integer(value.to_signed()?)
                } else {
                    ConstantValue::BigInteger(value.clone())
                };
                (ty, ConstantClass::Integer, payload)
            }
            Constant::NullPointer => (
                self.bundle.null_pointer(),
                ConstantClass::Integer,
                ConstantValue::Integer(0),
            ),
        };
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(ty);
        props.constant = class;
        props.constant_value = Some(value);
        Ok(())
    }

    pub(super) fn analyze_identifier(
        &mut self,
        id: NodeId,
        name: &str,
        location: SourceLocation,
    ) -> Result<()> {
        use super::scope::ScopedIdentifier;
        let symbol = self
            .scopes
            .resolve_ordinary(name)
            .ok_or_else(|| Error::at(location, format!("use of undeclared identifier '{name}'")))?;
        let entry = self.scopes.entry(symbol).identifier.clone();
        let props = &mut self.arena.node_mut(id).props;
        props.scoped_id = Some(symbol);
        match entry {
            ScopedIdentifier::Object { ty, storage, .. } => {
                props.category = Category::Expression;
                props.ty = Some(ty);
                props.lvalue = true;
                props.addressable = storage != crate::ast::StorageClass::Register;
                props.atomic = self.bundle.qualifiers_of(ty).atomic;
            }
            ScopedIdentifier::Function { ty, .. } => {
                props.category = Category::Expression;
                props.ty = Some(ty);
                props.addressable = true;
                props.constant = ConstantClass::Address;
                props.constant_value = Some(ConstantValue::Address {
                    symbol: name.to_string(),
                    offset: 0,
                });
            }
            ScopedIdentifier::EnumConstant { ty, value } => {
                props.category = Category::Expression;
                props.ty = Some(ty);
                props.constant = ConstantClass::Integer;
                props.constant_value = Some(ConstantValue::Integer(value));
            }
            ScopedIdentifier::TypeDefinition { ty } => {
                props.category = Category::Type;
                props.ty = Some(ty);
            }
            ScopedIdentifier::TypeTag { .. } | ScopedIdentifier::Label { .. } => {
                return Err(Error::at(location, format!("'{name}' is not an expression")));
            }
        }
        Ok(())
    }

    pub(super) fn analyze_string_literal(&mut self, id: NodeId, bytes: &[u8]) -> Result<()> {
        let ty = self
            .bundle
            .array(self.bundle.char_(), types::ArrayBoundary::Bounded(bytes.len() as u64));
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(ty);
        props.lvalue = true;
        props.addressable = true;
        props.constant = ConstantClass::Address;
        props.constant_value = Some(ConstantValue::StringAddress {
            literal: bytes.to_vec(),
            offset: 0,
        });
        Ok(())
    }

    pub(super) fn analyze_struct_member(
        &mut self,
        id: NodeId,
        base: NodeId,
        member: &str,
        indirect: bool,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(base)?;
        self.require_expression(base)?;
        let aggregate_ty = if indirect {
            let base_ty = self.conv_all(base)?;
            self.bundle
                .pointee(base_ty)
                .map_err(|_| Error::at(location, "member arrow requires a pointer to a structure"))?
        } else {
            self.arena
                .props(base)
                .ty
                .ok_or(Error::Internal("untyped member base"))?
        };
        let qualifiers = self.bundle.qualifiers_of(aggregate_ty);
        let unqualified = self.bundle.unqualified(aggregate_ty);
        if !matches!(self.bundle.get(unqualified), Type::Structure(_)) {
            return Err(Error::at(location, "member access requires a structure or union"));
        }
        if !self.bundle.is_complete(unqualified) {
            return Err(Error::at(location, "member access into an incomplete type"));
        }
        let info = resolve_member(self.bundle, self.traits, unqualified, member)?
            .ok_or_else(|| Error::at(location, format!("no member named '{member}'")))?;
        let member_ty = self.bundle.qualified(info.ty, qualifiers);
        let base_props = self.arena.props(base).clone();
        let atomic = self.bundle.qualifiers_of(member_ty).atomic || base_props.atomic;
        let aggregate_rvalue = !indirect
            && !base_props.lvalue
            && (self.bundle.is_aggregate(member_ty) || self.bundle.is_complex(member_ty));
        let temporary = if aggregate_rvalue {
            Some(self.allocate_temporary())
        } else {
            None
        };
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(member_ty);
        props.lvalue = indirect || base_props.lvalue;
        props.bitfield = info.bitfield;
        props.addressable = props.lvalue && info.bitfield.is_none();
        props.atomic = atomic;
        props.temporary = temporary;
        Ok(())
    }

    pub(super) fn analyze_array_subscript(
        &mut self,
        id: NodeId,
        array: NodeId,
        subscript: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(array)?;
        self.analyze_node(subscript)?;
        let array_ty = self.conv_all(array)?;
        let subscript_ty = self.conv_all(subscript)?;
        let (pointer_node, index_node, element) = if self.bundle.is_pointer(array_ty) {
            if !self.bundle.is_integral(subscript_ty) {
                return Err(Error::at(location, "array subscript shall be integral"));
            }
            (array, subscript, self.bundle.pointee(array_ty)?)
        } else if self.bundle.is_pointer(subscript_ty) {
            if !self.bundle.is_integral(array_ty) {
                return Err(Error::at(location, "array subscript shall be integral"));
            }
            (subscript, array, self.bundle.pointee(subscript_ty)?)
        } else {
            return Err(Error::at(
                location,
                "array subscript requires one pointer operand",
            ));
        };
        let atomic = self.bundle.qualifiers_of(element).atomic;
        // The element of a named constant array is itself addressable as a
        // constant; propagate the classification for address arithmetic.
        let pointer_const = self.is_lvalue_reference_constant(pointer_node)?;
        let index_const = self.arena.props(index_node).constant == ConstantClass::Integer;
        let constant_address = if pointer_const && index_const {
            self.fold_element_address(pointer_node, index_node, element)
        } else {
            None
        };
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(element);
        props.lvalue = true;
        props.addressable = true;
        props.atomic = atomic;
        if let Some(value) = constant_address {
            props.constant = ConstantClass::Address;
            props.constant_value = Some(value);
        } else if pointer_const && index_const {
            props.constant = ConstantClass::Address;
        }
        Ok(())
    }

    pub(super) fn analyze_unary(
        &mut self,
        id: NodeId,
        op: UnaryOp,
        operand: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(operand)?;
        self.require_expression(operand)?;
        match op {
            UnaryOp::Plus | UnaryOp::Negate => {
                let ty = self.conv_all(operand)?;
                if !self.bundle.is_arithmetic(ty) {
                    return Err(Error::at(location, "unary arithmetic requires an arithmetic operand"));
                }
                let result = if self.bundle.is_integral(ty) {
                    promote(self.bundle, self.traits, ty)?
                } else {
                    ty
                };
                let folded = self.fold_unary(op, operand, result)?;
                self.finish_rvalue(id, result, folded);
            }
            UnaryOp::Invert => {
                let ty = self.conv_all(operand)?;
                if !self.bundle.is_integral(ty) {
                    return Err(Error::at(location, "bitwise complement requires an integral operand"));
                }
                let result = promote(self.bundle, self.traits, ty)?;
                let folded = self.fold_unary(op, operand, result)?;
                self.finish_rvalue(id, result, folded);
            }
            UnaryOp::LogicalNot => {
                let ty = self.conv_all(operand)?;
                if !self.bundle.is_scalar(ty) {
                    return Err(Error::at(location, "logical negation requires a scalar operand"));
                }
                let result = self.bundle.signed_int();
                let folded = self.fold_unary(op, operand, result)?;
                self.finish_rvalue(id, result, folded);
            }
            UnaryOp::AddressOf => {
                let operand_props = self.arena.props(operand).clone();
                let operand_ty = operand_props
                    .ty
                    .ok_or(Error::Internal("untyped address-of operand"))?;
                let function = self.bundle.is_function(operand_ty);
                if !operand_props.addressable && !function {
                    return Err(Error::at(location, "operand of unary & is not addressable"));
                }
                let result = self.bundle.pointer(operand_ty);
                let folded = if self.is_lvalue_reference_constant(operand)? || function {
                    let value = self.lvalue_address(operand);
                    Some((ConstantClass::Address, value))
                } else {
                    None
                };
                self.finish_rvalue(id, result, folded);
            }
            UnaryOp::Indirection => {
                let ty = self.conv_all(operand)?;
                let pointee = self
                    .bundle
                    .pointee(ty)
                    .map_err(|_| Error::at(location, "indirection requires a pointer operand"))?;
                let atomic = self.bundle.qualifiers_of(pointee).atomic;
                let props = &mut self.arena.node_mut(id).props;
                props.category = Category::Expression;
                props.ty = Some(pointee);
                props.lvalue = true;
                props.addressable = true;
                props.atomic = atomic;
            }
            UnaryOp::PreIncrement
            | UnaryOp::PreDecrement
            | UnaryOp::PostIncrement
            | UnaryOp::PostDecrement => {
                let operand_props = self.arena.props(operand).clone();
                if !operand_props.lvalue {
                    return Err(Error::at(location, "increment/decrement requires an lvalue"));
                }
                let operand_ty = operand_props
                    .ty
                    .ok_or(Error::Internal("untyped operand"))?;
                if self.bundle.qualifiers_of(operand_ty).constant {
                    return Err(Error::at(location, "increment/decrement of a const object"));
                }
                let value_ty = self.bundle.unqualified(operand_ty);
                let scalar = self.bundle.is_pointer(value_ty)
                    || (self.bundle.is_arithmetic(value_ty) && !self.bundle.is_complex(value_ty));
                if !scalar {
                    return Err(Error::at(
                        location,
                        "increment/decrement requires a real or pointer operand",
                    ));
                }
                self.finish_rvalue(id, value_ty, None);
            }
        }
        Ok(())
    }

    pub(super) fn analyze_binary(
        &mut self,
        id: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(lhs)?;
        self.analyze_node(rhs)?;
        let lhs_ty = self.conv_all(lhs)?;
        let rhs_ty = self.conv_all(rhs)?;
        let both_arithmetic = self.bundle.is_arithmetic(lhs_ty) && self.bundle.is_arithmetic(rhs_ty);
        let result = match op {
            BinaryOp::Add => {
                if both_arithmetic {
                    usual_arithmetic_conversions(self.bundle, self.traits, lhs_ty, rhs_ty)?
                } else if self.bundle.is_pointer(lhs_ty) && self.bundle.is_integral(rhs_ty) {
                    self.require_complete_pointee(lhs_ty, location)?;
                    lhs_ty
                } else if self.bundle.is_integral(lhs_ty) && self.bundle.is_pointer(rhs_ty) {
                    self.require_complete_pointee(rhs_ty, location)?;
                    rhs_ty
                } else {
                    return Err(Error::at(location, "invalid operands to binary +"));
                }
            }
            BinaryOp::Subtract => {
                if both_arithmetic {
                    usual_arithmetic_conversions(self.bundle, self.traits, lhs_ty, rhs_ty)?
                } else if self.bundle.is_pointer(lhs_ty) && self.bundle.is_integral(rhs_ty) {
                    self.require_complete_pointee(lhs_ty, location)?;
                    lhs_ty
                } else if self.bundle.is_pointer(lhs_ty) && self.bundle.is_pointer(rhs_ty) {
                    let lp = self.bundle.pointee(lhs_ty)?;
                    let rp = self.bundle.pointee(rhs_ty)?;
                    let lp = self.bundle.unqualified(lp);
                    let rp = self.bundle.unqualified(rp);
                    if !types::compatible(self.bundle, lp, rp) {
                        return Err(Error::at(location, "subtraction of incompatible pointers"));
                    }
                    self.type_for_class(self.traits.ptrdiff_type)
                } else {
                    return Err(Error::at(location, "invalid operands to binary -"));
                }
            }
            BinaryOp::Multiply | BinaryOp::Divide => {
                if !both_arithmetic {
                    return Err(Error::at(location, "multiplicative operands shall be arithmetic"));
                }
                usual_arithmetic_conversions(self.bundle, self.traits, lhs_ty, rhs_ty)?
            }
            BinaryOp::Modulo | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if !self.bundle.is_integral(lhs_ty) || !self.bundle.is_integral(rhs_ty) {
                    return Err(Error::at(location, "operands shall have integral type"));
                }
                usual_arithmetic_conversions(self.bundle, self.traits, lhs_ty, rhs_ty)?
            }
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                if !self.bundle.is_integral(lhs_ty) || !self.bundle.is_integral(rhs_ty) {
                    return Err(Error::at(location, "shift operands shall have integral type"));
                }
                // Each operand promotes independently; the result takes the
                // promoted left type.
                promote(self.bundle, self.traits, lhs_ty)?
            }
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ok = both_arithmetic
                    || (self.bundle.is_pointer(lhs_ty)
                        && self.bundle.is_pointer(rhs_ty)
                        && self.pointees_compatible(lhs_ty, rhs_ty)?);
                if !ok {
                    return Err(Error::at(location, "invalid relational comparison operands"));
                }
                self.bundle.signed_int()
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                if !self.equality_comparable(lhs, rhs, lhs_ty, rhs_ty)? {
                    return Err(Error::at(location, "invalid equality comparison operands"));
                }
                self.bundle.signed_int()
            }
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let lhs_scalar = self.bundle.is_scalar(lhs_ty);
                let rhs_scalar = self.bundle.is_scalar(rhs_ty);
                if !lhs_scalar || !rhs_scalar {
                    return Err(Error::at(location, "logical operands shall be scalar"));
                }
                self.bundle.signed_int()
            }
        };
        let folded = self.fold_binary(op, lhs, rhs, result)?;
        self.finish_rvalue(id, result, folded);
        Ok(())
    }

    fn require_complete_pointee(&self, pointer: TypeId, location: SourceLocation) -> Result<()> {
        let pointee = self.bundle.pointee(pointer)?;
        if !self.bundle.is_complete(pointee) {
            return Err(Error::at(location, "pointer arithmetic on incomplete type"));
        }
        Ok(())
    }

    fn pointees_compatible(&self, lhs: TypeId, rhs: TypeId) -> Result<bool> {
        let lp = self.bundle.pointee(lhs)?;
        let rp = self.bundle.pointee(rhs)?;
        let lp = self.bundle.unqualified(lp);
        let rp = self.bundle.unqualified(rp);
        Ok(types::compatible(self.bundle, lp, rp))
    }

    fn equality_comparable(
        &self,
        lhs: NodeId,
        rhs: NodeId,
        lhs_ty: TypeId,
        rhs_ty: TypeId,
    ) -> Result<bool> {
        let both_arithmetic =
            self.bundle.is_arithmetic(lhs_ty) && self.bundle.is_arithmetic(rhs_ty);
        if both_arithmetic {
            return Ok(true);
        }
        let null = |node: NodeId, ty: TypeId| {
            matches!(self.bundle.get(self.bundle.unqualified(ty)), Type::NullPointer)
                || (self.arena.props(node).constant == ConstantClass::Integer
                    && self.arena.props(node).constant_value.as_ref().and_then(ConstantValue::as_integer)
                        == Some(0))
        };
        if self.bundle.is_pointer(lhs_ty) && self.bundle.is_pointer(rhs_ty) {
            let lp = self.bundle.pointee(lhs_ty)?;
            let rp = self.bundle.pointee(rhs_ty)?;
            let lp = self.bundle.unqualified(lp);
            let rp = self.bundle.unqualified(rp);
            return Ok(self.bundle.is_void(lp)
                || self.bundle.is_void(rp)
                || types::compatible(self.bundle, lp, rp));
        }
        if self.bundle.is_pointer(lhs_ty) && null(rhs, rhs_ty) {
            return Ok(true);
        }
        if self.bundle.is_pointer(rhs_ty) && null(lhs, lhs_ty) {
            return Ok(true);
        }
        // The nullptr type compares with any pointer, boolean or itself.
        let lhs_nullptr = matches!(self.bundle.get(self.bundle.unqualified(lhs_ty)), Type::NullPointer);
        let rhs_nullptr = matches!(self.bundle.get(self.bundle.unqualified(rhs_ty)), Type::NullPointer);
        if lhs_nullptr || rhs_nullptr {
            let other = if lhs_nullptr { rhs_ty } else { lhs_ty };
            return Ok(self.bundle.is_pointer(other)
                || matches!(self.bundle.get(self.bundle.unqualified(other)), Type::Bool | Type::NullPointer));
        }
        Ok(false)
    }

    pub(super) fn analyze_cast(
        &mut self,
        id: NodeId,
        type_name: NodeId,
        operand: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(type_name)?;
        let target = self
            .arena
            .props(type_name)
            .ty
            .ok_or_else(|| Error::at(location, "cast requires a type name"))?;
        self.analyze_node(operand)?;
        let source = self.conv_all(operand)?;
        if !self.bundle.is_void(target) {
            if !self.bundle.is_scalar(target) {
                return Err(Error::at(location, "cast target shall be scalar or void"));
            }
            if !self.bundle.is_scalar(source) {
                return Err(Error::at(location, "cast source shall be scalar"));
            }
            let float_pointer = (self.bundle.is_floating(target) && self.bundle.is_pointer(source))
                || (self.bundle.is_pointer(target) && self.bundle.is_floating(source));
            if float_pointer {
                return Err(Error::at(location, "cast between floating and pointer types"));
            }
        }
        let result = self.bundle.unqualified(target);
        let folded = self.fold_cast(operand, result)?;
        self.finish_rvalue(id, result, folded);
        Ok(())
    }

    pub(super) fn analyze_call(
        &mut self,
        id: NodeId,
        callee: NodeId,
        arguments: &[NodeId],
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(callee)?;
        let callee_ty = self.conv_all(callee)?;
        let function_ty = self
            .bundle
            .pointee(callee_ty)
            .map_err(|_| Error::at(location, "called object is not a function"))?;
        let function = match self.bundle.get(self.bundle.unqualified(function_ty)) {
            Type::Function(function) => function.clone(),
            _ => return Err(Error::at(location, "called object is not a function")),
        };
        for &argument in arguments {
            self.analyze_node(argument)?;
            self.require_expression(argument)?;
        }
        if function.mode == FunctionMode::Prototype {
            let takes_void = function.parameters.len() == 1
                && function
                    .parameters
                    .first()
                    .and_then(|p| p.ty)
                    .map(|t| self.bundle.is_void(t))
                    .unwrap_or(false);
            let arity = if takes_void { 0 } else { function.parameters.len() };
            if arguments.len() < arity || (arguments.len() > arity && !function.ellipsis) {
                return Err(Error::at(location, "wrong number of call arguments"));
            }
            if !takes_void {
                for (parameter, &argument) in function.parameters.iter().zip(arguments) {
                    if let Some(parameter_ty) = parameter.ty {
                        let adjusted = self.parameter_adjusted_type(parameter_ty);
                        self.is_node_assignable_to_type(argument, adjusted)?;
                    }
                }
            }
        }
        let return_ty = function.return_type;
        let temporary = if self.bundle.is_aggregate(return_ty) || self.bundle.is_complex(return_ty)
        {
            Some(self.allocate_temporary())
        } else {
            None
        };
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(return_ty);
        props.temporary = temporary;
        Ok(())
    }

    pub(super) fn analyze_compound_literal(
        &mut self,
        id: NodeId,
        type_name: NodeId,
        initializer: &Initializer,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(type_name)?;
        let declared = self
            .arena
            .props(type_name)
            .ty
            .ok_or_else(|| Error::at(location, "compound literal requires a type name"))?;
        let ty = self.complete_array_from_initializer(declared, initializer)?;
        if !self.bundle.is_complete(ty) {
            return Err(Error::at(location, "compound literal of incomplete type"));
        }
        self.analyze_initializer(ty, initializer, location)?;
        let temporary = self.allocate_temporary();
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(ty);
        props.lvalue = true;
        props.addressable = true;
        props.temporary = Some(temporary);
        Ok(())
    }

    pub(super) fn analyze_generic_selection(
        &mut self,
        id: NodeId,
        control: NodeId,
        associations: &[(Option<NodeId>, NodeId)],
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(control)?;
        let control_ty = self.conv_all(control)?;
        let control_ty = self.bundle.unqualified(control_ty);
        let mut chosen = None;
        let mut default_expr = None;
        for (type_name, expression) in associations {
            self.analyze_node(*expression)?;
            match type_name {
                Some(type_name) => {
                    self.analyze_node(*type_name)?;
                    let assoc_ty = self
                        .arena
                        .props(*type_name)
                        .ty
                        .ok_or_else(|| Error::at(location, "generic association requires a type"))?;
                    if types::compatible(self.bundle, control_ty, self.bundle.unqualified(assoc_ty)) {
                        if chosen.is_some() {
                            return Err(Error::at(
                                location,
                                "multiple compatible generic associations",
                            ));
                        }
                        chosen = Some(*expression);
                    }
                }
                None => {
                    if default_expr.is_some() {
                        return Err(Error::at(location, "duplicate default generic association"));
                    }
                    default_expr = Some(*expression);
                }
            }
        }
        let selected = chosen.or(default_expr).ok_or_else(|| {
            Error::at(location, "no generic association matches the controlling type")
        })?;
        let selected_props = self.arena.props(selected).clone();
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = selected_props.ty;
        props.lvalue = selected_props.lvalue;
        props.addressable = selected_props.addressable;
        props.constant = selected_props.constant;
        props.constant_value = selected_props.constant_value;
        props.atomic = selected_props.atomic;
        props.bitfield = selected_props.bitfield;
        Ok(())
    }

    pub(super) fn analyze_conditional(
        &mut self,
        id: NodeId,
        condition: NodeId,
        then_expr: Option<NodeId>,
        else_expr: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(condition)?;
        let condition_ty = self.conv_all(condition)?;
        if !self.bundle.is_scalar(condition_ty) {
            return Err(Error::at(location, "conditional condition shall be scalar"));
        }
        if let Some(then_expr) = then_expr {
            self.analyze_node(then_expr)?;
        }
        self.analyze_node(else_expr)?;
        let then_node = then_expr.unwrap_or(condition);
        let then_ty = self.conv_all(then_node)?;
        let else_ty = self.conv_all(else_expr)?;
        let result = self.conditional_result_type(then_node, else_expr, then_ty, else_ty, location)?;
        // A constant condition selects its branch's classification.
        let folded = match self.arena.props(condition).constant_value.clone() {
            Some(value) if self.arena.props(condition).constant != ConstantClass::None => {
                let truthy = match value {
                    ConstantValue::Integer(v) => v != 0,
                    ConstantValue::BigInteger(ref big) => !big.is_zero()?,
                    ConstantValue::Float(v) => v != 0.0,
                    _ => true,
                };
                let branch = if truthy { then_node } else { else_expr };
                let branch_props = self.arena.props(branch);
                if branch_props.constant != ConstantClass::None {
                    Some((branch_props.constant, branch_props.constant_value.clone()))
                } else {
                    None
                }
            }
            _ => None,
        };
        self.finish_rvalue(id, result, folded);
        Ok(())
    }

    fn conditional_result_type(
        &mut self,
        then_node: NodeId,
        else_node: NodeId,
        then_ty: TypeId,
        else_ty: TypeId,
        location: SourceLocation,
    ) -> Result<TypeId> {
        if self.bundle.is_arithmetic(then_ty) && self.bundle.is_arithmetic(else_ty) {
            return usual_arithmetic_conversions(self.bundle, self.traits, then_ty, else_ty);
        }
        if self.bundle.is_void(then_ty) && self.bundle.is_void(else_ty) {
            return Ok(self.bundle.void());
        }
        if types::compatible(self.bundle, then_ty, else_ty) {
            return types::composite(self.bundle, then_ty, else_ty);
        }
        let null = |analyzer: &Self, node: NodeId, ty: TypeId| {
            matches!(analyzer.bundle.get(analyzer.bundle.unqualified(ty)), Type::NullPointer)
                || (analyzer.arena.props(node).constant == ConstantClass::Integer
                    && analyzer
                        .arena
                        .props(node)
                        .constant_value
                        .as_ref()
                        .and_then(ConstantValue::as_integer)
                        == Some(0))
        };
        if self.bundle.is_pointer(then_ty) && null(self, else_node, else_ty) {
            return Ok(then_ty);
        }
        if self.bundle.is_pointer(else_ty) && null(self, then_node, then_ty) {
            return Ok(else_ty);
        }
        if self.bundle.is_pointer(then_ty) && self.bundle.is_pointer(else_ty) {
            let then_pointee = self.bundle.pointee(then_ty)?;
            let else_pointee = self.bundle.pointee(else_ty)?;
            let quals = self
                .bundle
                .qualifiers_of(then_pointee)
                .merge(self.bundle.qualifiers_of(else_pointee));
            let then_pointee = self.bundle.unqualified(then_pointee);
            let else_pointee = self.bundle.unqualified(else_pointee);
            let pointee = if self.bundle.is_void(then_pointee) || self.bundle.is_void(else_pointee) {
                self.bundle.void()
            } else if types::compatible(self.bundle, then_pointee, else_pointee) {
                types::composite(self.bundle, then_pointee, else_pointee)?
            } else {
                return Err(Error::at(location, "incompatible conditional branches"));
            };
            let qualified = self.bundle.qualified(pointee, quals);
            return Ok(self.bundle.pointer(qualified));
        }
        Err(Error::at(location, "incompatible conditional branches"))
    }

    pub(super) fn analyze_comma(
        &mut self,
        id: NodeId,
        expressions: &[NodeId],
        location: SourceLocation,
    ) -> Result<()> {
        if expressions.is_empty() {
            return Err(Error::at(location, "empty comma expression"));
        }
        for &expression in expressions {
            self.analyze_node(expression)?;
            self.require_expression(expression)?;
        }
        let last = *expressions
            .last()
            .ok_or(Error::Internal("empty comma expression survived analysis"))?;
        let result = self.conv_all(last)?;
        self.finish_rvalue(id, result, None);
        Ok(())
    }

    pub(super) fn analyze_assignment(
        &mut self,
        id: NodeId,
        op: AssignOp,
        target: NodeId,
        value: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(target)?;
        self.analyze_node(value)?;
        let target_props = self.arena.props(target).clone();
        if !target_props.lvalue {
            return Err(Error::at(location, "assignment target shall be an lvalue"));
        }
        let target_ty = target_props
            .ty
            .ok_or(Error::Internal("untyped assignment target"))?;
        if self.bundle.qualifiers_of(target_ty).constant {
            return Err(Error::at(location, "assignment to a const object"));
        }
        if self.bundle.is_array(target_ty) {
            return Err(Error::at(location, "assignment to an array"));
        }
        if !self.bundle.is_complete(target_ty) {
            return Err(Error::at(location, "assignment to an incomplete type"));
        }
        let value_ty = self.conv_all(value)?;
        match op {
            AssignOp::Simple => {
                self.is_node_assignable_to_type(value, target_ty)?;
            }
            AssignOp::Add | AssignOp::Subtract => {
                let ok = (self.bundle.is_arithmetic(target_ty) && self.bundle.is_arithmetic(value_ty))
                    || (self.bundle.is_pointer(target_ty) && self.bundle.is_integral(value_ty));
                if !ok {
                    return Err(Error::at(location, "invalid compound assignment operands"));
                }
            }
            AssignOp::Multiply | AssignOp::Divide => {
                if !self.bundle.is_arithmetic(target_ty) || !self.bundle.is_arithmetic(value_ty) {
                    return Err(Error::at(location, "invalid compound assignment operands"));
                }
            }
            AssignOp::Modulo
            | AssignOp::ShiftLeft
            | AssignOp::ShiftRight
            | AssignOp::BitAnd
            | AssignOp::BitOr
            | AssignOp::BitXor => {
                if !self.bundle.is_integral(target_ty) || !self.bundle.is_integral(value_ty) {
                    return Err(Error::at(location, "invalid compound assignment operands"));
                }
            }
        }
        let result = self.bundle.unqualified(target_ty);
        self.finish_rvalue(id, result, None);
        Ok(())
    }

    pub(super) fn analyze_builtin(
        &mut self,
        id: NodeId,
        builtin: BuiltinOp,
        arguments: &[NodeId],
        location: SourceLocation,
    ) -> Result<()> {
        match builtin {
            BuiltinOp::SizeOf | BuiltinOp::AlignOf => {
                let [argument] = arguments else {
                    return Err(Error::at(location, "builtin expects one argument"));
                };
                self.analyze_node(*argument)?;
                let ty = self
                    .arena
                    .props(*argument)
                    .ty
                    .ok_or_else(|| Error::at(location, "builtin argument has no type"))?;
                if self.bundle.is_function(ty) {
                    return Err(Error::at(location, "sizeof of a function type"));
                }
                if self.arena.props(*argument).bitfield.is_some() {
                    return Err(Error::at(location, "sizeof of a bitfield"));
                }
                if !self.bundle.is_complete(ty) {
                    return Err(Error::at(location, "sizeof of an incomplete type"));
                }
                let result = self.type_for_class(self.traits.size_type);
                let folded = if self.bundle.is_variably_modified(ty) {
                    None
                } else {
                    let layout = type_layout(self.bundle, self.traits, ty)?;
                    let value = if builtin == BuiltinOp::SizeOf {
                        layout.size
                    } else {
                        layout.alignment
                    };
                    Some((ConstantClass::Integer, Some(ConstantValue::Integer(value as i64))))
                };
                self.finish_rvalue(id, result, folded);
            }
            BuiltinOp::OffsetOf => {
                let [type_name, member] = arguments else {
                    return Err(Error::at(location, "offsetof expects a type and a member"));
                };
                self.analyze_node(*type_name)?;
                let ty = self
                    .arena
                    .props(*type_name)
                    .ty
                    .ok_or_else(|| Error::at(location, "offsetof requires a type name"))?;
                let member_name = match &self.arena.node(*member).kind {
                    NodeKind::Identifier(name) => name.clone(),
                    _ => return Err(Error::at(location, "offsetof requires a member designator")),
                };
                let info = resolve_member(self.bundle, self.traits, self.bundle.unqualified(ty), &member_name)?
                    .ok_or_else(|| Error::at(location, format!("no member named '{member_name}'")))?;
                let member_props = &mut self.arena.node_mut(*member).props;
                member_props.category = Category::MemberDesignator;
                let result = self.type_for_class(self.traits.size_type);
                let folded = Some((
                    ConstantClass::Integer,
                    Some(ConstantValue::Integer(info.offset as i64)),
                ));
                self.finish_rvalue(id, result, folded);
            }
            BuiltinOp::VaStart | BuiltinOp::VaEnd => {
                let [ap] = arguments else {
                    return Err(Error::at(location, "builtin expects one argument"));
                };
                if builtin == BuiltinOp::VaStart
                    && !self.function.as_ref().map(|f| f.variadic).unwrap_or(false)
                {
                    return Err(Error::at(location, "va_start outside a variadic function"));
                }
                self.analyze_node(*ap)?;
                self.require_expression(*ap)?;
                self.finish_rvalue(id, self.bundle.void(), None);
            }
            BuiltinOp::VaCopy => {
                let [destination, source] = arguments else {
                    return Err(Error::at(location, "va_copy expects two arguments"));
                };
                self.analyze_node(*destination)?;
                self.analyze_node(*source)?;
                self.require_expression(*destination)?;
                self.require_expression(*source)?;
                self.finish_rvalue(id, self.bundle.void(), None);
            }
            BuiltinOp::AddOverflow | BuiltinOp::SubOverflow | BuiltinOp::MulOverflow => {
                let [lhs, rhs, result] = arguments else {
                    return Err(Error::at(location, "overflow builtin expects three arguments"));
                };
                self.analyze_node(*lhs)?;
                self.analyze_node(*rhs)?;
                self.analyze_node(*result)?;
                let lhs_ty = self.conv_all(*lhs)?;
                let rhs_ty = self.conv_all(*rhs)?;
                if !self.bundle.is_integral(lhs_ty) || !self.bundle.is_integral(rhs_ty) {
                    return Err(Error::at(location, "overflow operands shall be integral"));
                }
                let result_ty = self.conv_all(*result)?;
                let pointee = self
                    .bundle
                    .pointee(result_ty)
                    .map_err(|_| Error::at(location, "overflow result shall be a pointer"))?;
                if !self.bundle.is_integral(pointee) {
                    return Err(Error::at(location, "overflow result shall point to an integer"));
                }
                self.finish_rvalue(id, self.bundle.bool_(), None);
            }
            BuiltinOp::VaArg => {
                let [ap, type_name] = arguments else {
                    return Err(Error::at(location, "va_arg expects an object and a type"));
                };
                self.analyze_node(*ap)?;
                self.require_expression(*ap)?;
                self.analyze_node(*type_name)?;
                let ty = self
                    .arena
                    .props(*type_name)
                    .ty
                    .ok_or_else(|| Error::at(location, "va_arg requires a type name"))?;
                self.finish_rvalue(id, ty, None);
            }
        }
        Ok(())
    }

    /// Mark `id` as an rvalue expression of type `ty`, attaching a folded
    /// constant when one was produced.
    pub(super) fn finish_rvalue(
        &mut self,
        id: NodeId,
        ty: TypeId,
        folded: Option<(ConstantClass, Option<ConstantValue>)>,
    ) {
        let temporary = if self.bundle.is_aggregate(ty) || self.bundle.is_complex(ty) {
            Some(self.allocate_temporary())
        } else {
            None
        };
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Expression;
        props.ty = Some(ty);
        props.lvalue = false;
        props.addressable = false;
        if let Some((class, value)) = folded {
            props.constant = class;
            props.constant_value = value;
        }
        if props.temporary.is_none() {
            props.temporary = temporary;
        }
    }

    /// Bundle type backing a target scalar class.
    pub(crate) fn type_for_class(&self, class: ScalarClass) -> TypeId {
        match class {
            ScalarClass::Bool => self.bundle.bool_(),
            ScalarClass::Char => self.bundle.char_(),
            ScalarClass::SignedChar => self.bundle.signed_char(),
            ScalarClass::UnsignedChar => self.bundle.unsigned_char(),
            ScalarClass::Short => self.bundle.signed_short(),
            ScalarClass::UnsignedShort => self.bundle.unsigned_short(),
            ScalarClass::Int => self.bundle.signed_int(),
            ScalarClass::UnsignedInt => self.bundle.unsigned_int(),
            ScalarClass::Long => self.bundle.signed_long(),
            ScalarClass::UnsignedLong => self.bundle.unsigned_long(),
            ScalarClass::LongLong => self.bundle.signed_long_long(),
            ScalarClass::UnsignedLongLong => self.bundle.unsigned_long_long(),
            ScalarClass::Float => self.bundle.float(),
            ScalarClass::Double => self.bundle.double(),
            ScalarClass::LongDouble => self.bundle.long_double(),
            ScalarClass::Pointer => self.bundle.null_pointer(),
        }
    }
}
