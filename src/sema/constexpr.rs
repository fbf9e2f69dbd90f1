//! Constant-expression evaluation.
//!
//! Folding runs opportunistically during analysis: whenever every operand
//! of a construct is itself constant-classified, the construct's value is
//! computed and attached to its properties. Unsupported combinations fold
//! to "not a constant" rather than erroring; contexts that require a
//! constant expression check the classification afterwards.

use super::Analyzer;
use crate::ast::{BinaryOp, ConstantClass, ConstantValue, NodeId, NodeKind, UnaryOp};
use crate::bigint::{self, BigInt};
use crate::result::Result;
use crate::types::{integral_width, type_layout, Type, TypeId};
use core::cmp::Ordering;

type Folded = Option<(ConstantClass, Option<ConstantValue>)>;

impl Analyzer<'_> {
    fn const_value(&self, node: NodeId) -> Option<(ConstantClass, ConstantValue)> {
        let props = self.arena.props(node);
        if props.constant == ConstantClass::None {
            return None;
        }
        props.constant_value.clone().map(|value| (props.constant, value))
    }

    /// Wrap a host integer to the width and signedness of `ty`.
    fn wrap_integer(&self, value: i64, ty: TypeId) -> i64 {
        let Ok(width) = integral_width(self.bundle, self.traits, ty) else {
            return value;
        };
        if width >= 64 {
            return value;
        }
        let mask = (1u64 << width) - 1;
        let truncated = (value as u64) & mask;
        if self.bundle.is_signed_integer(ty) && truncated >> (width - 1) != 0 {
            (truncated | !mask) as i64
        } else {
            truncated as i64
        }
    }

    fn big_of(&self, value: &ConstantValue, ty: TypeId) -> Option<BigInt> {
        let width = integral_width(self.bundle, self.traits, ty).ok()?;
        match value {
            ConstantValue::Integer(v) => BigInt::from_signed(width, *v).ok(),
            ConstantValue::BigInteger(big) => {
                let mut big = big.clone();
                if self.bundle.is_signed_integer(ty) {
                    big.cast_signed(width).ok()?;
                } else {
                    big.cast_unsigned(width).ok()?;
                }
                Some(big)
            }
            _ => None,
        }
    }

    fn integer_result(&self, value: i64, ty: TypeId) -> Folded {
        Some((
            ConstantClass::Integer,
            Some(ConstantValue::Integer(self.wrap_integer(value, ty))),
        ))
    }

    fn big_result(big: BigInt) -> Folded {
        Some((ConstantClass::Integer, Some(ConstantValue::BigInteger(big))))
    }

    pub(super) fn fold_unary(&mut self, op: UnaryOp, operand: NodeId, result_ty: TypeId) -> Result<Folded> {
        let Some((class, value)) = self.const_value(operand) else {
            return Ok(None);
        };
        let wide = matches!(self.bundle.get(result_ty), Type::BitPrecise { width, .. } if *width > 64);
        Ok(match op {
            UnaryOp::Plus => match value {
                ConstantValue::Integer(v) => self.integer_result(v, result_ty),
                ConstantValue::BigInteger(_) | ConstantValue::Float(_) | ConstantValue::Complex(..) => {
                    Some((class, Some(value)))
                }
                _ => None,
            },
            UnaryOp::Negate => match value {
                ConstantValue::Integer(v) if !wide => self.integer_result(v.wrapping_neg(), result_ty),
                ConstantValue::Float(v) => Some((ConstantClass::Float, Some(ConstantValue::Float(-v)))),
                ref big_value @ (ConstantValue::Integer(_) | ConstantValue::BigInteger(_)) => {
                    let big = match self.big_of(big_value, result_ty) {
                        Some(big) => big,
                        None => return Ok(None),
                    };
                    let width = big.width();
                    let mut digits = big.digits().to_vec();
                    bigint::negate(&mut digits, width)?;
                    Self::big_result(BigInt::from_digits(digits, width)?)
                }
                _ => None,
            },
            UnaryOp::Invert => match value {
                ConstantValue::Integer(v) if !wide => self.integer_result(!v, result_ty),
                ref big_value @ (ConstantValue::Integer(_) | ConstantValue::BigInteger(_)) => {
                    let big = match self.big_of(big_value, result_ty) {
                        Some(big) => big,
                        None => return Ok(None),
                    };
                    let width = big.width();
                    let mut digits = big.digits().to_vec();
                    bigint::invert(&mut digits, width)?;
                    Self::big_result(BigInt::from_digits(digits, width)?)
                }
                _ => None,
            },
            UnaryOp::LogicalNot => {
                let truthy = match value {
                    ConstantValue::Integer(v) => v != 0,
                    ConstantValue::BigInteger(ref big) => !big.is_zero()?,
                    ConstantValue::Float(v) => v != 0.0,
                    ConstantValue::Address { .. } | ConstantValue::StringAddress { .. } => true,
                    ConstantValue::Complex(re, im) => re != 0.0 || im != 0.0,
                };
                Some((
                    ConstantClass::Integer,
                    Some(ConstantValue::Integer(i64::from(!truthy))),
                ))
            }
            _ => None,
        })
    }

    pub(super) fn fold_binary(
        &mut self,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        result_ty: TypeId,
    ) -> Result<Folded> {
        let (Some((_, lhs_value)), Some((_, rhs_value))) =
            (self.const_value(lhs), self.const_value(rhs))
        else {
            return Ok(None);
        };

        // Address plus/minus integer offsets stays an address constant.
        if let (ConstantValue::Address { symbol, offset }, ConstantValue::Integer(delta)) =
            (&lhs_value, &rhs_value)
        {
            if matches!(op, BinaryOp::Add | BinaryOp::Subtract) {
                let scale = self.pointee_size(lhs).unwrap_or(1) as i64;
                let delta = delta * scale;
                let offset = if op == BinaryOp::Add { offset + delta } else { offset - delta };
                return Ok(Some((
                    ConstantClass::Address,
                    Some(ConstantValue::Address {
                        symbol: symbol.clone(),
                        offset,
                    }),
                )));
            }
        }

        let wide = matches!(self.bundle.get(result_ty), Type::BitPrecise { width, .. } if *width > 64)
            || matches!(lhs_value, ConstantValue::BigInteger(_))
            || matches!(rhs_value, ConstantValue::BigInteger(_));
        if wide {
            return self.fold_big_binary(op, &lhs_value, &rhs_value, lhs, rhs, result_ty);
        }

        let ints = (lhs_value.as_integer(), rhs_value.as_integer());
        let floats = (float_of(&lhs_value), float_of(&rhs_value));
        let float_result = self.bundle.is_floating(result_ty);
        Ok(match op {
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
            | BinaryOp::Modulo => {
                if float_result {
                    let (Some(l), Some(r)) = floats else { return Ok(None) };
                    let value = match op {
                        BinaryOp::Add => l + r,
                        BinaryOp::Subtract => l - r,
                        BinaryOp::Multiply => l * r,
                        BinaryOp::Divide => l / r,
                        _ => return Ok(None),
                    };
                    Some((ConstantClass::Float, Some(ConstantValue::Float(value))))
                } else {
                    let (Some(l), Some(r)) = ints else { return Ok(None) };
                    let signed = self.bundle.is_signed_integer(result_ty);
                    let value = match op {
                        BinaryOp::Add => l.wrapping_add(r),
                        BinaryOp::Subtract => l.wrapping_sub(r),
                        BinaryOp::Multiply => l.wrapping_mul(r),
                        BinaryOp::Divide if r != 0 => {
                            if signed {
                                l.wrapping_div(r)
                            } else {
                                ((l as u64) / (r as u64)) as i64
                            }
                        }
                        BinaryOp::Modulo if r != 0 => {
                            if signed {
                                l.wrapping_rem(r)
                            } else {
                                ((l as u64) % (r as u64)) as i64
                            }
                        }
                        _ => return Ok(None),
                    };
                    self.integer_result(value, result_ty)
                }
            }
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                let (Some(l), Some(r)) = ints else { return Ok(None) };
                if !(0..64).contains(&r) {
                    return Ok(None);
                }
                let value = if op == BinaryOp::ShiftLeft {
                    l.wrapping_shl(r as u32)
                } else if self.bundle.is_signed_integer(result_ty) {
                    l.wrapping_shr(r as u32)
                } else {
                    ((l as u64).wrapping_shr(r as u32)) as i64
                };
                self.integer_result(value, result_ty)
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                let (Some(l), Some(r)) = ints else { return Ok(None) };
                let value = match op {
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitOr => l | r,
                    _ => l ^ r,
                };
                self.integer_result(value, result_ty)
            }
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual
            | BinaryOp::Equal | BinaryOp::NotEqual => {
                let ordering = if let (Some(l), Some(r)) = floats {
                    l.partial_cmp(&r)
                } else if let (Some(l), Some(r)) = ints {
                    let Some(lhs_ty) = self.arena.props(lhs).ty else {
                        return Ok(None);
                    };
                    if self.bundle.is_signed_integer(lhs_ty) {
                        Some(l.cmp(&r))
                    } else {
                        Some((l as u64).cmp(&(r as u64)))
                    }
                } else {
                    None
                };
                let Some(ordering) = ordering else { return Ok(None) };
                let truth = match op {
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::LessEqual => ordering != Ordering::Greater,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    BinaryOp::GreaterEqual => ordering != Ordering::Less,
                    BinaryOp::Equal => ordering == Ordering::Equal,
                    _ => ordering != Ordering::Equal,
                };
                Some((
                    ConstantClass::Integer,
                    Some(ConstantValue::Integer(i64::from(truth))),
                ))
            }
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let truthy = |value: &ConstantValue| match value {
                    ConstantValue::Integer(v) => Some(*v != 0),
                    ConstantValue::Float(v) => Some(*v != 0.0),
                    ConstantValue::Address { .. } | ConstantValue::StringAddress { .. } => Some(true),
                    _ => None,
                };
                let (Some(l), Some(r)) = (truthy(&lhs_value), truthy(&rhs_value)) else {
                    return Ok(None);
                };
                let truth = if op == BinaryOp::LogicalAnd { l && r } else { l || r };
                Some((
                    ConstantClass::Integer,
                    Some(ConstantValue::Integer(i64::from(truth))),
                ))
            }
        })
    }

    fn fold_big_binary(
        &mut self,
        op: BinaryOp,
        lhs_value: &ConstantValue,
        rhs_value: &ConstantValue,
        lhs: NodeId,
        _rhs: NodeId,
        result_ty: TypeId,
    ) -> Result<Folded> {
        let operand_ty = match self.bundle.get(result_ty) {
            Type::BitPrecise { .. } => result_ty,
            // Comparison results are int; widen operands to the lhs type.
            _ => match self.arena.props(lhs).ty {
                Some(ty) => ty,
                None => return Ok(None),
            },
        };
        let (Some(l), Some(r)) = (self.big_of(lhs_value, operand_ty), self.big_of(rhs_value, operand_ty))
        else {
            return Ok(None);
        };
        let width = l.width();
        let mut l_digits = l.digits().to_vec();
        let r_digits = r.digits().to_vec();
        Ok(match op {
            BinaryOp::Add => {
                bigint::add(&mut l_digits, &r_digits, width)?;
                Self::big_result(BigInt::from_digits(l_digits, width)?)
            }
            BinaryOp::Subtract => {
                bigint::subtract(&mut l_digits, &r_digits, width)?;
                Self::big_result(BigInt::from_digits(l_digits, width)?)
            }
            BinaryOp::BitAnd => {
                bigint::and(&mut l_digits, &r_digits, width)?;
                Self::big_result(BigInt::from_digits(l_digits, width)?)
            }
            BinaryOp::BitOr => {
                bigint::or(&mut l_digits, &r_digits, width)?;
                Self::big_result(BigInt::from_digits(l_digits, width)?)
            }
            BinaryOp::BitXor => {
                bigint::xor(&mut l_digits, &r_digits, width)?;
                Self::big_result(BigInt::from_digits(l_digits, width)?)
            }
            BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::Less | BinaryOp::LessEqual
            | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ordering = if self.bundle.is_signed_integer(operand_ty) {
                    bigint::signed_compare(&l_digits, &r_digits, width)?
                } else {
                    bigint::unsigned_compare(&l_digits, &r_digits, width)?
                };
                let truth = match op {
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::LessEqual => ordering != Ordering::Greater,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    BinaryOp::GreaterEqual => ordering != Ordering::Less,
                    BinaryOp::Equal => ordering == Ordering::Equal,
                    _ => ordering != Ordering::Equal,
                };
                Some((
                    ConstantClass::Integer,
                    Some(ConstantValue::Integer(i64::from(truth))),
                ))
            }
            _ => None,
        })
    }

    pub(super) fn fold_cast(&mut self, operand: NodeId, target: TypeId) -> Result<Folded> {
        let Some((class, value)) = self.const_value(operand) else {
            return Ok(None);
        };
        if self.bundle.is_integral(target) {
            let target_wide = matches!(self.bundle.get(target), Type::BitPrecise { width, .. } if *width > 64);
            let Some(source_ty) = self.arena.props(operand).ty else {
                return Ok(None);
            };
            return Ok(match value {
                ConstantValue::Integer(_) | ConstantValue::BigInteger(_) if target_wide => {
                    let source_big = self.big_of(&value, source_ty);
                    let Some(mut big) = source_big else { return Ok(None) };
                    let width = integral_width(self.bundle, self.traits, target)?;
                    if self.bundle.is_signed_integer(source_ty) {
                        big.cast_signed(width)?;
                    } else {
                        big.cast_unsigned(width)?;
                    }
                    Self::big_result(big)
                }
                ConstantValue::Integer(v) => {
                    if matches!(self.bundle.get(target), Type::Bool) {
                        self.integer_result(i64::from(v != 0), target)
                    } else {
                        self.integer_result(v, target)
                    }
                }
                ConstantValue::BigInteger(ref big) => {
                    let v = big.to_signed()?;
                    self.integer_result(v, target)
                }
                ConstantValue::Float(v) => self.integer_result(v as i64, target),
                _ => Some((class, Some(value))),
            });
        }
        if self.bundle.is_floating(target) {
            return Ok(match value {
                ConstantValue::Integer(v) => {
                    let Some(source_ty) = self.arena.props(operand).ty else {
                        return Ok(None);
                    };
                    let float = if self.bundle.is_signed_integer(source_ty) {
                        v as f64
                    } else {
                        (v as u64) as f64
                    };
                    Some((ConstantClass::Float, Some(ConstantValue::Float(float))))
                }
                ConstantValue::BigInteger(ref big) => {
                    let Some(source_ty) = self.arena.props(operand).ty else {
                        return Ok(None);
                    };
                    let mut digits = big.digits().to_vec();
                    let float = if self.bundle.is_signed_integer(source_ty) {
                        bigint::signed_to_double(&mut digits, big.width())?
                    } else {
                        bigint::unsigned_to_double(&mut digits, big.width())?
                    };
                    Some((ConstantClass::Float, Some(ConstantValue::Float(float))))
                }
                ConstantValue::Float(v) => {
                    let narrowed = if matches!(self.bundle.get(target), Type::Float) {
                        f64::from(v as f32)
                    } else {
                        v
                    };
                    Some((ConstantClass::Float, Some(ConstantValue::Float(narrowed))))
                }
                _ => None,
            });
        }
        // Pointer targets preserve the source classification.
        Ok(Some((class, Some(value))))
    }

    /// The constant address of an lvalue, when it has one.
    pub(super) fn lvalue_address(&self, node: NodeId) -> Option<ConstantValue> {
        match &self.arena.node(node).kind {
            NodeKind::Identifier(name) => Some(ConstantValue::Address {
                symbol: name.clone(),
                offset: 0,
            }),
            NodeKind::StringLiteral(bytes) => Some(ConstantValue::StringAddress {
                literal: bytes.clone(),
                offset: 0,
            }),
            NodeKind::StructMember { base, member } => {
                let base_ty = self.arena.props(*base).ty?;
                let info = crate::types::resolve_member(
                    self.bundle,
                    self.traits,
                    self.bundle.unqualified(base_ty),
                    member,
                )
                .ok()??;
                offset_address(self.lvalue_address(*base)?, info.offset as i64)
            }
            NodeKind::IndirectStructMember { base, member } => {
                let base_ty = self.bundle.pointee(self.arena.props(*base).ty?).ok()?;
                let info = crate::types::resolve_member(
                    self.bundle,
                    self.traits,
                    self.bundle.unqualified(base_ty),
                    member,
                )
                .ok()??;
                offset_address(self.arena.props(*base).constant_value.clone()?, info.offset as i64)
            }
            NodeKind::ArraySubscript { array, subscript } => {
                let element = self.arena.props(node).ty?;
                self.fold_element_address_inner(*array, *subscript, element)
            }
            NodeKind::Unary {
                op: UnaryOp::Indirection,
                operand,
            } => self.arena.props(*operand).constant_value.clone(),
            _ => None,
        }
    }

    pub(super) fn fold_element_address(
        &self,
        pointer_node: NodeId,
        index_node: NodeId,
        element: TypeId,
    ) -> Option<ConstantValue> {
        self.fold_element_address_inner(pointer_node, index_node, element)
    }

    fn fold_element_address_inner(
        &self,
        pointer_node: NodeId,
        index_node: NodeId,
        element: TypeId,
    ) -> Option<ConstantValue> {
        let base = if self.bundle.is_array(self.arena.props(pointer_node).ty?) {
            self.lvalue_address(pointer_node)?
        } else {
            self.arena.props(pointer_node).constant_value.clone()?
        };
        let index = self
            .arena
            .props(index_node)
            .constant_value
            .as_ref()
            .and_then(ConstantValue::as_integer)?;
        let size = type_layout(self.bundle, self.traits, element).ok()?.size as i64;
        offset_address(base, index * size)
    }

    fn pointee_size(&self, pointer_node: NodeId) -> Option<u64> {
        let ty = self.arena.props(pointer_node).ty?;
        let pointee = self.bundle.pointee(ty).ok()?;
        type_layout(self.bundle, self.traits, pointee).ok().map(|l| l.size)
    }
}

fn offset_address(base: ConstantValue, delta: i64) -> Option<ConstantValue> {
    match base {
        ConstantValue::Address { symbol, offset } => Some(ConstantValue::Address {
            symbol,
            offset: offset + delta,
        }),
        ConstantValue::StringAddress { literal, offset } => Some(ConstantValue::StringAddress {
            literal,
            offset: offset + delta,
        }),
        _ => None,
    }
}

fn float_of(value: &ConstantValue) -> Option<f64> {
    match value {
        ConstantValue::Integer(v) => Some(*v as f64),
        ConstantValue::Float(v) => Some(*v),
        _ => None,
    }
}

