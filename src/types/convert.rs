//! Integer promotions and usual arithmetic conversions.

use super::{FloatKind, Type, TypeBundle, TypeId};
use crate::result::{Error, Result};
use crate::target::{ScalarClass, TypeTraits};

/// Apply lvalue conversion: arrays decay to element pointers, functions to
/// function pointers, and qualifiers are dropped from the value.
pub fn lvalue_conversion(bundle: &mut TypeBundle, ty: TypeId) -> TypeId {
    let unqualified = bundle.unqualified(ty);
    match bundle.get(unqualified) {
        Type::Array { element, .. } => {
            let element = *element;
            bundle.pointer(element)
        }
        Type::Function(_) => bundle.pointer(unqualified),
        _ => unqualified,
    }
}

/// Integer promotion.
///
/// Any integer whose rank is below `int` promotes to `int` when `int` can
/// represent all its values, otherwise to `unsigned int`. Bit-precise
/// integers and types of rank `int` and above are unchanged. Non-integral
/// types pass through untouched (the caller decides whether that is legal).
pub fn promote(bundle: &mut TypeBundle, traits: &TypeTraits, ty: TypeId) -> Result<TypeId> {
    let unqualified = bundle.unqualified(ty);
    if !bundle.is_integral(unqualified) {
        return Ok(unqualified);
    }
    if let Type::BitPrecise { .. } = bundle.get(unqualified) {
        return Ok(unqualified);
    }
    let rank = bundle.integer_rank(unqualified)?;
    if rank >= 2 {
        // Resolve enums to their underlying type even above int rank.
        if let Type::Enumeration(en) = bundle.get(unqualified) {
            return Ok(en.underlying);
        }
        return Ok(unqualified);
    }
    let int_width = traits.integral_width(ScalarClass::Int);
    let source_width = integral_width(bundle, traits, unqualified)?;
    let signed = bundle.is_signed_integer(unqualified);
    if source_width < int_width || (signed && source_width == int_width) {
        Ok(bundle.signed_int())
    } else {
        Ok(bundle.unsigned_int())
    }
}

/// Width in bits of an integral type.
pub fn integral_width(bundle: &TypeBundle, traits: &TypeTraits, ty: TypeId) -> Result<u64> {
    match bundle.get(bundle.unqualified(ty)) {
        Type::BitPrecise { width, .. } => Ok(*width),
        _ => Ok(traits.integral_width(bundle.scalar_class(ty)?)),
    }
}

/// Usual arithmetic conversions: the common type of two arithmetic
/// operands of a binary operator.
pub fn usual_arithmetic_conversions(
    bundle: &mut TypeBundle,
    traits: &TypeTraits,
    lhs: TypeId,
    rhs: TypeId,
) -> Result<TypeId> {
    let lhs = bundle.unqualified(lhs);
    let rhs = bundle.unqualified(rhs);
    if !bundle.is_arithmetic(lhs) || !bundle.is_arithmetic(rhs) {
        return Err(Error::InvalidParameter("operands are not arithmetic"));
    }

    // Complex domain dominates, then long double > double > float.
    let lhs_float = float_kind(bundle, lhs);
    let rhs_float = float_kind(bundle, rhs);
    let complex = bundle.is_complex(lhs) || bundle.is_complex(rhs);
    if let Some(kind) = max_float(lhs_float, rhs_float) {
        return Ok(if complex {
            bundle.intern(Type::Complex(kind))
        } else {
            match kind {
                FloatKind::Float => bundle.float(),
                FloatKind::Double => bundle.double(),
                FloatKind::LongDouble => bundle.long_double(),
            }
        });
    }

    let lhs = promote(bundle, traits, lhs)?;
    let rhs = promote(bundle, traits, rhs)?;
    if lhs == rhs {
        return Ok(lhs);
    }

    // Bit-precise operands compete on width; a standard operand wins only
    // with a strictly greater width.
    let lhs_bp = matches!(bundle.get(lhs), Type::BitPrecise { .. });
    let rhs_bp = matches!(bundle.get(rhs), Type::BitPrecise { .. });
    if lhs_bp || rhs_bp {
        let lhs_width = integral_width(bundle, traits, lhs)?;
        let rhs_width = integral_width(bundle, traits, rhs)?;
        let lhs_signed = bundle.is_signed_integer(lhs);
        let rhs_signed = bundle.is_signed_integer(rhs);
        let (width, signed) = if lhs_width != rhs_width {
            if lhs_width > rhs_width {
                (lhs_width, lhs_signed)
            } else {
                (rhs_width, rhs_signed)
            }
        } else {
            (lhs_width, lhs_signed && rhs_signed)
        };
        return Ok(bundle.bit_precise(width, signed));
    }

    let lhs_signed = bundle.is_signed_integer(lhs);
    let rhs_signed = bundle.is_signed_integer(rhs);
    let lhs_rank = bundle.integer_rank(lhs)?;
    let rhs_rank = bundle.integer_rank(rhs)?;
    if lhs_signed == rhs_signed {
        return Ok(bundle.standard_integer(lhs_rank.max(rhs_rank), lhs_signed));
    }
    let (unsigned_rank, signed_rank) = if lhs_signed {
        (rhs_rank, lhs_rank)
    } else {
        (lhs_rank, rhs_rank)
    };
    if unsigned_rank >= signed_rank {
        Ok(bundle.standard_integer(unsigned_rank, false))
    } else {
        // The signed type has greater rank; on LP64 every wider standard
        // signed type can represent the narrower unsigned values.
        let signed_ty = bundle.standard_integer(signed_rank, true);
        let unsigned_ty = bundle.standard_integer(unsigned_rank, false);
        let signed_width = integral_width(bundle, traits, signed_ty)?;
        let unsigned_width = integral_width(bundle, traits, unsigned_ty)?;
        if signed_width > unsigned_width {
            Ok(signed_ty)
        } else {
            Ok(bundle.standard_integer(signed_rank, false))
        }
    }
}

fn float_kind(bundle: &TypeBundle, ty: TypeId) -> Option<FloatKind> {
    match bundle.get(bundle.unqualified(ty)) {
        Type::Float => Some(FloatKind::Float),
        Type::Double => Some(FloatKind::Double),
        Type::LongDouble => Some(FloatKind::LongDouble),
        Type::Complex(kind) => Some(*kind),
        _ => None,
    }
}

fn max_float(lhs: Option<FloatKind>, rhs: Option<FloatKind>) -> Option<FloatKind> {
    match (lhs, rhs) {
        (Some(l), Some(r)) => Some(l.max(r)),
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArrayBoundary;

    fn setup() -> (TypeBundle, TypeTraits) {
        (TypeBundle::new(), TypeTraits::lp64())
    }

    #[test]
    fn promotion_below_int() {
        let (mut bundle, traits) = setup();
        for narrow in [bundle.bool_(), bundle.char_(), bundle.signed_short()] {
            assert_eq!(promote(&mut bundle, &traits, narrow).unwrap(), bundle.signed_int());
        }
        let unsigned_short = bundle.unsigned_short();
        assert_eq!(
            promote(&mut bundle, &traits, unsigned_short).unwrap(),
            bundle.signed_int()
        );
        let unsigned_int = bundle.unsigned_int();
        assert_eq!(
            promote(&mut bundle, &traits, unsigned_int).unwrap(),
            bundle.unsigned_int()
        );
        let bp = bundle.bit_precise(7, false);
        assert_eq!(promote(&mut bundle, &traits, bp).unwrap(), bp);
    }

    #[test]
    fn common_type_floating_wins() {
        let (mut bundle, traits) = setup();
        let signed_long = bundle.signed_long();
        let float = bundle.float();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, signed_long, float).unwrap();
        assert_eq!(ty, bundle.float());
        let double = bundle.double();
        let long_double = bundle.long_double();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, double, long_double).unwrap();
        assert_eq!(ty, bundle.long_double());
        let cf = bundle.intern(Type::Complex(FloatKind::Float));
        let double = bundle.double();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, cf, double).unwrap();
        assert_eq!(bundle.get(ty), &Type::Complex(FloatKind::Double));
    }

    #[test]
    fn common_type_integer_rules() {
        let (mut bundle, traits) = setup();
        let signed_char = bundle.signed_char();
        let unsigned_short = bundle.unsigned_short();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, signed_char, unsigned_short).unwrap();
        assert_eq!(ty, bundle.signed_int());
        let unsigned_int = bundle.unsigned_int();
        let signed_long = bundle.signed_long();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, unsigned_int, signed_long).unwrap();
        assert_eq!(ty, bundle.signed_long());
        let unsigned_long = bundle.unsigned_long();
        let signed_long_long = bundle.signed_long_long();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, unsigned_long, signed_long_long).unwrap();
        // Same width: signedness is lost.
        assert_eq!(ty, bundle.unsigned_long_long());
    }

    #[test]
    fn common_type_bit_precise() {
        let (mut bundle, traits) = setup();
        let wide = bundle.bit_precise(200, true);
        let unsigned_long = bundle.unsigned_long();
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, wide, unsigned_long).unwrap();
        assert_eq!(ty, bundle.bit_precise(200, true));
        let narrow_unsigned = bundle.bit_precise(200, false);
        let ty = usual_arithmetic_conversions(&mut bundle, &traits, wide, narrow_unsigned).unwrap();
        assert_eq!(ty, bundle.bit_precise(200, false));
    }

    #[test]
    fn lvalue_conversion_decays() {
        let (mut bundle, _) = setup();
        let arr = bundle.array(bundle.char_(), ArrayBoundary::Bounded(3));
        let decayed = lvalue_conversion(&mut bundle, arr);
        assert_eq!(decayed, bundle.pointer(bundle.char_()));
        let q = bundle.qualified(
            bundle.signed_int(),
            crate::types::Qualifiers {
                constant: true,
                ..Default::default()
            },
        );
        assert_eq!(lvalue_conversion(&mut bundle, q), bundle.signed_int());
    }
}
