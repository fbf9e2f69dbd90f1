//! Type compatibility and composite type formation.

use super::{ArrayBoundary, FunctionMode, FunctionType, Parameter, Type, TypeBundle, TypeId};
use crate::result::{Error, Result};

/// Are two types compatible in the C sense?
///
/// Tagged types are compatible only with themselves (one translation unit);
/// structural types compare component-wise. Qualifiers must match exactly.
pub fn compatible(bundle: &TypeBundle, lhs: TypeId, rhs: TypeId) -> bool {
    if lhs == rhs {
        return true;
    }
    match (bundle.get(lhs), bundle.get(rhs)) {
        (
            Type::Qualified {
                inner: li,
                qualifiers: lq,
            },
            Type::Qualified {
                inner: ri,
                qualifiers: rq,
            },
        ) => lq == rq && compatible(bundle, *li, *ri),
        (Type::Pointer(l), Type::Pointer(r)) => compatible(bundle, *l, *r),
        (
            Type::Array {
                element: le,
                boundary: lb,
                ..
            },
            Type::Array {
                element: re,
                boundary: rb,
                ..
            },
        ) => {
            if !compatible(bundle, *le, *re) {
                return false;
            }
            match (lb.constant_length(), rb.constant_length()) {
                (Some(l), Some(r)) => l == r,
                _ => true,
            }
        }
        (Type::Function(l), Type::Function(r)) => functions_compatible(bundle, l, r),
        (Type::Enumeration(en), _) => compatible(bundle, en.underlying, rhs),
        (_, Type::Enumeration(en)) => compatible(bundle, lhs, en.underlying),
        _ => false,
    }
}

fn functions_compatible(bundle: &TypeBundle, lhs: &FunctionType, rhs: &FunctionType) -> bool {
    if !compatible(bundle, lhs.return_type, rhs.return_type) {
        return false;
    }
    match (lhs.mode, rhs.mode) {
        (FunctionMode::Prototype, FunctionMode::Prototype) => {
            lhs.ellipsis == rhs.ellipsis
                && lhs.parameters.len() == rhs.parameters.len()
                && lhs
                    .parameters
                    .iter()
                    .zip(&rhs.parameters)
                    .all(|(l, r)| match (l.ty, r.ty) {
                        (Some(lt), Some(rt)) => {
                            compatible(bundle, bundle.unqualified(lt), bundle.unqualified(rt))
                        }
                        _ => false,
                    })
        }
        // A K&R declaration is compatible with any prototype whose
        // parameters survive default argument promotion unchanged; the
        // conservative check here accepts the pairing.
        _ => true,
    }
}

/// Build the composite of two compatible types.
///
/// Array bounds are taken from whichever operand has one; prototyped
/// function declarations win over K&R; parameter composites are formed
/// recursively.
pub fn composite(bundle: &mut TypeBundle, lhs: TypeId, rhs: TypeId) -> Result<TypeId> {
    if !compatible(bundle, lhs, rhs) {
        return Err(Error::InvalidParameter("composite of incompatible types"));
    }
    if lhs == rhs {
        return Ok(lhs);
    }
    match (bundle.get(lhs).clone(), bundle.get(rhs).clone()) {
        (
            Type::Qualified {
                inner: li,
                qualifiers,
            },
            Type::Qualified { inner: ri, .. },
        ) => {
            let inner = composite(bundle, li, ri)?;
            Ok(bundle.qualified(inner, qualifiers))
        }
        (Type::Pointer(l), Type::Pointer(r)) => {
            let pointee = composite(bundle, l, r)?;
            Ok(bundle.pointer(pointee))
        }
        (
            Type::Array {
                element: le,
                boundary: lb,
                qualifiers,
            },
            Type::Array {
                element: re,
                boundary: rb,
                ..
            },
        ) => {
            let element = composite(bundle, le, re)?;
            let boundary = match (lb, rb) {
                (ArrayBoundary::Unbounded, other) | (other, ArrayBoundary::Unbounded) => other,
                (ArrayBoundary::Vla, other) | (other, ArrayBoundary::Vla) => other,
                (l, _) => l,
            };
            Ok(bundle.intern(Type::Array {
                element,
                boundary,
                qualifiers,
            }))
        }
        (Type::Function(l), Type::Function(r)) => {
            let composite_fn = match (l.mode, r.mode) {
                (FunctionMode::Prototype, FunctionMode::Prototype) => {
                    let mut parameters = Vec::with_capacity(l.parameters.len());
                    for (lp, rp) in l.parameters.iter().zip(&r.parameters) {
                        let ty = match (lp.ty, rp.ty) {
                            (Some(lt), Some(rt)) => Some(composite(bundle, lt, rt)?),
                            (ty, None) | (None, ty) => ty,
                        };
                        parameters.push(Parameter {
                            name: lp.name.clone().or_else(|| rp.name.clone()),
                            ty,
                        });
                    }
                    FunctionType {
                        return_type: composite(bundle, l.return_type, r.return_type)?,
                        parameters,
                        ellipsis: l.ellipsis,
                        mode: FunctionMode::Prototype,
                    }
                }
                (FunctionMode::Prototype, FunctionMode::KAndR) => l.clone(),
                (FunctionMode::KAndR, _) => r.clone(),
            };
            Ok(bundle.intern(Type::Function(composite_fn)))
        }
        _ => Ok(lhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_composite_takes_bound() {
        let mut bundle = TypeBundle::new();
        let unbounded = bundle.array(bundle.signed_int(), ArrayBoundary::Unbounded);
        let bounded = bundle.array(bundle.signed_int(), ArrayBoundary::Bounded(10));
        assert!(compatible(&bundle, unbounded, bounded));
        let combined = composite(&mut bundle, unbounded, bounded).unwrap();
        assert_eq!(combined, bounded);
        let other = bundle.array(bundle.signed_int(), ArrayBoundary::Bounded(11));
        assert!(!compatible(&bundle, bounded, other));
    }

    #[test]
    fn composite_is_commutative_and_associative_on_same_structure() {
        let mut bundle = TypeBundle::new();
        let a = bundle.array(bundle.signed_int(), ArrayBoundary::Unbounded);
        let b = bundle.array(bundle.signed_int(), ArrayBoundary::Bounded(3));
        let ab = composite(&mut bundle, a, b).unwrap();
        let ba = composite(&mut bundle, b, a).unwrap();
        assert_eq!(ab, ba);
        let c = bundle.array(bundle.signed_int(), ArrayBoundary::Bounded(3));
        let ab_c = composite(&mut bundle, ab, c).unwrap();
        let a_bc = {
            let bc = composite(&mut bundle, b, c).unwrap();
            composite(&mut bundle, a, bc).unwrap()
        };
        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn prototype_wins_over_kandr() {
        let mut bundle = TypeBundle::new();
        let proto = bundle.intern(Type::Function(FunctionType {
            return_type: bundle.signed_int(),
            parameters: vec![Parameter {
                name: Some("x".into()),
                ty: Some(bundle.double()),
            }],
            ellipsis: false,
            mode: FunctionMode::Prototype,
        }));
        let kandr = bundle.intern(Type::Function(FunctionType {
            return_type: bundle.signed_int(),
            parameters: Vec::new(),
            ellipsis: false,
            mode: FunctionMode::KAndR,
        }));
        assert!(compatible(&bundle, proto, kandr));
        assert_eq!(composite(&mut bundle, proto, kandr).unwrap(), proto);
        assert_eq!(composite(&mut bundle, kandr, proto).unwrap(), proto);
    }
}
