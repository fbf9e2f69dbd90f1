//! Type layout: sizes, alignments, field offsets and bitfield packing.

use super::{ArrayBoundary, FloatKind, StructType, Type, TypeBundle, TypeId};
use crate::result::{Error, Result};
use crate::target::TypeTraits;

/// Size and alignment of a complete object type, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Object size.
    pub size: u64,
    /// Object alignment.
    pub alignment: u64,
}

/// Placement of one structure/union member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Byte offset of the member (of its storage unit for bitfields).
    pub offset: u64,
    /// `(bit offset within the storage unit, width)` for bitfields.
    pub bitfield: Option<(u64, u64)>,
}

/// Full layout of a structure or union.
#[derive(Debug, Clone)]
pub struct StructLayout {
    /// Size and alignment of the whole aggregate.
    pub layout: Layout,
    /// Per-field placements, parallel to the field list.
    pub fields: Vec<FieldLayout>,
}

/// Resolved member access, after anonymous-aggregate flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    /// The member's declared type.
    pub ty: TypeId,
    /// Byte offset from the start of the outermost aggregate.
    pub offset: u64,
    /// `(bit offset, width)` when the member is a bitfield.
    pub bitfield: Option<(u64, u64)>,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Compute the size and alignment of a complete object type.
pub fn type_layout(bundle: &TypeBundle, traits: &TypeTraits, ty: TypeId) -> Result<Layout> {
    match bundle.get(bundle.unqualified(ty)) {
        Type::Void | Type::Function(_) => {
            Err(Error::InvalidParameter("type has no object layout"))
        }
        Type::NullPointer | Type::Pointer(_) => {
            let scalar = traits.scalar_layout(crate::target::ScalarClass::Pointer);
            Ok(Layout {
                size: scalar.size,
                alignment: scalar.alignment,
            })
        }
        Type::BitPrecise { width, .. } => Ok(bit_precise_layout(*width)),
        Type::Complex(kind) => {
            let part = float_part_layout(traits, *kind);
            Ok(Layout {
                size: part.size * 2,
                alignment: part.alignment,
            })
        }
        Type::Enumeration(en) => {
            if !en.complete {
                return Err(Error::InvalidParameter("layout of incomplete enumeration"));
            }
            type_layout(bundle, traits, en.underlying)
        }
        Type::Array {
            element, boundary, ..
        } => {
            let element_layout = type_layout(bundle, traits, *element)?;
            match boundary.constant_length() {
                Some(len) => Ok(Layout {
                    size: element_layout.size * len,
                    alignment: element_layout.alignment,
                }),
                None => Err(Error::InvalidParameter("layout of unbounded array")),
            }
        }
        Type::Structure(_) => Ok(struct_layout(bundle, traits, ty)?.layout),
        _ => {
            let scalar = traits.scalar_layout(bundle.scalar_class(ty)?);
            Ok(Layout {
                size: scalar.size,
                alignment: scalar.alignment,
            })
        }
    }
}

// psABI layout for _BitInt: narrow widths take the smallest fitting
// standard integer size, wider ones become 8-byte-aligned digit arrays.
fn bit_precise_layout(width: u64) -> Layout {
    let size = match width {
        0..=8 => 1,
        9..=16 => 2,
        17..=32 => 4,
        33..=64 => 8,
        _ => width.div_ceil(64) * 8,
    };
    Layout {
        size,
        alignment: size.min(8),
    }
}

fn float_part_layout(traits: &TypeTraits, kind: FloatKind) -> crate::target::ScalarLayout {
    use crate::target::ScalarClass;
    traits.scalar_layout(match kind {
        FloatKind::Float => ScalarClass::Float,
        FloatKind::Double => ScalarClass::Double,
        FloatKind::LongDouble => ScalarClass::LongDouble,
    })
}

/// Compute the layout of a complete structure or union type.
pub fn struct_layout(bundle: &TypeBundle, traits: &TypeTraits, ty: TypeId) -> Result<StructLayout> {
    let st = match bundle.get(bundle.unqualified(ty)) {
        Type::Structure(st) if st.complete => st,
        Type::Structure(_) => {
            return Err(Error::InvalidParameter("layout of incomplete structure"))
        }
        _ => return Err(Error::InvalidParameter("not a structure type")),
    };
    if st.union_ {
        union_layout(bundle, traits, st)
    } else {
        record_layout(bundle, traits, st)
    }
}

fn record_layout(bundle: &TypeBundle, traits: &TypeTraits, st: &StructType) -> Result<StructLayout> {
    let mut size_bits: u64 = 0;
    let mut alignment: u64 = 1;
    let mut fields = Vec::with_capacity(st.fields.len());
    for (index, field) in st.fields.iter().enumerate() {
        match field.bitwidth {
            Some(width) => {
                let unit = type_layout(bundle, traits, field.ty)?;
                let unit_bits = unit.size * 8;
                if width == 0 {
                    // Unnamed zero-width bitfield: close the current unit.
                    size_bits = align_up(size_bits, unit_bits);
                    fields.push(FieldLayout {
                        offset: size_bits / 8,
                        bitfield: Some((0, 0)),
                    });
                    continue;
                }
                let mut bit_offset = size_bits;
                if bit_offset / unit_bits != (bit_offset + width - 1) / unit_bits {
                    bit_offset = align_up(bit_offset, unit_bits);
                }
                alignment = alignment.max(unit.alignment);
                let unit_index = bit_offset / unit_bits;
                fields.push(FieldLayout {
                    offset: unit_index * unit.size,
                    bitfield: Some((bit_offset % unit_bits, width)),
                });
                size_bits = bit_offset + width;
            }
            None => {
                let flexible = index + 1 == st.fields.len()
                    && matches!(
                        bundle.get(bundle.unqualified(field.ty)),
                        Type::Array {
                            boundary: ArrayBoundary::Unbounded,
                            ..
                        }
                    );
                let member = if flexible {
                    let element = bundle.array_element(field.ty)?;
                    let element_layout = type_layout(bundle, traits, element)?;
                    Layout {
                        size: 0,
                        alignment: element_layout.alignment,
                    }
                } else {
                    type_layout(bundle, traits, field.ty)?
                };
                let field_alignment = field.alignment.unwrap_or(member.alignment).max(member.alignment);
                alignment = alignment.max(field_alignment);
                let offset_bits = align_up(size_bits, field_alignment * 8);
                fields.push(FieldLayout {
                    offset: offset_bits / 8,
                    bitfield: None,
                });
                size_bits = offset_bits + member.size * 8;
            }
        }
    }
    let size = align_up(size_bits.div_ceil(8), alignment);
    Ok(StructLayout {
        layout: Layout { size, alignment },
        fields,
    })
}

fn union_layout(bundle: &TypeBundle, traits: &TypeTraits, st: &StructType) -> Result<StructLayout> {
    let mut size: u64 = 0;
    let mut alignment: u64 = 1;
    let mut fields = Vec::with_capacity(st.fields.len());
    for field in &st.fields {
        let member = type_layout(bundle, traits, field.ty)?;
        let field_alignment = field.alignment.unwrap_or(member.alignment).max(member.alignment);
        alignment = alignment.max(field_alignment);
        size = size.max(member.size);
        fields.push(FieldLayout {
            offset: 0,
            bitfield: field.bitwidth.map(|w| (0, w)),
        });
    }
    Ok(StructLayout {
        layout: Layout {
            size: align_up(size, alignment),
            alignment,
        },
        fields,
    })
}

/// Resolve a named member of a structure or union, flattening anonymous
/// struct/union members transparently.
pub fn resolve_member(
    bundle: &TypeBundle,
    traits: &TypeTraits,
    ty: TypeId,
    name: &str,
) -> Result<Option<MemberInfo>> {
    let st = match bundle.get(bundle.unqualified(ty)) {
        Type::Structure(st) if st.complete => st,
        Type::Structure(_) => {
            return Err(Error::InvalidParameter("member access into incomplete type"))
        }
        _ => return Err(Error::InvalidParameter("not a structure type")),
    };
    let layout = struct_layout(bundle, traits, ty)?;
    for (field, placement) in st.fields.iter().zip(&layout.fields) {
        match &field.name {
            Some(field_name) if field_name == name => {
                return Ok(Some(MemberInfo {
                    ty: field.ty,
                    offset: placement.offset,
                    bitfield: placement.bitfield,
                }));
            }
            Some(_) => {}
            None => {
                // Anonymous member: bitfield padding is skipped, nested
                // anonymous aggregates are searched transparently.
                if field.bitwidth.is_some() {
                    continue;
                }
                if matches!(bundle.get(bundle.unqualified(field.ty)), Type::Structure(_)) {
                    if let Some(nested) = resolve_member(bundle, traits, field.ty, name)? {
                        return Ok(Some(MemberInfo {
                            ty: nested.ty,
                            offset: placement.offset + nested.offset,
                            bitfield: nested.bitfield,
                        }));
                    }
                }
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StructField, StructType};

    fn setup() -> (TypeBundle, TypeTraits) {
        (TypeBundle::new(), TypeTraits::lp64())
    }

    fn field(name: &str, ty: TypeId) -> StructField {
        StructField {
            name: Some(name.into()),
            ty,
            alignment: None,
            bitwidth: None,
        }
    }

    fn push_struct(bundle: &mut TypeBundle, union_: bool, fields: Vec<StructField>) -> TypeId {
        bundle.push_tagged(Type::Structure(StructType {
            tag: None,
            union_,
            complete: true,
            fields,
        }))
    }

    #[test]
    fn scalar_layouts() {
        let (bundle, traits) = setup();
        assert_eq!(
            type_layout(&bundle, &traits, bundle.signed_int()).unwrap(),
            Layout { size: 4, alignment: 4 }
        );
        assert_eq!(
            type_layout(&bundle, &traits, bundle.long_double()).unwrap(),
            Layout { size: 16, alignment: 16 }
        );
    }

    #[test]
    fn bit_precise_layouts() {
        let (mut bundle, traits) = setup();
        let narrow = bundle.bit_precise(7, true);
        assert_eq!(type_layout(&bundle, &traits, narrow).unwrap().size, 1);
        let wide = bundle.bit_precise(200, false);
        assert_eq!(
            type_layout(&bundle, &traits, wide).unwrap(),
            Layout { size: 32, alignment: 8 }
        );
    }

    #[test]
    fn struct_padding() {
        let (mut bundle, traits) = setup();
        let a_ty = bundle.char_();
        let b_ty = bundle.signed_long();
        let c_ty = bundle.signed_short();
        let s = push_struct(
            &mut bundle,
            false,
            vec![field("a", a_ty), field("b", b_ty), field("c", c_ty)],
        );
        let layout = struct_layout(&bundle, &traits, s).unwrap();
        assert_eq!(layout.layout, Layout { size: 24, alignment: 8 });
        assert_eq!(layout.fields[0].offset, 0);
        assert_eq!(layout.fields[1].offset, 8);
        assert_eq!(layout.fields[2].offset, 16);
    }

    #[test]
    fn union_overlays() {
        let (mut bundle, traits) = setup();
        let i_ty = bundle.signed_int();
        let d_ty = bundle.double();
        let u = push_struct(&mut bundle, true, vec![field("i", i_ty), field("d", d_ty)]);
        let layout = struct_layout(&bundle, &traits, u).unwrap();
        assert_eq!(layout.layout, Layout { size: 8, alignment: 8 });
        assert_eq!(layout.fields[1].offset, 0);
    }

    #[test]
    fn bitfield_packing() {
        let (mut bundle, traits) = setup();
        let bf = |name: &str, ty: TypeId, width: u64| StructField {
            name: Some(name.into()),
            ty,
            alignment: None,
            bitwidth: Some(width),
        };
        let int_ty = bundle.signed_int();
        let s = push_struct(
            &mut bundle,
            false,
            vec![
                bf("a", int_ty, 3),
                bf("b", int_ty, 10),
                // 30 bits do not fit the remaining 19 of the first unit.
                bf("c", int_ty, 30),
            ],
        );
        let layout = struct_layout(&bundle, &traits, s).unwrap();
        assert_eq!(layout.fields[0], FieldLayout { offset: 0, bitfield: Some((0, 3)) });
        assert_eq!(layout.fields[1], FieldLayout { offset: 0, bitfield: Some((3, 10)) });
        assert_eq!(layout.fields[2], FieldLayout { offset: 4, bitfield: Some((0, 30)) });
        assert_eq!(layout.layout, Layout { size: 8, alignment: 4 });
    }

    #[test]
    fn anonymous_member_flattening() {
        let (mut bundle, traits) = setup();
        let int_ty = bundle.signed_int();
        let inner = push_struct(
            &mut bundle,
            false,
            vec![field("x", int_ty), field("y", int_ty)],
        );
        let head_ty = bundle.signed_long();
        let outer = push_struct(
            &mut bundle,
            false,
            vec![
                field("head", head_ty),
                StructField {
                    name: None,
                    ty: inner,
                    alignment: None,
                    bitwidth: None,
                },
            ],
        );
        let info = resolve_member(&bundle, &traits, outer, "y").unwrap().unwrap();
        assert_eq!(info.offset, 12);
        assert_eq!(info.ty, bundle.signed_int());
        assert!(resolve_member(&bundle, &traits, outer, "z").unwrap().is_none());
    }

    #[test]
    fn flexible_array_member() {
        let (mut bundle, traits) = setup();
        let int_ty = bundle.signed_int();
        let flex = bundle.array(int_ty, ArrayBoundary::Unbounded);
        let long_ty = bundle.signed_long();
        let s = push_struct(
            &mut bundle,
            false,
            vec![field("len", long_ty), field("data", flex)],
        );
        let layout = struct_layout(&bundle, &traits, s).unwrap();
        assert_eq!(layout.layout.size, 8);
        assert_eq!(layout.fields[1].offset, 8);
    }
}
