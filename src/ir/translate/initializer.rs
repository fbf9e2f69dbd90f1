//! Initializer translation.
//!
//! The traversal walks an initializer against the initialized type's
//! layout, resolving designators to member/element offsets, and hands each
//! leaf to one of four sinks: scalar expression, string literal, aggregate
//! copy, or nested braced list. Braced aggregate initializers zero-fill the
//! whole object once before the listed fields are written.
//!
//! The same walk has a second client: building byte images (plus
//! relocations) for statically initialized objects.

use super::{FunctionCtx, Translator};
use crate::ast::{
    Arena, ConstantValue, Designator, Initializer, InitializerListEntry, NodeId, NodeKind,
};
use crate::ir::{DataItem, IrOp, LocalId, OpWidth};
use crate::result::{Error, Result};
use crate::target::TypeTraits;
use crate::types::{
    resolve_member, struct_layout, type_layout, ArrayBoundary, Type, TypeBundle, TypeId,
};

impl Translator<'_> {
    /// Translate an automatic object's initializer, storing into `local`.
    pub(crate) fn translate_local_initializer(
        &mut self,
        ctx: &mut FunctionCtx,
        local: LocalId,
        ty: TypeId,
        initializer: &Initializer,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        if matches!(initializer, Initializer::List(_)) && self.bundle.is_aggregate(unqualified) {
            let size = type_layout(self.bundle, self.traits, unqualified)?.size;
            ctx.func.code.push(IrOp::LocalAddr(local));
            ctx.func.code.push(IrOp::ZeroMemory { size });
        }
        self.traverse_runtime(ctx, local, 0, unqualified, initializer)
    }

    fn traverse_runtime(
        &mut self,
        ctx: &mut FunctionCtx,
        base: LocalId,
        offset: u64,
        ty: TypeId,
        initializer: &Initializer,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        match initializer {
            Initializer::Expression(node) => {
                self.runtime_expression_leaf(ctx, base, offset, unqualified, *node, None)
            }
            Initializer::List(entries) => match self.bundle.get(unqualified).clone() {
                Type::Structure(st) if !st.union_ => {
                    let layout = struct_layout(self.bundle, self.traits, unqualified)?;
                    let mut cursor = 0usize;
                    for entry in entries {
                        let (field_index, field_ty) =
                            self.designated_field(&st, entry, &mut cursor)?;
                        let placement = layout.fields[field_index];
                        let field_offset = offset + placement.offset;
                        self.traverse_field(
                            ctx,
                            base,
                            field_offset,
                            field_ty,
                            placement.bitfield,
                            &entry.value,
                        )?;
                    }
                    Ok(())
                }
                Type::Structure(st) => {
                    // Union: exactly one member is written.
                    if let Some(entry) = entries.first() {
                        let mut cursor = 0usize;
                        let (field_index, field_ty) =
                            self.designated_field(&st, entry, &mut cursor)?;
                        let layout = struct_layout(self.bundle, self.traits, unqualified)?;
                        let placement = layout.fields[field_index];
                        self.traverse_field(
                            ctx,
                            base,
                            offset + placement.offset,
                            field_ty,
                            placement.bitfield,
                            &entry.value,
                        )?;
                    }
                    Ok(())
                }
                Type::Array { element, .. } => {
                    let element_size = type_layout(self.bundle, self.traits, element)?.size;
                    let mut index: u64 = 0;
                    for entry in entries {
                        if let Some(Designator::Index(index_node)) = entry.designators.first() {
                            index = self.designator_index(*index_node)?;
                        }
                        self.traverse_field(
                            ctx,
                            base,
                            offset + index * element_size,
                            element,
                            None,
                            &entry.value,
                        )?;
                        index += 1;
                    }
                    Ok(())
                }
                _ => {
                    let [entry] = entries.as_slice() else {
                        return Err(Error::Internal("braced scalar with excess entries"));
                    };
                    self.traverse_runtime(ctx, base, offset, unqualified, &entry.value)
                }
            },
        }
    }

    fn traverse_field(
        &mut self,
        ctx: &mut FunctionCtx,
        base: LocalId,
        offset: u64,
        ty: TypeId,
        bitfield: Option<(u64, u64)>,
        initializer: &Initializer,
    ) -> Result<()> {
        match initializer {
            Initializer::Expression(node) => {
                self.runtime_expression_leaf(ctx, base, offset, ty, *node, bitfield)
            }
            Initializer::List(_) => self.traverse_runtime(ctx, base, offset, ty, initializer),
        }
    }

    fn runtime_expression_leaf(
        &mut self,
        ctx: &mut FunctionCtx,
        base: LocalId,
        offset: u64,
        ty: TypeId,
        node: NodeId,
        bitfield: Option<(u64, u64)>,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        // String literal into a character array.
        if self.bundle.is_array(unqualified) {
            if let NodeKind::StringLiteral(bytes) = &self.arena.node(node).kind {
                let bytes = bytes.clone();
                let size = type_layout(self.bundle, self.traits, unqualified)?.size;
                let id = self.module.strings.intern(&bytes);
                ctx.func.code.push(IrOp::LocalAddr(base));
                self.push_leaf_offset(ctx, offset);
                ctx.func.code.push(IrOp::StringAddr(id));
                ctx.func.code.push(IrOp::CopyMemory {
                    size: size.min(bytes.len() as u64),
                });
                return Ok(());
            }
        }
        if self.bundle.is_aggregate(unqualified)
            || self.bundle.is_complex(unqualified)
            || self.is_wide_bitint(unqualified)
        {
            // Aggregate copy from a compatible expression.
            let size = type_layout(self.bundle, self.traits, unqualified)?.size;
            ctx.func.code.push(IrOp::LocalAddr(base));
            self.push_leaf_offset(ctx, offset);
            self.translate_expr_value(ctx, node)?;
            ctx.func.code.push(IrOp::CopyMemory { size });
            return Ok(());
        }
        self.translate_expr_value(ctx, node)?;
        let from = self.expression_conv_type(node)?;
        self.emit_scalar_conversion(ctx, from, unqualified)?;
        ctx.func.code.push(IrOp::LocalAddr(base));
        self.push_leaf_offset(ctx, offset);
        self.store_leaf(ctx, ty, bitfield)?;
        Ok(())
    }

    // Store [value, addr]; discard the stored value.
    fn store_leaf(
        &mut self,
        ctx: &mut FunctionCtx,
        ty: TypeId,
        bitfield: Option<(u64, u64)>,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        if let Some((bit_offset, bit_width)) = bitfield {
            let storage = type_layout(self.bundle, self.traits, unqualified)?;
            let width = OpWidth::from_size(storage.size);
            ctx.func.code.push(IrOp::Pick(0));
            ctx.func.code.push(IrOp::Load {
                width,
                signed: false,
                volatile: false,
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
            ctx.func.code.push(IrOp::Store {
                width,
                volatile: false,
            });
            return Ok(());
        }
        if self.bundle.is_floating(unqualified) {
            let width = self.float_op_width(unqualified)?;
            ctx.func.code.push(IrOp::StoreFloat {
                width,
                volatile: false,
            });
            return Ok(());
        }
        let width = self.integral_op_width(unqualified)?;
        ctx.func.code.push(IrOp::Store {
            width,
            volatile: false,
        });
        Ok(())
    }

    fn push_leaf_offset(&mut self, ctx: &mut FunctionCtx, offset: u64) {
        if offset != 0 {
            ctx.func.code.push(IrOp::IntConst(offset as i64));
            ctx.func.code.push(IrOp::IntAdd(OpWidth::W64));
        }
    }

    fn designated_field(
        &mut self,
        st: &crate::types::StructType,
        entry: &InitializerListEntry,
        cursor: &mut usize,
    ) -> Result<(usize, TypeId)> {
        match entry.designators.first() {
            Some(Designator::Member(member)) => {
                let position = st
                    .fields
                    .iter()
                    .position(|f| f.name.as_deref() == Some(member.as_str()))
                    .ok_or(Error::Internal("designated member vanished"))?;
                *cursor = position + 1;
                Ok((position, st.fields[position].ty))
            }
            Some(Designator::Index(_)) => Err(Error::Internal("array designator in a structure")),
            None => {
                while *cursor < st.fields.len() {
                    let index = *cursor;
                    *cursor += 1;
                    let field = &st.fields[index];
                    if field.name.is_some() || field.bitwidth.is_none() {
                        return Ok((index, field.ty));
                    }
                }
                Err(Error::Internal("positional initializer ran out of fields"))
            }
        }
    }

    fn designator_index(&mut self, node: NodeId) -> Result<u64> {
        self.arena
            .props(node)
            .constant_value
            .as_ref()
            .and_then(ConstantValue::as_integer)
            .filter(|&v| v >= 0)
            .map(|v| v as u64)
            .ok_or(Error::Internal("non-constant array designator"))
    }
}

/// Build the static data image of an initialized object.
pub fn static_image(
    arena: &Arena,
    bundle: &TypeBundle,
    traits: &TypeTraits,
    ty: TypeId,
    initializer: &Initializer,
) -> Result<Vec<DataItem>> {
    let layout = type_layout(bundle, traits, bundle.unqualified(ty))?;
    let mut builder = ImageBuilder {
        arena,
        bundle,
        traits,
        bytes: vec![0u8; layout.size as usize],
        relocations: Vec::new(),
    };
    builder.fill(0, bundle.unqualified(ty), None, initializer)?;
    Ok(builder.serialize())
}

struct ImageBuilder<'a> {
    arena: &'a Arena,
    bundle: &'a TypeBundle,
    traits: &'a TypeTraits,
    bytes: Vec<u8>,
    relocations: Vec<(usize, String, i64)>,
}

impl ImageBuilder<'_> {
    fn fill(
        &mut self,
        offset: u64,
        ty: TypeId,
        bitfield: Option<(u64, u64)>,
        initializer: &Initializer,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        match initializer {
            Initializer::Expression(node) => self.scalar_leaf(offset, unqualified, bitfield, *node),
            Initializer::List(entries) => match self.bundle.get(unqualified).clone() {
                Type::Structure(st) => {
                    let layout = struct_layout(self.bundle, self.traits, unqualified)?;
                    let mut cursor = 0usize;
                    for entry in entries {
                        let (index, field_ty) = self.designated_field(&st, entry, &mut cursor)?;
                        let placement = layout.fields[index];
                        self.fill(
                            offset + placement.offset,
                            field_ty,
                            placement.bitfield,
                            &entry.value,
                        )?;
                        if st.union_ {
                            break;
                        }
                    }
                    Ok(())
                }
                Type::Array { element, .. } => {
                    let element_size = type_layout(self.bundle, self.traits, element)?.size;
                    let mut index: u64 = 0;
                    for entry in entries {
                        if let Some(Designator::Index(index_node)) = entry.designators.first() {
                            index = self
                                .arena
                                .props(*index_node)
                                .constant_value
                                .as_ref()
                                .and_then(ConstantValue::as_integer)
                                .filter(|&v| v >= 0)
                                .map(|v| v as u64)
                                .ok_or(Error::Internal("non-constant array designator"))?;
                        }
                        self.fill(offset + index * element_size, element, None, &entry.value)?;
                        index += 1;
                    }
                    Ok(())
                }
                _ => {
                    let [entry] = entries.as_slice() else {
                        return Err(Error::Internal("braced scalar with excess entries"));
                    };
                    self.fill(offset, unqualified, bitfield, &entry.value)
                }
            },
        }
    }

    fn designated_field(
        &self,
        st: &crate::types::StructType,
        entry: &InitializerListEntry,
        cursor: &mut usize,
    ) -> Result<(usize, TypeId)> {
        match entry.designators.first() {
            Some(Designator::Member(member)) => {
                let position = st
                    .fields
                    .iter()
                    .position(|f| f.name.as_deref() == Some(member.as_str()))
                    .ok_or(Error::Internal("designated member vanished"))?;
                *cursor = position + 1;
                Ok((position, st.fields[position].ty))
            }
            Some(Designator::Index(_)) => Err(Error::Internal("array designator in a structure")),
            None => {
                while *cursor < st.fields.len() {
                    let index = *cursor;
                    *cursor += 1;
                    let field = &st.fields[index];
                    if field.name.is_some() || field.bitwidth.is_none() {
                        return Ok((index, field.ty));
                    }
                }
                Err(Error::Internal("positional initializer ran out of fields"))
            }
        }
    }

    fn scalar_leaf(
        &mut self,
        offset: u64,
        ty: TypeId,
        bitfield: Option<(u64, u64)>,
        node: NodeId,
    ) -> Result<()> {
        // String literal into a character array.
        if self.bundle.is_array(ty) {
            if let NodeKind::StringLiteral(bytes) = &self.arena.node(node).kind {
                let size = type_layout(self.bundle, self.traits, ty)?.size as usize;
                let start = offset as usize;
                let count = bytes.len().min(size);
                self.bytes[start..start + count].copy_from_slice(&bytes[..count]);
                return Ok(());
            }
        }
        let value = self
            .arena
            .props(node)
            .constant_value
            .clone()
            .ok_or(Error::Internal("non-constant static initializer"))?;
        let layout = type_layout(self.bundle, self.traits, ty)?;
        match value {
            ConstantValue::Integer(v) => {
                if self.bundle.is_floating(ty) {
                    return self.write_float(offset, ty, v as f64);
                }
                match bitfield {
                    Some((bit_offset, bit_width)) => {
                        self.write_bits(offset * 8 + bit_offset, bit_width, v as u64)
                    }
                    None => self.write_int(offset, layout.size, v as u64),
                }
                Ok(())
            }
            ConstantValue::BigInteger(big) => {
                let start = offset as usize;
                let digits = big.digits();
                for index in 0..layout.size as usize {
                    self.bytes[start + index] = digits.get(index).copied().unwrap_or(0);
                }
                Ok(())
            }
            ConstantValue::Float(v) => {
                if self.bundle.is_integral(ty) {
                    self.write_int(offset, layout.size, v as i64 as u64);
                    return Ok(());
                }
                self.write_float(offset, ty, v)
            }
            ConstantValue::Complex(re, im) => {
                let half = layout.size / 2;
                self.write_float_raw(offset, half, re)?;
                self.write_float_raw(offset + half, half, im)?;
                Ok(())
            }
            ConstantValue::Address { symbol, offset: addend } => {
                self.relocations.push((offset as usize, symbol, addend));
                Ok(())
            }
            ConstantValue::StringAddress { .. } => Err(Error::Internal(
                "string-address relocation requires a literal pool entry",
            )),
        }
    }

    fn write_int(&mut self, offset: u64, size: u64, value: u64) {
        let bytes = value.to_le_bytes();
        let start = offset as usize;
        for index in 0..size as usize {
            self.bytes[start + index] = bytes.get(index).copied().unwrap_or_else(|| {
                if (value as i64) < 0 {
                    0xff
                } else {
                    0
                }
            });
        }
    }

    fn write_bits(&mut self, bit_offset: u64, bit_width: u64, value: u64) {
        for bit in 0..bit_width {
            let absolute = bit_offset + bit;
            let mask = 1u8 << (absolute % 8);
            if (value >> bit) & 1 != 0 {
                self.bytes[(absolute / 8) as usize] |= mask;
            } else {
                self.bytes[(absolute / 8) as usize] &= !mask;
            }
        }
    }

    fn write_float(&mut self, offset: u64, ty: TypeId, value: f64) -> Result<()> {
        let size = type_layout(self.bundle, self.traits, ty)?.size;
        self.write_float_raw(offset, size, value)
    }

    fn write_float_raw(&mut self, offset: u64, size: u64, value: f64) -> Result<()> {
        let start = offset as usize;
        match size {
            4 => {
                self.bytes[start..start + 4].copy_from_slice(&(value as f32).to_bits().to_le_bytes());
            }
            8 => {
                self.bytes[start..start + 8].copy_from_slice(&value.to_bits().to_le_bytes());
            }
            16 => {
                self.bytes[start..start + 16].copy_from_slice(&encode_f80(value));
            }
            _ => return Err(Error::Internal("unsupported floating storage size")),
        }
        Ok(())
    }

    fn serialize(mut self) -> Vec<DataItem> {
        self.relocations.sort_by_key(|&(offset, ..)| offset);
        let mut items = Vec::new();
        let mut position = 0usize;
        for (offset, symbol, addend) in std::mem::take(&mut self.relocations) {
            if offset > position {
                push_bytes(&mut items, &self.bytes[position..offset]);
            }
            items.push(DataItem::Address {
                symbol,
                offset: addend,
            });
            position = offset + 8;
        }
        if position < self.bytes.len() {
            // Compress a trailing zero run.
            let tail = &self.bytes[position..];
            let nonzero_end = tail.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            push_bytes(&mut items, &tail[..nonzero_end]);
            let zeros = (tail.len() - nonzero_end) as u64;
            if zeros > 0 {
                items.push(DataItem::Zero(zeros));
            }
        }
        items
    }
}

fn push_bytes(items: &mut Vec<DataItem>, bytes: &[u8]) {
    if !bytes.is_empty() {
        items.push(DataItem::Bytes(bytes.to_vec()));
    }
}

/// Encode a host double as the 16-byte x87 extended-precision image
/// (10 significant bytes plus 6 bytes of padding).
pub fn encode_f80(value: f64) -> [u8; 16] {
    let bits = value.to_bits();
    let sign = (bits >> 63) as u16;
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (e80, mantissa): (u16, u64) = if exponent == 0x7ff {
        // Infinity and NaN keep their payload.
        (0x7fff, (1u64 << 63) | (fraction << 11))
    } else if exponent == 0 {
        if fraction == 0 {
            (0, 0)
        } else {
            // Denormal double: normalize into the explicit integer bit.
            let shift = fraction.leading_zeros() as i32 - 11;
            let mantissa = fraction << (shift + 11);
            let e = -1022 - shift + 16383;
            (e as u16, mantissa)
        }
    } else {
        (
            (exponent - 1023 + 16383) as u16,
            (1u64 << 63) | (fraction << 11),
        )
    };
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..10].copy_from_slice(&((sign << 15) | e80).to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::encode_f80;

    #[test]
    fn f80_encoding() {
        let one = encode_f80(1.0);
        // 1.0 = mantissa 0x8000000000000000, exponent 16383.
        assert_eq!(&one[..8], &0x8000_0000_0000_0000u64.to_le_bytes());
        assert_eq!(u16::from_le_bytes([one[8], one[9]]), 16383);

        let neg_two = encode_f80(-2.0);
        assert_eq!(u16::from_le_bytes([neg_two[8], neg_two[9]]), 0x8000 | 16384);

        let zero = encode_f80(0.0);
        assert!(zero.iter().all(|&b| b == 0));
    }
}
