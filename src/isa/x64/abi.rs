//! System-V AMD64 classification.
//!
//! Types are classified into per-eightbyte classes, and function
//! signatures into concrete argument/return locations: integer registers,
//! SSE registers, the x87 stack for `long double`, or caller memory. The
//! variadic save-area layout constants live here too.

use super::regs::{PhysReg, ABI_INTEGER_ARGS, ABI_INTEGER_RETURNS, ABI_SSE_ARGS, ABI_SSE_RETURNS};
use crate::result::{Error, Result};
use crate::target::TypeTraits;
use crate::types::{struct_layout, type_layout, FloatKind, Type, TypeBundle, TypeId};
use smallvec::SmallVec;

/// Size of the variadic GP register save area in bytes.
pub const VARARG_GP_SAVE_SIZE: u64 = 48;
/// Size of the variadic SSE register save area in bytes.
pub const VARARG_SSE_SAVE_SIZE: u64 = 128;

/// Eightbyte classes of the System-V algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EightbyteClass {
    /// No value.
    NoClass,
    /// General-purpose register.
    Integer,
    /// SSE register.
    Sse,
    /// Upper half of an SSE value.
    SseUp,
    /// x87 low eightbyte.
    X87,
    /// x87 high eightbyte.
    X87Up,
    /// `_Complex long double`.
    ComplexX87,
    /// Passed through memory.
    Memory,
}

impl EightbyteClass {
    fn merge(self, other: EightbyteClass) -> EightbyteClass {
        use EightbyteClass::*;
        match (self, other) {
            (a, b) if a == b => a,
            (NoClass, b) => b,
            (a, NoClass) => a,
            (Memory, _) | (_, Memory) => Memory,
            (Integer, _) | (_, Integer) => Integer,
            (X87, _) | (_, X87) | (X87Up, _) | (_, X87Up) | (ComplexX87, _) | (_, ComplexX87) => {
                Memory
            }
            _ => Sse,
        }
    }
}

/// Classify a type into eightbyte classes.
pub fn classify(
    bundle: &TypeBundle,
    traits: &TypeTraits,
    ty: TypeId,
) -> Result<SmallVec<[EightbyteClass; 4]>> {
    let unqualified = bundle.unqualified(ty);
    let mut classes: SmallVec<[EightbyteClass; 4]> = SmallVec::new();
    match bundle.get(unqualified) {
        Type::Void => {}
        Type::Float | Type::Double => classes.push(EightbyteClass::Sse),
        Type::LongDouble => {
            classes.push(EightbyteClass::X87);
            classes.push(EightbyteClass::X87Up);
        }
        Type::Complex(FloatKind::Float) => classes.push(EightbyteClass::Sse),
        Type::Complex(FloatKind::Double) => {
            classes.push(EightbyteClass::Sse);
            classes.push(EightbyteClass::Sse);
        }
        Type::Complex(FloatKind::LongDouble) => {
            classes.push(EightbyteClass::ComplexX87);
            classes.push(EightbyteClass::Memory);
            classes.push(EightbyteClass::Memory);
            classes.push(EightbyteClass::Memory);
        }
        Type::BitPrecise { width, .. } => {
            if *width <= 64 {
                classes.push(EightbyteClass::Integer);
            } else if *width <= 128 {
                classes.push(EightbyteClass::Integer);
                classes.push(EightbyteClass::Integer);
            } else {
                let size = type_layout(bundle, traits, unqualified)?.size;
                for _ in 0..size.div_ceil(8) {
                    classes.push(EightbyteClass::Memory);
                }
            }
        }
        Type::Structure(_) | Type::Array { .. } => {
            let layout = type_layout(bundle, traits, unqualified)?;
            if layout.size > 16 {
                for _ in 0..layout.size.div_ceil(8) {
                    classes.push(EightbyteClass::Memory);
                }
            } else {
                classes.resize(layout.size.div_ceil(8) as usize, EightbyteClass::NoClass);
                classify_fields(bundle, traits, unqualified, 0, &mut classes)?;
                if classes.contains(&EightbyteClass::Memory) {
                    for class in classes.iter_mut() {
                        *class = EightbyteClass::Memory;
                    }
                }
            }
        }
        _ => classes.push(EightbyteClass::Integer),
    }
    Ok(classes)
}

fn classify_fields(
    bundle: &TypeBundle,
    traits: &TypeTraits,
    ty: TypeId,
    base: u64,
    classes: &mut SmallVec<[EightbyteClass; 4]>,
) -> Result<()> {
    let unqualified = bundle.unqualified(ty);
    match bundle.get(unqualified) {
        Type::Structure(st) => {
            let layout = struct_layout(bundle, traits, unqualified)?;
            for (field, placement) in st.fields.iter().zip(&layout.fields) {
                if field.bitwidth == Some(0) {
                    continue;
                }
                classify_fields(
                    bundle,
                    traits,
                    field.ty,
                    base + placement.offset,
                    classes,
                )?;
            }
            Ok(())
        }
        Type::Array { element, boundary, .. } => {
            let count = boundary
                .constant_length()
                .ok_or(Error::InvalidParameter("classification of unbounded array"))?;
            let element_size = type_layout(bundle, traits, *element)?.size;
            for index in 0..count {
                classify_fields(bundle, traits, *element, base + index * element_size, classes)?;
            }
            Ok(())
        }
        _ => {
            let scalar = classify(bundle, traits, unqualified)?;
            let size = type_layout(bundle, traits, unqualified)?.size;
            for (part, &class) in scalar.iter().enumerate() {
                let offset = base + (part as u64) * 8;
                let index = (offset / 8) as usize;
                if index < classes.len() {
                    classes[index] = classes[index].merge(class);
                } else {
                    return Err(Error::Internal("field outside classified aggregate"));
                }
                let _ = size;
            }
            Ok(())
        }
    }
}

/// Where a returned value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnLocation {
    /// Nothing is returned.
    None,
    /// One general-purpose register (`rax`).
    Integer(PhysReg),
    /// One SSE register (`xmm0`).
    Sse(PhysReg),
    /// x87 top-of-stack.
    X87,
    /// Two x87 slots (`st0`/`st1`).
    ComplexX87,
    /// One register per eightbyte.
    Multiple(Vec<(EightbyteClass, PhysReg)>),
    /// Caller-provided memory; the hidden pointer returns in `rax`.
    Memory,
}

/// Where one parameter lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamLocation {
    /// One general-purpose register.
    Integer(PhysReg),
    /// One SSE register.
    Sse(PhysReg),
    /// One register per eightbyte.
    Multiple(Vec<(EightbyteClass, PhysReg)>),
    /// Stack memory at the given offset past the return address.
    Stack {
        /// Byte offset within the argument area.
        offset: u64,
        /// Argument size, rounded to eightbytes.
        size: u64,
    },
}

/// Classified signature of one function.
#[derive(Debug, Clone)]
pub struct FunctionAbi {
    /// Parameter locations in declaration order.
    pub parameters: Vec<ParamLocation>,
    /// Return location.
    pub ret: ReturnLocation,
    /// Number of integer argument registers used (for `al` in varargs).
    pub gp_used: usize,
    /// Number of SSE argument registers used.
    pub sse_used: usize,
    /// Bytes of stack arguments.
    pub stack_bytes: u64,
}

impl FunctionAbi {
    /// Classify the signature of `function_ty`.
    pub fn of(bundle: &TypeBundle, traits: &TypeTraits, function_ty: TypeId) -> Result<Self> {
        let function = match bundle.get(bundle.unqualified(function_ty)) {
            Type::Function(function) => function.clone(),
            _ => return Err(Error::InvalidParameter("classification of a non-function")),
        };
        let ret = classify_return(bundle, traits, function.return_type)?;
        let mut gp_used = 0usize;
        let mut sse_used = 0usize;
        let mut stack_bytes = 0u64;
        if ret == ReturnLocation::Memory {
            // The hidden return pointer consumes the first GP register.
            gp_used = 1;
        }
        let mut parameters = Vec::new();
        let takes_void = function.parameters.len() == 1
            && function
                .parameters
                .first()
                .and_then(|p| p.ty)
                .map(|t| bundle.is_void(t))
                .unwrap_or(false);
        if !takes_void {
            for parameter in &function.parameters {
                let parameter_ty = parameter
                    .ty
                    .ok_or(Error::InvalidParameter("classification of untyped parameter"))?;
                let adjusted = parameter_value_type(bundle, parameter_ty);
                parameters.push(classify_parameter(
                    bundle,
                    traits,
                    adjusted,
                    &mut gp_used,
                    &mut sse_used,
                    &mut stack_bytes,
                )?);
            }
        }
        Ok(Self {
            parameters,
            ret,
            gp_used,
            sse_used,
            stack_bytes,
        })
    }
}

fn parameter_value_type(bundle: &TypeBundle, ty: TypeId) -> TypeId {
    // Arrays and functions were adjusted to pointers by the analyzer; the
    // classification only needs the unqualified view.
    bundle.unqualified(ty)
}

/// Classify a return type into its location.
pub fn classify_return(
    bundle: &TypeBundle,
    traits: &TypeTraits,
    return_ty: TypeId,
) -> Result<ReturnLocation> {
    let classes = classify(bundle, traits, return_ty)?;
    Ok(match classes.as_slice() {
        [] => ReturnLocation::None,
        [EightbyteClass::Integer] => ReturnLocation::Integer(PhysReg::Rax),
        [EightbyteClass::Sse] => ReturnLocation::Sse(PhysReg::Xmm0),
        [EightbyteClass::X87, EightbyteClass::X87Up] => ReturnLocation::X87,
        [EightbyteClass::ComplexX87, ..] => ReturnLocation::ComplexX87,
        classes if classes.contains(&EightbyteClass::Memory) => ReturnLocation::Memory,
        classes => {
            let mut gp = ABI_INTEGER_RETURNS.iter();
            let mut sse = ABI_SSE_RETURNS.iter();
            let mut assigned = Vec::with_capacity(classes.len());
            for &class in classes {
                let reg = match class {
                    EightbyteClass::Integer => gp.next(),
                    EightbyteClass::Sse => sse.next(),
                    EightbyteClass::SseUp | EightbyteClass::NoClass => continue,
                    _ => None,
                };
                match reg {
                    Some(&reg) => assigned.push((class, reg)),
                    None => return Ok(ReturnLocation::Memory),
                }
            }
            ReturnLocation::Multiple(assigned)
        }
    })
}

fn classify_parameter(
    bundle: &TypeBundle,
    traits: &TypeTraits,
    ty: TypeId,
    gp_used: &mut usize,
    sse_used: &mut usize,
    stack_bytes: &mut u64,
) -> Result<ParamLocation> {
    let classes = classify(bundle, traits, ty)?;
    let needs_gp = classes
        .iter()
        .filter(|&&c| c == EightbyteClass::Integer)
        .count();
    let needs_sse = classes.iter().filter(|&&c| c == EightbyteClass::Sse).count();
    let in_memory = classes.is_empty()
        || classes.iter().any(|&c| {
            matches!(
                c,
                EightbyteClass::Memory
                    | EightbyteClass::X87
                    | EightbyteClass::X87Up
                    | EightbyteClass::ComplexX87
            )
        })
        || *gp_used + needs_gp > ABI_INTEGER_ARGS.len()
        || *sse_used + needs_sse > ABI_SSE_ARGS.len();
    if in_memory {
        let layout = type_layout(bundle, traits, ty)?;
        let alignment = layout.alignment.max(8);
        let offset = (*stack_bytes).next_multiple_of(alignment);
        let size = layout.size.next_multiple_of(8);
        *stack_bytes = offset + size;
        return Ok(ParamLocation::Stack { offset, size });
    }
    if classes.as_slice() == [EightbyteClass::Integer] {
        let reg = ABI_INTEGER_ARGS[*gp_used];
        *gp_used += 1;
        return Ok(ParamLocation::Integer(reg));
    }
    if classes.as_slice() == [EightbyteClass::Sse] {
        let reg = ABI_SSE_ARGS[*sse_used];
        *sse_used += 1;
        return Ok(ParamLocation::Sse(reg));
    }
    let mut assigned = Vec::with_capacity(classes.len());
    for &class in &classes {
        match class {
            EightbyteClass::Integer => {
                assigned.push((class, ABI_INTEGER_ARGS[*gp_used]));
                *gp_used += 1;
            }
            EightbyteClass::Sse => {
                assigned.push((class, ABI_SSE_ARGS[*sse_used]));
                *sse_used += 1;
            }
            EightbyteClass::SseUp | EightbyteClass::NoClass => {}
            _ => return Err(Error::Internal("x87 eightbyte in register parameter")),
        }
    }
    Ok(ParamLocation::Multiple(assigned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionMode, FunctionType, Parameter, StructField, StructType};

    fn setup() -> (TypeBundle, TypeTraits) {
        (TypeBundle::new(), TypeTraits::lp64())
    }

    fn fn_type(bundle: &mut TypeBundle, ret: TypeId, params: &[TypeId]) -> TypeId {
        bundle.intern(Type::Function(FunctionType {
            return_type: ret,
            parameters: params
                .iter()
                .map(|&ty| Parameter {
                    name: None,
                    ty: Some(ty),
                })
                .collect(),
            ellipsis: false,
            mode: FunctionMode::Prototype,
        }))
    }

    #[test]
    fn scalar_classification() {
        let (mut bundle, traits) = setup();
        assert_eq!(
            classify(&bundle, &traits, bundle.signed_int()).unwrap().as_slice(),
            &[EightbyteClass::Integer]
        );
        assert_eq!(
            classify(&bundle, &traits, bundle.double()).unwrap().as_slice(),
            &[EightbyteClass::Sse]
        );
        assert_eq!(
            classify(&bundle, &traits, bundle.long_double()).unwrap().as_slice(),
            &[EightbyteClass::X87, EightbyteClass::X87Up]
        );
        let p = bundle.pointer(bundle.void());
        assert_eq!(
            classify(&bundle, &traits, p).unwrap().as_slice(),
            &[EightbyteClass::Integer]
        );
    }

    #[test]
    fn small_struct_uses_register_pair() {
        let (mut bundle, traits) = setup();
        let s = bundle.push_tagged(Type::Structure(StructType {
            tag: None,
            union_: false,
            complete: true,
            fields: vec![
                StructField {
                    name: Some("a".into()),
                    ty: bundle.signed_int(),
                    alignment: None,
                    bitwidth: None,
                },
                StructField {
                    name: Some("b".into()),
                    ty: bundle.signed_long(),
                    alignment: None,
                    bitwidth: None,
                },
            ],
        }));
        let classes = classify(&bundle, &traits, s).unwrap();
        assert_eq!(
            classes.as_slice(),
            &[EightbyteClass::Integer, EightbyteClass::Integer]
        );
        let ret = classify_return(&bundle, &traits, s).unwrap();
        assert_eq!(
            ret,
            ReturnLocation::Multiple(vec![
                (EightbyteClass::Integer, PhysReg::Rax),
                (EightbyteClass::Integer, PhysReg::Rdx),
            ])
        );
    }

    #[test]
    fn mixed_struct_classification() {
        let (mut bundle, traits) = setup();
        let s = bundle.push_tagged(Type::Structure(StructType {
            tag: None,
            union_: false,
            complete: true,
            fields: vec![
                StructField {
                    name: Some("x".into()),
                    ty: bundle.double(),
                    alignment: None,
                    bitwidth: None,
                },
                StructField {
                    name: Some("n".into()),
                    ty: bundle.signed_long(),
                    alignment: None,
                    bitwidth: None,
                },
            ],
        }));
        let classes = classify(&bundle, &traits, s).unwrap();
        assert_eq!(classes.as_slice(), &[EightbyteClass::Sse, EightbyteClass::Integer]);
    }

    #[test]
    fn large_struct_goes_to_memory() {
        let (mut bundle, traits) = setup();
        let arr = bundle.array(bundle.signed_long(), crate::types::ArrayBoundary::Bounded(4));
        let classes = classify(&bundle, &traits, arr).unwrap();
        assert!(classes.iter().all(|&c| c == EightbyteClass::Memory));
        assert_eq!(classify_return(&bundle, &traits, arr).unwrap(), ReturnLocation::Memory);
    }

    #[test]
    fn params_spill_to_stack_after_six_gprs() {
        let (mut bundle, traits) = setup();
        let int = bundle.signed_int();
        let f = fn_type(&mut bundle, int, &[int; 8]);
        let abi = FunctionAbi::of(&bundle, &traits, f).unwrap();
        assert_eq!(abi.gp_used, 6);
        assert_eq!(abi.parameters[0], ParamLocation::Integer(PhysReg::Rdi));
        assert_eq!(abi.parameters[5], ParamLocation::Integer(PhysReg::R9));
        assert_eq!(
            abi.parameters[6],
            ParamLocation::Stack { offset: 0, size: 8 }
        );
        assert_eq!(
            abi.parameters[7],
            ParamLocation::Stack { offset: 8, size: 8 }
        );
        assert_eq!(abi.stack_bytes, 16);
    }

    #[test]
    fn memory_return_consumes_rdi() {
        let (mut bundle, traits) = setup();
        let arr = bundle.array(bundle.signed_long(), crate::types::ArrayBoundary::Bounded(4));
        let int = bundle.signed_int();
        let f = fn_type(&mut bundle, arr, &[int]);
        let abi = FunctionAbi::of(&bundle, &traits, f).unwrap();
        assert_eq!(abi.ret, ReturnLocation::Memory);
        assert_eq!(abi.parameters[0], ParamLocation::Integer(PhysReg::Rsi));
    }
}
