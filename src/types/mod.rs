//! C type representation.
//!
//! Types are interned in a per-translation-unit [`TypeBundle`] and referred
//! to by [`TypeId`]. Scalar, pointer, array, function and qualified types
//! are deduplicated structurally; structure, union and enumeration types
//! are nominal within the translation unit (one bundle entry per tag or
//! anonymous definition) and may start incomplete and be completed in
//! place. Same-type checks therefore reduce to either id equality or the
//! structural walk in [`compatible`](TypeBundle::compatible).

mod compose;
mod convert;
mod layout;

pub use self::convert::{integral_width, lvalue_conversion, promote, usual_arithmetic_conversions};
pub use self::layout::{
    resolve_member, struct_layout, type_layout, FieldLayout, Layout, MemberInfo, StructLayout,
};

use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::result::{Error, Result};
use crate::target::ScalarClass;
use rustc_hash::FxHashMap;

entity_ref! {
    /// Reference to an interned type.
    pub struct TypeId("ty")
}

/// Type qualifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Qualifiers {
    /// `const`.
    pub constant: bool,
    /// `volatile`.
    pub volatile: bool,
    /// `restrict`.
    pub restricted: bool,
    /// `_Atomic` qualification.
    pub atomic: bool,
}

impl Qualifiers {
    /// No qualifiers at all?
    pub fn is_empty(self) -> bool {
        !(self.constant || self.volatile || self.restricted || self.atomic)
    }

    /// Union of two qualifier sets.
    pub fn merge(self, other: Self) -> Self {
        Self {
            constant: self.constant || other.constant,
            volatile: self.volatile || other.volatile,
            restricted: self.restricted || other.restricted,
            atomic: self.atomic || other.atomic,
        }
    }

    /// Does `self` qualify at least everything `other` does?
    pub fn contains(self, other: Self) -> bool {
        (self.constant || !other.constant)
            && (self.volatile || !other.volatile)
            && (self.restricted || !other.restricted)
            && (self.atomic || !other.atomic)
    }
}

/// Floating-point kinds, also used for complex types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatKind {
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `long double`.
    LongDouble,
}

/// Array boundary classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayBoundary {
    /// `T a[]`.
    Unbounded,
    /// `T a[N]` with a constant bound.
    Bounded(u64),
    /// `T a[static N]` (function parameter position only).
    BoundedStatic(u64),
    /// Variable-length array.
    Vla,
    /// `T a[static expr]` with a runtime bound.
    VlaStatic,
}

impl ArrayBoundary {
    /// The constant element count, when there is one.
    pub fn constant_length(self) -> Option<u64> {
        match self {
            ArrayBoundary::Bounded(len) | ArrayBoundary::BoundedStatic(len) => Some(len),
            _ => None,
        }
    }

    /// Is this a variably modified boundary?
    pub fn is_vla(self) -> bool {
        matches!(self, ArrayBoundary::Vla | ArrayBoundary::VlaStatic)
    }
}

/// One field of a structure or union.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    /// Field name; `None` for anonymous members (bitfield padding or
    /// anonymous struct/union members).
    pub name: Option<String>,
    /// Field type.
    pub ty: TypeId,
    /// Explicit `_Alignas` in bytes, if any.
    pub alignment: Option<u64>,
    /// Bitfield width in bits, if the field is a bitfield.
    pub bitwidth: Option<u64>,
}

/// Structure or union type payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    /// Tag name, if any.
    pub tag: Option<String>,
    /// `true` for unions.
    pub union_: bool,
    /// Whether the member list is known.
    pub complete: bool,
    /// Ordered member list.
    pub fields: Vec<StructField>,
}

/// Enumeration type payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    /// Tag name, if any.
    pub tag: Option<String>,
    /// Whether the enumerator list is known.
    pub complete: bool,
    /// Underlying integer type.
    pub underlying: TypeId,
    /// Ordered `(name, value)` pairs.
    pub enumerators: Vec<(String, i64)>,
}

/// Function declaration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionMode {
    /// Prototyped declaration with typed parameters.
    Prototype,
    /// Old-style identifier-list declaration.
    KAndR,
}

/// One function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    /// Parameter name, if any.
    pub name: Option<String>,
    /// Adjusted parameter type; absent in K&R mode.
    pub ty: Option<TypeId>,
}

/// Function type payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Return type.
    pub return_type: TypeId,
    /// Parameters in order.
    pub parameters: Vec<Parameter>,
    /// Trailing `...`.
    pub ellipsis: bool,
    /// Prototype or K&R.
    pub mode: FunctionMode,
}

/// A C type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// `void`.
    Void,
    /// `_Bool`.
    Bool,
    /// Plain `char`.
    Char,
    /// `signed char`.
    SignedChar,
    /// `unsigned char`.
    UnsignedChar,
    /// `short`.
    SignedShort,
    /// `unsigned short`.
    UnsignedShort,
    /// `int`.
    SignedInt,
    /// `unsigned int`.
    UnsignedInt,
    /// `long`.
    SignedLong,
    /// `unsigned long`.
    UnsignedLong,
    /// `long long`.
    SignedLongLong,
    /// `unsigned long long`.
    UnsignedLongLong,
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `long double`.
    LongDouble,
    /// `_Complex float` / `_Complex double` / `_Complex long double`.
    Complex(FloatKind),
    /// Pointer to the referenced type.
    Pointer(TypeId),
    /// The type of `nullptr`.
    NullPointer,
    /// `_BitInt(width)` / `unsigned _BitInt(width)`.
    BitPrecise {
        /// Width in bits.
        width: u64,
        /// Signedness.
        signed: bool,
    },
    /// Enumeration.
    Enumeration(EnumType),
    /// Structure or union.
    Structure(StructType),
    /// Array.
    Array {
        /// Element type.
        element: TypeId,
        /// Boundary classification.
        boundary: ArrayBoundary,
        /// Element qualification for array-typed function parameters.
        qualifiers: Qualifiers,
    },
    /// Function.
    Function(FunctionType),
    /// Qualified version of the inner type.
    Qualified {
        /// Unqualified type.
        inner: TypeId,
        /// Applied qualifiers.
        qualifiers: Qualifiers,
    },
}

/// Per-translation-unit type table.
#[derive(Debug)]
pub struct TypeBundle {
    types: PrimaryMap<TypeId, Type>,
    interned: FxHashMap<Type, TypeId>,
    void: TypeId,
    bool_: TypeId,
    char_: TypeId,
    signed_char: TypeId,
    unsigned_char: TypeId,
    signed_short: TypeId,
    unsigned_short: TypeId,
    signed_int: TypeId,
    unsigned_int: TypeId,
    signed_long: TypeId,
    unsigned_long: TypeId,
    signed_long_long: TypeId,
    unsigned_long_long: TypeId,
    float: TypeId,
    double: TypeId,
    long_double: TypeId,
    null_pointer: TypeId,
}

macro_rules! scalar_accessors {
    ($($(#[$attr:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$attr])*
            pub fn $name(&self) -> TypeId {
                self.$name
            }
        )*
    };
}

impl TypeBundle {
    /// Create a bundle with the basic scalar types pre-interned.
    pub fn new() -> Self {
        let mut types = PrimaryMap::new();
        let mut interned = FxHashMap::default();
        let mut put = |ty: Type| -> TypeId {
            let id = types.push(ty.clone());
            interned.insert(ty, id);
            id
        };
        let void = put(Type::Void);
        let bool_ = put(Type::Bool);
        let char_ = put(Type::Char);
        let signed_char = put(Type::SignedChar);
        let unsigned_char = put(Type::UnsignedChar);
        let signed_short = put(Type::SignedShort);
        let unsigned_short = put(Type::UnsignedShort);
        let signed_int = put(Type::SignedInt);
        let unsigned_int = put(Type::UnsignedInt);
        let signed_long = put(Type::SignedLong);
        let unsigned_long = put(Type::UnsignedLong);
        let signed_long_long = put(Type::SignedLongLong);
        let unsigned_long_long = put(Type::UnsignedLongLong);
        let float = put(Type::Float);
        let double = put(Type::Double);
        let long_double = put(Type::LongDouble);
        let null_pointer = put(Type::NullPointer);
        Self {
            types,
            interned,
            void,
            bool_,
            char_,
            signed_char,
            unsigned_char,
            signed_short,
            unsigned_short,
            signed_int,
            unsigned_int,
            signed_long,
            unsigned_long,
            signed_long_long,
            unsigned_long_long,
            float,
            double,
            long_double,
            null_pointer,
        }
    }

    scalar_accessors! {
        /// `void`.
        void,
        /// `_Bool`.
        bool_,
        /// Plain `char`.
        char_,
        /// `signed char`.
        signed_char,
        /// `unsigned char`.
        unsigned_char,
        /// `short`.
        signed_short,
        /// `unsigned short`.
        unsigned_short,
        /// `int`.
        signed_int,
        /// `unsigned int`.
        unsigned_int,
        /// `long`.
        signed_long,
        /// `unsigned long`.
        unsigned_long,
        /// `long long`.
        signed_long_long,
        /// `unsigned long long`.
        unsigned_long_long,
        /// `float`.
        float,
        /// `double`.
        double,
        /// `long double`.
        long_double,
        /// The `nullptr` type.
        null_pointer,
    }

    /// Look up a type by id.
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id]
    }

    /// Intern a structural (non-tagged) type, deduplicating.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        debug_assert!(
            !matches!(ty, Type::Structure(_) | Type::Enumeration(_)),
            "tagged types are nominal, use push_tagged"
        );
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = self.types.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    /// Insert a structure, union or enumeration type. Tagged types are
    /// nominal: every definition gets its own entry.
    pub fn push_tagged(&mut self, ty: Type) -> TypeId {
        debug_assert!(matches!(ty, Type::Structure(_) | Type::Enumeration(_)));
        self.types.push(ty)
    }

    /// Complete a previously pushed structure or union in place.
    pub fn complete_structure(&mut self, id: TypeId, fields: Vec<StructField>) -> Result<()> {
        match &mut self.types[id] {
            Type::Structure(st) if !st.complete => {
                st.complete = true;
                st.fields = fields;
                Ok(())
            }
            Type::Structure(_) => Err(Error::AlreadyExists),
            _ => Err(Error::InvalidParameter("not a structure type")),
        }
    }

    /// Complete a previously pushed enumeration in place.
    pub fn complete_enumeration(
        &mut self,
        id: TypeId,
        underlying: TypeId,
        enumerators: Vec<(String, i64)>,
    ) -> Result<()> {
        match &mut self.types[id] {
            Type::Enumeration(en) if !en.complete => {
                en.complete = true;
                en.underlying = underlying;
                en.enumerators = enumerators;
                Ok(())
            }
            Type::Enumeration(_) => Err(Error::AlreadyExists),
            _ => Err(Error::InvalidParameter("not an enumeration type")),
        }
    }

    /// Pointer to `to`.
    pub fn pointer(&mut self, to: TypeId) -> TypeId {
        self.intern(Type::Pointer(to))
    }

    /// Array of `element` with the given boundary.
    pub fn array(&mut self, element: TypeId, boundary: ArrayBoundary) -> TypeId {
        self.intern(Type::Array {
            element,
            boundary,
            qualifiers: Qualifiers::default(),
        })
    }

    /// Bit-precise integer type.
    pub fn bit_precise(&mut self, width: u64, signed: bool) -> TypeId {
        self.intern(Type::BitPrecise { width, signed })
    }

    /// Qualify `inner`, merging with existing qualifiers; a no-op for an
    /// empty qualifier set.
    pub fn qualified(&mut self, inner: TypeId, qualifiers: Qualifiers) -> TypeId {
        if qualifiers.is_empty() {
            return inner;
        }
        match self.get(inner) {
            Type::Qualified {
                inner: deeper,
                qualifiers: existing,
            } => {
                let merged = existing.merge(qualifiers);
                let deeper = *deeper;
                self.intern(Type::Qualified {
                    inner: deeper,
                    qualifiers: merged,
                })
            }
            _ => self.intern(Type::Qualified { inner, qualifiers }),
        }
    }

    /// Strip qualifiers, if any.
    pub fn unqualified(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            Type::Qualified { inner, .. } => *inner,
            _ => id,
        }
    }

    /// Qualifiers applied at the top level of `id`.
    pub fn qualifiers_of(&self, id: TypeId) -> Qualifiers {
        match self.get(id) {
            Type::Qualified { qualifiers, .. } => *qualifiers,
            _ => Qualifiers::default(),
        }
    }

    /// Is `id` (after stripping qualifiers) a signed integer type?
    pub fn is_signed_integer(&self, id: TypeId) -> bool {
        match self.get(self.unqualified(id)) {
            Type::Char => true, // plain char is signed on this target
            Type::SignedChar
            | Type::SignedShort
            | Type::SignedInt
            | Type::SignedLong
            | Type::SignedLongLong => true,
            Type::BitPrecise { signed, .. } => *signed,
            Type::Enumeration(en) => self.is_signed_integer(en.underlying),
            _ => false,
        }
    }

    /// Is `id` any integral type (including `_Bool`, enums and `_BitInt`)?
    pub fn is_integral(&self, id: TypeId) -> bool {
        matches!(
            self.get(self.unqualified(id)),
            Type::Bool
                | Type::Char
                | Type::SignedChar
                | Type::UnsignedChar
                | Type::SignedShort
                | Type::UnsignedShort
                | Type::SignedInt
                | Type::UnsignedInt
                | Type::SignedLong
                | Type::UnsignedLong
                | Type::SignedLongLong
                | Type::UnsignedLongLong
                | Type::BitPrecise { .. }
                | Type::Enumeration(_)
        )
    }

    /// Is `id` a real floating type?
    pub fn is_floating(&self, id: TypeId) -> bool {
        matches!(
            self.get(self.unqualified(id)),
            Type::Float | Type::Double | Type::LongDouble
        )
    }

    /// Is `id` a complex floating type?
    pub fn is_complex(&self, id: TypeId) -> bool {
        matches!(self.get(self.unqualified(id)), Type::Complex(_))
    }

    /// Is `id` arithmetic (integral, floating or complex)?
    pub fn is_arithmetic(&self, id: TypeId) -> bool {
        self.is_integral(id) || self.is_floating(id) || self.is_complex(id)
    }

    /// Is `id` a pointer type?
    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(self.unqualified(id)), Type::Pointer(_))
    }

    /// Is `id` scalar (arithmetic, pointer or nullptr)?
    pub fn is_scalar(&self, id: TypeId) -> bool {
        self.is_arithmetic(id)
            || matches!(
                self.get(self.unqualified(id)),
                Type::Pointer(_) | Type::NullPointer
            )
    }

    /// Is `id` an aggregate (structure, union or array)?
    pub fn is_aggregate(&self, id: TypeId) -> bool {
        matches!(
            self.get(self.unqualified(id)),
            Type::Structure(_) | Type::Array { .. }
        )
    }

    /// Is `id` an array type?
    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.get(self.unqualified(id)), Type::Array { .. })
    }

    /// Is `id` a function type?
    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.get(self.unqualified(id)), Type::Function(_))
    }

    /// Is `id` the `void` type (possibly qualified)?
    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(self.unqualified(id)), Type::Void)
    }

    /// Is `id` complete enough to have a size?
    pub fn is_complete(&self, id: TypeId) -> bool {
        match self.get(self.unqualified(id)) {
            Type::Void => false,
            Type::Structure(st) => st.complete,
            Type::Enumeration(en) => en.complete,
            Type::Array { element, boundary, .. } => {
                !matches!(boundary, ArrayBoundary::Unbounded) && self.is_complete(*element)
            }
            Type::Function(_) => false,
            _ => true,
        }
    }

    /// Is `id` variably modified (contains a VLA at any level)?
    pub fn is_variably_modified(&self, id: TypeId) -> bool {
        match self.get(self.unqualified(id)) {
            Type::Array { element, boundary, .. } => {
                boundary.is_vla() || self.is_variably_modified(*element)
            }
            Type::Pointer(to) => self.is_variably_modified(*to),
            _ => false,
        }
    }

    /// The referenced type of a pointer.
    pub fn pointee(&self, id: TypeId) -> Result<TypeId> {
        match self.get(self.unqualified(id)) {
            Type::Pointer(to) => Ok(*to),
            _ => Err(Error::InvalidParameter("not a pointer type")),
        }
    }

    /// The element type of an array.
    pub fn array_element(&self, id: TypeId) -> Result<TypeId> {
        match self.get(self.unqualified(id)) {
            Type::Array { element, .. } => Ok(*element),
            _ => Err(Error::InvalidParameter("not an array type")),
        }
    }

    /// The scalar class of an arithmetic/pointer type for the target
    /// traits table; errors on aggregates and `void`.
    pub fn scalar_class(&self, id: TypeId) -> Result<ScalarClass> {
        Ok(match self.get(self.unqualified(id)) {
            Type::Bool => ScalarClass::Bool,
            Type::Char => ScalarClass::Char,
            Type::SignedChar => ScalarClass::SignedChar,
            Type::UnsignedChar => ScalarClass::UnsignedChar,
            Type::SignedShort => ScalarClass::Short,
            Type::UnsignedShort => ScalarClass::UnsignedShort,
            Type::SignedInt => ScalarClass::Int,
            Type::UnsignedInt => ScalarClass::UnsignedInt,
            Type::SignedLong => ScalarClass::Long,
            Type::UnsignedLong => ScalarClass::UnsignedLong,
            Type::SignedLongLong => ScalarClass::LongLong,
            Type::UnsignedLongLong => ScalarClass::UnsignedLongLong,
            Type::Float => ScalarClass::Float,
            Type::Double => ScalarClass::Double,
            Type::LongDouble => ScalarClass::LongDouble,
            Type::Pointer(_) | Type::NullPointer => ScalarClass::Pointer,
            Type::Enumeration(en) => return self.scalar_class(en.underlying),
            _ => return Err(Error::InvalidParameter("type has no scalar class")),
        })
    }

    /// Signed/unsigned pairing of standard integer types by rank index:
    /// 0=char, 1=short, 2=int, 3=long, 4=long long.
    pub fn standard_integer(&self, rank: u8, signed: bool) -> TypeId {
        match (rank, signed) {
            (0, true) => self.signed_char,
            (0, false) => self.unsigned_char,
            (1, true) => self.signed_short,
            (1, false) => self.unsigned_short,
            (2, true) => self.signed_int,
            (2, false) => self.unsigned_int,
            (3, true) => self.signed_long,
            (3, false) => self.unsigned_long,
            _ => {
                if signed {
                    self.signed_long_long
                } else {
                    self.unsigned_long_long
                }
            }
        }
    }

    /// Conversion rank index of a standard integer type (see
    /// [`standard_integer`](Self::standard_integer)); errors on `_BitInt`.
    pub fn integer_rank(&self, id: TypeId) -> Result<u8> {
        Ok(match self.get(self.unqualified(id)) {
            Type::Bool => 0,
            Type::Char | Type::SignedChar | Type::UnsignedChar => 0,
            Type::SignedShort | Type::UnsignedShort => 1,
            Type::SignedInt | Type::UnsignedInt => 2,
            Type::SignedLong | Type::UnsignedLong => 3,
            Type::SignedLongLong | Type::UnsignedLongLong => 4,
            Type::Enumeration(en) => return self.integer_rank(en.underlying),
            _ => return Err(Error::InvalidParameter("type has no integer rank")),
        })
    }
}

impl Default for TypeBundle {
    fn default() -> Self {
        Self::new()
    }
}

pub use self::compose::{compatible, composite};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_structural_types() {
        let mut bundle = TypeBundle::new();
        let p1 = bundle.pointer(bundle.signed_int());
        let p2 = bundle.pointer(bundle.signed_int());
        assert_eq!(p1, p2);
        let a1 = bundle.array(p1, ArrayBoundary::Bounded(4));
        let a2 = bundle.array(p2, ArrayBoundary::Bounded(4));
        assert_eq!(a1, a2);
        let a3 = bundle.array(p1, ArrayBoundary::Bounded(5));
        assert_ne!(a1, a3);
    }

    #[test]
    fn tagged_types_are_nominal() {
        let mut bundle = TypeBundle::new();
        let mk = |bundle: &mut TypeBundle| {
            bundle.push_tagged(Type::Structure(StructType {
                tag: Some("s".into()),
                union_: false,
                complete: false,
                fields: Vec::new(),
            }))
        };
        let s1 = mk(&mut bundle);
        let s2 = mk(&mut bundle);
        assert_ne!(s1, s2);
        assert!(!bundle.is_complete(s1));
        bundle
            .complete_structure(
                s1,
                vec![StructField {
                    name: Some("a".into()),
                    ty: bundle.signed_int(),
                    alignment: None,
                    bitwidth: None,
                }],
            )
            .unwrap();
        assert!(bundle.is_complete(s1));
        assert!(!bundle.is_complete(s2));
        assert_eq!(
            bundle.complete_structure(s1, Vec::new()),
            Err(Error::AlreadyExists)
        );
    }

    #[test]
    fn qualifier_merge() {
        let mut bundle = TypeBundle::new();
        let c = Qualifiers {
            constant: true,
            ..Qualifiers::default()
        };
        let v = Qualifiers {
            volatile: true,
            ..Qualifiers::default()
        };
        let q1 = bundle.qualified(bundle.signed_int(), c);
        let q2 = bundle.qualified(q1, v);
        assert_eq!(bundle.qualifiers_of(q2), c.merge(v));
        assert_eq!(bundle.unqualified(q2), bundle.signed_int());
        assert_eq!(bundle.qualified(bundle.signed_int(), Qualifiers::default()), bundle.signed_int());
    }

    #[test]
    fn classification() {
        let mut bundle = TypeBundle::new();
        assert!(bundle.is_integral(bundle.bool_()));
        assert!(bundle.is_arithmetic(bundle.long_double()));
        let bp = bundle.bit_precise(200, true);
        assert!(bundle.is_integral(bp));
        assert!(bundle.is_signed_integer(bp));
        let ptr = bundle.pointer(bundle.void());
        assert!(bundle.is_scalar(ptr));
        assert!(!bundle.is_arithmetic(ptr));
        assert!(bundle.is_scalar(bundle.null_pointer()));
    }
}
