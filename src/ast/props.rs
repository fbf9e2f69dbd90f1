//! Analyzed per-node properties.

use super::TempId;
use crate::bigint::BigInt;
use crate::sema::flow::PointId;
use crate::sema::scope::SymbolId;
use crate::types::TypeId;

/// What kind of construct a node turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Category {
    /// Not analyzed yet.
    #[default]
    Unknown,
    /// An expression with a type.
    Expression,
    /// A type name.
    Type,
    /// A statement.
    Statement,
    /// A declaration.
    Declaration,
    /// One init-declarator of a declaration.
    InitDeclarator,
    /// A member designator.
    MemberDesignator,
    /// An inline-assembly directive.
    InlineAssembly,
}

/// Constant-expression classification of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstantClass {
    /// Not a constant expression.
    #[default]
    None,
    /// Integer constant expression.
    Integer,
    /// Floating constant expression.
    Float,
    /// Complex floating constant expression.
    ComplexFloat,
    /// Address constant.
    Address,
}

/// Evaluated constant payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// Integer representable in the host value width.
    Integer(i64),
    /// Integer wider than the host value width.
    BigInteger(BigInt),
    /// Real floating value.
    Float(f64),
    /// Complex floating value.
    Complex(f64, f64),
    /// Address of a named object plus a byte offset.
    Address {
        /// Symbol whose address is taken.
        symbol: String,
        /// Constant byte offset.
        offset: i64,
    },
    /// Address of an interned string literal plus a byte offset.
    StringAddress {
        /// The literal bytes.
        literal: Vec<u8>,
        /// Constant byte offset.
        offset: i64,
    },
}

impl ConstantValue {
    /// The integer payload, if the value is an (arbitrary-width) integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConstantValue::Integer(value) => Some(*value),
            ConstantValue::BigInteger(value) => value.to_signed().ok(),
            _ => None,
        }
    }
}

/// Properties filled in by the analyzer, exactly once per node.
#[derive(Debug, Clone, Default)]
pub struct NodeProperties {
    /// Construct kind.
    pub category: Category,
    /// Semantic type (expressions and type names).
    pub ty: Option<TypeId>,
    /// Is the expression an lvalue?
    pub lvalue: bool,
    /// May the expression's address be taken?
    pub addressable: bool,
    /// Constant-expression classification.
    pub constant: ConstantClass,
    /// Evaluated constant payload, when classification is not `None`.
    pub constant_value: Option<ConstantValue>,
    /// Does the expression access an atomic object?
    pub atomic: bool,
    /// `(bit offset, width)` when the expression designates a bitfield.
    pub bitfield: Option<(u64, u64)>,
    /// Scope entry backing an identifier expression.
    pub scoped_id: Option<SymbolId>,
    /// Flow-control structure opened by this node (blocks, loops, switch).
    pub flow_control: Option<crate::sema::flow::FlowId>,
    /// Branch target of goto/break/continue/case/default.
    pub target_point: Option<PointId>,
    /// Temporary object backing an aggregate rvalue.
    pub temporary: Option<TempId>,
}
