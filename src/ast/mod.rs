//! Abstract syntax tree.
//!
//! Nodes live in a per-translation-unit [`Arena`] and refer to each other by
//! [`NodeId`]; the parser (external to this crate) builds them through the
//! constructors here, the analyzer fills each node's [`NodeProperties`]
//! exactly once, and the AST→IR translator consumes the analyzed tree.
//! Since declarator syntax is the parser's business, type positions in the
//! tree carry already-constructed [`TypeId`]s wrapped in `TypeName` nodes.

mod props;

pub use self::props::{Category, ConstantClass, ConstantValue, NodeProperties};

use crate::bigint::BigInt;
use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::source::SourceLocation;
use crate::types::{FloatKind, TypeId};

entity_ref! {
    /// Reference to an AST node in its arena.
    pub struct NodeId("node")
}

entity_ref! {
    /// Identifier of an aggregate temporary requested during analysis.
    pub struct TempId("tmp")
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+x`.
    Plus,
    /// `-x`.
    Negate,
    /// `~x`.
    Invert,
    /// `!x`.
    LogicalNot,
    /// `&x`.
    AddressOf,
    /// `*x`.
    Indirection,
    /// `++x`.
    PreIncrement,
    /// `--x`.
    PreDecrement,
    /// `x++`.
    PostIncrement,
    /// `x--`.
    PostDecrement,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`.
    Add,
    /// `-`.
    Subtract,
    /// `*`.
    Multiply,
    /// `/`.
    Divide,
    /// `%`.
    Modulo,
    /// `<<`.
    ShiftLeft,
    /// `>>`.
    ShiftRight,
    /// `<`.
    Less,
    /// `<=`.
    LessEqual,
    /// `>`.
    Greater,
    /// `>=`.
    GreaterEqual,
    /// `==`.
    Equal,
    /// `!=`.
    NotEqual,
    /// `&`.
    BitAnd,
    /// `|`.
    BitOr,
    /// `^`.
    BitXor,
    /// `&&`.
    LogicalAnd,
    /// `||`.
    LogicalOr,
}

impl BinaryOp {
    /// Is this a `==`/`!=`/relational operator?
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
                | BinaryOp::Equal
                | BinaryOp::NotEqual
        )
    }
}

/// Compound-assignment operators (`Simple` is plain `=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`.
    Simple,
    /// `+=`.
    Add,
    /// `-=`.
    Subtract,
    /// `*=`.
    Multiply,
    /// `/=`.
    Divide,
    /// `%=`.
    Modulo,
    /// `<<=`.
    ShiftLeft,
    /// `>>=`.
    ShiftRight,
    /// `&=`.
    BitAnd,
    /// `|=`.
    BitOr,
    /// `^=`.
    BitXor,
}

/// Builtins the analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    /// `sizeof` (argument may be an expression or a type name).
    SizeOf,
    /// `_Alignof`.
    AlignOf,
    /// `__builtin_offsetof(type, member)`.
    OffsetOf,
    /// `__builtin_va_start(ap, last)`.
    VaStart,
    /// `__builtin_va_end(ap)`.
    VaEnd,
    /// `__builtin_va_arg(ap, type)`.
    VaArg,
    /// `__builtin_va_copy(dst, src)`.
    VaCopy,
    /// `__builtin_add_overflow(a, b, res)`.
    AddOverflow,
    /// `__builtin_sub_overflow(a, b, res)`.
    SubOverflow,
    /// `__builtin_mul_overflow(a, b, res)`.
    MulOverflow,
}

/// Integer constant suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerConstantType {
    /// No suffix.
    Int,
    /// `u`.
    UnsignedInt,
    /// `l`.
    Long,
    /// `ul`.
    UnsignedLong,
    /// `ll`.
    LongLong,
    /// `ull`.
    UnsignedLongLong,
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `true`/`false`.
    Bool(bool),
    /// Character constant (already widened by the lexer).
    Char(i64),
    /// Integer constant with suffix classification.
    Integer {
        /// Literal value.
        value: u64,
        /// Suffix-derived type.
        base: IntegerConstantType,
    },
    /// Floating constant.
    Float {
        /// Literal value (host `f64`; `long double` constants keep the
        /// double-precision value).
        value: f64,
        /// Literal kind from the suffix.
        kind: FloatKind,
    },
    /// `wb`/`uwb`-suffixed bit-precise constant.
    BitPrecise {
        /// Payload at its minimal width.
        value: BigInt,
        /// Signedness.
        signed: bool,
    },
    /// `nullptr`.
    NullPointer,
}

/// Designator inside a braced initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Designator {
    /// `.member`.
    Member(String),
    /// `[index]`; the node must be an integer constant expression.
    Index(NodeId),
}

/// An initializer: a plain expression or a braced, possibly designated list.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// `= expr`.
    Expression(NodeId),
    /// `= { ... }`.
    List(Vec<InitializerListEntry>),
}

/// One entry of a braced initializer list.
#[derive(Debug, Clone, PartialEq)]
pub struct InitializerListEntry {
    /// Designator path, outermost first; empty for positional entries.
    pub designators: Vec<Designator>,
    /// The entry's value.
    pub value: Initializer,
}

/// Storage-class specifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    /// No explicit storage class.
    #[default]
    Unknown,
    /// `typedef`.
    Typedef,
    /// `extern`.
    Extern,
    /// `static`.
    Static,
    /// `auto`.
    Auto,
    /// `register`.
    Register,
}

/// One constraint/expression pair of an inline-assembly directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAssemblyParameter {
    /// Constraint string, e.g. `"=r"`.
    pub constraint: String,
    /// The constrained expression.
    pub parameter: NodeId,
}

/// GCC-style inline assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAssembly {
    /// Assembly template text.
    pub template: String,
    /// Output operands; must be lvalues.
    pub outputs: Vec<InlineAssemblyParameter>,
    /// Input operands.
    pub inputs: Vec<InlineAssemblyParameter>,
    /// Clobbered registers.
    pub clobbers: Vec<String>,
    /// `asm goto` jump labels.
    pub jump_labels: Vec<String>,
}

/// AST node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Literal constant.
    Constant(Constant),
    /// Identifier reference.
    Identifier(String),
    /// String literal (decoded bytes, terminator included).
    StringLiteral(Vec<u8>),
    /// `base.member`.
    StructMember {
        /// Aggregate expression.
        base: NodeId,
        /// Member name.
        member: String,
    },
    /// `base->member`.
    IndirectStructMember {
        /// Pointer expression.
        base: NodeId,
        /// Member name.
        member: String,
    },
    /// `array[subscript]`.
    ArraySubscript {
        /// First operand.
        array: NodeId,
        /// Second operand.
        subscript: NodeId,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: NodeId,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: NodeId,
        /// Right operand.
        rhs: NodeId,
    },
    /// `(type) expr`.
    Cast {
        /// A `TypeName` node.
        type_name: NodeId,
        /// Cast operand.
        operand: NodeId,
    },
    /// Function call.
    Call {
        /// Callee expression.
        callee: NodeId,
        /// Arguments in order.
        arguments: Vec<NodeId>,
    },
    /// `(type){ ... }`.
    CompoundLiteral {
        /// A `TypeName` node.
        type_name: NodeId,
        /// Braced initializer.
        initializer: Initializer,
    },
    /// `_Generic(control, assoc...)`.
    GenericSelection {
        /// Controlling expression.
        control: NodeId,
        /// `(type-name, expr)` associations; `None` marks `default`.
        associations: Vec<(Option<NodeId>, NodeId)>,
    },
    /// `cond ? then : else` (GNU `cond ?: else` when `then_expr` is absent).
    Conditional {
        /// Condition.
        condition: NodeId,
        /// Second operand, if present.
        then_expr: Option<NodeId>,
        /// Third operand.
        else_expr: NodeId,
    },
    /// Comma sequence.
    Comma {
        /// Sub-expressions, evaluated left to right.
        expressions: Vec<NodeId>,
    },
    /// Assignment.
    Assignment {
        /// Operator.
        op: AssignOp,
        /// Target lvalue.
        target: NodeId,
        /// Assigned value.
        value: NodeId,
    },
    /// Builtin invocation.
    Builtin {
        /// Which builtin.
        builtin: BuiltinOp,
        /// Arguments (expressions or `TypeName` nodes).
        arguments: Vec<NodeId>,
    },
    /// A resolved type in type position.
    TypeName(TypeId),
    /// Declaration carrying one or more init-declarators.
    Declaration {
        /// `InitDeclarator` nodes.
        declarators: Vec<NodeId>,
    },
    /// One declarator of a declaration.
    InitDeclarator {
        /// Declared name; anonymous for abstract declarators.
        name: Option<String>,
        /// Declared type (already combined from specifiers).
        ty: TypeId,
        /// Storage class.
        storage: StorageClass,
        /// `_Alignas` expression, if any.
        alignment: Option<NodeId>,
        /// Initializer, if any.
        initializer: Option<Initializer>,
    },
    /// Expression statement (`;` alone when the expression is absent).
    ExpressionStatement {
        /// The expression, if any.
        expression: Option<NodeId>,
    },
    /// `{ ... }`.
    CompoundStatement {
        /// Block items in order.
        items: Vec<NodeId>,
    },
    /// `label: statement`.
    LabeledStatement {
        /// Label name.
        label: String,
        /// Labeled statement.
        statement: NodeId,
    },
    /// `case expr: statement` or `default: statement`.
    CaseStatement {
        /// Case expression; `None` for `default`.
        expression: Option<NodeId>,
        /// Guarded statement.
        statement: NodeId,
    },
    /// `if`.
    If {
        /// Controlling expression.
        condition: NodeId,
        /// Then branch.
        then_branch: NodeId,
        /// Else branch, if any.
        else_branch: Option<NodeId>,
    },
    /// `switch`.
    Switch {
        /// Controlling expression.
        expression: NodeId,
        /// Switch body.
        statement: NodeId,
    },
    /// `while`.
    While {
        /// Controlling expression.
        condition: NodeId,
        /// Loop body.
        body: NodeId,
    },
    /// `do ... while`.
    DoWhile {
        /// Loop body.
        body: NodeId,
        /// Controlling expression.
        condition: NodeId,
    },
    /// `for`.
    For {
        /// Init clause: declaration or expression.
        init: Option<NodeId>,
        /// Controlling expression.
        condition: Option<NodeId>,
        /// Step expression.
        step: Option<NodeId>,
        /// Loop body.
        body: NodeId,
    },
    /// `goto label;`.
    Goto {
        /// Target label name.
        label: String,
    },
    /// `continue;`.
    Continue,
    /// `break;`.
    Break,
    /// `return expr;`.
    Return {
        /// Returned expression, if any.
        expression: Option<NodeId>,
    },
    /// Inline assembly directive.
    InlineAssemblyStatement(InlineAssembly),
    /// `_Static_assert(cond, "message")`.
    StaticAssertion {
        /// Asserted constant expression.
        condition: NodeId,
        /// Diagnostic string literal.
        message: String,
    },
    /// External function definition.
    FunctionDefinition {
        /// Function name.
        name: String,
        /// Function type (must be a `Function` type).
        ty: TypeId,
        /// Parameter names, parallel to the type's parameter list.
        parameter_names: Vec<String>,
        /// Storage class (`static` or none).
        storage: StorageClass,
        /// Body: a `CompoundStatement` node.
        body: NodeId,
    },
    /// Whole translation unit.
    TranslationUnit {
        /// External declarations and function definitions.
        items: Vec<NodeId>,
    },
}

/// An AST node: payload, source location and analyzed properties.
#[derive(Debug, Clone)]
pub struct Node {
    /// Payload.
    pub kind: NodeKind,
    /// Where the node came from.
    pub location: SourceLocation,
    /// Analysis results; default-initialized until the analyzer runs.
    pub props: NodeProperties,
}

/// Arena owning every AST node of one translation unit.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: PrimaryMap<NodeId, Node>,
}

impl Arena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node.
    pub fn push(&mut self, kind: NodeKind, location: SourceLocation) -> NodeId {
        self.nodes.push(Node {
            kind,
            location,
            props: NodeProperties::default(),
        })
    }

    /// Allocate a node without a source location.
    pub fn push_anon(&mut self, kind: NodeKind) -> NodeId {
        self.push(kind, SourceLocation::default())
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Borrow a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Borrow a node's analyzed properties.
    pub fn props(&self, id: NodeId) -> &NodeProperties {
        &self.nodes[id].props
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the arena empty?
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
