//! Semantic analyzer.
//!
//! Walks each AST node exactly once, filling its properties: category,
//! semantic type, lvalueness, addressability, constant-expression
//! classification and evaluated value, atomicity, bitfield placement, and
//! back-references into the scope and flow-control arenas. Any language
//! rule violation surfaces as [`Error::Source`] carrying the offending
//! node's location; `_Static_assert` failures use the dedicated
//! [`Error::StaticAssert`] kind.

pub mod flow;
pub mod scope;

mod constexpr;
mod expr;
mod stmt;

use crate::ast::{Arena, Category, ConstantClass, ConstantValue, NodeId, NodeKind, TempId};
use crate::entity::EntityRef;
use crate::result::{Error, Result};
use crate::source::SourceLocation;
use crate::target::TypeTraits;
use crate::types::{
    self, lvalue_conversion, ArrayBoundary, Type, TypeBundle, TypeId,
};
use self::flow::FlowTree;
use self::scope::{ScopeManager, ScopedIdentifier, SymbolId};
use rustc_hash::FxHashMap;

/// Knobs controlling accepted dialect relaxations.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    /// Permit initializing an aggregate from a scalar without braces.
    pub permissive_aggregate_scalar_init: bool,
}

/// Per-function-definition analysis state.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    /// Function name.
    pub name: String,
    /// Declared return type.
    pub return_type: TypeId,
    /// Is the function variadic?
    pub variadic: bool,
}

/// Type analysis context: most rules are position-independent, but array
/// qualifiers and `static` bounds are only legal on function parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeAnalysisContext {
    /// Anywhere else.
    Default,
    /// Function parameter declaration.
    FunctionParameter,
}

/// The analyzer itself.
pub struct Analyzer<'a> {
    /// The tree being analyzed.
    pub arena: &'a mut Arena,
    /// Type table.
    pub bundle: &'a mut TypeBundle,
    /// Target traits.
    pub traits: &'a TypeTraits,
    /// Identifier scopes.
    pub scopes: ScopeManager,
    /// Flow-control tree.
    pub flow: FlowTree,
    /// Dialect configuration.
    pub config: AnalyzerConfig,
    pub(crate) function: Option<FunctionContext>,
    pub(crate) parameter_symbols: FxHashMap<NodeId, Vec<SymbolId>>,
    temporaries: u32,
}

/// Analysis results the translator needs beyond the annotated arena.
#[derive(Debug)]
pub struct AnalysisArtifacts {
    /// Scope entry arena.
    pub scopes: ScopeManager,
    /// Flow-control tree.
    pub flow: FlowTree,
    /// Parameter scope entries of each function definition, in order.
    pub parameter_symbols: FxHashMap<NodeId, Vec<SymbolId>>,
}

impl<'a> Analyzer<'a> {
    /// Create an analyzer over an arena and type bundle.
    pub fn new(arena: &'a mut Arena, bundle: &'a mut TypeBundle, traits: &'a TypeTraits) -> Self {
        Self {
            arena,
            bundle,
            traits,
            scopes: ScopeManager::new(),
            flow: FlowTree::new(),
            config: AnalyzerConfig::default(),
            function: None,
            parameter_symbols: FxHashMap::default(),
            temporaries: 0,
        }
    }

    /// Analyze one node (and, recursively, its children).
    pub fn analyze_node(&mut self, id: NodeId) -> Result<()> {
        let kind = self.arena.node(id).kind.clone();
        let location = self.arena.node(id).location;
        match kind {
            NodeKind::Constant(constant) => self.analyze_constant(id, &constant),
            NodeKind::Identifier(name) => self.analyze_identifier(id, &name, location),
            NodeKind::StringLiteral(bytes) => self.analyze_string_literal(id, &bytes),
            NodeKind::StructMember { base, member } => {
                self.analyze_struct_member(id, base, &member, false, location)
            }
            NodeKind::IndirectStructMember { base, member } => {
                self.analyze_struct_member(id, base, &member, true, location)
            }
            NodeKind::ArraySubscript { array, subscript } => {
                self.analyze_array_subscript(id, array, subscript, location)
            }
            NodeKind::Unary { op, operand } => self.analyze_unary(id, op, operand, location),
            NodeKind::Binary { op, lhs, rhs } => self.analyze_binary(id, op, lhs, rhs, location),
            NodeKind::Cast { type_name, operand } => {
                self.analyze_cast(id, type_name, operand, location)
            }
            NodeKind::Call { callee, arguments } => {
                self.analyze_call(id, callee, &arguments, location)
            }
            NodeKind::CompoundLiteral {
                type_name,
                initializer,
            } => self.analyze_compound_literal(id, type_name, &initializer, location),
            NodeKind::GenericSelection {
                control,
                associations,
            } => self.analyze_generic_selection(id, control, &associations, location),
            NodeKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => self.analyze_conditional(id, condition, then_expr, else_expr, location),
            NodeKind::Comma { expressions } => self.analyze_comma(id, &expressions, location),
            NodeKind::Assignment { op, target, value } => {
                self.analyze_assignment(id, op, target, value, location)
            }
            NodeKind::Builtin { builtin, arguments } => {
                self.analyze_builtin(id, builtin, &arguments, location)
            }
            NodeKind::TypeName(ty) => {
                self.analyze_type(ty, TypeAnalysisContext::Default, location)?;
                let props = &mut self.arena.node_mut(id).props;
                props.category = Category::Type;
                props.ty = Some(ty);
                Ok(())
            }
            NodeKind::Declaration { declarators } => self.analyze_declaration(id, &declarators),
            NodeKind::InitDeclarator { .. } => self.analyze_init_declarator(id, location),
            NodeKind::ExpressionStatement { expression } => {
                self.analyze_expression_statement(id, expression)
            }
            NodeKind::CompoundStatement { items } => self.analyze_compound_statement(id, &items),
            NodeKind::LabeledStatement { label, statement } => {
                self.analyze_labeled_statement(id, &label, statement)
            }
            NodeKind::CaseStatement {
                expression,
                statement,
            } => self.analyze_case_statement(id, expression, statement, location),
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.analyze_if(id, condition, then_branch, else_branch, location),
            NodeKind::Switch {
                expression,
                statement,
            } => self.analyze_switch(id, expression, statement, location),
            NodeKind::While { condition, body } => self.analyze_while(id, condition, body, location),
            NodeKind::DoWhile { body, condition } => {
                self.analyze_do_while(id, body, condition, location)
            }
            NodeKind::For {
                init,
                condition,
                step,
                body,
            } => self.analyze_for(id, init, condition, step, body, location),
            NodeKind::Goto { label } => self.analyze_goto(id, &label, location),
            NodeKind::Continue => self.analyze_continue(id, location),
            NodeKind::Break => self.analyze_break(id, location),
            NodeKind::Return { expression } => self.analyze_return(id, expression, location),
            NodeKind::InlineAssemblyStatement(asm) => self.analyze_inline_assembly(id, &asm, location),
            NodeKind::StaticAssertion { condition, message } => {
                self.analyze_static_assertion(id, condition, &message, location)
            }
            NodeKind::FunctionDefinition {
                name,
                ty,
                parameter_names,
                storage,
                body,
            } => self.analyze_function_definition(id, &name, ty, &parameter_names, storage, body, location),
            NodeKind::TranslationUnit { items } => {
                for item in items {
                    self.analyze_node(item)?;
                }
                let props = &mut self.arena.node_mut(id).props;
                props.category = Category::Declaration;
                Ok(())
            }
        }
    }

    /// Analyze a node and require it to be a constant expression; returns
    /// the evaluated value.
    pub fn analyze_constant_expression(&mut self, id: NodeId) -> Result<ConstantValue> {
        self.analyze_node(id)?;
        let props = self.arena.props(id);
        if props.constant == ConstantClass::None {
            return Err(Error::at(
                self.arena.node(id).location,
                "expected a constant expression",
            ));
        }
        props
            .constant_value
            .clone()
            .ok_or(Error::Internal("constant classification without a value"))
    }

    /// Analyze an `_Alignas` operand: an integer constant expression that
    /// is zero or a power of two.
    pub fn analyze_alignment(&mut self, id: NodeId) -> Result<u64> {
        let location = self.arena.node(id).location;
        let value = self.analyze_constant_expression(id)?;
        if self.arena.props(id).constant != ConstantClass::Integer {
            return Err(Error::at(location, "alignment shall be an integer constant"));
        }
        let alignment = value
            .as_integer()
            .ok_or(Error::Internal("integer constant without payload"))?;
        if alignment < 0 || (alignment != 0 && !(alignment as u64).is_power_of_two()) {
            return Err(Error::at(location, "alignment shall be a power of two"));
        }
        Ok(alignment as u64)
    }

    /// Validate a type in the given context: structure field rules, array
    /// boundary placement, function return/parameter constraints.
    pub fn analyze_type(
        &mut self,
        ty: TypeId,
        context: TypeAnalysisContext,
        location: SourceLocation,
    ) -> Result<()> {
        match self.bundle.get(ty).clone() {
            Type::Void
            | Type::Bool
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
            | Type::Float
            | Type::Double
            | Type::LongDouble
            | Type::Complex(_)
            | Type::NullPointer => Ok(()),
            Type::BitPrecise { width, signed } => {
                let minimum = if signed { 2 } else { 1 };
                if width < minimum {
                    return Err(Error::at(location, "bit-precise width is too small"));
                }
                Ok(())
            }
            Type::Pointer(to) => self.analyze_type(to, TypeAnalysisContext::Default, location),
            Type::Enumeration(en) => {
                self.analyze_type(en.underlying, TypeAnalysisContext::Default, location)
            }
            Type::Structure(st) => {
                for (index, field) in st.fields.iter().enumerate() {
                    self.analyze_type(field.ty, TypeAnalysisContext::Default, location)?;
                    if self.bundle.is_function(field.ty) {
                        return Err(Error::at(location, "structure field has function type"));
                    }
                    match field.bitwidth {
                        Some(width) => {
                            if !self.bundle.is_integral(field.ty) {
                                return Err(Error::at(location, "bitfield has non-integral type"));
                            }
                            if width == 0 && field.name.is_some() {
                                return Err(Error::at(location, "named bitfield has zero width"));
                            }
                            if field.alignment.is_some() {
                                return Err(Error::at(
                                    location,
                                    "bitfield cannot carry explicit alignment",
                                ));
                            }
                        }
                        None => {
                            let flexible = !st.union_
                                && index + 1 == st.fields.len()
                                && index > 0
                                && matches!(
                                    self.bundle.get(self.bundle.unqualified(field.ty)),
                                    Type::Array {
                                        boundary: ArrayBoundary::Unbounded,
                                        ..
                                    }
                                );
                            if !flexible {
                                if !self.bundle.is_complete(field.ty) {
                                    return Err(Error::at(
                                        location,
                                        "structure field has incomplete type",
                                    ));
                                }
                                if self.bundle.is_variably_modified(field.ty) {
                                    return Err(Error::at(
                                        location,
                                        "structure field has variably modified type",
                                    ));
                                }
                            }
                        }
                    }
                }
                Ok(())
            }
            Type::Array {
                element,
                boundary,
                qualifiers,
            } => {
                self.analyze_type(element, TypeAnalysisContext::Default, location)?;
                if self.bundle.is_function(element) {
                    return Err(Error::at(location, "array of functions"));
                }
                if !self.bundle.is_complete(element) {
                    return Err(Error::at(location, "array of incomplete element type"));
                }
                let parameter_only = matches!(
                    boundary,
                    ArrayBoundary::BoundedStatic(_) | ArrayBoundary::VlaStatic
                ) || !qualifiers.is_empty();
                if parameter_only && context != TypeAnalysisContext::FunctionParameter {
                    return Err(Error::at(
                        location,
                        "array qualifiers and static bound require parameter context",
                    ));
                }
                Ok(())
            }
            Type::Function(function) => {
                self.analyze_type(function.return_type, TypeAnalysisContext::Default, location)?;
                if self.bundle.is_array(function.return_type)
                    || self.bundle.is_function(function.return_type)
                {
                    return Err(Error::at(location, "function returns array or function"));
                }
                for parameter in &function.parameters {
                    if let Some(parameter_ty) = parameter.ty {
                        self.analyze_type(
                            parameter_ty,
                            TypeAnalysisContext::FunctionParameter,
                            location,
                        )?;
                        let adjusted = self.parameter_adjusted_type(parameter_ty);
                        if !self.bundle.is_complete(adjusted) && !self.bundle.is_void(adjusted) {
                            return Err(Error::at(location, "parameter has incomplete type"));
                        }
                    }
                }
                // A single void parameter means "no parameters".
                if function
                    .parameters
                    .iter()
                    .any(|p| p.ty.map(|t| self.bundle.is_void(t)).unwrap_or(false))
                    && function.parameters.len() != 1
                {
                    return Err(Error::at(location, "void must be the only parameter"));
                }
                Ok(())
            }
            Type::Qualified { inner, qualifiers } => {
                if qualifiers.restricted
                    && !matches!(self.bundle.get(inner), Type::Pointer(_))
                {
                    return Err(Error::at(location, "restrict requires a pointer type"));
                }
                self.analyze_type(inner, context, location)
            }
        }
    }

    /// Array/function parameter type adjustment.
    pub(crate) fn parameter_adjusted_type(&mut self, ty: TypeId) -> TypeId {
        let unqualified = self.bundle.unqualified(ty);
        match self.bundle.get(unqualified).clone() {
            Type::Array { element, qualifiers, .. } => {
                let pointer = self.bundle.pointer(element);
                self.bundle.qualified(pointer, qualifiers)
            }
            Type::Function(_) => self.bundle.pointer(unqualified),
            _ => ty,
        }
    }

    /// Is the value of `source` assignable to an object of type `target`?
    /// `source_is_null_constant` marks a null pointer constant source.
    pub fn is_type_assignable(
        &self,
        target: TypeId,
        source: TypeId,
        source_is_null_constant: bool,
    ) -> bool {
        let target = self.bundle.unqualified(target);
        let source = self.bundle.unqualified(source);
        if self.bundle.is_arithmetic(target) && self.bundle.is_arithmetic(source) {
            return true;
        }
        match self.bundle.get(target) {
            Type::Bool => {
                self.bundle.is_scalar(source)
                    || matches!(self.bundle.get(source), Type::NullPointer)
            }
            Type::Structure(_) | Type::Enumeration(_) => types::compatible(self.bundle, target, source),
            Type::Pointer(target_pointee) => {
                if source_is_null_constant
                    || matches!(self.bundle.get(source), Type::NullPointer)
                {
                    return true;
                }
                let source_pointee = match self.bundle.get(source) {
                    Type::Pointer(source_pointee) => *source_pointee,
                    _ => return false,
                };
                let target_quals = self.bundle.qualifiers_of(*target_pointee);
                let source_quals = self.bundle.qualifiers_of(source_pointee);
                if !target_quals.contains(source_quals) {
                    return false;
                }
                let target_pointee = self.bundle.unqualified(*target_pointee);
                let source_pointee = self.bundle.unqualified(source_pointee);
                self.bundle.is_void(target_pointee)
                    || self.bundle.is_void(source_pointee)
                    || types::compatible(self.bundle, target_pointee, source_pointee)
            }
            Type::NullPointer => matches!(self.bundle.get(source), Type::NullPointer),
            _ => false,
        }
    }

    /// Check that an analyzed expression node may initialize/assign an
    /// object of type `target`.
    pub fn is_node_assignable_to_type(&self, node: NodeId, target: TypeId) -> Result<()> {
        let props = self.arena.props(node);
        let source = props
            .ty
            .ok_or(Error::Internal("assignability check on untyped node"))?;
        let null_constant = props.constant == ConstantClass::Integer
            && props
                .constant_value
                .as_ref()
                .and_then(ConstantValue::as_integer)
                == Some(0);
        // Assignment operands undergo lvalue conversion: an array source
        // decays to a pointer to its element type.
        if let Ok(element) = self.bundle.array_element(source) {
            let target_unqualified = self.bundle.unqualified(target);
            if let Type::Pointer(target_pointee) = self.bundle.get(target_unqualified) {
                let target_quals = self.bundle.qualifiers_of(*target_pointee);
                let source_quals = self.bundle.qualifiers_of(element);
                let target_pointee = self.bundle.unqualified(*target_pointee);
                let element = self.bundle.unqualified(element);
                if target_quals.contains(source_quals)
                    && (self.bundle.is_void(target_pointee)
                        || types::compatible(self.bundle, target_pointee, element))
                {
                    return Ok(());
                }
            }
            return Err(Error::at(
                self.arena.node(node).location,
                "expression is not assignable to the target type",
            ));
        }
        if self.is_type_assignable(target, source, null_constant) {
            Ok(())
        } else {
            Err(Error::at(
                self.arena.node(node).location,
                "expression is not assignable to the target type",
            ))
        }
    }

    /// Does the lvalue designated by `node` have a constant address?
    pub fn is_lvalue_reference_constant(&self, node: NodeId) -> Result<bool> {
        match &self.arena.node(node).kind {
            NodeKind::Identifier(_) => {
                let Some(symbol) = self.arena.props(node).scoped_id else {
                    return Ok(false);
                };
                match &self.scopes.entry(symbol).identifier {
                    ScopedIdentifier::Object {
                        storage, linkage, ..
                    } => Ok(matches!(
                        (*storage, *linkage),
                        (crate::ast::StorageClass::Static, _)
                            | (crate::ast::StorageClass::Extern, _)
                            | (_, scope::Linkage::External)
                            | (_, scope::Linkage::Internal)
                    )),
                    ScopedIdentifier::Function { .. } => Ok(true),
                    _ => Ok(false),
                }
            }
            NodeKind::StringLiteral(_) => Ok(true),
            NodeKind::ArraySubscript { array, subscript } => {
                let array_const = self.is_lvalue_reference_constant(*array)?;
                let subscript_const =
                    self.arena.props(*subscript).constant == ConstantClass::Integer;
                Ok(array_const && subscript_const)
            }
            NodeKind::StructMember { base, .. } => self.is_lvalue_reference_constant(*base),
            NodeKind::IndirectStructMember { base, .. } => {
                Ok(self.arena.props(*base).constant == ConstantClass::Address)
            }
            NodeKind::Unary {
                op: crate::ast::UnaryOp::Indirection,
                operand,
            } => Ok(self.arena.props(*operand).constant == ConstantClass::Address),
            _ => Ok(false),
        }
    }

    /// Semantic type of an expression node after lvalue, array and
    /// function conversion.
    pub(crate) fn conv_all(&mut self, node: NodeId) -> Result<TypeId> {
        let ty = self.require_expression(node)?;
        Ok(lvalue_conversion(self.bundle, ty))
    }

    /// Require `node` to have been analyzed as an expression; returns its
    /// declared type.
    pub(crate) fn require_expression(&self, node: NodeId) -> Result<TypeId> {
        let props = self.arena.props(node);
        if props.category != Category::Expression {
            return Err(Error::at(
                self.arena.node(node).location,
                "expected an expression",
            ));
        }
        props.ty.ok_or(Error::Internal("expression without a type"))
    }

    /// Allocate an abstract temporary for an aggregate/complex rvalue.
    pub(crate) fn allocate_temporary(&mut self) -> TempId {
        let id = TempId::new(self.temporaries as usize);
        self.temporaries += 1;
        id
    }

    /// Number of temporaries requested so far.
    pub fn temporary_count(&self) -> u32 {
        self.temporaries
    }

    /// Tear the analyzer down, keeping the scope and flow arenas the
    /// translator needs to resolve back-references.
    pub fn finish(self) -> AnalysisArtifacts {
        AnalysisArtifacts {
            scopes: self.scopes,
            flow: self.flow,
            parameter_symbols: self.parameter_symbols,
        }
    }
}

