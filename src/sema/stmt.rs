//! Statement, declaration and initializer analysis.

use super::flow::FlowStructure;
use super::scope::{Linkage, ScopedIdentifier};
use super::{Analyzer, FunctionContext, TypeAnalysisContext};
use crate::ast::{
    Category, ConstantClass, Designator, InlineAssembly, Initializer, NodeId, NodeKind,
    StorageClass,
};
use crate::result::{Error, Result};
use crate::source::SourceLocation;
use crate::types::{self, ArrayBoundary, Type, TypeId};
use std::collections::BTreeMap;

impl Analyzer<'_> {
    pub(super) fn analyze_declaration(&mut self, id: NodeId, declarators: &[NodeId]) -> Result<()> {
        for &declarator in declarators {
            self.analyze_node(declarator)?;
        }
        self.arena.node_mut(id).props.category = Category::Declaration;
        Ok(())
    }

    pub(super) fn analyze_init_declarator(
        &mut self,
        id: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        let NodeKind::InitDeclarator {
            name,
            ty,
            storage,
            alignment,
            initializer,
        } = self.arena.node(id).kind.clone()
        else {
            return Err(Error::Internal("expected an init-declarator node"));
        };
        self.analyze_type(ty, TypeAnalysisContext::Default, location)?;
        let alignment = match alignment {
            Some(alignment_node) => Some(self.analyze_alignment(alignment_node)?),
            None => None,
        };
        let file_scope = self.scopes.is_file_scope();

        if storage == StorageClass::Typedef {
            let name = name.ok_or_else(|| Error::at(location, "typedef requires a name"))?;
            let symbol = self
                .scopes
                .define_ordinary(&name, ScopedIdentifier::TypeDefinition { ty })
                .map_err(|_| Error::at(location, format!("redefinition of '{name}'")))?;
            let props = &mut self.arena.node_mut(id).props;
            props.category = Category::InitDeclarator;
            props.ty = Some(ty);
            props.scoped_id = Some(symbol);
            return Ok(());
        }

        if self.bundle.is_function(ty) {
            let name = name.ok_or_else(|| Error::at(location, "function declaration requires a name"))?;
            if initializer.is_some() {
                return Err(Error::at(location, "function declared like an object"));
            }
            let symbol = self
                .scopes
                .define_ordinary(
                    &name,
                    ScopedIdentifier::Function {
                        ty,
                        storage,
                        defined: false,
                    },
                )
                .map_err(|_| Error::at(location, format!("conflicting declaration of '{name}'")))?;
            let props = &mut self.arena.node_mut(id).props;
            props.category = Category::InitDeclarator;
            props.ty = Some(ty);
            props.scoped_id = Some(symbol);
            return Ok(());
        }

        let mut object_ty = ty;
        if let Some(ref init) = initializer {
            object_ty = self.complete_array_from_initializer(object_ty, init)?;
        }
        if self.bundle.is_variably_modified(object_ty)
            && (file_scope || matches!(storage, StorageClass::Static | StorageClass::Extern))
        {
            return Err(Error::at(location, "variably modified type with static storage"));
        }
        let linkage = if file_scope {
            if storage == StorageClass::Static {
                Linkage::Internal
            } else {
                Linkage::External
            }
        } else if storage == StorageClass::Extern {
            Linkage::External
        } else {
            Linkage::None
        };
        if let Some(ref init) = initializer {
            let require_constant =
                file_scope || matches!(storage, StorageClass::Static);
            self.analyze_initializer_impl(object_ty, init, location, require_constant)?;
        } else if !file_scope
            && !matches!(storage, StorageClass::Extern)
            && !self.bundle.is_complete(object_ty)
        {
            return Err(Error::at(location, "object has incomplete type"));
        }
        let symbol = match name {
            Some(name) => Some(
                self.scopes
                    .define_ordinary(
                        &name,
                        ScopedIdentifier::Object {
                            ty: object_ty,
                            storage,
                            linkage,
                            alignment,
                            defined: initializer.is_some() || storage != StorageClass::Extern,
                        },
                    )
                    .map_err(|_| Error::at(location, format!("redefinition of '{name}'")))?,
            ),
            None => None,
        };
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::InitDeclarator;
        props.ty = Some(object_ty);
        props.scoped_id = symbol;
        Ok(())
    }

    /// Deduce the bound of an unbounded array from its initializer.
    pub(super) fn complete_array_from_initializer(
        &mut self,
        declared: TypeId,
        initializer: &Initializer,
    ) -> Result<TypeId> {
        let unqualified = self.bundle.unqualified(declared);
        let Type::Array {
            element,
            boundary: ArrayBoundary::Unbounded,
            qualifiers,
        } = self.bundle.get(unqualified).clone()
        else {
            return Ok(declared);
        };
        let length = match initializer {
            Initializer::Expression(node) => match &self.arena.node(*node).kind {
                NodeKind::StringLiteral(bytes) => bytes.len() as u64,
                _ => return Ok(declared),
            },
            Initializer::List(entries) => {
                let mut next_index: u64 = 0;
                let mut max_len: u64 = 0;
                for entry in entries {
                    if let Some(Designator::Index(index_node)) = entry.designators.first() {
                        let value = self.analyze_constant_expression(*index_node)?;
                        let index = value
                            .as_integer()
                            .ok_or_else(|| Error::Analysis("array designator is not an integer".into()))?;
                        if index < 0 {
                            return Err(Error::Analysis("negative array designator".into()));
                        }
                        next_index = index as u64;
                    }
                    next_index += 1;
                    max_len = max_len.max(next_index);
                }
                max_len
            }
        };
        let completed = self.bundle.intern(Type::Array {
            element,
            boundary: ArrayBoundary::Bounded(length),
            qualifiers,
        });
        Ok(self.bundle.qualified(completed, self.bundle.qualifiers_of(declared)))
    }

    /// Analyze an initializer against the initialized type.
    pub(super) fn analyze_initializer(
        &mut self,
        ty: TypeId,
        initializer: &Initializer,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_initializer_impl(ty, initializer, location, false)
    }

    fn analyze_initializer_impl(
        &mut self,
        ty: TypeId,
        initializer: &Initializer,
        location: SourceLocation,
        require_constant: bool,
    ) -> Result<()> {
        let unqualified = self.bundle.unqualified(ty);
        match initializer {
            Initializer::Expression(node) => {
                self.analyze_node(*node)?;
                self.require_expression(*node)?;
                let is_string = matches!(self.arena.node(*node).kind, NodeKind::StringLiteral(_));
                if self.bundle.is_array(unqualified) {
                    if !is_string {
                        return Err(Error::at(location, "array initializer shall be braced or a string"));
                    }
                } else if self.bundle.is_aggregate(unqualified)
                    && !types::compatible(
                        self.bundle,
                        unqualified,
                        self.bundle.unqualified(
                            self.arena
                                .props(*node)
                                .ty
                                .ok_or(Error::Internal("untyped initializer expression"))?,
                        ),
                    )
                {
                    if !self.config.permissive_aggregate_scalar_init {
                        return Err(Error::at(
                            location,
                            "scalar initializer for an aggregate object",
                        ));
                    }
                } else if !self.bundle.is_aggregate(unqualified) {
                    self.is_node_assignable_to_type(*node, ty)?;
                }
                if require_constant
                    && self.arena.props(*node).constant == ConstantClass::None
                {
                    return Err(Error::at(
                        location,
                        "static object initializer shall be constant",
                    ));
                }
                Ok(())
            }
            Initializer::List(entries) => match self.bundle.get(unqualified).clone() {
                Type::Structure(st) if st.complete => {
                    let mut field_cursor = 0usize;
                    for entry in entries {
                        let target = match entry.designators.first() {
                            Some(Designator::Member(member)) => {
                                let info = types::resolve_member(
                                    self.bundle,
                                    self.traits,
                                    unqualified,
                                    member,
                                )?
                                .ok_or_else(|| {
                                    Error::at(location, format!("no member named '{member}'"))
                                })?;
                                // Reset positional traversal after the
                                // designated member when possible.
                                if let Some(position) = st
                                    .fields
                                    .iter()
                                    .position(|f| f.name.as_deref() == Some(member))
                                {
                                    field_cursor = position + 1;
                                }
                                info.ty
                            }
                            Some(Designator::Index(_)) => {
                                return Err(Error::at(location, "array designator in a structure"));
                            }
                            None => {
                                named_field(&st.fields, &mut field_cursor)
                                    .ok_or_else(|| {
                                        Error::at(location, "excess elements in initializer")
                                    })?
                                    .ty
                            }
                        };
                        self.analyze_initializer_impl(target, &entry.value, location, require_constant)?;
                        if st.union_ {
                            break;
                        }
                    }
                    Ok(())
                }
                Type::Structure(_) => Err(Error::at(location, "initializer for an incomplete type")),
                Type::Array { element, boundary, .. } => {
                    let bound = boundary.constant_length();
                    let mut next_index: u64 = 0;
                    for entry in entries {
                        if let Some(Designator::Index(index_node)) = entry.designators.first() {
                            let value = self.analyze_constant_expression(*index_node)?;
                            let index = value.as_integer().ok_or_else(|| {
                                Error::at(location, "array designator is not an integer")
                            })?;
                            if index < 0 {
                                return Err(Error::at(location, "negative array designator"));
                            }
                            next_index = index as u64;
                        } else if let Some(Designator::Member(_)) = entry.designators.first() {
                            return Err(Error::at(location, "member designator in an array"));
                        }
                        if let Some(bound) = bound {
                            if next_index >= bound {
                                return Err(Error::at(location, "excess elements in array initializer"));
                            }
                        }
                        self.analyze_initializer_impl(element, &entry.value, location, require_constant)?;
                        next_index += 1;
                    }
                    Ok(())
                }
                _ => {
                    // Braced scalar: exactly one positional entry.
                    let [entry] = entries.as_slice() else {
                        return Err(Error::at(location, "excess elements in scalar initializer"));
                    };
                    if !entry.designators.is_empty() {
                        return Err(Error::at(location, "designator in a scalar initializer"));
                    }
                    self.analyze_initializer_impl(ty, &entry.value, location, require_constant)
                }
            },
        }
    }

    pub(super) fn analyze_expression_statement(
        &mut self,
        id: NodeId,
        expression: Option<NodeId>,
    ) -> Result<()> {
        if let Some(expression) = expression {
            self.analyze_node(expression)?;
            self.require_expression(expression)?;
        }
        self.arena.node_mut(id).props.category = Category::Statement;
        Ok(())
    }

    pub(super) fn analyze_compound_statement(&mut self, id: NodeId, items: &[NodeId]) -> Result<()> {
        let flow = self.flow.push(FlowStructure::Block);
        self.scopes.push_scope();
        let result: Result<()> = items.iter().try_for_each(|&item| self.analyze_node(item));
        self.scopes.pop_scope()?;
        self.flow.pop()?;
        result?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.flow_control = Some(flow);
        Ok(())
    }

    pub(super) fn analyze_labeled_statement(
        &mut self,
        id: NodeId,
        label: &str,
        statement: NodeId,
    ) -> Result<()> {
        let point = self.flow.new_point();
        let symbol = self.scopes.define_label(label, point)?;
        self.analyze_node(statement)?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.target_point = Some(point);
        props.scoped_id = Some(symbol);
        Ok(())
    }

    pub(super) fn analyze_case_statement(
        &mut self,
        id: NodeId,
        expression: Option<NodeId>,
        statement: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        let switch = self
            .flow
            .innermost_switch()
            .ok_or_else(|| Error::at(location, "case label outside of a switch"))?;
        let point = self.flow.new_point();
        match expression {
            Some(expression) => {
                let value = self.analyze_constant_expression(expression)?;
                if self.arena.props(expression).constant != ConstantClass::Integer {
                    return Err(Error::at(location, "case label shall be an integer constant"));
                }
                let value = value
                    .as_integer()
                    .ok_or_else(|| Error::at(location, "case label shall be an integer constant"))?;
                self.flow
                    .register_case(switch, value, point)
                    .map_err(|_| Error::at(location, format!("duplicate case value {value}")))?;
            }
            None => {
                self.flow
                    .register_default(switch, point)
                    .map_err(|_| Error::at(location, "multiple default labels in one switch"))?;
            }
        }
        self.analyze_node(statement)?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.target_point = Some(point);
        Ok(())
    }

    pub(super) fn analyze_if(
        &mut self,
        id: NodeId,
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(condition)?;
        let condition_ty = self.conv_all(condition)?;
        if !self.bundle.is_scalar(condition_ty) {
            return Err(Error::at(location, "controlling expression shall be scalar"));
        }
        let flow = self.flow.push(FlowStructure::If);
        self.analyze_node(then_branch)?;
        if let Some(else_branch) = else_branch {
            self.analyze_node(else_branch)?;
        }
        self.flow.pop()?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.flow_control = Some(flow);
        Ok(())
    }

    pub(super) fn analyze_switch(
        &mut self,
        id: NodeId,
        expression: NodeId,
        statement: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(expression)?;
        let controlling = self.conv_all(expression)?;
        if !self.bundle.is_integral(controlling) {
            return Err(Error::at(location, "switch controlling expression shall be integral"));
        }
        let end = self.flow.new_point();
        let flow = self.flow.push(FlowStructure::Switch {
            cases: BTreeMap::new(),
            default_case: None,
            end,
        });
        let result = self.analyze_node(statement);
        self.flow.pop()?;
        result?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.flow_control = Some(flow);
        Ok(())
    }

    pub(super) fn analyze_while(
        &mut self,
        id: NodeId,
        condition: NodeId,
        body: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_node(condition)?;
        let condition_ty = self.conv_all(condition)?;
        if !self.bundle.is_scalar(condition_ty) {
            return Err(Error::at(location, "controlling expression shall be scalar"));
        }
        let continue_point = self.flow.new_point();
        let end = self.flow.new_point();
        let flow = self.flow.push(FlowStructure::While {
            continue_point,
            end,
        });
        let result = self.analyze_node(body);
        self.flow.pop()?;
        result?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.flow_control = Some(flow);
        Ok(())
    }

    pub(super) fn analyze_do_while(
        &mut self,
        id: NodeId,
        body: NodeId,
        condition: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        let continue_point = self.flow.new_point();
        let end = self.flow.new_point();
        let flow = self.flow.push(FlowStructure::DoWhile {
            continue_point,
            end,
        });
        let result = self.analyze_node(body);
        self.flow.pop()?;
        result?;
        self.analyze_node(condition)?;
        let condition_ty = self.conv_all(condition)?;
        if !self.bundle.is_scalar(condition_ty) {
            return Err(Error::at(location, "controlling expression shall be scalar"));
        }
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.flow_control = Some(flow);
        Ok(())
    }

    pub(super) fn analyze_for(
        &mut self,
        id: NodeId,
        init: Option<NodeId>,
        condition: Option<NodeId>,
        step: Option<NodeId>,
        body: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.scopes.push_scope();
        let continue_point = self.flow.new_point();
        let end = self.flow.new_point();
        let flow = self.flow.push(FlowStructure::For {
            continue_point,
            end,
        });
        let result = (|| -> Result<()> {
            if let Some(init) = init {
                self.analyze_node(init)?;
            }
            if let Some(condition) = condition {
                self.analyze_node(condition)?;
                let condition_ty = self.conv_all(condition)?;
                if !self.bundle.is_scalar(condition_ty) {
                    return Err(Error::at(location, "controlling expression shall be scalar"));
                }
            }
            if let Some(step) = step {
                self.analyze_node(step)?;
            }
            self.analyze_node(body)
        })();
        self.flow.pop()?;
        self.scopes.pop_scope()?;
        result?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.flow_control = Some(flow);
        Ok(())
    }

    pub(super) fn analyze_goto(
        &mut self,
        id: NodeId,
        label: &str,
        _location: SourceLocation,
    ) -> Result<()> {
        let symbol = self.scopes.reference_label(label)?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.scoped_id = Some(symbol);
        Ok(())
    }

    pub(super) fn analyze_continue(&mut self, id: NodeId, location: SourceLocation) -> Result<()> {
        let target = self
            .flow
            .innermost_loop()
            .ok_or_else(|| Error::at(location, "continue outside of a loop"))?;
        let point = self.flow.continue_point(target)?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.target_point = Some(point);
        Ok(())
    }

    pub(super) fn analyze_break(&mut self, id: NodeId, location: SourceLocation) -> Result<()> {
        let target = self
            .flow
            .innermost_breakable()
            .ok_or_else(|| Error::at(location, "break outside of a loop or switch"))?;
        let point = self.flow.end_point(target)?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Statement;
        props.target_point = Some(point);
        Ok(())
    }

    pub(super) fn analyze_return(
        &mut self,
        id: NodeId,
        expression: Option<NodeId>,
        location: SourceLocation,
    ) -> Result<()> {
        let function = self
            .function
            .clone()
            .ok_or_else(|| Error::at(location, "return outside of a function"))?;
        match expression {
            Some(expression) => {
                self.analyze_node(expression)?;
                self.require_expression(expression)?;
                if self.bundle.is_void(function.return_type) {
                    let value_ty = self
                        .arena
                        .props(expression)
                        .ty
                        .ok_or(Error::Internal("untyped return value"))?;
                    if !self.bundle.is_void(value_ty) {
                        return Err(Error::at(location, "void function returns a value"));
                    }
                } else {
                    self.is_node_assignable_to_type(expression, function.return_type)?;
                }
            }
            None => {
                if !self.bundle.is_void(function.return_type) {
                    return Err(Error::at(location, "non-void function returns no value"));
                }
            }
        }
        self.arena.node_mut(id).props.category = Category::Statement;
        Ok(())
    }

    pub(super) fn analyze_inline_assembly(
        &mut self,
        id: NodeId,
        asm: &InlineAssembly,
        location: SourceLocation,
    ) -> Result<()> {
        if self.function.is_none() {
            // File-scope assembly is a bare template.
            if !asm.outputs.is_empty()
                || !asm.inputs.is_empty()
                || !asm.clobbers.is_empty()
                || !asm.jump_labels.is_empty()
            {
                return Err(Error::at(
                    location,
                    "file-scope assembly cannot have operands, clobbers or labels",
                ));
            }
            self.arena.node_mut(id).props.category = Category::InlineAssembly;
            return Ok(());
        }
        if self.flow.current().is_none() {
            return Err(Error::at(location, "assembly directive shall be inside a block"));
        }
        for output in &asm.outputs {
            self.analyze_node(output.parameter)?;
            self.require_expression(output.parameter)?;
            if !self.arena.props(output.parameter).lvalue {
                return Err(Error::at(location, "assembly output shall be an lvalue"));
            }
        }
        for input in &asm.inputs {
            self.analyze_node(input.parameter)?;
            self.require_expression(input.parameter)?;
        }
        let origin = self.flow.new_point();
        let mut branches = Vec::with_capacity(asm.jump_labels.len());
        for label in &asm.jump_labels {
            self.scopes.reference_label(label)?;
            let point = self.flow.new_point();
            branches.push((label.clone(), point));
        }
        let branching = self.flow.push(FlowStructure::BranchingPoint { branches });
        self.flow.pop()?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::InlineAssembly;
        props.flow_control = Some(branching);
        props.target_point = Some(origin);
        Ok(())
    }

    pub(super) fn analyze_static_assertion(
        &mut self,
        id: NodeId,
        condition: NodeId,
        message: &str,
        location: SourceLocation,
    ) -> Result<()> {
        let value = self.analyze_constant_expression(condition)?;
        if self.arena.props(condition).constant != ConstantClass::Integer {
            return Err(Error::at(
                location,
                "static assertion requires an integer constant expression",
            ));
        }
        let zero = match &value {
            crate::ast::ConstantValue::Integer(v) => *v == 0,
            crate::ast::ConstantValue::BigInteger(big) => big.is_zero()?,
            _ => false,
        };
        if zero {
            return Err(Error::StaticAssert {
                location,
                message: message.to_string(),
            });
        }
        self.arena.node_mut(id).props.category = Category::Declaration;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn analyze_function_definition(
        &mut self,
        id: NodeId,
        name: &str,
        ty: TypeId,
        parameter_names: &[String],
        storage: StorageClass,
        body: NodeId,
        location: SourceLocation,
    ) -> Result<()> {
        self.analyze_type(ty, TypeAnalysisContext::Default, location)?;
        let function = match self.bundle.get(self.bundle.unqualified(ty)) {
            Type::Function(function) => function.clone(),
            _ => return Err(Error::at(location, "function definition requires a function type")),
        };
        let symbol = self
            .scopes
            .define_ordinary(
                name,
                ScopedIdentifier::Function {
                    ty,
                    storage,
                    defined: false,
                },
            )
            .map_err(|_| Error::at(location, format!("conflicting declaration of '{name}'")))?;
        if let ScopedIdentifier::Function { defined, .. } =
            &mut self.scopes.entry_mut(symbol).identifier
        {
            if *defined {
                return Err(Error::at(location, format!("redefinition of '{name}'")));
            }
            *defined = true;
        }
        self.scopes.begin_function()?;
        self.scopes.push_scope();
        let takes_void = function.parameters.len() == 1
            && function
                .parameters
                .first()
                .and_then(|p| p.ty)
                .map(|t| self.bundle.is_void(t))
                .unwrap_or(false);
        let mut parameter_entries = Vec::new();
        if !takes_void {
            for (index, parameter) in function.parameters.iter().enumerate() {
                let parameter_name = parameter
                    .name
                    .clone()
                    .or_else(|| parameter_names.get(index).cloned())
                    .ok_or_else(|| Error::at(location, "unnamed function parameter"))?;
                let parameter_ty = parameter
                    .ty
                    .ok_or_else(|| Error::at(location, "untyped parameter in a definition"))?;
                let adjusted = self.parameter_adjusted_type(parameter_ty);
                self.scopes
                    .define_ordinary(
                        &parameter_name,
                        ScopedIdentifier::Object {
                            ty: adjusted,
                            storage: StorageClass::Unknown,
                            linkage: Linkage::None,
                            alignment: None,
                            defined: true,
                        },
                    )
                    .map_err(|_| {
                        Error::at(location, format!("duplicate parameter '{parameter_name}'"))
                    })
                    .map(|symbol| parameter_entries.push(symbol))?;
            }
        }
        self.parameter_symbols.insert(id, parameter_entries);
        let previous = self.function.replace(FunctionContext {
            name: name.to_string(),
            return_type: function.return_type,
            variadic: function.ellipsis,
        });
        let result = self.analyze_node(body);
        self.function = previous;
        self.scopes.pop_scope()?;
        let labels = self.scopes.end_function();
        result?;
        labels?;
        let props = &mut self.arena.node_mut(id).props;
        props.category = Category::Declaration;
        props.ty = Some(ty);
        props.scoped_id = Some(symbol);
        Ok(())
    }
}

fn named_field<'a>(
    fields: &'a [crate::types::StructField],
    cursor: &mut usize,
) -> Option<&'a crate::types::StructField> {
    while *cursor < fields.len() {
        let field = &fields[*cursor];
        *cursor += 1;
        // Unnamed bitfields and padding are skipped by positional
        // initialization; anonymous aggregates are consumed as a unit.
        if field.name.is_some() || field.bitwidth.is_none() {
            return Some(field);
        }
    }
    None
}
