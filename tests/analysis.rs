//! Semantic-analysis tests over programmatically built ASTs.

use charcoal::ast::{
    Arena, BinaryOp, Category, Constant, ConstantClass, IntegerConstantType, NodeId, NodeKind,
    StorageClass,
};
use charcoal::sema::Analyzer;
use charcoal::target::TypeTraits;
use charcoal::types::{FunctionMode, FunctionType, Parameter, Type, TypeBundle, TypeId};

struct Fixture {
    arena: Arena,
    bundle: TypeBundle,
    traits: TypeTraits,
}

impl Fixture {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            bundle: TypeBundle::new(),
            traits: TypeTraits::lp64(),
        }
    }

    fn int_const(&mut self, value: i64) -> NodeId {
        self.arena.push_anon(NodeKind::Constant(Constant::Integer {
            value: value as u64,
            base: IntegerConstantType::Int,
        }))
    }

    fn analyze(&mut self, node: NodeId) -> charcoal::Result<()> {
        let mut analyzer = Analyzer::new(&mut self.arena, &mut self.bundle, &self.traits);
        analyzer.analyze_node(node)
    }

    fn function_of(&mut self, body_items: Vec<NodeId>) -> NodeId {
        let int = self.bundle.signed_int();
        let ty = self.bundle.intern(Type::Function(FunctionType {
            return_type: int,
            parameters: vec![Parameter {
                name: Some("x".into()),
                ty: Some(int),
            }],
            ellipsis: false,
            mode: FunctionMode::Prototype,
        }));
        let body = self
            .arena
            .push_anon(NodeKind::CompoundStatement { items: body_items });
        self.arena.push_anon(NodeKind::FunctionDefinition {
            name: "f".into(),
            ty,
            parameter_names: vec!["x".into()],
            storage: StorageClass::Unknown,
            body,
        })
    }
}

fn int_type(fixture: &Fixture) -> TypeId {
    fixture.bundle.signed_int()
}

#[test]
fn arithmetic_expression_types_agree_with_operands() {
    let mut fixture = Fixture::new();
    let lhs = fixture.int_const(1);
    let rhs = fixture.int_const(2);
    let sum = fixture.arena.push_anon(NodeKind::Binary {
        op: BinaryOp::Add,
        lhs,
        rhs,
    });
    fixture.analyze(sum).unwrap();
    let props = fixture.arena.props(sum);
    assert_eq!(props.category, Category::Expression);
    assert_eq!(props.ty, Some(int_type(&fixture)));
    assert_eq!(props.constant, ConstantClass::Integer);
    assert_eq!(
        props.constant_value.as_ref().and_then(|v| v.as_integer()),
        Some(3)
    );
}

#[test]
fn duplicate_case_values_are_rejected() {
    let mut fixture = Fixture::new();
    let x1 = fixture.arena.push_anon(NodeKind::Identifier("x".into()));
    let one_a = fixture.int_const(1);
    let one_b = fixture.int_const(1);
    let call_a = fixture
        .arena
        .push_anon(NodeKind::ExpressionStatement { expression: None });
    let call_b = fixture
        .arena
        .push_anon(NodeKind::ExpressionStatement { expression: None });
    let case_a = fixture.arena.push_anon(NodeKind::CaseStatement {
        expression: Some(one_a),
        statement: call_a,
    });
    let case_b = fixture.arena.push_anon(NodeKind::CaseStatement {
        expression: Some(one_b),
        statement: call_b,
    });
    let body = fixture.arena.push_anon(NodeKind::CompoundStatement {
        items: vec![case_a, case_b],
    });
    let switch = fixture.arena.push_anon(NodeKind::Switch {
        expression: x1,
        statement: body,
    });
    let function = fixture.function_of(vec![switch]);
    let error = fixture.analyze(function).unwrap_err();
    match error {
        charcoal::Error::Source { message, .. } => {
            assert!(message.contains("duplicate case"), "{message}");
        }
        other => panic!("expected an analysis error, got {other:?}"),
    }
}

#[test]
fn break_outside_of_loop_is_rejected() {
    let mut fixture = Fixture::new();
    let break_statement = fixture.arena.push_anon(NodeKind::Break);
    let function = fixture.function_of(vec![break_statement]);
    let error = fixture.analyze(function).unwrap_err();
    assert!(matches!(error, charcoal::Error::Source { .. }), "{error:?}");
}

#[test]
fn goto_to_an_undefined_label_is_rejected() {
    let mut fixture = Fixture::new();
    let goto = fixture.arena.push_anon(NodeKind::Goto {
        label: "missing".into(),
    });
    let function = fixture.function_of(vec![goto]);
    let error = fixture.analyze(function).unwrap_err();
    match error {
        charcoal::Error::Analysis(message) => {
            assert!(message.contains("undefined label"), "{message}");
        }
        other => panic!("expected an analysis error, got {other:?}"),
    }
}

#[test]
fn repeated_casts_fold_to_the_same_constant() {
    let mut fixture = Fixture::new();
    let char_ty = fixture.bundle.signed_char();
    let value = fixture.int_const(300);
    let first_name = fixture.arena.push_anon(NodeKind::TypeName(char_ty));
    let once = fixture.arena.push_anon(NodeKind::Cast {
        type_name: first_name,
        operand: value,
    });
    let second_name = fixture.arena.push_anon(NodeKind::TypeName(char_ty));
    let twice = fixture.arena.push_anon(NodeKind::Cast {
        type_name: second_name,
        operand: once,
    });
    fixture.analyze(twice).unwrap();
    let single = fixture.arena.props(once).constant_value.clone();
    let double = fixture.arena.props(twice).constant_value.clone();
    assert_eq!(single, double);
    assert_eq!(single.and_then(|v| v.as_integer()), Some(44));
}

#[test]
fn array_subscript_of_static_array_is_an_address_constant() {
    let mut fixture = Fixture::new();
    let int = int_type(&fixture);
    let array = fixture
        .bundle
        .array(int, charcoal::types::ArrayBoundary::Bounded(4));
    let declarator = fixture.arena.push_anon(NodeKind::InitDeclarator {
        name: Some("table".into()),
        ty: array,
        storage: StorageClass::Static,
        alignment: None,
        initializer: None,
    });
    let declaration = fixture.arena.push_anon(NodeKind::Declaration {
        declarators: vec![declarator],
    });
    let base = fixture.arena.push_anon(NodeKind::Identifier("table".into()));
    let index = fixture.int_const(2);
    let subscript = fixture.arena.push_anon(NodeKind::ArraySubscript {
        array: base,
        subscript: index,
    });
    let mut analyzer = Analyzer::new(&mut fixture.arena, &mut fixture.bundle, &fixture.traits);
    analyzer.analyze_node(declaration).unwrap();
    analyzer.analyze_node(subscript).unwrap();
    drop(analyzer);
    let props = fixture.arena.props(subscript);
    assert_eq!(props.constant, ConstantClass::Address);
    assert!(props.lvalue);
}

#[test]
fn switch_case_map_is_ordered_and_unique() {
    let mut fixture = Fixture::new();
    let x = fixture.arena.push_anon(NodeKind::Identifier("x".into()));
    let values = [5i64, 1, 3];
    let mut cases = Vec::new();
    for value in values {
        let constant = fixture.int_const(value);
        let body = fixture
            .arena
            .push_anon(NodeKind::ExpressionStatement { expression: None });
        cases.push(fixture.arena.push_anon(NodeKind::CaseStatement {
            expression: Some(constant),
            statement: body,
        }));
    }
    let default_body = fixture
        .arena
        .push_anon(NodeKind::ExpressionStatement { expression: None });
    let default_case = fixture.arena.push_anon(NodeKind::CaseStatement {
        expression: None,
        statement: default_body,
    });
    cases.push(default_case);
    let body = fixture
        .arena
        .push_anon(NodeKind::CompoundStatement { items: cases });
    let switch = fixture.arena.push_anon(NodeKind::Switch {
        expression: x,
        statement: body,
    });
    let function = fixture.function_of(vec![switch]);

    let mut analyzer = Analyzer::new(&mut fixture.arena, &mut fixture.bundle, &fixture.traits);
    analyzer.analyze_node(function).unwrap();
    let artifacts = analyzer.finish();
    let flow_id = fixture.arena.props(switch).flow_control.unwrap();
    match &artifacts.flow.structure(flow_id).structure {
        charcoal::sema::flow::FlowStructure::Switch {
            cases,
            default_case,
            ..
        } => {
            let keys: Vec<i64> = cases.keys().copied().collect();
            assert_eq!(keys, vec![1, 3, 5]);
            let default_point = default_case.expect("default case registered");
            assert!(cases.values().all(|&point| point != default_point));
        }
        other => panic!("expected a switch structure, got {other:?}"),
    }
}
