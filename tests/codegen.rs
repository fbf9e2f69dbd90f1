//! End-to-end pipeline tests.
//!
//! Each scenario builds the AST a parser would produce, runs the full
//! pipeline down to assembly text, and checks the shape of the output.

use charcoal::ast::{
    Arena, BinaryOp, Constant, Initializer, InitializerListEntry, IntegerConstantType, NodeId,
    NodeKind, StorageClass, UnaryOp,
};
use charcoal::isa::x64::AsmSyntax;
use charcoal::target::TypeTraits;
use charcoal::types::{
    FunctionMode, FunctionType, Parameter, StructField, StructType, Type, TypeBundle, TypeId,
};
use charcoal::{Context, SourceLocation};

struct UnitBuilder {
    arena: Arena,
    bundle: TypeBundle,
    traits: TypeTraits,
    items: Vec<NodeId>,
}

impl UnitBuilder {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            bundle: TypeBundle::new(),
            traits: TypeTraits::lp64(),
            items: Vec::new(),
        }
    }

    fn int_const(&mut self, value: i64) -> NodeId {
        self.arena.push_anon(NodeKind::Constant(Constant::Integer {
            value: value as u64,
            base: IntegerConstantType::Int,
        }))
    }

    fn long_double_const(&mut self, value: f64) -> NodeId {
        self.arena.push_anon(NodeKind::Constant(Constant::Float {
            value,
            kind: charcoal::types::FloatKind::LongDouble,
        }))
    }

    fn ident(&mut self, name: &str) -> NodeId {
        self.arena.push_anon(NodeKind::Identifier(name.into()))
    }

    fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arena.push_anon(NodeKind::Binary { op, lhs, rhs })
    }

    fn ret(&mut self, expression: Option<NodeId>) -> NodeId {
        self.arena.push_anon(NodeKind::Return { expression })
    }

    fn compound(&mut self, items: Vec<NodeId>) -> NodeId {
        self.arena.push_anon(NodeKind::CompoundStatement { items })
    }

    fn function_type(&mut self, return_type: TypeId, parameters: &[(&str, TypeId)]) -> TypeId {
        self.bundle.intern(Type::Function(FunctionType {
            return_type,
            parameters: parameters
                .iter()
                .map(|(name, ty)| Parameter {
                    name: Some((*name).into()),
                    ty: Some(*ty),
                })
                .collect(),
            ellipsis: false,
            mode: FunctionMode::Prototype,
        }))
    }

    fn void_function_type(&mut self, return_type: TypeId) -> TypeId {
        let void = self.bundle.void();
        self.function_type(return_type, &[("", void)])
    }

    fn define_function(
        &mut self,
        name: &str,
        ty: TypeId,
        parameter_names: &[&str],
        body: NodeId,
    ) -> NodeId {
        let definition = self.arena.push_anon(NodeKind::FunctionDefinition {
            name: name.into(),
            ty,
            parameter_names: parameter_names.iter().map(|n| (*n).into()).collect(),
            storage: StorageClass::Unknown,
            body,
        });
        self.items.push(definition);
        definition
    }

    fn compile(mut self, syntax: AsmSyntax) -> charcoal::Result<String> {
        let items = std::mem::take(&mut self.items);
        let root = self.arena.push_anon(NodeKind::TranslationUnit { items });
        let mut context = Context::new(&mut self.arena, &mut self.bundle, &self.traits);
        context.compile(root, syntax)
    }
}

#[test]
fn scalar_addition_uses_abi_registers() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let ty = unit.function_type(int, &[("a", int), ("b", int)]);
    let a = unit.ident("a");
    let b = unit.ident("b");
    let sum = unit.binary(BinaryOp::Add, a, b);
    let ret = unit.ret(Some(sum));
    let body = unit.compound(vec![ret]);
    unit.define_function("add", ty, &["a", "b"], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    assert!(asm.contains(".global add"), "{asm}");
    assert!(asm.contains("add:"), "{asm}");
    // Prologue, the ABI argument registers, one 32-bit add, and a return.
    assert!(asm.contains("push rbp"), "{asm}");
    assert!(asm.contains("rdi"), "{asm}");
    assert!(asm.contains("rsi"), "{asm}");
    assert!(
        asm.lines()
            .any(|l| l.trim().starts_with("add ") && !l.contains("rbp") && !l.contains("rsp")),
        "{asm}"
    );
    assert!(asm.contains("\n    ret"), "{asm}");
}

#[test]
fn long_double_square_stays_on_x87_stack() {
    let mut unit = UnitBuilder::new();
    let long_double = unit.bundle.long_double();
    let ty = unit.function_type(long_double, &[("x", long_double)]);
    let x1 = unit.ident("x");
    let x2 = unit.ident("x");
    let product = unit.binary(BinaryOp::Multiply, x1, x2);
    let ret = unit.ret(Some(product));
    let body = unit.compound(vec![ret]);
    unit.define_function("ld", ty, &["x"], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    // No SSE arithmetic; one tbyte load and a self-multiply on st(0).
    assert!(!asm.contains("xmm"), "{asm}");
    assert!(asm.contains("fld tbyte [rbp"), "{asm}");
    assert!(asm.contains("fmul st(0), st(0)"), "{asm}");
    assert!(asm.contains("\n    ret"), "{asm}");
}

#[test]
fn small_struct_returns_in_rax_rdx() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let long = unit.bundle.signed_long();
    let s = unit.bundle.push_tagged(Type::Structure(StructType {
        tag: Some("S".into()),
        union_: false,
        complete: true,
        fields: vec![
            StructField {
                name: Some("a".into()),
                ty: int,
                alignment: None,
                bitwidth: None,
            },
            StructField {
                name: Some("b".into()),
                ty: long,
                alignment: None,
                bitwidth: None,
            },
        ],
    }));
    let ty = unit.void_function_type(s);
    let one = unit.int_const(1);
    let two = unit.int_const(2);
    let initializer = Initializer::List(vec![
        InitializerListEntry {
            designators: Vec::new(),
            value: Initializer::Expression(one),
        },
        InitializerListEntry {
            designators: Vec::new(),
            value: Initializer::Expression(two),
        },
    ]);
    let declarator = unit.arena.push_anon(NodeKind::InitDeclarator {
        name: Some("s".into()),
        ty: s,
        storage: StorageClass::Unknown,
        alignment: None,
        initializer: Some(initializer),
    });
    let declaration = unit.arena.push_anon(NodeKind::Declaration {
        declarators: vec![declarator],
    });
    let value = unit.ident("s");
    let ret = unit.ret(Some(value));
    let body = unit.compound(vec![declaration, ret]);
    unit.define_function("mk", ty, &[], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    // MULTIPLE_REGISTERS(INTEGER, INTEGER): both eightbytes load from the
    // local into rax and rdx.
    assert!(asm.contains("mov rax, qword [rbp"), "{asm}");
    assert!(asm.contains("mov rdx, qword [rbp"), "{asm}");
}

#[test]
fn static_assert_pass_compiles_to_zero_return() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let ty = unit.void_function_type(int);
    let int_name = unit.arena.push_anon(NodeKind::TypeName(int));
    let sizeof_int = unit.arena.push_anon(NodeKind::Builtin {
        builtin: charcoal::ast::BuiltinOp::SizeOf,
        arguments: vec![int_name],
    });
    let four = unit.int_const(4);
    let condition = unit.binary(BinaryOp::Equal, sizeof_int, four);
    let assertion = unit.arena.push_anon(NodeKind::StaticAssertion {
        condition,
        message: "bad".into(),
    });
    let zero = unit.int_const(0);
    let ret = unit.ret(Some(zero));
    let body = unit.compound(vec![assertion, ret]);
    unit.define_function("f", ty, &[], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    // The zero return folds into an xor of the return register.
    assert!(asm.contains("xor"), "{asm}");
    assert!(asm.contains("\n    ret"), "{asm}");
}

#[test]
fn static_assert_failure_carries_the_message() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let ty = unit.void_function_type(int);
    let int_name = unit.arena.push_anon(NodeKind::TypeName(int));
    let sizeof_int = unit.arena.push_anon(NodeKind::Builtin {
        builtin: charcoal::ast::BuiltinOp::SizeOf,
        arguments: vec![int_name],
    });
    let eight = unit.int_const(8);
    let condition = unit.binary(BinaryOp::Equal, sizeof_int, eight);
    let assertion = unit.arena.push_anon(NodeKind::StaticAssertion {
        condition,
        message: "bad".into(),
    });
    let zero = unit.int_const(0);
    let ret = unit.ret(Some(zero));
    let body = unit.compound(vec![assertion, ret]);
    unit.define_function("f", ty, &[], body);
    let error = unit.compile(AsmSyntax::Intel).unwrap_err();
    match error {
        charcoal::Error::StaticAssert { message, .. } => assert_eq!(message, "bad"),
        other => panic!("expected a static assertion failure, got {other:?}"),
    }
}

#[test]
fn wide_bit_precise_addition_calls_the_runtime() {
    let mut unit = UnitBuilder::new();
    let bitint = unit.bundle.bit_precise(200, true);
    let pointer = unit.bundle.pointer(bitint);
    let void = unit.bundle.void();
    let ty = unit.function_type(void, &[("p", pointer)]);
    let p1 = unit.ident("p");
    let lhs = unit.arena.push_anon(NodeKind::Unary {
        op: UnaryOp::Indirection,
        operand: p1,
    });
    let p2 = unit.ident("p");
    let rhs_a = unit.arena.push_anon(NodeKind::Unary {
        op: UnaryOp::Indirection,
        operand: p2,
    });
    let p3 = unit.ident("p");
    let rhs_b = unit.arena.push_anon(NodeKind::Unary {
        op: UnaryOp::Indirection,
        operand: p3,
    });
    let sum = unit.binary(BinaryOp::Add, rhs_a, rhs_b);
    let assignment = unit.arena.push_anon(NodeKind::Assignment {
        op: charcoal::ast::AssignOp::Simple,
        target: lhs,
        value: sum,
    });
    let statement = unit.arena.push_anon(NodeKind::ExpressionStatement {
        expression: Some(assignment),
    });
    let body = unit.compound(vec![statement]);
    unit.define_function("acc", ty, &["p"], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    assert!(asm.contains("__kefir_bigint_add"), "{asm}");
    // The width argument (200 bits) travels in the third argument register.
    assert!(asm.contains("200"), "{asm}");
    assert!(asm.contains(".extern __kefir_bigint_add"), "{asm}");
}

#[test]
fn att_syntax_is_selectable() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let ty = unit.function_type(int, &[("a", int), ("b", int)]);
    let a = unit.ident("a");
    let b = unit.ident("b");
    let sum = unit.binary(BinaryOp::Add, a, b);
    let ret = unit.ret(Some(sum));
    let body = unit.compound(vec![ret]);
    unit.define_function("add", ty, &["a", "b"], body);
    let asm = unit.compile(AsmSyntax::Att).unwrap();

    assert!(asm.starts_with(".att_syntax"), "{asm}");
    assert!(asm.contains("%rbp"), "{asm}");
    assert!(asm.contains("pushq %rbp"), "{asm}");
}

#[test]
fn calls_go_through_the_plt() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let callee_ty = unit.function_type(int, &[("x", int)]);
    let caller_ty = unit.void_function_type(int);
    // Declare `int g(int);` then call it.
    let declarator = unit.arena.push_anon(NodeKind::InitDeclarator {
        name: Some("g".into()),
        ty: callee_ty,
        storage: StorageClass::Extern,
        alignment: None,
        initializer: None,
    });
    let declaration = unit.arena.push_anon(NodeKind::Declaration {
        declarators: vec![declarator],
    });
    unit.items.push(declaration);
    let callee = unit.ident("g");
    let argument = unit.int_const(7);
    let call = unit.arena.push_anon(NodeKind::Call {
        callee,
        arguments: vec![argument],
    });
    let ret = unit.ret(Some(call));
    let body = unit.compound(vec![ret]);
    unit.define_function("caller", caller_ty, &[], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    assert!(asm.contains("call g@PLT"), "{asm}");
    assert!(asm.contains(".extern g"), "{asm}");
}

#[test]
fn statement_locations_emit_loc_directives() {
    let mut unit = UnitBuilder::new();
    let int = unit.bundle.signed_int();
    let ty = unit.function_type(int, &[("a", int)]);
    let a = unit.ident("a");
    let ret = unit
        .arena
        .push(NodeKind::Return { expression: Some(a) }, SourceLocation::new(42, 5));
    let body = unit.compound(vec![ret]);
    unit.define_function("loc", ty, &["a"], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    assert!(asm.contains(".loc 0 42 5"), "{asm}");
}

#[test]
fn long_double_constant_initializer_encodes_f80() {
    let mut unit = UnitBuilder::new();
    let long_double = unit.bundle.long_double();
    let ty = unit.void_function_type(long_double);
    let one = unit.long_double_const(1.0);
    let ret = unit.ret(Some(one));
    let body = unit.compound(vec![ret]);
    unit.define_function("one", ty, &[], body);
    let asm = unit.compile(AsmSyntax::Intel).unwrap();

    // The value returns on the x87 top of stack.
    assert!(asm.contains("fld tbyte"), "{asm}");
    assert!(!asm.contains("xmm"), "{asm}");
}
