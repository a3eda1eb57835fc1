use super::domains::*;
use super::values::*;

#[test]
fn interning_tests() {
    let values = ValueFactory::new();
    let x = values.variable("x", ValueType::Int);
    assert_eq!(values.variable("x", ValueType::Int), x);
    assert_ne!(values.variable("x", ValueType::Ref), x);
    assert_eq!(values.int(3), values.int(3));
    assert_eq!(values.null(), values.constant(Constant::Null));

    let fail = values.fail();
    assert_eq!(*values.get(fail), Value::Fail);
    assert!(values.is_variable(x));
    assert!(!values.is_variable(values.int(3)));

    // Facts pinning a constant produce the constant.
    let three = values.typed(FactMap::unknown().with(RANGE, LongRange::from(3)));
    assert_eq!(three, values.int(3));
    assert_eq!(values.typed(FactMap::unknown()), values.unknown());
}

#[test]
fn folding_tests() {
    let values = ValueFactory::new();
    let add = BinOp::Arith(ArithOp::Add);
    let lt = BinOp::Compare(Relation::Lt);
    let eq = BinOp::Compare(Relation::Eq);

    assert_eq!(values.binop(add, values.int(2), values.int(3)), values.int(5));
    assert_eq!(values.binop(lt, values.int(2), values.int(3)), values.bool(true));
    assert_eq!(values.binop(eq, values.null(), values.null()), values.bool(true));
    assert_eq!(
        values.binop(eq, values.bool(true), values.bool(false)),
        values.bool(false)
    );
    // Overflow is not folded.
    let big = values.binop(add, values.int(i64::MAX), values.int(1));
    assert!(matches!(*values.get(big), Value::BinOp { .. }));

    let x = values.variable("x", ValueType::Int);
    let x_lt_3 = values.binop(lt, x, values.int(3));
    assert_eq!(
        values.not(x_lt_3),
        values.binop(BinOp::Compare(Relation::Ge), x, values.int(3))
    );
    assert_eq!(values.not(values.bool(true)), values.bool(false));

    assert_eq!(
        values.as_condition(x_lt_3),
        Ok(Condition::new(x, Relation::Lt, values.int(3)))
    );
    assert_eq!(values.as_condition(values.bool(false)), Err(false));
    let flag = values.variable("flag", ValueType::Bool);
    assert_eq!(
        values.as_condition(flag),
        Ok(Condition::new(flag, Relation::Eq, values.bool(true)))
    );
}

#[test]
fn dependency_tests() {
    let values = ValueFactory::new();
    let a = values.variable("a", ValueType::Ref);
    let f = values.field(a, "f", ValueType::Ref);
    let g = values.field(f, "g", ValueType::Int);
    let sum = values.binop(BinOp::Arith(ArithOp::Add), g, values.int(1));

    assert_eq!(values.dependents(a), vec![f]);
    assert_eq!(values.dependents(f), vec![g]);
    assert!(values.is_qualified(f));
    assert!(!values.is_qualified(a));
    assert!(values.depends_on(sum, a));
    assert!(values.depends_on(values.boxed(g), f));
    assert!(!values.depends_on(f, g));

    assert_eq!(values.value_type(sum), ValueType::Int);
    assert_eq!(values.value_type(values.boxed(g)), ValueType::Ref);
    assert_eq!(values.value_type(values.unknown()), ValueType::Unknown);
}

#[test]
fn display_tests() {
    let values = ValueFactory::new();
    let a = values.variable("a", ValueType::Ref);
    let f = values.field(a, "f", ValueType::Int);
    let sum = values.binop(BinOp::Arith(ArithOp::Add), f, values.int(1));
    let flag = values.variable("flag", ValueType::Bool);

    assert_eq!(values.display(f), "a.f");
    assert_eq!(values.display(sum), "(a.f + 1)");
    assert_eq!(values.display(values.not(flag)), "(flag == false)");
    assert_eq!(values.display(values.unknown()), "?");
    assert_eq!(values.display(values.boxed(f)), "box(a.f)");
    assert_eq!(values.display(values.null()), "null");
    assert_eq!(values.display(values.fail()), "fail");
    assert_eq!(
        values.display(values.typed(FactMap::unknown().with(NULLABILITY, Nullability::NotNull))),
        "{NotNull}"
    );
}
