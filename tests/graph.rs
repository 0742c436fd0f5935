use approx::assert_relative_eq;
use loopcg::graph::{evaluate, with_active_arena, Arena, ArenaGuard, ARRAY_X};
use loopcg::opcode::OpCode;
use loopcg::value::AssignOp;
use loopcg::{Cg, CgError, Elementary, OpKind};

#[test]
fn constant_compound_assign_folds_without_nodes() {
    let mut arena = Arena::<f64>::new();
    for (op, expected) in [
        (AssignOp::Add, 5.5),
        (AssignOp::Sub, 0.5),
        (AssignOp::Mul, 7.5),
        (AssignOp::Div, 1.2),
    ] {
        let mut a = Cg::constant(3.0);
        a.compound_assign(op, Cg::constant(2.5), &mut arena).unwrap();
        assert_relative_eq!(a.value().unwrap(), expected);
    }
    assert!(arena.is_empty());
}

#[test]
fn make_variable_is_idempotent() {
    let mut arena = Arena::<f64>::new();
    let mut a = Cg::constant(2.0);
    a.make_variable(&mut arena).unwrap();
    let first = a;
    a.make_variable(&mut arena).unwrap();
    assert_eq!(a, first);
    assert_eq!(arena.count(OpKind::Assign), 1);
}

#[test]
fn multiplying_by_one_keeps_the_variable() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);
    let before = arena.len();

    let y = x.binary(OpCode::Mul, Cg::constant(1.0), &mut arena).unwrap();
    assert_eq!(y, x);
    let y = Cg::constant(1.0).binary(OpCode::Mul, x, &mut arena).unwrap();
    assert_eq!(y, x);

    let mut slot = x;
    slot.compound_assign(AssignOp::Mul, Cg::constant(1.0), &mut arena).unwrap();
    assert_eq!(slot, x);
    assert_eq!(arena.len(), before);
}

#[test]
fn zero_identities() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);

    let mut slot = x;
    slot.compound_assign(AssignOp::Mul, Cg::constant(0.0), &mut arena).unwrap();
    assert!(slot.is_identically_zero());

    let mut acc = Cg::constant(0.0);
    acc.compound_assign(AssignOp::Add, x, &mut arena).unwrap();
    assert_eq!(acc, x);
    assert_eq!(arena.len(), 1);
}

#[test]
fn compound_assign_records_the_previous_value() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);
    let mut acc = Cg::constant(2.0);
    acc.compound_assign(AssignOp::Sub, x, &mut arena).unwrap();

    let node = arena.node(acc.node().unwrap()).unwrap();
    assert_eq!(node.op(), OpKind::MinusAssign);
    let prev = node.args()[0].node().unwrap();
    assert_eq!(arena.node(prev).unwrap().op(), OpKind::Assign);
    assert!(arena.node(prev).unwrap().is_overwritten());

    let y = evaluate(&arena, &[acc], &[&[0.5]]).unwrap();
    assert_relative_eq!(y[0], 1.5);
}

#[test]
fn mixing_arenas_is_rejected() {
    let mut a = Arena::<f64>::new();
    let mut b = Arena::<f64>::new();
    let x = a.new_independent(ARRAY_X, 0);
    let y = b.new_independent(ARRAY_X, 0);
    assert!(matches!(
        x.binary(OpCode::Add, y, &mut a),
        Err(CgError::ArenaMismatch { .. })
    ));
    // a handle of another arena is stale here
    assert!(matches!(
        y.unary(OpCode::Sin, &mut a),
        Err(CgError::StaleHandle { .. })
    ));
}

#[test]
fn identical_operations_share_one_node() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);
    let y = arena.new_independent(ARRAY_X, 1);
    let (p, q) = {
        let _guard = ArenaGuard::new(&mut arena);
        (x * y, x * y)
    };
    assert_eq!(p, q);
    assert_eq!(arena.count(OpKind::Op(OpCode::Mul)), 1);
}

#[test]
fn operators_record_into_the_active_arena() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);
    let y = arena.new_independent(ARRAY_X, 1);
    let out = {
        let _guard = ArenaGuard::new(&mut arena);
        let mut acc = x * y + x.sin();
        acc += Cg::constant(3.0) * y.powi(2);
        acc
    };
    assert!(with_active_arena::<f64, _>(|_| ()).is_err());

    let (a, b) = (0.7, -1.3);
    let v = evaluate(&arena, &[out], &[&[a, b]]).unwrap();
    assert_relative_eq!(v[0], a * b + a.sin() + 3.0 * b * b, epsilon = 1e-14);
}

#[test]
fn long_dependency_chains_evaluate() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);
    let out = {
        let _guard = ArenaGuard::new(&mut arena);
        let mut acc = x;
        for k in 0..100_000 {
            acc = acc * x + Cg::constant(1.0 / (k as f64 + 1.0));
        }
        acc
    };

    let a = 0.5;
    let mut expected = a;
    for k in 0..100_000 {
        expected = expected * a + 1.0 / (k as f64 + 1.0);
    }
    let v = evaluate(&arena, &[out], &[&[a]]).unwrap();
    assert_relative_eq!(v[0], expected, epsilon = 1e-12);
}

#[test]
fn overwriting_one_slot_of_a_shared_node_keeps_its_value() {
    let mut arena = Arena::<f64>::new();
    let x = arena.new_independent(ARRAY_X, 0);
    let y = arena.new_independent(ARRAY_X, 1);
    let (mut p, q) = {
        let _guard = ArenaGuard::new(&mut arena);
        (x * y, x * y)
    };
    p.compound_assign(AssignOp::Add, x, &mut arena).unwrap();

    // the flag belongs to the node both slots recorded
    assert!(arena.node(q.node().unwrap()).unwrap().is_overwritten());
    let v = evaluate(&arena, &[p, q], &[&[2.0, 3.0]]).unwrap();
    assert_eq!(v, vec![8.0, 6.0]);
}
