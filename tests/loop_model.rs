use std::collections::{BTreeMap, BTreeSet};

use loopcg::graph::{evaluate, with_active_arena, Arena, ArenaGuard, Argument, ARRAY_X, OPEN_RANGE};
use loopcg::loops::{create_contribution, HessianElement, LoopScope};
use loopcg::{record, Cg, CgError, IndexPattern, LoopModel, LoopedModel, OpKind};

const N: usize = 6;

/// `y_i = a * x_i * x_i` for `i < 6`, with `a = x_6`.
fn scaled_squares() -> LoopedModel<f64> {
    let tape = record(2, |v: &[Cg<f64>]| vec![v[1] * v[0] * v[0]]).unwrap();
    let lm = LoopModel::new(tape, N, vec![(0..N).collect()], vec![(0..N).collect()], vec![N], vec![]).unwrap();
    LoopedModel::new("squares", N + 1, N, None, vec![lm]).unwrap()
}

#[test]
fn per_iteration_tables_have_one_entry_per_iteration() {
    let model = scaled_squares();
    let lm = &model.loops()[0];

    assert_eq!(lm.iteration_count(), N);
    assert_eq!(lm.indexed_tape_indexes_all(3).map(<[_]>::len), Some(N));
    for i in 0..N {
        assert_eq!(lm.hessian_indexed_indexed(i, i).len(), N);
        assert_eq!(lm.hessian_non_indexed_indexed(N, i).len(), N);
        assert_eq!(lm.hessian_indexed_non_indexed(i, N).len(), N);
    }
    // pairs that never occur have no table at all
    assert!(lm.hessian_indexed_indexed(0, 1).is_empty());
}

#[test]
fn classification_places_pairs_at_their_iteration() {
    let model = scaled_squares();
    let lm = &model.loops()[0];

    let table = lm.hessian_indexed_indexed(2, 2);
    for (it, pairs) in table.iter().enumerate() {
        if it == 2 {
            assert_eq!(pairs, &BTreeSet::from([(0, 0)]));
        } else {
            assert!(pairs.is_empty());
        }
    }
    assert_eq!(lm.hessian_non_indexed_indexed(N, 4)[4], BTreeSet::from([(1, 0)]));
    assert_eq!(lm.dependent(4).map(|p| (p.tape, p.iteration)), Some((0, 4)));
    assert_eq!(lm.non_indexed_indep(N).map(|p| p.tape), Some(1));
    assert!(lm.non_indexed_indep(0).is_none());
}

#[test]
fn squares_hessian_has_no_cross_iteration_entries() {
    let model = scaled_squares();
    let pattern = model.hessian_sparsity();

    for i in 0..N {
        assert!(pattern.contains(&(i, i)));
        assert!(pattern.contains(&(i, N)));
        assert!(pattern.contains(&(N, i)));
        for j in (0..N).filter(|&j| j != i) {
            assert!(!pattern.contains(&(i, j)), "unexpected ({i}, {j})");
        }
    }
    assert!(!pattern.contains(&(N, N)));
    assert_eq!(pattern.len(), 3 * N);
}

#[test]
fn loop_validation() {
    let tape = || record(2, |v: &[Cg<f64>]| vec![v[1] * v[0]]).unwrap();

    // one iteration short
    let err = LoopModel::new(tape(), 3, vec![vec![0, 1]], vec![vec![0, 1, 2]], vec![5], vec![]).unwrap_err();
    assert!(matches!(err, CgError::SizeMismatch { expected: 3, actual: 2, .. }));

    // same dependent twice
    let err = LoopModel::new(tape(), 2, vec![vec![0, 0]], vec![vec![0, 1]], vec![5], vec![]).unwrap_err();
    assert!(matches!(err, CgError::InvalidLoop(_)));

    // dependent 2 is never written
    let lm = LoopModel::new(tape(), 2, vec![vec![0, 1]], vec![vec![0, 1]], vec![3], vec![]).unwrap();
    assert!(matches!(
        LoopedModel::new("m", 4, 3, None, vec![lm]),
        Err(CgError::InvalidModel(_))
    ));

    // temporaries without a non-loop model
    let lm = LoopModel::new(tape(), 2, vec![vec![0, 1]], vec![vec![0, 1]], vec![], vec![0]).unwrap();
    assert!(matches!(
        LoopedModel::new("m", 4, 2, None, vec![lm]),
        Err(CgError::InvalidLoop(_))
    ));
}

#[test]
fn full_uniform_coverage_is_a_single_pattern_write() {
    let mut arena = Arena::<f64>::new();
    {
        let _guard = ArenaGuard::new(&mut arena);
        let mut scope = LoopScope::open::<f64>(0, 4).unwrap();
        let x = scope
            .indexed_indep::<f64>(ARRAY_X, IndexPattern::Linear { slope: 1, offset: 0 })
            .unwrap();
        let elements = (0..4).map(|it| (it, HessianElement::new(10 + 2 * it, 0))).collect();

        let (value, pattern) = create_contribution(&mut scope, &elements, x).unwrap();
        assert_eq!(value, x);
        let id = pattern.expect("pattern write");
        let detected = with_active_arena::<f64, _>(|a| a.index_pattern(id).cloned()).unwrap();
        assert_eq!(detected, Some(IndexPattern::Linear { slope: 2, offset: 10 }));
        assert!(scope.cache().is_empty());
    }
    assert_eq!(arena.count(OpKind::StartIf), 0);
    assert_eq!(arena.count(OpKind::Else), 0);
}

#[test]
fn equal_partitions_share_one_if_else_skeleton() {
    let mut arena = Arena::<f64>::new();
    let end_if = {
        let _guard = ArenaGuard::new(&mut arena);
        let mut scope = LoopScope::open::<f64>(0, 3).unwrap();
        let x = scope
            .indexed_indep::<f64>(ARRAY_X, IndexPattern::Linear { slope: 1, offset: 0 })
            .unwrap();

        let claims = |locations: [usize; 3]| {
            let mut elements: std::collections::BTreeMap<usize, HessianElement> = locations
                .iter()
                .enumerate()
                .map(|(it, &loc)| (it, HessianElement::new(loc, 0)))
                .collect();
            // iteration 0 is claimed twice
            if let Some(e) = elements.get_mut(&0) {
                e.count = 2;
            }
            elements
        };

        let (a, pa) = create_contribution(&mut scope, &claims([5, 6, 7]), x).unwrap();
        let (b, pb) = create_contribution(&mut scope, &claims([8, 9, 10]), x).unwrap();
        assert!(pa.is_none() && pb.is_none());
        assert_eq!(a, b);
        assert_eq!(scope.cache().len(), 1);
        assert_eq!(scope.branch_stats(), (2, 1));
        a.node().unwrap()
    };

    assert_eq!(arena.count(OpKind::StartIf), 1);
    assert_eq!(arena.count(OpKind::Else), 1);
    assert_eq!(arena.count(OpKind::EndIf), 1);
    // one result of the last branch per contribution
    assert_eq!(arena.node(end_if).unwrap().args().len(), 2);
}

#[test]
fn shared_if_else_chain_writes_every_partition() {
    // iteration 0 alone, 1..=3 twice, 4..=5 three times
    let claims = |first: usize| -> BTreeMap<usize, HessianElement> {
        [1, 2, 2, 2, 3, 3]
            .iter()
            .enumerate()
            .map(|(it, &count)| {
                let mut e = HessianElement::new(first + it, 0);
                e.count = count;
                (it, e)
            })
            .collect()
    };

    let mut arena = Arena::<f64>::new();
    let outputs = {
        let _guard = ArenaGuard::new(&mut arena);
        let mut scope = LoopScope::open::<f64>(0, 6).unwrap();
        let x = scope
            .indexed_indep::<f64>(ARRAY_X, IndexPattern::Linear { slope: 1, offset: 0 })
            .unwrap();
        scope.contribute(&claims(5), x).unwrap();
        scope.contribute(&claims(11), x).unwrap();
        assert_eq!(scope.branch_stats(), (3, 1));
        let end = scope.close::<f64>().unwrap().unwrap();

        let mut outputs = Vec::new();
        for location in 5..=17 {
            let r = with_active_arena::<f64, _>(|a| {
                a.push(OpKind::DependentMultiAssign, vec![Argument::Node(end)], vec![location])
            })
            .unwrap()
            .unwrap();
            outputs.push(Cg::Variable(r));
        }
        outputs
    };
    assert_eq!(arena.count(OpKind::StartIf), 1);
    assert_eq!(arena.count(OpKind::ElseIf), 1);
    assert_eq!(arena.count(OpKind::Else), 1);
    // the else-if range runs to the end of the loop
    let open_ended = arena
        .nodes()
        .filter(|(_, n)| n.op() == OpKind::IndexCondExpr)
        .any(|(_, n)| n.info() == [4, OPEN_RANGE]);
    assert!(open_ended);

    let x = [1.5, -2.0, 4.0, 0.5, -1.0, 2.5];
    let y = evaluate(&arena, &outputs, &[&x[..]]).unwrap();
    let once = [1.5, -4.0, 8.0, 1.0, -3.0, 7.5];
    let mut expected = [once, once].concat();
    expected.push(0.0);
    assert_eq!(y, expected);
}

#[test]
fn claims_past_the_last_iteration_are_rejected() {
    let mut arena = Arena::<f64>::new();
    let _guard = ArenaGuard::new(&mut arena);
    let mut scope = LoopScope::open::<f64>(0, 3).unwrap();
    let x = scope
        .indexed_indep::<f64>(ARRAY_X, IndexPattern::Linear { slope: 1, offset: 0 })
        .unwrap();
    let elements = [(0, 4), (1, 5), (3, 6)]
        .into_iter()
        .map(|(it, location)| (it, HessianElement::new(location, 0)))
        .collect();
    assert!(matches!(
        create_contribution(&mut scope, &elements, x),
        Err(CgError::IncompletePartition { covered: 2, expected: 3 })
    ));
}

#[test]
fn index_patterns() {
    let dense = IndexPattern::detect_dense(&[4, 4, 4]);
    assert_eq!(dense, IndexPattern::Constant(4));
    let linear = IndexPattern::detect_dense(&[3, 5, 7, 9]);
    assert_eq!(linear, IndexPattern::Linear { slope: 2, offset: 3 });
    let table = IndexPattern::detect_dense(&[0, 5, 1]);
    assert!(matches!(table, IndexPattern::Table(_)));
    assert_eq!(table.eval(1), Some(5));

    // semantic equality over the iteration range
    let as_table = IndexPattern::Table((0..4).map(|it| (it, 3 + 2 * it)).collect());
    assert!(linear.equivalent(&as_table, 4));
    assert!(!linear.equivalent(&IndexPattern::Constant(3), 4));
}
