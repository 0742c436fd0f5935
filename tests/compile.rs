use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use loopcg::model::Symbol;
use loopcg::{
    compile_all, record, Cg, CgError, CompileOptions, Elementary, GenericModel, LoopModel, LoopTape,
    LoopedModel, ModelCompiler, NonLoopModel, SparsityPattern,
};

const N: usize = 6;

/// `y_i = a * x_i * x_i` for `i < 6`, with `a = x_6`.
fn squares() -> (LoopedModel<f64>, LoopTape<f64>) {
    let tape = record(2, |v: &[Cg<f64>]| vec![v[1] * v[0] * v[0]]).unwrap();
    let lm = LoopModel::new(tape, N, vec![(0..N).collect()], vec![(0..N).collect()], vec![N], vec![]).unwrap();
    let model = LoopedModel::new("squares", N + 1, N, None, vec![lm]).unwrap();
    let flat = record(N + 1, |v: &[Cg<f64>]| (0..N).map(|i| v[N] * v[i] * v[i]).collect()).unwrap();
    (model, flat)
}

/// Three loop equations reading temporaries computed outside the loop, plus
/// one equation outside any loop. `b = x_3`.
///
/// - `z0 = sin(b) * x_0`, `z1 = exp(b)`
/// - `y_i = x_i * z0 + b * x_i^2 + z1^2 * x_i` for `i < 3`
/// - `y_3 = b^2 + x_0`
fn with_temporaries() -> (LoopedModel<f64>, LoopTape<f64>) {
    let outside = record(4, |v: &[Cg<f64>]| {
        vec![v[3] * v[3] + v[0], v[3].sin() * v[0], v[3].exp()]
    })
    .unwrap();
    let non_loop = NonLoopModel::new(outside, vec![3], 2).unwrap();

    // inputs: x_i, b, z0, z1
    let body = record(4, |v: &[Cg<f64>]| {
        vec![v[0] * v[2] + v[1] * v[0] * v[0] + v[3] * v[3] * v[0]]
    })
    .unwrap();
    let lm = LoopModel::new(body, 3, vec![vec![0, 1, 2]], vec![vec![0, 1, 2]], vec![3], vec![0, 1]).unwrap();
    let model = LoopedModel::new("temps", 4, 4, Some(non_loop), vec![lm]).unwrap();

    let flat = record(4, |v: &[Cg<f64>]| {
        let b = v[3];
        let z0 = b.sin() * v[0];
        let z1 = b.exp();
        let mut y: Vec<Cg<f64>> = (0..3).map(|i| v[i] * z0 + b * v[i] * v[i] + z1 * z1 * v[i]).collect();
        y.push(b * b + v[0]);
        y
    })
    .unwrap();
    (model, flat)
}

/// `y_it = x_it * x_b(it) + c * x_it^3` for `it < 6`, with `c = x_6`.
///
/// Iteration 3 reads `c` through both inputs, so its Hessian element
/// `(6, 3)` is claimed twice; iteration 5 writes across iterations.
fn irregular() -> (LoopedModel<f64>, LoopTape<f64>) {
    const B: [usize; N] = [0, 2, 2, 6, 4, 1];
    let body = record(3, |v: &[Cg<f64>]| vec![v[0] * v[1] + v[2] * v[0].powi(3)]).unwrap();
    let lm = LoopModel::new(
        body,
        N,
        vec![(0..N).collect()],
        vec![(0..N).collect(), B.to_vec()],
        vec![N],
        vec![],
    )
    .unwrap();
    let model = LoopedModel::new("irregular", N + 1, N, None, vec![lm]).unwrap();
    let flat = record(N + 1, |v: &[Cg<f64>]| {
        (0..N).map(|it| v[it] * v[B[it]] + v[N] * v[it].powi(3)).collect()
    })
    .unwrap();
    (model, flat)
}

fn assert_dense_eq(got: &[Vec<f64>], want: &[Vec<f64>]) {
    assert_eq!(got.len(), want.len());
    for (g, w) in got.iter().zip(want) {
        assert_eq!(g.len(), w.len());
        for (&a, &b) in g.iter().zip(w) {
            assert_relative_eq!(a, b, epsilon = 1e-10, max_relative = 1e-10);
        }
    }
}

fn check_against_flat(model: &LoopedModel<f64>, flat: &LoopTape<f64>, x: &[f64], w: &[f64]) {
    let library = ModelCompiler::new(model, CompileOptions::default()).compile().unwrap();
    let compiled = library.model(model.name()).unwrap();

    let mut y = vec![0.0; model.range()];
    compiled.forward_zero(x, &mut y).unwrap();
    let y_flat = flat.forward(x).unwrap();
    for (a, b) in y.iter().zip(&y_flat) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
    let y_model = model.evaluate(x).unwrap();
    for (a, b) in y_model.iter().zip(&y_flat) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }

    assert_dense_eq(&compiled.jacobian(x).unwrap(), &flat.jacobian(x).unwrap());
    assert_dense_eq(&compiled.hessian(x, w).unwrap(), &flat.hessian(x, w).unwrap());
}

#[test]
fn squares_match_the_unrolled_model() {
    let (model, flat) = squares();
    let x: Vec<f64> = (0..=N).map(|i| 0.3 + 0.2 * i as f64).collect();
    let w: Vec<f64> = (0..N).map(|i| 1.0 - 0.15 * i as f64).collect();
    check_against_flat(&model, &flat, &x, &w);
}

#[test]
fn squares_hessian_layout_is_lower_triangle() {
    let (model, _) = squares();
    let library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();
    let compiled = library.model("squares").unwrap();
    let pattern = compiled.hessian_sparsity().unwrap();
    assert_eq!(pattern.nnz(), 2 * N);
    assert!(pattern.entries().all(|(r, c)| r >= c));
    assert!(pattern.entries().all(|(r, c)| r == c || r == N));
}

#[test]
fn temporaries_match_the_unrolled_model() {
    let (model, flat) = with_temporaries();
    let x = [0.4, -0.7, 1.1, 0.35];
    let w = [0.5, -1.25, 2.0, 0.75];
    check_against_flat(&model, &flat, &x, &w);
}

#[test]
fn irregular_loop_matches_the_unrolled_model() {
    let (model, flat) = irregular();
    let x = [0.4, -0.7, 1.1, 0.35, -1.3, 0.9, 1.6];
    let w = [0.5, -1.25, 2.0, 0.75, 1.5, -0.6];
    check_against_flat(&model, &flat, &x, &w);

    let library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();
    let compiled = library.model("irregular").unwrap();
    let pattern = compiled.hessian_sparsity().unwrap();
    assert!(pattern.contains(5, 1));
    assert!(pattern.contains(6, 3));
    assert!(!pattern.contains(6, 6));
}

#[test]
fn custom_hessian_elements_mirror_and_alias() {
    let (model, flat) = with_temporaries();
    let x = [0.4, -0.7, 1.1, 0.35];
    let w = [0.5, -1.25, 2.0, 0.75];
    let elements = vec![(0, 0), (0, 3), (3, 0), (1, 2), (3, 3)];
    let options = CompileOptions {
        custom_hessian_elements: Some(elements.clone()),
        ..CompileOptions::default()
    };
    let library = ModelCompiler::new(&model, options).compile().unwrap();
    let compiled = library.model("temps").unwrap();

    let mut values = vec![0.0; elements.len()];
    compiled.sparse_hessian(&x, &w, &mut values).unwrap();
    let dense = flat.hessian(&x, &w).unwrap();
    for (&(r, c), &v) in elements.iter().zip(&values) {
        assert_relative_eq!(v, dense[r][c], epsilon = 1e-10, max_relative = 1e-10);
    }
    // the upper element reads its computed mirror
    assert_eq!(values[1], values[2]);
}

#[test]
fn repeated_custom_hessian_element_is_rejected() {
    let (model, _) = squares();
    let options = CompileOptions {
        custom_hessian_elements: Some(vec![(1, 1), (1, 1)]),
        ..CompileOptions::default()
    };
    let err = ModelCompiler::new(&model, options).compile().unwrap_err();
    assert_eq!(err, CgError::RepeatedHessianElement { j1: 1, j2: 1 });
}

#[test]
fn custom_jacobian_elements() {
    let (model, flat) = with_temporaries();
    let x = [0.4, -0.7, 1.1, 0.35];
    // (1, 2) is structurally zero
    let elements = vec![(2, 3), (0, 0), (1, 2), (3, 0)];
    let options = CompileOptions {
        sparse_hessian: false,
        custom_jacobian_elements: Some(elements.clone()),
        ..CompileOptions::default()
    };
    let library = ModelCompiler::new(&model, options).compile().unwrap();
    assert!(library.symbol("temps_sparse_hessian").is_none());
    let compiled = library.model("temps").unwrap();

    let mut values = vec![0.0; elements.len()];
    compiled.sparse_jacobian(&x, &mut values).unwrap();
    let dense = flat.jacobian(&x).unwrap();
    for (&(r, c), &v) in elements.iter().zip(&values) {
        assert_relative_eq!(v, dense[r][c], epsilon = 1e-12);
    }
    assert_eq!(values[2], 0.0);
    assert!(matches!(
        compiled.hessian_sparsity(),
        Err(CgError::MissingEntryPoint(_))
    ));
}

#[test]
fn nnz_mismatch_is_rejected_before_invocation() {
    let (model, _) = squares();
    let mut library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let spy = Arc::clone(&calls);
    library.insert_function("squares_sparse_jacobian", move |_, _| {
        spy.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let compiled = library.model("squares").unwrap();
    let nnz = compiled.jacobian_sparsity().unwrap().nnz();
    let x = vec![1.0; N + 1];

    let mut values = vec![0.0; nnz + 1];
    assert!(matches!(
        compiled.sparse_jacobian(&x, &mut values),
        Err(CgError::SizeMismatch { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    compiled.sparse_jacobian(&x, &mut values[..nnz]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn inconsistent_sparsity_arrays_are_rejected_at_load() {
    let (model, _) = squares();
    let mut library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();
    library.insert(
        "squares_jacobian_sparsity",
        Symbol::Sparsity(SparsityPattern {
            nrows: N,
            ncols: N + 1,
            rows: vec![0, 1],
            cols: vec![0],
        }),
    );
    assert!(matches!(
        library.model("squares"),
        Err(CgError::SizeMismatch { expected: 2, actual: 1, .. })
    ));
}

#[test]
fn wrong_input_sizes_are_rejected() {
    let (model, _) = squares();
    let library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();
    let compiled = library.model("squares").unwrap();
    let mut y = vec![0.0; N];
    assert!(compiled.forward_zero(&[1.0; N], &mut y).is_err());
    let mut values = vec![0.0; compiled.hessian_sparsity().unwrap().nnz()];
    assert!(compiled.sparse_hessian(&[1.0; N + 1], &[1.0; N - 1], &mut values).is_err());
}

#[test]
fn several_models_share_one_library() {
    let (a, _) = squares();
    let (b, _) = with_temporaries();
    let library = compile_all(&[a, b], &CompileOptions::default()).unwrap();
    let mut names = library.model_names();
    names.sort_unstable();
    assert_eq!(names, vec!["squares", "temps"]);

    let temps = library.model("temps").unwrap();
    let mut y = vec![0.0; 4];
    temps.forward_zero(&[0.4, -0.7, 1.1, 0.35], &mut y).unwrap();
    assert_relative_eq!(y[3], 0.35 * 0.35 + 0.4, epsilon = 1e-14);
}

#[test]
fn f32_library_is_not_loaded_as_f64() {
    let tape = record(1, |v: &[Cg<f32>]| vec![v[0] * v[0]]).unwrap();
    let outside = NonLoopModel::new(tape, vec![0], 0).unwrap();
    let model = LoopedModel::new("single", 1, 1, Some(outside), vec![]).unwrap();
    let library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();

    let mut as_f64 = loopcg::ModelLibrary::<f64>::new();
    if let Some(Symbol::Info(info)) = library.symbol("single_info") {
        as_f64.insert("single_info", Symbol::Info(info.clone()));
    }
    assert!(matches!(
        as_f64.model("single"),
        Err(CgError::TypeMismatch { expected: "f64", .. })
    ));
}
