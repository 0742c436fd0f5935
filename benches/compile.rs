use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loopcg::{
    record, Cg, CompileOptions, Elementary, GenericModel, LoopModel, LoopedModel, ModelCompiler,
    NonLoopModel,
};

/// `y_i = a * x_i * x_i`, `a = x_n`.
fn squares(n: usize) -> LoopedModel<f64> {
    let tape = record(2, |v: &[Cg<f64>]| vec![v[1] * v[0] * v[0]]).unwrap();
    let lm = LoopModel::new(tape, n, vec![(0..n).collect()], vec![(0..n).collect()], vec![n], vec![]).unwrap();
    LoopedModel::new("squares", n + 1, n, None, vec![lm]).unwrap()
}

/// Loop equations reading two temporaries of `b = x_n`, plus `y_n = b^2 + x_0`.
fn with_temporaries(n: usize) -> LoopedModel<f64> {
    let outside = record(n + 1, |v: &[Cg<f64>]| {
        vec![v[n] * v[n] + v[0], v[n].sin() * v[0], v[n].exp()]
    })
    .unwrap();
    let non_loop = NonLoopModel::new(outside, vec![n], 2).unwrap();
    let body = record(4, |v: &[Cg<f64>]| {
        vec![v[0] * v[2] + v[1] * v[0] * v[0] + v[3] * v[3] * v[0]]
    })
    .unwrap();
    let lm = LoopModel::new(body, n, vec![(0..n).collect()], vec![(0..n).collect()], vec![n], vec![0, 1]).unwrap();
    LoopedModel::new("temps", n + 1, n + 1, Some(non_loop), vec![lm]).unwrap()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for n in [10, 100, 1000] {
        let model = squares(n);
        group.bench_with_input(BenchmarkId::new("squares", n), &model, |b, model| {
            b.iter(|| black_box(ModelCompiler::new(model, CompileOptions::default()).compile()))
        });

        let model = with_temporaries(n);
        group.bench_with_input(BenchmarkId::new("temporaries", n), &model, |b, model| {
            b.iter(|| black_box(ModelCompiler::new(model, CompileOptions::default()).compile()))
        });
    }
    group.finish();
}

/// Compiled sparse Hessian vs the unrolled tape's dense Hessian.
fn bench_sparse_hessian(c: &mut Criterion) {
    let mut group = c.benchmark_group("sparse_hessian");
    for n in [10, 100] {
        let model = squares(n);
        let library = ModelCompiler::new(&model, CompileOptions::default()).compile().unwrap();
        let compiled = library.model("squares").unwrap();
        let nnz = compiled.hessian_sparsity().unwrap().nnz();
        let x: Vec<f64> = (0..=n).map(|i| 0.5 + 0.01 * i as f64).collect();
        let w = vec![1.0; n];

        group.bench_with_input(BenchmarkId::new("compiled", n), &x, |b, x| {
            let mut values = vec![0.0; nnz];
            b.iter(|| {
                compiled.sparse_hessian(black_box(x), &w, &mut values).unwrap();
                black_box(values[0])
            })
        });

        let flat = record(n + 1, |v: &[Cg<f64>]| (0..n).map(|i| v[n] * v[i] * v[i]).collect()).unwrap();
        group.bench_with_input(BenchmarkId::new("unrolled_dense", n), &x, |b, x| {
            b.iter(|| black_box(flat.hessian(black_box(x), &w)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_sparse_hessian);
criterion_main!(benches);
