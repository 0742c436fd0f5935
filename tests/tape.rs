use std::collections::BTreeSet;

use approx::assert_relative_eq;
use loopcg::{record, Cg, CgError, Elementary, LoopTape};

fn model() -> LoopTape<f64> {
    // f0 = x0 * x1 + sin(x2), f1 = exp(x0) / x1
    record(3, |v: &[Cg<f64>]| vec![v[0] * v[1] + v[2].sin(), v[0].exp() / v[1]]).unwrap()
}

#[test]
fn forward_matches_direct_evaluation() {
    let tape = model();
    let x = [0.3, 1.7, -0.4];
    let y = tape.forward(&x).unwrap();
    assert_relative_eq!(y[0], x[0] * x[1] + x[2].sin(), epsilon = 1e-14);
    assert_relative_eq!(y[1], x[0].exp() / x[1], epsilon = 1e-14);
}

#[test]
fn jacobian_matches_analytic() {
    let tape = model();
    let x = [0.3, 1.7, -0.4];
    let jac = tape.jacobian(&x).unwrap();
    let e = x[0].exp();
    let expected = [
        [x[1], x[0], x[2].cos()],
        [e / x[1], -e / (x[1] * x[1]), 0.0],
    ];
    for (row, exp_row) in jac.iter().zip(expected.iter()) {
        for (&got, &want) in row.iter().zip(exp_row.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-12);
        }
    }
}

#[test]
fn weighted_hessian_matches_analytic() {
    let tape = model();
    let x = [0.3, 1.7, -0.4];
    let w = [2.0, -0.5];
    let h = tape.hessian(&x, &w).unwrap();
    let e = x[0].exp();
    let (a, b) = (x[1], x[1] * x[1]);

    assert_relative_eq!(h[0][0], w[1] * e / a, epsilon = 1e-12);
    assert_relative_eq!(h[1][0], w[0] + w[1] * (-e / b), epsilon = 1e-12);
    assert_relative_eq!(h[0][1], h[1][0], epsilon = 1e-12);
    assert_relative_eq!(h[1][1], w[1] * 2.0 * e / (b * a), epsilon = 1e-12);
    assert_relative_eq!(h[2][2], -w[0] * x[2].sin(), epsilon = 1e-12);
    assert_relative_eq!(h[2][0], 0.0);
}

#[test]
fn gradient_is_weighted_jacobian() {
    let tape = model();
    let x = [0.3, 1.7, -0.4];
    let w = [1.5, 0.25];
    let g = tape.gradient(&x, &w).unwrap();
    let jac = tape.jacobian(&x).unwrap();
    for j in 0..3 {
        assert_relative_eq!(g[j], w[0] * jac[0][j] + w[1] * jac[1][j], epsilon = 1e-12);
    }
}

#[test]
fn sparsity_patterns() {
    let tape = model();
    let jac = tape.jacobian_sparsity();
    assert_eq!(jac[0], BTreeSet::from([0, 1, 2]));
    assert_eq!(jac[1], BTreeSet::from([0, 1]));

    let hess = tape.hessian_sparsity();
    assert!(hess.contains(&(0, 1)) && hess.contains(&(1, 0)));
    assert!(hess.contains(&(1, 1)));
    assert!(hess.contains(&(2, 2)));
    assert!(!hess.contains(&(2, 0)));
    assert!(!hess.contains(&(2, 1)));

    // only the first output
    let first = tape.hessian_sparsity_for(&[0]);
    assert_eq!(first, BTreeSet::from([(0, 1), (1, 0), (2, 2)]));
}

#[test]
fn input_size_is_checked() {
    let tape = model();
    assert!(tape.forward(&[1.0, 2.0]).is_err());
}

#[test]
fn outputs_of_a_finished_recording_are_stale() {
    let mut leaked = None;
    record(2, |v: &[Cg<f64>]| {
        let p = v[0] * v[1];
        leaked = Some(p);
        vec![p]
    })
    .unwrap();
    let leaked = leaked.unwrap();

    // same node index in the new arena
    let err = record(3, |v: &[Cg<f64>]| vec![v[0] + v[1], leaked]).unwrap_err();
    assert!(matches!(err, CgError::StaleHandle { .. }));
    // past the end of the new arena
    let err = record(1, |v: &[Cg<f64>]| vec![v[0], leaked]).unwrap_err();
    assert!(matches!(err, CgError::StaleHandle { .. }));
}
