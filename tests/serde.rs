#![cfg(feature = "serde")]

use loopcg::model::ModelInfo;
use loopcg::{record, Cg, CompileOptions, LoopTape, SparsityPattern};

#[test]
fn roundtrip_tape_json() {
    let tape = record(2, |v: &[Cg<f64>]| vec![v[0] * v[1] - v[1]]).unwrap();
    let json = serde_json::to_string(&tape).unwrap();
    let back: LoopTape<f64> = serde_json::from_str(&json).unwrap();

    let x = [1.5, -2.0];
    assert_eq!(tape.forward(&x).unwrap(), back.forward(&x).unwrap());
    assert_eq!(tape.hessian_sparsity(), back.hessian_sparsity());
}

#[test]
fn compile_options_from_json() {
    let json = r#"{
        "forward_zero": true,
        "sparse_jacobian": false,
        "sparse_hessian": true,
        "custom_jacobian_elements": null,
        "custom_hessian_elements": [[1, 0], [1, 1]]
    }"#;
    let options: CompileOptions = serde_json::from_str(json).unwrap();
    assert!(!options.sparse_jacobian);
    assert_eq!(options.custom_hessian_elements, Some(vec![(1, 0), (1, 1)]));
}

#[test]
fn library_metadata_roundtrip() {
    let info = ModelInfo {
        name: "m".into(),
        domain: 3,
        range: 2,
        base_type: "f64".into(),
    };
    let pattern = SparsityPattern::from_entries(2, 3, &[(0, 0), (1, 2)]);
    let json = serde_json::to_string(&(&info, &pattern)).unwrap();
    let (info2, pattern2): (ModelInfo, SparsityPattern) = serde_json::from_str(&json).unwrap();
    assert_eq!(info, info2);
    assert_eq!(pattern, pattern2);
}
