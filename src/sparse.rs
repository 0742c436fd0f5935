//! Structural sparsity detection and the compressed (COO) sparsity layout.

use std::collections::{BTreeSet, HashSet};

use crate::opcode::{OpCode, UNUSED};

/// Sparsity pattern in COO format.
///
/// Entries are the positions of the compressed output array: `rows[k]` and
/// `cols[k]` locate value `k`. Both arrays always have the same length.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SparsityPattern {
    pub nrows: usize,
    pub ncols: usize,
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl SparsityPattern {
    /// Pattern holding `entries` in the given order.
    pub fn from_entries(nrows: usize, ncols: usize, entries: &[(usize, usize)]) -> Self {
        SparsityPattern {
            nrows,
            ncols,
            rows: entries.iter().map(|&(r, _)| r).collect(),
            cols: entries.iter().map(|&(_, c)| c).collect(),
        }
    }

    /// Row-major pattern from per-row column sets.
    pub fn from_sets(ncols: usize, sets: &[BTreeSet<usize>]) -> Self {
        let entries: Vec<(usize, usize)> = sets
            .iter()
            .enumerate()
            .flat_map(|(r, cols)| cols.iter().map(move |&c| (r, c)))
            .collect();
        Self::from_entries(sets.len(), ncols, &entries)
    }

    /// Number of non-zero entries in the pattern.
    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    /// Whether the pattern is empty (all zeros).
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `(row, col)` in the compressed array.
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        self.entries().position(|e| e == (row, col))
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.position(row, col).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows.iter().copied().zip(self.cols.iter().copied())
    }

    /// Column sets per row.
    pub fn to_sets(&self) -> Vec<BTreeSet<usize>> {
        let mut sets = vec![BTreeSet::new(); self.nrows];
        for (r, c) in self.entries() {
            sets[r].insert(c);
        }
        sets
    }
}

/// First-order dependencies of every output.
///
/// Walks the tape forward propagating input-dependency bitsets.
pub(crate) fn detect_jacobian_sparsity_impl(
    opcodes: &[OpCode],
    arg_indices: &[[u32; 2]],
    num_inputs: usize,
    outputs: &[u32],
) -> Vec<BTreeSet<usize>> {
    let deps = propagate_dependencies(opcodes, arg_indices, num_inputs, None);
    outputs
        .iter()
        .map(|&o| {
            extract_bits(&deps[o as usize], num_inputs)
                .into_iter()
                .map(|b| b as usize)
                .collect()
        })
        .collect()
}

/// Structural Hessian pattern of the entries marked in `live`.
///
/// At nonlinear operations, marks cross-pairs as potential Hessian
/// interactions. The result is symmetric: both `(i, j)` and `(j, i)` are
/// present.
pub(crate) fn detect_hessian_sparsity_impl(
    opcodes: &[OpCode],
    arg_indices: &[[u32; 2]],
    num_inputs: usize,
    live: &[bool],
) -> BTreeSet<(usize, usize)> {
    let mut interactions: HashSet<(u32, u32)> = HashSet::new();
    propagate_dependencies(
        opcodes,
        arg_indices,
        num_inputs,
        Some((live, &mut interactions)),
    );

    let mut pattern = BTreeSet::new();
    for (r, c) in interactions {
        pattern.insert((r as usize, c as usize));
        pattern.insert((c as usize, r as usize));
    }
    pattern
}

/// Entries that `outputs` depend on.
pub(crate) fn live_entries(arg_indices: &[[u32; 2]], opcodes: &[OpCode], outputs: &[u32]) -> Vec<bool> {
    let mut live = vec![false; opcodes.len()];
    for &o in outputs {
        live[o as usize] = true;
    }
    for i in (0..opcodes.len()).rev() {
        if !live[i] {
            continue;
        }
        let op = opcodes[i];
        if matches!(op, OpCode::Input | OpCode::Const) {
            continue;
        }
        let [a, b] = arg_indices[i];
        live[a as usize] = true;
        if op.is_binary() && b != UNUSED {
            live[b as usize] = true;
        }
    }
    live
}

fn propagate_dependencies(
    opcodes: &[OpCode],
    arg_indices: &[[u32; 2]],
    num_inputs: usize,
    mut hessian: Option<(&[bool], &mut HashSet<(u32, u32)>)>,
) -> Vec<Vec<u64>> {
    let num_words = num_inputs.div_ceil(64);

    // deps[node] = set of inputs this node depends on
    let mut deps: Vec<Vec<u64>> = vec![vec![0u64; num_words]; opcodes.len()];

    let mut input_idx = 0usize;
    for i in 0..opcodes.len() {
        match opcodes[i] {
            OpCode::Input => {
                deps[i][input_idx / 64] |= 1u64 << (input_idx % 64);
                input_idx += 1;
            }
            OpCode::Const => {}
            op => {
                let [a_idx, b_idx] = arg_indices[i];
                let a = a_idx as usize;
                let b = (op.is_binary() && b_idx != UNUSED).then_some(b_idx as usize);

                if let Some((live, interactions)) = hessian.as_mut() {
                    if live[i] {
                        match classify_op(op) {
                            OpClass::Linear => {}
                            OpClass::UnaryNonlinear => {
                                mark_all_pairs(&deps[a], num_inputs, interactions);
                            }
                            OpClass::BinaryNonlinear => {
                                let b = b.unwrap_or(a);
                                mark_cross_pairs(&deps[a], &deps[b], num_inputs, interactions);
                                if op != OpCode::Mul {
                                    // d²/db² of a/b and a^b is nonzero as well.
                                    mark_all_pairs(&deps[b], num_inputs, interactions);
                                }
                                if op == OpCode::Powf {
                                    mark_all_pairs(&deps[a], num_inputs, interactions);
                                }
                            }
                        }
                    }
                }

                union_into(&mut deps, i, a);
                if let Some(b) = b {
                    union_into(&mut deps, i, b);
                }
            }
        }
    }
    deps
}

#[derive(Debug, Clone, Copy)]
enum OpClass {
    Linear,
    UnaryNonlinear,
    BinaryNonlinear,
}

fn classify_op(op: OpCode) -> OpClass {
    match op {
        OpCode::Input | OpCode::Const | OpCode::Add | OpCode::Sub | OpCode::Neg => OpClass::Linear,

        OpCode::Recip
        | OpCode::Sqrt
        | OpCode::Powi
        | OpCode::Exp
        | OpCode::Ln
        | OpCode::Sin
        | OpCode::Cos
        | OpCode::Tan
        | OpCode::Sinh
        | OpCode::Cosh
        | OpCode::Tanh => OpClass::UnaryNonlinear,

        OpCode::Mul | OpCode::Div | OpCode::Powf => OpClass::BinaryNonlinear,
    }
}

/// Union deps[src] into deps[dst].
fn union_into(deps: &mut [Vec<u64>], dst: usize, src: usize) {
    if dst == src {
        return;
    }
    let (head, tail) = deps.split_at_mut(dst.max(src));
    let (d, s) = if dst < src {
        (&mut head[dst], &tail[0])
    } else {
        (&mut tail[0], &head[src])
    };
    for (dw, sw) in d.iter_mut().zip(s.iter()) {
        *dw |= *sw;
    }
}

/// Mark all pairs (i, j) where both i and j are in the dependency set.
fn mark_all_pairs(dep_set: &[u64], num_inputs: usize, interactions: &mut HashSet<(u32, u32)>) {
    let bits = extract_bits(dep_set, num_inputs);
    for i in 0..bits.len() {
        for j in 0..=i {
            interactions.insert((bits[i].max(bits[j]), bits[i].min(bits[j])));
        }
    }
}

/// Mark cross-pairs between two dependency sets.
fn mark_cross_pairs(
    deps_a: &[u64],
    deps_b: &[u64],
    num_inputs: usize,
    interactions: &mut HashSet<(u32, u32)>,
) {
    let bits_a = extract_bits(deps_a, num_inputs);
    let bits_b = extract_bits(deps_b, num_inputs);
    for &a in &bits_a {
        for &b in &bits_b {
            interactions.insert((a.max(b), a.min(b)));
        }
    }
}

/// Extract set bit positions from a bitset.
fn extract_bits(bitset: &[u64], max_bits: usize) -> Vec<u32> {
    let mut result = Vec::new();
    for (word_idx, &word) in bitset.iter().enumerate() {
        let mut w = word;
        while w != 0 {
            let bit = w.trailing_zeros();
            let pos = word_idx * 64 + bit as usize;
            if pos < max_bits {
                result.push(pos as u32);
            }
            w &= w - 1; // Clear lowest set bit
        }
    }
    result
}
