//! Index patterns: rules mapping a loop iteration to an original index or
//! an output location.

use std::collections::BTreeMap;

/// Mapping from iteration number to an index.
///
/// Detected from an iteration → value table by [`IndexPattern::detect`],
/// which tries a constant, then a linear rule, then falls back to the table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexPattern {
    /// The same index at every iteration.
    Constant(usize),
    /// `slope * iteration + offset`.
    Linear { slope: i64, offset: i64 },
    /// Explicit iteration → index table. Iterations outside it have no index.
    Table(BTreeMap<usize, usize>),
}

impl IndexPattern {
    /// Detect the simplest pattern reproducing `values`.
    pub fn detect(values: &BTreeMap<usize, usize>) -> IndexPattern {
        let mut entries = values.iter().map(|(&it, &v)| (it as i64, v as i64));
        let Some((it0, v0)) = entries.next() else {
            return IndexPattern::Table(BTreeMap::new());
        };
        if values.values().all(|&v| v as i64 == v0) {
            return IndexPattern::Constant(v0 as usize);
        }

        // Slope from the first two entries, then every entry must agree.
        if let Some((it1, v1)) = entries.next() {
            let (dv, dit) = (v1 - v0, it1 - it0);
            if dv % dit == 0 {
                let slope = dv / dit;
                let offset = v0 - slope * it0;
                if values
                    .iter()
                    .all(|(&it, &v)| slope * it as i64 + offset == v as i64)
                {
                    return IndexPattern::Linear { slope, offset };
                }
            }
        }
        IndexPattern::Table(values.clone())
    }

    /// Detect from a dense table where position `i` holds iteration `i`.
    pub fn detect_dense(values: &[usize]) -> IndexPattern {
        let map: BTreeMap<usize, usize> = values.iter().copied().enumerate().collect();
        Self::detect(&map)
    }

    /// Index at `iteration`, or `None` when the pattern does not cover it.
    pub fn eval(&self, iteration: usize) -> Option<usize> {
        match self {
            IndexPattern::Constant(v) => Some(*v),
            IndexPattern::Linear { slope, offset } => {
                let v = slope.checked_mul(iteration as i64)?.checked_add(*offset)?;
                usize::try_from(v).ok()
            }
            IndexPattern::Table(table) => table.get(&iteration).copied(),
        }
    }

    /// Whether both patterns produce the same index for every iteration in
    /// `[0, iterations)`.
    pub fn equivalent(&self, other: &IndexPattern, iterations: usize) -> bool {
        self == other || (0..iterations).all(|it| self.eval(it) == other.eval(it))
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, IndexPattern::Constant(_))
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        matches!(self, IndexPattern::Linear { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(usize, usize)]) -> BTreeMap<usize, usize> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn constant_before_linear() {
        let p = IndexPattern::detect(&table(&[(0, 4), (1, 4), (2, 4)]));
        assert_eq!(p, IndexPattern::Constant(4));
    }

    #[test]
    fn linear_over_sparse_iterations() {
        let p = IndexPattern::detect(&table(&[(1, 10), (3, 14), (5, 18)]));
        assert_eq!(p, IndexPattern::Linear { slope: 2, offset: 8 });
        assert_eq!(p.eval(3), Some(14));
    }

    #[test]
    fn decreasing_linear() {
        let p = IndexPattern::detect_dense(&[9, 6, 3, 0]);
        assert_eq!(p, IndexPattern::Linear { slope: -3, offset: 9 });
        assert_eq!(p.eval(4), None);
    }

    #[test]
    fn fractional_slope_falls_back_to_table() {
        let p = IndexPattern::detect(&table(&[(0, 0), (2, 1), (4, 2)]));
        assert!(matches!(p, IndexPattern::Table(_)));
        assert_eq!(p.eval(2), Some(1));
        assert_eq!(p.eval(1), None);
    }

    #[test]
    fn equivalence_is_semantic() {
        let linear = IndexPattern::Linear { slope: 1, offset: 0 };
        let explicit = IndexPattern::Table(table(&[(0, 0), (1, 1), (2, 2)]));
        assert!(linear.equivalent(&explicit, 3));
        assert!(!linear.equivalent(&explicit, 4));
    }
}
