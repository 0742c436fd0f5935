use crate::error::Result;
use crate::graph::{Arena, ArenaGuard, ArenaThreadLocal, ARRAY_X};
use crate::tape::LoopTape;
use crate::value::Cg;

/// Record `f : R^n → R^m` into a [`LoopTape`].
///
/// `f` receives `num_inputs` symbolic inputs and returns its outputs. It runs
/// against a fresh arena, so it must not mix in values from another
/// recording.
///
/// ```
/// use loopcg::Elementary;
///
/// let tape = loopcg::record(2, |x: &[loopcg::Cg<f64>]| vec![x[0] * x[1], x[0].sin()]).unwrap();
/// let y = tape.forward(&[2.0, 3.0]).unwrap();
/// assert_eq!(y[0], 6.0);
/// ```
pub fn record<F: ArenaThreadLocal>(
    num_inputs: usize,
    f: impl FnOnce(&[Cg<F>]) -> Vec<Cg<F>>,
) -> Result<LoopTape<F>> {
    let mut arena = Arena::new();
    let inputs = arena.new_independents(ARRAY_X, num_inputs);

    let outputs = {
        let _guard = ArenaGuard::new(&mut arena);
        f(&inputs)
    };

    let refs: Vec<_> = inputs.iter().filter_map(|x| x.node()).collect();
    LoopTape::from_arena(&arena, &refs, &outputs)
}
