use crate::error::Result;
use crate::graph::ArenaThreadLocal;
use crate::value::Cg;

use super::context::{merge_loop_result, Assembly};
use super::LoopScope;

/// Zero-order outputs of the whole model, one per dependent.
///
/// Each loop equation is evaluated once in the loop body and written
/// through its dependent index pattern.
pub(crate) fn assemble_forward_zero<F: ArenaThreadLocal>(
    asm: &mut Assembly<'_, F>,
    range: usize,
) -> Result<Vec<Cg<F>>> {
    let mut out = vec![Cg::constant(F::zero()); range];

    if let Some(nl) = asm.non_loop {
        let values = asm.non_loop_outputs()?.to_vec();
        for (i, &orig) in nl.dependents().iter().enumerate() {
            out[orig] = values[i];
        }
    }

    for lm in asm.loops {
        let mut scope = LoopScope::open::<F>(lm.id(), lm.iteration_count())?;
        let inputs = asm.loop_inputs(lm, &scope)?;
        let ys = lm.tape().eval(&inputs)?;
        for (i, &y) in ys.iter().enumerate() {
            let pattern = scope.pattern::<F>(lm.dependent_pattern(i).clone())?;
            scope.indexed_dep(y, pattern, false)?;
        }
        if let Some(end) = scope.close::<F>()? {
            for deps in lm.dependents() {
                for pos in deps {
                    merge_loop_result(&mut out[pos.original], end, pos.original)?;
                }
            }
        }
        tracing::debug!(loop_id = lm.id(), equations = lm.equation_count(), "forward zero loop");
    }
    Ok(out)
}
