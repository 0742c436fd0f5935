use crate::error::Result;
use crate::float::Float;
use crate::opcode::{self, OpCode, UNUSED};
use crate::scalar::Elementary;

impl<F: Float> super::LoopTape<F> {
    /// Forward sweep with any replay value. Reads opcodes and constants from
    /// `self`, writing one value per tape entry into `buf`.
    pub fn forward_sweep<T: Elementary<Base = F>>(&self, inputs: &[T], buf: &mut Vec<T>) -> Result<()> {
        self.check_inputs(inputs.len())?;

        buf.clear();
        buf.reserve(self.opcodes.len());
        for i in 0..self.opcodes.len() {
            let value = match self.opcodes[i] {
                OpCode::Input => inputs[i],
                OpCode::Const => T::from_base(self.values[i]),
                OpCode::Powi => {
                    let [a_idx, exp] = self.arg_indices[i];
                    buf[a_idx as usize].powi(opcode::powi_exp_decode(exp))
                }
                op => {
                    let [a_idx, b_idx] = self.arg_indices[i];
                    let a = buf[a_idx as usize];
                    let b = if b_idx != UNUSED {
                        buf[b_idx as usize]
                    } else {
                        T::zero()
                    };
                    opcode::eval_forward(op, a, b, 0)
                }
            };
            buf.push(value);
        }
        Ok(())
    }

    /// Output values of a forward sweep.
    pub fn eval<T: Elementary<Base = F>>(&self, inputs: &[T]) -> Result<Vec<T>> {
        let mut buf = Vec::new();
        self.forward_sweep(inputs, &mut buf)?;
        Ok(self.outputs_of(&buf))
    }

    /// Numeric forward evaluation.
    pub fn forward(&self, x: &[F]) -> Result<Vec<F>> {
        self.eval(x)
    }

    pub(crate) fn outputs_of<T: Copy>(&self, buf: &[T]) -> Vec<T> {
        self.output_indices.iter().map(|&i| buf[i as usize]).collect()
    }
}
