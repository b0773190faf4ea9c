use crate::backends::ndarray_backend::NDArrayNumericTensor;

/// Native array of the traced backend. `requires_grad` marks a
/// differentiable variable; results of operations require gradients when
/// any input does.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedTensor {
    data: NDArrayNumericTensor,
    requires_grad: bool,
}

impl TracedTensor {
    pub fn new(data: NDArrayNumericTensor) -> Self {
        Self {
            data,
            requires_grad: false,
        }
    }

    pub fn variable(data: NDArrayNumericTensor) -> Self {
        Self {
            data,
            requires_grad: true,
        }
    }

    pub fn data(&self) -> &NDArrayNumericTensor {
        &self.data
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn detach(&self) -> Self {
        Self::new(self.data.clone())
    }

    pub(crate) fn derived(data: NDArrayNumericTensor, inputs: &[&TracedTensor]) -> Self {
        Self {
            data,
            requires_grad: inputs.iter().any(|x| x.requires_grad),
        }
    }
}
