use ndarray::linalg::general_mat_mul;
use ndarray::{Array, Array3, ArcArray, Axis, IxDyn, LinalgScalar, ShapeError};

#[derive(Debug, thiserror::Error)]
pub enum NDArrayOperationError {
    #[error(transparent)]
    ShapeError(#[from] ShapeError),
    #[error("incompatible shape")]
    IncompatibleShape,
    #[error("broadcast error: cannot broadcast {0:?} with {1:?}")]
    BroadcastError(Vec<usize>, Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum BinaryOperation {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum UnaryOperation {
    Exp,
    Sqrt,
}

/// Numpy-style shape broadcasting of two shapes.
pub(crate) fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>, NDArrayOperationError> {
    let rank = a.len().max(b.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        // Align from the trailing axis
        let ad = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let bd = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out.push(if ad == bd {
            ad
        } else if ad == 1 {
            bd
        } else if bd == 1 {
            ad
        } else {
            return Err(NDArrayOperationError::BroadcastError(a.to_vec(), b.to_vec()));
        });
    }
    Ok(out)
}

impl BinaryOperation {
    pub(crate) fn apply<T>(
        &self,
        a: &ArcArray<T, IxDyn>,
        b: &ArcArray<T, IxDyn>,
    ) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError>
    where
        T: Clone
            + Copy
            + std::ops::Add<Output = T>
            + std::ops::Sub<Output = T>
            + std::ops::Mul<Output = T>
            + std::ops::Div<Output = T>,
    {
        let out_shape = broadcast_shapes(a.shape(), b.shape())?;
        let a = a
            .broadcast(out_shape.as_slice())
            .ok_or(NDArrayOperationError::IncompatibleShape)?;
        let b = b
            .broadcast(out_shape.as_slice())
            .ok_or(NDArrayOperationError::IncompatibleShape)?;

        let o: Array<T, IxDyn> = match self {
            BinaryOperation::Add => &a + &b,
            BinaryOperation::Sub => &a - &b,
            BinaryOperation::Mul => &a * &b,
            BinaryOperation::Div => &a / &b,
        };
        Ok(o.into_shared())
    }
}

impl UnaryOperation {
    pub(crate) fn apply<T>(&self, a: &ArcArray<T, IxDyn>) -> ArcArray<T, IxDyn>
    where
        T: Clone + num_traits::Float,
    {
        match self {
            UnaryOperation::Exp => a.mapv(|x| x.exp()).into_shared(),
            UnaryOperation::Sqrt => a.mapv(|x| x.sqrt()).into_shared(),
        }
    }
}

/// Swap the last two axes. Rank 0 and 1 inputs are returned unchanged.
pub(crate) fn matrix_transpose<T: Clone>(a: &ArcArray<T, IxDyn>) -> ArcArray<T, IxDyn> {
    let rank = a.ndim();
    if rank < 2 {
        return a.clone();
    }
    let mut view = a.view();
    view.swap_axes(rank - 2, rank - 1);
    view.as_standard_layout().into_owned().into_shared()
}

/// Matrix product following `numpy.matmul`. A 1-D left operand is read as a
/// row vector and a 1-D right operand as a column vector; the added axis is
/// removed from the result. Axes before the last two broadcast as batches.
pub(crate) fn matmul<T: LinalgScalar>(
    a: &ArcArray<T, IxDyn>,
    b: &ArcArray<T, IxDyn>,
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError> {
    if a.ndim() == 0 || b.ndim() == 0 {
        return Err(NDArrayOperationError::IncompatibleShape);
    }
    let (row, column) = (a.ndim() == 1, b.ndim() == 1);
    let a = if row { a.view().insert_axis(Axis(0)) } else { a.view() };
    let b = if column { b.view().insert_axis(Axis(1)) } else { b.view() };

    let (a_batch, a_mat) = a.shape().split_at(a.ndim() - 2);
    let (b_batch, b_mat) = b.shape().split_at(b.ndim() - 2);
    let (m, k, n) = (a_mat[0], a_mat[1], b_mat[1]);
    if b_mat[0] != k {
        return Err(NDArrayOperationError::IncompatibleShape);
    }
    let batch_shape = broadcast_shapes(a_batch, b_batch)?;
    let batch: usize = batch_shape.iter().product();

    let lhs = a
        .broadcast([batch_shape.as_slice(), &[m, k][..]].concat())
        .ok_or(NDArrayOperationError::IncompatibleShape)?;
    let rhs = b
        .broadcast([batch_shape.as_slice(), &[k, n][..]].concat())
        .ok_or(NDArrayOperationError::IncompatibleShape)?;
    let lhs = lhs.to_shape((batch, m, k))?;
    let rhs = rhs.to_shape((batch, k, n))?;

    let mut out = Array3::<T>::zeros((batch, m, n));
    for ((x, y), mut z) in lhs.outer_iter().zip(rhs.outer_iter()).zip(out.outer_iter_mut()) {
        general_mat_mul(T::one(), &x, &y, T::zero(), &mut z);
    }

    let mut shape = batch_shape;
    if !row {
        shape.push(m);
    }
    if !column {
        shape.push(n);
    }
    Ok(out.into_shape_with_order(IxDyn(&shape))?.into_shared())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[3], &[]).unwrap(), vec![3]);
        assert_eq!(broadcast_shapes(&[2, 1], &[1, 4]).unwrap(), vec![2, 4]);
        assert!(broadcast_shapes(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn test_matmul_vector_vector_is_scalar() {
        let a = ArcArray::from_shape_vec(IxDyn(&[3]), vec![1.0f64, 2.0, 3.0]).unwrap();
        let b = ArcArray::from_shape_vec(IxDyn(&[3]), vec![4.0f64, 5.0, 6.0]).unwrap();
        let out = matmul(&a, &b).unwrap();
        assert_eq!(out.ndim(), 0);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![32.0]);
    }

    #[test]
    fn test_matmul_matrix_vector() {
        let a = ArcArray::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = ArcArray::from_shape_vec(IxDyn(&[2]), vec![1.0f32, 1.0]).unwrap();
        let out = matmul(&a, &b).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![3.0, 7.0]);
    }

    #[test]
    fn test_matrix_transpose() {
        let a = ArcArray::from_shape_vec(IxDyn(&[2, 3]), vec![1, 2, 3, 4, 5, 6]).unwrap();
        let t = matrix_transpose(&a);
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.iter().copied().collect::<Vec<_>>(), vec![1, 4, 2, 5, 3, 6]);
    }
}
