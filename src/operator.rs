use faer_core::{mat, mul::matmul, Parallelism};

use crate::problem::ShapeError;

/// Dense forward operator `A` (`ngrid x 3N`, row-major) with the
/// matrix-vector products every solver shares.
///
/// The row-major storage is viewed through faer as the column-major
/// transpose, so `A` and `A^T` products are both plain `matmul` calls.
#[derive(Clone, Copy)]
pub struct DipoleOperator<'a> {
    a: &'a [f64],
    ngrid: usize,
    ncols: usize,
    parallelism: Parallelism,
}

impl<'a> DipoleOperator<'a> {
    /// Creates an operator view, validating the buffer length.
    pub fn new(
        a: &'a [f64],
        ngrid: usize,
        ndipoles: usize,
        parallelism: Parallelism,
    ) -> Result<Self, ShapeError> {
        if ngrid == 0 || ndipoles == 0 {
            return Err(ShapeError::EmptyDimensions { ngrid, ndipoles });
        }
        let ncols = 3 * ndipoles;
        if a.len() != ngrid * ncols {
            return Err(ShapeError::BufferLen {
                buffer: "A",
                expected: ngrid * ncols,
                actual: a.len(),
            });
        }
        Ok(Self::from_validated(a, ngrid, ndipoles, parallelism))
    }

    pub(crate) fn from_validated(
        a: &'a [f64],
        ngrid: usize,
        ndipoles: usize,
        parallelism: Parallelism,
    ) -> Self {
        Self {
            a,
            ngrid,
            ncols: 3 * ndipoles,
            parallelism,
        }
    }

    pub fn ngrid(&self) -> usize {
        self.ngrid
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// `out = A v`, with `v` of length `3N` and `out` of length `ngrid`.
    pub fn apply(&self, v: &[f64], out: &mut [f64]) {
        debug_assert_eq!(v.len(), self.ncols);
        debug_assert_eq!(out.len(), self.ngrid);
        let transposed = mat::from_column_major_slice::<f64>(self.a, self.ncols, self.ngrid);
        let rhs = mat::from_column_major_slice::<f64>(v, self.ncols, 1);
        let acc = mat::from_column_major_slice_mut::<f64>(out, self.ngrid, 1);
        matmul(acc, transposed.transpose(), rhs, None, 1.0, self.parallelism);
    }

    /// `out = A^T r`, with `r` of length `ngrid` and `out` of length `3N`.
    pub fn apply_transpose(&self, r: &[f64], out: &mut [f64]) {
        debug_assert_eq!(r.len(), self.ngrid);
        debug_assert_eq!(out.len(), self.ncols);
        let transposed = mat::from_column_major_slice::<f64>(self.a, self.ncols, self.ngrid);
        let rhs = mat::from_column_major_slice::<f64>(r, self.ngrid, 1);
        let acc = mat::from_column_major_slice_mut::<f64>(out, self.ncols, 1);
        matmul(acc, transposed, rhs, None, 1.0, self.parallelism);
    }

    /// Fused normal-equation product `out = A^T A v + shift * v`.
    ///
    /// `field` is `ngrid` scratch and receives `A v` as a side effect.
    pub fn normal_apply(&self, v: &[f64], shift: f64, field: &mut [f64], out: &mut [f64]) {
        self.apply(v, field);
        self.apply_transpose(field, out);
        for (o, &vi) in out.iter_mut().zip(v.iter()) {
            *o += shift * vi;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_apply(a: &[f64], ngrid: usize, ncols: usize, v: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; ngrid];
        for i in 0..ngrid {
            for j in 0..ncols {
                out[i] += a[i * ncols + j] * v[j];
            }
        }
        out
    }

    #[test]
    fn matches_naive_dense_products() {
        let ngrid = 7;
        let ndipoles = 4;
        let ncols = 3 * ndipoles;
        let a: Vec<f64> = (0..ngrid * ncols)
            .map(|k| ((k * 37 + 11) % 17) as f64 / 17.0 - 0.4)
            .collect();
        let v: Vec<f64> = (0..ncols).map(|k| (k as f64 * 0.7).sin()).collect();
        let op = DipoleOperator::new(&a, ngrid, ndipoles, Parallelism::None).unwrap();

        let mut out = vec![0.0; ngrid];
        op.apply(&v, &mut out);
        let expected = naive_apply(&a, ngrid, ncols, &v);
        for (x, y) in out.iter().zip(expected.iter()) {
            assert!((x - y).abs() <= 1e-12 * y.abs().max(1.0));
        }

        let r: Vec<f64> = (0..ngrid).map(|k| (k as f64 * 0.3).cos()).collect();
        let mut back = vec![0.0; ncols];
        op.apply_transpose(&r, &mut back);
        for j in 0..ncols {
            let mut expected = 0.0;
            for i in 0..ngrid {
                expected += a[i * ncols + j] * r[i];
            }
            assert!((back[j] - expected).abs() <= 1e-12 * expected.abs().max(1.0));
        }

        let mut field = vec![0.0; ngrid];
        let mut fused = vec![0.0; ncols];
        op.normal_apply(&v, 2.5, &mut field, &mut fused);
        let av = naive_apply(&a, ngrid, ncols, &v);
        for j in 0..ncols {
            let mut expected = 2.5 * v[j];
            for i in 0..ngrid {
                expected += a[i * ncols + j] * av[i];
            }
            assert!((fused[j] - expected).abs() <= 1e-10 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn rejects_bad_buffer_length() {
        let a = vec![0.0; 5];
        assert!(DipoleOperator::new(&a, 2, 1, Parallelism::None).is_err());
        assert!(DipoleOperator::new(&a, 0, 1, Parallelism::None).is_err());
    }
}
