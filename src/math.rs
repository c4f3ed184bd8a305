//! Vector operations on flat field buffers

/// Vector operations required by the minimizer, the line search and the
/// history updates.
pub trait VecMath {
    /// y += c*x
    fn vecadd(&mut self, x: &[f64], c: f64);

    /// s = x.dot(y)
    fn vecdot(&self, other: &[f64]) -> f64;

    /// y = x
    fn veccpy(&mut self, x: &[f64]);

    /// y = -x
    fn vecncpy(&mut self, x: &[f64]);

    /// z = x - y
    fn vecdiff(&mut self, x: &[f64], y: &[f64]);

    /// y *= c
    fn vecscale(&mut self, c: f64);

    /// ||x||_2
    fn vec2norm(&self) -> f64;

    /// ||x||_inf
    fn vecinfnorm(&self) -> f64;
}

impl VecMath for [f64] {
    fn vecadd(&mut self, x: &[f64], c: f64) {
        debug_assert_eq!(self.len(), x.len());
        for (y, x) in self.iter_mut().zip(x) {
            *y += c * x;
        }
    }

    fn vecdot(&self, other: &[f64]) -> f64 {
        debug_assert_eq!(self.len(), other.len());
        self.iter().zip(other).map(|(x, y)| x * y).sum()
    }

    fn veccpy(&mut self, x: &[f64]) {
        self.copy_from_slice(x);
    }

    fn vecncpy(&mut self, x: &[f64]) {
        for (v, x) in self.iter_mut().zip(x) {
            *v = -x;
        }
    }

    fn vecdiff(&mut self, x: &[f64], y: &[f64]) {
        for ((z, x), y) in self.iter_mut().zip(x).zip(y) {
            *z = x - y;
        }
    }

    fn vecscale(&mut self, c: f64) {
        for y in self.iter_mut() {
            *y *= c;
        }
    }

    fn vec2norm(&self) -> f64 {
        self.vecdot(self).sqrt()
    }

    fn vecinfnorm(&self) -> f64 {
        self.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vec_ops() {
        let mut y = vec![1.0, -2.0, 3.0];
        let x = [0.5, 0.5, -1.0];

        y.vecadd(&x, 2.0);
        assert_eq!(y, vec![2.0, -1.0, 1.0]);
        assert_relative_eq!(y.vecdot(&x), 1.0 - 0.5 - 1.0);

        let mut z = vec![0.0; 3];
        z.vecdiff(&y, &x);
        assert_eq!(z, vec![1.5, -1.5, 2.0]);
        z.vecncpy(&x);
        assert_eq!(z, vec![-0.5, -0.5, 1.0]);
        z.vecscale(-2.0);
        assert_eq!(z, vec![1.0, 1.0, -2.0]);

        assert_relative_eq!(z.vec2norm(), 6f64.sqrt());
        assert_eq!(z.vecinfnorm(), 2.0);
        assert_eq!([0.0f64; 0].vecinfnorm(), 0.0);
    }
}
