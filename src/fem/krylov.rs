use super::SparseMatrix;
use crate::base::SimError;
use nalgebra::DVector;

/// Defines the action of a preconditioner: dst = P⁻¹ src
pub trait Preconditioner {
    fn vmult(&self, dst: &mut DVector<f64>, src: &DVector<f64>);
}

/// Implements the symmetric successive over-relaxation preconditioner
pub struct PreconditionSsor<'a> {
    matrix: &'a SparseMatrix,
    omega: f64,
    diag: Vec<f64>,
}

impl<'a> PreconditionSsor<'a> {
    /// Allocates a new instance
    pub fn new(matrix: &'a SparseMatrix, omega: f64) -> Self {
        let diag = (0..matrix.dim())
            .map(|i| {
                let d = matrix.diag(i);
                if d != 0.0 {
                    d
                } else {
                    1.0
                }
            })
            .collect();
        PreconditionSsor { matrix, omega, diag }
    }
}

impl<'a> Preconditioner for PreconditionSsor<'a> {
    fn vmult(&self, dst: &mut DVector<f64>, src: &DVector<f64>) {
        let n = self.matrix.dim();
        let pattern = self.matrix.pattern();
        let values = self.matrix.values();
        let w = self.omega;

        // forward sweep: (D/ω + L) y = src
        for i in 0..n {
            let mut sum = src[i];
            for p in pattern.row_range(i) {
                let j = pattern.col(p);
                if j < i {
                    sum -= values[p] * dst[j];
                }
            }
            dst[i] = sum * w / self.diag[i];
        }

        // scaling: y ← (2-ω)/ω D y
        for i in 0..n {
            dst[i] *= (2.0 - w) / w * self.diag[i];
        }

        // backward sweep: (D/ω + U) z = y
        for i in (0..n).rev() {
            let mut sum = dst[i];
            for p in pattern.row_range(i) {
                let j = pattern.col(p);
                if j > i {
                    sum -= values[p] * dst[j];
                }
            }
            dst[i] = sum * w / self.diag[i];
        }
    }
}

/// Implements the (damped) Jacobi preconditioner
pub struct PreconditionJacobi {
    inv_diag: Vec<f64>,
}

impl PreconditionJacobi {
    /// Allocates a new instance
    pub fn new(matrix: &SparseMatrix, omega: f64) -> Self {
        let inv_diag = (0..matrix.dim())
            .map(|i| {
                let d = matrix.diag(i);
                if d != 0.0 {
                    omega / d
                } else {
                    omega
                }
            })
            .collect();
        PreconditionJacobi { inv_diag }
    }
}

impl Preconditioner for PreconditionJacobi {
    fn vmult(&self, dst: &mut DVector<f64>, src: &DVector<f64>) {
        for i in 0..src.len() {
            dst[i] = self.inv_diag[i] * src[i];
        }
    }
}

/// Holds the stopping criteria of the iterative solvers
#[derive(Clone, Copy, Debug)]
pub struct SolverControl {
    /// Relative tolerance (applied to the norm of the right-hand side)
    pub tolerance: f64,

    /// Maximum number of iterations
    pub max_iterations: usize,
}

impl SolverControl {
    /// Allocates a new instance with the maximum iterations proportional to the system size
    pub fn new(tolerance: f64, factor: usize, dim: usize) -> Self {
        SolverControl {
            tolerance,
            max_iterations: usize::max(factor * dim, 10),
        }
    }
}

/// Solves a symmetric positive-definite system with the preconditioned conjugate gradient method
///
/// The initial guess is the incoming `x`. Returns the number of iterations.
pub fn solve_cg<P: Preconditioner>(
    aa: &SparseMatrix,
    x: &mut DVector<f64>,
    bb: &DVector<f64>,
    precond: &P,
    control: &SolverControl,
) -> Result<usize, SimError> {
    let n = bb.len();
    let norm_b = bb.norm();
    if norm_b == 0.0 {
        x.fill(0.0);
        return Ok(0);
    }
    let tol = control.tolerance * norm_b;
    let mut r = DVector::zeros(n);
    aa.vmult(&mut r, x);
    r = bb - r;
    if r.norm() <= tol {
        return Ok(0);
    }
    let mut z = DVector::zeros(n);
    precond.vmult(&mut z, &r);
    let mut p = z.clone();
    let mut rz = r.dot(&z);
    let mut ap = DVector::zeros(n);
    for it in 1..=control.max_iterations {
        aa.vmult(&mut ap, &p);
        let pap = p.dot(&ap);
        if pap == 0.0 || !pap.is_finite() {
            return Err(SimError::LinearSolver(format!("CG breakdown at iteration {}", it)));
        }
        let alpha = rz / pap;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);
        let norm_r = r.norm();
        if !norm_r.is_finite() {
            return Err(SimError::LinearSolver(format!("CG residual is not finite at iteration {}", it)));
        }
        if norm_r <= tol {
            return Ok(it);
        }
        precond.vmult(&mut z, &r);
        let rz_new = r.dot(&z);
        let beta = rz_new / rz;
        rz = rz_new;
        p.axpy(1.0, &z, beta);
    }
    Err(SimError::LinearSolver(format!(
        "CG did not converge in {} iterations",
        control.max_iterations
    )))
}

/// Solves a general system with the preconditioned BiCGStab method
///
/// The initial guess is the incoming `x`. Returns the number of iterations.
pub fn solve_bicgstab<P: Preconditioner>(
    aa: &SparseMatrix,
    x: &mut DVector<f64>,
    bb: &DVector<f64>,
    precond: &P,
    control: &SolverControl,
) -> Result<usize, SimError> {
    let n = bb.len();
    let norm_b = bb.norm();
    if norm_b == 0.0 {
        x.fill(0.0);
        return Ok(0);
    }
    let tol = control.tolerance * norm_b;
    let mut r = DVector::zeros(n);
    aa.vmult(&mut r, x);
    r = bb - r;
    if r.norm() <= tol {
        return Ok(0);
    }
    let r_hat = r.clone();
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
    let mut v: DVector<f64> = DVector::zeros(n);
    let mut p: DVector<f64> = DVector::zeros(n);
    let mut p_hat = DVector::zeros(n);
    let mut s_hat = DVector::zeros(n);
    let mut t = DVector::zeros(n);
    for it in 1..=control.max_iterations {
        let rho_new = r_hat.dot(&r);
        if rho_new == 0.0 || !rho_new.is_finite() {
            return Err(SimError::LinearSolver(format!("BiCGStab breakdown (ρ) at iteration {}", it)));
        }
        let beta = (rho_new / rho) * (alpha / omega);
        rho = rho_new;

        // p = r + β (p - ω v)
        p.axpy(-omega, &v, 1.0);
        p.axpy(1.0, &r, beta);
        precond.vmult(&mut p_hat, &p);
        aa.vmult(&mut v, &p_hat);
        let rv = r_hat.dot(&v);
        if rv == 0.0 || !rv.is_finite() {
            return Err(SimError::LinearSolver(format!("BiCGStab breakdown (α) at iteration {}", it)));
        }
        alpha = rho / rv;

        // s = r - α v
        let mut s = r.clone();
        s.axpy(-alpha, &v, 1.0);
        if s.norm() <= tol {
            x.axpy(alpha, &p_hat, 1.0);
            return Ok(it);
        }
        precond.vmult(&mut s_hat, &s);
        aa.vmult(&mut t, &s_hat);
        let tt = t.dot(&t);
        if tt == 0.0 || !tt.is_finite() {
            return Err(SimError::LinearSolver(format!("BiCGStab breakdown (ω) at iteration {}", it)));
        }
        omega = t.dot(&s) / tt;
        x.axpy(alpha, &p_hat, 1.0);
        x.axpy(omega, &s_hat, 1.0);

        // r = s - ω t
        r.copy_from(&s);
        r.axpy(-omega, &t, 1.0);
        let norm_r = r.norm();
        if !norm_r.is_finite() {
            return Err(SimError::LinearSolver(format!(
                "BiCGStab residual is not finite at iteration {}",
                it
            )));
        }
        if norm_r <= tol {
            return Ok(it);
        }
        if omega == 0.0 {
            return Err(SimError::LinearSolver(format!("BiCGStab stagnation at iteration {}", it)));
        }
    }
    Err(SimError::LinearSolver(format!(
        "BiCGStab did not converge in {} iterations",
        control.max_iterations
    )))
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{solve_bicgstab, solve_cg, PreconditionJacobi, PreconditionSsor, Preconditioner, SolverControl};
    use crate::fem::{HangingNodes, Mesh, SparseMatrix, SparsityPattern};
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use std::rc::Rc;

    // Returns the 1D Laplacian with a mass shift (SPD) on 2^level cells
    fn system(level: usize, convection: f64) -> SparseMatrix {
        let mesh = Mesh::new_hyper_cube(1, 1.0, level).unwrap();
        let hn = HangingNodes::new(&mesh);
        let mut aa = SparseMatrix::new(Rc::new(SparsityPattern::new(&mesh, &hn)));
        let n = mesh.n_nodes();
        for i in 0..n {
            aa.add(i, i, 3.0);
            if i + 1 < n {
                aa.add(i, i + 1, -1.0 + convection);
                aa.add(i + 1, i, -1.0 - convection);
            }
        }
        aa
    }

    #[test]
    fn preconditioners_work() {
        let aa = system(1, 0.0);
        let jacobi = PreconditionJacobi::new(&aa, 1.0);
        let src = DVector::from_vec(vec![3.0, 6.0, 9.0]);
        let mut dst = DVector::zeros(3);
        jacobi.vmult(&mut dst, &src);
        assert_eq!(dst.as_slice(), &[1.0, 2.0, 3.0]);

        // with ω = 1, SSOR applied to A x equals the symmetric Gauss-Seidel approximation of x
        let ssor = PreconditionSsor::new(&aa, 1.0);
        ssor.vmult(&mut dst, &src);
        assert!(dst.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn solve_cg_works() {
        let aa = system(4, 0.0);
        let n = aa.dim();
        let x_correct = DVector::from_iterator(n, (0..n).map(|i| (i as f64) * 0.5 - 1.0));
        let mut bb = DVector::zeros(n);
        aa.vmult(&mut bb, &x_correct);
        let mut x = DVector::zeros(n);
        let ssor = PreconditionSsor::new(&aa, 1.2);
        let control = SolverControl::new(1e-12, 1000, n);
        let it = solve_cg(&aa, &mut x, &bb, &ssor, &control).unwrap();
        assert!(it > 0);
        for i in 0..n {
            assert_relative_eq!(x[i], x_correct[i], epsilon = 1e-9);
        }

        // zero right-hand side
        let zero = DVector::zeros(n);
        assert_eq!(solve_cg(&aa, &mut x, &zero, &ssor, &control).unwrap(), 0);
        assert_eq!(x.norm(), 0.0);
    }

    #[test]
    fn solve_bicgstab_works() {
        let aa = system(4, 0.4);
        let n = aa.dim();
        let x_correct = DVector::from_iterator(n, (0..n).map(|i| f64::sin(i as f64)));
        let mut bb = DVector::zeros(n);
        aa.vmult(&mut bb, &x_correct);
        let mut x = DVector::zeros(n);
        let jacobi = PreconditionJacobi::new(&aa, 1.0);
        let control = SolverControl::new(1e-12, 1000, n);
        solve_bicgstab(&aa, &mut x, &bb, &jacobi, &control).unwrap();
        for i in 0..n {
            assert_relative_eq!(x[i], x_correct[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn solvers_report_non_convergence() {
        let aa = system(4, 0.0);
        let n = aa.dim();
        let bb = DVector::from_element(n, 1.0);
        let mut x = DVector::zeros(n);
        let jacobi = PreconditionJacobi::new(&aa, 1.0);
        let control = SolverControl {
            tolerance: 1e-14,
            max_iterations: 1,
        };
        assert!(solve_cg(&aa, &mut x, &bb, &jacobi, &control).is_err());
    }
}
