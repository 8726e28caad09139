/// Defines the quadrature rules on the unit interval (tensorized in 2D)
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quadrature {
    /// One-point Gauss rule
    Gauss1,

    /// Two-point Gauss rule
    Gauss2,

    /// Trapezoidal rule (integration points at the vertices; yields lumped mass matrices)
    Trapezoidal,
}

impl Quadrature {
    /// Returns the points and weights on [0, 1]
    pub fn rule_1d(&self) -> (Vec<f64>, Vec<f64>) {
        match self {
            Quadrature::Gauss1 => (vec![0.5], vec![1.0]),
            Quadrature::Gauss2 => {
                let d = 0.5 / f64::sqrt(3.0);
                (vec![0.5 - d, 0.5 + d], vec![0.5, 0.5])
            }
            Quadrature::Trapezoidal => (vec![0.0, 1.0], vec![0.5, 0.5]),
        }
    }
}

/// Returns the number of Q1 shape functions (cell vertices)
#[inline]
pub fn n_shape(dim: usize) -> usize {
    1 << dim
}

/// Evaluates the Q1 shape functions at the reference coordinates ξ ∈ [0,1]^dim
///
/// The local numbering is `v = a + 2 b` where `a` and `b` indicate the lower (0) or upper (1)
/// vertex along the first and second axes.
pub fn shape_values(dim: usize, xi: &[f64; 2], nn: &mut [f64]) {
    let f = |a: usize, s: f64| if a == 0 { 1.0 - s } else { s };
    if dim == 1 {
        nn[0] = f(0, xi[0]);
        nn[1] = f(1, xi[0]);
    } else {
        for v in 0..4 {
            nn[v] = f(v % 2, xi[0]) * f(v / 2, xi[1]);
        }
    }
}

/// Evaluates the derivatives of the Q1 shape functions with respect to ξ
pub fn shape_gradients_ref(dim: usize, xi: &[f64; 2], gg: &mut [[f64; 2]]) {
    let f = |a: usize, s: f64| if a == 0 { 1.0 - s } else { s };
    let df = |a: usize| if a == 0 { -1.0 } else { 1.0 };
    if dim == 1 {
        gg[0] = [df(0), 0.0];
        gg[1] = [df(1), 0.0];
    } else {
        for v in 0..4 {
            let (a, b) = (v % 2, v / 2);
            gg[v] = [df(a) * f(b, xi[1]), f(a, xi[0]) * df(b)];
        }
    }
}

/// Holds the shape functions, gradients, and integration weights at the points of a cell
///
/// Cells are axis-aligned hyper-cubes; thus, only the side length is required by `reinit`.
pub struct CellValues {
    dim: usize,
    ref_gradients: Vec<Vec<[f64; 2]>>,
    ref_weights: Vec<f64>,

    /// Shape function values (npoint × nnode)
    pub values: Vec<Vec<f64>>,

    /// Shape function gradients in real coordinates (npoint × nnode)
    pub gradients: Vec<Vec<[f64; 2]>>,

    /// Integration weights times the Jacobian determinant (npoint)
    pub jxw: Vec<f64>,
}

impl CellValues {
    /// Allocates a new instance
    pub fn new(dim: usize, quadrature: Quadrature) -> Self {
        let (pts, wts) = quadrature.rule_1d();
        let nnode = n_shape(dim);
        let mut points = Vec::new();
        let mut ref_weights = Vec::new();
        if dim == 1 {
            for (p, w) in pts.iter().zip(&wts) {
                points.push([*p, 0.0]);
                ref_weights.push(*w);
            }
        } else {
            for (py, wy) in pts.iter().zip(&wts) {
                for (px, wx) in pts.iter().zip(&wts) {
                    points.push([*px, *py]);
                    ref_weights.push(wx * wy);
                }
            }
        }
        let mut values = vec![vec![0.0; nnode]; points.len()];
        let mut ref_gradients = vec![vec![[0.0; 2]; nnode]; points.len()];
        for (q, xi) in points.iter().enumerate() {
            shape_values(dim, xi, &mut values[q]);
            shape_gradients_ref(dim, xi, &mut ref_gradients[q]);
        }
        CellValues {
            dim,
            gradients: ref_gradients.clone(),
            ref_gradients,
            jxw: ref_weights.clone(),
            ref_weights,
            values,
        }
    }

    /// Updates the gradients and weights for a cell with side length `side`
    pub fn reinit(&mut self, side: f64) {
        let det = f64::powi(side, self.dim as i32);
        for q in 0..self.values.len() {
            self.jxw[q] = self.ref_weights[q] * det;
            for m in 0..self.values[q].len() {
                let g = self.ref_gradients[q][m];
                self.gradients[q][m] = [g[0] / side, g[1] / side];
            }
        }
    }

    /// Returns the number of integration points
    pub fn n_points(&self) -> usize {
        self.values.len()
    }
}

/// Holds the shape functions, gradients, and integration weights at the points of a cell face
///
/// Faces are numbered as `2 axis + side`, e.g., in 2D: 0 = left, 1 = right, 2 = bottom, 3 = top.
pub struct FaceValues {
    dim: usize,
    ref_values: Vec<Vec<Vec<f64>>>,
    ref_gradients: Vec<Vec<Vec<[f64; 2]>>>,
    ref_weights: Vec<f64>,
    face: usize,

    /// Shape function values (npoint × nnode)
    pub values: Vec<Vec<f64>>,

    /// Shape function gradients in real coordinates (npoint × nnode)
    pub gradients: Vec<Vec<[f64; 2]>>,

    /// Integration weights times the Jacobian determinant (npoint)
    pub jxw: Vec<f64>,

    /// Outward unit normal
    pub normal: [f64; 2],
}

impl FaceValues {
    /// Allocates a new instance
    pub fn new(dim: usize, quadrature: Quadrature) -> Self {
        let (pts, wts) = quadrature.rule_1d();
        let nnode = n_shape(dim);
        let (face_pts, ref_weights) = if dim == 1 { (vec![0.0], vec![1.0]) } else { (pts, wts) };
        let mut ref_values = Vec::new();
        let mut ref_gradients = Vec::new();
        for face in 0..2 * dim {
            let (axis, side) = (face / 2, (face % 2) as f64);
            let mut vv = vec![vec![0.0; nnode]; face_pts.len()];
            let mut gg = vec![vec![[0.0; 2]; nnode]; face_pts.len()];
            for (q, s) in face_pts.iter().enumerate() {
                let xi = if axis == 0 { [side, *s] } else { [*s, side] };
                shape_values(dim, &xi, &mut vv[q]);
                shape_gradients_ref(dim, &xi, &mut gg[q]);
            }
            ref_values.push(vv);
            ref_gradients.push(gg);
        }
        let npoint = ref_weights.len();
        FaceValues {
            dim,
            values: ref_values[0].clone(),
            gradients: ref_gradients[0].clone(),
            ref_values,
            ref_gradients,
            jxw: vec![0.0; npoint],
            ref_weights,
            face: 0,
            normal: [0.0; 2],
        }
    }

    /// Updates the data for a face of a cell with side length `side`
    pub fn reinit(&mut self, face: usize, side: f64) {
        self.face = face;
        let det = f64::powi(side, self.dim as i32 - 1);
        for q in 0..self.ref_weights.len() {
            self.jxw[q] = self.ref_weights[q] * det;
            self.values[q].copy_from_slice(&self.ref_values[face][q]);
            for m in 0..self.values[q].len() {
                let g = self.ref_gradients[face][q][m];
                self.gradients[q][m] = [g[0] / side, g[1] / side];
            }
        }
        let (axis, side_flag) = (face / 2, face % 2);
        self.normal = [0.0; 2];
        self.normal[axis] = if side_flag == 0 { -1.0 } else { 1.0 };
    }

    /// Returns the number of integration points
    pub fn n_points(&self) -> usize {
        self.ref_weights.len()
    }

    /// Returns the current face index
    pub fn face(&self) -> usize {
        self.face
    }
}

/// Computes the dot product of two (padded) vectors in dim-space
#[inline]
pub fn dot(dim: usize, a: &[f64; 2], b: &[f64; 2]) -> f64 {
    if dim == 1 {
        a[0] * b[0]
    } else {
        a[0] * b[0] + a[1] * b[1]
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
