/// Levenberg-Marquardt isotropic 2D Gaussian fitting (5-param).
/// All internal computations in f64 for numerical stability.

const MAX_ITER: usize = 30;
const CONV_TOL: f64 = 1e-7;
const NP: usize = 5;

/// Isotropic model: f(x,y) = B + A * exp(-0.5 * ((x-x0)^2 + (y-y0)^2) / s^2)
/// Params: [B, A, x0, y0, s]
pub(crate) struct PointSourceFit {
    pub background: f64,
    pub amplitude: f64,
    pub x0: f64,
    pub y0: f64,
    pub sigma: f64,
    pub converged: bool,
}

/// Pixel coordinate + value for fitting.
pub(crate) struct PixelSample {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Fit an isotropic 2D Gaussian to a source window. Returns `None` when the
/// window is too small or the solution collapses below a credible width.
pub(crate) fn fit_point_source(
    pixels: &[PixelSample],
    init_b: f64,
    init_a: f64,
    init_x0: f64,
    init_y0: f64,
    init_sigma: f64,
) -> Option<PointSourceFit> {
    if pixels.len() < 2 * NP {
        return None;
    }

    let mut params = [init_b, init_a, init_x0, init_y0, init_sigma.max(0.5)];
    let converged = lm_solve(pixels, &mut params);

    let sigma = params[4].abs();
    if sigma < 0.3 || params[1] <= 0.0 {
        return None;
    }

    Some(PointSourceFit {
        background: params[0],
        amplitude: params[1],
        x0: params[2],
        y0: params[3],
        sigma,
        converged,
    })
}

fn lm_solve(pixels: &[PixelSample], params: &mut [f64; NP]) -> bool {
    let mut lambda = 1e-3_f64;
    let mut nu = 2.0_f64;
    let mut best_cost = residual_cost(pixels, params);
    let mut converged = false;

    // Scratch space for normal equations
    let mut jtj = [0.0_f64; NP * NP];
    let mut jtr = [0.0_f64; NP];
    let mut j = [0.0_f64; NP];
    let mut mat = [0.0_f64; NP * NP];

    for _ in 0..MAX_ITER {
        jtj.fill(0.0);
        jtr.fill(0.0);

        let s = params[4];
        let inv_s2 = 1.0 / (s * s);

        for px in pixels {
            let dx = px.x - params[2];
            let dy = px.y - params[3];
            let e = (-0.5 * (dx * dx + dy * dy) * inv_s2).exp();
            let model = params[0] + params[1] * e;
            let r = px.value - model;

            // Jacobian
            j[0] = 1.0; // dF/dB
            j[1] = e; // dF/dA
            j[2] = params[1] * e * dx * inv_s2; // dF/dx0
            j[3] = params[1] * e * dy * inv_s2; // dF/dy0
            j[4] = params[1] * e * (dx * dx + dy * dy) / (s * s * s); // dF/ds

            for p in 0..NP {
                jtr[p] += j[p] * r;
                for q in p..NP {
                    jtj[p * NP + q] += j[p] * j[q];
                }
            }
        }

        // Fill symmetric lower triangle
        for p in 0..NP {
            for q in 0..p {
                jtj[p * NP + q] = jtj[q * NP + p];
            }
        }

        // Damped normal equations
        mat.copy_from_slice(&jtj);
        for p in 0..NP {
            mat[p * NP + p] += lambda * jtj[p * NP + p].max(1e-12);
        }

        let delta = match cholesky_solve(&mat, &jtr, NP) {
            Some(d) => d,
            None => break,
        };

        let mut new_params = *params;
        for p in 0..NP {
            new_params[p] += delta[p];
        }
        // Keep the width positive
        if new_params[4] <= 0.0 {
            new_params[4] = params[4] * 0.5;
        }

        let new_cost = residual_cost(pixels, &new_params);

        // Nielsen gain ratio
        let predicted: f64 = delta
            .iter()
            .enumerate()
            .map(|(i, d)| d * (lambda * jtj[i * NP + i].max(1e-12) * d + jtr[i]))
            .sum();

        if predicted > 0.0 {
            let rho = (best_cost - new_cost) / predicted;
            if rho > 0.0 {
                *params = new_params;
                best_cost = new_cost;
                lambda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                nu = 2.0;
            } else {
                lambda *= nu;
                nu *= 2.0;
            }
        } else {
            lambda *= nu;
            nu *= 2.0;
        }

        // Convergence
        let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
        let delta_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        if delta_norm / param_norm.max(1e-12) < CONV_TOL {
            converged = true;
            break;
        }
    }

    converged
}

fn residual_cost(pixels: &[PixelSample], params: &[f64; NP]) -> f64 {
    let inv_s2 = 1.0 / (params[4] * params[4]);
    pixels
        .iter()
        .map(|px| {
            let dx = px.x - params[2];
            let dy = px.y - params[3];
            let model = params[0] + params[1] * (-0.5 * (dx * dx + dy * dy) * inv_s2).exp();
            let r = px.value - model;
            r * r
        })
        .sum()
}

/// Cholesky decomposition solver for symmetric positive-definite system.
/// Matrix stored as flat array, row-major, size np×np.
fn cholesky_solve(mat: &[f64], rhs: &[f64], np: usize) -> Option<Vec<f64>> {
    // Cholesky: A = L * L^T
    let mut l = vec![0.0_f64; np * np];

    for i in 0..np {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i * np + k] * l[j * np + k];
            }
            if i == j {
                let diag = mat[i * np + i] - sum;
                if diag <= 0.0 {
                    return None; // Not positive definite
                }
                l[i * np + j] = diag.sqrt();
            } else {
                l[i * np + j] = (mat[i * np + j] - sum) / l[j * np + j];
            }
        }
    }

    // Solve L * y = rhs (forward substitution)
    let mut y = vec![0.0_f64; np];
    for i in 0..np {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[i * np + j] * y[j];
        }
        y[i] = (rhs[i] - sum) / l[i * np + i];
    }

    // Solve L^T * x = y (back substitution)
    let mut x = vec![0.0_f64; np];
    for i in (0..np).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..np {
            sum += l[j * np + i] * x[j]; // L^T[i][j] = L[j][i]
        }
        x[i] = (y[i] - sum) / l[i * np + i];
    }

    Some(x)
}
