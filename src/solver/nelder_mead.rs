use super::{sanitize, Minimum, Solver, SolverError, SolverKind};
use crate::config::LocalSolverConfig;

// Reflection, expansion, contraction and shrink coefficients.
const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

// Initial simplex: nonzero coordinates are stretched by 5%, zero ones
// are nudged by a small absolute step.
const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

/// The downhill simplex method.
///
/// Converges when every vertex is within `xatol` of the best vertex in every
/// coordinate and every vertex value is within `fatol` of the best value.
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    pub max_iterations: usize,
    pub xatol: f64,
    pub fatol: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self::from(&LocalSolverConfig::default())
    }
}

impl From<&LocalSolverConfig> for NelderMead {
    fn from(config: &LocalSolverConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            xatol: config.xatol,
            fatol: config.fatol,
        }
    }
}

impl NelderMead {
    fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = vec![x0.to_vec()];
        for k in 0..x0.len() {
            let mut vertex = x0.to_vec();
            if vertex[k] != 0.0 {
                vertex[k] *= 1.0 + NONZERO_DELTA;
            } else {
                vertex[k] = ZERO_DELTA;
            }
            simplex.push(vertex);
        }
        simplex
    }

    fn has_converged(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        let best = &simplex[0];
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|f| (f - values[0]).abs())
            .fold(0.0, f64::max);
        x_spread <= self.xatol && f_spread <= self.fatol
    }
}

/// `(1 + t) * a - t * b`, the point at parameter `t` on the ray from `b`
/// through `a`.
fn along(a: &[f64], b: &[f64], t: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(a, b)| (1.0 + t) * a - t * b).collect()
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

impl Solver for NelderMead {
    fn kind(&self) -> SolverKind {
        SolverKind::Local
    }

    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
    ) -> Result<Minimum, SolverError> {
        let n = initial.len();
        if n == 0 {
            return Err(SolverError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }

        let mut evaluations = 0;
        let mut eval = |x: &[f64]| {
            evaluations += 1;
            sanitize(objective(x))
        };

        let mut simplex = Self::initial_simplex(initial);
        let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();
        sort_simplex(&mut simplex, &mut values);

        let mut iterations = 1;
        let mut converged = false;
        while iterations < self.max_iterations {
            if self.has_converged(&simplex, &values) {
                converged = true;
                break;
            }

            let centroid: Vec<f64> = (0..n)
                .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
                .collect();
            let worst = simplex[n].clone();

            let reflected = along(&centroid, &worst, RHO);
            let f_reflected = eval(&reflected);
            let mut shrink = false;

            if f_reflected < values[0] {
                let expanded = along(&centroid, &worst, RHO * CHI);
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
            } else if f_reflected < values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
            } else if f_reflected < values[n] {
                let contracted = along(&centroid, &worst, PSI * RHO);
                let f_contracted = eval(&contracted);
                if f_contracted <= f_reflected {
                    simplex[n] = contracted;
                    values[n] = f_contracted;
                } else {
                    shrink = true;
                }
            } else {
                let contracted = along(&centroid, &worst, -PSI);
                let f_contracted = eval(&contracted);
                if f_contracted < values[n] {
                    simplex[n] = contracted;
                    values[n] = f_contracted;
                } else {
                    shrink = true;
                }
            }

            if shrink {
                let best = simplex[0].clone();
                for j in 1..=n {
                    simplex[j] = best
                        .iter()
                        .zip(&simplex[j])
                        .map(|(b, v)| b + SIGMA * (v - b))
                        .collect();
                    values[j] = eval(&simplex[j]);
                }
            }

            iterations += 1;
            sort_simplex(&mut simplex, &mut values);
        }

        Ok(Minimum {
            params: simplex.swap_remove(0),
            value: values[0],
            converged,
            iterations,
            evaluations,
            kind: SolverKind::Local,
        })
    }
}
