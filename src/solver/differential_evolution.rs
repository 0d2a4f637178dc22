use super::{sanitize, Minimum, NelderMead, Solver, SolverError, SolverKind};
use crate::config::GlobalSolverConfig;

use log::debug;
use rand::{prelude::*, rngs::StdRng};
use std::cell::Cell;

/// Differential evolution (`best/1/bin`) inside box bounds.
///
/// The population is seeded from a latin hypercube and every random draw
/// comes from one [StdRng] seeded with `seed`, so two runs over the same
/// objective give the same answer. The search stops once the spread of the
/// population's objective values falls under `atol + tol * |mean|`.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferentialEvolution {
    pub bounds: Vec<(f64, f64)>,
    pub seed: u64,
    pub popsize: usize,
    pub max_generations: usize,
    pub tol: f64,
    pub atol: f64,
    pub mutation: (f64, f64),
    pub recombination: f64,
    /// Local solver used to polish the best member, if any.
    pub polish: Option<NelderMead>,
}

impl Default for DifferentialEvolution {
    fn default() -> Self {
        Self::from(&GlobalSolverConfig::default())
    }
}

impl From<&GlobalSolverConfig> for DifferentialEvolution {
    fn from(config: &GlobalSolverConfig) -> Self {
        Self {
            bounds: config.bounds.clone(),
            seed: config.seed,
            popsize: config.popsize,
            max_generations: config.max_generations,
            tol: config.tol,
            atol: config.atol,
            mutation: config.mutation,
            recombination: config.recombination,
            polish: config.polish.then(NelderMead::default),
        }
    }
}

impl DifferentialEvolution {
    fn check_bounds(&self) -> Result<(), SolverError> {
        if self.bounds.is_empty() {
            return Err(SolverError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }
        for (index, &(low, high)) in self.bounds.iter().enumerate() {
            if !(low.is_finite() && high.is_finite() && low < high) {
                return Err(SolverError::InvalidBounds { index, low, high });
            }
        }
        Ok(())
    }

    fn in_bounds(&self, x: &[f64]) -> bool {
        x.iter()
            .zip(&self.bounds)
            .all(|(v, (low, high))| (*low..=*high).contains(v))
    }

    /// One member per stratum in every dimension, strata shuffled
    /// independently per dimension.
    fn latin_hypercube(&self, size: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut population = vec![vec![0.0; self.bounds.len()]; size];
        for (j, &(low, high)) in self.bounds.iter().enumerate() {
            let mut strata: Vec<usize> = (0..size).collect();
            strata.shuffle(rng);
            for (member, stratum) in population.iter_mut().zip(strata) {
                let unit = (stratum as f64 + rng.gen::<f64>()) / size as f64;
                member[j] = low + unit * (high - low);
            }
        }
        population
    }
}

fn pick_other(rng: &mut StdRng, size: usize, exclude: &[usize]) -> usize {
    loop {
        let r = rng.gen_range(0..size);
        if !exclude.contains(&r) {
            return r;
        }
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

impl Solver for DifferentialEvolution {
    fn kind(&self) -> SolverKind {
        SolverKind::Global
    }

    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
    ) -> Result<Minimum, SolverError> {
        self.check_bounds()?;
        let n = self.bounds.len();
        // The start is only used to learn the problem's dimension.
        if !initial.is_empty() && initial.len() != n {
            return Err(SolverError::DimensionMismatch {
                expected: initial.len(),
                got: n,
            });
        }
        let size = (self.popsize * n).max(5);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let evaluations = Cell::new(0);
        let eval = |x: &[f64]| {
            evaluations.set(evaluations.get() + 1);
            sanitize(objective(x))
        };

        let mut population = self.latin_hypercube(size, &mut rng);
        let mut energies: Vec<f64> = population.iter().map(|m| eval(m)).collect();
        let mut best = (0..size)
            .min_by(|&a, &b| energies[a].total_cmp(&energies[b]))
            .unwrap_or(0);

        let mut generations = 0;
        let mut converged = false;
        while generations < self.max_generations {
            generations += 1;
            let (f_low, f_high) = self.mutation;
            let weight = if f_high > f_low {
                rng.gen_range(f_low..f_high)
            } else {
                f_low
            };

            for i in 0..size {
                let r1 = pick_other(&mut rng, size, &[i]);
                let r2 = pick_other(&mut rng, size, &[i, r1]);
                let forced = rng.gen_range(0..n);

                let mut trial = population[i].clone();
                for j in 0..n {
                    if j == forced || rng.gen::<f64>() < self.recombination {
                        trial[j] = population[best][j]
                            + weight * (population[r1][j] - population[r2][j]);
                    }
                    let (low, high) = self.bounds[j];
                    if !(low..=high).contains(&trial[j]) {
                        trial[j] = rng.gen_range(low..high);
                    }
                }

                let energy = eval(&trial);
                if energy <= energies[i] {
                    population[i] = trial;
                    energies[i] = energy;
                    if energy < energies[best] {
                        best = i;
                    }
                }
            }

            let (mean, std) = mean_and_std(&energies);
            if std <= self.atol + self.tol * mean.abs() {
                converged = true;
                break;
            }
        }
        debug!(
            "differential evolution: {} generations, best {:.3e}, converged {}",
            generations, energies[best], converged
        );

        let mut params = population.swap_remove(best);
        let mut value = energies[best];

        if let Some(local) = &self.polish {
            let polished = local.minimize(&eval, &params)?;
            if polished.value < value && self.in_bounds(&polished.params) {
                params = polished.params;
                value = polished.value;
            }
        }

        Ok(Minimum {
            params,
            value,
            converged,
            iterations: generations,
            evaluations: evaluations.get(),
            kind: SolverKind::Global,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::tests::{bowl, rosenbrock};

    /// Two wells, the deeper one near x = -1.04.
    fn double_well(p: &[f64]) -> f64 {
        (p[0] * p[0] - 1.0).powi(2) + 0.3 * p[0]
    }

    #[test]
    fn finds_bowl_minimum() {
        let min = DifferentialEvolution::default().minimize(&bowl, &[]).unwrap();
        assert!(min.converged);
        assert_eq!(min.kind, SolverKind::Global);
        assert!((min.params[0] - 1.0).abs() < 1e-4);
        assert!((min.params[1] + 2.0).abs() < 1e-4);
        assert!((min.params[2] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn escapes_local_minima() {
        let solver = DifferentialEvolution {
            bounds: vec![(-2.0, 2.0)],
            ..DifferentialEvolution::default()
        };
        // a local solver started on the right falls into the shallow well
        let local = NelderMead::default().minimize(&double_well, &[1.5]).unwrap();
        assert!(local.params[0] > 0.0);

        let min = solver.minimize(&double_well, &[1.5]).unwrap();
        assert!(min.params[0] < -1.0, "{:?}", min);
        assert!(min.value < local.value);
    }

    #[test]
    fn same_seed_same_answer() {
        let solver = DifferentialEvolution {
            bounds: vec![(-2.0, 2.0); 2],
            ..DifferentialEvolution::default()
        };
        let a = solver.minimize(&rosenbrock, &[]).unwrap();
        let b = solver.minimize(&rosenbrock, &[]).unwrap();
        assert_eq!(a, b);

        let other_seed = DifferentialEvolution { seed: 7, ..solver };
        let c = other_seed.minimize(&rosenbrock, &[]).unwrap();
        assert!(c.value < 1e-8);
    }

    #[test]
    fn stays_inside_bounds() {
        // unconstrained minimum at (1, -2, 0.5) is outside these bounds
        let solver = DifferentialEvolution {
            bounds: vec![(2.0, 3.0), (-1.0, 1.0), (0.0, 1.0)],
            ..DifferentialEvolution::default()
        };
        let min = solver.minimize(&bowl, &[]).unwrap();
        assert!(solver.in_bounds(&min.params));
        assert!((min.params[0] - 2.0).abs() < 1e-2);
        assert!((min.params[1] + 1.0).abs() < 1e-2);
    }

    #[test]
    fn bounds_must_match_the_start() {
        let solver = DifferentialEvolution {
            bounds: vec![(-5.0, 5.0); 2],
            ..DifferentialEvolution::default()
        };
        assert_eq!(
            solver.minimize(&bowl, &[0.0, 0.0, 0.0]).unwrap_err(),
            SolverError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn rejects_bad_bounds() {
        let solver = DifferentialEvolution {
            bounds: vec![(1.0, -1.0)],
            ..DifferentialEvolution::default()
        };
        assert_eq!(
            solver.minimize(&bowl, &[]).unwrap_err(),
            SolverError::InvalidBounds {
                index: 0,
                low: 1.0,
                high: -1.0
            }
        );
    }
}
