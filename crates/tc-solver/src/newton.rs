//! Damped Newton solver.
//!
//! Residuals handed to the solver are expected to be scaled by their
//! absolute tolerances, so a residual norm of one means "at tolerance".

use crate::error::{SolverError, SolverResult};
use crate::method::Damping;
use nalgebra::{DMatrix, DVector};

/// Newton solver configuration.
#[derive(Clone, Debug)]
pub struct NewtonConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Scaled residual norm accepted outright
    pub abs_tol: f64,
    /// Relative update size accepted together with a relaxed residual
    pub rel_tol: f64,
    /// Relaxation factor applied to `abs_tol` when the update is converged
    pub relax: f64,
    /// Damping of the Newton update
    pub damping: Damping,
    /// Largest potential change per iteration (V) for potential damping
    pub potential_update: f64,
    /// Residual growth relative to the initial residual treated as divergence
    pub divergence_factor: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            abs_tol: 1.0,
            rel_tol: 1e-5,
            relax: 1e5,
            damping: Damping::Potential,
            potential_update: 1.0,
            divergence_factor: 1e20,
            line_search_beta: 0.5,
            max_line_search_iters: 20,
        }
    }
}

/// Newton iteration result.
#[derive(Clone, Debug)]
pub struct NewtonResult {
    /// Solution vector
    pub x: DVector<f64>,
    /// Final scaled residual norm
    pub residual_norm: f64,
    /// Number of iterations
    pub iterations: usize,
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// Apply potential damping to the raw update of the first `n_potential`
/// unknowns.
fn damp(dx: &mut DVector<f64>, n_potential: usize, config: &NewtonConfig) {
    let limit = config.potential_update;
    if limit <= 0.0 {
        return;
    }
    match config.damping {
        Damping::No | Damping::BankRose => {}
        Damping::Potential => {
            let largest = dx.iter().take(n_potential).fold(0.0f64, |m, v| m.max(v.abs()));
            if largest > limit {
                *dx *= limit / largest;
            }
        }
        Damping::SuperPotential => {
            for v in dx.iter_mut().take(n_potential) {
                *v = v.signum() * limit * (1.0 + v.abs() / limit).ln();
            }
        }
    }
}

/// Newton solver with damping and backtracking.
///
/// The first `n_potential` unknowns are potentials and are subject to the
/// configured damping; Bank-Rose damping backtracks on the residual norm
/// instead.
pub fn newton_solve<F, J>(
    x0: DVector<f64>,
    n_potential: usize,
    residual_fn: F,
    jacobian_fn: J,
    config: &NewtonConfig,
    mut on_iteration: impl FnMut(usize, f64),
) -> SolverResult<NewtonResult>
where
    F: Fn(&DVector<f64>) -> SolverResult<DVector<f64>>,
    J: Fn(&DVector<f64>) -> SolverResult<DMatrix<f64>>,
{
    let mut x = x0;
    let mut r = residual_fn(&x)?;
    let mut r_norm = inf_norm(&r);
    let r0_norm = r_norm.max(config.abs_tol);

    if r_norm <= config.abs_tol {
        return Ok(NewtonResult {
            x,
            residual_norm: r_norm,
            iterations: 0,
        });
    }

    for iter in 1..=config.max_iterations {
        let jac = jacobian_fn(&x)?;

        // Solve J * dx = -r
        let mut dx = jac.lu().solve(&(-r.clone())).ok_or_else(|| SolverError::Numeric {
            what: "Jacobian solve failed".to_string(),
        })?;
        if dx.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::Numeric {
                what: format!("non-finite Newton update at iteration {iter}"),
            });
        }
        damp(&mut dx, n_potential, config);

        let mut alpha = 1.0;
        let mut x_new = &x + &dx;
        let mut r_new = residual_fn(&x_new)?;
        let mut r_new_norm = inf_norm(&r_new);

        if config.damping == Damping::BankRose {
            for _ in 0..config.max_line_search_iters {
                if r_new_norm.is_finite() && r_new_norm < r_norm {
                    break;
                }
                alpha *= config.line_search_beta;
                x_new = &x + alpha * &dx;
                r_new = residual_fn(&x_new)?;
                r_new_norm = inf_norm(&r_new);
            }
            if alpha < 1e-10 {
                return Err(SolverError::ConvergenceFailed {
                    what: format!("line search stagnated at iteration {iter}"),
                });
            }
        }

        let update = alpha * inf_norm(&dx);
        let scale = 1.0 + inf_norm(&x_new);
        x = x_new;
        r = r_new;
        r_norm = r_new_norm;
        on_iteration(iter, r_norm);

        if !r_norm.is_finite() || r_norm > config.divergence_factor * r0_norm {
            return Err(SolverError::ConvergenceFailed {
                what: format!("residual diverged at iteration {iter} (norm {r_norm:e})"),
            });
        }
        let update_converged = update <= config.rel_tol * scale;
        if r_norm <= config.abs_tol || (update_converged && r_norm <= config.abs_tol * config.relax) {
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter,
            });
        }
    }

    Err(SolverError::ConvergenceFailed {
        what: format!(
            "maximum iterations {} reached, residual = {r_norm:e}",
            config.max_iterations
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: &DVector<f64>) -> SolverResult<DVector<f64>> {
        Ok(DVector::from_element(1, (x[0] * x[0] - 4.0) * 1e6))
    }

    fn quadratic_jac(x: &DVector<f64>) -> SolverResult<DMatrix<f64>> {
        Ok(DMatrix::from_element(1, 1, 2.0 * x[0] * 1e6))
    }

    #[test]
    fn simple_quadratic() {
        let config = NewtonConfig {
            damping: Damping::No,
            ..NewtonConfig::default()
        };
        let result = newton_solve(DVector::from_element(1, 3.0), 1, quadratic, quadratic_jac, &config, |_, _| {})
            .unwrap();
        assert!((result.x[0] - 2.0).abs() < 1e-6);
        assert!(result.iterations > 0);
    }

    #[test]
    fn potential_damping_limits_each_step() {
        let config = NewtonConfig {
            potential_update: 0.1,
            ..NewtonConfig::default()
        };
        let mut seen = Vec::new();
        let result = newton_solve(
            DVector::from_element(1, 3.0),
            1,
            quadratic,
            quadratic_jac,
            &config,
            |i, _| seen.push(i),
        )
        .unwrap();
        assert!((result.x[0] - 2.0).abs() < 1e-6);
        // an undamped start converges in a handful of steps; 0.1 V steps
        // need at least ten to cover the distance
        assert!(seen.len() >= 10);
    }

    #[test]
    fn bank_rose_backtracks() {
        // atan has a tiny basin for full Newton steps
        let f = |x: &DVector<f64>| Ok(DVector::from_element(1, x[0].atan() * 1e8));
        let j = |x: &DVector<f64>| Ok(DMatrix::from_element(1, 1, 1e8 / (1.0 + x[0] * x[0])));
        let config = NewtonConfig {
            damping: Damping::BankRose,
            max_iterations: 60,
            ..NewtonConfig::default()
        };
        let result = newton_solve(DVector::from_element(1, 3.0), 1, f, j, &config, |_, _| {}).unwrap();
        assert!(result.x[0].abs() < 1e-6);

        let plain = NewtonConfig {
            damping: Damping::No,
            ..NewtonConfig::default()
        };
        assert!(newton_solve(DVector::from_element(1, 3.0), 1, f, j, &plain, |_, _| {}).is_err());
    }

    #[test]
    fn iteration_limit_is_a_convergence_failure() {
        let config = NewtonConfig {
            max_iterations: 2,
            potential_update: 0.01,
            ..NewtonConfig::default()
        };
        let err = newton_solve(DVector::from_element(1, 3.0), 1, quadratic, quadratic_jac, &config, |_, _| {})
            .unwrap_err();
        assert!(err.is_convergence_failure());
    }
}
