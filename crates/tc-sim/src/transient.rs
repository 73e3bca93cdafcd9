//! Transient integration with BDF1/BDF2 and local-truncation-error step
//! control.

use crate::config::TransientConfig;
use crate::engine::Run;
use crate::error::SimResult;
use tc_core::units::raw;
use tc_results::SweepValue;
use tc_solver::Dynamics;
use tracing::{debug, info, warn};

/// Hard bound on attempted steps of one transient.
const MAX_STEPS: usize = 1_000_000;

/// Backward-difference approximation of `dx/dt` at the new point, written
/// as `a0·x + history`. BDF2 uses the variable-step coefficients.
pub(crate) fn bdf_dynamics(order: usize, h: f64, h_prev: Option<f64>, x_n: &[f64], x_nm1: Option<&[f64]>) -> Dynamics {
    match (order, h_prev, x_nm1) {
        (2, Some(hp), Some(x_nm1)) => {
            let w = h / hp;
            let a0 = (1.0 + 2.0 * w) / ((1.0 + w) * h);
            let c_n = -(1.0 + w) / h;
            let c_nm1 = w * w / ((1.0 + w) * h);
            let history = x_n.iter().zip(x_nm1).map(|(a, b)| c_n * a + c_nm1 * b).collect();
            Dynamics {
                a0,
                history,
                pseudo_capacitance: 0.0,
            }
        }
        _ => Dynamics {
            a0: 1.0 / h,
            history: x_n.iter().map(|v| -v / h).collect(),
            pseudo_capacitance: 0.0,
        },
    }
}

/// Linear extrapolation of the unknowns to `t_n + h`.
fn extrapolate(x_n: &[f64], x_nm1: &[f64], h: f64, h_prev: f64) -> Vec<f64> {
    let f = h / h_prev;
    x_n.iter().zip(x_nm1).map(|(a, b)| a + (a - b) * f).collect()
}

/// Weighted predictor-corrector distance; one is at tolerance.
fn truncation_error(order: usize, x: &[f64], predicted: &[f64], rtol: f64, atol: f64) -> f64 {
    let constant = 1.0 / (order as f64 + 1.0);
    x.iter()
        .zip(predicted)
        .map(|(a, p)| constant * (a - p).abs() / (atol + rtol * a.abs()))
        .fold(0.0, f64::max)
}

/// Step scale after an error estimate of `err`.
fn step_factor(err: f64, order: usize) -> f64 {
    if err <= f64::EPSILON {
        return 2.0;
    }
    (0.9 * err.powf(-1.0 / (order as f64 + 1.0))).clamp(0.25, 2.0)
}

impl Run<'_, '_> {
    fn refresh_sources(&mut self, t: f64) -> SimResult<()> {
        if self.env.config.particle_gen {
            self.env.system.update_source(t)?;
            self.solver.refresh(self.env.system)?;
        }
        Ok(())
    }

    pub(crate) fn transient(&mut self, tran: &TransientConfig) -> SimResult<()> {
        let t0 = raw::seconds(tran.tstart);
        let t_stop = raw::seconds(tran.tstop);
        let tstep = raw::seconds(tran.tstep);
        let tstep_min = raw::seconds(tran.tstep_min);
        let tstep_max = raw::seconds(tran.tstep_max);
        let bound = |h: f64| if tstep_max > 0.0 { h.min(tstep_max) } else { h };
        let end_slack = 1e-12 * (t_stop - t0);

        self.refresh_sources(t0)?;
        let stored = if tran.uic || !tran.tran_op {
            self.stored_guess()?
        } else {
            None
        };
        let x0 = match stored {
            Some(x) => {
                debug!("transient starts from the stored operating point");
                x
            }
            None => {
                if tran.uic {
                    warn!("uic without a stored operating point, solving one at tstart");
                }
                self.pre_solve()?;
                let op = self.operating_point(&tran.op, t0)?;
                self.record(&op, Some(SweepValue { name: "time".to_string(), value: t0 }))?;
                op.unknowns
            }
        };

        let mut t = t0;
        let mut x_n = x0;
        let mut x_nm1: Option<Vec<f64>> = None;
        let mut h_prev: Option<f64> = None;
        let mut h = bound(tstep);
        let mut attempts = 0;

        while t_stop - t > end_slack {
            attempts += 1;
            if attempts > MAX_STEPS {
                return Err(self.diverged(format!("transient exceeded {MAX_STEPS} steps at t = {t:e}")));
            }
            h = bound(h).min(t_stop - t);
            let t_new = if t_stop - (t + h) <= end_slack { t_stop } else { t + h };
            let order = if x_nm1.is_some() { tran.scheme.order() } else { 1 };
            let dynamics = bdf_dynamics(order, h, h_prev, &x_n, x_nm1.as_deref());
            let predicted = match (&x_nm1, h_prev) {
                (Some(prev), Some(hp)) => Some(extrapolate(&x_n, prev, h, hp)),
                _ => None,
            };

            self.refresh_sources(t_new)?;
            self.pre_solve()?;
            let mut request = self.request(self.drives_at(t_new), t_new);
            request.guess = match (&predicted, tran.predict) {
                (Some(p), true) => Some(p.clone()),
                _ => Some(x_n.clone()),
            };
            request.dynamics = Some(dynamics);

            let outcome = match self.solve_point(&request) {
                Ok(o) => o,
                Err(e) if e.is_convergence_failure() => {
                    h *= 0.5;
                    self.summary.cutbacks += 1;
                    if h < tstep_min {
                        return Err(self.diverged(format!(
                            "transient did not converge at t = {t_new:e}: step cut below tstepmin = {tstep_min:e}"
                        )));
                    }
                    debug!(t, step = h, "transient cutback");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let next = if tran.autostep {
                match &predicted {
                    Some(p) => {
                        let err = truncation_error(order, &outcome.unknowns, p, tran.rtol, tran.atol);
                        if err > 1.0 && tran.rejectstep && h > tstep_min {
                            self.summary.rejected_steps += 1;
                            h = (h * step_factor(err, order)).max(tstep_min);
                            debug!(t, err, step = h, "transient step rejected");
                            continue;
                        }
                        h * step_factor(err, order)
                    }
                    None => h,
                }
            } else {
                (h * 2.0).min(tstep)
            };

            self.record(&outcome, Some(SweepValue { name: "time".to_string(), value: t_new }))?;
            x_nm1 = Some(std::mem::replace(&mut x_n, outcome.unknowns));
            h_prev = Some(h);
            t = t_new;
            h = next.max(tstep_min);
        }
        info!(
            points = self.summary.recorded,
            rejected = self.summary.rejected_steps,
            cutbacks = self.summary.cutbacks,
            scheme = ?tran.scheme,
            "transient done"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdf1_is_backward_euler() {
        let d = bdf_dynamics(1, 0.5, None, &[1.0, 2.0], None);
        assert_eq!(d.a0, 2.0);
        assert_eq!(d.history, vec![-2.0, -4.0]);
    }

    #[test]
    fn bdf2_is_exact_for_quadratics() {
        // x(t) = t², steps h_prev = 1, h = 0.5: x(0) = 0, x(1) = 1, x(1.5) = 2.25
        let d = bdf_dynamics(2, 0.5, Some(1.0), &[1.0], Some(&[0.0][..]));
        let dxdt = d.a0 * 2.25 + d.history[0];
        assert!((dxdt - 3.0).abs() < 1e-12);
    }

    #[test]
    fn bdf2_without_history_falls_back() {
        let d = bdf_dynamics(2, 0.25, None, &[1.0], None);
        assert_eq!(d.a0, 4.0);
    }

    #[test]
    fn step_factor_bounds() {
        assert_eq!(step_factor(0.0, 2), 2.0);
        assert_eq!(step_factor(1e9, 1), 0.25);
        assert!(step_factor(1.0, 2) < 1.0);
        assert!(step_factor(0.01, 1) > 1.0);
    }

    #[test]
    fn truncation_error_is_weighted() {
        let err = truncation_error(1, &[1.0], &[1.0 + 2e-3], 1e-3, 0.0);
        assert!((err - 1.0).abs() < 1e-9);
    }
}
