//! Equilibrium and steady-state (operating point) strategies.

use crate::config::{Hold, SteadyConfig};
use crate::engine::Run;
use crate::error::{SimError, SimResult};
use std::collections::BTreeMap;
use tc_core::units::raw;
use tc_solver::{Dynamics, PointOutcome, PointRequest};
use tc_system::Drive;
use tracing::{debug, info, warn};

/// Extra capacitance on every node during pseudo-time relaxation (F).
const PSEUDO_CAPACITANCE: f64 = 1e-12;

/// Fallback bias ramps never take more steps than this.
const MAX_RAMP_STEPS: usize = 1024;

fn blend(from: Option<&Drive>, to: Drive, fraction: f64) -> Drive {
    match (from, to) {
        (Some(Drive::Voltage(a)), Drive::Voltage(b)) => Drive::Voltage(a + (b - a) * fraction),
        (Some(Drive::Current(a)), Drive::Current(b)) => Drive::Current(a + (b - a) * fraction),
        (_, Drive::Voltage(b)) => Drive::Voltage(b * fraction),
        (_, Drive::Current(b)) => Drive::Current(b * fraction),
    }
}

fn relative_change(old: &[f64], new: &[f64]) -> f64 {
    let scale = 1.0 + new.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let delta = old
        .iter()
        .zip(new)
        .fold(0.0_f64, |m, (a, b)| m.max((a - b).abs()));
    delta / scale
}

impl Run<'_, '_> {
    pub(crate) fn equilibrium(&mut self) -> SimResult<()> {
        self.pre_solve()?;
        let drives = self
            .env
            .system
            .electrode_names()
            .into_iter()
            .map(|e| (e, Drive::Voltage(0.0)))
            .collect();
        let request = self.request(drives, 0.0);
        let outcome = self.solve_with_gmin(&request)?;
        self.keep_operating_point(&outcome);
        self.record(&outcome, None)
    }

    pub(crate) fn steady_state(&mut self, op: &SteadyConfig) -> SimResult<()> {
        self.pre_solve()?;
        let outcome = self.operating_point(op, 0.0)?;
        self.keep_operating_point(&outcome);
        self.record(&outcome, None)
    }

    /// Converged point at the source drives of time `t` with the held
    /// electrode applied: ramp-up, then Gmin stepping, then a bounded bias
    /// ramp, then pseudo-time relaxation.
    pub(crate) fn operating_point(&mut self, op: &SteadyConfig, t: f64) -> SimResult<PointOutcome> {
        let mut target = self.drives_at(t);
        if let Some((electrode, hold)) = &op.electrode {
            let drive = match hold {
                Hold::Voltage(v) => Drive::Voltage(raw::volts(*v)),
                Hold::Current(i) => Drive::Current(raw::amps(*i)),
            };
            target.insert(electrode.clone(), drive);
        }
        let mut guess = if op.nodeset { None } else { self.stored_guess()? };

        if op.rampup_steps > 0 {
            let start = self.present_drives(&target)?;
            let steps = ramp_steps(
                &start,
                &target,
                raw::volts(op.rampup_vstep),
                raw::amps(op.rampup_istep),
            )
            .max(op.rampup_steps);
            debug!(steps, "ramping up to the operating point");
            guess = self.ramp(&start, &target, steps, guess, t)?;
        }

        let mut request = self.request(target.clone(), t);
        request.guess = guess;
        let failure = match self.solve_with_gmin(&request) {
            Ok(o) => return Ok(o),
            Err(e @ SimError::ConvergenceFailed { .. }) => e,
            Err(e) => return Err(e),
        };

        let start = self.present_drives(&target)?;
        let steps = ramp_steps(&start, &target, raw::volts(op.vstep_max), raw::amps(op.istep_max));
        if steps > 1 && steps <= MAX_RAMP_STEPS {
            info!(steps, "retrying the operating point with a bias ramp");
            match self.ramp(&start, &target, steps, request.guess.clone(), t) {
                Ok(ramped) => {
                    let retry = PointRequest {
                        guess: ramped,
                        ..request.clone()
                    };
                    match self.solve_with_gmin(&retry) {
                        Ok(o) => return Ok(o),
                        Err(SimError::ConvergenceFailed { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(SimError::ConvergenceFailed { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if op.op_steadystate {
            warn!(error = %failure, "operating point did not converge, relaxing in pseudo time");
            self.pseudo_time(op, &request)
        } else {
            Err(failure)
        }
    }

    /// Drives matching `target` in kind, at the last applied electrode state.
    fn present_drives(&self, target: &BTreeMap<String, Drive>) -> SimResult<BTreeMap<String, Drive>> {
        target
            .iter()
            .map(|(e, d)| -> SimResult<(String, Drive)> {
                let circuit = &self.env.system.electrode(e)?.circuit;
                let now = match d {
                    Drive::Voltage(_) => Drive::Voltage(circuit.bias),
                    Drive::Current(_) => Drive::Current(circuit.current),
                };
                Ok((e.clone(), now))
            })
            .collect()
    }

    /// Intermediate points from `start` towards `target`; the target itself
    /// is left to the caller. Returns the last converged unknowns.
    fn ramp(
        &mut self,
        start: &BTreeMap<String, Drive>,
        target: &BTreeMap<String, Drive>,
        steps: usize,
        mut guess: Option<Vec<f64>>,
        t: f64,
    ) -> SimResult<Option<Vec<f64>>> {
        for k in 1..steps {
            let fraction = k as f64 / steps as f64;
            let drives = target
                .iter()
                .map(|(e, d)| (e.clone(), blend(start.get(e), *d, fraction)))
                .collect();
            let mut request = self.request(drives, t);
            request.guess = guess;
            let outcome = self.solve_with_gmin(&request)?;
            guess = Some(outcome.unknowns);
        }
        Ok(guess)
    }

    /// Backward-Euler relaxation with an artificial node capacitance until
    /// the update falls below `op.threshold`, then a plain solve from there.
    fn pseudo_time(&mut self, op: &SteadyConfig, request: &PointRequest) -> SimResult<PointOutcome> {
        let n = self.solver.n_unknowns()?;
        let mut x = match &request.guess {
            Some(g) if g.len() == n => Some(g.clone()),
            _ => None,
        };
        let mut dt = raw::seconds(op.tstep);
        let dt_max = raw::seconds(op.tstep_max).max(dt);
        for step in 0..op.pseudotime_iterations {
            let history = match &x {
                Some(x) => x.iter().map(|v| -v / dt).collect(),
                None => vec![0.0; n],
            };
            let relax = PointRequest {
                guess: x.clone(),
                dynamics: Some(Dynamics {
                    a0: 1.0 / dt,
                    history,
                    pseudo_capacitance: PSEUDO_CAPACITANCE,
                }),
                ..request.clone()
            };
            match self.solve_point(&relax) {
                Ok(o) => {
                    let change = x.as_deref().map_or(f64::INFINITY, |old| relative_change(old, &o.unknowns));
                    x = Some(o.unknowns);
                    debug!(step, dt, change, "pseudo-time step");
                    if change < op.op_threshold {
                        let settle = PointRequest {
                            guess: x.clone(),
                            ..request.clone()
                        };
                        match self.solve_point(&settle) {
                            Ok(o) => {
                                info!(steps = step + 1, "operating point reached in pseudo time");
                                return Ok(o);
                            }
                            Err(e) if e.is_convergence_failure() => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                    dt = (dt * 2.0).min(dt_max);
                }
                Err(e) if e.is_convergence_failure() => {
                    self.summary.cutbacks += 1;
                    dt *= 0.5;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.diverged(format!(
            "operating point not reached after {} pseudo-time steps",
            op.pseudotime_iterations
        )))
    }
}

/// Steps needed to move every drive by at most `vstep` volts or `istep`
/// amperes.
fn ramp_steps(start: &BTreeMap<String, Drive>, target: &BTreeMap<String, Drive>, vstep: f64, istep: f64) -> usize {
    target
        .iter()
        .map(|(e, d)| {
            let (delta, bound) = match (start.get(e), d) {
                (Some(Drive::Voltage(a)), Drive::Voltage(b)) => ((b - a).abs(), vstep),
                (Some(Drive::Current(a)), Drive::Current(b)) => ((b - a).abs(), istep),
                (_, Drive::Voltage(b)) => (b.abs(), vstep),
                (_, Drive::Current(b)) => (b.abs(), istep),
            };
            if bound > 0.0 {
                (delta / bound).ceil() as usize
            } else {
                1
            }
        })
        .max()
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_moves_between_drives() {
        let from = Drive::Voltage(0.5);
        assert_eq!(blend(Some(&from), Drive::Voltage(1.5), 0.5), Drive::Voltage(1.0));
        assert_eq!(blend(None, Drive::Current(1e-3), 0.25), Drive::Current(2.5e-4));
    }

    #[test]
    fn ramp_steps_follow_the_largest_move() {
        let start = BTreeMap::from([("a".to_string(), Drive::Voltage(0.0)), ("b".to_string(), Drive::Current(0.0))]);
        let target = BTreeMap::from([("a".to_string(), Drive::Voltage(1.0)), ("b".to_string(), Drive::Current(3e-6))]);
        assert_eq!(ramp_steps(&start, &target, 0.25, 1e-6), 4);
        assert_eq!(ramp_steps(&start, &target, 0.1, 1e-6), 10);
        assert_eq!(ramp_steps(&start, &start, 0.1, 1e-6), 1);
    }

    #[test]
    fn relative_change_is_scaled() {
        assert_eq!(relative_change(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert!((relative_change(&[0.0, 1.0], &[0.0, 1.5]) - 0.2).abs() < 1e-12);
    }
}
