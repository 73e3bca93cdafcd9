//! DC voltage/current sweeps and IV tracing with step cutback.

use crate::config::{Scan, SweepConfig, TraceConfig};
use crate::engine::Run;
use crate::error::SimResult;
use tc_core::units::raw;
use tc_results::SweepValue;
use tc_solver::PointOutcome;
use tc_system::Drive;
use tracing::{debug, info};

/// Steps are halved at most this many times below the nominal step.
const CUTBACK_LIMIT: f64 = 1024.0;

/// Last two converged points, for linear extrapolation of the unknowns.
#[derive(Default)]
pub(crate) struct Predictor {
    points: Vec<(f64, Vec<f64>)>,
}

impl Predictor {
    pub fn push(&mut self, value: f64, unknowns: &[f64]) {
        self.points.push((value, unknowns.to_vec()));
        if self.points.len() > 2 {
            self.points.remove(0);
        }
    }

    pub fn predict(&self, value: f64) -> Option<Vec<f64>> {
        match self.points.as_slice() {
            [(v0, x0), (v1, x1)] if v1 != v0 => {
                let f = (value - v1) / (v1 - v0);
                Some(x1.iter().zip(x0).map(|(a, b)| a + (a - b) * f).collect())
            }
            [.., (_, x)] => Some(x.clone()),
            [] => None,
        }
    }
}

/// Next sweep value: one step of `h` from `value`, but never past the next
/// grid point `start + k·step` or the stop value.
fn next_value(value: f64, h: f64, start: f64, step: f64, stop: f64) -> f64 {
    let dir = step.signum();
    let snap = 1e-9 * step.abs();
    let k = ((value - start) / step + 1e-6).floor() + 1.0;
    let grid = start + k * step;
    let stride = value + dir * h;
    let next = if dir * (grid - stride) <= snap { grid } else { stride };
    if dir * (stop - next) <= snap { stop } else { next }
}

fn reached(value: f64, step: f64, stop: f64) -> bool {
    step.signum() * (value - stop) >= -1e-9 * step.abs()
}

impl Run<'_, '_> {
    fn scan_request(&self, scan: &Scan, value: f64) -> tc_solver::PointRequest {
        let mut drives = self.drives_at(0.0);
        for e in scan.electrodes() {
            let drive = if scan.is_current() {
                Drive::Current(value)
            } else {
                Drive::Voltage(value)
            };
            drives.insert(e.clone(), drive);
        }
        self.request(drives, 0.0)
    }

    /// Solve one continuation point. The first point falls back to Gmin
    /// stepping; later points report non-convergence as `None` so the
    /// caller can cut the step back.
    fn continuation_point(
        &mut self,
        request: &tc_solver::PointRequest,
        first: bool,
    ) -> SimResult<Option<PointOutcome>> {
        if first {
            return self.solve_with_gmin(request).map(Some);
        }
        match self.solve_point(request) {
            Ok(o) => Ok(Some(o)),
            Err(e) if e.is_convergence_failure() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn dc_sweep(&mut self, sweep: &SweepConfig) -> SimResult<()> {
        let nominal = sweep.step.abs();
        let floor = nominal / CUTBACK_LIMIT;
        let dir = sweep.step.signum();
        let quantity = sweep.scan.quantity();
        let mut predictor = Predictor::default();
        let mut guess = self.stored_guess()?;
        let mut value = sweep.start;
        let mut last: Option<f64> = None;
        let mut h = nominal;

        loop {
            self.pre_solve()?;
            let mut request = self.scan_request(&sweep.scan, value);
            request.guess = if sweep.predict {
                predictor.predict(value).or_else(|| guess.clone())
            } else {
                guess.clone()
            };
            let outcome = match self.continuation_point(&request, last.is_none())? {
                Some(o) => o,
                None => {
                    let Some(prev) = last else {
                        return Err(self.diverged(format!("{quantity} did not converge at {value}")));
                    };
                    // halve the step actually taken, which may have been
                    // shortened to land on the grid or the stop value
                    h = 0.5 * (value - prev).abs();
                    self.summary.cutbacks += 1;
                    if h < floor {
                        return Err(self.diverged(format!(
                            "{quantity} did not converge at {value}: step cut below {floor:e}"
                        )));
                    }
                    debug!(value, step = h, "sweep cutback");
                    value = next_value(prev, h, sweep.start, sweep.step, sweep.stop);
                    continue;
                }
            };

            self.record(
                &outcome,
                Some(SweepValue {
                    name: quantity.clone(),
                    value,
                }),
            )?;
            self.keep_operating_point(&outcome);
            predictor.push(value, &outcome.unknowns);
            guess = Some(outcome.unknowns);

            if reached(value, sweep.step, sweep.stop) {
                break;
            }
            last = Some(value);
            h = (h * 2.0).min(sweep.step_max);
            value = next_value(value, h, sweep.start, sweep.step, sweep.stop);
        }
        info!(%quantity, points = self.summary.recorded, cutbacks = self.summary.cutbacks, "sweep done");
        Ok(())
    }

    pub(crate) fn trace(&mut self, trace: &TraceConfig) -> SimResult<()> {
        let step = raw::volts(trace.vstep);
        let nominal = step.abs();
        let floor = nominal / CUTBACK_LIMIT;
        let dir = step.signum();
        let vstop = raw::volts(trace.vstop);
        let istop = raw::amps(trace.istop);
        let istep_max = raw::amps(trace.istep_max);
        let scan = Scan::Voltage(vec![trace.electrode.clone()]);
        let quantity = scan.quantity();
        let mut predictor = Predictor::default();
        let mut guess = self.stored_guess()?;
        let mut v = raw::volts(trace.vstart);
        let mut last: Option<(f64, f64)> = None;
        let mut h = nominal;

        loop {
            self.pre_solve()?;
            let mut request = self.scan_request(&scan, v);
            request.guess = if trace.predict {
                predictor.predict(v).or_else(|| guess.clone())
            } else {
                guess.clone()
            };
            let attempted = last.map_or(nominal, |(v_prev, _)| (v - v_prev).abs());
            let outcome = self.continuation_point(&request, last.is_none())?;
            let current = outcome
                .as_ref()
                .and_then(|o| o.currents.get(&trace.electrode).copied())
                .unwrap_or(0.0);
            let steep = matches!(last, Some((_, i)) if (current - i).abs() > istep_max);
            let outcome = match outcome {
                Some(o) if !(steep && attempted > floor) => o,
                Some(_) => {
                    // too steep: retry closer to the previous point
                    let Some((v_prev, _)) = last else { break };
                    h = (attempted * 0.5).max(floor);
                    self.summary.cutbacks += 1;
                    v = v_prev + dir * h;
                    continue;
                }
                None => {
                    let Some((v_prev, _)) = last else {
                        return Err(self.diverged(format!(
                            "trace on {} did not converge at {v} V",
                            trace.electrode
                        )));
                    };
                    h = attempted * 0.5;
                    self.summary.cutbacks += 1;
                    if h < floor {
                        return Err(self.diverged(format!(
                            "trace on {} did not converge at {v} V: step cut below {floor:e}",
                            trace.electrode
                        )));
                    }
                    v = v_prev + dir * h;
                    continue;
                }
            };

            self.record(&outcome, Some(SweepValue { name: quantity.clone(), value: v }))?;
            self.keep_operating_point(&outcome);
            predictor.push(v, &outcome.unknowns);
            guess = Some(outcome.unknowns);

            if current.abs() >= istop {
                info!(electrode = %trace.electrode, voltage = v, current, "trace reached the current limit");
                break;
            }
            if reached(v, step, vstop) {
                break;
            }
            last = Some((v, current));
            h = (h * 2.0).min(raw::volts(trace.vstep_max));
            v += dir * h.min(dir * (vstop - v));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn grid_is_resynchronised() {
        assert_eq!(next_value(0.0, 0.1, 0.0, 0.1, 1.0), 0.1);
        // after a cutback to 0.05 from 0.3, a doubled step stops on the grid
        let v = next_value(0.35, 0.1, 0.0, 0.1, 1.0);
        assert!((v - 0.4).abs() < 1e-12);
        // the last point is clamped to stop
        assert_eq!(next_value(0.95, 0.1, 0.0, 0.1, 0.97), 0.97);
        let down = next_value(0.0, 0.5, 0.0, -0.5, -1.0);
        assert_eq!(down, -0.5);
    }

    #[test]
    fn linear_prediction() {
        let mut p = Predictor::default();
        assert_eq!(p.predict(1.0), None);
        p.push(0.0, &[0.0, 1.0]);
        assert_eq!(p.predict(1.0), Some(vec![0.0, 1.0]));
        p.push(1.0, &[1.0, 3.0]);
        assert_eq!(p.predict(2.0), Some(vec![2.0, 5.0]));
    }

    proptest! {
        #[test]
        fn sweep_visits_every_grid_point(steps in 1usize..40, step in 0.01f64..1.0) {
            let stop = steps as f64 * step;
            let mut values = vec![0.0];
            let mut v = 0.0;
            while !reached(v, step, stop) {
                v = next_value(v, step, 0.0, step, stop);
                values.push(v);
            }
            prop_assert_eq!(values.len(), steps + 1);
            prop_assert_eq!(*values.last().unwrap(), stop);
            prop_assert!(values.windows(2).all(|w| w[1] > w[0]));
        }
    }
}
