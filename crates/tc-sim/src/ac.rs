//! Small-signal frequency sweep around the stored operating point.

use crate::config::AcConfig;
use crate::engine::Run;
use crate::error::{SimError, SimResult};
use std::collections::BTreeMap;
use tc_core::geometric_series;
use tc_core::units::raw;
use tc_results::{Admittance, SolutionRecord, SweepValue};
use tracing::info;

impl Run<'_, '_> {
    pub(crate) fn ac_sweep(&mut self, ac: &AcConfig) -> SimResult<()> {
        let Some(op) = self.env.system.operating_point().cloned() else {
            return Err(SimError::config(
                &self.env.config.location,
                "acsweep requires a converged operating point; solve a steady state first",
            ));
        };
        let vac = raw::volts(ac.vac);
        let frequencies = geometric_series(raw::hertz(ac.f_start), raw::hertz(ac.f_stop), ac.f_multiple);
        info!(
            electrode = %ac.electrode,
            points = frequencies.len(),
            from = %op.formulation,
            "small-signal sweep"
        );
        for f in frequencies {
            self.pre_solve()?;
            let point = match self.solver.small_signal(&op, &ac.electrode, vac, f) {
                Ok(p) => p,
                Err(e) if e.is_convergence_failure() => {
                    return Err(self.diverged(format!("small-signal solve failed at {f:e} Hz: {e}")));
                }
                Err(e) => return Err(e.into()),
            };
            let admittance: BTreeMap<String, Admittance> = point
                .currents
                .keys()
                .filter_map(|e| {
                    Some((
                        e.clone(),
                        Admittance {
                            conductance: point.conductance(e)?,
                            capacitance: point.capacitance(e)?,
                        },
                    ))
                })
                .collect();
            self.store(SolutionRecord {
                index: 0,
                sweep: Some(SweepValue {
                    name: "frequency".to_string(),
                    value: f,
                }),
                bias: op.bias.clone(),
                currents: BTreeMap::new(),
                temperature: None,
                iterations: 0,
                admittance,
            })?;
        }
        Ok(())
    }
}
