//! Solve execution: solver lifecycle, point solves and result recording.
//!
//! The continuation strategies live next to this module and extend `Run`;
//! everything they share (Gmin stepping, recording, the stored operating
//! point) is here.

use crate::config::{SolveConfig, SolveParams};
use crate::error::{SimError, SimResult};
use crate::hooks::{HookContext, HookSet};
use std::collections::BTreeMap;
use tc_results::{ResultDocument, ResultsError, SolutionRecord, SweepValue};
use tc_solver::{PhysicsSolver, PointOutcome, PointRequest, SolverRegistry, SolverResult};
use tc_system::{Drive, OperatingPoint, SimulationSystem};
use tracing::{debug, info};

/// Counters reported after a solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolveSummary {
    pub label: String,
    pub solve_type: String,
    /// Id of the result group, absent when the solve recorded nothing.
    pub group_id: Option<String>,
    pub recorded: usize,
    pub newton_iterations: usize,
    pub failed_points: usize,
    pub cutbacks: usize,
    pub rejected_steps: usize,
    pub gmin_steps: usize,
}

/// State a solve reads and writes, apart from the solver and the hooks.
pub(crate) struct Env<'r> {
    pub config: &'r SolveConfig,
    pub system: &'r mut SimulationSystem,
    pub document: &'r mut ResultDocument,
    pub group: usize,
    pub is_primary: bool,
}

impl Env<'_> {
    pub fn context(&self) -> HookContext<'_> {
        HookContext {
            config: self.config,
            system: self.system,
            document: self.document,
            is_primary: self.is_primary,
        }
    }
}

pub(crate) struct Run<'r, 'h> {
    pub env: Env<'r>,
    pub solver: Box<dyn PhysicsSolver>,
    pub hooks: HookSet<'h>,
    pub summary: SolveSummary,
}

/// Run one configured solve.
///
/// The solver is created, driven by the strategy of the solve type and
/// destroyed, even when the strategy fails. The result group is opened
/// before the solve and dropped again if it stays empty.
pub fn run_solve(
    config: &SolveConfig,
    registry: &SolverRegistry,
    system: &mut SimulationSystem,
    document: &mut ResultDocument,
    hooks: HookSet<'_>,
    is_primary: bool,
) -> SimResult<SolveSummary> {
    let solver = registry.instantiate(config.method.formulation, config.kind)?;
    info!(
        label = %config.label,
        solve = config.kind.name(),
        solver = solver.label(),
        hooks = ?hooks.names(),
        "solve started"
    );
    let group = document.begin_group(&config.label, config.kind.name());
    let mut run = Run {
        env: Env {
            config,
            system,
            document,
            group,
            is_primary,
        },
        solver,
        hooks,
        summary: SolveSummary {
            label: config.label.clone(),
            solve_type: config.kind.name().to_string(),
            ..SolveSummary::default()
        },
    };
    let result = run.execute();

    let Run { env, mut summary, .. } = run;
    if summary.recorded > 0 {
        summary.group_id = env.document.group(group).map(|g| g.id.clone());
    }
    let pruned = env.document.prune_empty();
    if pruned > 0 {
        debug!(label = %config.label, "empty result group pruned");
    }
    result.map(|_| {
        info!(
            label = %summary.label,
            recorded = summary.recorded,
            iterations = summary.newton_iterations,
            cutbacks = summary.cutbacks,
            "solve finished"
        );
        summary
    })
}

impl Run<'_, '_> {
    fn execute(&mut self) -> SimResult<()> {
        let result = match self.solver.create(self.env.system, &self.env.config.method) {
            Ok(()) => self.with_hooks(),
            Err(e) => Err(e.into()),
        };
        self.solver.destroy();
        result
    }

    fn with_hooks(&mut self) -> SimResult<()> {
        self.hooks.on_init(&self.env.context())?;
        let solved = self.dispatch();
        let closed = self.hooks.on_close(&self.env.context());
        solved.and(closed)
    }

    fn dispatch(&mut self) -> SimResult<()> {
        let config = self.env.config;
        match &config.params {
            SolveParams::Equilibrium => self.equilibrium(),
            SolveParams::SteadyState(op) => self.steady_state(op),
            SolveParams::DcSweep(sweep) => self.dc_sweep(sweep),
            SolveParams::Trace(trace) => self.trace(trace),
            SolveParams::Transient(tran) => self.transient(tran),
            SolveParams::AcSweep(ac) => self.ac_sweep(ac),
        }
    }

    pub(crate) fn diverged(&self, message: impl Into<String>) -> SimError {
        SimError::ConvergenceFailed {
            location: self.env.config.location.clone(),
            message: message.into(),
        }
    }

    /// Source drive of every electrode at time `t`.
    pub(crate) fn drives_at(&self, t: f64) -> BTreeMap<String, Drive> {
        let system = &*self.env.system;
        system
            .electrode_names()
            .into_iter()
            .map(|e| {
                let drive = system.sources().drive(&e, t);
                (e, drive)
            })
            .collect()
    }

    pub(crate) fn request(&self, drives: BTreeMap<String, Drive>, t: f64) -> PointRequest {
        let config = self.env.config;
        PointRequest {
            drives,
            gmin: config.gmin,
            optical: config.optical_scale(self.env.system, t),
            particle: config.particle_scale(),
            guess: None,
            dynamics: None,
        }
    }

    /// Unknowns of the stored operating point, when they fit this solver.
    pub(crate) fn stored_guess(&self) -> SimResult<Option<Vec<f64>>> {
        let n = self.solver.n_unknowns()?;
        Ok(self
            .env
            .system
            .operating_point()
            .filter(|op| op.unknowns.len() == n)
            .map(|op| op.unknowns.clone()))
    }

    pub(crate) fn pre_solve(&mut self) -> SimResult<()> {
        self.hooks.pre_solve(&self.env.context())
    }

    /// One Newton solve; iterations are reported to the hooks.
    pub(crate) fn solve_point(&mut self, request: &PointRequest) -> SolverResult<PointOutcome> {
        let hooks = &mut self.hooks;
        let outcome = self
            .solver
            .solve(request, &mut |iteration, residual| hooks.post_iteration(iteration, residual));
        match &outcome {
            Ok(o) => self.summary.newton_iterations += o.iterations,
            Err(e) => {
                self.summary.failed_points += 1;
                debug!(error = %e, gmin = request.gmin, "point did not converge");
            }
        }
        outcome
    }

    /// Solve at `request.gmin`; on non-convergence step Gmin down from
    /// `gmin.init` by decades, each step starting from the previous one.
    pub(crate) fn solve_with_gmin(&mut self, request: &PointRequest) -> SimResult<PointOutcome> {
        match self.solve_point(request) {
            Ok(o) => return Ok(o),
            Err(e) if e.is_convergence_failure() => {}
            Err(e) => return Err(e.into()),
        }
        let target = self.env.config.gmin;
        let mut gmin = self.env.config.gmin_init;
        if gmin <= target {
            return Err(self.diverged(format!(
                "no convergence at gmin = {target:e} and no gmin.init above it to step from"
            )));
        }
        info!(from = gmin, to = target, "gmin stepping");
        let mut guess = request.guess.clone();
        loop {
            let step = PointRequest {
                gmin,
                guess: guess.clone(),
                ..request.clone()
            };
            match self.solve_point(&step) {
                Ok(o) if gmin <= target => return Ok(o),
                Ok(o) => {
                    self.summary.gmin_steps += 1;
                    guess = Some(o.unknowns);
                    let next = gmin / 10.0;
                    gmin = if next <= target || next < f64::MIN_POSITIVE {
                        target
                    } else {
                        next
                    };
                }
                Err(e) if e.is_convergence_failure() => {
                    return Err(self.diverged(format!("gmin stepping failed at gmin = {gmin:e}: {e}")));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn keep_operating_point(&mut self, outcome: &PointOutcome) {
        self.env.system.set_operating_point(OperatingPoint {
            formulation: self.solver.formulation().tag().to_string(),
            unknowns: outcome.unknowns.clone(),
            bias: outcome.bias.clone(),
        });
    }

    /// Push a converged point into the field state and the result document.
    pub(crate) fn record(&mut self, outcome: &PointOutcome, sweep: Option<SweepValue>) -> SimResult<()> {
        self.env.system.apply_solution(&outcome.bias, &outcome.currents)?;
        self.store(SolutionRecord {
            index: 0,
            sweep,
            bias: outcome.bias.clone(),
            currents: outcome.currents.clone(),
            temperature: outcome.temperature,
            iterations: outcome.iterations,
            admittance: BTreeMap::new(),
        })
    }

    pub(crate) fn store(&mut self, record: SolutionRecord) -> SimResult<()> {
        let group = self.env.group;
        self.env.document.record(group, record)?;
        let stored = self
            .env
            .document
            .group(group)
            .and_then(|g| g.solutions.last())
            .cloned()
            .ok_or(ResultsError::GroupNotFound { index: group })?;
        self.summary.recorded += 1;
        self.hooks.post_solve(&self.env.context(), &stored)
    }
}
