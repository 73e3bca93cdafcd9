//! Physics solver capability and the network-backed implementations.

use crate::error::{SolverError, SolverResult};
use crate::jacobian::finite_difference_jacobian;
use crate::method::{Formulation, MethodSettings};
use crate::network::{DeviceNetwork, Dynamics, Excitation};
use crate::newton::newton_solve;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tc_system::{Drive, OperatingPoint, SimulationSystem};
use tracing::debug;

const JACOBIAN_EPSILON: f64 = 1e-8;

/// Kind of continuation a solve performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SolveKind {
    Equilibrium,
    SteadyState,
    DcSweep,
    Trace,
    Transient,
    AcSweep,
}

impl SolveKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "equilibrium" => Some(SolveKind::Equilibrium),
            "steadystate" | "op" => Some(SolveKind::SteadyState),
            "dcsweep" => Some(SolveKind::DcSweep),
            "trace" => Some(SolveKind::Trace),
            "transient" => Some(SolveKind::Transient),
            "acsweep" => Some(SolveKind::AcSweep),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SolveKind::Equilibrium => "equilibrium",
            SolveKind::SteadyState => "steadystate",
            SolveKind::DcSweep => "dcsweep",
            SolveKind::Trace => "trace",
            SolveKind::Transient => "transient",
            SolveKind::AcSweep => "acsweep",
        }
    }
}

/// One nonlinear solve at fixed drives.
#[derive(Clone, Debug, Default)]
pub struct PointRequest {
    /// Drive per electrode name; electrodes not listed are grounded.
    pub drives: BTreeMap<String, Drive>,
    /// Artificial conductance from every node to ground (S).
    pub gmin: f64,
    pub optical: f64,
    pub particle: f64,
    /// Starting unknowns, typically the previous converged point.
    pub guess: Option<Vec<f64>>,
    pub dynamics: Option<Dynamics>,
}

/// Converged point.
#[derive(Clone, Debug, PartialEq)]
pub struct PointOutcome {
    pub unknowns: Vec<f64>,
    /// Applied bias per electrode (V): the source voltage of
    /// voltage-driven electrodes, the electrode potential otherwise.
    pub bias: BTreeMap<String, f64>,
    /// Electrode potential behind any series resistance (V).
    pub potentials: BTreeMap<String, f64>,
    /// Current into the device per electrode (A).
    pub currents: BTreeMap<String, f64>,
    /// Lattice temperature (K) when solved for.
    pub temperature: Option<f64>,
    pub iterations: usize,
    pub residual_norm: f64,
}

/// Small-signal response at one frequency.
#[derive(Clone, Debug, PartialEq)]
pub struct AcPoint {
    pub frequency: f64,
    pub probe: String,
    pub vac: f64,
    /// Current phasor into the device per electrode (A).
    pub currents: BTreeMap<String, Complex64>,
}

impl AcPoint {
    fn admittance(&self, electrode: &str) -> Option<Complex64> {
        self.currents.get(electrode).map(|i| *i / self.vac)
    }

    /// Conductance seen at `electrode` (S).
    pub fn conductance(&self, electrode: &str) -> Option<f64> {
        self.admittance(electrode).map(|y| y.re)
    }

    /// Capacitance seen at `electrode` (F).
    pub fn capacitance(&self, electrode: &str) -> Option<f64> {
        let omega = 2.0 * PI * self.frequency;
        self.admittance(electrode).map(|y| y.im / omega)
    }
}

/// A physics formulation the solve engine can drive.
///
/// The engine calls `create` once, then any number of `solve` (or
/// `small_signal`) calls, and always `destroy` at the end.
pub trait PhysicsSolver: Send {
    fn formulation(&self) -> Formulation;

    fn label(&self) -> &'static str {
        self.formulation().tag()
    }

    fn supports(&self, kind: SolveKind) -> bool;

    fn create(&mut self, system: &SimulationSystem, method: &MethodSettings) -> SolverResult<()>;

    /// Pick up changed optical/particle generation.
    fn refresh(&mut self, system: &SimulationSystem) -> SolverResult<()>;

    fn n_unknowns(&self) -> SolverResult<usize>;

    fn solve(
        &mut self,
        request: &PointRequest,
        on_iteration: &mut dyn FnMut(usize, f64),
    ) -> SolverResult<PointOutcome>;

    fn small_signal(
        &mut self,
        op: &OperatingPoint,
        probe: &str,
        vac: f64,
        frequency: f64,
    ) -> SolverResult<AcPoint>;

    fn destroy(&mut self);
}

/// Formulations served by the lumped device network.
pub struct NetworkSolver {
    formulation: Formulation,
    kinds: &'static [SolveKind],
    self_heating: bool,
    state: Option<(DeviceNetwork, MethodSettings)>,
}

const DC_KINDS: &[SolveKind] = &[
    SolveKind::Equilibrium,
    SolveKind::SteadyState,
    SolveKind::DcSweep,
    SolveKind::Trace,
    SolveKind::Transient,
];

impl NetworkSolver {
    fn new(formulation: Formulation, kinds: &'static [SolveKind], self_heating: bool) -> Self {
        Self {
            formulation,
            kinds,
            self_heating,
            state: None,
        }
    }

    /// Electrostatics only; equilibrium solves.
    pub fn poisson() -> Self {
        Self::new(Formulation::Poisson, &[SolveKind::Equilibrium], false)
    }

    /// Isothermal drift-diffusion.
    pub fn ddml1() -> Self {
        Self::new(Formulation::Ddml1, DC_KINDS, false)
    }

    /// Drift-diffusion with lattice self-heating.
    pub fn ddml2() -> Self {
        Self::new(Formulation::Ddml2, DC_KINDS, true)
    }

    /// Small-signal analysis around a stored operating point.
    pub fn ddmac() -> Self {
        Self::new(Formulation::Ddmac, &[SolveKind::AcSweep], false)
    }

    fn state(&self) -> SolverResult<&(DeviceNetwork, MethodSettings)> {
        self.state.as_ref().ok_or(SolverError::NotCreated)
    }

    fn drive_vector(network: &DeviceNetwork, request: &PointRequest) -> SolverResult<Vec<Drive>> {
        for name in request.drives.keys() {
            if network.terminal_index(name).is_none() {
                return Err(SolverError::ProblemSetup {
                    what: format!("{name} is not an electrode of the device"),
                });
            }
        }
        Ok(network
            .terminals()
            .iter()
            .map(|t| request.drives.get(&t.name).copied().unwrap_or(Drive::Voltage(0.0)))
            .collect())
    }
}

impl PhysicsSolver for NetworkSolver {
    fn formulation(&self) -> Formulation {
        self.formulation
    }

    fn supports(&self, kind: SolveKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn create(&mut self, system: &SimulationSystem, method: &MethodSettings) -> SolverResult<()> {
        let network = DeviceNetwork::build(system, &method.tolerances, self.self_heating)?;
        if !method.linear.is_direct() {
            debug!(linear = ?method.linear, "iterative linear solver served by dense LU");
        }
        self.state = Some((network, method.clone()));
        Ok(())
    }

    fn refresh(&mut self, system: &SimulationSystem) -> SolverResult<()> {
        let (network, _) = self.state.as_mut().ok_or(SolverError::NotCreated)?;
        network.refresh_generation(system)
    }

    fn n_unknowns(&self) -> SolverResult<usize> {
        Ok(self.state()?.0.n_unknowns())
    }

    fn solve(
        &mut self,
        request: &PointRequest,
        on_iteration: &mut dyn FnMut(usize, f64),
    ) -> SolverResult<PointOutcome> {
        let (network, method) = self.state()?;
        let drives = Self::drive_vector(network, request)?;
        let x0 = match &request.guess {
            Some(g) if g.len() == network.n_unknowns() => DVector::from_column_slice(g),
            Some(g) => {
                debug!(given = g.len(), expected = network.n_unknowns(), "initial guess discarded");
                network.initial_guess(&drives)
            }
            None => network.initial_guess(&drives),
        };
        let exc = Excitation {
            drives: &drives,
            gmin: request.gmin,
            optical: request.optical,
            particle: request.particle,
            dynamics: request.dynamics.as_ref(),
        };
        let config = method.newton_config();
        let result = newton_solve(
            x0,
            network.n_nodes(),
            |x| network.residual(x, &exc),
            |x| finite_difference_jacobian(x, |y| network.residual(y, &exc), JACOBIAN_EPSILON),
            &config,
            |iter, norm| on_iteration(iter, norm),
        )?;

        let currents = network.terminal_currents(&result.x, &exc)?;
        let mut outcome = PointOutcome {
            unknowns: result.x.iter().copied().collect(),
            bias: BTreeMap::new(),
            potentials: BTreeMap::new(),
            currents: BTreeMap::new(),
            temperature: network.is_thermal().then(|| network.lattice_temperature(&result.x)),
            iterations: result.iterations,
            residual_norm: result.residual_norm,
        };
        for (i, t) in network.terminals().iter().enumerate() {
            let bias = match drives[i] {
                Drive::Voltage(v) => v,
                Drive::Current(_) => result.x[i],
            };
            outcome.bias.insert(t.name.clone(), bias);
            outcome.potentials.insert(t.name.clone(), result.x[i]);
            outcome.currents.insert(t.name.clone(), currents[i]);
        }
        debug!(
            solver = self.formulation.tag(),
            iterations = outcome.iterations,
            residual = outcome.residual_norm,
            "point converged"
        );
        Ok(outcome)
    }

    fn small_signal(
        &mut self,
        op: &OperatingPoint,
        probe: &str,
        vac: f64,
        frequency: f64,
    ) -> SolverResult<AcPoint> {
        let (network, _) = self.state()?;
        let probe_idx = network.terminal_index(probe).ok_or_else(|| SolverError::ProblemSetup {
            what: format!("{probe} is not an electrode of the device"),
        })?;
        let n = network.n_nodes();
        if op.unknowns.len() < n {
            return Err(SolverError::InvalidState {
                what: format!(
                    "operating point from {} has {} unknowns, small-signal network needs {n}",
                    op.formulation,
                    op.unknowns.len()
                ),
            });
        }
        // an operating point from a self-heating solve carries the
        // temperature last; the small-signal network is isothermal
        let x = DVector::from_column_slice(&op.unknowns[..n]);
        let g = finite_difference_jacobian(
            &x,
            |y| Ok(network.static_rows(y, 0.0, 0.0, 0.0)),
            JACOBIAN_EPSILON,
        )?;
        let c = network.capacitance_matrix(&x);
        let omega = 2.0 * PI * frequency;
        let y: DMatrix<Complex64> =
            DMatrix::from_fn(n, n, |i, j| Complex64::new(g[(i, j)], omega * c[(i, j)]));

        let mut a = y.clone();
        let mut b = DVector::<Complex64>::zeros(n);
        for (i, t) in network.terminals().iter().enumerate() {
            let excitation = if i == probe_idx { vac } else { 0.0 };
            if t.resistance > 0.0 {
                a[(i, i)] += Complex64::new(1.0 / t.resistance, 0.0);
                b[i] = Complex64::new(excitation / t.resistance, 0.0);
            } else {
                a.row_mut(i).fill(Complex64::new(0.0, 0.0));
                a[(i, i)] = Complex64::new(1.0, 0.0);
                b[i] = Complex64::new(excitation, 0.0);
            }
        }
        let dv = a.lu().solve(&b).ok_or_else(|| SolverError::Numeric {
            what: format!("singular small-signal system at {frequency:e} Hz"),
        })?;
        let response = &y * &dv;
        let currents = network
            .terminals()
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), response[i]))
            .collect();
        Ok(AcPoint {
            frequency,
            probe: probe.to_string(),
            vac,
            currents,
        })
    }

    fn destroy(&mut self) {
        self.state = None;
    }
}
