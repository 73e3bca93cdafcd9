//! Per-solve configuration.
//!
//! A `SolveConfig` is built fresh from every SOLVE card: the branch defaults
//! of its solve type, overridden by the card parameters, plus the method
//! settings current at that point of the deck. It is never mutated once the
//! solve starts.

use crate::error::{SimError, SimResult};
use tc_core::units::{amp, hz, raw, s, volt};
use tc_core::{Current, Frequency, SourceLocation, Time, Voltage};
use tc_deck::Card;
use tc_solver::{MethodSettings, SolveKind};
use tc_system::SimulationSystem;

/// Electrodes scanned by a sweep and what is stepped on them.
#[derive(Clone, Debug, PartialEq)]
pub enum Scan {
    Voltage(Vec<String>),
    Current(Vec<String>),
}

impl Scan {
    pub fn electrodes(&self) -> &[String] {
        match self {
            Scan::Voltage(e) | Scan::Current(e) => e,
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Scan::Current(_))
    }

    /// Name of the recorded sweep parameter.
    pub fn quantity(&self) -> String {
        let first = self.electrodes().first().map(String::as_str).unwrap_or("scan");
        match self {
            Scan::Voltage(_) => format!("{first}.voltage"),
            Scan::Current(_) => format!("{first}.current"),
        }
    }
}

/// Target held on one electrode during a steady-state solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hold {
    Voltage(Voltage),
    Current(Current),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SteadyConfig {
    pub electrode: Option<(String, Hold)>,
    pub nodeset: bool,
    pub rampup_steps: usize,
    pub rampup_vstep: Voltage,
    pub rampup_istep: Current,
    pub op_steadystate: bool,
    pub op_threshold: f64,
    pub tstep: Time,
    pub tstep_max: Time,
    pub pseudotime_iterations: usize,
    pub vstep_max: Voltage,
    pub istep_max: Current,
}

impl Default for SteadyConfig {
    fn default() -> Self {
        Self {
            electrode: None,
            nodeset: true,
            rampup_steps: 0,
            rampup_vstep: volt(0.25),
            rampup_istep: amp(0.1),
            op_steadystate: true,
            op_threshold: 1e-5,
            tstep: s(1e-10),
            tstep_max: s(1e-7),
            pseudotime_iterations: 50,
            vstep_max: volt(0.1),
            istep_max: amp(1e-6),
        }
    }
}

/// DC voltage or current sweep. Values are volts or amperes according to
/// the scan kind.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepConfig {
    pub scan: Scan,
    pub start: f64,
    pub step: f64,
    pub step_max: f64,
    pub stop: f64,
    pub predict: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceConfig {
    pub electrode: String,
    pub vstart: Voltage,
    pub vstep: Voltage,
    pub vstep_max: Voltage,
    pub vstop: Voltage,
    pub istop: Current,
    pub istep_max: Current,
    pub predict: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeScheme {
    Bdf1,
    Bdf2,
}

impl TimeScheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bdf1" | "impliciteuler" => Some(TimeScheme::Bdf1),
            "bdf2" => Some(TimeScheme::Bdf2),
            _ => None,
        }
    }

    pub fn order(self) -> usize {
        match self {
            TimeScheme::Bdf1 => 1,
            TimeScheme::Bdf2 => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransientConfig {
    pub autostep: bool,
    pub rejectstep: bool,
    pub predict: bool,
    pub tran_op: bool,
    pub uic: bool,
    pub tstart: Time,
    pub tstep: Time,
    pub tstep_min: Time,
    /// Zero leaves the step unbounded.
    pub tstep_max: Time,
    pub tstop: Time,
    pub rtol: f64,
    pub atol: f64,
    pub scheme: TimeScheme,
    /// Ramp-up and Gmin settings for the initial operating point.
    pub op: SteadyConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AcConfig {
    pub electrode: String,
    pub f_start: Frequency,
    pub f_stop: Frequency,
    pub f_multiple: f64,
    pub vac: Voltage,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SolveParams {
    Equilibrium,
    SteadyState(SteadyConfig),
    DcSweep(SweepConfig),
    Trace(TraceConfig),
    Transient(TransientConfig),
    AcSweep(AcConfig),
}

#[derive(Clone, Debug)]
pub struct SolveConfig {
    pub kind: SolveKind,
    pub label: String,
    pub location: SourceLocation,
    pub out_prefix: String,
    pub out_append: bool,
    pub gmin_init: f64,
    pub gmin: f64,
    pub optical_gen: bool,
    pub particle_gen: bool,
    /// Source whose waveform scales the optical generation over time.
    pub optical_modulate: Option<String>,
    pub method: MethodSettings,
    pub params: SolveParams,
}

fn deck_error(card: &Card, e: tc_deck::DeckError) -> SimError {
    SimError::config(card.location(), e.to_string())
}

fn real(card: &Card, name: &str, default: f64) -> SimResult<f64> {
    card.get_real(name, default).map_err(|e| deck_error(card, e))
}

fn flag(card: &Card, name: &str, default: bool) -> SimResult<bool> {
    card.get_bool(name, default).map_err(|e| deck_error(card, e))
}

fn count(card: &Card, name: &str, default: usize) -> SimResult<usize> {
    let v = card.get_int(name, default as i64).map_err(|e| deck_error(card, e))?;
    usize::try_from(v).map_err(|_| SimError::config(card.location(), format!("{name} must not be negative")))
}

fn electrodes(card: &Card, name: &str, system: &SimulationSystem) -> SimResult<Vec<String>> {
    let names = card.get_strings(name).map_err(|e| deck_error(card, e))?;
    for n in &names {
        if !system.is_electrode(n) {
            return Err(SimError::config(card.location(), format!("{name}: unknown electrode {n}")));
        }
    }
    Ok(names)
}

impl SolveConfig {
    pub fn from_card(card: &Card, method: &MethodSettings, system: &SimulationSystem) -> SimResult<Self> {
        let location = card.location().clone();
        if !card.is_parameter_exist("type") {
            return Err(SimError::config(&location, "SOLVE requires a type"));
        }
        let type_name = card.get_enum("type", "").map_err(|e| deck_error(card, e))?;
        let kind = SolveKind::parse(&type_name)
            .ok_or_else(|| SimError::config(&location, format!("unknown solve type {type_name}")))?;

        let (gmin_init_default, gmin_default) = match kind {
            SolveKind::Equilibrium | SolveKind::DcSweep | SolveKind::Trace => (1e-6, 1e-12),
            _ => (1e-12, 1e-12),
        };
        let gmin = real(card, "gmin", gmin_default)?;
        let gmin_init = real(card, "gmin.init", gmin_init_default)?.max(gmin);
        if gmin < 0.0 {
            return Err(SimError::config(&location, "gmin must not be negative"));
        }

        let optical_modulate = if card.is_parameter_exist("optical.modulate") {
            let name = card.get_string("optical.modulate", "").map_err(|e| deck_error(card, e))?;
            if !system.sources().contains(&name) {
                return Err(SimError::config(
                    &location,
                    format!("optical.modulate: undefined source {name}"),
                ));
            }
            Some(name)
        } else {
            None
        };

        let params = match kind {
            SolveKind::Equilibrium => SolveParams::Equilibrium,
            SolveKind::SteadyState => SolveParams::SteadyState(steady_from_card(card, system)?),
            SolveKind::DcSweep => SolveParams::DcSweep(sweep_from_card(card, system)?),
            SolveKind::Trace => SolveParams::Trace(trace_from_card(card, system)?),
            SolveKind::Transient => SolveParams::Transient(transient_from_card(card, system)?),
            SolveKind::AcSweep => SolveParams::AcSweep(ac_from_card(card, system)?),
        };

        Ok(Self {
            kind,
            label: card.get_string("label", &type_name).map_err(|e| deck_error(card, e))?,
            location,
            out_prefix: card.get_string("out.prefix", "result").map_err(|e| deck_error(card, e))?,
            out_append: flag(card, "out.append", false)?,
            gmin_init,
            gmin,
            optical_gen: flag(card, "optical.gen", false)?,
            particle_gen: flag(card, "particle.gen", false)?,
            optical_modulate,
            method: method.clone(),
            params,
        })
    }

    /// Optical generation scale at time `t`.
    pub fn optical_scale(&self, system: &SimulationSystem, t: f64) -> f64 {
        if !self.optical_gen {
            return 0.0;
        }
        self.optical_modulate
            .as_deref()
            .and_then(|name| system.sources().get(name).ok())
            .map(|source| source.waveform.value(t))
            .unwrap_or(1.0)
    }

    pub fn particle_scale(&self) -> f64 {
        if self.particle_gen { 1.0 } else { 0.0 }
    }
}

fn steady_from_card(card: &Card, system: &SimulationSystem) -> SimResult<SteadyConfig> {
    let d = SteadyConfig::default();
    let has_v = card.is_parameter_exist("vconst");
    let has_i = card.is_parameter_exist("iconst");
    if has_v && has_i {
        return Err(SimError::config(card.location(), "vconst and iconst are exclusive"));
    }
    let electrode = if card.is_parameter_exist("electrode") {
        let name = card.get_string("electrode", "").map_err(|e| deck_error(card, e))?;
        if !system.is_electrode(&name) {
            return Err(SimError::config(card.location(), format!("unknown electrode {name}")));
        }
        let hold = if has_i {
            Hold::Current(amp(real(card, "iconst", 0.0)?))
        } else {
            Hold::Voltage(volt(real(card, "vconst", 0.0)?))
        };
        Some((name, hold))
    } else if has_v || has_i {
        return Err(SimError::config(card.location(), "vconst/iconst require an electrode"));
    } else {
        None
    };
    Ok(SteadyConfig {
        electrode,
        nodeset: flag(card, "nodeset", d.nodeset)?,
        rampup_steps: count(card, "rampup.steps", d.rampup_steps)?,
        rampup_vstep: volt(real(card, "rampup.vstep", raw::volts(d.rampup_vstep))?.abs()),
        rampup_istep: amp(real(card, "rampup.istep", raw::amps(d.rampup_istep))?.abs()),
        op_steadystate: flag(card, "op.steadystate", d.op_steadystate)?,
        op_threshold: real(card, "op.threshold", d.op_threshold)?,
        tstep: s(real(card, "tstep", raw::seconds(d.tstep))?),
        tstep_max: s(real(card, "tstepmax", raw::seconds(d.tstep_max))?),
        pseudotime_iterations: count(card, "pseudotime.iteration", d.pseudotime_iterations)?,
        vstep_max: volt(real(card, "vstepmax", raw::volts(d.vstep_max))?.abs()),
        istep_max: amp(real(card, "istepmax", raw::amps(d.istep_max))?.abs()),
    })
}

fn sweep_from_card(card: &Card, system: &SimulationSystem) -> SimResult<SweepConfig> {
    let vscan = electrodes(card, "vscan", system)?;
    let iscan = electrodes(card, "iscan", system)?;
    let (scan, prefix, defaults) = match (vscan.is_empty(), iscan.is_empty()) {
        (false, true) => (Scan::Voltage(vscan), 'v', (0.0, 0.1, 5.0)),
        (true, false) => (Scan::Current(iscan), 'i', (0.0, 1e-5, 1e-2)),
        _ => {
            return Err(SimError::config(
                card.location(),
                "dcsweep requires exactly one of vscan or iscan",
            ));
        }
    };
    let start = real(card, &format!("{prefix}start"), defaults.0)?;
    let step = real(card, &format!("{prefix}step"), defaults.1)?;
    if step == 0.0 {
        return Err(SimError::config(card.location(), format!("{prefix}step must not be zero")));
    }
    let step_max = real(card, &format!("{prefix}stepmax"), step.abs())?.abs().max(step.abs());
    Ok(SweepConfig {
        scan,
        start,
        step,
        step_max,
        stop: real(card, &format!("{prefix}stop"), defaults.2)?,
        predict: flag(card, "predict", true)?,
    })
}

fn trace_from_card(card: &Card, system: &SimulationSystem) -> SimResult<TraceConfig> {
    let vscan = electrodes(card, "vscan", system)?;
    let [electrode] = <[String; 1]>::try_from(vscan)
        .map_err(|_| SimError::config(card.location(), "trace requires exactly one vscan electrode"))?;
    let vstep = real(card, "vstep", 0.1)?;
    if vstep == 0.0 {
        return Err(SimError::config(card.location(), "vstep must not be zero"));
    }
    let istop = real(card, "istop", 1.0)?.abs();
    Ok(TraceConfig {
        electrode,
        vstart: volt(real(card, "vstart", 0.0)?),
        vstep: volt(vstep),
        vstep_max: volt(real(card, "vstepmax", vstep.abs())?.abs().max(vstep.abs())),
        vstop: volt(real(card, "vstop", 5.0)?),
        istop: amp(istop),
        istep_max: amp(real(card, "istepmax", istop)?.abs()),
        predict: flag(card, "predict", true)?,
    })
}

fn transient_from_card(card: &Card, system: &SimulationSystem) -> SimResult<TransientConfig> {
    let tstart = real(card, "tstart", 0.0)?;
    let tstop = real(card, "tstop", 1e-6)?;
    let tstep = real(card, "tstep", 1e-9)?;
    let tstep_max = real(card, "tstepmax", 0.0)?;
    if tstop <= tstart {
        return Err(SimError::config(card.location(), "tstop must be greater than tstart"));
    }
    if tstep <= 0.0 {
        return Err(SimError::config(card.location(), "tstep must be positive"));
    }
    if tstep_max < 0.0 {
        return Err(SimError::config(card.location(), "tstepmax must not be negative"));
    }
    let rtol = real(card, "ts.rtol", 1e-3)?;
    let atol = real(card, "ts.atol", 1e-7)?;
    if rtol < 0.0 || atol < 0.0 || (rtol == 0.0 && atol == 0.0) {
        return Err(SimError::config(
            card.location(),
            "ts.rtol and ts.atol must not be negative or both zero",
        ));
    }
    let ts = card.get_enum("ts", "bdf2").map_err(|e| deck_error(card, e))?;
    let scheme = TimeScheme::parse(&ts)
        .ok_or_else(|| SimError::config(card.location(), format!("unknown time scheme {ts}")))?;
    Ok(TransientConfig {
        autostep: flag(card, "autostep", true)?,
        rejectstep: flag(card, "rejectstep", true)?,
        predict: flag(card, "predict", true)?,
        tran_op: flag(card, "tran.op", true)?,
        uic: flag(card, "uic", false)?,
        tstart: s(tstart),
        tstep: s(tstep),
        tstep_min: s(real(card, "tstepmin", 1e-14)?.abs()),
        tstep_max: s(tstep_max),
        tstop: s(tstop),
        rtol,
        atol,
        scheme,
        op: steady_from_card(card, system)?,
    })
}

fn ac_from_card(card: &Card, system: &SimulationSystem) -> SimResult<AcConfig> {
    let acscan = electrodes(card, "acscan", system)?;
    let [electrode] = <[String; 1]>::try_from(acscan)
        .map_err(|_| SimError::config(card.location(), "acsweep requires exactly one acscan electrode"))?;
    let f_start = real(card, "f.start", 1e6)?;
    let f_multiple = real(card, "f.multiple", 1.1)?;
    if f_start <= 0.0 {
        return Err(SimError::config(card.location(), "f.start must be positive"));
    }
    if f_multiple <= 1.0 {
        return Err(SimError::config(card.location(), "f.multiple must be greater than one"));
    }
    let f_stop = real(card, "f.stop", 1e10)?;
    if f_stop < f_start {
        return Err(SimError::config(card.location(), "f.stop must not be below f.start"));
    }
    Ok(AcConfig {
        electrode,
        f_start: hz(f_start),
        f_stop: hz(f_stop),
        f_multiple,
        vac: volt(real(card, "vac", 0.0026)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_deck::Deck;
    use tc_mesh::MeshLifecycle;

    fn system() -> SimulationSystem {
        let l = SourceLocation::default;
        let deck = Deck::new(
            "cfg.yaml",
            vec![
                Card::new("MESH", l()).with("type", "s_quad4"),
                Card::new("X.MESH", l()).with("x.max", 2.0).with("n.spaces", 4_i64),
                Card::new("Y.MESH", l()).with("y.max", 1.0).with("n.spaces", 1_i64),
                Card::new("REGION", l()).with("label", "si").with("material", "Si"),
                Card::new("FACE", l()).with("label", "anode").with("location", "left"),
                Card::new("FACE", l()).with("label", "cathode").with("location", "right"),
                Card::new("BOUNDARY", l()).with("id", "anode").with("type", "ohmic"),
                Card::new("BOUNDARY", l()).with("id", "cathode").with("type", "ohmic"),
                Card::new("VSOURCE", l()).with("id", "vlight").with("vconst", 0.5),
            ],
        );
        let mut life = MeshLifecycle::default();
        life.generate(&deck).unwrap();
        life.broadcast().unwrap();
        let mut system = SimulationSystem::new();
        system.build(life.mesh().unwrap(), &deck).unwrap();
        system
    }

    fn solve(params: &[(&str, tc_deck::ParamValue)]) -> Card {
        let mut card = Card::new("SOLVE", SourceLocation::new("cfg.yaml", 9));
        for (name, value) in params {
            card.set(name, value.clone(), false);
        }
        card
    }

    fn config(params: &[(&str, tc_deck::ParamValue)]) -> SimResult<SolveConfig> {
        SolveConfig::from_card(&solve(params), &MethodSettings::default(), &system())
    }

    #[test]
    fn missing_or_unknown_type_is_fatal() {
        assert!(matches!(config(&[]), Err(SimError::Config { .. })));
        assert!(matches!(config(&[("type", "spice".into())]), Err(SimError::Config { .. })));
    }

    #[test]
    fn dcsweep_defaults() {
        let cfg = config(&[("type", "dcsweep".into()), ("vscan", "anode".into())]).unwrap();
        assert_eq!(cfg.label, "dcsweep");
        assert_eq!(cfg.out_prefix, "result");
        assert_eq!(cfg.gmin_init, 1e-6);
        assert_eq!(cfg.gmin, 1e-12);
        let SolveParams::DcSweep(sweep) = cfg.params else {
            panic!("expected a dc sweep");
        };
        assert_eq!(sweep.scan, Scan::Voltage(vec!["anode".to_string()]));
        assert_eq!((sweep.start, sweep.step, sweep.stop), (0.0, 0.1, 5.0));
        assert_eq!(sweep.step_max, 0.1);
        assert!(sweep.predict);
    }

    #[test]
    fn dcsweep_validation() {
        let zero = config(&[("type", "dcsweep".into()), ("vscan", "anode".into()), ("vstep", 0.0.into())]);
        assert!(matches!(zero, Err(SimError::Config { .. })));
        let both = config(&[("type", "dcsweep".into()), ("vscan", "anode".into()), ("iscan", "cathode".into())]);
        assert!(matches!(both, Err(SimError::Config { .. })));
        assert!(matches!(config(&[("type", "dcsweep".into())]), Err(SimError::Config { .. })));
        let unknown = config(&[("type", "dcsweep".into()), ("vscan", "gate".into())]);
        assert!(matches!(unknown, Err(SimError::Config { .. })));
    }

    #[test]
    fn transient_validation() {
        let back = config(&[("type", "transient".into()), ("tstart", 1e-6.into()), ("tstop", 1e-6.into())]);
        assert!(matches!(back, Err(SimError::Config { .. })));
        let step = config(&[("type", "transient".into()), ("tstep", (-1e-9).into())]);
        assert!(matches!(step, Err(SimError::Config { .. })));
        let exact = config(&[("type", "transient".into()), ("ts.rtol", 0.0.into()), ("ts.atol", 0.0.into())]);
        assert!(matches!(exact, Err(SimError::Config { .. })));
        let negative = config(&[("type", "transient".into()), ("ts.atol", (-1e-7).into())]);
        assert!(matches!(negative, Err(SimError::Config { .. })));
        assert!(config(&[("type", "transient".into()), ("ts.atol", 0.0.into())]).is_ok());
        let cfg = config(&[("type", "transient".into()), ("ts", "impliciteuler".into())]).unwrap();
        let SolveParams::Transient(tran) = cfg.params else {
            panic!("expected a transient");
        };
        assert_eq!(tran.scheme, TimeScheme::Bdf1);
        assert_eq!(raw::seconds(tran.tstop), 1e-6);
        assert_eq!(raw::seconds(tran.tstep_max), 0.0);
    }

    #[test]
    fn steady_state_holds() {
        let cfg = config(&[("type", "op".into()), ("electrode", "anode".into()), ("vconst", 0.3.into())]).unwrap();
        assert_eq!(cfg.kind, SolveKind::SteadyState);
        let SolveParams::SteadyState(op) = cfg.params else {
            panic!("expected a steady state");
        };
        assert_eq!(op.electrode, Some(("anode".to_string(), Hold::Voltage(volt(0.3)))));
        assert_eq!(op.pseudotime_iterations, 50);

        let both = config(&[
            ("type", "op".into()),
            ("electrode", "anode".into()),
            ("vconst", 0.3.into()),
            ("iconst", 1e-3.into()),
        ]);
        assert!(matches!(both, Err(SimError::Config { .. })));
    }

    #[test]
    fn acsweep_validation() {
        let cfg = config(&[("type", "acsweep".into()), ("acscan", "anode".into())]).unwrap();
        let SolveParams::AcSweep(ac) = cfg.params else {
            panic!("expected an ac sweep");
        };
        assert_eq!(ac.f_multiple, 1.1);
        assert_eq!(raw::volts(ac.vac), 0.0026);
        let flat = config(&[("type", "acsweep".into()), ("acscan", "anode".into()), ("f.multiple", 1.0.into())]);
        assert!(matches!(flat, Err(SimError::Config { .. })));
        let inverted = config(&[
            ("type", "acsweep".into()),
            ("acscan", "anode".into()),
            ("f.start", 1e9.into()),
            ("f.stop", 1e6.into()),
        ]);
        assert!(matches!(inverted, Err(SimError::Config { .. })));
    }

    #[test]
    fn optical_envelope_must_exist() {
        let bad = config(&[("type", "equilibrium".into()), ("optical.modulate", "vnone".into())]);
        assert!(matches!(bad, Err(SimError::Config { .. })));
        let cfg = config(&[
            ("type", "equilibrium".into()),
            ("optical.gen", true.into()),
            ("optical.modulate", "vlight".into()),
        ])
        .unwrap();
        assert_eq!(cfg.optical_scale(&system(), 0.0), 0.5);
    }
}
