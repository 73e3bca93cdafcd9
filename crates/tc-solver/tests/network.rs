//! Solving the lumped network of a generated pn diode.

use std::collections::BTreeMap;
use tc_core::SourceLocation;
use tc_deck::{Card, Deck};
use tc_mesh::MeshLifecycle;
use tc_solver::{
    Formulation, MethodSettings, PhysicsSolver, PointRequest, SolveKind, SolverError, SolverRegistry,
};
use tc_system::{Drive, OperatingPoint, SimulationSystem};

fn diode_deck() -> Deck {
    let l = SourceLocation::default;
    Deck::new(
        "diode.yaml",
        vec![
            Card::new("MESH", l()).with("type", "s_quad4"),
            Card::new("X.MESH", l()).with("x.max", 2.0).with("n.spaces", 8_i64),
            Card::new("Y.MESH", l()).with("y.max", 1.0).with("n.spaces", 2_i64),
            Card::new("REGION", l())
                .with("label", "pside")
                .with("material", "Si")
                .with("x.max", 1.0),
            Card::new("REGION", l())
                .with("label", "nside")
                .with("material", "Si")
                .with("x.min", 1.0),
            Card::new("FACE", l()).with("label", "anode").with("location", "left"),
            Card::new("FACE", l()).with("label", "cathode").with("location", "right"),
            Card::new("BOUNDARY", l()).with("id", "anode").with("type", "ohmic"),
            Card::new("BOUNDARY", l()).with("id", "cathode").with("type", "ohmic"),
            Card::new("PROFILE", l())
                .with("region", "pside")
                .with("ion", "acceptor")
                .with("n.peak", 1e18),
            Card::new("PROFILE", l())
                .with("region", "nside")
                .with("ion", "donor")
                .with("n.peak", 1e16),
        ],
    )
}

fn diode() -> SimulationSystem {
    let deck = diode_deck();
    let mut life = MeshLifecycle::default();
    life.generate(&deck).unwrap();
    life.broadcast().unwrap();
    let mut system = SimulationSystem::new();
    system.build(life.mesh().unwrap(), &deck).unwrap();
    system.attach_profile_solvers(&deck).unwrap();
    system.run_profile_solvers().unwrap();
    system.init_regions().unwrap();
    system
}

fn at(anode: Drive) -> PointRequest {
    PointRequest {
        drives: BTreeMap::from([("anode".to_string(), anode), ("cathode".to_string(), Drive::Voltage(0.0))]),
        gmin: 1e-12,
        ..PointRequest::default()
    }
}

fn created(formulation: Formulation, kind: SolveKind) -> Box<dyn PhysicsSolver> {
    let system = diode();
    let mut solver = SolverRegistry::with_defaults().instantiate(formulation, kind).unwrap();
    let method = MethodSettings {
        formulation,
        ..MethodSettings::default()
    };
    solver.create(&system, &method).unwrap();
    solver
}

#[test]
fn forward_current_rises_with_bias() {
    let mut solver = created(Formulation::Ddml1, SolveKind::DcSweep);
    let mut guess = None;
    let mut last = f64::MIN;
    for v in [0.0, 0.2, 0.4, 0.6, 0.7] {
        let mut request = at(Drive::Voltage(v));
        request.guess = guess.take();
        let out = solver.solve(&request, &mut |_, _| {}).unwrap();
        let i = out.currents["anode"];
        assert!(i > last, "current at {v} V did not rise: {i:e}");
        assert!((i + out.currents["cathode"]).abs() < 1e-10 + 1e-6 * i.abs());
        assert_eq!(out.bias["anode"], v);
        last = i;
        guess = Some(out.unknowns);
    }
    assert!(last > 1e-9);
    solver.destroy();
    assert!(matches!(solver.n_unknowns(), Err(SolverError::NotCreated)));
}

#[test]
fn reverse_bias_blocks() {
    let mut solver = created(Formulation::Ddml1, SolveKind::DcSweep);
    let out = solver.solve(&at(Drive::Voltage(-1.0)), &mut |_, _| {}).unwrap();
    assert!(out.currents["anode"] < 0.0);
    assert!(out.currents["anode"].abs() < 1e-10);
}

#[test]
fn current_drive_finds_the_forward_voltage() {
    let mut solver = created(Formulation::Ddml1, SolveKind::DcSweep);
    let mut iterations = 0;
    let out = solver
        .solve(&at(Drive::Current(1e-6)), &mut |iter, _| iterations = iter)
        .unwrap();
    let v = out.bias["anode"];
    assert!(v > 0.5 && v < 0.9, "forward voltage {v}");
    assert!((out.currents["anode"] - 1e-6).abs() < 1e-8);
    assert_eq!(iterations, out.iterations);
}

#[test]
fn self_heating_raises_the_lattice_temperature() {
    let mut solver = created(Formulation::Ddml2, SolveKind::SteadyState);
    let cold = solver.solve(&at(Drive::Voltage(0.0)), &mut |_, _| {}).unwrap();
    let hot = solver.solve(&at(Drive::Voltage(0.8)), &mut |_, _| {}).unwrap();
    let (t0, t1) = (cold.temperature.unwrap(), hot.temperature.unwrap());
    assert!((t0 - 300.0).abs() < 1e-3);
    assert!(t1 > t0);
}

#[test]
fn unknown_electrode_in_request_fails() {
    let mut solver = created(Formulation::Ddml1, SolveKind::DcSweep);
    let mut request = at(Drive::Voltage(0.1));
    request.drives.insert("gate".into(), Drive::Voltage(1.0));
    assert!(matches!(
        solver.solve(&request, &mut |_, _| {}),
        Err(SolverError::ProblemSetup { .. })
    ));
}

#[test]
fn small_signal_capacitance_is_positive() {
    let mut dc = created(Formulation::Ddml1, SolveKind::SteadyState);
    let op = dc.solve(&at(Drive::Voltage(0.5)), &mut |_, _| {}).unwrap();
    let op = OperatingPoint {
        formulation: "ddml1".into(),
        unknowns: op.unknowns,
        bias: op.bias,
    };

    let mut ac = created(Formulation::Ddmac, SolveKind::AcSweep);
    let mut caps = Vec::new();
    for f in [1e6, 1e7, 1e8, 1e9] {
        let point = ac.small_signal(&op, "anode", 0.0026, f).unwrap();
        assert_eq!(point.frequency, f);
        assert!(point.conductance("anode").unwrap() > 0.0);
        caps.push(point.capacitance("anode").unwrap());
    }
    assert!(caps.iter().all(|&c| c > 0.0));
    assert!((caps[0] - caps[1]).abs() < 1e-3 * caps[0]);

    let short = OperatingPoint {
        formulation: "ddml1".into(),
        unknowns: vec![0.0],
        bias: BTreeMap::new(),
    };
    assert!(matches!(
        ac.small_signal(&short, "anode", 0.0026, 1e6),
        Err(SolverError::InvalidState { .. })
    ));
    assert!(ac.small_signal(&op, "gate", 0.0026, 1e6).is_err());
}
