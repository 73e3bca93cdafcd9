//! The command dispatcher: walks a deck card by card and drives the mesh,
//! the simulation system and the solve engine.

use crate::error::{AppError, AppResult};
use crate::progress::{RunProgressEvent, RunStage};
use crate::report::{RunReport, SolveRecord};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tc_core::timing::Timer;
use tc_deck::{Card, Deck};
use tc_mesh::{Communicator, MeshLifecycle};
use tc_results::{DocumentSink, NullSink, ResultDocument, deck_digest};
use tc_sim::{ControlHook, HookKind, HookRegistry, HookSet, SolveConfig, run_solve};
use tc_solver::{MethodSettings, SolverRegistry};
use tc_system::{AdvancedModel, Attachment, PmiSelection, SimulationSystem, Snapshot, bc_info, node_info};
use tracing::{debug, info, warn};

/// Keys consumed while generating the mesh and building the system.
const PRE_PASS_KEYS: &[&str] = &[
    "MESH", "X.MESH", "Y.MESH", "Z.MESH", "REGION", "FACE", "BOUNDARY", "PROFILE", "MOLE", "VSOURCE", "ISOURCE",
    "LIGHT", "PARTICLE",
];

/// Export targets of other simulators' file formats.
const FOREIGN_FORMATS: &[&str] = &["vtk", "cgns", "tif", "tif3d", "ascii", "gdsii", "spice"];

/// Runs one deck on one worker.
pub struct SolverControl {
    pub(crate) deck: Deck,
    pub(crate) life: MeshLifecycle,
    pub(crate) system: SimulationSystem,
    method: MethodSettings,
    registry: SolverRegistry,
    hooks: HookRegistry,
    document: ResultDocument,
    sink: Box<dyn DocumentSink>,
    pub(crate) report: RunReport,
}

pub(crate) type ProgressCallback<'p> = Option<&'p mut dyn FnMut(RunProgressEvent)>;

pub(crate) fn emit_progress(
    progress_cb: &mut ProgressCallback<'_>,
    stage: RunStage,
    started: Instant,
    key: Option<&str>,
    message: Option<String>,
) {
    if let Some(cb) = progress_cb.as_deref_mut() {
        cb(RunProgressEvent::stage(
            stage,
            started.elapsed().as_secs_f64(),
            key.map(str::to_string),
            message,
        ));
    }
}

impl SolverControl {
    /// Single-worker control for `deck`. Results are kept in memory only.
    pub fn new(deck: Deck) -> Self {
        let document = ResultDocument::new(deck_digest(&deck));
        Self {
            deck,
            life: MeshLifecycle::default(),
            system: SimulationSystem::new(),
            method: MethodSettings::default(),
            registry: SolverRegistry::with_defaults(),
            hooks: HookRegistry::new(),
            document,
            sink: Box::new(NullSink),
            report: RunReport::new(0),
        }
    }

    /// Control for one worker of a group.
    pub fn with_comm(deck: Deck, comm: Arc<dyn Communicator>) -> Self {
        let rank = comm.rank();
        let mut control = Self::new(deck);
        control.life = MeshLifecycle::new(comm);
        control.report = RunReport::new(rank);
        control
    }

    /// Persist the result document to `sink` after every solution.
    pub fn with_sink(mut self, sink: Box<dyn DocumentSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_registry(mut self, registry: SolverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn document(&self) -> &ResultDocument {
        &self.document
    }

    pub fn system(&self) -> &SimulationSystem {
        &self.system
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn method(&self) -> &MethodSettings {
        &self.method
    }

    pub fn is_primary(&self) -> bool {
        self.life.comm().is_primary()
    }

    /// Hand back the result document and the run report.
    pub fn into_parts(self) -> (ResultDocument, RunReport) {
        (self.document, self.report)
    }

    pub fn run(&mut self) -> AppResult<()> {
        self.run_with_progress(None)
    }

    /// Execute every card in deck order. The first fatal error ends the
    /// run; solves stopped by an unavailable solver or a failing hook are
    /// recorded as degraded and the run goes on.
    pub fn run_with_progress(&mut self, mut progress_cb: ProgressCallback<'_>) -> AppResult<()> {
        let started = Instant::now();
        info!(deck = %self.deck.name, cards = self.deck.len(), rank = self.report.rank, "run started");

        self.pre_pass(&mut progress_cb, started)?;

        let cards = self.deck.cards().to_vec();
        for card in &cards {
            let key = card.key();
            if PRE_PASS_KEYS.contains(&key) {
                continue;
            }
            emit_progress(&mut progress_cb, RunStage::RunningCommand, started, Some(key), None);
            let timer = Timer::start("command");
            self.dispatch(card, &mut progress_cb, started)
                .map_err(|e| e.at(card.location()))?;
            self.report.command(key, card.location(), timer.stop());
        }

        let persisted = if self.is_primary() {
            self.sink.persist(&self.document).map_err(AppError::from)
        } else {
            Ok(())
        };
        self.settle_primary("result document", persisted)?;
        self.report.total_time_s = started.elapsed().as_secs_f64();
        emit_progress(
            &mut progress_cb,
            RunStage::Completed,
            started,
            None,
            Some(format!("{} solutions", self.document.solution_count())),
        );
        info!(
            solutions = self.document.solution_count(),
            degraded = self.report.degraded.len(),
            elapsed_s = self.report.total_time_s,
            "run finished"
        );
        Ok(())
    }

    /// Generate and publish the mesh, build the system and initialise the
    /// regions from the profile solvers.
    fn pre_pass(&mut self, progress_cb: &mut ProgressCallback<'_>, started: Instant) -> AppResult<()> {
        let Some(mesh_card) = self.deck.find("MESH") else {
            debug!("deck has no MESH card");
            return Ok(());
        };
        let location = mesh_card.location().clone();
        let timer = Timer::start("pre-pass");
        let result = (|| -> AppResult<()> {
            emit_progress(progress_cb, RunStage::GeneratingMesh, started, Some("MESH"), None);
            self.life.generate(&self.deck)?;
            self.life.broadcast()?;
            emit_progress(progress_cb, RunStage::BuildingSystem, started, Some("MESH"), None);
            self.system.build(self.life.mesh()?, &self.deck)?;
            self.system.attach_profile_solvers(&self.deck)?;
            let ran = self.system.run_profile_solvers()?;
            debug!(solvers = ?ran, "profile solvers ran");
            self.system.init_regions()?;
            Ok(())
        })();
        result.map_err(|e| e.at(&location))?;
        self.report.command("MESH", &location, timer.stop());
        Ok(())
    }

    fn dispatch(&mut self, card: &Card, progress_cb: &mut ProgressCallback<'_>, started: Instant) -> AppResult<()> {
        match card.key() {
            "MODEL" => self.set_model(card),
            "METHOD" => self.set_method(card),
            "HOOK" => self.hook(card),
            "SOLVE" => {
                emit_progress(progress_cb, RunStage::Solving, started, Some("SOLVE"), None);
                self.solve(card)
            }
            "EXPORT" => self.export(card),
            "IMPORT" => self.import(card),
            "NODESET" => self.node_set(card),
            "REFINE.CONFORM" | "REFINE.HIERARCHICAL" | "REFINE.UNIFORM" => {
                emit_progress(progress_cb, RunStage::Refining, started, Some(card.key()), None);
                self.refine(card)
            }
            "REGIONSET" => self.region_set(card),
            "BOUNDARYSET" => self.boundary_set(card),
            "PMI" => self.pmi(card),
            "SOURCEAPPLY" => self.source_apply(card),
            "ATTACH" => self.attach(card),
            "EXTEND" => self.extend(card),
            "ROTATE" => self.rotate(card),
            other => {
                debug!(key = other, location = %card.location(), "no handler, card skipped");
                self.report.skipped.push(other.to_string());
                Ok(())
            }
        }
    }

    fn set_model(&mut self, card: &Card) -> AppResult<()> {
        let pattern = card.get_string("region", ".*")?;
        let model = AdvancedModel::from_card(card)?;
        let outcome = self.system.set_model(&pattern, &model)?;
        debug!(regions = ?outcome.matched, "advanced model assigned");
        if outcome.forced_temperature {
            self.report
                .warn(card.location(), "lattice temperature forced on in every region");
        }
        Ok(())
    }

    fn set_method(&mut self, card: &Card) -> AppResult<()> {
        self.method = MethodSettings::from_card(card)?;
        Ok(())
    }

    fn hook(&mut self, card: &Card) -> AppResult<()> {
        let location = card.location();
        if card.is_parameter_exist("load") {
            let name = card.get_enum("load", "")?;
            let kind = HookKind::parse(&name).ok_or_else(|| AppError::unsupported(location, format!("hook {name}")))?;
            let id = card.get_string("id", &name)?;
            if self.hooks.load(&id, kind, card.clone()) {
                self.report.warn(location, format!("hook {id} replaced"));
            }
            Ok(())
        } else if card.is_parameter_exist("unload") {
            let unload = card.get_string("unload", "")?;
            let id = card.get_string("id", &unload)?;
            if !self.hooks.unload(&id) {
                self.report.warn(location, format!("hook {id} was never loaded"));
            }
            Ok(())
        } else {
            Err(AppError::config(location, "HOOK requires load or unload"))
        }
    }

    fn solve(&mut self, card: &Card) -> AppResult<()> {
        let location = card.location();
        let config = SolveConfig::from_card(card, &self.method, &self.system)?;
        let is_primary = self.is_primary();
        let outcome = {
            let hooks = HookSet::for_solve(&config, &self.hooks, ControlHook::new(self.sink.as_mut()))?
                .with_group(self.life.comm());
            run_solve(&config, &self.registry, &mut self.system, &mut self.document, hooks, is_primary)
        };
        match outcome {
            Ok(summary) => {
                self.report.solves.push(SolveRecord::from(&summary));
                Ok(())
            }
            Err(e) if e.is_degraded() => {
                warn!(location = %location, error = %e, "solve stopped, continuing with the next command");
                self.report.degrade(location, e.to_string());
                Ok(())
            }
            Err(e) => Err(AppError::from(e).at(location)),
        }
    }

    fn export(&mut self, card: &Card) -> AppResult<()> {
        let location = card.location();
        if let Some(format) = FOREIGN_FORMATS.iter().find(|f| card.is_parameter_exist(f)) {
            return Err(AppError::unsupported(location, format!("export format {format}")));
        }
        let snapshot = card.get_string("snapshot", "")?;
        let bcinfo = card.get_string("bcinfo", "")?;
        let nodeinfo = card.get_string("nodeinfo", "")?;
        if snapshot.is_empty() && bcinfo.is_empty() && nodeinfo.is_empty() {
            return Err(AppError::config(location, "EXPORT requires snapshot, bcinfo or nodeinfo"));
        }
        // every worker holds the same fields; the primary writes
        let written = if self.is_primary() {
            self.write_exports(card, &snapshot, &bcinfo, &nodeinfo)
        } else {
            Ok(())
        };
        self.settle_primary("export", written)
    }

    /// Share the outcome of work done on the primary alone, so a failure
    /// there ends the run on every worker.
    fn settle_primary(&self, what: &str, local: AppResult<()>) -> AppResult<()> {
        let comm = self.life.comm();
        let everywhere = comm.all_ok(local.is_ok())?;
        match local {
            Ok(()) if !everywhere => Err(AppError::Worker {
                rank: 0,
                message: format!("{what} failed on the primary worker"),
            }),
            other => other,
        }
    }

    fn write_exports(&self, card: &Card, snapshot: &str, bcinfo: &str, nodeinfo: &str) -> AppResult<()> {
        if !snapshot.is_empty() {
            Snapshot::capture(&self.system)?.save(Path::new(snapshot))?;
            info!(path = %snapshot, "snapshot exported");
        }
        if !bcinfo.is_empty() {
            std::fs::write(bcinfo, bc_info(&self.system)?)?;
            info!(path = %bcinfo, "boundary information exported");
        }
        if !nodeinfo.is_empty() {
            let lunit = card.get_string("lunit", "um")?;
            let numbering = card.get_bool("numbering", false)?;
            std::fs::write(nodeinfo, node_info(&self.system, &lunit, numbering)?)?;
            info!(path = %nodeinfo, "node information exported");
        }
        Ok(())
    }

    fn import(&mut self, card: &Card) -> AppResult<()> {
        let location = card.location();
        if let Some(format) = FOREIGN_FORMATS.iter().find(|f| card.is_parameter_exist(f)) {
            return Err(AppError::unsupported(location, format!("import format {format}")));
        }
        let path = card.get_string("snapshot", "")?;
        if path.is_empty() {
            return Err(AppError::config(location, "IMPORT requires snapshot"));
        }
        // read and checked in full before the running system is touched
        let snapshot = Snapshot::load(Path::new(&path))?;
        let mesh = snapshot.mesh.to_mesh()?;
        if self.is_primary() {
            self.life.replace(mesh);
        } else {
            self.life.clear(false);
        }
        self.life.broadcast()?;
        self.system.clear();
        self.system.build(self.life.mesh()?, &self.deck)?;
        self.system.load_snapshot_fields(&snapshot)?;
        info!(path = %path, "snapshot imported");
        Ok(())
    }

    fn node_set(&mut self, card: &Card) -> AppResult<()> {
        let electrode = card.require_string("electrode")?;
        let v = card.require_real("v")?;
        self.system.set_initial_potential(&electrode, v)?;
        Ok(())
    }

    fn region_set(&mut self, card: &Card) -> AppResult<()> {
        let region = card.require_string("region")?;
        let variable = card.require_string("variable")?;
        let value = card.require_real("value")?;
        let unit = card.get_string("unit", "")?;
        let reinit = card.get_bool("reinit", false)?;
        self.system.region_set(&region, &variable, value, &unit, reinit)?;
        Ok(())
    }

    fn boundary_set(&mut self, card: &Card) -> AppResult<()> {
        let boundary = card.require_string("boundary")?;
        let variable = card.require_string("variable")?;
        let value = card.require_real("value")?;
        let unit = card.get_string("unit", "")?;
        self.system.boundary_set(&boundary, &variable, value, &unit)?;
        Ok(())
    }

    fn pmi(&mut self, card: &Card) -> AppResult<()> {
        let pattern = card.get_string("region", ".*")?;
        let kind = card.require_string("type")?;
        let selection = PmiSelection {
            model: card.get_string("model", "Default")?,
            parameters: card.user_parameters().cloned().collect(),
        };
        self.system.set_pmi(&pattern, &kind, selection)?;
        Ok(())
    }

    fn source_apply(&mut self, card: &Card) -> AppResult<()> {
        let t = card.get_real("time", 0.0)?;
        self.system.update_source(t)?;
        debug!(time = t, "field source applied");
        Ok(())
    }

    fn attach(&mut self, card: &Card) -> AppResult<()> {
        let location = card.location();
        let mut electrodes = Vec::new();
        for contact in card.get_strings("contact")? {
            electrodes.extend(self.system.electrodes_in_contact(&contact)?);
        }
        electrodes.extend(card.get_strings("electrode")?);
        if electrodes.is_empty() {
            return Err(AppError::config(location, "ATTACH requires electrode or contact"));
        }
        if let Some(e) = electrodes.iter().find(|e| !self.system.is_electrode(e)) {
            return Err(AppError::config(location, format!("{e} is not an electrode")));
        }

        if card.is_parameter_exist("vconst") {
            let v = card.get_real("vconst", 0.0)?;
            self.system.attach(&electrodes, Attachment::ConstVoltage(v))?;
        }
        if card.is_parameter_exist("iconst") {
            let i = card.get_real("iconst", 0.0)?;
            self.system.attach(&electrodes, Attachment::ConstCurrent(i))?;
        }

        let mut voltages = card.get_strings("vapp")?;
        voltages.extend(card.get_strings("vapps")?);
        let mut currents = card.get_strings("iapp")?;
        currents.extend(card.get_strings("iapps")?);
        if !voltages.is_empty() && !currents.is_empty() {
            return Err(AppError::config(
                location,
                "voltage and current sources cannot be attached to the same electrode",
            ));
        }
        if let Some(s) = voltages
            .iter()
            .chain(&currents)
            .find(|s| !self.system.sources().contains(s))
        {
            return Err(AppError::config(location, format!("source {s} has not been defined")));
        }
        if !voltages.is_empty() {
            self.system.attach(&electrodes, Attachment::Voltage(voltages))?;
        } else if !currents.is_empty() {
            self.system.attach(&electrodes, Attachment::Current(currents))?;
        }
        debug!(electrodes = ?electrodes, "sources attached");
        Ok(())
    }
}
