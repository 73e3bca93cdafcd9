//! Solve hooks: observers called around every continuation point.
//!
//! Hooks are compiled in and selected by name through the `HookRegistry`.
//! A `HookSet` is assembled per solve: the default IV recorder (when the
//! solve type calls for one), the registered hooks in id order, and the
//! control hook last. Files are only written on the primary worker; in a
//! worker group the stages that write them agree on their outcome, so a
//! failure on the primary stops the solve on every rank at the same point.

use crate::config::SolveConfig;
use crate::error::{SimError, SimResult};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tc_deck::Card;
use tc_mesh::Communicator;
use tc_results::{DocumentSink, ResultDocument, SolutionRecord};
use tc_solver::{Formulation, SolveKind};
use tc_system::SimulationSystem;
use tracing::{debug, warn};

/// What a hook may look at.
pub struct HookContext<'c> {
    pub config: &'c SolveConfig,
    pub system: &'c SimulationSystem,
    pub document: &'c ResultDocument,
    pub is_primary: bool,
}

pub trait Hook: Send {
    fn name(&self) -> &str;

    fn on_init(&mut self, _ctx: &HookContext) -> SimResult<()> {
        Ok(())
    }

    fn pre_solve(&mut self, _ctx: &HookContext) -> SimResult<()> {
        Ok(())
    }

    /// Called after every recorded solution.
    fn post_solve(&mut self, ctx: &HookContext, record: &SolutionRecord) -> SimResult<()>;

    /// Called after every Newton iteration.
    fn post_iteration(&mut self, _iteration: usize, _residual: f64) {}

    fn on_close(&mut self, _ctx: &HookContext) -> SimResult<()> {
        Ok(())
    }
}

/// Built-in hook implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    Gnuplot,
    Probe,
    Cv,
}

impl HookKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gnuplot" => Some(HookKind::Gnuplot),
            "probe" => Some(HookKind::Probe),
            "cv" => Some(HookKind::Cv),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HookKind::Gnuplot => "gnuplot",
            HookKind::Probe => "probe",
            HookKind::Cv => "cv",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            HookKind::Gnuplot => "iv.dat",
            HookKind::Probe => "probe.dat",
            HookKind::Cv => "cv.dat",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HookEntry {
    pub kind: HookKind,
    /// The loading card; its user parameters configure the hook.
    pub params: Card,
}

/// Hooks loaded by HOOK cards, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct HookRegistry {
    entries: BTreeMap<String, HookEntry>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when an existing hook with the same id was replaced.
    pub fn load(&mut self, id: &str, kind: HookKind, params: Card) -> bool {
        let replaced = self.entries.insert(id.to_string(), HookEntry { kind, params }).is_some();
        if replaced {
            warn!(hook = id, "hook replaced");
        } else {
            debug!(hook = id, kind = kind.name(), "hook loaded");
        }
        replaced
    }

    /// Returns false, after a warning, when no hook has this id.
    pub fn unload(&mut self, id: &str) -> bool {
        if self.entries.remove(id).is_some() {
            debug!(hook = id, "hook unloaded");
            true
        } else {
            warn!(hook = id, "unload of a hook that was never loaded");
            false
        }
    }

    pub fn get(&self, id: &str) -> Option<&HookEntry> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn output_path(prefix: &str, id: &str, kind: HookKind) -> PathBuf {
    if id == kind.name() {
        PathBuf::from(format!("{prefix}.{}", kind.extension()))
    } else {
        PathBuf::from(format!("{prefix}.{id}.{}", kind.extension()))
    }
}

fn io_error(hook: &str, path: &Path, e: std::io::Error) -> SimError {
    SimError::Hook {
        hook: hook.to_string(),
        message: format!("{}: {e}", path.display()),
    }
}

/// Whitespace-separated table with a `#` header line.
struct Table {
    hook: String,
    path: PathBuf,
    append: bool,
    out: Option<BufWriter<File>>,
    fresh: bool,
}

impl Table {
    fn new(hook: &str, path: PathBuf, append: bool) -> Self {
        Self {
            hook: hook.to_string(),
            path,
            append,
            out: None,
            fresh: true,
        }
    }

    fn open(&mut self) -> SimResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&self.hook, &self.path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .map_err(|e| io_error(&self.hook, &self.path, e))?;
        self.fresh = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
        self.out = Some(BufWriter::new(file));
        Ok(())
    }

    fn header(&mut self, columns: &[String]) -> SimResult<()> {
        if self.fresh {
            self.fresh = false;
            self.line(&format!("# {}", columns.join(" ")))?;
        }
        Ok(())
    }

    fn row(&mut self, values: &[f64]) -> SimResult<()> {
        let text: Vec<String> = values.iter().map(|v| format!("{v:.9e}")).collect();
        self.line(&text.join(" "))
    }

    fn line(&mut self, text: &str) -> SimResult<()> {
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        writeln!(out, "{text}")
            .and_then(|_| out.flush())
            .map_err(|e| io_error(&self.hook, &self.path, e))
    }

    fn close(&mut self) -> SimResult<()> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(|e| io_error(&self.hook, &self.path, e))?;
        }
        Ok(())
    }
}

fn sweep_column(record: &SolutionRecord) -> (String, f64) {
    match &record.sweep {
        Some(s) => (s.name.clone(), s.value),
        None => ("index".to_string(), record.index as f64),
    }
}

/// Electrode bias/current table.
pub struct GnuplotHook {
    name: String,
    table: Table,
}

impl GnuplotHook {
    pub fn new(id: &str, prefix: &str, append: bool) -> Self {
        Self {
            name: id.to_string(),
            table: Table::new(id, output_path(prefix, id, HookKind::Gnuplot), append),
        }
    }
}

impl Hook for GnuplotHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self, ctx: &HookContext) -> SimResult<()> {
        if ctx.is_primary {
            self.table.open()?;
        }
        Ok(())
    }

    fn post_solve(&mut self, _ctx: &HookContext, record: &SolutionRecord) -> SimResult<()> {
        let (sweep, value) = sweep_column(record);
        let mut columns = vec![sweep];
        let mut values = vec![value];
        for (e, v) in &record.bias {
            columns.push(format!("{e}.bias"));
            values.push(*v);
        }
        for (e, i) in &record.currents {
            columns.push(format!("{e}.current"));
            values.push(*i);
        }
        if let Some(t) = record.temperature {
            columns.push("temperature".to_string());
            values.push(t);
        }
        self.table.header(&columns)?;
        self.table.row(&values)
    }

    fn on_close(&mut self, _ctx: &HookContext) -> SimResult<()> {
        self.table.close()
    }
}

/// Node variable at the node nearest a point.
pub struct ProbeHook {
    name: String,
    point: [f64; 3],
    variable: String,
    /// (region name, local index) of the probed node.
    target: Option<(String, usize)>,
    table: Table,
}

impl ProbeHook {
    pub fn from_card(id: &str, card: &Card, prefix: &str, append: bool) -> SimResult<Self> {
        let hook_error = |e: tc_deck::DeckError| SimError::Hook {
            hook: id.to_string(),
            message: e.to_string(),
        };
        let point = [
            card.get_real("x", 0.0).map_err(hook_error)?,
            card.get_real("y", 0.0).map_err(hook_error)?,
            card.get_real("z", 0.0).map_err(hook_error)?,
        ];
        Ok(Self {
            name: id.to_string(),
            point,
            variable: card.get_string("variable", "potential").map_err(hook_error)?,
            target: None,
            table: Table::new(id, output_path(prefix, id, HookKind::Probe), append),
        })
    }

    fn locate(&self, system: &SimulationSystem) -> SimResult<(String, usize)> {
        let mesh = system.mesh()?;
        let dist2 = |p: &[f64; 3]| (0..3).map(|d| (p[d] - self.point[d]).powi(2)).sum::<f64>();
        let node = mesh
            .nodes()
            .iter()
            .enumerate()
            .min_by(|a, b| dist2(a.1).total_cmp(&dist2(b.1)))
            .map(|(i, _)| i)
            .ok_or_else(|| SimError::Hook {
                hook: self.name.clone(),
                message: "mesh has no nodes".to_string(),
            })?;
        system
            .regions()?
            .iter()
            .filter(|r| r.has_variable(&self.variable))
            .find_map(|r| r.local_index(node).map(|k| (r.name().to_string(), k)))
            .ok_or_else(|| SimError::Hook {
                hook: self.name.clone(),
                message: format!("no region at node {node} carries {}", self.variable),
            })
    }
}

impl Hook for ProbeHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self, ctx: &HookContext) -> SimResult<()> {
        let target = self.locate(ctx.system)?;
        debug!(hook = %self.name, region = %target.0, node = target.1, "probe located");
        self.target = Some(target);
        if ctx.is_primary {
            self.table.open()?;
        }
        Ok(())
    }

    fn post_solve(&mut self, ctx: &HookContext, record: &SolutionRecord) -> SimResult<()> {
        let Some((region, k)) = &self.target else {
            return Ok(());
        };
        let value = ctx.system.region(region)?.variable(&self.variable)?[*k];
        let (sweep, x) = sweep_column(record);
        self.table.header(&[sweep, self.variable.clone()])?;
        self.table.row(&[x, value])
    }

    fn on_close(&mut self, _ctx: &HookContext) -> SimResult<()> {
        self.table.close()
    }
}

/// Capacitance/conductance versus frequency of small-signal solves.
pub struct CvHook {
    name: String,
    electrode: Option<String>,
    active: bool,
    table: Table,
}

impl CvHook {
    pub fn from_card(id: &str, card: &Card, prefix: &str, append: bool) -> SimResult<Self> {
        let electrode = if card.is_parameter_exist("electrode") {
            Some(card.get_string("electrode", "").map_err(|e| SimError::Hook {
                hook: id.to_string(),
                message: e.to_string(),
            })?)
        } else {
            None
        };
        Ok(Self {
            name: id.to_string(),
            electrode,
            active: false,
            table: Table::new(id, output_path(prefix, id, HookKind::Cv), append),
        })
    }
}

impl Hook for CvHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self, ctx: &HookContext) -> SimResult<()> {
        self.active = ctx.config.kind == SolveKind::AcSweep;
        if let Some(e) = &self.electrode
            && !ctx.system.is_electrode(e)
        {
            return Err(SimError::Hook {
                hook: self.name.clone(),
                message: format!("unknown electrode {e}"),
            });
        }
        if self.active && ctx.is_primary {
            self.table.open()?;
        }
        Ok(())
    }

    fn post_solve(&mut self, _ctx: &HookContext, record: &SolutionRecord) -> SimResult<()> {
        if !self.active {
            return Ok(());
        }
        let entry = match &self.electrode {
            Some(e) => record.admittance.get_key_value(e),
            None => record.admittance.iter().next(),
        };
        let Some((e, y)) = entry else {
            return Ok(());
        };
        let (_, f) = sweep_column(record);
        self.table.header(&[
            "frequency".to_string(),
            format!("{e}.capacitance"),
            format!("{e}.conductance"),
        ])?;
        self.table.row(&[f, y.capacitance, y.conductance])
    }

    fn on_close(&mut self, _ctx: &HookContext) -> SimResult<()> {
        self.table.close()
    }
}

/// Persists the whole result document after every solution.
pub struct ControlHook<'a> {
    sink: &'a mut dyn DocumentSink,
}

impl<'a> ControlHook<'a> {
    pub fn new(sink: &'a mut dyn DocumentSink) -> Self {
        Self { sink }
    }
}

impl Hook for ControlHook<'_> {
    fn name(&self) -> &str {
        "control"
    }

    fn post_solve(&mut self, ctx: &HookContext, _record: &SolutionRecord) -> SimResult<()> {
        if ctx.is_primary {
            self.sink.persist(ctx.document).map_err(|e| SimError::Hook {
                hook: "control".to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn wants_iv_recorder(config: &SolveConfig) -> bool {
    matches!(
        config.kind,
        SolveKind::DcSweep | SolveKind::SteadyState | SolveKind::Transient | SolveKind::Trace
    ) || config.method.formulation == Formulation::Ddmac
}

/// Ordered hooks of one solve. The control hook always runs last.
pub struct HookSet<'a> {
    hooks: Vec<Box<dyn Hook + 'a>>,
    group: Option<&'a dyn Communicator>,
}

impl<'a> HookSet<'a> {
    pub fn for_solve(config: &SolveConfig, registry: &HookRegistry, control: ControlHook<'a>) -> SimResult<Self> {
        let prefix = config.out_prefix.as_str();
        let append = config.out_append;
        let mut hooks: Vec<Box<dyn Hook + 'a>> = Vec::new();
        // a registered hook named "gnuplot" writes the same file
        if wants_iv_recorder(config) && registry.get(HookKind::Gnuplot.name()).is_none() {
            hooks.push(Box::new(GnuplotHook::new("gnuplot", prefix, append)));
        }
        for (id, entry) in &registry.entries {
            let hook: Box<dyn Hook + 'a> = match entry.kind {
                HookKind::Gnuplot => Box::new(GnuplotHook::new(id, prefix, append)),
                HookKind::Probe => Box::new(ProbeHook::from_card(id, &entry.params, prefix, append)?),
                HookKind::Cv => Box::new(CvHook::from_card(id, &entry.params, prefix, append)?),
            };
            hooks.push(hook);
        }
        hooks.push(Box::new(control));
        Ok(Self { hooks, group: None })
    }

    /// A set holding only `hooks`, in order.
    pub fn from_hooks(hooks: Vec<Box<dyn Hook + 'a>>) -> Self {
        Self { hooks, group: None }
    }

    /// Agree on init, post-solve and close outcomes with the other workers
    /// of `group`.
    pub fn with_group(mut self, group: &'a dyn Communicator) -> Self {
        self.group = Some(group);
        self
    }

    fn agree(&self, stage: &str, local: SimResult<()>) -> SimResult<()> {
        let Some(group) = self.group else {
            return local;
        };
        let everywhere = group.all_ok(local.is_ok())?;
        match local {
            Ok(()) if !everywhere => Err(SimError::Hook {
                hook: stage.to_string(),
                message: "failed on another worker".to_string(),
            }),
            other => other,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn on_init(&mut self, ctx: &HookContext) -> SimResult<()> {
        let local = self.hooks.iter_mut().try_for_each(|h| h.on_init(ctx));
        self.agree("on_init", local)
    }

    pub fn pre_solve(&mut self, ctx: &HookContext) -> SimResult<()> {
        self.hooks.iter_mut().try_for_each(|h| h.pre_solve(ctx))
    }

    pub fn post_solve(&mut self, ctx: &HookContext, record: &SolutionRecord) -> SimResult<()> {
        let local = self.hooks.iter_mut().try_for_each(|h| h.post_solve(ctx, record));
        self.agree("post_solve", local)
    }

    pub fn post_iteration(&mut self, iteration: usize, residual: f64) {
        for h in &mut self.hooks {
            h.post_iteration(iteration, residual);
        }
    }

    /// Every hook is closed; the first failure is reported.
    pub fn on_close(&mut self, ctx: &HookContext) -> SimResult<()> {
        let mut first = Ok(());
        for h in &mut self.hooks {
            if let Err(e) = h.on_close(ctx) {
                warn!(hook = h.name(), error = %e, "hook close failed");
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        self.agree("on_close", first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    #[test]
    fn kinds_parse() {
        assert_eq!(HookKind::parse("GnuPlot"), Some(HookKind::Gnuplot));
        assert_eq!(HookKind::parse("cv"), Some(HookKind::Cv));
        assert_eq!(HookKind::parse("vtk"), None);
    }

    #[test]
    fn registry_replace_and_unload() {
        let card = Card::new("HOOK", SourceLocation::new("h.yaml", 3));
        let mut registry = HookRegistry::new();
        assert!(!registry.load("p1", HookKind::Probe, card.clone()));
        assert!(registry.load("p1", HookKind::Cv, card));
        assert_eq!(registry.get("p1").map(|e| e.kind), Some(HookKind::Cv));
        assert!(!registry.unload("missing"));
        assert_eq!(registry.len(), 1);
        assert!(registry.unload("p1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn output_names() {
        assert_eq!(output_path("out/diode", "gnuplot", HookKind::Gnuplot), PathBuf::from("out/diode.iv.dat"));
        assert_eq!(output_path("r", "p2", HookKind::Probe), PathBuf::from("r.p2.probe.dat"));
    }
}
