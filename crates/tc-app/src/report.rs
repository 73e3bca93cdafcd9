//! Per-run summary: command timings, solve counters and degraded
//! outcomes.

use serde::Serialize;
use tc_core::SourceLocation;
use tc_sim::SolveSummary;

/// Wall-clock time spent on one command card.
#[derive(Debug, Clone, Serialize)]
pub struct CommandTiming {
    pub key: String,
    pub location: String,
    pub elapsed_s: f64,
}

/// Summary of one finished solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolveRecord {
    pub label: String,
    pub solve_type: String,
    pub group_id: Option<String>,
    pub recorded: usize,
    pub newton_iterations: usize,
    pub cutbacks: usize,
    pub rejected_steps: usize,
    pub gmin_steps: usize,
}

impl From<&SolveSummary> for SolveRecord {
    fn from(s: &SolveSummary) -> Self {
        Self {
            label: s.label.clone(),
            solve_type: s.solve_type.clone(),
            group_id: s.group_id.clone(),
            recorded: s.recorded,
            newton_iterations: s.newton_iterations,
            cutbacks: s.cutbacks,
            rejected_steps: s.rejected_steps,
            gmin_steps: s.gmin_steps,
        }
    }
}

/// A command that did not complete but did not end the run.
#[derive(Debug, Clone, Serialize)]
pub struct Degraded {
    pub location: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// RFC 3339 start time.
    pub started: String,
    pub rank: usize,
    pub commands: Vec<CommandTiming>,
    pub solves: Vec<SolveRecord>,
    pub warnings: Vec<String>,
    pub degraded: Vec<Degraded>,
    /// Keys with no handler.
    pub skipped: Vec<String>,
    pub total_time_s: f64,
}

impl RunReport {
    pub fn new(rank: usize) -> Self {
        Self {
            started: chrono::Utc::now().to_rfc3339(),
            rank,
            commands: Vec::new(),
            solves: Vec::new(),
            warnings: Vec::new(),
            degraded: Vec::new(),
            skipped: Vec::new(),
            total_time_s: 0.0,
        }
    }

    pub(crate) fn command(&mut self, key: &str, location: &SourceLocation, elapsed_s: f64) {
        self.commands.push(CommandTiming {
            key: key.to_string(),
            location: location.to_string(),
            elapsed_s,
        });
    }

    pub(crate) fn warn(&mut self, location: &SourceLocation, message: impl Into<String>) {
        self.warnings.push(format!("{location}: {}", message.into()));
    }

    pub(crate) fn degrade(&mut self, location: &SourceLocation, reason: impl Into<String>) {
        self.degraded.push(Degraded {
            location: location.to_string(),
            reason: reason.into(),
        });
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Solutions recorded over all solves.
    pub fn recorded(&self) -> usize {
        self.solves.iter().map(|s| s.recorded).sum()
    }

    /// Multi-line human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} commands, {} solves, {} solutions in {:.3} s\n",
            self.commands.len(),
            self.solves.len(),
            self.recorded(),
            self.total_time_s
        ));
        for s in &self.solves {
            out.push_str(&format!(
                "  {:<16} {:<12} {:>5} solutions {:>6} iterations {:>4} cutbacks\n",
                s.label, s.solve_type, s.recorded, s.newton_iterations, s.cutbacks
            ));
        }
        for w in &self.warnings {
            out.push_str(&format!("  warning: {w}\n"));
        }
        for d in &self.degraded {
            out.push_str(&format!("  degraded: {}: {}\n", d.location, d.reason));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_solves_and_degraded_commands() {
        let mut report = RunReport::new(0);
        report.solves.push(SolveRecord {
            label: "iv".into(),
            solve_type: "dcsweep".into(),
            group_id: None,
            recorded: 11,
            newton_iterations: 40,
            cutbacks: 0,
            rejected_steps: 0,
            gmin_steps: 0,
        });
        report.degrade(&SourceLocation::new("deck.yaml", 7), "solver unavailable");
        let text = report.render();
        assert!(text.starts_with("0 commands, 1 solves, 11 solutions"));
        assert!(text.contains("degraded: deck.yaml:7: solver unavailable"));
        assert!(report.is_degraded());
        assert_eq!(report.recorded(), 11);
    }

    #[test]
    fn report_serializes_with_locations() {
        let mut report = RunReport::new(2);
        report.command("SOLVE", &SourceLocation::new("deck.yaml", 3), 0.25);
        report.warn(&SourceLocation::new("deck.yaml", 5), "hook iv replaced");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rank"], 2);
        assert_eq!(json["commands"][0]["location"], "deck.yaml:3");
        assert_eq!(json["warnings"][0], "deck.yaml:5: hook iv replaced");
        assert!(chrono::DateTime::parse_from_rfc3339(json["started"].as_str().unwrap()).is_ok());
    }
}
