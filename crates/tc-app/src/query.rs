//! Query helpers for saved result documents.

use std::path::Path;
use tc_results::{ResultDocument, SolutionGroup, load_document};

use crate::error::AppResult;

/// One line per solution group.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub id: String,
    pub label: String,
    pub solve_type: String,
    pub solution_count: usize,
    /// First and last sweep value, when the group is a sweep.
    pub sweep_range: Option<(String, f64, f64)>,
    pub electrodes: Vec<String>,
}

pub fn load_solution(path: &Path) -> AppResult<ResultDocument> {
    Ok(load_document(path)?)
}

pub fn summarize_group(group: &SolutionGroup) -> GroupSummary {
    let sweep_range = match (group.solutions.first(), group.solutions.last()) {
        (Some(first), Some(last)) => match (&first.sweep, &last.sweep) {
            (Some(a), Some(b)) => Some((a.name.clone(), a.value, b.value)),
            _ => None,
        },
        _ => None,
    };
    GroupSummary {
        id: group.id.clone(),
        label: group.label.clone(),
        solve_type: group.solve_type.clone(),
        solution_count: group.solutions.len(),
        sweep_range,
        electrodes: group
            .solutions
            .first()
            .map(|s| s.bias.keys().cloned().collect())
            .unwrap_or_default(),
    }
}

pub fn summarize_document(doc: &ResultDocument) -> Vec<GroupSummary> {
    doc.groups().iter().map(summarize_group).collect()
}

/// Terminal current of `electrode` over a group, paired with the sweep
/// value (or the solution index when the group is not a sweep).
pub fn current_series(group: &SolutionGroup, electrode: &str) -> Vec<(f64, f64)> {
    group
        .solutions
        .iter()
        .filter_map(|s| {
            let x = s.sweep.as_ref().map(|v| v.value).unwrap_or(s.index as f64);
            s.currents.get(electrode).map(|&i| (x, i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tc_results::{SolutionRecord, SweepValue};

    fn record(v: f64, i: f64) -> SolutionRecord {
        SolutionRecord {
            index: 0,
            sweep: Some(SweepValue {
                name: "anode.voltage".into(),
                value: v,
            }),
            bias: BTreeMap::from([("anode".to_string(), v)]),
            currents: BTreeMap::from([("anode".to_string(), i)]),
            temperature: None,
            iterations: 3,
            admittance: BTreeMap::new(),
        }
    }

    #[test]
    fn sweep_groups_report_their_range() {
        let mut doc = ResultDocument::new("abc");
        let g = doc.begin_group("iv", "dcsweep");
        for (v, i) in [(0.0, 0.0), (0.5, 1e-6), (1.0, 1e-3)] {
            doc.record(g, record(v, i)).unwrap();
        }
        let summary = summarize_document(&doc);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].solution_count, 3);
        assert_eq!(summary[0].sweep_range, Some(("anode.voltage".to_string(), 0.0, 1.0)));
        assert_eq!(summary[0].electrodes, vec!["anode"]);
        let series = current_series(&doc.groups()[0], "anode");
        assert_eq!(series[2], (1.0, 1e-3));
        assert!(current_series(&doc.groups()[0], "gate").is_empty());
    }
}
