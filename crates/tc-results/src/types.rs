//! Result data types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Continuation parameter of a recorded point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepValue {
    /// e.g. `anode.voltage`, `anode.current`, `time`, `frequency`.
    pub name: String,
    pub value: f64,
}

/// Small-signal terminal admittance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Admittance {
    /// S
    pub conductance: f64,
    /// F
    pub capacitance: f64,
}

/// One converged point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepValue>,
    /// Applied bias per electrode (V).
    pub bias: BTreeMap<String, f64>,
    /// Terminal current per electrode (A).
    pub currents: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub admittance: BTreeMap<String, Admittance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionGroup {
    pub id: String,
    pub label: String,
    pub solve_type: String,
    pub solutions: Vec<SolutionRecord>,
}
