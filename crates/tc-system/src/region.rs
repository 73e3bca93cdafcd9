//! Regions: named sub-domains with a material and per-node variables.

use crate::error::{SystemError, SystemResult};
use crate::material::{Compound, Material, MaterialClass};
use crate::model::AdvancedModel;
use std::collections::{BTreeMap, HashMap};
use tc_core::constants;
use tc_deck::Parameter;

/// Physical-model interface selection for one model kind (mobility,
/// recombination, ...), with its user parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PmiSelection {
    pub model: String,
    pub parameters: Vec<Parameter>,
}

#[derive(Clone, Debug)]
pub struct Region {
    name: String,
    index: usize,
    material: Material,
    /// Mesh node ids of the region, ascending.
    nodes: Vec<usize>,
    local: HashMap<usize, usize>,
    variables: BTreeMap<String, Vec<f64>>,
    pub model: AdvancedModel,
    pub pmi: BTreeMap<String, PmiSelection>,
}

const SEMICONDUCTOR_VARS: &[&str] = &[
    "potential",
    "electron",
    "hole",
    "temperature",
    "doping",
    "doping.na",
    "doping.nd",
    "optical.gen",
    "particle.gen",
];
const INSULATOR_VARS: &[&str] = &["potential", "temperature", "optical.gen", "particle.gen"];
const CONDUCTOR_VARS: &[&str] = &["potential", "temperature"];

impl Region {
    pub fn new(name: impl Into<String>, index: usize, material: Material, nodes: Vec<usize>) -> Self {
        let local = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let n = nodes.len();
        let mut names: Vec<&str> = match material.class {
            MaterialClass::Semiconductor => SEMICONDUCTOR_VARS.to_vec(),
            MaterialClass::Insulator => INSULATOR_VARS.to_vec(),
            MaterialClass::Conductor => CONDUCTOR_VARS.to_vec(),
        };
        match material.compound {
            Compound::None => {}
            Compound::Single => names.push("mole.x"),
            Compound::Complex => names.extend(["mole.x", "mole.y"]),
        }
        let variables = names
            .into_iter()
            .map(|v| {
                let init = if v == "temperature" { constants::T_AMBIENT } else { 0.0 };
                (v.to_string(), vec![init; n])
            })
            .collect();
        Self {
            name: name.into(),
            index,
            material,
            nodes,
            local,
            variables,
            model: AdvancedModel::default(),
            pmi: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the mesh region this region was built from.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn class(&self) -> MaterialClass {
        self.material.class
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Position of mesh node `node` in this region's arrays.
    pub fn local_index(&self, node: usize) -> Option<usize> {
        self.local.get(&node).copied()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn variable(&self, name: &str) -> SystemResult<&[f64]> {
        self.variables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| self.unknown(name))
    }

    pub fn variable_mut(&mut self, name: &str) -> SystemResult<&mut [f64]> {
        match self.variables.get_mut(name) {
            Some(v) => Ok(v.as_mut_slice()),
            None => Err(SystemError::UnknownVariable {
                owner: format!("region {}", self.name),
                variable: name.to_string(),
            }),
        }
    }

    /// Replace a variable's node values; the length must match the region.
    pub fn set_variable(&mut self, name: &str, values: Vec<f64>) -> SystemResult<()> {
        if values.len() != self.nodes.len() {
            return Err(SystemError::InvalidInput {
                what: format!(
                    "{} values given for {} nodes of region {}",
                    values.len(),
                    self.nodes.len(),
                    self.name
                ),
            });
        }
        let slot = self.variable_mut(name)?;
        slot.copy_from_slice(&values);
        Ok(())
    }

    pub fn fill_variable(&mut self, name: &str, value: f64) -> SystemResult<()> {
        self.variable_mut(name)?.fill(value);
        Ok(())
    }

    fn unknown(&self, name: &str) -> SystemError {
        SystemError::UnknownVariable {
            owner: format!("region {}", self.name),
            variable: name.to_string(),
        }
    }

    /// Equilibrium electrostatic potential of a node with net doping `n`
    /// (donors positive) at lattice temperature `t`.
    pub fn equilibrium_potential(&self, net: f64, t: f64) -> f64 {
        let vt = constants::thermal_voltage(t);
        match self.material.class {
            MaterialClass::Semiconductor => {
                let ni = self.material.ni_at(t);
                vt * (0.5 * net / ni).asinh()
            }
            _ => 0.0,
        }
    }

    /// Reset carriers and potential to thermal equilibrium of the current
    /// doping; net doping is recomputed from the donor/acceptor fields.
    pub fn init_equilibrium(&mut self) {
        let t = self
            .variables
            .get("temperature")
            .and_then(|v| v.first().copied())
            .unwrap_or(constants::T_AMBIENT);
        if self.material.class != MaterialClass::Semiconductor {
            if let Some(p) = self.variables.get_mut("potential") {
                p.fill(0.0);
            }
            return;
        }
        let ni = self.material.ni_at(t);
        let n_nodes = self.nodes.len();
        let net: Vec<f64> = match (self.variables.get("doping.nd"), self.variables.get("doping.na")) {
            (Some(nd), Some(na)) => nd.iter().zip(na).map(|(d, a)| d - a).collect(),
            _ => vec![0.0; n_nodes],
        };
        let mut electron = Vec::with_capacity(n_nodes);
        let mut hole = Vec::with_capacity(n_nodes);
        let mut potential = Vec::with_capacity(n_nodes);
        for &d in &net {
            // majority carrier from charge neutrality, minority from the mass action law
            let half = 0.5 * d;
            let root = (half * half + ni * ni).sqrt();
            let (n, p) = if d >= 0.0 {
                let n = half + root;
                (n, ni * ni / n)
            } else {
                let p = -half + root;
                (ni * ni / p, p)
            };
            electron.push(n);
            hole.push(p);
            potential.push(self.equilibrium_potential(d, t));
        }
        self.variables.insert("doping".into(), net);
        self.variables.insert("electron".into(), electron);
        self.variables.insert("hole".into(), hole);
        self.variables.insert("potential".into(), potential);
    }

    /// Mean of a variable over the region nodes.
    pub fn mean(&self, name: &str) -> SystemResult<f64> {
        let v = self.variable(name)?;
        if v.is_empty() {
            return Ok(0.0);
        }
        Ok(v.iter().sum::<f64>() / v.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::material;
    use proptest::prelude::*;

    fn silicon(n: usize) -> Region {
        Region::new("bulk", 0, material("Si").unwrap(), (0..n).collect())
    }

    #[test]
    fn variables_follow_material_class() {
        let r = silicon(3);
        assert!(r.has_variable("doping.na"));
        assert!(!r.has_variable("mole.x"));
        assert_eq!(r.variable("temperature").unwrap(), &[300.0; 3]);

        let ox = Region::new("ox", 1, material("SiO2").unwrap(), vec![4, 5]);
        assert!(!ox.has_variable("electron"));
        assert!(matches!(
            ox.variable("electron"),
            Err(SystemError::UnknownVariable { .. })
        ));

        let algaas = Region::new("barrier", 2, material("AlGaAs").unwrap(), vec![1]);
        assert!(algaas.has_variable("mole.x"));
        assert!(!algaas.has_variable("mole.y"));
    }

    #[test]
    fn equilibrium_obeys_mass_action() {
        let mut r = silicon(2);
        r.set_variable("doping.nd", vec![1e17, 0.0]).unwrap();
        r.set_variable("doping.na", vec![0.0, 1e16]).unwrap();
        r.init_equilibrium();
        let n = r.variable("electron").unwrap().to_vec();
        let p = r.variable("hole").unwrap().to_vec();
        for k in 0..2 {
            assert!((n[k] * p[k] / 1e20 - 1.0).abs() < 1e-9);
        }
        assert!((n[0] / 1e17 - 1.0).abs() < 1e-9);
        assert!((p[1] / 1e16 - 1.0).abs() < 1e-9);
        let psi = r.variable("potential").unwrap();
        assert!(psi[0] > 0.35 && psi[1] < -0.3);
        assert_eq!(r.variable("doping").unwrap(), &[1e17, -1e16]);
    }

    #[test]
    fn set_variable_checks_length() {
        let mut r = silicon(2);
        assert!(matches!(
            r.set_variable("doping.na", vec![1.0]),
            Err(SystemError::InvalidInput { .. })
        ));
        r.fill_variable("temperature", 350.0).unwrap();
        assert_eq!(r.mean("temperature").unwrap(), 350.0);
        assert_eq!(r.local_index(1), Some(1));
        assert_eq!(r.local_index(7), None);
    }

    proptest! {
        #[test]
        fn equilibrium_potential_is_odd_and_increasing(net in 1e10f64..1e20, extra in 1e10f64..1e20) {
            let r = silicon(1);
            let t = tc_core::constants::T_AMBIENT;
            let v = r.equilibrium_potential(net, t);
            prop_assert!(v > 0.0);
            prop_assert!((r.equilibrium_potential(-net, t) + v).abs() <= 1e-12 * v.abs().max(1.0));
            prop_assert!(r.equilibrium_potential(net + extra, t) >= v);
        }
    }
}
