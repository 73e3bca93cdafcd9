//! Boundary conditions and electrodes.
//!
//! Every labelled boundary of the prepared mesh becomes a boundary
//! condition. BOUNDARY cards (`id`, `type`, `res`, `cap`, `workfunction`,
//! `contact`) turn labels into electrodes; labels without a card are
//! region interfaces (`IF_*`) or insulated Neumann boundaries.

use crate::error::{SystemError, SystemResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tc_deck::Card;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryKind {
    Ohmic,
    Schottky,
    GateContact,
    SolderPad,
    Interface,
    Neumann,
}

impl BoundaryKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "ohmic" | "ohmiccontact" => BoundaryKind::Ohmic,
            "schottky" | "schottkycontact" => BoundaryKind::Schottky,
            "gatecontact" | "gate" => BoundaryKind::GateContact,
            "solderpad" => BoundaryKind::SolderPad,
            "interface" => BoundaryKind::Interface,
            "neumann" | "insulator" => BoundaryKind::Neumann,
            _ => return None,
        })
    }

    pub fn is_electrode(self) -> bool {
        matches!(
            self,
            BoundaryKind::Ohmic
                | BoundaryKind::Schottky
                | BoundaryKind::GateContact
                | BoundaryKind::SolderPad
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BoundaryKind::Ohmic => "ohmic",
            BoundaryKind::Schottky => "schottky",
            BoundaryKind::GateContact => "gatecontact",
            BoundaryKind::SolderPad => "solderpad",
            BoundaryKind::Interface => "interface",
            BoundaryKind::Neumann => "neumann",
        }
    }
}

/// Lumped circuit in series with an electrode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalCircuit {
    /// Initial potential of the electrode (NODESET), V.
    pub potential: f64,
    /// Series resistance, Ohm.
    pub resistance: f64,
    /// Parallel capacitance, F.
    pub capacitance: f64,
    /// Last converged applied bias, V.
    pub bias: f64,
    /// Last converged terminal current, A.
    pub current: f64,
}

/// Scalars a boundary carries and BOUNDARYSET can override.
const SCALARS: &[&str] = &[
    "workfunction",
    "resistance",
    "capacitance",
    "potential",
    "heat.transfer",
    "ext.temperature",
];

#[derive(Clone, Debug)]
pub struct Boundary {
    name: String,
    kind: BoundaryKind,
    contact: Option<String>,
    /// Indices into the mesh boundary face list.
    faces: Vec<usize>,
    /// Mesh nodes on this boundary, ascending.
    nodes: Vec<usize>,
    /// Mesh regions touching this boundary, ascending.
    regions: Vec<usize>,
    /// Total side length (2D, µm) or area (3D, µm²).
    extent: f64,
    scalars: BTreeMap<String, f64>,
    pub circuit: ExternalCircuit,
}

impl Boundary {
    pub fn new(
        name: impl Into<String>,
        kind: BoundaryKind,
        faces: Vec<usize>,
        nodes: Vec<usize>,
        regions: Vec<usize>,
        extent: f64,
    ) -> Self {
        let mut scalars: BTreeMap<String, f64> = SCALARS.iter().map(|s| (s.to_string(), 0.0)).collect();
        scalars.insert("ext.temperature".into(), tc_core::constants::T_AMBIENT);
        scalars.insert("workfunction".into(), 4.7);
        Self {
            name: name.into(),
            kind,
            contact: None,
            faces,
            nodes,
            regions,
            extent,
            scalars,
            circuit: ExternalCircuit::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BoundaryKind {
        self.kind
    }

    pub fn is_electrode(&self) -> bool {
        self.kind.is_electrode()
    }

    pub fn contact(&self) -> Option<&str> {
        self.contact.as_deref()
    }

    pub fn faces(&self) -> &[usize] {
        &self.faces
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn regions(&self) -> &[usize] {
        &self.regions
    }

    pub fn extent(&self) -> f64 {
        self.extent
    }

    pub fn scalars(&self) -> &BTreeMap<String, f64> {
        &self.scalars
    }

    pub fn scalar(&self, name: &str) -> SystemResult<f64> {
        self.scalars.get(name).copied().ok_or_else(|| SystemError::UnknownVariable {
            owner: format!("boundary {}", self.name),
            variable: name.to_string(),
        })
    }

    /// Set a known scalar; resistance, capacitance and potential also update
    /// the external circuit.
    pub fn set_scalar(&mut self, name: &str, value: f64) -> SystemResult<()> {
        let slot = self
            .scalars
            .get_mut(name)
            .ok_or_else(|| SystemError::UnknownVariable {
                owner: format!("boundary {}", self.name),
                variable: name.to_string(),
            })?;
        *slot = value;
        match name {
            "resistance" => self.circuit.resistance = value,
            "capacitance" => self.circuit.capacitance = value,
            "potential" => self.circuit.potential = value,
            _ => {}
        }
        Ok(())
    }

    /// Apply a BOUNDARY card to this boundary.
    pub fn configure(&mut self, card: &Card) -> SystemResult<()> {
        let kind = card.get_enum("type", self.kind.name())?;
        self.kind = BoundaryKind::parse(&kind).ok_or_else(|| SystemError::InvalidInput {
            what: format!("{}: unknown boundary type {kind}", card.location),
        })?;
        let res = card.get_real("res", self.circuit.resistance)?;
        let cap = card.get_real("cap", self.circuit.capacitance)?;
        if res < 0.0 || cap < 0.0 {
            return Err(SystemError::InvalidInput {
                what: format!("{}: boundary {} needs res >= 0 and cap >= 0", card.location, self.name),
            });
        }
        self.set_scalar("resistance", res)?;
        self.set_scalar("capacitance", cap)?;
        let wf = card.get_real("workfunction", self.scalar("workfunction")?)?;
        self.set_scalar("workfunction", wf)?;
        let contact = card.get_string("contact", "")?;
        self.contact = (!contact.is_empty()).then_some(contact);
        Ok(())
    }
}

/// Default kind of a mesh label without a BOUNDARY card.
pub fn default_kind(label: &str) -> BoundaryKind {
    if label.starts_with("IF_") {
        BoundaryKind::Interface
    } else {
        BoundaryKind::Neumann
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    fn anode() -> Boundary {
        Boundary::new("anode", default_kind("anode"), vec![0], vec![0, 1], vec![0], 1.0)
    }

    #[test]
    fn labels_default_by_name() {
        assert_eq!(default_kind("IF_n_to_p"), BoundaryKind::Interface);
        assert_eq!(default_kind("pside_Neumann"), BoundaryKind::Neumann);
        assert!(!anode().is_electrode());
    }

    #[test]
    fn cards_make_electrodes() {
        let mut b = anode();
        let card = Card::new("BOUNDARY", SourceLocation::new("d.yaml", 4))
            .with("id", "anode")
            .with("type", "OhmicContact")
            .with("res", 50.0)
            .with("contact", "terminals");
        b.configure(&card).unwrap();
        assert!(b.is_electrode());
        assert_eq!(b.circuit.resistance, 50.0);
        assert_eq!(b.contact(), Some("terminals"));

        let bad = Card::new("BOUNDARY", SourceLocation::new("d.yaml", 5)).with("type", "magic");
        assert!(matches!(b.configure(&bad), Err(SystemError::InvalidInput { .. })));
    }

    #[test]
    fn scalars_are_checked() {
        let mut b = anode();
        b.set_scalar("potential", 0.4).unwrap();
        assert_eq!(b.circuit.potential, 0.4);
        assert!(matches!(
            b.set_scalar("mobility", 1.0),
            Err(SystemError::UnknownVariable { .. })
        ));
    }
}
