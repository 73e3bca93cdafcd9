//! Material parameter table.
//!
//! Values are room-temperature defaults in cm/s/V units. Compound
//! semiconductors record which mole fractions they carry.

use crate::error::{SystemError, SystemResult};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaterialClass {
    Semiconductor,
    Insulator,
    Conductor,
}

/// Mole fraction parameters carried by a compound semiconductor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compound {
    None,
    /// One fraction (`mole.x`), e.g. AlGaAs.
    Single,
    /// Two fractions (`mole.x`, `mole.y`), e.g. InGaAsP.
    Complex,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub name: &'static str,
    pub class: MaterialClass,
    /// Relative permittivity.
    pub permittivity: f64,
    /// Band gap (eV).
    pub bandgap: f64,
    /// Intrinsic carrier density (cm^-3).
    pub ni: f64,
    /// Low-field electron and hole mobility (cm^2/V/s).
    pub mobility: [f64; 2],
    /// Electron affinity (semiconductors) or work function (conductors), eV.
    pub affinity: f64,
    /// Thermal conductivity (W/cm/K).
    pub kappa: f64,
    pub compound: Compound,
}

#[allow(clippy::too_many_arguments)]
const fn semiconductor(
    name: &'static str,
    permittivity: f64,
    bandgap: f64,
    ni: f64,
    mobility: [f64; 2],
    affinity: f64,
    kappa: f64,
    compound: Compound,
) -> Material {
    Material {
        name,
        class: MaterialClass::Semiconductor,
        permittivity,
        bandgap,
        ni,
        mobility,
        affinity,
        kappa,
        compound,
    }
}

const fn insulator(name: &'static str, permittivity: f64, bandgap: f64, kappa: f64) -> Material {
    Material {
        name,
        class: MaterialClass::Insulator,
        permittivity,
        bandgap,
        ni: 0.0,
        mobility: [0.0, 0.0],
        affinity: 0.9,
        kappa,
        compound: Compound::None,
    }
}

const fn conductor(name: &'static str, workfunction: f64, kappa: f64) -> Material {
    Material {
        name,
        class: MaterialClass::Conductor,
        permittivity: 1.0,
        bandgap: 0.0,
        ni: 0.0,
        mobility: [0.0, 0.0],
        affinity: workfunction,
        kappa,
        compound: Compound::None,
    }
}

static MATERIALS: &[Material] = &[
    semiconductor("Si", 11.7, 1.12, 1.0e10, [1417.0, 470.5], 4.05, 1.48, Compound::None),
    semiconductor("Ge", 16.2, 0.66, 2.0e13, [3900.0, 1900.0], 4.0, 0.6, Compound::None),
    semiconductor("GaAs", 12.9, 1.424, 2.1e6, [8500.0, 400.0], 4.07, 0.46, Compound::None),
    semiconductor("AlGaAs", 12.3, 1.8, 2.0e3, [3000.0, 200.0], 3.74, 0.2, Compound::Single),
    semiconductor("InGaAsP", 13.0, 1.0, 5.0e8, [5000.0, 200.0], 4.3, 0.05, Compound::Complex),
    insulator("SiO2", 3.9, 9.0, 0.014),
    insulator("Si3N4", 7.5, 5.0, 0.185),
    insulator("Air", 1.0, 10.0, 2.6e-4),
    conductor("Al", 4.28, 2.37),
    conductor("Cu", 4.65, 4.01),
    conductor("Elec", 4.7, 2.0),
    conductor("PolySi", 4.17, 0.3),
];

/// Look up a material by name (case-insensitive).
pub fn material(name: &str) -> SystemResult<Material> {
    MATERIALS
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .copied()
        .ok_or_else(|| SystemError::UnknownMaterial {
            name: name.to_string(),
        })
}

impl Material {
    pub fn is_semiconductor(&self) -> bool {
        self.class == MaterialClass::Semiconductor
    }

    /// Absolute permittivity (F/cm).
    pub fn epsilon(&self) -> f64 {
        self.permittivity * tc_core::constants::EPS0_F_PER_CM
    }

    /// Intrinsic density at lattice temperature `t`, scaled from 300 K.
    pub fn ni_at(&self, t: f64) -> f64 {
        if self.ni <= 0.0 {
            return 0.0;
        }
        let t0 = tc_core::constants::T_AMBIENT;
        let vt = tc_core::constants::thermal_voltage(t);
        let vt0 = tc_core::constants::thermal_voltage(t0);
        let arg = 0.5 * self.bandgap * (1.0 / vt0 - 1.0 / vt);
        self.ni * (t / t0).powf(1.5) * tc_core::limited_exp(arg, 80.0)
    }
}
