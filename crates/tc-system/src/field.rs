//! Optical and particle carrier generation.
//!
//! LIGHT cards describe a beam entering the device at `y.top` and absorbed
//! with depth (Beer-Lambert); PARTICLE cards describe a single ion track
//! through (`x`, `y`) with a Gaussian radial profile. `update_source`
//! evaluates both at the region nodes into the `optical.gen` and
//! `particle.gen` variables (pairs/cm³/s).

use crate::error::SystemResult;
use crate::material::MaterialClass;
use crate::region::Region;
use std::f64::consts::PI;
use tc_deck::{Card, Deck};
use tc_mesh::Mesh;
use tracing::debug;

const PLANCK: f64 = 6.626_070_15e-34;
const LIGHT_SPEED: f64 = 2.997_924_58e8;
/// µm to cm.
const UM: f64 = 1e-4;

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    /// Incident power density (W/cm²).
    pub intensity: f64,
    /// Wavelength (µm).
    pub wavelength: f64,
    pub quantum_efficiency: f64,
    /// Absorption coefficient (1/cm).
    pub absorption: f64,
    /// Entry surface (µm); depth grows towards smaller `y`.
    pub y_top: f64,
}

impl Light {
    fn from_card(card: &Card) -> SystemResult<Self> {
        Ok(Self {
            intensity: card.get_real("intensity", 0.0)?,
            wavelength: card.get_real("wavelength", 0.532)?,
            quantum_efficiency: card.get_real("quan.eff", 1.0)?,
            absorption: card.get_real("absorption", 1e4)?,
            y_top: card.get_real("y.top", 0.0)?,
        })
    }

    fn photon_flux(&self) -> f64 {
        let energy = PLANCK * LIGHT_SPEED / (self.wavelength * 1e-6);
        self.intensity / energy
    }

    pub fn generation(&self, p: &[f64; 3]) -> f64 {
        let depth = ((self.y_top - p[1]) * UM).max(0.0);
        self.quantum_efficiency * self.photon_flux() * self.absorption * (-self.absorption * depth).exp()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    /// Track position (µm).
    pub x: f64,
    pub y: f64,
    /// Characteristic track radius (µm).
    pub radius: f64,
    /// Electron-hole pairs per µm of track.
    pub pairs_per_um: f64,
    /// Gaussian time profile: peak time and width (s).
    pub t0: f64,
    pub t_char: f64,
}

impl Particle {
    fn from_card(card: &Card) -> SystemResult<Self> {
        Ok(Self {
            x: card.get_real("x", 0.0)?,
            y: card.get_real("y", 0.0)?,
            radius: card.get_real("radius", 0.1)?,
            pairs_per_um: card.get_real("pairs", 1e5)?,
            t0: card.get_real("t0", 2e-12)?,
            t_char: card.get_real("t.char", 1e-12)?,
        })
    }

    /// Pair density rate at `p` and time `t` (pairs/cm³/s).
    pub fn generation(&self, p: &[f64; 3], t: f64) -> f64 {
        let r2 = (p[0] - self.x).powi(2) + (p[1] - self.y).powi(2);
        let radial = (-r2 / (self.radius * self.radius)).exp() / (PI * self.radius * self.radius);
        // pairs/µm³ to pairs/cm³
        let density = self.pairs_per_um * radial / (UM * UM * UM);
        let temporal = (-((t - self.t0) / self.t_char).powi(2)).exp() / (self.t_char * PI.sqrt());
        density * temporal
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSource {
    lights: Vec<Light>,
    particles: Vec<Particle>,
    /// Time at which particle generation was last evaluated.
    time: f64,
}

impl FieldSource {
    pub fn from_deck(deck: &Deck) -> SystemResult<Self> {
        let lights = deck
            .cards_with_key("LIGHT")
            .map(Light::from_card)
            .collect::<SystemResult<Vec<_>>>()?;
        let particles = deck
            .cards_with_key("PARTICLE")
            .map(Particle::from_card)
            .collect::<SystemResult<Vec<_>>>()?;
        Ok(Self {
            lights,
            particles,
            time: 0.0,
        })
    }

    pub fn has_light(&self) -> bool {
        !self.lights.is_empty()
    }

    pub fn has_particle(&self) -> bool {
        !self.particles.is_empty()
    }

    pub fn set_time(&mut self, t: f64) {
        self.time = t;
    }

    /// Evaluate generation at every region node. Conductors carry none.
    pub fn update_source(&self, mesh: &Mesh, regions: &mut [Region]) -> SystemResult<()> {
        for region in regions.iter_mut() {
            if region.class() == MaterialClass::Conductor {
                continue;
            }
            let points: Vec<[f64; 3]> = region.nodes().iter().map(|&n| mesh.nodes()[n]).collect();
            let optical: Vec<f64> = points
                .iter()
                .map(|p| self.lights.iter().map(|l| l.generation(p)).sum())
                .collect();
            let particle: Vec<f64> = points
                .iter()
                .map(|p| self.particles.iter().map(|q| q.generation(p, self.time)).sum())
                .collect();
            region.set_variable("optical.gen", optical)?;
            region.set_variable("particle.gen", particle)?;
        }
        debug!(
            lights = self.lights.len(),
            particles = self.particles.len(),
            "field source updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    #[test]
    fn light_decays_with_depth() {
        let card = Card::new("LIGHT", SourceLocation::new("d.yaml", 2))
            .with("intensity", 1.0)
            .with("y.top", 1.0);
        let light = Light::from_card(&card).unwrap();
        let surface = light.generation(&[0.0, 1.0, 0.0]);
        let deep = light.generation(&[0.0, 0.0, 0.0]);
        // alpha = 1e4/cm over 1 µm is one absorption length
        assert!((deep / surface - (-1.0f64).exp()).abs() < 1e-12);
        // above the surface the beam is not yet absorbed
        assert_eq!(light.generation(&[0.0, 2.0, 0.0]), surface);
    }

    #[test]
    fn particle_track_peaks_on_axis() {
        let card = Card::new("PARTICLE", SourceLocation::new("d.yaml", 3))
            .with("x", 1.0)
            .with("y", 0.5);
        let p = Particle::from_card(&card).unwrap();
        let on = p.generation(&[1.0, 0.5, 0.0], p.t0);
        let off = p.generation(&[1.2, 0.5, 0.0], p.t0);
        let late = p.generation(&[1.0, 0.5, 0.0], p.t0 + 5.0 * p.t_char);
        assert!(on > off && off > 0.0);
        assert!(late < on * 1e-9);
    }
}
