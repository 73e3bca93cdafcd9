//! Adaptive refinement and geometric transforms of the live mesh.
//!
//! Every mesh change runs the same rebuild: profile fields without a
//! solver are captured, the mesh is gathered on the primary and changed
//! there, then broadcast again; the system is rebuilt and its fields are
//! recomputed or interpolated before the regions are re-initialised.

use crate::control::SolverControl;
use crate::error::{AppError, AppResult};
use std::f64::consts::PI;
use tc_core::timing::Timer;
use tc_core::{Tolerances, nearly_equal};
use tc_deck::Card;
use tc_interp::InterpolationLaw;
use tc_mesh::{FlagPolicy, MeshLifecycle, RefineFlag, flag_cells};
use tc_system::{FieldTransfer, Measure};
use tracing::{debug, info, warn};

/// Flagging policies of a REFINE.CONFORM card. Coarsening is never
/// requested for conforming remeshing.
pub(crate) fn conform_policies(card: &Card) -> AppResult<Vec<FlagPolicy>> {
    let mut policies = Vec::new();
    if card.is_parameter_exist("error.fraction") {
        let refine = card.get_real("error.fraction", 0.0)?;
        policies.push(FlagPolicy::ErrorFraction { refine, coarsen: 0.0 });
    }
    if card.is_parameter_exist("cell.fraction") {
        let refine = card.get_real("cell.fraction", 0.0)?;
        policies.push(FlagPolicy::CellFraction { refine, coarsen: 0.0 });
    }
    if card.is_parameter_exist("error.threshold") {
        let refine = card.get_real("error.threshold", 0.0)?;
        policies.push(FlagPolicy::ErrorThreshold { refine, coarsen: 0.0 });
    }
    Ok(policies)
}

/// Flagging policies of a REFINE.HIERARCHICAL card.
pub(crate) fn hierarchical_policies(card: &Card) -> AppResult<Vec<FlagPolicy>> {
    let pair = |refine: &str, coarsen: &str| -> AppResult<Option<(f64, f64)>> {
        if !card.is_parameter_exist(refine) && !card.is_parameter_exist(coarsen) {
            return Ok(None);
        }
        Ok(Some((card.get_real(refine, 0.0)?, card.get_real(coarsen, 0.0)?)))
    };
    let mut policies = Vec::new();
    if let Some((refine, coarsen)) = pair("error.refine.fraction", "error.coarsen.fraction")? {
        policies.push(FlagPolicy::ErrorFraction { refine, coarsen });
    }
    if let Some((refine, coarsen)) = pair("cell.refine.fraction", "cell.coarsen.fraction")? {
        policies.push(FlagPolicy::CellFraction { refine, coarsen });
    }
    if let Some((refine, coarsen)) = pair("error.refine.threshold", "error.coarsen.threshold")? {
        policies.push(FlagPolicy::ErrorThreshold { refine, coarsen });
    }
    Ok(policies)
}

/// Evenly spaced layer coordinates from `lo` to `hi`.
fn layers(lo: f64, hi: f64, spaces: usize) -> Vec<f64> {
    (0..=spaces).map(|k| lo + (hi - lo) * k as f64 / spaces as f64).collect()
}

fn spaces(card: &Card) -> AppResult<usize> {
    let n = card.get_int("n.spaces", 1)?;
    if n < 1 {
        return Err(AppError::config(card.location(), "n.spaces must be at least 1"));
    }
    Ok(n as usize)
}

impl SolverControl {
    pub(crate) fn refine(&mut self, card: &Card) -> AppResult<()> {
        let location = card.location();
        let key = card.key();
        if key == "REFINE.UNIFORM" {
            let steps = card.get_int("step", 1)?;
            if steps < 1 {
                return Err(AppError::config(location, "step must be at least 1"));
            }
            return self.rebuild(true, |life| {
                let stats = life.refine_uniformly(steps as usize)?;
                info!(before = stats.cells_before, after = stats.cells_after, "uniform refinement");
                Ok(())
            });
        }

        let hierarchical = key == "REFINE.HIERARCHICAL";
        let policies = if hierarchical {
            hierarchical_policies(card)?
        } else {
            conform_policies(card)?
        };
        if policies.is_empty() {
            return Err(AppError::config(location, "refinement requires at least one flagging policy"));
        }
        let variable = card.get_string("variable", "doping")?;
        let measure = card.get_string("measure", "signedlog")?;
        let measure =
            Measure::parse(&measure).ok_or_else(|| AppError::config(location, format!("unknown measure {measure}")))?;

        let errors = self.system.estimate_error(&variable, measure)?;
        let flags = flag_cells(&errors, &policies)?;
        let refined = flags.iter().filter(|f| **f == RefineFlag::Refine).count();
        let coarsened = flags.iter().filter(|f| **f == RefineFlag::Coarsen).count();
        debug!(cells = flags.len(), refined, coarsened, %variable, "cells flagged");

        self.rebuild(true, move |life| {
            if hierarchical {
                let stats = life.refine_hierarchical(&flags)?;
                info!(
                    before = stats.cells_before,
                    after = stats.cells_after,
                    refined = stats.refined,
                    coarsened = stats.coarsened,
                    "hierarchical refinement"
                );
            } else {
                life.refine_conforming(&flags)?;
                info!(refined, "conforming refinement");
            }
            Ok(())
        })
    }

    pub(crate) fn extend(&mut self, card: &Card) -> AppResult<()> {
        let z_min = card.get_real("z.min", 0.0)?;
        let z_max = if card.is_parameter_exist("z.max") {
            card.get_real("z.max", z_min)?
        } else {
            z_min + card.get_real("width", 1.0)?
        };
        if z_max <= z_min {
            return Err(AppError::config(card.location(), "extrusion needs z.max > z.min"));
        }
        let z = layers(z_min, z_max, spaces(card)?);
        // planar interpolators ignore z, so captured fields carry over
        self.rebuild(true, move |life| {
            life.extrude(&z)?;
            Ok(())
        })
    }

    pub(crate) fn rotate(&mut self, card: &Card) -> AppResult<()> {
        let angle = card.get_real("angle", 360.0)?;
        if !(angle > 0.0 && angle <= 360.0) {
            return Err(AppError::config(card.location(), "angle must lie in (0, 360] degrees"));
        }
        let full = nearly_equal(angle, 360.0, Tolerances::default());
        let angles = layers(0.0, angle * PI / 180.0, spaces(card)?);
        if full && angles.len() < 4 {
            return Err(AppError::config(card.location(), "a full revolution needs n.spaces >= 3"));
        }
        self.rebuild(false, move |life| {
            life.revolve(&angles, full)?;
            Ok(())
        })
    }

    /// Profile fields that no solver can recompute after a rebuild.
    fn capture_profiles(&self) -> AppResult<Vec<FieldTransfer>> {
        let mut transfers = Vec::new();
        if !self.system.has_doping_solver() {
            transfers.push(
                self.system
                    .capture_fields(&["doping.na", "doping.nd"], InterpolationLaw::Asinh)?,
            );
        }
        if !self.system.has_mole_solver()
            && (self.system.has_single_compound_region() || self.system.has_complex_compound_region())
        {
            transfers.push(self.system.capture_fields(&["mole.x", "mole.y"], InterpolationLaw::Linear)?);
        }
        transfers.retain(|t| !t.is_empty());
        Ok(transfers)
    }

    /// Change the mesh on the primary and bring the system back to a
    /// stable state on every worker. Collective.
    fn rebuild<F>(&mut self, interpolate: bool, change: F) -> AppResult<()>
    where
        F: FnOnce(&mut MeshLifecycle) -> AppResult<()>,
    {
        let timer = Timer::start("rebuild");
        let transfers = self.capture_profiles()?;
        if !interpolate && !transfers.is_empty() {
            warn!("fields without a profile solver are not carried through this transform");
        }

        self.life.gather()?;
        if self.life.comm().is_primary()
            && let Err(e) = change(&mut self.life)
        {
            // release the workers waiting in the broadcast below
            if self.life.comm().size() > 1 {
                let _ = self.life.comm().broadcast_mesh(None);
            }
            return Err(e);
        }
        self.life.broadcast()?;

        self.system.clear();
        self.system.build(self.life.mesh()?, &self.deck)?;
        let ran = self.system.run_profile_solvers()?;
        let mut restored = 0;
        if interpolate {
            for transfer in &transfers {
                restored += self.system.restore_fields(transfer)?;
            }
        }
        self.system.init_regions()?;
        info!(
            cells = self.life.mesh()?.n_cells(),
            profile_solvers = ran.len(),
            interpolated = restored,
            elapsed_s = timer.stop(),
            "mesh rebuilt"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tc_core::SourceLocation;

    fn card(key: &str) -> Card {
        Card::new(key, SourceLocation::new("deck.yaml", 4))
    }

    #[test]
    fn conform_policies_never_coarsen() {
        let c = card("REFINE.CONFORM")
            .with("error.fraction", 0.3)
            .with("error.threshold", 2.0);
        assert_eq!(
            conform_policies(&c).unwrap(),
            vec![
                FlagPolicy::ErrorFraction { refine: 0.3, coarsen: 0.0 },
                FlagPolicy::ErrorThreshold { refine: 2.0, coarsen: 0.0 },
            ]
        );
        assert!(conform_policies(&card("REFINE.CONFORM")).unwrap().is_empty());
    }

    #[test]
    fn hierarchical_policies_pair_refine_and_coarsen() {
        let c = card("REFINE.HIERARCHICAL")
            .with("cell.refine.fraction", 0.2)
            .with("cell.coarsen.fraction", 0.1)
            .with("error.coarsen.threshold", 0.5);
        assert_eq!(
            hierarchical_policies(&c).unwrap(),
            vec![
                FlagPolicy::CellFraction { refine: 0.2, coarsen: 0.1 },
                FlagPolicy::ErrorThreshold { refine: 0.0, coarsen: 0.5 },
            ]
        );
    }

    #[test]
    fn conforming_keys_are_not_hierarchical() {
        let c = card("REFINE.HIERARCHICAL").with("error.fraction", 0.3);
        assert!(hierarchical_policies(&c).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn layers_span_the_interval(lo in -5.0f64..5.0, width in 0.1f64..10.0, n in 1usize..50) {
            let z = layers(lo, lo + width, n);
            prop_assert_eq!(z.len(), n + 1);
            prop_assert_eq!(z[0], lo);
            prop_assert!((z[n] - (lo + width)).abs() < 1e-9);
            prop_assert!(z.windows(2).all(|w| w[1] > w[0]));
        }
    }
}
