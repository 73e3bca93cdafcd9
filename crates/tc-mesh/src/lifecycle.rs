//! Ownership of the live mesh and its generator for one run.

use crate::comm::{Communicator, SerialCommunicator};
use crate::error::{MeshError, MeshResult};
use crate::extrude;
use crate::generator::{MeshGenerator, generator_for};
use crate::mesh::Mesh;
use crate::refine::{self, RefineFlag, RefineStats};
use std::sync::Arc;
use tc_core::timing::{Timer, stage_timing};
use tc_deck::Deck;
use tracing::{debug, info};

pub struct MeshLifecycle {
    comm: Arc<dyn Communicator>,
    generator: Option<Box<dyn MeshGenerator>>,
    mesh: Option<Mesh>,
}

impl Default for MeshLifecycle {
    fn default() -> Self {
        Self::new(Arc::new(SerialCommunicator))
    }
}

impl MeshLifecycle {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            generator: None,
            mesh: None,
        }
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn generator_name(&self) -> Option<&'static str> {
        self.generator.as_ref().map(|g| g.name())
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh.is_some()
    }

    /// Build the mesh described by the deck's MESH card.
    ///
    /// The generator type is checked on every worker; the mesh is built on
    /// the primary only. Call `broadcast` before using the mesh.
    pub fn generate(&mut self, deck: &Deck) -> MeshResult<()> {
        if let Some(existing) = self.generator_name() {
            return Err(MeshError::GeneratorExists {
                existing: existing.to_string(),
            });
        }
        let card = deck.find("MESH").ok_or_else(|| MeshError::InvalidInput {
            what: "deck has no MESH card".to_string(),
        })?;
        let kind = card.get_enum("type", "s_tri3")?;
        let mut generator = generator_for(&kind)?;

        if self.comm.is_primary() {
            let timer = Timer::start("meshing");
            let mesh = match generator.generate(deck) {
                Ok(mesh) => mesh,
                Err(e) => {
                    // release the workers waiting in the next broadcast
                    if self.comm.size() > 1 {
                        let _ = self.comm.broadcast_mesh(None);
                    }
                    return Err(e);
                }
            };
            stage_timing::MESHING.record(timer.stop());
            info!(
                generator = generator.name(),
                nodes = mesh.n_nodes(),
                cells = mesh.n_cells(),
                "generated mesh"
            );
            self.mesh = Some(mesh);
        }
        self.generator = Some(generator);
        Ok(())
    }

    /// Publish the primary's mesh to every worker and prepare it for field
    /// attachment. Collective.
    pub fn broadcast(&mut self) -> MeshResult<()> {
        let outgoing = if self.comm.is_primary() {
            self.mesh.take()
        } else {
            None
        };
        let mut mesh = self.comm.broadcast_mesh(outgoing)?;
        mesh.prepare()?;
        debug!(
            rank = self.comm.rank(),
            cells = mesh.n_cells(),
            "mesh broadcast"
        );
        self.mesh = Some(mesh);
        Ok(())
    }

    /// Collect the mesh on the primary; other workers drop their copy.
    /// Collective.
    pub fn gather(&mut self) -> MeshResult<()> {
        let mesh = self.mesh.as_ref().ok_or(MeshError::NoMesh)?;
        let gathered = self.comm.gather_mesh(mesh)?;
        self.mesh = gathered.map(|mut m| {
            m.unprepare();
            m
        });
        Ok(())
    }

    /// Forget the mesh unless `preserve_geometry` is set. The generator is
    /// kept for the rest of the run.
    pub fn clear(&mut self, preserve_geometry: bool) {
        if !preserve_geometry {
            self.mesh = None;
        }
    }

    /// The prepared mesh.
    pub fn mesh(&self) -> MeshResult<&Mesh> {
        let mesh = self.mesh.as_ref().ok_or(MeshError::NoMesh)?;
        if !mesh.is_prepared() {
            return Err(MeshError::NotPrepared);
        }
        Ok(mesh)
    }

    /// Replace the mesh (import or geometric transform). The new mesh must
    /// be broadcast before use.
    pub fn replace(&mut self, mut mesh: Mesh) {
        mesh.unprepare();
        self.mesh = Some(mesh);
    }

    fn raw_mesh(&mut self) -> MeshResult<&mut Mesh> {
        self.mesh.as_mut().ok_or(MeshError::NoMesh)
    }

    /// Conforming remesh of the flagged cells. Uses the run's generator when
    /// there is one; otherwise only 2D meshes can be refined.
    pub fn refine_conforming(&mut self, flags: &[RefineFlag]) -> MeshResult<()> {
        let mesh = self.mesh.as_ref().ok_or(MeshError::NoMesh)?;
        let refined = match self.generator.as_mut() {
            Some(generator) => generator.refine(mesh, flags)?,
            None if mesh.dim() == 2 => refine::refine_conforming(mesh, flags)?,
            None => {
                return Err(MeshError::UnsupportedOperation {
                    what: "conforming refinement of a 3D mesh without a generator".to_string(),
                });
            }
        };
        self.replace(refined);
        Ok(())
    }

    /// Hierarchical refinement and coarsening of the existing mesh.
    pub fn refine_hierarchical(&mut self, flags: &[RefineFlag]) -> MeshResult<RefineStats> {
        refine::refine_and_coarsen(self.raw_mesh()?, flags)
    }

    pub fn refine_uniformly(&mut self, steps: usize) -> MeshResult<RefineStats> {
        refine::refine_uniformly(self.raw_mesh()?, steps)
    }

    /// Replace the 2D mesh by its extrusion through the layers `z`.
    pub fn extrude(&mut self, z: &[f64]) -> MeshResult<()> {
        let solid = extrude::extrude(self.raw_mesh()?, z)?;
        self.replace(solid);
        Ok(())
    }

    /// Replace the 2D mesh by its revolution about the y axis.
    pub fn revolve(&mut self, angles: &[f64], full: bool) -> MeshResult<()> {
        let solid = extrude::revolve(self.raw_mesh()?, angles, full)?;
        self.replace(solid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalGroup;
    use std::thread;
    use tc_core::SourceLocation;
    use tc_deck::Card;

    fn deck(kind: &str) -> Deck {
        let l = SourceLocation::default;
        Deck::new(
            "lifecycle.yaml",
            vec![
                Card::new("MESH", l()).with("type", kind),
                Card::new("X.MESH", l()).with("width", 1.0).with("n.spaces", 2_i64),
                Card::new("Y.MESH", l()).with("width", 1.0).with("n.spaces", 2_i64),
                Card::new("REGION", l()).with("label", "si").with("material", "Si"),
            ],
        )
    }

    #[test]
    fn mesh_unusable_before_broadcast() {
        let mut life = MeshLifecycle::default();
        assert_eq!(life.mesh().unwrap_err(), MeshError::NoMesh);
        life.generate(&deck("s_quad4")).unwrap();
        assert_eq!(life.mesh().unwrap_err(), MeshError::NotPrepared);
        life.broadcast().unwrap();
        assert_eq!(life.mesh().unwrap().n_cells(), 4);
    }

    #[test]
    fn one_generator_per_run() {
        let mut life = MeshLifecycle::default();
        life.generate(&deck("s_tri3")).unwrap();
        assert!(matches!(
            life.generate(&deck("s_tri3")),
            Err(MeshError::GeneratorExists { .. })
        ));
        let mut other = MeshLifecycle::default();
        assert!(matches!(
            other.generate(&deck("c_2d")),
            Err(MeshError::UnsupportedGenerator { .. })
        ));
    }

    #[test]
    fn clear_preserves_geometry_on_request() {
        let mut life = MeshLifecycle::default();
        life.generate(&deck("s_tri3")).unwrap();
        life.broadcast().unwrap();
        life.clear(true);
        assert!(life.mesh().is_ok());
        life.clear(false);
        assert!(!life.has_mesh());
        assert_eq!(life.generator_name(), Some("s_tri3"));
    }

    #[test]
    fn conforming_refinement_needs_rebroadcast() {
        let mut life = MeshLifecycle::default();
        life.generate(&deck("s_tri3")).unwrap();
        life.broadcast().unwrap();
        let n = life.mesh().unwrap().n_cells();
        let mut flags = vec![RefineFlag::Keep; n];
        flags[0] = RefineFlag::Refine;
        life.gather().unwrap();
        life.refine_conforming(&flags).unwrap();
        assert_eq!(life.mesh().unwrap_err(), MeshError::NotPrepared);
        life.broadcast().unwrap();
        assert!(life.mesh().unwrap().n_cells() > n);
    }

    #[test]
    fn workers_share_the_primary_mesh() {
        let handles: Vec<_> = LocalGroup::new(2)
            .into_iter()
            .map(|w| {
                thread::spawn(move || {
                    let mut life = MeshLifecycle::new(Arc::new(w));
                    life.generate(&deck("s_quad4")).unwrap();
                    life.broadcast().unwrap();
                    life.mesh().unwrap().n_cells()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 4);
        }
    }
}
