//! Worker communication.
//!
//! Every worker runs the same control loop; the primary (rank 0) owns mesh
//! generation and result output. `LocalGroup` connects workers running as
//! threads in one process. A worker that leaves the group, by finishing,
//! failing or panicking, fails every collective still waiting for it.

use crate::error::{MeshError, MeshResult};
use crate::mesh::Mesh;
use std::sync::{Arc, Condvar, Mutex};

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_primary(&self) -> bool {
        self.rank() == 0
    }

    /// Block until every worker reaches the barrier.
    fn barrier(&self) -> MeshResult<()>;

    /// Collective: true when `ok` holds on every worker. Used after work
    /// done on the primary alone so that all ranks share its outcome.
    fn all_ok(&self, ok: bool) -> MeshResult<bool>;

    /// Collective: the primary publishes `mesh` (other ranks pass `None`)
    /// and every worker receives a copy. Publishing `None` from the primary
    /// fails the collective on all ranks.
    fn broadcast_mesh(&self, mesh: Option<Mesh>) -> MeshResult<Mesh>;

    /// Collective: check that all workers hold the same mesh and hand it to
    /// the primary. Non-primary ranks receive `None`.
    fn gather_mesh(&self, mesh: &Mesh) -> MeshResult<Option<Mesh>>;
}

/// Single worker; collectives are identities.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> MeshResult<()> {
        Ok(())
    }

    fn all_ok(&self, ok: bool) -> MeshResult<bool> {
        Ok(ok)
    }

    fn broadcast_mesh(&self, mesh: Option<Mesh>) -> MeshResult<Mesh> {
        mesh.ok_or(MeshError::NoMesh)
    }

    fn gather_mesh(&self, mesh: &Mesh) -> MeshResult<Option<Mesh>> {
        Ok(Some(mesh.clone()))
    }
}

#[derive(Default)]
struct Gate {
    arrived: usize,
    generation: u64,
    /// Set once a worker has left; no barrier can complete after that.
    departed: Option<usize>,
}

struct Shared {
    size: usize,
    gate: Mutex<Gate>,
    turn: Condvar,
    slot: Mutex<Option<Mesh>>,
    counts: Mutex<Vec<(usize, usize)>>,
    oks: Mutex<Vec<bool>>,
}

impl Shared {
    fn wait(&self) -> MeshResult<()> {
        let mut gate = self.gate.lock().map_err(poisoned)?;
        if let Some(rank) = gate.departed {
            return Err(departed(rank));
        }
        gate.arrived += 1;
        if gate.arrived == self.size {
            gate.arrived = 0;
            gate.generation += 1;
            self.turn.notify_all();
            return Ok(());
        }
        let generation = gate.generation;
        let gate = self
            .turn
            .wait_while(gate, |g| g.generation == generation && g.departed.is_none())
            .map_err(poisoned)?;
        match gate.departed {
            Some(rank) if gate.generation == generation => Err(departed(rank)),
            _ => Ok(()),
        }
    }

    fn leave(&self, rank: usize) {
        // a poisoned gate already fails every waiter
        if let Ok(mut gate) = self.gate.lock() {
            if gate.departed.is_none() {
                gate.departed = Some(rank);
            }
            self.turn.notify_all();
        }
    }
}

/// Thread-backed worker group.
pub struct LocalGroup;

impl LocalGroup {
    /// Create `size` connected workers (at least one); hand one to each thread.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: usize) -> Vec<LocalWorker> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            gate: Mutex::new(Gate::default()),
            turn: Condvar::new(),
            slot: Mutex::new(None),
            counts: Mutex::new(vec![(0, 0); size]),
            oks: Mutex::new(vec![true; size]),
        });
        (0..size)
            .map(|rank| LocalWorker {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

pub struct LocalWorker {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

fn poisoned<T>(_: T) -> MeshError {
    MeshError::Communication {
        what: "a worker panicked while holding shared state".to_string(),
    }
}

fn departed(rank: usize) -> MeshError {
    MeshError::Communication {
        what: format!("worker {rank} left the group"),
    }
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        self.shared.leave(self.rank);
    }
}

impl Communicator for LocalWorker {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> MeshResult<()> {
        self.shared.wait()
    }

    fn all_ok(&self, ok: bool) -> MeshResult<bool> {
        self.shared.oks.lock().map_err(poisoned)?[self.rank] = ok;
        self.barrier()?;
        let all = self.shared.oks.lock().map_err(poisoned)?.iter().all(|&o| o);
        self.barrier()?;
        Ok(all)
    }

    fn broadcast_mesh(&self, mesh: Option<Mesh>) -> MeshResult<Mesh> {
        if self.is_primary() {
            let mut slot = self.shared.slot.lock().map_err(poisoned)?;
            *slot = mesh;
        }
        self.barrier()?;
        let received = self.shared.slot.lock().map_err(poisoned)?.clone();
        // nobody may overwrite the slot before every rank has read it
        self.barrier()?;
        received.ok_or(MeshError::NoMesh)
    }

    fn gather_mesh(&self, mesh: &Mesh) -> MeshResult<Option<Mesh>> {
        {
            let mut counts = self.shared.counts.lock().map_err(poisoned)?;
            counts[self.rank] = (mesh.n_nodes(), mesh.n_cells());
        }
        self.barrier()?;
        let counts = self.shared.counts.lock().map_err(poisoned)?.clone();
        self.barrier()?;
        if counts.iter().any(|c| *c != counts[0]) {
            return Err(MeshError::Communication {
                what: format!("workers hold diverging meshes: {counts:?}"),
            });
        }
        Ok(self.is_primary().then(|| mesh.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Cell, CellShape};
    use std::thread;

    fn triangle() -> Mesh {
        let mut m = Mesh::new(2);
        let r = m.add_region("si", "Si");
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            m.add_node(p);
        }
        m.add_cell(Cell::new(CellShape::Tri3, vec![0, 1, 2], r)).unwrap();
        m
    }

    #[test]
    fn serial_broadcast_requires_a_mesh() {
        let c = SerialCommunicator;
        assert!(c.is_primary());
        assert_eq!(c.broadcast_mesh(None).unwrap_err(), MeshError::NoMesh);
        assert_eq!(c.broadcast_mesh(Some(triangle())).unwrap().n_cells(), 1);
    }

    #[test]
    fn local_group_broadcasts_from_primary() {
        let workers = LocalGroup::new(3);
        let handles: Vec<_> = workers
            .into_iter()
            .map(|w| {
                thread::spawn(move || {
                    let mine = w.is_primary().then(triangle);
                    let mesh = w.broadcast_mesh(mine).unwrap();
                    let gathered = w.gather_mesh(&mesh).unwrap();
                    (w.rank(), mesh.n_cells(), gathered.is_some())
                })
            })
            .collect();
        for h in handles {
            let (rank, cells, gathered) = h.join().unwrap();
            assert_eq!(cells, 1);
            assert_eq!(gathered, rank == 0);
        }
    }

    #[test]
    fn outcomes_are_agreed() {
        let workers = LocalGroup::new(3);
        let handles: Vec<_> = workers
            .into_iter()
            .map(|w| thread::spawn(move || (w.all_ok(true).unwrap(), w.all_ok(w.rank() != 1).unwrap())))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), (true, false));
        }
        assert!(!SerialCommunicator.all_ok(false).unwrap());
    }

    #[test]
    fn departed_worker_releases_the_waiting_ranks() {
        let mut workers = LocalGroup::new(3);
        let primary = workers.remove(0);
        let handles: Vec<_> = workers
            .into_iter()
            .map(|w| thread::spawn(move || w.broadcast_mesh(None)))
            .collect();
        drop(primary);
        for h in handles {
            let err = h.join().unwrap().unwrap_err();
            assert_eq!(
                err,
                MeshError::Communication {
                    what: "worker 0 left the group".to_string()
                }
            );
        }
    }

    #[test]
    fn failed_primary_fails_every_rank() {
        let workers = LocalGroup::new(2);
        let handles: Vec<_> = workers
            .into_iter()
            .map(|w| thread::spawn(move || w.broadcast_mesh(None)))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap_err(), MeshError::NoMesh);
        }
    }
}
