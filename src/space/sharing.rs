use super::DofLocation;
use crate::comm::{CommError, Communicator};
use crate::mesh::Partition;
use rustc_hash::FxHashMap;

/// A globally unique identifier of a shared scalar dof, agreed upon by all ranks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DofKey {
    Vertex(usize),
    /// The `k`-th interior node of the edge between two global vertices, `a < b`, counted
    /// from `a`.
    Edge(usize, usize, usize),
}

/// Describes which scalar dofs of a space are shared with which other ranks.
///
/// A shared dof is owned by the lowest rank sharing it. Unshared dofs are owned locally.
#[derive(Debug, Clone, Default)]
pub struct DofSharing {
    // Per neighbor rank, the shared local dofs in the order of their keys
    neighbors: Vec<(usize, Vec<usize>)>,
    owned: Vec<bool>,
}

impl DofSharing {
    pub(super) fn from_locations(partition: &Partition, locations: &[DofLocation]) -> Self {
        let rank = partition.rank();
        let mut per_rank: FxHashMap<usize, Vec<(DofKey, usize)>> = FxHashMap::default();
        let mut owned = vec![true; locations.len()];

        for (dof, location) in locations.iter().enumerate() {
            let (key, ranks) = match *location {
                DofLocation::Vertex(v) => {
                    (DofKey::Vertex(partition.global_vertex_id(v)), partition.vertex_neighbors(v))
                }
                DofLocation::Edge { a, b, k } => {
                    let key = DofKey::Edge(partition.global_vertex_id(a), partition.global_vertex_id(b), k);
                    (key, partition.edge_neighbors(a, b))
                }
                DofLocation::Interior => continue,
            };
            owned[dof] = ranks.iter().all(|&other| other > rank);
            for &other in ranks {
                per_rank.entry(other).or_default().push((key, dof));
            }
        }

        let mut neighbors: Vec<(usize, Vec<usize>)> = per_rank
            .into_iter()
            .map(|(other, mut keyed)| {
                keyed.sort_unstable();
                (other, keyed.into_iter().map(|(_, dof)| dof).collect())
            })
            .collect();
        neighbors.sort_unstable_by_key(|(other, _)| *other);
        Self { neighbors, owned }
    }

    /// Whether no dof is shared with another rank.
    pub fn is_trivial(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// The ranks this rank shares dofs with, sorted.
    pub fn neighbor_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.neighbors.iter().map(|(rank, _)| *rank)
    }

    /// For each scalar dof, whether it is owned by this rank.
    pub fn owned(&self) -> &[bool] {
        &self.owned
    }

    /// Adds the contributions of all sharing ranks to each shared entry of a scalar dof
    /// vector, so that shared dofs hold the same, fully assembled value on every rank.
    ///
    /// Must be called collectively by all ranks that share dofs with each other.
    pub fn sum_shared(&self, comm: &dyn Communicator, values: &mut [f64]) -> Result<(), CommError> {
        if self.is_trivial() {
            return Ok(());
        }
        let outgoing = self
            .neighbors
            .iter()
            .map(|(rank, dofs)| (*rank, dofs.iter().map(|&dof| values[dof]).collect()))
            .collect();
        let incoming = comm.exchange(outgoing)?;
        for ((_, dofs), (_, data)) in self.neighbors.iter().zip(incoming) {
            for (&dof, value) in dofs.iter().zip(data) {
                values[dof] += value;
            }
        }
        Ok(())
    }

    /// The inner product of two scalar dof vectors in which every shared dof is counted
    /// exactly once across all ranks.
    pub fn owned_dot(&self, comm: &dyn Communicator, x: &[f64], y: &[f64]) -> f64 {
        let local: f64 = self
            .owned
            .iter()
            .zip(x.iter().zip(y))
            .filter(|(owned, _)| **owned)
            .map(|(_, (a, b))| a * b)
            .sum();
        comm.all_reduce_sum(local)
    }
}
