use super::{next_sequence, Cell, Face, FaceNeighbor, FaceSide, Mesh, Partition, SharedFace};
use crate::comm::Communicator;
use eyre::eyre;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Assigns elements to `num_parts` partitions of (nearly) equal size by sorting their
/// centroids along the given coordinate axis.
pub fn partition_along_axis(mesh: &Mesh, num_parts: usize, axis: usize) -> Vec<usize> {
    let num_elements = mesh.num_elements();
    let centroids: Vec<f64> = (0..num_elements)
        .map(|e| {
            let vertices = mesh.cells()[e].vertices();
            vertices.iter().map(|&v| mesh.vertices()[v][axis]).sum::<f64>() / vertices.len() as f64
        })
        .collect();
    let order = (0..num_elements).sorted_by(|&a, &b| centroids[a].total_cmp(&centroids[b]).then(a.cmp(&b)));

    let mut parts = vec![0; num_elements];
    for (position, element) in order.enumerate() {
        parts[element] = position * num_parts / num_elements.max(1);
    }
    parts
}

/// Extracts the part of a serial mesh that belongs to the rank of the given communicator.
///
/// `parts[e]` is the rank owning global element `e`. Every rank must call this with the same
/// global mesh and partitioning. Faces between elements of different ranks become
/// [`SharedFace`]s, which carry enough information about the remote element to integrate over
/// the face from either side.
pub fn distribute(global: &Mesh, parts: &[usize], comm: Arc<dyn Communicator>) -> eyre::Result<Mesh> {
    if global.partition().num_ranks() != 1 {
        return Err(eyre!("only serial meshes can be distributed"));
    }
    if parts.len() != global.num_elements() {
        return Err(eyre!(
            "partitioning has {} entries, but the mesh has {} elements",
            parts.len(),
            global.num_elements()
        ));
    }
    if let Some(&part) = parts.iter().find(|&&part| part >= comm.size()) {
        return Err(eyre!("partition {part} does not exist for {} ranks", comm.size()));
    }
    let rank = comm.rank();

    let global_element_ids: Vec<usize> = (0..global.num_elements())
        .filter(|&e| parts[e] == rank)
        .collect();
    if global_element_ids.is_empty() {
        return Err(eyre!("rank {rank} received no elements"));
    }
    let local_element: FxHashMap<usize, usize> = global_element_ids
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();

    let used_vertices: BTreeSet<usize> = global_element_ids
        .iter()
        .flat_map(|&e| global.cells()[e].vertices().iter().copied())
        .collect();
    let global_vertex_ids: Vec<usize> = used_vertices.into_iter().collect();
    let local_vertex: FxHashMap<usize, usize> = global_vertex_ids
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();

    let vertices = global_vertex_ids
        .iter()
        .map(|&v| global.vertices()[v].clone())
        .collect();
    let cells = global_element_ids
        .iter()
        .map(|&e| {
            let cell = &global.cells()[e];
            let local_vertices = cell.vertices().iter().map(|v| local_vertex[v]).collect();
            Cell::new(cell.kind(), local_vertices, cell.attribute())
        })
        .collect();

    let localize_side = |side: &FaceSide| FaceSide {
        element: local_element[&side.element],
        local_face: side.local_face,
        map: side.map,
    };

    let mut faces = Vec::new();
    let mut shared_faces = Vec::new();
    let mut local_face_index = FxHashMap::default();
    for (global_id, face) in global.faces().iter().enumerate() {
        let local1 = local_element.contains_key(&face.elem1().element);
        let local2 = face.elem2().map(|side| local_element.contains_key(&side.element));
        let local_vertices = || -> Vec<usize> { face.vertices().iter().map(|v| local_vertex[v]).collect() };

        match (local1, local2) {
            (true, None) | (true, Some(true)) => {
                local_face_index.insert(global_id, faces.len());
                faces.push(Face {
                    kind: face.kind(),
                    vertices: local_vertices(),
                    elem1: localize_side(face.elem1()),
                    elem2: face.elem2().map(localize_side),
                    slaves: face.slaves().to_vec(),
                });
            }
            (true, Some(false)) | (false, Some(true)) => {
                let Some(elem2) = face.elem2() else { continue };
                let (local, remote) = if local1 {
                    (face.elem1(), elem2)
                } else {
                    (elem2, face.elem1())
                };
                shared_faces.push(SharedFace {
                    global_id,
                    kind: face.kind(),
                    points: global.face_points(face),
                    local: localize_side(local),
                    neighbor: FaceNeighbor {
                        rank: parts[remote.element],
                        global_element: remote.element,
                        attribute: global.element_attribute(remote.element),
                        transformation: global.element_transformation(remote.element),
                        local_face: remote.local_face,
                        map: remote.map,
                    },
                });
            }
            _ => {}
        }
    }
    // Masters only keep the slaves that are local faces
    for face in &mut faces {
        face.slaves = face
            .slaves
            .iter()
            .filter_map(|global_id| local_face_index.get(global_id).copied())
            .collect();
    }

    let mut vertex_ranks: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); global.num_vertices()];
    let mut edge_ranks: BTreeMap<[usize; 2], BTreeSet<usize>> = BTreeMap::new();
    for (e, cell) in global.cells().iter().enumerate() {
        for &v in cell.vertices() {
            vertex_ranks[v].insert(parts[e]);
        }
        if cell.kind().dim() == 2 {
            for local_face in 0..cell.kind().num_faces() {
                let edge = cell.face_vertices(local_face);
                let key = [edge[0].min(edge[1]), edge[0].max(edge[1])];
                edge_ranks.entry(key).or_default().insert(parts[e]);
            }
        }
    }
    let others = |ranks: &BTreeSet<usize>| -> Vec<usize> { ranks.iter().copied().filter(|&r| r != rank).collect() };
    let vertex_neighbors = global_vertex_ids
        .iter()
        .map(|&v| others(&vertex_ranks[v]))
        .collect();
    let edge_neighbors = edge_ranks
        .iter()
        .filter(|(_, ranks)| ranks.len() > 1 && ranks.contains(&rank))
        .map(|(key, ranks)| (*key, others(ranks)))
        .collect();

    log::debug!(
        "Rank {}/{}: {} elements, {} faces, {} shared faces",
        rank,
        comm.size(),
        global_element_ids.len(),
        faces.len(),
        shared_faces.len()
    );

    Ok(Mesh {
        dim: global.dim(),
        space_dim: global.space_dim(),
        vertices,
        cells,
        faces,
        partition: Partition {
            comm,
            global_vertex_ids,
            global_element_ids,
            vertex_neighbors,
            edge_neighbors,
            shared_faces,
        },
        sequence: next_sequence(),
    })
}
