use super::{Cell, FaceKind, Mesh};
use crate::element::CellKind;
use eyre::eyre;
use nalgebra::DVector;
use rustc_hash::FxHashMap;

impl Mesh {
    /// Refines the given elements by bisection in each reference direction.
    ///
    /// Refined quadrilaterals produce hanging vertices on edges shared with unrefined
    /// neighbors, which the returned mesh represents as non-conforming faces. Refinement is
    /// rejected if it would split an edge that already carries a hanging vertex on the coarse
    /// side more than once. Only serial meshes can be refined.
    ///
    /// Unrefined elements keep their relative order and come first, followed by the children
    /// of the refined elements.
    pub fn refine_elements(&self, elements: &[usize]) -> eyre::Result<Mesh> {
        if self.partition.num_ranks() != 1 {
            return Err(eyre!("only serial meshes can be refined"));
        }
        let mut marked = vec![false; self.num_elements()];
        for &e in elements {
            *marked
                .get_mut(e)
                .ok_or_else(|| eyre!("cannot refine nonexistent element {e}"))? = true;
        }

        // Existing hanging vertices are reused when the coarse side is refined
        let mut midpoints: FxHashMap<[usize; 2], usize> = FxHashMap::default();
        for face in &self.faces {
            if face.kind() == FaceKind::NonConformingSlave {
                if let Some(master) = face.elem2() {
                    if marked[face.elem1().element] && !marked[master.element] {
                        return Err(eyre!(
                            "refining element {} requires refining its coarser neighbor {}",
                            face.elem1().element,
                            master.element
                        ));
                    }
                }
            }
            if face.kind() == FaceKind::NonConformingMaster {
                let (a, b) = (face.vertices()[0], face.vertices()[1]);
                let hanging = face
                    .slaves()
                    .iter()
                    .flat_map(|&slave| self.faces[slave].vertices().iter().copied())
                    .find(|&v| v != a && v != b);
                if let Some(hanging) = hanging {
                    midpoints.insert([a.min(b), a.max(b)], hanging);
                }
            }
        }

        let mut vertices = self.vertices.clone();
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<DVector<f64>>| -> usize {
            *midpoints.entry([a.min(b), a.max(b)]).or_insert_with(|| {
                let m = (&vertices[a] + &vertices[b]) * 0.5;
                vertices.push(m);
                vertices.len() - 1
            })
        };

        let mut cells = Vec::with_capacity(self.num_elements());
        for (cell, &refine) in self.cells.iter().zip(&marked) {
            if !refine {
                cells.push(cell.clone());
            }
        }
        for (cell, &refine) in self.cells.iter().zip(&marked) {
            if !refine {
                continue;
            }
            let v = cell.vertices();
            let attribute = cell.attribute();
            match cell.kind() {
                CellKind::Segment => {
                    let m = midpoint(v[0], v[1], &mut vertices);
                    cells.push(Cell::segment([v[0], m], attribute));
                    cells.push(Cell::segment([m, v[1]], attribute));
                }
                CellKind::Quadrilateral => {
                    let m01 = midpoint(v[0], v[1], &mut vertices);
                    let m12 = midpoint(v[1], v[2], &mut vertices);
                    let m23 = midpoint(v[2], v[3], &mut vertices);
                    let m30 = midpoint(v[3], v[0], &mut vertices);
                    let center = v.iter().fold(DVector::zeros(self.space_dim), |acc, &i| acc + &vertices[i]) * 0.25;
                    vertices.push(center);
                    let c = vertices.len() - 1;
                    cells.push(Cell::quadrilateral([v[0], m01, c, m30], attribute));
                    cells.push(Cell::quadrilateral([m01, v[1], m12, c], attribute));
                    cells.push(Cell::quadrilateral([c, m12, v[2], m23], attribute));
                    cells.push(Cell::quadrilateral([m30, c, m23, v[3]], attribute));
                }
            }
        }

        log::debug!(
            "Refined {} of {} elements, new mesh has {} elements",
            elements.len(),
            self.num_elements(),
            cells.len()
        );
        Mesh::from_vertices_and_cells(vertices, cells)
    }

    /// Refines every element of the mesh.
    pub fn refine_uniformly(&self) -> eyre::Result<Mesh> {
        let all: Vec<usize> = (0..self.num_elements()).collect();
        self.refine_elements(&all)
    }
}
