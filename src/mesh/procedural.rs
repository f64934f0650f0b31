//! Basic procedural mesh generation routines.
use super::{Cell, Mesh};
use eyre::eyre;
use nalgebra::DVector;

/// Creates a uniform mesh of the interval `[a, b]` with the given number of cells.
pub fn create_line_mesh(a: f64, b: f64, num_cells: usize) -> eyre::Result<Mesh> {
    if num_cells == 0 || !(b > a) {
        return Err(eyre!("invalid line mesh [{a}, {b}] with {num_cells} cells"));
    }
    let h = (b - a) / num_cells as f64;
    let vertices = (0..=num_cells)
        .map(|i| DVector::from_element(1, a + h * i as f64))
        .collect();
    let cells = (0..num_cells).map(|i| Cell::segment([i, i + 1], 1)).collect();
    Mesh::from_vertices_and_cells(vertices, cells)
}

/// Creates a mesh of the polyline through the given points, which may live in any dimension.
pub fn create_polyline_mesh(points: &[DVector<f64>]) -> eyre::Result<Mesh> {
    if points.len() < 2 {
        return Err(eyre!("a polyline needs at least two points"));
    }
    let cells = (0..points.len() - 1)
        .map(|i| Cell::segment([i, i + 1], 1))
        .collect();
    Mesh::from_vertices_and_cells(points.to_vec(), cells)
}

/// Generates an axis-aligned rectangular uniform quad mesh with the given number of cells in
/// each direction, covering `[x0, x1] x [y0, y1]`.
///
/// Cells are numbered row by row from the bottom left, all with attribute `1`.
pub fn create_rectangular_uniform_quad_mesh_2d(
    lower: [f64; 2],
    upper: [f64; 2],
    cells_x: usize,
    cells_y: usize,
) -> eyre::Result<Mesh> {
    if cells_x == 0 || cells_y == 0 || !(upper[0] > lower[0] && upper[1] > lower[1]) {
        return Err(eyre!("invalid rectangular mesh with {cells_x} x {cells_y} cells"));
    }
    let hx = (upper[0] - lower[0]) / cells_x as f64;
    let hy = (upper[1] - lower[1]) / cells_y as f64;
    let to_global_vertex_index = |i: usize, j: usize| (cells_x + 1) * j + i;

    let mut vertices = Vec::with_capacity((cells_x + 1) * (cells_y + 1));
    for j in 0..=cells_y {
        for i in 0..=cells_x {
            let x = lower[0] + hx * i as f64;
            let y = lower[1] + hy * j as f64;
            vertices.push(DVector::from_column_slice(&[x, y]));
        }
    }

    let mut cells = Vec::with_capacity(cells_x * cells_y);
    for j in 0..cells_y {
        for i in 0..cells_x {
            let quad = [
                to_global_vertex_index(i, j),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i, j + 1),
            ];
            cells.push(Cell::quadrilateral(quad, 1));
        }
    }

    Mesh::from_vertices_and_cells(vertices, cells)
}

pub fn create_unit_square_uniform_quad_mesh_2d(cells_per_dim: usize) -> eyre::Result<Mesh> {
    create_rectangular_uniform_quad_mesh_2d([0.0, 0.0], [1.0, 1.0], cells_per_dim, cells_per_dim)
}
