use rayon::prelude::*;

use crate::numerics::argmin;
use crate::problem::ShapeError;

/// Default neighbor-list width for an ahead-of-time connectivity build.
pub const CONNECTIVITY_WIDTH: usize = 2000;

/// Nearest-neighbor index over the dipole grid.
///
/// Row `j` lists dipole indices sorted by ascending Euclidean distance
/// from dipole `j`, starting with `j` itself.
#[derive(Debug, Clone)]
pub struct Connectivity {
    ndipoles: usize,
    width: usize,
    indices: Vec<usize>,
}

impl Connectivity {
    pub fn ndipoles(&self) -> usize {
        self.ndipoles
    }

    /// Neighbors stored per dipole, `min(requested width, ndipoles)`.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Neighbor indices of dipole `j`, nearest first.
    pub fn neighbors(&self, j: usize) -> &[usize] {
        &self.indices[j * self.width..(j + 1) * self.width]
    }
}

/// Builds the K-nearest-neighbor index by repeated argmin extraction.
///
/// `dipole_grid_xyz` holds the dipole centers, dipole-major. The stored
/// width is clamped to the dipole count.
pub fn connectivity_matrix(
    dipole_grid_xyz: &[f64],
    ndipoles: usize,
    width: usize,
) -> Result<Connectivity, ShapeError> {
    if ndipoles == 0 {
        return Err(ShapeError::EmptyDimensions {
            ngrid: 0,
            ndipoles,
        });
    }
    if dipole_grid_xyz.len() != 3 * ndipoles {
        return Err(ShapeError::BufferLen {
            buffer: "dipole_grid_xyz",
            expected: 3 * ndipoles,
            actual: dipole_grid_xyz.len(),
        });
    }
    if width == 0 {
        return Err(ShapeError::ZeroNeighbors);
    }
    let width = width.min(ndipoles);

    let mut indices = vec![0usize; ndipoles * width];
    indices
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(j, row)| {
            let pj = [
                dipole_grid_xyz[3 * j],
                dipole_grid_xyz[3 * j + 1],
                dipole_grid_xyz[3 * j + 2],
            ];
            let mut dist2: Vec<f64> = (0..ndipoles)
                .map(|i| {
                    let dx = dipole_grid_xyz[3 * i] - pj[0];
                    let dy = dipole_grid_xyz[3 * i + 1] - pj[1];
                    let dz = dipole_grid_xyz[3 * i + 2] - pj[2];
                    dx * dx + dy * dy + dz * dz
                })
                .collect();
            for slot in row.iter_mut() {
                let nearest = argmin(&dist2);
                *slot = nearest;
                dist2[nearest] = f64::INFINITY;
            }
        });

    Ok(Connectivity {
        ndipoles,
        width,
        indices,
    })
}
