use std::sync::Mutex;

use tracing::trace;

use crate::{concurrency::par_iter_mut0, container::Container, floating_type_mod::FT, particle::ParticleVec, V2};

/// Geometry of the uniform grid laid over the container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGrid {
    origin: V2,
    cell_size: FT,
    columns: usize,
    rows: usize,
}

impl CellGrid {
    pub fn new(container: &Container, cell_size: FT) -> Self {
        // one extra column/row so a bounding square touching the far wall stays in range
        CellGrid {
            origin: container.origin(),
            cell_size,
            columns: (container.width() / cell_size).floor() as usize + 1,
            rows: (container.height() / cell_size).floor() as usize + 1,
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn num_cells(&self) -> usize {
        self.columns * self.rows
    }

    pub fn cell_size(&self) -> FT {
        self.cell_size
    }

    /// `floor(x/cell) + floor(y/cell) * columns` on the position relative to the container origin.
    pub fn cell_id(&self, position: V2) -> usize {
        let (x, y) = self.cell_coords(position);
        x + y * self.columns
    }

    fn cell_coords(&self, position: V2) -> (usize, usize) {
        let local = position - self.origin;
        let x = (local.x / self.cell_size).floor();
        let y = (local.y / self.cell_size).floor();
        (
            self.clamp_axis(x, self.columns, position),
            self.clamp_axis(y, self.rows, position),
        )
    }

    fn clamp_axis(&self, c: FT, n: usize, position: V2) -> usize {
        if c >= 0. && (c as usize) < n {
            return c as usize;
        }

        // predicted positions of fast particles can lie far past a wall until the container step
        trace!("particle at {:?} is outside of the spatial hash, clamping cell", position);

        if c < 0. {
            0
        } else {
            n - 1
        }
    }

    /**
     * Distinct cells overlapped by the bounding square `position ± extent`.
     * For squares no larger than a cell these are the cells of the four corners.
     */
    pub fn occupied_cells(&self, position: V2, extent: FT, out: &mut Vec<usize>) {
        out.clear();
        let (x0, y0) = self.cell_coords(position - V2::repeat(extent));
        let (x1, y1) = self.cell_coords(position + V2::repeat(extent));
        for y in y0..=y1 {
            for x in x0..=x1 {
                out.push(x + y * self.columns);
            }
        }
        // clamping can alias cells
        out.sort_unstable();
        out.dedup();
    }

    /// Half width of the bounding square used for a particle of the given radius.
    ///
    /// Never smaller than half a cell, so two particles closer than one cell size always share a cell.
    pub fn extent(&self, radius: FT) -> FT {
        FT::max(radius, 0.5 * self.cell_size)
    }
}

/// Buckets of particle ids, rebuilt from scratch every time positions change.
pub struct SpatialHash {
    grid: CellGrid,
    buckets: Vec<Vec<u32>>,
}

impl SpatialHash {
    pub fn new(container: &Container, cell_size: FT) -> Self {
        let mut hash = SpatialHash {
            grid: CellGrid::new(container, cell_size),
            buckets: Vec::new(),
        };
        hash.setup();
        hash
    }

    /// Allocates `columns * rows` empty buckets.
    pub fn setup(&mut self) {
        self.buckets = (0..self.grid.num_cells()).map(|_| Vec::new()).collect();
    }

    /// Empties every bucket but keeps their storage.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn bucket(&self, cell: usize) -> &[u32] {
        &self.buckets[cell]
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn register(&mut self, id: usize, position: V2, radius: FT) {
        let mut cells = Vec::with_capacity(4);
        self.grid.occupied_cells(position, self.grid.extent(radius), &mut cells);
        for cell in cells {
            self.buckets[cell].push(id as u32);
        }
    }

    /// Registers every active particle at its predicted position.
    pub fn register_all(&mut self, particles: &ParticleVec) {
        let grid = self.grid;
        let buckets = Mutex::new(&mut self.buckets);

        par_iter_mut0(particles.len(), |i| {
            if !particles.active[i] {
                return;
            }
            let mut cells = Vec::with_capacity(4);
            grid.occupied_cells(
                particles.predicted_position[i],
                grid.extent(particles.radius[i]),
                &mut cells,
            );

            let mut buckets = match buckets.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for cell in cells {
                buckets[cell].push(i as u32);
            }
        });
    }

    /**
     * All other particles sharing at least one cell with `id`, each reported once, in ascending order.
     * Self matches are excluded by global index.
     */
    pub fn query_neighbors(&self, id: usize, position: V2, radius: FT, particles: &ParticleVec, out: &mut Vec<u32>) {
        out.clear();
        let own_index = particles.global_index[id];

        let mut cells = Vec::with_capacity(4);
        self.grid.occupied_cells(position, self.grid.extent(radius), &mut cells);
        for &cell in &cells {
            out.extend(
                self.buckets[cell]
                    .iter()
                    .copied()
                    .filter(|&j| particles.global_index[j as usize] != own_index),
            );
        }

        out.sort_unstable();
        out.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        particle::{ParticleRegistry, SimulationId},
        vec2f,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn container() -> Container {
        Container::new(100., 200., 40., 20.)
    }

    #[test]
    fn cell_id_uses_local_position() {
        let grid = CellGrid::new(&container(), 4.);
        assert_eq!(grid.columns(), 11);
        assert_eq!(grid.rows(), 6);
        assert_eq!(grid.cell_id(vec2f(100., 200.)), 0);
        assert_eq!(grid.cell_id(vec2f(105., 200.)), 1);
        assert_eq!(grid.cell_id(vec2f(105., 209.)), 1 + 2 * 11);
    }

    #[test]
    fn aliased_corners_occupy_a_cell_once() {
        let mut hash = SpatialHash::new(&container(), 4.);
        // the bounding square pokes over the upper left corner, all four corners clamp into cell 0
        hash.register(7, vec2f(101.5, 201.5), 0.5);
        let total: usize = (0..hash.num_buckets()).map(|c| hash.bucket(c).len()).sum();
        assert_eq!(total, 1);
        assert_eq!(hash.bucket(0), &[7]);
    }

    #[test]
    fn clear_keeps_buckets() {
        let mut hash = SpatialHash::new(&container(), 4.);
        hash.register(0, vec2f(110., 210.), 1.);
        let n = hash.num_buckets();
        hash.clear();
        assert_eq!(hash.num_buckets(), n);
        assert!((0..n).all(|c| hash.bucket(c).is_empty()));
    }

    #[test]
    fn query_is_complete_and_excludes_self() {
        let c = container();
        let cell_size = 4.;
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..300 {
            let p = vec2f(
                rng.gen_range(c.left + 0.5..c.right - 0.5),
                rng.gen_range(c.top + 0.5..c.bottom - 0.5),
            );
            particles.spawn_fluid(&registry, SimulationId(0), p, V2::zeros(), 0.5, 1.);
        }

        let mut hash = SpatialHash::new(&c, cell_size);
        hash.register_all(&particles);

        let mut result = Vec::new();
        let mut neighbors: Vec<Vec<u32>> = Vec::new();
        for i in 0..particles.len() {
            hash.query_neighbors(i, particles.predicted_position[i], particles.radius[i], &particles, &mut result);
            assert!(!result.contains(&(i as u32)), "particle {} is its own neighbor", i);
            let mut dedup = result.clone();
            dedup.dedup();
            assert_eq!(dedup.len(), result.len());
            neighbors.push(result.clone());
        }

        for i in 0..particles.len() {
            for j in 0..particles.len() {
                if i == j {
                    continue;
                }
                let d = (particles.position[i] - particles.position[j]).norm();
                if d < cell_size {
                    assert!(neighbors[i].contains(&(j as u32)), "{} misses {} at distance {}", i, j, d);
                }
            }
        }
    }

    #[test]
    fn overshoot_is_clamped_into_border_cells() {
        let c = container();
        let grid = CellGrid::new(&c, 4.);
        assert_eq!(grid.cell_id(vec2f(99., 199.)), 0);
        assert_eq!(grid.cell_id(vec2f(145., 199.)), grid.columns() - 1);

        // several cells past the walls
        assert_eq!(grid.cell_id(vec2f(300., 100.)), grid.columns() - 1);
        assert_eq!(grid.cell_id(vec2f(-50., 500.)), (grid.rows() - 1) * grid.columns());

        let mut hash = SpatialHash::new(&c, 4.);
        hash.register(3, vec2f(300., 210.), 0.5);
        assert_eq!(hash.bucket(grid.cell_id(vec2f(141., 210.))), &[3]);
    }
}
