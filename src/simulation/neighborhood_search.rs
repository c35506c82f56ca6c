use crate::{concurrency::par_iter_mut2, particle::ParticleVec, spatial_hash::SpatialHash};

const MAX_NEIGHBOR_COUNT: usize = 20000;

/**
 * Stores for each particle the ids of the particles sharing a spatial hash cell with it,
 * split by the kind of the neighbor.
 */
pub struct NeighborhoodCache {
    fluid: Vec<Vec<u32>>,
    deformable: Vec<Vec<u32>>,
}

impl NeighborhoodCache {
    pub fn new(num_particles: usize) -> Self {
        NeighborhoodCache {
            fluid: (0..num_particles).map(|_| Vec::new()).collect(),
            deformable: (0..num_particles).map(|_| Vec::new()).collect(),
        }
    }

    pub fn fluid<'a>(&'a self, i: usize) -> impl Iterator<Item = usize> + 'a {
        self.fluid[i].iter().map(|&x| x as usize)
    }

    pub fn deformable<'a>(&'a self, i: usize) -> impl Iterator<Item = usize> + 'a {
        self.deformable[i].iter().map(|&x| x as usize)
    }

    /// Drops all lists, e.g. when the particle ids they refer to are no longer valid.
    pub fn clear(&mut self, num_particles: usize) {
        self.fluid.clear();
        self.deformable.clear();
        self.resize(num_particles);
    }

    pub fn len(&self) -> usize {
        self.fluid.len()
    }

    pub fn resize(&mut self, num_particles: usize) {
        self.fluid.resize_with(num_particles, Vec::new);
        self.deformable.resize_with(num_particles, Vec::new);
    }

    /// Queries the hash for every active particle at its predicted position.
    pub fn build(&mut self, hash: &SpatialHash, particles: &ParticleVec) {
        self.resize(particles.len());

        par_iter_mut2(&mut self.fluid, &mut self.deformable, |i, fluid, deformable| {
            fluid.clear();
            deformable.clear();
            if !particles.active[i] {
                return;
            }

            let mut candidates = Vec::new();
            hash.query_neighbors(
                i,
                particles.predicted_position[i],
                particles.radius[i],
                particles,
                &mut candidates,
            );

            if candidates.len() > MAX_NEIGHBOR_COUNT {
                panic!("exceeded maximum allowed number of {} neighbors", MAX_NEIGHBOR_COUNT);
            }

            for j in candidates {
                if particles.state[j as usize].is_fluid() {
                    fluid.push(j);
                } else {
                    deformable.push(j);
                }
            }
        });
    }
}
