use anyhow::{bail, ensure, Context, Result};
use tracing::{debug, info, warn};

use crate::{
    collision::{self, adjusted_stiffness},
    container::{Container, ContainerHandler, ContainerHandlerTrait, PositionBasedContainer, ReflectingContainer},
    counters::{PerformanceCounters, ValueCounters},
    floating_type_mod::FT,
    fluid_solver::{self, DensityConstraintParams},
    neighborhood_search::NeighborhoodCache,
    particle::{ParticleClass, ParticleId, ParticleKind, ParticleRegistry, ParticleVec, SimulationId},
    signed_distance::{update_signed_distances, Outline},
    simulation_parameters::{ContactModel, ContainerHandling, SimulationParams},
    soft_body::SoftBody,
    spatial_hash::SpatialHash,
    sph_kernels::lattice_rest_density,
    V2,
};

/// A fluid instance. All fluid instances share one density constraint.
#[derive(Debug, Clone)]
pub struct FluidSimulation {
    pub id: SimulationId,
    pub particles: Vec<ParticleId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IterationStatistics {
    /// Average `|C|` over all fluid particles at the start of the iteration.
    pub avg_density_error: FT,
    pub max_density_error: FT,
    pub contacts: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepStatistics {
    pub iterations: Vec<IterationStatistics>,
    pub container_constraints: usize,
    /// Set for ticks with a non-positive time step, nothing was simulated.
    pub skipped: bool,
}

impl StepStatistics {
    pub fn contacts(&self) -> usize {
        self.iterations.iter().map(|it| it.contacts).sum()
    }
}

/// Read-only values for overlays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub fluid_particles: usize,
    pub soft_body_particles: usize,
    pub fluids: usize,
    pub soft_bodies: usize,
    pub velocity_damping: FT,
    pub xsph_viscosity: FT,
    pub time: FT,
    pub ticks: u64,
}

/// Scalars that may be changed between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustableSetting {
    VelocityDamping,
    XsphViscosity,
    SoftBodyDensityWeight,
    SoftBodyElasticity,
    SoftBodyBeta,
    CollisionStiffness,
}

/**
 * Owns everything a running simulation needs: parameters, particle arena, simulation instances,
 * spatial hash and counters. Worlds share no state, so several can run in one process.
 */
pub struct World {
    params: SimulationParams,
    registry: ParticleRegistry,
    particles: ParticleVec,
    fluids: Vec<FluidSimulation>,
    soft_bodies: Vec<SoftBody>,
    next_simulation_id: u32,

    hash: SpatialHash,
    neighs: NeighborhoodCache,
    container_handler: ContainerHandler,

    time: FT,
    ticks: u64,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,
}

impl World {
    pub fn new(mut params: SimulationParams) -> Result<World> {
        params.validate().context("invalid simulation parameters")?;

        if params.rest_density == 0. {
            params.rest_density = lattice_rest_density(2. * params.particle_radius, params.smoothing_distance);
        }
        ensure!(
            params.rest_density > 0.,
            "rest density is zero, particle spacing {} is larger than the smoothing distance {}",
            2. * params.particle_radius,
            params.smoothing_distance
        );

        let hash = SpatialHash::new(&params.container, params.cell_size);
        let container_handler: ContainerHandler = match params.container_handling {
            ContainerHandling::PositionBased => PositionBasedContainer::new(params.container_stiffness).into(),
            ContainerHandling::VelocityReflect => ReflectingContainer.into(),
        };

        info!(
            "created world: container {:?}, grid {}x{} cells of size {}, rest density {}",
            params.container,
            hash.grid().columns(),
            hash.grid().rows(),
            params.cell_size,
            params.rest_density
        );

        Ok(World {
            registry: ParticleRegistry::new(),
            particles: ParticleVec::default(0),
            fluids: Vec::new(),
            soft_bodies: Vec::new(),
            next_simulation_id: 0,
            hash,
            neighs: NeighborhoodCache::new(0),
            container_handler,
            time: 0.,
            ticks: 0,
            pcounters: PerformanceCounters::new(params.counters_enabled),
            vcounters: ValueCounters::new(params.counters_enabled),
            params,
        })
    }

    fn next_id(&mut self) -> SimulationId {
        let id = SimulationId(self.next_simulation_id);
        self.next_simulation_id += 1;
        id
    }

    pub fn add_fluid(&mut self) -> SimulationId {
        let id = self.next_id();
        self.fluids.push(FluidSimulation {
            id,
            particles: Vec::new(),
        });
        id
    }

    pub fn add_soft_body(&mut self) -> SimulationId {
        let id = self.next_id();
        self.soft_bodies.push(SoftBody::new(id));
        id
    }

    fn ensure_inside(&self, position: V2) -> Result<()> {
        ensure!(
            self.params.container.contains(position, 0.),
            "position {:?} is outside of the container {:?}",
            position,
            self.params.container
        );
        Ok(())
    }

    pub fn add_fluid_particles(&mut self, id: SimulationId, positions: &[V2], velocity: V2) -> Result<Vec<ParticleId>> {
        for &p in positions {
            self.ensure_inside(p)?;
        }
        let fluid = match self.fluids.iter_mut().find(|f| f.id == id) {
            Some(f) => f,
            None => bail!("{:?} is not a fluid", id),
        };

        let mut spawned = Vec::with_capacity(positions.len());
        for &p in positions {
            let i = self.particles.spawn_fluid(
                &self.registry,
                id,
                p,
                velocity,
                self.params.particle_radius,
                self.params.particle_mass,
            );
            fluid.particles.push(i);
            spawned.push(i);
        }
        Ok(spawned)
    }

    /// Adds a particle to a soft body that is still being authored. Outline particles are appended to its contour.
    pub fn add_soft_body_particle(&mut self, id: SimulationId, position: V2, on_outline: bool) -> Result<ParticleId> {
        self.ensure_inside(position)?;
        let body = match self.soft_bodies.iter_mut().find(|b| b.id == id) {
            Some(b) => b,
            None => bail!("{:?} is not a soft body", id),
        };
        ensure!(!body.is_finalized(), "soft body {:?} is already finalized", id);

        let i = self.particles.spawn_deformable(
            &self.registry,
            id,
            position,
            self.params.particle_radius,
            self.params.particle_mass,
        );
        body.particles.push(i);
        if on_outline {
            body.outline.push(i);
        }
        Ok(i)
    }

    /// Sets the velocity of every particle of an instance, pinned particles stay at rest.
    pub fn set_velocity(&mut self, id: SimulationId, velocity: V2) -> Result<()> {
        let particles: &[ParticleId] = if let Some(f) = self.fluids.iter().find(|f| f.id == id) {
            &f.particles
        } else if let Some(b) = self.soft_bodies.iter().find(|b| b.id == id) {
            &b.particles
        } else {
            bail!("unknown simulation {:?}", id);
        };
        for &i in particles {
            if !self.particles.is_pinned(i) {
                self.particles.velocity[i] = velocity;
            }
        }
        Ok(())
    }

    /// Freezes the rest shape. Must happen exactly once before the body takes part in ticks.
    pub fn finalize_soft_body(&mut self, id: SimulationId) -> Result<()> {
        let body = match self.soft_bodies.iter_mut().find(|b| b.id == id) {
            Some(b) => b,
            None => bail!("{:?} is not a soft body", id),
        };
        ensure!(!body.is_finalized(), "soft body {:?} is already finalized", id);
        body.finalize(&mut self.particles);
        debug!(
            "finalized soft body {:?} with {} particles ({} on the outline)",
            id,
            body.particles.len(),
            body.outline.len()
        );
        Ok(())
    }

    fn deformable_handle(&self, particle: ParticleId) -> Result<()> {
        ensure!(particle < self.particles.len(), "particle {} does not exist", particle);
        ensure!(
            self.particles.kind(particle) == ParticleKind::Deformable,
            "only soft body particles can be pinned (particle {})",
            particle
        );
        Ok(())
    }

    /// Gives the particle infinite mass, optionally moving it. Its rest position stays untouched.
    pub fn pin_particle(&mut self, particle: ParticleId, position: Option<V2>) -> Result<()> {
        self.deformable_handle(particle)?;
        if let Some(p) = position {
            self.ensure_inside(p)?;
            self.particles.position[particle] = p;
            self.particles.predicted_position[particle] = p;
        }
        self.particles.inverse_mass[particle] = 0.;
        self.particles.velocity[particle] = V2::zeros();
        self.particles.position_correction[particle] = V2::zeros();
        self.particles.class[particle] = ParticleClass::Pinned;
        if let Some(d) = self.particles.state[particle].deformable_mut() {
            d.pinned = true;
        }
        Ok(())
    }

    pub fn release_particle(&mut self, particle: ParticleId) -> Result<()> {
        self.deformable_handle(particle)?;
        self.particles.inverse_mass[particle] = 1. / self.particles.mass[particle];
        self.particles.class[particle] = ParticleClass::Default;
        if let Some(d) = self.particles.state[particle].deformable_mut() {
            d.pinned = false;
        }
        Ok(())
    }

    /**
     * Removes all particles of one instance. Handles of the remaining particles are compacted, so
     * previously returned `ParticleId`s are invalid afterwards. A soft body can be authored again.
     */
    pub fn reset_simulation(&mut self, id: SimulationId) -> Result<()> {
        let is_fluid = self.fluids.iter().any(|f| f.id == id);
        let is_soft_body = self.soft_bodies.iter().any(|b| b.id == id);
        ensure!(is_fluid || is_soft_body, "unknown simulation {:?}", id);

        let keep: Vec<bool> = self.particles.owner.iter().map(|&o| o != id).collect();
        let mut remap = vec![usize::MAX; keep.len()];
        let mut next = 0;
        for (old, &k) in keep.iter().enumerate() {
            if k {
                remap[old] = next;
                next += 1;
            }
        }
        let removed = keep.len() - next;
        self.particles.retain_mask(&keep);

        for fluid in &mut self.fluids {
            if fluid.id == id {
                fluid.particles.clear();
            } else {
                for p in &mut fluid.particles {
                    *p = remap[*p];
                }
            }
        }
        for body in &mut self.soft_bodies {
            if body.id == id {
                body.clear();
            } else {
                for p in body.particles.iter_mut().chain(body.outline.iter_mut()) {
                    *p = remap[*p];
                }
            }
        }
        // neighbor lists and buckets hold arena indices from before the compaction
        self.neighs.clear(self.particles.len());
        self.hash.clear();

        debug!("reset {:?}: removed {} particles", id, removed);
        Ok(())
    }

    /// Advances the world by one tick of length `dt`. Non-positive `dt` skips the tick.
    pub fn step(&mut self, dt: FT) -> StepStatistics {
        if !(dt > 0.) {
            warn!("skipping tick with non-positive time step {}", dt);
            return StepStatistics {
                skipped: true,
                ..Default::default()
            };
        }

        self.pcounters.begin("simulation-step");
        let iterations = self.params.solver_iterations;
        let gravity = self.params.gravity_vector();
        let container = self.params.container;

        collision::reset_classification(&mut self.particles);

        self.pcounters.begin("prediction");
        fluid_solver::apply_external_forces(&mut self.particles, gravity, dt);
        fluid_solver::damp_velocities(&mut self.particles, self.params.velocity_damping);
        fluid_solver::predict_positions(&mut self.particles, dt);
        for body in &self.soft_bodies {
            body.prepare_step(&mut self.particles, &container, gravity, &self.params.soft_body, dt);
        }
        self.pcounters.end("prediction");

        let density_params = DensityConstraintParams::new(&self.params);
        let contact_stiffness = adjusted_stiffness(self.params.collision_stiffness, iterations);
        let mut statistics = StepStatistics::default();

        for _ in 0..iterations {
            self.pcounters.begin("neighborhood");
            self.hash.clear();
            self.hash.register_all(&self.particles);
            self.neighs.build(&self.hash, &self.particles);
            self.pcounters.end("neighborhood");

            self.pcounters.begin("density-solver");
            fluid_solver::update_densities(&mut self.particles, &self.neighs, &density_params);
            let (avg_density_error, max_density_error) = fluid_solver::density_error(&self.particles);
            fluid_solver::update_lambdas(&mut self.particles, &self.neighs, &density_params);
            fluid_solver::update_position_corrections(&mut self.particles, &self.neighs, &density_params);
            fluid_solver::apply_position_corrections(&mut self.particles);
            self.pcounters.end("density-solver");

            self.pcounters.begin("collision");
            let contacts = match self.params.contact_model {
                ContactModel::Circles => {
                    collision::accumulate_circle_contacts(&mut self.particles, &self.neighs, contact_stiffness)
                }
                ContactModel::SignedDistance => {
                    let outlines: Vec<Outline> = self
                        .soft_bodies
                        .iter()
                        .filter(|b| b.is_finalized())
                        .map(|b| Outline {
                            owner: b.id,
                            vertices: &b.outline,
                        })
                        .collect();
                    let distances = update_signed_distances(&mut self.particles, &outlines);
                    collision::accumulate_signed_distance_contacts(&mut self.particles, &distances, contact_stiffness)
                }
            };
            collision::apply_position_corrections(&mut self.particles);
            self.container_handler.project(&container, &mut self.particles, iterations);
            self.pcounters.end("collision");

            if let ContainerHandler::PositionBasedContainer(handler) = &self.container_handler {
                statistics.container_constraints += handler.constraints().len();
            }
            statistics.iterations.push(IterationStatistics {
                avg_density_error,
                max_density_error,
                contacts,
            });
        }

        self.pcounters.begin("integration");
        fluid_solver::update_velocities(&mut self.particles, dt);
        if self.params.xsph {
            fluid_solver::apply_xsph_viscosity(
                &mut self.particles,
                &self.neighs,
                self.params.xsph_viscosity,
                self.params.smoothing_distance,
            );
        }
        fluid_solver::commit_positions(&mut self.particles);
        self.container_handler.after_commit(&container, &mut self.particles);
        for body in self.soft_bodies.iter().filter(|b| b.is_finalized()) {
            body.integrate(&mut self.particles, &container, dt);
        }
        debug_assert_committed_inside(&self.particles, &container);
        self.pcounters.end("integration");

        self.time += dt;
        self.ticks += 1;
        self.pcounters.end("simulation-step");

        if let Some(last) = statistics.iterations.last() {
            self.vcounters.add_value("density-error", last.avg_density_error);
        }
        self.vcounters.add_value("contacts", statistics.contacts() as FT);
        self.vcounters.add_value("particle-count", self.particles.len() as FT);

        debug!(
            "tick {} (t={:.4}): density error per iteration {:?}, {} contacts",
            self.ticks,
            self.time,
            statistics
                .iterations
                .iter()
                .map(|it| (it.avg_density_error, it.max_density_error))
                .collect::<Vec<_>>(),
            statistics.contacts()
        );

        statistics
    }

    /// Changes one scalar by `delta`, clamped to its valid range, and returns the new value.
    pub fn adjust_setting(&mut self, setting: AdjustableSetting, delta: FT) -> FT {
        let (value, min, max) = match setting {
            AdjustableSetting::VelocityDamping => (&mut self.params.velocity_damping, FT::EPSILON, 1.),
            AdjustableSetting::XsphViscosity => (&mut self.params.xsph_viscosity, 0., 1.),
            AdjustableSetting::SoftBodyDensityWeight => (&mut self.params.soft_body_density_weight, 0., FT::MAX),
            AdjustableSetting::SoftBodyElasticity => (&mut self.params.soft_body.elasticity, 1e-4, FT::MAX),
            AdjustableSetting::SoftBodyBeta => (&mut self.params.soft_body.beta, 0., 1.),
            AdjustableSetting::CollisionStiffness => (&mut self.params.collision_stiffness, 0., 1.),
        };
        *value = (*value + delta).max(min).min(max);
        debug!("adjusted {:?} to {}", setting, *value);
        *value
    }

    pub fn telemetry(&self) -> Telemetry {
        let fluid_particles = self.particles.state.iter().filter(|s| s.is_fluid()).count();
        Telemetry {
            fluid_particles,
            soft_body_particles: self.particles.len() - fluid_particles,
            fluids: self.fluids.len(),
            soft_bodies: self.soft_bodies.len(),
            velocity_damping: self.params.velocity_damping,
            xsph_viscosity: self.params.xsph_viscosity,
            time: self.time,
            ticks: self.ticks,
        }
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn container(&self) -> &Container {
        &self.params.container
    }

    pub fn registry(&self) -> &ParticleRegistry {
        &self.registry
    }

    pub fn particles(&self) -> &ParticleVec {
        &self.particles
    }

    /// Committed positions, stable between ticks.
    pub fn positions(&self) -> &[V2] {
        &self.particles.position
    }

    pub fn radii(&self) -> &[FT] {
        &self.particles.radius
    }

    pub fn classes(&self) -> &[ParticleClass] {
        &self.particles.class
    }

    pub fn neighbors(&self) -> &NeighborhoodCache {
        &self.neighs
    }

    pub fn fluid(&self, id: SimulationId) -> Option<&FluidSimulation> {
        self.fluids.iter().find(|f| f.id == id)
    }

    pub fn soft_body(&self, id: SimulationId) -> Option<&SoftBody> {
        self.soft_bodies.iter().find(|b| b.id == id)
    }

    pub fn performance_counters(&self) -> &PerformanceCounters {
        &self.pcounters
    }

    pub fn value_counters(&self) -> &ValueCounters {
        &self.vcounters
    }
}

/// Committed positions are clamped into the container, anything else is a solver bug.
fn debug_assert_committed_inside(particles: &ParticleVec, container: &Container) {
    if cfg!(debug_assertions) {
        for i in 0..particles.len() {
            debug_assert!(
                !particles.active[i] || container.contains(particles.position[i], 0.),
                "particle {} at {:?} was committed outside of the container {:?}",
                i,
                particles.position[i],
                container
            );
        }
    }
}
