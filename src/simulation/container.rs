use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::{collision::adjusted_stiffness, floating_type_mod::FT, particle::ParticleVec, vec2f, V2};

/// Axis aligned box all particles live in. `y` grows downwards, so `top < bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub left: FT,
    pub top: FT,
    pub right: FT,
    pub bottom: FT,
}

impl Container {
    pub fn new(left: FT, top: FT, width: FT, height: FT) -> Self {
        Container {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    pub fn width(&self) -> FT {
        self.right - self.left
    }

    pub fn height(&self) -> FT {
        self.bottom - self.top
    }

    /// Upper left corner; the spatial hash measures local positions from here.
    pub fn origin(&self) -> V2 {
        vec2f(self.left, self.top)
    }

    pub fn particle_min(&self, radius: FT) -> V2 {
        vec2f(self.left + radius, self.top + radius)
    }

    pub fn particle_max(&self, radius: FT) -> V2 {
        vec2f(self.right - radius, self.bottom - radius)
    }

    /// Never panics, also not for a particle wider than the container.
    pub fn clamp(&self, p: V2, radius: FT) -> V2 {
        let min = self.particle_min(radius);
        let max = self.particle_max(radius);
        vec2f(p.x.max(min.x).min(max.x), p.y.max(min.y).min(max.y))
    }

    pub fn contains(&self, p: V2, radius: FT) -> bool {
        let min = self.particle_min(radius);
        let max = self.particle_max(radius);
        p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
    }

    /**
     * The four walls as planes with inward normals, shifted inwards by the particle radius.
     * `probe` is positive inside the container.
     */
    pub fn walls(&self, radius: FT) -> [ContainerWall; 4] {
        let min = self.particle_min(radius);
        let max = self.particle_max(radius);
        [
            ContainerWall::new(vec2f(1., 0.), -min.x),
            ContainerWall::new(vec2f(-1., 0.), max.x),
            ContainerWall::new(vec2f(0., 1.), -min.y),
            ContainerWall::new(vec2f(0., -1.), max.y),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContainerWall {
    pub normal: V2,
    pub delta: FT,
}

impl ContainerWall {
    pub fn new(normal: V2, delta: FT) -> Self {
        ContainerWall { normal, delta }
    }

    pub fn probe(&self, x: V2) -> FT {
        self.normal.dot(&x) + self.delta
    }
}

/// One violated wall for one particle. Lives for a single solver iteration.
#[derive(Debug, Clone, Copy)]
pub struct ContainerConstraint {
    pub particle: usize,
    pub normal: V2,
    pub projection_point: V2,
    pub stiffness: FT,
    pub stiffness_adjusted: FT,
}

impl ContainerConstraint {
    /**
     * Builds the constraint for a particle that moved from `position` to `predicted` and crossed `wall`.
     * The projection point is where the segment crosses the wall.
     */
    pub fn new(
        particle: usize,
        wall: &ContainerWall,
        position: V2,
        predicted: V2,
        stiffness: FT,
        iterations: usize,
    ) -> Self {
        let d0 = wall.probe(position);
        let d1 = wall.probe(predicted);
        let projection_point = if d0 >= 0. && d0 - d1 > FT::EPSILON {
            let t = d0 / (d0 - d1);
            position + (predicted - position) * t
        } else {
            // already outside at the start of the tick: use the closest wall point
            predicted - wall.normal * (d1 / wall.normal.norm_squared())
        };

        ContainerConstraint {
            particle,
            normal: wall.normal,
            projection_point,
            stiffness,
            stiffness_adjusted: adjusted_stiffness(stiffness, iterations),
        }
    }

    /// Position delta for the current predicted position, zero once the constraint is satisfied.
    pub fn project(&self, predicted: V2) -> V2 {
        let c = (predicted - self.projection_point).dot(&self.normal);
        if c >= 0. {
            return V2::zeros();
        }
        -self.normal * (c / self.normal.norm_squared()) * self.stiffness_adjusted
    }
}

/// Reflection used by soft bodies before shape matching.
pub fn reflect_with_restitution(
    container: &Container,
    position: V2,
    predicted: V2,
    velocity: V2,
    radius: FT,
    restitution: FT,
    dt: FT,
) -> V2 {
    let min = container.particle_min(radius);
    let max = container.particle_max(radius);
    let mut p = predicted;

    if p.x < min.x || p.x > max.x {
        p.x = position.x - velocity.x * dt * restitution;
        p.y = position.y;
    }
    if p.y < min.y || p.y > max.y {
        p.y = position.y - velocity.y * dt * restitution;
        p.x = position.x;
    }

    container.clamp(p, radius)
}

#[enum_dispatch]
#[allow(unused_variables)]
pub trait ContainerHandlerTrait {
    /// Runs once per solver iteration on the predicted positions of the fluid particles.
    fn project(&mut self, container: &Container, particles: &mut ParticleVec, iterations: usize) {}

    /// Runs once per tick after fluid velocities were derived and positions committed.
    fn after_commit(&mut self, container: &Container, particles: &mut ParticleVec) {}
}

pub struct PositionBasedContainer {
    pub stiffness: FT,
    constraints: Vec<ContainerConstraint>,
}

impl PositionBasedContainer {
    pub fn new(stiffness: FT) -> Self {
        PositionBasedContainer {
            stiffness,
            constraints: Vec::new(),
        }
    }

    pub fn constraints(&self) -> &[ContainerConstraint] {
        &self.constraints
    }
}

impl ContainerHandlerTrait for PositionBasedContainer {
    fn project(&mut self, container: &Container, particles: &mut ParticleVec, iterations: usize) {
        self.constraints.clear();

        for i in 0..particles.len() {
            if !particles.active[i] || !particles.state[i].is_fluid() || particles.is_pinned(i) {
                continue;
            }
            let predicted = particles.predicted_position[i];
            for wall in container.walls(particles.radius[i]).iter() {
                if wall.probe(predicted) < 0. {
                    self.constraints.push(ContainerConstraint::new(
                        i,
                        wall,
                        particles.position[i],
                        predicted,
                        self.stiffness,
                        iterations,
                    ));
                }
            }
        }

        for constraint in &self.constraints {
            let p = &mut particles.predicted_position[constraint.particle];
            *p += constraint.project(*p);
        }
    }

    fn after_commit(&mut self, container: &Container, particles: &mut ParticleVec) {
        // a stiffness below one leaves a remainder outside the walls
        for i in 0..particles.len() {
            if particles.active[i] && particles.state[i].is_fluid() && !particles.is_pinned(i) {
                particles.position[i] = container.clamp(particles.position[i], particles.radius[i]);
                particles.predicted_position[i] = particles.position[i];
            }
        }
    }
}

pub struct ReflectingContainer;

impl ContainerHandlerTrait for ReflectingContainer {
    fn after_commit(&mut self, container: &Container, particles: &mut ParticleVec) {
        for i in 0..particles.len() {
            if !particles.active[i] || !particles.state[i].is_fluid() || particles.is_pinned(i) {
                continue;
            }
            let min = container.particle_min(particles.radius[i]);
            let max = container.particle_max(particles.radius[i]);
            let p = particles.position[i];
            let v = &mut particles.velocity[i];

            if p.x < min.x || p.x > max.x {
                v.x = -v.x;
            }
            if p.y < min.y || p.y > max.y {
                v.y = -v.y;
            }

            particles.position[i] = container.clamp(p, particles.radius[i]);
            particles.predicted_position[i] = particles.position[i];
        }
    }
}

#[enum_dispatch(ContainerHandlerTrait)]
pub enum ContainerHandler {
    PositionBasedContainer(PositionBasedContainer),
    ReflectingContainer(ReflectingContainer),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{ParticleRegistry, SimulationId};

    fn container() -> Container {
        Container::new(0., 0., 10., 10.)
    }

    #[test]
    fn crossing_point_is_interpolated_on_the_wall() {
        let c = container();
        let walls = c.walls(1.);
        // right wall sits at x = 9
        let constraint = ContainerConstraint::new(0, &walls[1], vec2f(8., 5.), vec2f(10., 7.), 1., 3);
        crate::assert_ft_approx_eq(constraint.projection_point.x, 9., 1e-5, || "x".into());
        crate::assert_ft_approx_eq(constraint.projection_point.y, 6., 1e-5, || "y".into());

        let dp = constraint.project(vec2f(10., 7.));
        crate::assert_ft_approx_eq(dp.x, -1., 1e-5, || "dp.x".into());
        assert_eq!(dp.y, 0.);
        assert_eq!(constraint.project(vec2f(8.5, 7.)), V2::zeros());
    }

    #[test]
    fn partial_stiffness_moves_part_of_the_way() {
        let c = container();
        let walls = c.walls(0.);
        let constraint = ContainerConstraint::new(0, &walls[2], vec2f(5., 1.), vec2f(5., -1.), 0.5, 1);
        let dp = constraint.project(vec2f(5., -1.));
        crate::assert_ft_approx_eq(dp.y, 0.5, 1e-5, || "dp.y".into());
    }

    #[test]
    fn restitution_reflects_and_clamps() {
        let c = container();
        let p = reflect_with_restitution(&c, vec2f(9., 5.), vec2f(11., 5.), vec2f(60., 0.), 0.5, 0.9, 1. / 60.);
        crate::assert_ft_approx_eq(p.x, 9. - 0.9, 1e-5, || "x".into());
        assert!(c.contains(p, 0.5));
    }

    #[test]
    fn reflecting_handler_flips_outward_velocity() {
        let c = container();
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        let i = particles.spawn_fluid(&registry, SimulationId(0), vec2f(5., 11.), vec2f(1., 3.), 0.5, 1.);
        let mut handler: ContainerHandler = ReflectingContainer.into();
        handler.after_commit(&c, &mut particles);
        assert_eq!(particles.velocity[i], vec2f(1., -3.));
        assert_eq!(particles.position[i], vec2f(5., 9.5));
    }

    #[test]
    fn position_based_handler_projects_onto_wall() {
        let c = container();
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        let i = particles.spawn_fluid(&registry, SimulationId(0), vec2f(1., 5.), V2::zeros(), 0.5, 1.);
        particles.predicted_position[i] = vec2f(-1., 5.);
        let mut handler: ContainerHandler = PositionBasedContainer::new(1.).into();
        handler.project(&c, &mut particles, 4);
        crate::assert_ft_approx_eq(particles.predicted_position[i].x, 0.5, 1e-5, || "x".into());
    }
}
