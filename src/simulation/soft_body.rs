use tracing::warn;

use crate::{
    container::{reflect_with_restitution, Container},
    floating_type_mod::FT,
    mat2::polar_decomposition,
    particle::{ParticleId, ParticleVec, SimulationId},
    simulation_parameters::SoftBodyParams,
    M2, V2,
};

/// Result of matching the rest shape onto the current predicted positions.
#[derive(Debug, Clone, Copy)]
pub struct ShapeMatch {
    pub center_of_mass: V2,
    pub rest_center_of_mass: V2,
    pub rotation: M2,
    /// `(1 - beta) R + beta A`
    pub transform: M2,
}

impl ShapeMatch {
    pub fn goal(&self, rest_position: V2) -> V2 {
        self.center_of_mass + self.transform * (rest_position - self.rest_center_of_mass)
    }
}

/**
 * Best fit transform from the rest cloud `rest` to the current cloud `current`.
 *
 * Pinned particles are weighted with `pinned_mass_scale` in both centers of mass so they act as
 * anchors. Returns `None` for fewer than two particles where the covariance is undefined.
 */
pub fn match_shape(
    current: &[V2],
    rest: &[V2],
    masses: &[FT],
    pinned: &[bool],
    params: &SoftBodyParams,
) -> Option<ShapeMatch> {
    let n = current.len();
    if n <= 1 {
        return None;
    }

    let mut total_mass = 0.;
    let mut center_of_mass = V2::zeros();
    let mut rest_center_of_mass = V2::zeros();
    for i in 0..n {
        let m = if pinned[i] {
            masses[i] * params.pinned_mass_scale
        } else {
            masses[i]
        };
        total_mass += m;
        center_of_mass += current[i] * m;
        rest_center_of_mass += rest[i] * m;
    }
    if total_mass <= 0. {
        return None;
    }
    center_of_mass /= total_mass;
    rest_center_of_mass /= total_mass;

    let mut apq = M2::zeros();
    let mut aqq = M2::zeros();
    for i in 0..n {
        let p = current[i] - center_of_mass;
        let q = rest[i] - rest_center_of_mass;
        apq += p * q.transpose() * masses[i];
        aqq += q * q.transpose() * masses[i];
    }

    if !params.allow_flipping && apq.determinant() < 0. {
        apq[(0, 1)] = -apq[(0, 1)];
        apq[(1, 1)] = -apq[(1, 1)];
    }

    let (rotation, _) = polar_decomposition(&apq);

    let mut transform = rotation;
    if params.linear_match {
        // a singular rest covariance (collinear rest shape) leaves only the rotation
        if let Some(aqq_inv) = aqq.try_inverse() {
            let mut a = apq * aqq_inv;
            if params.volume_conservation {
                let det = a.determinant();
                if det != 0. {
                    a *= FT::min(1. / det.abs().sqrt(), 2.);
                }
            }
            transform = rotation * (1. - params.beta) + a * params.beta;
        }
    }

    Some(ShapeMatch {
        center_of_mass,
        rest_center_of_mass,
        rotation,
        transform,
    })
}

/// A shape matching soft body. Its particles live in the shared arena.
#[derive(Debug, Clone)]
pub struct SoftBody {
    pub id: SimulationId,
    pub particles: Vec<ParticleId>,
    /// Ordered closed contour, a subset of `particles`.
    pub outline: Vec<ParticleId>,
    finalized: bool,
}

impl SoftBody {
    pub fn new(id: SimulationId) -> Self {
        SoftBody {
            id,
            particles: Vec::new(),
            outline: Vec::new(),
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Freezes the current positions as the rest shape and lets the body take part in ticks.
    pub fn finalize(&mut self, particles: &mut ParticleVec) {
        for &i in &self.particles {
            let position = particles.position[i];
            if let Some(d) = particles.state[i].deformable_mut() {
                d.original_position = position;
                d.goal_position = position;
            }
            particles.predicted_position[i] = position;
            particles.position_correction[i] = V2::zeros();
            particles.active[i] = true;
        }
        self.finalized = true;
    }

    /// Used by resets: the body becomes empty and can be authored again.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.outline.clear();
        self.finalized = false;
    }

    /// Gravity, advection and goal reset. Pinned particles keep their position.
    pub fn apply_external_forces(&self, particles: &mut ParticleVec, gravity: V2, dt: FT) {
        for &i in &self.particles {
            if particles.is_pinned(i) {
                particles.velocity[i] = V2::zeros();
                particles.predicted_position[i] = particles.position[i];
            } else {
                particles.velocity[i] += gravity * dt;
                particles.predicted_position[i] = particles.position[i] + particles.velocity[i] * dt;
            }
            if let Some(d) = particles.state[i].deformable_mut() {
                d.goal_position = d.original_position;
            }
        }
    }

    pub fn resolve_container(&self, particles: &mut ParticleVec, container: &Container, restitution: FT, dt: FT) {
        for &i in &self.particles {
            if particles.is_pinned(i) {
                continue;
            }
            particles.predicted_position[i] = reflect_with_restitution(
                container,
                particles.position[i],
                particles.predicted_position[i],
                particles.velocity[i],
                particles.radius[i],
                restitution,
                dt,
            );
        }
    }

    /// Computes goal positions and relaxes the predicted positions towards them by `stiffness`.
    pub fn shape_match(&self, particles: &mut ParticleVec, params: &SoftBodyParams, stiffness: FT) -> Option<ShapeMatch> {
        let current: Vec<V2> = self.particles.iter().map(|&i| particles.predicted_position[i]).collect();
        let rest: Vec<V2> = self
            .particles
            .iter()
            .map(|&i| {
                particles.state[i]
                    .deformable()
                    .map_or(particles.position[i], |d| d.original_position)
            })
            .collect();
        let masses: Vec<FT> = self.particles.iter().map(|&i| particles.mass[i]).collect();
        let pinned: Vec<bool> = self.particles.iter().map(|&i| particles.is_pinned(i)).collect();

        let shape = match_shape(&current, &rest, &masses, &pinned, params)?;

        for (k, &i) in self.particles.iter().enumerate() {
            let goal = shape.goal(rest[k]);
            if let Some(d) = particles.state[i].deformable_mut() {
                d.goal_position = goal;
            }
            if pinned[k] {
                continue;
            }
            let predicted = &mut particles.predicted_position[i];
            *predicted += (goal - *predicted) * stiffness;
        }

        Some(shape)
    }

    /**
     * Applies the remaining contact corrections, derives the velocity from the position change
     * and commits the predicted positions.
     */
    pub fn integrate(&self, particles: &mut ParticleVec, container: &Container, dt: FT) {
        for &i in &self.particles {
            if particles.is_pinned(i) {
                particles.position_correction[i] = V2::zeros();
                particles.predicted_position[i] = particles.position[i];
                particles.velocity[i] = V2::zeros();
                continue;
            }
            let corrected = particles.predicted_position[i] + particles.position_correction[i];
            particles.position_correction[i] = V2::zeros();
            let predicted = container.clamp(corrected, particles.radius[i]);
            particles.predicted_position[i] = predicted;
            particles.velocity[i] = (predicted - particles.position[i]) / dt;
            particles.position[i] = predicted;
        }
    }

    /// Runs everything of a tick that happens before the shared constraint iterations.
    pub fn prepare_step(
        &self,
        particles: &mut ParticleVec,
        container: &Container,
        gravity: V2,
        params: &SoftBodyParams,
        dt: FT,
    ) -> Option<ShapeMatch> {
        if !self.finalized {
            return None;
        }
        let stiffness = dt / params.elasticity;
        if stiffness > 1. {
            warn!(
                "soft body {:?}: goal relaxation {} exceeds 1 for dt={}, expect overshoot",
                self.id, stiffness, dt
            );
        }
        self.apply_external_forces(particles, gravity, dt);
        self.resolve_container(particles, container, params.restitution, dt);
        self.shape_match(particles, params, stiffness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        particle::{ParticleRegistry, SimulationId},
        vec2f,
    };

    fn square() -> Vec<V2> {
        vec![vec2f(0., 0.), vec2f(2., 0.), vec2f(2., 2.), vec2f(0., 2.), vec2f(1., 1.)]
    }

    fn rotate(p: V2, angle: FT) -> V2 {
        let (s, c) = angle.sin_cos();
        vec2f(c * p.x - s * p.y, s * p.x + c * p.y)
    }

    #[test]
    fn undeformed_body_matches_itself() {
        let rest = square();
        let masses = vec![1.; rest.len()];
        let pinned = vec![false; rest.len()];
        let params = SoftBodyParams::default();
        let shape = match_shape(&rest, &rest, &masses, &pinned, &params).unwrap();

        for i in 0..4 {
            crate::assert_ft_approx_eq(shape.rotation[i], M2::identity()[i], 1e-5, || "rotation".into());
        }
        for &q in &rest {
            let goal = shape.goal(q);
            crate::assert_ft_approx_eq(goal.x, q.x, 1e-5, || "goal.x".into());
            crate::assert_ft_approx_eq(goal.y, q.y, 1e-5, || "goal.y".into());
        }
    }

    #[test]
    fn rigid_motion_is_reproduced() {
        let rest = square();
        let current: Vec<V2> = rest.iter().map(|&p| rotate(p, 0.5) + vec2f(10., -3.)).collect();
        let masses = vec![1.; rest.len()];
        let pinned = vec![false; rest.len()];
        let shape = match_shape(&current, &rest, &masses, &pinned, &SoftBodyParams::default()).unwrap();
        for (q, p) in rest.iter().zip(current.iter()) {
            let goal = shape.goal(*q);
            crate::assert_ft_approx_eq(goal.x, p.x, 1e-4, || "goal.x".into());
            crate::assert_ft_approx_eq(goal.y, p.y, 1e-4, || "goal.y".into());
        }
    }

    #[test]
    fn collinear_rest_shape_falls_back_to_rotation() {
        let rest = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(2., 0.)];
        let masses = vec![1.; 3];
        let pinned = vec![false; 3];
        let params = SoftBodyParams {
            linear_match: true,
            beta: 1.,
            ..Default::default()
        };
        let shape = match_shape(&rest, &rest, &masses, &pinned, &params).unwrap();
        assert_eq!(shape.transform, shape.rotation);
        assert!(shape.transform.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn affine_match_follows_a_stretch() {
        let rest = square();
        let current: Vec<V2> = rest.iter().map(|p| vec2f(p.x * 1.5, p.y)).collect();
        let masses = vec![1.; rest.len()];
        let pinned = vec![false; rest.len()];
        let params = SoftBodyParams {
            linear_match: true,
            beta: 1.,
            ..Default::default()
        };
        let shape = match_shape(&current, &rest, &masses, &pinned, &params).unwrap();
        crate::assert_ft_approx_eq(shape.transform[(0, 0)], 1.5, 1e-4, || "stretch".into());

        let conserving = SoftBodyParams {
            volume_conservation: true,
            ..params
        };
        let shape = match_shape(&current, &rest, &masses, &pinned, &conserving).unwrap();
        crate::assert_ft_approx_eq(shape.transform.determinant(), 1., 1e-4, || "volume".into());
    }

    #[test]
    fn beta_blends_rotation_and_affine_match() {
        let rest = square();
        let current: Vec<V2> = rest.iter().map(|p| vec2f(p.x * 1.5, p.y)).collect();
        let masses = vec![1.; rest.len()];
        let pinned = vec![false; rest.len()];
        let params = SoftBodyParams {
            linear_match: true,
            beta: 0.25,
            ..Default::default()
        };
        let shape = match_shape(&current, &rest, &masses, &pinned, &params).unwrap();

        // a pure stretch has no rotation, so T = 0.75 I + 0.25 diag(1.5, 1)
        crate::assert_ft_approx_eq(shape.transform[(0, 0)], 1.125, 1e-4, || "t00".into());
        crate::assert_ft_approx_eq(shape.transform[(1, 1)], 1., 1e-4, || "t11".into());
        crate::assert_ft_approx_eq(shape.transform[(0, 1)], 0., 1e-4, || "t01".into());
        crate::assert_ft_approx_eq(shape.transform[(1, 0)], 0., 1e-4, || "t10".into());

        let goal = shape.goal(rest[1]);
        crate::assert_ft_approx_eq(goal.x - shape.center_of_mass.x, 1.125, 1e-4, || "goal".into());
    }

    #[test]
    fn mirrored_cloud_is_not_flipped_when_disallowed() {
        let rest = square();
        let current: Vec<V2> = rest.iter().map(|p| vec2f(-p.x, p.y)).collect();
        let masses = vec![1.; rest.len()];
        let pinned = vec![false; rest.len()];
        let params = SoftBodyParams {
            allow_flipping: false,
            ..Default::default()
        };
        let shape = match_shape(&current, &rest, &masses, &pinned, &params).unwrap();
        assert!(shape.rotation.determinant() > 0.);

        let flipping = match_shape(&current, &rest, &masses, &pinned, &SoftBodyParams::default()).unwrap();
        assert!(flipping.rotation.determinant() < 0.);
    }

    #[test]
    fn single_particle_has_no_shape() {
        let params = SoftBodyParams::default();
        assert!(match_shape(&[vec2f(1., 1.)], &[vec2f(1., 1.)], &[1.], &[false], &params).is_none());
    }

    #[test]
    fn pinned_particle_stays_and_anchors_the_body() {
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        let mut body = SoftBody::new(SimulationId(3));
        for p in square() {
            let i = particles.spawn_deformable(&registry, body.id, p + vec2f(5., 5.), 0.2, 1.);
            body.particles.push(i);
        }
        body.finalize(&mut particles);
        let anchor = body.particles[0];
        particles.inverse_mass[anchor] = 0.;
        if let Some(d) = particles.state[anchor].deformable_mut() {
            d.pinned = true;
        }

        let container = Container::new(0., 0., 20., 20.);
        let params = SoftBodyParams::default();
        let dt = 1. / 60.;
        for _ in 0..30 {
            body.prepare_step(&mut particles, &container, vec2f(0., 9.81), &params, dt);
            body.integrate(&mut particles, &container, dt);
        }
        assert_eq!(particles.position[anchor], vec2f(5., 5.));
        // the rest of the body hangs below the anchor
        assert!(particles.position[body.particles[2]].y > 7.);
    }
}
