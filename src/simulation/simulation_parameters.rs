use crate::{container::Container, floating_type_mod::FT, vec2f, V2};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// How fluid particles are kept inside the container.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ContainerHandling {
    /// Per-iteration wall constraints projected like every other position constraint.
    PositionBased,
    /// Reflect the velocity after the position solve and clamp into bounds.
    VelocityReflect,
}

/// How particles of different instances detect and resolve contacts.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ContactModel {
    /// Circle-circle overlap along the connecting line.
    Circles,
    /// Distance to the nearest outline edge of another soft body.
    SignedDistance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftBodyParams {
    /// Relaxation toward the goal shape is `time_step / elasticity`.
    pub elasticity: FT,
    /// Blend between rigid (0) and affine (1) shape matching.
    pub beta: FT,
    pub linear_match: bool,
    pub volume_conservation: bool,
    pub allow_flipping: bool,
    pub restitution: FT,
    /// Pinned particles weigh this much more in the center of mass.
    pub pinned_mass_scale: FT,
}

impl Default for SoftBodyParams {
    fn default() -> Self {
        SoftBodyParams {
            elasticity: 0.04,
            beta: 0.0,
            linear_match: false,
            volume_conservation: false,
            allow_flipping: true,
            restitution: 0.9,
            pinned_mass_scale: 100.,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub time_step: FT,
    pub container: Container,

    /// Edge length of a spatial hash cell. Must not be smaller than `smoothing_distance`.
    pub cell_size: FT,
    pub smoothing_distance: FT,
    pub particle_radius: FT,
    pub particle_mass: FT,
    pub solver_iterations: usize,

    pub gravity_enabled: bool,
    pub gravity: [FT; 2],
    pub velocity_damping: FT,

    /// `0` derives the rest density from the lattice spacing of the first fluid block.
    pub rest_density: FT,
    /// Constraint force mixing term in the lambda denominator.
    pub relaxation: FT,

    pub artificial_pressure: bool,
    pub artificial_pressure_k: FT,
    pub artificial_pressure_n: i32,
    /// Given as a fraction of the smoothing distance.
    pub artificial_pressure_dq: FT,

    pub xsph: bool,
    pub xsph_viscosity: FT,

    pub container_handling: ContainerHandling,
    pub container_stiffness: FT,

    pub contact_model: ContactModel,
    pub collision_stiffness: FT,

    /// Weight of soft-body particles in the fluid density estimate.
    pub soft_body_density_weight: FT,
    pub soft_body: SoftBodyParams,

    pub counters_enabled: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            time_step: 1. / 60.,
            container: Container::new(0., 0., 100., 60.),
            cell_size: 2.,
            smoothing_distance: 2.,
            particle_radius: 0.5,
            particle_mass: 1.,
            solver_iterations: 5,
            gravity_enabled: true,
            gravity: [0., 9.81],
            velocity_damping: 0.99999,
            rest_density: 0.,
            relaxation: 5.,
            artificial_pressure: true,
            artificial_pressure_k: 0.1,
            artificial_pressure_n: 4,
            artificial_pressure_dq: 0.2,
            xsph: true,
            xsph_viscosity: 0.05,
            container_handling: ContainerHandling::PositionBased,
            container_stiffness: 1.,
            contact_model: ContactModel::Circles,
            collision_stiffness: 0.8,
            soft_body_density_weight: 1.,
            soft_body: SoftBodyParams::default(),
            counters_enabled: false,
        }
    }
}

impl SimulationParams {
    pub fn gravity_vector(&self) -> V2 {
        if self.gravity_enabled {
            vec2f(self.gravity[0], self.gravity[1])
        } else {
            V2::zeros()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.time_step > 0., "time_step must be positive (got {})", self.time_step);
        ensure!(
            self.container.right > self.container.left && self.container.bottom > self.container.top,
            "container is degenerate: {:?}",
            self.container
        );
        ensure!(
            self.smoothing_distance > 0. && self.cell_size > 0.,
            "cell_size and smoothing_distance must be positive"
        );
        ensure!(
            self.cell_size >= self.smoothing_distance,
            "cell_size {} is smaller than smoothing_distance {}; interacting pairs could miss each other",
            self.cell_size,
            self.smoothing_distance
        );
        ensure!(self.particle_radius > 0., "particle_radius must be positive");
        ensure!(self.particle_mass > 0., "particle_mass must be positive");
        ensure!(self.solver_iterations >= 1, "at least one solver iteration is required");
        ensure!(
            self.velocity_damping > 0. && self.velocity_damping <= 1.,
            "velocity_damping must be in (0, 1] (got {})",
            self.velocity_damping
        );
        ensure!(self.relaxation > 0., "relaxation must be positive");
        ensure!(self.rest_density >= 0., "rest_density must not be negative");
        ensure!(
            (0. ..=1.).contains(&self.collision_stiffness) && (0. ..=1.).contains(&self.container_stiffness),
            "stiffness values must be in [0, 1]"
        );
        ensure!(
            self.artificial_pressure_dq > 0. && self.artificial_pressure_dq < 1.,
            "artificial_pressure_dq must be in (0, 1)"
        );
        ensure!(self.soft_body.elasticity > 0., "soft body elasticity must be positive");
        ensure!(
            (0. ..=1.).contains(&self.soft_body.beta),
            "soft body beta must be in [0, 1] (got {})",
            self.soft_body.beta
        );
        ensure!(self.soft_body.pinned_mass_scale > 0., "pinned_mass_scale must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() {
        SimulationParams::default().validate().unwrap();
    }

    #[test]
    fn cell_smaller_than_smoothing_distance_is_rejected() {
        let params = SimulationParams {
            cell_size: 1.,
            smoothing_distance: 2.,
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("smaller than smoothing_distance"));
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let params: SimulationParams = serde_yaml::from_str(
            "solver_iterations: 3\ngravity_enabled: false\nsoft_body:\n  beta: 0.5\n",
        )
        .unwrap();
        assert_eq!(params.solver_iterations, 3);
        assert_eq!(params.gravity_vector(), V2::zeros());
        assert_eq!(params.soft_body.beta, 0.5);
        assert_eq!(params.soft_body.restitution, 0.9);
        assert_eq!(params.container_handling, ContainerHandling::PositionBased);
    }

    #[test]
    fn bundled_config_parses() {
        let params: SimulationParams =
            serde_yaml::from_str(include_str!("../../configs/simulation.yaml")).unwrap();
        params.validate().unwrap();
    }
}
