pub mod collision;
pub mod concurrency;
pub mod container;
pub mod counters;
pub mod fluid_solver;
pub mod mat2;
pub mod neighborhood_search;
pub mod particle;
pub mod scene;
pub mod signed_distance;
pub mod simulation_parameters;
pub mod soft_body;
pub mod spatial_hash;
pub mod sph_kernels;
pub mod world;

#[cfg(feature = "double-precision")]
pub mod floating_type_mod {
    pub type FT = f64;
    pub use std::f64::consts::PI;
}

#[cfg(not(feature = "double-precision"))]
pub mod floating_type_mod {
    pub type FT = f32;
    pub use std::f32::consts::PI;
}

use floating_type_mod::FT;

use nalgebra::{SMatrix, SVector};
use num_traits::Float;
use std::fmt::Display;

pub type V<FT, const D: usize> = SVector<FT, D>;
pub type M<FT, const D: usize> = SMatrix<FT, D, D>;

pub type V2 = V<FT, 2>;
pub type M2 = M<FT, 2>;

pub fn vec2f(x: FT, y: FT) -> V2 {
    [x, y].into()
}

pub fn is_ft_approx_eq<FT: Float>(a: FT, b: FT, tolerance: FT) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<FT: Float + Display>(a: FT, b: FT, tolerance: FT, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}

pub use counters::write_statistics;
pub use particle::{GlobalIndex, ParticleClass, ParticleId, ParticleKind, ParticleRegistry, ParticleVec, SimulationId};
pub use scene::{init_simulation_params, init_world, SceneConfig};
pub use simulation_parameters::SimulationParams;
pub use world::{AdjustableSetting, StepStatistics, Telemetry, World};
