//! Position based fluids: external forces, density constraint projection and velocity update.

use crate::{
    concurrency::{par_iter_mut1, par_iter_mut2},
    floating_type_mod::FT,
    neighborhood_search::NeighborhoodCache,
    particle::{ParticleState, ParticleVec},
    simulation_parameters::SimulationParams,
    sph_kernels::{poly6, poly6_distance, spiky_gradient},
    V2,
};

/// Constants of the density constraint derived once per tick from the parameters.
#[derive(Debug, Clone, Copy)]
pub struct DensityConstraintParams {
    pub h: FT,
    pub rest_density: FT,
    pub relaxation: FT,
    pub soft_body_density_weight: FT,
    /// `None` disables the artificial pressure term.
    pub artificial_pressure: Option<ArtificialPressure>,
}

#[derive(Debug, Clone, Copy)]
pub struct ArtificialPressure {
    pub k: FT,
    pub n: i32,
    /// `Poly6(dq)`, the kernel value the pair weight is normalized by.
    pub reference_weight: FT,
}

impl DensityConstraintParams {
    pub fn new(params: &SimulationParams) -> Self {
        let h = params.smoothing_distance;
        let reference_weight = poly6_distance(params.artificial_pressure_dq * h, h);
        DensityConstraintParams {
            h,
            rest_density: params.rest_density,
            relaxation: params.relaxation,
            soft_body_density_weight: params.soft_body_density_weight,
            artificial_pressure: if params.artificial_pressure && reference_weight > 0. {
                Some(ArtificialPressure {
                    k: params.artificial_pressure_k,
                    n: params.artificial_pressure_n,
                    reference_weight,
                })
            } else {
                None
            },
        }
    }
}

fn is_solved_fluid(particles: &ParticleVec, i: usize) -> bool {
    particles.active[i] && particles.state[i].is_fluid()
}

pub fn apply_external_forces(particles: &mut ParticleVec, gravity: V2, dt: FT) {
    let ParticleVec {
        ref mut velocity,
        ref active,
        ref state,
        ..
    } = *particles;
    par_iter_mut1(velocity, |i, v| {
        if active[i] && state[i].is_fluid() {
            *v += gravity * dt;
        }
    });
}

/// Applied once per tick, not per iteration.
pub fn damp_velocities(particles: &mut ParticleVec, damping: FT) {
    let ParticleVec {
        ref mut velocity,
        ref active,
        ref state,
        ..
    } = *particles;
    par_iter_mut1(velocity, |i, v| {
        if active[i] && state[i].is_fluid() {
            *v *= damping;
        }
    });
}

pub fn predict_positions(particles: &mut ParticleVec, dt: FT) {
    let ParticleVec {
        ref mut predicted_position,
        ref position,
        ref velocity,
        ref active,
        ref state,
        ..
    } = *particles;
    par_iter_mut1(predicted_position, |i, predicted| {
        if active[i] && state[i].is_fluid() {
            *predicted = position[i] + velocity[i] * dt;
        }
    });
}

/// Density of particle `i` from fluid neighbors and weighted soft-body neighbors.
pub fn calculate_density(
    i: usize,
    predicted_position: &[V2],
    neighs: &NeighborhoodCache,
    params: &DensityConstraintParams,
) -> FT {
    let pi = predicted_position[i];
    let fluid: FT = neighs.fluid(i).map(|j| poly6(pi - predicted_position[j], params.h)).sum();
    let soft: FT = neighs
        .deformable(i)
        .map(|j| poly6(pi - predicted_position[j], params.h))
        .sum();
    fluid + params.soft_body_density_weight * soft
}

/// Density and density constraint `C = rho / rho_0 - 1` of every fluid particle.
pub fn update_densities(particles: &mut ParticleVec, neighs: &NeighborhoodCache, params: &DensityConstraintParams) {
    let ParticleVec {
        ref mut state,
        ref predicted_position,
        ref active,
        ..
    } = *particles;
    par_iter_mut1(state, |i, state| {
        if !active[i] {
            return;
        }
        if let ParticleState::Fluid(fluid) = state {
            fluid.density = calculate_density(i, predicted_position, neighs, params);
            fluid.density_constraint = fluid.density / params.rest_density - 1.;
        }
    });
}

/**
 * `lambda_i = -C_i / (sum_k |grad_k C_i|^2 + eps)` with the self gradient
 * `sum_j grad W(p_i - p_j) / rho_0` and the neighbor gradients `-grad W(p_i - p_j) / rho_0`.
 */
pub fn calculate_lambda(
    i: usize,
    constraint: FT,
    predicted_position: &[V2],
    neighs: &NeighborhoodCache,
    params: &DensityConstraintParams,
) -> FT {
    let pi = predicted_position[i];
    let inv_rest_density = 1. / params.rest_density;

    let mut grad_self = V2::zeros();
    let mut sum_grad_sq = 0.;
    for j in neighs.fluid(i) {
        let grad = spiky_gradient(pi - predicted_position[j], params.h) * inv_rest_density;
        grad_self += grad;
        sum_grad_sq += grad.norm_squared();
    }
    sum_grad_sq += grad_self.norm_squared();

    -constraint / (sum_grad_sq + params.relaxation)
}

pub fn update_lambdas(particles: &mut ParticleVec, neighs: &NeighborhoodCache, params: &DensityConstraintParams) {
    let ParticleVec {
        ref mut state,
        ref predicted_position,
        ref active,
        ..
    } = *particles;
    par_iter_mut1(state, |i, state| {
        if !active[i] {
            return;
        }
        if let ParticleState::Fluid(fluid) = state {
            fluid.lambda = calculate_lambda(i, fluid.density_constraint, predicted_position, neighs, params);
        }
    });
}

/// `s_corr = -k (W(p_i - p_j) / W(dq))^n`
#[inline(always)]
pub fn artificial_pressure(diff: V2, h: FT, ap: &ArtificialPressure) -> FT {
    -ap.k * (poly6(diff, h) / ap.reference_weight).powi(ap.n)
}

pub fn calculate_position_correction(
    i: usize,
    predicted_position: &[V2],
    state: &[ParticleState],
    neighs: &NeighborhoodCache,
    params: &DensityConstraintParams,
) -> V2 {
    let pi = predicted_position[i];
    let lambda_i = state[i].lambda();

    let mut dp = V2::zeros();
    for j in neighs.fluid(i) {
        let diff = pi - predicted_position[j];
        let s_corr = params
            .artificial_pressure
            .as_ref()
            .map_or(0., |ap| artificial_pressure(diff, params.h, ap));
        dp += spiky_gradient(diff, params.h) * (lambda_i + state[j].lambda() + s_corr);
    }
    dp / params.rest_density
}

/// Writes the density correction of every fluid particle into its correction accumulator.
pub fn update_position_corrections(
    particles: &mut ParticleVec,
    neighs: &NeighborhoodCache,
    params: &DensityConstraintParams,
) {
    let ParticleVec {
        ref mut position_correction,
        ref predicted_position,
        ref state,
        ref active,
        ..
    } = *particles;
    par_iter_mut1(position_correction, |i, correction| {
        if active[i] && state[i].is_fluid() {
            *correction = calculate_position_correction(i, predicted_position, state, neighs, params);
        }
    });
}

/// Moves every movable fluid particle by its accumulated correction and resets the accumulator.
pub fn apply_position_corrections(particles: &mut ParticleVec) {
    let ParticleVec {
        ref mut predicted_position,
        ref mut position_correction,
        ref inverse_mass,
        ref state,
        ref active,
        ..
    } = *particles;
    par_iter_mut2(predicted_position, position_correction, |i, predicted, correction| {
        if active[i] && state[i].is_fluid() {
            if inverse_mass[i] > 0. {
                *predicted += *correction;
            }
            *correction = V2::zeros();
        }
    });
}

/// Average and maximum `|C|` over all solved fluid particles.
pub fn density_error(particles: &ParticleVec) -> (FT, FT) {
    let mut sum = 0.;
    let mut max: FT = 0.;
    let mut count = 0;
    for i in 0..particles.len() {
        if !is_solved_fluid(particles, i) {
            continue;
        }
        if let Some(fluid) = particles.state[i].fluid() {
            let c = fluid.density_constraint.abs();
            sum += c;
            max = max.max(c);
            count += 1;
        }
    }
    if count == 0 {
        (0., 0.)
    } else {
        (sum / count as FT, max)
    }
}

/// PBF velocity update `v = (p* - p) / dt`.
pub fn update_velocities(particles: &mut ParticleVec, dt: FT) {
    let ParticleVec {
        ref mut velocity,
        ref predicted_position,
        ref position,
        ref active,
        ref state,
        ..
    } = *particles;
    par_iter_mut1(velocity, |i, v| {
        if active[i] && state[i].is_fluid() {
            *v = (predicted_position[i] - position[i]) / dt;
        }
    });
}

/// `v_i += c * sum_j W(p_i - p_j) (v_j - v_i)` using the velocities before the pass.
pub fn apply_xsph_viscosity(particles: &mut ParticleVec, neighs: &NeighborhoodCache, viscosity: FT, h: FT) {
    let mut smoothed = particles.velocity.clone();
    {
        let ParticleVec {
            velocity,
            predicted_position,
            active,
            state,
            ..
        } = &*particles;
        par_iter_mut1(&mut smoothed, |i, v| {
            if !(active[i] && state[i].is_fluid()) {
                return;
            }
            let pi = predicted_position[i];
            let vi = velocity[i];
            let mut dv = V2::zeros();
            for j in neighs.fluid(i) {
                dv += (velocity[j] - vi) * poly6(pi - predicted_position[j], h);
            }
            *v = vi + dv * viscosity;
        });
    }
    particles.velocity = smoothed;
}

pub fn commit_positions(particles: &mut ParticleVec) {
    let ParticleVec {
        ref mut position,
        ref predicted_position,
        ref active,
        ref state,
        ..
    } = *particles;
    par_iter_mut1(position, |i, p| {
        if active[i] && state[i].is_fluid() {
            *p = predicted_position[i];
        }
    });
}
