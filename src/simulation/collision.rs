//! Contacts between particles of different simulation instances.
//!
//! Corrections are accumulated in `position_correction` and applied once per solver iteration, so
//! a particle touching several partners moves by the sum of all pair corrections.

use crate::{
    concurrency::par_iter_mut2,
    floating_type_mod::FT,
    neighborhood_search::NeighborhoodCache,
    particle::{ParticleClass, ParticleVec},
    signed_distance::EdgeDistance,
    V2,
};

/// `1 - (1 - k)^(1/n)`: applying this `n` times closes the same fraction `k` of a constraint as applying `k` once.
pub fn adjusted_stiffness(stiffness: FT, iterations: usize) -> FT {
    let n = iterations.max(1) as FT;
    1. - (1. - stiffness).powf(1. / n)
}

/**
 * Displacements resolving the overlap of two circles, `None` if they do not overlap.
 *
 * The displacement is split by inverse mass, so a pinned particle (`inverse_mass == 0`) never moves.
 * Coincident centers have no defined normal and are skipped.
 */
pub fn resolve_pair(
    pi: V2,
    pj: V2,
    ri: FT,
    rj: FT,
    inverse_mass_i: FT,
    inverse_mass_j: FT,
    stiffness: FT,
) -> Option<(V2, V2)> {
    let w = inverse_mass_i + inverse_mass_j;
    if w <= 0. {
        return None;
    }

    let d = pj - pi;
    let dist = d.norm();
    let overlap = ri + rj - dist;
    if overlap <= 0. || dist <= FT::EPSILON {
        return None;
    }

    let n = d / dist;
    let correction = n * (overlap * stiffness);
    Some((
        -correction * (inverse_mass_i / w),
        correction * (inverse_mass_j / w),
    ))
}

/// Only pairs of different instances collide; fluid against fluid is left to the density constraint.
fn is_contact_pair(particles: &ParticleVec, i: usize, j: usize) -> bool {
    particles.owner[i] != particles.owner[j]
        && (particles.state[i].is_deformable() || particles.state[j].is_deformable())
}

/**
 * Circle contacts for all candidate pairs of the neighborhood cache at the current predicted positions.
 * Each particle gathers its share of every pair it is part of, so each pair is resolved once for both sides.
 * Returns the number of touching pairs.
 */
pub fn accumulate_circle_contacts(particles: &mut ParticleVec, neighs: &NeighborhoodCache, stiffness: FT) -> usize {
    let mut contacts = vec![0usize; particles.len()];
    let snapshot = &*particles;
    let mut corrections = vec![V2::zeros(); snapshot.len()];
    par_iter_mut2(&mut corrections, &mut contacts, |i, correction, count| {
        if !snapshot.active[i] {
            return;
        }
        let pi = snapshot.predicted_position[i];
        for j in neighs.fluid(i).chain(neighs.deformable(i)) {
            if !is_contact_pair(snapshot, i, j) {
                continue;
            }
            if let Some((dpi, _)) = resolve_pair(
                pi,
                snapshot.predicted_position[j],
                snapshot.radius[i],
                snapshot.radius[j],
                snapshot.inverse_mass[i],
                snapshot.inverse_mass[j],
                stiffness,
            ) {
                *correction += dpi;
                *count += 1;
            }
        }
    });

    add_corrections(particles, &corrections, &contacts);
    contacts.iter().sum::<usize>() / 2
}

/**
 * Pushes every particle whose signed distance to another body's outline is below its radius back
 * out along the gradient. The edge endpoints take the opposite displacement, split by the closest point parameter.
 * Returns the number of penetrating particles.
 */
pub fn accumulate_signed_distance_contacts(
    particles: &mut ParticleVec,
    distances: &[Option<EdgeDistance>],
    stiffness: FT,
) -> usize {
    let n = particles.len();
    let mut corrections = vec![V2::zeros(); n];
    let mut touching = vec![0usize; n];
    let mut count = 0;

    for (i, edge) in distances.iter().enumerate() {
        let edge = match edge {
            Some(e) if particles.active[i] => e,
            _ => continue,
        };
        let penetration = particles.radius[i] - edge.distance;
        if penetration <= 0. {
            continue;
        }

        let inv_i = particles.inverse_mass[i];
        let inv_a = particles.inverse_mass[edge.a] * (1. - edge.t);
        let inv_b = particles.inverse_mass[edge.b] * edge.t;
        let w = inv_i + inv_a + inv_b;
        if w <= 0. {
            continue;
        }

        let correction = edge.gradient * (penetration * stiffness / w);
        corrections[i] += correction * inv_i;
        corrections[edge.a] -= correction * inv_a;
        corrections[edge.b] -= correction * inv_b;
        touching[i] += 1;
        touching[edge.a] += 1;
        touching[edge.b] += 1;
        count += 1;
    }

    add_corrections(particles, &corrections, &touching);
    count
}

fn add_corrections(particles: &mut ParticleVec, corrections: &[V2], touching: &[usize]) {
    let ParticleVec {
        ref mut position_correction,
        ref mut class,
        ref inverse_mass,
        ..
    } = *particles;
    par_iter_mut2(position_correction, class, |i, correction, class| {
        if inverse_mass[i] == 0. {
            return;
        }
        *correction += corrections[i];
        if touching[i] > 0 {
            *class = ParticleClass::Colliding;
        }
    });
}

/// Moves every active, movable particle by its accumulated correction and resets the accumulator.
pub fn apply_position_corrections(particles: &mut ParticleVec) {
    let ParticleVec {
        ref mut predicted_position,
        ref mut position_correction,
        ref inverse_mass,
        ref active,
        ..
    } = *particles;
    par_iter_mut2(predicted_position, position_correction, |i, predicted, correction| {
        if active[i] && inverse_mass[i] > 0. {
            *predicted += *correction;
        }
        *correction = V2::zeros();
    });
}

/// Renderer classification at the start of a tick, contacts upgrade it to `Colliding`.
pub fn reset_classification(particles: &mut ParticleVec) {
    let ParticleVec {
        ref mut class,
        ref inverse_mass,
        ..
    } = *particles;
    for (c, &inv) in class.iter_mut().zip(inverse_mass.iter()) {
        *c = if inv == 0. {
            ParticleClass::Pinned
        } else {
            ParticleClass::Default
        };
    }
}
