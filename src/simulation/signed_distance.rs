//! Signed distance of particles to the outlines of soft bodies.

use crate::{
    concurrency::par_iter_mut1,
    floating_type_mod::FT,
    particle::{ParticleId, ParticleVec, SimulationId},
    V2,
};

/// Closed contour of one finalized soft body, given as particle handles in order.
#[derive(Debug, Clone, Copy)]
pub struct Outline<'a> {
    pub owner: SimulationId,
    pub vertices: &'a [ParticleId],
}

/// Nearest outline edge of another body seen from one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDistance {
    /// Negative inside the polygon.
    pub distance: FT,
    /// Direction in which the distance grows, unit length.
    pub gradient: V2,
    pub a: ParticleId,
    pub b: ParticleId,
    /// Parameter of the closest point on `a -> b`.
    pub t: FT,
}

/// Closest point on the segment `a -> b` and its parameter in `[0, 1]`.
pub fn closest_point_on_segment(p: V2, a: V2, b: V2) -> (V2, FT) {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= FT::EPSILON {
        return (a, 0.);
    }
    let t = ((p - a).dot(&ab) / len2).max(0.).min(1.);
    (a + ab * t, t)
}

/// Crossing number test, points exactly on an edge may land on either side.
pub fn point_in_polygon(p: V2, polygon: &[V2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (vi, vj) = (polygon[i], polygon[j]);
        if (vi.y > p.y) != (vj.y > p.y) && p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// An outline with the positions of its vertices looked up once for a whole pass.
#[derive(Debug, Clone)]
pub struct OutlineShape<'a> {
    pub outline: Outline<'a>,
    pub polygon: Vec<V2>,
}

impl<'a> Outline<'a> {
    pub fn resolve(&self, positions: &[V2]) -> OutlineShape<'a> {
        OutlineShape {
            outline: *self,
            polygon: self.vertices.iter().map(|&v| positions[v]).collect(),
        }
    }
}

fn distance_to_outline(p: V2, shape: &OutlineShape) -> Option<EdgeDistance> {
    let polygon = &shape.polygon;
    let n = polygon.len();
    if n < 3 {
        return None;
    }

    let mut best: Option<(FT, V2, usize, FT)> = None;
    for e in 0..n {
        let (closest, t) = closest_point_on_segment(p, polygon[e], polygon[(e + 1) % n]);
        let d = (p - closest).norm();
        if best.map_or(true, |(bd, ..)| d < bd) {
            best = Some((d, closest, e, t));
        }
    }
    let (d, closest, e, t) = best?;

    let inside = point_in_polygon(p, polygon);
    let gradient = if d > FT::EPSILON {
        if inside {
            (closest - p) / d
        } else {
            (p - closest) / d
        }
    } else {
        // on the edge: use the edge normal, polygons may be wound either way
        let edge = polygon[(e + 1) % n] - polygon[e];
        let normal = V2::new(edge.y, -edge.x).normalize();
        let centroid = polygon.iter().sum::<V2>() / n as FT;
        if normal.dot(&(p - centroid)) >= 0. {
            normal
        } else {
            -normal
        }
    };

    let vertices = shape.outline.vertices;
    Some(EdgeDistance {
        distance: if inside { -d } else { d },
        gradient,
        a: vertices[e],
        b: vertices[(e + 1) % n],
        t,
    })
}

/// Signed distance of `p` to the nearest outline edge not owned by `owner`.
pub fn nearest_outline(p: V2, owner: SimulationId, shapes: &[OutlineShape]) -> Option<EdgeDistance> {
    shapes
        .iter()
        .filter(|s| s.outline.owner != owner)
        .filter_map(|s| distance_to_outline(p, s))
        .min_by(|x, y| x.distance.partial_cmp(&y.distance).unwrap_or(std::cmp::Ordering::Equal))
}

/**
 * Computes for every active particle the nearest outline edge of another body at the predicted positions.
 * Deformable particles also keep the result in their payload.
 */
pub fn update_signed_distances(particles: &mut ParticleVec, outlines: &[Outline]) -> Vec<Option<EdgeDistance>> {
    let shapes: Vec<OutlineShape> = outlines
        .iter()
        .map(|o| o.resolve(&particles.predicted_position))
        .collect();

    let mut result = vec![None; particles.len()];
    {
        let ParticleVec {
            ref predicted_position,
            ref owner,
            ref active,
            ..
        } = *particles;
        par_iter_mut1(&mut result, |i, r| {
            if active[i] {
                *r = nearest_outline(predicted_position[i], owner[i], &shapes);
            }
        });
    }

    for (i, r) in result.iter().enumerate() {
        if let Some(d) = particles.state[i].deformable_mut() {
            match r {
                Some(r) => {
                    d.signed_distance = r.distance;
                    d.signed_distance_gradient = r.gradient;
                }
                None => {
                    d.signed_distance = FT::MAX;
                    d.signed_distance_gradient = V2::zeros();
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{particle::ParticleRegistry, vec2f};

    fn square() -> Vec<V2> {
        vec![vec2f(0., 0.), vec2f(4., 0.), vec2f(4., 4.), vec2f(0., 4.)]
    }

    #[test]
    fn segment_projection_is_clamped() {
        let (c, t) = closest_point_on_segment(vec2f(-3., 1.), vec2f(0., 0.), vec2f(2., 0.));
        assert_eq!(c, vec2f(0., 0.));
        assert_eq!(t, 0.);
        let (c, t) = closest_point_on_segment(vec2f(1.5, 7.), vec2f(0., 0.), vec2f(2., 0.));
        assert_eq!(c, vec2f(1.5, 0.));
        crate::assert_ft_approx_eq(t, 0.75, 1e-6, || "t".into());
    }

    #[test]
    fn crossing_number() {
        let poly = square();
        assert!(point_in_polygon(vec2f(1., 1.), &poly));
        assert!(!point_in_polygon(vec2f(5., 1.), &poly));
        assert!(!point_in_polygon(vec2f(-1., 2.), &poly));
    }

    #[test]
    fn sign_and_gradient() {
        let positions = square();
        let vertices = [0, 1, 2, 3];
        let shapes = [Outline {
            owner: SimulationId(1),
            vertices: &vertices,
        }
        .resolve(&positions)];

        let inside = nearest_outline(vec2f(3.5, 2.), SimulationId(0), &shapes).unwrap();
        crate::assert_ft_approx_eq(inside.distance, -0.5, 1e-5, || "inside".into());
        crate::assert_ft_approx_eq(inside.gradient.x, 1., 1e-5, || "gradient".into());
        assert_eq!((inside.a, inside.b), (1, 2));

        let outside = nearest_outline(vec2f(2., -1.), SimulationId(0), &shapes).unwrap();
        crate::assert_ft_approx_eq(outside.distance, 1., 1e-5, || "outside".into());
        crate::assert_ft_approx_eq(outside.gradient.y, -1., 1e-5, || "gradient".into());

        // own outline is never considered
        assert!(nearest_outline(vec2f(2., 2.), SimulationId(1), &shapes).is_none());
    }

    #[test]
    fn short_outlines_are_ignored() {
        let positions = vec![vec2f(0., 0.), vec2f(1., 0.)];
        let vertices = [0, 1];
        let shapes = [Outline {
            owner: SimulationId(1),
            vertices: &vertices,
        }
        .resolve(&positions)];
        assert!(nearest_outline(vec2f(0.5, 0.), SimulationId(0), &shapes).is_none());
    }

    #[test]
    fn distances_are_stored_for_every_particle() {
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        let body = SimulationId(1);
        let vertices: Vec<ParticleId> = square()
            .into_iter()
            .map(|p| particles.spawn_deformable(&registry, body, p, 0.1, 1.))
            .collect();
        let fluid = particles.spawn_fluid(&registry, SimulationId(0), vec2f(2., -1.), V2::zeros(), 0.1, 1.);
        let other = particles.spawn_deformable(&registry, SimulationId(2), vec2f(3.5, 2.), 0.1, 1.);
        for i in 0..particles.len() {
            particles.active[i] = true;
        }

        let outlines = [Outline {
            owner: body,
            vertices: &vertices,
        }];
        let result = update_signed_distances(&mut particles, &outlines);

        crate::assert_ft_approx_eq(result[fluid].unwrap().distance, 1., 1e-5, || "fluid".into());
        let d = particles.state[other].deformable().unwrap();
        crate::assert_ft_approx_eq(d.signed_distance, -0.5, 1e-5, || "deformable".into());
        crate::assert_ft_approx_eq(d.signed_distance_gradient.x, 1., 1e-5, || "gradient".into());

        // the body itself has no other outline to measure against
        assert!(result[vertices[0]].is_none());
        assert_eq!(particles.state[vertices[0]].deformable().unwrap().signed_distance, FT::MAX);
    }
}
