//! Initial particle layout read from a YAML scene file.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    floating_type_mod::FT,
    signed_distance::{closest_point_on_segment, point_in_polygon},
    simulation_parameters::SimulationParams,
    sph_kernels::lattice_rest_density,
    vec2f,
    world::World,
    V2,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFluidBlock {
    pub pos: [FT; 2],
    pub size: [FT; 2],
    pub spacing: FT,
    #[serde(default)]
    pub velocity: [FT; 2],
    /// Maximum random offset per axis, `0` keeps the lattice.
    #[serde(default)]
    pub jitter: FT,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SoftBodyShape {
    Box { pos: [FT; 2], size: [FT; 2] },
    Polygon { vertices: Vec<[FT; 2]> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSoftBody {
    pub shape: SoftBodyShape,
    pub spacing: FT,
    /// Indices in authoring order: outline particles first, then the interior.
    #[serde(default)]
    pub pinned: Vec<usize>,
    #[serde(default)]
    pub velocity: [FT; 2],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub blocks: Vec<SceneFluidBlock>,
    #[serde(default)]
    pub soft_bodies: Vec<SceneSoftBody>,
}

impl SceneConfig {
    pub fn load(path: &Path) -> Result<SceneConfig> {
        let yaml = std::fs::read_to_string(path).with_context(|| format!("failed reading scene file {:?}", path))?;
        serde_yaml::from_str(&yaml).with_context(|| format!("failed parsing scene file {:?}", path))
    }
}

fn lattice(min: V2, max: V2, spacing: FT) -> Vec<V2> {
    let mut positions = Vec::new();
    let mut y = min.y + 0.5 * spacing;
    while y < max.y {
        let mut x = min.x + 0.5 * spacing;
        while x < max.x {
            positions.push(vec2f(x, y));
            x += spacing;
        }
        y += spacing;
    }
    positions
}

pub fn fluid_block_positions(block: &SceneFluidBlock) -> Vec<V2> {
    let min = vec2f(block.pos[0], block.pos[1]);
    let max = min + vec2f(block.size[0], block.size[1]);
    let mut positions = lattice(min, max, block.spacing);

    if block.jitter > 0. {
        let mut rng = StdRng::seed_from_u64(block.seed);
        for p in &mut positions {
            p.x += rng.gen_range(-block.jitter..=block.jitter);
            p.y += rng.gen_range(-block.jitter..=block.jitter);
        }
    }
    positions
}

/// Points every `spacing` along the closed polygon, starting at the first vertex of each edge.
fn resample_outline(vertices: &[V2], spacing: FT) -> Vec<V2> {
    let n = vertices.len();
    let mut outline = Vec::new();
    for e in 0..n {
        let a = vertices[e];
        let b = vertices[(e + 1) % n];
        let steps = ((b - a).norm() / spacing).round().max(1.) as usize;
        for s in 0..steps {
            outline.push(a + (b - a) * (s as FT / steps as FT));
        }
    }
    outline
}

/// Outline particles in contour order followed by the interior particles.
pub fn soft_body_positions(soft_body: &SceneSoftBody) -> (Vec<V2>, Vec<V2>) {
    let vertices: Vec<V2> = match &soft_body.shape {
        SoftBodyShape::Box { pos, size } => {
            let min = vec2f(pos[0], pos[1]);
            let max = min + vec2f(size[0], size[1]);
            vec![min, vec2f(max.x, min.y), max, vec2f(min.x, max.y)]
        }
        SoftBodyShape::Polygon { vertices } => vertices.iter().map(|v| vec2f(v[0], v[1])).collect(),
    };
    let outline = resample_outline(&vertices, soft_body.spacing);

    let min = vertices.iter().fold(vec2f(FT::MAX, FT::MAX), |m, v| m.inf(v));
    let max = vertices.iter().fold(vec2f(FT::MIN, FT::MIN), |m, v| m.sup(v));
    let n = vertices.len();
    let interior = lattice(min, max, soft_body.spacing)
        .into_iter()
        .filter(|&p| point_in_polygon(p, &vertices))
        .filter(|&p| {
            (0..n).all(|e| {
                let (c, _) = closest_point_on_segment(p, vertices[e], vertices[(e + 1) % n]);
                (p - c).norm() >= 0.5 * soft_body.spacing
            })
        })
        .collect();

    (outline, interior)
}

/// Fills in parameters that depend on the scene: a zero rest density is taken from the first fluid block.
pub fn init_simulation_params(simulation_params: &mut SimulationParams, scene_config: &SceneConfig) {
    if simulation_params.rest_density == 0. {
        if let Some(block) = scene_config.blocks.first() {
            simulation_params.rest_density = lattice_rest_density(block.spacing, simulation_params.smoothing_distance);
            info!(
                "rest density {} from spacing {}",
                simulation_params.rest_density, block.spacing
            );
        }
    }
}

pub fn init_world(simulation_params: SimulationParams, scene_config: &SceneConfig) -> Result<World> {
    let mut world = World::new(simulation_params)?;
    let container = *world.container();
    let radius = simulation_params.particle_radius;

    for (b, block) in scene_config.blocks.iter().enumerate() {
        ensure!(block.spacing > 0., "fluid block {} has a non-positive spacing", b);
        let positions: Vec<V2> = fluid_block_positions(block)
            .into_iter()
            .map(|p| container.clamp(p, radius))
            .collect();
        let id = world.add_fluid();
        world
            .add_fluid_particles(id, &positions, vec2f(block.velocity[0], block.velocity[1]))
            .with_context(|| format!("fluid block {}", b))?;
    }

    for (s, soft_body) in scene_config.soft_bodies.iter().enumerate() {
        ensure!(soft_body.spacing > 0., "soft body {} has a non-positive spacing", s);
        let (outline, interior) = soft_body_positions(soft_body);
        let id = world.add_soft_body();
        let mut particles = Vec::with_capacity(outline.len() + interior.len());
        for p in outline {
            particles.push(world.add_soft_body_particle(id, p, true).with_context(|| format!("soft body {}", s))?);
        }
        for p in interior {
            particles.push(world.add_soft_body_particle(id, p, false).with_context(|| format!("soft body {}", s))?);
        }
        world.finalize_soft_body(id)?;
        world.set_velocity(id, vec2f(soft_body.velocity[0], soft_body.velocity[1]))?;

        for &k in &soft_body.pinned {
            let particle = match particles.get(k) {
                Some(&p) => p,
                None => anyhow::bail!("soft body {} pins particle {} but has only {}", s, k, particles.len()),
            };
            world.pin_particle(particle, None)?;
        }
    }

    let telemetry = world.telemetry();
    info!(
        "initialized {} fluid particles and {} soft body particles",
        telemetry.fluid_particles, telemetry.soft_body_particles
    );
    Ok(world)
}
