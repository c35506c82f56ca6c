use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::zero;

use crate::{floating_type_mod::FT, V2};

/// Index into the particle arena. Only valid until the next [`crate::World::reset_simulation`].
pub type ParticleId = usize;

/// Process-wide unique particle identity. Never reused, not even after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalIndex(pub u64);

/// Identity of the fluid or soft-body instance a particle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimulationId(pub u32);

/// Hands out global particle indices. Owned by the world and passed into the particle factories.
#[derive(Debug, Default)]
pub struct ParticleRegistry {
    next_index: AtomicU64,
}

impl ParticleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&self) -> GlobalIndex {
        GlobalIndex(self.next_index.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of indices handed out so far.
    pub fn issued(&self) -> u64 {
        self.next_index.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleKind {
    Fluid,
    Deformable,
}

/// Recomputed every solver iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FluidState {
    pub density: FT,
    pub density_constraint: FT,
    pub lambda: FT,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeformableState {
    pub original_position: V2,
    pub goal_position: V2,
    pub pinned: bool,
    /// Distance to the nearest outline edge of another soft body, negative inside.
    pub signed_distance: FT,
    pub signed_distance_gradient: V2,
}

impl DeformableState {
    pub fn new(position: V2) -> Self {
        DeformableState {
            original_position: position,
            goal_position: position,
            pinned: false,
            signed_distance: FT::MAX,
            signed_distance_gradient: V2::zeros(),
        }
    }
}

/// Kind tag and kind specific payload of a particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParticleState {
    Fluid(FluidState),
    Deformable(DeformableState),
}

impl ParticleState {
    pub fn kind(&self) -> ParticleKind {
        match self {
            ParticleState::Fluid(_) => ParticleKind::Fluid,
            ParticleState::Deformable(_) => ParticleKind::Deformable,
        }
    }

    pub fn is_fluid(&self) -> bool {
        matches!(self, ParticleState::Fluid(_))
    }

    pub fn is_deformable(&self) -> bool {
        matches!(self, ParticleState::Deformable(_))
    }

    pub fn fluid(&self) -> Option<&FluidState> {
        match self {
            ParticleState::Fluid(f) => Some(f),
            _ => None,
        }
    }

    pub fn fluid_mut(&mut self) -> Option<&mut FluidState> {
        match self {
            ParticleState::Fluid(f) => Some(f),
            _ => None,
        }
    }

    pub fn deformable(&self) -> Option<&DeformableState> {
        match self {
            ParticleState::Deformable(d) => Some(d),
            _ => None,
        }
    }

    pub fn deformable_mut(&mut self) -> Option<&mut DeformableState> {
        match self {
            ParticleState::Deformable(d) => Some(d),
            _ => None,
        }
    }

    /// Lambda of a fluid particle, zero for everything else.
    pub fn lambda(&self) -> FT {
        self.fluid().map_or(0., |f| f.lambda)
    }

    pub fn is_pinned(&self) -> bool {
        self.deformable().map_or(false, |d| d.pinned)
    }
}

/// Per-particle classification read by renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleClass {
    Default,
    Colliding,
    Pinned,
}

macro_rules! decl_particle_vec {
    (pub struct $struct_name:ident { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        #[derive(Debug, Clone)]
        pub struct $struct_name {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl $struct_name {
            pub fn extend(&mut self, num_elements: usize) {
                $(
                    self.$field_name.extend((0..num_elements).map::<$field_type, _>(|_| $default_value));
                )*
            }

            /// Keeps the particles whose entry in `keep` is true, preserving their order.
            pub fn retain_mask(&mut self, keep: &[bool]) {
                $(
                    {
                        let mut idx = 0;
                        self.$field_name.retain(|_| {
                            let k = keep[idx];
                            idx += 1;
                            k
                        });
                    }
                )*
            }

            pub fn default(len: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..len).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }
        }
    }
}

decl_particle_vec! {
    pub struct ParticleVec {
        pub global_index: Vec<GlobalIndex> | GlobalIndex(0),
        pub owner: Vec<SimulationId> | SimulationId(0),
        pub radius: Vec<FT> | 0.,
        pub mass: Vec<FT> | 0.,
        pub inverse_mass: Vec<FT> | 0.,
        pub position: Vec<V2> | zero(),
        pub predicted_position: Vec<V2> | zero(),
        pub position_correction: Vec<V2> | zero(),
        pub velocity: Vec<V2> | zero(),
        pub state: Vec<ParticleState> | ParticleState::Fluid(FluidState::default()),

        // particles of an unfinished soft body do not take part in ticks
        pub active: Vec<bool> | false,
        pub class: Vec<ParticleClass> | ParticleClass::Default,
    }
}

impl ParticleVec {
    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    pub fn kind(&self, i: ParticleId) -> ParticleKind {
        self.state[i].kind()
    }

    fn spawn(
        &mut self,
        registry: &ParticleRegistry,
        owner: SimulationId,
        position: V2,
        velocity: V2,
        radius: FT,
        mass: FT,
        state: ParticleState,
        active: bool,
    ) -> ParticleId {
        let id = self.len();
        self.extend(1);
        self.global_index[id] = registry.next_index();
        self.owner[id] = owner;
        self.radius[id] = radius;
        self.mass[id] = mass;
        self.inverse_mass[id] = 1. / mass;
        self.position[id] = position;
        self.predicted_position[id] = position;
        self.velocity[id] = velocity;
        self.state[id] = state;
        self.active[id] = active;
        id
    }

    pub fn spawn_fluid(
        &mut self,
        registry: &ParticleRegistry,
        owner: SimulationId,
        position: V2,
        velocity: V2,
        radius: FT,
        mass: FT,
    ) -> ParticleId {
        self.spawn(
            registry,
            owner,
            position,
            velocity,
            radius,
            mass,
            ParticleState::Fluid(FluidState::default()),
            true,
        )
    }

    /// Deformable particles stay inactive until their soft body is finalized.
    pub fn spawn_deformable(
        &mut self,
        registry: &ParticleRegistry,
        owner: SimulationId,
        position: V2,
        radius: FT,
        mass: FT,
    ) -> ParticleId {
        self.spawn(
            registry,
            owner,
            position,
            V2::zeros(),
            radius,
            mass,
            ParticleState::Deformable(DeformableState::new(position)),
            false,
        )
    }

    pub fn is_pinned(&self, i: ParticleId) -> bool {
        self.inverse_mass[i] == 0.
    }

    pub fn total_mass(&self) -> FT {
        self.mass.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec2f;

    #[test]
    fn registry_indices_are_unique_and_monotonic() {
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        let a = particles.spawn_fluid(&registry, SimulationId(0), vec2f(0., 0.), V2::zeros(), 1., 2.);
        let b = particles.spawn_deformable(&registry, SimulationId(1), vec2f(1., 0.), 1., 1.);
        assert!(particles.global_index[a] < particles.global_index[b]);
        assert_eq!(registry.issued(), 2);
        assert_eq!(particles.inverse_mass[a], 0.5);
        assert!(particles.active[a]);
        assert!(!particles.active[b]);
        assert_eq!(particles.kind(b), ParticleKind::Deformable);
    }

    #[test]
    fn independent_registries_do_not_share_counters() {
        let r1 = ParticleRegistry::new();
        let r2 = ParticleRegistry::new();
        r1.next_index();
        r1.next_index();
        assert_eq!(r2.next_index(), GlobalIndex(0));
    }

    #[test]
    fn retain_mask_keeps_fields_aligned() {
        let registry = ParticleRegistry::new();
        let mut particles = ParticleVec::default(0);
        for i in 0..4 {
            particles.spawn_fluid(&registry, SimulationId(i % 2), vec2f(i as FT, 0.), V2::zeros(), 1., 1.);
        }
        particles.retain_mask(&[true, false, true, false]);
        assert_eq!(particles.len(), 2);
        assert_eq!(particles.position[1], vec2f(2., 0.));
        assert_eq!(particles.global_index[1], GlobalIndex(2));
        assert!(particles.owner.iter().all(|&o| o == SimulationId(0)));
    }
}
