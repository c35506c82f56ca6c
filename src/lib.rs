/*!
Two-dimensional position based fluids (PBF) coupled with shape matching soft bodies inside a
rectangular container.

The entry point is [`World`]: it owns every particle, the spatial hash and the solver state of all
fluid and soft-body instances. A tick is advanced with [`World::step`].
*/

mod simulation;

pub use simulation::*;
