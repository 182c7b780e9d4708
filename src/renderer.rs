pub mod backends;
pub mod validation_layer;
pub mod queue_family_indices;
pub mod commands;
pub mod acceleration_structures;
pub mod mesh_buffer;
