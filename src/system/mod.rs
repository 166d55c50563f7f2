//! Mapping system: thread orchestration and shared state.

pub mod mapping_system;
pub mod messages;
pub mod shared_state;

pub use mapping_system::MappingSystem;
pub use messages::DepthFrameMsg;
pub use shared_state::SharedState;
