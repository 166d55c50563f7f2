//! Frame input: depth images, dataset loading, configuration.

pub mod config;
pub mod depth;
pub mod tum;

pub use config::MappingConfig;
pub use depth::DepthImage;
pub use tum::TumDataset;
