//! Core building blocks shared by the lesionmaps workspace: the structured
//! error type, the run configuration, and identifier allocation.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{
    CategoricalStratumSpec, DenseStratumSpec, FeatureSelection, MapsConfig, StrataConfig, Task,
};
pub use errors::{ErrorInfo, MapsError};
pub use ids::IdAllocator;
