//! Volume handling for the lesionmaps pipeline: NIfTI-backed scalar volumes
//! on a fixed grid, connected-component labeling, and component geometry.

pub mod components;
pub mod io;
pub mod volume;

pub use components::{ellipsoid_axes, label_components, main_component, Component};
pub use io::save_volume;
pub use volume::Volume;
