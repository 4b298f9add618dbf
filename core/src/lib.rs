pub mod descriptor;
pub mod grid;
pub mod image;
pub mod keypoint;
pub mod runtime;

pub use descriptor::*;
pub use grid::*;
pub use image::*;
pub use keypoint::*;
pub use runtime::init_global_thread_pool;
