mod backend;
mod backends;
pub mod labels;
mod pool;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use pool::DetectorPool;
pub use result::{BoundingBox, Detection};
