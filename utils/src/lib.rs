pub mod audio;
pub mod backend;

#[cfg(feature = "native")]
pub mod device;
#[cfg(feature = "native")]
pub mod native;

pub use backend::{AudioBackend, CaptureStream, ResourceError, SystemCheck};
