pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubDetector, StubRecognizer};

#[cfg(feature = "backend-tract")]
pub use tract::{TractDetector, TractRecognizer};
