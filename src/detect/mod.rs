//! Inference adapter.
//!
//! Two narrow contracts wrap the vision models: `PlateDetector` finds plate
//! boxes in a frame and `TextRecognizer` reads text from a crop. Neither
//! retries nor caches.

mod backend;
mod backends;
mod result;

pub use backend::{PlateDetector, TextRecognizer};
pub use backends::{StubDetector, StubRecognizer};
#[cfg(feature = "backend-tract")]
pub use backends::{TractDetector, TractRecognizer};
pub use result::{DetectionBox, TextLine};
