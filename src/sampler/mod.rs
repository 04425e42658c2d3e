mod error;
mod replay;
mod sampler;
mod source;
mod types;

pub use error::{CaptureUnavailable, SamplerError};
pub use replay::ReplaySource;
pub use sampler::Sampler;
pub use source::{FixSource, PushError, PushSource};
pub use types::{AccuracyClass, Fix, SamplerEvent, SamplerState, SamplerStatus, SessionConfig};
