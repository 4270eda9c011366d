pub mod transcript;
pub mod types;

pub use transcript::TranscriptRecorder;
pub use types::Direction;
