// Rosie embedding boundary
// Thread-safe engines wrapping a single-threaded pattern-matching runtime

#[cfg(test)]
mod test;

pub mod buffer;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod governor;
pub mod handle_table;
pub mod home;
pub mod options;
pub(crate) mod runtime;

mod dispatch;
mod engine;
mod matchfile;
mod slots;

pub use buffer::OwnedBuffer;
pub use diagnostics::{ConfigEntry, Diagnostic, Severity};
pub use encoder::{Encoder, NativeEncoder};
pub use engine::{Compiled, Engine, LoadOutcome, Match, MatchStatus, Trace};
pub use error::{Result, RosieError};
pub use governor::{AllocUsage, MIN_ALLOC_LIMIT_MB};
pub use handle_table::PatternHandle;
pub use matchfile::{FileMatch, FileMatchRequest};
pub use options::EngineOptions;
