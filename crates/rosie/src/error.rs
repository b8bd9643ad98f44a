// Boundary errors
// Only faults surface as errors. Compile failures, no-match, stale handles and
// unsuccessful loads are reported in-band by the operation that produced them.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosieError {
    /// The asset root could not be resolved (missing directory, bad `ROSIE_HOME`).
    #[error("cannot locate rosie home: {0}")]
    Home(String),

    /// The bootstrap script failed, or did not leave a usable runtime module behind.
    #[error("failed to boot the runtime: {0}")]
    Boot(String),

    /// The runtime module lacks an entry the slot registry needs.
    #[error("runtime module does not provide `{0}`")]
    MissingSlot(&'static str),

    /// A runtime-module entry point raised an error.
    #[error("{call} raised an error: {message}")]
    Runtime { call: &'static str, message: String },

    /// A runtime-module entry point returned values of the wrong number or type.
    #[error("{call} violated its return contract: {detail}")]
    Contract { call: &'static str, detail: String },

    #[error("allocation limit of {requested} MB is below the minimum of {minimum} MB")]
    AllocLimitTooSmall { requested: u32, minimum: u32 },

    #[error("out of memory")]
    OutOfMemory,

    /// Every pattern handle is in use.
    #[error("pattern handle table is full")]
    HandlesExhausted,

    /// A buffer too long for the 32-bit length carried across the C boundary.
    #[error("{what} of {len} bytes exceeds the 32-bit length limit")]
    TooLarge { what: &'static str, len: usize },

    /// Any other VM failure, e.g. while creating values to pass across.
    #[error("lua error: {0}")]
    Lua(String),
}

impl RosieError {
    pub(crate) fn contract(call: &'static str, detail: impl Into<String>) -> Self {
        RosieError::Contract {
            call,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RosieError>;
