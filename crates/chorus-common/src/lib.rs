pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::{LogFormat, RedactingWriter, init_tracing, redact_secrets};
pub use types::SessionId;
