//! Sandbox errors.

use pulse_host_http::HttpError;

/// Why a script execution did not produce an output.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
  /// The script asked for a retry via `throwTransientError`.
  #[error("remote error: {message}")]
  Remote { message: String },

  /// The script gave up via `throwFatalError`.
  #[error("fatal error: {message}")]
  Fatal { message: String },

  /// The script reported a timeout via `throwTimeoutError`.
  #[error("timeout: {message}")]
  Timeout { message: String },

  /// An HTTP call made through the bridge failed.
  #[error("http error: {0}")]
  Http(#[from] HttpError),

  /// Execution was cancelled from outside.
  #[error("execution interrupted")]
  Interrupted,

  /// The script does not define a callable `run`.
  #[error("no 'run' function defined in script")]
  MissingEntryPoint,

  /// The script failed to compile or threw.
  #[error("script error: {message}")]
  Script { message: String },

  /// The interpreter could not be prepared.
  #[error("sandbox setup failed: {message}")]
  Setup { message: String },

  /// The interpreter thread died.
  #[error("interpreter crashed: {message}")]
  Crashed { message: String },
}

impl SandboxError {
  /// Whether the failure is worth retrying on the next cycle.
  ///
  /// Remote and timeout errors, transient network failures (including unknown
  /// hosts) and any error mentioning a timeout qualify.
  pub fn is_transient(&self) -> bool {
    let by_kind = match self {
      SandboxError::Remote { .. } | SandboxError::Timeout { .. } => true,
      SandboxError::Http(e) => e.is_transient(),
      _ => false,
    };
    by_kind || self.to_string().to_ascii_lowercase().contains("timeout")
  }

  /// Whether the failure is the execution's own cancellation.
  pub fn is_interruption(&self) -> bool {
    matches!(self, SandboxError::Interrupted)
  }
}
