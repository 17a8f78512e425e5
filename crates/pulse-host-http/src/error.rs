use thiserror::Error;

/// Errors returned by the HTTP capability.
#[derive(Debug, Error)]
pub enum HttpError {
  /// URL could not be parsed or uses a forbidden scheme.
  #[error("invalid url '{url}': {message}")]
  InvalidUrl { url: String, message: String },

  /// The remote server failed (5xx). Worth retrying later.
  #[error("remote server error {status}: {body}")]
  Remote { status: u16, body: String },

  /// The request was rejected (non-2xx, non-5xx).
  #[error("request failed with status {status}: {body}")]
  Request { status: u16, body: String },

  /// The request did not complete in time.
  #[error("request timeout: {message}")]
  Timeout { message: String },

  /// Host name could not be resolved.
  #[error("unknown host: {message}")]
  UnknownHost { message: String },

  /// Connection-level failure (refused, reset, TLS, ...).
  #[error("connection failed: {message}")]
  Connection { message: String },
}

impl HttpError {
  /// Whether the failure is expected to go away on its own.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      HttpError::Remote { .. }
        | HttpError::Timeout { .. }
        | HttpError::UnknownHost { .. }
        | HttpError::Connection { .. }
    )
  }
}

impl From<reqwest::Error> for HttpError {
  fn from(error: reqwest::Error) -> Self {
    let message = error_chain(&error);
    if error.is_timeout() {
      HttpError::Timeout { message }
    } else if error.is_connect() && is_resolution_failure(&message) {
      HttpError::UnknownHost { message }
    } else {
      HttpError::Connection { message }
    }
  }
}

/// Render an error with all of its sources, outermost first.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
  let mut message = error.to_string();
  let mut source = error.source();
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}

fn is_resolution_failure(message: &str) -> bool {
  let message = message.to_ascii_lowercase();
  message.contains("dns error")
    || message.contains("failed to lookup address")
    || message.contains("name or service not known")
    || message.contains("no such host")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(
      HttpError::Remote {
        status: 503,
        body: String::new()
      }
      .is_transient()
    );
    assert!(
      !HttpError::Request {
        status: 404,
        body: "missing".to_string()
      }
      .is_transient()
    );
    assert!(
      !HttpError::InvalidUrl {
        url: "ftp://x".to_string(),
        message: "scheme".to_string()
      }
      .is_transient()
    );
  }

  #[test]
  fn test_resolution_failure_detection() {
    assert!(is_resolution_failure(
      "error sending request: client error (Connect): dns error: failed to lookup address information"
    ));
    assert!(!is_resolution_failure("connection refused"));
  }
}
