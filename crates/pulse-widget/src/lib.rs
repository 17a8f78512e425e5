//! Pulse Widget
//!
//! Data model shared by every part of the widget execution engine:
//!
//! - [`WidgetExecutionRequest`] - immutable input of one scheduling call
//! - [`WidgetParameterDescriptor`] - metadata describing a widget property
//! - [`ExecutionResult`] - outcome of one script execution
//! - [`WidgetState`] - lifecycle state of a widget instance
//!
//! It also owns the textual helpers that operate on widget properties
//! (parsing the raw `key=value` encoding and redacting secret values from logs).

mod error;
mod parameter;
mod properties;
mod request;
mod result;
mod state;

pub use error::WidgetError;
pub use parameter::{ParameterType, WidgetParameterDescriptor};
pub use properties::{PropertyMap, REDACTED, encode_properties, parse_properties, redact};
pub use request::WidgetExecutionRequest;
pub use result::{ErrorKind, ExecutionResult};
pub use state::WidgetState;
