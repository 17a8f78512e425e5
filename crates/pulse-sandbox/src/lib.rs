//! Sandboxed script runtime for pulse.
//!
//! Widget scripts are JavaScript programs defining a zero-argument `run`
//! function that returns a JSON string. Each execution gets a fresh
//! interpreter with:
//!
//! - every resolved widget property bound as an upper-cased global
//! - `PULSE_PREVIOUS` (previous result or `null`) and `PULSE_INSTANCE_ID`
//! - the bridging facility: `get`, `head`, `post`, `toBase64`,
//!   `checkInterrupted`, `throwTransientError`, `throwFatalError`,
//!   `throwTimeoutError`
//! - a `console` object (and `print`) writing into a captured buffer
//!
//! Nothing else from the host is reachable. Scripts stay interruptible
//! because every loop body starts with a `checkInterrupted()` call and every
//! bridged call observes the cancellation token.
//!
//! # Usage
//!
//! ```ignore
//! let sandbox = Sandbox::new(HttpClient::new(&HttpConfig::default())?);
//! let run = sandbox.run(input, cancel).await;
//! match run.outcome {
//!     Ok(output) => println!("{}", output),
//!     Err(e) => eprintln!("{} (console: {})", e, run.console),
//! }
//! ```

mod bridge;
mod console;
mod error;
mod sandbox;
mod source;

pub use error::SandboxError;
pub use sandbox::{INSTANCE_ID_VARIABLE, PREVIOUS_DATA_VARIABLE, Sandbox, ScriptInput, ScriptRun};
pub use source::{inject_interrupt_checks, prepare_source, resolve_bridge_calls};
