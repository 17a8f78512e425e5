//! Script execution.

use std::sync::Arc;

use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsString, JsValue, Source};
use pulse_host_http::HttpClient;
use pulse_widget::PropertyMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::{self, Bridge, BridgeState};
use crate::console::{self, ConsoleBuffer};
use crate::error::SandboxError;
use crate::source::prepare_source;

/// Global holding the previous execution's result (or `null`).
pub const PREVIOUS_DATA_VARIABLE: &str = "PULSE_PREVIOUS";

/// Global holding the widget instance id.
pub const INSTANCE_ID_VARIABLE: &str = "PULSE_INSTANCE_ID";

/// Name of the function every script must define.
const ENTRY_POINT: &str = "run";

/// Everything a script execution needs.
#[derive(Debug, Clone)]
pub struct ScriptInput {
  pub script: String,
  /// Resolved (already decrypted) properties.
  pub properties: PropertyMap,
  pub previous_data: Option<String>,
  pub instance_id: i64,
}

/// Outcome of one script execution.
#[derive(Debug)]
pub struct ScriptRun {
  /// Everything the script wrote to the console, failures included.
  pub console: String,
  /// The raw string returned by `run`, or why there is none.
  pub outcome: Result<String, SandboxError>,
}

/// Runs widget scripts in isolated interpreters.
///
/// The sandbox itself is shared; every call to [`Sandbox::run`] builds a fresh
/// interpreter on the blocking thread pool, so no state leaks between scripts.
#[derive(Debug, Clone)]
pub struct Sandbox {
  http: HttpClient,
}

impl Sandbox {
  /// Create a sandbox whose scripts use `http` for bridged requests.
  pub fn new(http: HttpClient) -> Self {
    Self { http }
  }

  /// Execute a script until it returns, fails, or `cancel` fires.
  ///
  /// Must be called from within a tokio runtime.
  pub async fn run(&self, input: ScriptInput, cancel: CancellationToken) -> ScriptRun {
    let runtime = Handle::current();
    let http = self.http.clone();

    let handle =
      tokio::task::spawn_blocking(move || execute(&input, http, runtime, cancel));

    match handle.await {
      Ok(run) => run,
      Err(e) => {
        warn!(error = %e, "interpreter thread failed");
        ScriptRun {
          console: String::new(),
          outcome: Err(SandboxError::Crashed {
            message: e.to_string(),
          }),
        }
      }
    }
  }
}

fn execute(
  input: &ScriptInput,
  http: HttpClient,
  runtime: Handle,
  cancel: CancellationToken,
) -> ScriptRun {
  let console = ConsoleBuffer::default();
  let state = Arc::new(BridgeState::new(http, runtime, cancel));

  let outcome = execute_script(input, &console, &state);
  if let Err(e) = &outcome {
    debug!(instance_id = input.instance_id, error = %e, "script execution failed");
  }

  ScriptRun {
    console: console.contents(),
    outcome,
  }
}

fn execute_script(
  input: &ScriptInput,
  console: &ConsoleBuffer,
  state: &Arc<BridgeState>,
) -> Result<String, SandboxError> {
  if state.is_cancelled() {
    return Err(SandboxError::Interrupted);
  }

  let mut context = Context::default();
  install_globals(&mut context, input, console, state).map_err(|e| SandboxError::Setup {
    message: e.to_string(),
  })?;

  let source = prepare_source(&input.script);
  context
    .eval(Source::from_bytes(source.as_str()))
    .map_err(|e| state.resolve(e))?;

  let entry_point = context
    .global_object()
    .get(JsString::from(ENTRY_POINT), &mut context)
    .map_err(|e| state.resolve(e))?;
  let Some(run) = entry_point.as_callable().cloned() else {
    return Err(SandboxError::MissingEntryPoint);
  };

  let value = run
    .call(&JsValue::undefined(), &[], &mut context)
    .map_err(|e| state.resolve(e))?;

  let output = value
    .to_string(&mut context)
    .map_err(|e| state.resolve(e))?;
  Ok(output.to_std_string_escaped())
}

fn install_globals(
  context: &mut Context,
  input: &ScriptInput,
  console: &ConsoleBuffer,
  state: &Arc<BridgeState>,
) -> JsResult<()> {
  let attributes = Attribute::WRITABLE | Attribute::ENUMERABLE | Attribute::CONFIGURABLE;

  for (name, value) in &input.properties {
    let value = match value {
      Some(value) => JsValue::from(JsString::from(value.as_str())),
      None => JsValue::null(),
    };
    context.register_global_property(
      JsString::from(name.to_uppercase().as_str()),
      value,
      attributes,
    )?;
  }

  let previous = match &input.previous_data {
    Some(data) => JsValue::from(JsString::from(data.as_str())),
    None => JsValue::null(),
  };
  context.register_global_property(JsString::from(PREVIOUS_DATA_VARIABLE), previous, attributes)?;
  context.register_global_property(
    JsString::from(INSTANCE_ID_VARIABLE),
    JsValue::from(input.instance_id),
    attributes,
  )?;

  console::install(context, console)?;
  bridge::install(context, &Bridge::new(state.clone()))?;
  Ok(())
}
