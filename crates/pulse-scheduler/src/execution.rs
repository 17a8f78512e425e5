//! The script execution task.

use std::sync::Arc;

use chrono::Utc;
use pulse_host_secret::SecretDecryptor;
use pulse_sandbox::{Sandbox, ScriptInput, ScriptRun};
use pulse_widget::{
  ErrorKind, ExecutionResult, PropertyMap, WidgetExecutionRequest, WidgetParameterDescriptor,
  parse_properties, redact,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One run of a widget instance's script.
///
/// Never fails: every path ends in an [`ExecutionResult`], an intentionally
/// empty one when the run was cancelled.
pub struct ScriptExecutionTask {
  run_id: String,
  request: WidgetExecutionRequest,
  descriptors: Vec<WidgetParameterDescriptor>,
  decryptor: Arc<dyn SecretDecryptor>,
  sandbox: Arc<Sandbox>,
}

/// Properties ready to be handed to the script.
struct ResolvedProperties {
  values: PropertyMap,
  /// Decrypted secret values, to be masked in every log.
  secrets: Vec<String>,
}

impl ScriptExecutionTask {
  pub fn new(
    request: WidgetExecutionRequest,
    descriptors: Vec<WidgetParameterDescriptor>,
    decryptor: Arc<dyn SecretDecryptor>,
    sandbox: Arc<Sandbox>,
  ) -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      request,
      descriptors,
      decryptor,
      sandbox,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Run the script until it returns, fails or `cancel` fires.
  #[instrument(
    name = "script_execute",
    skip(self, cancel),
    fields(
      widget_instance_id = self.request.widget_instance_id,
      project_id = self.request.project_id,
      run_id = %self.run_id,
    )
  )]
  pub async fn run(self, cancel: CancellationToken) -> ExecutionResult {
    let mut result = ExecutionResult::empty(
      self.request.widget_instance_id,
      self.request.project_id,
      Utc::now(),
    );

    let properties = match self.resolve_properties() {
      Ok(properties) => properties,
      Err(message) => {
        warn!(error = %message, "failed to resolve properties");
        result.error_kind = self.classify(false);
        result.log = Some(message);
        return result;
      }
    };

    let input = ScriptInput {
      script: self.request.script.clone(),
      properties: properties.values,
      previous_data: self.request.previous_result_data.clone(),
      instance_id: self.request.widget_instance_id,
    };
    let run = self.sandbox.run(input, cancel).await;

    self.populate(&mut result, run, &properties.secrets);
    result
  }

  /// Decrypt secret values and fill in the properties the instance never set.
  fn resolve_properties(&self) -> Result<ResolvedProperties, String> {
    let mut values = parse_properties(&self.request.properties_raw);
    let mut secrets = Vec::new();

    for descriptor in &self.descriptors {
      match values.get_mut(&descriptor.name) {
        Some(Some(value)) if descriptor.data_type.is_secret() => {
          let plaintext = self.decryptor.decrypt(value).map_err(|e| {
            format!("failed to decrypt property '{}': {}", descriptor.name, e)
          })?;
          secrets.push(plaintext.clone());
          *value = plaintext;
        }
        Some(_) => {}
        None => {
          let value = if descriptor.required {
            descriptor.default_value.clone()
          } else {
            None
          };
          values.insert(descriptor.name.clone(), value);
        }
      }
    }

    Ok(ResolvedProperties { values, secrets })
  }

  fn populate(&self, result: &mut ExecutionResult, run: ScriptRun, secrets: &[String]) {
    let ScriptRun { console, outcome } = run;

    match outcome {
      Ok(output) if is_json(&output) => {
        let console = redact(&console, secrets);
        result.data = Some(output);
        result.log = (!console.is_empty()).then_some(console);
        info!("script_completed");
      }
      Ok(output) => {
        let message = format!("script returned invalid JSON: {}", output);
        result.error_kind = self.classify(false);
        result.log = Some(redact(&diagnostic(&console, &message), secrets));
        warn!(error_kind = ?result.error_kind, "script returned invalid JSON");
      }
      Err(e) if e.is_interruption() => {
        debug!("script interrupted");
      }
      Err(e) => {
        let message = redact(&e.to_string(), secrets);
        result.error_kind = self.classify(e.is_transient());
        result.log = Some(redact(&diagnostic(&console, &message), secrets));
        warn!(error_kind = ?result.error_kind, error = %message, "script_failed");
      }
    }
  }

  /// A failure is transient when its cause is, or when the instance has
  /// succeeded before.
  fn classify(&self, transient: bool) -> ErrorKind {
    if transient || self.request.has_previously_succeeded {
      ErrorKind::Transient
    } else {
      ErrorKind::Fatal
    }
  }
}

fn is_json(output: &str) -> bool {
  serde_json::from_str::<serde_json::Value>(output).is_ok()
}

/// Console output followed by the failure message.
fn diagnostic(console: &str, message: &str) -> String {
  if console.is_empty() {
    return message.to_string();
  }
  let mut log = console.to_string();
  if !log.ends_with('\n') {
    log.push('\n');
  }
  log.push_str(message);
  log
}
