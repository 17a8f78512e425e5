use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use pulse_host_http::HttpClient;
use pulse_host_secret::{AesGcmSecretBox, PassthroughDecryptor, SecretDecryptor};
use pulse_sandbox::Sandbox;
use pulse_scheduler::{
  ChannelNotifier, Collaborators, ExecutionScheduler, InMemoryCatalog, InMemoryLifecycle,
  ScriptExecutability, ScriptExecutionTask,
};
use pulse_widget::{
  ParameterType, PropertyMap, WidgetExecutionRequest, WidgetParameterDescriptor, WidgetState,
  encode_properties,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod manifest;

use config::PulseConfig;
use manifest::Manifest;

/// Environment variable holding the base64 AES-256 key for secret properties.
const SECRET_KEY_VARIABLE: &str = "PULSE_SECRET_KEY";

/// Pulse - runs dashboard widget scripts on a schedule
#[derive(Parser)]
#[command(name = "pulse")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the configuration file (default: ~/.pulse/scheduler.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG says otherwise
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a widget script once and print its result as JSON
  Run {
    /// Path to the script
    script_file: PathBuf,

    /// Property passed to the script, as NAME=VALUE
    #[arg(long = "property", value_parser = parse_key_value)]
    properties: Vec<(String, String)>,

    /// Secret property as stored (encrypted when PULSE_SECRET_KEY is set), as NAME=VALUE
    #[arg(long = "secret", value_parser = parse_key_value)]
    secrets: Vec<(String, String)>,

    /// Result of the previous execution
    #[arg(long)]
    previous: Option<String>,

    #[arg(long, default_value_t = 1)]
    instance_id: i64,

    /// Treat the widget as having succeeded before
    #[arg(long)]
    previously_succeeded: bool,

    /// Interrupt the script after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
  },

  /// Schedule every widget instance of a manifest until Ctrl-C
  Serve {
    /// Path to the manifest (JSON)
    manifest: PathBuf,
  },

  /// Encrypt a secret property value with PULSE_SECRET_KEY
  Encrypt { plaintext: String },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let config = PulseConfig::resolve(cli.config.as_deref())?;

  match cli.command {
    Some(Commands::Run {
      script_file,
      properties,
      secrets,
      previous,
      instance_id,
      previously_succeeded,
      timeout,
    }) => {
      let options = RunOptions {
        properties,
        secrets,
        previous,
        instance_id,
        previously_succeeded,
        timeout,
      };
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run_script(&script_file, options, &config).await })?;
    }
    Some(Commands::Serve { manifest }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { serve(&manifest, &config).await })?;
    }
    Some(Commands::Encrypt { plaintext }) => {
      let key = std::env::var(SECRET_KEY_VARIABLE)
        .with_context(|| format!("{} is not set", SECRET_KEY_VARIABLE))?;
      let secret_box = AesGcmSecretBox::from_base64_key(&key)
        .with_context(|| format!("invalid {}", SECRET_KEY_VARIABLE))?;
      println!("{}", secret_box.encrypt(&plaintext)?);
    }
    None => {
      println!("pulse - use --help to see available commands");
    }
  }

  Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool) {
  let level = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}

fn parse_key_value(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", raw))?;
  if name.is_empty() {
    return Err(anyhow!("property name is empty in '{}'", raw));
  }
  Ok((name.to_string(), value.to_string()))
}

fn decryptor() -> Result<Arc<dyn SecretDecryptor>> {
  match std::env::var(SECRET_KEY_VARIABLE) {
    Ok(key) => {
      let secret_box = AesGcmSecretBox::from_base64_key(&key)
        .with_context(|| format!("invalid {}", SECRET_KEY_VARIABLE))?;
      Ok(Arc::new(secret_box))
    }
    Err(_) => {
      warn!(
        variable = SECRET_KEY_VARIABLE,
        "secret key not set, secret properties are used as stored"
      );
      Ok(Arc::new(PassthroughDecryptor))
    }
  }
}

struct RunOptions {
  properties: Vec<(String, String)>,
  secrets: Vec<(String, String)>,
  previous: Option<String>,
  instance_id: i64,
  previously_succeeded: bool,
  timeout: Option<u64>,
}

async fn run_script(script_file: &Path, options: RunOptions, config: &PulseConfig) -> Result<()> {
  let script = tokio::fs::read_to_string(script_file)
    .await
    .with_context(|| format!("failed to read script: {}", script_file.display()))?;

  let mut values = PropertyMap::new();
  let mut descriptors = Vec::new();
  for (name, value) in options.properties {
    descriptors.push(WidgetParameterDescriptor::new(&name, ParameterType::Text));
    values.insert(name, Some(value));
  }
  for (name, value) in options.secrets {
    descriptors.push(WidgetParameterDescriptor::new(&name, ParameterType::Password));
    values.insert(name, Some(value));
  }

  let request = WidgetExecutionRequest {
    widget_instance_id: options.instance_id,
    project_id: 0,
    widget_id: 0,
    script,
    properties_raw: encode_properties(&values),
    previous_result_data: options.previous,
    delay_seconds: 0,
    timeout_seconds: options.timeout,
    current_state: WidgetState::Running,
    has_previously_succeeded: options.previously_succeeded,
  };

  let http = HttpClient::new(&config.http).context("failed to create http client")?;
  let sandbox = Arc::new(Sandbox::new(http));
  let task = ScriptExecutionTask::new(request, descriptors, decryptor()?, sandbox);
  info!(run_id = %task.run_id(), script = %script_file.display(), "running script");

  let cancel = CancellationToken::new();
  if let Some(seconds) = options.timeout {
    let deadline = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(seconds)).await;
      deadline.cancel();
    });
  }

  let result = task.run(cancel.clone()).await;
  if cancel.is_cancelled() {
    warn!("script exceeded the timeout and was interrupted");
  }

  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(())
}

async fn serve(manifest_path: &Path, config: &PulseConfig) -> Result<()> {
  let manifest = Manifest::load(manifest_path)?;

  let (sender, mut notifications) = mpsc::unbounded_channel();
  let lifecycle = Arc::new(InMemoryLifecycle::with_notifier(ChannelNotifier::new(sender)));
  let catalog = Arc::new(InMemoryCatalog::new());
  manifest.populate(&catalog);
  for request in manifest.requests()? {
    lifecycle.register(request);
  }

  let http = HttpClient::new(&config.http).context("failed to create http client")?;
  let collaborators = Collaborators {
    lifecycle: lifecycle.clone(),
    metadata: catalog.clone(),
    decryptor: decryptor()?,
    executability: Arc::new(ScriptExecutability),
  };
  let scheduler =
    ExecutionScheduler::new(config.scheduler.clone(), collaborators, Sandbox::new(http));
  scheduler.init().await;

  let requests = lifecycle.requests();
  info!(
    manifest = %manifest_path.display(),
    widgets = manifest.widgets.len(),
    instances = requests.len(),
    "serving widget instances"
  );
  scheduler.schedule_many(requests, true).await;

  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      _ = &mut shutdown => {
        info!("shutting down");
        break;
      }
      notification = notifications.recv() => match notification {
        Some(notification) => println!("{}", serde_json::to_string(&notification)?),
        None => break,
      },
    }
  }

  for project_id in manifest.project_ids() {
    scheduler.cancel_all_for_project(project_id).await;
  }
  scheduler.shutdown();
  Ok(())
}
