//! The bridging facility: the only host functions a script can call.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use boa_engine::{
  Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, js_string,
};
use boa_gc::{Finalize, Trace};
use pulse_host_http::{HttpClient, HttpError, ResponseMode};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SandboxError;

/// Host-side state shared by every bridge function of one execution.
pub(crate) struct BridgeState {
  http: HttpClient,
  runtime: Handle,
  cancel: CancellationToken,
  /// Last error raised by a bridge function, kept so the host can recover
  /// its kind once the exception surfaces from the interpreter.
  fault: Mutex<Option<SandboxError>>,
}

impl BridgeState {
  pub(crate) fn new(http: HttpClient, runtime: Handle, cancel: CancellationToken) -> Self {
    Self {
      http,
      runtime,
      cancel,
      fault: Mutex::new(None),
    }
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Record `fault` and turn it into a script exception.
  fn raise(&self, fault: SandboxError) -> JsError {
    let message = fault.to_string();
    *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    JsNativeError::error().with_message(message).into()
  }

  fn ensure_not_cancelled(&self) -> JsResult<()> {
    if self.is_cancelled() {
      return Err(self.raise(SandboxError::Interrupted));
    }
    Ok(())
  }

  /// Map an exception that escaped the script back to a sandbox error.
  ///
  /// Cancellation wins over everything else. An exception carrying the
  /// message of the last bridge fault keeps that fault's kind, even if the
  /// script caught and rethrew it.
  pub(crate) fn resolve(&self, error: JsError) -> SandboxError {
    if self.is_cancelled() {
      return SandboxError::Interrupted;
    }

    let message = error.to_string();
    let fault = self
      .fault
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    match fault {
      Some(fault) if message.contains(&fault.to_string()) => fault,
      _ => SandboxError::Script { message },
    }
  }

  /// Run an HTTP request to completion, aborting it on cancellation.
  fn block_on_http<F>(&self, request: F) -> JsResult<JsValue>
  where
    F: Future<Output = Result<String, HttpError>>,
  {
    self.ensure_not_cancelled()?;

    let outcome = self.runtime.block_on(async {
      tokio::select! {
        _ = self.cancel.cancelled() => None,
        result = request => Some(result),
      }
    });

    match outcome {
      None => Err(self.raise(SandboxError::Interrupted)),
      Some(Ok(body)) => Ok(js_str(&body)),
      Some(Err(e)) => {
        debug!(error = %e, "bridged http call failed");
        Err(self.raise(SandboxError::Http(e)))
      }
    }
  }
}

/// Captures handed to every bridge function.
#[derive(Clone, Trace, Finalize)]
pub(crate) struct Bridge {
  #[unsafe_ignore_trace]
  state: Arc<BridgeState>,
}

impl Bridge {
  pub(crate) fn new(state: Arc<BridgeState>) -> Self {
    Self { state }
  }
}

/// Install every bridge function as a global.
pub(crate) fn install(context: &mut Context, bridge: &Bridge) -> JsResult<()> {
  let functions: [(JsString, usize, BridgeFn); 8] = [
    (js_string!("get"), 1, get),
    (js_string!("head"), 1, head),
    (js_string!("post"), 2, post),
    (js_string!("toBase64"), 1, to_base64),
    (js_string!("checkInterrupted"), 0, check_interrupted),
    (js_string!("throwTransientError"), 0, throw_transient_error),
    (js_string!("throwFatalError"), 1, throw_fatal_error),
    (js_string!("throwTimeoutError"), 0, throw_timeout_error),
  ];

  for (name, length, function) in functions {
    context.register_global_callable(
      name,
      length,
      NativeFunction::from_copy_closure_with_captures(function, bridge.clone()),
    )?;
  }
  Ok(())
}

type BridgeFn = fn(&JsValue, &[JsValue], &Bridge, &mut Context) -> JsResult<JsValue>;

/// `get(url[, header, value][, statusOnly])`
fn get(_this: &JsValue, args: &[JsValue], bridge: &Bridge, ctx: &mut Context) -> JsResult<JsValue> {
  let url = string_arg(args, 0, ctx)?;
  let (header, mode) = header_and_mode(args.get(1..).unwrap_or_default(), ctx)?;
  let state = &bridge.state;
  state.block_on_http(state.http.get(&url, as_pair(&header), mode))
}

/// `head(url[, header, value])` returns the status code.
fn head(_this: &JsValue, args: &[JsValue], bridge: &Bridge, ctx: &mut Context) -> JsResult<JsValue> {
  let url = string_arg(args, 0, ctx)?;
  let (header, _) = header_and_mode(args.get(1..).unwrap_or_default(), ctx)?;
  let state = &bridge.state;
  state.block_on_http(state.http.head(&url, as_pair(&header)))
}

/// `post(url, body[, header, value][, statusOnly])`
fn post(_this: &JsValue, args: &[JsValue], bridge: &Bridge, ctx: &mut Context) -> JsResult<JsValue> {
  let url = string_arg(args, 0, ctx)?;
  let body = string_arg(args, 1, ctx)?;
  let (header, mode) = header_and_mode(args.get(2..).unwrap_or_default(), ctx)?;
  let state = &bridge.state;
  state.block_on_http(state.http.post(&url, &body, as_pair(&header), mode))
}

fn to_base64(
  _this: &JsValue,
  args: &[JsValue],
  bridge: &Bridge,
  ctx: &mut Context,
) -> JsResult<JsValue> {
  bridge.state.ensure_not_cancelled()?;
  let input = string_arg(args, 0, ctx)?;
  Ok(js_str(&B64.encode(input.as_bytes())))
}

fn check_interrupted(
  _this: &JsValue,
  _args: &[JsValue],
  bridge: &Bridge,
  _ctx: &mut Context,
) -> JsResult<JsValue> {
  bridge.state.ensure_not_cancelled()?;
  Ok(JsValue::undefined())
}

fn throw_transient_error(
  _this: &JsValue,
  args: &[JsValue],
  bridge: &Bridge,
  ctx: &mut Context,
) -> JsResult<JsValue> {
  let message = optional_message(args, ctx, "transient error raised by script")?;
  Err(bridge.state.raise(SandboxError::Remote { message }))
}

fn throw_fatal_error(
  _this: &JsValue,
  args: &[JsValue],
  bridge: &Bridge,
  ctx: &mut Context,
) -> JsResult<JsValue> {
  let message = optional_message(args, ctx, "fatal error raised by script")?;
  Err(bridge.state.raise(SandboxError::Fatal { message }))
}

fn throw_timeout_error(
  _this: &JsValue,
  args: &[JsValue],
  bridge: &Bridge,
  ctx: &mut Context,
) -> JsResult<JsValue> {
  let message = optional_message(args, ctx, "script reported a timeout")?;
  Err(bridge.state.raise(SandboxError::Timeout { message }))
}

fn js_str(value: &str) -> JsValue {
  JsValue::from(JsString::from(value))
}

fn string_arg(args: &[JsValue], index: usize, ctx: &mut Context) -> JsResult<String> {
  let value = args.get_or_undefined(index);
  if value.is_undefined() || value.is_null() {
    return Err(
      JsNativeError::typ()
        .with_message(format!("missing argument {}", index + 1))
        .into(),
    );
  }
  Ok(value.to_string(ctx)?.to_std_string_escaped())
}

fn optional_message(args: &[JsValue], ctx: &mut Context, default: &str) -> JsResult<String> {
  let value = args.get_or_undefined(0);
  if value.is_undefined() || value.is_null() {
    return Ok(default.to_string());
  }
  Ok(value.to_string(ctx)?.to_std_string_escaped())
}

/// Parse the optional `header, value` pair and trailing `statusOnly` flag.
fn header_and_mode(
  rest: &[JsValue],
  ctx: &mut Context,
) -> JsResult<(Option<(String, String)>, ResponseMode)> {
  let mode_of = |value: Option<&JsValue>| match value {
    Some(flag) if flag.to_boolean() => ResponseMode::StatusOnly,
    _ => ResponseMode::Body,
  };

  match rest.first() {
    None => Ok((None, ResponseMode::Body)),
    Some(first) if first.is_boolean() => Ok((None, mode_of(Some(first)))),
    Some(_) if rest.len() < 2 => Err(
      JsNativeError::typ()
        .with_message("a header name must be followed by its value")
        .into(),
    ),
    Some(_) => {
      let name = string_arg(rest, 0, ctx)?;
      let value = string_arg(rest, 1, ctx)?;
      Ok((Some((name, value)), mode_of(rest.get(2))))
    }
  }
}

fn as_pair(header: &Option<(String, String)>) -> Option<(&str, &str)> {
  header
    .as_ref()
    .map(|(name, value)| (name.as_str(), value.as_str()))
}
