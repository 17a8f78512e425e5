//! Console capture.
//!
//! Scripts get a `console` object and a global `print`; everything written
//! through them lands in an in-memory buffer that is attached to the
//! execution result as its log.

use std::sync::{Arc, Mutex, PoisonError};

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsValue, NativeFunction, js_string};
use boa_gc::{Finalize, Trace};

/// Shared buffer receiving console output.
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub(crate) struct ConsoleBuffer {
  #[unsafe_ignore_trace]
  text: Arc<Mutex<String>>,
}

impl ConsoleBuffer {
  fn write_line(&self, line: &str) {
    let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
    text.push_str(line);
    text.push('\n');
  }

  /// Everything written so far.
  pub(crate) fn contents(&self) -> String {
    self
      .text
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

/// Install `console` and `print` into the context.
pub(crate) fn install(context: &mut Context, buffer: &ConsoleBuffer) -> JsResult<()> {
  let console = ObjectInitializer::new(context)
    .function(
      NativeFunction::from_copy_closure_with_captures(log, buffer.clone()),
      js_string!("log"),
      0,
    )
    .function(
      NativeFunction::from_copy_closure_with_captures(log, buffer.clone()),
      js_string!("info"),
      0,
    )
    .function(
      NativeFunction::from_copy_closure_with_captures(log, buffer.clone()),
      js_string!("debug"),
      0,
    )
    .function(
      NativeFunction::from_copy_closure_with_captures(warn, buffer.clone()),
      js_string!("warn"),
      0,
    )
    .function(
      NativeFunction::from_copy_closure_with_captures(error, buffer.clone()),
      js_string!("error"),
      0,
    )
    .build();

  context.register_global_property(
    js_string!("console"),
    console,
    Attribute::WRITABLE | Attribute::CONFIGURABLE,
  )?;
  context.register_global_callable(
    js_string!("print"),
    0,
    NativeFunction::from_copy_closure_with_captures(log, buffer.clone()),
  )?;
  Ok(())
}

fn log(
  _this: &JsValue,
  args: &[JsValue],
  buffer: &ConsoleBuffer,
  context: &mut Context,
) -> JsResult<JsValue> {
  buffer.write_line(&render(args, context)?);
  Ok(JsValue::undefined())
}

fn warn(
  _this: &JsValue,
  args: &[JsValue],
  buffer: &ConsoleBuffer,
  context: &mut Context,
) -> JsResult<JsValue> {
  buffer.write_line(&format!("WARN {}", render(args, context)?));
  Ok(JsValue::undefined())
}

fn error(
  _this: &JsValue,
  args: &[JsValue],
  buffer: &ConsoleBuffer,
  context: &mut Context,
) -> JsResult<JsValue> {
  buffer.write_line(&format!("ERROR {}", render(args, context)?));
  Ok(JsValue::undefined())
}

/// Join the arguments with spaces. Objects are rendered as JSON when possible.
fn render(args: &[JsValue], context: &mut Context) -> JsResult<String> {
  let mut parts = Vec::with_capacity(args.len());
  for arg in args {
    let part = if arg.is_object() && !arg.is_callable() {
      match arg.to_json(context) {
        Ok(json) => json.to_string(),
        Err(_) => arg.to_string(context)?.to_std_string_escaped(),
      }
    } else {
      arg.to_string(context)?.to_std_string_escaped()
    };
    parts.push(part);
  }
  Ok(parts.join(" "))
}
