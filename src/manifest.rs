//! Widget manifests served by `pulse serve`.
//!
//! ```json
//! {
//!   "widgets": [
//!     { "id": 1, "script_file": "weather.js", "delay_seconds": 300,
//!       "parameters": [{ "name": "api_key", "data_type": "PASSWORD", "required": true }] }
//!   ],
//!   "instances": [
//!     { "id": 10, "widget_id": 1, "project_id": 1, "grid_id": 1,
//!       "properties": { "city": "Lyon", "api_key": "<ciphertext>" } }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use pulse_scheduler::InMemoryCatalog;
use pulse_widget::{
  PropertyMap, WidgetExecutionRequest, WidgetParameterDescriptor, WidgetState, encode_properties,
};
use serde::Deserialize;

const DEFAULT_DELAY_SECONDS: i64 = 30;

fn default_delay() -> i64 {
  DEFAULT_DELAY_SECONDS
}

#[derive(Debug, Clone, Deserialize)]
pub struct WidgetDef {
  pub id: i64,
  /// Inline script source.
  #[serde(default)]
  pub script: Option<String>,
  /// Script file, relative to the manifest.
  #[serde(default)]
  pub script_file: Option<PathBuf>,
  #[serde(default)]
  pub parameters: Vec<WidgetParameterDescriptor>,
  #[serde(default = "default_delay")]
  pub delay_seconds: i64,
  #[serde(default)]
  pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceDef {
  pub id: i64,
  pub widget_id: i64,
  pub project_id: i64,
  #[serde(default)]
  pub grid_id: i64,
  #[serde(default)]
  pub properties: BTreeMap<String, String>,
  /// Overrides the widget's delay.
  #[serde(default)]
  pub delay_seconds: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
  #[serde(default)]
  pub widgets: Vec<WidgetDef>,
  #[serde(default)]
  pub instances: Vec<InstanceDef>,
}

impl Manifest {
  /// Read a manifest and inline every script file it references.
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    let mut manifest: Manifest = serde_json::from_str(&content)
      .with_context(|| format!("failed to parse manifest: {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for widget in &mut manifest.widgets {
      if widget.script.is_some() {
        continue;
      }
      let Some(file) = &widget.script_file else {
        bail!("widget {} has neither a script nor a script_file", widget.id);
      };
      let file = base.join(file);
      let script = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read script: {}", file.display()))?;
      widget.script = Some(script);
    }

    Ok(manifest)
  }

  /// Register every widget and instance placement in `catalog`.
  pub fn populate(&self, catalog: &InMemoryCatalog) {
    for widget in &self.widgets {
      catalog.add_widget(widget.id, widget.parameters.clone());
    }
    for instance in &self.instances {
      catalog.place_instance(instance.id, instance.project_id, instance.grid_id);
    }
  }

  /// One stopped request per instance.
  pub fn requests(&self) -> Result<Vec<WidgetExecutionRequest>> {
    let widgets: BTreeMap<i64, &WidgetDef> =
      self.widgets.iter().map(|widget| (widget.id, widget)).collect();

    self
      .instances
      .iter()
      .map(|instance| {
        let Some(widget) = widgets.get(&instance.widget_id) else {
          bail!(
            "instance {} references unknown widget {}",
            instance.id,
            instance.widget_id
          );
        };
        let properties: PropertyMap = instance
          .properties
          .iter()
          .map(|(name, value)| (name.clone(), Some(value.clone())))
          .collect();

        Ok(WidgetExecutionRequest {
          widget_instance_id: instance.id,
          project_id: instance.project_id,
          widget_id: widget.id,
          script: widget.script.clone().unwrap_or_default(),
          properties_raw: encode_properties(&properties),
          previous_result_data: None,
          delay_seconds: instance.delay_seconds.unwrap_or(widget.delay_seconds),
          timeout_seconds: widget.timeout_seconds,
          current_state: WidgetState::Stopped,
          has_previously_succeeded: false,
        })
      })
      .collect()
  }

  pub fn project_ids(&self) -> BTreeSet<i64> {
    self
      .instances
      .iter()
      .map(|instance| instance.project_id)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pulse_widget::{ParameterType, parse_properties};

  fn manifest() -> Manifest {
    serde_json::from_str(
      r#"{
        "widgets": [
          { "id": 1, "script": "function run() { return '{}'; }",
            "parameters": [{ "name": "token", "data_type": "PASSWORD" }] },
          { "id": 2, "script": "function run() { return '[]'; }", "delay_seconds": 5, "timeout_seconds": 90 }
        ],
        "instances": [
          { "id": 10, "widget_id": 1, "project_id": 7, "properties": { "token": "abc", "city": "Lyon" } },
          { "id": 11, "widget_id": 2, "project_id": 8, "grid_id": 3, "delay_seconds": 60 }
        ]
      }"#,
    )
    .unwrap()
  }

  #[test]
  fn test_requests_from_manifest() {
    let requests = manifest().requests().unwrap();

    assert_eq!(requests.len(), 2);
    let first = &requests[0];
    assert_eq!(first.widget_instance_id, 10);
    assert_eq!(first.delay_seconds, DEFAULT_DELAY_SECONDS);
    assert_eq!(first.current_state, WidgetState::Stopped);
    let properties = parse_properties(&first.properties_raw);
    assert_eq!(properties.get("city"), Some(&Some("Lyon".to_string())));

    let second = &requests[1];
    assert_eq!(second.delay_seconds, 60);
    assert_eq!(second.timeout_seconds, Some(90));
  }

  #[test]
  fn test_unknown_widget_is_rejected() {
    let mut manifest = manifest();
    manifest.instances[0].widget_id = 99;
    assert!(manifest.requests().is_err());
  }

  #[tokio::test]
  async fn test_populate_catalog() {
    use pulse_scheduler::WidgetMetadataProvider;

    let catalog = InMemoryCatalog::new();
    manifest().populate(&catalog);

    let descriptors = catalog.parameter_descriptors(1).await.unwrap();
    assert_eq!(descriptors[0].data_type, ParameterType::Password);
    assert_eq!(catalog.instances_in_grid(3).await.unwrap(), vec![11]);
    assert_eq!(manifest().project_ids().into_iter().collect::<Vec<_>>(), vec![7, 8]);
  }
}
