use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WidgetError;

/// Data type of a widget parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
  #[default]
  Text,
  /// Secret value, stored encrypted and decrypted right before execution.
  Password,
  Number,
  Boolean,
  Combo,
  Multiple,
}

impl ParameterType {
  /// Whether values of this type are stored encrypted and must never be logged.
  pub fn is_secret(&self) -> bool {
    matches!(self, ParameterType::Password)
  }
}

impl FromStr for ParameterType {
  type Err = WidgetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "TEXT" => Ok(ParameterType::Text),
      "PASSWORD" | "SECRET" => Ok(ParameterType::Password),
      "NUMBER" => Ok(ParameterType::Number),
      "BOOLEAN" => Ok(ParameterType::Boolean),
      "COMBO" => Ok(ParameterType::Combo),
      "MULTIPLE" => Ok(ParameterType::Multiple),
      _ => Err(WidgetError::UnknownParameterType(s.to_string())),
    }
  }
}

/// Describes one configurable property of a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetParameterDescriptor {
  /// Property name, as written in the instance's raw properties.
  pub name: String,
  #[serde(default)]
  pub data_type: ParameterType,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_value: Option<String>,
}

impl WidgetParameterDescriptor {
  pub fn new(name: impl Into<String>, data_type: ParameterType) -> Self {
    Self {
      name: name.into(),
      data_type,
      required: false,
      default_value: None,
    }
  }

  /// Mark the parameter as required with the given default value.
  pub fn required_with_default(mut self, default_value: impl Into<String>) -> Self {
    self.required = true;
    self.default_value = Some(default_value.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_secret_alias_parses_to_password() {
    assert_eq!("secret".parse::<ParameterType>().unwrap(), ParameterType::Password);
    assert!(ParameterType::Password.is_secret());
    assert!(!ParameterType::Text.is_secret());
  }

  #[test]
  fn test_descriptor_defaults_from_json() {
    let descriptor: WidgetParameterDescriptor =
      serde_json::from_str(r#"{"name": "SURI_URL"}"#).unwrap();
    assert_eq!(descriptor.data_type, ParameterType::Text);
    assert!(!descriptor.required);
    assert_eq!(descriptor.default_value, None);
  }
}
