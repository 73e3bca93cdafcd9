//! Command cards and typed parameter access.

use crate::{DeckError, DeckResult};
use serde::{Deserialize, Serialize};
use tc_core::{SourceLocation, ensure_finite};

/// A parameter value as written in the deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_real(&self) -> Option<f64> {
        match self {
            ParamValue::Real(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Real(_) => "real",
            ParamValue::Str(_) => "string",
            ParamValue::List(_) => "list",
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Real(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        ParamValue::List(v.into_iter().map(ParamValue::from).collect())
    }
}

/// One named parameter of a card.
///
/// User-defined parameters are free-form values forwarded to hooks and
/// physical-model interfaces; they are never interpreted by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
    #[serde(default)]
    pub user_defined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub key: String,
    pub location: SourceLocation,
    pub parameters: Vec<Parameter>,
}

impl Card {
    /// Create an empty card. Keys are canonicalised to upper case.
    pub fn new(key: &str, location: SourceLocation) -> Self {
        Self {
            key: key.to_ascii_uppercase(),
            location,
            parameters: Vec::new(),
        }
    }

    /// Builder-style parameter insertion (names are lower-cased).
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value.into(), false);
        self
    }

    /// Builder-style user-defined parameter insertion.
    pub fn with_user(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value.into(), true);
        self
    }

    pub fn set(&mut self, name: &str, value: ParamValue, user_defined: bool) {
        let name = name.to_ascii_lowercase();
        if let Some(p) = self.parameters.iter_mut().find(|p| p.name == name) {
            p.value = value;
            p.user_defined = user_defined;
        } else {
            self.parameters.push(Parameter {
                name,
                value,
                user_defined,
            });
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_parameter_exist(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<&ParamValue> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }

    fn invalid(&self, name: &str, expected: &'static str) -> DeckError {
        DeckError::InvalidType {
            location: self.location.clone(),
            name: name.to_string(),
            expected,
        }
    }

    pub fn get_real(&self, name: &str, default: f64) -> DeckResult<f64> {
        match self.lookup(name) {
            None => Ok(default),
            Some(v) => {
                let r = v.as_real().ok_or_else(|| self.invalid(name, "a number"))?;
                ensure_finite(r, "deck parameter").map_err(|_| self.invalid(name, "a finite number"))
            }
        }
    }

    pub fn get_int(&self, name: &str, default: i64) -> DeckResult<i64> {
        match self.lookup(name) {
            None => Ok(default),
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(_) => Err(self.invalid(name, "an integer")),
        }
    }

    pub fn get_bool(&self, name: &str, default: bool) -> DeckResult<bool> {
        match self.lookup(name) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(ParamValue::Str(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" => Ok(true),
                "false" | "off" | "no" => Ok(false),
                _ => Err(self.invalid(name, "a boolean")),
            },
            Some(_) => Err(self.invalid(name, "a boolean")),
        }
    }

    pub fn get_string(&self, name: &str, default: &str) -> DeckResult<String> {
        match self.lookup(name) {
            None => Ok(default.to_string()),
            Some(ParamValue::Str(s)) => Ok(s.clone()),
            Some(_) => Err(self.invalid(name, "a string")),
        }
    }

    /// Like [`Card::get_string`] but lower-cased, for enumerated values.
    pub fn get_enum(&self, name: &str, default: &str) -> DeckResult<String> {
        Ok(self.get_string(name, default)?.to_ascii_lowercase())
    }

    /// A string value that must be present.
    pub fn require_string(&self, name: &str) -> DeckResult<String> {
        match self.lookup(name) {
            None => Err(DeckError::MissingParameter {
                location: self.location.clone(),
                name: name.to_string(),
            }),
            Some(ParamValue::Str(s)) => Ok(s.clone()),
            Some(_) => Err(self.invalid(name, "a string")),
        }
    }

    /// A real value that must be present.
    pub fn require_real(&self, name: &str) -> DeckResult<f64> {
        match self.lookup(name) {
            None => Err(DeckError::MissingParameter {
                location: self.location.clone(),
                name: name.to_string(),
            }),
            Some(v) => v.as_real().ok_or_else(|| self.invalid(name, "a number")),
        }
    }

    /// All strings given for `name`: a single string or a list of them.
    /// Missing parameters yield an empty list.
    pub fn get_strings(&self, name: &str) -> DeckResult<Vec<String>> {
        match self.lookup(name) {
            None => Ok(Vec::new()),
            Some(ParamValue::Str(s)) => Ok(vec![s.clone()]),
            Some(ParamValue::List(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(name, "a list of strings"))
                })
                .collect(),
            Some(_) => Err(self.invalid(name, "a string or list of strings")),
        }
    }

    pub fn get_reals(&self, name: &str) -> DeckResult<Vec<f64>> {
        match self.lookup(name) {
            None => Ok(Vec::new()),
            Some(ParamValue::List(items)) => items
                .iter()
                .map(|v| v.as_real().ok_or_else(|| self.invalid(name, "a list of numbers")))
                .collect(),
            Some(v) => v
                .as_real()
                .map(|r| vec![r])
                .ok_or_else(|| self.invalid(name, "a number or list of numbers")),
        }
    }

    /// Case-insensitive comparison of an enumerated string parameter.
    pub fn is_enum_value(&self, name: &str, value: &str) -> bool {
        matches!(self.lookup(name), Some(ParamValue::Str(s)) if s.eq_ignore_ascii_case(value))
    }

    pub fn user_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.user_defined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn card() -> Card {
        Card::new("solve", SourceLocation::new("t.yaml", 4))
            .with("type", "DCSweep")
            .with("vstep", 0.1)
            .with("steps", 3_i64)
            .with("vscan", vec!["anode", "cathode"])
            .with("predict", "off")
    }

    #[test]
    fn key_is_canonical() {
        assert_eq!(card().key(), "SOLVE");
    }

    #[test]
    fn typed_getters_with_defaults() {
        let c = card();
        assert_eq!(c.get_real("vstep", 0.0).unwrap(), 0.1);
        assert_eq!(c.get_real("steps", 0.0).unwrap(), 3.0);
        assert_eq!(c.get_real("vstop", 5.0).unwrap(), 5.0);
        assert_eq!(c.get_int("steps", 0).unwrap(), 3);
        assert!(!c.get_bool("predict", true).unwrap());
        assert_eq!(c.get_enum("type", "").unwrap(), "dcsweep");
        assert!(c.is_enum_value("type", "dcsweep"));
        assert_eq!(c.get_strings("vscan").unwrap(), vec!["anode", "cathode"]);
        assert!(c.get_strings("iscan").unwrap().is_empty());
    }

    #[test]
    fn wrong_type_reports_location() {
        let err = card().get_real("type", 0.0).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("t.yaml:4"), "{msg}");
        assert!(msg.contains("'type'"));
    }

    #[test]
    fn non_finite_reals_are_rejected() {
        let c = card().with("vstop", f64::INFINITY);
        let err = c.get_real("vstop", 1.0).unwrap_err();
        assert!(err.to_string().contains("a finite number"));
    }

    #[test]
    fn missing_required_is_error() {
        let err = card().require_string("electrode").unwrap_err();
        assert!(matches!(err, DeckError::MissingParameter { .. }));
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut c = card();
        let before = c.parameter_count();
        c.set("VSTEP", ParamValue::Real(0.2), false);
        assert_eq!(c.parameter_count(), before);
        assert_eq!(c.get_real("vstep", 0.0).unwrap(), 0.2);
    }

    #[test]
    fn user_parameters_are_separated() {
        let c = Card::new("HOOK", SourceLocation::default())
            .with("id", "probe")
            .with_user("x", 0.5);
        let users: Vec<_> = c.user_parameters().map(|p| p.name.as_str()).collect();
        assert_eq!(users, vec!["x"]);
    }

    proptest! {
        #[test]
        fn keys_are_case_insensitive(key in "[a-z]{1,8}(\\.[a-z]{1,8})?") {
            let lower = Card::new(&key, SourceLocation::default());
            let upper = Card::new(&key.to_ascii_uppercase(), SourceLocation::default());
            prop_assert_eq!(lower.key(), upper.key());
            prop_assert_eq!(lower.key(), key.to_ascii_uppercase());
        }
    }
}
