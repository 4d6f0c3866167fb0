//! Declarative parameter descriptors and configuration dispatch.
//!
//! Replaces the `BEGIN_PARAM_MAP`/`DDX_PARAM_*` macro pairs in
//! `original_source/lib/crf/src/params.c`/`params.h` with a plain list of
//! `(name, value, default, doc)` entries that a driver registers at
//! construction; `apply_config` dispatches a caller's `(name, value)` set
//! against that list by name, per the Design Notes.

use std::collections::HashMap;
use std::fmt;

use crate::error::{CrfError, Result};

/// A typed configuration value. Strings are parsed into the target type
/// at `set` time so a bad value fails immediately with a useful message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// One entry in a driver's parameter table: its name, current value, and
/// documentation string. The default is implicit in whatever value the
/// driver registers the descriptor with.
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub value: ParamValue,
    pub doc: &'static str,
}

/// A driver's full set of configurable parameters, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    entries: HashMap<&'static str, ParamDescriptor>,
    order: Vec<&'static str>,
}

impl ParamTable {
    pub fn new() -> Self {
        ParamTable::default()
    }

    /// Registers a parameter with its default value. Called once per
    /// name at driver construction.
    pub fn register(&mut self, name: &'static str, default: ParamValue, doc: &'static str) {
        self.order.push(name);
        self.entries.insert(
            name,
            ParamDescriptor {
                name,
                value: default,
                doc,
            },
        );
    }

    /// Sets parameter `name` to `value`. Fails with
    /// `CrfError::NotSupported` for an unregistered name (spec §6:
    /// "Unknown names fail with `ParameterUnknown`").
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match self.entries.get_mut(name) {
            Some(entry) => {
                if std::mem::discriminant(&entry.value) != std::mem::discriminant(&value) {
                    return Err(CrfError::bad_param_value(name, &value.to_string()));
                }
                entry.value = value;
                Ok(())
            }
            None => Err(CrfError::unknown_param(name)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.get(name).map(|e| &e.value)
    }

    pub fn get_f64(&self, name: &str) -> f64 {
        self.get(name).and_then(ParamValue::as_f64).unwrap_or(0.0)
    }

    pub fn get_i64(&self, name: &str) -> i64 {
        self.get(name).and_then(ParamValue::as_i64).unwrap_or(0)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    pub fn get_str(&self, name: &str) -> &str {
        self.get(name).and_then(ParamValue::as_str).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.order.iter().map(move |name| &self.entries[name])
    }
}
