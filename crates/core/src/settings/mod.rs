//! Typed access to an engine settings object.
//!
//! Writes dispatch on the [`SettingValue`] variant the caller built, reads
//! dispatch on the type tag the engine reports for the name.

use std::{ffi::CString, fmt, sync::Arc};

use serde::{
    de::{self, Unexpected, Visitor},
    Deserialize, Deserializer, Serialize,
};

use crate::{
    engine::Engine,
    handle::{HandleKind, OwnedHandle, RawHandle},
    FluidError, Result,
};

/// A scalar setting value.
///
/// Deserializes by JSON kind. Integers outside the `i32` range are rejected
/// rather than widened to [`SettingValue::Num`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i32),
    Num(f64),
    Str(String),
}

struct SettingValueVisitor;

impl<'de> Visitor<'de> for SettingValueVisitor {
    type Value = SettingValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, a 32-bit integer, a number or a string")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<SettingValue, E> {
        Ok(SettingValue::Bool(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<SettingValue, E> {
        i32::try_from(value)
            .map(SettingValue::Int)
            .map_err(|_| E::invalid_value(Unexpected::Signed(value), &self))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<SettingValue, E> {
        i32::try_from(value)
            .map(SettingValue::Int)
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &self))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<SettingValue, E> {
        Ok(SettingValue::Num(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<SettingValue, E> {
        Ok(SettingValue::Str(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> std::result::Result<SettingValue, E> {
        Ok(SettingValue::Str(value))
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(SettingValueVisitor)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Str(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Str(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Int(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Num(value)
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(value) => write!(f, "{value}"),
            SettingValue::Int(value) => write!(f, "{value}"),
            SettingValue::Num(value) => write!(f, "{value}"),
            SettingValue::Str(value) => f.write_str(value),
        }
    }
}

/// Declared type of a setting name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    Num,
    Int,
    Str,
    /// A node grouping other settings, with no value of its own.
    Set,
    Undefined,
}

impl SettingType {
    pub fn from_raw(tag: i32) -> Self {
        match tag {
            0 => SettingType::Num,
            1 => SettingType::Int,
            2 => SettingType::Str,
            3 => SettingType::Set,
            _ => SettingType::Undefined,
        }
    }
}

/// An owned engine settings object.
pub struct Settings {
    handle: OwnedHandle,
}

impl Settings {
    pub fn new(engine: &Arc<dyn Engine>) -> Result<Self> {
        let handle = OwnedHandle::new(engine, HandleKind::Settings, engine.new_settings())?;
        Ok(Self { handle })
    }

    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.handle.engine()
    }

    /// Writes `value`, choosing the setter from its variant. Booleans are
    /// written as integer `0`/`1`. Returns the engine's result code.
    pub fn set(&self, name: &str, value: impl Into<SettingValue>) -> Result<i32> {
        let value = value.into();
        let key = CString::new(name)?;
        let engine = self.engine();
        let code = match &value {
            SettingValue::Str(text) => {
                let text = CString::new(text.as_str())?;
                engine.settings_setstr(self.raw(), &key, &text)
            }
            SettingValue::Bool(flag) => engine.settings_setint(self.raw(), &key, i32::from(*flag)),
            SettingValue::Int(number) => engine.settings_setint(self.raw(), &key, *number),
            SettingValue::Num(number) => engine.settings_setnum(self.raw(), &key, *number),
        };
        tracing::trace!(name, %value, code, "set setting");
        Ok(code)
    }

    pub fn setting_type(&self, name: &str) -> Result<SettingType> {
        let key = CString::new(name)?;
        Ok(SettingType::from_raw(
            self.engine().settings_get_type(self.raw(), &key),
        ))
    }

    /// Reads `name` as the type the engine declares for it.
    pub fn get(&self, name: &str) -> Result<SettingValue> {
        match self.setting_type(name)? {
            SettingType::Num => self.get_num(name).map(SettingValue::Num),
            SettingType::Int => self.get_int(name).map(SettingValue::Int),
            SettingType::Str => self.get_str(name).map(SettingValue::Str),
            SettingType::Set => Err(FluidError::NotScalar(name.to_string())),
            SettingType::Undefined => Err(FluidError::SettingNotFound(name.to_string())),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i32> {
        let key = CString::new(name)?;
        self.engine()
            .settings_getint(self.raw(), &key)
            .ok_or_else(|| FluidError::SettingNotFound(name.to_string()))
    }

    pub fn get_num(&self, name: &str) -> Result<f64> {
        let key = CString::new(name)?;
        self.engine()
            .settings_getnum(self.raw(), &key)
            .ok_or_else(|| FluidError::SettingNotFound(name.to_string()))
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        let key = CString::new(name)?;
        self.engine()
            .settings_getstr(self.raw(), &key)?
            .ok_or_else(|| FluidError::SettingNotFound(name.to_string()))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings").field("handle", &self.handle).finish()
    }
}
