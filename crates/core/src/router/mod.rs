//! MIDI router rules.
//!
//! A [`RouterRule`] stages channel and parameter remaps on its own handle
//! until [`crate::Synth::router_add_rule`] commits it, at which point the
//! router takes ownership of the handle.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    engine::{Engine, RuleField},
    handle::{HandleKind, OwnedHandle, RawHandle},
    FluidError, Result,
};

/// Class of MIDI event a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Note,
    Cc,
    Prog,
    PBend,
    CPress,
    KPress,
}

impl RuleType {
    pub const ALL: [RuleType; 6] = [
        RuleType::Note,
        RuleType::Cc,
        RuleType::Prog,
        RuleType::PBend,
        RuleType::CPress,
        RuleType::KPress,
    ];

    /// Value of the engine's `fluid_midi_router_rule_type`.
    pub fn as_raw(self) -> i32 {
        match self {
            RuleType::Note => 0,
            RuleType::Cc => 1,
            RuleType::Prog => 2,
            RuleType::PBend => 3,
            RuleType::CPress => 4,
            RuleType::KPress => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::Note => "note",
            RuleType::Cc => "cc",
            RuleType::Prog => "prog",
            RuleType::PBend => "pbend",
            RuleType::CPress => "cpress",
            RuleType::KPress => "kpress",
        }
    }
}

impl FromStr for RuleType {
    type Err = FluidError;

    fn from_str(value: &str) -> Result<Self> {
        RuleType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| FluidError::unknown_name("router rule type", value))
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(min, max, mul, add)` remap: values inside `[min, max]` are mapped to
/// `value * mul + add`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleRange {
    pub min: i32,
    pub max: i32,
    pub mul: f32,
    pub add: i32,
}

impl RuleRange {
    pub fn new(min: i32, max: i32, mul: f32, add: i32) -> Self {
        Self { min, max, mul, add }
    }
}

/// A router rule not yet committed to a router.
pub struct RouterRule {
    handle: Option<OwnedHandle>,
}

impl RouterRule {
    pub fn new(engine: &Arc<dyn Engine>) -> Result<Self> {
        let handle = OwnedHandle::new(engine, HandleKind::RouterRule, engine.new_router_rule())?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    pub fn set_chan(&mut self, min: i32, max: i32, mul: f32, add: i32) -> Result<()> {
        self.set(RuleField::Chan, RuleRange::new(min, max, mul, add))
    }

    pub fn set_param1(&mut self, min: i32, max: i32, mul: f32, add: i32) -> Result<()> {
        self.set(RuleField::Param1, RuleRange::new(min, max, mul, add))
    }

    pub fn set_param2(&mut self, min: i32, max: i32, mul: f32, add: i32) -> Result<()> {
        self.set(RuleField::Param2, RuleRange::new(min, max, mul, add))
    }

    /// Forwards a remap to the engine immediately; a later write to the same
    /// field replaces it.
    pub fn set(&mut self, field: RuleField, range: RuleRange) -> Result<()> {
        let handle = self.handle()?;
        handle
            .engine()
            .router_rule_set(handle.raw(), field, range.min, range.max, range.mul, range.add);
        Ok(())
    }

    /// Discards the rule. Setters fail with [`FluidError::Released`] afterwards.
    pub fn delete(&mut self) {
        self.handle = None;
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    pub(crate) fn raw(&self) -> Result<RawHandle> {
        Ok(self.handle()?.raw())
    }

    /// Called once the router accepted the rule.
    pub(crate) fn transfer(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.into_raw();
        }
    }

    fn handle(&self) -> Result<&OwnedHandle> {
        self.handle.as_ref().ok_or(FluidError::Released("router rule"))
    }
}

impl fmt::Debug for RouterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterRule").field("handle", &self.handle).finish()
    }
}
