//! Device facade abstractions.
//!
//! A device owns its [`PropertyMap`] and reacts to [`ControlMessage`]s received
//! from the cloud by driving its outputs. The [`Explorer`](crate::Explorer)
//! engine reads the property map whenever it sends a report and hands every
//! decoded control message to [`Device::on_control_message`].
//!
//! Two reference facades are provided:
//!
//! - [`door_lock::DoorLock`] for a face-recognition door controller.
//! - [`air_monitor::AirMonitor`] for an air-quality sensor with a lamp output.

pub mod air_monitor;
pub mod door_lock;

use crate::{message::ControlMessage, report::ReportQueue};
use alloc::{
    boxed::Box,
    string::{String, ToString},
    vec::Vec,
};
use core::fmt::{Display, Formatter};

pub use crate::message::Value;

/// A property key missing from a [`PropertyMap`].
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct KeyNotFound(pub String);

impl Display for KeyNotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "property key not found: {}", self.0)
    }
}

impl core::error::Error for KeyNotFound {}

/// Device kind.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(strum::Display, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "title_case")]
pub enum DeviceKind {
    /// Door lock with face recognition.
    DoorLock,
    /// Air-quality monitor.
    AirMonitor,
}

/// A device property, e.g. the door state.
#[derive(PartialEq, Eq, Debug)]
pub struct Property {
    /// Unique identifier, used as key on the wire.
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Optional unit of the property's value.
    pub unit: Option<&'static str>,
}

/// Mapping from property name to current value.
///
/// The set of keys is fixed at construction and keeps its insertion order.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct PropertyMap {
    entries: Vec<(String, Value)>,
}

impl PropertyMap {
    /// Constructs a property map from initial entries.
    pub fn new<K: Into<String>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, val)| (key.into(), val.into()))
                .collect(),
        }
    }

    /// Returns the current value of a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find_map(|(k, val)| (k == key).then_some(val))
    }

    /// Replaces the value of an existing property.
    ///
    /// Returns whether the value changed.
    ///
    /// # Errors
    ///
    /// - [`KeyNotFound`] if the key was not part of the map at construction.
    pub fn set(&mut self, key: &str, val: impl Into<Value>) -> Result<bool, KeyNotFound> {
        let entry = self
            .entries
            .iter_mut()
            .find_map(|(k, v)| (k == key).then_some(v))
            .ok_or_else(|| KeyNotFound(key.to_string()))?;
        let val = val.into();
        let changed = *entry != val;

        *entry = val;

        Ok(changed)
    }

    /// Returns whether the map contains a property.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns all keys in insertion order.
    pub fn keys(&self) -> impl ExactSizeIterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Returns all entries in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, val)| (key.as_str(), val))
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the map holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trait implemented by device facades.
///
/// The engine never calls back into itself from a handler: instead of
/// sending reports directly, handlers queue them on the provided [`ReportQueue`],
/// which is drained on the next poll.
#[async_trait::async_trait(?Send)]
pub trait Device {
    /// Returns the device's kind.
    fn kind(&self) -> DeviceKind;

    /// Returns the property descriptors of this device.
    fn descriptors(&self) -> &'static [Property];

    /// Returns the current property values.
    fn properties(&self) -> &PropertyMap;

    /// Handles a control message received from the cloud.
    async fn on_control_message(&mut self, msg: ControlMessage, reports: &mut ReportQueue);
}

/// Builds a property map from descriptors and initial values.
///
/// Used by device implementations, which define their initial values
/// next to their descriptors.
fn initial_properties(props: &[Property], values: impl IntoIterator<Item = Value>) -> PropertyMap {
    PropertyMap::new(props.iter().map(|prop| prop.id).zip(values))
}
