//! Property report scheduling.
//!
//! Devices announce changed properties through [`ReportQueue::notify`].
//! The queue is drained once per poll: all single keys are coalesced into one
//! report, while groups are sent as independent reports. Values are read from
//! the [`PropertyMap`] at drain time, so a key changed several times between
//! two polls is reported once with its latest value.

use crate::device::{KeyNotFound, PropertyMap, Value};
use alloc::{
    borrow::ToOwned,
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};
use log::warn;

/// One queued report request.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum ReportUnit {
    /// A single key, merged with all other single keys of the same drain.
    Key(String),
    /// A set of keys reported together in a message of their own.
    Group(Vec<String>),
}

impl From<&str> for ReportUnit {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<&String> for ReportUnit {
    fn from(key: &String) -> Self {
        Self::Key(key.clone())
    }
}

impl From<String> for ReportUnit {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<Vec<String>> for ReportUnit {
    fn from(keys: Vec<String>) -> Self {
        Self::Group(keys)
    }
}

impl From<&[&str]> for ReportUnit {
    fn from(keys: &[&str]) -> Self {
        Self::Group(keys.iter().map(|&key| key.to_owned()).collect())
    }
}

/// A set of property values sent as one report.
pub type ReportBatch = BTreeMap<String, Value>;

/// Ordered queue of pending report units.
#[derive(Clone, Debug, Default)]
pub struct ReportQueue {
    units: Vec<ReportUnit>,
}

impl ReportQueue {
    /// Constructs an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues report units.
    ///
    /// Plain keys are coalesced into a single report, nested key
    /// lists are sent as separate reports. Units already queued are skipped.
    pub fn notify<U: Into<ReportUnit>>(&mut self, units: impl IntoIterator<Item = U>) {
        for unit in units {
            self.push(unit.into());
        }
    }

    /// Queues a group of keys to be reported together.
    pub fn notify_group<K: Into<String>>(&mut self, keys: impl IntoIterator<Item = K>) {
        self.push(ReportUnit::Group(keys.into_iter().map(Into::into).collect()));
    }

    /// Queues a report of every property, split into two halves.
    ///
    /// Keeps each publish command short enough for the module's line buffer.
    pub fn notify_full_report(&mut self, props: &PropertyMap) {
        let keys: Vec<&str> = props.keys().collect();
        let (first, second) = keys.split_at(keys.len() / 2);

        for half in [first, second] {
            if !half.is_empty() {
                self.push(half.into());
            }
        }
    }

    fn push(&mut self, unit: ReportUnit) {
        if !self.units.contains(&unit) {
            self.units.push(unit);
        }
    }

    /// Returns the number of queued units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Empties the queue and builds the batches to send.
    ///
    /// The combined batch of single keys comes first, followed by the groups
    /// in queue order. A unit referencing a key missing from the map is dropped.
    pub fn take(&mut self, props: &PropertyMap) -> Vec<ReportBatch> {
        let units = core::mem::take(&mut self.units);
        let mut combined = ReportBatch::new();
        let mut groups = Vec::new();

        for unit in units {
            match unit {
                ReportUnit::Key(key) => match snapshot(props, [key]) {
                    Ok(batch) => combined.extend(batch),
                    Err(err) => warn!("Dropped report unit: {err}"),
                },
                ReportUnit::Group(keys) => match snapshot(props, keys) {
                    Ok(batch) if batch.is_empty() => {}
                    Ok(batch) => groups.push(batch),
                    Err(err) => warn!("Dropped report group: {err}"),
                },
            }
        }

        let mut batches = Vec::with_capacity(groups.len() + 1);

        if !combined.is_empty() {
            batches.push(combined);
        }

        batches.extend(groups);
        batches
    }
}

fn snapshot(
    props: &PropertyMap,
    keys: impl IntoIterator<Item = String>,
) -> Result<ReportBatch, KeyNotFound> {
    keys.into_iter()
        .map(|key| match props.get(&key) {
            Some(val) => Ok((key, val.clone())),
            None => Err(KeyNotFound(key)),
        })
        .collect()
}

/// Monotonic send sequence counter.
///
/// Wraps around on overflow and is only reset on restart.
#[derive(Copy, Clone, Debug, Default)]
pub struct SendCounter(u32);

impl SendCounter {
    /// Returns the next sequence number.
    pub fn next(&mut self) -> u32 {
        let seq = self.0;

        self.0 = self.0.wrapping_add(1);

        seq
    }

    /// Returns the sequence number that will be used next.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.0
    }
}
