//! Schema migration applied to records before decoding.
//!
//! Stored records carry an implicit schema version in the reserved state key
//! `_version_`, defaulting to 1. An [`Upcaster`] migrates one `(topic,
//! version)` step to the next; the [`UpcasterChain`] keeps applying matching
//! upcasters, bumping the version each step, until none applies. New events
//! are always written at their topic's current version, so upcasters only
//! ever run against historical records.

use std::{collections::BTreeMap, sync::Arc};

use crate::{codec::IntegrityError, transcoder::Value};

/// Reserved state key carrying the record's schema version.
pub const VERSION_KEY: &str = "_version_";

/// A pure transform from one record schema version to the next.
///
/// An upcaster claims records by `(topic, from_version)` and must be total
/// for the records it claims; refusing one is an integrity failure, not a
/// recoverable condition. Upcasters may rename the topic, in which case the
/// chain continues matching under the new name.
pub trait Upcaster: Send + Sync {
    /// Topic of the records this upcaster migrates.
    fn topic(&self) -> &str;

    /// Schema version this upcaster migrates *from*.
    fn from_version(&self) -> u64;

    /// Migrate one schema step.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError`] when the record cannot be migrated.
    fn upcast(
        &self,
        state: BTreeMap<String, Value>,
        topic: &str,
    ) -> Result<(BTreeMap<String, Value>, String), IntegrityError>;
}

/// An ordered list of upcasters.
///
/// Built once at application construction and read-only afterwards.
#[derive(Clone, Default)]
pub struct UpcasterChain {
    upcasters: Vec<Arc<dyn Upcaster>>,
}

impl UpcasterChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an upcaster. Earlier entries win when several match the same
    /// `(topic, version)`.
    pub fn push(&mut self, upcaster: impl Upcaster + 'static) {
        self.upcasters.push(Arc::new(upcaster));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upcasters.is_empty()
    }

    /// Migrate a record's state to the current schema.
    ///
    /// Reads the version from `state[VERSION_KEY]` (default 1), applies every
    /// matching upcaster in turn, and records the bumped version back into
    /// the state. The returned state still carries `VERSION_KEY`; the mapper
    /// strips it before handing the state to the domain layer.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError`] when `VERSION_KEY` is malformed or when an
    /// upcaster refuses the record.
    pub fn apply(
        &self,
        mut state: BTreeMap<String, Value>,
        mut topic: String,
    ) -> Result<(BTreeMap<String, Value>, String), IntegrityError> {
        let mut version = match state.get(VERSION_KEY) {
            None => 1,
            Some(Value::Int(v)) if *v >= 1 => *v as u64,
            Some(other) => {
                return Err(IntegrityError::new(format!(
                    "record carries a malformed schema version: {other:?}"
                )));
            }
        };

        // The version strictly increases every step, so this loop terminates
        // after at most one application per registered upcaster.
        while let Some(upcaster) = self
            .upcasters
            .iter()
            .find(|u| u.topic() == topic && u.from_version() == version)
        {
            let migrated = upcaster.upcast(state, &topic)?;
            state = migrated.0;
            topic = migrated.1;
            version += 1;
            state.insert(VERSION_KEY.to_string(), Value::Int(version as i64));
            tracing::trace!(%topic, version, "record upcast one schema step");
        }

        Ok((state, topic))
    }
}
