//! Environment-driven construction of the persistence infrastructure.
//!
//! The environment variable *names* are the external contract; their values
//! select among the implementations this workspace ships. Internally the
//! selection is an ordinary tagged variant ([`RecorderConfig`]) produced by
//! one loader, so nothing downstream ever re-reads the environment.
//!
//! | Variable | Effect |
//! |---|---|
//! | `INFRASTRUCTURE_FACTORY` | `memory` (default) or `sqlite` |
//! | `IS_SNAPSHOTTING_ENABLED` | build a snapshot store (boolean, default off) |
//! | `COMPRESSOR_TOPIC` | `zstd` enables compression |
//! | `CIPHER_TOPIC`, `CIPHER_KEY` | `chacha20poly1305` + base64 key enable encryption |
//! | `SQLITE_DBNAME` | database file for the sqlite recorder |
//! | `CREATE_TABLE` | apply startup DDL (boolean, default on) |
//!
//! Booleans accept `y`, `yes`, `t`, `true`, `on`, `1` and `n`, `no`, `f`,
//! `false`, `off`, `0` (case-insensitive); anything else is rejected.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use griot_core::{
    codec::{ChaCha20Poly1305Cipher, Cipher, Compressor, ZstdCompressor},
    mapper::{Mapper, TopicRegistry},
    notification::NotificationLog,
    recorder::{
        Recorder, RecorderError, SnapshotRecorder,
        memory::{MemoryRecorder, MemorySnapshotRecorder},
    },
    snapshot::SnapshotStore,
    store::EventStore,
    transcoder::Transcoder,
    upcast::UpcasterChain,
};
use thiserror::Error;

/// Selects the recorder implementation.
pub const INFRASTRUCTURE_FACTORY: &str = "INFRASTRUCTURE_FACTORY";
/// Enables construction of the snapshot store.
pub const IS_SNAPSHOTTING_ENABLED: &str = "IS_SNAPSHOTTING_ENABLED";
/// Selects the cipher.
pub const CIPHER_TOPIC: &str = "CIPHER_TOPIC";
/// Base64 key material for the cipher.
pub const CIPHER_KEY: &str = "CIPHER_KEY";
/// Selects the compressor.
pub const COMPRESSOR_TOPIC: &str = "COMPRESSOR_TOPIC";
/// Database file for the sqlite recorder.
pub const SQLITE_DBNAME: &str = "SQLITE_DBNAME";
/// Whether the sqlite recorder applies its DDL at startup.
pub const CREATE_TABLE: &str = "CREATE_TABLE";

/// A read-only view of configuration variables.
///
/// Defaults to empty; [`Environment::from_process`] snapshots the process
/// environment, and `set` exists so tests and embedding applications can
/// configure without touching process state.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the process environment.
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Recorder selection, decoded from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecorderConfig {
    Memory,
    Sqlite { path: PathBuf, create_table: bool },
}

/// Error raised while loading configuration or building infrastructure.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown {variable} value `{topic}`")]
    UnknownTopic {
        variable: &'static str,
        topic: String,
    },
    #[error("{context} requires {missing} to be set")]
    MissingVariable {
        context: &'static str,
        missing: &'static str,
    },
    #[error(
        "invalid boolean `{value}` for {variable}: expected one of \
         y/yes/t/true/on/1 or n/no/f/false/off/0"
    )]
    InvalidBool {
        variable: &'static str,
        value: String,
    },
    #[error("invalid cipher key: {0}")]
    InvalidCipherKey(String),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Parse the accepted truthy/falsy tokens, rejecting everything else.
///
/// # Errors
///
/// Returns [`FactoryError::InvalidBool`] for any other value.
pub fn parse_bool(variable: &'static str, value: &str) -> Result<bool, FactoryError> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        _ => Err(FactoryError::InvalidBool {
            variable,
            value: value.to_string(),
        }),
    }
}

/// The stores and log produced by the factory.
pub struct Infrastructure {
    pub event_store: EventStore,
    /// Present when `IS_SNAPSHOTTING_ENABLED` was truthy.
    pub snapshot_store: Option<SnapshotStore>,
    pub notification_log: NotificationLog,
}

/// Loads configuration once and builds the persistence infrastructure.
pub struct Factory {
    recorder: RecorderConfig,
    snapshotting: bool,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("recorder", &self.recorder)
            .field("snapshotting", &self.snapshotting)
            .field("compressor", &self.compressor.is_some())
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}

impl Factory {
    /// Decode the configuration variables.
    ///
    /// # Errors
    ///
    /// Returns a [`FactoryError`] when a variable has an unknown value, a
    /// malformed boolean, or a required companion variable is missing.
    pub fn from_environment(env: &Environment) -> Result<Self, FactoryError> {
        let recorder = match env.get(INFRASTRUCTURE_FACTORY).unwrap_or("memory") {
            "memory" => RecorderConfig::Memory,
            "sqlite" => {
                let path = env.get(SQLITE_DBNAME).ok_or(FactoryError::MissingVariable {
                    context: "the sqlite recorder",
                    missing: SQLITE_DBNAME,
                })?;
                let create_table = match env.get(CREATE_TABLE) {
                    None => true,
                    Some(value) => parse_bool(CREATE_TABLE, value)?,
                };
                RecorderConfig::Sqlite {
                    path: PathBuf::from(path),
                    create_table,
                }
            }
            other => {
                return Err(FactoryError::UnknownTopic {
                    variable: INFRASTRUCTURE_FACTORY,
                    topic: other.to_string(),
                });
            }
        };

        let snapshotting = match env.get(IS_SNAPSHOTTING_ENABLED) {
            None => false,
            Some(value) => parse_bool(IS_SNAPSHOTTING_ENABLED, value)?,
        };

        let compressor: Option<Arc<dyn Compressor>> = match env.get(COMPRESSOR_TOPIC) {
            None => None,
            Some("zstd") => Some(Arc::new(ZstdCompressor::default())),
            Some(other) => {
                return Err(FactoryError::UnknownTopic {
                    variable: COMPRESSOR_TOPIC,
                    topic: other.to_string(),
                });
            }
        };

        let cipher: Option<Arc<dyn Cipher>> = match env.get(CIPHER_TOPIC) {
            None => None,
            Some("chacha20poly1305") => {
                let key = env.get(CIPHER_KEY).ok_or(FactoryError::MissingVariable {
                    context: "the cipher",
                    missing: CIPHER_KEY,
                })?;
                let key = BASE64
                    .decode(key)
                    .map_err(|e| FactoryError::InvalidCipherKey(e.to_string()))?;
                let cipher = ChaCha20Poly1305Cipher::new(&key)
                    .map_err(|e| FactoryError::InvalidCipherKey(e.to_string()))?;
                Some(Arc::new(cipher))
            }
            Some(other) => {
                return Err(FactoryError::UnknownTopic {
                    variable: CIPHER_TOPIC,
                    topic: other.to_string(),
                });
            }
        };

        Ok(Self {
            recorder,
            snapshotting,
            compressor,
            cipher,
        })
    }

    /// The decoded recorder selection.
    #[must_use]
    pub const fn recorder_config(&self) -> &RecorderConfig {
        &self.recorder
    }

    /// Build the event store, optional snapshot store, and notification log.
    ///
    /// The transcoder, topic registry, and upcaster chain come from the
    /// domain layer; they are fixed here and shared read-only by everything
    /// the factory builds.
    ///
    /// # Errors
    ///
    /// Returns a [`FactoryError`] when the backing store cannot be opened or
    /// its startup DDL fails.
    pub fn build(
        self,
        transcoder: Transcoder,
        registry: TopicRegistry,
        upcasters: UpcasterChain,
    ) -> Result<Infrastructure, FactoryError> {
        let mut mapper = Mapper::new(Arc::new(transcoder), Arc::new(registry))
            .with_upcasters(upcasters);
        if let Some(compressor) = self.compressor {
            mapper = mapper.with_compressor(compressor);
        }
        if let Some(cipher) = self.cipher {
            mapper = mapper.with_cipher(cipher);
        }
        let mapper = Arc::new(mapper);

        let (recorder, snapshot_recorder) = build_recorders(self.recorder, self.snapshotting)?;

        tracing::debug!(
            snapshotting = snapshot_recorder.is_some(),
            "infrastructure constructed"
        );

        Ok(Infrastructure {
            event_store: EventStore::new(mapper.clone(), recorder.clone()),
            snapshot_store: snapshot_recorder
                .map(|snapshots| SnapshotStore::new(mapper, snapshots)),
            notification_log: NotificationLog::new(recorder),
        })
    }
}

type Recorders = (Arc<dyn Recorder>, Option<Arc<dyn SnapshotRecorder>>);

fn build_recorders(config: RecorderConfig, snapshotting: bool) -> Result<Recorders, FactoryError> {
    match config {
        RecorderConfig::Memory => {
            let snapshots: Option<Arc<dyn SnapshotRecorder>> = snapshotting
                .then(|| Arc::new(MemorySnapshotRecorder::new()) as Arc<dyn SnapshotRecorder>);
            Ok((Arc::new(MemoryRecorder::new()), snapshots))
        }
        #[cfg(feature = "sqlite")]
        RecorderConfig::Sqlite { path, create_table } => {
            let recorder = griot_sqlite::SqliteRecorder::open(&path)?;
            if create_table {
                recorder.create_table()?;
            }
            let snapshots: Option<Arc<dyn SnapshotRecorder>> = if snapshotting {
                let snapshots = griot_sqlite::SqliteSnapshotRecorder::open(&path)?;
                if create_table {
                    snapshots.create_table()?;
                }
                Some(Arc::new(snapshots))
            } else {
                None
            };
            Ok((Arc::new(recorder), snapshots))
        }
        #[cfg(not(feature = "sqlite"))]
        RecorderConfig::Sqlite { .. } => Err(FactoryError::UnknownTopic {
            variable: INFRASTRUCTURE_FACTORY,
            topic: "sqlite (feature disabled)".to_string(),
        }),
    }
}
