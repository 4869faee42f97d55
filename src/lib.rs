#![doc = include_str!("../README.md")]

pub use griot_core::{
    aggregate,
    aggregate::Aggregate,
    codec, event,
    event::{DomainEvent, Notification, StoredEvent},
    mapper,
    mapper::{Mapper, TopicRegistry},
    notification,
    notification::{NotificationLog, Section},
    repository,
    repository::Repository,
    snapshot, transcoder,
    transcoder::{Transcoder, Value},
    upcast,
    upcast::UpcasterChain,
};

pub mod store {
    pub use griot_core::{
        recorder::{
            PersistenceError, RecordConflictError, Recorder, RecorderError, SnapshotRecorder,
            memory,
        },
        snapshot::SnapshotStore,
        store::{EventStore, Events, StoreError},
    };

    #[cfg(feature = "sqlite")]
    pub mod sqlite {
        pub use griot_sqlite::{SqliteRecorder, SqliteSnapshotRecorder};
    }
}

pub mod factory;

pub use factory::{Environment, Factory, Infrastructure};
