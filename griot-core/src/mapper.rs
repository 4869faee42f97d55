//! Translation between domain events and stored records.
//!
//! The [`Mapper`] owns the codec pipeline. On write the order is fixed:
//! transcode, then compress, then encrypt. On read the inverse chain runs,
//! decrypting strictly before decompressing so that only ciphertexts of
//! bounded, authenticated length ever reach the decompressor.
//!
//! The mapper also owns the [`TopicRegistry`]: the startup-time mapping from
//! topic strings to their current schema version. Encoding always writes the
//! current version; decoding applies the upcaster chain first and rejects
//! any post-upcast record whose topic is not registered.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    codec::{Cipher, Compressor, IntegrityError},
    event::{DomainEvent, StoredEvent},
    transcoder::{Transcoder, TranscodingError, Value},
    upcast::{UpcasterChain, VERSION_KEY},
};

/// Reserved state key carrying the event's creation time on the wire.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Startup-time mapping from topic strings to event types.
///
/// In a dynamic language the topic would be resolved by runtime import; here
/// the domain layer registers every topic it can produce or replay, together
/// with that topic's current schema version. The registry is read-only after
/// construction.
#[derive(Clone, Debug, Default)]
pub struct TopicRegistry {
    topics: std::collections::HashMap<String, u64>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic at its current schema version (1 for a topic that
    /// has never evolved).
    pub fn register(&mut self, topic: impl Into<String>, current_version: u64) {
        self.topics.insert(topic.into(), current_version.max(1));
    }

    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    #[must_use]
    pub fn current_version(&self, topic: &str) -> Option<u64> {
        self.topics.get(topic).copied()
    }
}

/// Error raised while mapping between domain events and stored records.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error(transparent)]
    Transcoding(#[from] TranscodingError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Composes the transcoder, optional compressor, and optional cipher into
/// the record pipeline.
///
/// Built once at application construction, read-only afterwards, and
/// shareable across threads.
#[derive(Clone)]
pub struct Mapper {
    transcoder: Arc<Transcoder>,
    registry: Arc<TopicRegistry>,
    upcasters: UpcasterChain,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl Mapper {
    #[must_use]
    pub fn new(transcoder: Arc<Transcoder>, registry: Arc<TopicRegistry>) -> Self {
        Self {
            transcoder,
            registry,
            upcasters: UpcasterChain::new(),
            compressor: None,
            cipher: None,
        }
    }

    #[must_use]
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    #[must_use]
    pub fn with_upcasters(mut self, upcasters: UpcasterChain) -> Self {
        self.upcasters = upcasters;
        self
    }

    /// Encode a domain event into a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodingError::UnknownTopic`] when the event's topic is
    /// not registered, or a transcoding/codec error from the pipeline.
    pub fn to_stored(&self, event: &DomainEvent) -> Result<StoredEvent, MapperError> {
        let current_version = self.registry.current_version(&event.topic).ok_or_else(|| {
            TranscodingError::UnknownTopic {
                topic: event.topic.clone(),
            }
        })?;

        let mut state = event.state.clone();
        state.insert(TIMESTAMP_KEY.to_string(), Value::custom(event.timestamp));
        if current_version > 1 {
            state.insert(VERSION_KEY.to_string(), Value::Int(current_version as i64));
        }

        let mut bytes = self.transcoder.encode(&Value::Map(state))?;
        if let Some(compressor) = &self.compressor {
            bytes = compressor.encode(&bytes)?;
        }
        if let Some(cipher) = &self.cipher {
            bytes = cipher.encode(&bytes)?;
        }

        Ok(StoredEvent {
            originator_id: event.originator_id,
            originator_version: event.originator_version,
            topic: event.topic.clone(),
            state: bytes,
        })
    }

    /// Decode a stored record into a domain event, upcasting it first.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError`] when the cipher tag fails, decompression
    /// fails, or an upcaster refuses the record;
    /// [`TranscodingError::UnknownTopic`] when the post-upcast topic is not
    /// registered; or any other transcoding failure.
    pub fn to_domain(&self, stored: &StoredEvent) -> Result<DomainEvent, MapperError> {
        let mut bytes = stored.state.clone();
        if let Some(cipher) = &self.cipher {
            bytes = cipher.decode(&bytes)?;
        }
        if let Some(compressor) = &self.compressor {
            bytes = compressor.decode(&bytes)?;
        }

        let Value::Map(state) = self.transcoder.decode(&bytes)? else {
            return Err(IntegrityError::new("record state is not a mapping").into());
        };

        let (mut state, topic) = self.upcasters.apply(state, stored.topic.clone())?;
        if !self.registry.contains(&topic) {
            return Err(TranscodingError::UnknownTopic { topic }.into());
        }
        state.remove(VERSION_KEY);

        let timestamp = match state.remove(TIMESTAMP_KEY) {
            Some(value) => value
                .downcast_ref::<chrono::DateTime<chrono::Utc>>()
                .copied()
                .ok_or_else(|| IntegrityError::new("record timestamp has the wrong type"))?,
            None => return Err(IntegrityError::new("record is missing its timestamp").into()),
        };

        Ok(DomainEvent {
            originator_id: stored.originator_id,
            originator_version: stored.originator_version,
            timestamp,
            topic,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use uuid::Uuid;

    use super::*;
    use crate::codec::{ChaCha20Poly1305Cipher, ZstdCompressor};

    const TOPIC: &str = "thing.happened";

    fn registry() -> Arc<TopicRegistry> {
        let mut registry = TopicRegistry::new();
        registry.register(TOPIC, 1);
        Arc::new(registry)
    }

    fn sample_event() -> DomainEvent {
        let mut state = BTreeMap::new();
        state.insert("what".to_string(), Value::from("dinosaurs"));
        DomainEvent::new(Uuid::new_v4(), 1, TOPIC, state)
    }

    fn pipelines() -> Vec<(&'static str, Mapper)> {
        let transcoder = Arc::new(Transcoder::standard());
        let compressor: Arc<dyn Compressor> = Arc::new(ZstdCompressor::default());
        let key = ChaCha20Poly1305Cipher::generate_key(32);
        let cipher: Arc<dyn Cipher> = Arc::new(ChaCha20Poly1305Cipher::new(&key).unwrap());
        vec![
            ("plain", Mapper::new(transcoder.clone(), registry())),
            (
                "compressed",
                Mapper::new(transcoder.clone(), registry()).with_compressor(compressor.clone()),
            ),
            (
                "encrypted",
                Mapper::new(transcoder.clone(), registry()).with_cipher(cipher.clone()),
            ),
            (
                "compressed+encrypted",
                Mapper::new(transcoder, registry())
                    .with_compressor(compressor)
                    .with_cipher(cipher),
            ),
        ]
    }

    #[test]
    fn round_trips_under_every_pipeline_configuration() {
        let event = sample_event();
        for (label, mapper) in pipelines() {
            let stored = mapper.to_stored(&event).unwrap();
            let decoded = mapper.to_domain(&stored).unwrap();
            assert_eq!(decoded, event, "pipeline: {label}");
        }
    }

    #[test]
    fn encrypted_record_does_not_contain_plaintext() {
        let event = sample_event();
        for (label, mapper) in pipelines() {
            let stored = mapper.to_stored(&event).unwrap();
            let leaked = stored
                .state
                .windows(b"dinosaurs".len())
                .any(|window| window == b"dinosaurs");
            if label == "plain" {
                assert!(leaked, "plain records keep the payload readable");
            }
            if label.contains("encrypted") {
                assert!(!leaked, "pipeline {label} leaked plaintext");
            }
        }
    }

    #[test]
    fn unknown_topic_is_rejected_on_encode() {
        let mapper = Mapper::new(Arc::new(Transcoder::standard()), Arc::new(TopicRegistry::new()));
        let error = mapper.to_stored(&sample_event()).unwrap_err();
        assert!(matches!(
            error,
            MapperError::Transcoding(TranscodingError::UnknownTopic { .. })
        ));
    }

    #[test]
    fn unknown_topic_is_rejected_on_decode() {
        let mapper = Mapper::new(Arc::new(Transcoder::standard()), registry());
        let stored = mapper.to_stored(&sample_event()).unwrap();
        let bare = Mapper::new(Arc::new(Transcoder::standard()), Arc::new(TopicRegistry::new()));
        let error = bare.to_domain(&stored).unwrap_err();
        assert!(matches!(
            error,
            MapperError::Transcoding(TranscodingError::UnknownTopic { .. })
        ));
    }

    #[test]
    fn tampered_ciphertext_is_rejected_before_decompression() {
        let transcoder = Arc::new(Transcoder::standard());
        let key = ChaCha20Poly1305Cipher::generate_key(32);
        let mapper = Mapper::new(transcoder, registry())
            .with_compressor(Arc::new(ZstdCompressor::default()))
            .with_cipher(Arc::new(ChaCha20Poly1305Cipher::new(&key).unwrap()));
        let mut stored = mapper.to_stored(&sample_event()).unwrap();
        let last = stored.state.len() - 1;
        stored.state[last] ^= 0xff;
        let error = mapper.to_domain(&stored).unwrap_err();
        assert!(matches!(error, MapperError::Integrity(_)));
    }

    #[test]
    fn missing_timestamp_is_an_integrity_error() {
        let transcoder = Transcoder::standard();
        let bytes = transcoder
            .encode(&Value::Map(BTreeMap::new()))
            .unwrap();
        let stored = StoredEvent {
            originator_id: Uuid::new_v4(),
            originator_version: 1,
            topic: TOPIC.to_string(),
            state: bytes,
        };
        let mapper = Mapper::new(Arc::new(transcoder), registry());
        let error = mapper.to_domain(&stored).unwrap_err();
        assert!(matches!(error, MapperError::Integrity(_)));
    }

    #[test]
    fn current_schema_version_is_written_for_evolved_topics() {
        let mut registry = TopicRegistry::new();
        registry.register(TOPIC, 2);
        let transcoder = Arc::new(Transcoder::standard());
        let mapper = Mapper::new(transcoder.clone(), Arc::new(registry));
        let stored = mapper.to_stored(&sample_event()).unwrap();
        let Value::Map(state) = transcoder.decode(&stored.state).unwrap() else {
            panic!("state must decode to a map");
        };
        assert_eq!(state.get(VERSION_KEY), Some(&Value::Int(2)));
    }
}
