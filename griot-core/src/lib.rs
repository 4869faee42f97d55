//! Core traits and types for the Griot event-sourcing engine.
//!
//! This crate provides the persistence and replay machinery:
//!
//! - [`transcoder`] - Self-describing value encoding (`Transcoder`, `Value`)
//! - [`codec`] - Optional compression and authenticated encryption
//! - [`mapper`] - Domain event ↔ stored record pipeline (`Mapper`)
//! - [`upcast`] - Backward-compatible schema migration (`UpcasterChain`)
//! - [`event`] - Record types (`DomainEvent`, `StoredEvent`, `Notification`)
//! - [`recorder`] - Storage contracts and in-memory reference stores
//! - [`store`] - Event store facade (`EventStore`)
//! - [`snapshot`] - Snapshot store facade (`SnapshotStore`)
//! - [`aggregate`] - The domain-model seam (`Aggregate`)
//! - [`repository`] - Aggregate reconstruction (`Repository`)
//! - [`notification`] - The global stream in sections (`NotificationLog`)
//!
//! The core is synchronous and blocking: recorder calls are the only
//! suspension points, and parallelism belongs to the caller. Everything
//! constructed at startup (transcoder, registry, upcasters, mapper, stores)
//! is read-only afterwards and freely shareable across threads.
//!
//! Most users should depend on the `griot` crate, which re-exports these
//! types together with the environment-driven infrastructure factory.

pub mod aggregate;
pub mod codec;
pub mod event;
pub mod mapper;
pub mod notification;
pub mod recorder;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod transcoder;
pub mod upcast;
