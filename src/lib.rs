//! Client-side analytics event pipeline.
//!
//! Producers hand typed events to a [`Client`]; a dispatcher task batches
//! them by count, byte size and time, and a bounded pool of uploaders POSTs
//! the batches to the ingestion endpoint with retries. Events accepted
//! before [`Client::close`] returns are guaranteed an upload attempt, and
//! per-event outcomes are observable through the [`Callback`] trait.
//!
//! The [`objstore`] module hosts the alternate sink that writes gzip NDJSON
//! objects through a caller-supplied [`objstore::ObjectStore`] instead of
//! POSTing JSON.

#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod objstore;
pub mod sender;

pub use client::{Callback, Client, StatsSnapshot};
pub use config::{Config, NowFn, RetryAfterFn, SaturationPolicy, UidFn};
pub use error::{ConfigError, Error, FieldError};
pub use event::{
    Alias, AppInfo, Context, Event, GenericEvent, Group, Identify, Integrations, LibraryInfo,
    Page, Properties, Screen, Timestamp, Track, Traits,
};
pub use sender::RetryPolicy;

/// Library name reported in the batch context.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library version reported in the batch context and the user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
