//! Client-side mirrors of server-owned entity buckets.
//!
//! A bucket is bootstrapped from paginated binary pages and then kept current
//! by a three-phase commit stream (create, put content, finalize) delivered
//! over a reconnecting duplex link.
//!
//! # Examples
//!
//! Driving a [`core::mirror::BucketMirror`] by hand:
//! ```
//! use bucketsync::{
//!     core::{bucket::BucketSpec, commit::CommitEvent, mirror::BucketMirror},
//!     record::Record,
//! };
//!
//! let mut mirror = BucketMirror::new(BucketSpec::dinos());
//!
//! let mut rex = Record::new();
//! rex.insert("dino_id", "rex");
//! let mut ann = Record::new();
//! ann.insert("dino_id", "ann");
//! mirror.merge_page(vec![rex.clone(), ann]).expect("page");
//!
//! mirror.apply_commit(CommitEvent::create(0, "c1")).expect("create");
//! mirror.apply_commit(CommitEvent::put(0, "c1", rex)).expect("put");
//! let done = mirror.apply_commit(CommitEvent::finalize(0, "c1")).expect("finalize");
//!
//! assert_eq!(mirror.len(), 1);
//! assert_eq!(done.change.removed.len(), 1);
//! ```
//!
//! Wiring the link and the runtime:
//! ```no_run
//! use std::sync::Arc;
//!
//! use bucketsync::{
//!     core::bucket::BucketSpec,
//!     fetch::{PageSource, StaticToken},
//!     runtime::handle::{spawn_sync, SyncConfig},
//!     transport::{handle::spawn_link, link::LinkConfig, tcp::TcpConnector},
//! };
//!
//! async fn run<P: PageSource>(pages: P) -> Result<(), Box<dyn std::error::Error>> {
//!     let link = spawn_link(
//!         TcpConnector::new("127.0.0.1:7000"),
//!         Arc::new(StaticToken("token".to_string())),
//!         LinkConfig::default(),
//!     );
//!     let sync = spawn_sync(link.clone(), Arc::new(pages), SyncConfig::default());
//!     let _key = sync.add_bucket("guild-1", BucketSpec::structures()).await?;
//!
//!     let mut events = sync.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     sync.shutdown().await?;
//!     link.close().await?;
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

/// Mirror state machine, commit protocol, and bootstrap paging.
pub mod core;
/// HTTP and page-source collaborators.
pub mod fetch;
/// Epoch store abstraction and SQLite implementation.
pub mod persist;
/// Decoded values and mirrored records.
pub mod record;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Reconnecting duplex link.
pub mod transport;
/// Shared primitive IDs.
pub mod types;
/// Filtered views over a mirror.
pub mod view;
/// Binary page decoders.
pub mod wire;
