//! Core library for the kbox karaoke show server.
//!
//! Two live-update mechanisms sit at the centre of the crate. The
//! [`Broadcaster`] fans a stream of [`Beat`]s produced by the
//! [`HeartbeatGenerator`] out to any number of subscribers without the
//! publisher ever waiting on them. The [`CatalogReloader`] rescans the songs
//! directory on a timer and swaps complete [`Catalog`] snapshots into a
//! [`CatalogHandle`] that request handlers read from.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod reload;
pub mod show;
pub mod song;

pub use broadcast::{Broadcaster, Cursor, Publish, TryRecv};
pub use catalog::{BadRecordPolicy, Catalog, CatalogHandle, SONG_EXTENSION};
pub use config::{AppConfig, HeartbeatConfig, ShowConfig};
pub use error::{KboxError, Result};
pub use heartbeat::{Beat, HeartbeatGenerator, IntervalTicker, ScriptedTicker, Ticker};
pub use reload::{CatalogReloader, ReloaderHandle};
pub use show::ShowState;
pub use song::{LyricLine, Song};
