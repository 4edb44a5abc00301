#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and pure logic for the repowatch daemon.
//!
//! Nothing in this crate performs I/O: the daemon collects partial views,
//! hands them to [`merge::merge`] and compares consecutive snapshots with
//! [`diff::diff`].

pub mod cursor;
pub mod diff;
pub mod merge;
pub mod model;
pub mod source;

mod util;

pub use cursor::{advance_cursors, prune_cursors, CursorMap, ReleaseCursor};
pub use diff::{diff, DeltaEvent};
pub use merge::{merge, partial_views, MergeContext};
pub use model::*;
pub use source::{CollectError, FilePresence, LocalView, RemoteView};
pub use util::{age_in_days, now};
