//! Reconciler: turns an action bundle into torrent client calls and
//! filesystem changes.
//!
//! Phases run in a fixed order so that links never dangle longer than they
//! must and no data is removed while still linked:
//! 1. remove links
//! 2. remove torrents (their data goes to the trash first)
//! 3. add torrents
//! 4. re-source, relocate, then start or stop torrents
//! 5. add links
//!
//! Empty directories left in the managed tree are pruned at the end.

mod apply;
mod types;

pub use apply::Reconciler;
pub use types::{ApplyReport, PlannedAction, ReconcileError, ReconcileOptions};
