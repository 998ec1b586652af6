//! # airwalk - AX.25/NET-ROM network discovery crawler
//!
//! Starting from a seed list of neighbour node callsigns, `airwalk`
//! opens AX.25 connections, drives each remote station into its BBS
//! command mode, asks for the journal routing list, and records every
//! callsign encountered - together with how it was reached - in a
//! persistent binary state file. Successive runs extend a cumulative
//! graph of the reachable network.
//!
//! The state file is a single append-only image mirrored in memory:
//!
//! - [`image`] - the file mirror, growth allocator, and rollback guard
//! - [`ptr`] - self-relative pointers persisted inside the image, and
//!   offset handles for code outside it
//! - [`list`] - intrusive linked lists walked through those pointers
//! - [`layout`] - record framing for the header and node records
//! - [`state`] - the node graph, callsign index, and pending-work list
//!
//! Discovery runs on a fixed pool of OS threads:
//!
//! - [`queue`] / [`pool`] - blocking task queue and worker pool
//! - [`net`] - the packet-radio stream seam and line reader
//! - [`discovery`] - the BBS dialogue and journal parser
//! - [`crawler`] - seed intake and task fan-out

pub mod callsign;
pub mod config;
pub mod crawler;
pub mod discovery;
pub mod error;
pub mod image;
pub mod layout;
pub mod list;
pub mod net;
pub mod pool;
pub mod ptr;
pub mod queue;
pub mod state;

pub use callsign::Callsign;
pub use crawler::Crawler;
pub use error::{AirwalkError, Result};
pub use image::{AppendGuard, BinaryImage};
pub use pool::{Control, WorkerPool};
pub use ptr::{OffsetPtr, RelPtr};
pub use queue::TaskQueue;
pub use state::StateFile;
