//! DroneDB core: a local, content-addressed index and build system for
//! drone datasets, with a distributed push/pull protocol that synchronizes
//! index state against a remote registry (spec §1).
//!
//! This crate is the library core only — the command-line shell, thin
//! language bindings, and the EXIF/GDAL/PDAL library calls are named but
//! external collaborators (spec §1); where this crate needs one of them it
//! exposes a trait (`index::EntryExtractor`, `tiling::RasterTiler`,
//! `tiling::ept::EptReader`, `build::cog::CogBackend`,
//! `build::nexus::NexusBackend`, `build::pointcloud::PointCloudBackend`,
//! `build::thumb::ThumbBackend`) and ships a default implementation that
//! keeps the surrounding machinery (caching, locking, transactions,
//! dispatch) exercisable without the real backend linked in.

pub mod build;
pub mod context;
pub mod db;
pub mod delta;
pub mod entry;
pub mod error;
pub mod geo;
pub mod hashing;
pub mod index;
pub mod meta;
pub mod password;
pub mod pathutils;
pub mod profile;
pub mod registry;
pub mod tags;
pub mod tiling;

pub use context::Context;
pub use error::{DdbError, Result};
pub use index::IndexDatabase;
