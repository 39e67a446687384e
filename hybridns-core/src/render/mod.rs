//! Resolver Renderer (C4)
//!
//! Deterministic model-to-bytes rendering of everything the resolver reads:
//! zone files, the RPZ files, and the two top-level `named.conf.*`
//! fragments. Rendering is pure — no filesystem access here, the projection
//! engine (C5) owns writing the bytes out during its `writing` phase.

pub mod config_files;
pub mod rpz;
pub mod serial;
pub mod zonefile;

pub use config_files::{render_named_conf_local, render_named_conf_options};
pub use rpz::render_rpz_file;
pub use serial::next_serial;
pub use zonefile::render_zone_file;
