//! # hts_core - High-Throughput Screening Plate Analysis
//!
//! This library models multi-well assay plates and runs analysis protocols
//! over them: normalization, quality statistics, hit classification and
//! Gaussian-process spatial diagnostics.
//!
//! ## Features
//! - Tagged per-well data with any number of replicates per well
//! - Control-based normalization, SSMD, z-factor, p-values
//! - GP spatial model with kernel selection by BIC and closed-form
//!   cross-validation
//! - Protocols validated at load time, executed over plates in parallel
//! - Deterministic synthetic plates (same seed = same plate)

// Doc formatting lints - purely cosmetic, fix incrementally
#![allow(clippy::doc_lazy_continuation)]
// Request structs are built field by field from configs
#![allow(clippy::field_reassign_with_default)]
// Statistics entry points take several control/selection parameters
#![allow(clippy::too_many_arguments)]
// Task enum carries request structs of uneven size
#![allow(clippy::large_enum_variant)]
// Matrix index loops read closer to the math
#![allow(clippy::needless_range_loop)]

pub mod config;
pub mod error;
pub mod gp;
pub mod io;
pub mod plate;
pub mod protocol;
pub mod run;
pub mod simulate;
pub mod stats;

pub use config::PipelineConfig;
pub use error::{ErrorKind, HtsError, Result};
pub use gp::{GpModel, KernelKind};
pub use io::{FileWriter, JsonLoader, Loader, TableFormat, TaggedTable, Writer};
pub use plate::{Coordinate, DataIssue, Plate, PlateDataGrid, PlateLayout, Readout, WellGrid};
pub use protocol::{Protocol, ProtocolTask, TaskKind};
pub use run::{MergeMethod, Run, RunState, TaskListener, TaskRecord};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod scenarios_test;
