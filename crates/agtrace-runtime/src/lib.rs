//! Tokio-driven orchestration over the session store: the Batch Writer, the
//! Incremental Importer, the File Watcher, and workspace Lifecycle
//! sequencing (spec.md §4.E, §4.F, §4.G, §4.K).

pub mod batch;
pub mod config;
mod error;
pub mod importer;
pub mod lifecycle;
pub mod watcher;

pub use batch::{write_batch, ImportBatch, UsageRow};
pub use config::{resolve_workspace_path, Config, PartialRuntimeConfig, RuntimeConfig};
pub use error::{Error, Result};
pub use importer::{ImportRunSummary, Importer};
pub use lifecycle::Runtime;
