//! Domain types shared by the ingestion pipeline: the Store, the parser,
//! the cost model, the aggregation layer, and the runtime all speak these
//! types instead of raw rows or raw JSON.

mod domain;
mod error;
mod event;
mod project;
mod util;

pub use domain::*;
pub use error::{Error, Result};
pub use event::ChangeEvent;
pub use project::*;
pub use util::*;
