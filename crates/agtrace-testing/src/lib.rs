//! Testing infrastructure shared by the runtime, hub, and CLI integration
//! tests: synthetic Claude-format session log generation.

pub mod fixtures;

pub use fixtures::SessionFixture;
