//! Decodes one append-only log line into a typed event and recovers
//! structured tool invocations from assistant message bodies.

mod error;

pub mod claude;

pub use claude::{extract_tool_calls, parse_line, ExtractedToolCall, ParsedEvent};
pub use error::{Error, Result};
