//! Utility helpers shared across the Gantry crates.
//!
//! Small, dependency-light building blocks: the resource naming grammar,
//! partial-URL extension for compute resource links, duration-string parsing,
//! and run-id generation. Policy (what a name means, when to extend a link)
//! lives in `gantry-engine`; these modules only answer mechanical questions.

pub mod duration;
pub mod links;
pub mod names;

pub use duration::{DurationParseError, parse_duration};
pub use links::{LinkScope, ParsedLink, UrlTemplate, templates};
pub use names::{is_rfc1035_label, is_valid_project_id, rand_suffix, suffixed_name};
