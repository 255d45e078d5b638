//! Offset configuration loading, resolution and validation.
//!
//! Offset files come in two shapes:
//!
//! - Legacy: the five offset keys at the top level.
//! - Versioned: `{ "Version": .., "Arch": { "arm64": {..}, "x64": {..} } }`.
//!
//! [`resolve`] picks the entry that applies to the current architecture and
//! [`validate`] turns it into an [`OffsetConfig`] or reports every missing
//! field at once.

mod offsets;
mod resolver;
mod source;
mod template;

pub use offsets::*;
pub use resolver::*;
pub use source::*;
pub use template::*;
