//! Template system: storage, inheritance resolution and custom specialization
//!
//! Templates are reusable bundles of members that may inherit from a parent
//! template of the same kind. Customs specialize an optional base template
//! through an ordered log of operations.
//!
//! # Example
//!
//! ```text
//! [Template] @Style Theme { color: red; size: 10; }
//!
//! [Custom] @Style Primary {
//!     inherit Theme;
//!     delete color;
//!     weight: bold;
//! }
//! ```

mod error;
mod registry;
mod resolver;
mod specializer;

pub use error::DefinitionError;
pub use registry::{DefId, InsertError, TemplateRegistry};
pub use resolver::{merge_members, resolve_template, TemplateResolver};
pub use specializer::{
    bind_parameters, instantiate, replay_operations, specialize, substitute_placeholders, Replay,
};
