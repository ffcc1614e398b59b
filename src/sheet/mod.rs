//! The published inventory sheet: tabular parsing, header-driven schema
//! resolution, filtering and suggestion lists.
//!
//! Everything in here is pure and synchronous.

mod dataset;
mod filter;
mod schema;
mod suggest;

pub use dataset::{Dataset, Row};
pub use filter::{view, CategoryClass, CategoryFilter};
pub use schema::{FieldKey, FieldMap};
pub use suggest::Suggestions;
