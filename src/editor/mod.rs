//! Building card records from form input and saving them to the write endpoint.

mod record;
mod save;

pub use record::{parse_assignment, FormValues, Selection};
pub use save::{SaveAction, SaveClient, SaveOutcome};
