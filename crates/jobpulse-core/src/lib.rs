mod error;
mod model;

pub use error::CoreError;
pub use model::*;
