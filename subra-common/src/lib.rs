mod exception;
mod utils;

pub use utils::BoundedCache;

pub mod prelude;

#[macro_use]
pub(crate) mod macros;
