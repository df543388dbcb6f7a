mod adaptors;
mod backend;

pub use adaptors::*;
pub use backend::*;
