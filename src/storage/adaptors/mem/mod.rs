mod mem_backend;

pub use mem_backend::*;
