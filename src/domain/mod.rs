//! Domain records mirrored from the career platform API.

pub mod entities;
pub mod pagination;
pub mod types;
