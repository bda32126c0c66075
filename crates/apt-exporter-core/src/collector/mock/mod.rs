//! In-memory stand-ins for the host, used by tests.

mod filesystem;
mod lister;

pub use filesystem::MockFs;
pub use lister::MockLister;
