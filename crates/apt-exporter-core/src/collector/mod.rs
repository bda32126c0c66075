//! Access to the host: filesystem state and the package listing command.
//!
//! Everything that touches the real system goes through one of two traits so
//! the refresh and metrics logic can be exercised with in-memory fakes.
//!
//! ```text
//!        RefreshTrigger            AptMetrics            Watcher
//!              │                       │                    │
//!       ┌──────▼──────┐         ┌──────▼──────┐             │
//!       │PackageLister│         │ FileSystem  │◄────────────┘
//!       └──────┬──────┘         └──────┬──────┘
//!        ┌─────┴─────┐           ┌─────┴─────┐
//!   AptLister   MockLister     RealFs     MockFs
//! ```
//!
//! # Testing
//!
//! ```
//! use apt_exporter_core::collector::{FileSystem, MockFs};
//! use std::path::Path;
//!
//! let mut fs = MockFs::new();
//! fs.add_file("/run/reboot-required", "*** System restart required ***\n");
//! assert!(fs.exists(Path::new("/run/reboot-required")));
//! ```

pub mod mock;
pub mod traits;

pub use mock::{MockFs, MockLister};
pub use traits::{AptLister, FileStamp, FileSystem, ListError, PackageLister, RealFs};
