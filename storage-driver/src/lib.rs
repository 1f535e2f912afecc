//! Storage driver interface shared by the storage backends.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::ReadStream;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
