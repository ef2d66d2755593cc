pub mod filesystem;

pub use filesystem::{ProcessStorage, PROCESS_STATUS_FILE};
