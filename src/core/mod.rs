pub mod diff;
pub mod engine;
pub mod hasher;
pub mod inventory;
pub mod path;
pub mod scanner;

pub use diff::{Diff, DiffEngine, DiffResult, DiffWalk};
pub use engine::{PlannedAction, SyncAction, SyncDirection, SyncEngine, SyncProgress, SyncReport};
pub use hasher::{hash_file, hash_file_async, hash_reader, ContentHasher, BLOCK_SIZE};
pub use inventory::{RemoteInventory, RemoteSnapshot};
pub use path::RelativePath;
pub use scanner::{DirectoryScanner, ExcludeFilter, LocalEntry, ScanConfig, SkipFn};
