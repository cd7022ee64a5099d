pub mod cache;
pub mod comparator;
pub mod detector;
pub mod engine;
pub mod pool;
pub mod progress;
pub mod scanner;

pub use cache::{hash_file, HashIndex, HASH_INDEX_FILE};
pub use comparator::{DiffResult, FileComparator};
pub use detector::{ChangeDetector, DetectContext, Detection};
pub use engine::{SyncEngine, SyncReport};
pub use progress::{format_bytes, ProgressTracker};
pub use scanner::{FileScanner, ScanConfig};
