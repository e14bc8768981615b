pub mod export;
pub mod jsonlines;
pub mod seen_set;

// Re-export common types
pub use export::{create_exporter, run_export, ExportRecord, Exporter, JsonLinesExporter, PostgresExporter};
pub use jsonlines::{JsonLines, TolerantLines};
pub use seen_set::{SeenSet, SeenSetError, SeenSetFactory};
