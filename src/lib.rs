//! Purpose: Library crate behind the `tailmap` CLI.
//! Exports: `core` (windowed mmap reader, window options, errors).
//! Role: Read-only, bounded view over a file that a separate process keeps appending to.
//! Invariants: The reader never writes to the file and holds at most one mapping.
//! Invariants: Window bytes are only reachable through a borrow of the reader.
pub mod core;
