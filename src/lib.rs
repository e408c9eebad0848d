//! Workspace root for the MediaForge orchestration core.
//!
//! This crate carries no library code of its own — `mediaforge-shared` and
//! `mediaforge-orchestration` hold the actual implementation. The root crate
//! exists to host end-to-end tests that exercise both crates together (see
//! `tests/`), mirroring how the teacher workspace keeps its root package thin
//! and reserves it for cross-crate integration coverage.
