//! In-crate test suites
//!
//! - `common`: fixtures shared across suites
//! - `mocks`: gateway doubles (mockall and hand-rolled)
//! - `unit`: controller and flow behaviour
//! - `property`: proptest invariants for navigation and submission
