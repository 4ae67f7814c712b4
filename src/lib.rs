/// Precliniset Wizard - step-wizard coordination for animal-study workflows
///
/// Drives the randomization and data-import wizards: step navigation with
/// validation gating, accumulated form state, and submission to the
/// Precliniset backend over JSON or multipart HTTP.

pub mod config;
pub mod core;

#[cfg(test)]
mod tests;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
