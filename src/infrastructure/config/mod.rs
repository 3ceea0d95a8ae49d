//! Configuration management infrastructure.
//!
//! Hierarchical configuration via `figment`: programmatic defaults, an
//! optional project TOML file, and `CASYS_PML_`-prefixed environment
//! overrides (`spec.md` §6).

pub mod loader;

pub use loader::ConfigLoader;
