//! Configuration for formula_slicer.
//!
//! Compiler defaults live in a TOML settings file; see [`Settings::load`] for
//! the discovery order.

mod settings;

pub use settings::{CompilerSettings, LoggingSettings, Settings, SettingsError, SlicingSettings};
