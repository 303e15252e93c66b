//! Configuration file parsing and validation

pub mod decompile_toml;

pub use decompile_toml::{
    ColorOption, Config, DecompileSection, OutputConfig, OutputFormat, PassesConfig,
};
