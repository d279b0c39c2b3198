#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::unwrap_used)]

//! Layered configuration loading for the onionpool supervisor.
//!
//! A single [`sources::ConfigurationSources`] brings together a TOML
//! configuration file (or several, applied in order) with `-o key=value`
//! command-line overrides, while checking file permissions against an
//! [`fs_mistrust::Mistrust`] policy. The result is a [`config::Config`],
//! which the caller deserializes into its own configuration struct.

pub mod cmdline;
mod err;
pub mod mistrust;
pub mod sources;

pub use cmdline::CmdLine;
pub use err::ConfigBuildError;
pub use sources::ConfigurationSources;
