//! A conformance validator for CLAP audio plugins.
//!
//! The validator acts as a minimal host: it loads a plugin library, drives
//! plugins through the full activation/processing/state lifecycle, injects
//! adversarial inputs (bogus IDs, wrong-namespace parameter events,
//! tiny-chunk state streams, random parameter permutations), and checks that
//! the observable behaviour matches the CLAP ABI contract.
//!
//! Plugins run inside the validator's own process. A plugin that crashes
//! takes the validator down with it; catching that is out of scope here.
//!
//! ## Usage
//!
//! ```ignore
//! use clap_validator::validator::{validate, ValidatorSettings};
//!
//! let settings = ValidatorSettings {
//!     paths: vec!["/path/to/plugin.clap".into()],
//!     ..Default::default()
//! };
//! let tally = validate(&settings);
//! std::process::exit(if tally.has_failures() { 1 } else { 0 });
//! ```

pub mod error;
pub use error::{Result, ValidatorError};

pub mod discovery;
pub mod host;
pub mod instance;
pub mod library;
pub mod process;
pub mod report;
pub mod stream;
pub mod suite;
pub mod util;
pub mod validator;

pub use host::{AudioThreadGuard, Host};
pub use instance::{PluginInstance, PluginStatus};
pub use library::{LibraryMetadata, PluginLibrary, PluginMetadata};
pub use suite::{TestCaseInfo, TestFilter, TestResult, TestStatus};
pub use validator::{validate, ValidationTally, ValidatorSettings};
