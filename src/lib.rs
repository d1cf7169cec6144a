//! Smaug: firmware memory-usage analysis for embedded builds.
//!
//! Given a compiled ELF and the build's toolchain metadata, the engine
//! attributes every byte of flash and RAM to the logical component that
//! produced it: a named plugin, a third-party library, the core runtime,
//! or an explicit `other`/`ambiguous` bucket when attribution would be a
//! guess. All binary inspection goes through the textual output of the
//! build toolchain (`readelf`, `objdump`, `nm`, `c++filt`), modeled as a
//! substitutable [`toolchain::Toolchain`] trait.

/// Analysis pipeline: parsers, classifier, library mapping, switch-table
/// reattribution, SDK RAM detection.
pub mod analyze;
/// Run configuration handed in by the build orchestration layer.
pub mod config;
/// Batched, cached C++ demangling.
pub mod demangle;
/// Error types.
pub mod error;
/// Tracing setup.
pub mod logging;
/// Toolchain invocation boundary.
pub mod toolchain;

pub use analyze::{ComponentMemory, MemoryAnalyzer, MemoryReport, SymbolDetail};
pub use config::{AnalyzerConfig, BuildMeta, ToolPaths};
pub use error::{Result, SmaugError};
pub use toolchain::{GnuToolchain, ToolKind, Toolchain};
