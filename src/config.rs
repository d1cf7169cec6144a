//! Configuration for a memory-analysis run.
//!
//! Everything the build-orchestration layer knows about the firmware build
//! is handed to the engine through [`AnalyzerConfig`]: the ELF, the
//! toolchain binaries (explicit or derivable), the build output tree, and
//! the set of externally-declared components. All fields besides the ELF
//! path are optional; missing inputs degrade the matching stage rather
//! than failing the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Default bounded timeout for any single toolchain invocation.
pub const DEFAULT_TOOL_TIMEOUT_SECONDS: u64 = 30;

/// Master configuration for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Path to the firmware ELF. Must exist.
    pub elf_path: PathBuf,
    /// Explicit toolchain binary paths. Unset tools are derived from a
    /// known-good sibling by filename-stem substitution, else resolved
    /// from PATH by bare name.
    pub tools: ToolPaths,
    /// Linker map file, when the build produced one.
    pub map_path: Option<PathBuf>,
    /// Build output directory holding hash-suffixed third-party library
    /// directories and loose object files.
    pub build_dir: Option<PathBuf>,
    /// Parallel build output tree holding `<vendor>__<name>` managed
    /// component archives.
    pub managed_lib_dir: Option<PathBuf>,
    /// Directory of `<vendor>__<name>` managed component sources.
    pub managed_components_dir: Option<PathBuf>,
    /// Build metadata record from the orchestration layer.
    pub build: Option<BuildMeta>,
    /// Externally-declared component names (not in the built-in registry).
    pub external_components: BTreeSet<String>,
    /// Per-invocation timeout for toolchain calls, in seconds.
    pub timeout_seconds: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            elf_path: PathBuf::new(),
            tools: ToolPaths::default(),
            map_path: None,
            build_dir: None,
            managed_lib_dir: None,
            managed_components_dir: None,
            build: None,
            external_components: BTreeSet::new(),
            timeout_seconds: DEFAULT_TOOL_TIMEOUT_SECONDS,
        }
    }
}

impl AnalyzerConfig {
    /// Convenience constructor for the common case: just an ELF path.
    pub fn for_elf(elf_path: impl Into<PathBuf>) -> Self {
        Self {
            elf_path: elf_path.into(),
            ..Self::default()
        }
    }
}

/// Explicit toolchain binary locations, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Section-header lister (`readelf` equivalent).
    pub readelf: Option<PathBuf>,
    /// Symbol-table dumper (`objdump` equivalent).
    pub objdump: Option<PathBuf>,
    /// Symbol summarizer (`nm` equivalent).
    pub nm: Option<PathBuf>,
    /// Name demangler (`c++filt` equivalent).
    pub cxxfilt: Option<PathBuf>,
}

/// Build metadata produced by the orchestration layer alongside the ELF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildMeta {
    /// Cross compiler binary used for the build; SDK library directories
    /// are derived from it per target family.
    pub compiler_path: Option<PathBuf>,
    /// Preprocessor defines active for the build (used to detect the
    /// target chip variant, e.g. `CONFIG_IDF_TARGET_ESP32C3`).
    pub defines: Vec<String>,
    /// Tool-name to path overrides from the build environment.
    pub toolchain_overrides: BTreeMap<String, PathBuf>,
    /// Explicit vendor-SDK library directories; when empty they are
    /// derived from the compiler path per target family.
    pub sdk_lib_dirs: Vec<PathBuf>,
}
