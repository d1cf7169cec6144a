//! Toolchain invocation boundary.
//!
//! The engine never parses binaries itself; it consumes the textual output
//! of the build toolchain's inspection tools. That interaction is modeled
//! as the narrow [`Toolchain`] trait so the whole analysis pipeline can be
//! exercised against canned fixtures, with [`GnuToolchain`] as the real
//! subprocess-spawning implementation. Every invocation is bounded by a
//! timeout; a timed-out or failing call is reported once and never retried.

use crate::config::AnalyzerConfig;
use crate::error::{Result, SmaugError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// The four toolchain roles the engine depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Lists ELF section headers (`readelf -S`).
    SectionLister,
    /// Dumps the ELF symbol table (`objdump -t`).
    SymbolDumper,
    /// Summarizes archive/object symbols (`nm`).
    SymbolSummarizer,
    /// Demangles C++ names (`c++filt`).
    Demangler,
}

impl ToolKind {
    /// Conventional GNU binutils filename stem for this role.
    pub fn stem(self) -> &'static str {
        match self {
            ToolKind::SectionLister => "readelf",
            ToolKind::SymbolDumper => "objdump",
            ToolKind::SymbolSummarizer => "nm",
            ToolKind::Demangler => "c++filt",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stem())
    }
}

/// Narrow interface over external tool execution.
///
/// `run` returns the tool's stdout on success. Implementations must bound
/// each call with a timeout and must not retry failed invocations.
pub trait Toolchain {
    fn run(&self, tool: ToolKind, args: &[&str]) -> Result<String>;

    /// Like `run`, but feeding `input` to the tool's stdin (used for the
    /// batched demangling call).
    fn run_with_input(&self, tool: ToolKind, args: &[&str], input: &str) -> Result<String>;
}

/// Derive a sibling tool path from a known-good toolchain binary by
/// substituting the filename stem after the last `-` (cross-toolchain
/// naming: `xtensa-esp32-elf-gcc` -> `xtensa-esp32-elf-readelf`).
pub fn derive_tool_path(known: &Path, stem: &str) -> PathBuf {
    let file_name = known
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let derived = match file_name.rfind('-') {
        Some(idx) => format!("{}-{}", &file_name[..idx], stem),
        None => stem.to_string(),
    };
    known.with_file_name(derived)
}

/// Real toolchain backed by subprocess invocations of GNU binutils.
pub struct GnuToolchain {
    paths: ResolvedTools,
    timeout: Duration,
    runtime: tokio::runtime::Runtime,
}

#[derive(Debug, Clone)]
struct ResolvedTools {
    readelf: PathBuf,
    objdump: PathBuf,
    nm: PathBuf,
    cxxfilt: PathBuf,
}

impl GnuToolchain {
    /// Resolve tool locations from the config and build a toolchain.
    ///
    /// Resolution order per tool: explicit path, build-metadata override,
    /// derivation from another known tool or the compiler, bare name on
    /// PATH.
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self> {
        let paths = resolve_tools(config);
        debug!(?paths, "resolved toolchain binaries");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SmaugError::Io)?;
        Ok(Self {
            paths,
            timeout: Duration::from_secs(config.timeout_seconds),
            runtime,
        })
    }

    fn path_for(&self, tool: ToolKind) -> &Path {
        match tool {
            ToolKind::SectionLister => &self.paths.readelf,
            ToolKind::SymbolDumper => &self.paths.objdump,
            ToolKind::SymbolSummarizer => &self.paths.nm,
            ToolKind::Demangler => &self.paths.cxxfilt,
        }
    }

    fn run_inner(&self, tool: ToolKind, args: &[&str], input: Option<&str>) -> Result<String> {
        let program = self.path_for(tool).to_path_buf();
        let timeout = self.timeout;
        self.runtime.block_on(async move {
            let mut cmd = tokio::process::Command::new(&program);
            cmd.args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if input.is_some() {
                cmd.stdin(Stdio::piped());
            } else {
                cmd.stdin(Stdio::null());
            }

            let mut child = cmd.spawn().map_err(|e| SmaugError::ToolFailed {
                tool: tool.to_string(),
                message: format!("failed to spawn {}: {}", program.display(), e),
            })?;

            if let Some(text) = input {
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(text.as_bytes())
                        .await
                        .map_err(|e| SmaugError::ToolFailed {
                            tool: tool.to_string(),
                            message: format!("failed to write stdin: {}", e),
                        })?;
                    // Close stdin so the tool sees EOF.
                    drop(pipe);
                }
            }

            let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
            let output = match waited {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(SmaugError::ToolFailed {
                        tool: tool.to_string(),
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    warn!(%tool, timeout_s = timeout.as_secs(), "toolchain call timed out");
                    return Err(SmaugError::Timeout {
                        tool: tool.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(SmaugError::ToolFailed {
                    tool: tool.to_string(),
                    message: format!(
                        "exit status {}: {}",
                        output.status,
                        stderr.lines().next().unwrap_or("")
                    ),
                });
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}

impl Toolchain for GnuToolchain {
    fn run(&self, tool: ToolKind, args: &[&str]) -> Result<String> {
        self.run_inner(tool, args, None)
    }

    fn run_with_input(&self, tool: ToolKind, args: &[&str], input: &str) -> Result<String> {
        self.run_inner(tool, args, Some(input))
    }
}

fn resolve_tools(config: &AnalyzerConfig) -> ResolvedTools {
    let explicit = &config.tools;
    // Any explicitly-known binary can anchor derivation of the others; the
    // compiler path from build metadata works too.
    let anchor: Option<&PathBuf> = explicit
        .readelf
        .as_ref()
        .or(explicit.objdump.as_ref())
        .or(explicit.nm.as_ref())
        .or(explicit.cxxfilt.as_ref())
        .or_else(|| {
            config
                .build
                .as_ref()
                .and_then(|b| b.compiler_path.as_ref())
        });

    let resolve = |kind: ToolKind, own: &Option<PathBuf>| -> PathBuf {
        if let Some(p) = own {
            return p.clone();
        }
        if let Some(build) = &config.build {
            if let Some(p) = build.toolchain_overrides.get(kind.stem()) {
                return p.clone();
            }
        }
        match anchor {
            Some(known) => derive_tool_path(known, kind.stem()),
            None => PathBuf::from(kind.stem()),
        }
    };

    ResolvedTools {
        readelf: resolve(ToolKind::SectionLister, &explicit.readelf),
        objdump: resolve(ToolKind::SymbolDumper, &explicit.objdump),
        nm: resolve(ToolKind::SymbolSummarizer, &explicit.nm),
        cxxfilt: resolve(ToolKind::Demangler, &explicit.cxxfilt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildMeta;

    #[test]
    fn derive_from_cross_compiler() {
        let gcc = Path::new("/opt/tc/bin/xtensa-esp32-elf-gcc");
        assert_eq!(
            derive_tool_path(gcc, "readelf"),
            PathBuf::from("/opt/tc/bin/xtensa-esp32-elf-readelf")
        );
        assert_eq!(
            derive_tool_path(gcc, "c++filt"),
            PathBuf::from("/opt/tc/bin/xtensa-esp32-elf-c++filt")
        );
    }

    #[test]
    fn derive_from_bare_name() {
        assert_eq!(
            derive_tool_path(Path::new("/usr/bin/gcc"), "nm"),
            PathBuf::from("/usr/bin/nm")
        );
    }

    #[test]
    fn resolution_prefers_explicit_then_override_then_anchor() {
        let mut config = AnalyzerConfig::default();
        config.tools.objdump = Some(PathBuf::from("/tc/bin/riscv32-esp-elf-objdump"));
        let mut build = BuildMeta::default();
        build
            .toolchain_overrides
            .insert("nm".to_string(), PathBuf::from("/override/nm"));
        config.build = Some(build);

        let resolved = resolve_tools(&config);
        assert_eq!(
            resolved.objdump,
            PathBuf::from("/tc/bin/riscv32-esp-elf-objdump")
        );
        assert_eq!(resolved.nm, PathBuf::from("/override/nm"));
        // readelf derives from the objdump anchor
        assert_eq!(
            resolved.readelf,
            PathBuf::from("/tc/bin/riscv32-esp-elf-readelf")
        );
    }

    #[test]
    fn resolution_falls_back_to_path_names() {
        let config = AnalyzerConfig::default();
        let resolved = resolve_tools(&config);
        assert_eq!(resolved.readelf, PathBuf::from("readelf"));
        assert_eq!(resolved.cxxfilt, PathBuf::from("c++filt"));
    }
}
