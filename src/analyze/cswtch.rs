//! Reattribution of compiler-generated switch-table symbols.
//!
//! `CSWTCH$N` symbols are local, so the same name and size can appear in
//! unrelated object files; their name alone carries no component
//! information and initial classification parks them in `other`. This
//! stage scans the build's object files and any vendor-SDK archives for
//! matching name+size candidates and moves the bytes only when exactly
//! one source file matches. Zero or multiple candidates are surfaced as
//! `unknown`/`ambiguous` rather than guessed.

use super::library::LibraryCatalog;
use super::patterns::{is_known_component, CSWTCH_PREFIX};
use super::symtab::ParsedSymbol;
use crate::toolchain::{ToolKind, Toolchain};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of resolving one switch-table symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CswtchOutcome {
    /// Exactly one source file matched; bytes move to this component.
    Resolved { component: String, source: String },
    /// Multiple distinct sources matched; bytes stay in `other`.
    Ambiguous { candidates: Vec<String> },
    /// No source matched, or the unique source mapped to no component.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CswtchResolution {
    pub symbol: String,
    pub size: u64,
    pub outcome: CswtchOutcome,
}

/// `"<name>:<size>"` to candidate source locations, built once from the
/// object/archive scan and consumed once during resolution.
#[derive(Debug, Default)]
pub struct CswtchCandidates {
    by_key: HashMap<String, Vec<(String, u64)>>,
}

impl CswtchCandidates {
    /// Scan loose object files plus SDK archives with a
    /// print-file-name symbol-size listing. Archive members are keyed
    /// `<archive-stem>/<member>`; a member name already seen from
    /// another SDK archive variant is not added again.
    pub fn build(
        object_files: &[PathBuf],
        sdk_archives: &[PathBuf],
        toolchain: &dyn Toolchain,
    ) -> Self {
        let mut candidates = Self::default();
        let mut files: Vec<&PathBuf> = object_files.iter().collect();
        files.extend(sdk_archives.iter());
        if files.is_empty() {
            return candidates;
        }

        let mut args: Vec<String> = vec!["-S".to_string(), "--print-file-name".to_string()];
        args.extend(files.iter().map(|p| p.to_string_lossy().into_owned()));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = match toolchain.run(ToolKind::SymbolSummarizer, &arg_refs) {
            Ok(o) => o,
            Err(e) => {
                debug!(error = %e, "switch-table scan failed; leaving symbols in other");
                return candidates;
            }
        };
        candidates.ingest(&output);
        candidates
    }

    fn ingest(&mut self, nm_output: &str) {
        for line in nm_output.lines() {
            let Some((source, size, name)) = parse_nm_sized_line(line) else {
                continue;
            };
            if !name.starts_with(CSWTCH_PREFIX) {
                continue;
            }
            let key = format!("{name}:{size}");
            let entry = self.by_key.entry(key).or_default();
            if entry.iter().any(|(existing, _)| *existing == source) {
                continue;
            }
            entry.push((source, size));
        }
        debug!(keys = self.by_key.len(), "switch-table candidate map built");
    }

    #[cfg(test)]
    pub fn from_listing(nm_output: &str) -> Self {
        let mut candidates = Self::default();
        candidates.ingest(nm_output);
        candidates
    }

    /// Resolve every `CSWTCH$` symbol present in the ELF.
    pub fn resolve(
        &self,
        elf_symbols: &[ParsedSymbol],
        catalog: &LibraryCatalog,
        external_components: &BTreeSet<String>,
    ) -> Vec<CswtchResolution> {
        let mut resolutions = Vec::new();
        for symbol in elf_symbols {
            if !symbol.name.starts_with(CSWTCH_PREFIX) {
                continue;
            }
            let key = format!("{}:{}", symbol.name, symbol.size);
            let outcome = match self.by_key.get(&key).map(Vec::as_slice) {
                None | Some([]) => CswtchOutcome::Unknown,
                Some([(source, _)]) => {
                    match source_component(source, catalog, external_components) {
                        Some(component) => CswtchOutcome::Resolved {
                            component,
                            source: source.clone(),
                        },
                        None => CswtchOutcome::Unknown,
                    }
                }
                Some(many) => CswtchOutcome::Ambiguous {
                    candidates: many.iter().map(|(s, _)| s.clone()).collect(),
                },
            };
            resolutions.push(CswtchResolution {
                symbol: symbol.name.clone(),
                size: symbol.size,
                outcome,
            });
        }
        resolutions
    }
}

/// Parse one `nm -S --print-file-name` line:
/// `path.o:addr size type name` or `archive.a:member.o:addr size type name`.
fn parse_nm_sized_line(line: &str) -> Option<(String, u64, String)> {
    let colon = line.rfind(':')?;
    let (file_part, rest) = line.split_at(colon);
    let tokens: Vec<&str> = rest[1..].split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    u64::from_str_radix(tokens[0], 16).ok()?;
    let size = u64::from_str_radix(tokens[1], 16).ok()?;
    let name = tokens[3..].join(" ");

    let source = match file_part.rsplit_once(':') {
        Some((archive, member)) => {
            let stem = Path::new(archive)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(archive);
            format!("{stem}/{member}")
        }
        None => file_part.to_string(),
    };
    Some((source, size, name))
}

/// Map a candidate source path to a component label by path segments:
/// `components/<name>/` to the matching known/external component, an
/// `esphome/core` directory to core, a hash-tagged library directory or
/// an archive stem to that library.
pub fn source_component(
    source: &str,
    catalog: &LibraryCatalog,
    external_components: &BTreeSet<String>,
) -> Option<String> {
    let segments: Vec<&str> = source
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    for window in segments.windows(2) {
        if window[0] == "components" {
            let component = window[1];
            if is_known_component(component) {
                return Some(super::classify::esphome_label(component));
            }
            if external_components.contains(component) {
                return Some(super::classify::external_label(component));
            }
        }
        if window[0] == "esphome" && window[1] == "core" {
            return Some(super::classify::CORE.to_string());
        }
    }
    for segment in &segments {
        if let Some(lib) = catalog.dir_to_lib.get(*segment) {
            return Some(super::classify::lib_label(lib));
        }
    }
    // Archive stem from an SDK scan, `libnet80211/ieee80211_sta.o`.
    if let Some(first) = segments.first() {
        if let Some(name) = first.strip_prefix("lib") {
            if !name.is_empty() && !name.chars().all(|c| c.is_ascii_hexdigit()) {
                return Some(super::classify::lib_label(name));
            }
        }
    }
    None
}

/// Gather loose object files under the build's object directory; the
/// stage only proceeds when such files actually exist.
pub fn find_object_files(build_dir: &Path) -> Vec<PathBuf> {
    let src_dir = build_dir.join("src");
    let root = if src_dir.is_dir() { src_dir } else { build_dir.to_path_buf() };
    super::library::collect_objects(&root)
}
