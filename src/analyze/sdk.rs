//! Vendor-SDK static RAM symbol detection.
//!
//! Closed-source SDK archives (WiFi/BT/PHY blobs) keep their static BSS
//! and DATA symbols out of the final ELF symbol table, so their RAM use
//! is invisible to the main accounting. This stage locates the SDK
//! archives from the compiler path, scans each archive's symbol table,
//! and reports the RAM-class symbols the ELF cannot show. A library's
//! local symbols are only trusted when at least one of that library's
//! global RAM symbols is confirmed present in the ELF; an archive that
//! merely sits in the search path without being linked contributes
//! nothing.

use super::sections::SectionKind;
use crate::config::BuildMeta;
use crate::demangle::Demangler;
use crate::toolchain::{ToolKind, Toolchain};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A static SDK symbol contributing RAM but absent from the ELF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkSymbol {
    pub name: String,
    pub size: u64,
    /// Owning archive file name (`libnet80211.a`).
    pub library: String,
    pub section: SectionKind,
    /// Local (file-static) rather than global.
    pub local: bool,
    pub demangled: String,
}

/// Detect the target chip variant from the build's preprocessor defines.
pub fn chip_variant(defines: &[String]) -> Option<String> {
    for define in defines {
        let name = define.split('=').next().unwrap_or(define);
        if let Some(chip) = name.strip_prefix("CONFIG_IDF_TARGET_") {
            if !chip.is_empty() {
                return Some(chip.to_ascii_lowercase());
            }
        }
    }
    if defines.iter().any(|d| d == "ESP32" || d == "USE_ESP32") {
        return Some("esp32".to_string());
    }
    if defines.iter().any(|d| d == "ESP8266" || d == "USE_ESP8266") {
        return Some("esp8266".to_string());
    }
    None
}

/// Derive the SDK library search directories from the build metadata:
/// explicit overrides first, else compiler-path heuristics per target
/// family and chip variant. Only directories that exist are returned.
pub fn discover_sdk_dirs(build: Option<&BuildMeta>) -> Vec<PathBuf> {
    let Some(build) = build else {
        return Vec::new();
    };
    if !build.sdk_lib_dirs.is_empty() {
        return build
            .sdk_lib_dirs
            .iter()
            .filter(|d| d.is_dir())
            .cloned()
            .collect();
    }
    let Some(compiler) = &build.compiler_path else {
        return Vec::new();
    };
    let file_name = compiler
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !file_name.contains("xtensa") && !file_name.contains("riscv32-esp") {
        debug!(compiler = %compiler.display(), "unrecognized toolchain family; no SDK directories");
        return Vec::new();
    }
    // `<root>/bin/xtensa-esp32-elf-gcc` -> root, triple.
    let root = match compiler.parent().and_then(Path::parent) {
        Some(r) => r.to_path_buf(),
        None => return Vec::new(),
    };
    let triple = file_name
        .rsplit_once('-')
        .map(|(prefix, _)| prefix.to_string())
        .unwrap_or_default();

    let chip = chip_variant(&build.defines);
    let mut candidates = vec![root.join("lib")];
    if !triple.is_empty() {
        candidates.push(root.join(&triple).join("lib"));
    }
    if let Some(chip) = &chip {
        candidates.push(root.join("lib").join(chip));
        if !triple.is_empty() {
            candidates.push(root.join(&triple).join("lib").join(chip));
        }
    }
    candidates.retain(|d| d.is_dir());
    debug!(dirs = candidates.len(), chip = ?chip, "SDK library directories");
    candidates
}

/// All `.a` archives under the SDK directories, in deterministic order.
pub fn discover_sdk_archives(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut archives = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("a") {
                archives.push(path);
            }
        }
    }
    archives.sort();
    archives
}

struct RamEntry {
    name: String,
    size: u64,
    section: SectionKind,
    local: bool,
}

/// Scan the SDK archives for RAM-class symbols absent from the ELF,
/// grouped by archive file name. Names are deduplicated across SDK
/// variants (first occurrence wins) and demangled in one batch.
pub fn find_sdk_ram_symbols(
    archives: &[PathBuf],
    elf_symbols: &HashSet<String>,
    toolchain: &dyn Toolchain,
    demangler: &mut Demangler,
) -> BTreeMap<String, Vec<SdkSymbol>> {
    let mut grouped: BTreeMap<String, Vec<SdkSymbol>> = BTreeMap::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    for archive in archives {
        let library = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let path = archive.to_string_lossy();
        let output = match toolchain.run(
            ToolKind::SymbolSummarizer,
            &["-S", "--size-sort", path.as_ref()],
        ) {
            Ok(o) => o,
            Err(e) => {
                debug!(archive = %archive.display(), error = %e, "SDK archive scan failed");
                continue;
            }
        };
        let entries = parse_ram_entries(&output);

        // Linked-in gate: some global RAM symbol of this archive must be
        // visible in the ELF.
        let linked = entries
            .iter()
            .any(|e| !e.local && elf_symbols.contains(&e.name));
        if !linked {
            debug!(archive = %library, "no global RAM symbol present in ELF; skipping archive");
            continue;
        }

        for entry in entries {
            if elf_symbols.contains(&entry.name) {
                continue;
            }
            if !seen_names.insert(entry.name.clone()) {
                continue;
            }
            grouped.entry(library.clone()).or_default().push(SdkSymbol {
                name: entry.name,
                size: entry.size,
                library: library.clone(),
                section: entry.section,
                local: entry.local,
                demangled: String::new(),
            });
        }
    }

    // Largest first within each library.
    for symbols in grouped.values_mut() {
        symbols.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));
    }

    let names: Vec<String> = grouped
        .values()
        .flatten()
        .map(|s| s.name.clone())
        .collect();
    demangler.demangle_all(names.iter().map(String::as_str), toolchain);
    for symbols in grouped.values_mut() {
        for symbol in symbols {
            symbol.demangled = demangler.get(&symbol.name).to_string();
        }
    }
    grouped
}

fn parse_ram_entries(nm_output: &str) -> Vec<RamEntry> {
    let mut entries = Vec::new();
    for line in nm_output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }
        if u64::from_str_radix(tokens[0], 16).is_err() {
            continue;
        }
        let size = match u64::from_str_radix(tokens[1], 16) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let kind = tokens[2];
        if kind.len() != 1 {
            continue;
        }
        let kind = kind.chars().next().unwrap();
        let section = match kind.to_ascii_lowercase() {
            'b' => SectionKind::Bss,
            'd' | 'g' => SectionKind::Data,
            _ => continue,
        };
        entries.push(RamEntry {
            name: tokens[3..].join(" "),
            size,
            section,
            local: kind.is_ascii_lowercase(),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SmaugError};

    struct CannedNm(String);
    impl Toolchain for CannedNm {
        fn run(&self, _tool: ToolKind, _args: &[&str]) -> Result<String> {
            Ok(self.0.clone())
        }
        fn run_with_input(&self, tool: ToolKind, _args: &[&str], _input: &str) -> Result<String> {
            Err(SmaugError::ToolFailed {
                tool: tool.to_string(),
                message: "no demangler".to_string(),
            })
        }
    }

    #[test]
    fn chip_variant_from_idf_target_define() {
        let defines = vec!["CONFIG_IDF_TARGET_ESP32C3".to_string()];
        assert_eq!(chip_variant(&defines), Some("esp32c3".to_string()));
    }

    #[test]
    fn chip_variant_from_bare_defines() {
        assert_eq!(
            chip_variant(&["USE_ESP32".to_string()]),
            Some("esp32".to_string())
        );
        assert_eq!(
            chip_variant(&["ESP8266".to_string()]),
            Some("esp8266".to_string())
        );
        assert_eq!(chip_variant(&["F_CPU=80000000".to_string()]), None);
    }

    #[test]
    fn ram_entries_keep_bss_and_data_only() {
        let output = "\
wl_cnx.o:
00000000 00000104 b s_cnx_state
00000010 00000040 D g_wifi_config
00000020 00000200 T wifi_task_entry
00000030 00000008 r k_rate_table
";
        let entries = parse_ram_entries(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "s_cnx_state");
        assert!(entries[0].local);
        assert_eq!(entries[0].section, SectionKind::Bss);
        assert_eq!(entries[1].name, "g_wifi_config");
        assert!(!entries[1].local);
        assert_eq!(entries[1].section, SectionKind::Data);
    }

    #[test]
    fn unlinked_archive_contributes_nothing() {
        let listing = "\
00000000 00000104 b s_cnx_state
00000010 00000040 D g_wifi_config
";
        let toolchain = CannedNm(listing.to_string());
        let mut demangler = Demangler::new();
        // ELF contains none of the archive's global RAM symbols.
        let elf: HashSet<String> = HashSet::new();
        let grouped = find_sdk_ram_symbols(
            &[PathBuf::from("/sdk/libnet80211.a")],
            &elf,
            &toolchain,
            &mut demangler,
        );
        assert!(grouped.is_empty());
    }

    #[test]
    fn linked_archive_reports_symbols_absent_from_elf() {
        let listing = "\
00000000 00000104 b s_cnx_state
00000010 00000040 D g_wifi_config
";
        let toolchain = CannedNm(listing.to_string());
        let mut demangler = Demangler::new();
        let elf: HashSet<String> = ["g_wifi_config".to_string()].into_iter().collect();
        let grouped = find_sdk_ram_symbols(
            &[PathBuf::from("/sdk/libnet80211.a")],
            &elf,
            &toolchain,
            &mut demangler,
        );
        let symbols = &grouped["libnet80211.a"];
        // The ELF-visible global is excluded; the invisible local stays.
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "s_cnx_state");
        assert!(symbols[0].local);
        assert_eq!(symbols[0].demangled, "s_cnx_state");
    }

    #[test]
    fn duplicate_names_across_variants_keep_first() {
        let listing = "\
00000000 00000104 b s_shared_state
00000010 00000040 D g_cfg
";
        let toolchain = CannedNm(listing.to_string());
        let mut demangler = Demangler::new();
        let elf: HashSet<String> = ["g_cfg".to_string()].into_iter().collect();
        let grouped = find_sdk_ram_symbols(
            &[
                PathBuf::from("/sdk/esp32/libpp.a"),
                PathBuf::from("/sdk/esp32s3/libpp.a"),
            ],
            &elf,
            &toolchain,
            &mut demangler,
        );
        let total: usize = grouped.values().map(Vec::len).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn explicit_sdk_dirs_override_derivation() {
        let build = BuildMeta {
            sdk_lib_dirs: vec![PathBuf::from("/nonexistent/sdk")],
            ..BuildMeta::default()
        };
        // Nonexistent dirs are filtered out rather than scanned.
        assert!(discover_sdk_dirs(Some(&build)).is_empty());
    }
}
