//! The memory-analysis pipeline.
//!
//! One [`MemoryAnalyzer::analyze`] call runs the stages in strict
//! dependency order on a single analysis context: parse the section
//! headers and symbol table (both mandatory), discover third-party
//! libraries and build the symbol-to-library map, batch-demangle, then
//! classify every retained symbol into a component. Two follow-up stages
//! adjust the result: switch-table reattribution moves bytes out of
//! `other` when a unique source object is found, and the SDK scan adds
//! RAM symbols the ELF cannot show. Nothing is shared across runs.

pub mod classify;
pub mod cswtch;
pub mod library;
pub mod patterns;
pub mod sdk;
pub mod sections;
pub mod symtab;

use crate::config::AnalyzerConfig;
use crate::demangle::Demangler;
use crate::error::{Result, SmaugError};
use crate::toolchain::{ToolKind, Toolchain};
use classify::{Classifier, CORE, OTHER};
use cswtch::{CswtchCandidates, CswtchOutcome, CswtchResolution};
use sdk::SdkSymbol;
use sections::{SectionKind, SectionMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Aggregate memory usage for one component label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMemory {
    pub text_size: u64,
    pub rodata_size: u64,
    pub data_size: u64,
    pub bss_size: u64,
    pub symbol_count: u32,
}

impl ComponentMemory {
    /// Bytes occupying flash: code, constants, and initialized-data load
    /// image.
    pub fn flash_total(&self) -> u64 {
        self.text_size + self.rodata_size + self.data_size
    }

    /// Bytes occupying RAM at runtime.
    pub fn ram_total(&self) -> u64 {
        self.data_size + self.bss_size
    }

    fn add(&mut self, kind: SectionKind, size: u64) {
        match kind {
            SectionKind::Text => self.text_size += size,
            SectionKind::Rodata => self.rodata_size += size,
            SectionKind::Data => self.data_size += size,
            SectionKind::Bss => self.bss_size += size,
        }
    }

    fn remove(&mut self, kind: SectionKind, size: u64) {
        match kind {
            SectionKind::Text => self.text_size = self.text_size.saturating_sub(size),
            SectionKind::Rodata => self.rodata_size = self.rodata_size.saturating_sub(size),
            SectionKind::Data => self.data_size = self.data_size.saturating_sub(size),
            SectionKind::Bss => self.bss_size = self.bss_size.saturating_sub(size),
        }
    }
}

/// One symbol as listed in the detailed per-component output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDetail {
    pub name: String,
    pub demangled: String,
    pub size: u64,
}

/// Everything one analysis run produces, consumed by the report/CLI
/// layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryReport {
    /// Component label to memory breakdown.
    pub components: BTreeMap<String, ComponentMemory>,
    /// Canonical section totals and symbols.
    pub sections: SectionMap,
    /// Initialized-RAM bytes no symbol accounts for.
    pub unattributed_data: u64,
    /// Zero-initialized-RAM bytes no symbol accounts for.
    pub unattributed_bss: u64,
    /// Symbols that matched no classification rule.
    pub uncategorized_symbols: Vec<SymbolDetail>,
    /// Core-namespace symbols, for core sub-category breakdowns.
    pub core_symbols: Vec<SymbolDetail>,
    /// Detailed symbol list per component label.
    pub component_symbols: BTreeMap<String, Vec<SymbolDetail>>,
    /// Switch-table resolution records (resolved, ambiguous, unknown).
    pub cswtch_resolutions: Vec<CswtchResolution>,
    /// SDK-only RAM symbols, grouped by library archive.
    pub sdk_symbols: BTreeMap<String, Vec<SdkSymbol>>,
}

/// Single-run, single-threaded analysis driver.
pub struct MemoryAnalyzer<'a> {
    config: &'a AnalyzerConfig,
}

impl<'a> MemoryAnalyzer<'a> {
    pub fn new(config: &'a AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline. Fails only on the fatal inputs: a missing
    /// ELF or an unparsable section/symbol listing.
    pub fn analyze(&self, toolchain: &dyn Toolchain) -> Result<MemoryReport> {
        let config = self.config;
        if !config.elf_path.is_file() {
            return Err(SmaugError::MissingInput(format!(
                "ELF binary not found: {}",
                config.elf_path.display()
            )));
        }
        let elf = config.elf_path.to_string_lossy().into_owned();
        info!(elf = %elf, "starting memory analysis");

        // Mandatory inputs; failure here aborts the run.
        let section_listing = toolchain.run(ToolKind::SectionLister, &["-S", "-W", elf.as_str()])?;
        let mut section_map = SectionMap::default();
        sections::parse_section_table(&section_listing, &mut section_map)?;

        let symbol_listing = toolchain.run(ToolKind::SymbolDumper, &["-t", elf.as_str()])?;
        let symbols = symtab::parse_symbol_table(&symbol_listing, &mut section_map)?;
        debug!(symbols = symbols.len(), "symbol table parsed");

        // Optional inputs; each degrades to no contribution.
        let catalog = library::discover_libraries(
            config.build_dir.as_deref(),
            config.managed_components_dir.as_deref(),
            config.managed_lib_dir.as_deref(),
        );
        let symbol_libraries =
            library::build_symbol_map(&catalog, config.map_path.as_deref(), toolchain);
        let redirects = library::compute_redirects(&catalog);

        let mut demangler = Demangler::new();
        demangler.demangle_all(symbols.iter().map(|s| s.name.as_str()), toolchain);

        let mut report = MemoryReport::default();
        let classifier = Classifier::new(&config.external_components, &symbol_libraries, &redirects);
        let mut labels: Vec<String> = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let demangled = demangler.get(&symbol.name);
            let label = classifier.classify(&symbol.name, demangled);
            let entry = report.components.entry(label.clone()).or_default();
            entry.add(symbol.section, symbol.size);
            entry.symbol_count += 1;

            let detail = SymbolDetail {
                name: symbol.name.clone(),
                demangled: demangled.to_string(),
                size: symbol.size,
            };
            if label == OTHER {
                report.uncategorized_symbols.push(detail.clone());
            } else if label == CORE {
                report.core_symbols.push(detail.clone());
            }
            report
                .component_symbols
                .entry(label.clone())
                .or_default()
                .push(detail);
            labels.push(label);
        }
        tag_section_symbols(&mut section_map, &symbols, &labels);

        // Follow-up stages mutate the totals they own.
        let sdk_dirs = sdk::discover_sdk_dirs(config.build.as_ref());
        let sdk_archives = sdk::discover_sdk_archives(&sdk_dirs);

        if let Some(build_dir) = config.build_dir.as_deref() {
            let objects = cswtch::find_object_files(build_dir);
            if objects.is_empty() {
                debug!("no loose object files; skipping switch-table reattribution");
            } else {
                let candidates = CswtchCandidates::build(&objects, &sdk_archives, toolchain);
                let resolutions =
                    candidates.resolve(&symbols, &catalog, &config.external_components);
                apply_cswtch_resolutions(&mut report, &mut section_map, &resolutions);
                report.cswtch_resolutions = resolutions;
            }
        }

        let elf_names: HashSet<String> = symbols.iter().map(|s| s.name.clone()).collect();
        report.sdk_symbols =
            sdk::find_sdk_ram_symbols(&sdk_archives, &elf_names, toolchain, &mut demangler);

        report.unattributed_data = section_map.unattributed(SectionKind::Data);
        report.unattributed_bss = section_map.unattributed(SectionKind::Bss);
        report.sections = section_map;
        info!(
            components = report.components.len(),
            uncategorized = report.uncategorized_symbols.len(),
            "memory analysis complete"
        );
        Ok(report)
    }
}

/// Fill in the component tag of every section symbol, in the retention
/// order the parser appended them.
fn tag_section_symbols(
    section_map: &mut SectionMap,
    symbols: &[symtab::ParsedSymbol],
    labels: &[String],
) {
    let mut cursors: HashMap<SectionKind, usize> = HashMap::new();
    for (symbol, label) in symbols.iter().zip(labels) {
        let cursor = cursors.entry(symbol.section).or_insert(0);
        let section = section_map.get_or_insert(symbol.section);
        if let Some(slot) = section.symbols.get_mut(*cursor) {
            slot.component = label.clone();
        }
        *cursor += 1;
    }
}

/// Move resolved switch-table bytes from `other` to their component; the
/// net total across all components is conserved.
fn apply_cswtch_resolutions(
    report: &mut MemoryReport,
    section_map: &mut SectionMap,
    resolutions: &[CswtchResolution],
) {
    for resolution in resolutions {
        let CswtchOutcome::Resolved { component, .. } = &resolution.outcome else {
            continue;
        };
        // The symbol sits in `other`; find its section from the tag left
        // during classification.
        let mut moved_kind: Option<SectionKind> = None;
        'outer: for kind in [
            SectionKind::Text,
            SectionKind::Rodata,
            SectionKind::Data,
            SectionKind::Bss,
        ] {
            let section = section_map.get_or_insert(kind);
            for slot in &mut section.symbols {
                if slot.name == resolution.symbol && slot.component == OTHER {
                    slot.component = component.clone();
                    moved_kind = Some(kind);
                    break 'outer;
                }
            }
        }
        let Some(kind) = moved_kind else {
            continue;
        };

        if let Some(other) = report.components.get_mut(OTHER) {
            other.remove(kind, resolution.size);
            other.symbol_count = other.symbol_count.saturating_sub(1);
        }
        let target = report.components.entry(component.clone()).or_default();
        target.add(kind, resolution.size);
        target.symbol_count += 1;

        // Keep the detail lists consistent with the move.
        if let Some(pos) = report
            .uncategorized_symbols
            .iter()
            .position(|d| d.name == resolution.symbol && d.size == resolution.size)
        {
            let detail = report.uncategorized_symbols.remove(pos);
            report
                .component_symbols
                .entry(component.clone())
                .or_default()
                .push(detail);
        }
        if let Some(details) = report.component_symbols.get_mut(OTHER) {
            details.retain(|d| !(d.name == resolution.symbol && d.size == resolution.size));
        }
        debug!(
            symbol = %resolution.symbol,
            component = %component,
            size = resolution.size,
            "reattributed switch table"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_memory_totals() {
        let mut mem = ComponentMemory::default();
        mem.add(SectionKind::Text, 100);
        mem.add(SectionKind::Rodata, 40);
        mem.add(SectionKind::Data, 10);
        mem.add(SectionKind::Bss, 50);
        assert_eq!(mem.flash_total(), 150);
        assert_eq!(mem.ram_total(), 60);
    }

    #[test]
    fn component_memory_remove_saturates() {
        let mut mem = ComponentMemory::default();
        mem.add(SectionKind::Bss, 8);
        mem.remove(SectionKind::Bss, 100);
        assert_eq!(mem.bss_size, 0);
    }

    #[test]
    fn report_serializes_to_json() {
        let mut report = MemoryReport::default();
        report
            .components
            .insert("[esphome]wifi".to_string(), ComponentMemory::default());
        let json = serde_json::to_string(&report).unwrap();
        let back: MemoryReport = serde_json::from_str(&json).unwrap();
        assert!(back.components.contains_key("[esphome]wifi"));
    }
}
