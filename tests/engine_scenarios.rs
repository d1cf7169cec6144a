//! End-to-end pipeline scenarios against a canned toolchain.

use smaug::analyze::cswtch::CswtchOutcome;
use smaug::analyze::sections::SectionKind;
use smaug::{AnalyzerConfig, MemoryAnalyzer, Result, SmaugError, ToolKind, Toolchain};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

/// Serves fixed listings instead of spawning binutils.
#[derive(Default)]
struct CannedToolchain {
    sections: String,
    symbols: String,
    /// Response for `nm -S --print-file-name` scans.
    file_name_listing: Option<String>,
    /// Mangled name to demangled name, echoing anything unknown.
    demangles: HashMap<String, String>,
}

impl Toolchain for CannedToolchain {
    fn run(&self, tool: ToolKind, args: &[&str]) -> Result<String> {
        match tool {
            ToolKind::SectionLister => Ok(self.sections.clone()),
            ToolKind::SymbolDumper => Ok(self.symbols.clone()),
            ToolKind::SymbolSummarizer => {
                if args.contains(&"--print-file-name") {
                    if let Some(listing) = &self.file_name_listing {
                        return Ok(listing.clone());
                    }
                }
                Err(SmaugError::ToolFailed {
                    tool: tool.to_string(),
                    message: "no canned response".to_string(),
                })
            }
            ToolKind::Demangler => Err(SmaugError::ToolFailed {
                tool: tool.to_string(),
                message: "demangler runs over stdin".to_string(),
            }),
        }
    }

    fn run_with_input(&self, _tool: ToolKind, _args: &[&str], input: &str) -> Result<String> {
        let out: Vec<&str> = input
            .lines()
            .map(|line| self.demangles.get(line).map(String::as_str).unwrap_or(line))
            .collect();
        Ok(out.join("\n") + "\n")
    }
}

const SECTIONS: &str = "\
Section Headers:
  [Nr] Name              Type            Addr     Off    Size   ES Flg Lk Inf Al
  [ 1] .text             PROGBITS        400d0000 000034 0003e8 00  AX  0   0  4
  [ 2] .rodata           PROGBITS        3f400020 080020 000100 00   A  0   0 16
  [ 3] .bss              NOBITS          3ffb0000 020000 0001f4 00  WA  0   0  8
";

const SYMBOLS: &str = "\
SYMBOL TABLE:
400d0000 g     F .text\t000000c8 _ZN7esphome4core8HelperFnEv
400d00c8 g     F .text\t00000320 _ZN7esphome3foo6workEv
3ffb0000 g     O .bss\t0000012c s_scratch_buffer
";

fn scenario_toolchain() -> CannedToolchain {
    let mut demangles = HashMap::new();
    demangles.insert(
        "_ZN7esphome4core8HelperFnEv".to_string(),
        "esphome::core::HelperFn()".to_string(),
    );
    demangles.insert(
        "_ZN7esphome3foo6workEv".to_string(),
        "esphome::foo::work()".to_string(),
    );
    CannedToolchain {
        sections: SECTIONS.to_string(),
        symbols: SYMBOLS.to_string(),
        file_name_listing: None,
        demangles,
    }
}

fn scenario_config(tmp: &TempDir) -> AnalyzerConfig {
    let elf = tmp.path().join("firmware.elf");
    fs::write(&elf, b"\x7fELF").unwrap();
    let mut config = AnalyzerConfig::for_elf(&elf);
    config.external_components.insert("foo".to_string());
    config
}

#[test]
fn end_to_end_attribution_and_unattributed_ram() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let report = MemoryAnalyzer::new(&config)
        .analyze(&scenario_toolchain())
        .unwrap();

    assert_eq!(report.components["core"].text_size, 200);
    assert_eq!(report.components["[external]foo"].text_size, 800);
    // .bss header claims 500, symbols cover 300.
    assert_eq!(report.unattributed_bss, 200);
    assert_eq!(report.unattributed_data, 0);
    // The bss placeholder matched no rule.
    assert_eq!(report.components["other"].bss_size, 300);
    assert_eq!(report.uncategorized_symbols.len(), 1);
    assert_eq!(report.uncategorized_symbols[0].name, "s_scratch_buffer");
    assert_eq!(report.core_symbols.len(), 1);
}

#[test]
fn analysis_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let toolchain = scenario_toolchain();
    let first = MemoryAnalyzer::new(&config).analyze(&toolchain).unwrap();
    let second = MemoryAnalyzer::new(&config).analyze(&toolchain).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn flash_bytes_are_conserved() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let report = MemoryAnalyzer::new(&config)
        .analyze(&scenario_toolchain())
        .unwrap();

    let component_flash: u64 = report.components.values().map(|c| c.flash_total()).sum();
    let section_flash: u64 = [SectionKind::Text, SectionKind::Rodata, SectionKind::Data]
        .iter()
        .map(|k| report.sections.symbol_size(*k))
        .sum();
    assert_eq!(component_flash, section_flash);
}

#[test]
fn missing_elf_is_fatal() {
    let config = AnalyzerConfig::for_elf("/definitely/not/here.elf");
    let err = MemoryAnalyzer::new(&config)
        .analyze(&scenario_toolchain())
        .unwrap_err();
    assert!(matches!(err, SmaugError::MissingInput(_)));
}

#[test]
fn unparsable_section_listing_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let mut toolchain = scenario_toolchain();
    toolchain.sections = "not readelf output".to_string();
    let err = MemoryAnalyzer::new(&config).analyze(&toolchain).unwrap_err();
    assert!(matches!(err, SmaugError::ToolOutput { .. }));
}

#[test]
fn duplicate_address_counted_once_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let config = scenario_config(&tmp);
    let mut toolchain = scenario_toolchain();
    toolchain.symbols = "\
SYMBOL TABLE:
400d0000 g     F .text\t00000040 _ZN7esphome3fooC1Ev
400d0000 g     F .text\t00000040 _ZN7esphome3fooC2Ev
"
    .to_string();
    toolchain.demangles.clear();
    let report = MemoryAnalyzer::new(&config).analyze(&toolchain).unwrap();
    let total: u64 = report.components.values().map(|c| c.text_size).sum();
    assert_eq!(total, 0x40);
}

fn cswtch_setup(
    tmp: &TempDir,
    object_rel_paths: &[&str],
) -> (AnalyzerConfig, CannedToolchain, Vec<String>) {
    let mut config = scenario_config(tmp);
    let build_dir = tmp.path().join("build");
    let mut listing = String::new();
    let mut object_paths = Vec::new();
    for rel in object_rel_paths {
        let path = build_dir.join("src").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"obj").unwrap();
        listing.push_str(&format!("{}:00000000 00000040 r CSWTCH$7\n", path.display()));
        object_paths.push(path.display().to_string());
    }
    config.build_dir = Some(build_dir);

    let mut toolchain = scenario_toolchain();
    toolchain.symbols = "\
SYMBOL TABLE:
400d0000 g     F .text\t000000c8 _ZN7esphome4core8HelperFnEv
3f400020 l     O .rodata\t00000040 CSWTCH$7
"
    .to_string();
    toolchain.file_name_listing = Some(listing);
    (config, toolchain, object_paths)
}

#[test]
fn unique_cswtch_candidate_moves_bytes_to_component() {
    let tmp = TempDir::new().unwrap();
    let (config, toolchain, _paths) = cswtch_setup(&tmp, &["esphome/components/wifi/table.o"]);
    let report = MemoryAnalyzer::new(&config).analyze(&toolchain).unwrap();

    assert_eq!(report.components["[esphome]wifi"].rodata_size, 0x40);
    assert_eq!(
        report.components.get("other").map(|c| c.rodata_size).unwrap_or(0),
        0
    );
    assert_eq!(report.cswtch_resolutions.len(), 1);
    assert!(matches!(
        report.cswtch_resolutions[0].outcome,
        CswtchOutcome::Resolved { .. }
    ));
    // Reattribution conserves flash bytes.
    let component_flash: u64 = report.components.values().map(|c| c.flash_total()).sum();
    assert_eq!(component_flash, 0xc8 + 0x40);
}

#[test]
fn ambiguous_cswtch_stays_in_other() {
    let tmp = TempDir::new().unwrap();
    let (config, toolchain, _paths) = cswtch_setup(
        &tmp,
        &[
            "esphome/components/wifi/table.o",
            "esphome/components/ota/table.o",
        ],
    );
    let report = MemoryAnalyzer::new(&config).analyze(&toolchain).unwrap();

    assert_eq!(report.components["other"].rodata_size, 0x40);
    assert!(report.components.get("[esphome]wifi").is_none());
    assert!(matches!(
        report.cswtch_resolutions[0].outcome,
        CswtchOutcome::Ambiguous { .. }
    ));
}
