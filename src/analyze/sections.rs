//! ELF section table model and parser.
//!
//! Raw section names vary per platform (`.dram0.bss`, `.flash.text`,
//! `.iram0.vectors`, ...) and are normalized to the four canonical
//! sections the report is organized around. The rule list is ordered:
//! platform names can contain more than one telltale substring (a DRAM
//! region name containing both a data-region prefix and `.bss`), so the
//! more specific RAM patterns must be evaluated first.

use crate::error::{Result, SmaugError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// The four canonical sections flash/RAM accounting is reported against.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SectionKind {
    Text,
    Rodata,
    Data,
    Bss,
}

impl SectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Text => ".text",
            SectionKind::Rodata => ".rodata",
            SectionKind::Data => ".data",
            SectionKind::Bss => ".bss",
        }
    }

    /// Sections whose bytes occupy flash.
    pub fn is_flash(self) -> bool {
        matches!(
            self,
            SectionKind::Text | SectionKind::Rodata | SectionKind::Data
        )
    }

    /// Sections whose bytes occupy RAM at runtime.
    pub fn is_ram(self) -> bool {
        matches!(self, SectionKind::Data | SectionKind::Bss)
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered substring rules mapping raw section names to canonical
/// sections. Order is part of the contract: `.bss` must be matched before
/// `.data` because DRAM-region names can contain both.
const SECTION_RULES: &[(&str, SectionKind)] = &[
    (".bss", SectionKind::Bss),
    (".rodata", SectionKind::Rodata),
    (".data", SectionKind::Data),
    (".text", SectionKind::Text),
    (".iram", SectionKind::Text),
    (".vectors", SectionKind::Text),
];

/// Normalize a raw section name. Returns None for sections that are not
/// flash/RAM-relevant (debug info, comments, symbol tables).
pub fn classify_section_name(raw: &str) -> Option<SectionKind> {
    SECTION_RULES
        .iter()
        .find(|(pattern, _)| raw.contains(pattern))
        .map(|&(_, kind)| kind)
}

/// One symbol retained for reporting, tagged with its component once the
/// classifier has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSymbol {
    pub name: String,
    pub size: u64,
    /// Component label, filled by the classifier; empty until then.
    pub component: String,
}

/// One canonical section: authoritative header size plus the symbols seen
/// inside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySection {
    pub symbols: Vec<SectionSymbol>,
    /// Total size from the section headers, independent of any symbol.
    pub total_size: u64,
    /// Sum of retained symbol sizes; always <= total_size.
    pub symbol_size: u64,
}

/// All canonical sections observed in one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionMap {
    sections: BTreeMap<SectionKind, MemorySection>,
}

impl SectionMap {
    pub fn get(&self, kind: SectionKind) -> Option<&MemorySection> {
        self.sections.get(&kind)
    }

    pub fn get_or_insert(&mut self, kind: SectionKind) -> &mut MemorySection {
        self.sections.entry(kind).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionKind, &MemorySection)> {
        self.sections.iter().map(|(k, v)| (*k, v))
    }

    pub fn total_size(&self, kind: SectionKind) -> u64 {
        self.sections.get(&kind).map_or(0, |s| s.total_size)
    }

    pub fn symbol_size(&self, kind: SectionKind) -> u64 {
        self.sections.get(&kind).map_or(0, |s| s.symbol_size)
    }

    /// RAM bytes the section headers claim but no symbol accounts for.
    pub fn unattributed(&self, kind: SectionKind) -> u64 {
        self.total_size(kind).saturating_sub(self.symbol_size(kind))
    }
}

// `[ 1] .iram0.text    PROGBITS   40080400 00d400 0129df 00 AX 0 0 4`
static RE_SECTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\[\s*\d+\]\s+(\S+)\s+\S+\s+([0-9a-fA-F]+)\s+([0-9a-fA-F]+)\s+([0-9a-fA-F]+)")
        .expect("valid section line regex")
});

/// Parse a section-header listing (`readelf -S` output) into the map,
/// accumulating `total_size` per canonical section.
pub fn parse_section_table(output: &str, sections: &mut SectionMap) -> Result<()> {
    let mut matched_any = false;
    for line in output.lines() {
        let caps = match RE_SECTION_LINE.captures(line) {
            Some(c) => c,
            None => continue,
        };
        matched_any = true;
        let raw_name = &caps[1];
        let size = match u64::from_str_radix(&caps[4], 16) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let kind = match classify_section_name(raw_name) {
            Some(k) => k,
            None => {
                trace!(section = raw_name, "dropping non-canonical section");
                continue;
            }
        };
        sections.get_or_insert(kind).total_size += size;
    }
    if !matched_any {
        return Err(SmaugError::ToolOutput {
            tool: "readelf".to_string(),
            message: "no section header lines recognized".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
There are 24 section headers, starting at offset 0x37e4d0:

Section Headers:
  [Nr] Name              Type            Addr     Off    Size   ES Flg Lk Inf Al
  [ 0]                   NULL            00000000 000000 000000 00      0   0  0
  [ 1] .rtc.text         PROGBITS        400c0000 0374e8 000000 00   W  0   0  1
  [ 2] .iram0.vectors    PROGBITS        40080000 00d000 000400 00  AX  0   0  4
  [ 3] .iram0.text       PROGBITS        40080400 00d400 0129df 00  AX  0   0  4
  [ 4] .dram0.data       PROGBITS        3ffb0000 020000 002c48 00  WA  0   0 16
  [ 5] .dram0.bss        NOBITS          3ffb2c48 022c48 005e30 00  WA  0   0  8
  [ 6] .flash.text       PROGBITS        400d0020 030020 0412cb 00  AX  0   0  4
  [ 7] .flash.rodata     PROGBITS        3f400020 080020 00f94c 00  WA  0   0 16
  [ 8] .debug_info       PROGBITS        00000000 09374c 1b2da0 00      0   0  1
";

    #[test]
    fn parses_and_normalizes_sections() {
        let mut map = SectionMap::default();
        parse_section_table(LISTING, &mut map).unwrap();
        // .iram0.vectors + .iram0.text + .flash.text
        assert_eq!(
            map.total_size(SectionKind::Text),
            0x400 + 0x129df + 0x412cb
        );
        assert_eq!(map.total_size(SectionKind::Rodata), 0xf94c);
        assert_eq!(map.total_size(SectionKind::Data), 0x2c48);
        assert_eq!(map.total_size(SectionKind::Bss), 0x5e30);
    }

    #[test]
    fn debug_sections_are_dropped() {
        let mut map = SectionMap::default();
        parse_section_table(LISTING, &mut map).unwrap();
        let total: u64 = map.iter().map(|(_, s)| s.total_size).sum();
        // .debug_info's 0x1b2da0 must not be counted anywhere.
        assert!(total < 0x1b2da0);
    }

    #[test]
    fn ram_region_bss_classifies_as_bss_not_data() {
        // Contains both a RAM-region prefix with ".data"-adjacent text and
        // ".bss"; the ordered rules must pick .bss.
        assert_eq!(
            classify_section_name(".dram0.data.bss"),
            Some(SectionKind::Bss)
        );
        assert_eq!(classify_section_name(".dram0.bss"), Some(SectionKind::Bss));
        assert_eq!(classify_section_name(".dram0.data"), Some(SectionKind::Data));
    }

    #[test]
    fn unknown_sections_yield_none() {
        assert_eq!(classify_section_name(".debug_line"), None);
        assert_eq!(classify_section_name(".xt.prop"), None);
        assert_eq!(classify_section_name(".symtab"), None);
    }

    #[test]
    fn unparsable_listing_is_fatal() {
        let mut map = SectionMap::default();
        let err = parse_section_table("garbage\nmore garbage\n", &mut map).unwrap_err();
        assert!(matches!(err, SmaugError::ToolOutput { .. }));
    }

    #[test]
    fn unattributed_is_header_minus_symbols() {
        let mut map = SectionMap::default();
        let bss = map.get_or_insert(SectionKind::Bss);
        bss.total_size = 500;
        bss.symbol_size = 300;
        assert_eq!(map.unattributed(SectionKind::Bss), 200);
    }
}
