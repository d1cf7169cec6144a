//! ELF symbol table parser.
//!
//! Consumes `objdump -t` style output: one symbol per line as
//! `address flags type section size name`. Only function (`F`) and object
//! (`O`) entries that land in a canonical section are retained. Compilers
//! sometimes emit two aliased constructor/destructor symbols at the same
//! address; the second occurrence of an address is skipped so its bytes
//! are not counted twice.

use super::sections::{classify_section_name, SectionKind, SectionMap, SectionSymbol};
use crate::error::{Result, SmaugError};
use std::collections::HashSet;
use tracing::trace;

/// One retained symbol-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbol {
    pub name: String,
    pub section: SectionKind,
    pub size: u64,
    pub address: u64,
}

/// Parse a symbol-table dump, appending retained symbols to their
/// sections and returning them in input order.
pub fn parse_symbol_table(
    output: &str,
    sections: &mut SectionMap,
) -> Result<Vec<ParsedSymbol>> {
    let mut seen_addresses: HashSet<u64> = HashSet::new();
    let mut retained: Vec<ParsedSymbol> = Vec::new();
    let mut structural_matches = 0usize;

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 5 {
            continue;
        }
        let address = match u64::from_str_radix(tokens[0], 16) {
            Ok(a) => a,
            Err(_) => continue,
        };
        // Locate the F/O type flag among the flag tokens; lines without
        // one are local labels or debug artifacts.
        let type_pos = match tokens[1..]
            .iter()
            .position(|t| *t == "F" || *t == "O")
            .map(|p| p + 1)
        {
            Some(p) => p,
            None => continue,
        };
        if tokens.len() < type_pos + 4 {
            continue;
        }
        structural_matches += 1;

        let raw_section = tokens[type_pos + 1];
        let size = match u64::from_str_radix(tokens[type_pos + 2], 16) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let kind = match classify_section_name(raw_section) {
            Some(k) => k,
            None => continue,
        };
        if !seen_addresses.insert(address) {
            // Aliased ctor/dtor pair at one address; count it once.
            trace!(address, "skipping duplicate address");
            continue;
        }
        // Demangled-looking names can contain spaces; rejoin the tail.
        let name = tokens[type_pos + 3..].join(" ");

        let section = sections.get_or_insert(kind);
        section.symbols.push(SectionSymbol {
            name: name.clone(),
            size,
            component: String::new(),
        });
        section.symbol_size += size;
        retained.push(ParsedSymbol {
            name,
            section: kind,
            size,
            address,
        });
    }

    if structural_matches == 0 {
        return Err(SmaugError::ToolOutput {
            tool: "objdump".to_string(),
            message: "no symbol table lines recognized".to_string(),
        });
    }
    Ok(retained)
}
