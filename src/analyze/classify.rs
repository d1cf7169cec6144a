//! Multi-stage symbol-to-component classification.
//!
//! Every retained symbol runs through an ordered rule chain; the first
//! stage that produces a label wins. The chain is, in order: component
//! class-name check, component namespace check, plain core-namespace
//! check, exact library-map lookup, the ordered heuristic tables (raw
//! name first, then demangled), narrow special cases, and finally the
//! `other` fallback. The order is part of the contract.

use super::patterns::{
    component_class_variants, is_known_component, CORE_NAMESPACE, DEMANGLED_SYMBOL_PATTERNS,
    KNOWN_COMPONENTS, RAW_SYMBOL_PATTERNS,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Label of the fallback bucket.
pub const OTHER: &str = "other";
/// Label of first-party runtime code with no component namespace.
pub const CORE: &str = "core";

pub fn esphome_label(component: &str) -> String {
    format!("[esphome]{component}")
}

pub fn external_label(component: &str) -> String {
    format!("[external]{component}")
}

pub fn lib_label(library: &str) -> String {
    format!("[lib]{library}")
}

static RE_COMPONENT_NS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"esphome::([A-Za-z0-9_]+)::").expect("valid component namespace regex")
});

pub struct Classifier<'a> {
    external_components: &'a BTreeSet<String>,
    /// Exact raw-name to library-name map from the linker map or nm scan.
    symbol_libraries: &'a HashMap<String, String>,
    /// Heuristic category to concretely-discovered library redirects.
    redirects: &'a BTreeMap<String, String>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        external_components: &'a BTreeSet<String>,
        symbol_libraries: &'a HashMap<String, String>,
        redirects: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            external_components,
            symbol_libraries,
            redirects,
        }
    }

    /// Classify one symbol, given its raw and demangled names.
    pub fn classify(&self, raw: &str, demangled: &str) -> String {
        if demangled.contains(CORE_NAMESPACE) {
            // Class names can embed the owning component in a way that
            // would otherwise read as core code (ESPHomeOTAComponent).
            if let Some(label) = self.match_component_class(demangled) {
                return label;
            }
            if let Some(caps) = RE_COMPONENT_NS.captures(demangled) {
                // Components named after keywords carry a trailing
                // underscore in the namespace (switch_).
                let ident = caps[1].trim_end_matches('_');
                if is_known_component(ident) {
                    return esphome_label(ident);
                }
                if self.external_components.contains(ident) {
                    return external_label(ident);
                }
            }
            return CORE.to_string();
        }

        if let Some(library) = self.symbol_libraries.get(raw) {
            return lib_label(library);
        }

        for (category, patterns) in RAW_SYMBOL_PATTERNS {
            if patterns.iter().any(|p| raw.contains(p)) {
                return self.heuristic_label(category);
            }
        }
        for (category, patterns) in DEMANGLED_SYMBOL_PATTERNS {
            if patterns.iter().any(|p| demangled.contains(p)) {
                return self.heuristic_label(category);
            }
        }

        if let Some(label) = self.special_cases(raw) {
            return label;
        }

        OTHER.to_string()
    }

    /// Match the four generated class-name variants of every known and
    /// external component, in registry order, case-insensitively.
    fn match_component_class(&self, demangled: &str) -> Option<String> {
        let haystack = demangled.to_ascii_lowercase();
        for name in KNOWN_COMPONENTS {
            for variant in component_class_variants(name) {
                if haystack.contains(&variant.to_ascii_lowercase()) {
                    return Some(esphome_label(name));
                }
            }
        }
        for name in self.external_components {
            for variant in component_class_variants(name) {
                if haystack.contains(&variant.to_ascii_lowercase()) {
                    return Some(external_label(name));
                }
            }
        }
        None
    }

    /// Prefer a concretely discovered library over the heuristic
    /// category when the redirect map has one.
    fn heuristic_label(&self, category: &str) -> String {
        match self.redirects.get(category) {
            Some(library) => lib_label(library),
            None => lib_label(category),
        }
    }

    fn special_cases(&self, raw: &str) -> Option<String> {
        // The SPI flash driver shares a prefix with the generic SPI bus
        // driver; disambiguate before the generic match.
        if raw.contains("spi_flash") {
            return Some(lib_label("spi_flash"));
        }
        if raw.starts_with("spi_") {
            return Some(lib_label("spi_driver"));
        }
        if printf_scanf_family(raw) {
            return Some(self.heuristic_label("libc"));
        }
        None
    }
}

/// Detect libc printf/scanf family variants (`vsnprintf`, `_svfiprintf_r`)
/// by stripping conventional affixes.
fn printf_scanf_family(name: &str) -> bool {
    let trimmed = name.trim_start_matches('_');
    let trimmed = trimmed.strip_suffix("_r").unwrap_or(trimmed);
    if trimmed.contains('_') || !trimmed.is_ascii() {
        return false;
    }
    trimmed.ends_with("printf") || trimmed.ends_with("scanf")
}
