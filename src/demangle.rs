//! Batched, cached C++ name demangling.
//!
//! Firmware symbol tables routinely carry tens of thousands of mangled
//! names; invoking the demangler once per name is prohibitively slow, so
//! all unresolved names are fed to a single `c++filt` invocation over
//! stdin. When the external tool is unavailable the in-process
//! `cpp_demangle` crate is used instead. Names that fail to demangle are
//! cached as mapping to themselves, so every later lookup is a cache hit.

use crate::toolchain::{ToolKind, Toolchain};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Demangler {
    cache: HashMap<String, String>,
}

impl Demangler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every name not already cached, in one batched tool call.
    pub fn demangle_all<'a, I>(&mut self, names: I, toolchain: &dyn Toolchain)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut pending: Vec<String> = Vec::new();
        for name in names {
            if !self.cache.contains_key(name) && !pending.iter().any(|p| p == name) {
                pending.push(name.to_string());
            }
        }
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "batch demangling symbol names");

        let mut input = pending.join("\n");
        input.push('\n');
        match toolchain.run_with_input(ToolKind::Demangler, &[], &input) {
            Ok(output) => {
                let lines: Vec<&str> = output.lines().collect();
                if lines.len() == pending.len() {
                    for (name, demangled) in pending.iter().zip(lines) {
                        self.cache.insert(name.clone(), demangled.to_string());
                    }
                    return;
                }
                warn!(
                    expected = pending.len(),
                    got = lines.len(),
                    "demangler output line count mismatch; using in-process demangler"
                );
            }
            Err(e) => {
                debug!(error = %e, "demangler tool unavailable; using in-process demangler");
            }
        }

        for name in pending {
            let demangled = demangle_in_process(&name);
            self.cache.insert(name, demangled);
        }
    }

    /// Look up a previously-batched name. Unknown names resolve to
    /// themselves.
    pub fn get<'a>(&'a self, name: &'a str) -> &'a str {
        self.cache.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

fn demangle_in_process(name: &str) -> String {
    if name.starts_with("_Z") {
        if let Ok(sym) = cpp_demangle::Symbol::new(name) {
            return sym.to_string();
        }
    }
    name.to_string()
}
