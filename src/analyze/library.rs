//! Third-party library discovery and symbol-to-library attribution.
//!
//! Two discovery passes find the libraries linked into the build: the
//! build system's hash-suffixed library directories (each wrapping one
//! real library directory) and `<vendor>__<name>` managed component
//! directories with archives in a parallel output tree. Symbol
//! attribution then prefers the linker map (covers local and global
//! symbols) and falls back to `nm` over the discovered archives (globals
//! and weaks only; local names can collide across compilation units).

use super::patterns::heuristic_categories;
use crate::error::Result;
use crate::toolchain::{ToolKind, Toolchain};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Below this size a linker map is treated as unusable/stale. A raw byte
/// threshold, kept for compatibility; a valid-but-tiny map would be
/// incorrectly rejected.
pub const MIN_USABLE_MAP_BYTES: u64 = 1024;

/// Hash-suffixed build-system library directory, e.g. `lib9a8`.
static RE_HASH_LIB_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lib[0-9a-f]{3,}$").expect("valid hash dir regex"));

/// Compiler-generated local name that cannot be attributed by name alone:
/// a plain identifier immediately followed by `$` and digits. Mangled
/// names with a `$`-separated optimizer suffix have more structure and do
/// not match.
static RE_LOCAL_NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\$\d+$").expect("valid local name regex"));

/// Everything discovery learned about the build's libraries.
#[derive(Debug, Clone, Default)]
pub struct LibraryCatalog {
    /// Library name to its archive/object files.
    pub files: BTreeMap<String, Vec<PathBuf>>,
    /// Build-tree directory name to library name, for linker-map source
    /// path resolution (`lib9a8` -> `mdns`, `espressif__mdns` -> `mdns`).
    pub dir_to_lib: BTreeMap<String, String>,
}

impl LibraryCatalog {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Resolve a linker-map source path to a library by scanning its
    /// directory components against the discovery table.
    pub fn library_for_path(&self, path: &str) -> Option<&str> {
        for part in Path::new(path).components() {
            if let Some(name) = part.as_os_str().to_str() {
                if let Some(lib) = self.dir_to_lib.get(name) {
                    return Some(lib);
                }
            }
        }
        None
    }
}

/// Discover third-party libraries from the build output tree.
///
/// Missing directories are a degraded-capability condition, not an error:
/// the catalog simply stays empty and no library attributions happen.
pub fn discover_libraries(
    build_dir: Option<&Path>,
    managed_components_dir: Option<&Path>,
    managed_lib_dir: Option<&Path>,
) -> LibraryCatalog {
    let mut catalog = LibraryCatalog::default();

    if let Some(dir) = build_dir {
        discover_hash_dirs(dir, &mut catalog);
    }
    if let Some(dir) = managed_components_dir {
        discover_managed(dir, managed_lib_dir, &mut catalog);
    }
    debug!(libraries = catalog.files.len(), "library discovery complete");
    catalog
}

fn discover_hash_dirs(build_dir: &Path, catalog: &mut LibraryCatalog) {
    let entries = match std::fs::read_dir(build_dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(dir = %build_dir.display(), error = %e, "no build directory; skipping hash-dir discovery");
            return;
        }
    };
    for entry in entries.flatten() {
        let hash_dir = entry.path();
        let dir_name = match hash_dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if !hash_dir.is_dir() || !RE_HASH_LIB_DIR.is_match(&dir_name) {
            continue;
        }
        // The hash directory wraps exactly one subdirectory named after
        // the real library.
        let lib_subdir = match single_subdirectory(&hash_dir) {
            Some(d) => d,
            None => continue,
        };
        let lib_name = match lib_subdir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };

        let files = archive_or_objects(&hash_dir, &lib_subdir, &lib_name);
        if files.is_empty() {
            continue;
        }
        catalog.dir_to_lib.insert(dir_name, lib_name.clone());
        catalog
            .files
            .entry(lib_name)
            .or_default()
            .extend(files);
    }
}

/// Archive preference order: a `.a` matching the library name, else any
/// `.a` in the hash directory, else every `.o` under the library
/// subdirectory (some build flows produce no archive at all).
fn archive_or_objects(hash_dir: &Path, lib_subdir: &Path, lib_name: &str) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(hash_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("a") {
                archives.push(path);
            }
        }
    }
    archives.sort();
    if let Some(matching) = archives.iter().find(|p| {
        p.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s == lib_name || s.strip_prefix("lib") == Some(lib_name))
            .unwrap_or(false)
    }) {
        return vec![matching.clone()];
    }
    if !archives.is_empty() {
        return archives;
    }
    collect_objects(lib_subdir)
}

pub(crate) fn collect_objects(dir: &Path) -> Vec<PathBuf> {
    let mut objects = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("o") {
                objects.push(path);
            }
        }
    }
    objects.sort();
    objects
}

fn single_subdirectory(dir: &Path) -> Option<PathBuf> {
    let mut subdirs = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    if subdirs.len() == 1 {
        subdirs.pop()
    } else {
        None
    }
}

fn discover_managed(
    components_dir: &Path,
    managed_lib_dir: Option<&Path>,
    catalog: &mut LibraryCatalog,
) {
    let entries = match std::fs::read_dir(components_dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(dir = %components_dir.display(), error = %e, "no managed components directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let dir_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if !path.is_dir() {
            continue;
        }
        // `<vendor>__<name>`; the short library name follows the first
        // separator.
        let short = match dir_name.split_once("__") {
            Some((_, short)) if !short.is_empty() => short.to_string(),
            _ => continue,
        };
        catalog.dir_to_lib.insert(dir_name.clone(), short.clone());

        let Some(lib_root) = managed_lib_dir else {
            continue;
        };
        let parallel = lib_root.join(&dir_name);
        let mut archives: Vec<PathBuf> = match std::fs::read_dir(&parallel) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("a"))
                .collect(),
            Err(_) => continue,
        };
        archives.sort();
        if !archives.is_empty() {
            catalog.files.entry(short).or_default().extend(archives);
        }
    }
}

/// Build the symbol-name to library-name map: linker map when usable,
/// `nm` over the discovered archives otherwise. At most one library per
/// symbol; earlier (authoritative) entries are never overwritten.
pub fn build_symbol_map(
    catalog: &LibraryCatalog,
    map_path: Option<&Path>,
    toolchain: &dyn Toolchain,
) -> HashMap<String, String> {
    if let Some(path) = map_path {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() >= MIN_USABLE_MAP_BYTES => {
                match std::fs::read_to_string(path) {
                    Ok(text) => return parse_linker_map(&text, catalog),
                    Err(e) => {
                        warn!(map = %path.display(), error = %e, "failed to read linker map");
                    }
                }
            }
            Ok(meta) => {
                debug!(
                    map = %path.display(),
                    bytes = meta.len(),
                    "linker map below usable-size threshold; falling back to nm"
                );
            }
            Err(e) => {
                debug!(map = %path.display(), error = %e, "linker map not readable");
            }
        }
    }
    nm_symbol_map(catalog, toolchain)
}

const MAP_SECTION_PREFIXES: &[&str] = &[".text.", ".rodata.", ".data.", ".bss.", ".literal."];

/// Parse a GNU ld map: a `.text.<symbol>` section-symbol header line,
/// followed by (or inline with) an address/size/source-path line.
pub fn parse_linker_map(text: &str, catalog: &LibraryCatalog) -> HashMap<String, String> {
    static RE_ADDR_LINE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s+0x[0-9a-fA-F]+\s+0x[0-9a-fA-F]+\s+(\S.*)$")
            .expect("valid map address line regex")
    });

    let mut map: HashMap<String, String> = HashMap::new();
    let mut pending_symbol: Option<String> = None;

    for line in text.lines() {
        if !line.starts_with(' ') {
            pending_symbol = None;
            continue;
        }
        let trimmed = line.trim_start();
        if let Some(symbol) = section_symbol(trimmed) {
            // Header may carry the address/size/path inline.
            let tail_start = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
            let inline = format!(" {}", &trimmed[tail_start..]);
            if let Some(caps) = RE_ADDR_LINE.captures(&inline) {
                record_map_symbol(&mut map, catalog, &symbol, caps[1].trim());
                pending_symbol = None;
            } else {
                pending_symbol = Some(symbol);
            }
            continue;
        }
        if let Some(symbol) = pending_symbol.take() {
            if let Some(caps) = RE_ADDR_LINE.captures(line) {
                record_map_symbol(&mut map, catalog, &symbol, caps[1].trim());
            }
        }
    }
    debug!(symbols = map.len(), "linker map symbol attribution built");
    map
}

/// Extract `<symbol>` from a `.text.<symbol>`-style section-symbol token.
fn section_symbol(line: &str) -> Option<String> {
    let token = line.split_whitespace().next()?;
    for prefix in MAP_SECTION_PREFIXES {
        if let Some(rest) = token.strip_prefix(prefix) {
            if rest.is_empty() {
                return None;
            }
            // `.text.startup.main` style: the symbol is the last segment.
            let symbol = rest.rsplit('.').next().unwrap_or(rest);
            return Some(symbol.to_string());
        }
    }
    None
}

fn record_map_symbol(
    map: &mut HashMap<String, String>,
    catalog: &LibraryCatalog,
    symbol: &str,
    source: &str,
) {
    // Numbered compiler locals collide across compilation units and
    // cannot be attributed by name.
    if RE_LOCAL_NUMBERED.is_match(symbol) {
        return;
    }
    // Strip an archive member suffix: `libmdns.a(mdns.c.o)`.
    let path_part = source.split('(').next().unwrap_or(source);
    if let Some(lib) = catalog.library_for_path(path_part) {
        map.entry(symbol.to_string())
            .or_insert_with(|| lib.to_string());
    }
}

/// `nm` fallback over every discovered archive/object file. Keeps only
/// defined global and weak symbols.
pub fn nm_symbol_map(catalog: &LibraryCatalog, toolchain: &dyn Toolchain) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (lib, files) in &catalog.files {
        for file in files {
            let output = match run_nm(toolchain, file) {
                Ok(o) => o,
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "nm scan failed; skipping file");
                    continue;
                }
            };
            for (name, kind) in parse_nm_defined(&output) {
                if is_global_or_weak(kind) {
                    map.entry(name).or_insert_with(|| lib.clone());
                }
            }
        }
    }
    debug!(symbols = map.len(), "nm fallback symbol attribution built");
    map
}

fn run_nm(toolchain: &dyn Toolchain, file: &Path) -> Result<String> {
    let path = file.to_string_lossy();
    toolchain.run(ToolKind::SymbolSummarizer, &["--defined-only", path.as_ref()])
}

/// Parse `nm` output into (name, type-char) pairs, skipping member
/// headers and undefined entries.
fn parse_nm_defined(output: &str) -> Vec<(String, char)> {
    let mut out = Vec::new();
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            continue;
        }
        if u64::from_str_radix(tokens[0], 16).is_err() {
            continue;
        }
        let kind_token = tokens[1];
        if kind_token.len() != 1 {
            continue;
        }
        let kind = kind_token.chars().next().unwrap();
        out.push((tokens[2..].join(" "), kind));
    }
    out
}

fn is_global_or_weak(kind: char) -> bool {
    (kind.is_ascii_uppercase() && kind != 'U') || kind == 'w' || kind == 'v'
}

/// Compute the heuristic-category to discovered-library redirect map:
/// strip the conventional `_lib` suffix and separators from each category
/// name and find the best-matching discovered library. Exact name match
/// wins, then shortest name, then lexicographic order, so ties resolve
/// identically on every run.
pub fn compute_redirects(catalog: &LibraryCatalog) -> BTreeMap<String, String> {
    let mut redirects = BTreeMap::new();
    for category in heuristic_categories() {
        let base = category
            .strip_suffix("_lib")
            .unwrap_or(category)
            .replace('_', "");
        let mut candidates: Vec<&String> = catalog
            .files
            .keys()
            .filter(|lib| lib.to_ascii_lowercase().contains(&base))
            .collect();
        if candidates.is_empty() {
            continue;
        }
        candidates.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        let best = candidates
            .iter()
            .find(|lib| lib.to_ascii_lowercase() == base)
            .unwrap_or(&candidates[0]);
        redirects.insert(category.to_string(), (*best).clone());
    }
    redirects
}
