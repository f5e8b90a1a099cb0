// ============================================================================
// ccimport.rs — CCImport manifest loader (component J, external collaborator)
// ============================================================================
//
// The manifest is treated as opaque and validated by its own author.
// This loader exists only so the core has something to consume; it is a
// small recursive-descent reader over the manifest's `cc_import(...)`
// block syntax, not a general build-file parser.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CCImport {
    pub name: String,
    pub static_library: Option<String>,
    pub shared_library: Option<String>,
    pub system_provided: bool,
    pub headers: Vec<String>,
    pub include_dirs: Vec<String>,
    pub deps: Vec<String>,
    pub skip_wrapping: bool,
    pub location: String,
}

impl CCImport {
    fn new(name: String, location: String) -> Self {
        CCImport {
            name,
            location,
            ..Default::default()
        }
    }

    pub fn owns_header(&self, absolute_path: &str) -> bool {
        self.headers.iter().any(|h| h == absolute_path)
    }
}

fn cleanup_var(raw: &str) -> String {
    raw.replace(['"', '\''], "").replace(',', "").trim().to_string()
}

/// Parses a `glob(["pattern", ...])` literal (possibly spread across the
/// accumulated in-flight value) into the files it matches, relative to
/// `base`.
fn parse_glob_value(base: &Path, raw: &str) -> Vec<String> {
    let start = match raw.find('[') {
        Some(i) => i + 1,
        None => return Vec::new(),
    };
    let end = match raw.rfind(']') {
        Some(i) => i,
        None => return Vec::new(),
    };
    if end <= start {
        return Vec::new();
    }
    raw[start..end]
        .split(',')
        .map(|p| p.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|p| !p.is_empty())
        .flat_map(|pattern| crate::helpers::expand_glob(base, pattern))
        .collect()
}

fn process_value(base: &Path, attr: &str, raw_value: &str, current: &mut CCImport) {
    let mut values = Vec::new();
    let mut in_glob = false;
    let mut glob_buf = String::new();

    for raw_line in raw_value.split('\n') {
        let line = raw_line.trim();
        if line.starts_with("glob([") {
            if line.contains(']') && line.ends_with(')') {
                values.extend(parse_glob_value(base, line));
            } else {
                in_glob = true;
                glob_buf.push_str(line);
            }
            continue;
        }
        if in_glob {
            glob_buf.push('\n');
            glob_buf.push_str(line);
            if line.contains(']') {
                in_glob = false;
                values.extend(parse_glob_value(base, &glob_buf));
                glob_buf.clear();
            }
            continue;
        }
        let trimmed = line.strip_suffix(',').unwrap_or(line);
        for sub in trimmed.split(',') {
            let sub = sub.trim().trim_start_matches('[').trim_end_matches(']');
            let cleaned = cleanup_var(sub);
            if !cleaned.is_empty() {
                values.push(cleaned);
            }
        }
    }
    if in_glob && !glob_buf.is_empty() {
        values.extend(parse_glob_value(base, &glob_buf));
    }

    match attr {
        "deps" => current.deps = values,
        "hdrs" => current.headers = values,
        "includes" => current.include_dirs = values,
        _ => {}
    }
}

/// Parses the manifest's `cc_import(...)` blocks. `location` is recorded on
/// every import as its origin, matching the reference tool forcing
/// `@cpp_ext_libs//` plus a physical on-disk location for glob expansion.
pub fn parse_manifest(raw: &str, path: &Path, location: &str) -> Result<Vec<CCImport>> {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut imports = Vec::new();
    let mut current: Option<CCImport> = None;
    let mut in_block = false;
    let mut inflight_attr: Option<String> = None;
    let mut inflight_value: Option<String> = None;

    let err = |message: String| Error::ManifestParse {
        path: path.to_path_buf(),
        message,
    };

    for (lineno, raw_line) in raw.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with("cc_import(") {
            if in_block {
                return Err(err(format!("line {}: cc_import() while one is already open", lineno + 1)));
            }
            in_block = true;
            continue;
        }

        if line.starts_with(')') {
            if !in_block {
                return Err(err(format!("line {}: closing cc_import() with none open", lineno + 1)));
            }
            in_block = false;
            if let (Some(attr), Some(value)) = (inflight_attr.take(), inflight_value.take()) {
                if let Some(current) = current.as_mut() {
                    process_value(base, &attr, &value, current);
                }
            }
            if let Some(finished) = current.take() {
                imports.push(finished);
            }
            continue;
        }

        if let Some((attribute, value)) = line.split_once('=') {
            let attribute = attribute.trim();
            let value = value.trim();

            if let (Some(attr), Some(pending)) = (inflight_attr.take(), inflight_value.take()) {
                if let Some(current) = current.as_mut() {
                    process_value(base, &attr, &pending, current);
                }
            }

            match attribute {
                "name" => {
                    let name = cleanup_var(value);
                    current = Some(CCImport::new(name, location.to_string()));
                }
                "interface_library" | "shared_library" => {
                    if let Some(current) = current.as_mut() {
                        current.shared_library = Some(cleanup_var(value));
                    }
                }
                "skip_wrapping" => {
                    if let Some(current) = current.as_mut() {
                        current.skip_wrapping = value.trim() == "True";
                    }
                }
                "static_library" | "static_libs" => {
                    if let Some(current) = current.as_mut() {
                        current.static_library = Some(cleanup_var(value));
                    }
                }
                "system_provided" => {
                    if let Some(current) = current.as_mut() {
                        current.system_provided = value.trim() == "True";
                    }
                }
                "deps" | "hdrs" | "includes" => {
                    inflight_attr = Some(attribute.to_string());
                    inflight_value = Some(value.to_string());
                }
                _ => {}
            }
        } else if let Some(pending) = inflight_value.as_mut() {
            pending.push('\n');
            pending.push_str(line);
        }
    }

    if in_block {
        return Err(err("manifest ends with an unclosed cc_import()".to_string()));
    }

    Ok(imports)
}

pub fn load_manifest(path: &Path, location: &str) -> Result<Vec<CCImport>> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path.to_path_buf(), e))?;
    parse_manifest(&raw, path, location)
}

pub fn load_all(paths: &[PathBuf]) -> Result<Vec<CCImport>> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(load_manifest(path, "@cpp_ext_libs//")?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_cc_import() {
        let manifest = r#"
cc_import(
    name = "openssl"
    static_library = "libssl.a"
    hdrs = ["openssl/evp.h", "openssl/ssl.h"]
    includes = ["include"]
)
"#;
        let imports = parse_manifest(manifest, Path::new("/x/imports.bzl"), "@cpp_ext_libs//").unwrap();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].name, "openssl");
        assert_eq!(imports[0].static_library.as_deref(), Some("libssl.a"));
        assert_eq!(imports[0].headers, vec!["openssl/evp.h", "openssl/ssl.h"]);
        assert!(imports[0].owns_header("openssl/evp.h"));
    }

    #[test]
    fn rejects_unbalanced_block() {
        let manifest = "cc_import(\n  name = \"a\"\n";
        let err = parse_manifest(manifest, Path::new("/x/imports.bzl"), "@cpp_ext_libs//");
        assert!(err.is_err());
    }

    #[test]
    fn multiline_list_value_spans_lines() {
        let manifest = r#"
cc_import(
    name = "zlib"
    hdrs = [
        "zlib.h",
        "zconf.h"
    ]
)
"#;
        let imports = parse_manifest(manifest, Path::new("/x/imports.bzl"), "@cpp_ext_libs//").unwrap();
        assert_eq!(imports[0].headers, vec!["zlib.h", "zconf.h"]);
    }
}
