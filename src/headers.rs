// ============================================================================
// headers.rs — C/C++ #include closure resolver (component C)
// ============================================================================
//
// Generalizes the reference tool's `findCPPIncludes`/`parseIncludes`
// (cppfileparser.py) from "filesystem-only, single global cache" to a
// richer resolver: compiler implicit include dirs, a generated-files
// manifest reached through the `/generated` sentinel, and CCImport
// ownership checks, all behind one resolver value instead of
// module-level `cache`/`seen` globals.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ccimport::CCImport;

pub const GENERATED_SENTINEL: &str = "/generated";

/// One entry the generator executor (component E) registers after running
/// a custom command: where its outputs physically live during this run,
/// and (optionally) the edge that produced them.
#[derive(Debug, Clone)]
pub struct GeneratedFileEntry {
    pub ephemeral_root: PathBuf,
    pub producing_edge: Option<crate::graph::BuildRef>,
}

pub type GeneratedFilesManifest = HashMap<String, GeneratedFileEntry>;

#[derive(Debug, Default, Clone)]
pub struct CppIncludes {
    pub found_headers: Vec<(String, String)>,
    pub not_found_headers: Vec<String>,
    pub needed_imports: Vec<Rc<CCImport>>,
    pub needed_generated_files: Vec<(String, String)>,
}

/// Parses the `-I` tokens out of a raw compiler-flags string, the same
/// substring scan as `parseIncludes` in the reference tool (a regex there,
/// a manual scan here since the pattern is just "non-space run after -I").
pub fn parse_include_dirs(flags: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let tokens: Vec<&str> = flags.split_whitespace().collect();
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];
        if let Some(rest) = tok.strip_prefix("-I") {
            if !rest.is_empty() {
                dirs.push(rest.to_string());
            } else if i + 1 < tokens.len() {
                i += 1;
                dirs.push(tokens[i].to_string());
            }
        }
        i += 1;
    }
    dirs
}

fn parse_include_line(line: &str) -> Option<(bool, String)> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("#include")?;
    let rest = rest.trim_start();
    let (open, close) = if rest.starts_with('"') {
        ('"', '"')
    } else if rest.starts_with('<') {
        ('<', '>')
    } else {
        return None;
    };
    let after_open = &rest[1..];
    let end = after_open.find(close)?;
    Some((open == '"', after_open[..end].to_string()))
}

pub struct HeaderResolver {
    implicit_dirs: Vec<String>,
    cc_imports: Vec<Rc<CCImport>>,
    seen: HashSet<(String, String)>,
    cache: HashMap<String, CppIncludes>,
}

impl HeaderResolver {
    pub fn new(implicit_dirs: Vec<String>, cc_imports: Vec<Rc<CCImport>>) -> Self {
        HeaderResolver {
            implicit_dirs,
            cc_imports,
            seen: HashSet::new(),
            cache: HashMap::new(),
        }
    }

    fn owning_import(&self, absolute_path: &str) -> Option<Rc<CCImport>> {
        self.cc_imports
            .iter()
            .find(|ci| ci.owns_header(absolute_path))
            .cloned()
    }

    /// Resolves the transitive `#include` closure of `name`. `include_dirs`
    /// are this compilation's own `-I` flags (as raw dir strings, `/generated`
    /// sentinel entries included verbatim); `ephemeral_root` is set when
    /// `name` itself lives under a generated-output tree, enabling the
    /// generated-file rewriting rule (§4.3 "Generated-file rewriting").
    pub fn resolve(
        &mut self,
        name: &str,
        include_dirs: &[String],
        generated: &GeneratedFilesManifest,
        ephemeral_root: Option<&Path>,
    ) -> CppIncludes {
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }
        let mut acc = CppIncludes::default();
        self.walk(name, include_dirs, generated, ephemeral_root, &mut acc);
        self.cache.insert(name.to_string(), acc.clone());
        acc
    }

    fn walk(
        &mut self,
        name: &str,
        include_dirs: &[String],
        generated: &GeneratedFilesManifest,
        ephemeral_root: Option<&Path>,
        acc: &mut CppIncludes,
    ) {
        let seen_key = (name.to_string(), include_dirs.join(" "));
        if self.seen.contains(&seen_key) {
            return;
        }
        self.seen.insert(seen_key);

        let content = match std::fs::read_to_string(name) {
            Ok(c) => c,
            Err(_) => return,
        };
        let current_dir = Path::new(name)
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        for line in content.lines() {
            let (quoted, file) = match parse_include_line(line) {
                Some(v) => v,
                None => continue,
            };

            if quoted {
                let candidate = current_dir.join(&file);
                if candidate.is_file() {
                    self.record_found(&candidate, "", ephemeral_root, acc);
                    self.walk(
                        &candidate.to_string_lossy(),
                        include_dirs,
                        generated,
                        ephemeral_root,
                        acc,
                    );
                    continue;
                }
            }

            if self.resolve_via_dirs(&file, include_dirs, generated, ephemeral_root, acc) {
                continue;
            }
            if self.resolve_via_implicit(&file, ephemeral_root, acc) {
                continue;
            }
            if generated.contains_key(&file) {
                self.resolve_generated(&file, include_dirs, generated, acc);
                continue;
            }
            if !file.ends_with(".pb.h") {
                acc.not_found_headers.push(file);
            }
        }
    }

    fn resolve_via_dirs(
        &mut self,
        file: &str,
        include_dirs: &[String],
        generated: &GeneratedFilesManifest,
        ephemeral_root: Option<&Path>,
        acc: &mut CppIncludes,
    ) -> bool {
        for d in include_dirs {
            if d.starts_with(GENERATED_SENTINEL) {
                if generated.contains_key(file) {
                    self.resolve_generated(file, include_dirs, generated, acc);
                    return true;
                }
                continue;
            }
            let candidate = Path::new(d).join(file);
            if candidate.is_file() {
                let absolute = candidate.to_string_lossy().to_string();
                if let Some(import) = self.owning_import(&absolute) {
                    if !acc.needed_imports.iter().any(|i| i.name == import.name) {
                        acc.needed_imports.push(import);
                    }
                    return true;
                }
                self.record_found(&candidate, d, ephemeral_root, acc);
                self.walk(&absolute, include_dirs, generated, ephemeral_root, acc);
                return true;
            }
        }
        false
    }

    fn resolve_via_implicit(
        &mut self,
        file: &str,
        _ephemeral_root: Option<&Path>,
        acc: &mut CppIncludes,
    ) -> bool {
        for d in self.implicit_dirs.clone() {
            let candidate = Path::new(&d).join(file);
            if candidate.is_file() {
                let absolute = candidate.to_string_lossy().to_string();
                if let Some(import) = self.owning_import(&absolute) {
                    if !acc.needed_imports.iter().any(|i| i.name == import.name) {
                        acc.needed_imports.push(import);
                    }
                }
                return true;
            }
        }
        false
    }

    fn resolve_generated(
        &mut self,
        file: &str,
        include_dirs: &[String],
        generated: &GeneratedFilesManifest,
        acc: &mut CppIncludes,
    ) {
        acc.needed_generated_files
            .push((file.to_string(), GENERATED_SENTINEL.to_string()));
        if file.ends_with(".pb.h") {
            return;
        }
        if let Some(entry) = generated.get(file) {
            let path = entry.ephemeral_root.join(file);
            let root = entry.ephemeral_root.clone();
            self.walk(
                &path.to_string_lossy(),
                include_dirs,
                generated,
                Some(&root),
                acc,
            );
        }
    }

    fn record_found(
        &self,
        candidate: &Path,
        include_dir: &str,
        ephemeral_root: Option<&Path>,
        acc: &mut CppIncludes,
    ) {
        if let Some(root) = ephemeral_root {
            if let Ok(relative) = candidate.strip_prefix(root) {
                acc.found_headers.push((
                    format!("{GENERATED_SENTINEL}/{}", relative.to_string_lossy()),
                    GENERATED_SENTINEL.to_string(),
                ));
                return;
            }
        }
        acc.found_headers
            .push((candidate.to_string_lossy().to_string(), include_dir.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parse_include_dirs_handles_attached_and_separate_forms() {
        let dirs = parse_include_dirs("-Iinclude -I /usr/local/include -std=c++17");
        assert_eq!(dirs, vec!["include", "/usr/local/include"]);
    }

    #[test]
    fn quoted_include_in_same_directory_is_found() {
        let tmp = std::env::temp_dir().join(format!("hdr-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        write_file(&tmp, "b.h", "");
        let main = write_file(&tmp, "a.cc", "#include \"b.h\"\n");

        let mut resolver = HeaderResolver::new(vec![], vec![]);
        let result = resolver.resolve(&main.to_string_lossy(), &[], &HashMap::new(), None);
        assert_eq!(result.found_headers.len(), 1);
        assert!(result.found_headers[0].0.ends_with("b.h"));

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn missing_header_is_reported_not_found_unless_pb_h() {
        let tmp = std::env::temp_dir().join(format!("hdr-test2-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let main = write_file(
            &tmp,
            "a.cc",
            "#include \"missing.h\"\n#include \"thing.pb.h\"\n",
        );

        let mut resolver = HeaderResolver::new(vec![], vec![]);
        let result = resolver.resolve(&main.to_string_lossy(), &[], &HashMap::new(), None);
        assert_eq!(result.not_found_headers, vec!["missing.h".to_string()]);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn header_owned_by_cc_import_is_routed_to_needed_imports() {
        let tmp = std::env::temp_dir().join(format!("hdr-test3-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let inc_dir = tmp.join("vendor");
        let hdr = write_file(&inc_dir, "lib.h", "");
        let main = write_file(&tmp, "a.cc", "#include \"lib.h\"\n");

        let mut import = CCImport::default();
        import.name = "vendored".to_string();
        import.headers = vec![hdr.to_string_lossy().to_string()];
        let import = Rc::new(import);

        let mut resolver = HeaderResolver::new(vec![], vec![import]);
        let include_dirs = vec![inc_dir.to_string_lossy().to_string()];
        let result = resolver.resolve(&main.to_string_lossy(), &include_dirs, &HashMap::new(), None);
        assert_eq!(result.needed_imports.len(), 1);
        assert_eq!(result.needed_imports[0].name, "vendored");
        assert!(result.found_headers.is_empty());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn cycle_between_two_headers_terminates() {
        let tmp = std::env::temp_dir().join(format!("hdr-test4-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        write_file(&tmp, "a.h", "#include \"b.h\"\n");
        let b = write_file(&tmp, "b.h", "#include \"a.h\"\n");

        let mut resolver = HeaderResolver::new(vec![], vec![]);
        let result = resolver.resolve(&b.to_string_lossy(), &[], &HashMap::new(), None);
        assert!(result.not_found_headers.is_empty());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
