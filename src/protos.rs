// ============================================================================
// protos.rs — `.proto` import closure resolver (component D)
// ============================================================================
//
// Same skeleton as the header resolver (component C): a seen-set guards
// against cycles, a result cache memoizes per-file closures, and lines are
// scanned directly rather than through a full proto grammar. Grounded on
// the reference tool's `protoparser.py::findProtoIncludes`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

/// `(path, include-dir-used)` for a resolved import, or `(name, "@")` for
/// a `google/*` import mapped to the external dependency sentinel.
pub type ProtoEdge = (String, String);

const EXTERNAL_SENTINEL: &str = "@";

fn parse_import_line(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("import")?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

pub struct ProtoResolver {
    seen: HashSet<(String, String)>,
    cache: HashMap<String, Vec<ProtoEdge>>,
}

impl ProtoResolver {
    pub fn new() -> Self {
        ProtoResolver {
            seen: HashSet::new(),
            cache: HashMap::new(),
        }
    }

    /// Resolves the transitive `import "x.proto";` closure of `name`
    /// against `include_dirs`, searched in order for each import.
    pub fn resolve(&mut self, name: &str, include_dirs: &[String]) -> Vec<ProtoEdge> {
        let key = format!("{name} {}", include_dirs.join(" "));
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        if self.seen.contains(&(name.to_string(), include_dirs.join(" "))) {
            return Vec::new();
        }
        self.seen.insert((name.to_string(), include_dirs.join(" ")));

        let content = match std::fs::read_to_string(name) {
            Ok(c) => c,
            Err(_) => {
                self.cache.insert(key, Vec::new());
                return Vec::new();
            }
        };

        let mut ret = Vec::new();
        for line in content.lines() {
            let imported = match parse_import_line(line) {
                Some(v) => v,
                None => continue,
            };
            if let Some(rest) = imported.strip_prefix("google/") {
                let _ = rest;
                ret.push((imported.clone(), EXTERNAL_SENTINEL.to_string()));
                continue;
            }

            for d in include_dirs {
                let candidate = Path::new(d).join(&imported);
                if candidate.exists() {
                    let path = candidate.to_string_lossy().to_string();
                    ret.push((path.clone(), d.clone()));
                    ret.extend(self.resolve(&path, include_dirs));
                    break;
                }
            }
        }

        self.cache.insert(key, ret.clone());
        ret
    }
}

impl Default for ProtoResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn google_import_maps_to_external_sentinel() {
        let tmp = std::env::temp_dir().join(format!("proto-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let main = write_file(
            &tmp,
            "a.proto",
            "import \"google/protobuf/empty.proto\";\n",
        );

        let mut resolver = ProtoResolver::new();
        let edges = resolver.resolve(&main.to_string_lossy(), &[]);
        assert_eq!(
            edges,
            vec![("google/protobuf/empty.proto".to_string(), "@".to_string())]
        );

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn local_import_resolves_against_include_dirs() {
        let tmp = std::env::temp_dir().join(format!("proto-test2-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let inc = tmp.join("protos");
        write_file(&inc, "b.proto", "");
        let main = write_file(&tmp, "a.proto", "import \"b.proto\";\n");

        let mut resolver = ProtoResolver::new();
        let include_dirs = vec![inc.to_string_lossy().to_string()];
        let edges = resolver.resolve(&main.to_string_lossy(), &include_dirs);
        assert_eq!(edges.len(), 1);
        assert!(edges[0].0.ends_with("b.proto"));
        assert_eq!(edges[0].1, inc.to_string_lossy().to_string());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn repeated_resolution_is_cached() {
        let tmp = std::env::temp_dir().join(format!("proto-test3-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let main = write_file(&tmp, "a.proto", "");

        let mut resolver = ProtoResolver::new();
        let first = resolver.resolve(&main.to_string_lossy(), &[]);
        let second = resolver.resolve(&main.to_string_lossy(), &[]);
        assert_eq!(first, second);

        std::fs::remove_dir_all(&tmp).ok();
    }
}
