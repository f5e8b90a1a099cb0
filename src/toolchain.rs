// ============================================================================
// toolchain.rs — host compiler implicit include dirs (external collaborator)
// ============================================================================
//
// Out of scope per the core's mandate (§1): discovery of the toolchain's
// implicit include search path is "invoked as a shell helper", not
// reimplemented as part of the graph lowering engine. Component M asks for
// this collaborator to sit behind a trait rather than a bare subprocess
// call, so the pipeline can be exercised against a fixed list without
// shelling out. `HostCompilerProbe` is the real implementation; it shells
// out the same capture-and-check-status way `compiler.rs::run_command`
// does, rather than hand-parsing compiler-specific search-path conventions
// from first principles.

use std::process::Command;

use crate::logging::Verbosity;

const BEGIN_MARKER: &str = "#include <...> search starts here:";
const END_MARKER: &str = "End of search list.";

/// A source of the host toolchain's implicit `#include <...>` search
/// path. The only implementation in non-test code is `HostCompilerProbe`;
/// tests substitute a fixed list instead of shelling out.
pub trait ToolchainProbe {
    fn implicit_include_dirs(&self, verbosity: &Verbosity) -> Vec<String>;
}

/// Asks the host C++ compiler by preprocessing an empty translation unit
/// with `-v`. Falls through a short list of compiler names and returns an
/// empty list (logged at debug level) if none are available — the header
/// resolver (component C) simply finds fewer headers via the implicit-dir
/// probe, the same degraded behavior the reference tool has outside its
/// expected toolchain environment.
pub struct HostCompilerProbe;

impl ToolchainProbe for HostCompilerProbe {
    fn implicit_include_dirs(&self, verbosity: &Verbosity) -> Vec<String> {
        for compiler in ["c++", "g++", "clang++"] {
            if let Some(dirs) = probe(compiler) {
                return dirs;
            }
        }
        verbosity.debug("no host C++ compiler found; implicit include dirs left empty");
        Vec::new()
    }
}

fn probe(compiler: &str) -> Option<Vec<String>> {
    let output = Command::new(compiler)
        .args(["-E", "-Wp,-v", "-x", "c++", "/dev/null"])
        .output()
        .ok()?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_search_path(&stderr)
}

fn parse_search_path(stderr: &str) -> Option<Vec<String>> {
    let start = stderr.find(BEGIN_MARKER)? + BEGIN_MARKER.len();
    let end = stderr[start..].find(END_MARKER)? + start;
    Some(
        stderr[start..end]
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.trim_end_matches(" (framework directory)").to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Vec<String>);

    impl ToolchainProbe for FixedProbe {
        fn implicit_include_dirs(&self, _verbosity: &Verbosity) -> Vec<String> {
            self.0.clone()
        }
    }

    #[test]
    fn trait_object_substitutes_a_fixed_list() {
        let probe: Box<dyn ToolchainProbe> = Box::new(FixedProbe(vec!["/usr/include".to_string()]));
        let verbosity = Verbosity::new(false, false);
        assert_eq!(probe.implicit_include_dirs(&verbosity), vec!["/usr/include".to_string()]);
    }

    #[test]
    fn parses_gcc_style_search_path_banner() {
        let stderr = "ignore me\n#include <...> search starts here:\n /usr/include\n \
                       /usr/local/include\nEnd of search list.\nmore noise\n";
        let dirs = parse_search_path(stderr).unwrap();
        assert_eq!(
            dirs,
            vec!["/usr/include".to_string(), "/usr/local/include".to_string()]
        );
    }

    #[test]
    fn strips_framework_directory_suffix() {
        let stderr = "#include <...> search starts here:\n \
                       /System/Library/Frameworks (framework directory)\nEnd of search list.\n";
        let dirs = parse_search_path(stderr).unwrap();
        assert_eq!(dirs, vec!["/System/Library/Frameworks".to_string()]);
    }

    #[test]
    fn missing_markers_yield_none() {
        assert!(parse_search_path("nothing here").is_none());
    }
}
