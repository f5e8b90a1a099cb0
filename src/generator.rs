// ============================================================================
// generator.rs — custom-command executor + content-addressed cache (E)
// ============================================================================
//
// Command derivation splits on `&&` and keeps the sub-command mentioning
// `$in`/`$out`, the same heuristic CMake-Ninja custom-command wrapping
// uses. Invocation follows a capture-and-check-status idiom: run under
// `sh -c`, inspect the exit status, surface failures as warnings rather
// than aborting the whole lowering run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha1::{Digest, Sha1};

use crate::graph::BuildRef;
use crate::headers::{GeneratedFileEntry, GeneratedFilesManifest, HeaderResolver};
use crate::logging::Verbosity;

const COSMETIC_SUBSTRINGS: &[&str] = &[
    "cmake -E copy",
    "cmake -E make_directory",
    "cmake -E touch",
    "cmake -E cmake_echo_color",
    "Building CXX object",
    "Building C object",
];

const PROTOC_MARKER: &str = "bin/protoc";

/// Picks the one `&&`-separated sub-command that actually performs the
/// work: the first one mentioning both `$in` and one of `$out`/
/// `$TARGET_FILE`. Mirrors the reference tool's `gen_bazel` loop over
/// `c.split("&&")`.
pub fn derive_command(rule_command: &str) -> Option<String> {
    rule_command
        .split("&&")
        .map(str::trim)
        .find(|cmd| cmd.contains("$in") && (cmd.contains("$out") || cmd.contains("$TARGET_FILE")))
        .map(str::to_string)
}

pub fn is_cosmetic(cmd: &str) -> bool {
    COSMETIC_SUBSTRINGS.iter().any(|marker| cmd.contains(marker))
}

pub fn is_protoc_command(cmd: &str) -> bool {
    cmd.contains(PROTOC_MARKER)
}

fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_cc_source(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("c") | Some("cc") | Some("cpp") | Some("h") | Some("hpp")
    )
}

fn copy_dir_contents(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry.path().strip_prefix(from).unwrap();
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Executes `CUSTOM_COMMAND` edges and feeds their outputs into the
/// generated-files manifest the header resolver consumes. Owns the
/// at-most-once-per-run dedup set and the on-disk cache root as instance
/// state rather than anything global or static.
pub struct GeneratorExecutor {
    cache_root: PathBuf,
    remap: Vec<(String, String)>,
    already_run: HashSet<(String, PathBuf)>,
}

impl GeneratorExecutor {
    /// `remap` rewrites a generated file's recorded path before it enters
    /// the manifest: each `(from, to)` pair replaces a literal leading
    /// `from` with `to`, per the CLI's repeatable `--remap FROM=TO` (§6.2).
    pub fn new(cache_root: PathBuf, remap: Vec<(String, String)>) -> Self {
        GeneratorExecutor {
            cache_root,
            remap,
            already_run: HashSet::new(),
        }
    }

    fn apply_remap(&self, relative: &str) -> String {
        for (from, to) in &self.remap {
            if let Some(rest) = relative.strip_prefix(from.as_str()) {
                return format!("{to}{rest}");
            }
        }
        relative.to_string()
    }

    fn cache_dir_for(&self, hash: &str) -> PathBuf {
        self.cache_root.join("objects").join(hash)
    }

    /// Registers a protoc invocation's declared outputs in the manifest
    /// without running anything: protoc output locations are derived from
    /// its command-line flags and are a stable function of the proto file,
    /// so the lowerer's protobuf handling (component F) reads them
    /// directly rather than needing a materialized file.
    pub fn register_protoc_outputs(
        &self,
        outputs: &[String],
        ephemeral_root: &Path,
        producing: &BuildRef,
        generated: &mut GeneratedFilesManifest,
    ) {
        for name in outputs {
            generated.insert(
                name.clone(),
                GeneratedFileEntry {
                    ephemeral_root: ephemeral_root.to_path_buf(),
                    producing_edge: Some(producing.clone()),
                },
            );
        }
    }

    /// Runs one non-protoc custom command, honoring the on-disk cache and
    /// the in-run dedup set. Returns the ephemeral directory its outputs
    /// live in, or `None` if the command was rejected or failed.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        raw_command: &str,
        resolved_command: &str,
        workdir: &Path,
        include_dirs: &[String],
        producing: &BuildRef,
        header_resolver: &mut HeaderResolver,
        generated: &mut GeneratedFilesManifest,
        verbosity: &Verbosity,
    ) -> Option<PathBuf> {
        if is_cosmetic(raw_command) {
            return None;
        }

        let dedup_key = (raw_command.to_string(), workdir.to_path_buf());
        if self.already_run.contains(&dedup_key) {
            return self.cache_hit_root(raw_command);
        }
        self.already_run.insert(dedup_key);

        let hash = sha1_hex(raw_command);
        let cache_dir = self.cache_dir_for(&hash);
        let ephemeral = std::env::temp_dir().join(format!("ninja-lower-gen-{hash}"));

        if cache_dir.is_dir() {
            verbosity.debug(format!("generator cache hit for {raw_command}"));
        } else if let Err(e) = self.execute(resolved_command, workdir, verbosity) {
            verbosity.warn(format!("custom command failed, skipping: {e}"));
            return None;
        } else if let Err(e) = copy_dir_contents(workdir, &cache_dir) {
            verbosity.warn(format!("failed to populate generator cache: {e}"));
            return None;
        }

        if let Err(e) = copy_dir_contents(&cache_dir, &ephemeral) {
            verbosity.warn(format!("failed to materialize cached outputs: {e}"));
            return None;
        }

        self.ingest_outputs(&ephemeral, include_dirs, producing, header_resolver, generated);
        Some(ephemeral)
    }

    fn cache_hit_root(&self, raw_command: &str) -> Option<PathBuf> {
        let hash = sha1_hex(raw_command);
        let ephemeral = std::env::temp_dir().join(format!("ninja-lower-gen-{hash}"));
        if ephemeral.is_dir() {
            Some(ephemeral)
        } else {
            None
        }
    }

    fn execute(&self, resolved_command: &str, workdir: &Path, verbosity: &Verbosity) -> Result<(), String> {
        std::fs::create_dir_all(workdir).map_err(|e| e.to_string())?;
        verbosity.debug(format!("running generator command: {resolved_command}"));
        let status = Command::new("sh")
            .arg("-c")
            .arg(resolved_command)
            .current_dir(workdir)
            .status()
            .map_err(|e| e.to_string())?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("exit status {status}"))
        }
    }

    fn ingest_outputs(
        &self,
        ephemeral: &Path,
        include_dirs: &[String],
        producing: &BuildRef,
        header_resolver: &mut HeaderResolver,
        generated: &mut GeneratedFilesManifest,
    ) {
        for entry in walkdir::WalkDir::new(ephemeral)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(ephemeral)
                .unwrap()
                .to_string_lossy()
                .to_string();
            let relative = self.apply_remap(&relative);
            generated.insert(
                relative.clone(),
                GeneratedFileEntry {
                    ephemeral_root: ephemeral.to_path_buf(),
                    producing_edge: Some(producing.clone()),
                },
            );
            if is_cc_source(entry.path()) {
                header_resolver.resolve(
                    &entry.path().to_string_lossy(),
                    include_dirs,
                    generated,
                    Some(ephemeral),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_command_picks_subcommand_with_in_and_out() {
        let cmd = "cd /x && /usr/bin/protoc --cpp_out=. $in -o $out";
        assert_eq!(
            derive_command(cmd),
            Some("/usr/bin/protoc --cpp_out=. $in -o $out".to_string())
        );
    }

    #[test]
    fn derive_command_returns_none_when_nothing_matches() {
        let cmd = "cd /x && echo done";
        assert_eq!(derive_command(cmd), None);
    }

    #[test]
    fn cosmetic_commands_are_rejected() {
        assert!(is_cosmetic("/usr/bin/cmake -E touch stamp.txt"));
        assert!(!is_cosmetic("/usr/bin/protoc --cpp_out=. a.proto"));
    }

    #[test]
    fn protoc_commands_are_detected() {
        assert!(is_protoc_command("/usr/local/bin/protoc --cpp_out=. a.proto"));
        assert!(!is_protoc_command("/usr/bin/clang++ -c a.cc -o a.o"));
    }

    #[test]
    fn remap_rewrites_matching_prefix_only() {
        let exec = GeneratorExecutor::new(PathBuf::from("/cache"), vec![("gen/".to_string(), "include/".to_string())]);
        assert_eq!(exec.apply_remap("gen/foo.h"), "include/foo.h");
        assert_eq!(exec.apply_remap("other/foo.h"), "other/foo.h");
    }

    #[test]
    fn sha1_hex_is_deterministic() {
        assert_eq!(sha1_hex("abc"), sha1_hex("abc"));
        assert_ne!(sha1_hex("abc"), sha1_hex("abd"));
    }
}
