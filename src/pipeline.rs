// ============================================================================
// pipeline.rs — orchestration: parse → post-process → generate → lower → emit
// ============================================================================
//
// Owns the pipeline's caches (object intern via `TargetRegistry`, header
// resolution, proto resolution) as plain local values threaded through each
// stage by reference, the single owned registry SPEC_FULL.md's design notes
// ask for in place of the reference tool's module-level singletons. Grounded
// on `examples/original_source/parser.py::main`'s parse → lower → emit
// sequencing, generalized with the CLI/logging/error layers the reference
// script doesn't need (it's one function with no flags beyond two
// positionals).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use crate::ccimport;
use crate::error::Error;
use crate::generator::{self, GeneratorExecutor};
use crate::graph::{self, BuildRef};
use crate::headers::{GeneratedFilesManifest, HeaderResolver};
use crate::logging::Verbosity;
use crate::lower::{self, LowerContext};
use crate::ninja;
use crate::options::Options;
use crate::protos::ProtoResolver;
use crate::tbs::{self, TargetRegistry};
use crate::toolchain::{HostCompilerProbe, ToolchainProbe};

/// Runs the full pipeline for one invocation: reads `options.ninja_file`,
/// emits one `BUILD.bazel` per grouping location under `options.source_root`.
pub fn run(options: &Options) -> anyhow::Result<()> {
    run_with_probe(options, &HostCompilerProbe)
}

/// Same as `run`, but takes the toolchain probe (component M) as an
/// explicit dependency rather than always constructing `HostCompilerProbe`
/// — lets tests substitute a fixed implicit-include-dir list without
/// shelling out to a real compiler.
pub fn run_with_probe(options: &Options, probe: &dyn ToolchainProbe) -> anyhow::Result<()> {
    let verbosity = Verbosity::new(options.show_verbose_output(), options.show_quiet_output());

    let source_root = options
        .source_root
        .canonicalize()
        .unwrap_or_else(|_| options.source_root.clone());
    let ninja_dir = options
        .ninja_file
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let workdir = ninja_dir.canonicalize().unwrap_or_else(|_| ninja_dir.clone());

    let manually_generated: HashMap<String, PathBuf> = options
        .manually_generated
        .iter()
        .map(|kv| (kv.key.clone(), source_root.join(&kv.value)))
        .collect();
    let remap: Vec<(String, String)> = options
        .remap
        .iter()
        .map(|kv| (kv.key.clone(), kv.value.clone()))
        .collect();

    verbosity.info(format!("parsing {}", options.ninja_file.display()));
    let content =
        fs::read_to_string(&options.ninja_file).map_err(|e| Error::io(options.ninja_file.clone(), e))?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();

    let initial_dir = match &options.prefix {
        Some(p) => source_root.join(p),
        None => ninja_dir.clone(),
    };

    let mut parser = ninja::Parser::new(source_root.clone(), workdir.clone(), manually_generated);
    parser.parse(&lines, initial_dir)?;

    // §7: any node still Unknown after parsing completes is a fatal,
    // non-recoverable parse error — report every missing name and stop
    // before emitting anything.
    if !parser.missing.is_empty() {
        let mut names: Vec<String> = parser.missing.keys().cloned().collect();
        names.sort();
        return Err(Error::UnresolvedTargets { names }.into());
    }

    graph::resolve_aliases(&parser.all_outputs, &workdir.to_string_lossy());
    let roots = ninja::get_toplevels(&parser);
    graph::prune_phony_edges(&roots);
    verbosity.info(format!("{} top-level target(s)", roots.len()));

    let cc_imports: Vec<Rc<ccimport::CCImport>> = ccimport::load_all(&options.imports)?
        .into_iter()
        .map(Rc::new)
        .collect();
    verbosity.debug(format!("loaded {} cc_import record(s)", cc_imports.len()));

    let implicit_dirs = probe.implicit_include_dirs(&verbosity);

    let cache_root = options.cache_dir.clone().unwrap_or_else(default_cache_root);
    let mut generator = GeneratorExecutor::new(cache_root, remap);
    let mut generated: GeneratedFilesManifest = HashMap::new();
    let mut header_resolver = HeaderResolver::new(implicit_dirs, cc_imports.clone());

    // Component E: run every reachable custom-command edge before lowering
    // so the header resolver (component C) sees a complete generated-files
    // manifest when component F later walks compile edges.
    for build in &parser.build_edges {
        if build.0.borrow().pruned || build.rule_name() != "CUSTOM_COMMAND" {
            continue;
        }
        let template = build.command();
        let Some(sub_command) = generator::derive_command(&template) else {
            continue;
        };
        if generator::is_protoc_command(&sub_command) {
            let outputs: Vec<String> = build.0.borrow().outputs.iter().map(|o| o.name()).collect();
            generator.register_protoc_outputs(&outputs, &workdir, build, &mut generated);
            continue;
        }
        let resolved = resolve_command(build, &sub_command, &parser.vars);
        let include_dirs = crate::headers::parse_include_dirs(&resolved);
        generator.run(
            &sub_command,
            &resolved,
            &workdir,
            &include_dirs,
            build,
            &mut header_resolver,
            &mut generated,
            &verbosity,
        );
    }

    let mut registry = TargetRegistry::new();
    let mut proto_resolver = ProtoResolver::new();
    {
        let mut ctx = LowerContext {
            registry: &mut registry,
            header_resolver: &mut header_resolver,
            proto_resolver: &mut proto_resolver,
            generated: &generated,
            cc_imports: &cc_imports,
            source_root: &source_root,
            verbosity: &verbosity,
        };
        lower::lower_all(&roots, &mut ctx);
    }

    let rendered = tbs::render_all(&registry);
    for (location, text) in &rendered {
        let dir = source_root.join(location);
        fs::create_dir_all(&dir).map_err(|e| Error::io(dir.clone(), e))?;
        let out_path = dir.join("BUILD.bazel");
        fs::write(&out_path, text).map_err(|e| Error::io(out_path.clone(), e))?;
        verbosity.debug(format!("wrote {}", out_path.display()));
    }
    verbosity.info(format!("emitted {} BUILD file(s)", rendered.len()));

    Ok(())
}

fn default_cache_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".cache").join("ninja-lower")
}

/// Expands `template` (a rule/edge `command`/`COMMAND` string) for actual
/// execution: `$in`/`$out` become the edge's joined input/output paths, and
/// any other `$NAME`/`${NAME}` resolves against the edge → rule → file-scope
/// chain. Distinct from `Parser::resolve_name`, which deliberately leaves
/// `$in`/`$out`/`$TARGET_FILE` untouched for the classifier (component F) to
/// pattern-match on; only the generator executor (component E) needs them
/// expanded, and only at the moment it is about to spawn the command.
fn resolve_command(build: &BuildRef, template: &str, file_vars: &HashMap<String, String>) -> String {
    let data = build.0.borrow();
    let in_joined = data
        .inputs
        .iter()
        .map(|i| i.name())
        .collect::<Vec<_>>()
        .join(" ");
    let out_joined = data
        .outputs
        .iter()
        .map(|o| o.name())
        .collect::<Vec<_>>()
        .join(" ");
    drop(data);

    let lookup = |name: &str| -> Option<String> {
        match name {
            "in" => Some(in_joined.clone()),
            "out" => Some(out_joined.clone()),
            _ => build.var(name).or_else(|| file_vars.get(name).cloned()),
        }
    };

    let mut out = String::new();
    let mut rest = template;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];
        let braced = after.starts_with('{');
        let scan = if braced { &after[1..] } else { after };
        let name_len = scan
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '+'))
            .unwrap_or(scan.len());
        if name_len == 0 {
            out.push('$');
            rest = after;
            continue;
        }
        let name = &scan[..name_len];
        let mut consumed = 1 + if braced { 1 } else { 0 } + name_len;
        if braced && scan[name_len..].starts_with('}') {
            consumed += 1;
        }
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[dollar..dollar + consumed]),
        }
        rest = &rest[dollar + consumed..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BuildTargetRef, Rule};
    use crate::options::Options;
    use std::cell::RefCell;

    #[test]
    fn resolve_command_expands_in_out_and_rule_scope_var() {
        let rule = Rc::new(RefCell::new(Rule::new("CUSTOM_COMMAND")));
        rule.borrow_mut()
            .vars
            .insert("TOOL".to_string(), "/usr/bin/gen".to_string());
        let input = BuildTargetRef::new("a.yml").mark_as_file();
        let output = BuildTargetRef::new("gen/a.h");
        let build = BuildRef::new(vec![output], rule, vec![input], vec![]);

        let resolved = resolve_command(&build, "$TOOL --in=$in --out=$out", &HashMap::new());
        assert_eq!(resolved, "/usr/bin/gen --in=a.yml --out=gen/a.h");
    }

    struct FixedProbe;

    impl crate::toolchain::ToolchainProbe for FixedProbe {
        fn implicit_include_dirs(&self, _verbosity: &Verbosity) -> Vec<String> {
            Vec::new()
        }
    }

    /// End-to-end run over a minimal two-object executable (S1): a
    /// `CXX_EXECUTABLE` link edge over two `CXX_COMPILE` objects, each
    /// compiling a real `.cc` source under a temp source root, emits a
    /// `BUILD.bazel` with one `cc_binary` target.
    #[test]
    fn minimal_executable_produces_one_cc_binary_stanza() {
        let root = std::env::temp_dir().join(format!("ninja-lower-pipeline-test-{}", std::process::id()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.cc"), "int a() { return 1; }\n").unwrap();
        fs::write(root.join("b.cc"), "int b() { return 2; }\n").unwrap();

        let ninja_path = root.join("build.ninja");
        let ninja_text = "\
rule CXX_COMPILE
  command = clang++ -c $in -o $out

rule CXX_EXECUTABLE
  command = clang++ $LINK_FLAGS -o $out $in

build a.o: CXX_COMPILE a.cc
build b.o: CXX_COMPILE b.cc
build app: CXX_EXECUTABLE a.o b.o
  LINK_FLAGS = -pthread
";
        fs::write(&ninja_path, ninja_text).unwrap();

        let options = Options {
            ninja_file: ninja_path,
            source_root: root.clone(),
            manually_generated: Vec::new(),
            remap: Vec::new(),
            prefix: None,
            imports: Vec::new(),
            verbose: false,
            quiet: true,
            cache_dir: Some(root.join("cache")),
        };

        run_with_probe(&options, &FixedProbe).unwrap();

        let build_file = fs::read_to_string(root.join("BUILD.bazel")).unwrap();
        assert!(build_file.contains("cc_binary("));
        assert!(build_file.contains("name = \"app\""));
        assert!(build_file.contains("a.cc"));
        assert!(build_file.contains("b.cc"));

        fs::remove_dir_all(&root).ok();
    }
}
