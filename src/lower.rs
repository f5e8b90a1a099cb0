// ============================================================================
// lower.rs — edge classifier / lowerer (component F)
// ============================================================================
//
// Walks the build graph from its top-level outputs and turns each edge
// into one or more TBS targets. The reference tool (`build.py`'s
// `handleRuleProducedForBazelGen` family, dispatched through
// `visitor.py`/`build_visitor.py`'s `VisitorContext`) carries this state
// in a mutable dict threaded through closures, with `current`/`dest`/
// `next_dest` slots mutated in place. This module replaces that with an
// explicit `Frame` value passed by the caller and returned/cloned at each
// recursive step: there is exactly one mutable thing in flight at a
// time, the target registry, held in `LowerContext`.

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use crate::ccimport::CCImport;
use crate::graph::{real_depends, BuildRef, BuildTargetRef};
use crate::headers::{GeneratedFilesManifest, HeaderResolver};
use crate::helpers::grouping_location;
use crate::logging::Verbosity;
use crate::protos::ProtoResolver;
use crate::tbs::{TargetKind, TargetRegistry, TbsTargetId, TbsTargetRef};

const FILTERED_COPT_PREFIXES: &[&str] = &["-std=", "-g", "-O", "-march=", "-mtune="];
const FILTERED_COPT_EXACT: &[&str] = &["-fPIC"];

fn is_filtered_copt(flag: &str) -> bool {
    FILTERED_COPT_EXACT.contains(&flag) || FILTERED_COPT_PREFIXES.iter().any(|p| flag.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Protoc,
    CustomCommand,
    CppLink,
    CppCompile,
    StaticArchive,
    Unknown,
}

fn is_cpp_command(cmd: &str) -> bool {
    ["clang++", "clang", "gcc", "c++", "g++"].iter().any(|c| cmd.contains(c))
}

fn is_static_archive_command(cmd: &str) -> bool {
    cmd.contains("/ar ") || cmd.contains("llvm-ar")
}

/// First-match dispatch table over command substrings: ordered
/// (predicate, kind) pairs rather than a class hierarchy, so a new
/// trigger is one more row.
fn classify_command(rule_name: &str, cmd: &str) -> CommandKind {
    let table: &[(fn(&str, &str) -> bool, CommandKind)] = &[
        (|_, c| c.contains("bin/protoc"), CommandKind::Protoc),
        (|r, _| r == "CUSTOM_COMMAND", CommandKind::CustomCommand),
        (
            |_, c| is_cpp_command(c) && c.contains("LINK_FLAGS"),
            CommandKind::CppLink,
        ),
        (
            |_, c| is_cpp_command(c) && c.contains("-c"),
            CommandKind::CppCompile,
        ),
        (|_, c| is_static_archive_command(c), CommandKind::StaticArchive),
    ];
    for (pred, kind) in table {
        if pred(rule_name, cmd) {
            return *kind;
        }
    }
    CommandKind::Unknown
}

/// The two "current position" slots the original mutable context kept:
/// `current` is the enclosing library/binary consumers should depend on;
/// `dest` is where a source/header attaches (usually the same target,
/// except while a protobuf or genrule sub-target is active).
#[derive(Debug, Clone, Default)]
struct Frame {
    current: Option<TbsTargetId>,
    dest: Option<TbsTargetId>,
}

impl Frame {
    fn attach_point(&self) -> Option<TbsTargetId> {
        self.dest.clone().or_else(|| self.current.clone())
    }
}

pub struct LowerContext<'a> {
    pub registry: &'a mut TargetRegistry,
    pub header_resolver: &'a mut HeaderResolver,
    pub proto_resolver: &'a mut ProtoResolver,
    pub generated: &'a GeneratedFilesManifest,
    pub cc_imports: &'a [Rc<CCImport>],
    pub source_root: &'a Path,
    pub verbosity: &'a Verbosity,
}

fn relative_to_root(name: &str, root: &Path) -> String {
    match Path::new(name).strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => name.trim_start_matches('/').to_string(),
    }
}

fn base_proto_name(short_name: &str) -> Option<String> {
    let filename = short_name.rsplit('/').next().unwrap_or(short_name);
    let stripped = filename
        .strip_suffix(".grpc.pb.cc.o")
        .or_else(|| filename.strip_suffix(".grpc.pb.h"))
        .or_else(|| filename.strip_suffix(".pb.cc.o"))
        .or_else(|| filename.strip_suffix(".pb.h"))
        .or_else(|| filename.strip_suffix(".pb.cc"))
        .or_else(|| filename.strip_suffix(".proto"));
    stripped.map(|s| s.to_string())
}

fn attach(target: &TbsTargetRef, frame: &Frame, ctx: &mut LowerContext) {
    if let Some(current_id) = &frame.current {
        if let Some(current) = ctx.registry.get(current_id).cloned() {
            if !Rc::ptr_eq(&current.0, &target.0) {
                current.add_dep(target);
            }
        }
    }
}

/// Lowers every top-level output, returning the ids of the targets
/// directly produced for them (usually the binaries/libraries a project
/// actually wants to build).
pub fn lower_all(roots: &[BuildTargetRef], ctx: &mut LowerContext) -> Vec<TbsTargetId> {
    let mut results = Vec::new();
    let mut visiting = HashSet::new();
    for root in roots {
        let frame = Frame::default();
        if let Some(id) = visit(root, &frame, ctx, &mut visiting) {
            results.push(id);
        }
    }
    results
}

fn visit(
    target: &BuildTargetRef,
    frame: &Frame,
    ctx: &mut LowerContext,
    visiting: &mut HashSet<String>,
) -> Option<TbsTargetId> {
    let resolved = target.resolved();

    let build = match resolved.produced_by() {
        Some(b) => b,
        None => {
            attach_source_or_header(&resolved, frame, ctx);
            return None;
        }
    };

    if build.0.borrow().pruned {
        let inputs = build.0.borrow().inputs.clone();
        let mut last = None;
        for input in &inputs {
            last = visit(input, frame, ctx, visiting).or(last);
        }
        for dep in real_depends(&build) {
            visit(&dep, frame, ctx, visiting);
        }
        return last;
    }

    if let Some(existing_id) = build.0.borrow().associated_tbs_target.clone() {
        if let Some(existing) = ctx.registry.get(&existing_id).cloned() {
            attach(&existing, frame, ctx);
        }
        return Some(existing_id);
    }

    let guard_key = format!("{:p}", Rc::as_ptr(&build.0));
    if visiting.contains(&guard_key) {
        return None;
    }
    visiting.insert(guard_key.clone());

    let rule_name = build.rule_name();
    let command = build.command();

    let kind = classify_command(&rule_name, &command);
    let new_frame = match kind {
        CommandKind::Protoc => lower_protoc(&resolved, &build, frame, ctx),
        CommandKind::CustomCommand => lower_custom_command(&resolved, &build, frame, ctx),
        CommandKind::CppLink => lower_cpp_link(&resolved, &build, frame, ctx, &command),
        CommandKind::CppCompile => lower_cpp_compile(&resolved, &build, frame, ctx, &command),
        CommandKind::StaticArchive => lower_static_archive(&resolved, &build, frame, ctx),
        CommandKind::Unknown => {
            ctx.verbosity.warn(format!("don't know how to lower command: {command}"));
            frame.clone()
        }
    };

    let result_id = new_frame.current.clone().or_else(|| new_frame.dest.clone());
    if let Some(id) = &result_id {
        build.0.borrow_mut().associated_tbs_target = Some(id.clone());
    }

    let inputs = build.0.borrow().inputs.clone();
    for input in &inputs {
        visit(input, &new_frame, ctx, visiting);
    }
    for dep in real_depends(&build) {
        visit(&dep, &new_frame, ctx, visiting);
    }

    visiting.remove(&guard_key);
    result_id
}

fn attach_source_or_header(target: &BuildTargetRef, frame: &Frame, ctx: &mut LowerContext) {
    let Some(attach_id) = frame.attach_point() else {
        return;
    };
    let Some(dest) = ctx.registry.get(&attach_id).cloned() else {
        return;
    };
    let relative = relative_to_root(&target.name(), ctx.source_root);
    if relative.ends_with(".h") || relative.ends_with(".hpp") {
        dest.add_hdr(relative);
    } else {
        dest.add_src(relative);
    }
}

fn lower_protoc(target: &BuildTargetRef, build: &BuildRef, frame: &Frame, ctx: &mut LowerContext) -> Frame {
    let short_name = target.name();
    let location = grouping_location(&short_name);

    let Some(base) = base_proto_name(&short_name) else {
        ctx.verbosity.warn(format!("protoc output {short_name} doesn't match expected naming"));
        return frame.clone();
    };

    if short_name.ends_with(".grpc.pb.cc.o") || short_name.ends_with(".grpc.pb.h") {
        let (_, grpc) = ctx.registry.get_or_create(TargetKind::CcGrpcLibrary, &location, &format!("{base}_cc_grpc"));
        let (_, cc_proto) = ctx.registry.get_or_create(TargetKind::CcProtoLibrary, &location, &format!("{base}_cc_proto"));
        grpc.add_dep(&cc_proto);
        attach(&grpc, frame, ctx);
        let mut next = frame.clone();
        next.current = Some(TbsTargetId::new(TargetKind::CcGrpcLibrary, &location, &format!("{base}_cc_grpc")));
        next.dest = next.current.clone();
        return next;
    }

    let (proto_id, proto) = ctx.registry.get_or_create(TargetKind::ProtoLibrary, &location, &format!("{base}_proto"));
    let proto_file = relative_to_root(&format!("{base}.proto"), ctx.source_root);
    proto.add_src(proto_file);

    let command = build.command();
    let include_dirs = crate::headers::parse_include_dirs(&command);
    let proto_path = Path::new(ctx.source_root).join(format!("{base}.proto"));
    for (path, dir_used) in ctx.proto_resolver.resolve(&proto_path.to_string_lossy(), &include_dirs) {
        if dir_used == "@" {
            let (_, ext) = ctx.registry.get_or_create(TargetKind::ExternalRef, "", &path);
            proto.add_dep(&ext);
        }
    }

    if short_name.ends_with(".pb.cc.o") || short_name.ends_with(".pb.h") || short_name.ends_with(".pb.cc") {
        let (cc_proto_id, cc_proto) = ctx.registry.get_or_create(TargetKind::CcProtoLibrary, &location, &format!("{base}_cc_proto"));
        cc_proto.add_dep(&proto);
        attach(&cc_proto, frame, ctx);
        let mut next = frame.clone();
        next.current = Some(cc_proto_id);
        next.dest = next.current.clone();
        return next;
    }

    attach(&proto, frame, ctx);
    let mut next = frame.clone();
    next.current = Some(proto_id);
    next.dest = next.current.clone();
    next
}

/// The genrule's identity is derived from the edge's own canonical
/// (first) output rather than whichever output happens to be the
/// currently-visited `target`: a custom-command edge can produce several
/// outputs, each reached by a different traversal path, and every path
/// must agree on the same genrule id for idempotent lowering to hold
/// before the edge's `associated_tbs_target` cache is populated.
fn canonical_genrule_location_name(build: &BuildRef) -> (String, String) {
    let first_output = build
        .0
        .borrow()
        .outputs
        .first()
        .map(|o| o.name())
        .unwrap_or_default();
    let location = grouping_location(&first_output);
    let name = format!("{}_command", first_output.replace(['/', '.'], "_"));
    (location, name)
}

/// Looks up (creating if necessary) the genrule id for the edge that
/// produced a generated header, keyed the same canonical way
/// `lower_custom_command` derives it, so this resolves correctly whether
/// or not that edge has been visited by the lowerer yet.
fn genrule_id_for(build: &BuildRef, ctx: &mut LowerContext) -> TbsTargetId {
    let (location, name) = canonical_genrule_location_name(build);
    let (id, _) = ctx.registry.get_or_create(TargetKind::Genrule, &location, &name);
    id
}

fn lower_custom_command(target: &BuildTargetRef, build: &BuildRef, frame: &Frame, ctx: &mut LowerContext) -> Frame {
    let _ = target;
    let (location, genrule_name) = canonical_genrule_location_name(build);
    let short_name = genrule_name.trim_end_matches("_command").to_string();

    let (genrule_id, genrule) = ctx.registry.get_or_create(TargetKind::Genrule, &location, &genrule_name);

    let data = build.0.borrow();
    for input in &data.inputs {
        genrule.add_src(relative_to_root(&input.name(), ctx.source_root));
    }
    for output in &data.outputs {
        genrule.add_out(relative_to_root(&output.name(), ctx.source_root));
    }
    drop(data);
    let command = build.command();

    let mut args: Vec<&str> = command.split_whitespace().collect();
    // Drop the `$in`/`$out` pseudo-arguments the reference tool strips
    // before rendering the genrule's `cmd` string.
    args.retain(|a| *a != "$in" && *a != "$out");

    if let Some(first) = args.first() {
        if first.ends_with(".py") {
            let py_path = relative_to_root(first, ctx.source_root);
            let cmd_name = format!("{}_cmd", short_name.replace(['/', '.'], "_"));
            let build_name = format!("{cmd_name}_build");
            let script_name = format!("{cmd_name}.sh");

            let (_, build_genrule) = ctx.registry.get_or_create(TargetKind::Genrule, &location, &build_name);
            build_genrule.add_out(script_name);
            build_genrule.set_cmd(wrapper_script_cmd(&py_path));
            build_genrule.set_local(true);

            let (_, cmd_target) = ctx.registry.get_or_create(TargetKind::ShBinary, &location, &cmd_name);
            cmd_target.add_src(build_genrule.reference_from(&location));
            cmd_target.add_data(py_path);

            genrule.add_tool_ref(cmd_target.reference_from(&location));
            genrule.set_cmd(format!("./$(location {}) {}", cmd_target.reference_from(&location), args[1..].join(" ")));
        } else {
            genrule.set_local(true);
            genrule.set_cmd(args.join(" "));
        }
    }

    attach(&genrule, frame, ctx);
    let mut next = frame.clone();
    next.current = Some(genrule_id.clone());
    next.dest = Some(genrule_id);
    next
}

/// The shell script content a `..._cmd_build` genrule emits: re-establishes
/// `PYTHONPATH` relative to its own location and execs the original Python
/// tool, the wrapping S5 describes for every `.py` custom command.
fn wrapper_script_cmd(py_path: &str) -> String {
    format!(
        "printf '%s\\n' '#!/bin/sh' 'export PYTHONPATH=\"$PYTHONPATH:$(dirname \"$0\")\"' 'exec python3 {py_path} \"$@\"' > $@ && chmod +x $@"
    )
}

fn lower_cpp_link(
    target: &BuildTargetRef,
    build: &BuildRef,
    frame: &Frame,
    ctx: &mut LowerContext,
    _command: &str,
) -> Frame {
    let short_name = target.name();
    let location = grouping_location(&short_name);
    let has_soname = build.0.borrow().vars.contains_key("SONAME");

    if has_soname {
        let inner_name = format!("inner_{}", short_name.replace('/', "_"));
        let (inner_id, inner) = ctx
            .registry
            .get_or_create_unprefixed(TargetKind::CcLibrary, &location, &inner_name);
        let shared_name = short_name.replace('/', "_");
        let (_, shared) = ctx
            .registry
            .get_or_create_unprefixed(TargetKind::CcSharedLibrary, &location, &shared_name);
        shared.add_dep(&inner);
        attach(&shared, frame, ctx);
        let mut next = frame.clone();
        next.current = Some(inner_id);
        next.dest = next.current.clone();
        next
    } else {
        let is_test = short_name.ends_with("_test");
        let kind = if is_test { TargetKind::CcTest } else { TargetKind::CcBinary };
        let (id, binary) = ctx.registry.get_or_create(kind, &location, &short_name);
        attach(&binary, frame, ctx);
        let mut next = frame.clone();
        next.current = Some(id);
        next.dest = next.current.clone();
        next
    }
}

fn lower_cpp_compile(
    target: &BuildTargetRef,
    build: &BuildRef,
    frame: &Frame,
    ctx: &mut LowerContext,
    command: &str,
) -> Frame {
    let short_name = target.name();

    if short_name.ends_with(".grpc.pb.cc.o") || short_name.ends_with(".pb.cc.o") {
        return lower_protoc(target, build, frame, ctx);
    }

    let Some(attach_id) = frame.attach_point() else {
        return frame.clone();
    };
    if let Some(enclosing) = ctx.registry.get(&attach_id).cloned() {
        if let Some(defines) = build.var("DEFINES") {
            for define in defines.split_whitespace() {
                if let Some(stripped) = define.strip_prefix("-D") {
                    enclosing.add_define(stripped.to_string());
                }
            }
        }
        if let Some(flags) = build.var("FLAGS") {
            for flag in flags.split_whitespace() {
                if !is_filtered_copt(flag) {
                    enclosing.add_copt(flag.to_string());
                }
            }
        }

        // `INCLUDES` is the edge-scoped variable holding the real `-I`
        // directories; the rule's `command` template only ever mentions
        // the unexpanded `$INCLUDES` placeholder (see `BuildRef::command`'s
        // doc comment), so prefer it and fall back to scanning the
        // command text for literal `-I` flags when it's absent.
        let include_dirs = build
            .var("INCLUDES")
            .map(|s| crate::headers::parse_include_dirs(&s))
            .unwrap_or_else(|| crate::headers::parse_include_dirs(command));
        for dir in &include_dirs {
            if dir.starts_with(crate::headers::GENERATED_SENTINEL) {
                enclosing.add_copt(format!(
                    "add_bazel_out_prefix(\"{}\")",
                    dir.trim_start_matches(crate::headers::GENERATED_SENTINEL)
                ));
            } else {
                enclosing.add_copt(format!("-I{dir}"));
            }
        }

        let inputs = build.0.borrow().inputs.clone();
        for input in &inputs {
            let includes = ctx.header_resolver.resolve(&input.name(), &include_dirs, ctx.generated, None);
            for (header, _dir) in &includes.found_headers {
                enclosing.add_hdr(relative_to_root(header, ctx.source_root));
            }
            for import in &includes.needed_imports {
                let import_location = if import.location.is_empty() { location_of(&enclosing) } else { String::new() };
                let (_, import_target) = ctx.registry.get_or_create(TargetKind::CcImport, &import_location, &import.name);
                enclosing.add_dep(&import_target);
                set_cc_import_attrs(&import_target, import);
            }
            for (name, _dir) in &includes.needed_generated_files {
                let Some(entry) = ctx.generated.get(name) else { continue };
                let Some(producing) = entry.producing_edge.clone() else { continue };
                if producing.rule_name() != "CUSTOM_COMMAND" {
                    // protoc-produced headers are already reached through
                    // the proto_library/cc_proto_library dependency chain.
                    continue;
                }
                let genrule_id = genrule_id_for(&producing, ctx);
                if let Some(genrule) = ctx.registry.get(&genrule_id).cloned() {
                    enclosing.add_dep(&genrule);
                }
                enclosing.add_hdr(name.clone());
            }
        }
    }

    let mut next = frame.clone();
    next.dest = Some(attach_id);
    next
}

fn location_of(target: &TbsTargetRef) -> String {
    target.location()
}

/// Copies the prebuilt-library facts a `cc_import(...)` manifest entry
/// carries (component J) onto the `cc_import` stanza created for it, so
/// the emitted target actually references the `.a`/`.so` it stands for
/// instead of just a bare name.
fn set_cc_import_attrs(target: &TbsTargetRef, import: &CCImport) {
    if let Some(path) = &import.static_library {
        target.set_static_library(path.clone());
    }
    if let Some(path) = &import.shared_library {
        target.set_shared_library(path.clone());
    }
    if import.system_provided {
        target.set_system_provided(true);
    }
    for dep in &import.deps {
        target.add_dep_ref(dep.clone());
    }
}

fn lower_static_archive(target: &BuildTargetRef, build: &BuildRef, frame: &Frame, ctx: &mut LowerContext) -> Frame {
    let short_name = target.name();
    let location = grouping_location(&short_name);
    let (id, lib) = ctx.registry.get_or_create(TargetKind::CcLibrary, &location, &short_name);
    attach(&lib, frame, ctx);
    let _ = build;
    let mut next = frame.clone();
    next.current = Some(id);
    next.dest = next.current.clone();
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_protoc_over_custom_command() {
        assert_eq!(
            classify_command("CUSTOM_COMMAND", "/usr/bin/protoc --cpp_out=. a.proto"),
            CommandKind::Protoc
        );
    }

    #[test]
    fn classify_cpp_link_requires_link_flags() {
        assert_eq!(
            classify_command("CXX_EXECUTABLE", "clang++ $LINK_FLAGS -o app a.o b.o"),
            CommandKind::CppLink
        );
        assert_eq!(
            classify_command("CXX_COMPILE", "clang++ -c a.cc -o a.o"),
            CommandKind::CppCompile
        );
    }

    #[test]
    fn classify_static_archive() {
        assert_eq!(classify_command("AR", "/usr/bin/ar rcs libfoo.a a.o b.o"), CommandKind::StaticArchive);
    }

    #[test]
    fn filtered_copts_drop_std_and_optimization_flags() {
        assert!(is_filtered_copt("-std=c++17"));
        assert!(is_filtered_copt("-O2"));
        assert!(is_filtered_copt("-g"));
        assert!(is_filtered_copt("-march=native"));
        assert!(is_filtered_copt("-fPIC"));
        assert!(!is_filtered_copt("-Wall"));
    }

    #[test]
    fn base_proto_name_strips_known_suffixes() {
        assert_eq!(base_proto_name("dir/a.pb.cc.o"), Some("a".to_string()));
        assert_eq!(base_proto_name("dir/a.grpc.pb.h"), Some("a".to_string()));
        assert_eq!(base_proto_name("dir/a.proto"), Some("a".to_string()));
    }

    #[test]
    fn wrapper_script_reestablishes_pythonpath_and_execs_the_tool() {
        let script = wrapper_script_cmd("tools/gen.py");
        assert!(script.contains("export PYTHONPATH"));
        assert!(script.contains("exec python3 tools/gen.py"));
        assert!(script.contains("chmod +x $@"));
    }
}
