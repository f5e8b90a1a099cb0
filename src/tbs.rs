// ============================================================================
// tbs.rs — target build system output model + emission (component G)
// ============================================================================
//
// Generalizes the reference tool's `BaseBazelTarget`/`BazelTarget`/
// `BazelGenRuleTarget`/`PyBinaryBazelTarget` hierarchy (bazel.py) into one
// tagged-variant record rather than a class per rule kind: the fields the
// different kinds need overlap enough (name, location, srcs, deps, ...)
// that a sum type with a `kind` discriminant reads more plainly in Rust
// than a trait-object hierarchy would, and every call site that needs to
// special-case a kind already has to match on it for field access anyway.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::helpers::{self, ObjectCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetKind {
    CcLibrary,
    CcSharedLibrary,
    CcBinary,
    CcTest,
    CcImport,
    Genrule,
    ShBinary,
    PyBinary,
    ProtoLibrary,
    CcProtoLibrary,
    CcGrpcLibrary,
    ExportedFile,
    ExternalRef,
}

impl TargetKind {
    fn stanza_keyword(self) -> &'static str {
        match self {
            TargetKind::CcLibrary => "cc_library",
            TargetKind::CcSharedLibrary => "cc_shared_library",
            TargetKind::CcBinary => "cc_binary",
            TargetKind::CcTest => "cc_test",
            TargetKind::CcImport => "cc_import",
            TargetKind::Genrule => "genrule",
            TargetKind::ShBinary => "sh_binary",
            TargetKind::PyBinary => "py_binary",
            TargetKind::ProtoLibrary => "proto_library",
            TargetKind::CcProtoLibrary => "cc_proto_library",
            TargetKind::CcGrpcLibrary => "cc_grpc_library",
            TargetKind::ExportedFile | TargetKind::ExternalRef => "",
        }
    }

    /// `(bzl file, symbol)` to `load(...)` for this kind in a location that
    /// uses it, or `None` for kinds emitted as native stanzas needing no
    /// load. `genrule`/`sh_binary`/`py_binary`/`exports_files` are treated
    /// as native here the way Bazel itself treats them.
    fn load_directive(self) -> Option<(&'static str, &'static str)> {
        match self {
            TargetKind::CcLibrary => Some(("@rules_cc//cc:defs.bzl", "cc_library")),
            TargetKind::CcSharedLibrary => Some(("@rules_cc//cc:defs.bzl", "cc_shared_library")),
            TargetKind::CcBinary => Some(("@rules_cc//cc:defs.bzl", "cc_binary")),
            TargetKind::CcTest => Some(("@rules_cc//cc:defs.bzl", "cc_test")),
            TargetKind::CcImport => Some(("@rules_cc//cc:defs.bzl", "cc_import")),
            TargetKind::ProtoLibrary => Some(("@rules_proto//proto:defs.bzl", "proto_library")),
            TargetKind::CcProtoLibrary => {
                Some(("@rules_cc//cc/proto:defs.bzl", "cc_proto_library"))
            }
            TargetKind::CcGrpcLibrary => Some((
                "@com_github_grpc_grpc//bazel:cc_grpc_library.bzl",
                "cc_grpc_library",
            )),
            TargetKind::Genrule
            | TargetKind::ShBinary
            | TargetKind::PyBinary
            | TargetKind::ExportedFile
            | TargetKind::ExternalRef => None,
        }
    }
}

/// Opaque registry key: `kind:location:name`. Cheap to clone/hash/compare,
/// stored on `BuildData.associated_tbs_target` (graph.rs) without pulling
/// the graph module and the output model into a reference cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TbsTargetId(String);

impl TbsTargetId {
    pub fn new(kind: TargetKind, location: &str, name: &str) -> Self {
        TbsTargetId(format!("{}:{}:{}", kind.stanza_keyword(), location, name))
    }
}

#[derive(Debug)]
pub struct TbsTargetData {
    pub kind: TargetKind,
    pub name: String,
    pub location: String,
    pub srcs: BTreeSet<String>,
    pub hdrs: BTreeSet<String>,
    pub deps: BTreeSet<String>,
    pub copts: Vec<String>,
    pub defines: Vec<String>,
    pub linkopts: Vec<String>,
    pub data: BTreeSet<String>,
    pub outs: BTreeSet<String>,
    pub tools: BTreeSet<String>,
    pub cmd: String,
    pub local: bool,
    pub main: Option<String>,
    pub static_library: Option<String>,
    pub shared_library: Option<String>,
    pub system_provided: bool,
}

impl TbsTargetData {
    fn new(kind: TargetKind, name: String, location: String) -> Self {
        TbsTargetData {
            kind,
            name,
            location,
            srcs: BTreeSet::new(),
            hdrs: BTreeSet::new(),
            deps: BTreeSet::new(),
            copts: Vec::new(),
            defines: Vec::new(),
            linkopts: Vec::new(),
            data: BTreeSet::new(),
            outs: BTreeSet::new(),
            tools: BTreeSet::new(),
            cmd: String::new(),
            local: false,
            main: None,
            static_library: None,
            shared_library: None,
            system_provided: false,
        }
    }
}

impl TbsTargetData {
    /// True iff this target carries no srcs, hdrs, deps, outs, or command —
    /// the "phantom output" shape §8 invariant 3 forbids emitting. A
    /// `cc_import` counts as having content once it names a prebuilt
    /// library, since it has no srcs/hdrs of its own to check instead.
    fn is_phantom(&self) -> bool {
        if self.kind == TargetKind::CcImport {
            return self.static_library.is_none()
                && self.shared_library.is_none()
                && self.hdrs.is_empty()
                && self.deps.is_empty();
        }
        self.srcs.is_empty()
            && self.hdrs.is_empty()
            && self.deps.is_empty()
            && self.outs.is_empty()
            && self.cmd.is_empty()
    }
}

/// Library-kind targets take a `lib` prefix unless the short name already
/// carries one or `add_prefix` is false, mirroring `BazelTarget.depName`'s
/// `addPrefixIfRequired` flag. Other kinds keep their short name verbatim.
/// The SONAME link trigger (§4.6) turns this off for both halves it emits:
/// the inner `cc_library` is an internal implementation detail, not the
/// public name consumers depend on, and the `cc_shared_library` already
/// carries its own `.so` identity without a `lib` prefix layered on top.
fn apply_naming_rule(kind: TargetKind, short_name: &str, add_prefix: bool) -> String {
    match kind {
        TargetKind::CcLibrary | TargetKind::CcSharedLibrary => {
            let base = short_name.trim_end_matches(".a").trim_end_matches(".so");
            if !add_prefix || base.starts_with("lib") {
                base.to_string()
            } else {
                format!("lib{base}")
            }
        }
        _ => short_name.to_string(),
    }
}

#[derive(Clone)]
pub struct TbsTargetRef(pub Rc<RefCell<TbsTargetData>>);

impl TbsTargetRef {
    pub fn new(kind: TargetKind, short_name: &str, location: impl Into<String>) -> Self {
        Self::new_with_prefix(kind, short_name, location, true)
    }

    fn new_with_prefix(kind: TargetKind, short_name: &str, location: impl Into<String>, add_prefix: bool) -> Self {
        let name = apply_naming_rule(kind, short_name, add_prefix);
        TbsTargetRef(Rc::new(RefCell::new(TbsTargetData::new(
            kind,
            name,
            location.into(),
        ))))
    }

    pub fn kind(&self) -> TargetKind {
        self.0.borrow().kind
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn location(&self) -> String {
        self.0.borrow().location.clone()
    }

    /// The reference string another stanza's `deps`/`data`/`tools` entry
    /// should use to point at this target, relative to `from_location`:
    /// `:name` in the same location, `//location:name` otherwise.
    /// External-ref targets carry their own `@repo//...` name as-is and
    /// ignore location.
    pub fn reference_from(&self, from_location: &str) -> String {
        let data = self.0.borrow();
        if data.kind == TargetKind::ExternalRef {
            return data.name.clone();
        }
        if data.location == from_location {
            format!(":{}", data.name)
        } else if data.location.is_empty() {
            format!("//:{}", data.name)
        } else {
            format!("//{}:{}", data.location, data.name)
        }
    }

    pub fn add_src(&self, path: impl Into<String>) {
        self.0.borrow_mut().srcs.insert(path.into());
    }

    pub fn add_hdr(&self, path: impl Into<String>) {
        self.0.borrow_mut().hdrs.insert(path.into());
    }

    pub fn add_dep_ref(&self, reference: impl Into<String>) {
        self.0.borrow_mut().deps.insert(reference.into());
    }

    pub fn add_dep(&self, other: &TbsTargetRef) {
        let reference = other.reference_from(&self.location());
        self.add_dep_ref(reference);
    }

    pub fn add_copt(&self, copt: impl Into<String>) {
        let copt = copt.into();
        let mut data = self.0.borrow_mut();
        if !data.copts.contains(&copt) {
            data.copts.push(copt);
        }
    }

    pub fn add_define(&self, define: impl Into<String>) {
        let define = define.into();
        let mut data = self.0.borrow_mut();
        if !data.defines.contains(&define) {
            data.defines.push(define);
        }
    }

    pub fn add_linkopt(&self, opt: impl Into<String>) {
        let opt = opt.into();
        let mut data = self.0.borrow_mut();
        if !data.linkopts.contains(&opt) {
            data.linkopts.push(opt);
        }
    }

    pub fn add_data(&self, path: impl Into<String>) {
        self.0.borrow_mut().data.insert(path.into());
    }

    pub fn add_out(&self, path: impl Into<String>) {
        self.0.borrow_mut().outs.insert(path.into());
    }

    pub fn add_tool_ref(&self, reference: impl Into<String>) {
        self.0.borrow_mut().tools.insert(reference.into());
    }

    pub fn set_cmd(&self, cmd: impl Into<String>) {
        self.0.borrow_mut().cmd = cmd.into();
    }

    pub fn set_main(&self, main: impl Into<String>) {
        self.0.borrow_mut().main = Some(main.into());
    }

    pub fn set_local(&self, local: bool) {
        self.0.borrow_mut().local = local;
    }

    pub fn set_static_library(&self, path: impl Into<String>) {
        self.0.borrow_mut().static_library = Some(path.into());
    }

    pub fn set_shared_library(&self, path: impl Into<String>) {
        self.0.borrow_mut().shared_library = Some(path.into());
    }

    pub fn set_system_provided(&self, value: bool) {
        self.0.borrow_mut().system_provided = value;
    }
}

/// Owns exactly one `TbsTargetRef` per `TbsTargetId`, guaranteeing exactly
/// one live instance per target identity. Held as a field on the pipeline
/// context, not global state.
#[derive(Default)]
pub struct TargetRegistry {
    cache: ObjectCache<TbsTargetId, TbsTargetRef>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        TargetRegistry {
            cache: ObjectCache::new(),
        }
    }

    pub fn get_or_create(
        &mut self,
        kind: TargetKind,
        location: &str,
        short_name: &str,
    ) -> (TbsTargetId, TbsTargetRef) {
        self.get_or_create_impl(kind, location, short_name, true)
    }

    /// Same as [`Self::get_or_create`], but without the `lib` prefix
    /// `cc_library`/`cc_shared_library` names otherwise get — the SONAME
    /// link trigger's `addPrefixIfRequired = False` opt-out (§3, §4.6).
    pub fn get_or_create_unprefixed(
        &mut self,
        kind: TargetKind,
        location: &str,
        short_name: &str,
    ) -> (TbsTargetId, TbsTargetRef) {
        self.get_or_create_impl(kind, location, short_name, false)
    }

    fn get_or_create_impl(
        &mut self,
        kind: TargetKind,
        location: &str,
        short_name: &str,
        add_prefix: bool,
    ) -> (TbsTargetId, TbsTargetRef) {
        let id = TbsTargetId::new(kind, location, short_name);
        let target = self
            .cache
            .get_or_insert_with(id.clone(), || {
                TbsTargetRef::new_with_prefix(kind, short_name, location, add_prefix)
            })
            .clone();
        (id, target)
    }

    pub fn get(&self, id: &TbsTargetId) -> Option<&TbsTargetRef> {
        self.cache.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &TbsTargetRef> {
        self.cache.values()
    }
}

fn quote_list(label: &str, values: impl Iterator<Item = String>, out: &mut Vec<String>) {
    let values: Vec<String> = values.collect();
    if values.is_empty() {
        return;
    }
    out.push(format!("    {label} = ["));
    for v in values {
        out.push(format!("        \"{v}\","));
    }
    out.push("    ],".to_string());
}

/// Renders one target's stanza, field order name/srcs/hdrs/copts/defines/
/// linkopts/data/deps (§4.7 item 2), plus the kind-specific extra fields
/// (`outs`/`cmd`/`tools` for genrules, `main` for binaries, library paths
/// for cc_import).
fn render_stanza(target: &TbsTargetRef) -> Vec<String> {
    let data = target.0.borrow();
    let mut lines = Vec::new();
    lines.push(format!("{}(", data.kind.stanza_keyword()));
    lines.push(format!("    name = \"{}\",", data.name));

    quote_list("srcs", data.srcs.iter().cloned(), &mut lines);
    quote_list("hdrs", data.hdrs.iter().cloned(), &mut lines);
    quote_list("copts", data.copts.iter().cloned(), &mut lines);
    quote_list("defines", data.defines.iter().cloned(), &mut lines);
    quote_list("linkopts", data.linkopts.iter().cloned(), &mut lines);
    quote_list("data", data.data.iter().cloned(), &mut lines);

    if data.kind == TargetKind::Genrule {
        quote_list("outs", data.outs.iter().cloned(), &mut lines);
        quote_list("tools", data.tools.iter().cloned(), &mut lines);
        lines.push(format!("    cmd = \"{}\",", data.cmd.replace('"', "\\\"")));
        if data.local {
            lines.push("    local = True,".to_string());
        }
    }

    if let Some(main) = &data.main {
        lines.push(format!("    main = \"{main}\","));
    }

    if data.kind == TargetKind::CcImport {
        if let Some(path) = &data.static_library {
            lines.push(format!("    static_library = \"{path}\","));
        }
        if let Some(path) = &data.shared_library {
            lines.push(format!("    shared_library = \"{path}\","));
        }
        if data.system_provided {
            lines.push("    system_provided = True,".to_string());
        }
        lines.push("    visibility = [\"//visibility:public\"],".to_string());
    }

    let mut deps: Vec<String> = data.deps.iter().cloned().collect();
    helpers::sort_refs(&mut deps);
    quote_list("deps", deps.into_iter(), &mut lines);

    lines.push(")".to_string());
    lines
}

/// Renders one `BUILD.bazel`-equivalent file's content for a grouping
/// location (§4.7): sorted load directives, an `exports_files` stanza for
/// any exported-file targets, then one sorted stanza per real target.
fn render_location(location: &str, targets: &[TbsTargetRef]) -> String {
    let targets: Vec<TbsTargetRef> = targets
        .iter()
        .filter(|t| t.kind() == TargetKind::ExportedFile || !t.0.borrow().is_phantom())
        .cloned()
        .collect();
    let targets = &targets[..];

    let mut kinds: BTreeSet<TargetKind> = BTreeSet::new();
    for target in targets {
        kinds.insert(target.kind());
    }

    let mut load_lines: Vec<String> = Vec::new();
    for kind in &kinds {
        if let Some((path, symbol)) = kind.load_directive() {
            load_lines.push(format!("load(\"{path}\", \"{symbol}\")"));
        }
    }
    let has_generated_includes = targets
        .iter()
        .any(|t| t.0.borrow().copts.iter().any(|c| c.contains("add_bazel_out_prefix")));
    if has_generated_includes {
        load_lines.push("load(\"//bazel:generated.bzl\", \"add_bazel_out_prefix\")".to_string());
    }
    load_lines.sort();
    load_lines.dedup();

    let mut body: Vec<String> = Vec::new();

    let exported: Vec<String> = targets
        .iter()
        .filter(|t| t.kind() == TargetKind::ExportedFile)
        .map(|t| t.name())
        .collect();
    if !exported.is_empty() {
        let mut names = exported;
        names.sort();
        body.push("exports_files([".to_string());
        for name in names {
            body.push(format!("    \"{name}\","));
        }
        body.push("])".to_string());
        body.push(String::new());
    }

    let mut real_targets: Vec<&TbsTargetRef> = targets
        .iter()
        .filter(|t| !matches!(t.kind(), TargetKind::ExportedFile | TargetKind::ExternalRef))
        .collect();
    real_targets.sort_by_key(|t| t.name());

    for target in real_targets {
        body.extend(render_stanza(target));
        body.push(String::new());
    }

    let mut out = load_lines;
    if !out.is_empty() {
        out.push(String::new());
    }
    out.extend(body);
    out.join("\n").trim_end().to_string() + "\n"
}

/// Groups every non-empty target by its grouping location and renders one
/// file per location. `BTreeMap` keeps the returned iteration order
/// deterministic for callers that also want to log what they wrote.
pub fn render_all(registry: &TargetRegistry) -> BTreeMap<String, String> {
    let mut by_location: BTreeMap<String, Vec<TbsTargetRef>> = BTreeMap::new();
    for target in registry.all() {
        by_location
            .entry(target.location())
            .or_default()
            .push(target.clone());
    }

    by_location
        .into_iter()
        .map(|(location, targets)| (location.clone(), render_location(&location, &targets)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_name_gets_lib_prefix() {
        let t = TbsTargetRef::new(TargetKind::CcLibrary, "foo", "dir");
        assert_eq!(t.name(), "libfoo");
    }

    #[test]
    fn already_prefixed_name_is_untouched() {
        let t = TbsTargetRef::new(TargetKind::CcLibrary, "libfoo.so", "dir");
        assert_eq!(t.name(), "libfoo");
    }

    #[test]
    fn reference_uses_colon_in_same_location_and_double_slash_elsewhere() {
        let a = TbsTargetRef::new(TargetKind::CcLibrary, "a", "dir");
        assert_eq!(a.reference_from("dir"), ":liba");
        assert_eq!(a.reference_from("other"), "//dir:liba");
    }

    #[test]
    fn external_ref_keeps_its_own_name() {
        let ext = TbsTargetRef::new(TargetKind::ExternalRef, "@boost//:headers", "");
        assert_eq!(ext.reference_from("anywhere"), "@boost//:headers");
    }

    #[test]
    fn registry_returns_same_instance_for_same_identity() {
        let mut reg = TargetRegistry::new();
        let (_, a) = reg.get_or_create(TargetKind::CcLibrary, "dir", "foo");
        a.add_src("foo.cc");
        let (_, b) = reg.get_or_create(TargetKind::CcLibrary, "dir", "foo");
        assert!(b.0.borrow().srcs.contains("foo.cc"));
    }

    #[test]
    fn unprefixed_registry_entry_skips_the_lib_prefix() {
        let mut reg = TargetRegistry::new();
        let (_, inner) = reg.get_or_create_unprefixed(TargetKind::CcLibrary, "dir", "inner_foo");
        let (_, shared) = reg.get_or_create_unprefixed(TargetKind::CcSharedLibrary, "dir", "foo");
        assert_eq!(inner.name(), "inner_foo");
        assert_eq!(shared.name(), "foo");
    }

    #[test]
    fn stanza_field_order_is_name_srcs_hdrs_copts_defines_linkopts_data_deps() {
        let t = TbsTargetRef::new(TargetKind::CcLibrary, "foo", "dir");
        t.add_src("foo.cc");
        t.add_hdr("foo.h");
        t.add_copt("-Idir");
        t.add_define("FOO=1");
        t.add_linkopt("-lm");
        t.add_data("data.txt");
        t.add_dep_ref(":libbar");
        let lines = render_stanza(&t);
        let field_of = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();
        assert!(field_of("srcs") < field_of("hdrs"));
        assert!(field_of("hdrs") < field_of("copts"));
        assert!(field_of("copts") < field_of("defines"));
        assert!(field_of("defines") < field_of("linkopts"));
        assert!(field_of("linkopts") < field_of("data"));
        assert!(field_of("data") < field_of("deps"));
    }

    #[test]
    fn phantom_target_with_no_content_is_not_emitted() {
        let mut reg = TargetRegistry::new();
        let (_, empty) = reg.get_or_create(TargetKind::CcLibrary, "dir", "ghost");
        let _ = &empty;
        let (_, real) = reg.get_or_create(TargetKind::CcLibrary, "dir", "real");
        real.add_src("real.cc");
        let rendered = render_all(&reg);
        let content = &rendered["dir"];
        assert!(!content.contains("ghost"));
        assert!(content.contains("libreal"));
    }

    #[test]
    fn cc_import_with_library_path_but_no_srcs_is_not_phantom() {
        let t = TbsTargetRef::new(TargetKind::CcImport, "openssl", "third_party");
        t.set_static_library("third_party/libssl.a".to_string());
        assert!(!t.0.borrow().is_phantom());
    }

    #[test]
    fn render_location_sorts_stanzas_and_loads() {
        let mut reg = TargetRegistry::new();
        let (_, b) = reg.get_or_create(TargetKind::CcLibrary, "dir", "bbb");
        let (_, a) = reg.get_or_create(TargetKind::CcBinary, "dir", "aaa");
        a.add_dep(&b);
        let rendered = render_all(&reg);
        let content = &rendered["dir"];
        let lib_pos = content.find("cc_library(").unwrap();
        let bin_pos = content.find("cc_binary(").unwrap();
        // "aaa" (cc_binary) sorts before "libbbb" (cc_library, lib-prefixed):
        // stanzas order by rendered target name, not by declaration order or kind.
        assert!(bin_pos < lib_pos, "stanzas must sort by target name, not kind");
        assert!(content.contains("load(\"@rules_cc//cc:defs.bzl\", \"cc_binary\")"));
        assert!(content.contains("load(\"@rules_cc//cc:defs.bzl\", \"cc_library\")"));
    }
}
