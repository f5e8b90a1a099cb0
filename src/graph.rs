// ============================================================================
// graph.rs — typed build graph: BuildTarget, Build, Rule (component B)
// ============================================================================
//
// Back-pointers between `BuildTarget` and `Build` are modeled with
// `Rc<RefCell<_>>` rather than raw shared ownership or an arena of integer
// indices: the graph is small (one process run, one project), and
// `Rc<RefCell<_>>` keeps the in-place mutation graph post-processing
// requires — retargeting an alias, pruning a phony edge — straightforward
// without a separate generation-indexed arena. Ownership cycles (target →
// producing edge → output targets) are broken by making `Build::outputs`
// hold `BuildTargetRef`s and `BuildTarget::produced_by` a `Weak` would also
// work, but since the graph is torn down in one shot at process exit we
// accept the `Rc` cycle rather than add indirection the reference
// implementation doesn't need either (it runs under a GC).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ccimport::CCImport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Other,
    Unknown,
    Known,
    ExternalPrebuilt,
    ManuallyGenerated,
    File,
}

/// (header/proto name, include-dir used) — the include-dir may be the
/// literal `/generated` sentinel meaning "resolved via the generated-files
/// manifest rather than the filesystem".
pub type IncludeEdge = (String, String);

pub struct BuildTargetData {
    pub name: String,
    pub short_name: String,
    pub produced_by: Option<BuildRef>,
    pub used_by_builds: Vec<BuildRef>,
    pub is_file: bool,
    pub target_type: TargetType,
    pub includes: Option<Vec<IncludeEdge>>,
    pub explicit_deps: Vec<BuildTargetRef>,
    pub alias: Option<BuildTargetRef>,
    pub top_level: bool,
    pub cc_import: Option<Rc<CCImport>>,
    pub tbs_params: HashMap<String, String>,
}

impl BuildTargetData {
    fn new(name: String) -> Self {
        let short_name = name.clone();
        BuildTargetData {
            name,
            short_name,
            produced_by: None,
            used_by_builds: Vec::new(),
            is_file: false,
            target_type: TargetType::Other,
            includes: None,
            explicit_deps: Vec::new(),
            alias: None,
            top_level: false,
            cc_import: None,
            tbs_params: HashMap::new(),
        }
    }
}

/// Shared handle to a `BuildTargetData`. Equality and hash are by name.
#[derive(Clone)]
pub struct BuildTargetRef(pub Rc<RefCell<BuildTargetData>>);

impl BuildTargetRef {
    pub fn new(name: impl Into<String>) -> Self {
        BuildTargetRef(Rc::new(RefCell::new(BuildTargetData::new(name.into()))))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn mark_as_file(self) -> Self {
        {
            let mut data = self.0.borrow_mut();
            data.is_file = true;
            data.target_type = TargetType::File;
        }
        self
    }

    pub fn mark_as_unknown(&self) {
        self.0.borrow_mut().target_type = TargetType::Unknown;
    }

    pub fn mark_as_known(&self) {
        self.0.borrow_mut().target_type = TargetType::Known;
    }

    pub fn mark_as_manual(&self) {
        self.0.borrow_mut().target_type = TargetType::ManuallyGenerated;
    }

    pub fn mark_as_external(&self) {
        self.0.borrow_mut().target_type = TargetType::ExternalPrebuilt;
    }

    pub fn used_by(&self, build: BuildRef) {
        self.0.borrow_mut().used_by_builds.push(build);
    }

    pub fn is_file(&self) -> bool {
        self.0.borrow().is_file
    }

    pub fn target_type(&self) -> TargetType {
        self.0.borrow().target_type
    }

    pub fn produced_by(&self) -> Option<BuildRef> {
        self.0.borrow().produced_by.clone()
    }

    /// Resolves through a chain of `alias` pointers. After resolution the
    /// chain has length at most 1, but following until a fixpoint is
    /// still correct and cheap for a chain this short.
    pub fn resolved(&self) -> BuildTargetRef {
        let next = self.0.borrow().alias.clone();
        match next {
            Some(target) => target.resolved(),
            None => self.clone(),
        }
    }

    /// True iff every build that consumes this target produces only
    /// outputs named in `target_names` — i.e. this target is purely an
    /// internal alias for something in that closed set. Mirrors the
    /// reference tool's `isOnlyUsedBy`.
    pub fn is_only_used_by(&self, target_names: &HashSet<String>) -> bool {
        let used_by = self.0.borrow().used_by_builds.clone();
        if used_by.is_empty() {
            return false;
        }
        let mut count = 0usize;
        for build in &used_by {
            for output in &build.0.borrow().outputs {
                if target_names.contains(&output.name()) {
                    count += 1;
                }
            }
        }
        count == used_by.len()
    }
}

impl PartialEq for BuildTargetRef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}
impl Eq for BuildTargetRef {}

impl std::hash::Hash for BuildTargetRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl PartialOrd for BuildTargetRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for BuildTargetRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name().cmp(&other.name())
    }
}

impl std::fmt::Debug for BuildTargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub name: String,
    pub vars: HashMap<String, String>,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Rule {
            name: name.into(),
            vars: HashMap::new(),
        }
    }

    pub fn is_phony(&self) -> bool {
        self.name == "phony"
    }
}

pub struct BuildData {
    pub outputs: Vec<BuildTargetRef>,
    pub rule: Rc<RefCell<Rule>>,
    pub inputs: Vec<BuildTargetRef>,
    pub depends: Vec<BuildTargetRef>,
    pub vars: HashMap<String, String>,
    /// Set once lowering has produced a TBS target for this edge, so a
    /// second visit reuses it instead of lowering again.
    pub associated_tbs_target: Option<crate::tbs::TbsTargetId>,
    pub pruned: bool,
}

#[derive(Clone)]
pub struct BuildRef(pub Rc<RefCell<BuildData>>);

impl BuildRef {
    /// Wires back-pointers the way the reference `Build.__init__` does:
    /// each output's `produced_by` becomes this edge, and each input/
    /// dependency records this edge in its `used_by_builds`.
    pub fn new(
        outputs: Vec<BuildTargetRef>,
        rule: Rc<RefCell<Rule>>,
        inputs: Vec<BuildTargetRef>,
        depends: Vec<BuildTargetRef>,
    ) -> Self {
        let build = BuildRef(Rc::new(RefCell::new(BuildData {
            outputs: outputs.clone(),
            rule,
            inputs: inputs.clone(),
            depends: depends.clone(),
            vars: HashMap::new(),
            associated_tbs_target: None,
            pruned: false,
        })));

        for output in &outputs {
            output.0.borrow_mut().produced_by = Some(build.clone());
        }
        for input in &inputs {
            input.used_by(build.clone());
        }
        for dep in &depends {
            dep.used_by(build.clone());
        }

        build
    }

    pub fn rule_name(&self) -> String {
        self.0.borrow().rule.borrow().name.clone()
    }

    pub fn is_phony(&self) -> bool {
        self.0.borrow().rule.borrow().is_phony()
    }

    /// True for the "empty phony" shape the pruning and virtual-dependency
    /// checks both look for: a phony edge with no inputs and no depends.
    pub fn is_empty_phony(&self) -> bool {
        let data = self.0.borrow();
        data.rule.borrow().is_phony() && data.inputs.is_empty() && data.depends.is_empty()
    }

    /// Looks up `name` against the scope chain edge → rule (variables are
    /// merged from file scope → rule scope → edge scope, later shadowing
    /// earlier). File scope rarely carries anything a command-classifying
    /// caller needs, so it's resolved separately by the parser at parse
    /// time rather than stored per-edge here.
    pub fn var(&self, name: &str) -> Option<String> {
        let data = self.0.borrow();
        data.vars
            .get(name)
            .cloned()
            .or_else(|| data.rule.borrow().vars.get(name).cloned())
    }

    /// The resolved `command`/`COMMAND` template for this edge: the edge's
    /// own value if it overrides one, else the rule's. CMake-generated
    /// Ninja files almost always define `command` on the rule and leave
    /// edges carrying only `FLAGS`/`DEFINES`/`LINK_FLAGS`/`SONAME`, so
    /// falling back to rule scope here is load-bearing, not a nicety.
    ///
    /// `CUSTOM_COMMAND`'s rule conventionally reads `command = $COMMAND`,
    /// indirecting to an edge-scoped `COMMAND` carrying the literal tool
    /// invocation; that one level of indirection is resolved here so
    /// classification (component F) and the generator executor (component
    /// E) see the real command text. Compile/link rules never indirect
    /// this way, so their `$LINK_FLAGS`/`-c` substrings used by the
    /// classifier's substring dispatch survive untouched.
    pub fn command(&self) -> String {
        let raw = self.var("command").or_else(|| self.var("COMMAND")).unwrap_or_default();
        if raw.trim() == "$COMMAND" {
            self.var("COMMAND").unwrap_or_default()
        } else {
            raw
        }
    }
}

impl std::fmt::Debug for BuildRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.0.borrow();
        write!(
            f,
            "{} + {} => {} => {}",
            data.inputs
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>()
                .join(" "),
            data.depends
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>()
                .join(" "),
            data.rule.borrow().name,
            data.outputs
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// True when `dep`'s producing edge is itself an empty phony edge, the
/// shape CMake uses for its synthetic `ccmake`/`cmake`/`ctest` rebuild
/// hooks; recurses through a dependency's own depends. Mirrors the
/// reference tool's `BuildTarget.depsAreVirtual`, generalized to operate
/// on one dependency target directly rather than on `self.producedby`.
fn dep_is_virtual(dep: &BuildTargetRef) -> bool {
    if dep.is_file() {
        return false;
    }
    let produced_by = match dep.produced_by() {
        Some(b) => b,
        None => {
            // Nothing produces this dependency: assume virtual, matching
            // the reference tool's conservative default rather than
            // surfacing it as a missing node.
            return true;
        }
    };
    if produced_by.is_empty_phony() {
        return true;
    }
    let depends = produced_by.0.borrow().depends.clone();
    for d in &depends {
        if dep_is_virtual(d) {
            return true;
        }
    }
    false
}

/// Filters a `Build`'s `depends` set down to the ones that should be
/// walked during lowering, dropping virtual (CMake-scaffolding) deps.
pub fn real_depends(build: &BuildRef) -> Vec<BuildTargetRef> {
    build
        .0
        .borrow()
        .depends
        .iter()
        .filter(|d| !dep_is_virtual(d))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Graph post-processing: alias resolution, then phony pruning.
// ---------------------------------------------------------------------------

/// Resolves full-name/short-name alias pairs: when a single `Build`
/// produces both a workdir-prefixed full name and a short relative name,
/// the short-name output becomes an alias for the full-name one, and every
/// existing reference to the short name is retargeted in place.
pub fn resolve_aliases(all_outputs: &HashMap<String, BuildTargetRef>, workdir: &str) {
    let prefix = if workdir.ends_with('/') {
        workdir.to_string()
    } else {
        format!("{workdir}/")
    };

    for (name, target) in all_outputs.iter() {
        if let Some(short) = name.strip_prefix(&prefix) {
            if let Some(short_target) = all_outputs.get(short) {
                if !Rc::ptr_eq(&short_target.0, &target.0) {
                    short_target.0.borrow_mut().alias = Some(target.clone());
                }
            }
        }
    }
}

/// A build edge is prunable iff every one of its inputs is itself produced
/// only by a phony edge (or has no producer at all). Postorder visitation,
/// each edge visited at most once.
pub fn prune_phony_edges(top_levels: &[BuildTargetRef]) {
    let mut visited: HashSet<*const RefCell<BuildData>> = HashSet::new();

    fn inputs_all_phony_or_leaf(build: &BuildRef) -> bool {
        build.0.borrow().inputs.iter().all(|input| match input.produced_by() {
            None => true,
            Some(producer) => producer.is_phony(),
        })
    }

    fn visit(
        target: &BuildTargetRef,
        visited: &mut HashSet<*const RefCell<BuildData>>,
    ) {
        let build = match target.produced_by() {
            Some(b) => b,
            None => return,
        };
        let ptr = Rc::as_ptr(&build.0);
        if visited.contains(&ptr) {
            return;
        }
        visited.insert(ptr);

        let inputs = build.0.borrow().inputs.clone();
        for input in &inputs {
            visit(input, visited);
        }

        if build.is_phony() && !build.0.borrow().inputs.is_empty() && inputs_all_phony_or_leaf(&build) {
            build.0.borrow_mut().pruned = true;
        }
    }

    for top in top_levels {
        visit(top, &mut visited);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> BuildTargetRef {
        BuildTargetRef::new(name).mark_as_file()
    }

    #[test]
    fn alias_resolution_retargets_short_name() {
        let mut outputs = HashMap::new();
        let full = BuildTargetRef::new("/work/out/app");
        let short = BuildTargetRef::new("app");
        outputs.insert(full.name(), full.clone());
        outputs.insert(short.name(), short.clone());

        resolve_aliases(&outputs, "/work/out");

        assert_eq!(short.resolved().name(), full.name());
        assert_eq!(full.resolved().name(), full.name());
    }

    #[test]
    fn virtual_dependency_through_empty_phony_is_skipped() {
        let rule_phony = Rc::new(RefCell::new(Rule::new("phony")));
        let ctest_stub = BuildTargetRef::new("ctest");
        BuildRef::new(vec![ctest_stub.clone()], rule_phony, vec![], vec![]);

        assert!(dep_is_virtual(&ctest_stub));
    }

    #[test]
    fn file_dependency_is_never_virtual() {
        let f = file("main.cc");
        assert!(!dep_is_virtual(&f));
    }

    #[test]
    fn phony_with_real_input_is_not_prunable() {
        let rule_compile = Rc::new(RefCell::new(Rule::new("CXX_COMPILE")));
        let obj = BuildTargetRef::new("a.o");
        BuildRef::new(vec![obj.clone()], rule_compile, vec![file("a.cc")], vec![]);

        let rule_phony = Rc::new(RefCell::new(Rule::new("phony")));
        let alias = BuildTargetRef::new("all");
        let build = BuildRef::new(vec![alias.clone()], rule_phony, vec![obj.clone()], vec![]);

        prune_phony_edges(&[alias]);
        assert!(!build.0.borrow().pruned);
    }
}
