// ============================================================================
// ninja.rs — Ninja-like textual build description parser (component A)
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::graph::{BuildRef, BuildTargetRef, Rule, TargetType};

/// Stanzas that are recognized but carry no graph effect.
const IGNORED_STANZA: &[&str] = &["ninja_required_version", "default"];

/// Output names that are CMake/Ninja scaffolding, never real top-level
/// build products, regardless of how they're otherwise used (§4.1).
pub const IGNORED_TARGETS: &[&str] = &[
    "edit_cache",
    "rebuild_cache",
    "clean",
    "help",
    "install",
    "build.ninja",
    "list_install_components",
    "install/local",
    "install/strip",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Rule,
    Build,
}

pub struct Parser {
    pub build_edges: Vec<BuildRef>,
    pub all_outputs: HashMap<String, BuildTargetRef>,
    pub missing: HashMap<String, BuildTargetRef>,
    pub vars: HashMap<String, String>,
    pub rules: HashMap<String, Rc<RefCell<Rule>>>,
    current_build: Option<BuildRef>,
    current_rule: Option<Rc<RefCell<Rule>>>,
    buffer: Vec<String>,
    directories: Vec<PathBuf>,
    source_root: PathBuf,
    workdir: PathBuf,
    manually_generated: HashMap<String, PathBuf>,
}

impl Parser {
    pub fn new(source_root: PathBuf, workdir: PathBuf, manually_generated: HashMap<String, PathBuf>) -> Self {
        let mut rules = HashMap::new();
        rules.insert("phony".to_string(), Rc::new(RefCell::new(Rule::new("phony"))));
        Parser {
            build_edges: Vec::new(),
            all_outputs: HashMap::new(),
            missing: HashMap::new(),
            vars: HashMap::new(),
            rules,
            current_build: None,
            current_rule: None,
            buffer: Vec::new(),
            directories: Vec::new(),
            source_root,
            workdir,
            manually_generated,
        }
    }

    fn mark_done(&mut self) {
        self.current_build = None;
        self.current_rule = None;
    }

    /// Resolves `$NAME`/`${NAME}` references against the file-scope
    /// variable store. Pseudo-variables (`in`, `out`, `TARGET_FILE`) are
    /// left untouched when `except_vars` names them, matching the
    /// reference tool's `_resolveName(name, exceptVars=...)`.
    pub fn resolve_name(&self, name: &str, except_vars: &[&str]) -> String {
        let mut out = String::new();
        let mut rest = name;
        while let Some(dollar) = rest.find('$') {
            out.push_str(&rest[..dollar]);
            let after_dollar = &rest[dollar + 1..];
            let braced = after_dollar.starts_with('{');
            let scan_source = if braced { &after_dollar[1..] } else { after_dollar };
            let name_len = scan_source
                .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '+'))
                .unwrap_or(scan_source.len());
            if name_len == 0 {
                // No variable-name characters follow `$`/`${`: the `$` is literal.
                out.push('$');
                rest = after_dollar;
                continue;
            }
            let var_name = &scan_source[..name_len];
            let mut consumed = 1 + if braced { 1 } else { 0 } + name_len;
            if braced && scan_source[name_len..].starts_with('}') {
                consumed += 1;
            }
            if except_vars.contains(&var_name) {
                out.push_str(&rest[dollar..dollar + consumed]);
            } else if let Some(value) = self.vars.get(var_name) {
                out.push_str(value);
            } else {
                out.push_str(&rest[dollar..dollar + consumed]);
            }
            rest = &rest[dollar + consumed..];
        }
        out.push_str(rest);
        out
    }

    fn classify_output(&self, raw: &str) -> BuildTargetRef {
        if let Some(existing) = self.all_outputs.get(raw) {
            return existing.clone();
        }
        if let Some(existing) = self.missing.get(raw) {
            return existing.clone();
        }

        let target = BuildTargetRef::new(raw);
        let as_path = Path::new(raw);
        let absolute = if as_path.is_absolute() {
            as_path.to_path_buf()
        } else {
            self.workdir.join(as_path)
        };

        if self.manually_generated.values().any(|p| p == &absolute) {
            target.mark_as_manual();
        } else if absolute.exists() {
            let inside_root = absolute.starts_with(&self.source_root) || absolute.starts_with(&self.workdir);
            if inside_root {
                target.0.borrow_mut().is_file = true;
                target.0.borrow_mut().target_type = TargetType::File;
            } else {
                target.mark_as_external();
            }
        }
        target
    }

    fn handle_rule(&mut self, arr: &[String]) {
        let rule = Rc::new(RefCell::new(Rule::new(arr[1].clone())));
        self.rules.insert(arr[1].clone(), rule.clone());
        self.current_rule = Some(rule);
    }

    fn handle_build(&mut self, arr: &[String]) {
        // arr[0] == "build"; walk outputs until one ends in ':'.
        let mut idx = 1;
        let mut outputs_raw: Vec<String> = Vec::new();
        while idx < arr.len() {
            let token = &arr[idx];
            if let Some(stripped) = token.strip_suffix(':') {
                outputs_raw.push(stripped.to_string());
                idx += 1;
                break;
            }
            outputs_raw.push(token.clone());
            idx += 1;
        }
        if idx >= arr.len() {
            return;
        }
        let rulename = arr[idx].clone();
        idx += 1;

        let mut raw_inputs: Vec<String> = Vec::new();
        let mut raw_depends: Vec<String> = Vec::new();
        let mut target = 0; // 0 = inputs, 1 = depends
        for token in &arr[idx..] {
            if token == "|" || token == "||" {
                target = 1;
                continue;
            }
            if target == 0 {
                raw_inputs.push(token.clone());
            } else {
                raw_depends.push(token.clone());
            }
        }

        if rulename == "phony" && raw_inputs.is_empty() {
            raw_depends.retain(|d| !Path::new(d).is_dir());
        }

        let inputs: Vec<BuildTargetRef> = raw_inputs
            .iter()
            .map(|s| {
                let p = self.workdir.join(s);
                if p.exists() {
                    BuildTargetRef::new(s.clone()).mark_as_file()
                } else if let Some(existing) = self.all_outputs.get(s) {
                    existing.clone()
                } else {
                    let v = BuildTargetRef::new(s.clone());
                    v.mark_as_unknown();
                    self.missing.insert(s.clone(), v.clone());
                    v
                }
            })
            .collect();

        let depends: Vec<BuildTargetRef> = raw_depends
            .iter()
            .map(|d| {
                if let Some(existing) = self.all_outputs.get(d) {
                    existing.clone()
                } else {
                    let v = BuildTargetRef::new(d.clone());
                    v.mark_as_unknown();
                    self.missing.insert(d.clone(), v.clone());
                    v
                }
            })
            .collect();

        let outputs: Vec<BuildTargetRef> = outputs_raw
            .iter()
            .map(|name| {
                let target = if let Some(pending) = self.missing.remove(name) {
                    pending.mark_as_known();
                    pending
                } else {
                    self.classify_output(name)
                };
                self.all_outputs.insert(name.clone(), target.clone());
                target
            })
            .collect();

        let rule = match self.rules.get(&rulename) {
            Some(r) => r.clone(),
            None => {
                // A reference to an undeclared rule is logged, not fatal:
                // the edge simply never materializes, and its outputs
                // will surface through the normal unresolved-node check
                // if anything downstream needed them.
                return;
            }
        };

        let build = BuildRef::new(outputs, rule, inputs, depends);
        self.current_build = Some(build.clone());
        self.build_edges.push(build);
    }

    fn handle_variable(&mut self, name: String, value: String) {
        self.vars.insert(name, value);
    }

    fn handle_include(&mut self, filename_token: &str) -> Result<()> {
        let dir = self.directories.last().cloned().unwrap_or_default();
        let filename = dir.join(filename_token);
        let content = std::fs::read_to_string(&filename).map_err(|e| Error::io(filename.clone(), e))?;
        let cur_dir = filename
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        self.parse(&lines, cur_dir)
    }

    /// Splits a line on single spaces not preceded by an unescaped `$`,
    /// i.e. `a$ b c` tokenizes as `["a$ b", "c"]`.
    fn tokenize(line: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == ' ' {
                let escaped = current.ends_with('$');
                if escaped {
                    current.push(' ');
                } else if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            } else {
                current.push(chars[i]);
            }
            i += 1;
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }

    pub fn parse(&mut self, content: &[String], current_dir: PathBuf) -> Result<()> {
        self.directories.push(current_dir);

        for raw_line in content {
            let line = raw_line.trim_end();
            if line.starts_with('#') {
                continue;
            }
            let line = if let Some(stripped) = line.strip_suffix('$') {
                self.buffer.push(stripped.to_string());
                continue;
            } else if !self.buffer.is_empty() {
                self.buffer.push(line.to_string());
                let joined = self.buffer.join("");
                self.buffer.clear();
                joined
            } else {
                line.to_string()
            };

            if line.is_empty() {
                self.mark_done();
                continue;
            }

            let arr = Self::tokenize(&line);
            if arr.is_empty() {
                continue;
            }

            if arr[0] == "rule" {
                self.handle_rule(&arr);
                continue;
            }
            if arr[0] == "build" {
                self.handle_build(&arr);
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                let scope = if self.current_build.is_some() {
                    Some(Scope::Build)
                } else if self.current_rule.is_some() {
                    Some(Scope::Rule)
                } else {
                    None
                };
                if let Some(scope) = scope {
                    let trimmed = line.trim_start();
                    if let Some((key, value)) = trimmed.split_once('=') {
                        let key = key.trim().to_string();
                        let value = value.trim().to_string();
                        match scope {
                            Scope::Build => {
                                if let Some(build) = &self.current_build {
                                    build.0.borrow_mut().vars.insert(key, value);
                                }
                            }
                            Scope::Rule => {
                                if let Some(rule) = &self.current_rule {
                                    rule.borrow_mut().vars.insert(key, value);
                                }
                            }
                        }
                    }
                }
                continue;
            }

            if IGNORED_STANZA.contains(&arr[0].as_str()) {
                continue;
            }

            if arr.len() > 1 && arr[1] == "=" {
                self.handle_variable(arr[0].clone(), arr[2..].join(" "));
                continue;
            }

            if arr[0] == "include" && arr.len() > 1 {
                self.handle_include(&arr[1])?;
                continue;
            }
        }

        self.directories.pop();
        Ok(())
    }
}

/// Enumerates the real top-level targets: a root is any output that is a
/// sole input of the (implicit) `all` group, OR used by nothing and not
/// in the ignored-targets list, OR a phony whose inputs are *all* already
/// used elsewhere (see DESIGN.md open-question #1 for the literal
/// disjunction this implements).
pub fn get_toplevels(parser: &Parser) -> Vec<BuildTargetRef> {
    let all_set: std::collections::HashSet<String> =
        ["all".to_string()].into_iter().collect();
    let ignored: std::collections::HashSet<String> =
        IGNORED_TARGETS.iter().map(|s| s.to_string()).collect();

    let mut roots = Vec::new();
    for output in parser.all_outputs.values() {
        if output.is_only_used_by(&all_set) {
            roots.push(output.clone());
            continue;
        }
        if ignored.contains(&output.name()) || output.is_only_used_by(&ignored) {
            continue;
        }
        let produced_by = match output.produced_by() {
            Some(b) => b,
            None => continue,
        };
        if produced_by.is_phony() {
            let inputs = produced_by.0.borrow().inputs.clone();
            let all_used = inputs
                .iter()
                .all(|i| !i.0.borrow().used_by_builds.is_empty());
            if all_used {
                continue;
            }
        }
        if output.0.borrow().used_by_builds.is_empty() {
            roots.push(output.clone());
        }
    }
    roots.sort();
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn new_parser() -> Parser {
        Parser::new(env::temp_dir(), env::temp_dir(), HashMap::new())
    }

    #[test]
    fn tokenize_respects_escaped_space() {
        let tokens = Parser::tokenize("build out$ dir/a.o: CXX_COMPILE a.cc");
        assert_eq!(tokens[0], "build");
        assert_eq!(tokens[1], "out$ dir/a.o:");
    }

    #[test]
    fn parses_rule_and_build() {
        let mut parser = new_parser();
        let lines: Vec<String> = vec![
            "rule CXX_COMPILE".to_string(),
            "  command = clang++ -c $in -o $out".to_string(),
            "".to_string(),
            "build a.o: CXX_COMPILE a.cc".to_string(),
        ];
        parser.parse(&lines, env::temp_dir()).unwrap();

        assert_eq!(parser.build_edges.len(), 1);
        assert!(parser.rules.contains_key("CXX_COMPILE"));
        let build = &parser.build_edges[0];
        assert_eq!(build.rule_name(), "CXX_COMPILE");
    }

    #[test]
    fn resolve_name_preserves_except_vars() {
        let mut parser = new_parser();
        parser.vars.insert("FLAGS".to_string(), "-O2".to_string());
        let resolved = parser.resolve_name("clang++ $FLAGS -c $in -o $out", &["in", "out"]);
        assert_eq!(resolved, "clang++ -O2 -c $in -o $out");
    }

    #[test]
    fn phony_with_empty_inputs_drops_directory_depends() {
        let mut parser = new_parser();
        let tmp = env::temp_dir();
        let lines: Vec<String> = vec![format!("build all: phony || {}", tmp.display())];
        parser.parse(&lines, tmp).unwrap();
        let build = &parser.build_edges[0];
        assert!(build.0.borrow().depends.is_empty());
    }
}
