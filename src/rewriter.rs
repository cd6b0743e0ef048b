//! Per-method instruction rewriting
//!
//! The rewrite is a pipeline of pure stages over the immutable method body:
//!
//! 1. [`analyze`] walks the instruction stream once and computes the line
//!    table, the basic-block leaders, the call sites that need
//!    invocation-line probes, and the chained-constructor flag.
//! 2. [`instrument`] emits a new body with probes inserted at entry, every
//!    exit, leader line markers, and in-scope call sites, remapping jump
//!    targets over the insertions.
//! 3. [`finish`] assembles the catalog record, applying the constructor
//!    first-line correction.
//!
//! A method whose descriptor cannot be parsed is left completely
//! unmodified; a partially rewritten body never reaches the output.

use crate::filter::ClassFilter;
use crate::ir::{Class, Insn, Method, MethodKey, Probe, Program};
use crate::recorder::{MethodInfo, TraceSession};
use crate::types::{Descriptor, DescriptorError, TypeCode};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Compiler-generated accessor methods are never call-site tracked
const ACCESSOR_PATTERN: &str = r"^access\$\d\d\d$";

/// Per-method rewrite failures
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("cannot parse descriptor of {class}.{method}: {source}")]
    BadDescriptor {
        class: String,
        method: String,
        #[source]
        source: DescriptorError,
    },
}

/// Everything one analysis pass learns about a method body
#[derive(Debug, Default)]
struct MethodAnalysis {
    first_marker_line: Option<u32>,
    second_marker_line: Option<u32>,
    last_marker_line: Option<u32>,
    /// Leader lines found at jump/switch targets and run boundaries
    leaders: BTreeSet<u32>,
    /// Line-marker instruction index -> line needing a block probe
    block_sites: HashMap<usize, u32>,
    /// Invoke instruction index -> invocation line to set before the call
    invoke_lines: HashMap<usize, u32>,
    /// Constructor chained into `this()`/`super()`
    calls_super_or_this: bool,
}

/// Instrument every selected class of a program
///
/// Classes the filter rejects pass through untouched and still execute,
/// just silently.
pub fn instrument_program(
    program: &Program,
    filter: &ClassFilter,
    session: &mut TraceSession,
) -> Program {
    let classes = program
        .classes
        .iter()
        .map(|class| {
            if filter.should_instrument(Some(&class.name)) {
                rewrite_class(class, filter, session)
            } else {
                class.clone()
            }
        })
        .collect();
    Program { classes }
}

/// Rewrite one class: every concrete method gains probes, and the class's
/// accumulated leaders are union-merged into its source's leader file
pub fn rewrite_class(class: &Class, filter: &ClassFilter, session: &mut TraceSession) -> Class {
    // No source attribute means a generated class; leave it alone
    let source = match &class.source {
        Some(s) if s != "<generated>" => s.clone(),
        _ => return class.clone(),
    };

    let source_key = source_key(&class.name, &source);
    session.init_leader_file(&source_key);

    let accessor = Regex::new(ACCESSOR_PATTERN).unwrap();
    let mut class_leaders: BTreeSet<u32> = BTreeSet::new();

    let methods = class
        .methods
        .iter()
        .map(|method| {
            // Interfaces and abstract stubs have no body to instrument, and
            // synthetic methods are compiler plumbing
            if method.is_abstract || method.is_synthetic || method.body.is_empty() {
                return method.clone();
            }
            match rewrite_method(class, method, filter, session, &accessor) {
                Ok((rewritten, leaders)) => {
                    class_leaders.extend(leaders);
                    rewritten
                }
                Err(e) => {
                    // Fatal for this one method only: it runs uninstrumented
                    tracing::error!("skipping instrumentation of one method: {e}");
                    method.clone()
                }
            }
        })
        .collect();

    session.merge_leaders(&source_key, &class_leaders);

    Class {
        name: class.name.clone(),
        source: class.source.clone(),
        fields: class.fields.clone(),
        methods,
    }
}

/// Rewrite one method, returning the instrumented copy and its leader set
fn rewrite_method(
    class: &Class,
    method: &Method,
    filter: &ClassFilter,
    session: &mut TraceSession,
    accessor: &Regex,
) -> Result<(Method, BTreeSet<u32>), RewriteError> {
    let desc =
        Descriptor::parse(&method.descriptor).map_err(|source| RewriteError::BadDescriptor {
            class: class.name.clone(),
            method: method.name.clone(),
            source,
        })?;

    let analysis = analyze(method, filter, accessor);
    let (info, leaders) = finish(class, method, &desc, &analysis);
    let key = session.register_method(info);
    let body = instrument(method, &analysis, &desc, key);

    let mut rewritten = method.clone();
    rewritten.body = body;
    Ok((rewritten, leaders))
}

/// Stage 1: one pure pass over the body
fn analyze(method: &Method, filter: &ClassFilter, accessor: &Regex) -> MethodAnalysis {
    let mut a = MethodAnalysis::default();

    let line_at = line_at_or_after(&method.body);
    let mut current_line: u32 = 0;
    let mut markers_seen = 0usize;
    // Set by anything that ends a straight-line run; the next marker is then
    // a leader and gets a block probe
    let mut after_break = false;
    // Jump-target lines waiting for their first marker
    let mut pending_targets: HashSet<u32> = HashSet::new();

    for (i, insn) in method.body.iter().enumerate() {
        match insn {
            Insn::Line(line) => {
                markers_seen += 1;
                match markers_seen {
                    1 => a.first_marker_line = Some(*line),
                    2 => a.second_marker_line = Some(*line),
                    _ => {}
                }
                a.last_marker_line = Some(*line);

                if after_break || pending_targets.contains(line) {
                    after_break = false;
                    pending_targets.remove(line);
                    // Line 0 is synthetic; no leader, no probe
                    if *line != 0 {
                        a.leaders.insert(*line);
                        a.block_sites.insert(i, *line);
                    }
                }

                current_line = *line;
            }
            Insn::Jump { target, .. } => {
                after_break = true;
                let target_line = line_at[*target];
                if target_line != 0 {
                    pending_targets.insert(target_line);
                }
            }
            Insn::Switch {
                targets,
                default_target,
            } => {
                for t in targets.iter().chain(std::iter::once(default_target)) {
                    let target_line = line_at[*t];
                    if target_line != 0 {
                        a.leaders.insert(target_line);
                    }
                }
                after_break = true;
            }
            Insn::Cmp | Insn::Return => {
                after_break = true;
            }
            Insn::Invoke { owner, name, .. } => {
                if accessor.is_match(name) || !filter.in_scope_owner(owner) {
                    continue;
                }
                if method.is_constructor() && name == "<init>" {
                    a.calls_super_or_this = true;
                }
                if current_line != 0 {
                    a.invoke_lines.insert(i, current_line);
                }
            }
            _ => {}
        }
    }

    a
}

/// Stage 2: emit the instrumented body
///
/// Jump and switch targets are remapped so control transfers land on the
/// probes inserted in front of their target instruction; a jump straight to
/// a return still fires the exit probes.
fn instrument(method: &Method, analysis: &MethodAnalysis, desc: &Descriptor, key: MethodKey) -> Vec<Insn> {
    let is_clinit = method.is_class_initializer();
    let mut out: Vec<Insn> = Vec::with_capacity(method.body.len() * 2);
    let mut new_pos: Vec<usize> = vec![0; method.body.len()];

    // Entry sequence; for the class initializer the invocation-line state of
    // the triggering method is preserved first
    if is_clinit {
        out.push(Insn::Probe(Probe::BackupInvocationLine));
        out.push(Insn::Probe(Probe::SaveClinitInvocationLine));
    }
    out.push(Insn::Probe(Probe::Enter(key)));
    if !is_clinit {
        for (index, code) in desc.params.iter().enumerate() {
            out.push(Insn::Probe(Probe::CaptureArg {
                index,
                code: *code,
            }));
        }
    }

    for (i, insn) in method.body.iter().enumerate() {
        new_pos[i] = out.len();
        match insn {
            Insn::Return => {
                out.push(Insn::Probe(Probe::Exit(key)));
                if desc.ret != TypeCode::Void {
                    out.push(Insn::Probe(Probe::CaptureReturn { code: desc.ret }));
                }
                if is_clinit {
                    out.push(Insn::Probe(Probe::RestoreInvocationLine));
                }
                out.push(Insn::Return);
            }
            Insn::Invoke { .. } => {
                if let Some(line) = analysis.invoke_lines.get(&i) {
                    out.push(Insn::Probe(Probe::SetInvocationLine(*line)));
                }
                out.push(insn.clone());
            }
            Insn::Line(line) => {
                out.push(Insn::Line(*line));
                if analysis.block_sites.contains_key(&i) {
                    out.push(Insn::Probe(Probe::Block {
                        method: key,
                        line: *line,
                    }));
                }
            }
            other => out.push(other.clone()),
        }
    }

    // Remap control transfers over the insertions
    for insn in out.iter_mut() {
        match insn {
            Insn::Jump { target, .. } => *target = new_pos[*target],
            Insn::Switch {
                targets,
                default_target,
            } => {
                for t in targets.iter_mut() {
                    *t = new_pos[*t];
                }
                *default_target = new_pos[*default_target];
            }
            _ => {}
        }
    }

    out
}

/// Stage 3: assemble the catalog record and the final leader set
fn finish(
    class: &Class,
    method: &Method,
    desc: &Descriptor,
    analysis: &MethodAnalysis,
) -> (MethodInfo, BTreeSet<u32>) {
    let mut leaders = analysis.leaders.clone();

    // Constructors report their second marker: the first corresponds to the
    // synthetic constructor-signature line. A chained this()/super()
    // constructor has no such line, so the first marker is correct after
    // all and its backed-up leader is restored.
    let mut first_line = if method.is_constructor() {
        analysis.second_marker_line
    } else {
        analysis.first_marker_line
    };
    if method.is_constructor() && analysis.calls_super_or_this {
        first_line = analysis.first_marker_line;
    }
    if let Some(line) = first_line {
        if line != 0 {
            leaders.insert(line);
        }
    }

    leaders.remove(&0);

    // A return spanning multiple lines ends past the last marker; the
    // highest leader is the better estimate then
    let mut last_line = analysis.last_marker_line;
    if let (Some(last), Some(max)) = (last_line, leaders.iter().next_back().copied()) {
        if max > last {
            last_line = Some(max);
        }
    }

    let info = MethodInfo {
        class_name: class.name.clone(),
        method_name: method.name.clone(),
        source_path: source_path(&class.name, class.source.as_deref().unwrap_or("")),
        param_codes: desc.params.clone(),
        return_code: desc.ret,
        first_line,
        last_line,
    };
    (info, leaders)
}

/// For each instruction index, the line of the first marker at or after it
/// (0 when none follows)
fn line_at_or_after(body: &[Insn]) -> Vec<u32> {
    let mut lines = vec![0u32; body.len()];
    let mut next = 0u32;
    for (i, insn) in body.iter().enumerate().rev() {
        if let Insn::Line(line) = insn {
            next = *line;
        }
        lines[i] = next;
    }
    lines
}

/// Package-qualified source path: `demo/Fib` + `Fib.java` -> `demo/Fib.java`
fn source_path(class_name: &str, source: &str) -> String {
    match class_name.rfind('/') {
        Some(idx) => format!("{}/{source}", &class_name[..idx]),
        None => source.to_string(),
    }
}

/// Leader-file key: package path plus source stem, slashes turned to dashes
fn source_key(class_name: &str, source: &str) -> String {
    let stem = match source.rfind('.') {
        Some(idx) => &source[..idx],
        None => source,
    };
    match class_name.rfind('/') {
        Some(idx) => format!("{}/{stem}", &class_name[..idx]).replace('/', "-"),
        None => stem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ir::Const;

    fn session() -> (tempfile::TempDir, TraceSession) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            artifact_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        (dir, TraceSession::new(&config))
    }

    fn class(name: &str, source: &str, methods: Vec<Method>) -> Class {
        Class {
            name: name.to_string(),
            source: Some(source.to_string()),
            fields: vec![],
            methods,
        }
    }

    fn method(name: &str, descriptor: &str, body: Vec<Insn>) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: true,
            is_abstract: false,
            is_synthetic: false,
            body,
        }
    }

    fn rewrite_one(m: Method) -> (Method, BTreeSet<u32>, TraceSession, tempfile::TempDir) {
        let (dir, mut s) = session();
        let c = class("demo/T", "T.java", vec![]);
        let accessor = Regex::new(ACCESSOR_PATTERN).unwrap();
        let (rewritten, leaders) =
            rewrite_method(&c, &m, &ClassFilter::unscoped(), &mut s, &accessor).unwrap();
        (rewritten, leaders, s, dir)
    }

    fn probes(body: &[Insn]) -> Vec<&Probe> {
        body.iter()
            .filter_map(|i| match i {
                Insn::Probe(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_entry_probes_capture_args_in_declaration_order() {
        let m = method("m", "(IJZ)V", vec![Insn::Line(3), Insn::Return]);
        let (rewritten, _, _, _d) = rewrite_one(m);
        let ps = probes(&rewritten.body);
        assert!(matches!(ps[0], Probe::Enter(0)));
        assert!(matches!(
            ps[1],
            Probe::CaptureArg {
                index: 0,
                code: TypeCode::Int
            }
        ));
        assert!(matches!(
            ps[2],
            Probe::CaptureArg {
                index: 1,
                code: TypeCode::Long
            }
        ));
        assert!(matches!(
            ps[3],
            Probe::CaptureArg {
                index: 2,
                code: TypeCode::Bool
            }
        ));
    }

    #[test]
    fn test_exit_probes_capture_nonvoid_return() {
        let m = method(
            "m",
            "()J",
            vec![Insn::Line(3), Insn::Push(Const::Long(9)), Insn::Return],
        );
        let (rewritten, _, _, _d) = rewrite_one(m);
        let ps = probes(&rewritten.body);
        assert!(matches!(ps[ps.len() - 2], Probe::Exit(0)));
        assert!(matches!(
            ps[ps.len() - 1],
            Probe::CaptureReturn {
                code: TypeCode::Long
            }
        ));
        // The exit sequence sits immediately before the return
        assert!(matches!(rewritten.body.last(), Some(Insn::Return)));
    }

    #[test]
    fn test_void_method_has_no_return_capture() {
        let m = method("m", "()V", vec![Insn::Line(3), Insn::Return]);
        let (rewritten, _, _, _d) = rewrite_one(m);
        assert!(!probes(&rewritten.body)
            .iter()
            .any(|p| matches!(p, Probe::CaptureReturn { .. })));
    }

    #[test]
    fn test_clinit_gets_backup_save_and_restore() {
        let m = method("<clinit>", "()V", vec![Insn::Line(3), Insn::Return]);
        let (rewritten, _, _, _d) = rewrite_one(m);
        let ps = probes(&rewritten.body);
        assert!(matches!(ps[0], Probe::BackupInvocationLine));
        assert!(matches!(ps[1], Probe::SaveClinitInvocationLine));
        assert!(matches!(ps[2], Probe::Enter(0)));
        assert!(matches!(ps.last(), Some(Probe::RestoreInvocationLine)));
        // The initializer never captures parameters
        assert!(!ps.iter().any(|p| matches!(p, Probe::CaptureArg { .. })));
    }

    #[test]
    fn test_jump_target_line_becomes_leader_with_block_probe() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(10),
                Insn::Push(Const::Bool(true)),
                Insn::Jump {
                    target: 5,
                    conditional: true,
                },
                Insn::Line(11),
                Insn::Push(Const::Int(0)),
                Insn::Line(12),
                Insn::Return,
            ],
        );
        let (rewritten, leaders, _, _d) = rewrite_one(m);
        // 10 is the entry leader; 11 follows the jump, 12 is its target
        assert_eq!(leaders, BTreeSet::from([10, 11, 12]));
        let block_lines: Vec<u32> = probes(&rewritten.body)
            .iter()
            .filter_map(|p| match p {
                Probe::Block { line, .. } => Some(*line),
                _ => None,
            })
            .collect();
        assert_eq!(block_lines, vec![11, 12]);
    }

    #[test]
    fn test_switch_targets_and_default_become_leaders() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(20),
                Insn::Push(Const::Int(1)),
                Insn::Switch {
                    targets: vec![4, 6],
                    default_target: 8,
                },
                Insn::Push(Const::Int(0)),
                Insn::Line(21),
                Insn::Push(Const::Int(0)),
                Insn::Line(22),
                Insn::Push(Const::Int(0)),
                Insn::Line(23),
                Insn::Return,
            ],
        );
        let (_, leaders, _, _d) = rewrite_one(m);
        assert!(leaders.contains(&21));
        assert!(leaders.contains(&22));
        assert!(leaders.contains(&23));
    }

    #[test]
    fn test_cmp_ends_straight_line_run() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(5),
                Insn::Push(Const::Long(1)),
                Insn::Push(Const::Long(2)),
                Insn::Cmp,
                Insn::Line(6),
                Insn::Return,
            ],
        );
        let (_, leaders, _, _d) = rewrite_one(m);
        assert!(leaders.contains(&6));
    }

    #[test]
    fn test_line_zero_markers_are_excluded() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(0),
                Insn::Cmp,
                Insn::Line(0),
                Insn::Line(7),
                Insn::Return,
            ],
        );
        let (rewritten, leaders, _, _d) = rewrite_one(m);
        assert!(!leaders.contains(&0));
        assert!(!probes(&rewritten.body)
            .iter()
            .any(|p| matches!(p, Probe::Block { line: 0, .. })));
    }

    #[test]
    fn test_invocation_line_probe_before_in_scope_call() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(9),
                Insn::Invoke {
                    owner: "demo/Other".to_string(),
                    name: "helper".to_string(),
                    descriptor: "()V".to_string(),
                },
                Insn::Return,
            ],
        );
        let (rewritten, _, _, _d) = rewrite_one(m);
        let idx = rewritten
            .body
            .iter()
            .position(|i| matches!(i, Insn::Invoke { .. }))
            .unwrap();
        assert!(matches!(
            rewritten.body[idx - 1],
            Insn::Probe(Probe::SetInvocationLine(9))
        ));
    }

    #[test]
    fn test_accessor_calls_are_not_tracked() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(9),
                Insn::Invoke {
                    owner: "demo/Outer".to_string(),
                    name: "access$002".to_string(),
                    descriptor: "()V".to_string(),
                },
                Insn::Return,
            ],
        );
        let (rewritten, _, _, _d) = rewrite_one(m);
        assert!(!probes(&rewritten.body)
            .iter()
            .any(|p| matches!(p, Probe::SetInvocationLine(_))));
    }

    #[test]
    fn test_blocked_owner_calls_are_not_tracked() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(9),
                Insn::Invoke {
                    owner: "java/io/PrintStream".to_string(),
                    name: "println".to_string(),
                    descriptor: "(Ljava/lang/String;)V".to_string(),
                },
                Insn::Return,
            ],
        );
        let (rewritten, _, _, _d) = rewrite_one(m);
        assert!(!probes(&rewritten.body)
            .iter()
            .any(|p| matches!(p, Probe::SetInvocationLine(_))));
    }

    #[test]
    fn test_out_of_package_owner_calls_are_not_tracked() {
        let (_dir, mut s) = session();
        let filter = ClassFilter::new(crate::filter::Scope::Package("demo/".to_string()));
        let c = class("demo/T", "T.java", vec![]);
        let accessor = Regex::new(ACCESSOR_PATTERN).unwrap();
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(9),
                Insn::Invoke {
                    owner: "vendor/Lib".to_string(),
                    name: "go".to_string(),
                    descriptor: "()V".to_string(),
                },
                Insn::Return,
            ],
        );
        let (rewritten, _) = rewrite_method(&c, &m, &filter, &mut s, &accessor).unwrap();
        assert!(!probes(&rewritten.body)
            .iter()
            .any(|p| matches!(p, Probe::SetInvocationLine(_))));
    }

    #[test]
    fn test_plain_constructor_reports_second_marker() {
        let mut m = method(
            "<init>",
            "()V",
            vec![Insn::Line(4), Insn::Line(5), Insn::Return],
        );
        m.is_static = false;
        let (_, leaders, s, _d) = rewrite_one(m);
        let info = s.method_info(0).unwrap();
        assert_eq!(info.first_line, Some(5));
        assert!(leaders.contains(&5));
        assert!(!leaders.contains(&4));
    }

    #[test]
    fn test_chained_constructor_first_line_correction() {
        let mut m = method(
            "<init>",
            "()V",
            vec![
                Insn::Line(4),
                Insn::LoadThis,
                Insn::Invoke {
                    owner: "demo/T".to_string(),
                    name: "<init>".to_string(),
                    descriptor: "(I)V".to_string(),
                },
                Insn::Line(5),
                Insn::Return,
            ],
        );
        m.is_static = false;
        let (_, leaders, s, _d) = rewrite_one(m);
        let info = s.method_info(0).unwrap();
        // The corrected first line is the first marker, whose backed-up
        // leader joins the set
        assert_eq!(info.first_line, Some(4));
        assert!(leaders.contains(&4));
    }

    #[test]
    fn test_last_line_raised_to_max_leader() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(10),
                Insn::Push(Const::Bool(true)),
                Insn::Jump {
                    target: 5,
                    conditional: true,
                },
                Insn::Line(12),
                Insn::Push(Const::Int(0)),
                Insn::Line(11),
                Insn::Return,
            ],
        );
        let (_, _, s, _d) = rewrite_one(m);
        let info = s.method_info(0).unwrap();
        // The final marker is 11 but a leader exists at 12
        assert_eq!(info.last_line, Some(12));
    }

    #[test]
    fn test_method_without_line_table_has_unknown_lines() {
        let m = method("m", "()V", vec![Insn::Return]);
        let (_, leaders, s, _d) = rewrite_one(m);
        let info = s.method_info(0).unwrap();
        assert_eq!(info.first_line, None);
        assert_eq!(info.last_line, None);
        assert!(leaders.is_empty());
    }

    #[test]
    fn test_jump_to_return_lands_on_exit_probe() {
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Jump {
                    target: 1,
                    conditional: false,
                },
                Insn::Return,
            ],
        );
        let (rewritten, _, _, _d) = rewrite_one(m);
        let target = rewritten
            .body
            .iter()
            .find_map(|i| match i {
                Insn::Jump { target, .. } => Some(*target),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            rewritten.body[target],
            Insn::Probe(Probe::Exit(_))
        ));
    }

    #[test]
    fn test_bad_descriptor_leaves_method_unmodified() {
        let (_dir, mut s) = session();
        let good = method("good", "()V", vec![Insn::Line(1), Insn::Return]);
        let bad = method("bad", "(Q)V", vec![Insn::Line(2), Insn::Return]);
        let c = class("demo/T", "T.java", vec![good, bad.clone()]);
        let rewritten = rewrite_class(&c, &ClassFilter::unscoped(), &mut s);

        // The good method gained probes, the bad one is byte-for-byte intact
        assert!(rewritten.methods[0].body.len() > 2);
        assert_eq!(rewritten.methods[1].body.len(), bad.body.len());
        assert!(!rewritten.methods[1]
            .body
            .iter()
            .any(|i| matches!(i, Insn::Probe(_))));
    }

    #[test]
    fn test_abstract_and_synthetic_methods_pass_through() {
        let (_dir, mut s) = session();
        let mut abs = method("a", "()V", vec![]);
        abs.is_abstract = true;
        let mut synth = method("s", "()V", vec![Insn::Return]);
        synth.is_synthetic = true;
        let c = class("demo/T", "T.java", vec![abs, synth]);
        let rewritten = rewrite_class(&c, &ClassFilter::unscoped(), &mut s);
        assert!(rewritten.methods.iter().all(|m| !m
            .body
            .iter()
            .any(|i| matches!(i, Insn::Probe(_)))));
    }

    #[test]
    fn test_generated_class_is_left_alone() {
        let (_dir, mut s) = session();
        let m = method("m", "()V", vec![Insn::Line(1), Insn::Return]);
        let mut c = class("demo/Gen", "<generated>", vec![m]);
        let rewritten = rewrite_class(&c, &ClassFilter::unscoped(), &mut s);
        assert!(!rewritten.methods[0]
            .body
            .iter()
            .any(|i| matches!(i, Insn::Probe(_))));
        c.source = None;
        let rewritten = rewrite_class(&c, &ClassFilter::unscoped(), &mut s);
        assert!(!rewritten.methods[0]
            .body
            .iter()
            .any(|i| matches!(i, Insn::Probe(_))));
    }

    #[test]
    fn test_class_leaders_merge_into_source_file() {
        let (dir, mut s) = session();
        let m = method(
            "m",
            "()V",
            vec![
                Insn::Line(10),
                Insn::Cmp,
                Insn::Line(12),
                Insn::Cmp,
                Insn::Line(11),
                Insn::Return,
            ],
        );
        let c = class("demo/T", "T.java", vec![m]);
        rewrite_class(&c, &ClassFilter::unscoped(), &mut s);
        let text = std::fs::read_to_string(dir.path().join("demo-T.bb")).unwrap();
        assert_eq!(text, "10\n11\n12\n");
    }

    #[test]
    fn test_instrument_program_respects_filter() {
        let (_dir, mut s) = session();
        let filter = ClassFilter::new(crate::filter::Scope::Package("demo/".to_string()));
        let program = Program {
            classes: vec![
                class(
                    "demo/In",
                    "In.java",
                    vec![method("m", "()V", vec![Insn::Line(1), Insn::Return])],
                ),
                class(
                    "other/Out",
                    "Out.java",
                    vec![method("m", "()V", vec![Insn::Line(1), Insn::Return])],
                ),
            ],
        };
        let rewritten = instrument_program(&program, &filter, &mut s);
        assert!(rewritten.classes[0].methods[0]
            .body
            .iter()
            .any(|i| matches!(i, Insn::Probe(_))));
        assert!(!rewritten.classes[1].methods[0]
            .body
            .iter()
            .any(|i| matches!(i, Insn::Probe(_))));
    }

    #[test]
    fn test_source_path_and_key() {
        assert_eq!(source_path("demo/Fib", "Fib.java"), "demo/Fib.java");
        assert_eq!(source_path("Top", "Top.java"), "Top.java");
        assert_eq!(source_key("demo/sub/Fib", "Fib.java"), "demo-sub-Fib");
        assert_eq!(source_key("Top", "Top.java"), "Top");
    }
}
