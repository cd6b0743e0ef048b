//! The trace recorder: probe surface, record serialization, bounded buffers
//!
//! One [`TraceSession`] owns everything the probes touch: the method
//! catalog, the call and traversal buffers, the id and traversal counters,
//! the pending invocation line, the graph walker, and the artifact store.
//! Probe calls thread `&mut TraceSession` explicitly; there is no global
//! state, and tests isolate themselves by constructing a fresh session.
//!
//! Records are plain text, one per line, in exact execution order:
//!
//! ```text
//! 12 3 7 "x"     entry of method 3 invoked from line 12, args 7 and "x"
//! @3:14          basic-block leader at line 14 inside method 3
//! - 3 true       exit of method 3 returning true
//! ```
//!
//! Backpressure is blocking, never lossy: whenever the combined call and
//! traversal buffers would exceed [`MAX_SIZE`], both are synchronously
//! flushed to the store and cleared. Flush failures are reported and
//! swallowed at the probe boundary; no failure ever escapes into the
//! instrumented program's control flow.

use crate::config::EngineConfig;
use crate::filter::is_blocked_namespace;
use crate::ir::{ArrayObj, MethodKey, Value};
use crate::stack_walk::StackWalker;
use crate::store::ArtifactStore;
use crate::types::TypeCode;
use crate::walker::{GraphWalker, CAPTURE_LIMIT};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Combined call+traversal buffer threshold that triggers a synchronous
/// flush. 100,000 measured fastest; 75,000 was close, 150,000 much slower.
pub const MAX_SIZE: usize = 100_000;

/// Frames the recorder asks the walker to skip: the entered method's own
/// frame is already on the shadow stack when its probes run
const PROBE_SKIP_FRAMES: usize = 1;

/// Rewrite-time description of one instrumented method
///
/// Materialized into the catalog only when the entry probe first fires; a
/// method the rewriter visited but the program never invoked gets no id and
/// leaves no gap.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Slash-qualified class name
    pub class_name: String,
    pub method_name: String,
    /// Package-qualified source path, e.g. `demo/Fib.java`
    pub source_path: String,
    pub param_codes: Vec<TypeCode>,
    pub return_code: TypeCode,
    /// First executable line; `None` when the method has no line table
    pub first_line: Option<u32>,
    /// Last executable line; `None` when the method has no line table
    pub last_line: Option<u32>,
}

impl MethodInfo {
    fn catalog_line(&self, id: u32) -> String {
        let first = self.first_line.map(i64::from).unwrap_or(-1);
        let last = self.last_line.map(i64::from).unwrap_or(-1);
        let params: String = if self.param_codes.is_empty() {
            "-".to_string()
        } else {
            self.param_codes.iter().map(|c| c.as_char()).collect()
        };
        format!(
            "{id} {first} {last} {} {} {} {params} {}",
            self.source_path,
            self.class_name,
            self.method_name,
            self.return_code.as_char()
        )
    }
}

/// The runtime side of the engine: receives probe calls, serializes records,
/// buffers, flushes
#[derive(Debug)]
pub struct TraceSession {
    /// Rewrite-time registry; [`MethodKey`] indexes into this
    methods: Vec<MethodInfo>,
    /// Lazily assigned ids, keyed by registry index
    assigned: HashMap<MethodKey, u32>,
    /// Materialized catalog, id-ordered
    catalog: BTreeMap<u32, MethodKey>,
    /// Highest id already flushed to the catalog file
    catalog_watermark: u32,
    next_id: u32,

    calls: Vec<String>,
    /// Tokens of the record currently under construction
    current: Vec<String>,
    traversals: Vec<String>,
    max_size: usize,

    /// Pending invocation line; 0 means none
    invocation_line: u32,
    /// Pending line preserved across a class initializer
    invocation_line_backup: u32,

    traverse_enabled: bool,
    /// Package prefix bounding traversal eligibility and stack-walk scope
    scope_package: Option<String>,
    walker: GraphWalker,
    store: ArtifactStore,
}

impl TraceSession {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            methods: Vec::new(),
            assigned: HashMap::new(),
            catalog: BTreeMap::new(),
            catalog_watermark: 0,
            next_id: 1,
            calls: Vec::new(),
            current: Vec::new(),
            traversals: Vec::new(),
            max_size: MAX_SIZE,
            invocation_line: 0,
            invocation_line_backup: 0,
            traverse_enabled: config.traverse,
            scope_package: config.package.clone(),
            walker: GraphWalker::new(),
            store: ArtifactStore::new(&config.artifact_dir),
        }
    }

    /// Lower the flush threshold (tests exercise backpressure without
    /// building 100k records)
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    // ---- rewrite-time surface ----

    /// Register a method at rewrite time; the returned key is what the entry
    /// probe carries
    pub fn register_method(&mut self, info: MethodInfo) -> MethodKey {
        self.methods.push(info);
        self.methods.len() - 1
    }

    pub fn method_info(&self, key: MethodKey) -> Option<&MethodInfo> {
        self.methods.get(key)
    }

    /// Create a source's leader file, once per run
    pub fn init_leader_file(&mut self, source_key: &str) {
        if let Err(e) = self.store.init_leader_file(source_key) {
            tracing::error!("failed to create leader file for {source_key}: {e:#}");
        }
    }

    /// Union-merge a class's accumulated leaders into the source's file
    pub fn merge_leaders(&mut self, source_key: &str, leaders: &BTreeSet<u32>) {
        if let Err(e) = self.store.merge_leader_file(source_key, leaders) {
            tracing::error!("failed to merge leader file for {source_key}: {e:#}");
        }
    }

    // ---- probe surface ----

    /// Method entry: assign the id on first firing, start the entry record
    pub fn on_entry(&mut self, key: MethodKey, walker: Option<&dyn StackWalker>) {
        self.begin_record();

        let id = match self.assigned.get(&key) {
            Some(id) => *id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.assigned.insert(key, id);
                self.catalog.insert(id, key);
                id
            }
        };

        if self.invocation_line != 0 {
            let line = self.invocation_line;
            self.invocation_line = 0;
            self.current.push(line.to_string());
        } else if let Some(w) = walker {
            if let Some(line) = self.walk_invocation_line(w) {
                self.current.push(line.to_string());
            }
        }

        self.current.push(id.to_string());
    }

    /// Basic-block marker
    pub fn on_block(&mut self, key: MethodKey, line: u32) {
        self.begin_record();
        // An implicit call right before a block boundary must not leave its
        // line prefixed onto the next entry
        self.invocation_line = 0;

        match self.assigned.get(&key) {
            Some(id) => self.current.push(format!("@{id}:{line}")),
            None => tracing::error!("block probe fired before entry for method key {key}"),
        }
    }

    /// Method exit marker
    pub fn on_exit(&mut self, key: MethodKey) {
        self.begin_record();
        self.invocation_line = 0;

        match self.assigned.get(&key) {
            Some(id) => self.current.push(format!("- {id}")),
            None => tracing::error!("exit probe fired before entry for method key {key}"),
        }
    }

    /// Integer probe (8/16/32-bit)
    pub fn capture_int(&mut self, v: i32) {
        self.current.push(v.to_string());
    }

    /// Wide-integer probe (64-bit, two stack slots)
    pub fn capture_long(&mut self, v: i64) {
        self.current.push(v.to_string());
    }

    /// Float probe (32-bit)
    pub fn capture_float(&mut self, v: f32) {
        self.current.push(format_f64(v as f64));
    }

    /// Wide-float probe (64-bit, two stack slots)
    pub fn capture_double(&mut self, v: f64) {
        self.current.push(format_f64(v));
    }

    /// Dedicated char probe; textual rendering differs from the int probe
    pub fn capture_char(&mut self, v: char) {
        self.current.push(escape_newlines(&v.to_string()));
    }

    /// Dedicated boolean probe
    pub fn capture_bool(&mut self, v: bool) {
        self.current.push(v.to_string());
    }

    /// Reference probe: strings and arrays serialize inline, other
    /// references are handed to the graph walker when eligible
    pub fn capture_ref(&mut self, v: &Value) {
        match v {
            Value::Null => self.current.push("null".to_string()),
            Value::Str(s) => self.current.push(format!("\"{}\"", escape_newlines(s))),
            Value::Array(a) => {
                let rendered = render_array(a);
                self.current.push(rendered);
            }
            Value::Ref(obj) => {
                if !self.traverse_enabled {
                    return;
                }
                let class_name = obj.borrow().class_name.clone();
                if !self.eligible_for_traversal(&class_name) {
                    return;
                }
                let traversal = self.walker.traverse(Some(obj));
                self.current.push(format!("T#{}", traversal.number));
                self.retain_traversal(traversal.block);
            }
            other => {
                // A primitive routed through the reference probe is a
                // rewriter bug; record it rather than crash
                tracing::error!("reference probe received {other:?}");
            }
        }
    }

    /// Remember the line the next entry probe should attribute itself to
    pub fn set_invocation_line(&mut self, line: u32) {
        self.invocation_line = line;
    }

    /// Preserve the pending line around a class initializer
    pub fn backup_invocation_line(&mut self) {
        self.invocation_line_backup = self.invocation_line;
    }

    /// Derive a class initializer's own invocation line from the stack
    pub fn save_clinit_invocation_line(&mut self, walker: Option<&dyn StackWalker>) {
        self.invocation_line = walker
            .and_then(|w| self.walk_invocation_line(w))
            .unwrap_or(0);
    }

    /// Restore the line preserved by the backup probe so the triggering
    /// method's entry is not corrupted by the initializer's execution
    pub fn restore_invocation_line(&mut self) {
        self.invocation_line = self.invocation_line_backup;
    }

    // ---- lifecycle ----

    /// Complete the record under construction, if any
    pub fn finish_record(&mut self) {
        self.begin_record();
    }

    /// Final flush; called on normal termination
    pub fn shutdown(&mut self) {
        self.begin_record();
        self.flush_logs();
    }

    /// Clear all logs and catalogs and rewind the counters (test isolation)
    pub fn reset(&mut self) {
        self.methods.clear();
        self.assigned.clear();
        self.catalog.clear();
        self.catalog_watermark = 0;
        self.next_id = 1;
        self.calls.clear();
        self.current.clear();
        self.traversals.clear();
        self.invocation_line = 0;
        self.invocation_line_backup = 0;
        self.walker.reset();
        self.store.reset();
    }

    /// Finished call records currently buffered
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Traversal blocks currently buffered
    pub fn traversals(&self) -> &[String] {
        &self.traversals
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    // ---- internals ----

    fn begin_record(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let record = self.current.join(" ");
        self.current.clear();
        self.retain_call(record);
    }

    /// Buffer a finished record, flushing first if the buffers are full;
    /// the invariant `calls + traversals <= max_size` holds by flushing,
    /// never by dropping
    fn retain_call(&mut self, record: String) {
        if self.calls.len() + self.traversals.len() >= self.max_size {
            self.flush_logs();
        }
        self.calls.push(record);
    }

    fn retain_traversal(&mut self, block: String) {
        if self.calls.len() + self.traversals.len() >= self.max_size {
            self.flush_logs();
        }
        self.traversals.push(block);
    }

    /// Synchronously flush both logs and any unflushed catalog entries
    ///
    /// Failures are reported and that flush's data is lost; there is no
    /// retry and the instrumented program keeps running.
    fn flush_logs(&mut self) {
        let new_entries: Vec<String> = self
            .catalog
            .range(self.catalog_watermark + 1..)
            .map(|(id, key)| self.methods[*key].catalog_line(*id))
            .collect();
        if let Some((max_id, _)) = self.catalog.iter().next_back() {
            self.catalog_watermark = (*max_id).max(self.catalog_watermark);
        }
        if let Err(e) = self.store.append_catalog(&new_entries) {
            tracing::error!("catalog flush failed: {e:#}");
        }

        if let Err(e) = self.store.append_calls(&self.calls) {
            tracing::error!("call log flush failed: {e:#}");
        }
        self.calls.clear();

        if let Err(e) = self.store.append_traversals(&self.traversals) {
            tracing::error!("traversal flush failed: {e:#}");
        }
        self.traversals.clear();
    }

    fn eligible_for_traversal(&self, class_name: &str) -> bool {
        match &self.scope_package {
            Some(pkg) if class_name.starts_with(pkg.as_str()) => true,
            _ => !is_blocked_namespace(class_name),
        }
    }

    fn walk_invocation_line(&self, walker: &dyn StackWalker) -> Option<u32> {
        let pkg = self.scope_package.clone();
        let in_scope = move |class: &str| match &pkg {
            Some(p) => class.starts_with(p.as_str()),
            None => !is_blocked_namespace(class),
        };
        walker.invocation_line(PROBE_SKIP_FRAMES, &in_scope)
    }
}

/// Rewrite embedded newlines to the two-character escape; records are one
/// per line, always
pub(crate) fn escape_newlines(s: &str) -> String {
    s.replace('\n', "\\n")
}

/// Render a float the way the trace format expects: a whole value keeps one
/// trailing decimal
pub(crate) fn format_f64(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Render a scalar value for inline embedding
pub(crate) fn render_scalar(v: &Value) -> String {
    match v {
        Value::Int(i) => i.to_string(),
        Value::Long(l) => l.to_string(),
        Value::Float(f) => format_f64(*f as f64),
        Value::Double(d) => format_f64(*d),
        Value::Char(c) => escape_newlines(&c.to_string()),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => escape_newlines(s),
        Value::Null => "null".to_string(),
        Value::Ref(obj) => obj.borrow().class_name.replace('/', "."),
        Value::Array(a) => render_array(a),
    }
}

/// Summarize an array: at most the first [`CAPTURE_LIMIT`] elements, then an
/// ellipsis iff the array is longer
///
/// Primitive and string arrays show their elements verbatim; other object
/// arrays repeat the element runtime-type name instead of each element's
/// representation — a deliberate, documented loss of fidelity.
pub(crate) fn render_array(a: &ArrayObj) -> String {
    let shown = a.elems.len().min(CAPTURE_LIMIT);
    let mut parts: Vec<String> = Vec::with_capacity(shown + 1);

    let verbatim = a.primitive || a.elem_type.ends_with("String");
    for elem in a.elems.iter().take(shown) {
        if verbatim {
            parts.push(render_scalar(elem));
        } else {
            parts.push(a.elem_type.clone());
        }
    }
    if a.elems.len() > CAPTURE_LIMIT {
        parts.push("...".to_string());
    }

    format!("[{}]", parts.join(", "))
}
