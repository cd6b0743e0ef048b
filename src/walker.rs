//! Bounded object-graph snapshots
//!
//! When the recorder captures an eligible reference value it hands the
//! object to the walker, which produces one traversal: a breadth-first,
//! cycle-safe snapshot bounded to [`CAPTURE_LIMIT`] objects of up to
//! [`CAPTURE_LIMIT`] fields each. Local ids are scoped to the traversal and
//! keyed by object identity, so shared sub-objects and cycles collapse to a
//! single expansion with a stable id.
//!
//! Field enumeration goes through the [`Inspect`] capability so the walker
//! never depends on how a runtime type exposes its metadata; the name order
//! per type is computed once and cached, since metadata for a loaded type
//! never changes.

use crate::filter::is_blocked_namespace;
use crate::ir::{ObjRef, Value};
use crate::recorder;
use std::collections::{HashMap, HashSet, VecDeque};

/// Shared bound: objects per traversal, fields per object, array elements
/// per capture
pub const CAPTURE_LIMIT: usize = 5;

/// Capability interface the walker inspects objects through
pub trait Inspect {
    /// Slash-qualified runtime type name
    fn type_name(&self) -> String;
    /// Fields in declaration order as `(name, synthetic, value)`; static
    /// fields are never included
    fn fields(&self) -> Vec<(String, bool, Value)>;
}

impl Inspect for crate::ir::Obj {
    fn type_name(&self) -> String {
        self.class_name.clone()
    }

    fn fields(&self) -> Vec<(String, bool, Value)> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.synthetic, f.value.clone()))
            .collect()
    }
}

/// One finished traversal
#[derive(Debug, Clone)]
pub struct Traversal {
    pub number: u64,
    /// The serialized block, headed by `T#<number>`
    pub block: String,
}

/// Produces bounded breadth-first snapshots of object graphs
#[derive(Debug, Default)]
pub struct GraphWalker {
    next_traversal: u64,
    /// Per-type sorted field-name order; immutable metadata, cached for the
    /// walker's lifetime
    field_order: HashMap<String, Vec<String>>,
}

impl GraphWalker {
    pub fn new() -> Self {
        Self {
            next_traversal: 1,
            field_order: HashMap::new(),
        }
    }

    /// Rewind the traversal counter (test isolation); the field-order cache
    /// survives, type metadata does not change
    pub fn reset(&mut self) {
        self.next_traversal = 1;
    }

    /// Walk one object graph
    ///
    /// The traversal number advances even for a null root, which yields a
    /// minimal block with no body.
    pub fn traverse(&mut self, root: Option<&ObjRef>) -> Traversal {
        let number = self.next_traversal;
        self.next_traversal += 1;

        let root = match root {
            Some(r) => r,
            None => {
                return Traversal {
                    number,
                    block: format!("T#{number}\nnull"),
                }
            }
        };

        let mut block = format!("T#{number}");

        // Traversal-local id space, reset each time
        let mut ids: HashMap<usize, u32> = HashMap::new();
        let mut next_id: u32 = 1;
        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<ObjRef> = VecDeque::new();

        ids.insert(identity(root), next_id);
        next_id += 1;
        queue.push_back(root.clone());

        let mut visited_count = 0;

        while let Some(current) = queue.pop_front() {
            let ptr = identity(&current);
            let type_name = current.borrow().type_name();

            // Skips consume no slot
            if is_blocked_namespace(&type_name) || visited.contains(&ptr) {
                continue;
            }
            visited.insert(ptr);

            let id = ids[&ptr];
            block.push_str(&format!("\n  O#{id} - {}", dotted(&type_name)));

            let order = self.field_order_for(&type_name, &current);
            let obj = current.borrow();
            let mut field_count = 0;
            for name in &order {
                let value = match obj.get(name) {
                    Some(v) => v,
                    None => continue,
                };
                field_count += 1;

                match value {
                    Value::Ref(r) => {
                        let fid = *ids.entry(identity(&r)).or_insert_with(|| {
                            let fid = next_id;
                            next_id += 1;
                            fid
                        });
                        let fty = r.borrow().type_name();
                        block.push_str(&format!("\n    O#{fid} - {}", dotted(&fty)));
                        if !visited.contains(&identity(&r)) {
                            queue.push_back(r.clone());
                        }
                    }
                    Value::Null => {
                        let fid = next_id;
                        next_id += 1;
                        block.push_str(&format!("\n    O#{fid} - null"));
                    }
                    other => {
                        block.push_str(&format!("\n    {}", recorder::render_scalar(&other)));
                    }
                }

                if field_count >= CAPTURE_LIMIT {
                    block.push_str("...");
                    break;
                }
            }
            drop(obj);

            visited_count += 1;
            if visited_count >= CAPTURE_LIMIT {
                block.push_str("...");
                break;
            }
        }

        Traversal { number, block }
    }

    /// Sorted non-synthetic field names for a type, computed once
    fn field_order_for(&mut self, type_name: &str, obj: &ObjRef) -> Vec<String> {
        self.field_order
            .entry(type_name.to_string())
            .or_insert_with(|| {
                let mut names: Vec<String> = obj
                    .borrow()
                    .fields()
                    .into_iter()
                    .filter(|(_, synthetic, _)| !synthetic)
                    .map(|(name, _, _)| name)
                    .collect();
                names.sort();
                names
            })
            .clone()
    }
}

fn identity(obj: &ObjRef) -> usize {
    std::rc::Rc::as_ptr(obj) as *const () as usize
}

fn dotted(name: &str) -> String {
    name.replace('/', ".")
}
