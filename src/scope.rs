use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::ir::{ClassId, Enclosing, Marker, MethodId, Program};

/// Memoized judgment for one class: its outermost class and whether its code
/// is in the marked (null-checked) scope. Method-level overrides fill in
/// lazily as they are queried.
#[derive(Clone, Debug)]
struct ClassScopeRecord {
    outermost: ClassId,
    marked: bool,
    method_overrides: BTreeMap<MethodId, bool>,
}

/// Per-run cache of marked-scope resolution.
///
/// Records live for the whole run; resolution recurses toward the outermost
/// enclosing declaration and short-circuits on a cache hit for any enclosing
/// class. Only per-class working state elsewhere resets at class boundaries,
/// never this cache.
pub(crate) struct ScopeResolver {
    records: RefCell<BTreeMap<ClassId, ClassScopeRecord>>,
}

impl ScopeResolver {
    pub(crate) fn new() -> Self {
        Self {
            records: RefCell::new(BTreeMap::new()),
        }
    }

    /// Whether code declared directly in `id` is subject to strict checking.
    pub(crate) fn class_is_marked(&self, program: &Program, config: &Config, id: ClassId) -> bool {
        self.record_for(program, config, id).marked
    }

    pub(crate) fn outermost_class(
        &self,
        program: &Program,
        config: &Config,
        id: ClassId,
    ) -> ClassId {
        self.record_for(program, config, id).outermost
    }

    /// Whether `id`'s own code is in the marked scope, honoring an explicit
    /// marker on the method over its owning class's resolution.
    pub(crate) fn method_is_marked(
        &self,
        program: &Program,
        config: &Config,
        id: MethodId,
    ) -> bool {
        let owner = program.method(id).owner;
        self.record_for(program, config, owner);
        if let Some(cached) = self
            .records
            .borrow()
            .get(&owner)
            .and_then(|record| record.method_overrides.get(&id))
        {
            return *cached;
        }
        let marked = match program.method(id).marker {
            Some(Marker::NullMarked) => true,
            Some(Marker::NullUnmarked) => false,
            None => self.class_is_marked(program, config, owner),
        };
        if let Some(record) = self.records.borrow_mut().get_mut(&owner) {
            record.method_overrides.insert(id, marked);
        }
        marked
    }

    /// Number of class records resolved so far. Diagnostic aid for tests.
    #[cfg(test)]
    pub(crate) fn resolved_class_count(&self) -> usize {
        self.records.borrow().len()
    }

    fn record_for(&self, program: &Program, config: &Config, id: ClassId) -> ClassScopeRecord {
        if let Some(record) = self.records.borrow().get(&id) {
            return record.clone();
        }
        let record = self.compute_record(program, config, id);
        self.records.borrow_mut().insert(id, record.clone());
        record
    }

    fn compute_record(&self, program: &Program, config: &Config, id: ClassId) -> ClassScopeRecord {
        let class = program.class(id);
        let excluded = config.class_is_excluded(&program.class_qualified_name(id))
            || config.annotation_excludes_class(&class.annotations);
        match class.enclosing {
            None => {
                let marked = if excluded {
                    false
                } else {
                    match class.marker {
                        Some(Marker::NullMarked) => true,
                        Some(Marker::NullUnmarked) => false,
                        None => config.package_is_annotated(&class.package),
                    }
                };
                ClassScopeRecord {
                    outermost: id,
                    marked,
                    method_overrides: BTreeMap::new(),
                }
            }
            Some(Enclosing::Class(outer)) => {
                let enclosing = self.record_for(program, config, outer);
                let marked = if excluded {
                    false
                } else {
                    match class.marker {
                        Some(Marker::NullMarked) => true,
                        Some(Marker::NullUnmarked) => false,
                        None => enclosing.marked,
                    }
                };
                ClassScopeRecord {
                    outermost: enclosing.outermost,
                    marked,
                    method_overrides: BTreeMap::new(),
                }
            }
            Some(Enclosing::Method(method)) => {
                let owner = program.method(method).owner;
                let enclosing = self.record_for(program, config, owner);
                let marked = if excluded {
                    false
                } else {
                    match class.marker {
                        Some(Marker::NullMarked) => true,
                        Some(Marker::NullUnmarked) => false,
                        None => self.method_is_marked(program, config, method),
                    }
                };
                ClassScopeRecord {
                    outermost: enclosing.outermost,
                    marked,
                    method_overrides: BTreeMap::new(),
                }
            }
        }
    }
}
