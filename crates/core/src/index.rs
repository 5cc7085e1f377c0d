//! Type/Proxy Index: the mutable namespace of named type instances.
//!
//! Entries live in an arena and are reached through the root table or the
//! nested table of another entry. Every table and current-type-stack change
//! is journaled so a failed match can roll back to a checkpoint exactly.
//! The index also owns the per-parse path state: path variables, the
//! `file_path` search list, and include counts.

use crate::compile::DefaultType;
use crate::config::NameConflictPolicy;
use crate::rules::RuleId;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeEntry {
    pub name: String,
    pub struct_rule: Option<RuleId>,
    pub nested: BTreeMap<String, EntryId>,
    pub cloned_from: Option<EntryId>,
    /// Created under a generated name after a name conflict.
    pub duplicate_name: bool,
}

/// One level of the current-type stack. `entry` is `None` for a
/// grammar-default type that has no instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentType {
    pub entry: Option<EntryId>,
    pub path: Vec<String>,
    pub struct_rule: Option<RuleId>,
}

/// Outcome of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub current: CurrentType,
    /// Name actually used when the conflict policy renamed the entry.
    pub renamed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Root,
    Nested(EntryId),
}

#[derive(Debug, Clone)]
enum JournalOp {
    Insert {
        table: Table,
        name: String,
        previous: Option<EntryId>,
    },
    Remove {
        table: Table,
        name: String,
        id: EntryId,
    },
    Push,
    Pop(CurrentType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(usize);

#[derive(Debug, Clone, Default)]
pub struct TypeIndex {
    entries: Vec<TypeEntry>,
    root: BTreeMap<String, EntryId>,
    stack: Vec<CurrentType>,
    journal: Vec<JournalOp>,
    policy: NameConflictPolicy,
    generated: u64,
    path_variables: BTreeMap<String, String>,
    file_path: Vec<PathBuf>,
    include_counts: HashMap<PathBuf, usize>,
}

impl TypeIndex {
    pub fn new(policy: NameConflictPolicy) -> Self {
        TypeIndex {
            policy,
            ..Self::default()
        }
    }

    pub fn entry(&self, id: EntryId) -> &TypeEntry {
        &self.entries[id.0 as usize]
    }

    // ── Journal ─────────────────────────────────────────────────────

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Undo every change made since `cp`, newest first.
    pub fn rollback(&mut self, cp: Checkpoint) {
        while self.journal.len() > cp.0 {
            let Some(op) = self.journal.pop() else { break };
            match op {
                JournalOp::Insert {
                    table,
                    name,
                    previous,
                } => {
                    if let Some(t) = self.table_mut(table) {
                        match previous {
                            Some(prev) => {
                                t.insert(name, prev);
                            }
                            None => {
                                t.remove(&name);
                            }
                        }
                    }
                }
                JournalOp::Remove { table, name, id } => {
                    if let Some(t) = self.table_mut(table) {
                        t.insert(name, id);
                    }
                }
                JournalOp::Push => {
                    self.stack.pop();
                }
                JournalOp::Pop(ct) => self.stack.push(ct),
            }
        }
    }

    /// Forget the journal. Only valid when no checkpoint is outstanding.
    pub fn commit(&mut self) {
        self.journal.clear();
    }

    // ── Current-type stack ──────────────────────────────────────────

    pub fn current(&self) -> Option<&CurrentType> {
        self.stack.last()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push_current(&mut self, ct: CurrentType) {
        trace!(path = %ct.path.join("."), "current type pushed");
        self.stack.push(ct);
        self.journal.push(JournalOp::Push);
    }

    /// Pop back to `depth` entries.
    pub fn truncate_stack(&mut self, depth: usize) {
        while self.stack.len() > depth {
            if let Some(ct) = self.stack.pop() {
                self.journal.push(JournalOp::Pop(ct));
            }
        }
    }

    // ── Tables ──────────────────────────────────────────────────────

    fn table(&self, t: Table) -> Option<&BTreeMap<String, EntryId>> {
        match t {
            Table::Root => Some(&self.root),
            Table::Nested(id) => self.entries.get(id.0 as usize).map(|e| &e.nested),
        }
    }

    fn table_mut(&mut self, t: Table) -> Option<&mut BTreeMap<String, EntryId>> {
        match t {
            Table::Root => Some(&mut self.root),
            Table::Nested(id) => self.entries.get_mut(id.0 as usize).map(|e| &mut e.nested),
        }
    }

    fn start_table(&self, nested: bool) -> Option<Table> {
        if nested {
            self.current()?.entry.map(Table::Nested)
        } else {
            Some(Table::Root)
        }
    }

    fn insert(&mut self, table: Table, name: String, id: EntryId) {
        let previous = self
            .table_mut(table)
            .and_then(|t| t.insert(name.clone(), id));
        self.journal.push(JournalOp::Insert {
            table,
            name,
            previous,
        });
    }

    fn alloc(&mut self, entry: TypeEntry) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        self.entries.push(entry);
        id
    }

    /// Find an instance by path, from the current type when `nested`.
    pub fn lookup(&self, path: &[String], nested: bool) -> Option<EntryId> {
        let mut table = self.start_table(nested)?;
        let mut found = None;
        for seg in path {
            let id = *self.table(table)?.get(seg)?;
            found = Some(id);
            table = Table::Nested(id);
        }
        found
    }

    /// Load a type: an instance, else a grammar-default type. A miss is a
    /// plain non-match.
    pub fn load(
        &self,
        path: &[String],
        nested: bool,
        defaults: &BTreeMap<Vec<String>, DefaultType>,
    ) -> Option<CurrentType> {
        if let Some(id) = self.lookup(path, nested) {
            return Some(CurrentType {
                entry: Some(id),
                path: path.to_vec(),
                struct_rule: self.entry(id).struct_rule,
            });
        }
        defaults.get(path).map(|d| CurrentType {
            entry: None,
            path: path.to_vec(),
            struct_rule: d.struct_rule,
        })
    }

    fn deep_clone(&mut self, src: EntryId, name: &str) -> EntryId {
        let original = self.entry(src).clone();
        let mut nested = BTreeMap::new();
        for (child_name, child) in &original.nested {
            let copy = self.deep_clone(*child, child_name);
            nested.insert(child_name.clone(), copy);
        }
        self.alloc(TypeEntry {
            name: name.to_owned(),
            struct_rule: original.struct_rule,
            nested,
            cloned_from: Some(src),
            duplicate_name: false,
        })
    }

    /// Clone `source` under `save`. Intermediate tables on the save path
    /// are created as empty entries.
    pub fn create(
        &mut self,
        save: &[String],
        nested: bool,
        source: &[String],
        source_nested: bool,
        allow_replace: bool,
        defaults: &BTreeMap<Vec<String>, DefaultType>,
    ) -> Option<Created> {
        let source_entry = self.lookup(source, source_nested);
        let default_rule = match source_entry {
            Some(_) => None,
            None => Some(defaults.get(source)?.struct_rule),
        };
        let (last, parents) = save.split_last()?;
        let mut table = self.start_table(nested)?;
        for seg in parents {
            let existing = self.table(table)?.get(seg).copied();
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = self.alloc(TypeEntry {
                        name: seg.clone(),
                        struct_rule: None,
                        nested: BTreeMap::new(),
                        cloned_from: None,
                        duplicate_name: false,
                    });
                    self.insert(table, seg.clone(), id);
                    id
                }
            };
            table = Table::Nested(id);
        }

        let mut name = last.clone();
        let mut renamed = None;
        if self.table(table)?.contains_key(&name) && !allow_replace {
            match self.policy {
                NameConflictPolicy::Reject => return None,
                NameConflictPolicy::AllowRedefinition => {}
                NameConflictPolicy::GenerateConflictName => {
                    let mut n = 1;
                    while self.table(table)?.contains_key(&format!("{}__{}", last, n)) {
                        n += 1;
                    }
                    name = format!("{}__{}", last, n);
                    renamed = Some(name.clone());
                }
            }
        }

        let id = match (source_entry, default_rule) {
            (Some(src), _) => self.deep_clone(src, &name),
            (None, rule) => self.alloc(TypeEntry {
                name: name.clone(),
                struct_rule: rule.flatten(),
                nested: BTreeMap::new(),
                cloned_from: None,
                duplicate_name: false,
            }),
        };
        self.entries[id.0 as usize].duplicate_name = renamed.is_some();
        self.insert(table, name.clone(), id);

        let mut path = parents.to_vec();
        path.push(name);
        Some(Created {
            current: CurrentType {
                entry: Some(id),
                path,
                struct_rule: self.entry(id).struct_rule,
            },
            renamed,
        })
    }

    /// Remove an instance. A miss is a non-match.
    pub fn delete(&mut self, path: &[String], nested: bool) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let table = if parents.is_empty() {
            self.start_table(nested)
        } else {
            self.lookup(parents, nested).map(Table::Nested)
        };
        let Some(table) = table else { return false };
        let Some(id) = self.table_mut(table).and_then(|t| t.remove(last)) else {
            return false;
        };
        self.journal.push(JournalOp::Remove {
            table,
            name: last.clone(),
            id,
        });
        true
    }

    /// Every reachable instance as a dotted path, sorted.
    pub fn paths(&self) -> Vec<String> {
        fn walk(
            index: &TypeIndex,
            table: &BTreeMap<String, EntryId>,
            prefix: &str,
            out: &mut Vec<String>,
        ) {
            for (name, id) in table {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", prefix, name)
                };
                walk(index, &index.entry(*id).nested, &path, out);
                out.push(path);
            }
        }
        let mut out = Vec::new();
        walk(self, &self.root, "", &mut out);
        out.sort();
        out
    }

    pub fn stack(&self) -> &[CurrentType] {
        &self.stack
    }

    /// A fresh name for `generated_name` path segments.
    pub fn generated_name(&mut self) -> String {
        self.generated += 1;
        format!("__generated_{}", self.generated)
    }

    // ── Path state ──────────────────────────────────────────────────

    pub fn define_path_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.path_variables.insert(name.into(), value.into());
    }

    pub fn undefine_path_variable(&mut self, name: &str) {
        self.path_variables.remove(name);
    }

    pub fn path_variable(&self, name: &str) -> Option<&str> {
        self.path_variables.get(name).map(String::as_str)
    }

    pub fn add_file_path(&mut self, dir: impl Into<PathBuf>) {
        self.file_path.push(dir.into());
    }

    pub fn reset_file_path(&mut self) {
        self.file_path.clear();
    }

    pub fn file_path(&self) -> &[PathBuf] {
        &self.file_path
    }

    /// Count one more push of `path`; returns the new count.
    pub fn add_include(&mut self, path: &Path) -> usize {
        let count = self.include_counts.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn include_count(&self, path: &Path) -> usize {
        self.include_counts.get(path).copied().unwrap_or(0)
    }

    /// Replace `$(name)` and `${name}` with the defined value, else the
    /// environment value, else nothing. `$$` is a literal `$`; malformed
    /// forms are copied through unchanged.
    pub fn substitute_path_variables(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let close = match after.chars().next() {
                Some('$') => {
                    out.push('$');
                    rest = &after[1..];
                    continue;
                }
                Some('(') => ')',
                Some('{') => '}',
                _ => {
                    out.push('$');
                    rest = after;
                    continue;
                }
            };
            match after[1..].find(close) {
                Some(end) if end > 0 => {
                    let name = &after[1..1 + end];
                    match self.path_variable(name) {
                        Some(v) => out.push_str(v),
                        None => out.push_str(&std::env::var(name).unwrap_or_default()),
                    }
                    rest = &after[end + 2..];
                }
                _ => {
                    out.push('$');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> Vec<String> {
        s.split('.').map(str::to_owned).collect()
    }

    fn defaults() -> BTreeMap<Vec<String>, DefaultType> {
        let mut d = BTreeMap::new();
        d.insert(
            p("platform"),
            DefaultType {
                struct_name: "platform_type".into(),
                struct_rule: Some(RuleId(7)),
            },
        );
        d
    }

    #[test]
    fn load_falls_back_to_default_types() {
        let index = TypeIndex::new(NameConflictPolicy::Reject);
        let ct = index.load(&p("platform"), false, &defaults()).unwrap();
        assert_eq!(ct.entry, None);
        assert_eq!(ct.struct_rule, Some(RuleId(7)));
        assert!(index.load(&p("ship"), false, &defaults()).is_none());
    }

    #[test]
    fn create_clones_deeply_and_builds_intermediate_tables() {
        let d = defaults();
        let mut index = TypeIndex::new(NameConflictPolicy::Reject);
        let base = index.create(&p("ship"), false, &p("platform"), false, false, &d).unwrap();
        index.push_current(base.current);
        index.create(&p("radar"), true, &p("platform"), false, false, &d).unwrap();
        index.truncate_stack(0);

        index.create(&p("fleet.frigate"), false, &p("ship"), false, false, &d).unwrap();
        assert_eq!(
            index.paths(),
            vec!["fleet", "fleet.frigate", "fleet.frigate.radar", "ship", "ship.radar"]
        );
        let frigate = index.lookup(&p("fleet.frigate"), false).unwrap();
        assert_eq!(index.entry(frigate).cloned_from, index.lookup(&p("ship"), false));
    }

    #[test]
    fn conflict_policies() {
        let d = defaults();
        let mut reject = TypeIndex::new(NameConflictPolicy::Reject);
        reject.create(&p("a"), false, &p("platform"), false, false, &d).unwrap();
        assert!(reject.create(&p("a"), false, &p("platform"), false, false, &d).is_none());
        assert!(reject.create(&p("a"), false, &p("platform"), false, true, &d).is_some());

        let mut redefine = TypeIndex::new(NameConflictPolicy::AllowRedefinition);
        let first = redefine.create(&p("a"), false, &p("platform"), false, false, &d).unwrap();
        let second = redefine.create(&p("a"), false, &p("platform"), false, false, &d).unwrap();
        assert_ne!(first.current.entry, second.current.entry);
        assert_eq!(redefine.lookup(&p("a"), false), second.current.entry);

        let mut rename = TypeIndex::new(NameConflictPolicy::GenerateConflictName);
        rename.create(&p("a"), false, &p("platform"), false, false, &d).unwrap();
        let dup = rename.create(&p("a"), false, &p("platform"), false, false, &d).unwrap();
        assert_eq!(dup.renamed.as_deref(), Some("a__1"));
        let id = dup.current.entry.unwrap();
        assert!(rename.entry(id).duplicate_name);
        assert_eq!(rename.paths(), vec!["a", "a__1"]);
    }

    #[test]
    fn delete_miss_is_not_an_error() {
        let d = defaults();
        let mut index = TypeIndex::new(NameConflictPolicy::Reject);
        assert!(!index.delete(&p("ghost"), false));
        index.create(&p("a"), false, &p("platform"), false, false, &d).unwrap();
        assert!(index.delete(&p("a"), false));
        assert!(index.paths().is_empty());
    }

    #[test]
    fn nested_operations_need_a_current_instance() {
        let d = defaults();
        let mut index = TypeIndex::new(NameConflictPolicy::Reject);
        assert!(index.create(&p("x"), true, &p("platform"), false, false, &d).is_none());
        let ct = index.load(&p("platform"), false, &d).unwrap();
        index.push_current(ct);
        assert!(index.create(&p("x"), true, &p("platform"), false, false, &d).is_none());
    }

    #[test]
    fn substitute_path_variables() {
        let mut index = TypeIndex::default();
        index.define_path_variable("FOO", "bar");
        assert_eq!(index.substitute_path_variables("$(FOO)/x"), "bar/x");
        assert_eq!(index.substitute_path_variables("${FOO}/x"), "bar/x");
        assert_eq!(
            index.substitute_path_variables("$(RULEGRAM_SURELY_UNDEFINED_VAR)/x"),
            "/x"
        );
        assert_eq!(index.substitute_path_variables("cost$$"), "cost$");
        assert_eq!(index.substitute_path_variables("$(FOO"), "$(FOO");
        assert_eq!(index.substitute_path_variables("a$b"), "a$b");
        assert_eq!(index.substitute_path_variables("$()"), "$()");
    }

    #[test]
    fn include_counts_per_path() {
        let mut index = TypeIndex::default();
        let a = Path::new("/a.txt");
        assert_eq!(index.add_include(a), 1);
        assert_eq!(index.add_include(a), 2);
        assert_eq!(index.include_count(Path::new("/b.txt")), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(u8, u8, bool),
        Delete(u8),
        Load(u8),
        Pop,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u8..4, any::<bool>()).prop_map(|(a, b, r)| Op::Create(a, b, r)),
            (0u8..4).prop_map(Op::Delete),
            (0u8..4).prop_map(Op::Load),
            Just(Op::Pop),
        ]
    }

    fn name(n: u8) -> Vec<String> {
        if n == 0 {
            p("platform")
        } else {
            vec![format!("t{}", n)]
        }
    }

    fn apply(index: &mut TypeIndex, op: &Op, d: &BTreeMap<Vec<String>, DefaultType>) {
        match op {
            Op::Create(save, src, replace) => {
                if let Some(c) = index.create(&name(*save + 1), false, &name(*src), false, *replace, d) {
                    index.push_current(c.current);
                }
            }
            Op::Delete(n) => {
                index.delete(&name(*n), false);
            }
            Op::Load(n) => {
                if let Some(ct) = index.load(&name(*n), false, d) {
                    index.push_current(ct);
                }
            }
            Op::Pop => {
                let depth = index.depth().saturating_sub(1);
                index.truncate_stack(depth);
            }
        }
    }

    proptest! {
        #[test]
        fn rollback_restores_tables_and_stack(
            setup in proptest::collection::vec(op(), 0..8),
            attempt in proptest::collection::vec(op(), 0..12),
            policy in prop_oneof![
                Just(NameConflictPolicy::Reject),
                Just(NameConflictPolicy::AllowRedefinition),
                Just(NameConflictPolicy::GenerateConflictName),
            ],
        ) {
            let d = defaults();
            let mut index = TypeIndex::new(policy);
            for op in &setup {
                apply(&mut index, op, &d);
            }
            let paths = index.paths();
            let stack = index.stack().to_vec();
            let lookups: Vec<_> = (0..5).map(|n| index.lookup(&name(n), false)).collect();

            let cp = index.checkpoint();
            for op in &attempt {
                apply(&mut index, op, &d);
            }
            index.rollback(cp);

            prop_assert_eq!(index.paths(), paths);
            prop_assert_eq!(index.stack().to_vec(), stack);
            let after: Vec<_> = (0..5).map(|n| index.lookup(&name(n), false)).collect();
            prop_assert_eq!(after, lookups);
        }
    }
}
