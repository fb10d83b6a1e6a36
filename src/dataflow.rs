use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{
    Block, Expr, FieldId, IdentTarget, LocalId, MethodId, Program, Span, Stmt, TypeKind,
};
use crate::lattice::Nullness;

/// Root of an access path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum PathRoot {
    This,
    Local(LocalId),
    Param { method: MethodId, index: u32 },
    /// Static field acting as its own root.
    Static(FieldId),
}

/// Key for an array-element path segment.
///
/// Only constant literals and simple locals are representable; facts about
/// elements indexed by any other expression are deliberately not tracked.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum IndexKey {
    Constant(String),
    Local(LocalId),
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum PathElement {
    Field(FieldId),
    Element(IndexKey),
}

/// Symbolic chain rooted at a variable, parameter or field, used as the key
/// for flow-sensitive nullness facts.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct AccessPath {
    pub(crate) root: PathRoot,
    pub(crate) elements: Vec<PathElement>,
}

impl AccessPath {
    pub(crate) fn local(id: LocalId) -> Self {
        Self {
            root: PathRoot::Local(id),
            elements: Vec::new(),
        }
    }

    pub(crate) fn param(method: MethodId, index: u32) -> Self {
        Self {
            root: PathRoot::Param { method, index },
            elements: Vec::new(),
        }
    }

    pub(crate) fn this_field(field: FieldId) -> Self {
        Self {
            root: PathRoot::This,
            elements: vec![PathElement::Field(field)],
        }
    }

    pub(crate) fn is_local_rooted(&self) -> bool {
        matches!(self.root, PathRoot::Local(_) | PathRoot::Param { .. })
    }
}

/// Build the access path a supported expression denotes, if any.
pub(crate) fn access_path_of(program: &Program, expr: &Expr) -> Option<AccessPath> {
    match expr {
        Expr::This { .. } => Some(AccessPath {
            root: PathRoot::This,
            elements: Vec::new(),
        }),
        Expr::Ident { target, .. } => match target {
            IdentTarget::Local(id) => Some(AccessPath::local(*id)),
            IdentTarget::Param { method, index } => Some(AccessPath::param(*method, *index)),
            IdentTarget::Field(field) => {
                if program.field(*field).is_static {
                    Some(AccessPath {
                        root: PathRoot::Static(*field),
                        elements: Vec::new(),
                    })
                } else {
                    Some(AccessPath::this_field(*field))
                }
            }
            IdentTarget::Class(_) | IdentTarget::Package => None,
        },
        Expr::FieldAccess {
            receiver, field, ..
        } => {
            if program.field(*field).is_static {
                return Some(AccessPath {
                    root: PathRoot::Static(*field),
                    elements: Vec::new(),
                });
            }
            let mut path = access_path_of(program, receiver)?;
            path.elements.push(PathElement::Field(*field));
            Some(path)
        }
        Expr::Index { array, index, .. } => {
            let key = index_key(index)?;
            let mut path = access_path_of(program, array)?;
            path.elements.push(PathElement::Element(key));
            Some(path)
        }
        Expr::Cast { expr, .. } => access_path_of(program, expr),
        _ => None,
    }
}

fn index_key(index: &Expr) -> Option<IndexKey> {
    match index {
        Expr::Literal { text, .. } if !text.is_empty() => Some(IndexKey::Constant(text.clone())),
        Expr::Ident {
            target: IdentTarget::Local(id),
            ..
        } => Some(IndexKey::Local(*id)),
        _ => None,
    }
}

/// Flow-sensitive nullability facts, queried by the checking core.
///
/// The engine computing these facts is a collaborator; the core only relies
/// on the answers being sound over-approximations ("NonNull" must be proven).
pub(crate) trait FlowOracle {
    /// Most precise nullness known for `path` at the program point `span`
    /// inside `method`, or None when the engine has no fact.
    fn nullness_at(
        &self,
        program: &Program,
        method: MethodId,
        span: Span,
        path: &AccessPath,
    ) -> Option<Nullness>;

    /// Fields proven assigned a non-null value on every path reaching the
    /// normal exit of `method`.
    fn nonnull_fields_at_exit(&self, program: &Program, method: MethodId) -> BTreeSet<FieldId>;

    /// Same guarantee for a free-standing initializer block.
    fn nonnull_fields_at_block_exit(&self, program: &Program, block: &Block) -> BTreeSet<FieldId> {
        scan_block_exit_assignments(program, block)
    }

    /// Fields assigned before the point `span` of `method`, when known.
    fn nonnull_fields_before(
        &self,
        program: &Program,
        method: MethodId,
        span: Span,
    ) -> Option<BTreeSet<FieldId>>;
}

/// Bundled conservative oracle.
///
/// Facts come from a single forward scan over statement lists: top-level
/// field assignments with a provably non-null right-hand side, local
/// null-guard patterns (`if (x == null) return/throw`, `if (x != null) ...`),
/// and direct local assignments. Loop bodies invalidate local facts.
/// Array-element facts exist only for constant or simple-local indices;
/// other index expressions are not tracked.
pub(crate) struct AssignScanOracle;

impl FlowOracle for AssignScanOracle {
    fn nullness_at(
        &self,
        program: &Program,
        method: MethodId,
        span: Span,
        path: &AccessPath,
    ) -> Option<Nullness> {
        if !path.is_local_rooted() {
            return None;
        }
        let body = program.method(method).body.as_ref()?;
        let mut scan = PointScan {
            program,
            target: span,
            path,
        };
        match scan.block(body, &mut BTreeMap::new()) {
            ScanOutcome::Found(fact) => fact,
            ScanOutcome::NotFound => None,
        }
    }

    fn nonnull_fields_at_exit(&self, program: &Program, method: MethodId) -> BTreeSet<FieldId> {
        match program.method(method).body.as_ref() {
            Some(body) => scan_block_exit_assignments(program, body),
            None => BTreeSet::new(),
        }
    }

    fn nonnull_fields_before(
        &self,
        program: &Program,
        method: MethodId,
        span: Span,
    ) -> Option<BTreeSet<FieldId>> {
        let body = program.method(method).body.as_ref()?;
        let mut assigned = BTreeSet::new();
        for stmt in &body.stmts {
            if stmt_span(stmt) >= span {
                break;
            }
            if let Stmt::Expr { expr } = stmt {
                if let Some(field) = assigned_own_field(program, expr) {
                    assigned.insert(field);
                }
            }
        }
        Some(assigned)
    }
}

/// Field assignments guaranteed at exit of a statement list: top-level
/// assignments, descending into try/finally with no catch clauses.
fn scan_block_exit_assignments(program: &Program, block: &Block) -> BTreeSet<FieldId> {
    let mut assigned = BTreeSet::new();
    collect_exit_assignments(program, block, &mut assigned);
    assigned
}

fn collect_exit_assignments(program: &Program, block: &Block, assigned: &mut BTreeSet<FieldId>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Expr { expr } => {
                if let Some(field) = assigned_own_field(program, expr) {
                    if assigned_value_nonnull(program, expr) {
                        assigned.insert(field);
                    }
                }
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } if catches.is_empty() => {
                collect_exit_assignments(program, body, assigned);
                if let Some(finally) = finally {
                    collect_exit_assignments(program, finally, assigned);
                }
            }
            _ => {}
        }
    }
}

/// Field of the implicit receiver (or a static field of the same class)
/// stored by `expr`, when `expr` is such an assignment.
pub(crate) fn assigned_own_field(program: &Program, expr: &Expr) -> Option<FieldId> {
    let Expr::Assign { target, .. } = expr else {
        return None;
    };
    match target.as_ref() {
        Expr::Ident {
            target: IdentTarget::Field(field),
            ..
        } => Some(*field),
        Expr::FieldAccess {
            receiver, field, ..
        } => match receiver.as_ref() {
            Expr::This { .. } => Some(*field),
            Expr::Ident {
                target: IdentTarget::Class(owner),
                ..
            } if program.field(*field).owner == *owner => Some(*field),
            _ => None,
        },
        _ => None,
    }
}

fn assigned_value_nonnull(program: &Program, expr: &Expr) -> bool {
    let Expr::Assign { value, .. } = expr else {
        return false;
    };
    definitely_nonnull(program, value)
}

/// Syntactic proof that an expression can never evaluate to null.
pub(crate) fn definitely_nonnull(program: &Program, expr: &Expr) -> bool {
    match expr {
        Expr::NullLit { .. } | Expr::Unresolved { .. } => false,
        Expr::Literal { .. }
        | Expr::This { .. }
        | Expr::New { .. }
        | Expr::NewArray { .. }
        | Expr::Lambda { .. }
        | Expr::MethodRef { .. }
        | Expr::InstanceOf { .. }
        | Expr::Unary { .. } => true,
        Expr::Binary { .. } => true,
        Expr::Ident { target, .. } => match target {
            IdentTarget::Local(id) => !program.local(*id).ty.nullable,
            IdentTarget::Param { method, index } => program
                .method(*method)
                .params
                .get(*index as usize)
                .is_some_and(|p| !p.ty.nullable),
            IdentTarget::Field(field) => !program.field(*field).ty.nullable,
            IdentTarget::Class(_) | IdentTarget::Package => true,
        },
        Expr::FieldAccess { field, .. } => !program.field(*field).ty.nullable,
        Expr::Call { method, .. } => !program.method(*method).return_type.nullable,
        Expr::Index { array, .. } => match expr_declared_elem_nullable(program, array) {
            Some(nullable) => !nullable,
            None => false,
        },
        Expr::Cast { ty, expr, .. } => !ty.nullable || definitely_nonnull(program, expr),
        Expr::Conditional {
            then_expr,
            else_expr,
            ..
        } => definitely_nonnull(program, then_expr) && definitely_nonnull(program, else_expr),
        Expr::Assign { value, .. } => definitely_nonnull(program, value),
    }
}

fn expr_declared_elem_nullable(program: &Program, array: &Expr) -> Option<bool> {
    let ty = crate::oracle::static_type(program, array)?;
    match ty.kind {
        TypeKind::Array => ty.args.first().map(|elem| elem.nullable),
        _ => None,
    }
}

enum ScanOutcome {
    Found(Option<Nullness>),
    NotFound,
}

struct PointScan<'a> {
    program: &'a Program,
    target: Span,
    path: &'a AccessPath,
}

impl PointScan<'_> {
    fn block(
        &mut self,
        block: &Block,
        facts: &mut BTreeMap<AccessPath, Nullness>,
    ) -> ScanOutcome {
        for stmt in &block.stmts {
            if stmt_contains(stmt, self.target) {
                return self.descend_stmt(stmt, facts);
            }
            self.apply_effects(stmt, facts);
        }
        ScanOutcome::NotFound
    }

    fn descend_stmt(
        &mut self,
        stmt: &Stmt,
        facts: &mut BTreeMap<AccessPath, Nullness>,
    ) -> ScanOutcome {
        match stmt {
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if block_contains(then_block, self.target) {
                    let mut inner = facts.clone();
                    if let Some((path, nullness)) = null_test(self.program, cond, true) {
                        inner.insert(path, nullness);
                    }
                    return self.block(then_block, &mut inner);
                }
                if let Some(else_block) = else_block {
                    if block_contains(else_block, self.target) {
                        let mut inner = facts.clone();
                        if let Some((path, nullness)) = null_test(self.program, cond, false) {
                            inner.insert(path, nullness);
                        }
                        return self.block(else_block, &mut inner);
                    }
                }
                ScanOutcome::Found(facts.get(self.path).copied())
            }
            Stmt::Block(inner) => self.block(inner, facts),
            Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::ForEach { body, .. } => {
                if block_contains(body, self.target) {
                    // Back edges may rewrite locals assigned in the loop.
                    let mut inner = facts.clone();
                    for local in collect_assigned_paths(self.program, body) {
                        inner.remove(&local);
                    }
                    return self.block(body, &mut inner);
                }
                ScanOutcome::Found(facts.get(self.path).copied())
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                if block_contains(body, self.target) {
                    return self.block(body, &mut facts.clone());
                }
                for clause in catches {
                    if block_contains(&clause.body, self.target) {
                        return self.block(&clause.body, &mut BTreeMap::new());
                    }
                }
                if let Some(finally) = finally {
                    if block_contains(finally, self.target) {
                        return self.block(finally, &mut facts.clone());
                    }
                }
                ScanOutcome::Found(facts.get(self.path).copied())
            }
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    if block_contains(&case.body, self.target) {
                        return self.block(&case.body, &mut facts.clone());
                    }
                }
                ScanOutcome::Found(facts.get(self.path).copied())
            }
            Stmt::Synchronized { body, .. } => {
                if block_contains(body, self.target) {
                    return self.block(body, &mut facts.clone());
                }
                ScanOutcome::Found(facts.get(self.path).copied())
            }
            Stmt::Expr { .. }
            | Stmt::Local { .. }
            | Stmt::Return { .. }
            | Stmt::Throw { .. } => ScanOutcome::Found(facts.get(self.path).copied()),
        }
    }

    fn apply_effects(&mut self, stmt: &Stmt, facts: &mut BTreeMap<AccessPath, Nullness>) {
        match stmt {
            Stmt::Local { local, init, .. } => {
                let path = AccessPath::local(*local);
                match init {
                    Some(value) => self.record_store(path, value, facts),
                    None => {
                        facts.remove(&path);
                    }
                }
            }
            Stmt::Expr { expr } => {
                if let Expr::Assign { target, value, .. } = expr {
                    if let Some(path) = access_path_of(self.program, target) {
                        self.record_store(path, value, facts);
                    }
                }
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                // `if (x == null) { return/throw }` pins x afterwards.
                if else_block.is_none() && always_exits(then_block) {
                    if let Some((path, nullness)) = null_test(self.program, cond, false) {
                        for assigned in collect_assigned_paths(self.program, then_block) {
                            facts.remove(&assigned);
                        }
                        facts.insert(path, nullness);
                        return;
                    }
                }
                self.invalidate_assigned(stmt, facts);
            }
            Stmt::Block(_)
            | Stmt::While { .. }
            | Stmt::DoWhile { .. }
            | Stmt::ForEach { .. }
            | Stmt::Switch { .. }
            | Stmt::Synchronized { .. }
            | Stmt::Try { .. } => self.invalidate_assigned(stmt, facts),
            Stmt::Return { .. } | Stmt::Throw { .. } => {}
        }
    }

    fn record_store(
        &mut self,
        path: AccessPath,
        value: &Expr,
        facts: &mut BTreeMap<AccessPath, Nullness>,
    ) {
        if matches!(value, Expr::NullLit { .. }) {
            facts.insert(path, Nullness::Null);
        } else if definitely_nonnull(self.program, value) {
            facts.insert(path, Nullness::NonNull);
        } else {
            facts.remove(&path);
        }
    }

    fn invalidate_assigned(&mut self, stmt: &Stmt, facts: &mut BTreeMap<AccessPath, Nullness>) {
        let mut block = Block { stmts: Vec::new() };
        block.stmts.push(stmt.clone());
        for path in collect_assigned_paths(self.program, &block) {
            facts.remove(&path);
        }
    }
}

/// Condition test of the form `x == null` / `x != null`, evaluated for the
/// branch where the condition is `outcome`.
fn null_test(program: &Program, cond: &Expr, outcome: bool) -> Option<(AccessPath, Nullness)> {
    let Expr::Binary { op, lhs, rhs, .. } = cond else {
        return None;
    };
    if !op.is_equality() {
        return None;
    }
    let tested = match (lhs.as_ref(), rhs.as_ref()) {
        (Expr::NullLit { .. }, other) | (other, Expr::NullLit { .. }) => other,
        _ => return None,
    };
    let path = access_path_of(program, tested)?;
    if !path.is_local_rooted() {
        return None;
    }
    let equals_null = matches!(op, crate::ir::BinaryOp::Eq);
    let holds_null = equals_null == outcome;
    let nullness = if holds_null {
        Nullness::Null
    } else {
        Nullness::Null.deduced_when_not_equal()
    };
    Some((path, nullness))
}

fn always_exits(block: &Block) -> bool {
    block
        .stmts
        .last()
        .is_some_and(|stmt| matches!(stmt, Stmt::Return { .. } | Stmt::Throw { .. }))
}

fn collect_assigned_paths(program: &Program, block: &Block) -> BTreeSet<AccessPath> {
    let mut paths = BTreeSet::new();
    visit_block(block, &mut |expr| {
        if let Expr::Assign { target, .. } = expr {
            if let Some(path) = access_path_of(program, target) {
                paths.insert(path);
            }
        }
    });
    collect_declared_locals(block, &mut paths);
    paths
}

fn collect_declared_locals(block: &Block, paths: &mut BTreeSet<AccessPath>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Local { local, .. } => {
                paths.insert(AccessPath::local(*local));
            }
            Stmt::Block(inner) => collect_declared_locals(inner, paths),
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                collect_declared_locals(then_block, paths);
                if let Some(else_block) = else_block {
                    collect_declared_locals(else_block, paths);
                }
            }
            Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::ForEach { body, .. }
            | Stmt::Synchronized { body, .. } => collect_declared_locals(body, paths),
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    collect_declared_locals(&case.body, paths);
                }
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                collect_declared_locals(body, paths);
                for clause in catches {
                    collect_declared_locals(&clause.body, paths);
                }
                if let Some(finally) = finally {
                    collect_declared_locals(finally, paths);
                }
            }
            _ => {}
        }
    }
}

fn stmt_span(stmt: &Stmt) -> Span {
    match stmt {
        Stmt::Expr { expr } => expr.span(),
        Stmt::Local { span, .. }
        | Stmt::ForEach { span, .. }
        | Stmt::Return { span, .. }
        | Stmt::Switch { span, .. }
        | Stmt::Synchronized { span, .. }
        | Stmt::Throw { span, .. } => *span,
        Stmt::Block(block) => block.stmts.first().map(stmt_span).unwrap_or_default(),
        Stmt::If { cond, .. } => cond.span(),
        Stmt::While { cond, .. } => cond.span(),
        Stmt::DoWhile { body, .. } => body.stmts.first().map(stmt_span).unwrap_or_default(),
        Stmt::Try { body, .. } => body.stmts.first().map(stmt_span).unwrap_or_default(),
    }
}

fn block_contains(block: &Block, target: Span) -> bool {
    let mut found = false;
    visit_block(block, &mut |expr| {
        if expr.span() == target {
            found = true;
        }
    });
    found
}

fn stmt_contains(stmt: &Stmt, target: Span) -> bool {
    let mut found = false;
    visit_stmt(stmt, &mut |expr| {
        if expr.span() == target {
            found = true;
        }
    });
    found
}

/// Walk every expression in a block, outermost first.
pub(crate) fn visit_block(block: &Block, visit: &mut dyn FnMut(&Expr)) {
    for stmt in &block.stmts {
        visit_stmt(stmt, visit);
    }
}

pub(crate) fn visit_stmt(stmt: &Stmt, visit: &mut dyn FnMut(&Expr)) {
    match stmt {
        Stmt::Expr { expr } => visit_expr(expr, visit),
        Stmt::Local { init, .. } => {
            if let Some(init) = init {
                visit_expr(init, visit);
            }
        }
        Stmt::Block(block) => visit_block(block, visit),
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            visit_expr(cond, visit);
            visit_block(then_block, visit);
            if let Some(else_block) = else_block {
                visit_block(else_block, visit);
            }
        }
        Stmt::While { cond, body } => {
            visit_expr(cond, visit);
            visit_block(body, visit);
        }
        Stmt::DoWhile { body, cond } => {
            visit_block(body, visit);
            visit_expr(cond, visit);
        }
        Stmt::ForEach { iterable, body, .. } => {
            visit_expr(iterable, visit);
            visit_block(body, visit);
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                visit_expr(value, visit);
            }
        }
        Stmt::Switch {
            selector, cases, ..
        } => {
            visit_expr(selector, visit);
            for case in cases {
                visit_block(&case.body, visit);
            }
        }
        Stmt::Synchronized { lock, body, .. } => {
            visit_expr(lock, visit);
            visit_block(body, visit);
        }
        Stmt::Try {
            body,
            catches,
            finally,
        } => {
            visit_block(body, visit);
            for clause in catches {
                visit_block(&clause.body, visit);
            }
            if let Some(finally) = finally {
                visit_block(finally, visit);
            }
        }
        Stmt::Throw { expr, .. } => visit_expr(expr, visit),
    }
}

pub(crate) fn visit_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::NullLit { .. }
        | Expr::Literal { .. }
        | Expr::This { .. }
        | Expr::Ident { .. }
        | Expr::MethodRef { .. }
        | Expr::Unresolved { .. } => {}
        Expr::FieldAccess { receiver, .. } => visit_expr(receiver, visit),
        Expr::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                visit_expr(receiver, visit);
            }
            for arg in args {
                visit_expr(arg, visit);
            }
        }
        Expr::New { args, .. } => {
            for arg in args {
                visit_expr(arg, visit);
            }
        }
        Expr::NewArray { dims, init, .. } => {
            for dim in dims {
                visit_expr(dim, visit);
            }
            for value in init {
                visit_expr(value, visit);
            }
        }
        Expr::Index { array, index, .. } => {
            visit_expr(array, visit);
            visit_expr(index, visit);
        }
        Expr::Assign { target, value, .. } => {
            visit_expr(target, visit);
            visit_expr(value, visit);
        }
        Expr::Binary { lhs, rhs, .. } => {
            visit_expr(lhs, visit);
            visit_expr(rhs, visit);
        }
        Expr::Unary { operand, .. } => visit_expr(operand, visit),
        Expr::Conditional {
            cond,
            then_expr,
            else_expr,
            ..
        } => {
            visit_expr(cond, visit);
            visit_expr(then_expr, visit);
            visit_expr(else_expr, visit);
        }
        Expr::Cast { expr, .. } | Expr::InstanceOf { expr, .. } => visit_expr(expr, visit),
        Expr::Lambda { body, .. } => match body {
            crate::ir::LambdaBody::Expr(expr) => visit_expr(expr, visit),
            crate::ir::LambdaBody::Block(block) => visit_block(block, visit),
        },
    }
}

/// Scripted oracle for tests: answers exactly what it was told to.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ScriptedOracle {
    pub(crate) point_facts: BTreeMap<(MethodId, Span, AccessPath), Nullness>,
    pub(crate) exit_facts: BTreeMap<MethodId, BTreeSet<FieldId>>,
    pub(crate) before_facts: BTreeMap<MethodId, BTreeSet<FieldId>>,
}

#[cfg(test)]
impl FlowOracle for ScriptedOracle {
    fn nullness_at(
        &self,
        _program: &Program,
        method: MethodId,
        span: Span,
        path: &AccessPath,
    ) -> Option<Nullness> {
        self.point_facts.get(&(method, span, path.clone())).copied()
    }

    fn nonnull_fields_at_exit(&self, _program: &Program, method: MethodId) -> BTreeSet<FieldId> {
        self.exit_facts.get(&method).cloned().unwrap_or_default()
    }

    fn nonnull_fields_before(
        &self,
        _program: &Program,
        method: MethodId,
        _span: Span,
    ) -> Option<BTreeSet<FieldId>> {
        self.before_facts.get(&method).cloned()
    }
}
