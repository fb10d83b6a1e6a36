use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{ClassId, Program, TypeKind, TypeRef};

/// One nullability disagreement between two generic instantiations.
///
/// `path` holds type-argument positions from the outermost type inward, so a
/// mismatch inside `Box<Box<X>>` at the innermost argument reports `[0, 0]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Mismatch {
    pub(crate) path: Vec<usize>,
    pub(crate) lhs: String,
    pub(crate) rhs: String,
    /// True when the right-hand side is the nullable one.
    pub(crate) rhs_nullable: bool,
}

/// Structural comparator for nullability across nested generic type
/// arguments. Memoizes per (left, right) pair and guards self-referential
/// instantiations with an in-progress pair set; both live for one comparison
/// call tree.
pub(crate) struct GenericsComparator<'p> {
    program: &'p Program,
    memo: RefCell<BTreeMap<(String, String), Vec<Mismatch>>>,
    in_progress: RefCell<BTreeSet<(String, String)>>,
}

impl<'p> GenericsComparator<'p> {
    pub(crate) fn new(program: &'p Program) -> Self {
        Self {
            program,
            memo: RefCell::new(BTreeMap::new()),
            in_progress: RefCell::new(BTreeSet::new()),
        }
    }

    /// Compare `rhs` against `lhs` after adjusting `rhs` to the supertype
    /// instantiation sharing `lhs`'s declaration. Positions must align; a
    /// nullable marker on one side only is a violation at that position.
    pub(crate) fn compare(&self, lhs: &TypeRef, rhs: &TypeRef) -> Vec<Mismatch> {
        let adjusted;
        let rhs = match (&lhs.kind, &rhs.kind) {
            (TypeKind::Class(target), TypeKind::Class(_)) => {
                match supertype_instantiation(self.program, rhs, *target) {
                    Some(instantiation) => {
                        adjusted = instantiation;
                        &adjusted
                    }
                    None => rhs,
                }
            }
            _ => rhs,
        };
        let mut mismatches = Vec::new();
        self.compare_arguments(lhs, rhs, &mut Vec::new(), &mut mismatches);
        mismatches
    }

    fn compare_arguments(
        &self,
        lhs: &TypeRef,
        rhs: &TypeRef,
        path: &mut Vec<usize>,
        out: &mut Vec<Mismatch>,
    ) {
        let key = (
            render_type(self.program, lhs),
            render_type(self.program, rhs),
        );
        if let Some(cached) = self.memo.borrow().get(&key) {
            out.extend(cached.iter().cloned().map(|mut mismatch| {
                let mut full = path.clone();
                full.append(&mut mismatch.path);
                mismatch.path = full;
                mismatch
            }));
            return;
        }
        if !self.in_progress.borrow_mut().insert(key.clone()) {
            return;
        }
        let mut local = Vec::new();
        let count = lhs.args.len().min(rhs.args.len());
        for index in 0..count {
            let left = &lhs.args[index];
            let right = &rhs.args[index];
            if left.nullable != right.nullable {
                local.push(Mismatch {
                    path: vec![index],
                    lhs: render_type(self.program, left),
                    rhs: render_type(self.program, right),
                    rhs_nullable: right.nullable,
                });
            }
            if !left.args.is_empty() || !right.args.is_empty() {
                let adjusted;
                let right = match (&left.kind, &right.kind) {
                    (TypeKind::Class(target), TypeKind::Class(_)) => {
                        match supertype_instantiation(self.program, right, *target) {
                            Some(instantiation) => {
                                adjusted = instantiation;
                                &adjusted
                            }
                            None => right,
                        }
                    }
                    _ => right,
                };
                let mut nested = Vec::new();
                let mut nested_path = vec![index];
                self.compare_arguments(left, right, &mut nested_path, &mut nested);
                local.extend(nested);
            }
        }
        self.in_progress.borrow_mut().remove(&key);
        self.memo.borrow_mut().insert(key, local.clone());
        out.extend(local.into_iter().map(|mut mismatch| {
            let mut full = path.clone();
            full.append(&mut mismatch.path);
            mismatch.path = full;
            mismatch
        }));
    }
}

/// Instantiation of `target` reached from `ty` through its superclass and
/// interface chain, with type variables substituted. Identity when `ty`
/// already instantiates `target`.
pub(crate) fn supertype_instantiation(
    program: &Program,
    ty: &TypeRef,
    target: ClassId,
) -> Option<TypeRef> {
    let TypeKind::Class(class_id) = ty.kind else {
        return None;
    };
    if class_id == target {
        return Some(ty.clone());
    }
    let class = program.class(class_id);
    let mut substitution = BTreeMap::new();
    for (param, arg) in class.type_params.iter().zip(ty.args.iter()) {
        substitution.insert(param.name.clone(), arg.clone());
    }
    let parents = class
        .super_class
        .iter()
        .chain(class.interfaces.iter());
    for parent in parents {
        let instantiated = substitute(parent, &substitution);
        if let Some(found) = supertype_instantiation(program, &instantiated, target) {
            return Some(found);
        }
    }
    None
}

/// Type of a member declared in `owner`, as seen through a receiver of type
/// `receiver_ty`: the receiver is first adjusted to `owner`'s instantiation,
/// then `owner`'s type variables are substituted into `member_ty`. Falls back
/// to the declared type when the receiver carries no usable instantiation.
pub(crate) fn instantiate_member_type(
    program: &Program,
    member_ty: &TypeRef,
    receiver_ty: &TypeRef,
    owner: ClassId,
) -> TypeRef {
    let Some(instantiation) = supertype_instantiation(program, receiver_ty, owner) else {
        return member_ty.clone();
    };
    let owner_decl = program.class(owner);
    if owner_decl.type_params.is_empty() || instantiation.args.is_empty() {
        return member_ty.clone();
    }
    let mut substitution = BTreeMap::new();
    for (param, arg) in owner_decl.type_params.iter().zip(instantiation.args.iter()) {
        substitution.insert(param.name.clone(), arg.clone());
    }
    substitute(member_ty, &substitution)
}

fn substitute(ty: &TypeRef, substitution: &BTreeMap<String, TypeRef>) -> TypeRef {
    if let TypeKind::TypeVar(name) = &ty.kind {
        if let Some(replacement) = substitution.get(name) {
            let mut replaced = replacement.clone();
            // A nullable use site keeps its marker through substitution.
            replaced.nullable |= ty.nullable;
            return replaced;
        }
    }
    TypeRef {
        kind: ty.kind.clone(),
        nullable: ty.nullable,
        args: ty
            .args
            .iter()
            .map(|arg| substitute(arg, substitution))
            .collect(),
    }
}

/// Human-readable rendering used in diagnostics and as memo keys.
pub(crate) fn render_type(program: &Program, ty: &TypeRef) -> String {
    let mut rendered = String::new();
    if ty.nullable {
        rendered.push_str("@Nullable ");
    }
    match &ty.kind {
        TypeKind::Class(id) => rendered.push_str(&program.class_qualified_name(*id)),
        TypeKind::Primitive(prim) => rendered.push_str(&format!("{prim:?}").to_lowercase()),
        TypeKind::Array => {
            let elem = ty
                .args
                .first()
                .map(|elem| render_type(program, elem))
                .unwrap_or_default();
            rendered.push_str(&elem);
            rendered.push_str("[]");
            return rendered;
        }
        TypeKind::TypeVar(name) => rendered.push_str(name),
        TypeKind::Void => rendered.push_str("void"),
    }
    if !ty.args.is_empty() {
        rendered.push('<');
        let args: Vec<String> = ty
            .args
            .iter()
            .map(|arg| render_type(program, arg))
            .collect();
        rendered.push_str(&args.join(", "));
        rendered.push('>');
    }
    rendered
}
