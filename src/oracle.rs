use crate::config::Config;
use crate::dataflow::{access_path_of, FlowOracle};
use crate::generics::instantiate_member_type;
use crate::ir::{
    BinaryOp, Expr, FieldId, IdentTarget, MethodId, Primitive, Program, TypeKind, TypeRef,
    UnaryOp,
};
use crate::libmodel::LibraryModels;
use crate::scope::ScopeResolver;

/// Decides whether an expression may hold a null value.
///
/// Three tiers: a syntactic fast path, declared nullability for symbol-based
/// expressions (generics-refined, with library-model facts for declarations
/// outside the checked scope), and a conservative default for compound or
/// unresolved forms. Local variables are always refined through the flow
/// oracle; any nullable verdict for an access-path expression passes through
/// the flow oracle as a final filter.
pub(crate) struct NullabilityOracle<'s> {
    pub(crate) program: &'s Program,
    pub(crate) config: &'s Config,
    pub(crate) scope: &'s ScopeResolver,
    pub(crate) models: &'s LibraryModels,
    pub(crate) flow: &'s dyn FlowOracle,
}

impl NullabilityOracle<'_> {
    /// May `expr`, evaluated inside `context`, be null? `context` is the
    /// enclosing method when there is one; field initializers and
    /// initializer blocks query without flow refinement.
    pub(crate) fn may_be_null(&self, context: Option<MethodId>, expr: &Expr) -> bool {
        let declared = match expr {
            Expr::NullLit { .. } => true,
            Expr::Literal { .. }
            | Expr::This { .. }
            | Expr::New { .. }
            | Expr::NewArray { .. }
            | Expr::Lambda { .. }
            | Expr::MethodRef { .. }
            | Expr::InstanceOf { .. }
            | Expr::Binary { .. }
            | Expr::Unary { .. } => false,
            Expr::Conditional { .. } | Expr::Assign { .. } | Expr::Unresolved { .. } => true,
            Expr::Cast { expr: inner, .. } => self.may_be_null(context, inner),
            Expr::Ident { target, .. } => match target {
                IdentTarget::Local(id) => self.program.local(*id).ty.nullable,
                IdentTarget::Param { method, index } => self
                    .program
                    .method(*method)
                    .params
                    .get(*index as usize)
                    .is_some_and(|param| param.ty.nullable),
                IdentTarget::Field(field) => self.field_nullable(*field),
                IdentTarget::Class(_) | IdentTarget::Package => false,
            },
            Expr::FieldAccess {
                receiver, field, ..
            } => self.field_access_nullable(*field, receiver),
            Expr::Call {
                receiver, method, ..
            } => {
                if self.is_cast_to_nonnull(*method) {
                    return false;
                }
                self.call_return_nullable(*method, receiver.as_deref())
            }
            Expr::Index { array, .. } => static_type(self.program, array)
                .as_ref()
                .and_then(|ty| ty.element_type())
                .is_some_and(|elem| elem.nullable),
        };
        self.flow_filtered(context, expr, declared)
    }

    /// Declared nullability of a field, with the library model supplying
    /// facts for fields outside the checked scope.
    pub(crate) fn field_nullable(&self, field: FieldId) -> bool {
        let decl = self.program.field(field);
        if self
            .scope
            .class_is_marked(self.program, self.config, decl.owner)
        {
            decl.ty.nullable
        } else {
            self.models
                .field_nullable(&self.program.field_qualified_name(field))
                .unwrap_or(false)
        }
    }

    fn field_access_nullable(&self, field: FieldId, receiver: &Expr) -> bool {
        let decl = self.program.field(field);
        if !self
            .scope
            .class_is_marked(self.program, self.config, decl.owner)
        {
            return self
                .models
                .field_nullable(&self.program.field_qualified_name(field))
                .unwrap_or(false);
        }
        match static_type(self.program, receiver) {
            Some(receiver_ty) => {
                instantiate_member_type(self.program, &decl.ty, &receiver_ty, decl.owner).nullable
            }
            None => decl.ty.nullable,
        }
    }

    /// Declared nullability of a call result, refined through the receiver's
    /// generic instantiation.
    pub(crate) fn call_return_nullable(&self, method: MethodId, receiver: Option<&Expr>) -> bool {
        let decl = self.program.method(method);
        if !self
            .scope
            .method_is_marked(self.program, self.config, method)
        {
            return self
                .models
                .return_nullable(&self.program.method_qualified_name(method))
                .unwrap_or(false);
        }
        let declared = &decl.return_type;
        let refined = receiver
            .and_then(|receiver| static_type(self.program, receiver))
            .map(|receiver_ty| {
                instantiate_member_type(self.program, declared, &receiver_ty, decl.owner)
            });
        refined.map(|ty| ty.nullable).unwrap_or(declared.nullable)
    }

    /// Does a formal parameter require a non-null argument?
    pub(crate) fn param_requires_nonnull(&self, method: MethodId, index: u32) -> bool {
        let decl = self.program.method(method);
        if self
            .scope
            .method_is_marked(self.program, self.config, method)
        {
            decl.params
                .get(index as usize)
                .is_some_and(|param| !param.ty.nullable && !param.ty.is_primitive())
        } else {
            self.models
                .param_requires_nonnull(&self.program.method_qualified_name(method), index)
        }
    }

    pub(crate) fn is_cast_to_nonnull(&self, method: MethodId) -> bool {
        self.config
            .cast_to_non_null_method
            .as_deref()
            .is_some_and(|name| self.program.method_qualified_name(method) == name)
    }

    fn flow_filtered(&self, context: Option<MethodId>, expr: &Expr, declared: bool) -> bool {
        let Some(context) = context else {
            return declared;
        };
        let Some(path) = access_path_of(self.program, expr) else {
            return declared;
        };
        let fact = self
            .flow
            .nullness_at(self.program, context, expr.span(), &path);
        if path.is_local_rooted() {
            // Locals always take the flow fact when one exists.
            return match fact {
                Some(nullness) => nullness.is_possibly_null(),
                None => declared,
            };
        }
        match fact {
            Some(nullness) if declared && !nullness.is_possibly_null() => false,
            _ => declared,
        }
    }
}

/// Static type of an expression, reconstructed from resolved declarations.
/// None when the host gives us nothing to go on (string literals, `this`,
/// unresolved constructs).
pub(crate) fn static_type(program: &Program, expr: &Expr) -> Option<TypeRef> {
    match expr {
        Expr::NullLit { .. } | Expr::This { .. } | Expr::Unresolved { .. } => None,
        Expr::Literal { prim, .. } => prim.map(primitive_type),
        Expr::Ident { target, .. } => match target {
            IdentTarget::Local(id) => Some(program.local(*id).ty.clone()),
            IdentTarget::Param { method, index } => program
                .method(*method)
                .params
                .get(*index as usize)
                .map(|param| param.ty.clone()),
            IdentTarget::Field(field) => Some(program.field(*field).ty.clone()),
            IdentTarget::Class(_) | IdentTarget::Package => None,
        },
        Expr::FieldAccess {
            receiver, field, ..
        } => {
            let decl = program.field(*field);
            match static_type(program, receiver) {
                Some(receiver_ty) => Some(instantiate_member_type(
                    program,
                    &decl.ty,
                    &receiver_ty,
                    decl.owner,
                )),
                None => Some(decl.ty.clone()),
            }
        }
        Expr::Call {
            receiver, method, ..
        } => {
            let decl = program.method(*method);
            let declared = decl.return_type.clone();
            match receiver
                .as_deref()
                .and_then(|receiver| static_type(program, receiver))
            {
                Some(receiver_ty) => Some(instantiate_member_type(
                    program,
                    &declared,
                    &receiver_ty,
                    decl.owner,
                )),
                None => Some(declared),
            }
        }
        Expr::New { class_type, .. } => Some(class_type.clone()),
        Expr::NewArray { elem, .. } => Some(TypeRef {
            kind: TypeKind::Array,
            nullable: false,
            args: vec![elem.clone()],
        }),
        Expr::Index { array, .. } => static_type(program, array)
            .as_ref()
            .and_then(|ty| ty.element_type().cloned()),
        Expr::Assign { target, .. } => static_type(program, target),
        Expr::Binary { op, lhs, rhs, .. } => binary_type(program, *op, lhs, rhs),
        Expr::Unary { op, operand, .. } => match op {
            UnaryOp::Not => Some(primitive_type(Primitive::Boolean)),
            _ => static_type(program, operand),
        },
        Expr::Conditional { ty, .. } => Some(ty.clone()),
        Expr::Cast { ty, .. } => Some(ty.clone()),
        Expr::InstanceOf { .. } => Some(primitive_type(Primitive::Boolean)),
        Expr::Lambda { functional, .. } | Expr::MethodRef { functional, .. } => {
            Some(functional.clone())
        }
    }
}

fn binary_type(program: &Program, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Option<TypeRef> {
    match op {
        BinaryOp::Concat => None,
        BinaryOp::And
        | BinaryOp::Or
        | BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => Some(primitive_type(Primitive::Boolean)),
        _ => {
            let prefer_primitive = |expr: &Expr| {
                static_type(program, expr).filter(|ty| ty.is_primitive())
            };
            prefer_primitive(lhs)
                .or_else(|| prefer_primitive(rhs))
                .or(Some(primitive_type(Primitive::Int)))
        }
    }
}

fn primitive_type(prim: Primitive) -> TypeRef {
    TypeRef {
        kind: TypeKind::Primitive(prim),
        nullable: false,
        args: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{AccessPath, ScriptedOracle};
    use crate::ir::{
        ClassDecl, ClassKind, CompilationUnit, LocalDecl, LocalId, MethodDecl, Span,
    };
    use crate::lattice::Nullness;

    fn string_type(nullable: bool) -> TypeRef {
        TypeRef {
            kind: TypeKind::Class(ClassId(0)),
            nullable,
            args: Vec::new(),
        }
    }

    use crate::ir::ClassId;

    fn fixture() -> Program {
        let class = ClassDecl {
            name: "String".to_string(),
            package: "java.lang".to_string(),
            enclosing: None,
            kind: ClassKind::Class,
            is_final: true,
            marker: Some(crate::ir::Marker::NullMarked),
            annotations: Vec::new(),
            suppressions: Vec::new(),
            type_params: Vec::new(),
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: vec![MethodId(0)],
            nested_classes: Vec::new(),
            instance_init_blocks: Vec::new(),
            static_init_blocks: Vec::new(),
            span: Default::default(),
        };
        let method = MethodDecl {
            name: "find".to_string(),
            owner: ClassId(0),
            marker: None,
            annotations: Vec::new(),
            suppressions: Vec::new(),
            params: Vec::new(),
            return_type: string_type(true),
            is_constructor: false,
            is_static: false,
            is_abstract: false,
            is_final: false,
            is_private: false,
            is_varargs: false,
            is_override_annotated: false,
            overrides: None,
            body: None,
            span: Default::default(),
        };
        Program {
            units: vec![CompilationUnit {
                path: "String.java".to_string(),
                package: "java.lang".to_string(),
                classes: vec![ClassId(0)],
            }],
            classes: vec![class],
            methods: vec![method],
            fields: Vec::new(),
            locals: vec![LocalDecl {
                name: "value".to_string(),
                ty: string_type(true),
                span: Default::default(),
            }],
        }
    }

    #[test]
    fn null_literal_is_always_nullable_and_constructions_never() {
        let program = fixture();
        let config = Config::default();
        let scope = ScopeResolver::new();
        let models = LibraryModels::default();
        let flow = ScriptedOracle::default();
        let oracle = NullabilityOracle {
            program: &program,
            config: &config,
            scope: &scope,
            models: &models,
            flow: &flow,
        };
        assert!(oracle.may_be_null(Some(MethodId(0)), &Expr::NullLit { span: Span::default() }));
        assert!(!oracle.may_be_null(
            Some(MethodId(0)),
            &Expr::New {
                class_type: string_type(false),
                ctor: None,
                args: Vec::new(),
                span: Span::default(),
            }
        ));
    }

    #[test]
    fn nullable_call_result_uses_declared_marker() {
        let program = fixture();
        let config = Config::default();
        let scope = ScopeResolver::new();
        let models = LibraryModels::default();
        let flow = ScriptedOracle::default();
        let oracle = NullabilityOracle {
            program: &program,
            config: &config,
            scope: &scope,
            models: &models,
            flow: &flow,
        };
        let call = Expr::Call {
            receiver: None,
            method: MethodId(0),
            args: Vec::new(),
            span: Span::default(),
        };
        assert!(oracle.may_be_null(Some(MethodId(0)), &call));
    }

    #[test]
    fn flow_fact_overrides_declared_nullable_local() {
        let program = fixture();
        let config = Config::default();
        let scope = ScopeResolver::new();
        let models = LibraryModels::default();
        let span = Span { line: 7, col: 9 };
        let mut flow = ScriptedOracle::default();
        flow.point_facts.insert(
            (MethodId(0), span, AccessPath::local(LocalId(0))),
            Nullness::NonNull,
        );
        let oracle = NullabilityOracle {
            program: &program,
            config: &config,
            scope: &scope,
            models: &models,
            flow: &flow,
        };
        let ident = Expr::Ident {
            target: IdentTarget::Local(LocalId(0)),
            span,
        };
        assert!(!oracle.may_be_null(Some(MethodId(0)), &ident));
        let elsewhere = Expr::Ident {
            target: IdentTarget::Local(LocalId(0)),
            span: Span { line: 8, col: 1 },
        };
        assert!(oracle.may_be_null(Some(MethodId(0)), &elsewhere));
    }

    #[test]
    fn out_of_scope_call_defaults_optimistic_unless_modeled() {
        let mut program = fixture();
        program.classes[0].marker = Some(crate::ir::Marker::NullUnmarked);
        let config = Config::default();
        let scope = ScopeResolver::new();
        let mut models = LibraryModels::default();
        let flow = ScriptedOracle::default();
        {
            let oracle = NullabilityOracle {
                program: &program,
                config: &config,
                scope: &scope,
                models: &models,
                flow: &flow,
            };
            let call = Expr::Call {
                receiver: None,
                method: MethodId(0),
                args: Vec::new(),
                span: Span::default(),
            };
            assert!(!oracle.may_be_null(Some(MethodId(0)), &call));
        }
        models = serde_json::from_str(
            r#"{ "methods": { "java.lang.String#find": { "nullable_return": true } } }"#,
        )
        .expect("inline model");
        let scope = ScopeResolver::new();
        let oracle = NullabilityOracle {
            program: &program,
            config: &config,
            scope: &scope,
            models: &models,
            flow: &flow,
        };
        let call = Expr::Call {
            receiver: None,
            method: MethodId(0),
            args: Vec::new(),
            span: Span::default(),
        };
        assert!(oracle.may_be_null(Some(MethodId(0)), &call));
    }
}
