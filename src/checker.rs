use anyhow::{bail, Result};

use crate::diagnostics::{
    is_suppressed, unknown_suppression_names, Diagnostic, DiagnosticKind, SuggestedEdit,
};
use crate::engine::CheckSession;
use crate::fieldinit::{analyze_class, FieldInitEntities};
use crate::generics::{instantiate_member_type, render_type, GenericsComparator, Mismatch};
use crate::ir::{
    Block, CaseLabel, ClassId, Expr, FieldId, IdentTarget, LambdaBody, LambdaParam, MethodId,
    MethodRefKind, Program, Span, Stmt, TypeKind, TypeRef,
};
use crate::oracle::static_type;

/// Uniform-marking assumption for the top-level class under checking.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MarkState {
    FullyMarked,
    FullyUnmarked,
    PartiallyMarked,
}

/// The state only ever strengthens toward PartiallyMarked; it resets by
/// constructing a fresh tracker for the next top-level class.
struct MarkTracker {
    state: MarkState,
}

impl MarkTracker {
    fn new(top_level_marked: bool) -> Self {
        Self {
            state: if top_level_marked {
                MarkState::FullyMarked
            } else {
                MarkState::FullyUnmarked
            },
        }
    }

    fn observe(&mut self, declaration_marked: bool) {
        let contradicts = match self.state {
            MarkState::FullyMarked => !declaration_marked,
            MarkState::FullyUnmarked => declaration_marked,
            MarkState::PartiallyMarked => false,
        };
        if contradicts {
            self.state = MarkState::PartiallyMarked;
        }
    }
}

/// Check one top-level class. Per-class working state lives inside this call
/// and is dropped on return; scope records persist in the session.
pub(crate) fn check_top_level_class(
    session: &CheckSession<'_>,
    unit_index: usize,
    class_id: ClassId,
) -> Result<()> {
    let program = session.program;
    let marked = session
        .scope
        .class_is_marked(program, session.config, class_id);
    let mut checker = ClassChecker {
        session,
        program,
        unit_path: &program.units[unit_index].path,
        marks: MarkTracker::new(marked),
    };
    checker.check_class(class_id)
}

/// Per-method checking context threaded through the traversal.
#[derive(Clone, Copy)]
struct Ctx<'c> {
    /// Enclosing method, when inside one; None in field initializers and
    /// initializer blocks.
    method: Option<MethodId>,
    class: ClassId,
    entities: &'c FieldInitEntities,
    in_constructor: bool,
}

struct ClassChecker<'s, 'a> {
    session: &'s CheckSession<'a>,
    program: &'a Program,
    unit_path: &'s str,
    marks: MarkTracker,
}

impl<'s, 'a> ClassChecker<'s, 'a> {
    fn check_class(&mut self, class_id: ClassId) -> Result<()> {
        let program = self.program;
        let config = self.session.config;
        let class = program.class(class_id);

        if let Some(marker) = class.marker {
            self.marks.observe(marker == crate::ir::Marker::NullMarked);
        }
        if config.class_is_excluded(&program.class_qualified_name(class_id))
            || config.annotation_excludes_class(&class.annotations)
        {
            self.marks.observe(false);
        }
        self.check_suppression_names(&class.suppressions, class.span, class_id, None, None);

        let in_scope = self.class_in_scope(class_id);
        // Per-class arena: entities and the initialization report exist only
        // for the duration of this call.
        let entities = FieldInitEntities::collect(program, config, class_id);
        if in_scope {
            self.emit_field_init_report(class_id, &entities);
        }

        for field_id in &class.fields {
            self.check_field(class_id, *field_id, &entities, in_scope)?;
        }
        for block in class
            .instance_init_blocks
            .iter()
            .chain(class.static_init_blocks.iter())
        {
            if in_scope {
                let ctx = Ctx {
                    method: None,
                    class: class_id,
                    entities: &entities,
                    in_constructor: false,
                };
                self.check_block(ctx, None, block)?;
            }
        }
        for method_id in &class.methods {
            self.check_method(class_id, *method_id, &entities)?;
        }
        for nested in &class.nested_classes {
            self.check_class(*nested)?;
        }
        Ok(())
    }

    fn emit_field_init_report(&self, class_id: ClassId, entities: &FieldInitEntities) {
        let program = self.program;
        let report = analyze_class(program, self.session.config, self.session.flow, entities);
        for field_id in report
            .never_initialized_instance
            .iter()
            .chain(report.never_initialized_static.iter())
        {
            let field = program.field(*field_id);
            let chain = self.field_chain(*field_id, class_id);
            self.report(
                DiagnosticKind::FieldNoInit,
                field.span,
                format!("@NonNull field {} not initialized", field.name),
                &chain,
                None,
            );
        }
        for (ctor, fields) in &report.constructor_uninit {
            let chain = self.method_chain(*ctor, class_id);
            self.report(
                DiagnosticKind::MethodNoInit,
                program.method(*ctor).span,
                format!(
                    "constructor does not guarantee @NonNull field{} {} {} initialized",
                    plural(fields.len()),
                    self.field_names(fields),
                    is_are(fields.len())
                ),
                &chain,
                None,
            );
        }
        for (init, fields) in &report.initializer_uninit {
            let chain = self.method_chain(*init, class_id);
            self.report(
                DiagnosticKind::MethodNoInit,
                program.method(*init).span,
                format!(
                    "initializer method does not guarantee @NonNull field{} {} {} initialized",
                    plural(fields.len()),
                    self.field_names(fields),
                    is_are(fields.len())
                ),
                &chain,
                None,
            );
        }
    }

    fn check_field(
        &self,
        class_id: ClassId,
        field_id: FieldId,
        entities: &FieldInitEntities,
        in_scope: bool,
    ) -> Result<()> {
        let program = self.program;
        let field = program.field(field_id);
        self.check_suppression_names(
            &field.suppressions,
            field.span,
            class_id,
            None,
            Some(field_id),
        );
        if !in_scope {
            return Ok(());
        }
        self.check_type_arguments(&field.ty, field.span, class_id, None, Some(field_id));
        if let Some(init) = &field.initializer {
            let ctx = Ctx {
                method: None,
                class: class_id,
                entities,
                in_constructor: false,
            };
            self.check_expr(ctx, init)?;
            if self.field_requires_nonnull(field_id)
                && self.session.oracle().may_be_null(None, init)
            {
                let chain = self.field_chain(field_id, class_id);
                let edit = self.cast_edit(init);
                self.report(
                    DiagnosticKind::AssignFieldNullable,
                    init.span(),
                    format!(
                        "assigning @Nullable expression to @NonNull field {}",
                        field.name
                    ),
                    &chain,
                    edit,
                );
            }
            self.check_generic_assignment(
                ctx,
                &field.ty,
                init,
                DiagnosticKind::GenericAssignmentMismatch,
            );
        }
        Ok(())
    }

    fn check_method(
        &mut self,
        class_id: ClassId,
        method_id: MethodId,
        entities: &FieldInitEntities,
    ) -> Result<()> {
        let program = self.program;
        let config = self.session.config;
        let method = program.method(method_id);

        if let Some(marker) = method.marker {
            self.marks.observe(marker == crate::ir::Marker::NullMarked);
        }
        self.check_suppression_names(
            &method.suppressions,
            method.span,
            class_id,
            Some(method_id),
            None,
        );

        if !self.method_in_scope(method_id) {
            return Ok(());
        }

        self.check_type_arguments(
            &method.return_type,
            method.span,
            class_id,
            Some(method_id),
            None,
        );
        for param in &method.params {
            self.check_type_arguments(&param.ty, param.span, class_id, Some(method_id), None);
        }

        let skip_override_lookup = config.exhaustive_override && !method.is_override_annotated;
        if !skip_override_lookup {
            if let Some(overridden) = method.overrides {
                self.check_override(class_id, method_id, overridden);
            }
        }

        if let Some(body) = &method.body {
            let ctx = Ctx {
                method: Some(method_id),
                class: class_id,
                entities,
                in_constructor: method.is_constructor,
            };
            let return_ty = if method.is_constructor {
                None
            } else {
                Some(method.return_type.clone())
            };
            self.check_block(ctx, return_ty.as_ref(), body)?;
        }
        Ok(())
    }

    /// Contravariant parameters, covariant returns, both generics-aware,
    /// evaluated in the overriding class's instantiation context.
    fn check_override(&self, class_id: ClassId, overriding: MethodId, overridden: MethodId) {
        let program = self.program;
        let this_ty = declared_self_type(program, class_id);
        let overriding_decl = program.method(overriding);
        let overridden_decl = program.method(overridden);
        let overridden_in_scope =
            self.session
                .scope
                .method_is_marked(program, self.session.config, overridden);

        let count = overriding_decl
            .params
            .len()
            .min(overridden_decl.params.len());
        for index in 0..count {
            let overriding_param = &overriding_decl.params[index];
            let inherited_ty = instantiate_member_type(
                program,
                &overridden_decl.params[index].ty,
                &this_ty,
                overridden_decl.owner,
            );
            let overridden_accepts_null = if overridden_in_scope {
                inherited_ty.nullable
            } else {
                self.session
                    .models
                    .method(&program.method_qualified_name(overridden))
                    .is_some_and(|model| model.nullable_params.contains(&(index as u32)))
            };
            let overriding_requires_nonnull =
                !overriding_param.ty.nullable && !overriding_param.ty.is_primitive();
            if overridden_accepts_null && overriding_requires_nonnull {
                let chain = self.method_chain(overriding, class_id);
                self.report(
                    DiagnosticKind::WrongOverrideParam,
                    overriding_param.span,
                    format!(
                        "parameter {} is @NonNull, but parameter in overridden method {} is @Nullable",
                        overriding_param.name,
                        program.method_qualified_name(overridden)
                    ),
                    &chain,
                    None,
                );
            }
            if self.generics_enabled(overridden_in_scope) {
                self.report_generic_mismatches(
                    &inherited_ty,
                    &overriding_param.ty,
                    overriding_param.span,
                    DiagnosticKind::GenericParameterMismatch,
                    &self.method_chain(overriding, class_id),
                );
            }
        }

        let inherited_return = instantiate_member_type(
            program,
            &overridden_decl.return_type,
            &this_ty,
            overridden_decl.owner,
        );
        let overridden_requires_nonnull = if overridden_in_scope {
            !inherited_return.nullable && !inherited_return.is_primitive()
        } else {
            self.session
                .models
                .return_nullable(&program.method_qualified_name(overridden))
                == Some(false)
        };
        if overridden_requires_nonnull && overriding_decl.return_type.nullable {
            let chain = self.method_chain(overriding, class_id);
            self.report(
                DiagnosticKind::WrongOverrideReturn,
                overriding_decl.span,
                format!(
                    "method returns @Nullable, but overridden method {} returns @NonNull",
                    program.method_qualified_name(overridden)
                ),
                &chain,
                None,
            );
        }
        if self.generics_enabled(overridden_in_scope) {
            self.report_generic_mismatches(
                &inherited_return,
                &overriding_decl.return_type,
                overriding_decl.span,
                DiagnosticKind::GenericReturnMismatch,
                &self.method_chain(overriding, class_id),
            );
        }
    }

    fn check_block(&self, ctx: Ctx<'_>, return_ty: Option<&TypeRef>, block: &Block) -> Result<()> {
        for stmt in &block.stmts {
            self.check_stmt(ctx, return_ty, stmt)?;
        }
        Ok(())
    }

    fn check_stmt(&self, ctx: Ctx<'_>, return_ty: Option<&TypeRef>, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr { expr } => self.check_expr(ctx, expr),
            Stmt::Local { local, init, .. } => {
                if let Some(init) = init {
                    self.check_expr(ctx, init)?;
                    let local_ty = self.program.local(*local).ty.clone();
                    self.check_generic_assignment(
                        ctx,
                        &local_ty,
                        init,
                        DiagnosticKind::GenericAssignmentMismatch,
                    );
                }
                Ok(())
            }
            Stmt::Block(block) => self.check_block(ctx, return_ty, block),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.check_expr(ctx, cond)?;
                self.check_unbox(ctx, cond);
                self.check_block(ctx, return_ty, then_block)?;
                if let Some(else_block) = else_block {
                    self.check_block(ctx, return_ty, else_block)?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.check_expr(ctx, cond)?;
                self.check_unbox(ctx, cond);
                self.check_block(ctx, return_ty, body)
            }
            Stmt::DoWhile { body, cond } => {
                self.check_block(ctx, return_ty, body)?;
                self.check_expr(ctx, cond)?;
                self.check_unbox(ctx, cond);
                Ok(())
            }
            Stmt::ForEach { iterable, body, .. } => {
                self.check_expr(ctx, iterable)?;
                self.check_deref_style(ctx, iterable, "iterated expression");
                self.check_block(ctx, return_ty, body)
            }
            Stmt::Return { value, span } => {
                if let Some(value) = value {
                    self.check_expr(ctx, value)?;
                    if let Some(return_ty) = return_ty {
                        self.check_return_contract(ctx, return_ty, value, *span);
                    }
                }
                Ok(())
            }
            Stmt::Switch {
                selector, cases, ..
            } => {
                self.check_expr(ctx, selector)?;
                let has_null_label = cases
                    .iter()
                    .any(|case| case.labels.contains(&CaseLabel::Null));
                if !has_null_label {
                    self.check_deref_style(ctx, selector, "switch selector");
                }
                for case in cases {
                    self.check_block(ctx, return_ty, &case.body)?;
                }
                Ok(())
            }
            Stmt::Synchronized { lock, body, .. } => {
                self.check_expr(ctx, lock)?;
                self.check_deref_style(ctx, lock, "synchronized lock");
                self.check_block(ctx, return_ty, body)
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                self.check_block(ctx, return_ty, body)?;
                for clause in catches {
                    self.check_block(ctx, return_ty, &clause.body)?;
                }
                if let Some(finally) = finally {
                    self.check_block(ctx, return_ty, finally)?;
                }
                Ok(())
            }
            Stmt::Throw { expr, .. } => self.check_expr(ctx, expr),
        }
    }

    fn check_expr(&self, ctx: Ctx<'_>, expr: &Expr) -> Result<()> {
        match expr {
            Expr::NullLit { .. }
            | Expr::Literal { .. }
            | Expr::This { .. }
            | Expr::Unresolved { .. } => Ok(()),
            Expr::Ident { target, span } => {
                if let IdentTarget::Field(field) = target {
                    self.check_field_read_before_init(ctx, *field, *span);
                }
                Ok(())
            }
            Expr::FieldAccess {
                receiver, field, ..
            } => {
                self.check_expr(ctx, receiver)?;
                self.check_deref(ctx, receiver);
                if matches!(receiver.as_ref(), Expr::This { .. }) {
                    self.check_field_read_before_init(ctx, *field, expr.span());
                }
                Ok(())
            }
            Expr::Call {
                receiver,
                method,
                args,
                span,
            } => {
                if let Some(receiver) = receiver {
                    self.check_expr(ctx, receiver)?;
                    self.check_deref(ctx, receiver);
                }
                for arg in args {
                    self.check_expr(ctx, arg)?;
                }
                self.check_call_arguments(ctx, *method, args, *span)?;
                self.check_redundant_cast(ctx, *method, args, *span);
                Ok(())
            }
            Expr::New {
                class_type,
                ctor,
                args,
                span,
            } => {
                self.check_type_arguments(
                    class_type,
                    *span,
                    ctx.class,
                    ctx.method,
                    None,
                );
                for arg in args {
                    self.check_expr(ctx, arg)?;
                }
                if let Some(ctor) = ctor {
                    self.check_call_arguments(ctx, *ctor, args, *span)?;
                }
                Ok(())
            }
            Expr::NewArray { elem, dims, init, .. } => {
                for dim in dims {
                    self.check_expr(ctx, dim)?;
                    self.check_unbox(ctx, dim);
                }
                for value in init {
                    self.check_expr(ctx, value)?;
                    if !elem.nullable
                        && !elem.is_primitive()
                        && self.session.oracle().may_be_null(ctx.method, value)
                    {
                        let chain = self.site_chain(ctx);
                        let edit = self.cast_edit(value);
                        self.report(
                            DiagnosticKind::AssignArrayElementNullable,
                            value.span(),
                            format!(
                                "storing @Nullable expression into array of @NonNull {}",
                                render_type(self.program, elem)
                            ),
                            &chain,
                            edit,
                        );
                    }
                }
                Ok(())
            }
            Expr::Index { array, index, .. } => {
                self.check_expr(ctx, array)?;
                self.check_deref(ctx, array);
                self.check_expr(ctx, index)?;
                self.check_unbox(ctx, index);
                Ok(())
            }
            Expr::Assign { target, value, .. } => {
                self.check_assign_target(ctx, target)?;
                self.check_expr(ctx, value)?;
                self.check_store(ctx, target, value)
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.check_expr(ctx, lhs)?;
                self.check_expr(ctx, rhs)?;
                if op.is_primitive_context() {
                    self.check_unbox(ctx, lhs);
                    self.check_unbox(ctx, rhs);
                }
                Ok(())
            }
            Expr::Unary { operand, .. } => {
                self.check_expr(ctx, operand)?;
                self.check_unbox(ctx, operand);
                Ok(())
            }
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
                ty,
                ..
            } => {
                self.check_expr(ctx, cond)?;
                self.check_unbox(ctx, cond);
                self.check_expr(ctx, then_expr)?;
                self.check_expr(ctx, else_expr)?;
                for branch in [then_expr.as_ref(), else_expr.as_ref()] {
                    self.check_generic_assignment(
                        ctx,
                        ty,
                        branch,
                        DiagnosticKind::ConditionalBranchMismatch,
                    );
                }
                Ok(())
            }
            Expr::Cast { ty, expr: inner, .. } => {
                self.check_expr(ctx, inner)?;
                if ty.is_primitive() {
                    self.check_unbox(ctx, inner);
                }
                Ok(())
            }
            Expr::InstanceOf { expr: inner, .. } => self.check_expr(ctx, inner),
            Expr::Lambda {
                functional,
                slot,
                params,
                body,
                ..
            } => self.check_lambda(ctx, functional, *slot, params, body),
            Expr::MethodRef {
                kind,
                functional,
                slot,
                target,
                span,
            } => self.check_method_ref(ctx, *kind, functional, *slot, *target, *span),
        }
    }

    /// Visit an assignment target without treating the stored-to leaf as a
    /// read; nested receivers still get dereference checks.
    fn check_assign_target(&self, ctx: Ctx<'_>, target: &Expr) -> Result<()> {
        match target {
            Expr::Ident { .. } => Ok(()),
            Expr::FieldAccess { receiver, .. } => {
                self.check_expr(ctx, receiver)?;
                self.check_deref(ctx, receiver);
                Ok(())
            }
            Expr::Index { array, index, .. } => {
                self.check_expr(ctx, array)?;
                self.check_deref(ctx, array);
                self.check_expr(ctx, index)?;
                self.check_unbox(ctx, index);
                Ok(())
            }
            other => self.check_expr(ctx, other),
        }
    }

    fn check_store(&self, ctx: Ctx<'_>, target: &Expr, value: &Expr) -> Result<()> {
        match target {
            Expr::Ident {
                target: IdentTarget::Field(field),
                ..
            }
            | Expr::FieldAccess { field, .. } => {
                if self.field_requires_nonnull(*field)
                    && self.session.oracle().may_be_null(ctx.method, value)
                {
                    let field_decl = self.program.field(*field);
                    let chain = self.site_chain(ctx);
                    let edit = self.cast_edit(value);
                    self.report(
                        DiagnosticKind::AssignFieldNullable,
                        value.span(),
                        format!(
                            "assigning @Nullable expression to @NonNull field {}",
                            field_decl.name
                        ),
                        &chain,
                        edit,
                    );
                }
                let field_ty = self.program.field(*field).ty.clone();
                self.check_generic_assignment(
                    ctx,
                    &field_ty,
                    value,
                    DiagnosticKind::GenericAssignmentMismatch,
                );
                Ok(())
            }
            Expr::Ident {
                target: IdentTarget::Local(local),
                ..
            } => {
                let local_ty = self.program.local(*local).ty.clone();
                self.check_generic_assignment(
                    ctx,
                    &local_ty,
                    value,
                    DiagnosticKind::GenericAssignmentMismatch,
                );
                Ok(())
            }
            Expr::Index { array, .. } => {
                // The requirement comes from the array's element type, not
                // the array expression's own nullness.
                let elem = static_type(self.program, array)
                    .as_ref()
                    .and_then(|ty| ty.element_type().cloned());
                if let Some(elem) = elem {
                    if !elem.nullable
                        && !elem.is_primitive()
                        && self.session.oracle().may_be_null(ctx.method, value)
                    {
                        let chain = self.site_chain(ctx);
                        let edit = self.cast_edit(value);
                        self.report(
                            DiagnosticKind::AssignArrayElementNullable,
                            value.span(),
                            format!(
                                "storing @Nullable expression into array of @NonNull {}",
                                render_type(self.program, &elem)
                            ),
                            &chain,
                            edit,
                        );
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_call_arguments(
        &self,
        ctx: Ctx<'_>,
        method_id: MethodId,
        args: &[Expr],
        span: Span,
    ) -> Result<()> {
        let program = self.program;
        let method = program.method(method_id);
        let param_count = method.params.len();
        let oracle = self.session.oracle();

        if !method.is_varargs {
            if args.len() != param_count {
                bail!(
                    "call to {} at line {} passes {} arguments, expected {}",
                    program.method_qualified_name(method_id),
                    span.line,
                    args.len(),
                    param_count
                );
            }
            for (index, arg) in args.iter().enumerate() {
                self.check_one_argument(ctx, method_id, index, arg);
            }
            return Ok(());
        }

        if param_count == 0 {
            bail!(
                "varargs method {} declares no parameters",
                program.method_qualified_name(method_id)
            );
        }
        if args.len() < param_count - 1 {
            bail!(
                "call to varargs {} at line {} passes {} arguments, expected at least {}",
                program.method_qualified_name(method_id),
                span.line,
                args.len(),
                param_count - 1
            );
        }
        for (index, arg) in args.iter().take(param_count - 1).enumerate() {
            self.check_one_argument(ctx, method_id, index, arg);
        }
        // Call-site syntax decides whether the trailing arguments are
        // elements or one pre-built array.
        let array_mode = args.len() == param_count
            && static_type(program, &args[param_count - 1])
                .is_some_and(|ty| matches!(ty.kind, TypeKind::Array));
        if array_mode {
            self.check_one_argument(ctx, method_id, param_count - 1, &args[param_count - 1]);
        } else {
            let elem = method.params[param_count - 1]
                .ty
                .element_type()
                .cloned();
            if let Some(elem) = elem {
                for arg in &args[param_count - 1..] {
                    if !elem.nullable
                        && !elem.is_primitive()
                        && oracle.may_be_null(ctx.method, arg)
                    {
                        let chain = self.site_chain(ctx);
                        let edit = self.cast_edit(arg);
                        self.report(
                            DiagnosticKind::PassNullable,
                            arg.span(),
                            format!(
                                "passing @Nullable element where @NonNull {} is required",
                                render_type(program, &elem)
                            ),
                            &chain,
                            edit,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn check_one_argument(&self, ctx: Ctx<'_>, method_id: MethodId, index: usize, arg: &Expr) {
        let oracle = self.session.oracle();
        if oracle.param_requires_nonnull(method_id, index as u32)
            && oracle.may_be_null(ctx.method, arg)
        {
            let program = self.program;
            let param_name = program
                .method(method_id)
                .params
                .get(index)
                .map(|param| param.name.clone())
                .unwrap_or_else(|| index.to_string());
            let chain = self.site_chain(ctx);
            let edit = self.cast_edit(arg);
            self.report(
                DiagnosticKind::PassNullable,
                arg.span(),
                format!(
                    "passing @Nullable expression where @NonNull parameter {} of {} is required",
                    param_name,
                    program.method_qualified_name(method_id)
                ),
                &chain,
                edit,
            );
        }
        let method_in_scope =
            self.session
                .scope
                .method_is_marked(self.program, self.session.config, method_id);
        if self.generics_enabled(method_in_scope) {
            if let Some(param) = self.program.method(method_id).params.get(index) {
                if !param.ty.args.is_empty() {
                    if let Some(arg_ty) = static_type(self.program, arg) {
                        let param_ty = param.ty.clone();
                        self.report_generic_mismatches(
                            &param_ty,
                            &arg_ty,
                            arg.span(),
                            DiagnosticKind::GenericParameterMismatch,
                            &self.site_chain(ctx),
                        );
                    }
                }
            }
        }
    }

    fn check_redundant_cast(&self, ctx: Ctx<'_>, method_id: MethodId, args: &[Expr], span: Span) {
        let oracle = self.session.oracle();
        if !oracle.is_cast_to_nonnull(method_id) {
            return;
        }
        if let Some(arg) = args.first() {
            if !oracle.may_be_null(ctx.method, arg) {
                let chain = self.site_chain(ctx);
                self.report(
                    DiagnosticKind::RedundantCastToNonNull,
                    span,
                    format!(
                        "passing @NonNull expression {} to cast-to-non-null helper",
                        describe_expr(self.program, arg)
                    ),
                    &chain,
                    None,
                );
            }
        }
    }

    fn check_lambda(
        &self,
        ctx: Ctx<'_>,
        functional: &TypeRef,
        slot: MethodId,
        params: &[LambdaParam],
        body: &LambdaBody,
    ) -> Result<()> {
        let program = self.program;
        let slot_decl = program.method(slot);
        let slot_return =
            instantiate_member_type(program, &slot_decl.return_type, functional, slot_decl.owner);

        for (index, param) in params.iter().enumerate() {
            // Implicitly-typed parameters inherit the slot's contract.
            if param.implicit_type {
                continue;
            }
            let Some(slot_param) = slot_decl.params.get(index) else {
                continue;
            };
            let slot_param_ty =
                instantiate_member_type(program, &slot_param.ty, functional, slot_decl.owner);
            let local = program.local(param.local);
            if slot_param_ty.nullable && !local.ty.nullable && !local.ty.is_primitive() {
                let chain = self.site_chain(ctx);
                self.report(
                    DiagnosticKind::WrongOverrideParam,
                    local.span,
                    format!(
                        "lambda parameter {} is @NonNull, but the functional method accepts @Nullable",
                        local.name
                    ),
                    &chain,
                    None,
                );
            }
        }

        match body {
            LambdaBody::Expr(value) => {
                self.check_expr(ctx, value)?;
                self.check_return_contract(ctx, &slot_return, value, value.span());
                Ok(())
            }
            LambdaBody::Block(block) => self.check_block(ctx, Some(&slot_return), block),
        }
    }

    fn check_method_ref(
        &self,
        ctx: Ctx<'_>,
        kind: MethodRefKind,
        functional: &TypeRef,
        slot: MethodId,
        target: MethodId,
        span: Span,
    ) -> Result<()> {
        let program = self.program;
        let oracle = self.session.oracle();
        let slot_decl = program.method(slot);

        let receiver_offset = match kind {
            MethodRefKind::Unbound => {
                let synthesized = slot_decl.params.first().map(|param| {
                    instantiate_member_type(program, &param.ty, functional, slot_decl.owner)
                });
                if synthesized.is_some_and(|ty| ty.nullable) {
                    let chain = self.site_chain(ctx);
                    self.report(
                        DiagnosticKind::WrongOverrideParam,
                        span,
                        format!(
                            "unbound method reference to {} needs a @NonNull receiver parameter",
                            program.method_qualified_name(target)
                        ),
                        &chain,
                        None,
                    );
                }
                1
            }
            MethodRefKind::Static | MethodRefKind::Bound | MethodRefKind::Constructor => 0,
        };

        for (slot_index, slot_param) in slot_decl.params.iter().enumerate().skip(receiver_offset) {
            let target_index = slot_index - receiver_offset;
            let slot_param_ty =
                instantiate_member_type(program, &slot_param.ty, functional, slot_decl.owner);
            if slot_param_ty.nullable
                && oracle.param_requires_nonnull(target, target_index as u32)
            {
                let chain = self.site_chain(ctx);
                self.report(
                    DiagnosticKind::WrongOverrideParam,
                    span,
                    format!(
                        "method reference target {} requires @NonNull parameter {}, but the functional method accepts @Nullable",
                        program.method_qualified_name(target),
                        target_index
                    ),
                    &chain,
                    None,
                );
            }
        }

        if kind != MethodRefKind::Constructor {
            let slot_return = instantiate_member_type(
                program,
                &slot_decl.return_type,
                functional,
                slot_decl.owner,
            );
            if !slot_return.nullable
                && !slot_return.is_primitive()
                && oracle.call_return_nullable(target, None)
            {
                let chain = self.site_chain(ctx);
                self.report(
                    DiagnosticKind::WrongOverrideReturn,
                    span,
                    format!(
                        "method reference target {} returns @Nullable, but the functional method requires @NonNull",
                        program.method_qualified_name(target)
                    ),
                    &chain,
                    None,
                );
            }
        }
        Ok(())
    }

    fn check_return_contract(&self, ctx: Ctx<'_>, return_ty: &TypeRef, value: &Expr, span: Span) {
        if !return_ty.nullable
            && !return_ty.is_primitive()
            && self.session.oracle().may_be_null(ctx.method, value)
        {
            let chain = self.site_chain(ctx);
            let edit = self.cast_edit(value);
            self.report(
                DiagnosticKind::ReturnNullable,
                span,
                "returning @Nullable expression from method with @NonNull return type"
                    .to_string(),
                &chain,
                edit,
            );
        }
        self.check_generic_assignment(ctx, return_ty, value, DiagnosticKind::GenericReturnMismatch);
    }

    /// Structural generics comparison between a required type and the static
    /// type of an expression flowing into it.
    fn check_generic_assignment(
        &self,
        ctx: Ctx<'_>,
        required: &TypeRef,
        value: &Expr,
        kind: DiagnosticKind,
    ) {
        if required.args.is_empty() && !matches!(required.kind, TypeKind::Array) {
            return;
        }
        let in_scope = match ctx.method {
            Some(method) => {
                self.session
                    .scope
                    .method_is_marked(self.program, self.session.config, method)
            }
            None => self
                .session
                .scope
                .class_is_marked(self.program, self.session.config, ctx.class),
        };
        if !self.generics_enabled(in_scope) {
            return;
        }
        let Some(value_ty) = static_type(self.program, value) else {
            return;
        };
        if value_ty.args.is_empty() {
            return;
        }
        self.report_generic_mismatches(
            required,
            &value_ty,
            value.span(),
            kind,
            &self.site_chain(ctx),
        );
    }

    fn report_generic_mismatches(
        &self,
        required: &TypeRef,
        found: &TypeRef,
        span: Span,
        kind: DiagnosticKind,
        chain: &[&[String]],
    ) {
        let comparator = GenericsComparator::new(self.program);
        let mismatches = comparator.compare(required, found);
        for mismatch in mismatches {
            self.report(
                kind,
                span,
                mismatch_message(self.program, required, found, &mismatch),
                chain,
                None,
            );
        }
    }

    fn check_deref(&self, ctx: Ctx<'_>, receiver: &Expr) {
        self.check_deref_style(ctx, receiver, "dereferenced expression");
    }

    /// Dereference-style single-site rule, shared by member access, switch
    /// selectors, synchronized locks and iterated expressions.
    fn check_deref_style(&self, ctx: Ctx<'_>, expr: &Expr, what: &str) {
        if deref_structurally_safe(expr) {
            return;
        }
        if static_type(self.program, expr).is_some_and(|ty| ty.is_primitive()) {
            return;
        }
        if self.session.oracle().may_be_null(ctx.method, expr) {
            let chain = self.site_chain(ctx);
            let edit = self.cast_edit(expr);
            self.report(
                DiagnosticKind::DereferenceNullable,
                expr.span(),
                format!("{} {} is @Nullable", what, describe_expr(self.program, expr)),
                &chain,
                edit,
            );
        }
    }

    /// Non-primitive expression consumed in a primitive context.
    fn check_unbox(&self, ctx: Ctx<'_>, expr: &Expr) {
        let Some(ty) = static_type(self.program, expr) else {
            return;
        };
        if ty.is_primitive() {
            return;
        }
        if self.session.oracle().may_be_null(ctx.method, expr) {
            let chain = self.site_chain(ctx);
            let edit = self.cast_edit(expr);
            self.report(
                DiagnosticKind::UnboxNullable,
                expr.span(),
                format!(
                    "unboxing of @Nullable expression {}",
                    describe_expr(self.program, expr)
                ),
                &chain,
                edit,
            );
        }
    }

    fn check_field_read_before_init(&self, ctx: Ctx<'_>, field: FieldId, span: Span) {
        if !ctx.in_constructor {
            return;
        }
        let Some(method) = ctx.method else {
            return;
        };
        if !ctx.entities.instance_fields.contains(&field) {
            return;
        }
        if self.program.field(field).owner != ctx.class {
            return;
        }
        let Some(assigned) = self
            .session
            .flow
            .nonnull_fields_before(self.program, method, span)
        else {
            return;
        };
        if !assigned.contains(&field) {
            let chain = self.site_chain(ctx);
            self.report(
                DiagnosticKind::FieldReadBeforeInit,
                span,
                format!(
                    "read of @NonNull field {} before initialization",
                    self.program.field(field).name
                ),
                &chain,
                None,
            );
        }
    }

    /// Nullable type arguments in positions whose parameter does not admit
    /// them, recursively through nested arguments.
    fn check_type_arguments(
        &self,
        ty: &TypeRef,
        span: Span,
        class_id: ClassId,
        method: Option<MethodId>,
        field: Option<FieldId>,
    ) {
        let in_scope = match method {
            Some(method) => {
                self.session
                    .scope
                    .method_is_marked(self.program, self.session.config, method)
            }
            None => self
                .session
                .scope
                .class_is_marked(self.program, self.session.config, class_id),
        };
        if !self.generics_enabled(in_scope) {
            return;
        }
        self.check_type_arguments_inner(ty, span, class_id, method, field);
    }

    fn check_type_arguments_inner(
        &self,
        ty: &TypeRef,
        span: Span,
        class_id: ClassId,
        method: Option<MethodId>,
        field: Option<FieldId>,
    ) {
        if let TypeKind::Class(decl_id) = ty.kind {
            let decl = self.program.class(decl_id);
            for (index, arg) in ty.args.iter().enumerate() {
                if let Some(param) = decl.type_params.get(index) {
                    if arg.nullable && !param.admits_nullable {
                        let chain = match (method, field) {
                            (Some(method), _) => self.method_chain(method, class_id),
                            (None, Some(field)) => self.field_chain(field, class_id),
                            (None, None) => self.class_chain(class_id),
                        };
                        self.report(
                            DiagnosticKind::NullableTypeArgument,
                            span,
                            format!(
                                "type parameter {} of {} does not admit the @Nullable argument {}",
                                param.name,
                                self.program.class_qualified_name(decl_id),
                                render_type(self.program, arg)
                            ),
                            &chain,
                            None,
                        );
                    }
                }
            }
        }
        for arg in &ty.args {
            self.check_type_arguments_inner(arg, span, class_id, method, field);
        }
    }

    fn check_suppression_names(
        &self,
        list: &[String],
        span: Span,
        class_id: ClassId,
        method: Option<MethodId>,
        field: Option<FieldId>,
    ) {
        let unknown: Vec<String> =
            unknown_suppression_names(self.session.config, list).cloned().collect();
        for name in unknown {
            let chain = match (method, field) {
                (Some(method), _) => self.method_chain(method, class_id),
                (None, Some(field)) => self.field_chain(field, class_id),
                (None, None) => self.class_chain(class_id),
            };
            self.report(
                DiagnosticKind::AnnotationValueInvalid,
                span,
                format!("unknown suppression name '{name}'"),
                &chain,
                None,
            );
        }
    }

    fn field_requires_nonnull(&self, field: FieldId) -> bool {
        let decl = self.program.field(field);
        if decl.ty.nullable || decl.ty.is_primitive() {
            return false;
        }
        self.session
            .scope
            .class_is_marked(self.program, self.session.config, decl.owner)
    }

    fn generics_enabled(&self, in_scope: bool) -> bool {
        in_scope || self.session.config.strict_generics
    }

    fn class_in_scope(&self, class_id: ClassId) -> bool {
        match self.marks.state {
            MarkState::FullyMarked => true,
            MarkState::FullyUnmarked => false,
            MarkState::PartiallyMarked => {
                self.session
                    .scope
                    .class_is_marked(self.program, self.session.config, class_id)
            }
        }
    }

    fn method_in_scope(&self, method_id: MethodId) -> bool {
        match self.marks.state {
            MarkState::FullyMarked => true,
            MarkState::FullyUnmarked => false,
            MarkState::PartiallyMarked => {
                self.session
                    .scope
                    .method_is_marked(self.program, self.session.config, method_id)
            }
        }
    }

    fn site_chain(&self, ctx: Ctx<'_>) -> Vec<&'a [String]> {
        match ctx.method {
            Some(method) => self.method_chain(method, ctx.class),
            None => self.class_chain(ctx.class),
        }
    }

    fn method_chain(&self, method: MethodId, class_id: ClassId) -> Vec<&'a [String]> {
        let mut chain: Vec<&[String]> =
            vec![self.program.method(method).suppressions.as_slice()];
        chain.extend(self.class_chain(class_id));
        chain
    }

    fn field_chain(&self, field: FieldId, class_id: ClassId) -> Vec<&'a [String]> {
        let mut chain: Vec<&[String]> = vec![self.program.field(field).suppressions.as_slice()];
        chain.extend(self.class_chain(class_id));
        chain
    }

    fn class_chain(&self, class_id: ClassId) -> Vec<&'a [String]> {
        let mut chain = Vec::new();
        let mut current = Some(class_id);
        while let Some(id) = current {
            let class = self.program.class(id);
            chain.push(class.suppressions.as_slice());
            current = match class.enclosing {
                Some(crate::ir::Enclosing::Class(outer)) => Some(outer),
                Some(crate::ir::Enclosing::Method(method)) => {
                    chain.push(self.program.method(method).suppressions.as_slice());
                    Some(self.program.method(method).owner)
                }
                None => None,
            };
        }
        chain
    }

    fn report(
        &self,
        kind: DiagnosticKind,
        span: Span,
        message: String,
        chain: &[&[String]],
        edit: Option<SuggestedEdit>,
    ) {
        // The violation decision is already made; suppression only controls
        // visibility.
        if is_suppressed(self.session.config, kind, chain.iter().copied()) {
            return;
        }
        let edit = edit.or_else(|| self.suppression_edit(kind, chain, span));
        self.session.report(Diagnostic {
            kind,
            message,
            unit_path: self.unit_path.to_string(),
            span,
            edit,
        });
    }

    /// Rewrite wrapping the offending expression in the configured
    /// runtime-checked cast helper.
    fn cast_edit(&self, expr: &Expr) -> Option<SuggestedEdit> {
        let helper = self.session.config.cast_to_non_null_method.as_deref()?;
        let simple = helper.rsplit(['#', '.']).next().unwrap_or(helper);
        Some(SuggestedEdit {
            description: format!("wrap in {simple}"),
            replacement: format!("{}({})", simple, describe_expr(self.program, expr)),
            span: expr.span(),
        })
    }

    /// Insertion of a suppression naming this kind, merged with whatever the
    /// nearest declaration already lists.
    fn suppression_edit(
        &self,
        kind: DiagnosticKind,
        chain: &[&[String]],
        span: Span,
    ) -> Option<SuggestedEdit> {
        if !self.session.config.suggest_suppressions {
            return None;
        }
        let existing = chain.first().copied().unwrap_or(&[]);
        let mut names: Vec<&str> = existing.iter().map(String::as_str).collect();
        names.push(kind.id());
        let replacement = if names.len() == 1 {
            format!("@SuppressWarnings(\"{}\")", names[0])
        } else {
            let quoted: Vec<String> = names.iter().map(|name| format!("\"{name}\"")).collect();
            format!("@SuppressWarnings({{{}}})", quoted.join(", "))
        };
        Some(SuggestedEdit {
            description: format!("suppress {}", kind.id()),
            replacement,
            span,
        })
    }
}

/// Receivers whose static kind rules out absence: type references, package
/// references and the current instance.
fn deref_structurally_safe(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::This { .. }
            | Expr::Ident {
                target: IdentTarget::Class(_),
                ..
            }
            | Expr::Ident {
                target: IdentTarget::Package,
                ..
            }
    )
}

/// Generic self type of a class declaration: its own parameters as
/// arguments.
fn declared_self_type(program: &Program, class_id: ClassId) -> TypeRef {
    let class = program.class(class_id);
    TypeRef {
        kind: TypeKind::Class(class_id),
        nullable: false,
        args: class
            .type_params
            .iter()
            .map(|param| TypeRef {
                kind: TypeKind::TypeVar(param.name.clone()),
                nullable: false,
                args: Vec::new(),
            })
            .collect(),
    }
}

fn mismatch_message(
    program: &Program,
    required: &TypeRef,
    found: &TypeRef,
    mismatch: &Mismatch,
) -> String {
    let position = mismatch
        .path
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join(".");
    format!(
        "nullability of type argument at position {} differs between {} and {}: {} vs {}",
        position,
        render_type(program, required),
        render_type(program, found),
        mismatch.lhs,
        mismatch.rhs
    )
}

/// Compact source-like rendering used in messages and suggested rewrites.
fn describe_expr(program: &Program, expr: &Expr) -> String {
    match expr {
        Expr::NullLit { .. } => "null".to_string(),
        Expr::Literal { text, .. } if !text.is_empty() => text.clone(),
        Expr::Literal { .. } => "<literal>".to_string(),
        Expr::This { .. } => "this".to_string(),
        Expr::Ident { target, .. } => match target {
            IdentTarget::Local(id) => program.local(*id).name.clone(),
            IdentTarget::Param { method, index } => program
                .method(*method)
                .params
                .get(*index as usize)
                .map(|param| param.name.clone())
                .unwrap_or_else(|| "<param>".to_string()),
            IdentTarget::Field(field) => program.field(*field).name.clone(),
            IdentTarget::Class(class) => program.class(*class).name.clone(),
            IdentTarget::Package => "<package>".to_string(),
        },
        Expr::FieldAccess {
            receiver, field, ..
        } => format!(
            "{}.{}",
            describe_expr(program, receiver),
            program.field(*field).name
        ),
        Expr::Call {
            receiver, method, ..
        } => match receiver {
            Some(receiver) => format!(
                "{}.{}(...)",
                describe_expr(program, receiver),
                program.method(*method).name
            ),
            None => format!("{}(...)", program.method(*method).name),
        },
        Expr::New { class_type, .. } => format!("new {}", render_type(program, class_type)),
        Expr::NewArray { .. } => "new []".to_string(),
        Expr::Index { array, index, .. } => format!(
            "{}[{}]",
            describe_expr(program, array),
            describe_expr(program, index)
        ),
        Expr::Assign { target, .. } => describe_expr(program, target),
        Expr::Binary { .. } | Expr::Unary { .. } => "<expression>".to_string(),
        Expr::Conditional { .. } => "<conditional>".to_string(),
        Expr::Cast { expr, .. } => describe_expr(program, expr),
        Expr::InstanceOf { .. } => "<instanceof>".to_string(),
        Expr::Lambda { .. } => "<lambda>".to_string(),
        Expr::MethodRef { .. } => "<method reference>".to_string(),
        Expr::Unresolved { .. } => "<unresolved>".to_string(),
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn is_are(count: usize) -> &'static str {
    if count == 1 { "is" } else { "are" }
}

impl ClassChecker<'_, '_> {
    fn field_names(&self, fields: &std::collections::BTreeSet<FieldId>) -> String {
        fields
            .iter()
            .map(|field| self.program.field(*field).name.clone())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dataflow::AssignScanOracle;
    use crate::engine::CheckSession;
    use crate::ir::{
        ClassDecl, ClassKind, CompilationUnit, FieldDecl, LocalDecl, LocalId, Marker, MethodDecl,
        ParamDecl, Primitive, TypeParam,
    };
    use crate::libmodel::LibraryModels;

    struct World {
        program: Program,
    }

    impl World {
        fn new() -> Self {
            Self {
                program: Program {
                    units: Vec::new(),
                    classes: Vec::new(),
                    methods: Vec::new(),
                    fields: Vec::new(),
                    locals: Vec::new(),
                },
            }
        }

        fn add_unit(&mut self, path: &str, classes: Vec<ClassId>) {
            self.program.units.push(CompilationUnit {
                path: path.to_string(),
                package: "com.example".to_string(),
                classes,
            });
        }

        fn add_class(&mut self, name: &str, marker: Option<Marker>) -> ClassId {
            let id = ClassId(self.program.classes.len() as u32);
            self.program.classes.push(ClassDecl {
                name: name.to_string(),
                package: "com.example".to_string(),
                enclosing: None,
                kind: ClassKind::Class,
                is_final: false,
                marker,
                annotations: Vec::new(),
                suppressions: Vec::new(),
                type_params: Vec::new(),
                super_class: None,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                nested_classes: Vec::new(),
                instance_init_blocks: Vec::new(),
                static_init_blocks: Vec::new(),
                span: Span::default(),
            });
            id
        }

        fn add_field(&mut self, owner: ClassId, name: &str, ty: TypeRef) -> FieldId {
            let id = FieldId(self.program.fields.len() as u32);
            self.program.fields.push(FieldDecl {
                name: name.to_string(),
                owner,
                ty,
                is_static: false,
                is_final: false,
                annotations: Vec::new(),
                suppressions: Vec::new(),
                initializer: None,
                span: Span::default(),
            });
            self.program.classes[owner.0 as usize].fields.push(id);
            id
        }

        fn add_method(&mut self, owner: ClassId, name: &str, return_type: TypeRef) -> MethodId {
            let id = MethodId(self.program.methods.len() as u32);
            self.program.methods.push(MethodDecl {
                name: name.to_string(),
                owner,
                marker: None,
                annotations: Vec::new(),
                suppressions: Vec::new(),
                params: Vec::new(),
                return_type,
                is_constructor: false,
                is_static: false,
                is_abstract: false,
                is_final: false,
                is_private: false,
                is_varargs: false,
                is_override_annotated: false,
                overrides: None,
                body: None,
                span: Span::default(),
            });
            self.program.classes[owner.0 as usize].methods.push(id);
            id
        }

        fn add_local(&mut self, name: &str, ty: TypeRef) -> LocalId {
            let id = LocalId(self.program.locals.len() as u32);
            self.program.locals.push(LocalDecl {
                name: name.to_string(),
                ty,
                span: Span::default(),
            });
            id
        }
    }

    fn class_type(id: ClassId, nullable: bool, args: Vec<TypeRef>) -> TypeRef {
        TypeRef {
            kind: TypeKind::Class(id),
            nullable,
            args,
        }
    }

    fn void_type() -> TypeRef {
        TypeRef {
            kind: TypeKind::Void,
            nullable: false,
            args: Vec::new(),
        }
    }

    fn int_literal(line: u32) -> Expr {
        Expr::Literal {
            prim: Some(Primitive::Int),
            text: "1".to_string(),
            span: Span { line, col: 1 },
        }
    }

    fn run_checker(world: &World, config: &Config) -> Vec<Diagnostic> {
        let models = LibraryModels::default();
        let flow = AssignScanOracle;
        let session = CheckSession::new(&world.program, config, &models, &flow, None);
        session.run();
        session.collected_diagnostics()
    }

    #[test]
    fn marking_state_only_strengthens() {
        let mut tracker = MarkTracker::new(true);
        assert_eq!(tracker.state, MarkState::FullyMarked);
        tracker.observe(true);
        assert_eq!(tracker.state, MarkState::FullyMarked);
        tracker.observe(false);
        assert_eq!(tracker.state, MarkState::PartiallyMarked);
        tracker.observe(true);
        assert_eq!(tracker.state, MarkState::PartiallyMarked);
    }

    #[test]
    fn nullable_initializer_for_nonnull_field_reports_once() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let provider = world.add_method(widget, "provider", class_type(object, true, Vec::new()));
        let field = world.add_field(widget, "name", class_type(object, false, Vec::new()));
        world.program.fields[field.0 as usize].initializer = Some(Expr::Call {
            receiver: None,
            method: provider,
            args: Vec::new(),
            span: Span { line: 4, col: 20 },
        });
        world.add_unit("Widget.java", vec![widget]);

        let diagnostics = run_checker(&world, &Config::default());
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::AssignFieldNullable);
        assert_eq!(diagnostics[0].span, Span { line: 4, col: 20 });
    }

    #[test]
    fn override_tightening_nullable_param_reports_at_the_param() {
        let mut world = World::new();
        let value = world.add_class("Value", None);
        let base = world.add_class("Base", Some(Marker::NullMarked));
        let derived = world.add_class("Derived", Some(Marker::NullMarked));
        let base_set = world.add_method(base, "set", void_type());
        world.program.methods[base_set.0 as usize].params.push(ParamDecl {
            name: "value".to_string(),
            ty: class_type(value, true, Vec::new()),
            span: Span { line: 3, col: 10 },
        });
        let derived_set = world.add_method(derived, "set", void_type());
        world.program.methods[derived_set.0 as usize]
            .params
            .push(ParamDecl {
                name: "value".to_string(),
                ty: class_type(value, false, Vec::new()),
                span: Span { line: 9, col: 14 },
            });
        world.program.methods[derived_set.0 as usize].overrides = Some(base_set);
        world.add_unit("Base.java", vec![base]);
        world.add_unit("Derived.java", vec![derived]);

        let diagnostics = run_checker(&world, &Config::default());
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::WrongOverrideParam);
        assert_eq!(diagnostics[0].span, Span { line: 9, col: 14 });
    }

    #[test]
    fn generic_assignment_mismatch_names_both_instantiations() {
        let mut world = World::new();
        let string = world.add_class("String", None);
        let boxed = world.add_class("Box", Some(Marker::NullMarked));
        world.program.classes[boxed.0 as usize]
            .type_params
            .push(TypeParam {
                name: "T".to_string(),
                admits_nullable: true,
            });
        let holder = world.add_class("Holder", Some(Marker::NullMarked));
        let make = world.add_method(
            holder,
            "makeBoxed",
            class_type(boxed, false, vec![class_type(string, true, Vec::new())]),
        );
        let use_method = world.add_method(holder, "use", void_type());
        let local = world.add_local(
            "plain",
            class_type(boxed, false, vec![class_type(string, false, Vec::new())]),
        );
        world.program.methods[use_method.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Local {
                local,
                init: Some(Expr::Call {
                    receiver: None,
                    method: make,
                    args: Vec::new(),
                    span: Span { line: 12, col: 25 },
                }),
                span: Span { line: 12, col: 5 },
            }],
        });
        world.add_unit("Holder.java", vec![holder]);

        let diagnostics = run_checker(&world, &Config::default());
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(
            diagnostics[0].kind,
            DiagnosticKind::GenericAssignmentMismatch
        );
        assert!(diagnostics[0].message.contains("com.example.Box<com.example.String>"));
        assert!(diagnostics[0]
            .message
            .contains("com.example.Box<@Nullable com.example.String>"));
    }

    #[test]
    fn single_initializer_method_satisfies_field_and_constructors() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let field = world.add_field(widget, "name", class_type(object, false, Vec::new()));
        let ctor = world.add_method(widget, "<init>", void_type());
        world.program.methods[ctor.0 as usize].is_constructor = true;
        world.program.methods[ctor.0 as usize].body = Some(Block::default());
        let set_up = world.add_method(widget, "setUp", void_type());
        world.program.methods[set_up.0 as usize]
            .annotations
            .push("Initializer".to_string());
        world.program.methods[set_up.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Assign {
                    target: Box::new(Expr::Ident {
                        target: IdentTarget::Field(field),
                        span: Span { line: 8, col: 9 },
                    }),
                    value: Box::new(Expr::New {
                        class_type: class_type(object, false, Vec::new()),
                        ctor: None,
                        args: Vec::new(),
                        span: Span { line: 8, col: 16 },
                    }),
                    span: Span { line: 8, col: 9 },
                },
            }],
        });
        world.add_unit("Widget.java", vec![widget]);

        let mut config = Config::default();
        config
            .custom_initializer_annotations
            .insert("Initializer".to_string());
        let diagnostics = run_checker(&world, &config);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn suppression_is_kind_specific_within_one_method() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let maybe = world.add_field(widget, "maybe", class_type(object, true, Vec::new()));
        world.program.fields[maybe.0 as usize].initializer =
            Some(Expr::NullLit { span: Span { line: 2, col: 30 } });
        let count = world.add_field(widget, "count", class_type(object, true, Vec::new()));
        world.program.fields[count.0 as usize].initializer =
            Some(Expr::NullLit { span: Span { line: 3, col: 30 } });
        let noop = world.add_method(object, "noop", void_type());
        let work = world.add_method(widget, "work", void_type());
        world.program.methods[work.0 as usize]
            .suppressions
            .push("DEREFERENCE_NULLABLE".to_string());
        world.program.methods[work.0 as usize].body = Some(Block {
            stmts: vec![
                Stmt::Expr {
                    expr: Expr::Call {
                        receiver: Some(Box::new(Expr::Ident {
                            target: IdentTarget::Field(maybe),
                            span: Span { line: 6, col: 9 },
                        })),
                        method: noop,
                        args: Vec::new(),
                        span: Span { line: 6, col: 9 },
                    },
                },
                Stmt::Expr {
                    expr: Expr::Binary {
                        op: crate::ir::BinaryOp::Add,
                        lhs: Box::new(Expr::Ident {
                            target: IdentTarget::Field(count),
                            span: Span { line: 7, col: 9 },
                        }),
                        rhs: Box::new(int_literal(7)),
                        span: Span { line: 7, col: 9 },
                    },
                },
            ],
        });
        world.add_unit("Widget.java", vec![widget]);

        let diagnostics = run_checker(&world, &Config::default());
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnboxNullable);
        assert_eq!(diagnostics[0].span.line, 7);
    }

    #[test]
    fn switch_with_null_case_label_is_exempt() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let maybe = world.add_field(widget, "maybe", class_type(object, true, Vec::new()));
        world.program.fields[maybe.0 as usize].initializer =
            Some(Expr::NullLit { span: Span { line: 2, col: 30 } });
        let work = world.add_method(widget, "work", void_type());
        let selector = |line: u32| Expr::Ident {
            target: IdentTarget::Field(maybe),
            span: Span { line, col: 17 },
        };
        world.program.methods[work.0 as usize].body = Some(Block {
            stmts: vec![
                Stmt::Switch {
                    selector: selector(5),
                    cases: vec![crate::ir::SwitchCase {
                        labels: vec![CaseLabel::Null, CaseLabel::Default],
                        body: Block::default(),
                    }],
                    span: Span { line: 5, col: 9 },
                },
                Stmt::Switch {
                    selector: selector(9),
                    cases: vec![crate::ir::SwitchCase {
                        labels: vec![CaseLabel::Default],
                        body: Block::default(),
                    }],
                    span: Span { line: 9, col: 9 },
                },
            ],
        });
        world.add_unit("Widget.java", vec![widget]);

        let diagnostics = run_checker(&world, &Config::default());
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DereferenceNullable);
        assert_eq!(diagnostics[0].span.line, 9);
    }

    #[test]
    fn varargs_elements_and_whole_array_modes_differ() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let sink = world.add_method(widget, "log", void_type());
        {
            let sink_decl = &mut world.program.methods[sink.0 as usize];
            sink_decl.is_varargs = true;
            sink_decl.params.push(ParamDecl {
                name: "values".to_string(),
                ty: TypeRef {
                    kind: TypeKind::Array,
                    nullable: false,
                    args: vec![class_type(object, false, Vec::new())],
                },
                span: Span::default(),
            });
        }
        let work = world.add_method(widget, "work", void_type());
        world.program.methods[work.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Call {
                    receiver: None,
                    method: sink,
                    args: vec![
                        Expr::New {
                            class_type: class_type(object, false, Vec::new()),
                            ctor: None,
                            args: Vec::new(),
                            span: Span { line: 4, col: 13 },
                        },
                        Expr::NullLit { span: Span { line: 4, col: 30 } },
                    ],
                    span: Span { line: 4, col: 9 },
                },
            }],
        });
        world.add_unit("Widget.java", vec![widget]);

        let diagnostics = run_checker(&world, &Config::default());
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::PassNullable);
        assert_eq!(diagnostics[0].span, Span { line: 4, col: 30 });
    }

    #[test]
    fn unmarked_class_is_left_alone() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullUnmarked));
        let field = world.add_field(widget, "name", class_type(object, false, Vec::new()));
        world.program.fields[field.0 as usize].initializer =
            Some(Expr::NullLit { span: Span { line: 2, col: 30 } });
        world.add_unit("Widget.java", vec![widget]);

        let diagnostics = run_checker(&world, &Config::default());
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn null_guard_refines_local_before_dereference() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let noop = world.add_method(object, "noop", void_type());
        let work = world.add_method(widget, "work", void_type());
        let local = world.add_local("value", class_type(object, true, Vec::new()));
        // if (value == null) { return; } value.noop();
        world.program.methods[work.0 as usize].body = Some(Block {
            stmts: vec![
                Stmt::Local {
                    local,
                    init: None,
                    span: Span { line: 3, col: 9 },
                },
                Stmt::If {
                    cond: Expr::Binary {
                        op: crate::ir::BinaryOp::Eq,
                        lhs: Box::new(Expr::Ident {
                            target: IdentTarget::Local(local),
                            span: Span { line: 4, col: 13 },
                        }),
                        rhs: Box::new(Expr::NullLit { span: Span { line: 4, col: 22 } }),
                        span: Span { line: 4, col: 13 },
                    },
                    then_block: Block {
                        stmts: vec![Stmt::Return {
                            value: None,
                            span: Span { line: 5, col: 13 },
                        }],
                    },
                    else_block: None,
                },
                Stmt::Expr {
                    expr: Expr::Call {
                        receiver: Some(Box::new(Expr::Ident {
                            target: IdentTarget::Local(local),
                            span: Span { line: 7, col: 9 },
                        })),
                        method: noop,
                        args: Vec::new(),
                        span: Span { line: 7, col: 9 },
                    },
                },
            ],
        });
        world.add_unit("Widget.java", vec![widget]);

        let diagnostics = run_checker(&world, &Config::default());
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn call_with_wrong_arity_aborts_the_unit() {
        let mut world = World::new();
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let callee = world.add_method(widget, "callee", void_type());
        let work = world.add_method(widget, "work", void_type());
        world.program.methods[work.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Call {
                    receiver: None,
                    method: callee,
                    args: vec![Expr::NullLit { span: Span::default() }],
                    span: Span::default(),
                },
            }],
        });
        world.add_unit("Widget.java", vec![widget]);

        let models = LibraryModels::default();
        let config = Config::default();
        let flow = AssignScanOracle;
        let session = CheckSession::new(&world.program, &config, &models, &flow, None);
        session.run();
        let output = session.into_output();
        assert_eq!(output.unit_failures.len(), 1);
        assert!(output.unit_failures[0].message.contains("callee"));
    }

    #[test]
    fn cast_helper_gets_redundant_cast_diagnostic_and_fix_suggestions() {
        let mut world = World::new();
        let object = world.add_class("Value", None);
        let widget = world.add_class("Widget", Some(Marker::NullMarked));
        let cast = world.add_method(widget, "castToNonNull", class_type(object, false, Vec::new()));
        world.program.methods[cast.0 as usize].params.push(ParamDecl {
            name: "value".to_string(),
            ty: class_type(object, true, Vec::new()),
            span: Span::default(),
        });
        let work = world.add_method(widget, "work", void_type());
        world.program.methods[work.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Call {
                    receiver: None,
                    method: cast,
                    args: vec![Expr::New {
                        class_type: class_type(object, false, Vec::new()),
                        ctor: None,
                        args: Vec::new(),
                        span: Span { line: 5, col: 24 },
                    }],
                    span: Span { line: 5, col: 9 },
                },
            }],
        });
        world.add_unit("Widget.java", vec![widget]);

        let mut config = Config::default();
        config.cast_to_non_null_method = Some("com.example.Widget#castToNonNull".to_string());
        let diagnostics = run_checker(&world, &config);
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert_eq!(diagnostics[0].kind, DiagnosticKind::RedundantCastToNonNull);
    }
}
