use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::dataflow::FlowOracle;
use crate::ir::{Block, ClassId, Expr, FieldId, MethodId, Program, Stmt};

/// Per-class snapshot of everything the initialization proof needs. Built
/// once when checking of a class begins and dropped when it ends; nothing in
/// here survives to the next class.
#[derive(Debug)]
pub(crate) struct FieldInitEntities {
    pub(crate) class: ClassId,
    /// Non-null instance fields requiring an initialization proof.
    pub(crate) instance_fields: BTreeSet<FieldId>,
    /// Non-null static fields requiring an initialization proof.
    pub(crate) static_fields: BTreeSet<FieldId>,
    pub(crate) constructors: Vec<MethodId>,
    pub(crate) instance_initializer_methods: Vec<MethodId>,
    pub(crate) static_initializer_methods: Vec<MethodId>,
}

impl FieldInitEntities {
    pub(crate) fn collect(program: &Program, config: &Config, class_id: ClassId) -> Self {
        let class = program.class(class_id);
        let mut instance_fields = BTreeSet::new();
        let mut static_fields = BTreeSet::new();
        for field_id in &class.fields {
            let field = program.field(*field_id);
            if field.ty.nullable || field.ty.is_primitive() || field.is_final {
                continue;
            }
            if field.initializer.is_some() {
                continue;
            }
            if config.annotation_excludes_field(&field.annotations) {
                continue;
            }
            if field_suppresses_init(config, &field.suppressions) {
                continue;
            }
            if field.is_static {
                static_fields.insert(*field_id);
            } else {
                instance_fields.insert(*field_id);
            }
        }

        let mut constructors = Vec::new();
        let mut instance_initializer_methods = Vec::new();
        let mut static_initializer_methods = Vec::new();
        for method_id in &class.methods {
            let method = program.method(*method_id);
            if method.is_constructor {
                constructors.push(*method_id);
                continue;
            }
            if is_initializer_method(program, config, *method_id) {
                if method.is_static {
                    static_initializer_methods.push(*method_id);
                } else {
                    instance_initializer_methods.push(*method_id);
                }
            }
        }

        Self {
            class: class_id,
            instance_fields,
            static_fields,
            constructors,
            instance_initializer_methods,
            static_initializer_methods,
        }
    }
}

fn field_suppresses_init(config: &Config, suppressions: &[String]) -> bool {
    suppressions.iter().any(|name| {
        name.as_str() == crate::diagnostics::DiagnosticKind::FieldNoInit.id()
            || *name == config.suppress_all_alias
            || *name == config.init_alias
    })
}

/// A method is an initializer when marked by configuration, or when it
/// overrides an initializer method of a superclass.
fn is_initializer_method(program: &Program, config: &Config, method_id: MethodId) -> bool {
    let mut current = Some(method_id);
    let mut seen = BTreeSet::new();
    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        let method = program.method(id);
        if config.is_initializer(&program.method_qualified_name(id), &method.annotations) {
            return true;
        }
        current = method.overrides;
    }
    false
}

/// Outcome of the per-class initialization proof, attributing each missing
/// field to the declaration a diagnostic should point at.
#[derive(Debug, Default)]
pub(crate) struct FieldInitReport {
    /// Constructor -> required fields it fails to guarantee.
    pub(crate) constructor_uninit: BTreeMap<MethodId, BTreeSet<FieldId>>,
    /// Single instance initializer method -> fields it must but does not set.
    pub(crate) initializer_uninit: BTreeMap<MethodId, BTreeSet<FieldId>>,
    /// Instance fields with no initializing declaration at all.
    pub(crate) never_initialized_instance: BTreeSet<FieldId>,
    /// Static fields with no initializing declaration at all.
    pub(crate) never_initialized_static: BTreeSet<FieldId>,
}

pub(crate) fn analyze_class(
    program: &Program,
    config: &Config,
    flow: &dyn FlowOracle,
    entities: &FieldInitEntities,
) -> FieldInitReport {
    let mut report = FieldInitReport::default();
    let class = program.class(entities.class);

    // Guarantees shared by every construction path.
    let mut block_guarantees: BTreeSet<FieldId> = BTreeSet::new();
    for block in &class.instance_init_blocks {
        block_guarantees.extend(flow.nonnull_fields_at_block_exit(program, block));
    }

    let externally_initialized = config.marks_external_init(&class.annotations)
        && entities.instance_initializer_methods.is_empty()
        && entities
            .constructors
            .iter()
            .all(|ctor| program.method(*ctor).params.is_empty());

    if !entities.instance_fields.is_empty() && !externally_initialized {
        let mut uninit_somewhere: BTreeSet<FieldId> = BTreeSet::new();
        let mut per_constructor: BTreeMap<MethodId, BTreeSet<FieldId>> = BTreeMap::new();
        let mut has_checked_constructor = false;
        for ctor in &entities.constructors {
            if delegates_to_own_constructor(program, entities.class, *ctor) {
                continue;
            }
            has_checked_constructor = true;
            let mut guaranteed = flow.nonnull_fields_at_exit(program, *ctor);
            guaranteed.extend(block_guarantees.iter().copied());
            for helper in safe_initializer_calls(program, entities.class, *ctor) {
                guaranteed.extend(flow.nonnull_fields_at_exit(program, helper));
            }
            // Initializer methods other than the single-attribution case
            // still contribute their guarantees to every constructor.
            if entities.instance_initializer_methods.len() != 1 {
                for init in &entities.instance_initializer_methods {
                    guaranteed.extend(flow.nonnull_fields_at_exit(program, *init));
                }
            }
            let missing: BTreeSet<FieldId> = entities
                .instance_fields
                .difference(&guaranteed)
                .copied()
                .collect();
            if !missing.is_empty() {
                uninit_somewhere.extend(missing.iter().copied());
                per_constructor.insert(*ctor, missing);
            }
        }

        if entities.instance_initializer_methods.len() == 1 {
            // A lone initializer method takes over the blame for fields some
            // constructor leaves unset.
            let init = entities.instance_initializer_methods[0];
            let mut guaranteed = flow.nonnull_fields_at_exit(program, init);
            guaranteed.extend(block_guarantees.iter().copied());
            let missing: BTreeSet<FieldId> =
                uninit_somewhere.difference(&guaranteed).copied().collect();
            if !missing.is_empty() {
                report.initializer_uninit.insert(init, missing);
            }
        } else {
            report.constructor_uninit = per_constructor;
        }

        if !has_checked_constructor && entities.instance_initializer_methods.is_empty() {
            report.never_initialized_instance = entities
                .instance_fields
                .difference(&block_guarantees)
                .copied()
                .collect();
        }
    }

    if !entities.static_fields.is_empty() {
        let mut guaranteed: BTreeSet<FieldId> = BTreeSet::new();
        for block in &class.static_init_blocks {
            guaranteed.extend(flow.nonnull_fields_at_block_exit(program, block));
        }
        for init in &entities.static_initializer_methods {
            guaranteed.extend(flow.nonnull_fields_at_exit(program, *init));
        }
        report.never_initialized_static = entities
            .static_fields
            .difference(&guaranteed)
            .copied()
            .collect();
    }

    report
}

/// True when the constructor's first statement invokes another constructor
/// of the same class; such constructors inherit that one's guarantees.
fn delegates_to_own_constructor(program: &Program, class: ClassId, ctor: MethodId) -> bool {
    let Some(body) = program.method(ctor).body.as_ref() else {
        return false;
    };
    let Some(Stmt::Expr { expr }) = body.stmts.first() else {
        return false;
    };
    let Expr::Call { method, .. } = expr else {
        return false;
    };
    let callee = program.method(*method);
    callee.is_constructor && callee.owner == class
}

/// Safe-initializer helper methods invoked by a constructor: non-overridable
/// (private or final method, or final class), invoked on the implicit
/// receiver as a direct top-level statement, or inside a try/finally with no
/// catch clauses.
fn safe_initializer_calls(program: &Program, class: ClassId, ctor: MethodId) -> Vec<MethodId> {
    let mut helpers = Vec::new();
    if let Some(body) = program.method(ctor).body.as_ref() {
        collect_safe_calls(program, class, body, &mut helpers);
    }
    helpers
}

fn collect_safe_calls(
    program: &Program,
    class: ClassId,
    block: &Block,
    helpers: &mut Vec<MethodId>,
) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Expr { expr } => {
                if let Expr::Call {
                    receiver, method, ..
                } = expr
                {
                    let implicit_receiver = match receiver.as_deref() {
                        None | Some(Expr::This { .. }) => true,
                        _ => false,
                    };
                    if !implicit_receiver {
                        continue;
                    }
                    let callee = program.method(*method);
                    if callee.owner != class || callee.is_static {
                        continue;
                    }
                    let non_overridable = callee.is_private
                        || callee.is_final
                        || program.class(class).is_final;
                    if non_overridable {
                        helpers.push(*method);
                    }
                }
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } if catches.is_empty() => {
                collect_safe_calls(program, class, body, helpers);
                if let Some(finally) = finally {
                    collect_safe_calls(program, class, finally, helpers);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::ScriptedOracle;
    use crate::ir::{
        ClassDecl, ClassKind, CompilationUnit, FieldDecl, MethodDecl, Span, TypeKind, TypeRef,
    };

    fn object_type(nullable: bool) -> TypeRef {
        TypeRef {
            kind: TypeKind::Class(ClassId(0)),
            nullable,
            args: Vec::new(),
        }
    }

    struct Builder {
        program: Program,
    }

    impl Builder {
        fn new() -> Self {
            let class = ClassDecl {
                name: "Widget".to_string(),
                package: "com.example".to_string(),
                enclosing: None,
                kind: ClassKind::Class,
                is_final: false,
                marker: Some(crate::ir::Marker::NullMarked),
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
            };
            Self {
                program: Program {
                    units: vec![CompilationUnit {
                        path: "Widget.java".to_string(),
                        package: "com.example".to_string(),
                        classes: vec![ClassId(0)],
                    }],
                    classes: vec![class],
                    methods: Vec::new(),
                    fields: Vec::new(),
                    locals: Vec::new(),
                },
            }
        }

        fn add_field(&mut self, name: &str, is_static: bool) -> FieldId {
            let id = FieldId(self.program.fields.len() as u32);
            self.program.fields.push(FieldDecl {
                name: name.to_string(),
                owner: ClassId(0),
                ty: object_type(false),
                is_static,
                is_final: false,
                annotations: Vec::new(),
                suppressions: Vec::new(),
                initializer: None,
                span: Span::default(),
            });
            self.program.classes[0].fields.push(id);
            id
        }

        fn add_method(&mut self, name: &str, is_constructor: bool) -> MethodId {
            let id = MethodId(self.program.methods.len() as u32);
            self.program.methods.push(MethodDecl {
                name: name.to_string(),
                owner: ClassId(0),
                marker: None,
                annotations: Vec::new(),
                suppressions: Vec::new(),
                params: Vec::new(),
                return_type: object_type(true),
                is_constructor,
                is_static: false,
                is_abstract: false,
                is_final: false,
                is_private: false,
                is_varargs: false,
                is_override_annotated: false,
                overrides: None,
                body: Some(Block::default()),
                span: Span::default(),
            });
            self.program.classes[0].methods.push(id);
            id
        }
    }

    fn analyze(
        builder: &Builder,
        config: &Config,
        flow: &ScriptedOracle,
    ) -> (FieldInitEntities, FieldInitReport) {
        let entities = FieldInitEntities::collect(&builder.program, config, ClassId(0));
        let report = analyze_class(&builder.program, config, flow, &entities);
        (entities, report)
    }

    #[test]
    fn field_set_in_every_constructor_is_clean() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let ctor_a = builder.add_method("<init>", true);
        let ctor_b = builder.add_method("<init>", true);
        let mut flow = ScriptedOracle::default();
        flow.exit_facts.insert(ctor_a, BTreeSet::from([field]));
        flow.exit_facts.insert(ctor_b, BTreeSet::from([field]));
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert!(report.constructor_uninit.is_empty());
        assert!(report.never_initialized_instance.is_empty());
    }

    #[test]
    fn one_omitting_constructor_gets_exactly_one_attribution() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let ctor_a = builder.add_method("<init>", true);
        let ctor_b = builder.add_method("<init>", true);
        let mut flow = ScriptedOracle::default();
        flow.exit_facts.insert(ctor_a, BTreeSet::from([field]));
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert_eq!(report.constructor_uninit.len(), 1);
        assert_eq!(
            report.constructor_uninit.get(&ctor_b),
            Some(&BTreeSet::from([field]))
        );
    }

    #[test]
    fn delegating_constructor_is_exempt_regardless_of_body() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let primary = builder.add_method("<init>", true);
        let delegating = builder.add_method("<init>", true);
        builder.program.methods[delegating.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Call {
                    receiver: None,
                    method: primary,
                    args: Vec::new(),
                    span: Span::default(),
                },
            }],
        });
        let mut flow = ScriptedOracle::default();
        flow.exit_facts.insert(primary, BTreeSet::from([field]));
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert!(report.constructor_uninit.is_empty());
    }

    #[test]
    fn single_initializer_method_takes_the_blame_and_the_credit() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let _ctor = builder.add_method("<init>", true);
        let init = builder.add_method("setUp", false);
        builder.program.methods[init.0 as usize]
            .annotations
            .push("Initializer".to_string());
        let mut config = Config::default();
        config
            .custom_initializer_annotations
            .insert("Initializer".to_string());
        let mut flow = ScriptedOracle::default();
        flow.exit_facts.insert(init, BTreeSet::from([field]));
        let (entities, report) = analyze(&builder, &config, &flow);
        assert_eq!(entities.instance_initializer_methods, vec![init]);
        assert!(report.constructor_uninit.is_empty());
        assert!(report.initializer_uninit.is_empty());
        assert!(report.never_initialized_instance.is_empty());
    }

    #[test]
    fn single_initializer_method_not_setting_field_is_blamed() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let _ctor = builder.add_method("<init>", true);
        let init = builder.add_method("setUp", false);
        builder.program.methods[init.0 as usize]
            .annotations
            .push("Initializer".to_string());
        let mut config = Config::default();
        config
            .custom_initializer_annotations
            .insert("Initializer".to_string());
        let flow = ScriptedOracle::default();
        let (_, report) = analyze(&builder, &config, &flow);
        assert!(report.constructor_uninit.is_empty());
        assert_eq!(
            report.initializer_uninit.get(&init),
            Some(&BTreeSet::from([field]))
        );
    }

    #[test]
    fn safe_initializer_call_counts_toward_the_constructor() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let ctor = builder.add_method("<init>", true);
        let helper = builder.add_method("populate", false);
        builder.program.methods[helper.0 as usize].is_private = true;
        builder.program.methods[ctor.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Call {
                    receiver: None,
                    method: helper,
                    args: Vec::new(),
                    span: Span::default(),
                },
            }],
        });
        let mut flow = ScriptedOracle::default();
        flow.exit_facts.insert(helper, BTreeSet::from([field]));
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert!(report.constructor_uninit.is_empty());
    }

    #[test]
    fn overridable_helper_does_not_count() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let ctor = builder.add_method("<init>", true);
        let helper = builder.add_method("populate", false);
        builder.program.methods[ctor.0 as usize].body = Some(Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Call {
                    receiver: None,
                    method: helper,
                    args: Vec::new(),
                    span: Span::default(),
                },
            }],
        });
        let mut flow = ScriptedOracle::default();
        flow.exit_facts.insert(helper, BTreeSet::from([field]));
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert_eq!(
            report.constructor_uninit.get(&ctor),
            Some(&BTreeSet::from([field]))
        );
    }

    #[test]
    fn class_without_constructors_reports_field_itself() {
        let mut builder = Builder::new();
        let field = builder.add_field("name", false);
        let flow = ScriptedOracle::default();
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert_eq!(report.never_initialized_instance, BTreeSet::from([field]));
    }

    #[test]
    fn externally_initialized_class_is_exempt() {
        let mut builder = Builder::new();
        let _field = builder.add_field("name", false);
        let _ctor = builder.add_method("<init>", true);
        builder.program.classes[0]
            .annotations
            .push("ExternalInit".to_string());
        let mut config = Config::default();
        config
            .external_init_annotations
            .insert("ExternalInit".to_string());
        let flow = ScriptedOracle::default();
        let (_, report) = analyze(&builder, &config, &flow);
        assert!(report.constructor_uninit.is_empty());
        assert!(report.never_initialized_instance.is_empty());
    }

    #[test]
    fn static_fields_check_against_static_initializers_only() {
        let mut builder = Builder::new();
        let static_field = builder.add_field("CACHE", true);
        let ctor = builder.add_method("<init>", true);
        let mut flow = ScriptedOracle::default();
        // A constructor assignment must not satisfy a static field.
        flow.exit_facts.insert(ctor, BTreeSet::from([static_field]));
        let (_, report) = analyze(&builder, &Config::default(), &flow);
        assert_eq!(report.never_initialized_static, BTreeSet::from([static_field]));
    }

    #[test]
    fn suppressed_and_final_fields_are_skipped() {
        let mut builder = Builder::new();
        let suppressed = builder.add_field("lazy", false);
        builder.program.fields[suppressed.0 as usize]
            .suppressions
            .push("initialization".to_string());
        let final_field = builder.add_field("constant", false);
        builder.program.fields[final_field.0 as usize].is_final = true;
        let entities =
            FieldInitEntities::collect(&builder.program, &Config::default(), ClassId(0));
        assert!(entities.instance_fields.is_empty());
    }
}
