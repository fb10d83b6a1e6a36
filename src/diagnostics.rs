use serde_sarif::sarif::{
    ArtifactChange, ArtifactContent, ArtifactLocation, Fix, Location, Message,
    MultiformatMessageString, PhysicalLocation, Region, ReportingDescriptor,
    Replacement, Result as SarifResult,
};

use crate::config::Config;
use crate::ir::Span;

/// Violation kinds, each independently suppressible.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum DiagnosticKind {
    DereferenceNullable,
    ReturnNullable,
    PassNullable,
    AssignFieldNullable,
    AssignArrayElementNullable,
    WrongOverrideReturn,
    WrongOverrideParam,
    MethodNoInit,
    FieldNoInit,
    UnboxNullable,
    FieldReadBeforeInit,
    AnnotationValueInvalid,
    RedundantCastToNonNull,
    NullableTypeArgument,
    GenericAssignmentMismatch,
    GenericReturnMismatch,
    GenericParameterMismatch,
    ConditionalBranchMismatch,
}

impl DiagnosticKind {
    pub(crate) const ALL: [DiagnosticKind; 18] = [
        DiagnosticKind::DereferenceNullable,
        DiagnosticKind::ReturnNullable,
        DiagnosticKind::PassNullable,
        DiagnosticKind::AssignFieldNullable,
        DiagnosticKind::AssignArrayElementNullable,
        DiagnosticKind::WrongOverrideReturn,
        DiagnosticKind::WrongOverrideParam,
        DiagnosticKind::MethodNoInit,
        DiagnosticKind::FieldNoInit,
        DiagnosticKind::UnboxNullable,
        DiagnosticKind::FieldReadBeforeInit,
        DiagnosticKind::AnnotationValueInvalid,
        DiagnosticKind::RedundantCastToNonNull,
        DiagnosticKind::NullableTypeArgument,
        DiagnosticKind::GenericAssignmentMismatch,
        DiagnosticKind::GenericReturnMismatch,
        DiagnosticKind::GenericParameterMismatch,
        DiagnosticKind::ConditionalBranchMismatch,
    ];

    /// SARIF rule id, doubling as the suppression name for this kind.
    pub(crate) fn id(self) -> &'static str {
        match self {
            DiagnosticKind::DereferenceNullable => "DEREFERENCE_NULLABLE",
            DiagnosticKind::ReturnNullable => "RETURN_NULLABLE",
            DiagnosticKind::PassNullable => "PASS_NULLABLE",
            DiagnosticKind::AssignFieldNullable => "ASSIGN_FIELD_NULLABLE",
            DiagnosticKind::AssignArrayElementNullable => "ASSIGN_ARRAY_ELEMENT_NULLABLE",
            DiagnosticKind::WrongOverrideReturn => "WRONG_OVERRIDE_RETURN",
            DiagnosticKind::WrongOverrideParam => "WRONG_OVERRIDE_PARAM",
            DiagnosticKind::MethodNoInit => "METHOD_NO_INIT",
            DiagnosticKind::FieldNoInit => "FIELD_NO_INIT",
            DiagnosticKind::UnboxNullable => "UNBOX_NULLABLE",
            DiagnosticKind::FieldReadBeforeInit => "FIELD_READ_BEFORE_INIT",
            DiagnosticKind::AnnotationValueInvalid => "ANNOTATION_VALUE_INVALID",
            DiagnosticKind::RedundantCastToNonNull => "REDUNDANT_CAST_TO_NONNULL",
            DiagnosticKind::NullableTypeArgument => "NULLABLE_TYPE_ARGUMENT",
            DiagnosticKind::GenericAssignmentMismatch => "GENERIC_ASSIGNMENT_MISMATCH",
            DiagnosticKind::GenericReturnMismatch => "GENERIC_RETURN_MISMATCH",
            DiagnosticKind::GenericParameterMismatch => "GENERIC_PARAMETER_MISMATCH",
            DiagnosticKind::ConditionalBranchMismatch => "CONDITIONAL_BRANCH_MISMATCH",
        }
    }

    fn description(self) -> &'static str {
        match self {
            DiagnosticKind::DereferenceNullable => "Dereference of a possibly null value",
            DiagnosticKind::ReturnNullable => {
                "Returning a possibly null value from a method whose return is non-null"
            }
            DiagnosticKind::PassNullable => {
                "Passing a possibly null value where a non-null parameter is required"
            }
            DiagnosticKind::AssignFieldNullable => {
                "Assigning a possibly null value to a non-null field"
            }
            DiagnosticKind::AssignArrayElementNullable => {
                "Storing a possibly null value into an array of non-null elements"
            }
            DiagnosticKind::WrongOverrideReturn => {
                "Overriding method weakens the non-null return contract"
            }
            DiagnosticKind::WrongOverrideParam => {
                "Overriding method rejects null for a parameter the overridden method accepts"
            }
            DiagnosticKind::MethodNoInit => {
                "Initializer method does not guarantee non-null fields are initialized"
            }
            DiagnosticKind::FieldNoInit => "Non-null field is not initialized",
            DiagnosticKind::UnboxNullable => "Unboxing of a possibly null value",
            DiagnosticKind::FieldReadBeforeInit => "Non-null field is read before initialization",
            DiagnosticKind::AnnotationValueInvalid => "Invalid checker annotation value",
            DiagnosticKind::RedundantCastToNonNull => {
                "Cast-to-non-null of a value already known to be non-null"
            }
            DiagnosticKind::NullableTypeArgument => {
                "Nullable type argument where the type parameter does not admit null"
            }
            DiagnosticKind::GenericAssignmentMismatch => {
                "Assignment between generic instantiations with mismatched nullability"
            }
            DiagnosticKind::GenericReturnMismatch => {
                "Returned generic instantiation mismatches the declared return nullability"
            }
            DiagnosticKind::GenericParameterMismatch => {
                "Generic argument nullability mismatches the formal parameter"
            }
            DiagnosticKind::ConditionalBranchMismatch => {
                "Conditional branches disagree on generic nullability"
            }
        }
    }

    /// Kinds covered by the initialization suppression alias.
    pub(crate) fn is_initialization(self) -> bool {
        matches!(
            self,
            DiagnosticKind::MethodNoInit
                | DiagnosticKind::FieldNoInit
                | DiagnosticKind::FieldReadBeforeInit
        )
    }
}

/// Suggested source rewrite attached to a diagnostic.
#[derive(Clone, Debug)]
pub(crate) struct SuggestedEdit {
    pub(crate) description: String,
    pub(crate) replacement: String,
    pub(crate) span: Span,
}

/// One reported violation. Immutable once constructed.
#[derive(Clone, Debug)]
pub(crate) struct Diagnostic {
    pub(crate) kind: DiagnosticKind,
    pub(crate) message: String,
    pub(crate) unit_path: String,
    pub(crate) span: Span,
    pub(crate) edit: Option<SuggestedEdit>,
}

impl Diagnostic {
    pub(crate) fn to_sarif(&self) -> SarifResult {
        let message = Message::builder().text(self.message.clone()).build();
        let location = site_location(&self.unit_path, self.span);
        let builder = SarifResult::builder()
            .rule_id(self.kind.id())
            .message(message)
            .locations(vec![location]);
        match &self.edit {
            Some(edit) => builder
                .fixes(vec![edit_fix(&self.unit_path, edit)])
                .build(),
            None => builder.build(),
        }
    }
}

/// True when a diagnostic of `kind` is silenced by one of the suppression
/// lists on the enclosing declarations, nearest first. Matching names: the
/// kind's own id, the whole-checker alias, or the initialization alias for
/// the initialization kinds.
pub(crate) fn is_suppressed<'a>(
    config: &Config,
    kind: DiagnosticKind,
    enclosing_suppressions: impl IntoIterator<Item = &'a [String]>,
) -> bool {
    for list in enclosing_suppressions {
        for name in list {
            if name.as_str() == kind.id()
                || *name == config.suppress_all_alias
                || (kind.is_initialization() && *name == config.init_alias)
            {
                return true;
            }
        }
    }
    false
}

/// Names in a suppression list that match no kind and no alias.
pub(crate) fn unknown_suppression_names<'a>(
    config: &'a Config,
    list: &'a [String],
) -> impl Iterator<Item = &'a String> {
    list.iter().filter(move |name| {
        **name != config.suppress_all_alias
            && **name != config.init_alias
            && !DiagnosticKind::ALL.iter().any(|kind| kind.id() == name.as_str())
    })
}

pub(crate) fn site_location(unit_path: &str, span: Span) -> Location {
    let artifact_location = ArtifactLocation::builder()
        .uri(unit_path.to_string())
        .build();
    let region = Region::builder()
        .start_line(span.line as i64)
        .start_column(span.col as i64)
        .build();
    let physical = PhysicalLocation::builder()
        .artifact_location(artifact_location)
        .region(region)
        .build();
    Location::builder().physical_location(physical).build()
}

fn edit_fix(unit_path: &str, edit: &SuggestedEdit) -> Fix {
    let artifact_location = ArtifactLocation::builder()
        .uri(unit_path.to_string())
        .build();
    let deleted = Region::builder()
        .start_line(edit.span.line as i64)
        .start_column(edit.span.col as i64)
        .build();
    let replacement = Replacement::builder()
        .deleted_region(deleted)
        .inserted_content(
            ArtifactContent::builder()
                .text(edit.replacement.clone())
                .build(),
        )
        .build();
    let change = ArtifactChange::builder()
        .artifact_location(artifact_location)
        .replacements(vec![replacement])
        .build();
    Fix::builder()
        .description(Message::builder().text(edit.description.clone()).build())
        .artifact_changes(vec![change])
        .build()
}

pub(crate) fn rule_descriptor(kind: DiagnosticKind) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(kind.id())
        .name(kind.id())
        .short_description(
            MultiformatMessageString::builder()
                .text(kind.description())
                .build(),
        )
        .build()
}
