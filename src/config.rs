use std::collections::BTreeSet;

/// Immutable policy for one checking run.
///
/// Built once from CLI flags, then shared by reference for the life of the
/// session. Package matching is prefix-based at dot boundaries, the way the
/// host language nests packages.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    /// Packages whose code is null-checked even without explicit markers.
    pub(crate) annotated_packages: Vec<String>,
    /// Carve-outs inside annotated packages that revert to unannotated.
    pub(crate) unannotated_subpackages: Vec<String>,
    /// Qualified class names never treated as annotated.
    pub(crate) excluded_classes: BTreeSet<String>,
    /// Annotations whose presence on a class forces it unannotated.
    pub(crate) excluded_class_annotations: BTreeSet<String>,
    /// Qualified method names (`pkg.Class#method`) treated as initializers.
    pub(crate) known_initializers: BTreeSet<String>,
    /// Annotations marking a method as an initializer.
    pub(crate) custom_initializer_annotations: BTreeSet<String>,
    /// Field annotations exempting a field from initialization checking.
    pub(crate) excluded_field_annotations: BTreeSet<String>,
    /// Class annotations marking instances as initialized externally.
    pub(crate) external_init_annotations: BTreeSet<String>,
    /// Skip override lookup unless the method carries an overriding marker.
    pub(crate) exhaustive_override: bool,
    /// Attach suppression-insertion fixes to diagnostics.
    pub(crate) suggest_suppressions: bool,
    /// Include unannotated-scope instantiations in generics comparison.
    pub(crate) strict_generics: bool,
    /// Qualified name of the runtime-checked cast helper, if configured.
    pub(crate) cast_to_non_null_method: Option<String>,
    /// Suppression name covering every diagnostic kind.
    pub(crate) suppress_all_alias: String,
    /// Suppression name covering the field-initialization kinds.
    pub(crate) init_alias: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            annotated_packages: Vec::new(),
            unannotated_subpackages: Vec::new(),
            excluded_classes: BTreeSet::new(),
            excluded_class_annotations: BTreeSet::new(),
            known_initializers: BTreeSet::new(),
            custom_initializer_annotations: BTreeSet::new(),
            excluded_field_annotations: BTreeSet::new(),
            external_init_annotations: BTreeSet::new(),
            exhaustive_override: false,
            suggest_suppressions: false,
            strict_generics: false,
            cast_to_non_null_method: None,
            suppress_all_alias: "nullspect".to_string(),
            init_alias: "initialization".to_string(),
        }
    }
}

impl Config {
    /// True when `package` falls inside the annotated scope: under one of the
    /// annotated prefixes and not under an unannotated carve-out.
    pub(crate) fn package_is_annotated(&self, package: &str) -> bool {
        if !prefix_match(&self.annotated_packages, package) {
            return false;
        }
        !prefix_match(&self.unannotated_subpackages, package)
    }

    pub(crate) fn class_is_excluded(&self, qualified_name: &str) -> bool {
        self.excluded_classes.contains(qualified_name)
    }

    pub(crate) fn annotation_excludes_class(&self, annotations: &[String]) -> bool {
        annotations
            .iter()
            .any(|a| self.excluded_class_annotations.contains(a))
    }

    pub(crate) fn annotation_excludes_field(&self, annotations: &[String]) -> bool {
        annotations
            .iter()
            .any(|a| self.excluded_field_annotations.contains(a))
    }

    pub(crate) fn marks_external_init(&self, annotations: &[String]) -> bool {
        annotations
            .iter()
            .any(|a| self.external_init_annotations.contains(a))
    }

    /// True when a method is an initializer by qualified name or annotation.
    pub(crate) fn is_initializer(&self, qualified_name: &str, annotations: &[String]) -> bool {
        self.known_initializers.contains(qualified_name)
            || annotations
                .iter()
                .any(|a| self.custom_initializer_annotations.contains(a))
    }
}

fn prefix_match(prefixes: &[String], package: &str) -> bool {
    prefixes.iter().any(|prefix| {
        package == prefix
            || (package.starts_with(prefix.as_str())
                && package.as_bytes().get(prefix.len()) == Some(&b'.'))
    })
}
