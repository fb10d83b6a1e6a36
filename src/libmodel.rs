use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Read-only nullability facts for library declarations outside the checked
/// scope, produced by a separate generator from annotated sources. Keys are
/// `pkg.Class#member` names.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct LibraryModels {
    #[serde(default)]
    methods: BTreeMap<String, MethodModel>,
    #[serde(default)]
    fields: BTreeMap<String, FieldModel>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct MethodModel {
    /// Return may be absent.
    #[serde(default)]
    pub(crate) nullable_return: bool,
    /// Return is known present even though the declaration says otherwise.
    #[serde(default)]
    pub(crate) nonnull_return: bool,
    /// Parameter positions that must not receive an absent value.
    #[serde(default)]
    pub(crate) nonnull_params: BTreeSet<u32>,
    /// Parameter positions explicitly accepting an absent value.
    #[serde(default)]
    pub(crate) nullable_params: BTreeSet<u32>,
    /// Parameter positions known present after the call returns.
    #[serde(default)]
    pub(crate) ensures_nonnull_params: BTreeSet<u32>,
    /// Parameter positions whose absence implies a `true` result.
    #[serde(default)]
    pub(crate) null_implies_true_params: BTreeSet<u32>,
    /// Parameter positions whose absence implies a `false` result.
    #[serde(default)]
    pub(crate) null_implies_false_params: BTreeSet<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct FieldModel {
    #[serde(default)]
    pub(crate) nullable: bool,
}

impl LibraryModels {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open library model {}", path.display()))?;
        let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(file));
        let models: LibraryModels = serde_path_to_error::deserialize(&mut deserializer)
            .with_context(|| format!("failed to parse library model {}", path.display()))?;
        Ok(models)
    }

    pub(crate) fn method(&self, qualified_name: &str) -> Option<&MethodModel> {
        self.methods.get(qualified_name)
    }

    /// Library override for a method's return nullability, if modeled.
    pub(crate) fn return_nullable(&self, qualified_name: &str) -> Option<bool> {
        let model = self.methods.get(qualified_name)?;
        if model.nullable_return {
            Some(true)
        } else if model.nonnull_return {
            Some(false)
        } else {
            None
        }
    }

    pub(crate) fn param_requires_nonnull(&self, qualified_name: &str, index: u32) -> bool {
        self.methods
            .get(qualified_name)
            .is_some_and(|model| model.nonnull_params.contains(&index))
    }

    pub(crate) fn field_nullable(&self, qualified_name: &str) -> Option<bool> {
        self.fields.get(qualified_name).map(|model| model.nullable)
    }
}
