use std::cell::RefCell;
use std::sync::Arc;

use opentelemetry::KeyValue;
use serde_sarif::sarif::{ReportingDescriptor, Result as SarifResult};

use crate::checker::check_top_level_class;
use crate::config::Config;
use crate::dataflow::FlowOracle;
use crate::diagnostics::{rule_descriptor, Diagnostic, DiagnosticKind};
use crate::ir::Program;
use crate::libmodel::LibraryModels;
use crate::oracle::NullabilityOracle;
use crate::scope::ScopeResolver;
use crate::telemetry::{with_span, Telemetry};

/// Internal-assumption failure while checking one compilation unit. Distinct
/// from ordinary diagnostics; the rest of the unit is skipped, later units
/// still run.
#[derive(Clone, Debug)]
pub(crate) struct UnitFailure {
    pub(crate) unit_path: String,
    pub(crate) message: String,
}

/// Session state for one checking run: configuration, models, the flow
/// oracle, the scope-resolution cache and the diagnostics sink. Constructed
/// at run start, passed by reference into every component, dropped at run
/// end. Single-threaded by design; concurrent reuse is unsupported.
pub(crate) struct CheckSession<'a> {
    pub(crate) program: &'a Program,
    pub(crate) config: &'a Config,
    pub(crate) models: &'a LibraryModels,
    pub(crate) flow: &'a dyn FlowOracle,
    pub(crate) scope: ScopeResolver,
    diagnostics: RefCell<Vec<Diagnostic>>,
    unit_failures: RefCell<Vec<UnitFailure>>,
    telemetry: Option<Arc<Telemetry>>,
}

impl<'a> CheckSession<'a> {
    pub(crate) fn new(
        program: &'a Program,
        config: &'a Config,
        models: &'a LibraryModels,
        flow: &'a dyn FlowOracle,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        Self {
            program,
            config,
            models,
            flow,
            scope: ScopeResolver::new(),
            diagnostics: RefCell::new(Vec::new()),
            unit_failures: RefCell::new(Vec::new()),
            telemetry,
        }
    }

    pub(crate) fn oracle(&self) -> NullabilityOracle<'_> {
        NullabilityOracle {
            program: self.program,
            config: self.config,
            scope: &self.scope,
            models: self.models,
            flow: self.flow,
        }
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    #[cfg(test)]
    pub(crate) fn collected_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    /// Check every compilation unit, one top-level class at a time.
    pub(crate) fn run(&self) {
        for (unit_index, unit) in self.program.units.iter().enumerate() {
            let unit_attributes = [KeyValue::new("nullspect.unit", unit.path.clone())];
            let failed = with_span(
                self.telemetry.as_deref(),
                &format!("unit:{}", unit.path),
                &unit_attributes,
                || {
                    for class_id in &unit.classes {
                        let class_name = self.program.class_qualified_name(*class_id);
                        let class_attributes =
                            [KeyValue::new("nullspect.class", class_name.clone())];
                        let outcome = with_span(
                            self.telemetry.as_deref(),
                            &format!("class:{class_name}"),
                            &class_attributes,
                            || check_top_level_class(self, unit_index, *class_id),
                        );
                        if let Err(err) = outcome {
                            return Some(format!("{err:#}"));
                        }
                    }
                    None
                },
            );
            if let Some(message) = failed {
                tracing::warn!(unit = %unit.path, error = %message, "aborting unit");
                self.unit_failures.borrow_mut().push(UnitFailure {
                    unit_path: unit.path.clone(),
                    message,
                });
            }
        }
    }

    pub(crate) fn into_output(self) -> EngineOutput {
        let mut results: Vec<SarifResult> = self
            .diagnostics
            .into_inner()
            .iter()
            .map(Diagnostic::to_sarif)
            .collect();
        results.sort_by(|left, right| {
            let left_id = left.rule_id.as_deref().unwrap_or("");
            let right_id = right.rule_id.as_deref().unwrap_or("");
            let left_msg = left.message.text.as_deref().unwrap_or("").to_string();
            let right_msg = right.message.text.as_deref().unwrap_or("").to_string();
            left_id.cmp(right_id).then(left_msg.cmp(&right_msg))
        });
        let rules = DiagnosticKind::ALL.iter().map(|kind| rule_descriptor(*kind)).collect();
        EngineOutput {
            rules,
            results,
            unit_failures: self.unit_failures.into_inner(),
        }
    }
}

/// Aggregated SARIF payload from one run.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
    pub(crate) unit_failures: Vec<UnitFailure>,
}
