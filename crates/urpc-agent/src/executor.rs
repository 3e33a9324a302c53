//! Plan executor.
//!
//! Runs a resolved plan step by step against a repository. A failing step
//! becomes a failed [`StepOutput`]; it never stops the steps after it.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use urpc_core::{EntityConfig, ExecutionPlan, RepoTarget, Repository, Step, StepOutput};
use urpc_planner::decoder::DecodedCall;
use urpc_planner::PseudoCodeDecoder;

/// Source name standing for "the entity's configured default".
pub const DEFAULT_SOURCE_MARKER: &str = "[default]";

/// Decodes and dispatches plan steps.
#[derive(Debug, Clone, Default)]
pub struct PlanExecutor {
    decoder: PseudoCodeDecoder,
}

impl PlanExecutor {
    pub fn new(decoder: PseudoCodeDecoder) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &PseudoCodeDecoder {
        &self.decoder
    }

    /// Run every step in ascending `order`, one at a time.
    pub async fn execute(&self, repository: &dyn Repository, plan: &ExecutionPlan) -> Vec<StepOutput> {
        let configs = repository.entity_configs();
        let mut results = Vec::with_capacity(plan.steps.len());
        for step in plan.ordered_steps() {
            results.push(self.execute_step(repository, step, &configs).await);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(steps = results.len(), succeeded, "plan executed");
        results
    }

    /// Decode and run a single step.
    pub async fn execute_step(
        &self,
        repository: &dyn Repository,
        step: &Step,
        configs: &BTreeMap<String, EntityConfig>,
    ) -> StepOutput {
        let DecodedCall {
            header,
            options,
            options_mode,
        } = self.decoder.decode(&step.urpc_code);
        let source = self.resolve_source(&header.entity, &header.source, configs);

        let Some(operation) = header.operation else {
            warn!(order = step.order, method = %header.method, "unsupported operation in step");
            return StepOutput::failed(
                header.operation_name(),
                &header.entity,
                source,
                format!("Unsupported operation: {}", header.method),
                &step.urpc_code,
            );
        };

        debug!(
            order = step.order,
            %operation,
            entity = %header.entity,
            source = %source,
            ?options_mode,
            "dispatching step"
        );

        let target = RepoTarget::new(&header.entity, &source);
        match repository.execute(&target, operation, options).await {
            Ok(data) => StepOutput::succeeded(operation.as_str(), &header.entity, source, data, &step.urpc_code),
            Err(err) => {
                warn!(order = step.order, %operation, entity = %header.entity, error = %err, "step failed");
                StepOutput::failed(
                    operation.as_str(),
                    &header.entity,
                    &source,
                    format!("Failed to {} {} in {}", operation, header.entity, source),
                    &step.urpc_code,
                )
            }
        }
    }

    /// Map the `[default]` marker, or a blank source, to the entity's default.
    fn resolve_source(
        &self,
        entity: &str,
        source: &str,
        configs: &BTreeMap<String, EntityConfig>,
    ) -> String {
        if !source.is_empty() && source != DEFAULT_SOURCE_MARKER {
            return source.to_string();
        }
        configs
            .get(entity)
            .and_then(|c| c.default_source.clone())
            .unwrap_or_else(|| self.decoder.fallback_source().to_string())
    }
}
