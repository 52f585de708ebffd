//! Dotted `vendor.action` steps, dispatched through the extension registry.

use devflow_types::workflow::StepDefinition;
use serde_json::Value;

use crate::workflow::context::VariableScope;
use crate::workflow::providers::ExtensionContext;
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

pub(crate) async fn run(
    runner: &StepRunner,
    step: &StepDefinition,
    step_type: &str,
    config: &Value,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let handler = runner
        .extensions
        .get(step_type)
        .ok_or_else(|| StepError::UnknownStepType(step_type.to_string()))?;
    let ext_ctx = ExtensionContext {
        run_id: ctx.run_id,
        step_id: ctx.qualified_id(&step.id),
        project_dir: ctx.project_dir.clone(),
        cancel: ctx.cancel.clone(),
    };
    let config = scope.resolve_deep(config);

    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
        res = handler.execute(step_type, config, ext_ctx) => res.map_err(StepError::ExecutionFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::providers::StepHandler;
    use crate::workflow::step_runner::tests::{test_ctx, test_runner};
    use devflow_types::workflow::StepKind;
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::Arc;

    struct Deployer;

    impl StepHandler for Deployer {
        fn execute(
            &self,
            step_type: &str,
            config: Value,
            ctx: ExtensionContext,
        ) -> BoxFuture<'_, Result<Value, String>> {
            let action = step_type.split_once('.').map(|(_, a)| a.to_string());
            Box::pin(async move {
                match action.as_deref() {
                    Some("deploy") => Ok(json!({ "url": config["project"], "step": ctx.step_id })),
                    other => Err(format!("unsupported action {other:?}")),
                }
            })
        }
    }

    #[tokio::test]
    async fn resolves_config_and_dispatches_by_prefix() {
        let runner = test_runner().with_extension("vercel", Arc::new(Deployer));
        let ctx = test_ctx(std::env::temp_dir());
        let mut scope = VariableScope::default();
        scope.set_variable("ctx", json!({ "project": "site" }));
        let config = json!({ "project": "$ctx.project" });
        let step = StepDefinition::new(
            "ship",
            StepKind::Extension {
                step_type: "vercel.deploy".into(),
                config: config.clone(),
            },
        );

        let out = run(&runner, &step, "vercel.deploy", &config, &scope, &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({ "url": "site", "step": "ship" }));

        let err = run(&runner, &step, "vercel.logs", &config, &scope, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ExecutionFailed(_)));
    }
}
