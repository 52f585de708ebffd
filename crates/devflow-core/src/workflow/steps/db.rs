//! `db` steps through the injected [`DbProvider`](crate::workflow::providers::DbProvider).

use devflow_types::workflow::{DbAction, DbStepConfig};
use serde_json::{json, Value};

use crate::workflow::context::VariableScope;
use crate::workflow::providers::DbProvider;
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

pub(crate) async fn run(
    runner: &StepRunner,
    cfg: &DbStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let db = runner.db.as_ref().ok_or(StepError::MissingProvider("db"))?;
    let connection = scope.resolve_str(&cfg.connection);

    if !db.is_connected(&connection) {
        tracing::debug!(run_id = %ctx.run_id, connection = %connection, "connecting database");
        db.connect(&connection)
            .await
            .map_err(|e| StepError::ExecutionFailed(format!("connection '{connection}': {e}")))?;
    }

    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
        res = dispatch(db.as_ref(), &connection, cfg, scope) => res.map_err(StepError::ExecutionFailed),
    }
}

async fn dispatch(
    db: &dyn DbProvider,
    connection: &str,
    cfg: &DbStepConfig,
    scope: &VariableScope,
) -> Result<Value, String> {
    match cfg.action {
        DbAction::Query => {
            let sql = cfg
                .query
                .as_deref()
                .map(|q| scope.resolve_str(q))
                .ok_or_else(|| "query action requires 'query'".to_string())?;
            let params: Vec<Value> = cfg.params.iter().map(|p| scope.resolve_deep(p)).collect();
            let rows = db.query(connection, &sql, &params).await?;
            let count = rows.as_array().map_or(0, Vec::len);
            Ok(json!({ "rows": rows, "count": count }))
        }
        DbAction::Schema => {
            let table = cfg.table.as_deref().map(|t| scope.resolve_str(t));
            let schema = db.schema(connection, table.as_deref()).await?;
            Ok(json!({ "schema": schema }))
        }
        DbAction::Tables => {
            let tables = db.tables(connection).await?;
            Ok(json!({ "tables": tables }))
        }
    }
}
