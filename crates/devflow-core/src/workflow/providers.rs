//! Collaborator traits injected into the step runner.
//!
//! The engine never talks to an LLM, a database, git or the network
//! directly. Each of those concerns is a trait defined here and implemented
//! elsewhere (devflow-infra for HTTP and git, the host application for the
//! rest). Methods return boxed futures so the traits stay object-safe and
//! can be held as `Arc<dyn ...>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Agent sessions
// ---------------------------------------------------------------------------

/// Parameters for starting an agent session.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub run_id: Uuid,
    pub step_id: String,
    pub prompt: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub cwd: PathBuf,
    pub output_schema: Option<Value>,
}

/// One item read from an agent session's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStreamEvent {
    /// Intermediate message, forwarded as an `agent-message` event.
    Message(Value),
    /// Final answer. `structured` carries schema-constrained output, if any.
    Result { text: String, structured: Option<Value> },
    /// The session failed.
    Error(String),
}

/// A live agent session.
pub trait AgentSession: Send {
    /// Next event from the session. `None` once the stream is exhausted.
    fn next_event(&mut self) -> BoxFuture<'_, Option<AgentStreamEvent>>;

    /// Ask the agent to stop its current turn.
    fn interrupt(&mut self) -> BoxFuture<'_, ()>;

    /// Release the session.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Starts agent sessions.
pub trait AgentProvider: Send + Sync {
    fn start_session(
        &self,
        request: AgentRequest,
    ) -> BoxFuture<'_, Result<Box<dyn AgentSession>, String>>;
}

// ---------------------------------------------------------------------------
// Databases
// ---------------------------------------------------------------------------

/// Database access keyed by connection id.
pub trait DbProvider: Send + Sync {
    fn is_connected(&self, connection: &str) -> bool;

    fn connect<'a>(&'a self, connection: &'a str) -> BoxFuture<'a, Result<(), String>>;

    /// Run a query and return its rows as a JSON array.
    fn query<'a>(
        &'a self,
        connection: &'a str,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Value, String>>;

    /// Describe the schema, optionally for a single table.
    fn schema<'a>(
        &'a self,
        connection: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value, String>>;

    fn tables<'a>(&'a self, connection: &'a str) -> BoxFuture<'a, Result<Vec<String>, String>>;
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Captured output of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs git commands in a working tree.
pub trait GitHelper: Send + Sync {
    /// Run `git <args>` in `cwd`. A non-zero exit is reported through
    /// `CommandOutput`, not as an error.
    fn run<'a>(&'a self, cwd: &'a Path, args: Vec<String>) -> BoxFuture<'a, Result<CommandOutput, String>>;

    fn current_branch<'a>(&'a self, cwd: &'a Path) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let out = self
                .run(cwd, vec!["rev-parse".into(), "--abbrev-ref".into(), "HEAD".into()])
                .await?;
            if out.success() {
                Ok(out.stdout.trim().to_string())
            } else {
                Err(out.stderr.trim().to_string())
            }
        })
    }

    /// `<sha> <subject>` of HEAD.
    fn last_commit<'a>(&'a self, cwd: &'a Path) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let out = self
                .run(cwd, vec!["log".into(), "-1".into(), "--format=%H %s".into()])
                .await?;
            if out.success() {
                Ok(out.stdout.trim().to_string())
            } else {
                Err(out.stderr.trim().to_string())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Parsed JSON when the body is JSON, otherwise a string.
    pub body: Value,
}

/// Outbound HTTP. Dropping the returned future aborts the request.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, String>>;
}

// ---------------------------------------------------------------------------
// Extension step handlers
// ---------------------------------------------------------------------------

/// What an extension handler gets to see about the running step.
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    pub run_id: Uuid,
    pub step_id: String,
    pub project_dir: PathBuf,
    pub cancel: CancellationToken,
}

/// Handler for a family of `vendor.action` step types.
pub trait StepHandler: Send + Sync {
    /// Execute `step_type` with its variable-resolved config.
    fn execute(
        &self,
        step_type: &str,
        config: Value,
        ctx: ExtensionContext,
    ) -> BoxFuture<'_, Result<Value, String>>;
}

/// Extension handlers keyed by the type prefix before the first dot.
#[derive(Clone, Default)]
pub struct StepHandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every `prefix.*` step type.
    pub fn register(&mut self, prefix: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(prefix.into(), handler);
    }

    /// Find the handler responsible for `step_type`.
    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepHandler>> {
        let (prefix, _) = step_type.split_once('.')?;
        self.handlers.get(prefix).cloned()
    }

    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.handlers.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }
}

impl std::fmt::Debug for StepHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandlerRegistry")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}
