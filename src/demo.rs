//! The reference server served by the `mcp-sdk` binary.
//!
//! | Kind     | Name               | Behaviour                                  |
//! |----------|--------------------|--------------------------------------------|
//! | tool     | `add`              | Sums numbers `a` and `b`                   |
//! | tool     | `countdown`        | Reports progress for `steps` steps         |
//! | resource | `greeting://{name}`| Returns `Hello, {name}!`                   |
//! | prompt   | `review`           | Asks for a review of the `code` argument   |

use anyhow::{anyhow, bail};
use serde_json::{json, Map, Value};

use crate::error::McpResult;
use crate::mcp::engine::{ProtocolOptions, RequestContext};
use crate::mcp::resource_template::ResourceTemplate;
use crate::mcp::server::{McpServer, ServerOptions};
use crate::mcp::types::{
    CallToolResult, GetPromptResult, Implementation, PromptMessage, ReadResourceResult,
    ResourceContents,
};

/// Builds the reference server.
///
/// # Errors
///
/// Returns an error if a built-in definition is rejected.
pub fn build_server(
    name: &str,
    instructions: Option<String>,
    protocol: ProtocolOptions,
) -> McpResult<McpServer> {
    let server = McpServer::new(
        Implementation::new(name, env!("CARGO_PKG_VERSION")),
        ServerOptions {
            instructions,
            protocol,
            ..ServerOptions::default()
        },
    );

    server.tool(
        "add",
        json!({
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "a": { "type": "number", "description": "First operand" },
                    "b": { "type": "number", "description": "Second operand" }
                },
                "required": ["a", "b"]
            }
        }),
        |args, _ctx| async move { add(&args) },
    )?;

    server.tool(
        "countdown",
        json!({
            "description": "Count down, reporting progress at each step",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "steps": { "type": "integer", "description": "Number of steps (max 100)" }
                },
                "required": ["steps"]
            }
        }),
        countdown,
    )?;

    server.resource(
        ResourceTemplate::new("greeting://{name}")?
            .with_name("Greeting")
            .with_description("A personalised greeting")
            .with_mime_type("text/plain")
            .with_example("name", "World")
            .subscribable(true),
        |uri, params| async move {
            let name = params
                .get("name")
                .ok_or_else(|| anyhow!("missing name"))?;
            Ok(ReadResourceResult {
                contents: vec![
                    ResourceContents::text(uri, format!("Hello, {name}!"))
                        .with_mime_type("text/plain"),
                ],
            })
        },
    );

    server.prompt(
        "review",
        json!({
            "description": "Review a piece of code",
            "arguments": [
                { "name": "code", "description": "The code to review", "required": true }
            ]
        }),
        |args| async move {
            let Some(code) = args.get("code").and_then(Value::as_str) else {
                bail!("argument 'code' is required");
            };
            Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage::user(format!(
                    "Please review this code:\n\n{code}"
                ))],
            })
        },
    )?;

    Ok(server)
}

fn add(args: &Map<String, Value>) -> anyhow::Result<CallToolResult> {
    let (Some(a), Some(b)) = (args.get("a"), args.get("b")) else {
        bail!("a and b are required");
    };

    let sum = match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a
            .checked_add(b)
            .ok_or_else(|| anyhow!("sum overflows"))?
            .to_string(),
        _ => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                bail!("a and b must be numbers");
            };
            (a + b).to_string()
        }
    };
    Ok(CallToolResult::text(sum))
}

#[allow(clippy::cast_precision_loss)] // steps is capped at 100
async fn countdown(
    args: Map<String, Value>,
    ctx: RequestContext,
) -> anyhow::Result<CallToolResult> {
    let steps = args
        .get("steps")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("steps must be a non-negative integer"))?;
    if steps > 100 {
        bail!("steps must be at most 100");
    }

    for step in 1..=steps {
        if ctx.cancel.is_cancelled() {
            bail!("cancelled");
        }
        ctx.report_progress(step as f64, Some(steps as f64)).await;
        tokio::task::yield_now().await;
    }
    Ok(CallToolResult::text(format!("Counted down {steps} steps")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn add_keeps_integers_exact() {
        let result = add(&args(json!({"a": 2, "b": 3}))).unwrap();
        assert_eq!(result, CallToolResult::text("5"));
    }

    #[test]
    fn add_handles_floats() {
        let result = add(&args(json!({"a": 1.5, "b": 2}))).unwrap();
        assert_eq!(result, CallToolResult::text("3.5"));
    }

    #[test]
    fn add_rejects_overflow() {
        assert!(add(&args(json!({"a": i64::MAX, "b": 1}))).is_err());
    }

    #[test]
    fn server_builds() {
        let server = build_server("demo", None, ProtocolOptions::default()).unwrap();
        let caps = server.server().capabilities();
        assert!(caps.supports("tools.listChanged"));
        assert!(caps.supports("resources.subscribe"));
        assert!(caps.supports("prompts.listChanged"));
    }
}
