//! MCP stdio server exposing rule files as tools.
//!
//! Each registered rule file becomes one tool:
//!
//! * **name**: the registry's tool name (`[A-Za-z0-9_]+`, unique)
//! * **description**: the rule's description, with ` (apply to: X)` when
//!   `applyTo` is set
//! * **input schema**: an empty object; tools take no arguments
//!
//! Calling a tool returns the rule file's body unchanged. The registry is a
//! snapshot taken when the server starts. Failures reach the client as
//! JSON-RPC errors whose code follows the kernel [`ErrorKind`].

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::error::{Error, ErrorKind};
use crate::rulefile::{RuleFileTool, ToolRegistry};

/// JSON-RPC error for a kernel failure, chosen by its kind.
pub fn to_mcp_error(err: &Error) -> McpError {
    let code = match err.kind() {
        ErrorKind::Validation | ErrorKind::Containment | ErrorKind::Symlink | ErrorKind::Parse => {
            ErrorCode::INVALID_PARAMS
        }
        ErrorKind::NotFound => ErrorCode::RESOURCE_NOT_FOUND,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    McpError::new(code, err.to_string(), None)
}

#[derive(Clone)]
pub struct RuleToolServer {
    registry: Arc<ToolRegistry>,
}

impl RuleToolServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    fn empty_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
        let mut schema = serde_json::Map::new();
        schema.insert("type".to_string(), serde_json::json!("object"));
        schema.insert("properties".to_string(), serde_json::json!({}));
        Arc::new(schema)
    }

    fn to_mcp_tool(tool: &RuleFileTool) -> Tool {
        Tool {
            name: Cow::Owned(tool.tool_name.clone()),
            title: tool.rule_file.name.clone(),
            description: Some(Cow::Owned(tool.tool_description.clone())),
            input_schema: Self::empty_schema(),
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    fn body_for(&self, name: &str) -> Result<String, McpError> {
        self.registry
            .get(name)
            .map(|tool| tool.rule_file.body.clone())
            .ok_or_else(|| {
                to_mcp_error(&Error::NotFound {
                    what: "tool",
                    name: name.to_string(),
                })
            })
    }
}

impl ServerHandler for RuleToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "rulem".to_string(),
                title: Some("rulem".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Each tool returns one project rule file. Call the tool whose description \
                 matches the files you are working on and follow the returned instructions."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self.registry.iter().map(Self::to_mcp_tool).collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.registry.get(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if context.ct.is_cancelled() {
            return Err(to_mcp_error(&Error::Canceled));
        }
        let body = self.body_for(&request.name)?;
        Ok(CallToolResult::success(vec![Content::text(body)]))
    }
}

/// Serve `registry` over stdin/stdout until the client disconnects.
pub async fn run_stdio(registry: ToolRegistry) -> anyhow::Result<()> {
    tracing::info!(target: "rulem", "serving {} rule tools over stdio", registry.len());
    let service = RuleToolServer::new(registry)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!(target: "rulem", "MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rulefile::RuleFile;
    use std::path::PathBuf;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(RuleFile {
            file_name: "style.md".into(),
            file_path: PathBuf::from("/rules/style.md"),
            description: "Code style".into(),
            name: Some("style".into()),
            apply_to: Some("*.rs".into()),
            body: "# Style\nUse rustfmt.\n".into(),
        });
        registry
    }

    #[test]
    fn tools_carry_description_and_empty_schema() {
        let server = RuleToolServer::new(registry());
        let tool = server.get_tool("style").unwrap();
        assert_eq!(tool.name, "style");
        assert_eq!(
            tool.description.as_deref(),
            Some("Code style (apply to: *.rs)")
        );
        assert_eq!(tool.input_schema.get("type").unwrap(), "object");
        assert!(tool.input_schema.get("properties").unwrap().as_object().unwrap().is_empty());
        assert!(server.get_tool("missing").is_none());
    }

    #[test]
    fn body_is_returned_unchanged() {
        let server = RuleToolServer::new(registry());
        assert_eq!(server.body_for("style").unwrap(), "# Style\nUse rustfmt.\n");
        let err = server.body_for("nope").unwrap_err();
        assert_eq!(err.code, ErrorCode::RESOURCE_NOT_FOUND);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn kernel_errors_map_to_json_rpc_codes() {
        let rejected = Error::Traversal {
            path: "../x".into(),
        };
        assert_eq!(to_mcp_error(&rejected).code, ErrorCode::INVALID_PARAMS);

        let escaped = Error::Containment {
            path: PathBuf::from("/etc/passwd"),
            base: PathBuf::from("/rules"),
        };
        assert_eq!(to_mcp_error(&escaped).code, ErrorCode::INVALID_PARAMS);

        let missing = Error::TargetMissing {
            path: PathBuf::from("/rules/gone.md"),
        };
        assert_eq!(to_mcp_error(&missing).code, ErrorCode::RESOURCE_NOT_FOUND);

        let canceled = to_mcp_error(&Error::Canceled);
        assert_eq!(canceled.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(canceled.message, "operation canceled");
    }

    #[test]
    fn server_info_enables_tools() {
        let info = RuleToolServer::new(ToolRegistry::new()).get_info();
        assert!(info.capabilities.tools.is_some());
        assert_eq!(info.server_info.name, "rulem");
    }
}
