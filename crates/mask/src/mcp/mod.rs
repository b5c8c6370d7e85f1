use crate::{
    coordinator::{AnnotationCommand, CommandOutput, Coordinator},
    error::MaskError,
    types::{ChunkId, ItemIndex, QueryId},
};
use rmcp::{
    handler::server::tool::IntoCallToolResult, model::{CallToolResult, Content, ServerCapabilities, ServerInfo}, schemars, tool, Error as McpError, ServerHandler
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Request for registering a source image
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RegisterImageRequest {
    #[schemars(description = "Name the image is stored and referenced under, e.g. cat.png")]
    pub name: String,
    #[schemars(description = "Base64-encoded image file")]
    pub image_b64: String,
}

/// Identifies one mask collection
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CollectionRequest {
    #[schemars(description = "Registered image name")]
    pub image_name: String,
    #[schemars(description = "Annotation query id for this image")]
    pub query_id: QueryId,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SaveMaskRequest {
    pub image_name: String,
    pub query_id: QueryId,
    #[schemars(description = "Base64-encoded mask image; any non-zero pixel is part of the mask")]
    pub mask_png_b64: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeleteMaskRequest {
    pub image_name: String,
    pub query_id: QueryId,
    #[schemars(description = "Id returned by save_mask")]
    pub mask_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LogActionRequest {
    pub chunk_id: ChunkId,
    #[schemars(description = "Item index within the chunk")]
    pub index: ItemIndex,
    pub image_name: String,
    pub query_id: QueryId,
    #[schemars(description = "Either 'done' or 'skip'")]
    pub action: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StatusRequest {
    pub chunk_id: ChunkId,
}

/// Uniform tool response: either a result payload or an error message
#[derive(Debug, Serialize, schemars::JsonSchema, TS)]
#[ts(export)]
pub struct ToolResponse {
    #[schemars(description = "False when the operation was rejected or failed")]
    pub ok: bool,
    #[schemars(description = "Operation result, absent on failure")]
    pub result: Option<serde_json::Value>,
    #[schemars(description = "Failure kind: not_found, invalid_action, decode, invalid_name, internal")]
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl ToolResponse {
    fn success(output: CommandOutput) -> Self {
        match serde_json::to_value(output) {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error_kind: None,
                error: None,
            },
            Err(e) => Self::failure(&MaskError::from(e)),
        }
    }

    fn failure(err: &MaskError) -> Self {
        let kind = match err {
            e if e.is_not_found() => "not_found",
            MaskError::InvalidAction(_) => "invalid_action",
            MaskError::Decode(_) => "decode",
            MaskError::InvalidName(_) => "invalid_name",
            MaskError::NoPoints => "no_points",
            MaskError::CollaboratorUnavailable(_) => "collaborator_unavailable",
            _ => "internal",
        };
        Self {
            ok: false,
            result: None,
            error_kind: Some(kind.to_string()),
            error: Some(err.to_string()),
        }
    }
}

impl IntoCallToolResult for ToolResponse {
    fn into_call_tool_result(self) -> Result<CallToolResult, McpError> {
        let text = serde_json::to_string_pretty(&self).unwrap_or_else(|_| format!("{:?}", self));
        if self.ok {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }
}

/// MCP Server exposing the mask store and review journal
#[derive(Clone)]
pub struct MaskMcpServer {
    coordinator: Coordinator,
}

impl MaskMcpServer {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    fn run(&self, command: AnnotationCommand) -> ToolResponse {
        let name: &'static str = (&command).into();
        match self.coordinator.execute(command) {
            Ok(output) => ToolResponse::success(output),
            Err(e) => {
                tracing::warn!("{} failed: {}", name, e);
                ToolResponse::failure(&e)
            }
        }
    }
}

#[tool(tool_box)]
impl MaskMcpServer {
    #[tool(description = "Register a source image (base64) and return its width and height")]
    fn register_image(&self, #[tool(aggr)] RegisterImageRequest { name, image_b64 }: RegisterImageRequest) -> ToolResponse {
        self.run(AnnotationCommand::RegisterImage { name, image_b64 })
    }

    #[tool(description = "Save a mask for an image/query pair and return the new mask id")]
    fn save_mask(
        &self,
        #[tool(aggr)] SaveMaskRequest { image_name, query_id, mask_png_b64 }: SaveMaskRequest,
    ) -> ToolResponse {
        self.run(AnnotationCommand::SaveMask { image_name, query_id, mask_png_b64 })
    }

    #[tool(description = "Delete a mask by id; deleting an unknown id succeeds")]
    fn delete_mask(
        &self,
        #[tool(aggr)] DeleteMaskRequest { image_name, query_id, mask_id }: DeleteMaskRequest,
    ) -> ToolResponse {
        self.run(AnnotationCommand::DeleteMask { image_name, query_id, mask_id })
    }

    #[tool(description = "Combined thumbnail and per-mask thumbnails (base64 PNG) for an image/query pair")]
    fn list_masks(
        &self,
        #[tool(aggr)] CollectionRequest { image_name, query_id }: CollectionRequest,
    ) -> ToolResponse {
        self.run(AnnotationCommand::ListMasks { image_name, query_id })
    }

    #[tool(description = "Record a 'done' or 'skip' decision for an item of a review chunk")]
    fn log_action(
        &self,
        #[tool(aggr)] LogActionRequest { chunk_id, index, image_name, query_id, action }: LogActionRequest,
    ) -> ToolResponse {
        self.run(AnnotationCommand::LogAction { chunk_id, index, image_name, query_id, action })
    }

    #[tool(description = "Latest decision per item index of a review chunk")]
    fn get_status(&self, #[tool(aggr)] StatusRequest { chunk_id }: StatusRequest) -> ToolResponse {
        self.run(AnnotationCommand::GetStatus { chunk_id })
    }

    #[tool(description = "Get the JSON schema for AnnotationCommand")]
    fn get_command_schema(&self) -> String {
        let schema = AnnotationCommand::schema();
        serde_json::to_string_pretty(&schema)
            .unwrap_or_else(|e| format!("Failed to serialize schema: {}", e))
    }
}

#[tool(tool_box)]
impl ServerHandler for MaskMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Mask Annotation Server - store point-prompt segmentation masks per image and query, render colored mask thumbnails, and track done/skip review decisions per chunk.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::CompositorConfig;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> MaskMcpServer {
        MaskMcpServer::new(Coordinator::open(dir.path(), CompositorConfig::default()))
    }

    #[test]
    fn test_invalid_action_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let response = server(&dir).log_action(LogActionRequest {
            chunk_id: 1,
            index: 0,
            image_name: "cat.png".into(),
            query_id: 0,
            action: "maybe".into(),
        });
        assert!(!response.ok);
        assert_eq!(response.error_kind.as_deref(), Some("invalid_action"));
    }

    #[test]
    fn test_status_of_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let response = server(&dir).get_status(StatusRequest { chunk_id: 6 });
        assert!(response.ok);
        let result = response.result.unwrap();
        assert_eq!(result["statuses"], serde_json::json!({}));
    }

    #[test]
    fn test_listing_unknown_image_is_not_found() {
        let dir = TempDir::new().unwrap();
        let srv = server(&dir);
        let mask = crate::io::to_base64_png(&image::DynamicImage::ImageLuma8(image::GrayImage::new(2, 2))).unwrap();
        assert!(srv.save_mask(SaveMaskRequest { image_name: "x.png".into(), query_id: 1, mask_png_b64: mask }).ok);

        let response = srv.list_masks(CollectionRequest { image_name: "x.png".into(), query_id: 1 });
        assert_eq!(response.error_kind.as_deref(), Some("not_found"));
    }
}
