//! OpenAI-compatible vision chat client.
//!
//! Works with any endpoint that accepts `image_url` content parts on
//! `/v1/chat/completions` (vLLM, llama.cpp server, hosted APIs).

use super::VqaModel;
use super::prompts::Prompts;
use crate::config::VqaConfig;
use crate::error::{GraderError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Message role in a conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize)]
struct Message {
    role: Role,
    content: MessageContent,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    fn user_with_image(text: impl Into<String>, image: &EncodedImage) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url.clone(),
                    },
                },
                ContentPart::Text { text: text.into() },
            ]),
        }
    }
}

/// Request body for chat completion.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Response from chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// An image file encoded as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data_url: String,
}

impl EncodedImage {
    /// Encode raw image bytes, picking the MIME type from the file extension.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Self {
        let mime = mime_for(path);
        Self {
            data_url: format!("data:{};base64,{}", mime, STANDARD.encode(bytes)),
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// OpenAI-compatible vision-language client.
#[derive(Clone)]
pub struct VqaClient {
    client: Client,
    config: VqaConfig,
}

impl VqaClient {
    /// Create a new client with the given configuration.
    pub fn new(config: VqaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Get the API endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }

    async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(GraderError::VqaApi(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(GraderError::VqaApi(format!(
                "Request failed ({}): {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| GraderError::VqaApi("No choices in response".to_string()))
    }

    /// Test connectivity to the API.
    pub async fn test_connection(&self) -> Result<()> {
        let reply = self
            .chat(vec![Message::user("Say 'hello' and nothing else.")])
            .await?;

        if reply.to_lowercase().contains("hello") {
            Ok(())
        } else {
            Err(GraderError::VqaApi(format!("Unexpected response: {}", reply)))
        }
    }
}

impl VqaModel for VqaClient {
    type Image = EncodedImage;

    async fn process_image(&self, image_path: &Path) -> Result<EncodedImage> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                GraderError::ImageNotFound(image_path.to_path_buf())
            } else {
                GraderError::io(image_path, e)
            }
        })?;
        debug!("Encoded {:?} ({} bytes)", image_path, bytes.len());
        Ok(EncodedImage::from_bytes(image_path, &bytes))
    }

    async fn generate(&self, question: &str, image: &EncodedImage) -> Result<String> {
        let messages = vec![
            Message::system(Prompts::system_vqa()),
            Message::user_with_image(question.trim(), image),
        ];
        let answer = self.chat(messages).await?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client() -> VqaClient {
        VqaClient::new(VqaConfig {
            api_base: "http://localhost:8000/".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_endpoint_construction() {
        assert_eq!(client().endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_image_message_shape() {
        let image = EncodedImage {
            data_url: "data:image/png;base64,AAAA".to_string(),
        };
        let json = serde_json::to_value(Message::user_with_image("Is it red?", &image)).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][0]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(json["content"][1]["type"], "text");
        assert_eq!(json["content"][1]["text"], "Is it red?");

        let json = serde_json::to_value(Message::system("be brief")).unwrap();
        assert_eq!(json["content"], "be brief");
    }

    #[test]
    fn test_encoded_image_mime() {
        let img = EncodedImage::from_bytes(Path::new("a/b.JPG"), b"hi");
        assert_eq!(img.data_url, "data:image/jpeg;base64,aGk=");
        let img = EncodedImage::from_bytes(Path::new("noext"), b"");
        assert!(img.data_url.starts_with("data:application/octet-stream;base64,"));
    }

    #[tokio::test]
    async fn test_process_image_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.png");
        let err = client().process_image(&missing).await.unwrap_err();
        assert!(matches!(err, GraderError::ImageNotFound(p) if p == missing));
    }

    #[tokio::test]
    async fn test_process_image_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let img = client().process_image(&path).await.unwrap();
        assert_eq!(img.data_url, "data:image/png;base64,AQID");
    }
}
