//! Client for the remote vision model's chat completions API.
//!
//! OCR happens in two requests against the same endpoint. The first sends the
//! image and asks for its text as markdown. The second sends that markdown
//! back and asks for it as JSON. This module only builds requests and pulls
//! the text out of responses. Parsing the JSON is the pipeline's job.

use std::fmt;

use schemars::JsonSchema;

use crate::{
    config::ApiConfig, data_url::check_image_data_url, error::OcrError, prelude::*,
    prompts::Prompts,
};

/// Interface to something that can run our two OCR stages.
#[async_trait]
pub trait OcrBackend: fmt::Debug + Send + Sync + 'static {
    /// Extract the text of an image, formatted as markdown. Takes a
    /// `data:` URL containing the base64-encoded image.
    async fn extract_text(&self, image_data_url: &str) -> Result<String, OcrError>;

    /// Ask the model to convert extracted text to JSON. Returns the model's
    /// output as text, without parsing it.
    async fn structure_text(&self, raw_text: &str) -> Result<String, OcrError>;
}

/// The response envelope returned by the chat completions endpoint.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct RemoteResponse {
    /// Response ID.
    #[serde(default)]
    pub id: String,

    /// Object type, usually `chat.completion`.
    #[serde(default)]
    pub object: Option<String>,

    /// Creation time, in seconds since the Unix epoch.
    #[serde(default)]
    pub created: Option<u64>,

    /// The model which answered.
    #[serde(default)]
    pub model: String,

    /// Candidate responses. We only ever look at the first.
    pub choices: Vec<Choice>,

    /// Token usage.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl RemoteResponse {
    /// Take the content of the first choice.
    pub fn into_first_content(self) -> Result<String, OcrError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(OcrError::EmptyResponse)
    }
}

/// A single candidate response.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct Choice {
    /// Position in the `choices` list.
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ChoiceMessage,

    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A generated message.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ChoiceMessage {
    /// Usually `assistant`.
    #[serde(default)]
    pub role: String,

    /// The text of the message.
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage counters.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u64,

    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
}

/// A chat completions request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<UserMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    temperature: f32,
}

/// A user message made of content parts.
#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

impl<'a> UserMessage<'a> {
    fn new(content: Vec<ContentPart<'a>>) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

/// One part of a message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl<'a> },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

/// Requested output format.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
}

/// Both stages ask for deterministic decoding.
const TEMPERATURE: f32 = 0.0;

/// OCR client for Mistral's API, or anything else that speaks the same
/// chat completions dialect.
#[derive(Debug)]
pub struct MistralClient {
    /// HTTP client. No timeout beyond the defaults.
    http: reqwest::Client,

    /// Where to connect and how to authenticate.
    config: ApiConfig,

    /// What to ask for.
    prompts: Prompts,
}

impl MistralClient {
    /// Create a new client.
    pub fn new(config: ApiConfig, prompts: Prompts) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            prompts,
        }
    }

    /// Build the extraction request body.
    fn extract_request<'a>(&'a self, image_data_url: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![UserMessage::new(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_data_url,
                    },
                },
                ContentPart::Text {
                    text: self.prompts.extract_instruction().to_owned(),
                },
            ])],
            response_format: None,
            temperature: TEMPERATURE,
        }
    }

    /// Build the structuring request body.
    fn structure_request(&self, raw_text: &str) -> Result<ChatRequest<'_>, OcrError> {
        let text = self
            .prompts
            .render_structure_request(raw_text)
            .map_err(|err| OcrError::InvalidInput(format!("{err:#}")))?;
        Ok(ChatRequest {
            model: &self.config.model,
            messages: vec![UserMessage::new(vec![ContentPart::Text { text }])],
            response_format: Some(ResponseFormat::JsonObject),
            temperature: TEMPERATURE,
        })
    }

    /// POST a request and return the first choice's content.
    async fn chat_completion(&self, req: &ChatRequest<'_>) -> Result<String, OcrError> {
        let response = self
            .http
            .post(self.config.chat_completions_url())
            .bearer_auth(self.config.api_key())
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "API returned an error");
            return Err(OcrError::RemoteApi {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let envelope = serde_json::from_str::<RemoteResponse>(&body)
            .map_err(OcrError::InvalidEnvelope)?;
        if let Some(usage) = &envelope.usage {
            debug!(
                model = %envelope.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Token usage"
            );
        }
        envelope.into_first_content()
    }
}

#[async_trait]
impl OcrBackend for MistralClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.config.model))]
    async fn extract_text(&self, image_data_url: &str) -> Result<String, OcrError> {
        check_image_data_url(image_data_url).map_err(OcrError::InvalidInput)?;
        let req = self.extract_request(image_data_url);
        let text = self.chat_completion(&req).await?;
        debug!(chars = text.len(), "Extracted text");
        Ok(text)
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.config.model))]
    async fn structure_text(&self, raw_text: &str) -> Result<String, OcrError> {
        if raw_text.trim().is_empty() {
            return Err(OcrError::InvalidInput(
                "no text was extracted from the image".to_owned(),
            ));
        }
        let req = self.structure_request(raw_text)?;
        let text = self.chat_completion(&req).await?;
        trace!(%text, "Structured text");
        Ok(text)
    }
}
