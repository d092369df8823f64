//! Speech-to-text — convert a sealed capture blob into text
//!
//! The session controller consumes this as an external collaborator: submit
//! audio bytes plus format hints, get back text (possibly empty) or a
//! structured failure. Failures are logged and listening resumes; there is no
//! automatic retry. A dropped utterance is acceptable, a frozen session is
//! not.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Backend for converting a capture blob to text. Invoked at most once per
/// finalized capture.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe one blob. `encoding` and `sample_rate_hertz` are format
    /// hints for the backend. An empty string is a valid result (nothing
    /// recognized).
    async fn transcribe(
        &self,
        audio: &[u8],
        encoding: &str,
        sample_rate_hertz: u32,
    ) -> VoiceResult<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest<'a> {
    /// Base64-encoded audio bytes.
    audio_data: String,
    encoding: &'a str,
    sample_rate_hertz: u32,
    language_code: &'a str,
    enable_automatic_punctuation: bool,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Production transcription backend: a speech API endpoint that accepts
/// base64 audio with format hints and returns recognized text.
/// Uses `STT_API_URL`, `STT_API_KEY` (optional bearer), and `STT_LANGUAGE`.
#[derive(Debug, Clone)]
pub struct SpeechApiClient {
    /// Full endpoint URL (e.g. https://example.com/api/transcribe).
    pub endpoint: String,
    /// Optional bearer API key.
    pub api_key: Option<String>,
    /// BCP-47 language code sent with every request (default en-US).
    pub language_code: String,
    client: reqwest::Client,
}

impl SpeechApiClient {
    /// Build from environment: `STT_API_URL` (required), `STT_API_KEY`,
    /// `STT_LANGUAGE`.
    pub fn from_env() -> VoiceResult<Self> {
        let endpoint = crate::secrets::secret("STT_API_URL")
            .ok_or_else(|| VoiceError::Config("STT_API_URL is not set".to_string()))?;
        let api_key = crate::secrets::secret("STT_API_KEY");
        let language_code =
            crate::secrets::secret("STT_LANGUAGE").unwrap_or_else(|| "en-US".to_string());
        Self::new(endpoint, api_key, language_code)
    }

    /// Create with explicit config.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        language_code: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            language_code: language_code.into(),
            client,
        })
    }
}

#[async_trait]
impl TranscriptionClient for SpeechApiClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        encoding: &str,
        sample_rate_hertz: u32,
    ) -> VoiceResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let body = TranscribeRequest {
            audio_data: BASE64.encode(audio),
            encoding,
            sample_rate_hertz,
            language_code: &self.language_code,
            enable_automatic_punctuation: true,
        };

        debug!(
            "Submitting {} bytes ({}, {}Hz) for transcription",
            audio.len(),
            encoding,
            sample_rate_hertz
        );

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "speech API error {}: {}",
                status, text
            )));
        }

        let parsed: TranscribeResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;

        if !parsed.success {
            let reason = parsed.error.unwrap_or_else(|| "unknown failure".to_string());
            let details = parsed.details.unwrap_or_default();
            return Err(VoiceError::Transcription(format!("{} {}", reason, details)));
        }

        Ok(parsed
            .transcription
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// Placeholder transcription: returns a fixed string. Use for exercising the
/// session loop without a speech backend.
#[derive(Debug, Default)]
pub struct PlaceholderTranscriber {
    /// If set, return this instead of the derived message.
    pub response: Option<String>,
}

impl PlaceholderTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: String) -> Self {
        Self { response: Some(s) }
    }
}

#[async_trait]
impl TranscriptionClient for PlaceholderTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        _encoding: &str,
        _sample_rate_hertz: u32,
    ) -> VoiceResult<String> {
        if let Some(ref r) = self.response {
            return Ok(r.clone());
        }
        Ok(format!(
            "[transcription placeholder: {} bytes — connect a speech API]",
            audio.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_returns_derived_message() {
        let stt = PlaceholderTranscriber::new();
        let text = stt.transcribe(&[0u8; 960], "LINEAR16", 16000).await.unwrap();
        assert!(text.contains("960"));
    }

    #[tokio::test]
    async fn placeholder_with_response() {
        let stt = PlaceholderTranscriber::with_response("hello world".to_string());
        let text = stt.transcribe(&[], "LINEAR16", 16000).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn request_body_uses_the_wire_field_names() {
        let body = TranscribeRequest {
            audio_data: BASE64.encode([1u8, 2, 3]),
            encoding: "LINEAR16",
            sample_rate_hertz: 16000,
            language_code: "en-US",
            enable_automatic_punctuation: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["audioData"], BASE64.encode([1u8, 2, 3]));
        assert_eq!(json["sampleRateHertz"], 16000);
        assert_eq!(json["languageCode"], "en-US");
        assert_eq!(json["enableAutomaticPunctuation"], true);
    }

    #[test]
    fn failure_response_fields_deserialize() {
        let parsed: TranscribeResponse = serde_json::from_str(
            r#"{"error":"recognition failed","details":"bad encoding","success":false}"#,
        )
        .unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error.as_deref(), Some("recognition failed"));
        assert_eq!(parsed.details.as_deref(), Some("bad encoding"));
        assert!(parsed.transcription.is_none());
    }
}
