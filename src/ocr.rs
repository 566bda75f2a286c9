//! 图片文字提取协作方
//!
//! 引擎只依赖 `TextExtractor` trait；失败与超时由调用方降级为空文本，
//! 永远不会让消息处理失败。

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{HighlightError, Result};

/// 待提取的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes { filename: String, data: Vec<u8> },
}

/// 文字提取 trait
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// 提取器名称（用于日志）
    fn name(&self) -> &str;

    /// 从单张图片提取文字
    async fn extract(&self, source: &ImageSource) -> Result<String>;
}

/// 不做任何提取
pub struct NoopExtractor;

#[async_trait]
impl TextExtractor for NoopExtractor {
    fn name(&self) -> &str {
        "noop"
    }

    async fn extract(&self, _source: &ImageSource) -> Result<String> {
        Ok(String::new())
    }
}

/// OCR.space HTTP 接口配置
#[derive(Debug, Clone)]
pub struct OcrSpaceConfig {
    pub endpoint: String,
    pub api_key: String,
    pub language: String,
    /// 单次请求超时
    pub timeout: Duration,
}

impl OcrSpaceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: "https://api.ocr.space/parse/image".to_string(),
            api_key: api_key.into(),
            language: "eng".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceResponse {
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
    #[serde(default)]
    parsed_results: Vec<OcrSpaceParsed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceParsed {
    #[serde(default)]
    parsed_text: String,
}

/// 基于 OCR.space 的提取器
pub struct OcrSpaceExtractor {
    config: OcrSpaceConfig,
    client: reqwest::Client,
}

impl OcrSpaceExtractor {
    pub fn new(config: OcrSpaceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HighlightError::Extraction(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn base_form(&self) -> reqwest::multipart::Form {
        reqwest::multipart::Form::new()
            .text("apikey", self.config.api_key.clone())
            .text("language", self.config.language.clone())
            .text("isOverlayRequired", "false")
    }
}

#[async_trait]
impl TextExtractor for OcrSpaceExtractor {
    fn name(&self) -> &str {
        "ocr.space"
    }

    async fn extract(&self, source: &ImageSource) -> Result<String> {
        let form = match source {
            ImageSource::Url(url) => self.base_form().text("url", url.clone()),
            ImageSource::Bytes { filename, data } => self.base_form().part(
                "file",
                reqwest::multipart::Part::bytes(data.clone()).file_name(filename.clone()),
            ),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| HighlightError::Extraction(e.to_string()))?;

        let body: OcrSpaceResponse = response
            .json()
            .await
            .map_err(|e| HighlightError::Extraction(e.to_string()))?;

        parse_response(body)
    }
}

fn parse_response(body: OcrSpaceResponse) -> Result<String> {
    if body.is_errored_on_processing {
        let reason = match body.error_message {
            Some(serde_json::Value::Array(items)) => items
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string(),
            Some(serde_json::Value::String(s)) => s,
            _ => "unknown error".to_string(),
        };
        return Err(HighlightError::Extraction(reason));
    }
    let text = body
        .parsed_results
        .into_iter()
        .next()
        .map(|r| r.parsed_text)
        .unwrap_or_default();
    debug!(chars = text.len(), "OCR text extracted");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let body: OcrSpaceResponse = serde_json::from_str(
            r#"{"IsErroredOnProcessing": false, "ParsedResults": [{"ParsedText": "free nitro"}]}"#,
        )
        .unwrap();
        assert_eq!(parse_response(body).unwrap(), "free nitro");
    }

    #[test]
    fn test_parse_error_message() {
        let body: OcrSpaceResponse = serde_json::from_str(
            r#"{"IsErroredOnProcessing": true, "ErrorMessage": ["File too large"]}"#,
        )
        .unwrap();
        match parse_response(body) {
            Err(HighlightError::Extraction(reason)) => assert_eq!(reason, "File too large"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_noop_extractor() {
        let text = NoopExtractor
            .extract(&ImageSource::Url("https://x/y.png".into()))
            .await
            .unwrap();
        assert!(text.is_empty());
    }
}
