//! 边界请求/响应结构
//!
//! 列表字段缺失或为 `null` 时视为空；区域列表先以原始 JSON 接收，
//! 在流程中统一校验，任一条目不合法即整体拒绝。

use redact_core::{RedactError, RedactionRegion, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const INVALID_REGION: &str = "invalid redaction region data";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub file_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub passphrase: String,
    #[serde(deserialize_with = "null_as_default")]
    pub redaction_regions: Vec<Value>,
    #[serde(deserialize_with = "lenient_strings")]
    pub patterns_applied: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub custom_terms: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub matched_texts: Vec<String>,
}

impl RedactPayload {
    pub fn new(file_id: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            passphrase: passphrase.into(),
            ..Self::default()
        }
    }

    /// 解析请求体
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| RedactError::InvalidRequest(format!("malformed request body: {}", e)))
    }

    pub fn with_regions(mut self, regions: Vec<Value>) -> Self {
        self.redaction_regions = regions;
        self
    }

    pub fn with_matched_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matched_texts = texts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_custom_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns_applied = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// 校验并规范化区域列表
    ///
    /// 任一区域格式错误时整个请求无效；页码为负的区域与其它越界区域一样被跳过。
    pub fn regions(&self) -> Result<Vec<RedactionRegion>> {
        let mut regions = Vec::with_capacity(self.redaction_regions.len());
        for raw in &self.redaction_regions {
            if let Some(region) = parse_region(raw)? {
                regions.push(region);
            }
        }
        Ok(regions)
    }
}

fn parse_region(raw: &Value) -> Result<Option<RedactionRegion>> {
    let invalid = || RedactError::InvalidRequest(INVALID_REGION.to_string());
    let obj = raw.as_object().ok_or_else(invalid)?;
    let field = |name: &str| obj.get(name).and_then(number).ok_or_else(invalid);

    let page = field("page")?;
    if page.fract() != 0.0 {
        return Err(invalid());
    }
    let (x, y, w, h) = (field("x")?, field("y")?, field("w")?, field("h")?);

    if page < 0.0 || page > u32::MAX as f64 {
        log::debug!("[Redact] 跳过越界页码 {} 的区域", page);
        return Ok(None);
    }

    Ok(Some(RedactionRegion {
        page: page as u32,
        x,
        y,
        w,
        h,
    }))
}

/// 数字或数字字符串，必须是有限值
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 字符串列表，标量元素转为字符串，`null` 元素忽略
fn lenient_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    items
        .into_iter()
        .filter(|v| !v.is_null())
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected string list item, got {}",
                other
            ))),
        })
        .collect()
}

/// 成功响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactResponse {
    pub status: String,
    /// 新记录 ID
    pub file_id: String,
    pub new_content_id: Option<String>,
    pub hash: String,
    pub redacted_by: String,
    pub anchor_reference: Option<String>,
}

/// 错误响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
}

impl From<&RedactError> for ErrorBody {
    fn from(err: &RedactError) -> Self {
        Self {
            status: err.status_code(),
            error: err.public_message(),
        }
    }
}
