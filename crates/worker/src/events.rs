//! 事件解码
//!
//! 将队列中的原始 JSON 负载解析为强类型事件并完成校验。
//! 纯函数，不产生任何副作用；校验失败的消息由消费循环直接丢弃。

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

/// 用量事件的类型标识
pub const USAGE_EVENT_TYPE: &str = "usage_event";
/// 审计事件的类型标识
pub const AUDIT_EVENT_TYPE: &str = "audit_event";

/// 一次生成请求的 token 用量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub user_id: Uuid,
    pub generation_id: Uuid,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: String,
}

/// 用户操作审计记录
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// 匿名操作（如登录失败）时为空
    pub user_id: Option<Uuid>,
    pub action: String,
    pub metadata: Value,
}

// 线上格式：字段缺失或为 null 都按零值处理，再由校验逻辑给出具体原因

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUsageEvent {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    generation_id: Option<String>,
    #[serde(default)]
    input_tokens: Option<i64>,
    #[serde(default)]
    output_tokens: Option<i64>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuditEvent {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// 解析用量事件
pub fn parse_usage(body: &[u8]) -> Result<UsageEvent, ValidationError> {
    let raw: RawUsageEvent =
        serde_json::from_slice(body).map_err(|e| ValidationError::Decode(e.to_string()))?;

    check_type(raw.event_type.as_deref().unwrap_or_default(), USAGE_EVENT_TYPE)?;
    let user_id = parse_id("userId", raw.user_id.as_deref().unwrap_or_default())?;
    let generation_id = parse_id(
        "generationId",
        raw.generation_id.as_deref().unwrap_or_default(),
    )?;

    let input_tokens = raw.input_tokens.unwrap_or_default();
    let output_tokens = raw.output_tokens.unwrap_or_default();
    if input_tokens < 0 || output_tokens < 0 {
        return Err(ValidationError::NegativeTokens {
            input: input_tokens,
            output: output_tokens,
        });
    }

    let model = raw.model.unwrap_or_default();
    if model.is_empty() {
        return Err(ValidationError::MissingField("model"));
    }

    Ok(UsageEvent {
        user_id,
        generation_id,
        input_tokens,
        output_tokens,
        model,
    })
}

/// 解析审计事件
///
/// metadata 缺失、为 null 或为空字符串时替换为 `{}`，其余内容原样透传，不做结构校验。
pub fn parse_audit(body: &[u8]) -> Result<AuditEvent, ValidationError> {
    let raw: RawAuditEvent =
        serde_json::from_slice(body).map_err(|e| ValidationError::Decode(e.to_string()))?;

    check_type(raw.event_type.as_deref().unwrap_or_default(), AUDIT_EVENT_TYPE)?;
    let user_id = raw
        .user_id
        .as_deref()
        .map(|id| parse_id("userId", id))
        .transpose()?;

    let action = raw.action.unwrap_or_default();
    if action.is_empty() {
        return Err(ValidationError::MissingField("action"));
    }

    let metadata = match raw.metadata {
        None | Some(Value::Null) => empty_metadata(),
        Some(Value::String(s)) if s.is_empty() => empty_metadata(),
        Some(value) => value,
    };

    Ok(AuditEvent {
        user_id,
        action,
        metadata,
    })
}

fn empty_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

fn check_type(actual: &str, expected: &'static str) -> Result<(), ValidationError> {
    if actual != expected {
        return Err(ValidationError::WrongType {
            expected,
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn parse_id(field: &'static str, value: &str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(value).map_err(|_| ValidationError::BadId {
        field,
        value: value.to_string(),
    })
}
