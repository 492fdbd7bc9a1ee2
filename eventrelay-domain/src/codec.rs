//! 载荷编解码（PayloadCodec）
//!
//! 事件模型只依赖该抽象而不依赖具体的序列化库：任何基于 serde 的格式
//! （JSON、CBOR、文本化 protobuf 等）都可以替换，而无需改动模型或分发器。
//!
//! 编解码器通过 `TypeRegistry::builder` 显式注入，不存在进程级的全局持有者。
//!
use crate::error::DomainResult;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// 载荷编解码器：在载荷对象与其持久化文本之间转换
pub trait PayloadCodec: Send + Sync + 'static {
    /// 编解码器名称（用于日志与诊断）
    fn name(&self) -> &'static str;

    /// 将载荷序列化为文本
    fn serialize<T>(&self, value: &T) -> DomainResult<String>
    where
        T: Serialize + ?Sized;

    /// 将文本解析为目标载荷类型
    fn parse<T>(&self, text: &str) -> DomainResult<T>
    where
        T: DeserializeOwned;
}

/// 基于 serde_json 的默认编解码器
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize<T>(&self, value: &T) -> DomainResult<String>
    where
        T: Serialize + ?Sized,
    {
        Ok(serde_json::to_string(value)?)
    }

    fn parse<T>(&self, text: &str) -> DomainResult<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: String,
        amount: u64,
    }

    #[test]
    fn json_codec_parses_what_it_serializes() {
        let codec = JsonCodec;
        let text = codec
            .serialize(&OrderPlaced {
                order_id: "o-1".into(),
                amount: 42,
            })
            .unwrap();
        assert_eq!(text, r#"{"order_id":"o-1","amount":42}"#);

        let parsed: OrderPlaced = codec.parse(&text).unwrap();
        assert_eq!(parsed.order_id, "o-1");
    }

    #[test]
    fn json_codec_reports_malformed_text_as_codec_error() {
        let err = JsonCodec.parse::<OrderPlaced>("{not json").unwrap_err();
        assert!(matches!(err, DomainError::Codec { .. }));
    }
}
