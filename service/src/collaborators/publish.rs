use redact_core::{ContentId, ExternalServiceError, Publisher};
use reqwest::blocking::{multipart, Client};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// 未配置发布服务
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

impl Publisher for DisabledPublisher {
    fn publish(&self, _path: &Path) -> Result<ContentId, ExternalServiceError> {
        Err(ExternalServiceError::Disabled)
    }
}

/// 通过 IPFS HTTP API 发布加密文件
pub struct IpfsPublisher {
    api_url: String,
    client: Client,
}

impl IpfsPublisher {
    pub fn new(api_url: impl Into<String>, timeout_secs: u64) -> Result<Self, ExternalServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|err| ExternalServiceError::Request(format!("创建 HTTP 客户端失败: {}", err)))?;
        let api_url: String = api_url.into();
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn add_endpoint(&self) -> String {
        format!("{}/api/v0/add", self.api_url)
    }
}

impl Publisher for IpfsPublisher {
    fn publish(&self, path: &Path) -> Result<ContentId, ExternalServiceError> {
        let form = multipart::Form::new().file("file", path)?;

        let response = self
            .client
            .post(self.add_endpoint())
            .multipart(form)
            .send()
            .map_err(|err| ExternalServiceError::Request(format!("上传失败: {}", err)))?;

        if !response.status().is_success() {
            return Err(ExternalServiceError::Response(format!(
                "HTTP 状态码: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .map_err(|err| ExternalServiceError::Response(format!("响应解析失败: {}", err)))?;
        parse_add_response(&body)
    }
}

fn parse_add_response(body: &Value) -> Result<ContentId, ExternalServiceError> {
    body.get("Hash")
        .and_then(Value::as_str)
        .filter(|cid| !cid.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExternalServiceError::Response(format!("missing Hash field: {}", body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_add_response() {
        let body = json!({"Name": "blob.bin", "Hash": "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG", "Size": "12"});
        assert_eq!(
            parse_add_response(&body).unwrap(),
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"
        );
        assert!(parse_add_response(&json!({"Message": "err"})).is_err());
    }

    #[test]
    fn test_endpoint_normalized() {
        let publisher = IpfsPublisher::new("http://127.0.0.1:5001/", 5).unwrap();
        assert_eq!(publisher.add_endpoint(), "http://127.0.0.1:5001/api/v0/add");
    }

    #[test]
    fn test_unreachable_node_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"cipher").unwrap();
        let publisher = IpfsPublisher::new("http://127.0.0.1:9", 1).unwrap();
        assert!(publisher.publish(&path).is_err());
        assert!(DisabledPublisher.publish(&path).is_err());
    }
}
