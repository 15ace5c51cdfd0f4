use redact_core::{Anchor, AnchorReference, ExternalServiceError};

fn is_sha256_hex(hash_hex: &str) -> bool {
    hash_hex.len() == 64 && hash_hex.bytes().all(|b| b.is_ascii_hexdigit())
}

/// 未接入账本时生成可追溯的模拟凭证
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedAnchor;

impl Anchor for SimulatedAnchor {
    fn anchor(
        &self,
        hash_hex: &str,
        size: u64,
        _content_id: Option<&str>,
    ) -> Result<AnchorReference, ExternalServiceError> {
        if !is_sha256_hex(hash_hex) {
            return Err(ExternalServiceError::InvalidInput(format!(
                "expected 64 hex chars, got {}",
                hash_hex.len()
            )));
        }
        Ok(format!("simulated::{}::{}", &hash_hex[..16], size))
    }
}

/// 关闭锚定
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAnchor;

impl Anchor for DisabledAnchor {
    fn anchor(
        &self,
        _hash_hex: &str,
        _size: u64,
        _content_id: Option<&str>,
    ) -> Result<AnchorReference, ExternalServiceError> {
        Err(ExternalServiceError::Disabled)
    }
}
