use redact_core::{IdentityProvider, Principal, RedactError};

/// 固定身份，未登录时返回 `Unauthorized`
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    principal: Option<Principal>,
}

impl StaticIdentity {
    pub fn new(principal: impl AsRef<str>) -> Self {
        Self {
            principal: Some(Principal::new(principal)),
        }
    }

    pub fn anonymous() -> Self {
        Self { principal: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Result<Principal, RedactError> {
        self.principal
            .clone()
            .ok_or_else(|| RedactError::Unauthorized("missing identity".to_string()))
    }
}
