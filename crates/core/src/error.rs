use thiserror::Error;

/// 脱敏流程错误
///
/// 每个变体对应一个边界状态码，见 [`RedactError::status_code`]。
#[derive(Debug, Error)]
pub enum RedactError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("unsupported file type for redaction: {0}")]
    UnsupportedFormat(String),
    /// 口令或 AAD 与密文完整性标签不匹配
    #[error("authentication failure while decrypting")]
    AuthenticationFailure,
    #[error("document processing failed: {0}")]
    Document(String),
    #[error("encryption failed: {0}")]
    Crypto(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RedactError {
    pub fn status_code(&self) -> u16 {
        match self {
            RedactError::InvalidRequest(_) => 400,
            RedactError::Unauthorized(_) => 401,
            RedactError::Forbidden(_) => 403,
            RedactError::NotFound(_) => 404,
            RedactError::Gone(_) => 410,
            RedactError::UnsupportedFormat(_) => 415,
            RedactError::AuthenticationFailure
            | RedactError::Document(_)
            | RedactError::Crypto(_)
            | RedactError::Catalog(_)
            | RedactError::Io(_) => 500,
        }
    }

    /// 对外可见的错误信息
    ///
    /// 5xx 一律返回通用信息，避免泄露口令是否正确。
    pub fn public_message(&self) -> String {
        if self.status_code() >= 500 {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// 外部服务（发布/锚定）错误，只在本地记录，不会中断流程
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("service disabled")]
    Disabled,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
