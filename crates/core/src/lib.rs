//! Core contract for secure document redaction.
//!
//! 定义脱敏请求/结果、格式处理器 trait、文件记录以及外部协作方接口。
//! 具体的格式实现位于 `redact-pdf` 与 `redact-docx`，流程编排位于 `redact-service`。

pub mod collab;
pub mod document;
pub mod error;
pub mod record;

pub use collab::{AnchorReference, Anchor, BlobLocator, Catalog, ContentId, IdentityProvider, Publisher};
pub use document::{
    block_fill, content_hash, sha256_hex, RedactionRegion, RedactionRequest, RedactionResult,
    Redactor,
};
pub use error::{ExternalServiceError, RedactError};
pub use record::{FileRecord, Principal, RedactionMeta};

pub type Result<T> = std::result::Result<T, RedactError>;
