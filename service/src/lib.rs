//! Secure document redaction service.
//!
//! 解密已存储的加密文档，按格式执行不可逆脱敏，重新加密并生成与父记录关联的子记录。

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod locks;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod temp;

pub use collaborators::{
    DisabledAnchor, DisabledPublisher, FsBlobLocator, IpfsPublisher, MemoryCatalog,
    SimulatedAnchor, StaticIdentity,
};
pub use config::{load_config, save_config, ConfigError, ServiceConfig};
pub use dispatch::select_redactor;
pub use logging::init_logging;
pub use payload::{ErrorBody, RedactPayload, RedactResponse};
pub use pipeline::RedactionService;
