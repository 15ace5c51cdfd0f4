//! 协作方的参考实现
//!
//! 生产环境可替换为数据库、对象存储和真实链上服务。

mod anchor;
mod catalog;
mod identity;
mod publish;
mod storage;

pub use anchor::{DisabledAnchor, SimulatedAnchor};
pub use catalog::MemoryCatalog;
pub use identity::StaticIdentity;
pub use publish::{DisabledPublisher, IpfsPublisher};
pub use storage::FsBlobLocator;
