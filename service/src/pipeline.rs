//! 脱敏流程编排
//!
//! 解密 → 按格式脱敏 → 重新加密 → 哈希 → 发布/锚定（尽力而为）→ 写入子记录。
//! 父记录及其加密文件在任何情况下都不会被修改。

use crate::collaborators::{
    DisabledAnchor, DisabledPublisher, FsBlobLocator, IpfsPublisher, SimulatedAnchor,
};
use crate::config::ServiceConfig;
use crate::dispatch::select_redactor;
use crate::locks::DocumentLocks;
use crate::payload::{RedactPayload, RedactResponse};
use crate::temp::TempArtifact;
use chrono::Utc;
use redact_core::{
    content_hash, Anchor, BlobLocator, Catalog, ExternalServiceError, FileRecord,
    IdentityProvider, Publisher, RedactError, RedactionMeta, RedactionRequest, Result,
};
use redact_crypto::{Envelope, EnvelopeError};
use std::fs;
use std::sync::Arc;

pub struct RedactionService {
    config: ServiceConfig,
    envelope: Envelope,
    catalog: Arc<dyn Catalog>,
    blobs: Arc<dyn BlobLocator>,
    publisher: Arc<dyn Publisher>,
    anchor: Arc<dyn Anchor>,
    locks: DocumentLocks,
}

impl RedactionService {
    pub fn new(
        config: ServiceConfig,
        catalog: Arc<dyn Catalog>,
        blobs: Arc<dyn BlobLocator>,
        publisher: Arc<dyn Publisher>,
        anchor: Arc<dyn Anchor>,
    ) -> Self {
        Self {
            envelope: Envelope::new(config.kdf),
            locks: DocumentLocks::new(config.lock_stripes),
            config,
            catalog,
            blobs,
            publisher,
            anchor,
        }
    }

    /// 按配置组装本地存储、发布与锚定
    pub fn from_config(config: ServiceConfig, catalog: Arc<dyn Catalog>) -> Self {
        let blobs: Arc<dyn BlobLocator> = Arc::new(FsBlobLocator::new(
            config.storage_dir.clone(),
            config.temp_subdir.clone(),
        ));

        let publisher: Arc<dyn Publisher> = match config.ipfs_api_url.as_deref() {
            Some(url) => match IpfsPublisher::new(url, config.publish_timeout_secs) {
                Ok(publisher) => Arc::new(publisher),
                Err(e) => {
                    log::warn!("[Redact] IPFS 发布不可用，已关闭: {}", e);
                    Arc::new(DisabledPublisher)
                }
            },
            None => Arc::new(DisabledPublisher),
        };

        let anchor: Arc<dyn Anchor> = if config.anchor_enabled {
            Arc::new(SimulatedAnchor)
        } else {
            Arc::new(DisabledAnchor)
        };

        Self::new(config, catalog, blobs, publisher, anchor)
    }

    /// 执行一次脱敏，成功时返回新记录信息
    pub fn redact(
        &self,
        identity: &dyn IdentityProvider,
        payload: &RedactPayload,
    ) -> Result<RedactResponse> {
        // 1. 必填字段
        let file_id = payload.file_id.trim();
        if file_id.is_empty() {
            return Err(RedactError::InvalidRequest("file_id required".to_string()));
        }
        if payload.passphrase.is_empty() {
            return Err(RedactError::InvalidRequest(
                "passphrase required for redaction".to_string(),
            ));
        }

        // 2. 身份与所有权
        let requester = identity.current_identity()?;
        let parent = self
            .catalog
            .lookup(file_id)?
            .ok_or_else(|| RedactError::NotFound(format!("file {}", file_id)))?;
        if !identity.authorize(&requester, &parent) {
            log::warn!("[Redact] 非所有者请求脱敏: file={} requester={}", file_id, requester);
            return Err(RedactError::Forbidden(
                "only file owner may request redaction".to_string(),
            ));
        }

        let _lock = self.locks.lock(file_id);
        log::info!("[Redact] 开始脱敏: file={} name={}", file_id, parent.original_name);

        // 3. 解密到临时文件
        let enc_path = self.blobs.path_for(&parent);
        if !enc_path.is_file() {
            return Err(RedactError::Gone("encrypted blob missing".to_string()));
        }

        let scratch = self.blobs.scratch_dir()?;
        let plain = TempArtifact::create_in(&scratch, "dec", &parent.original_name)?;
        let redacted = TempArtifact::create_in(&scratch, "redacted", &parent.original_name)?;

        self.envelope
            .decrypt_file(&enc_path, plain.path(), &payload.passphrase, parent.aad_bytes())
            .map_err(map_envelope_error)?;

        // 4. 规范化请求
        let regions = payload.regions()?;
        let request = RedactionRequest::new(
            file_id,
            plain.path(),
            redacted.path(),
            regions,
            payload.patterns_applied.clone(),
            payload.custom_terms.clone(),
            payload.matched_texts.clone(),
            requester.clone(),
        );

        // 5. 按格式脱敏
        let redactor = select_redactor(&request)?;
        let result = redactor.apply_redactions(&request)?;
        log::info!(
            "[Redact] {} 处理完成: 区域 {} 个, 移除词条 {} 个",
            redactor.name(),
            result.total_regions,
            result.removed_terms.len()
        );

        let digest = content_hash(redacted.path())?;
        if digest != result.sha256 {
            return Err(RedactError::Document(
                "redacted output changed after hashing".to_string(),
            ));
        }
        let size = fs::metadata(redacted.path())?.len();

        // 6. 重新加密，沿用父记录的 AAD
        let (enc_filename, new_enc_path) = self.blobs.allocate(&self.config.redacted_subdir)?;
        let new_blob = TempArtifact::guard(new_enc_path)?;
        self.envelope
            .encrypt_file(redacted.path(), new_blob.path(), &payload.passphrase, parent.aad_bytes())
            .map_err(map_envelope_error)?;

        // 7/8. 发布与锚定失败只记录日志
        let cid = best_effort("publish", self.publisher.publish(new_blob.path()));
        let anchor_tx = best_effort(
            "anchor",
            self.anchor.anchor(&result.sha256, size, cid.as_deref()),
        );

        // 9. 写入子记录
        let record = FileRecord {
            owner: parent.owner.clone(),
            original_name: parent.original_name.clone(),
            enc_filename,
            size,
            created_at: Utc::now().timestamp_millis(),
            aad: parent.aad.clone(),
            sha256: result.sha256.clone(),
            cid: cid.clone(),
            anchor_tx: anchor_tx.clone(),
            folder: parent.folder.clone(),
            parent_file_id: Some(file_id.to_string()),
            redaction_meta: Some(RedactionMeta {
                patterns: request.patterns_applied.clone(),
                custom_terms: request.custom_terms.clone(),
                regions: request.regions.clone(),
                removed_terms: result.removed_terms.clone(),
            }),
        };
        let new_id = self.catalog.insert(record)?;
        if let Err(e) = new_blob.keep() {
            log::warn!("[Cleanup] 无法解除加密文件的清理标记: {}", e);
        }

        log::info!(
            "[Redact] 脱敏完成: parent={} child={} sha256={}",
            file_id,
            new_id,
            result.sha256
        );

        Ok(RedactResponse {
            status: "success".to_string(),
            file_id: new_id,
            new_content_id: cid,
            hash: result.sha256,
            redacted_by: requester.to_string(),
            anchor_reference: anchor_tx,
        })
    }
}

fn map_envelope_error(err: EnvelopeError) -> RedactError {
    match err {
        EnvelopeError::AuthenticationFailure => RedactError::AuthenticationFailure,
        EnvelopeError::Io(e) => RedactError::Io(e),
        other => RedactError::Crypto(other.to_string()),
    }
}

fn best_effort<T>(step: &str, outcome: std::result::Result<T, ExternalServiceError>) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(ExternalServiceError::Disabled) => {
            log::debug!("[Redact] {} 未启用", step);
            None
        }
        Err(e) => {
            log::warn!("[Redact] {} 失败，已忽略: {}", step, e);
            None
        }
    }
}
