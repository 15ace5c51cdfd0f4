//! 统一脱敏接口定义
//!
//! 所有格式处理器都必须实现 `Redactor` trait，以确保统一的处理流程。

use crate::record::Principal;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// 块填充字符
pub const BLOCK_CHAR: char = '█';

/// 需要销毁的矩形区域
///
/// 坐标单位为源文档原生坐标（PDF 为 point，原点位于可见区域左上角）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RedactionRegion {
    /// 页码，从 0 开始
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RedactionRegion {
    /// 返回 `[x0, y0, x1, y1]`，宽高为负时自动归一化
    pub fn corners(&self) -> (f64, f64, f64, f64) {
        let (x0, x1) = if self.w >= 0.0 {
            (self.x, self.x + self.w)
        } else {
            (self.x + self.w, self.x)
        };
        let (y0, y1) = if self.h >= 0.0 {
            (self.y, self.y + self.h)
        } else {
            (self.y + self.h, self.y)
        };
        (x0, y0, x1, y1)
    }

    /// 页码是否落在 `[0, page_count)` 内
    pub fn in_bounds(&self, page_count: usize) -> bool {
        (self.page as usize) < page_count
    }
}

/// 规范化后的脱敏请求
#[derive(Debug, Clone)]
pub struct RedactionRequest {
    pub file_id: String,
    /// 已解密的明文临时文件
    pub source_path: PathBuf,
    /// 脱敏输出路径（由处理器创建）
    pub output_path: PathBuf,
    pub regions: Vec<RedactionRegion>,
    /// 前端使用的规则标签，仅用于审计
    pub patterns_applied: Vec<String>,
    pub custom_terms: Vec<String>,
    /// 客户端扫描得到的字面文本，已去重、去空
    pub matched_texts: Vec<String>,
    pub requested_by: Principal,
}

impl RedactionRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        regions: Vec<RedactionRegion>,
        patterns_applied: Vec<String>,
        custom_terms: Vec<String>,
        matched_texts: Vec<String>,
        requested_by: Principal,
    ) -> Self {
        let matched_texts: BTreeSet<String> = matched_texts
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            file_id: file_id.into(),
            source_path: source_path.into(),
            output_path: output_path.into(),
            regions,
            patterns_applied,
            custom_terms,
            matched_texts: matched_texts.into_iter().collect(),
            requested_by,
        }
    }

    /// 源文件扩展名（小写）
    pub fn extension(&self) -> String {
        self.source_path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("")
            .to_lowercase()
    }
}

/// 脱敏结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub redacted_path: PathBuf,
    /// 脱敏后明文的 SHA-256（十六进制），在重新加密之前计算
    pub sha256: String,
    pub total_regions: usize,
    /// 实际移除的词条，排序且去重
    pub removed_terms: Vec<String>,
}

/// 格式处理器
///
/// 新增格式只需新增实现，无需修改调用方。
pub trait Redactor: Send + Sync {
    /// 处理器名称，用于日志
    fn name(&self) -> &'static str;

    /// 执行不可逆脱敏，写出 `request.output_path` 并返回结果
    fn apply_redactions(&self, request: &RedactionRequest) -> Result<RedactionResult>;
}

/// 计算字节的 SHA-256 十六进制摘要
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 计算文件内容的 SHA-256 十六进制摘要
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 生成与词条等长（按字符计）的块填充字符串
pub fn block_fill(term: &str) -> String {
    std::iter::repeat(BLOCK_CHAR)
        .take(term.chars().count())
        .collect()
}
