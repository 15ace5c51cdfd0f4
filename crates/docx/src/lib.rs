//! DOCX 脱敏
//!
//! 对正文、页眉页脚、脚注尾注中的词条做等长块字符替换，并清理文档属性。
//! 其余压缩包条目原样复制。流式文档没有固定版面，空间区域不参与处理。

mod props;
mod story;
mod xml;

pub use story::paragraph_texts;

use redact_core::{content_hash, RedactError, RedactionRequest, RedactionResult, Redactor, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// DOCX 格式处理器
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxRedactor;

impl DocxRedactor {
    pub fn new() -> Self {
        Self
    }
}

/// 是否为需要替换文字的正文部件
fn is_story_part(name: &str) -> bool {
    if !name.starts_with("word/") || !name.ends_with(".xml") || name[5..].contains('/') {
        return false;
    }
    let stem = &name[5..name.len() - 4];
    stem == "document"
        || stem == "footnotes"
        || stem == "endnotes"
        || stem.starts_with("header")
        || stem.starts_with("footer")
}

/// 词条集合：自定义词条、规则标签与匹配文本的并集
///
/// 较长的词条先替换，避免被其子串提前破坏。
fn collect_terms(request: &RedactionRequest) -> Vec<String> {
    let unique: BTreeSet<&String> = request
        .custom_terms
        .iter()
        .chain(request.patterns_applied.iter())
        .chain(request.matched_texts.iter())
        .filter(|term| !term.is_empty())
        .collect();
    let mut terms: Vec<String> = unique.into_iter().cloned().collect();
    terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
    terms
}

fn zip_error(e: zip::result::ZipError) -> RedactError {
    RedactError::Document(format!("DOCX 压缩包错误: {}", e))
}

fn read_entry(archive: &mut ZipArchive<File>, index: usize) -> Result<String> {
    let mut entry = archive.by_index(index).map_err(zip_error)?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| RedactError::Document(format!("无法读取 {}: {}", entry.name(), e)))?;
    Ok(content)
}

fn write_entry(writer: &mut ZipWriter<File>, name: &str, content: &str) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(name, options).map_err(zip_error)?;
    writer.write_all(content.as_bytes())?;
    Ok(())
}

impl Redactor for DocxRedactor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn apply_redactions(&self, request: &RedactionRequest) -> Result<RedactionResult> {
        let terms = collect_terms(request);
        let requester = request.requested_by.as_str();
        log::info!(
            "[DOCX] 开始脱敏: {} 个词条, {} 个区域（不适用）",
            terms.len(),
            request.regions.len()
        );

        let mut archive = ZipArchive::new(File::open(&request.source_path)?).map_err(zip_error)?;
        let has_core = archive.index_for_name(props::CORE_PART).is_some();
        let mut writer = ZipWriter::new(File::create(&request.output_path)?);
        let mut removed_terms: BTreeSet<String> = BTreeSet::new();

        for index in 0..archive.len() {
            let name = archive.by_index(index).map_err(zip_error)?.name().to_string();

            let rewritten = if is_story_part(&name) {
                let (xml, substituted) =
                    story::redact_story(&read_entry(&mut archive, index)?, &terms).map_err(RedactError::Document)?;
                if !substituted.is_empty() {
                    log::info!("[DOCX] {}: 替换 {} 个词条", name, substituted.len());
                }
                removed_terms.extend(substituted);
                Some(xml)
            } else if name == props::CORE_PART {
                Some(props::scrub_core(&read_entry(&mut archive, index)?, requester).map_err(RedactError::Document)?)
            } else if name == props::APP_PART {
                Some(props::scrub_app(&read_entry(&mut archive, index)?).map_err(RedactError::Document)?)
            } else if !has_core && name == props::CONTENT_TYPES_PART {
                Some(
                    props::register_core_content_type(&read_entry(&mut archive, index)?)
                        .map_err(RedactError::Document)?,
                )
            } else if !has_core && name == props::ROOT_RELS_PART {
                Some(
                    props::register_core_relationship(&read_entry(&mut archive, index)?)
                        .map_err(RedactError::Document)?,
                )
            } else {
                None
            };

            match rewritten {
                Some(content) => write_entry(&mut writer, &name, &content)?,
                None => {
                    let entry = archive.by_index(index).map_err(zip_error)?;
                    writer.raw_copy_file(entry).map_err(zip_error)?;
                }
            }
        }

        if !has_core {
            log::info!("[DOCX] 文档缺少核心属性，新建 {}", props::CORE_PART);
            write_entry(&mut writer, props::CORE_PART, &props::new_core(requester))?;
        }
        writer.finish().map_err(zip_error)?;

        let sha256 = content_hash(&request.output_path)?;
        log::info!("[DOCX] 脱敏完成: {} 个词条被移除", removed_terms.len());

        Ok(RedactionResult {
            redacted_path: request.output_path.clone(),
            sha256,
            // 区域对流式文档无效，按请求数量原样记录
            total_regions: request.regions.len(),
            removed_terms: removed_terms.into_iter().collect(),
        })
    }
}

/// 读取 DOCX 正文的段落文本
pub fn document_paragraphs(path: &Path) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(File::open(path)?).map_err(zip_error)?;
    let index = archive
        .index_for_name("word/document.xml")
        .ok_or_else(|| RedactError::Document("缺少 word/document.xml".to_string()))?;
    paragraph_texts(&read_entry(&mut archive, index)?).map_err(RedactError::Document)
}

/// 读取核心属性的值，不存在时返回 `None`
pub fn core_property(path: &Path, tag: &str) -> Result<Option<String>> {
    let mut archive = ZipArchive::new(File::open(path)?).map_err(zip_error)?;
    match archive.index_for_name(props::CORE_PART) {
        Some(index) => Ok(props::core_value(&read_entry(&mut archive, index)?, tag)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redact_core::{Principal, RedactionRegion};
    use std::path::PathBuf;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

    const CORE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Client file</dc:title><dc:subject>Litigation</dc:subject><dc:creator>Jane Doe</dc:creator><cp:keywords>private</cp:keywords><dc:description>notes</dc:description><cp:lastModifiedBy>Jane Doe</cp:lastModifiedBy><cp:revision>9</cp:revision></cp:coreProperties>"#;

    fn document_xml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        )
    }

    fn build_docx(path: &Path, body: &str, with_core: bool) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        let mut parts = vec![
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", RELS.to_string()),
            ("word/document.xml", document_xml(body)),
            (
                "word/header1.xml",
                r#"<w:hdr xmlns:w="x"><w:p><w:r><w:t>Prepared for Jane Doe</w:t></w:r></w:p></w:hdr>"#.to_string(),
            ),
            ("word/styles.xml", "<w:styles/>".to_string()),
        ];
        if with_core {
            parts.push(("docProps/core.xml", CORE.to_string()));
        }
        for (name, content) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn request(source: PathBuf, output: PathBuf, custom: &[&str], regions: Vec<RedactionRegion>) -> RedactionRequest {
        RedactionRequest::new(
            "file-1",
            source,
            output,
            regions,
            Vec::new(),
            custom.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
            Principal::new("Alice"),
        )
    }

    fn entry_text(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let index = archive.index_for_name(name).unwrap();
        read_entry(&mut archive, index).unwrap()
    }

    #[test]
    fn test_contact_paragraph_block_filled() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.docx");
        let output = dir.path().join("out.docx");
        build_docx(
            &source,
            "<w:p><w:r><w:t xml:space=\"preserve\">Contact </w:t></w:r><w:r><w:t>Jane Doe</w:t></w:r></w:p>",
            true,
        );

        let result = DocxRedactor
            .apply_redactions(&request(source, output.clone(), &["Jane Doe", "Nobody"], Vec::new()))
            .unwrap();

        let paragraphs = document_paragraphs(&output).unwrap();
        assert_eq!(paragraphs, vec!["Contact ████████".to_string()]);
        assert_eq!(result.removed_terms, vec!["Jane Doe".to_string()]);
        assert_eq!(result.sha256, content_hash(&output).unwrap());
        assert!(!entry_text(&output, "word/header1.xml").contains("Jane"));
        assert_eq!(entry_text(&output, "word/styles.xml"), "<w:styles/>");
    }

    #[test]
    fn test_metadata_scrubbed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.docx");
        let output = dir.path().join("out.docx");
        build_docx(&source, "<w:p><w:r><w:t>hello</w:t></w:r></w:p>", true);

        DocxRedactor
            .apply_redactions(&request(source, output.clone(), &[], Vec::new()))
            .unwrap();

        for tag in ["dc:creator", "dc:subject", "dc:title", "dc:description", "cp:keywords"] {
            let value = core_property(&output, tag).unwrap().unwrap_or_default();
            assert!(value.is_empty(), "{tag} = {value}");
        }
        assert_eq!(core_property(&output, "cp:lastModifiedBy").unwrap().as_deref(), Some("alice"));
        assert_eq!(core_property(&output, "cp:revision").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_missing_core_created_and_registered() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.docx");
        let output = dir.path().join("out.docx");
        build_docx(&source, "<w:p><w:r><w:t>hello</w:t></w:r></w:p>", false);

        DocxRedactor
            .apply_redactions(&request(source, output.clone(), &[], Vec::new()))
            .unwrap();

        assert_eq!(core_property(&output, "cp:lastModifiedBy").unwrap().as_deref(), Some("alice"));
        assert!(entry_text(&output, "[Content_Types].xml").contains("/docProps/core.xml"));
        assert!(entry_text(&output, "_rels/.rels").contains("docProps/core.xml"));
    }

    #[test]
    fn test_regions_recorded_but_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.docx");
        let output = dir.path().join("out.docx");
        build_docx(&source, "<w:p><w:r><w:t>hello</w:t></w:r></w:p>", true);

        let regions = vec![RedactionRegion { page: 0, x: 0.0, y: 0.0, w: 10.0, h: 10.0 }; 3];
        let result = DocxRedactor
            .apply_redactions(&request(source, output.clone(), &[], regions))
            .unwrap();
        assert_eq!(result.total_regions, 3);
        assert!(result.removed_terms.is_empty());
        assert_eq!(document_paragraphs(&output).unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_terms_longest_first() {
        let request = RedactionRequest::new(
            "f",
            "a.docx",
            "b.docx",
            Vec::new(),
            vec!["Doe".into()],
            vec!["Jane Doe".into(), "".into()],
            vec!["Doe".into()],
            Principal::new("alice"),
        );
        assert_eq!(collect_terms(&request), vec!["Jane Doe".to_string(), "Doe".to_string()]);
        assert!(is_story_part("word/footer2.xml"));
        assert!(!is_story_part("word/theme/theme1.xml"));
        assert!(!is_story_part("word/styles.xml"));
    }
}
