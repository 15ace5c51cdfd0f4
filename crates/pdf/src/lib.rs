//! PDF 脱敏
//!
//! 逐页搜索文本层并登记标记区域，然后对标记做破坏性处理：
//! 删除覆盖的字形、移除相交的图片以及注释，相交的表单 XObject 递归改写为副本，
//! 最后绘制黑框。保存时清理孤立对象并完整重写文件，被删除的内容不会残留在输出中。

mod annotations;
mod fonts;
mod search;
mod text;
mod types;
mod utils;
mod walker;

pub use types::{MarkRect, TextHit};

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use redact_core::{content_hash, RedactError, RedactionRequest, RedactionResult, Redactor, Result};
use search::{PageText, MAX_FORM_DEPTH};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use utils::{get_form, get_page_content, get_page_resources, get_visible_box, get_xobjects, region_to_user_space};
use walker::ResourceScope;

/// PDF 格式处理器
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfRedactor;

impl PdfRedactor {
    pub fn new() -> Self {
        Self
    }
}

impl Redactor for PdfRedactor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn apply_redactions(&self, request: &RedactionRequest) -> Result<RedactionResult> {
        let mut doc = Document::load(&request.source_path)
            .map_err(|e| RedactError::Document(format!("无法加载 PDF: {}", e)))?;

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let page_count = page_ids.len();
        log::info!(
            "[PDF] 开始脱敏: {} 页, {} 个区域, {} 个词条",
            page_count,
            request.regions.len(),
            request.matched_texts.len()
        );

        // 页码 -> 标记区域
        let mut marks_by_page: BTreeMap<usize, Vec<MarkRect>> = BTreeMap::new();
        let mut total_regions = 0;
        for region in &request.regions {
            if !region.in_bounds(page_count) {
                log::warn!(
                    "[PDF] 跳过越界区域: 页 {} (共 {} 页)",
                    region.page,
                    page_count
                );
                continue;
            }
            let page_index = region.page as usize;
            let visible_box = get_visible_box(&doc, page_ids[page_index]);
            marks_by_page
                .entry(page_index)
                .or_default()
                .push(region_to_user_space(region, visible_box));
            total_regions += 1;
        }

        let mut removed_terms: BTreeSet<String> = BTreeSet::new();
        let mut dropped_ids: BTreeSet<ObjectId> = BTreeSet::new();
        for (page_index, page_id) in page_ids.iter().enumerate() {
            let marks = marks_by_page.entry(page_index).or_default();
            let dropped = redact_page(&mut doc, *page_id, &request.matched_texts, marks, &mut removed_terms)
                .map_err(|e| RedactError::Document(format!("页 {} 脱敏失败: {}", page_index + 1, e)))?;
            dropped_ids.extend(dropped);
        }

        // 任何页面都不再绘制的 XObject 连同所有引用一起删除
        if !dropped_ids.is_empty() {
            let drawn = drawn_xobject_ids(&doc, &page_ids);
            for id in dropped_ids {
                if !drawn.contains(&id) {
                    doc.delete_object(id);
                    log::info!("[PDF] 已删除 XObject 数据 {:?}", id);
                }
            }
        }

        save_compacted(&mut doc, &request.output_path)?;
        let sha256 = content_hash(&request.output_path)?;

        log::info!(
            "[PDF] 脱敏完成: {} 个区域, {} 个词条被移除",
            total_regions,
            removed_terms.len()
        );

        Ok(RedactionResult {
            redacted_path: request.output_path.clone(),
            sha256,
            total_regions,
            removed_terms: removed_terms.into_iter().collect(),
        })
    }
}

/// 读取页面内容流与资源
fn load_page(doc: &Document, page_id: ObjectId) -> std::result::Result<(Content, ResourceScope), String> {
    let content_data = get_page_content(doc, page_id)?;
    let content = Content::decode(&content_data).map_err(|e| e.to_string())?;
    let resources = get_page_resources(doc, page_id);
    Ok((content, ResourceScope::load(doc, resources.as_ref())))
}

/// 处理单页：先搜索词条扩充标记，再对所有标记做破坏性处理
///
/// 返回从本页资源中摘除的 XObject 对象。
fn redact_page(
    doc: &mut Document,
    page_id: ObjectId,
    terms: &[String],
    marks: &mut Vec<MarkRect>,
    removed_terms: &mut BTreeSet<String>,
) -> std::result::Result<Vec<ObjectId>, String> {
    if terms.is_empty() && marks.is_empty() {
        return Ok(Vec::new());
    }

    let (content, scope) = load_page(doc, page_id)?;

    if !terms.is_empty() {
        let page_text = PageText::new(doc, &content, &scope);
        for term in terms {
            let hits = page_text.find(term);
            if !hits.is_empty() {
                log::debug!("[PDF] 页面 {:?} 命中 {} 处", page_id, hits.len());
                removed_terms.insert(term.clone());
                marks.extend(hits);
            }
        }
    }

    if marks.is_empty() {
        return Ok(Vec::new());
    }

    let mut edit = text::redact_page_content(doc, content, &scope, marks)?;
    log::info!(
        "[PDF] 页面 {:?}: {} 个标记, 删除 {} 个字形, 移除 {} 个 XObject, 改写 {} 个表单",
        page_id,
        marks.len(),
        edit.removed_glyphs,
        edit.dropped_xobjects.len(),
        edit.new_forms.len()
    );

    let stream_id = doc.add_object(Stream::new(Dictionary::new(), std::mem::take(&mut edit.content)));
    if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
        dict.set("Contents", Object::Reference(stream_id));
    }

    // 资源写回页面自身，继承来的资源字典保持不变
    if let Some(resources) = text::rebuild_resources(doc, scope.dict.as_ref(), &mut edit) {
        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
            dict.set("Resources", Object::Dictionary(resources));
        }
    }

    annotations::redact_annotations(doc, page_id, marks)?;
    Ok(edit.dropped_ids)
}

/// 收集所有页面实际绘制的 XObject 对象（含表单内嵌套绘制的）
fn drawn_xobject_ids(doc: &Document, page_ids: &[ObjectId]) -> HashSet<ObjectId> {
    let mut drawn = HashSet::new();
    for page_id in page_ids {
        let resources = get_page_resources(doc, *page_id);
        match get_page_content(doc, *page_id) {
            Ok(data) => collect_drawn(doc, &data, resources.as_ref(), &mut drawn, 0),
            // 无法确认时按仍在使用处理
            Err(_) => {
                if let Some(xobjects) = resources.as_ref().and_then(|res| get_xobjects(doc, res)) {
                    drawn.extend(references_in(&xobjects));
                }
            }
        }
    }
    drawn
}

fn references_in(dict: &Dictionary) -> Vec<ObjectId> {
    dict.iter()
        .filter_map(|(_, obj)| match obj {
            Object::Reference(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn collect_drawn(
    doc: &Document,
    data: &[u8],
    resources: Option<&Dictionary>,
    drawn: &mut HashSet<ObjectId>,
    depth: usize,
) {
    let Some(xobjects) = resources.and_then(|res| get_xobjects(doc, res)) else {
        return;
    };
    let content = match Content::decode(data) {
        Ok(content) => content,
        Err(_) => {
            drawn.extend(references_in(&xobjects));
            return;
        }
    };
    for op in &content.operations {
        if op.operator != "Do" {
            continue;
        }
        let Some(Object::Name(name)) = op.operands.first() else {
            continue;
        };
        let Ok(Object::Reference(id)) = xobjects.get(name) else {
            continue;
        };
        if !drawn.insert(*id) || depth >= MAX_FORM_DEPTH {
            continue;
        }
        if let Some(form) = get_form(doc, *id) {
            let nested = form.resources.as_ref().or(resources);
            collect_drawn(doc, &form.content, nested, drawn, depth + 1);
        }
    }
}

/// 清理孤立对象、压缩并完整重写文件
fn save_compacted(doc: &mut Document, output_path: &Path) -> Result<()> {
    let pruned = doc.prune_objects();
    let empty = doc.delete_zero_length_streams();
    doc.renumber_objects();
    doc.compress();
    log::debug!(
        "[PDF] 清理 {} 个孤立对象, {} 个空流",
        pruned.len(),
        empty.len()
    );

    doc.save(output_path)
        .map_err(|e| RedactError::Document(format!("保存失败: {}", e)))?;
    Ok(())
}

/// 在 PDF 文本层中查找词条，返回每次出现的页码与矩形
///
/// 表单 XObject 内绘制的文字同样参与搜索。
pub fn find_text(path: &Path, term: &str) -> Result<Vec<TextHit>> {
    let doc = Document::load(path).map_err(|e| RedactError::Document(format!("无法加载 PDF: {}", e)))?;
    let mut hits = Vec::new();
    for (page_index, page_id) in doc.get_pages().into_values().enumerate() {
        let (content, scope) = load_page(&doc, page_id).map_err(RedactError::Document)?;
        let page_text = PageText::new(&doc, &content, &scope);
        hits.extend(
            page_text
                .find(term)
                .into_iter()
                .map(|rect| TextHit { page: page_index, rect }),
        );
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::dictionary;
    use redact_core::{Principal, RedactionRegion};
    use std::path::PathBuf;

    fn text_ops(lines: &[(i64, i64, &str)]) -> Vec<Operation> {
        let mut operations = Vec::new();
        for (x, y, text) in lines {
            operations.extend(vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(12)]),
                Operation::new("Td", vec![Object::Integer(*x), Object::Integer(*y)]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]);
        }
        operations
    }

    fn helvetica() -> Dictionary {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }
    }

    /// 每个字形宽 1000 的字体
    fn wide_font() -> Dictionary {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "WideSans",
            "FirstChar" => 32,
            "LastChar" => 126,
            "Widths" => vec![Object::Integer(1000); 95],
        }
    }

    /// 单页文档，资源放在 Pages 节点上由页面继承
    fn save_single_page(mut doc: Document, pages_id: ObjectId, resources: Dictionary, operations: Vec<Operation>, path: &Path) {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
                "Resources" => resources,
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(612), Object::Integer(792)],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    /// 生成单页 PDF：每行文字一个 (x, y, text)，可选放置一张 2x2 灰度图片
    fn build_pdf(path: &Path, lines: &[(i64, i64, &str)], image_at: Option<(i64, i64, i64)>) {
        build_pdf_with_font(path, helvetica(), lines, image_at);
    }

    fn build_pdf_with_font(
        path: &Path,
        font: Dictionary,
        lines: &[(i64, i64, &str)],
        image_at: Option<(i64, i64, i64)>,
    ) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(font);
        let mut operations = text_ops(lines);

        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        if let Some((x, y, size)) = image_at {
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2,
                    "Height" => 2,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                vec![0x10, 0x20, 0x30, 0x40],
            ));
            resources.set("XObject", dictionary! { "Im0" => image_id });
            operations.extend(vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(size),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(size),
                        Object::Integer(x),
                        Object::Integer(y),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ]);
        }

        save_single_page(doc, pages_id, resources, operations, path);
    }

    /// 文字画在表单 Fm0 中，表单 Matrix 下移 100pt，页面只执行 `/Fm0 Do`
    fn build_form_pdf(path: &Path, lines: &[(i64, i64, &str)]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(helvetica());
        let form_content = Content { operations: text_ops(lines) };
        let form_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(612), Object::Integer(792)],
                "Matrix" => vec![
                    Object::Integer(1), Object::Integer(0), Object::Integer(0),
                    Object::Integer(1), Object::Integer(0), Object::Integer(-100),
                ],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            },
            form_content.encode().unwrap(),
        ));
        let resources = dictionary! {
            "XObject" => dictionary! { "Fm0" => form_id },
        };
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new("Do", vec!["Fm0".into()]),
            Operation::new("Q", vec![]),
        ];
        save_single_page(doc, pages_id, resources, operations, path);
    }

    fn request(source: PathBuf, output: PathBuf, regions: Vec<RedactionRegion>, matched: &[&str]) -> RedactionRequest {
        RedactionRequest::new(
            "file-1",
            source,
            output,
            regions,
            Vec::new(),
            Vec::new(),
            matched.iter().map(|s| s.to_string()).collect(),
            Principal::new("alice"),
        )
    }

    /// 在所有流（解压后）中查找字节序列
    fn raw_contains(path: &Path, needle: &[u8]) -> bool {
        let doc = Document::load(path).unwrap();
        doc.objects.values().any(|obj| match obj {
            Object::Stream(stream) => utils::get_stream_content(stream)
                .windows(needle.len())
                .any(|w| w == needle),
            _ => false,
        })
    }

    #[test]
    fn test_ssn_removed_and_not_found_again() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        build_pdf(&source, &[(72, 700, "SSN: 123-45-6789"), (72, 680, "Name: Alice")], None);
        assert_eq!(find_text(&source, "123-45-6789").unwrap().len(), 1);

        let result = PdfRedactor
            .apply_redactions(&request(source, output.clone(), Vec::new(), &["123-45-6789", "999-99-9999"]))
            .unwrap();

        assert_eq!(result.removed_terms, vec!["123-45-6789".to_string()]);
        assert_eq!(result.total_regions, 0);
        assert_eq!(result.sha256, content_hash(&output).unwrap());
        assert!(find_text(&output, "123-45-6789").unwrap().is_empty());
        assert!(!raw_contains(&output, b"6789"));
        // 未命中的文字保持不变
        assert_eq!(find_text(&output, "Name: Alice").unwrap().len(), 1);
        assert_eq!(find_text(&output, "SSN:").unwrap().len(), 1);
    }

    #[test]
    fn test_second_pass_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let first = dir.path().join("first.pdf");
        let second = dir.path().join("second.pdf");
        build_pdf(&source, &[(72, 700, "Account 4111111111111111")], None);

        let result = PdfRedactor
            .apply_redactions(&request(source, first.clone(), Vec::new(), &["4111111111111111"]))
            .unwrap();
        assert_eq!(result.removed_terms.len(), 1);

        let result = PdfRedactor
            .apply_redactions(&request(first, second, Vec::new(), &["4111111111111111"]))
            .unwrap();
        assert!(result.removed_terms.is_empty());
    }

    #[test]
    fn test_out_of_range_region_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        build_pdf(&source, &[(72, 700, "hello")], None);

        let regions = vec![
            RedactionRegion { page: 5, x: 0.0, y: 0.0, w: 100.0, h: 100.0 },
            RedactionRegion { page: 0, x: 500.0, y: 500.0, w: 10.0, h: 10.0 },
        ];
        let result = PdfRedactor
            .apply_redactions(&request(source, output.clone(), regions, &[]))
            .unwrap();
        assert_eq!(result.total_regions, 1);
        assert!(result.removed_terms.is_empty());
        assert_eq!(find_text(&output, "hello").unwrap().len(), 1);
    }

    #[test]
    fn test_region_removes_covered_text() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        // 基线 y=700 -> 距顶部 92pt
        build_pdf(&source, &[(72, 700, "secret"), (72, 600, "public")], None);

        let regions = vec![RedactionRegion { page: 0, x: 60.0, y: 80.0, w: 200.0, h: 20.0 }];
        PdfRedactor
            .apply_redactions(&request(source, output.clone(), regions, &[]))
            .unwrap();
        assert!(find_text(&output, "secret").unwrap().is_empty());
        assert!(!raw_contains(&output, b"secret"));
        assert_eq!(find_text(&output, "public").unwrap().len(), 1);
    }

    #[test]
    fn test_image_under_region_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        build_pdf(&source, &[(72, 700, "photo")], Some((100, 100, 50)));

        // 图片位于用户空间 (100,100)-(150,150)，即距顶部 642~692
        let regions = vec![RedactionRegion { page: 0, x: 110.0, y: 650.0, w: 20.0, h: 20.0 }];
        PdfRedactor
            .apply_redactions(&request(source, output.clone(), regions, &[]))
            .unwrap();

        let doc = Document::load(&output).unwrap();
        let has_image = doc.objects.values().any(|obj| match obj {
            Object::Stream(stream) => matches!(
                stream.dict.get(b"Subtype"),
                Ok(Object::Name(name)) if name.as_slice() == b"Image"
            ),
            _ => false,
        });
        assert!(!has_image);
        assert!(!raw_contains(&output, b"/Im0 Do"));
    }

    #[test]
    fn test_region_uses_font_widths() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        // 每个字形 12pt 宽，"JOHNSMITH" 从 x=144 到 x=252
        build_pdf_with_font(&source, wide_font(), &[(72, 700, "Name: JOHNSMITH")], None);

        let hits = find_text(&source, "JOHNSMITH").unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].rect.x - 144.0).abs() < 1e-3);
        assert!((hits[0].rect.width - 108.0).abs() < 1e-3);

        let regions = vec![RedactionRegion { page: 0, x: 144.0, y: 80.0, w: 108.0, h: 16.0 }];
        PdfRedactor
            .apply_redactions(&request(source, output.clone(), regions, &[]))
            .unwrap();

        assert!(find_text(&output, "JOHNS").unwrap().is_empty());
        assert!(find_text(&output, "H").unwrap().is_empty());
        assert!(!raw_contains(&output, b"JOHN"));
        let kept = find_text(&output, "Name:").unwrap();
        assert_eq!(kept.len(), 1);
        assert!((kept[0].rect.x - 72.0).abs() < 1e-3);
    }

    #[test]
    fn test_term_inside_form_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        build_form_pdf(&source, &[(72, 700, "Name: JOHNSMITH"), (72, 650, "Dept: Sales")]);

        // 表单 Matrix 生效：基线在页面 y=600
        let hits = find_text(&source, "JOHNSMITH").unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].rect.y - (600.0 - 0.2 * 12.0)).abs() < 1e-3);

        let result = PdfRedactor
            .apply_redactions(&request(source, output.clone(), Vec::new(), &["JOHNSMITH"]))
            .unwrap();

        assert_eq!(result.removed_terms, vec!["JOHNSMITH".to_string()]);
        assert!(find_text(&output, "JOHNSMITH").unwrap().is_empty());
        assert!(!raw_contains(&output, b"JOHN"));
        assert_eq!(find_text(&output, "Name:").unwrap().len(), 1);
        assert_eq!(find_text(&output, "Dept: Sales").unwrap().len(), 1);
    }

    #[test]
    fn test_region_over_form_keeps_rest_of_form() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        build_form_pdf(&source, &[(72, 700, "secret"), (72, 650, "public")]);

        // 页面上 "secret" 基线 y=600，距顶部 192pt
        let regions = vec![RedactionRegion { page: 0, x: 60.0, y: 180.0, w: 200.0, h: 20.0 }];
        PdfRedactor
            .apply_redactions(&request(source, output.clone(), regions, &[]))
            .unwrap();

        assert!(!raw_contains(&output, b"secret"));
        assert_eq!(find_text(&output, "public").unwrap().len(), 1);
    }
}
