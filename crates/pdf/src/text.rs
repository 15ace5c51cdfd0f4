use super::search::MAX_FORM_DEPTH;
use super::types::MarkRect;
use super::utils::{get_form, get_xobjects};
use super::walker::{multiply, ContentWalker, GlyphBox, Matrix, Painted, ResourceScope, XObjectKind, IDENTITY};
use lopdf::{
    content::{Content, Operation},
    Dictionary, Document, Object, ObjectId, Stream, StringFormat,
};
use std::collections::HashSet;

/// 内容流的脱敏结果
#[derive(Debug, Default)]
pub struct StreamEdit {
    pub content: Vec<u8>,
    /// 被删除的字形数
    pub removed_glyphs: usize,
    /// 绘制被移除的 XObject 名称
    pub dropped_xobjects: HashSet<Vec<u8>>,
    /// 仍被绘制的 XObject 名称
    pub drawn_xobjects: HashSet<Vec<u8>>,
    /// 改写后的表单副本：资源名与对象 ID
    pub new_forms: Vec<(Vec<u8>, ObjectId)>,
    /// 已从资源中摘除的 XObject 对象
    pub dropped_ids: Vec<ObjectId>,
}

impl StreamEdit {
    fn changed(&self) -> bool {
        self.removed_glyphs > 0 || !self.dropped_xobjects.is_empty() || !self.new_forms.is_empty()
    }
}

enum FormOutcome {
    Unchanged,
    Copied {
        id: ObjectId,
        removed_glyphs: usize,
        dropped_ids: Vec<ObjectId>,
    },
}

/// 检查字形是否在任何标记区域内（以字形中心为准）
fn glyph_in_mark(glyph: &GlyphBox, marks: &[MarkRect]) -> bool {
    let (cx, cy) = glyph.rect.center();
    marks.iter().any(|m| m.contains_point(cx, cy))
}

/// 处理页面内容流：删除标记区域内的文字和 XObject 绘制，再覆盖黑框
///
/// 与标记相交的表单 XObject 会递归处理，改写结果存为新的表单对象，
/// 原表单保持不变，其它位置对它的引用不受影响。
pub fn redact_page_content(
    doc: &mut Document,
    content: Content,
    scope: &ResourceScope,
    marks: &[MarkRect],
) -> Result<StreamEdit, String> {
    let mut edit = StreamEdit::default();
    let mut operations: Vec<Operation> = Vec::with_capacity(content.operations.len() + 8);

    // 原内容放在独立的图形状态中，避免未配对的 cm 影响黑框位置
    operations.push(Operation::new("q", vec![]));
    operations.extend(rewrite_operations(doc, content, scope, IDENTITY, marks, &mut Vec::new(), &mut edit));
    operations.push(Operation::new("Q", vec![]));
    push_black_overlay(&mut operations, marks);

    edit.content = Content { operations }.encode().map_err(|e| e.to_string())?;
    Ok(edit)
}

fn rewrite_operations(
    doc: &mut Document,
    content: Content,
    scope: &ResourceScope,
    ctm: Matrix,
    marks: &[MarkRect],
    forms: &mut Vec<ObjectId>,
    edit: &mut StreamEdit,
) -> Vec<Operation> {
    let mut walker = ContentWalker::with_ctm(scope, ctm);
    let mut operations = Vec::with_capacity(content.operations.len());

    for op in content.operations {
        match walker.step(&op) {
            Some(Painted::Text(groups)) => {
                let (rewritten, removed) = redact_text_op(op, &groups, marks);
                edit.removed_glyphs += removed;
                operations.extend(rewritten);
            }
            Some(Painted::XObject { name, rect, kind, ctm: placed }) => {
                if !marks.iter().any(|m| m.intersects(&rect)) {
                    edit.drawn_xobjects.insert(name);
                    operations.push(op);
                    continue;
                }
                let XObjectKind::Form { id, matrix, .. } = kind else {
                    log::info!(
                        "[PDF] 移除与标记相交的 XObject: {}",
                        String::from_utf8_lossy(&name)
                    );
                    edit.dropped_xobjects.insert(name);
                    continue;
                };
                match redact_form(doc, id, multiply(&matrix, &placed), scope, marks, forms) {
                    Ok(FormOutcome::Unchanged) => {
                        edit.drawn_xobjects.insert(name);
                        operations.push(op);
                    }
                    Ok(FormOutcome::Copied {
                        id: copy_id,
                        removed_glyphs,
                        dropped_ids,
                    }) => {
                        let copy_name = copy_name(scope, edit);
                        log::info!(
                            "[PDF] 表单 {} 改写为 {}，删除 {} 个字形",
                            String::from_utf8_lossy(&name),
                            String::from_utf8_lossy(&copy_name),
                            removed_glyphs
                        );
                        edit.removed_glyphs += removed_glyphs;
                        edit.dropped_ids.extend(dropped_ids);
                        edit.dropped_xobjects.insert(name);
                        edit.new_forms.push((copy_name.clone(), copy_id));
                        operations.push(Operation::new("Do", vec![Object::Name(copy_name)]));
                    }
                    Err(e) => {
                        log::warn!(
                            "[PDF] 表单 {} 无法改写，整体移除: {}",
                            String::from_utf8_lossy(&name),
                            e
                        );
                        edit.dropped_xobjects.insert(name);
                    }
                }
            }
            None => operations.push(op),
        }
    }
    operations
}

/// 改写表单内容并另存为新对象；`ctm` 为表单空间到页面空间的变换
fn redact_form(
    doc: &mut Document,
    id: ObjectId,
    ctm: Matrix,
    parent: &ResourceScope,
    marks: &[MarkRect],
    forms: &mut Vec<ObjectId>,
) -> Result<FormOutcome, String> {
    if forms.contains(&id) || forms.len() >= MAX_FORM_DEPTH {
        return Err("嵌套过深或循环引用".to_string());
    }
    let form = get_form(doc, id).ok_or_else(|| format!("无法读取表单 {:?}", id))?;
    let content = Content::decode(&form.content).map_err(|e| e.to_string())?;

    // 表单没有自己的资源时沿用上级资源
    let own_scope;
    let scope = match &form.resources {
        Some(resources) => {
            own_scope = ResourceScope::load(doc, Some(resources));
            &own_scope
        }
        None => parent,
    };

    let mut edit = StreamEdit::default();
    forms.push(id);
    let operations = rewrite_operations(doc, content, scope, ctm, marks, forms, &mut edit);
    forms.pop();

    if !edit.changed() {
        return Ok(FormOutcome::Unchanged);
    }

    let data = Content { operations }.encode().map_err(|e| e.to_string())?;
    let mut dict = form.dict;
    for key in [b"Length".as_slice(), b"Filter".as_slice(), b"DecodeParms".as_slice()] {
        dict.remove(key);
    }
    if let Some(resources) = rebuild_resources(doc, scope.dict.as_ref(), &mut edit) {
        dict.set("Resources", Object::Dictionary(resources));
    }

    Ok(FormOutcome::Copied {
        id: doc.add_object(Stream::new(dict, data)),
        removed_glyphs: edit.removed_glyphs,
        dropped_ids: edit.dropped_ids,
    })
}

/// 表单副本的资源名，避开已有名称
fn copy_name(scope: &ResourceScope, edit: &StreamEdit) -> Vec<u8> {
    let mut index = edit.new_forms.len();
    loop {
        let name = format!("RdxFm{}", index).into_bytes();
        let taken = scope.xobjects.contains_key(&name) || edit.new_forms.iter().any(|(existing, _)| *existing == name);
        if !taken {
            return name;
        }
        index += 1;
    }
}

/// 按编辑结果重建资源字典：摘除不再绘制的 XObject，登记表单副本
///
/// 没有需要修改的内容时返回 None。
pub fn rebuild_resources(doc: &Document, resources: Option<&Dictionary>, edit: &mut StreamEdit) -> Option<Dictionary> {
    let unused: Vec<Vec<u8>> = edit
        .dropped_xobjects
        .iter()
        .filter(|name| !edit.drawn_xobjects.contains(*name))
        .cloned()
        .collect();
    if unused.is_empty() && edit.new_forms.is_empty() {
        return None;
    }

    let mut resources = resources.cloned().unwrap_or_else(Dictionary::new);
    let mut xobjects = get_xobjects(doc, &resources).unwrap_or_else(Dictionary::new);
    for name in &unused {
        if let Some(Object::Reference(id)) = xobjects.remove(name) {
            edit.dropped_ids.push(id);
        }
    }
    for (name, id) in &edit.new_forms {
        xobjects.set(name.clone(), Object::Reference(*id));
    }
    resources.set("XObject", Object::Dictionary(xobjects));
    Some(resources)
}

/// 重写文本操作：标记内的字形从字符串中删除，改为 TJ 位移，后续字形位置不变
fn redact_text_op(op: Operation, groups: &[Vec<GlyphBox>], marks: &[MarkRect]) -> (Vec<Operation>, usize) {
    let removed = groups.iter().flatten().filter(|g| glyph_in_mark(g, marks)).count();
    if removed == 0 {
        return (vec![op], 0);
    }

    let mut rewritten = Vec::new();
    let mut items = Vec::new();
    match op.operator.as_str() {
        "Tj" | "'" | "\"" => {
            let index = if op.operator == "\"" { 2 } else { 0 };
            if op.operator == "\"" {
                if let Some(aw) = op.operands.first() {
                    rewritten.push(Operation::new("Tw", vec![aw.clone()]));
                }
                if let Some(ac) = op.operands.get(1) {
                    rewritten.push(Operation::new("Tc", vec![ac.clone()]));
                }
            }
            if op.operator != "Tj" {
                rewritten.push(Operation::new("T*", vec![]));
            }
            if let (Some(Object::String(bytes, format)), Some(glyphs)) = (op.operands.get(index), groups.first()) {
                strip_glyphs(bytes, *format, glyphs, marks, &mut items);
            }
        }
        "TJ" => {
            if let Some(Object::Array(array)) = op.operands.first() {
                let mut group_iter = groups.iter();
                for item in array {
                    match item {
                        Object::String(bytes, format) => {
                            if let Some(glyphs) = group_iter.next() {
                                strip_glyphs(bytes, *format, glyphs, marks, &mut items);
                            }
                        }
                        other => items.push(other.clone()),
                    }
                }
            }
        }
        _ => return (vec![op], 0),
    }

    log::debug!("[PDF] {} 操作删除 {} 个字形", op.operator, removed);
    rewritten.push(Operation::new("TJ", vec![Object::Array(items)]));
    (rewritten, removed)
}

/// 拆分字符串：保留标记外的字形，标记内的字形换成等距的 TJ 数值
fn strip_glyphs(bytes: &[u8], format: StringFormat, glyphs: &[GlyphBox], marks: &[MarkRect], items: &mut Vec<Object>) {
    let mut run: Vec<u8> = Vec::new();
    let mut shift = 0.0f32;
    for glyph in glyphs {
        if glyph_in_mark(glyph, marks) {
            if !run.is_empty() {
                items.push(Object::String(std::mem::take(&mut run), format));
            }
            // 字号为 0 的字形不可见，位移无法用 TJ 表示
            shift += glyph.tj_adjust.unwrap_or(0.0);
        } else {
            if shift != 0.0 {
                items.push(Object::Real(shift));
                shift = 0.0;
            }
            if let Some(slice) = bytes.get(glyph.span.clone()) {
                run.extend_from_slice(slice);
            }
        }
    }
    if !run.is_empty() {
        items.push(Object::String(run, format));
    }
    if shift != 0.0 {
        items.push(Object::Real(shift));
    }
}

/// 在内容流末尾追加黑框
fn push_black_overlay(operations: &mut Vec<Operation>, marks: &[MarkRect]) {
    if marks.is_empty() {
        return;
    }

    operations.push(Operation::new("q", vec![]));
    operations.push(Operation::new(
        "rg",
        vec![Object::Real(0.0), Object::Real(0.0), Object::Real(0.0)],
    ));
    // 描边也设为黑色，以防某些阅读器行为不一致
    operations.push(Operation::new(
        "RG",
        vec![Object::Real(0.0), Object::Real(0.0), Object::Real(0.0)],
    ));

    for rect in marks {
        log::debug!(
            "[PDF] 绘制黑框: x={}, y={}, w={}, h={}",
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );
        operations.push(Operation::new(
            "re",
            vec![
                Object::Real(rect.x),
                Object::Real(rect.y),
                Object::Real(rect.width),
                Object::Real(rect.height),
            ],
        ));
        operations.push(Operation::new("f", vec![]));
    }

    operations.push(Operation::new("Q", vec![]));
}
