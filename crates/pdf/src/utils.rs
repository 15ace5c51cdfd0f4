use super::types::MarkRect;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use redact_core::RedactionRegion;

/// 沿 Parent 链查找可继承属性的最大深度
const MAX_INHERIT_DEPTH: usize = 32;

/// 解析间接引用
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// 解析为字典（支持间接引用）
pub fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// 查找页面属性，页面自身没有时沿 Parent 链继承
fn inherited_attr<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = match doc.get_object(page_id) {
        Ok(Object::Dictionary(dict)) => dict,
        _ => return None,
    };
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        dict = match dict.get(b"Parent") {
            Ok(parent) => resolve_dict(doc, parent)?,
            Err(_) => return None,
        };
    }
    None
}

/// 从数组对象中提取边界框坐标
pub(crate) fn extract_box_values(arr: &[Object]) -> Option<(f32, f32, f32, f32)> {
    let values: Vec<f32> = arr.iter().filter_map(get_number).collect();
    if values.len() == 4 {
        Some((
            values[0].min(values[2]),
            values[1].min(values[3]),
            values[0].max(values[2]),
            values[1].max(values[3]),
        ))
    } else {
        None
    }
}

/// 获取页面的可见边界框（优先使用 CropBox，否则使用 MediaBox）
///
/// 返回 (llx, lly, urx, ury)
pub fn get_visible_box(doc: &Document, page_id: ObjectId) -> (f32, f32, f32, f32) {
    for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
        if let Some(Object::Array(arr)) = inherited_attr(doc, page_id, key).and_then(|o| resolve(doc, o)) {
            if let Some(values) = extract_box_values(arr) {
                return values;
            }
        }
    }
    log::warn!("[PDF] 页面 {:?} 缺少 MediaBox，使用默认 Letter 尺寸", page_id);
    (0.0, 0.0, 612.0, 792.0)
}

/// 将区域（左上角原点，单位 point）转换为 PDF 用户空间矩形
pub fn region_to_user_space(region: &RedactionRegion, visible_box: (f32, f32, f32, f32)) -> MarkRect {
    let (llx, _lly, _urx, ury) = visible_box;
    let (x0, y0, x1, y1) = region.corners();
    MarkRect::from_corners(
        llx + x0 as f32,
        ury - y1 as f32,
        llx + x1 as f32,
        ury - y0 as f32,
    )
}

/// 从 Object 获取数值
pub fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// 获取流内容（支持压缩和未压缩的流）
pub fn get_stream_content(stream: &Stream) -> Vec<u8> {
    match stream.decompressed_content() {
        Ok(data) => data,
        Err(_) => stream.content.clone(),
    }
}

/// 获取页面的内容流数据（多个流按顺序拼接）
pub fn get_page_content(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>, String> {
    let page = doc.get_object(page_id).map_err(|e| e.to_string())?;

    let dict = match page {
        Object::Dictionary(dict) => dict,
        _ => return Err("页面对象不是字典".to_string()),
    };

    let contents = match dict.get(b"Contents") {
        Ok(contents) => contents,
        // 没有内容流的空白页
        Err(_) => return Ok(Vec::new()),
    };

    match resolve(doc, contents) {
        Some(Object::Stream(stream)) => Ok(get_stream_content(stream)),
        Some(Object::Array(arr)) => {
            let mut all_content = Vec::new();
            for item in arr {
                if let Some(Object::Stream(stream)) = resolve(doc, item) {
                    all_content.extend(get_stream_content(stream));
                    all_content.push(b'\n');
                }
            }
            Ok(all_content)
        }
        _ => Err("无法获取页面内容".to_string()),
    }
}

/// 获取页面资源字典的副本（含继承）
pub fn get_page_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    inherited_attr(doc, page_id, b"Resources")
        .and_then(|o| resolve_dict(doc, o))
        .cloned()
}

/// 获取资源字典中 XObject 子字典的副本
pub fn get_xobjects(doc: &Document, resources: &Dictionary) -> Option<Dictionary> {
    resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .cloned()
}

/// 表单 XObject 的字典、内容与自身资源；不是表单时返回 None
pub struct FormXObject {
    pub dict: Dictionary,
    pub content: Vec<u8>,
    pub resources: Option<Dictionary>,
}

pub fn get_form(doc: &Document, id: ObjectId) -> Option<FormXObject> {
    let Ok(Object::Stream(stream)) = doc.get_object(id) else {
        return None;
    };
    match stream.dict.get(b"Subtype") {
        Ok(Object::Name(subtype)) if subtype.as_slice() == b"Form" => {}
        _ => return None,
    }
    let resources = stream
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .cloned();
    Some(FormXObject {
        dict: stream.dict.clone(),
        content: get_stream_content(stream),
        resources,
    })
}
