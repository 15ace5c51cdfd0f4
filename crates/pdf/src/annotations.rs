//! 注释处理模块
//!
//! 注释（Annots）不在内容流中，黑框无法覆盖其外观流，与标记相交的注释整体移除。

use super::types::MarkRect;
use super::utils::{extract_box_values, resolve};
use lopdf::{Dictionary, Document, Object, ObjectId};

/// 移除与标记区域相交的注释，返回移除数量
pub fn redact_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    marks: &[MarkRect],
) -> Result<usize, String> {
    if marks.is_empty() {
        return Ok(0);
    }

    let annot_ids: Vec<ObjectId> = match doc.get_object(page_id) {
        Ok(Object::Dictionary(page_dict)) => match page_dict.get(b"Annots") {
            Ok(annots_ref) => get_annot_ids(doc, annots_ref),
            Err(_) => Vec::new(),
        },
        _ => return Err(format!("无法获取页面 {:?}", page_id)),
    };

    if annot_ids.is_empty() {
        return Ok(0);
    }

    // 找出需要移除的注释
    let annots_to_remove: Vec<ObjectId> = annot_ids
        .into_iter()
        .filter(|annot_id| match doc.get_object(*annot_id) {
            Ok(Object::Dictionary(annot_dict)) => get_annot_rect(annot_dict)
                .map(|rect| marks.iter().any(|mark| mark.intersects(&rect)))
                .unwrap_or(false),
            _ => false,
        })
        .collect();

    if annots_to_remove.is_empty() {
        return Ok(0);
    }

    for annot_id in &annots_to_remove {
        let subtype = match doc.get_object(*annot_id) {
            Ok(Object::Dictionary(annot_dict)) => match annot_dict.get(b"Subtype") {
                Ok(Object::Name(st)) => String::from_utf8_lossy(st).to_string(),
                _ => "Unknown".to_string(),
            },
            _ => "Unknown".to_string(),
        };
        // 弹出窗口注释随父注释一起删除
        if let Some(popup_id) = get_popup_id(doc, *annot_id) {
            doc.objects.remove(&popup_id);
        }
        doc.objects.remove(annot_id);
        log::info!("[PDF] 已移除注释 {:?} (类型: {})", annot_id, subtype);
    }

    update_page_annots(doc, page_id, &annots_to_remove);
    Ok(annots_to_remove.len())
}

/// 获取注释 ID 列表
fn get_annot_ids(doc: &Document, annots_ref: &Object) -> Vec<ObjectId> {
    match resolve(doc, annots_ref) {
        Some(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| match o {
                Object::Reference(id) => Some(*id),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// 获取注释的矩形区域
fn get_annot_rect(annot_dict: &Dictionary) -> Option<MarkRect> {
    match annot_dict.get(b"Rect") {
        Ok(Object::Array(rect)) => {
            let (x0, y0, x1, y1) = extract_box_values(rect)?;
            Some(MarkRect::from_corners(x0, y0, x1, y1))
        }
        _ => None,
    }
}

fn get_popup_id(doc: &Document, annot_id: ObjectId) -> Option<ObjectId> {
    match doc.get_object(annot_id) {
        Ok(Object::Dictionary(annot_dict)) => match annot_dict.get(b"Popup") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        },
        _ => None,
    }
}

/// 更新页面的 Annots 数组
fn update_page_annots(doc: &mut Document, page_id: ObjectId, removed_ids: &[ObjectId]) {
    // 先取出数组副本，避免借用冲突
    let annots_data: Option<Vec<Object>> = match doc.get_object(page_id) {
        Ok(Object::Dictionary(page_dict)) => match page_dict.get(b"Annots") {
            Ok(annots_ref) => match resolve(doc, annots_ref) {
                Some(Object::Array(arr)) => Some(arr.clone()),
                _ => None,
            },
            Err(_) => None,
        },
        _ => None,
    };

    let Some(annots_arr) = annots_data else {
        return;
    };

    let new_annots: Vec<Object> = annots_arr
        .into_iter()
        .filter(|o| match o {
            Object::Reference(id) => !removed_ids.contains(id) && doc.objects.contains_key(id),
            _ => true,
        })
        .collect();

    // 页面级直接写入新数组，不修改可能被共享的间接数组
    if let Ok(Object::Dictionary(ref mut page_dict)) = doc.get_object_mut(page_id) {
        if new_annots.is_empty() {
            page_dict.remove(b"Annots");
        } else {
            page_dict.set("Annots", Object::Array(new_annots));
        }
    }
}
