//! 文档属性清理（docProps/core.xml 与 docProps/app.xml）

use super::xml::escape;
use chrono::{SecondsFormat, Utc};
use regex::Regex;

pub const CORE_PART: &str = "docProps/core.xml";
pub const APP_PART: &str = "docProps/app.xml";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const ROOT_RELS_PART: &str = "_rels/.rels";

const CORE_CONTENT_TYPE: &str = "application/vnd.openxmlformats-package.core-properties+xml";
const CORE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";

/// 需要清空的核心属性：作者、备注、关键词、主题、标题
const CLEARED_CORE: [&str; 5] = [
    "dc:creator",
    "dc:description",
    "cp:keywords",
    "dc:subject",
    "dc:title",
];

/// 扩展属性中的组织信息
const CLEARED_APP: [&str; 2] = ["Company", "Manager"];

/// 替换元素内容；元素不存在时，若 `value` 非空则插入到根元素末尾
fn set_element(xml: &str, tag: &str, value: &str, root_close: &str) -> Result<String, String> {
    let escaped_tag = regex::escape(tag);
    let pattern = format!(r"(?s)<{0}(\s[^>]*?)?(?:/>|>.*?</{0}>)", escaped_tag);
    let re = Regex::new(&pattern).map_err(|e| e.to_string())?;

    if re.is_match(xml) {
        let replaced = re.replace_all(xml, |caps: &regex::Captures| {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            format!("<{tag}{attrs}>{}</{tag}>", escape(value))
        });
        return Ok(replaced.into_owned());
    }

    if value.is_empty() {
        return Ok(xml.to_string());
    }
    match xml.rfind(root_close) {
        Some(pos) => Ok(format!(
            "{}<{tag}>{}</{tag}>{}",
            &xml[..pos],
            escape(value),
            &xml[pos..]
        )),
        None => Err(format!("缺少根元素结束标记 {}", root_close)),
    }
}

fn w3cdtf_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 清理核心属性，并写入最后修改者与修订号
pub fn scrub_core(xml: &str, last_modified_by: &str) -> Result<String, String> {
    let root_close = "</cp:coreProperties>";
    let mut out = xml.to_string();
    for tag in CLEARED_CORE {
        out = set_element(&out, tag, "", root_close)?;
    }
    out = set_element(&out, "cp:lastModifiedBy", last_modified_by, root_close)?;
    out = set_element(&out, "cp:revision", "1", root_close)?;
    if out.contains("<dcterms:modified") {
        out = set_element(&out, "dcterms:modified", &w3cdtf_now(), root_close)?;
    }
    Ok(out)
}

/// 原文件没有核心属性部件时新建
pub fn new_core(last_modified_by: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            "\n",
            r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" "#,
            r#"xmlns:dcmitype="http://purl.org/dc/dcmitype/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            "<cp:lastModifiedBy>{}</cp:lastModifiedBy>",
            "<cp:revision>1</cp:revision>",
            r#"<dcterms:modified xsi:type="dcterms:W3CDTF">{}</dcterms:modified>"#,
            "</cp:coreProperties>"
        ),
        escape(last_modified_by),
        w3cdtf_now()
    )
}

/// 清理扩展属性中的组织信息
pub fn scrub_app(xml: &str) -> Result<String, String> {
    let mut out = xml.to_string();
    for tag in CLEARED_APP {
        out = set_element(&out, tag, "", "</Properties>")?;
    }
    Ok(out)
}

/// 为新建的核心属性部件登记内容类型
pub fn register_core_content_type(xml: &str) -> Result<String, String> {
    if xml.contains(r#"PartName="/docProps/core.xml""#) {
        return Ok(xml.to_string());
    }
    let entry = format!(
        r#"<Override PartName="/{}" ContentType="{}"/>"#,
        CORE_PART, CORE_CONTENT_TYPE
    );
    insert_before(xml, "</Types>", &entry)
}

/// 为新建的核心属性部件登记包关系
pub fn register_core_relationship(xml: &str) -> Result<String, String> {
    if xml.contains(CORE_REL_TYPE) {
        return Ok(xml.to_string());
    }
    let mut id = "rIdCoreProps".to_string();
    while xml.contains(&format!(r#"Id="{}""#, id)) {
        id.push('1');
    }
    let entry = format!(
        r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
        id, CORE_REL_TYPE, CORE_PART
    );
    insert_before(xml, "</Relationships>", &entry)
}

fn insert_before(xml: &str, close: &str, entry: &str) -> Result<String, String> {
    match xml.rfind(close) {
        Some(pos) => Ok(format!("{}{}{}", &xml[..pos], entry, &xml[pos..])),
        None => Err(format!("缺少结束标记 {}", close)),
    }
}

/// 读取核心属性的文本值（测试与校验用）
pub fn core_value(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{0}(?:\s[^>]*?)?>(.*?)</{0}>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| super::xml::unescape(m.as_str()))
}
