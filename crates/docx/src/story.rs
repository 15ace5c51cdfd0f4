//! 正文部件（document / header / footer / footnotes / endnotes）的段落级替换
//!
//! Word 会把一段文字拆成多个 run，词条可能跨越 run 边界，所以替换按段落进行：
//! 先拼接段落内所有 `w:t` 的文本，替换后把新文本写入第一个 `w:t`，其余清空。
//! 表格单元格、文本框内的段落同样是 `w:p`，按嵌套顺序各自处理。

use super::xml::{escape, unescape};
use once_cell::sync::Lazy;
use redact_core::block_fill;
use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;

static TOKEN: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?P<pself><w:p(?:\s[^>]*)?/>)"#,
        r#"|(?P<popen><w:p(?:\s[^>]*)?>)"#,
        r#"|(?P<pclose></w:p>)"#,
        r#"|(?P<topen><w:t(?:\s[^>]*)?>)(?P<text>[^<]*)</w:t>"#,
        r#"|<w:delText(?:\s[^>]*)?>(?P<del>[^<]*)</w:delText>"#,
    ))
});

static XML_SPACE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r#"xml:space="[^"]*""#));

fn compiled(re: &'static Lazy<Result<Regex, regex::Error>>) -> Result<&'static Regex, String> {
    Lazy::force(re).as_ref().map_err(|e| e.to_string())
}

/// 段落中的一个 `w:t`
struct TextRun {
    open_tag: Range<usize>,
    inner: Range<usize>,
}

/// 对正文部件做词条替换，返回新的 XML 与实际替换过的词条
pub fn redact_story(xml: &str, terms: &[String]) -> Result<(String, BTreeSet<String>), String> {
    let token = compiled(&TOKEN)?;
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut substituted = BTreeSet::new();
    let mut stack: Vec<Vec<TextRun>> = Vec::new();

    for caps in token.captures_iter(xml) {
        if caps.name("pself").is_some() {
            continue;
        }
        if caps.name("popen").is_some() {
            stack.push(Vec::new());
        } else if caps.name("pclose").is_some() {
            if let Some(runs) = stack.pop() {
                redact_paragraph(xml, &runs, terms, &mut edits, &mut substituted)?;
            }
        } else if let (Some(open), Some(text)) = (caps.name("topen"), caps.name("text")) {
            let run = TextRun {
                open_tag: open.range(),
                inner: text.range(),
            };
            match stack.last_mut() {
                Some(runs) => runs.push(run),
                None => redact_paragraph(xml, &[run], terms, &mut edits, &mut substituted)?,
            }
        } else if let Some(deleted) = caps.name("del") {
            // 修订记录中被删除的文字不属于段落文本，但仍保存在文件里
            let original = unescape(deleted.as_str());
            let replaced = substitute(&original, terms, &mut substituted);
            if replaced != original {
                edits.push((deleted.range(), escape(&replaced)));
            }
        }
    }

    // 未闭合的段落
    while let Some(runs) = stack.pop() {
        redact_paragraph(xml, &runs, terms, &mut edits, &mut substituted)?;
    }

    Ok((apply_edits(xml, edits), substituted))
}

fn redact_paragraph(
    xml: &str,
    runs: &[TextRun],
    terms: &[String],
    edits: &mut Vec<(Range<usize>, String)>,
    substituted: &mut BTreeSet<String>,
) -> Result<(), String> {
    let Some((first, rest)) = runs.split_first() else {
        return Ok(());
    };

    let text: String = runs.iter().map(|run| unescape(&xml[run.inner.clone()])).collect();
    let replaced = substitute(&text, terms, substituted);
    if replaced == text {
        return Ok(());
    }

    edits.push((first.open_tag.clone(), preserve_space(&xml[first.open_tag.clone()])?));
    edits.push((first.inner.clone(), escape(&replaced)));
    for run in rest {
        if !run.inner.is_empty() {
            edits.push((run.inner.clone(), String::new()));
        }
    }
    Ok(())
}

/// 逐个词条替换为等长块字符
fn substitute(text: &str, terms: &[String], substituted: &mut BTreeSet<String>) -> String {
    let mut result = text.to_string();
    for term in terms {
        if result.contains(term.as_str()) {
            result = result.replace(term.as_str(), &block_fill(term));
            substituted.insert(term.clone());
        }
    }
    result
}

/// 保留首尾空格，否则 Word 会裁掉替换后文本两端的空白
fn preserve_space(open_tag: &str) -> Result<String, String> {
    if open_tag.contains(r#"xml:space="preserve""#) {
        return Ok(open_tag.to_string());
    }
    if open_tag.contains("xml:space") {
        let re = compiled(&XML_SPACE)?;
        return Ok(re.replace(open_tag, r#"xml:space="preserve""#).into_owned());
    }
    let body = open_tag.trim_end_matches('>');
    Ok(format!(r#"{} xml:space="preserve">"#, body))
}

fn apply_edits(xml: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    if edits.is_empty() {
        return xml.to_string();
    }
    edits.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        out.push_str(&xml[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&xml[cursor..]);
    out
}

/// 提取各段落的纯文本
pub fn paragraph_texts(xml: &str) -> Result<Vec<String>, String> {
    let token = compiled(&TOKEN)?;
    let mut finished = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    for caps in token.captures_iter(xml) {
        if caps.name("popen").is_some() {
            stack.push(String::new());
        } else if caps.name("pclose").is_some() {
            if let Some(text) = stack.pop() {
                finished.push(text);
            }
        } else if let Some(text) = caps.name("text") {
            if let Some(current) = stack.last_mut() {
                current.push_str(&unescape(text.as_str()));
            }
        }
    }
    Ok(finished)
}
