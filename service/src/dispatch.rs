//! 按扩展名选择格式处理器

use redact_core::{RedactError, RedactionRequest, Redactor, Result};
use redact_docx::DocxRedactor;
use redact_pdf::PdfRedactor;

/// 只看源文件扩展名，不嗅探内容
pub fn select_redactor(request: &RedactionRequest) -> Result<Box<dyn Redactor>> {
    match request.extension().as_str() {
        "pdf" => Ok(Box::new(PdfRedactor::new())),
        "docx" => Ok(Box::new(DocxRedactor::new())),
        "" => Err(RedactError::UnsupportedFormat("(none)".to_string())),
        other => Err(RedactError::UnsupportedFormat(other.to_string())),
    }
}
