//! RFC 5322 body extraction using mailparse.
//!
//! Pulls a plain-text and an HTML body out of a raw message. Attachments are
//! never read as bodies.

use anyhow::{Context, Result};
use mailparse::{parse_mail, DispositionType, ParsedMail};
use tracing::{info, warn};

use crate::payload::MessageBody;

/// Parse a raw message into its text and HTML bodies.
///
/// Multipart messages are walked depth-first; the first non-empty
/// `text/plain` part and the first non-empty `text/html` part win. A single
/// part message fills `html` when it is `text/html` and `text` otherwise.
pub fn parse_raw_email(raw: &[u8]) -> Result<MessageBody> {
    let mail = parse_mail(raw).context("Failed to parse email")?;

    let body = if is_multipart(&mail) {
        let mut body = MessageBody::default();
        collect_parts(&mail, &mut body);
        body
    } else {
        match extract_body_text(&mail) {
            Some(content) if mail.ctype.mimetype == "text/html" => MessageBody::new("", content),
            Some(content) => MessageBody::new(content, ""),
            None => MessageBody::default(),
        }
    };

    Ok(body)
}

/// Like [`parse_raw_email`], but a message that cannot be parsed yields an
/// empty body.
pub fn extract_content(raw: &[u8], correlation_id: &str) -> MessageBody {
    match parse_raw_email(raw) {
        Ok(body) => {
            info!(
                correlation_id = %correlation_id,
                text_length = body.text.len(),
                html_length = body.html.len(),
                "email_parse_complete"
            );
            body
        }
        Err(e) => {
            warn!(
                correlation_id = %correlation_id,
                error = %format!("{:#}", e),
                "email_parse_failed"
            );
            MessageBody::default()
        }
    }
}

fn is_multipart(mail: &ParsedMail) -> bool {
    mail.ctype.mimetype.starts_with("multipart/")
}

fn collect_parts(mail: &ParsedMail, body: &mut MessageBody) {
    for part in &mail.subparts {
        if !body.text.is_empty() && !body.html.is_empty() {
            return;
        }

        if is_multipart(part) {
            collect_parts(part, body);
            continue;
        }

        if part.get_content_disposition().disposition == DispositionType::Attachment {
            info!(content_type = %part.ctype.mimetype, "email_attachment_skipped");
            continue;
        }

        let slot = match part.ctype.mimetype.as_str() {
            "text/plain" => &mut body.text,
            "text/html" => &mut body.html,
            _ => continue,
        };

        if slot.is_empty() {
            if let Some(content) = extract_body_text(part) {
                *slot = content;
            }
        }
    }
}

/// Decoded body of a part, `None` when it is blank or undecodable.
fn extract_body_text(mail: &ParsedMail) -> Option<String> {
    match mail.get_body() {
        Ok(body) => {
            if body.trim().is_empty() {
                None
            } else {
                Some(body)
            }
        }
        Err(e) => {
            warn!(error = %e, "email_body_extraction_failed");
            None
        }
    }
}
