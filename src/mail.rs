//! UTF-8 mail with an optional HTML part and file attachments.
//!
//! Messages are built as `multipart/mixed`. An HTML message gets a
//! `multipart/alternative` part carrying a plain-text rendering alongside the
//! HTML. Headers are RFC 2047 base64 encoded and bodies are base64 encoded,
//! so any UTF-8 content survives transport. Delivery pipes the message to the
//! local sendmail program named by `mail.sendmail`.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{Error, Result};
use crate::environment::Environment;

const LINE_LENGTH: usize = 70;

/// `=?UTF-8?B?...?=` encoded word.
pub fn encode_string(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", general_purpose::STANDARD.encode(text))
}

/// Encode the display name of `Name <user@host>`; bare addresses pass through.
pub fn encode_address(address: &str) -> String {
    match address.trim().rsplit_once(" <") {
        Some((name, rest)) if rest.contains('@') && rest.ends_with('>') => {
            format!("{} <{}", encode_string(name.trim()), rest)
        }
        _ => address.to_string(),
    }
}

/// Base64 body wrapped at 70 columns.
pub fn encode_body(content: &[u8]) -> String {
    let encoded = general_purpose::STANDARD.encode(content);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH + 1);
    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Internal(format!("regex: {}", e)))
}

/// Plain-text rendering of an HTML message: one paragraph per text node,
/// `<style>` and `<script>` content dropped.
pub fn strip_tags(html: &str) -> Result<String> {
    let hidden = regex(r"(?is)<(style|script)\b.*?</(style|script)\s*>")?;
    let tags = regex(r"(?s)<[^>]*>")?;

    let text = hidden.replace_all(html, "");
    let text = tags.replace_all(&text, "\n");
    let lines: Vec<String> = text
        .lines()
        .map(|line| decode_entities(line.trim()))
        .filter(|line| !line.is_empty())
        .collect();
    Ok(lines.join("\n\n") + "\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn is_html(message: &str) -> bool {
    regex(r"<[a-zA-Z/!][^>]*>").is_ok_and(|re| re.is_match(message))
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub content: Vec<u8>,
}

impl Attachment {
    /// Read `path`, typed by the site's `mime` table or the extension.
    pub fn from_file(path: &Path, env: &Environment) -> Result<Self> {
        let content = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mut mime = env
            .get_str(&["mime", extension.as_str()])
            .filter(|m| !m.is_empty())
            .or_else(|| {
                mime_guess::from_ext(&extension)
                    .first()
                    .map(|m| m.essence_str().to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if mime.starts_with("text/") {
            mime.push_str("; charset=utf-8");
        }
        Ok(Self {
            name,
            mime,
            content,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Mail {
    sender: String,
    recipient: String,
    subject: String,
    message: String,
    attachments: Vec<Attachment>,
    headers: Vec<(String, String)>,
}

impl Mail {
    pub fn new(sender: &str, recipient: &str, subject: &str, message: &str) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            attachments: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Extra header; replaces a built-in header of the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Full RFC 5322 message with a random boundary.
    pub fn to_message(&self) -> Result<String> {
        self.render(&Uuid::new_v4().simple().to_string())
    }

    fn render(&self, boundary: &str) -> Result<String> {
        let mut headers = vec![
            ("To".to_string(), encode_address(&self.recipient)),
            ("Subject".to_string(), encode_string(&self.subject)),
            ("From".to_string(), encode_address(&self.sender)),
            (
                "Content-Type".to_string(),
                format!("multipart/mixed; boundary=\"MIX-{}\"", boundary),
            ),
        ];
        for (name, value) in &self.headers {
            match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(existing) => existing.1 = value.clone(),
                None => headers.push((name.clone(), value.clone())),
            }
        }

        let mut out = String::from("MIME-Version: 1.0\r\n");
        for (name, value) in &headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");

        if is_html(&self.message) {
            out.push_str(&format!(
                "--MIX-{b}\nContent-Type: multipart/alternative; boundary=ALT-{b}\n\n\
                 --ALT-{b}\nContent-Type: text/plain; charset=utf-8\nContent-Transfer-Encoding: base64\n\n{}\n\
                 --ALT-{b}\nContent-Type: text/html; charset=utf-8\nContent-Transfer-Encoding: base64\n\n{}\n\
                 --ALT-{b}--\n\n",
                encode_body(strip_tags(&self.message)?.as_bytes()),
                encode_body(self.message.as_bytes()),
                b = boundary,
            ));
        } else {
            out.push_str(&format!(
                "--MIX-{b}\nContent-Type: text/plain; charset=utf-8\nContent-Transfer-Encoding: base64\n\n{}\n",
                encode_body(self.message.as_bytes()),
                b = boundary,
            ));
        }

        for attachment in &self.attachments {
            let name = encode_string(&attachment.name);
            out.push_str(&format!(
                "--MIX-{b}\nContent-Type: {}; name=\"{n}\"\nContent-Disposition: attachment; filename=\"{n}\"\n\
                 Content-Transfer-Encoding: base64\n\n{}\n",
                attachment.mime,
                encode_body(&attachment.content),
                b = boundary,
                n = name,
            ));
        }
        out.push_str(&format!("\n--MIX-{}--\n", boundary));
        Ok(out)
    }

    /// Deliver through the site's `mail.sendmail` program.
    pub fn send(&self, env: &Environment) -> Result<()> {
        let program = env
            .get_str(&["mail", "sendmail"])
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Internal("mail.sendmail is not configured".into()))?;
        self.send_with(Path::new(&program))
    }

    /// Pipe the message to `program -t -i`.
    pub fn send_with(&self, program: &Path) -> Result<()> {
        let message = self.to_message()?;
        let mut child = Command::new(program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits early is reported through its status.
            if let Err(err) = stdin.write_all(message.as_bytes()) {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err.into());
                }
            }
        }

        let status = child.wait()?;
        if !status.success() {
            warn!(program = %program.display(), %status, "sendmail failed");
            return Err(Error::Internal(format!("sendmail exited with {}", status)));
        }
        info!(recipient = %self.recipient, attachments = self.attachments.len(), "mail sent");
        Ok(())
    }
}
