//! Company identity as read from the roster.

use std::fmt;

/// Registry sequence number (NSU). A company's cursor means every document with a
/// sequence at or below it has been retrieved.
pub type Nsu = u64;

/// Tax identifier (CNPJ or CPF) holding digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaxId(String);

impl TaxId {
    /// Builds a tax id from free-form input, dropping every non-digit character.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.chars().filter(char::is_ascii_digit).collect())
    }

    /// Digits-only representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when normalization left no digits behind.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One roster entry.
#[derive(Clone, PartialEq, Eq)]
pub struct Company {
    /// Display name, also the source of the output folder name.
    pub name: String,
    /// Owning tax id; documents issued under it are classified as `issued`.
    pub tax_id: TaxId,
    /// Passphrase for the company's client certificate.
    pub secret: String,
    /// Last confirmed cursor.
    pub cursor: Nsu,
}

impl Company {
    /// Builds a company, normalizing the tax id.
    pub fn new(name: impl Into<String>, tax_id: &str, secret: impl Into<String>, cursor: Nsu) -> Self {
        Self {
            name: name.into(),
            tax_id: TaxId::normalize(tax_id),
            secret: secret.into(),
            cursor,
        }
    }

    /// Folder name used under the output root.
    pub fn folder_name(&self) -> String {
        sanitize_folder_name(&self.name)
    }
}

// Keeps the certificate passphrase out of logs and panic messages.
impl fmt::Debug for Company {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Company")
            .field("name", &self.name)
            .field("tax_id", &self.tax_id)
            .field("secret", &"<redacted>")
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Turns a company name into a stable folder name.
///
/// Runs of path-hostile characters (`\ / : * ? " < > |` and control characters)
/// become a single `_`, whitespace runs collapse to one space and the result is
/// trimmed. Names that would resolve to the current or parent directory map to `_`.
pub fn sanitize_folder_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_hostile = false;
    let mut in_space = false;
    for ch in name.trim().chars() {
        if is_path_hostile(ch) {
            if !in_hostile {
                out.push('_');
            }
            in_hostile = true;
            in_space = false;
        } else if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
            in_hostile = false;
        } else {
            out.push(ch);
            in_hostile = false;
            in_space = false;
        }
    }

    let trimmed = out.trim();
    if trimmed.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    trimmed.to_string()
}

fn is_path_hostile(ch: char) -> bool {
    matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        || (ch.is_control() && !ch.is_whitespace())
}
