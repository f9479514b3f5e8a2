//! Contact identifier helpers: email vs phone classification and phone normalization.

/// Number of trailing digits used for the phone fallback lookup.
pub const PHONE_SUFFIX_DIGITS: usize = 9;

/// What kind of identifier a contact string is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactKind {
    /// Lowercased, trimmed email address.
    Email(String),
    /// Phone reduced to digits with an optional leading `+`.
    Phone(String),
    Empty,
}

/// Classify a contact identifier. Anything containing `@` is treated as an email.
pub fn classify(contact: &str) -> ContactKind {
    let c = contact.trim();
    if c.is_empty() {
        return ContactKind::Empty;
    }
    if c.contains('@') {
        return ContactKind::Email(c.to_lowercase());
    }
    let phone = normalize_phone(c);
    if phone.trim_start_matches('+').is_empty() {
        ContactKind::Empty
    } else {
        ContactKind::Phone(phone)
    }
}

/// Keep only digits and a single leading `+`. Idempotent.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}

/// Last `PHONE_SUFFIX_DIGITS` digits, or None when the number is shorter than that.
pub fn phone_suffix(phone: &str) -> Option<String> {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < PHONE_SUFFIX_DIGITS {
        return None;
    }
    Some(digits[digits.len() - PHONE_SUFFIX_DIGITS..].iter().collect())
}

/// Convert a messaging address to `+<digits>`: strips `whatsapp:` prefixes and
/// `@c.us` / `@g.us` / `@s.whatsapp.net` suffixes. Empty input gives an empty string.
pub fn chat_address_to_phone(address: &str) -> String {
    let a = address.trim();
    let a = a
        .strip_prefix("whatsapp:")
        .or_else(|| a.strip_prefix("WhatsApp:"))
        .unwrap_or(a);
    let a = a.split('@').next().unwrap_or("");
    let digits = normalize_phone(a);
    let bare = digits.trim_start_matches('+');
    if bare.is_empty() {
        String::new()
    } else {
        format!("+{}", bare)
    }
}
