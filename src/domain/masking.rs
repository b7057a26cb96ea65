//! Display-time redaction of names and contact details.
//!
//! Masking never touches stored data. Both functions are total: any input,
//! including empty or whitespace-only strings, produces a value.

const MASK: char = '*';

/// Mask a person's name word by word.
///
/// Each word keeps its first and last character; interior characters become
/// `*`. One-character words are kept, two-character words become first
/// character plus one `*`.
///
/// ```
/// use medivault::domain::mask_name;
///
/// assert_eq!(mask_name("John Doe"), "J**n D*e");
/// assert_eq!(mask_name("Al"), "A*");
/// assert_eq!(mask_name(""), "");
/// ```
#[must_use]
pub fn mask_name(name: &str) -> String {
    name.split_whitespace()
        .map(mask_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn mask_word(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    match chars.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [first, _] => format!("{first}{MASK}"),
        [first, middle @ .., last] => {
            let mut masked = String::with_capacity(word.len());
            masked.push(*first);
            masked.extend(std::iter::repeat(MASK).take(middle.len()));
            masked.push(*last);
            masked
        }
    }
}

/// Mask an email address or phone number.
///
/// Emails keep the first character of the local part and the whole domain.
/// Phone numbers keep the first 3 and last 4 characters; anything of 4
/// characters or fewer is fully masked.
///
/// ```
/// use medivault::domain::mask_contact;
///
/// assert_eq!(mask_contact("+1234567890"), "+12****7890");
/// assert_eq!(mask_contact("patient@hospital.com"), "p******@hospital.com");
/// ```
#[must_use]
pub fn mask_contact(contact: &str) -> String {
    let contact = contact.trim();
    if contact.is_empty() {
        return String::new();
    }

    match contact.split_once('@') {
        Some((local, domain)) => format!("{}@{domain}", mask_local_part(local)),
        None => mask_phone(contact),
    }
}

fn mask_local_part(local: &str) -> String {
    let mut chars = local.chars();
    let first = chars.next();
    let rest = chars.count();

    // Short local parts still get one star so their length is not revealed.
    let stars = rest.max(1);
    let mut masked = String::with_capacity(stars + 4);
    if let Some(first) = first {
        masked.push(first);
    }
    masked.extend(std::iter::repeat(MASK).take(stars));
    masked
}

fn mask_phone(phone: &str) -> String {
    const VISIBLE_START: usize = 3;
    const VISIBLE_END: usize = 4;

    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= VISIBLE_END {
        return MASK.to_string().repeat(chars.len());
    }

    // Between 5 and 7 characters the visible ends overlap; reveal the tail only.
    if chars.len() <= VISIBLE_START + VISIBLE_END {
        let hidden = chars.len() - VISIBLE_END;
        let mut masked: String = std::iter::repeat(MASK).take(hidden).collect();
        masked.extend(&chars[hidden..]);
        return masked;
    }

    let hidden = chars.len() - VISIBLE_START - VISIBLE_END;
    let mut masked: String = chars[..VISIBLE_START].iter().collect();
    masked.extend(std::iter::repeat(MASK).take(hidden));
    masked.extend(&chars[chars.len() - VISIBLE_END..]);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_name_examples() {
        assert_eq!(mask_name("John Doe"), "J**n D*e");
        assert_eq!(mask_name("Al"), "A*");
        assert_eq!(mask_name("A"), "A");
        assert_eq!(mask_name(""), "");
        assert_eq!(mask_name("   "), "");
        assert_eq!(mask_name("Muhammad Ali Khan"), "M******d A*i K**n");
        assert_eq!(mask_name("A B"), "A B");
    }

    #[test]
    fn test_mask_name_collapses_whitespace() {
        assert_eq!(mask_name("  Jane   Smith "), "J**e S***h");
    }

    #[test]
    fn test_mask_name_is_char_based() {
        assert_eq!(mask_name("Zoë Ørsted"), "Z*ë Ø****d");
    }

    #[test]
    fn test_mask_phone_reveals_three_and_four() {
        let masked = mask_contact("+1234567890");
        assert_eq!(masked, "+12****7890");
        assert_eq!(masked.chars().count(), "+1234567890".len());
        assert_eq!(mask_contact("+92-300-1234567"), "+92********4567");
    }

    #[test]
    fn test_mask_short_phone_fully() {
        assert_eq!(mask_contact("1234"), "****");
        assert_eq!(mask_contact("12"), "**");
        assert_eq!(mask_contact("12345"), "*2345");
    }

    #[test]
    fn test_mask_email_keeps_domain() {
        assert_eq!(mask_contact("patient@hospital.com"), "p******@hospital.com");
        assert_eq!(mask_contact("john.doe@email.org"), "j*******@email.org");
        assert_eq!(mask_contact("jo@x.io"), "j*@x.io");
        assert_eq!(mask_contact("j@x.io"), "j*@x.io");
        assert_eq!(mask_contact("@x.io"), "*@x.io");
    }

    #[test]
    fn test_mask_contact_empty() {
        assert_eq!(mask_contact(""), "");
        assert_eq!(mask_contact("  "), "");
    }
}
