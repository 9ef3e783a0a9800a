use cloudpilot_core::domain::provisioning::{Slot, SlotFragment};

pub const INSTANCE_CLASSES: [&str; 7] =
    ["t2.micro", "t2.small", "t2.medium", "t3.micro", "t3.small", "t3.medium", "t3.large"];
pub const STORAGE_CLASSES: [&str; 6] = ["gp2", "gp3", "io1", "io2", "st1", "sc1"];
pub const MAX_STORAGE_SIZE_GB: u32 = 16_384;

const IMAGE_KEYWORDS: [(&str, &str); 2] =
    [("ubuntu", "ami-12345678"), ("amazon linux", "ami-87654321")];
const CREDENTIAL_TRIGGER: (&str, &str) = ("use my key", "my-key-pair");
const SECURITY_GROUP_TRIGGER: (&str, &str) = ("default security group", "default");
const LABEL_MARKERS: [(&str, Slot); 3] =
    [("Project:", Slot::Project), ("Owner:", Slot::Owner), ("Name:", Slot::DisplayName)];

/// Pulls recognizable slot values out of free text. Never fails; text with
/// nothing recognizable yields no fragments.
pub trait FragmentExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<SlotFragment>;
}

/// Fixed-vocabulary extractor. Fragments come back in the order they appear
/// in the text, so applying them in sequence lets the last mention win.
#[derive(Clone, Debug, Default)]
pub struct KeywordFragmentExtractor;

impl KeywordFragmentExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FragmentExtractor for KeywordFragmentExtractor {
    fn extract(&self, text: &str) -> Vec<SlotFragment> {
        let lowered = text.to_ascii_lowercase();
        let tokens = tokenize(text);
        let mut located: Vec<(usize, SlotFragment)> = Vec::new();

        for token in &tokens {
            let lower = token.text.to_ascii_lowercase();
            if INSTANCE_CLASSES.contains(&lower.as_str()) {
                located.push((token.offset, SlotFragment::new(Slot::InstanceClass, lower)));
            } else if STORAGE_CLASSES.contains(&lower.as_str()) {
                located.push((token.offset, SlotFragment::new(Slot::StorageClass, lower)));
            } else if is_prefixed_id(&lower, "ami-") {
                located.push((token.offset, SlotFragment::new(Slot::ImageReference, lower)));
            } else if is_prefixed_id(&lower, "sg-") {
                located.push((token.offset, SlotFragment::new(Slot::SecurityGroup, lower)));
            }
        }

        located.extend(storage_sizes(&tokens));

        for (keyword, image) in IMAGE_KEYWORDS {
            for (offset, _) in lowered.match_indices(keyword) {
                located.push((offset, SlotFragment::new(Slot::ImageReference, image)));
            }
        }
        for (trigger, slot, value) in [
            (CREDENTIAL_TRIGGER.0, Slot::CredentialReference, CREDENTIAL_TRIGGER.1),
            (SECURITY_GROUP_TRIGGER.0, Slot::SecurityGroup, SECURITY_GROUP_TRIGGER.1),
        ] {
            for (offset, _) in lowered.match_indices(trigger) {
                located.push((offset, SlotFragment::new(slot, value)));
            }
        }

        for (marker, slot) in LABEL_MARKERS {
            for (offset, _) in text.match_indices(marker) {
                let rest = &text[offset + marker.len()..];
                let Some(value) = rest
                    .split_whitespace()
                    .next()
                    .map(|raw| raw.trim_matches(is_edge_punctuation))
                    .filter(|value| !value.is_empty())
                else {
                    continue;
                };
                if LABEL_MARKERS.iter().any(|(other, _)| *other == value) {
                    continue;
                }
                located.push((offset, SlotFragment::new(slot, value)));
            }
        }

        located.sort_by_key(|(offset, _)| *offset);
        located.into_iter().map(|(_, fragment)| fragment).collect()
    }
}

struct Token<'a> {
    text: &'a str,
    offset: usize,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (index, character) in text.char_indices() {
        if character.is_whitespace() {
            if let Some(begin) = start.take() {
                push_trimmed(&mut tokens, text, begin, index);
            }
        } else if start.is_none() {
            start = Some(index);
        }
    }
    if let Some(begin) = start {
        push_trimmed(&mut tokens, text, begin, text.len());
    }
    tokens
}

fn push_trimmed<'a>(tokens: &mut Vec<Token<'a>>, text: &'a str, begin: usize, end: usize) {
    let raw = &text[begin..end];
    let trimmed_start = raw.trim_start_matches(is_edge_punctuation);
    let trimmed = trimmed_start.trim_end_matches(is_edge_punctuation);
    if !trimmed.is_empty() {
        tokens.push(Token { text: trimmed, offset: begin + (raw.len() - trimmed_start.len()) });
    }
}

fn is_edge_punctuation(character: char) -> bool {
    matches!(character, ',' | '.' | ';' | '!' | '?' | '(' | ')' | '"' | '\'')
}

fn is_prefixed_id(token: &str, prefix: &str) -> bool {
    token
        .strip_prefix(prefix)
        .is_some_and(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit()))
}

/// `20GB` as one token or `20 GB` as two.
fn storage_sizes(tokens: &[Token<'_>]) -> Vec<(usize, SlotFragment)> {
    let mut sizes = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let lower = token.text.to_ascii_lowercase();
        let digits = match lower.strip_suffix("gb") {
            Some(digits) if !digits.is_empty() => Some(digits.to_string()),
            _ if lower.chars().all(|c| c.is_ascii_digit()) => tokens
                .get(index + 1)
                .filter(|next| next.text.eq_ignore_ascii_case("gb"))
                .map(|_| lower.clone()),
            _ => None,
        };
        let Some(size) = digits.and_then(|digits| digits.parse::<u32>().ok()) else {
            continue;
        };
        if (1..=MAX_STORAGE_SIZE_GB).contains(&size) {
            sizes.push((token.offset, SlotFragment::new(Slot::StorageSize, size.to_string())));
        }
    }
    sizes
}
