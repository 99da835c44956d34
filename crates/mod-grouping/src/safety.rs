use quietinbox_domain::{SafetyInfo, Settings};

use crate::headers::{extract_domain, extract_email};

/// Protected keyword and domain lists, lowercased once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyRules {
    keywords: Vec<(String, String)>,
    domains: Vec<(String, String)>,
}

impl SafetyRules {
    pub fn new<K, D>(keywords: K, domains: D) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            keywords: lowered(keywords),
            domains: lowered(domains),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.protected_keywords, &settings.protected_domains)
    }
}

fn lowered<I>(items: I) -> Vec<(String, String)>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    items
        .into_iter()
        .filter_map(|item| {
            let original = item.as_ref().trim();
            if original.is_empty() {
                None
            } else {
                Some((original.to_string(), original.to_lowercase()))
            }
        })
        .collect()
}

/// Substring match of keywords against the subject and of domain rules
/// against the sender domain. `"bank."` therefore matches `mybank.com`.
pub fn check_safety(from: &str, subject: &str, rules: &SafetyRules) -> SafetyInfo {
    let domain = extract_domain(&extract_email(from));
    let subject = subject.to_lowercase();

    let keyword_hits = rules
        .keywords
        .iter()
        .filter(|(_, lower)| subject.contains(lower.as_str()))
        .map(|(original, _)| format!("Protected keyword: {original}"));

    let domain_hits = rules
        .domains
        .iter()
        .filter(|(_, lower)| domain.contains(lower.as_str()))
        .map(|(original, _)| format!("Protected domain: {original}"));

    SafetyInfo::from_reasons(keyword_hits.chain(domain_hits))
}
