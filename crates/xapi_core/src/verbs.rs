//! crates/xapi_core/src/verbs.rs
//!
//! The registry of recognized ADL verbs and their display-language
//! resolution rules.

use crate::domain::{LanguageMap, Verb};

/// The fallback display language used when a verb has no translation for the
/// session language.
pub const DEFAULT_LANG: &str = "en-US";

/// The verbs this tracker can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbKey {
    Launched,
    Initialized,
    Attempted,
    Resumed,
    Suspended,
    Terminated,
    Passed,
    Failed,
    Completed,
    Experienced,
    Answered,
}

impl VerbKey {
    /// Looks a verb up by key, case-insensitively. Unknown keys resolve to
    /// `None`; callers must treat that as an error, not a silent no-op.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "launched" => Some(VerbKey::Launched),
            "initialized" => Some(VerbKey::Initialized),
            "attempted" => Some(VerbKey::Attempted),
            "resumed" => Some(VerbKey::Resumed),
            "suspended" => Some(VerbKey::Suspended),
            "terminated" => Some(VerbKey::Terminated),
            "passed" => Some(VerbKey::Passed),
            "failed" => Some(VerbKey::Failed),
            "completed" => Some(VerbKey::Completed),
            "experienced" => Some(VerbKey::Experienced),
            "answered" => Some(VerbKey::Answered),
            _ => None,
        }
    }

    pub fn iri(self) -> &'static str {
        match self {
            VerbKey::Launched => "http://adlnet.gov/expapi/verbs/launched",
            VerbKey::Initialized => "http://adlnet.gov/expapi/verbs/initialized",
            VerbKey::Attempted => "http://adlnet.gov/expapi/verbs/attempted",
            VerbKey::Resumed => "http://adlnet.gov/expapi/verbs/resumed",
            VerbKey::Suspended => "http://adlnet.gov/expapi/verbs/suspended",
            VerbKey::Terminated => "http://adlnet.gov/expapi/verbs/terminated",
            VerbKey::Passed => "http://adlnet.gov/expapi/verbs/passed",
            VerbKey::Failed => "http://adlnet.gov/expapi/verbs/failed",
            VerbKey::Completed => "http://adlnet.gov/expapi/verbs/completed",
            VerbKey::Experienced => "http://adlnet.gov/expapi/verbs/experienced",
            VerbKey::Answered => "http://adlnet.gov/expapi/verbs/answered",
        }
    }

    fn display_default(self) -> &'static str {
        match self {
            VerbKey::Launched => "launched",
            VerbKey::Initialized => "initialized",
            VerbKey::Attempted => "attempted",
            VerbKey::Resumed => "resumed",
            VerbKey::Suspended => "suspended",
            VerbKey::Terminated => "terminated",
            VerbKey::Passed => "passed",
            VerbKey::Failed => "failed",
            VerbKey::Completed => "completed",
            VerbKey::Experienced => "experienced",
            VerbKey::Answered => "answered",
        }
    }

    /// The full registry entry for this verb.
    pub fn verb(self) -> Verb {
        Verb {
            id: self.iri().to_string(),
            display: LanguageMap::single(DEFAULT_LANG, self.display_default()),
        }
    }

    /// Resolves this verb to a single-language display for `lang`, falling
    /// back to [`DEFAULT_LANG`].
    pub fn resolved(self, lang: &str) -> Verb {
        resolve(&self.verb(), lang)
    }
}

/// Narrows a verb's display map to the requested language, or to
/// [`DEFAULT_LANG`] when no translation exists.
pub fn resolve(verb: &Verb, lang: &str) -> Verb {
    let display = match verb.display.get(lang) {
        Some(text) => LanguageMap::single(lang, text),
        None => match verb.display.get(DEFAULT_LANG) {
            Some(text) => LanguageMap::single(DEFAULT_LANG, text),
            None => LanguageMap::new(),
        },
    };

    Verb {
        id: verb.id.clone(),
        display,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(VerbKey::from_key("Completed"), Some(VerbKey::Completed));
        assert_eq!(VerbKey::from_key("ANSWERED"), Some(VerbKey::Answered));
        assert_eq!(VerbKey::from_key("bookmarked"), None);
    }

    #[test]
    fn resolves_to_requested_language() {
        let mut verb = VerbKey::Completed.verb();
        verb.display.insert("fr-FR", "terminé");

        let resolved = resolve(&verb, "fr-FR");

        assert_eq!(resolved.display.get("fr-FR"), Some("terminé"));
        assert_eq!(resolved.display.get(DEFAULT_LANG), None);
    }

    #[test]
    fn falls_back_to_default_language() {
        let resolved = VerbKey::Suspended.resolved("de-DE");

        assert_eq!(resolved.display.get("de-DE"), None);
        assert_eq!(resolved.display.get(DEFAULT_LANG), Some("suspended"));
        assert_eq!(resolved.id, "http://adlnet.gov/expapi/verbs/suspended");
    }
}
