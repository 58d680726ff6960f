//! Placeholder substitution over the four label slots.

use crate::model::lexeme::RenderedLabel;
use crate::model::reference::Template;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

// Both bracket syntaxes are interchangeable: $(inf) and ${inf}.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\((\w+)\)|\$\{(\w+)\}").expect("placeholder pattern is valid"));

/// The four label fragments a template can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSlot {
    Pre,
    Main,
    Post,
    Also,
}

impl Display for LabelSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pre => "pre",
            Self::Main => "main",
            Self::Post => "post",
            Self::Also => "also",
        };
        write!(f, "{name}")
    }
}

/// A placeholder that had no form of the referenced type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingForm {
    pub slot: LabelSlot,
    pub placeholder: String,
}

/// Renders the template's slots against the variant's forms, keyed by
/// form-type short name.
///
/// Placeholders resolve left to right; an unresolvable placeholder renders as
/// the empty string and is reported, not thrown. An unset slot renders empty.
pub fn render_label(
    template: &Template,
    forms_by_type: &BTreeMap<String, String>,
) -> (RenderedLabel, Vec<MissingForm>) {
    let mut missing = Vec::new();
    let label = RenderedLabel {
        pre: render_slot(
            template.pre_text.as_deref(),
            LabelSlot::Pre,
            forms_by_type,
            &mut missing,
        ),
        main: render_slot(
            template.main_text.as_deref(),
            LabelSlot::Main,
            forms_by_type,
            &mut missing,
        ),
        post: render_slot(
            template.post_text.as_deref(),
            LabelSlot::Post,
            forms_by_type,
            &mut missing,
        ),
        also: render_slot(
            template.also_text.as_deref(),
            LabelSlot::Also,
            forms_by_type,
            &mut missing,
        ),
    };
    (label, missing)
}

fn render_slot(
    text: Option<&str>,
    slot: LabelSlot,
    forms_by_type: &BTreeMap<String, String>,
    missing: &mut Vec<MissingForm>,
) -> String {
    let Some(text) = text else {
        return String::new();
    };

    PLACEHOLDER
        .replace_all(text, |captures: &Captures<'_>| {
            let name = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|group| group.as_str())
                .unwrap_or_default();
            match forms_by_type.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.push(MissingForm {
                        slot,
                        placeholder: name.to_string(),
                    });
                    String::new()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{render_label, LabelSlot};
    use crate::model::reference::Template;
    use std::collections::BTreeMap;

    fn template(pre: Option<&str>, main: Option<&str>, post: Option<&str>) -> Template {
        Template {
            id: 1,
            name: None,
            category_id: 1,
            language_id: None,
            dialect_ids: Default::default(),
            orthography_id: None,
            pre_text: pre.map(str::to_string),
            main_text: main.map(str::to_string),
            post_text: post.map(str::to_string),
            also_text: None,
        }
    }

    fn forms(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn substitutes_both_bracket_syntaxes() {
        let template = template(Some("de $(art)"), Some("${inf}"), None);
        let forms = forms(&[("art", "het"), ("inf", "lopen")]);
        let (label, missing) = render_label(&template, &forms);
        assert!(missing.is_empty());
        assert_eq!(label.pre, "de het");
        assert_eq!(label.main, "lopen");
        assert_eq!(label.post, "");
    }

    #[test]
    fn missing_placeholder_renders_empty_and_is_reported() {
        let template = template(None, Some("$(inf) / $(pl)"), None);
        let forms = forms(&[("inf", "lopen")]);
        let (label, missing) = render_label(&template, &forms);
        assert_eq!(label.main, "lopen / ");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].slot, LabelSlot::Main);
        assert_eq!(missing[0].placeholder, "pl");
    }

    #[test]
    fn rendering_is_idempotent() {
        let template = template(Some("$(art)"), Some("$(inf)"), Some("($(pl))"));
        let forms = forms(&[("art", "de"), ("inf", "lopen"), ("pl", "lopens")]);
        let first = render_label(&template, &forms);
        let second = render_label(&template, &forms);
        assert_eq!(first, second);
    }

    #[test]
    fn literal_text_passes_through_unchanged() {
        let template = template(None, Some("plain text, no markers"), None);
        let (label, missing) = render_label(&template, &BTreeMap::new());
        assert!(missing.is_empty());
        assert_eq!(label.main, "plain text, no markers");
    }
}
