//! Display-label template engine.
//!
//! # Responsibility
//! - Select the most specific applicable template for a variant's
//!   classification attributes.
//! - Render the four label fragments via form-type placeholder substitution.
//!
//! # Invariants
//! - Selection is deterministic: specificity descending, first match wins.
//! - Rendering is pure; the same template and form set always produce
//!   byte-identical output.
//! - Rendering problems are collected, never thrown, so one bad template does
//!   not abort sibling variants.

mod render;
mod resolver;

pub use render::{render_label, LabelSlot, MissingForm};
pub use resolver::resolve_template;

use std::fmt::{Display, Formatter};

/// Non-fatal template problem surfaced alongside a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderIssue {
    /// No template matched the variant's classification attributes.
    TemplateNotFound { variant_pos: usize },
    /// A placeholder referenced a form type the variant has no form for.
    MissingForm {
        variant_pos: usize,
        slot: LabelSlot,
        placeholder: String,
    },
}

impl Display for RenderIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TemplateNotFound { variant_pos } => {
                write!(f, "no label template matched variant at position {variant_pos}")
            }
            Self::MissingForm {
                variant_pos,
                slot,
                placeholder,
            } => write!(
                f,
                "variant at position {variant_pos} has no `{placeholder}` form for the {slot} label slot"
            ),
        }
    }
}
