//! Tera rendering of the scene skeleton.
//!
//! Slots are plain `{{ name }}` expressions. The slot set is read from the
//! skeleton and must match the supplied values exactly, so a drifted
//! skeleton fails instead of rendering a partial scene.

use crate::errors::{PreprocessError, TemplateSubstitutionError};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tera::{Context, Tera};

static SLOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("slot pattern is valid")
});

const TEMPLATE_NAME: &str = "scene.xml";

/// Returns the slot names referenced by a skeleton.
#[must_use]
pub fn template_slots(source: &str) -> BTreeSet<String> {
    SLOT.captures_iter(source)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Escapes a value for use inside a double-quoted XML attribute.
#[must_use]
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders `source` with every slot bound from `values`.
///
/// Values are attribute-escaped on output. Text outside the slots is
/// reproduced byte for byte.
///
/// # Errors
///
/// Returns [`TemplateSubstitutionError`] when the slot set and `values`
/// disagree, and a template error when Tera rejects the skeleton.
pub fn render_template(
    source: &str,
    values: &BTreeMap<String, String>,
) -> Result<String, PreprocessError> {
    let slots = template_slots(source);
    if let Some(slot) = slots.iter().find(|slot| !values.contains_key(*slot)) {
        return Err(TemplateSubstitutionError::Unbound { slot: slot.clone() }.into());
    }
    if let Some(slot) = values.keys().find(|key| !slots.contains(*key)) {
        return Err(TemplateSubstitutionError::Unused { slot: slot.clone() }.into());
    }

    let mut tera = Tera::default();
    tera.set_escape_fn(escape_attribute);
    tera.autoescape_on(vec![".xml"]);
    tera.add_raw_template(TEMPLATE_NAME, source)?;

    let mut context = Context::new();
    for (slot, value) in values {
        context.insert(slot.as_str(), value);
    }
    Ok(tera.render(TEMPLATE_NAME, &context)?)
}
