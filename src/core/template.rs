//! Handlebars rendering for release labels and the release seed file
//!
//! Output is plain text, so nothing is HTML-escaped. Unknown variables
//! render as the empty string; block helpers (`{{#if}}`, `{{#each}}`,
//! `{{else}}`) behave as in any handlebars template.

use crate::core::error::TemplateError;
use handlebars::Handlebars;
use std::collections::BTreeMap;

/// Variables available to a template
pub type Vars = BTreeMap<String, String>;

fn registry() -> Handlebars<'static> {
  let mut registry = Handlebars::new();
  registry.register_escape_fn(handlebars::no_escape);
  registry
}

/// Render `template` with `vars`
pub fn render(template: &str, vars: &Vars) -> Result<String, TemplateError> {
  registry()
    .render_template(template, vars)
    .map_err(|e| TemplateError::Render { reason: e.to_string() })
}
