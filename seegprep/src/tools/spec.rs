//! Argument templates for external tools.
//!
//! A [`ToolSpec`] names a program and an argument vector in which `{name}`
//! placeholders stand for paths and parameters. Rendering never goes through
//! a shell: each template argument becomes exactly one process argument,
//! except a placeholder that makes up a whole argument and is bound to a list,
//! which splices one argument per item.

use crate::errors::ToolError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// A program plus its argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Executable name or path.
    pub program: String,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolSpec {
    /// Creates a new tool specification.
    #[must_use]
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns every placeholder name the template mentions.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<String> {
        self.args
            .iter()
            .flat_map(|arg| PLACEHOLDER.captures_iter(arg))
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Renders the argument template against `bindings`.
    ///
    /// # Errors
    ///
    /// Fails if a placeholder has no binding, or if a list binding is used
    /// inside a larger argument.
    pub fn render(&self, bindings: &Bindings) -> Result<Vec<String>, ToolError> {
        let mut rendered = Vec::with_capacity(self.args.len());

        for arg in &self.args {
            if let Some(name) = whole_placeholder(arg) {
                match bindings.get(name) {
                    Some(Binding::List(items)) => {
                        rendered.extend(items.iter().cloned());
                        continue;
                    }
                    Some(Binding::Value(value)) => {
                        rendered.push(value.clone());
                        continue;
                    }
                    None => return Err(self.unbound(name)),
                }
            }

            let mut out = String::with_capacity(arg.len());
            let mut last = 0;
            for caps in PLACEHOLDER.captures_iter(arg) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                out.push_str(&arg[last..whole.start()]);
                match bindings.get(name.as_str()) {
                    Some(Binding::Value(value)) => out.push_str(value),
                    Some(Binding::List(_)) => {
                        return Err(ToolError::ListInsideArgument {
                            program: self.program.clone(),
                            placeholder: name.as_str().to_string(),
                        })
                    }
                    None => return Err(self.unbound(name.as_str())),
                }
                last = whole.end();
            }
            out.push_str(&arg[last..]);
            rendered.push(out);
        }

        Ok(rendered)
    }

    fn unbound(&self, name: &str) -> ToolError {
        ToolError::UnboundPlaceholder {
            program: self.program.clone(),
            placeholder: name.to_string(),
        }
    }
}

fn whole_placeholder(arg: &str) -> Option<&str> {
    let caps = PLACEHOLDER.captures(arg)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == arg.len() {
        caps.get(1).map(|m| &arg[m.start()..m.end()])
    } else {
        None
    }
}

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A single argument (or argument fragment).
    Value(String),
    /// Zero or more whole arguments.
    List(Vec<String>),
}

/// Placeholder bindings for rendering a [`ToolSpec`].
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, Binding>,
}

impl Bindings {
    /// Creates an empty binding set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a scalar value.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), Binding::Value(value.into()));
        self
    }

    /// Binds a list of whole arguments.
    #[must_use]
    pub fn list(mut self, name: impl Into<String>, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.values.insert(
            name.into(),
            Binding::List(items.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Inserts a binding in place.
    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        self.values.insert(name.into(), binding);
    }

    /// Looks up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.values.get(name)
    }
}

/// Converts a path to a process argument.
///
/// # Errors
///
/// Fails if the path is not valid UTF-8.
pub fn path_arg(path: &Path) -> Result<String, ToolError> {
    path.to_str()
        .map(ToString::to_string)
        .ok_or_else(|| ToolError::non_utf8(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_whole_arguments() {
        let spec = ToolSpec::new("mincnlm", ["-clobber", "{input}", "{output}"]);
        let bindings = Bindings::new()
            .value("input", "/o/in.mnc")
            .value("output", "/o/out.mnc");

        assert_eq!(
            spec.render(&bindings).unwrap(),
            vec!["-clobber", "/o/in.mnc", "/o/out.mnc"]
        );
    }

    #[test]
    fn test_render_splices_lists() {
        let spec = ToolSpec::new("dcm2mnc", ["{files}", "{out_dir}", "-anon"]);
        let bindings = Bindings::new()
            .list("files", ["IM1", "IM2", "IM3"])
            .value("out_dir", "/o");

        assert_eq!(
            spec.render(&bindings).unwrap(),
            vec!["IM1", "IM2", "IM3", "/o", "-anon"]
        );
    }

    #[test]
    fn test_empty_list_drops_argument() {
        let spec = ToolSpec::new("bestlinreg_s2", ["{noscale}", "-lsq6"]);
        let bindings = Bindings::new().list("noscale", Vec::<String>::new());
        assert_eq!(spec.render(&bindings).unwrap(), vec!["-lsq6"]);
    }

    #[test]
    fn test_render_substitutes_fragments() {
        let spec = ToolSpec::new("mincbeast", ["-configuration", "{library}/default.1mm.conf"]);
        let bindings = Bindings::new().value("library", "/models/beast");

        assert_eq!(
            spec.render(&bindings).unwrap(),
            vec!["-configuration", "/models/beast/default.1mm.conf"]
        );
    }

    #[test]
    fn test_empty_argument_is_preserved() {
        let spec = ToolSpec::new("dcm2mnc", ["-dname", ""]);
        assert_eq!(spec.render(&Bindings::new()).unwrap(), vec!["-dname", ""]);
    }

    #[test]
    fn test_unbound_placeholder_fails() {
        let spec = ToolSpec::new("mincresample", ["-transformation", "{transform}"]);
        let err = spec.render(&Bindings::new()).unwrap_err();
        assert!(matches!(
            err,
            ToolError::UnboundPlaceholder { ref placeholder, .. } if placeholder == "transform"
        ));
    }

    #[test]
    fn test_list_inside_argument_fails() {
        let spec = ToolSpec::new("x", ["--files={files}"]);
        let bindings = Bindings::new().list("files", ["a", "b"]);
        assert!(matches!(
            spec.render(&bindings),
            Err(ToolError::ListInsideArgument { .. })
        ));
    }

    #[test]
    fn test_values_are_not_reinterpreted() {
        let spec = ToolSpec::new("x", ["{name}"]);
        let bindings = Bindings::new().value("name", "{other}; rm -rf /");
        assert_eq!(spec.render(&bindings).unwrap(), vec!["{other}; rm -rf /"]);
    }

    #[test]
    fn test_placeholders_listing() {
        let spec = ToolSpec::new("mincmask", ["-clobber", "{input}", "{mask}", "{output}"]);
        let names: Vec<_> = spec.placeholders().into_iter().collect();
        assert_eq!(names, vec!["input", "mask", "output"]);
    }
}
