//! Variables and classes visible to edit promises.
//!
//! The session owns a mutable [`Context`]; operators only ever see an
//! immutable [`Snapshot`] taken when a promise is dispatched.

use std::collections::{BTreeMap, BTreeSet};

/// Mutable variable and class state, owned by the edit session.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: BTreeMap<String, String>,
    classes: BTreeSet<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or overwrite a variable. Returns true if the value changed.
    pub fn define_var(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.vars.insert(name.into(), value.clone()) {
            Some(old) => old != value,
            None => true,
        }
    }

    /// Define a class. Returns true if it was not already set.
    pub fn define_class(&mut self, name: impl Into<String>) -> bool {
        self.classes.insert(name.into())
    }

    pub fn is_defined(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            vars: self.vars.clone(),
            classes: self.classes.clone(),
        }
    }
}

/// Read-only view of variables and classes handed to each operator call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    vars: BTreeMap<String, String>,
    classes: BTreeSet<String>,
}

impl Snapshot {
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn is_defined(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    /// Expand `$(name)` and `${name}` references in `template`.
    ///
    /// Unknown names and unterminated references are left verbatim.
    pub fn expand(&self, template: &str) -> String {
        if !template.contains('$') {
            return template.to_string();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            let close = match tail.as_bytes().get(1) {
                Some(b'(') => Some(')'),
                Some(b'{') => Some('}'),
                _ => None,
            };

            let replaced = close.and_then(|close| {
                let end = tail[2..].find(close)?;
                let name = &tail[2..2 + end];
                let value = self.var(name)?;
                Some((value, 2 + end + 1))
            });

            match replaced {
                Some((value, consumed)) => {
                    out.push_str(value);
                    rest = &tail[consumed..];
                }
                None => {
                    out.push('$');
                    rest = &tail[1..];
                }
            }
        }

        out.push_str(rest);
        out
    }
}
