use std::ffi::OsString;

/// Variables read from the launcher's own environment and set explicitly on
/// the dependency install steps and on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughEnv {
    vars: Vec<(String, OsString)>,
}

impl PassthroughEnv {
    pub fn from_process(names: &[String]) -> Self {
        Self::capture(names, |name| std::env::var_os(name))
    }

    /// Keep the names `lookup` has a value for. Unset variables are skipped.
    pub fn capture<F>(names: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let vars = names
            .iter()
            .filter_map(|name| lookup(name).map(|value| (name.clone(), value)))
            .collect();
        Self { vars }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OsString)> {
        self.vars.iter().map(|(name, value)| (name.as_str(), value))
    }
}
