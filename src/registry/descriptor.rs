// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;

use super::quit::QuitSignal;

/// Where to begin reading a newly watched source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    /// Skip existing content, only deliver what is written from now on.
    #[default]
    End,
    Beginning,
}

/// How a tailer reaches the source's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(PathBuf),
    /// Opaque runtime handle, e.g. a container ID.
    Container(String),
}

impl SourceLocation {
    pub fn is_empty(&self) -> bool {
        match self {
            SourceLocation::File(path) => path.as_os_str().is_empty(),
            SourceLocation::Container(handle) => handle.is_empty(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::File(path) => write!(f, "{}", path.display()),
            SourceLocation::Container(handle) => write!(f, "container:{}", handle),
        }
    }
}

/// Per-source settings carried by the runtime metadata of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOverrides {
    pub token: Option<String>,
    pub name: Option<String>,
    pub ignore: bool,
}

/// A source reported by discovery, before the registry resolved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub id: String,
    pub location: SourceLocation,
    pub start_at: StartAt,
    pub overrides: SourceOverrides,
}

impl SourceCandidate {
    pub fn new(id: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            id: id.into(),
            location,
            start_at: StartAt::default(),
            overrides: SourceOverrides::default(),
        }
    }

    pub fn starting_at(mut self, start_at: StartAt) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn with_overrides(mut self, overrides: SourceOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// A watched source. Immutable apart from the one-time use of its quit signal.
#[derive(Debug)]
pub struct SourceDescriptor {
    id: String,
    token: String,
    name: Option<String>,
    location: SourceLocation,
    start_at: StartAt,
    quit: QuitSignal,
}

impl SourceDescriptor {
    pub(crate) fn new(
        id: String,
        token: String,
        name: Option<String>,
        location: SourceLocation,
        start_at: StartAt,
    ) -> Self {
        Self {
            id,
            token,
            name,
            location,
            start_at,
            quit: QuitSignal::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name shown next to each delivered line.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn start_at(&self) -> StartAt {
        self.start_at
    }

    pub fn quit_signal(&self) -> &QuitSignal {
        &self.quit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_locations() {
        assert!(SourceLocation::File(PathBuf::new()).is_empty());
        assert!(SourceLocation::Container(String::new()).is_empty());
        assert!(!SourceLocation::Container("4f2a".to_string()).is_empty());
    }

    #[test]
    fn label_falls_back_to_id() {
        let location = SourceLocation::File(PathBuf::from("/var/log/x/x-json.log"));
        let named = SourceDescriptor::new(
            "x".to_string(),
            "T".to_string(),
            Some("web".to_string()),
            location.clone(),
            StartAt::End,
        );
        assert_eq!("web", named.label());

        let unnamed =
            SourceDescriptor::new("x".to_string(), "T".to_string(), None, location, StartAt::End);
        assert_eq!("x", unnamed.label());
    }
}
