use regex::{Captures, Regex};

/// Ordered regex → command routing, composed into plugins that take
/// textual commands.
///
/// Patterns are tried in registration order and the first match wins.
/// Anchor them yourself (`^...$`) when partial matches must not count.
#[derive(Debug, Clone)]
pub struct CommandTable<C> {
    routes: Vec<(Regex, C)>,
}

impl<C: Copy> CommandTable<C> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn register(&mut self, pattern: &str, command: C) -> Result<&mut Self, regex::Error> {
        self.routes.push((Regex::new(pattern)?, command));
        Ok(self)
    }

    pub fn route<'t>(&self, text: &'t str) -> Option<(C, Captures<'t>)> {
        self.routes
            .iter()
            .find_map(|(re, cmd)| re.captures(text).map(|caps| (*cmd, caps)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<C: Copy> Default for CommandTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
