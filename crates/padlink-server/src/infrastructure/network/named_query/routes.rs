//! Prefix registration and longest-prefix lookup.

use super::tlv::Name;
use crate::infrastructure::network::TransportError;

/// What an answered query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRoute {
    /// Next command, else movement.
    Update,
    /// Movement only.
    Move,
    /// Commands only.
    Click,
    /// Sequence resynchronisation; the request packet is the next component.
    Seq,
    /// The server-wide salt in cleartext.
    Salt,
}

impl QueryRoute {
    /// Name component under the server prefix.
    pub fn component(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Move => "move",
            Self::Click => "click",
            Self::Seq => "seq",
            Self::Salt => "salt",
        }
    }
}

/// Registered name prefixes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<(Name, QueryRoute)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::RouteRegistration`] if the prefix is empty
    /// or already taken.
    pub fn register(&mut self, prefix: Name, route: QueryRoute) -> Result<(), TransportError> {
        if prefix.is_empty() {
            return Err(TransportError::RouteRegistration {
                prefix: prefix.to_string(),
                reason: "empty prefix would capture every query".to_string(),
            });
        }
        if self.routes.iter().any(|(p, _)| *p == prefix) {
            return Err(TransportError::RouteRegistration {
                prefix: prefix.to_string(),
                reason: "prefix already registered".to_string(),
            });
        }
        self.routes.push((prefix, route));
        Ok(())
    }

    /// Finds the longest registered prefix of `name`.
    pub fn lookup(&self, name: &Name) -> Option<(&Name, QueryRoute)> {
        self.routes
            .iter()
            .filter(|(prefix, _)| name.has_prefix(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, route)| (prefix, *route))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}
