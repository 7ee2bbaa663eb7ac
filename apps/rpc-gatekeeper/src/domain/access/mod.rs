//! Access Control Types
//!
//! Domain types for deciding whether a consumer may invoke an RPC method.
//!
//! # Design
//!
//! The access control list maps each consumer to an ordered list of
//! permission patterns. A pattern has two segments (service and method),
//! either of which may be the `*` wildcard. Patterns are checked in
//! configured order and the first match grants access.
//!
//! The list is built once at startup and never mutated afterwards, so
//! [`AccessPolicy`] can be shared across tasks without locking.
//!
//! Two spellings are accepted for patterns and method identifiers:
//! - slash form, as used on the wire: `/main.Biz/Check`, `/main.Admin/*`
//! - dot form, split on the last dot: `Foo.Bar`, `*.Ping`

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Method Path
// =============================================================================

/// A two-segment RPC method identifier (`<service>/<method>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    service: String,
    method: String,
}

impl MethodPath {
    /// Create a method path from its segments.
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Parse a method identifier in slash (`/svc/Method`) or dot
    /// (`svc.Method`) form.
    ///
    /// Returns `None` unless the identifier has exactly two non-empty
    /// segments.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        split_segments(raw).map(|(service, method)| Self::new(service, method))
    }

    /// The service segment.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The method segment.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

fn split_segments(raw: &str) -> Option<(&str, &str)> {
    let trimmed = raw.trim_start_matches('/');
    let (left, right) = if raw.starts_with('/') || trimmed.contains('/') {
        trimmed.split_once('/')?
    } else {
        trimmed.rsplit_once('.')?
    };

    if left.is_empty() || right.is_empty() || right.contains('/') {
        return None;
    }
    Some((left, right))
}

// =============================================================================
// Permission Pattern
// =============================================================================

/// One segment of a permission pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches any value (`*`).
    Any,
    /// Matches exactly this value.
    Exact(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::Any
        } else {
            Self::Exact(raw.to_string())
        }
    }

    /// Check whether this segment accepts `value`.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(value) => f.write_str(value),
        }
    }
}

/// A permission granted to a consumer: service and method segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPattern {
    service: Segment,
    method: Segment,
}

impl PermissionPattern {
    /// Check whether this pattern grants access to `method`.
    #[must_use]
    pub fn matches(&self, method: &MethodPath) -> bool {
        self.service.matches(method.service()) && self.method.matches(method.method())
    }
}

impl FromStr for PermissionPattern {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service, method) =
            split_segments(s).ok_or_else(|| AclError::InvalidPattern(s.to_string()))?;
        Ok(Self {
            service: Segment::parse(service),
            method: Segment::parse(method),
        })
    }
}

impl fmt::Display for PermissionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

// =============================================================================
// Access Control List
// =============================================================================

/// Mapping from consumer to its ordered permission patterns.
#[derive(Debug, Clone, Default)]
pub struct AccessControlList {
    entries: HashMap<String, Vec<PermissionPattern>>,
}

impl AccessControlList {
    /// Parse an ACL from its JSON configuration payload.
    ///
    /// The payload is an object mapping consumer name to an array of
    /// permission strings:
    ///
    /// ```rust
    /// use rpc_gatekeeper::domain::access::AccessControlList;
    ///
    /// let acl = AccessControlList::from_json(
    ///     r#"{"logger": ["/main.Admin/Logging"], "biz_admin": ["/main.Biz/*"]}"#,
    /// )
    /// .unwrap();
    /// assert_eq!(acl.len(), 2);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `AclError` if the payload is not a JSON object of string
    /// arrays, a consumer name is empty, or a pattern is malformed.
    pub fn from_json(payload: &str) -> Result<Self, AclError> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(payload)?;

        let mut entries = HashMap::with_capacity(raw.len());
        for (consumer, patterns) in raw {
            if consumer.is_empty() {
                return Err(AclError::EmptyConsumer);
            }
            let patterns = patterns
                .iter()
                .map(|p| p.parse())
                .collect::<Result<Vec<PermissionPattern>, _>>()?;
            entries.insert(consumer, patterns);
        }

        Ok(Self { entries })
    }

    /// Get the permission patterns for a consumer, in configured order.
    #[must_use]
    pub fn permissions(&self, consumer: &str) -> Option<&[PermissionPattern]> {
        self.entries.get(consumer).map(Vec::as_slice)
    }

    /// Number of consumers in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the list has no consumers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Errors building an access control list.
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    /// The payload is not valid ACL JSON.
    #[error("invalid ACL payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A consumer key is the empty string.
    #[error("ACL contains an empty consumer name")]
    EmptyConsumer,

    /// A permission string does not have two non-empty segments.
    #[error("invalid permission pattern {0:?}")]
    InvalidPattern(String),
}

// =============================================================================
// Access Policy
// =============================================================================

/// Why a consumer was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The consumer has no entry in the access control list.
    #[error("unknown consumer {consumer:?}")]
    UnknownConsumer {
        /// The refused consumer.
        consumer: String,
    },

    /// No pattern for the consumer matches the method.
    #[error("access denied: {consumer:?} may not call {method}")]
    AccessDenied {
        /// The refused consumer.
        consumer: String,
        /// The method that was requested.
        method: String,
    },
}

/// Evaluates consumer access against an immutable access control list.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    acl: AccessControlList,
}

impl AccessPolicy {
    /// Create a policy backed by `acl`.
    #[must_use]
    pub const fn new(acl: AccessControlList) -> Self {
        Self { acl }
    }

    /// Decide whether `consumer` may invoke `method`.
    ///
    /// Returns the first pattern that grants access.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::UnknownConsumer` if the consumer is not in
    /// the list, or `PolicyError::AccessDenied` if none of its patterns
    /// match.
    pub fn authorize(
        &self,
        consumer: &str,
        method: &MethodPath,
    ) -> Result<&PermissionPattern, PolicyError> {
        let patterns =
            self.acl
                .permissions(consumer)
                .ok_or_else(|| PolicyError::UnknownConsumer {
                    consumer: consumer.to_string(),
                })?;

        patterns
            .iter()
            .find(|pattern| pattern.matches(method))
            .ok_or_else(|| PolicyError::AccessDenied {
                consumer: consumer.to_string(),
                method: method.to_string(),
            })
    }

    /// The backing access control list.
    #[must_use]
    pub const fn acl(&self) -> &AccessControlList {
        &self.acl
    }
}

// =============================================================================
// Tests
// =============================================================================
