//! Transaction definitions: what a caller asks for at `begin`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transaction::isolation::IsolationLevel;

/// How a new logical scope relates to the transaction already active in the
/// calling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Join the active transaction, or start one if none is active.
    #[default]
    Required,
    /// Suspend the active transaction (if any) and start an independent one.
    RequiresNew,
    /// Create a savepoint in the active transaction, or start one if none is active.
    Nested,
    /// Join the active transaction, or run without one.
    Supports,
    /// Suspend the active transaction (if any) and run without one.
    NotSupported,
    /// Join the active transaction; fail if none is active.
    Mandatory,
    /// Run without a transaction; fail if one is active.
    Never,
}

impl Propagation {
    /// Whether this propagation starts a physical transaction when none is active.
    pub fn creates_when_absent(&self) -> bool {
        matches!(
            self,
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested
        )
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Nested => "NESTED",
            Propagation::Supports => "SUPPORTS",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Mandatory => "MANDATORY",
            Propagation::Never => "NEVER",
        };
        f.write_str(name)
    }
}

/// Immutable description of one logical transaction scope.
///
/// ```
/// use txcoord::transaction::{IsolationLevel, Propagation, TransactionDefinition};
///
/// let def = TransactionDefinition::new(Propagation::RequiresNew)
///     .with_isolation(IsolationLevel::Serializable)
///     .with_timeout_secs(30)
///     .read_only(true)
///     .named("audit-log");
/// assert_eq!(def.propagation(), Propagation::RequiresNew);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionDefinition {
    propagation: Propagation,
    isolation: IsolationLevel,
    timeout_secs: Option<u64>,
    read_only: bool,
    name: Option<String>,
}

impl TransactionDefinition {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Default::default()
        }
    }

    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    pub fn nested() -> Self {
        Self::new(Propagation::Nested)
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for TransactionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}: ", name)?;
        }
        write!(f, "{}", self.propagation)?;
        if self.isolation.is_specified() {
            write!(f, ",ISOLATION {}", self.isolation)?;
        }
        if let Some(secs) = self.timeout_secs {
            write!(f, ",TIMEOUT {}s", secs)?;
        }
        if self.read_only {
            write!(f, ",READ ONLY")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let def = TransactionDefinition::default();
        assert_eq!(def.propagation(), Propagation::Required);
        assert_eq!(def.isolation(), IsolationLevel::Default);
        assert_eq!(def.timeout(), None);
        assert!(!def.is_read_only());
        assert_eq!(def.name(), None);
    }

    #[test]
    fn test_display() {
        let def = TransactionDefinition::requires_new()
            .with_isolation(IsolationLevel::ReadCommitted)
            .with_timeout_secs(5)
            .read_only(true)
            .named("report");
        assert_eq!(
            def.to_string(),
            "report: REQUIRES_NEW,ISOLATION READ COMMITTED,TIMEOUT 5s,READ ONLY"
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let def: TransactionDefinition =
            serde_json::from_str(r#"{"propagation": "nested", "read_only": true}"#).unwrap();
        assert_eq!(def.propagation(), Propagation::Nested);
        assert!(def.is_read_only());
        assert_eq!(def.isolation(), IsolationLevel::Default);
    }

    #[test]
    fn test_creates_when_absent() {
        assert!(Propagation::Nested.creates_when_absent());
        assert!(!Propagation::Supports.creates_when_absent());
        assert!(!Propagation::Mandatory.creates_when_absent());
    }
}
