//! Failure taxonomy shared by the capture and storage paths.

use serde::Serialize;

/// How a failure is handled, independent of where it came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    /// Network-level; retried with backoff.
    TransportFailure,
    /// The device answered with something unusable; retried, logged louder.
    ProtocolFailure,
    /// The store could not take a frame the device delivered.
    PersistenceFailure,
    /// A write that would break timestamp ordering; discarded.
    InvariantViolation,
}
