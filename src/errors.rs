//! Small marker error types for outcomes `main` needs to distinguish by
//! kind, the same shape as the teacher's `JobNotFound` in `main.rs`.

/// A host list resolved to zero hosts after `--hosts-file`/domain
/// expansion (spec.md §4.2 edge case).
#[derive(Debug)]
pub struct NoHostsError;

impl std::fmt::Display for NoHostsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no hosts to run against")
    }
}

impl std::error::Error for NoHostsError {}
