// src/types.rs

//! Small shared vocabulary types.

/// Name of a piece of shared, mutable per-session group state.
pub type GroupName = String;

/// Group namespace every session starts with: all documents in group 1.
pub const DEFAULT_GROUPS: &str = "default";

/// Pseudo group name guarding a session's stat stack, so stat pushes and
/// pops are ordered like any other write.
pub const STAT_STACK: &str = "@stats";

/// Convenience for building group name lists from string literals.
pub fn group_names<I, S>(names: I) -> Vec<GroupName>
where
    I: IntoIterator<Item = S>,
    S: Into<GroupName>,
{
    names.into_iter().map(Into::into).collect()
}
