//! Action kinds and permission set algebra

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthzError;

/// Kind of action a request performs on its target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Create,
    Read,
    Update,
    Delete,
    List,
    Attach,
    Detach,
    Other,
    #[default]
    NotDefined,
    Search,
    UpdateRemoveOnly,
}

/// Coarse grouping of action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionProfile {
    ReadOnly,
    ConstructiveChange,
    DestructiveChange,
    Associate,
}

/// Action kinds ranked from most to least severe
pub const ACTION_KIND_SEVERITY: [ActionKind; 10] = [
    ActionKind::Create,
    ActionKind::Update,
    ActionKind::Attach,
    ActionKind::Other,
    ActionKind::Delete,
    ActionKind::Detach,
    ActionKind::UpdateRemoveOnly,
    ActionKind::List,
    ActionKind::Read,
    ActionKind::Search,
];

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::Create,
        ActionKind::Read,
        ActionKind::Update,
        ActionKind::Delete,
        ActionKind::List,
        ActionKind::Attach,
        ActionKind::Detach,
        ActionKind::Other,
        ActionKind::NotDefined,
        ActionKind::Search,
        ActionKind::UpdateRemoveOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "CREATE",
            ActionKind::Read => "READ",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
            ActionKind::List => "LIST",
            ActionKind::Attach => "ATTACH",
            ActionKind::Detach => "DETACH",
            ActionKind::Other => "OTHER",
            ActionKind::NotDefined => "NOT_DEFINED",
            ActionKind::Search => "SEARCH",
            ActionKind::UpdateRemoveOnly => "UPDATE_REMOVE_ONLY",
        }
    }

    /// Look up a kind by name, ignoring case
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidActionKind`] for unknown names.
    pub fn from_name(name: &str) -> Result<Self, AuthzError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or(AuthzError::InvalidActionKind)
    }

    pub fn profile(self) -> ActionProfile {
        match self {
            ActionKind::Read | ActionKind::List | ActionKind::Search => ActionProfile::ReadOnly,
            ActionKind::Delete | ActionKind::Detach | ActionKind::UpdateRemoveOnly => {
                ActionProfile::DestructiveChange
            }
            ActionKind::Attach => ActionProfile::Associate,
            ActionKind::Create | ActionKind::Update | ActionKind::Other | ActionKind::NotDefined => {
                ActionProfile::ConstructiveChange
            }
        }
    }

    pub fn is_change(self) -> bool {
        self != ActionKind::Read
    }

    pub fn is_search(self) -> bool {
        self == ActionKind::Search
    }

    pub fn is_create(self) -> bool {
        self == ActionKind::Create
    }

    /// True for read-only and destructive kinds
    pub fn is_delete_friendly(self) -> bool {
        matches!(
            self.profile(),
            ActionProfile::ReadOnly | ActionProfile::DestructiveChange
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Most severe action kind named in `kinds`
///
/// Names are compared case-insensitively. An empty list, or one without any
/// ranked kind, yields [`ActionKind::NotDefined`].
pub fn top_action_kind<S: AsRef<str>>(kinds: &[S]) -> ActionKind {
    let named: Vec<ActionKind> = kinds
        .iter()
        .filter_map(|kind| ActionKind::from_name(kind.as_ref()).ok())
        .collect();

    ACTION_KIND_SEVERITY
        .into_iter()
        .find(|kind| named.contains(kind))
        .unwrap_or_default()
}

/// Deduplicated, sorted elements present in both lists
pub fn intersect<S: AsRef<str>>(left: &[S], right: &[S]) -> Vec<String> {
    let right: BTreeSet<&str> = right.iter().map(AsRef::as_ref).collect();
    left.iter()
        .map(AsRef::as_ref)
        .filter(|item| right.contains(item))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Deduplicated, sorted elements of `left` missing from `right`
pub fn difference<S: AsRef<str>>(left: &[S], right: &[S]) -> Vec<String> {
    let right: BTreeSet<&str> = right.iter().map(AsRef::as_ref).collect();
    left.iter()
        .map(AsRef::as_ref)
        .filter(|item| !right.contains(item))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}
