//! Role to department access rules.
//!
//! Roles are trusted inputs. [`AccessPolicy::build_filter`] is total: an unknown role resolves to
//! the default role, and a role missing from the table yields a filter that matches nothing.

use crate::index::filter::{Filter, MetadataField};
use std::collections::BTreeMap;
use thiserror::Error;

/// Role used when the caller's role is not in the table.
pub const DEFAULT_ROLE: &str = "general";

/// Role that is never filtered.
pub const ADMIN_ROLE: &str = "admin";

const WILDCARD: &str = "*";

/// Errors raised while parsing a role table override.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessPolicyError {
    /// Entry is not of the form `role=Dept,Dept`.
    #[error("malformed role entry `{0}`")]
    MalformedEntry(String),
    /// Entry names a role but no departments.
    #[error("role `{0}` has no departments")]
    EmptyRole(String),
    /// Override contained no entries at all.
    #[error("role table is empty")]
    Empty,
}

/// Departments a role may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedDepartments {
    /// Every department.
    All,
    /// Only the listed departments.
    Only(Vec<String>),
}

impl AllowedDepartments {
    fn permits(&self, department: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(departments) => departments.iter().any(|allowed| allowed == department),
        }
    }
}

/// Static role table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    roles: BTreeMap<String, AllowedDepartments>,
    default_role: String,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        let only = |departments: &[&str]| {
            AllowedDepartments::Only(departments.iter().map(|d| (*d).to_string()).collect())
        };
        let roles = BTreeMap::from([
            (ADMIN_ROLE.to_string(), AllowedDepartments::All),
            ("hr".to_string(), only(&["HR", "People"])),
            ("engineer".to_string(), only(&["Engineering", "Tech"])),
            ("finance".to_string(), only(&["Finance", "Budget"])),
            (DEFAULT_ROLE.to_string(), only(&["General", "Public"])),
        ]);
        Self {
            roles,
            default_role: DEFAULT_ROLE.to_string(),
        }
    }
}

impl AccessPolicy {
    /// Parse a table of the form `admin=*;hr=HR,People;general=General`.
    ///
    /// Role names are case-insensitive; department names are kept verbatim.
    pub fn parse(table: &str) -> Result<Self, AccessPolicyError> {
        let mut roles = BTreeMap::new();
        for entry in table.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (role, departments) = entry
                .split_once('=')
                .ok_or_else(|| AccessPolicyError::MalformedEntry(entry.to_string()))?;
            let role = role.trim().to_lowercase();
            if role.is_empty() {
                return Err(AccessPolicyError::MalformedEntry(entry.to_string()));
            }
            let departments: Vec<String> = departments
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
            let allowed = if departments.iter().any(|d| d == WILDCARD) {
                AllowedDepartments::All
            } else if departments.is_empty() {
                return Err(AccessPolicyError::EmptyRole(role));
            } else {
                AllowedDepartments::Only(departments)
            };
            roles.insert(role, allowed);
        }
        if roles.is_empty() {
            return Err(AccessPolicyError::Empty);
        }
        Ok(Self {
            roles,
            default_role: DEFAULT_ROLE.to_string(),
        })
    }

    /// Resolve a caller role to the role used for filtering.
    pub fn resolve_role<'a>(&'a self, role: &str) -> &'a str {
        let normalized = role.trim().to_lowercase();
        match self.roles.get_key_value(normalized.as_str()) {
            Some((known, _)) => known,
            None => &self.default_role,
        }
    }

    /// Departments granted to `role` after resolution.
    pub fn allowed(&self, role: &str) -> Option<&AllowedDepartments> {
        self.roles.get(self.resolve_role(role))
    }

    /// Build the index filter for `role`, optionally narrowed to `department`.
    pub fn build_filter(&self, role: &str, department: Option<&str>) -> Filter {
        let Some(allowed) = self.allowed(role) else {
            tracing::warn!(role, "Default role missing from access table; denying all");
            return Filter::one_of(MetadataField::Department, Vec::<String>::new());
        };
        if self.resolve_role(role) == ADMIN_ROLE && *allowed == AllowedDepartments::All {
            return Filter::Unrestricted;
        }
        let requested = department.map(str::trim).filter(|d| !d.is_empty());
        if let Some(department) = requested
            && allowed.permits(department)
        {
            return Filter::equals(MetadataField::Department, department);
        }
        match allowed {
            AllowedDepartments::All => Filter::Unrestricted,
            AllowedDepartments::Only(departments) if departments.len() == 1 => {
                Filter::equals(MetadataField::Department, departments[0].clone())
            }
            AllowedDepartments::Only(departments) => {
                Filter::one_of(MetadataField::Department, departments.clone())
            }
        }
    }
}

/// Build a filter using the built-in role table.
pub fn build_filter(role: &str, department: Option<&str>) -> Filter {
    AccessPolicy::default().build_filter(role, department)
}
