//! Relational RBAC records and the compiled policy line.
//!
//! # Purpose
//! Mirrors the rows the policy compiler reads (roles, menus, role/menu links,
//! menu resources) and the triple it emits.
//!
//! # Key invariants
//! - Only [`Status::Enabled`] roles and menus are compiled.
//! - A [`MenuResource`] is identified for authorization purposes by its
//!   `(method, path)` pair, not its row id.
//! - [`PolicyLine`] ordering is `(subject, object, action)`; compiled output is
//!   sorted by it.
//! - A line is only written to a policy file when every field is storable:
//!   non-empty, without surrounding whitespace, and free of
//!   [`RESERVED_FIELD_CHARS`].
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Enabled,
    Disabled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Enabled => "enabled",
            Status::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enabled" => Some(Status::Enabled),
            "disabled" => Some(Status::Disabled),
            _ => None,
        }
    }
}

/// Page menus gate whole screens; button menus gate single actions on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuKind {
    #[default]
    Page,
    Button,
}

impl MenuKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuKind::Page => "page",
            MenuKind::Button => "button",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page" => Some(MenuKind::Page),
            "button" => Some(MenuKind::Button),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: MenuKind,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub parent_path: String,
    #[serde(default)]
    pub status: Status,
}

impl Menu {
    pub fn to_ref(&self) -> MenuRef {
        MenuRef {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            parent_path: self.parent_path.clone(),
        }
    }
}

/// Projection of a menu row carrying only what ancestor resolution needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MenuRef {
    pub id: String,
    pub parent_id: String,
    pub parent_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MenuResource {
    pub id: String,
    pub menu_id: String,
    pub method: String,
    pub path: String,
}

impl MenuResource {
    pub fn key(&self) -> (&str, &str) {
        (&self.method, &self.path)
    }
}

/// One compiled permission: `subject` (role id) may call `action` (HTTP method)
/// on `object` (request path pattern).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PolicyLine {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl PolicyLine {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    pub fn for_resource(role_id: &str, resource: &MenuResource) -> Self {
        Self::new(role_id, resource.path.clone(), resource.method.clone())
    }

    /// Name of the first field the policy file cannot carry verbatim.
    pub fn unstorable_field(&self) -> Option<&'static str> {
        [
            ("subject", &self.subject),
            ("object", &self.object),
            ("action", &self.action),
        ]
        .into_iter()
        .find(|(_, value)| !is_storable_field(value))
        .map(|(name, _)| name)
    }

    /// Fields in the order the engine reports loaded rules.
    pub fn to_rule(&self) -> Vec<String> {
        vec![
            self.subject.clone(),
            self.object.clone(),
            self.action.clone(),
        ]
    }
}

/// Characters the policy file loader treats as structure.
pub const RESERVED_FIELD_CHARS: &[char] = &[',', '"', '\r', '\n'];

fn is_storable_field(value: &str) -> bool {
    // The loader trims fields, so surrounding whitespace would not survive.
    !value.is_empty() && value.trim() == value && !value.contains(RESERVED_FIELD_CHARS)
}

impl fmt::Display for PolicyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p, {}, {}, {}", self.subject, self.object, self.action)
    }
}
