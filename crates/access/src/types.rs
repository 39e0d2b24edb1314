//! Roles and certificate kinds shared by the registries.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// The role a node or user acts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Auth server holding the CA keys.
    Auth,
    /// A regular cluster node.
    Node,
    /// A client-facing proxy.
    Proxy,
    /// Cluster administrator.
    Admin,
    /// Interactive user.
    User,
    /// Browser-originated web client.
    Web,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 6] =
        [Role::Auth, Role::Node, Role::Proxy, Role::Admin, Role::User, Role::Web];

    /// Returns the lowercase name used in storage and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Node => "node",
            Self::Proxy => "proxy",
            Self::Admin => "admin",
            Self::User => "user",
            Self::Web => "web",
        }
    }

    /// Machine roles that may join the cluster through a provisioning token.
    #[must_use]
    pub fn is_provisionable(&self) -> bool {
        matches!(self, Self::Auth | Self::Node | Self::Proxy)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| AccessError::InvalidRole(format!("unknown role {s:?}")))
    }
}

/// The two certificate authorities of a cluster.
///
/// Also used as the `type` of a remote trust entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertKind {
    /// Signs node identities.
    Host,
    /// Signs user identities.
    User,
}

impl CertKind {
    /// Returns the lowercase name used in storage paths.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::User => "user",
        }
    }
}

impl fmt::Display for CertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertKind {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "user" => Ok(Self::User),
            other => Err(AccessError::invalid_name(
                "certificate kind",
                format!("expected \"host\" or \"user\", got {other:?}"),
            )),
        }
    }
}
