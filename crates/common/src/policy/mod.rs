//! # Access policies
//!
//! Canonical in-memory model of S3 access-policy documents, used both for
//! bucket (anonymous access) policies and for MinIO canned IAM policies.
//!
//! Documents compare **semantically**: statements are matched as a set and
//! each statement holds its actions, resources and principals as sets, so
//! two documents that only differ in ordering or in single-value vs list
//! encoding are equal. Byte comparison of serialized policies would never
//! converge because MinIO re-encodes what it stores.
//!
//! - [`canned`] builds the documents for each [`AnonymousAccess`] level and
//!   translates declarative [`StatementSpec`]s.
//! - [`decide`](mod@decide) compares a live document with the desired level.

mod action;
pub mod canned;
pub mod decide;
mod resource;

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use action::Action;
pub use canned::{
    anonymous_policy, bucket_user_policy, download_policy, from_statements, public_policy,
    upload_policy,
};
pub use decide::{decide, Decision};
pub use resource::Resource;

/// Policy language version emitted in every generated document.
pub const DEFAULT_VERSION: &str = "2012-10-17";

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid action '{0}'")]
    InvalidAction(String),
    #[error("invalid sub-path '{0}'")]
    InvalidSubPath(String),
    #[error("a policy needs at least one statement")]
    EmptyStatements,
    #[error("policy document encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anonymous access level of a bucket.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AnonymousAccess {
    /// No anonymous access; represented by the absence of a bucket policy.
    #[default]
    Private,
    /// Anonymous upload and download.
    Public,
    /// Anonymous upload only.
    Upload,
    /// Anonymous download only.
    Download,
}

impl std::fmt::Display for AnonymousAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnonymousAccess::Private => write!(f, "private"),
            AnonymousAccess::Public => write!(f, "public"),
            AnonymousAccess::Upload => write!(f, "upload"),
            AnonymousAccess::Download => write!(f, "download"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Effect {
    Allow,
    Deny,
}

/// A declarative statement as written by users: sub-paths of the bucket,
/// an effect, and S3 action names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatementSpec {
    /// Object prefixes inside the bucket; empty targets the bucket itself.
    #[serde(default)]
    pub sub_paths: Vec<String>,
    pub effect: Effect,
    pub actions: Vec<String>,
}

/// Principals a bucket-policy statement applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub aws: BTreeSet<String>,
}

impl Principal {
    /// Everyone, including unauthenticated requests.
    pub fn anyone() -> Self {
        Self {
            aws: BTreeSet::from(["*".to_string()]),
        }
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr<'a> {
            #[serde(rename = "AWS")]
            aws: &'a BTreeSet<String>,
        }
        Repr { aws: &self.aws }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // "*" and {"AWS": "*"} are both valid encodings of anyone
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(String),
            Aws {
                #[serde(rename = "AWS", deserialize_with = "one_or_many::deserialize")]
                aws: BTreeSet<String>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bare(value) => Principal {
                aws: BTreeSet::from([value]),
            },
            Repr::Aws { aws } => Principal { aws },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Action", with = "one_or_many")]
    pub actions: BTreeSet<Action>,
    #[serde(rename = "Resource", with = "one_or_many", default)]
    pub resources: BTreeSet<Resource>,
    #[serde(
        rename = "Condition",
        default,
        skip_serializing_if = "serde_json::Map::is_empty"
    )]
    pub conditions: serde_json::Map<String, serde_json::Value>,
}

impl Statement {
    pub fn allow(
        actions: impl IntoIterator<Item = Action>,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Self {
        Self {
            sid: String::new(),
            effect: Effect::Allow,
            principal: None,
            actions: actions.into_iter().collect(),
            resources: resources.into_iter().collect(),
            conditions: serde_json::Map::new(),
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

/// A canonical policy document.
///
/// Equality ignores statement order and duplicate statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement", default)]
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            statements,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }

    fn contains_all(&self, other: &PolicyDocument) -> bool {
        other
            .statements
            .iter()
            .all(|statement| self.statements.contains(statement))
    }
}

impl PartialEq for PolicyDocument {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.contains_all(other) && other.contains_all(self)
    }
}

impl Eq for PolicyDocument {}

/// Serde adapter accepting either a single value or a list, always
/// emitting a list.
mod one_or_many {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(set: &BTreeSet<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        serializer.collect_seq(set)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeSet<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Ord,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany<T> {
            One(T),
            Many(Vec<T>),
        }

        Ok(match OneOrMany::<T>::deserialize(deserializer)? {
            OneOrMany::One(value) => BTreeSet::from([value]),
            OneOrMany::Many(values) => values.into_iter().collect(),
        })
    }
}
