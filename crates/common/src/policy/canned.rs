//! Document builders for anonymous access levels and declarative statements.

use std::collections::BTreeSet;

use super::{
    Action, AnonymousAccess, PolicyDocument, PolicyError, Principal, Resource, Statement,
    StatementSpec,
};

fn actions(names: &[&'static str]) -> Vec<Action> {
    names.iter().copied().map(Action::known).collect()
}

/// Bucket-level and object-level statements granting the given actions.
fn bucket_and_objects(
    bucket: &str,
    bucket_actions: &[&'static str],
    object_actions: &[&'static str],
    principal: Option<Principal>,
) -> PolicyDocument {
    let statements = [
        Statement::allow(actions(bucket_actions), [Resource::bucket(bucket)]),
        Statement::allow(actions(object_actions), [Resource::objects(bucket)]),
    ]
    .into_iter()
    .map(|statement| match &principal {
        Some(principal) => statement.with_principal(principal.clone()),
        None => statement,
    })
    .collect();

    PolicyDocument::new(statements)
}

const PUBLIC_BUCKET_ACTIONS: &[&str] = &[
    Action::GET_BUCKET_LOCATION,
    Action::LIST_BUCKET,
    Action::LIST_BUCKET_MULTIPART_UPLOADS,
];

const PUBLIC_OBJECT_ACTIONS: &[&str] = &[
    Action::LIST_MULTIPART_UPLOAD_PARTS,
    Action::PUT_OBJECT,
    Action::ABORT_MULTIPART_UPLOAD,
    Action::DELETE_OBJECT,
    Action::GET_OBJECT,
];

/// Anonymous read and write access.
pub fn public_policy(bucket: &str) -> PolicyDocument {
    bucket_and_objects(
        bucket,
        PUBLIC_BUCKET_ACTIONS,
        PUBLIC_OBJECT_ACTIONS,
        Some(Principal::anyone()),
    )
}

/// Anonymous read access.
pub fn download_policy(bucket: &str) -> PolicyDocument {
    bucket_and_objects(
        bucket,
        &[Action::GET_BUCKET_LOCATION, Action::LIST_BUCKET],
        &[Action::GET_OBJECT],
        Some(Principal::anyone()),
    )
}

/// Anonymous write access.
pub fn upload_policy(bucket: &str) -> PolicyDocument {
    bucket_and_objects(
        bucket,
        &[
            Action::GET_BUCKET_LOCATION,
            Action::LIST_BUCKET_MULTIPART_UPLOADS,
        ],
        &[
            Action::LIST_MULTIPART_UPLOAD_PARTS,
            Action::PUT_OBJECT,
            Action::ABORT_MULTIPART_UPLOAD,
            Action::DELETE_OBJECT,
        ],
        Some(Principal::anyone()),
    )
}

/// IAM policy attached to the dedicated user of a bucket: full read and
/// write access, no principal.
pub fn bucket_user_policy(bucket: &str) -> PolicyDocument {
    bucket_and_objects(bucket, PUBLIC_BUCKET_ACTIONS, PUBLIC_OBJECT_ACTIONS, None)
}

/// Bucket policy for an anonymous access level, `None` for
/// [`AnonymousAccess::Private`].
pub fn anonymous_policy(bucket: &str, access: AnonymousAccess) -> Option<PolicyDocument> {
    match access {
        AnonymousAccess::Private => None,
        AnonymousAccess::Public => Some(public_policy(bucket)),
        AnonymousAccess::Upload => Some(upload_policy(bucket)),
        AnonymousAccess::Download => Some(download_policy(bucket)),
    }
}

/// Translate declarative statements into an IAM policy scoped to `bucket`.
pub fn from_statements(
    bucket: &str,
    statements: &[StatementSpec],
) -> Result<PolicyDocument, PolicyError> {
    if statements.is_empty() {
        return Err(PolicyError::EmptyStatements);
    }

    let statements = statements
        .iter()
        .map(|spec| -> Result<Statement, PolicyError> {
            let resources = if spec.sub_paths.is_empty() {
                BTreeSet::from([Resource::bucket(bucket)])
            } else {
                spec.sub_paths
                    .iter()
                    .map(|path| Resource::sub_path(bucket, path))
                    .collect::<Result<BTreeSet<_>, _>>()?
            };
            let actions = spec
                .actions
                .iter()
                .map(|action| Action::parse(action))
                .collect::<Result<BTreeSet<_>, _>>()?;

            Ok(Statement {
                sid: String::new(),
                effect: spec.effect,
                principal: None,
                actions,
                resources,
                conditions: serde_json::Map::new(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PolicyDocument::new(statements))
}
