/**
 * Access and secret key generation for the
 *  IAM users the operator creates, and
 *  validation of credentials read back.
 */
pub mod credentials;
/**
 * Naming rules mapping namespaced records
 *  to cluster-wide bucket and policy names.
 */
pub mod names;
/**
 * Canonical access-policy documents:
 *  builders, statement translation and
 *  the anonymous-policy diff engine.
 */
pub mod policy;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::credentials::{Credentials, CredentialsError, KeyError};
    pub use crate::names::{bucket_name, policy_name};
    pub use crate::policy::{
        decide, AnonymousAccess, Decision, Effect, PolicyDocument, PolicyError, StatementSpec,
    };
    pub use crate::version::build_info;
}
