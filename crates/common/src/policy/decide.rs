//! Anonymous-access policy diffing.

use super::{anonymous_policy, AnonymousAccess, PolicyDocument, PolicyError};

/// What to do with a bucket's live anonymous-access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The live document already matches.
    Keep,
    /// Remove the live document.
    Clear,
    /// Replace the live document with this JSON.
    Apply(String),
}

impl Decision {
    /// The bytes to send to the control API, `None` when nothing changes.
    /// An empty string removes the policy.
    pub fn document(&self) -> Option<&str> {
        match self {
            Decision::Keep => None,
            Decision::Clear => Some(""),
            Decision::Apply(json) => Some(json),
        }
    }
}

/// Compare the live policy of `bucket` with the desired access level.
///
/// `current` is the raw document returned by the cluster, empty when the
/// bucket has none. A live document that fails to parse is overwritten.
pub fn decide(
    bucket: &str,
    current: &str,
    desired: AnonymousAccess,
) -> Result<Decision, PolicyError> {
    let current = current.trim();

    let Some(desired) = anonymous_policy(bucket, desired) else {
        return Ok(if current.is_empty() {
            Decision::Keep
        } else {
            Decision::Clear
        });
    };

    if current.is_empty() {
        return Ok(Decision::Apply(desired.to_json()?));
    }

    match PolicyDocument::from_json(current) {
        Ok(live) if live == desired => Ok(Decision::Keep),
        _ => Ok(Decision::Apply(desired.to_json()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{download_policy, public_policy, upload_policy};

    const LEVELS: [AnonymousAccess; 3] = [
        AnonymousAccess::Public,
        AnonymousAccess::Upload,
        AnonymousAccess::Download,
    ];

    #[test]
    fn test_own_output_is_a_no_op() {
        for bucket in ["foo", "ns.bar", "a-b.c-d"] {
            for level in LEVELS {
                let current = anonymous_policy(bucket, level).unwrap().to_json().unwrap();
                assert_eq!(decide(bucket, &current, level).unwrap(), Decision::Keep);
            }
        }
    }

    #[test]
    fn test_private_without_policy_is_a_no_op() {
        assert_eq!(
            decide("foo", "", AnonymousAccess::Private).unwrap(),
            Decision::Keep
        );
    }

    #[test]
    fn test_private_clears_existing_policy() {
        let current = public_policy("foo").to_json().unwrap();
        let decision = decide("foo", &current, AnonymousAccess::Private).unwrap();
        assert_eq!(decision, Decision::Clear);
        assert_eq!(decision.document(), Some(""));
    }

    #[test]
    fn test_cross_level_change_then_refeed() {
        let decision = decide("foo", "", AnonymousAccess::Download).unwrap();
        let Decision::Apply(json) = decision else {
            panic!("expected apply, got {decision:?}");
        };
        assert_eq!(json, download_policy("foo").to_json().unwrap());

        assert_eq!(
            decide("foo", &json, AnonymousAccess::Download).unwrap(),
            Decision::Keep
        );

        let switched = decide("foo", &json, AnonymousAccess::Upload).unwrap();
        assert_eq!(
            switched,
            Decision::Apply(upload_policy("foo").to_json().unwrap())
        );
    }

    #[test]
    fn test_reencoded_live_document_is_kept() {
        // same rules as the download level, reordered and single-valued
        let current = r#"{
            "Version": "2012-10-17",
            "Statement": [
                {"Effect": "Allow", "Principal": "*", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::foo/*"},
                {"Effect": "Allow", "Principal": {"AWS": ["*"]}, "Action": ["s3:ListBucket", "s3:GetBucketLocation"], "Resource": "arn:aws:s3:::foo"}
            ]
        }"#;
        assert_eq!(
            decide("foo", current, AnonymousAccess::Download).unwrap(),
            Decision::Keep
        );
    }

    #[test]
    fn test_unparseable_live_document_is_overwritten() {
        let decision = decide("foo", "{not json", AnonymousAccess::Public).unwrap();
        assert_eq!(
            decision,
            Decision::Apply(public_policy("foo").to_json().unwrap())
        );
    }
}
