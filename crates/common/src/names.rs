/// External bucket name for a Bucket record: `namespace.name`.
pub fn bucket_name(namespace: &str, name: &str) -> String {
    format!("{namespace}.{name}")
}

/// Canned policy name for a Policy record: `namespace.bucket.name`.
///
/// The default policy of a Bucket record reuses the bucket name.
pub fn policy_name(namespace: &str, bucket: &str, name: &str) -> String {
    format!("{namespace}.{bucket}.{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(bucket_name("default", "photos"), "default.photos");
        assert_eq!(
            policy_name("default", "photos", "readers"),
            "default.photos.readers"
        );
    }
}
