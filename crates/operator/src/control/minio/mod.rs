mod crypt;
mod signer;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ControlApi, ControlError, Operation};

pub use signer::Signer;

const ADMIN_PREFIX: &str = "/minio/admin/v3";

/// Secret data keys of the bootstrap connection secret.
pub const ENDPOINT_KEY: &str = "endpoint";
pub const USER_KEY: &str = "user";
pub const PASSWORD_KEY: &str = "password";

/// Control API client speaking the S3 and MinIO admin HTTP APIs.
#[derive(Clone)]
pub struct MinioClient {
    http: reqwest::Client,
    endpoint: Url,
    signer: Signer,
    secret_key: String,
}

/// Error body returned by both the S3 (XML) and admin (JSON) APIs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddUserRequest<'a> {
    secret_key: &'a str,
    status: &'a str,
}

#[derive(Serialize)]
struct AttachRequest<'a> {
    policies: [&'a str; 1],
    user: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyEntities {
    #[serde(default)]
    policy_mappings: Option<Vec<PolicyMapping>>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyMapping {
    policy: String,
    #[serde(default)]
    users: Option<Vec<String>>,
}

impl MinioClient {
    /// `endpoint` is `host[:port]`, optionally prefixed with a scheme
    /// (plain HTTP when absent).
    pub fn new(endpoint: &str, user: &str, password: &str) -> Result<Self, ControlError> {
        let endpoint = if endpoint.contains("://") {
            Url::parse(endpoint)?
        } else {
            Url::parse(&format!("http://{}", endpoint))?
        };
        if endpoint.host_str().is_none() {
            return Err(ControlError::InvalidSecretFormat(format!(
                "endpoint {} has no host",
                endpoint
            )));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            signer: Signer::new(user, password),
            secret_key: password.to_string(),
        })
    }

    /// Build a client from the bootstrap secret's `endpoint`, `user` and
    /// `password` fields.
    pub fn from_secret(secret: &Secret) -> Result<Self, ControlError> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let field = |key: &str| -> Result<String, ControlError> {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    ControlError::InvalidSecretFormat(format!(
                        "secret {} has no usable {} field",
                        name, key
                    ))
                })
        };

        let endpoint = field(ENDPOINT_KEY)?;
        let user = field(USER_KEY)?;
        let password = field(PASSWORD_KEY)?;
        Self::new(&endpoint, &user, &password)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn bucket_url(&self, bucket: &str, policy: bool) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("/{}", bucket));
        url.set_query(policy.then_some("policy"));
        url
    }

    fn admin_url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("{}/{}", ADMIN_PREFIX, path));
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn send(&self, method: Method, url: Url, body: Vec<u8>) -> Result<Response, ControlError> {
        let mut headers = HeaderMap::new();
        self.signer
            .sign(&method, &url, &mut headers, &body, Utc::now())
            .map_err(|e| ControlError::Decode(format!("invalid header value: {}", e)))?;

        tracing::trace!(method = %method, url = %url, "control api request");
        let response = self
            .http
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Send a request and turn non-2xx responses into [`ControlError::Status`].
    async fn call(
        &self,
        operation: Operation,
        method: Method,
        url: Url,
        body: Vec<u8>,
    ) -> Result<Response, ControlError> {
        let response = self.send(method, url, body).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(status_error(operation, response).await)
    }

    fn encrypted(&self, value: &impl Serialize) -> Result<Vec<u8>, ControlError> {
        let plain = serde_json::to_vec(value)?;
        crypt::encrypt(&self.secret_key, &plain)
    }

    async fn set_user(
        &self,
        operation: Operation,
        user: &str,
        password: &str,
        enabled: bool,
    ) -> Result<(), ControlError> {
        let request = AddUserRequest {
            secret_key: password,
            status: if enabled { "enabled" } else { "disabled" },
        };
        let body = self.encrypted(&request)?;
        let url = self.admin_url("add-user", &[("accessKey", user)]);
        self.call(operation, Method::PUT, url, body).await?;
        Ok(())
    }
}

async fn status_error(operation: Operation, response: Response) -> ControlError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = parse_error_body(&text);

    let code = if body.code.is_empty() {
        match status {
            StatusCode::NOT_FOUND => "NotFound".to_string(),
            StatusCode::FORBIDDEN => "AccessDenied".to_string(),
            _ => status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    } else {
        body.code
    };

    ControlError::Status {
        operation: operation.as_str(),
        status: status.as_u16(),
        code,
        message: body.message,
    }
}

fn parse_error_body(text: &str) -> ErrorBody {
    let text = text.trim();
    if text.starts_with('{') {
        serde_json::from_str(text).unwrap_or_default()
    } else if text.starts_with('<') {
        quick_xml::de::from_str(text).unwrap_or_default()
    } else {
        ErrorBody::default()
    }
}

/// True when a failed call means "the target is already gone".
fn is_absent(err: &ControlError, codes: &[&str]) -> bool {
    match err {
        ControlError::Status { status, code, .. } => {
            *status == 404 || codes.contains(&code.as_str())
        }
        _ => false,
    }
}

fn has_code(err: &ControlError, codes: &[&str]) -> bool {
    matches!(err, ControlError::Status { code, .. } if codes.contains(&code.as_str()))
}

/// Users attached to `policy` in a policy-entities response body, which the
/// server may send encrypted.
fn mapping_users(
    secret_key: &str,
    policy: &str,
    body: &[u8],
) -> Result<Option<Vec<String>>, ControlError> {
    let entities: PolicyEntities = match serde_json::from_slice(body) {
        Ok(entities) => entities,
        Err(_) => serde_json::from_slice(&crypt::decrypt(secret_key, body)?)?,
    };

    Ok(entities
        .policy_mappings
        .unwrap_or_default()
        .into_iter()
        .find(|mapping| mapping.policy == policy)
        .map(|mapping| mapping.users.unwrap_or_default()))
}

#[async_trait]
impl ControlApi for MinioClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ControlError> {
        let url = self.bucket_url(bucket, false);
        match self.call(Operation::BucketExists, Method::HEAD, url, Vec::new()).await {
            Ok(_) => Ok(true),
            Err(ControlError::Status { status: 404, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ControlError> {
        let url = self.bucket_url(bucket, false);
        match self.call(Operation::CreateBucket, Method::PUT, url, Vec::new()).await {
            Ok(_) => Ok(()),
            Err(err) if has_code(&err, &["BucketAlreadyOwnedByYou"]) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ControlError> {
        let url = self.bucket_url(bucket, false);
        match self.call(Operation::DeleteBucket, Method::DELETE, url, Vec::new()).await {
            Ok(_) => Ok(()),
            Err(err) if is_absent(&err, &["NoSuchBucket"]) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn anonymous_policy(&self, bucket: &str) -> Result<String, ControlError> {
        let url = self.bucket_url(bucket, true);
        match self.call(Operation::AnonymousPolicy, Method::GET, url, Vec::new()).await {
            Ok(response) => Ok(response.text().await?),
            Err(err) if has_code(&err, &["NoSuchBucketPolicy"]) => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    async fn set_anonymous_policy(&self, bucket: &str, document: &str) -> Result<(), ControlError> {
        let url = self.bucket_url(bucket, true);
        if document.is_empty() {
            return match self
                .call(Operation::SetAnonymousPolicy, Method::DELETE, url, Vec::new())
                .await
            {
                Ok(_) => Ok(()),
                Err(err) if has_code(&err, &["NoSuchBucketPolicy"]) => Ok(()),
                Err(err) => Err(err),
            };
        }
        self.call(
            Operation::SetAnonymousPolicy,
            Method::PUT,
            url,
            document.as_bytes().to_vec(),
        )
        .await?;
        Ok(())
    }

    async fn create_canned_policy(&self, name: &str, document: &str) -> Result<(), ControlError> {
        let url = self.admin_url("add-canned-policy", &[("name", name)]);
        self.call(
            Operation::CreateCannedPolicy,
            Method::PUT,
            url,
            document.as_bytes().to_vec(),
        )
        .await?;
        Ok(())
    }

    async fn delete_canned_policy(&self, name: &str) -> Result<(), ControlError> {
        let url = self.admin_url("remove-canned-policy", &[("name", name)]);
        match self
            .call(Operation::DeleteCannedPolicy, Method::DELETE, url, Vec::new())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_absent(&err, &["XMinioAdminNoSuchPolicy"]) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn policy_users(&self, name: &str) -> Result<Option<Vec<String>>, ControlError> {
        let url = self.admin_url("idp/builtin/policy-entities", &[("policy", name)]);
        let response = self
            .call(Operation::PolicyUsers, Method::GET, url, Vec::new())
            .await?;
        let body = response.bytes().await?;
        mapping_users(&self.secret_key, name, &body)
    }

    async fn create_user(&self, user: &str, password: &str) -> Result<(), ControlError> {
        self.set_user(Operation::CreateUser, user, password, true)
            .await
    }

    async fn set_user_password(
        &self,
        user: &str,
        password: &str,
        enabled: bool,
    ) -> Result<(), ControlError> {
        self.set_user(Operation::SetUserPassword, user, password, enabled)
            .await
    }

    async fn delete_user(&self, user: &str) -> Result<(), ControlError> {
        let url = self.admin_url("remove-user", &[("accessKey", user)]);
        match self
            .call(Operation::DeleteUser, Method::DELETE, url, Vec::new())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_absent(&err, &["XMinioAdminNoSuchUser"]) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn attach_policy(&self, policy: &str, user: &str) -> Result<(), ControlError> {
        let body = self.encrypted(&AttachRequest {
            policies: [policy],
            user,
        })?;
        let url = self.admin_url("idp/builtin/policy/attach", &[]);
        match self
            .call(Operation::AttachPolicy, Method::POST, url, body)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if has_code(&err, &["XMinioAdminPolicyChangeAlreadyApplied"]) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn secret(fields: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("minio-connection".into()),
                ..Default::default()
            },
            data: Some(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_secret() {
        let client = MinioClient::from_secret(&secret(&[
            ("endpoint", "minio.minio.svc:9000"),
            ("user", "admin"),
            ("password", "admin-secret"),
        ]))
        .unwrap();
        assert_eq!(client.endpoint().as_str(), "http://minio.minio.svc:9000/");

        let client = MinioClient::from_secret(&secret(&[
            ("endpoint", "https://minio.example.com"),
            ("user", "admin"),
            ("password", "admin-secret"),
        ]))
        .unwrap();
        assert_eq!(client.endpoint().scheme(), "https");
    }

    #[test]
    fn test_from_secret_missing_fields() {
        let missing_password = secret(&[("endpoint", "minio:9000"), ("user", "admin")]);
        assert!(matches!(
            MinioClient::from_secret(&missing_password),
            Err(ControlError::InvalidSecretFormat(_))
        ));

        let empty_user = secret(&[("endpoint", "minio:9000"), ("user", ""), ("password", "x")]);
        assert!(matches!(
            MinioClient::from_secret(&empty_user),
            Err(ControlError::InvalidSecretFormat(_))
        ));

        assert!(matches!(
            MinioClient::from_secret(&Secret::default()),
            Err(ControlError::InvalidSecretFormat(_))
        ));
    }

    #[test]
    fn test_urls() {
        let client = MinioClient::new("minio:9000", "admin", "admin-secret").unwrap();

        assert_eq!(
            client.bucket_url("ns.photos", false).as_str(),
            "http://minio:9000/ns.photos"
        );
        assert_eq!(
            client.bucket_url("ns.photos", true).as_str(),
            "http://minio:9000/ns.photos?policy"
        );
        assert_eq!(
            client
                .admin_url("add-user", &[("accessKey", "AB12")])
                .as_str(),
            "http://minio:9000/minio/admin/v3/add-user?accessKey=AB12"
        );
        assert_eq!(
            client.admin_url("idp/builtin/policy/attach", &[]).as_str(),
            "http://minio:9000/minio/admin/v3/idp/builtin/policy/attach"
        );
    }

    #[test]
    fn test_parse_error_body() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchBucketPolicy</Code><Message>The bucket policy does not exist</Message><BucketName>ns.photos</BucketName></Error>"#;
        let body = parse_error_body(xml);
        assert_eq!(body.code, "NoSuchBucketPolicy");
        assert_eq!(body.message, "The bucket policy does not exist");

        let json = r#"{"Code":"XMinioAdminNoSuchUser","Message":"The specified user does not exist","Resource":"/minio/admin/v3/remove-user"}"#;
        let body = parse_error_body(json);
        assert_eq!(body.code, "XMinioAdminNoSuchUser");

        assert!(parse_error_body("").code.is_empty());
    }

    #[test]
    fn test_absent_and_codes() {
        let not_found = ControlError::Status {
            operation: "remove-user",
            status: 404,
            code: "NotFound".into(),
            message: String::new(),
        };
        assert!(is_absent(&not_found, &[]));

        let no_such_user = ControlError::Status {
            operation: "remove-user",
            status: 400,
            code: "XMinioAdminNoSuchUser".into(),
            message: String::new(),
        };
        assert!(is_absent(&no_such_user, &["XMinioAdminNoSuchUser"]));
        assert!(!is_absent(&no_such_user, &[]));
        assert!(!has_code(&ControlError::Decode("x".into()), &["XMinioAdminNoSuchUser"]));
    }

    #[test]
    fn test_mapping_users() {
        let plain = br#"{"timestamp":"2024-01-01T00:00:00Z","policyMappings":[{"policy":"ns.photos.reader","users":["AB12"]}]}"#;
        assert_eq!(
            mapping_users("admin-secret", "ns.photos.reader", plain).unwrap(),
            Some(vec!["AB12".to_string()])
        );

        let no_users = br#"{"policyMappings":[{"policy":"ns.photos.reader"}]}"#;
        assert_eq!(
            mapping_users("admin-secret", "ns.photos.reader", no_users).unwrap(),
            Some(vec![])
        );

        let none = br#"{"timestamp":"2024-01-01T00:00:00Z"}"#;
        assert_eq!(mapping_users("admin-secret", "ns.photos.reader", none).unwrap(), None);

        let mut rng = StdRng::seed_from_u64(1);
        let sealed = crypt::encrypt_with("admin-secret", plain, &mut rng).unwrap();
        assert_eq!(
            mapping_users("admin-secret", "ns.photos.reader", &sealed).unwrap(),
            Some(vec!["AB12".to_string()])
        );
    }
}
