//! Tenant identity from the `x-rh-identity` header
//!
//! The header is untrusted input. It is size-checked before decoding and
//! no error produced here ever contains the raw header text.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use iop_store::{InvalidOrgId, OrgId};
use serde::Serialize;
use serde_json::{Map, Value};

/// Header carrying the identity document
pub const IDENTITY_HEADER: &str = "x-rh-identity";

/// Largest encoded header accepted
pub const MAX_IDENTITY_HEADER_LEN: usize = 8 * 1024;

const HEADER_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why an identity header was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Header absent or blank
    #[error("missing x-rh-identity header")]
    Missing,

    /// Header larger than [`MAX_IDENTITY_HEADER_LEN`]
    #[error("identity header exceeds {limit} bytes")]
    TooLong {
        /// Limit in bytes
        limit: usize,
    },

    /// Not base64
    #[error("identity header is not valid base64")]
    Encoding,

    /// Decoded bytes are not UTF-8
    #[error("identity header does not decode to UTF-8 text")]
    Utf8,

    /// Decoded text is not JSON
    #[error("identity header is not a JSON document (line {line}, column {column})")]
    Json {
        /// Line of the syntax error
        line: usize,
        /// Column of the syntax error
        column: usize,
    },

    /// Required field absent or empty
    #[error("identity document is missing {0}")]
    MissingField(&'static str),

    /// `type` is not a known principal
    #[error("unsupported identity type")]
    PrincipalType,

    /// `org_id` is not a positive 32-bit integer
    #[error(transparent)]
    OrgId(#[from] InvalidOrgId),
}

/// Kind of principal behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrincipalType {
    /// Interactive user
    #[default]
    User,
    /// Service account
    ServiceAccount,
    /// System principal
    System,
}

impl PrincipalType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "User" => Some(Self::User),
            "ServiceAccount" => Some(Self::ServiceAccount),
            "System" => Some(Self::System),
            _ => None,
        }
    }
}

/// Authenticated tenant of one request; never persisted beyond `org_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Organization
    pub org_id: OrgId,
    /// Account number
    pub account_number: String,
    /// Principal type
    pub principal_type: PrincipalType,
}

impl Identity {
    /// Extract the identity from an optional header value
    pub fn from_header(header: Option<&str>) -> Result<Self, IdentityError> {
        Self::decode(header.ok_or(IdentityError::Missing)?)
    }

    /// Decode a header value
    pub fn decode(header: &str) -> Result<Self, IdentityError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(IdentityError::Missing);
        }
        if header.len() > MAX_IDENTITY_HEADER_LEN {
            return Err(IdentityError::TooLong {
                limit: MAX_IDENTITY_HEADER_LEN,
            });
        }

        let bytes = HEADER_ENGINE
            .decode(header)
            .map_err(|_| IdentityError::Encoding)?;
        let text = String::from_utf8(bytes).map_err(|_| IdentityError::Utf8)?;
        let document: Value = serde_json::from_str(&text).map_err(|e| IdentityError::Json {
            line: e.line(),
            column: e.column(),
        })?;

        let identity = document
            .get("identity")
            .and_then(Value::as_object)
            .ok_or(IdentityError::MissingField("identity"))?;

        let identity = Self {
            org_id: org_id(identity)?,
            account_number: required_text(identity, "account_number")?,
            principal_type: principal_type(identity)?,
        };
        tracing::debug!(
            org_id = %identity.org_id,
            principal = ?identity.principal_type,
            "identity decoded"
        );
        Ok(identity)
    }
}

fn org_id(identity: &Map<String, Value>) -> Result<OrgId, IdentityError> {
    match identity.get("org_id") {
        None | Some(Value::Null) => Err(IdentityError::MissingField("org_id")),
        Some(Value::String(s)) if s.trim().is_empty() => Err(IdentityError::MissingField("org_id")),
        Some(Value::String(s)) => Ok(s.parse()?),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => Ok(OrgId::new(v)?),
            None => Err(InvalidOrgId(n.to_string()).into()),
        },
        Some(_) => Err(InvalidOrgId("non-numeric value".to_string()).into()),
    }
}

fn required_text(identity: &Map<String, Value>, field: &'static str) -> Result<String, IdentityError> {
    match identity.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(IdentityError::MissingField(field)),
    }
}

fn principal_type(identity: &Map<String, Value>) -> Result<PrincipalType, IdentityError> {
    match identity.get("type") {
        None | Some(Value::Null) => Ok(PrincipalType::default()),
        Some(Value::String(s)) => PrincipalType::parse(s).ok_or(IdentityError::PrincipalType),
        Some(_) => Err(IdentityError::PrincipalType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
    use iop_test_utils::{encode_identity, identity_header};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn decodes_user_identity() {
        let identity = Identity::decode(&identity_header("67890", "12345")).unwrap();
        assert_eq!(identity.org_id.get(), 67890);
        assert_eq!(identity.account_number, "12345");
        assert_eq!(identity.principal_type, PrincipalType::User);
    }

    #[test]
    fn numeric_org_id_and_missing_type() {
        let header = encode_identity(&json!({"identity": {"org_id": 42, "account_number": "a"}}));
        let identity = Identity::decode(&header).unwrap();
        assert_eq!(identity.org_id.get(), 42);
        assert_eq!(identity.principal_type, PrincipalType::User);
    }

    #[test]
    fn padding_is_optional_and_whitespace_ignored() {
        let doc = json!({"identity": {"org_id": "7", "account_number": "a", "type": "System"}}).to_string();
        let unpadded = STANDARD_NO_PAD.encode(&doc);
        assert_eq!(Identity::decode(&unpadded).unwrap().principal_type, PrincipalType::System);
        let padded = format!("  {}\n", STANDARD.encode(&doc));
        assert_eq!(Identity::decode(&padded).unwrap().org_id.get(), 7);
    }

    #[test]
    fn rejects_missing_and_blank() {
        assert_eq!(Identity::from_header(None), Err(IdentityError::Missing));
        assert_eq!(Identity::decode("   "), Err(IdentityError::Missing));
    }

    #[test]
    fn rejects_oversized_header_before_decoding() {
        let huge = "A".repeat(MAX_IDENTITY_HEADER_LEN + 1);
        assert_eq!(
            Identity::decode(&huge),
            Err(IdentityError::TooLong {
                limit: MAX_IDENTITY_HEADER_LEN
            })
        );
    }

    #[test]
    fn rejects_malformed_layers() {
        assert_eq!(Identity::decode("***not base64***"), Err(IdentityError::Encoding));
        assert_eq!(Identity::decode(&STANDARD.encode([0xff, 0xfe, 0xfd])), Err(IdentityError::Utf8));
        assert!(matches!(
            Identity::decode(&STANDARD.encode("{not json")),
            Err(IdentityError::Json { .. })
        ));
        assert_eq!(
            Identity::decode(&encode_identity(&json!({"user": {}}))),
            Err(IdentityError::MissingField("identity"))
        );
    }

    #[test]
    fn rejects_bad_fields() {
        let cases = [
            (json!({"account_number": "a"}), IdentityError::MissingField("org_id")),
            (json!({"org_id": "", "account_number": "a"}), IdentityError::MissingField("org_id")),
            (json!({"org_id": "1"}), IdentityError::MissingField("account_number")),
            (json!({"org_id": "1", "account_number": " "}), IdentityError::MissingField("account_number")),
            (json!({"org_id": "1", "account_number": "a", "type": "Robot"}), IdentityError::PrincipalType),
        ];
        for (identity, expected) in cases {
            let header = encode_identity(&json!({ "identity": identity }));
            assert_eq!(Identity::decode(&header), Err(expected));
        }

        for org in [json!("0"), json!("-3"), json!("abc"), json!(1.5), json!(4_294_967_296_i64), json!([1])] {
            let header = encode_identity(&json!({"identity": {"org_id": org, "account_number": "a"}}));
            assert!(matches!(Identity::decode(&header), Err(IdentityError::OrgId(_))), "{org}");
        }
    }

    proptest! {
        #[test]
        fn valid_headers_yield_encoded_org_id(org in 1..=i32::MAX, account in "[0-9]{1,10}") {
            let identity = Identity::decode(&identity_header(&org.to_string(), &account)).unwrap();
            prop_assert_eq!(identity.org_id.get(), org);
            prop_assert_eq!(identity.account_number, account);
        }

        #[test]
        fn errors_never_echo_the_header(raw in "[A-Za-z0-9+/]{16,64}") {
            if let Err(err) = Identity::decode(&raw) {
                prop_assert!(!err.to_string().contains(&raw));
            }
        }
    }
}
