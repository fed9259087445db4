use serde::{Deserialize, Deserializer, Serialize};

use crate::models::Role;

const MAX_USERNAME_LEN: usize = 64;
const MAX_DOCUMENT_NAME_LEN: usize = 255;

// -- Validation --

/// One rejected field, reported back to the client in a 400 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Schema-level checks that serde cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

fn require_non_empty(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "Required"));
    }
}

fn check_username(errors: &mut Vec<FieldError>, username: &str) {
    require_non_empty(errors, "username", username);
    if username.chars().count() > MAX_USERNAME_LEN {
        errors.push(FieldError::new(
            "username",
            format!("Must be at most {MAX_USERNAME_LEN} characters"),
        ));
    }
}

fn check_email(errors: &mut Vec<FieldError>, email: &str) {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {}
        _ => errors.push(FieldError::new("email", "Invalid email")),
    }
}

fn check_document_name(errors: &mut Vec<FieldError>, name: &str) {
    require_non_empty(errors, "name", name);
    if name.chars().count() > MAX_DOCUMENT_NAME_LEN {
        errors.push(FieldError::new(
            "name",
            format!("Must be at most {MAX_DOCUMENT_NAME_LEN} characters"),
        ));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
    /// Only honoured when an admin creates the account.
    #[serde(default)]
    pub role: Option<Role>,
}

impl Validate for SignupRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        check_username(&mut errors, &self.username);
        require_non_empty(&mut errors, "password", &self.password);
        require_non_empty(&mut errors, "name", &self.name);
        check_email(&mut errors, &self.email);
        finish(errors)
    }
}

/// Both fields default to empty so a missing field is reported as a 400,
/// not as a deserialization failure.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require_non_empty(&mut errors, "username", &self.username);
        if self.password.is_empty() {
            errors.push(FieldError::new("password", "Required"));
        }
        finish(errors)
    }
}

// -- Users --

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(username) = &self.username {
            check_username(&mut errors, username);
        }
        if let Some(password) = &self.password {
            require_non_empty(&mut errors, "password", password);
        }
        if let Some(name) = &self.name {
            require_non_empty(&mut errors, "name", name);
        }
        if let Some(email) = &self.email {
            check_email(&mut errors, email);
        }
        finish(errors)
    }
}

// -- Documents --

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub name: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Validate for CreateDocumentRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        check_document_name(&mut errors, &self.name);
        finish(errors)
    }
}

/// Partial update. An absent `metadata` keeps the stored value, an
/// explicit `null` clears it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateDocumentRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub metadata: Option<Option<serde_json::Value>>,
    pub starred: Option<bool>,
}

/// Only runs for keys present in the body, so `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl Validate for UpdateDocumentRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            check_document_name(&mut errors, name);
        }
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct StarRequest {
    #[serde(default)]
    pub starred: Option<bool>,
}

impl Validate for StarRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        match self.starred {
            Some(_) => Ok(()),
            None => Err(vec![FieldError::new("starred", "Starred status is required")]),
        }
    }
}

// -- Ingestions --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateIngestionRequest {
    pub document_id: i64,
}

impl Validate for CreateIngestionRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        if self.document_id <= 0 {
            return Err(vec![FieldError::new("documentId", "Must be a positive id")]);
        }
        Ok(())
    }
}

// -- Q&A --

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
}

impl Validate for QueryRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require_non_empty(&mut errors, "query", &self.query);
        finish(errors)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCitation {
    pub document_id: i64,
    pub title: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
}

// -- Misc --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(username: &str, email: &str) -> SignupRequest {
        SignupRequest {
            username: username.into(),
            password: "p".into(),
            name: "A".into(),
            email: email.into(),
            role: None,
        }
    }

    #[test]
    fn minimal_signup_is_valid() {
        assert!(signup("a", "a@x.com").validate().is_ok());
    }

    #[test]
    fn signup_reports_every_bad_field() {
        let errors = signup(" ", "not-an-email").validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["username", "email"]);
    }

    #[test]
    fn signup_rejects_unknown_fields() {
        let raw = r#"{"username":"a","password":"p","name":"A","email":"a@x.com","admin":true}"#;
        assert!(serde_json::from_str::<SignupRequest>(raw).is_err());
    }

    #[test]
    fn login_missing_fields_fail_validation_not_parsing() {
        let req: LoginRequest = serde_json::from_str(r#"{"username":"a"}"#).unwrap();
        let errors = req.validate().unwrap_err();
        assert_eq!(errors, vec![FieldError::new("password", "Required")]);
    }

    #[test]
    fn star_requires_flag() {
        let req: StarRequest = serde_json::from_str("{}").unwrap();
        assert!(req.validate().is_err());

        let req: StarRequest = serde_json::from_str(r#"{"starred":false}"#).unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn ingestion_request_uses_camel_case() {
        let req: CreateIngestionRequest = serde_json::from_str(r#"{"documentId":4}"#).unwrap();
        assert_eq!(req.document_id, 4);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn document_metadata_null_differs_from_absent() {
        let absent: UpdateDocumentRequest = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(absent.metadata, None);

        let cleared: UpdateDocumentRequest = serde_json::from_str(r#"{"metadata":null}"#).unwrap();
        assert_eq!(cleared.metadata, Some(None));

        let set: UpdateDocumentRequest = serde_json::from_str(r#"{"metadata":{"a":1}}"#).unwrap();
        assert_eq!(set.metadata, Some(Some(serde_json::json!({"a": 1}))));
    }

    #[test]
    fn whitespace_query_is_empty() {
        let req = QueryRequest { query: "   ".into() };
        assert!(req.validate().is_err());
    }
}
