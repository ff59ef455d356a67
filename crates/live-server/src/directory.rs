//! Classroom directory: the external collaborator that owns persisted
//! classroom records and classroom-session memberships.
//!
//! Two implementations: [`HttpDirectory`] talks to the REST backend,
//! [`StaticDirectory`] serves an in-memory table (optionally loaded from a
//! JSON file) for local runs and tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use live_protocol::{ClassroomId, Identity, LiveError, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Persisted classroom, as far as the live session cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassroomRecord {
    pub id: ClassroomId,
    #[serde(deserialize_with = "user_id")]
    pub teacher_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

/// A user's classroom-session record: proof of enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub classroom_id: ClassroomId,
    #[serde(deserialize_with = "user_id")]
    pub user_id: UserId,
    #[serde(default)]
    pub is_teacher: bool,
}

/// The backend issues numeric user ids; the session keys on strings.
fn user_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UserId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to read directory file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid directory data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("directory call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<DirectoryError> for LiveError {
    fn from(err: DirectoryError) -> Self {
        LiveError::DirectoryUnavailable(err.to_string())
    }
}

/// Collaborator calls consumed by the session registry. Every call carries
/// the identity it is made on behalf of so the bearer token can be forwarded.
pub trait ClassroomDirectory: Send + Sync + 'static {
    /// Fetch a classroom by id. `None` if it does not exist.
    fn classroom(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> impl Future<Output = Result<Option<ClassroomRecord>, DirectoryError>> + Send;

    /// Fetch the caller's membership in a classroom. `None` if not enrolled.
    fn membership(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> impl Future<Output = Result<Option<MembershipRecord>, DirectoryError>> + Send;

    /// Delete the caller's classroom-session record.
    fn delete_membership(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Delete the classroom. Only the teacher's token is accepted upstream.
    fn delete_classroom(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;
}

/// Bound a collaborator call.
pub async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, DirectoryError>>,
) -> Result<T, DirectoryError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| DirectoryError::Timeout(timeout))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Static directory
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk shape of a static directory file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryData {
    #[serde(default)]
    pub classrooms: Vec<ClassroomRecord>,
    #[serde(default)]
    pub memberships: Vec<MembershipRecord>,
}

/// In-memory directory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    classrooms: RwLock<HashMap<ClassroomId, ClassroomRecord>>,
    memberships: RwLock<HashMap<(ClassroomId, UserId), MembershipRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: DirectoryData) -> Self {
        let directory = Self::new();
        {
            let mut classrooms = directory.classrooms.write();
            for record in data.classrooms {
                classrooms.insert(record.id, record);
            }
            let mut memberships = directory.memberships.write();
            for record in data.memberships {
                memberships.insert((record.classroom_id, record.user_id.clone()), record);
            }
        }
        directory
    }

    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)?;
        let data: DirectoryData = serde_json::from_str(&raw)?;
        debug!(
            "Loaded {} classrooms and {} memberships from {}",
            data.classrooms.len(),
            data.memberships.len(),
            path.display()
        );
        Ok(Self::from_data(data))
    }

    /// Register a classroom and enroll its teacher.
    pub fn insert_classroom(&self, classroom_id: ClassroomId, teacher_id: impl Into<UserId>) {
        let teacher_id = teacher_id.into();
        self.classrooms.write().insert(
            classroom_id,
            ClassroomRecord {
                id: classroom_id,
                teacher_id: teacher_id.clone(),
                name: None,
                deleted: false,
            },
        );
        self.memberships.write().insert(
            (classroom_id, teacher_id.clone()),
            MembershipRecord {
                classroom_id,
                user_id: teacher_id,
                is_teacher: true,
            },
        );
    }

    /// Enroll a student.
    pub fn enroll(&self, classroom_id: ClassroomId, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        self.memberships.write().insert(
            (classroom_id, user_id.clone()),
            MembershipRecord {
                classroom_id,
                user_id,
                is_teacher: false,
            },
        );
    }

    pub fn is_enrolled(&self, classroom_id: ClassroomId, user_id: &str) -> bool {
        self.memberships
            .read()
            .contains_key(&(classroom_id, user_id.to_string()))
    }

    pub fn is_deleted(&self, classroom_id: ClassroomId) -> bool {
        self.classrooms
            .read()
            .get(&classroom_id)
            .is_some_and(|c| c.deleted)
    }
}

impl ClassroomDirectory for StaticDirectory {
    async fn classroom(
        &self,
        classroom_id: ClassroomId,
        _identity: &Identity,
    ) -> Result<Option<ClassroomRecord>, DirectoryError> {
        Ok(self.classrooms.read().get(&classroom_id).cloned())
    }

    async fn membership(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> Result<Option<MembershipRecord>, DirectoryError> {
        Ok(self
            .memberships
            .read()
            .get(&(classroom_id, identity.user_id.clone()))
            .cloned())
    }

    async fn delete_membership(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> Result<(), DirectoryError> {
        self.memberships
            .write()
            .remove(&(classroom_id, identity.user_id.clone()));
        Ok(())
    }

    async fn delete_classroom(
        &self,
        classroom_id: ClassroomId,
        _identity: &Identity,
    ) -> Result<(), DirectoryError> {
        if let Some(record) = self.classrooms.write().get_mut(&classroom_id) {
            record.deleted = true;
        }
        self.memberships
            .write()
            .retain(|(id, _), _| *id != classroom_id);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP directory
// ─────────────────────────────────────────────────────────────────────────────

/// `{ "data": ..., "error": ... }` wrapper used by every backend response.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

/// Client for the REST backend.
///
/// - `GET    {base}/classrooms` every classroom, searched by id
/// - `GET    {base}/sessions` the caller's memberships
/// - `DELETE {base}/sessions` drop the caller's membership
/// - `DELETE {base}/classrooms/{id}` delete the classroom
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        identity: &Identity,
    ) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &identity.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send and treat 404 as `None`.
    async fn send_optional(
        request: reqwest::RequestBuilder,
    ) -> Result<Option<reqwest::Response>, DirectoryError> {
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DirectoryError::Status {
                status: response.status().as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(Some(response))
    }
}

impl ClassroomDirectory for HttpDirectory {
    async fn classroom(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> Result<Option<ClassroomRecord>, DirectoryError> {
        // The backend only lists classrooms; there is no per-id lookup.
        let request = self.request(reqwest::Method::GET, "/classrooms", identity);
        let Some(response) = Self::send_optional(request).await? else {
            return Ok(None);
        };
        let body: DataEnvelope<Vec<ClassroomRecord>> = response.json().await?;
        Ok(body
            .data
            .unwrap_or_default()
            .into_iter()
            .find(|c| c.id == classroom_id))
    }

    async fn membership(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> Result<Option<MembershipRecord>, DirectoryError> {
        let request = self.request(reqwest::Method::GET, "/sessions", identity);
        let Some(response) = Self::send_optional(request).await? else {
            return Ok(None);
        };
        let body: DataEnvelope<Vec<MembershipRecord>> = response.json().await?;
        Ok(body
            .data
            .unwrap_or_default()
            .into_iter()
            .find(|m| m.classroom_id == classroom_id))
    }

    async fn delete_membership(
        &self,
        _classroom_id: ClassroomId,
        identity: &Identity,
    ) -> Result<(), DirectoryError> {
        let request = self.request(reqwest::Method::DELETE, "/sessions", identity);
        Self::send_optional(request).await?;
        Ok(())
    }

    async fn delete_classroom(
        &self,
        classroom_id: ClassroomId,
        identity: &Identity,
    ) -> Result<(), DirectoryError> {
        let request = self.request(
            reqwest::Method::DELETE,
            &format!("/classrooms/{classroom_id}"),
            identity,
        );
        // Already gone counts as deleted.
        Self::send_optional(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_user_ids_become_strings() {
        let record: MembershipRecord = serde_json::from_str(
            r#"{"id": 3, "classroom_id": 7, "user_id": 12, "is_teacher": true}"#,
        )
        .unwrap();
        assert_eq!(record.user_id, "12");
        assert!(record.is_teacher);
    }

    #[test]
    fn directory_error_maps_to_unavailable() {
        let err: LiveError = DirectoryError::Timeout(Duration::from_millis(5)).into();
        assert!(matches!(err, LiveError::DirectoryUnavailable(_)));
    }

    #[tokio::test]
    async fn static_directory_tracks_enrollment_and_deletion() {
        let directory = StaticDirectory::new();
        directory.insert_classroom(7, "teacher");
        directory.enroll(7, "alice");

        let alice = Identity::new("alice");
        assert!(directory.membership(7, &alice).await.unwrap().is_some());
        assert!(directory.is_enrolled(7, "teacher"));

        directory.delete_membership(7, &alice).await.unwrap();
        assert!(!directory.is_enrolled(7, "alice"));

        directory.delete_classroom(7, &Identity::new("teacher")).await.unwrap();
        assert!(directory.is_deleted(7));
        assert!(!directory.is_enrolled(7, "teacher"));
    }

    #[tokio::test]
    async fn with_timeout_reports_slow_calls() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), DirectoryError>(())
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Timeout(_)));
    }
}
