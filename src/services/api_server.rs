// src/services/api_server.rs
//! REST API for the course-management service.
//!
//! Users, courses, enrollment and avatars, built with Axum. Every
//! resource-scoped route runs the same access pipeline before touching the
//! resource:
//!
//! 1. resolve the target record (404 if absent)
//! 2. verify the bearer credential (401)
//! 3. check the route's access policy against stored user records (403)
//!
//! Routes without a target record start at step 2; `GET /courses`,
//! `GET /courses/:id` and login are public.

use crate::auth::authorizer::{AccessPolicy, Authorizer};
use crate::auth::guard::EntityGuard;
use crate::auth::verifier::{AuthenticatedClaims, CredentialVerifier};
use crate::error::ApiError;
use crate::models::course::{
    CoursePage, CreateCourseRequest, EnrollmentUpdate, COURSES, ENROLLED_FIELD, INSTRUCTOR_FIELD,
};
use crate::models::user::{
    AvatarResponse, LoginRequest, LoginResponse, Role, AVATAR_FIELD, ROLE_FIELD, USERS,
};
use crate::services::identity_provider::IdentityProviderClient;
use crate::storage::blob_store::BlobStore;
use crate::storage::{Datastore, Entity, Filter, Key, PropertyFilter, Query};
use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, DefaultBodyLimit, Multipart,
        Path, Query as QueryParams, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Deployment-specific knobs of the API.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Object-store bucket holding avatars
    pub avatar_bucket: String,
    /// Largest accepted request body, avatars included
    pub avatar_max_bytes: usize,
    /// Base of self links; derived from the `Host` header when `None`
    pub public_base_url: Option<String>,
}

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    /// Primary record store
    store: Arc<dyn Datastore>,

    /// Avatar object storage
    blobs: Arc<dyn BlobStore>,

    /// Bearer-credential verification
    verifier: Arc<CredentialVerifier>,

    /// Role and ownership checks
    authorizer: Arc<Authorizer>,

    /// Existence check for resource-scoped routes
    guard: Arc<EntityGuard>,

    /// Token endpoint used by login
    identity_provider: Arc<IdentityProviderClient>,

    options: ServerOptions,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `store` - Record store shared by the handlers and the access checks
    /// * `blobs` - Object store for avatars
    /// * `verifier` - Credential verifier bound to the provider key set
    /// * `identity_provider` - Client for the provider's token endpoint
    /// * `options` - Bucket, body limit and link base
    pub fn new(
        store: Arc<dyn Datastore>,
        blobs: Arc<dyn BlobStore>,
        verifier: CredentialVerifier,
        identity_provider: IdentityProviderClient,
        options: ServerOptions,
    ) -> Self {
        ApiServer {
            authorizer: Arc::new(Authorizer::new(store.clone())),
            guard: Arc::new(EntityGuard::new(store.clone())),
            store,
            blobs,
            verifier: Arc::new(verifier),
            identity_provider: Arc::new(identity_provider),
            options,
        }
    }

    /// Builds the router with every API route.
    pub fn router(self: Arc<Self>) -> Router {
        let body_limit = self.options.avatar_max_bytes;
        Router::new()
            .route("/", get(Self::index_handler))
            .route("/users/login", post(Self::login_handler))
            .route("/users", get(Self::list_users_handler))
            .route("/users/:id", get(Self::get_user_handler))
            .route(
                "/users/:id/avatar",
                post(Self::upload_avatar_handler)
                    .get(Self::get_avatar_handler)
                    .delete(Self::delete_avatar_handler),
            )
            .route(
                "/courses",
                post(Self::create_course_handler).get(Self::list_courses_handler),
            )
            .route(
                "/courses/:id",
                get(Self::get_course_handler)
                    .patch(Self::update_course_handler)
                    .delete(Self::delete_course_handler),
            )
            .route(
                "/courses/:id/students",
                get(Self::get_enrollment_handler).patch(Self::update_enrollment_handler),
            )
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(body_limit))
            .with_state(self)
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:8080")
    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let app = Arc::new(self).router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{addr}");
        axum::serve(listener, app).await
    }

    // =====================
    // Access pipeline
    // =====================

    /// Resolves the record a resource-scoped route targets.
    async fn fetch(&self, kind: &str, id: i64) -> Result<(Entity, Key), ApiError> {
        Ok(self.guard.fetch(kind, id).await?)
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedClaims, ApiError> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        Ok(self.verifier.verify(authorization).await?)
    }

    /// Authenticates the caller and checks `policy` against user records.
    async fn require(
        &self,
        headers: &HeaderMap,
        policy: AccessPolicy,
    ) -> Result<AuthenticatedClaims, ApiError> {
        let claims = self.authenticate(headers).await?;
        self.authorizer.authorize(USERS, &policy, &claims).await?;
        Ok(claims)
    }

    // =====================
    // Helpers
    // =====================

    fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.options.public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{host}")
    }

    async fn has_role(&self, user_id: i64, role: Role) -> Result<bool, ApiError> {
        let user = self.store.get(&Key::new(USERS, user_id)).await?;
        Ok(user.map_or(false, |user| user.get_str(ROLE_FIELD) == Some(role.as_str())))
    }

    async fn ids_with_role(&self, role: Role) -> Result<HashSet<i64>, ApiError> {
        let users = self
            .store
            .query(Query::new(USERS).filter(Filter::Property(PropertyFilter::eq(
                ROLE_FIELD,
                role.as_str(),
            ))))
            .await?;
        Ok(users.iter().map(Entity::id).collect())
    }

    // =====================
    // Users
    // =====================

    /// GET /
    async fn index_handler() -> &'static str {
        "Please navigate to /users/login to use this API"
    }

    /// Exchanges a username and password for an ID token
    ///
    /// # Endpoint
    /// POST /users/login
    ///
    /// # Responses
    /// - 200 OK: `{"token": ...}`
    /// - 400 Bad Request: username or password missing
    /// - 401 Unauthorized: the provider refused the credentials
    async fn login_handler(
        State(state): State<Arc<ApiServer>>,
        body: Bytes,
    ) -> Result<Json<LoginResponse>, ApiError> {
        let request: LoginRequest =
            serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest)?;
        let (Some(username), Some(password)) = (request.username, request.password) else {
            return Err(ApiError::BadRequest);
        };

        let token = state
            .identity_provider
            .password_grant(&username, &password)
            .await?;
        Ok(Json(LoginResponse { token }))
    }

    /// Lists every user
    ///
    /// # Endpoint
    /// GET /users (admin only)
    async fn list_users_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<Map<String, Value>>>, ApiError> {
        state.require(&headers, AccessPolicy::admin()).await?;

        let users = state.store.query(Query::new(USERS)).await?;
        Ok(Json(users.iter().map(public_user).collect()))
    }

    /// Returns one user
    ///
    /// # Endpoint
    /// GET /users/:id (admin, or the user themself)
    ///
    /// Instructors and students additionally get the links of the courses
    /// they teach or attend, and `avatar_url` when an avatar is set.
    async fn get_user_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<Map<String, Value>>, ApiError> {
        let (user, key) = state.fetch(USERS, parse_id(&id)?).await?;
        state
            .require(&headers, AccessPolicy::admin_or_owner(key))
            .await?;

        let mut body = public_user(&user);
        let courses = match user.get_str(ROLE_FIELD) {
            Some("instructor") => {
                state
                    .store
                    .query(Query::new(COURSES).filter(Filter::Property(PropertyFilter::eq(
                        INSTRUCTOR_FIELD,
                        user.id(),
                    ))))
                    .await?
            }
            Some("student") => state
                .store
                .query(Query::new(COURSES))
                .await?
                .into_iter()
                .filter(|course| enrolled_ids(course).contains(&user.id()))
                .collect(),
            _ => return Ok(Json(body)),
        };

        let base = state.base_url(&headers);
        if avatar_name(&user).is_some() {
            body.insert("avatar_url".into(), json!(avatar_link(&base, user.id())));
        }
        let links: Vec<String> = courses
            .iter()
            .map(|course| course_link(&base, course.id()))
            .collect();
        body.insert("courses".into(), json!(links));
        Ok(Json(body))
    }

    /// Creates or replaces a user's avatar
    ///
    /// # Endpoint
    /// POST /users/:id/avatar (admin, or the user themself)
    ///
    /// # Request Body
    /// `multipart/form-data` with a `file` field
    ///
    /// # Responses
    /// - 200 OK: `{"avatar_url": ...}`
    /// - 400 Bad Request: no `file` field
    async fn upload_avatar_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
        multipart: Result<Multipart, MultipartRejection>,
    ) -> Result<Json<AvatarResponse>, ApiError> {
        let (mut user, key) = state.fetch(USERS, parse_id(&id)?).await?;
        state
            .require(&headers, AccessPolicy::admin_or_owner(key))
            .await?;

        let mut multipart = multipart.map_err(|_| ApiError::BadRequest)?;
        let upload = loop {
            let field = multipart
                .next_field()
                .await
                .map_err(|_| ApiError::BadRequest)?
                .ok_or(ApiError::BadRequest)?;
            if field.name() != Some("file") {
                continue;
            }
            let file_name = field.file_name().map(base_name).unwrap_or("avatar").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|_| ApiError::BadRequest)?;
            break (file_name, content_type, data);
        };
        let (file_name, content_type, data) = upload;

        let bucket = &state.options.avatar_bucket;
        if let Some(previous) = avatar_name(&user) {
            state.blobs.delete(bucket, previous).await?;
        }
        let blob_name = format!("{}/{}", user.id(), file_name);
        state
            .blobs
            .upload(bucket, &blob_name, data, content_type)
            .await?;
        debug!("stored avatar {blob_name} for user {}", user.id());

        user.set(AVATAR_FIELD, blob_name);
        let user = state.store.put(user).await?;
        Ok(Json(AvatarResponse {
            avatar_url: avatar_link(&state.base_url(&headers), user.id()),
        }))
    }

    /// Returns the link of a user's avatar
    ///
    /// # Endpoint
    /// GET /users/:id/avatar (the user themself only)
    async fn get_avatar_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<AvatarResponse>, ApiError> {
        let (user, key) = state.fetch(USERS, parse_id(&id)?).await?;
        state.require(&headers, AccessPolicy::owner(key)).await?;

        if avatar_name(&user).is_none() {
            return Err(ApiError::NotFound);
        }
        Ok(Json(AvatarResponse {
            avatar_url: avatar_link(&state.base_url(&headers), user.id()),
        }))
    }

    /// Deletes a user's avatar
    ///
    /// # Endpoint
    /// DELETE /users/:id/avatar (the user themself only)
    async fn delete_avatar_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<StatusCode, ApiError> {
        let (mut user, key) = state.fetch(USERS, parse_id(&id)?).await?;
        state.require(&headers, AccessPolicy::owner(key)).await?;

        let blob_name = avatar_name(&user).ok_or(ApiError::NotFound)?.to_string();
        state
            .blobs
            .delete(&state.options.avatar_bucket, &blob_name)
            .await?;
        user.set(AVATAR_FIELD, Value::Null);
        state.store.put(user).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    // =====================
    // Courses
    // =====================

    /// Creates a course
    ///
    /// # Endpoint
    /// POST /courses (admin only)
    ///
    /// # Responses
    /// - 201 Created: the course with `id` and `self`
    /// - 400 Bad Request: missing field, non-numeric `number`, or an
    ///   `instructor_id` that is not an instructor
    async fn create_course_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, ApiError> {
        state.require(&headers, AccessPolicy::admin()).await?;

        let request: CreateCourseRequest =
            serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest)?;
        let number = request.number.to_i64().ok_or(ApiError::BadRequest)?;
        if !state.has_role(request.instructor_id, Role::Instructor).await? {
            return Err(ApiError::BadRequest);
        }

        let mut course = Entity::new(Key::incomplete(COURSES));
        course.set("subject", request.subject);
        course.set("number", number);
        course.set("title", request.title);
        course.set("term", request.term);
        course.set(INSTRUCTOR_FIELD, request.instructor_id);
        course.set(ENROLLED_FIELD, json!([]));
        let course = state.store.put(course).await?;
        info!("created course {}", course.key);

        let body = public_course(&course, &state.base_url(&headers));
        Ok((StatusCode::CREATED, Json(body)).into_response())
    }

    /// Lists courses a page at a time, ordered by subject
    ///
    /// # Endpoint
    /// GET /courses?limit=&offset= (public)
    async fn list_courses_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        page: Result<QueryParams<CoursePage>, QueryRejection>,
    ) -> Result<Json<Value>, ApiError> {
        let QueryParams(page) = page.map_err(|_| ApiError::BadRequest)?;

        let courses = state
            .store
            .query(
                Query::new(COURSES)
                    .order_by("subject")
                    .page(page.offset, page.limit),
            )
            .await?;
        let base = state.base_url(&headers);
        let courses: Vec<Map<String, Value>> = courses
            .iter()
            .map(|course| public_course(course, &base))
            .collect();
        let next = format!(
            "{base}/courses?limit={}&offset={}",
            page.limit,
            page.offset.saturating_add(page.limit)
        );
        Ok(Json(json!({ "courses": courses, "next": next })))
    }

    /// GET /courses/:id (public)
    async fn get_course_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<Map<String, Value>>, ApiError> {
        let (course, _) = state.fetch(COURSES, parse_id(&id)?).await?;
        Ok(Json(public_course(&course, &state.base_url(&headers))))
    }

    /// Updates a course's existing properties
    ///
    /// # Endpoint
    /// PATCH /courses/:id (admin only)
    ///
    /// Unknown properties are ignored and the enrollment list is never
    /// touched; use `/courses/:id/students` for that.
    async fn update_course_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Json<Map<String, Value>>, ApiError> {
        let (mut course, _) = state.fetch(COURSES, parse_id(&id)?).await?;
        state.require(&headers, AccessPolicy::admin()).await?;

        let changes: Map<String, Value> =
            serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest)?;
        if let Some(instructor) = changes.get(INSTRUCTOR_FIELD) {
            let instructor = instructor.as_i64().ok_or(ApiError::BadRequest)?;
            if !state.has_role(instructor, Role::Instructor).await? {
                return Err(ApiError::BadRequest);
            }
        }

        for (field, value) in changes {
            if field != ENROLLED_FIELD && course.properties.contains_key(&field) {
                course.properties.insert(field, value);
            }
        }
        let course = state.store.put(course).await?;
        Ok(Json(public_course(&course, &state.base_url(&headers))))
    }

    /// DELETE /courses/:id (admin only)
    async fn delete_course_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<StatusCode, ApiError> {
        let (_, key) = state.fetch(COURSES, parse_id(&id)?).await?;
        state.require(&headers, AccessPolicy::admin()).await?;

        state.store.delete(&key).await?;
        info!("deleted course {key}");
        Ok(StatusCode::NO_CONTENT)
    }

    // =====================
    // Enrollment
    // =====================

    /// Lists the ids of enrolled students
    ///
    /// # Endpoint
    /// GET /courses/:id/students (admin, or the course's instructor)
    async fn get_enrollment_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<i64>>, ApiError> {
        let (course, _) = state.fetch(COURSES, parse_id(&id)?).await?;
        state.require(&headers, teaching_policy(&course)).await?;

        Ok(Json(enrolled_ids(&course)))
    }

    /// Enrolls and unenrolls students
    ///
    /// # Endpoint
    /// PATCH /courses/:id/students (admin, or the course's instructor)
    ///
    /// # Request Body
    /// `{"add": [ids], "remove": [ids]}`
    ///
    /// # Responses
    /// - 200 OK: changes applied
    /// - 409 Conflict: malformed body, an id that is not a student, or an id
    ///   in both lists; nothing is changed
    async fn update_enrollment_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<StatusCode, ApiError> {
        let (mut course, _) = state.fetch(COURSES, parse_id(&id)?).await?;
        state.require(&headers, teaching_policy(&course)).await?;

        let update: EnrollmentUpdate =
            serde_json::from_slice(&body).map_err(|_| ApiError::InvalidEnrollment)?;
        let students = state.ids_with_role(Role::Student).await?;
        let removing: HashSet<i64> = update.remove.iter().copied().collect();
        let valid = update
            .add
            .iter()
            .all(|id| students.contains(id) && !removing.contains(id))
            && update.remove.iter().all(|id| students.contains(id));
        if !valid {
            return Err(ApiError::InvalidEnrollment);
        }

        let mut enrolled = enrolled_ids(&course);
        for student in update.add {
            if !enrolled.contains(&student) {
                enrolled.push(student);
            }
        }
        enrolled.retain(|student| !removing.contains(student));
        course.set(ENROLLED_FIELD, json!(enrolled));
        state.store.put(course).await?;
        Ok(StatusCode::OK)
    }
}

/// Route ids are integers; anything else cannot name a record.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

/// Keeps only the last path segment of an uploaded file name.
fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("avatar")
}

fn course_link(base: &str, id: i64) -> String {
    format!("{base}/courses/{id}")
}

fn avatar_link(base: &str, user_id: i64) -> String {
    format!("{base}/users/{user_id}/avatar")
}

fn avatar_name(user: &Entity) -> Option<&str> {
    user.get_str(AVATAR_FIELD).filter(|name| !name.is_empty())
}

fn enrolled_ids(course: &Entity) -> Vec<i64> {
    course
        .get(ENROLLED_FIELD)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Admins, or the user record of the course's instructor.
fn teaching_policy(course: &Entity) -> AccessPolicy {
    match course.get_i64(INSTRUCTOR_FIELD) {
        Some(instructor) => AccessPolicy::admin_or_owner(Key::new(USERS, instructor)),
        None => AccessPolicy::admin(),
    }
}

/// User representation without the avatar blob name.
fn public_user(user: &Entity) -> Map<String, Value> {
    let mut body = user.to_json();
    body.remove(AVATAR_FIELD);
    body.insert("id".into(), json!(user.id()));
    body
}

/// Course representation without the enrollment list.
fn public_course(course: &Entity, base: &str) -> Map<String, Value> {
    let mut body = course.to_json();
    body.remove(ENROLLED_FIELD);
    body.insert("id".into(), json!(course.id()));
    body.insert("self".into(), json!(course_link(base, course.id())));
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course_with(enrolled: Value, instructor: Option<i64>) -> Entity {
        let mut course = Entity::new(Key::new(COURSES, 9));
        course.set("subject", "CS");
        course.set(ENROLLED_FIELD, enrolled);
        if let Some(id) = instructor {
            course.set(INSTRUCTOR_FIELD, id);
        }
        course
    }

    #[test]
    fn public_course_hides_enrollment() {
        let body = public_course(&course_with(json!([1, 2]), Some(4)), "http://api");
        assert!(!body.contains_key(ENROLLED_FIELD));
        assert_eq!(body["id"], json!(9));
        assert_eq!(body["self"], json!("http://api/courses/9"));
        assert_eq!(body[INSTRUCTOR_FIELD], json!(4));
    }

    #[test]
    fn public_user_hides_only_avatar_name() {
        let mut user = Entity::new(Key::new(USERS, 3));
        user.set(ROLE_FIELD, "student");
        user.set("sub", "auth0|s");
        user.set(AVATAR_FIELD, "3/me.png");
        let body = public_user(&user);
        assert!(!body.contains_key(AVATAR_FIELD));
        assert_eq!(body["sub"], json!("auth0|s"));
        assert_eq!(body["id"], json!(3));
    }

    #[test]
    fn teaching_policy_names_instructor_record() {
        let policy = teaching_policy(&course_with(json!([]), Some(4)));
        assert_eq!(policy, AccessPolicy::admin_or_owner(Key::new(USERS, 4)));
        assert_eq!(teaching_policy(&course_with(json!([]), None)), AccessPolicy::admin());
    }

    #[test]
    fn upload_names_are_reduced_to_base_name() {
        assert_eq!(base_name("me.png"), "me.png");
        assert_eq!(base_name("../../etc/passwd"), "passwd");
        assert_eq!(base_name("C:\\Users\\me\\face.jpg"), "face.jpg");
        assert_eq!(base_name("dir/"), "avatar");
    }

    #[test]
    fn non_numeric_ids_are_not_found() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id("abc"), Err(ApiError::NotFound)));
    }

    #[test]
    fn enrolled_ids_ignore_garbage() {
        assert_eq!(enrolled_ids(&course_with(json!([1, "x", 3]), None)), vec![1, 3]);
        assert!(enrolled_ids(&course_with(Value::Null, None)).is_empty());
    }
}
