// src/models/user.rs
//! User data model.
//!
//! Users are created and linked to the identity provider outside this
//! service; the API reads them to make every access decision and to render
//! profiles.
//!
//! # Stored properties
//! - `role`: one of [`Role`]
//! - `sub`: identity-provider subject bound at account-linking time
//! - `avatar_file_name`: blob name of the current avatar, or `null`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity kind holding user records.
pub const USERS: &str = "users";

/// Property binding a user record to an identity-provider subject.
pub const SUB_FIELD: &str = "sub";

/// Property holding the user's role.
pub const ROLE_FIELD: &str = "role";

/// Property holding the avatar blob name; never returned to callers.
pub const AVATAR_FIELD: &str = "avatar_file_name";

/// The fixed set of roles a user can hold.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Instructor => "instructor",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload for `POST /users/login`.
///
/// Both fields are optional at the type level so a missing one is reported
/// as an invalid body rather than a deserialization rejection.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Response for a successful login.
#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
}

/// Response for avatar upload and lookup.
#[derive(Serialize, Deserialize, Debug)]
pub struct AvatarResponse {
    pub avatar_url: String,
}
