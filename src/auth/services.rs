use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{
    dto::{LoginRequest, RegisterRequest},
    password::{hash_password, verify_password},
};
use crate::{
    data::DataAccessor,
    error::{AppError, Validator},
    models::User,
};

pub const PASSWORD_MIN_LEN: usize = 8;
pub const NAME_MAX_LEN: usize = 64;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Path segments under `/profile/` that would shadow a user's profile page.
pub const USERNAME_RULE: &str = "3-32 letters, digits, '_', '.' or '-', and not a reserved name";

pub const RESERVED_USERNAMES: [&str; 1] = ["edit"];

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    }
    USERNAME_RE.is_match(username)
        && !RESERVED_USERNAMES
            .iter()
            .any(|r| r.eq_ignore_ascii_case(username))
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    Validator::new()
        .check(
            is_valid_username(&req.username),
            "username",
            USERNAME_RULE,
        )
        .check(is_valid_email(&req.email), "email", "Invalid email")
        .check(
            req.password.chars().count() >= PASSWORD_MIN_LEN,
            "password",
            "Password too short",
        )
        .max_len(&req.first_name, NAME_MAX_LEN, "first_name")
        .max_len(&req.last_name, NAME_MAX_LEN, "last_name")
        .finish()
}

/// Validates and stores a new account.
pub async fn register_user(
    data: &mut DataAccessor,
    mut req: RegisterRequest,
) -> Result<User, AppError> {
    req.username = req.username.trim().to_string();
    req.email = req.email.trim().to_lowercase();
    req.first_name = req.first_name.trim().to_string();
    req.last_name = req.last_name.trim().to_string();
    validate_registration(&req)?;

    if data.user_by_username(&req.username).await?.is_some() {
        warn!(username = %req.username, "username already taken");
        return Err(AppError::Conflict("Username already taken".into()));
    }
    if data.user_by_email(&req.email).await?.is_some() {
        warn!(email = %req.email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let hash = hash_password(&req.password)?;
    let user = User::new(
        req.username,
        req.email,
        hash,
        req.first_name,
        req.last_name,
        req.birthdate,
        OffsetDateTime::now_utc(),
    );
    let user = data.create(user).await?;
    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Resolves `login` as an email when it contains `@`, as a username otherwise.
pub async fn authenticate(data: &DataAccessor, req: &LoginRequest) -> Result<User, AppError> {
    let login = req.login.trim();
    let found = if login.contains('@') {
        data.user_by_email(&login.to_lowercase()).await?
    } else {
        data.user_by_username(login).await?
    };

    let Some(user) = found else {
        warn!(login = %login, "login unknown user");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }
    Ok(user)
}
