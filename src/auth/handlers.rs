use axum::{extract::State, http::StatusCode, response::Response};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            normalize_email, CredentialsRequest, EmailRequest, PasswordResetRequest,
            RegisterRequest, TokenRequest,
        },
        repo_types::{
            validate_email, validate_password_plaintext, validate_user, Scope, User, MOVIES_READ,
        },
        tokens::{self, ACTIVATION_TTL, AUTHENTICATION_TTL, PASSWORD_RESET_TTL},
    },
    db::DataError,
    error::{envelope, AppError},
    extract::JsonBody,
    mailer::Email,
    state::AppState,
    validator::Validator,
};

/// `POST /v1/users`
#[instrument(skip(state, payload))]
pub async fn register_user(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<Response, AppError> {
    let mut user = User::new(payload.name, normalize_email(&payload.email));
    user.password.set(&payload.password)?;

    let mut v = Validator::new();
    validate_user(&mut v, &user);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    state.models.users.insert(&mut user).await?;
    state
        .models
        .permissions
        .add_for_user(user.id, &[MOVIES_READ])
        .await?;
    let token = state
        .models
        .tokens
        .new_token(user.id, ACTIVATION_TTL, Scope::Activation)
        .await?;

    info!(user_id = user.id, "user registered");
    send_in_background(
        &state,
        "welcome email",
        &user.email,
        Email::Welcome {
            user_id: user.id,
            activation_token: token.plaintext,
        },
    );

    Ok(envelope(StatusCode::ACCEPTED, "user", &user))
}

/// `PUT /v1/users/activated`
#[instrument(skip(state, payload))]
pub async fn activate_user(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<TokenRequest>,
) -> Result<Response, AppError> {
    let mut v = Validator::new();
    tokens::validate_plaintext(&mut v, &payload.token);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    let mut user = match state
        .models
        .users
        .get_for_token(Scope::Activation, &payload.token)
        .await
    {
        Ok(user) => user,
        Err(DataError::RecordNotFound) => {
            return Err(AppError::validation(
                "token",
                "invalid or expired activation token",
            ))
        }
        Err(e) => return Err(e.into()),
    };

    user.activated = true;
    state.models.users.update(&mut user).await?;
    state
        .models
        .tokens
        .delete_all_for_user(Scope::Activation, user.id)
        .await?;

    info!(user_id = user.id, "user activated");
    Ok(envelope(StatusCode::OK, "user", &user))
}

/// `PUT /v1/users/password`
#[instrument(skip(state, payload))]
pub async fn update_user_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<PasswordResetRequest>,
) -> Result<Response, AppError> {
    let mut v = Validator::new();
    validate_password_plaintext(&mut v, &payload.password);
    tokens::validate_plaintext(&mut v, &payload.token);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    let mut user = match state
        .models
        .users
        .get_for_token(Scope::PasswordReset, &payload.token)
        .await
    {
        Ok(user) => user,
        Err(DataError::RecordNotFound) => {
            return Err(AppError::validation(
                "token",
                "invalid or expired password reset token",
            ))
        }
        Err(e) => return Err(e.into()),
    };

    user.password.set(&payload.password)?;
    state.models.users.update(&mut user).await?;
    state
        .models
        .tokens
        .delete_all_for_user(Scope::PasswordReset, user.id)
        .await?;

    info!(user_id = user.id, "password reset");
    Ok(envelope(
        StatusCode::OK,
        "message",
        "your password was successfully reset",
    ))
}

/// `POST /v1/tokens/authentication`
#[instrument(skip(state, payload))]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CredentialsRequest>,
) -> Result<Response, AppError> {
    let email = normalize_email(&payload.email);

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    validate_password_plaintext(&mut v, &payload.password);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    let user = match state.models.users.get_by_email(&email).await {
        Ok(user) => user,
        Err(DataError::RecordNotFound) => {
            warn!("login for unknown email");
            return Err(AppError::InvalidCredentials);
        }
        Err(e) => return Err(e.into()),
    };

    if !user.password.matches(&payload.password)? {
        warn!(user_id = user.id, "login with wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .models
        .tokens
        .new_token(user.id, AUTHENTICATION_TTL, Scope::Authentication)
        .await?;

    info!(user_id = user.id, "authentication token issued");
    Ok(envelope(StatusCode::CREATED, "authentication_token", &token))
}

/// `POST /v1/tokens/activation`
#[instrument(skip(state, payload))]
pub async fn create_activation_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<EmailRequest>,
) -> Result<Response, AppError> {
    let user = user_for_email(&state, &payload.email).await?;
    if user.activated {
        return Err(AppError::validation(
            "email",
            "user has already been activated",
        ));
    }

    let token = state
        .models
        .tokens
        .new_token(user.id, ACTIVATION_TTL, Scope::Activation)
        .await?;
    send_in_background(
        &state,
        "activation email",
        &user.email,
        Email::Activation {
            activation_token: token.plaintext,
        },
    );

    Ok(envelope(
        StatusCode::ACCEPTED,
        "message",
        "an email will be sent to you containing activation instructions",
    ))
}

/// `POST /v1/tokens/password-reset`
#[instrument(skip(state, payload))]
pub async fn create_password_reset_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<EmailRequest>,
) -> Result<Response, AppError> {
    let user = user_for_email(&state, &payload.email).await?;
    if !user.activated {
        return Err(AppError::validation(
            "email",
            "user account must be activated",
        ));
    }

    let token = state
        .models
        .tokens
        .new_token(user.id, PASSWORD_RESET_TTL, Scope::PasswordReset)
        .await?;
    send_in_background(
        &state,
        "password reset email",
        &user.email,
        Email::PasswordReset {
            reset_token: token.plaintext,
        },
    );

    Ok(envelope(
        StatusCode::ACCEPTED,
        "message",
        "an email will be sent to you containing password reset instructions",
    ))
}

async fn user_for_email(state: &AppState, raw: &str) -> Result<User, AppError> {
    let email = normalize_email(raw);

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    match state.models.users.get_by_email(&email).await {
        Ok(user) => Ok(user),
        Err(DataError::RecordNotFound) => Err(AppError::validation(
            "email",
            "no matching email address found",
        )),
        Err(e) => Err(e.into()),
    }
}

fn send_in_background(state: &AppState, task: &'static str, recipient: &str, email: Email) {
    let mailer = state.mailer.clone();
    let recipient = recipient.to_owned();
    state.background.spawn(task, async move {
        if let Err(e) = mailer.send(&recipient, email).await {
            error!(task, error = %format!("{e:#}"), "email delivery failed");
        }
    });
}
