use axum::http::HeaderMap;

use crate::error::AppError;
use crate::state::AppState;

pub const OPERATOR_HEADER: &str = "x-operator-id";
pub const BOT_SECRET_HEADER: &str = "x-bot-secret";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Cashier writes. Open when no operator is configured.
pub fn require_operator(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(operator_id) = state.operator_id else {
        return Ok(());
    };

    let presented = header(headers, OPERATOR_HEADER).and_then(|raw| raw.trim().parse::<i64>().ok());
    if presented == Some(operator_id) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Chat adapter calls. Open when no secret is configured.
pub fn require_bot(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(secret) = state.bot_secret.as_deref() else {
        return Ok(());
    };

    if header(headers, BOT_SECRET_HEADER) == Some(secret) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}
