//! Local identity state.
//!
//! The state file holds the anonymous session token and, after a login, the
//! user record the host application received. The record is the last source
//! consulted when a request needs a user id the credential does not carry.

use cartsync_engine::user_id_from_record;
use serde_json::Value;
use tracing::info;

use super::{CommandError, Context};

/// Print the stored session token and who the current identity resolves to.
pub fn show(ctx: &Context) {
    match ctx.engine.sessions().get_session_token() {
        Some(token) => info!(session = %token, "Anonymous session"),
        None => info!("No anonymous session yet"),
    }

    if !ctx.identity.is_authenticated() {
        info!("Not logged in");
        return;
    }
    match ctx.engine.resolver().resolve_user_id(&ctx.identity) {
        Some(user_id) => info!(user_id = %user_id, "Logged in"),
        None => info!("Logged in, user id unknown"),
    }
}

/// Persist a user record (a JSON object with an id field).
///
/// # Errors
///
/// Returns an error if the record is not JSON or carries no id.
pub fn set_user(ctx: &Context, record: &str) -> Result<(), CommandError> {
    let record: Value =
        serde_json::from_str(record).map_err(|e| CommandError::InvalidUserRecord(e.to_string()))?;
    let Some(user_id) = user_id_from_record(&record) else {
        return Err(CommandError::InvalidUserRecord(
            "expected an object with an id field".to_string(),
        ));
    };

    ctx.engine.sessions().store_user_record(&record);
    info!(user_id = %user_id, "Saved user record");
    Ok(())
}

/// Forget the session token and user record.
pub fn forget(ctx: &Context) {
    let sessions = ctx.engine.sessions();
    sessions.clear_session_token();
    sessions.clear_user_record();
    info!("Cleared local session state");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use cartsync_core::UserId;

    use super::*;

    fn context(state_file: &Path, token: Option<&str>) -> Context {
        Context::new(
            Some("http://127.0.0.1:9/api"),
            token.map(str::to_owned),
            state_file,
        )
        .unwrap()
    }

    #[test]
    fn test_saved_user_record_resolves_user_id() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        set_user(&context(&state_file, None), r#"{"_id": "u-42", "name": "Sam"}"#).unwrap();

        // Opaque credential: no claims to decode, so the saved record answers.
        let ctx = context(&state_file, Some("opaque-credential"));
        assert_eq!(
            ctx.engine.resolver().resolve_user_id(&ctx.identity),
            Some(UserId::new("u-42"))
        );
    }

    #[test]
    fn test_user_record_without_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir.path().join("state.json"), Some("opaque-credential"));

        for record in [r#"{"name": "Sam"}"#, "not json"] {
            let err = set_user(&ctx, record).unwrap_err();
            assert!(matches!(err, CommandError::InvalidUserRecord(_)));
        }
        assert!(ctx.engine.sessions().stored_user_record().is_none());
    }

    #[test]
    fn test_forget_clears_local_state() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let ctx = context(&state_file, None);
        ctx.engine.sessions().get_or_create_session_token();
        set_user(&ctx, r#"{"id": 7}"#).unwrap();

        forget(&ctx);

        let ctx = context(&state_file, None);
        assert!(ctx.engine.sessions().get_session_token().is_none());
        assert!(ctx.engine.sessions().stored_user_record().is_none());
    }
}
