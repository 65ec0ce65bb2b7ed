use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_USER_ID_LEN;

/// Shared-password login. The user name is taken as the guest identity, so
/// names that could not be stored on a booking are refused up front.
#[derive(Debug)]
pub struct RoomRateAuthSource {
    password: String,
}

impl RoomRateAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

fn usable_user(user: Option<&str>) -> bool {
    matches!(user, Some(u) if !u.is_empty() && u.len() <= MAX_USER_ID_LEN)
}

#[async_trait]
impl AuthSource for RoomRateAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if !usable_user(login.user()) {
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("user name must be 1..={MAX_USER_ID_LEN} bytes"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
