use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::directory::Directory;

/// Cleartext password lookup against the directory's user entries.
#[derive(Debug)]
pub struct DirectoryAuthSource {
    directory: Arc<Directory>,
}

impl DirectoryAuthSource {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl AuthSource for DirectoryAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        match self.directory.password(user) {
            Some(pw) => Ok(Password::new(None, pw.as_bytes().to_vec())),
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                tracing::warn!(login = user, "login rejected: unknown user");
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28P01".into(),
                    format!("password authentication failed for user \"{user}\""),
                ))))
            }
        }
    }
}
