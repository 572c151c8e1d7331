//! Caller identity resolution for CLI commands.
//!
//! The resolution chain: `--user` flag > `VELLUM_USER` env > `[auth] user` in
//! the user config. A config session whose `expires_at` has passed resolves
//! to an anonymous caller, which the engine rejects as unauthenticated.

use chrono::{DateTime, Utc};
use std::env;
use tracing::warn;
use vellum_core::Caller;
use vellum_core::config::AuthConfig;

const USER_ENV: &str = "VELLUM_USER";

/// Environment reader trait for dependency injection in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

fn resolve_caller_with(
    cli_flag: Option<&str>,
    env: &dyn EnvReader,
    auth: &AuthConfig,
    now: DateTime<Utc>,
) -> Caller {
    if let Some(user) = cli_flag.filter(|u| !u.trim().is_empty()) {
        return Caller::authenticated(user);
    }

    if let Some(user) = env.get(USER_ENV) {
        return Caller::authenticated(user);
    }

    match auth.user.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(user) if auth.is_expired(now) => {
            warn!(user, "session expired");
            Caller::anonymous()
        }
        Some(user) => Caller::authenticated(user),
        None => Caller::anonymous(),
    }
}

/// Resolve who is running this command.
pub fn resolve_caller(cli_flag: Option<&str>, auth: &AuthConfig) -> Caller {
    resolve_caller_with(cli_flag, &RealEnv, auth, Utc::now())
}
