// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

/// Holds the single accepted credential pair.
///
/// The mutex keeps the door open for rotating credentials at runtime;
/// today nothing writes after construction.
#[derive(Debug)]
pub struct AuthService {
    credentials: Mutex<Credentials>,
}

#[derive(Debug, Clone)]
struct Credentials {
    user: String,
    password: String,
}

impl AuthService {
    pub fn new(default_user: &str, default_password: &str) -> Self {
        Self {
            credentials: Mutex::new(Credentials {
                user: default_user.to_string(),
                password: default_password.to_string(),
            }),
        }
    }

    /// Exact match of both the username and the password.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let Ok(creds) = self.credentials.lock() else {
            return false;
        };
        creds.user == username && creds.password == password
    }

    /// The username substituted in for the single-argument AUTH form.
    pub fn default_user(&self) -> String {
        self.credentials
            .lock()
            .map(|c| c.user.clone())
            .unwrap_or_default()
    }
}
