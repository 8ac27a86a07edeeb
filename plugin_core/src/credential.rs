use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username and password the user typed or an earlier mechanism stored.
///
/// Both strings are wiped on drop and by [`Credential::scrub`]. `Debug`
/// never prints the password.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: String) -> Self {
        Credential {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Wipe both fields now instead of waiting for the drop.
    pub fn scrub(&mut self) {
        self.zeroize();
    }

    pub fn is_scrubbed(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_password() {
        let credential = Credential::new("alice", "correct horse".to_string());
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("correct horse"));
    }

    #[test]
    fn scrub_clears_both_fields() {
        let mut credential = Credential::new("alice", "secret".to_string());
        credential.scrub();
        assert!(credential.is_scrubbed());
        assert_eq!(credential.password(), "");
    }
}
