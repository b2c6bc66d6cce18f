//! Credentials resolved on every connection attempt.
//!
//! Static deployments put the client id, username and password straight into
//! [`ClientConfig`](crate::ClientConfig). Devices that learn them at runtime
//! (provisioning over BLE, tokens that rotate, ids derived from a MAC read
//! late in boot) hand the client a [`CredentialSource`] instead.

/// The identity presented in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Credentials<'c> {
    pub client_id: &'c str,
    pub username: &'c str,
    pub password: &'c str,
}

impl<'c> Credentials<'c> {
    pub const fn new(client_id: &'c str, username: &'c str, password: &'c str) -> Self {
        Self {
            client_id,
            username,
            password,
        }
    }

    /// Whether every field is set.
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Supplies credentials that may change while the device runs.
///
/// The client asks before every connection attempt and again when building
/// CONNECT. While the answer is incomplete the attempt is held back: nothing
/// is opened and no backoff step is used.
pub trait CredentialSource {
    fn credentials(&mut self) -> Credentials<'_>;
}

impl CredentialSource for Credentials<'_> {
    fn credentials(&mut self) -> Credentials<'_> {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_only_when_every_field_is_set() {
        assert!(Credentials::new("id", "user", "pass").is_complete());
        assert!(!Credentials::new("", "user", "pass").is_complete());
        assert!(!Credentials::new("id", "", "pass").is_complete());
        assert!(!Credentials::new("id", "user", "").is_complete());
        assert!(!Credentials::default().is_complete());
    }

    #[test]
    fn fixed_credentials_are_their_own_source() {
        let mut fixed = Credentials::new("id", "user", "pass");
        assert_eq!(fixed.credentials(), Credentials::new("id", "user", "pass"));
    }
}
