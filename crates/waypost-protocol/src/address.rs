//! Network addresses and recipient normalisation.
//!
//! An address names an endpoint on the messaging network:
//!
//! ```text
//! 6281234@s.whatsapp.net          user on the default user server
//! 6281234:3@s.whatsapp.net        device 3 of that user
//! 6281234.1:3@s.whatsapp.net      agent 1, device 3
//! 120363025@g.us                  some other server class (not a user)
//! s.whatsapp.net                  server-only address (empty user)
//! ```
//!
//! Callers usually type a phone number, so [`normalize_recipient`] turns
//! `+6281234` into `6281234@s.whatsapp.net` before parsing.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// The server that hosts ordinary user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// A parsed network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Local part (a phone number for user addresses). May be empty.
    pub user: String,
    /// Agent number; 0 when absent.
    pub agent: u8,
    /// Device number; 0 means "the primary device".
    pub device: u16,
    /// Server part, e.g. [`DEFAULT_USER_SERVER`].
    pub server: String,
}

impl Address {
    /// Builds a plain `user@server` address.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            agent: 0,
            device: 0,
            server: server.into(),
        }
    }

    /// Builds an address on the default user server.
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Parses `user[.agent][:device]@server`, or a bare `server`.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidAddress`] when the text is empty, has more
    /// than one `@`, has an empty server, or carries a non-numeric
    /// agent/device suffix.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let invalid = |why| ProtocolError::InvalidAddress(text.to_string(), why);

        if text.is_empty() {
            return Err(invalid("empty address"));
        }

        let Some((local, server)) = text.split_once('@') else {
            return Ok(Self::new("", text));
        };
        if server.contains('@') {
            return Err(invalid("more than one '@'"));
        }
        if server.is_empty() {
            return Err(invalid("empty server"));
        }

        let Some((user_agent, device)) = local.split_once(':') else {
            return Ok(Self::new(local, server));
        };
        let device: u16 = device.parse().map_err(|_| invalid("bad device number"))?;
        let (user, agent) = match user_agent.split_once('.') {
            Some((user, agent)) => {
                let agent: u8 = agent.parse().map_err(|_| invalid("bad agent number"))?;
                (user, agent)
            }
            None => (user_agent, 0),
        };

        Ok(Self {
            user: user.to_string(),
            agent,
            device,
            server: server.to_string(),
        })
    }

    /// Whether this address belongs to the user-account class.
    pub fn is_user(&self) -> bool {
        self.server == DEFAULT_USER_SERVER
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return f.write_str(&self.server);
        }
        f.write_str(&self.user)?;
        if self.agent > 0 {
            write!(f, ".{}", self.agent)?;
        }
        if self.agent > 0 || self.device > 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}

/// Turns what a caller typed into a full address string.
///
/// Strips leading `+` signs and, when there is no `@`, appends the default
/// user server. Applying it twice gives the same result as applying it once.
pub fn normalize_recipient(raw: &str) -> String {
    let stripped = raw.trim_start_matches('+');
    if stripped.contains('@') {
        stripped.to_string()
    } else {
        format!("{stripped}@{DEFAULT_USER_SERVER}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_number_appends_user_server() {
        assert_eq!(normalize_recipient("6281234"), "6281234@s.whatsapp.net");
    }

    #[test]
    fn test_normalize_equivalent_spellings_agree() {
        let a = normalize_recipient("+6281234@s.whatsapp.net");
        let b = normalize_recipient("6281234@s.whatsapp.net");
        let c = normalize_recipient("6281234");
        let d = normalize_recipient("+6281234");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c, d);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["6281234", "+6281234", "++6281234", "1@g.us", "", "@s.whatsapp.net"] {
            let once = normalize_recipient(raw);
            assert_eq!(normalize_recipient(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn test_normalize_keeps_foreign_server() {
        assert_eq!(normalize_recipient("120363025@g.us"), "120363025@g.us");
    }

    #[test]
    fn test_parse_user_address() {
        let addr = Address::parse("6281234@s.whatsapp.net").unwrap();
        assert_eq!(addr, Address::user("6281234"));
        assert!(addr.is_user());
    }

    #[test]
    fn test_parse_device_and_agent() {
        let addr = Address::parse("6281234.1:3@s.whatsapp.net").unwrap();
        assert_eq!(addr.user, "6281234");
        assert_eq!(addr.agent, 1);
        assert_eq!(addr.device, 3);
        assert_eq!(addr.to_string(), "6281234.1:3@s.whatsapp.net");

        let addr = Address::parse("6281234:7@s.whatsapp.net").unwrap();
        assert_eq!(addr.agent, 0);
        assert_eq!(addr.device, 7);
        assert_eq!(addr.to_string(), "6281234:7@s.whatsapp.net");
    }

    #[test]
    fn test_parse_server_only() {
        let addr = Address::parse("s.whatsapp.net").unwrap();
        assert!(addr.user.is_empty());
        assert_eq!(addr.to_string(), "s.whatsapp.net");
    }

    #[test]
    fn test_parse_empty_user_is_allowed_but_empty() {
        let addr = Address::parse("@s.whatsapp.net").unwrap();
        assert!(addr.user.is_empty());
        assert!(addr.is_user());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "a@b@c", "123@", "123:x@s.whatsapp.net", "1.z:2@s.whatsapp.net"] {
            assert!(
                matches!(Address::parse(bad), Err(ProtocolError::InvalidAddress(..))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_group_address_is_not_user() {
        let addr: Address = "120363025@g.us".parse().unwrap();
        assert!(!addr.is_user());
    }
}
