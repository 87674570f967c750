use std::fmt;
use std::str::FromStr;

use crate::AccountError;

/// A structurally valid email address: `local@domain`.
///
/// Generated configuration is line oriented and uses `:` to separate the
/// address from its credential, so whitespace, control characters and `:`
/// are refused on top of the single `@` rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    full: String,
    at: usize,
}

impl Address {
    pub fn parse(input: &str) -> Result<Self, AccountError> {
        let invalid = || AccountError::InvalidAddress(input.to_string());

        let mut parts = input.match_indices('@');
        let at = match (parts.next(), parts.next()) {
            (Some((at, _)), None) => at,
            _ => return Err(invalid()),
        };

        if at == 0 || at + 1 == input.len() {
            return Err(invalid());
        }
        if input
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ':')
        {
            return Err(invalid());
        }

        Ok(Self {
            full: input.to_string(),
            at,
        })
    }

    pub fn as_str(&self) -> &str {
        self.full.as_str()
    }

    pub fn local_part(&self) -> &str {
        &self.full[..self.at]
    }

    pub fn domain(&self) -> &str {
        &self.full[self.at + 1..]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for Address {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parts() {
        let a = Address::parse("alice@example.com").unwrap();
        assert_eq!(a.local_part(), "alice");
        assert_eq!(a.domain(), "example.com");
        assert_eq!(a.to_string(), "alice@example.com");
    }

    #[test]
    fn reject_malformed() {
        for bad in [
            "",
            "alice",
            "@example.com",
            "alice@",
            "@",
            "alice@@example.com",
            "alice@example@com",
            "al ice@example.com",
            "alice@example.com\nvirtual_mailbox_domains = evil",
            "alice:x@example.com",
        ] {
            assert_eq!(
                Address::parse(bad),
                Err(AccountError::InvalidAddress(bad.to_string())),
                "{:?} must be rejected",
                bad
            );
        }
    }

    #[test]
    fn unicode_is_accepted() {
        let a: Address = "andré@exemple.fr".parse().unwrap();
        assert_eq!(a.local_part(), "andré");
        assert_eq!(a.domain(), "exemple.fr");
    }
}
