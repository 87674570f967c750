//! Per-account configuration documents for the relay (Postfix) and the
//! mailbox daemon (Dovecot).
//!
//! Rendering is pure: no I/O, no randomness. The same address, hash and
//! forwarding rules always give byte-identical documents, which is what
//! allows the sync layer to rewrite them blindly on every update.
//!
//! Both documents share the same section order:
//!
//! ```text
//! domain block
//! authentication block
//! TLS / transport block
//! mailbox mapping
//! forwarding block      (omitted when there is no forwarding rule)
//! credential line
//! ```
pub mod settings;

use vmail_account::{AccountError, Address, ForwardingRule};

pub use settings::{MailboxSettings, RelaySettings};

/// Both documents for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub relay: String,
    pub mailbox: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigRenderer {
    relay: RelaySettings,
    mailbox: MailboxSettings,
}

impl ConfigRenderer {
    pub fn new(relay: RelaySettings, mailbox: MailboxSettings) -> Self {
        Self { relay, mailbox }
    }

    pub fn render(
        &self,
        address: &str,
        hashed_credential: &str,
        forwarding_rules: &[ForwardingRule],
    ) -> Result<RenderedConfig, AccountError> {
        Ok(RenderedConfig {
            relay: self.render_relay(address, hashed_credential, forwarding_rules)?,
            mailbox: self.render_mailbox(address, hashed_credential, forwarding_rules)?,
        })
    }

    /// Postfix document. The domain is always taken from the address.
    pub fn render_relay(
        &self,
        address: &str,
        hashed_credential: &str,
        forwarding_rules: &[ForwardingRule],
    ) -> Result<String, AccountError> {
        let (address, destinations) = checked_input(address, hashed_credential, forwarding_rules)?;
        let domain = address.domain();
        let s = &self.relay;
        tracing::trace!(address=%address, forwards=destinations.len(), "render relay document");

        let mut doc = Document::default();
        doc.section("Virtual domain configuration")
            .setting("virtual_mailbox_domains", domain)
            .setting("virtual_mailbox_base", &s.virtual_mailbox_base)
            .setting("virtual_mailbox_maps", &s.virtual_mailbox_maps)
            .setting("virtual_minimum_uid", s.virtual_minimum_uid)
            .setting("virtual_uid_maps", format!("static:{}", s.uid))
            .setting("virtual_gid_maps", format!("static:{}", s.gid));

        doc.section("SASL authentication")
            .setting("smtpd_sasl_type", &s.sasl_type)
            .setting("smtpd_sasl_path", &s.sasl_path)
            .setting("smtpd_sasl_auth_enable", "yes");
        if !s.recipient_restrictions.is_empty() {
            doc.line("smtpd_recipient_restrictions =");
            let last = s.recipient_restrictions.len() - 1;
            for (i, restriction) in s.recipient_restrictions.iter().enumerate() {
                let sep = if i == last { "" } else { "," };
                doc.line(format!("    {}{}", restriction, sep));
            }
        }

        doc.section("TLS parameters")
            .setting("smtpd_tls_cert_file", &s.tls_cert_file)
            .setting("smtpd_tls_key_file", &s.tls_key_file)
            .setting("smtpd_use_tls", "yes")
            .setting("smtpd_tls_auth_only", yes_no(s.tls_auth_only));

        doc.section("Virtual mailbox")
            .line(format!("{} {}/{}/", address, domain, address));

        if !destinations.is_empty() {
            doc.section("Forwarding");
            for destination in destinations.iter() {
                doc.line(format!("{} {}", address, destination));
            }
        }

        doc.section("User authentication")
            .line(format!("{}:{}", address, hashed_credential));

        Ok(doc.finish())
    }

    /// Dovecot document.
    pub fn render_mailbox(
        &self,
        address: &str,
        hashed_credential: &str,
        forwarding_rules: &[ForwardingRule],
    ) -> Result<String, AccountError> {
        let (address, destinations) = checked_input(address, hashed_credential, forwarding_rules)?;
        let s = &self.mailbox;
        tracing::trace!(address=%address, forwards=destinations.len(), "render mailbox document");

        let mut doc = Document::default();
        doc.section("Virtual domain")
            .setting("auth_default_realm", address.domain());

        doc.section("Authentication")
            .setting("auth_mechanisms", s.auth_mechanisms.join(" "))
            .setting("disable_plaintext_auth", "yes")
            .line("passdb {")
            .line("  driver = passwd-file")
            .line(format!(
                "  args = scheme={} username_format=%u",
                s.password_scheme
            ))
            .line("}");

        doc.section("SSL parameters")
            .setting("ssl", "required")
            .setting("ssl_cert", format!("<{}", s.ssl_cert_file))
            .setting("ssl_key", format!("<{}", s.ssl_key_file));

        doc.section("Mailbox location")
            .setting(
                "mail_location",
                format!("maildir:{}/{}", s.mail_base.trim_end_matches('/'), address),
            )
            .setting("mail_uid", s.uid)
            .setting("mail_gid", s.gid);

        if !destinations.is_empty() {
            doc.section("Forwarding");
            for destination in destinations.iter() {
                doc.line(format!("redirect :copy \"{}\";", destination));
            }
        }

        doc.section("User credentials")
            .line(format!("{}:{}", address, hashed_credential));

        Ok(doc.finish())
    }
}

fn checked_input(
    address: &str,
    hashed_credential: &str,
    forwarding_rules: &[ForwardingRule],
) -> Result<(Address, Vec<Address>), AccountError> {
    let address = Address::parse(address)?;
    let destinations = forwarding_rules
        .iter()
        .map(|rule| Address::parse(&rule.destination))
        .collect::<Result<Vec<_>, _>>()?;

    // A hash is embedded verbatim on a `address:hash` line.
    if hashed_credential.is_empty()
        || hashed_credential
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ':')
    {
        return Err(AccountError::MalformedHash);
    }

    Ok((address, destinations))
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// Line-oriented text builder; sections are separated by a blank line.
#[derive(Default)]
struct Document {
    text: String,
}

impl Document {
    fn section(&mut self, title: &str) -> &mut Self {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.line(format!("# {}", title))
    }

    fn setting(&mut self, key: &str, value: impl std::fmt::Display) -> &mut Self {
        self.line(format!("{} = {}", key, value))
    }

    fn line(&mut self, line: impl AsRef<str>) -> &mut Self {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
        self
    }

    fn finish(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNoaGFzaA";

    fn rules(destinations: &[&str]) -> Vec<ForwardingRule> {
        destinations.iter().map(|d| ForwardingRule::new(*d)).collect()
    }

    #[test]
    fn relay_document() {
        let r = ConfigRenderer::default();
        let doc = r.render_relay("alice@example.com", HASH, &[]).unwrap();

        let expected = format!(
            "# Virtual domain configuration
virtual_mailbox_domains = example.com
virtual_mailbox_base = /var/mail
virtual_mailbox_maps = hash:/etc/postfix/vmailbox
virtual_minimum_uid = 100
virtual_uid_maps = static:5000
virtual_gid_maps = static:5000

# SASL authentication
smtpd_sasl_type = dovecot
smtpd_sasl_path = private/auth
smtpd_sasl_auth_enable = yes
smtpd_recipient_restrictions =
    permit_sasl_authenticated,
    permit_mynetworks,
    reject_unauth_destination

# TLS parameters
smtpd_tls_cert_file = /etc/ssl/certs/ssl-cert-snakeoil.pem
smtpd_tls_key_file = /etc/ssl/private/ssl-cert-snakeoil.key
smtpd_use_tls = yes
smtpd_tls_auth_only = yes

# Virtual mailbox
alice@example.com example.com/alice@example.com/

# User authentication
alice@example.com:{}
",
            HASH
        );
        assert_eq!(doc, expected);
    }

    #[test]
    fn no_forwarding_lines_without_rules() {
        let r = ConfigRenderer::default();
        let relay = r.render_relay("alice@example.com", HASH, &[]).unwrap();
        let mailbox = r.render_mailbox("alice@example.com", HASH, &[]).unwrap();

        assert!(relay
            .lines()
            .any(|l| l == "alice@example.com example.com/alice@example.com/"));
        assert!(!relay.contains("# Forwarding"));
        assert!(!mailbox.contains("# Forwarding"));
        assert!(!mailbox.contains("redirect"));
    }

    #[test]
    fn forwarding_in_order() {
        let r = ConfigRenderer::default();
        let fw = rules(&["carol@other.com", "dave@third.org", "carol@other.com"]);
        let relay = r.render_relay("bob@example.com", HASH, &fw).unwrap();
        let mailbox = r.render_mailbox("bob@example.com", HASH, &fw).unwrap();

        assert!(relay.contains(
            "# Forwarding\nbob@example.com carol@other.com\nbob@example.com dave@third.org\nbob@example.com carol@other.com\n"
        ));
        assert!(mailbox.contains(
            "# Forwarding\nredirect :copy \"carol@other.com\";\nredirect :copy \"dave@third.org\";\nredirect :copy \"carol@other.com\";\n"
        ));

        // forwarding comes right before the credential block
        let fw_at = relay.find("# Forwarding").unwrap();
        let mapping_at = relay.find("# Virtual mailbox").unwrap();
        let cred_at = relay.find("# User authentication").unwrap();
        assert!(mapping_at < fw_at && fw_at < cred_at);
        assert!(relay.ends_with(&format!("bob@example.com:{}\n", HASH)));
        assert!(mailbox.ends_with(&format!("bob@example.com:{}\n", HASH)));
    }

    #[test]
    fn mailbox_document() {
        let r = ConfigRenderer::default();
        let doc = r.render_mailbox("alice@example.com", HASH, &[]).unwrap();
        let sections: Vec<&str> = doc.lines().filter(|l| l.starts_with("# ")).collect();
        assert_eq!(
            sections,
            vec![
                "# Virtual domain",
                "# Authentication",
                "# SSL parameters",
                "# Mailbox location",
                "# User credentials"
            ]
        );
        assert!(doc.contains("auth_default_realm = example.com\n"));
        assert!(doc.contains("mail_location = maildir:/var/mail/alice@example.com\n"));
        assert!(doc.contains("  args = scheme=ARGON2ID username_format=%u\n"));
    }

    #[test]
    fn deterministic() {
        let r = ConfigRenderer::default();
        let fw = rules(&["carol@other.com"]);
        let a = r.render("bob@example.com", HASH, &fw).unwrap();
        let b = r.render("bob@example.com", HASH, &fw).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_addresses() {
        let r = ConfigRenderer::default();
        for bad in ["bob.example.com", "bob@ex@ample.com", "@example.com", "bob@"] {
            let expected = Err(AccountError::InvalidAddress(bad.to_string()));
            assert_eq!(r.render_relay(bad, HASH, &[]), expected);
            assert_eq!(r.render_mailbox(bad, HASH, &[]), expected);
        }

        let fw = rules(&["not-an-address"]);
        assert_eq!(
            r.render("bob@example.com", HASH, &fw),
            Err(AccountError::InvalidAddress("not-an-address".into()))
        );
    }

    #[test]
    fn refuse_injected_hash() {
        let r = ConfigRenderer::default();
        for bad in ["", "abc\nvirtual_mailbox_domains = evil", "a:b"] {
            assert_eq!(
                r.render_relay("alice@example.com", bad, &[]),
                Err(AccountError::MalformedHash)
            );
        }
    }

    #[test]
    fn custom_settings() {
        let relay = RelaySettings {
            recipient_restrictions: vec![],
            tls_auth_only: false,
            ..RelaySettings::default()
        };
        let mailbox = MailboxSettings {
            mail_base: "/srv/vmail/".into(),
            ..MailboxSettings::default()
        };
        let r = ConfigRenderer::new(relay, mailbox);
        let doc = r.render("alice@example.com", HASH, &[]).unwrap();
        assert!(!doc.relay.contains("smtpd_recipient_restrictions"));
        assert!(doc.relay.contains("smtpd_tls_auth_only = no\n"));
        assert!(doc
            .mailbox
            .contains("mail_location = maildir:/srv/vmail/alice@example.com\n"));
    }
}
