//! Stand-in address book. The real directory lookup (LDAP/SQL user table)
//! is out of scope per the design — `AddressBook` is an injected trait
//! precisely so a real directory can be plugged in later. This
//! implementation resolves any syntactically valid `local@domain` address
//! to a mail user whose account name is its local part, optionally
//! stripping the domain per `-e`.

use kopano_lmtp::resolver::{AddressBook, Lookup, ObjectType, ResolvedEntry};

pub struct LocalAddressBook {
    pub strip_domain: bool,
}

impl AddressBook for LocalAddressBook {
    fn lookup(&self, raw: &str) -> kopano_core::Result<Lookup> {
        let Some((local, domain)) = raw.split_once('@') else {
            return Ok(Lookup::NotFound);
        };
        if local.is_empty() {
            return Ok(Lookup::NotFound);
        }
        let account = if self.strip_domain { local.to_string() } else { format!("{local}@{domain}") };
        Ok(Lookup::Resolved(ResolvedEntry {
            entry_id: format!("local:{account}"),
            display_name: local.to_string(),
            account,
            smtp: raw.to_string(),
            addr_type: "SMTP".into(),
            unicode_email: !raw.is_ascii(),
            display_type: 0,
            company_name: domain.to_string(),
            home_server: "localhost".into(),
            is_admin: false,
            has_imap_feature: false,
            object_type: ObjectType::MailUser,
            search_key: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_local_part_as_account() {
        let book = LocalAddressBook { strip_domain: false };
        match book.lookup("alice@example.com").unwrap() {
            Lookup::Resolved(entry) => assert_eq!(entry.account, "alice@example.com"),
            _ => panic!("expected resolved"),
        }
    }

    #[test]
    fn strip_domain_drops_the_host_part() {
        let book = LocalAddressBook { strip_domain: true };
        match book.lookup("alice@example.com").unwrap() {
            Lookup::Resolved(entry) => assert_eq!(entry.account, "alice"),
            _ => panic!("expected resolved"),
        }
    }

    #[test]
    fn addresses_without_a_host_part_are_not_found() {
        let book = LocalAddressBook { strip_domain: false };
        assert!(matches!(book.lookup("not-an-address").unwrap(), Lookup::NotFound));
    }
}
