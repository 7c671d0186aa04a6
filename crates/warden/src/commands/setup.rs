//! `setup`: register an ACME account

use tracing::{info, warn};

use warden_config::is_valid_email;

use crate::dns::Resolve;
use crate::services::Services;
use crate::stores::{AccountRecord, AccountStoreError};

use super::CommandError;

/// Whether setup created a new account
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub record: AccountRecord,
    pub created: bool,
}

/// Load or register the account for `services.server`
///
/// An account that is already stored is resumed instead of registered again.
pub async fn run(services: &Services, email: &str) -> Result<SetupOutcome, CommandError> {
    check_contact(services.resolver.as_ref(), email).await?;

    let accounts = services.layout.account_store();
    match accounts.load().await {
        Ok((_, record)) => {
            services.acme.resume_account(&record.credentials).await?;
            if record.email != email {
                warn!(
                    stored = %record.email,
                    requested = %email,
                    "Account is registered with a different contact"
                );
            }
            info!(account = %record.account_url, "Existing account loaded");
            return Ok(SetupOutcome {
                record,
                created: false,
            });
        }
        Err(AccountStoreError::NotRegistered { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    info!(server = %services.server, "No account found, registering");
    let registration = services.acme.register(email).await?;
    let record = accounts.save(email, &registration).await?;
    info!(
        account = %record.account_url,
        contact = %registration.contact.join(", "),
        "Registration successful"
    );

    Ok(SetupOutcome {
        record,
        created: true,
    })
}

/// Syntax check plus an MX lookup on the email's domain
pub async fn check_contact(resolver: &dyn Resolve, email: &str) -> Result<(), CommandError> {
    if !is_valid_email(email) {
        return Err(CommandError::InvalidEmail(email.to_string()));
    }
    let host = email
        .rsplit_once('@')
        .map(|(_, host)| host)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| CommandError::InvalidEmail(email.to_string()))?;

    if !resolver.has_mx(host).await? {
        return Err(CommandError::NoMxRecord(host.to_string()));
    }
    Ok(())
}
