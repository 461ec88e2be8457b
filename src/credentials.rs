//! Credential resolution.
//!
//! A SAS token wins over an access key when both are configured.  Missing
//! credentials are not an error here; requests simply go out unsigned and
//! the service rejects them.

use crate::config::AzureSettings;

/// The credential used to authorize blob requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// SAS token query string without the leading `?`.
    SasToken(String),
    /// Base64 storage account key.
    AccessKey(String),
    /// No credential configured.
    None,
}

/// Account name plus exactly one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub account_name: String,
    pub credential: Credential,
}

/// Resolve the credential set from `settings`.
pub fn resolve_credentials(settings: &AzureSettings) -> CredentialSet {
    let sas = settings
        .sas_token
        .as_deref()
        .map(|t| t.trim().trim_start_matches('?'))
        .filter(|t| !t.is_empty());
    let key = settings
        .access_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let credential = match (sas, key) {
        (Some(token), _) => Credential::SasToken(token.to_string()),
        (None, Some(key)) => Credential::AccessKey(key.to_string()),
        (None, None) => Credential::None,
    };

    CredentialSet {
        account_name: settings.account_name.clone(),
        credential,
    }
}
