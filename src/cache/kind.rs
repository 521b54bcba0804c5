/// Nominal tag distinguishing credential families that share the same
/// expiry and refresh machinery.
pub trait CredentialKind: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Plain and stable access tokens.
#[derive(Debug)]
pub enum AccessTokenKind {}

impl CredentialKind for AccessTokenKind {
    const NAME: &'static str = "access_token";
}

/// Tickets (e.g. jsapi) issued against an access token.
#[derive(Debug)]
pub enum TicketKind {}

impl CredentialKind for TicketKind {
    const NAME: &'static str = "ticket";
}
