use strongbox_core::OwnerId;

/// The authenticated caller, inserted as a request extension by
/// [`AuthLayer`](super::middleware::AuthLayer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterIdentity {
    /// Owner every artifact operation is checked against.
    pub owner: OwnerId,
    /// Authentication method (`"api_key"` or `"trusted_header"`).
    pub auth_method: String,
}
