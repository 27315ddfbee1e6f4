pub mod cf_cli;
pub mod credentials;
pub mod reporter;

pub use cf_cli::CfCli;
pub use credentials::{Credential, CredentialProvider, SharedCredential, TargetIdentity};
pub use reporter::{Reporter, SeriesPayload};
