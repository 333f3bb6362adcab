//! Session core of the auth service: token codec, single-use token ledger,
//! password handling and the HTTP surface under `/api/auth`.

pub mod handlers;
pub mod identity;
pub mod ledger;
pub mod password;
mod service;
pub mod token;

pub use identity::{Identity, USER_ID_HEADER, USER_ROLE_HEADER};
pub use ledger::{InMemoryRefreshLedger, PgRefreshLedger, RefreshLedger};
pub use password::PasswordPolicy;
pub use service::{AuthService, NewAccount, TokenPair};
pub use token::{Claims, TokenCodec, TokenKind, TokenLifetimes};
