//! Passkey-owned smart accounts.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`passkey`] | Registration and authentication ceremonies |
//! | [`smart_account`] | Kernel account derivation and call encoding |
//! | [`session`] | Estimate, confirm and track one batch of calls |

pub mod passkey;
pub mod session;
pub mod smart_account;

pub use passkey::{
    AuthenticationChallenge, Authenticator, AuthenticatorError, PasskeyServer,
    RegistrationCredential, RegistrationOptions, RelayPasskeyServer, SignRequest,
    VerifiedCredential, WebAuthnAssertion,
};
pub use session::{AccountSession, Estimate, EstimateState, EstimatorHandle};
pub use smart_account::{AccountVersion, ENTRY_POINT_V07, KERNEL_V3_1, SmartAccount, WebAuthnOwner};
