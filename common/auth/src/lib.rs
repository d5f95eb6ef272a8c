pub mod claims;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extractors;
pub mod jwks;
pub mod verifier;

pub use claims::Claims;
pub use config::JwtConfig;
pub use decoder::ClaimsDecoder;
pub use error::{AuthError, AuthResult};
pub use extractors::bearer_token;
pub use jwks::JwksFetcher;
pub use verifier::{
    HmacVerifier, InMemoryKeyStore, JwtVerifier, JwtVerifierBuilder, SignatureVerifier,
    TokenAuthenticator, BREAK_GLASS_KID,
};
