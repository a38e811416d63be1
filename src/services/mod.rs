pub mod background_tasks;
pub mod directory;
pub mod idp_jwks;
pub mod key_material;
pub mod mint;
pub mod token_store;
pub mod vouch_cookie;

pub use background_tasks::initialize_background_tasks;
pub use directory::{DirectoryAdapter, DirectoryError};
pub use idp_jwks::{IdpJwksCache, JwksError};
pub use key_material::{KeyMaterial, KeyMaterialError};
pub use mint::{hash_token, MintError, MintOutcome, MintPipeline, MintPipelineConfig, MintRequest};
pub use token_store::TokenStore;
pub use vouch_cookie::{CustomClaimsType, VouchCodec, VouchCookieError};
